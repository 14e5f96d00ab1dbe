/// Monotonic logical-block allocator. Blocks are handed out once and never
/// reassigned.
pub(crate) struct LbaAllocator {
  block_size: u32,
  next_lba: u32,
}

impl LbaAllocator {
  pub(crate) fn new(block_size: u32, start_lba: u32) -> Self {
    Self {
      block_size,
      next_lba: start_lba,
    }
  }

  /// Allocate enough whole blocks for `bytes`, returning the first LBA.
  pub(crate) fn allocate(&mut self, bytes: u64) -> u32 {
    let lba = self.next_lba;
    let blocks = bytes.div_ceil(self.block_size as u64);
    self.next_lba += blocks as u32;
    lba
  }

  pub(crate) fn next_lba(&self) -> u32 {
    self.next_lba
  }
}
