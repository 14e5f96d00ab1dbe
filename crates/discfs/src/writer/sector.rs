use crate::medium::BlockMedium;
use crate::{Error, Result};

/// Sequential sector-granular output. Bytes accumulate in a one-sector
/// buffer; each full sector is written through to the medium, and the final
/// partial sector is zero-padded on `finish`.
pub(crate) struct SectorStream<'a, M: BlockMedium> {
  medium: &'a mut M,
  sector_size: usize,
  next_sector: usize,
  buffer: Vec<u8>,
}

impl<'a, M: BlockMedium> SectorStream<'a, M> {
  pub(crate) fn new(medium: &'a mut M) -> Self {
    let sector_size = medium.sector_size();
    Self {
      medium,
      sector_size,
      next_sector: 0,
      buffer: Vec::with_capacity(sector_size),
    }
  }

  pub(crate) fn byte_position(&self) -> u64 {
    self.next_sector as u64 * self.sector_size as u64 + self.buffer.len() as u64
  }

  pub(crate) fn write_bytes(&mut self, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
      let room = self.sector_size - self.buffer.len();
      let take = room.min(bytes.len());
      self.buffer.extend_from_slice(&bytes[..take]);
      bytes = &bytes[take..];

      if self.buffer.len() == self.sector_size {
        self.medium.write_sector(self.next_sector, &self.buffer)?;
        self.next_sector += 1;
        self.buffer.clear();
      }
    }

    Ok(())
  }

  /// Zero-fill up to an absolute byte offset.
  pub(crate) fn pad_to_byte(&mut self, offset: u64) -> Result<()> {
    let position = self.byte_position();
    if offset < position {
      return Err(Error::PreconditionFailed(format!(
        "layout regression: at byte {position}, asked to pad back to {offset}"
      )));
    }

    let zeros = vec![0u8; self.sector_size];
    let mut remaining = offset - position;
    while remaining > 0 {
      let take = (zeros.len() as u64).min(remaining) as usize;
      self.write_bytes(&zeros[..take])?;
      remaining -= take as u64;
    }

    Ok(())
  }

  /// Flush the trailing partial sector, zero-padded.
  pub(crate) fn finish(mut self) -> Result<()> {
    if !self.buffer.is_empty() {
      self.buffer.resize(self.sector_size, 0);
      self.medium.write_sector(self.next_sector, &self.buffer)?;
    }

    Ok(())
  }
}
