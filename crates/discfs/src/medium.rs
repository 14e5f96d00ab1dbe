//! Logical-sector I/O over a file or an equivalent byte backing.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::{Error, Result};

fn check_sector_size(sector_size: usize) -> Result<()> {
  if sector_size < 2048 || !sector_size.is_power_of_two() {
    return Err(Error::InvalidSectorSize(sector_size));
  }

  Ok(())
}

/// A block-addressable medium of fixed-size logical sectors.
///
/// The sector size is set once at construction and must be a power of two of
/// at least 2048 bytes. Reads past the current end yield zero-filled sectors;
/// writes extend the medium as needed. Access is single-threaded.
pub trait BlockMedium {
  fn sector_size(&self) -> usize;

  /// Whether the medium holds no sectors yet.
  fn is_blank(&self) -> bool;

  /// Number of sectors currently backed by storage.
  fn max_sectors(&self) -> usize;

  /// Read sector `index` into `out`. `out` must be exactly one sector long.
  fn read_sector_into(&mut self, index: usize, out: &mut [u8]) -> Result<()>;

  /// Write one full sector at `index`, extending the medium as needed.
  fn write_sector(&mut self, index: usize, data: &[u8]) -> Result<()>;

  /// Durably persist any buffered writes.
  fn sync(&mut self) -> Result<()>;

  /// Read sector `index` into a fresh buffer.
  fn read_sector(&mut self, index: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; self.sector_size()];
    self.read_sector_into(index, &mut buf)?;
    Ok(buf)
  }
}

/// A medium backed by any seekable byte stream, typically a [`std::fs::File`]
/// or a [`std::io::Cursor`].
pub struct FileMedium<S> {
  storage: S,
  sector_size: usize,
  len: u64,
}

impl<S: Seek> FileMedium<S> {
  pub fn new(mut storage: S, sector_size: usize) -> Result<Self> {
    check_sector_size(sector_size)?;
    let len = storage.seek(SeekFrom::End(0))?;

    Ok(Self {
      storage,
      sector_size,
      len,
    })
  }

  /// Release the medium, returning the underlying stream.
  pub fn into_inner(self) -> S {
    self.storage
  }
}

impl<S: Read + Write + Seek> BlockMedium for FileMedium<S> {
  fn sector_size(&self) -> usize {
    self.sector_size
  }

  fn is_blank(&self) -> bool {
    self.len == 0
  }

  fn max_sectors(&self) -> usize {
    (self.len / self.sector_size as u64) as usize
  }

  fn read_sector_into(&mut self, index: usize, out: &mut [u8]) -> Result<()> {
    debug_assert_eq!(out.len(), self.sector_size);

    let offset = index as u64 * self.sector_size as u64;
    if offset >= self.len {
      out.fill(0);
      return Ok(());
    }

    self.storage.seek(SeekFrom::Start(offset))?;

    // The final sector of a truncated backing may be short; the remainder
    // reads as zeros.
    let available = ((self.len - offset) as usize).min(out.len());
    self.storage.read_exact(&mut out[..available])?;
    out[available..].fill(0);

    Ok(())
  }

  fn write_sector(&mut self, index: usize, data: &[u8]) -> Result<()> {
    debug_assert_eq!(data.len(), self.sector_size);

    let offset = index as u64 * self.sector_size as u64;

    // Seeking past the end and writing extends the backing; the gap reads
    // back as zeros on every platform we target.
    self.storage.seek(SeekFrom::Start(offset))?;
    self.storage.write_all(data)?;
    self.len = self.len.max(offset + data.len() as u64);

    Ok(())
  }

  fn sync(&mut self) -> Result<()> {
    self.storage.flush()?;
    Ok(())
  }
}

/// A growable in-memory medium.
#[derive(Debug, Clone)]
pub struct MemoryMedium {
  sector_size: usize,
  data: Vec<u8>,
}

impl MemoryMedium {
  pub fn new(sector_size: usize) -> Result<Self> {
    check_sector_size(sector_size)?;

    Ok(Self {
      sector_size,
      data: Vec::new(),
    })
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn into_bytes(self) -> Vec<u8> {
    self.data
  }

  /// Wrap an existing image without copying.
  pub fn from_bytes(sector_size: usize, data: Vec<u8>) -> Result<Self> {
    check_sector_size(sector_size)?;
    Ok(Self { sector_size, data })
  }
}

impl BlockMedium for MemoryMedium {
  fn sector_size(&self) -> usize {
    self.sector_size
  }

  fn is_blank(&self) -> bool {
    self.data.is_empty()
  }

  fn max_sectors(&self) -> usize {
    self.data.len() / self.sector_size
  }

  fn read_sector_into(&mut self, index: usize, out: &mut [u8]) -> Result<()> {
    debug_assert_eq!(out.len(), self.sector_size);

    let offset = index * self.sector_size;
    if offset >= self.data.len() {
      out.fill(0);
      return Ok(());
    }

    let available = (self.data.len() - offset).min(out.len());
    out[..available].copy_from_slice(&self.data[offset..offset + available]);
    out[available..].fill(0);

    Ok(())
  }

  fn write_sector(&mut self, index: usize, data: &[u8]) -> Result<()> {
    debug_assert_eq!(data.len(), self.sector_size);

    let offset = index * self.sector_size;
    if self.data.len() < offset + data.len() {
      self.data.resize(offset + data.len(), 0);
    }
    self.data[offset..offset + data.len()].copy_from_slice(data);

    Ok(())
  }

  fn sync(&mut self) -> Result<()> {
    Ok(())
  }
}
