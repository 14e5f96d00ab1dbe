//! The read path: descriptor selection, path resolution, directory
//! enumeration, and extent streaming.

use std::io::Read;

use byteorder::LittleEndian;

use crate::codec::{TextEncoding, VolumeTimestamp};
use crate::medium::BlockMedium;
use crate::record::{DirectoryRecord, PathTableRecord, RecordIdentifier};
use crate::susp::{ComponentFlags, NameFlags, SuspArea, SuspEntry, TfTimestamp};
use crate::volume::{self, VolumeDescriptor};
use crate::{Error, Result};

/// How paths are resolved: by walking directory extents or through the
/// path table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathLookup {
  DirectoryRecords,
  PathTable,
}

/// Which volume descriptor the filesystem reads through.
///
/// `Any` prefers the primary descriptor when its root directory carries SUSP
/// entries (Rock Ridge metadata is richer than Joliet names), then a
/// supplementary, then an enhanced descriptor, and falls back to the bare
/// primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorPolicy {
  Primary(PathLookup),
  Supplementary(PathLookup),
  Enhanced(PathLookup),
  Any(PathLookup),
}

impl DescriptorPolicy {
  pub fn lookup(&self) -> PathLookup {
    match self {
      DescriptorPolicy::Primary(lookup)
      | DescriptorPolicy::Supplementary(lookup)
      | DescriptorPolicy::Enhanced(lookup)
      | DescriptorPolicy::Any(lookup) => *lookup,
    }
  }
}

/// POSIX-ish metadata of one filesystem entry, populated from Rock Ridge
/// entries when present.
#[derive(Debug, Clone)]
pub struct Metadata {
  pub mode: Option<u32>,
  pub uid: Option<u32>,
  pub gid: Option<u32>,
  pub links: Option<u32>,
  pub created: Option<VolumeTimestamp>,
  pub modified: Option<VolumeTimestamp>,
  /// The originating directory record; carries the extent location and size.
  pub record: DirectoryRecord,
  /// The policy that resolved this entry.
  pub policy: DescriptorPolicy,
}

/// One entry of the filesystem.
#[derive(Debug, Clone)]
pub enum FsEntry {
  File {
    name: String,
    size: u64,
    metadata: Metadata,
  },
  Directory {
    name: String,
    metadata: Metadata,
  },
  Symlink {
    name: String,
    target: String,
    metadata: Metadata,
  },
  CurrentDirectory {
    metadata: Metadata,
  },
  ParentDirectory {
    metadata: Metadata,
  },
}

impl FsEntry {
  pub fn name(&self) -> &str {
    match self {
      FsEntry::File { name, .. }
      | FsEntry::Directory { name, .. }
      | FsEntry::Symlink { name, .. } => name,
      FsEntry::CurrentDirectory { .. } => ".",
      FsEntry::ParentDirectory { .. } => "..",
    }
  }

  pub fn metadata(&self) -> &Metadata {
    match self {
      FsEntry::File { metadata, .. }
      | FsEntry::Directory { metadata, .. }
      | FsEntry::Symlink { metadata, .. }
      | FsEntry::CurrentDirectory { metadata }
      | FsEntry::ParentDirectory { metadata } => metadata,
    }
  }

  pub fn is_directory(&self) -> bool {
    matches!(
      self,
      FsEntry::Directory { .. } | FsEntry::CurrentDirectory { .. } | FsEntry::ParentDirectory { .. }
    )
  }
}

/// Read one logical block. Blocks never straddle sectors since the sector
/// size is a power-of-two multiple of the block size.
fn read_block_into<M: BlockMedium>(
  medium: &mut M,
  block_size: u32,
  lba: u64,
  out: &mut [u8],
) -> Result<()> {
  let sector_size = medium.sector_size() as u64;
  let offset = lba * block_size as u64;
  let sector = medium.read_sector((offset / sector_size) as usize)?;
  let within = (offset % sector_size) as usize;
  out[..block_size as usize].copy_from_slice(&sector[within..within + block_size as usize]);
  Ok(())
}

/// An ISO 9660 filesystem over a block medium.
pub struct IsoFilesystem<M: BlockMedium> {
  medium: M,
  descriptors: Vec<VolumeDescriptor>,
  policy: DescriptorPolicy,
  active: usize,
  encoding: TextEncoding,
  susp: bool,
  block_size: u32,
}

impl<M: BlockMedium> IsoFilesystem<M> {
  /// Discover the descriptor set and select the descriptor the policy asks
  /// for.
  pub fn open(mut medium: M, policy: DescriptorPolicy) -> Result<Self> {
    let descriptors = volume::read_descriptor_set(&mut medium)?;

    let primary = descriptors
      .iter()
      .position(|d| matches!(d, VolumeDescriptor::Primary(_)));
    let supplementary = descriptors
      .iter()
      .position(|d| matches!(d, VolumeDescriptor::Supplementary(_)));
    let enhanced = descriptors
      .iter()
      .position(|d| matches!(d, VolumeDescriptor::Enhanced(_)));

    // Every valid volume carries a primary descriptor.
    let primary = primary.ok_or(Error::InvalidImage)?;

    let active = match policy {
      DescriptorPolicy::Primary(_) => primary,
      DescriptorPolicy::Supplementary(_) => {
        supplementary.ok_or(Error::InvalidVolumeDirectoryDescriptor)?
      }
      DescriptorPolicy::Enhanced(_) => enhanced.ok_or(Error::InvalidVolumeDirectoryDescriptor)?,
      DescriptorPolicy::Any(_) => {
        if primary_root_has_susp(&mut medium, &descriptors[primary])? {
          primary
        } else if let Some(supplementary) = supplementary {
          supplementary
        } else if let Some(enhanced) = enhanced {
          enhanced
        } else {
          primary
        }
      }
    };

    let descriptor = &descriptors[active];
    let block_size = descriptor
      .logical_block_size()
      .ok_or(Error::InvalidVolumeDirectoryDescriptor)? as u32;
    if block_size == 0 || !block_size.is_power_of_two() {
      return Err(Error::InvalidLogicalBlockSize(block_size));
    }
    if block_size as usize > medium.sector_size() {
      return Err(Error::InvalidLogicalBlockSize(block_size));
    }

    let encoding = descriptor.encoding().ok_or(Error::InvalidVolumeDirectoryDescriptor)?;
    let susp = matches!(descriptor, VolumeDescriptor::Primary(_));

    log::debug!(
      "opened volume through descriptor {active} (type {}), block size {block_size}",
      descriptor.descriptor_type()
    );

    Ok(Self {
      medium,
      descriptors,
      policy,
      active,
      encoding,
      susp,
      block_size,
    })
  }

  /// Every descriptor discovered on the volume, terminator included.
  pub fn descriptors(&self) -> &[VolumeDescriptor] {
    &self.descriptors
  }

  pub fn active_descriptor(&self) -> &VolumeDescriptor {
    &self.descriptors[self.active]
  }

  pub fn block_size(&self) -> u32 {
    self.block_size
  }

  /// Whether the primary root directory carries Rock Ridge metadata.
  pub fn is_rock_ridge(&mut self) -> Result<bool> {
    let primary = self
      .descriptors
      .iter()
      .position(|d| matches!(d, VolumeDescriptor::Primary(_)))
      .ok_or(Error::InvalidImage)?;

    let descriptor = self.descriptors[primary].clone();
    primary_root_has_susp(&mut self.medium, &descriptor)
  }

  fn read_extent(&mut self, lba: u32, length: u32) -> Result<Vec<u8>> {
    let block_size = self.block_size;
    let blocks = (length as u64).div_ceil(block_size as u64);
    let mut out = vec![0u8; (blocks * block_size as u64) as usize];

    for index in 0..blocks {
      let at = (index * block_size as u64) as usize;
      read_block_into(
        &mut self.medium,
        block_size,
        lba as u64 + index,
        &mut out[at..at + block_size as usize],
      )?;
    }

    out.truncate(length as usize);
    Ok(out)
  }

  /// Fetch `length` bytes of SUSP continuation at a block/offset coordinate.
  fn read_continuation(&mut self, block: u32, offset: u32, length: u32) -> Result<Vec<u8>> {
    let block_size = self.block_size as u64;
    let start = block as u64 * block_size + offset as u64;
    let end = start + length as u64;

    let first = start / block_size;
    let count = end.div_ceil(block_size) - first;
    let mut bytes = vec![0u8; (count * block_size) as usize];
    for index in 0..count {
      let at = (index * block_size) as usize;
      read_block_into(
        &mut self.medium,
        self.block_size,
        first + index,
        &mut bytes[at..at + block_size as usize],
      )?;
    }

    let within = (start % block_size) as usize;
    Ok(bytes[within..within + length as usize].to_vec())
  }

  /// Assemble the complete SUSP area of one record, following CE chains.
  fn assemble_area(&mut self, record: &DirectoryRecord) -> Result<Option<SuspArea>> {
    if !self.susp || record.system_use().is_empty() {
      return Ok(None);
    }

    let mut area = SuspArea::from_system_use(record.system_use());
    while let Some((block, offset, length)) = area.next_continuation() {
      let bytes = self.read_continuation(block, offset, length)?;
      if !area.add_continuation(&bytes) {
        break;
      }
    }

    if area.raw_entries().is_empty() {
      Ok(None)
    } else {
      Ok(Some(area))
    }
  }

  fn build_entry(&mut self, record: DirectoryRecord) -> Result<FsEntry> {
    let area = self.assemble_area(&record)?;

    let mut metadata = Metadata {
      mode: None,
      uid: None,
      gid: None,
      links: None,
      created: record.recording_date.map(Into::into),
      modified: record.recording_date.map(Into::into),
      record,
      policy: self.policy,
    };

    let mut alternate_name = None;
    let mut symlink_target = None;

    if let Some(area) = area {
      for entry in area.entries() {
        match entry {
          SuspEntry::PosixAttributes {
            mode,
            links,
            uid,
            gid,
            ..
          } => {
            metadata.mode = Some(mode);
            metadata.links = Some(links);
            metadata.uid = Some(uid);
            metadata.gid = Some(gid);
          }
          SuspEntry::AlternateName { flags, name } => {
            if !flags.intersects(NameFlags::CURRENT | NameFlags::PARENT) {
              alternate_name = Some(String::from_utf8_lossy(&name).into_owned());
            }
          }
          SuspEntry::Symlink { components, .. } => {
            symlink_target = Some(symlink_target_string(&components));
          }
          SuspEntry::Timestamps(tf) => {
            let normalize = |slot: Option<TfTimestamp>| {
              slot.map(|ts| match ts {
                TfTimestamp::Short(ts) => ts.into(),
                TfTimestamp::Long(ts) => ts,
              })
            };
            if let Some(created) = normalize(tf.creation) {
              metadata.created = Some(created);
            }
            if let Some(modified) = normalize(tf.modification) {
              metadata.modified = Some(modified);
            }
          }
          _ => {}
        }
      }
    }

    Ok(match metadata.record.identifier(self.encoding) {
      RecordIdentifier::CurrentDirectory => FsEntry::CurrentDirectory { metadata },
      RecordIdentifier::ParentDirectory => FsEntry::ParentDirectory { metadata },
      RecordIdentifier::Directory(name) => FsEntry::Directory {
        name: alternate_name.unwrap_or(name),
        metadata,
      },
      RecordIdentifier::File(name) => {
        let name = alternate_name.unwrap_or(name);
        match symlink_target {
          Some(target) => FsEntry::Symlink {
            name,
            target,
            metadata,
          },
          None => FsEntry::File {
            size: metadata.record.data_length as u64,
            name,
            metadata,
          },
        }
      }
    })
  }

  /// Walk the records of one directory extent. A zero length byte skips to
  /// the next block boundary; a malformed record ends the walk.
  fn walk_directory(&mut self, extent_lba: u32, data_length: u32) -> Result<Vec<DirectoryRecord>> {
    let bytes = self.read_extent(extent_lba, data_length)?;
    let block_size = self.block_size as usize;
    let mut records = Vec::new();
    let mut at = 0;

    while at < bytes.len() {
      if bytes[at] == 0 {
        at = (at / block_size + 1) * block_size;
        continue;
      }

      match DirectoryRecord::parse(&bytes[at..]) {
        Ok((record, consumed)) => {
          records.push(record);
          at += consumed;
        }
        Err(_) => {
          log::debug!("malformed directory record at extent {extent_lba} offset {at}");
          break;
        }
      }
    }

    Ok(records)
  }

  fn directory_entries(&mut self, extent_lba: u32, data_length: u32) -> Result<Vec<FsEntry>> {
    let records = self.walk_directory(extent_lba, data_length)?;
    records
      .into_iter()
      .map(|record| self.build_entry(record))
      .collect()
  }

  fn root_entry(&mut self) -> Result<FsEntry> {
    let root = self
      .active_descriptor()
      .root_directory_record()
      .ok_or(Error::InvalidVolumeDirectoryDescriptor)?
      .clone();

    let metadata = Metadata {
      mode: None,
      uid: None,
      gid: None,
      links: None,
      created: root.recording_date.map(Into::into),
      modified: root.recording_date.map(Into::into),
      record: root,
      policy: self.policy,
    };

    Ok(FsEntry::Directory {
      name: String::new(),
      metadata,
    })
  }

  /// Resolve a path to an entry using the policy's lookup mode.
  pub fn entry(&mut self, path: &str) -> Result<FsEntry> {
    match self.policy.lookup() {
      PathLookup::DirectoryRecords => self.resolve_by_records(path),
      PathLookup::PathTable => self.resolve_by_path_table(path),
    }
  }

  fn resolve_by_records(&mut self, path: &str) -> Result<FsEntry> {
    let mut current = self.root_entry()?;

    for component in path_components(path) {
      let record = &current.metadata().record;
      if !record.is_directory() {
        return Err(Error::InvalidPath(path.to_string()));
      }

      let (lba, length) = (record.extent_location, record.data_length);
      let entries = self.directory_entries(lba, length)?;

      current = entries
        .into_iter()
        .filter(|entry| {
          !matches!(
            entry,
            FsEntry::CurrentDirectory { .. } | FsEntry::ParentDirectory { .. }
          )
        })
        .find(|entry| names_match(entry.name(), component))
        .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
    }

    Ok(current)
  }

  fn read_path_table(&mut self) -> Result<Vec<PathTableRecord>> {
    let (size, l_location, _) = self
      .active_descriptor()
      .path_table_geometry()
      .ok_or(Error::InvalidVolumeDirectoryDescriptor)?;

    let bytes = self.read_extent(l_location, size)?;
    let mut records = Vec::new();
    let mut at = 0;

    while at < bytes.len() {
      match PathTableRecord::parse::<LittleEndian>(&bytes[at..]) {
        Ok((record, consumed)) => {
          records.push(record);
          at += consumed;
        }
        Err(_) => break,
      }
    }

    Ok(records)
  }

  /// Build the directory entry for a path-table record by reading its
  /// extent's own "." record, which carries the extent size.
  fn directory_entry_from_table(&mut self, name: &str, extent_lba: u32) -> Result<FsEntry> {
    let mut probe = vec![0u8; self.block_size as usize];
    read_block_into(&mut self.medium, self.block_size, extent_lba as u64, &mut probe)?;

    let (dot, _) = DirectoryRecord::parse(&probe)?;
    let entry = self.build_entry(dot)?;

    Ok(FsEntry::Directory {
      name: name.to_string(),
      metadata: entry.metadata().clone(),
    })
  }

  fn resolve_by_path_table(&mut self, path: &str) -> Result<FsEntry> {
    let components: Vec<&str> = path_components(path).collect();
    if components.is_empty() {
      return self.root_entry();
    }

    let records = self.read_path_table()?;
    let mut target_parent: u16 = 1;

    for (depth, component) in components.iter().enumerate() {
      let last = depth + 1 == components.len();

      // Record numbering is 1-based declaration order (ECMA-119 §9.4).
      let found = records.iter().enumerate().find(|(_, record)| {
        record.parent_directory_number == target_parent
          && names_match(&self.encoding.decode(&record.identifier), component)
      });

      match found {
        Some((index, record)) => {
          if last {
            return self.directory_entry_from_table(component, record.extent_location);
          }
          target_parent = (index + 1) as u16;
        }
        None if last => {
          // Not a directory; search the matched parent's extent for a file.
          let parent = records
            .get(target_parent as usize - 1)
            .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
          let parent_lba = parent.extent_location;
          let parent_entry = self.directory_entry_from_table("", parent_lba)?;
          let parent_record = &parent_entry.metadata().record;
          let (lba, length) = (parent_record.extent_location, parent_record.data_length);

          return self
            .directory_entries(lba, length)?
            .into_iter()
            .filter(|entry| !entry.is_directory())
            .find(|entry| names_match(entry.name(), component))
            .ok_or_else(|| Error::InvalidPath(path.to_string()));
        }
        None => return Err(Error::InvalidPath(path.to_string())),
      }
    }

    unreachable!("loop returns on the last component");
  }

  /// Enumerate a directory, dot records included.
  pub fn read_dir(&mut self, path: &str) -> Result<Vec<FsEntry>> {
    let entry = self.entry(path)?;
    let record = &entry.metadata().record;
    if !record.is_directory() {
      return Err(Error::InvalidPath(path.to_string()));
    }

    let (lba, length) = (record.extent_location, record.data_length);
    self.directory_entries(lba, length)
  }

  /// Child names of a directory, in directory order.
  pub fn list(&mut self, path: &str) -> Result<Vec<String>> {
    Ok(
      self
        .read_dir(path)?
        .into_iter()
        .filter(|entry| {
          !matches!(
            entry,
            FsEntry::CurrentDirectory { .. } | FsEntry::ParentDirectory { .. }
          )
        })
        .map(|entry| entry.name().to_string())
        .collect(),
    )
  }

  /// Open a file as a restartable byte stream over its extent.
  pub fn read_file(&mut self, path: &str) -> Result<FileStream<'_, M>> {
    let entry = self.entry(path)?;
    match entry {
      FsEntry::File { metadata, size, .. } => Ok(FileStream::new(
        &mut self.medium,
        self.block_size,
        metadata.record.extent_location,
        size,
      )),
      _ => Err(Error::InvalidPath(path.to_string())),
    }
  }

  /// Release the filesystem, returning the medium.
  pub fn into_medium(self) -> M {
    self.medium
  }
}

/// Probe the primary root extent for any record whose system-use trailer
/// parses to SUSP entries.
fn primary_root_has_susp<M: BlockMedium>(
  medium: &mut M,
  descriptor: &VolumeDescriptor,
) -> Result<bool> {
  let root = match descriptor.root_directory_record() {
    Some(root) => root,
    None => return Ok(false),
  };
  let block_size = match descriptor.logical_block_size() {
    Some(size) if size > 0 => size as u32,
    _ => return Ok(false),
  };

  let blocks = (root.data_length as u64).div_ceil(block_size as u64);
  let mut bytes = vec![0u8; (blocks * block_size as u64) as usize];
  for index in 0..blocks {
    let at = (index * block_size as u64) as usize;
    read_block_into(
      medium,
      block_size,
      root.extent_location as u64 + index,
      &mut bytes[at..at + block_size as usize],
    )?;
  }
  bytes.truncate(root.data_length as usize);

  let mut at = 0;
  while at < bytes.len() {
    if bytes[at] == 0 {
      at = (at / block_size as usize + 1) * block_size as usize;
      continue;
    }

    match DirectoryRecord::parse(&bytes[at..]) {
      Ok((record, consumed)) => {
        if !crate::susp::entry::parse_entries(record.system_use()).is_empty() {
          return Ok(true);
        }
        at += consumed;
      }
      Err(_) => break,
    }
  }

  Ok(false)
}

fn path_components(path: &str) -> impl Iterator<Item = &str> {
  path.split('/').filter(|component| !component.is_empty())
}

/// A stored name matches a lookup component either exactly or, when the
/// component carries no version, ignoring the `;n` suffix.
fn names_match(stored: &str, component: &str) -> bool {
  if stored == component {
    return true;
  }

  !component.contains(';')
    && stored
      .split_once(';')
      .is_some_and(|(base, _)| base == component)
}

/// Reconstruct a symlink target from its SL components.
fn symlink_target_string(components: &[crate::susp::SymlinkComponent]) -> String {
  let mut prefix = "";
  let mut parts: Vec<String> = Vec::new();

  for component in components {
    if component.flags.contains(ComponentFlags::VOLUME_ROOT) {
      prefix = "//";
      parts.clear();
    } else if component.flags.contains(ComponentFlags::ROOT) {
      prefix = "/";
      parts.clear();
    } else if component.flags.contains(ComponentFlags::CURRENT) {
      parts.push(".".to_string());
    } else if component.flags.contains(ComponentFlags::PARENT) {
      parts.push("..".to_string());
    } else {
      parts.push(String::from_utf8_lossy(&component.bytes).into_owned());
    }
  }

  format!("{prefix}{}", parts.join("/"))
}

/// A restartable lazy byte stream over one file extent. Reads are
/// block-aligned internally and never overrun the file length.
pub struct FileStream<'a, M: BlockMedium> {
  medium: &'a mut M,
  block_size: u32,
  extent: u32,
  length: u64,
  position: u64,
  buffer: Vec<u8>,
  buffered_block: Option<u64>,
}

impl<'a, M: BlockMedium> FileStream<'a, M> {
  fn new(medium: &'a mut M, block_size: u32, extent: u32, length: u64) -> Self {
    Self {
      medium,
      block_size,
      extent,
      length,
      position: 0,
      buffer: vec![0u8; block_size as usize],
      buffered_block: None,
    }
  }

  /// Total file length in bytes.
  pub fn len(&self) -> u64 {
    self.length
  }

  pub fn is_empty(&self) -> bool {
    self.length == 0
  }

  /// Rewind to the start of the file.
  pub fn restart(&mut self) {
    self.position = 0;
  }
}

impl<M: BlockMedium> Read for FileStream<'_, M> {
  fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
    if self.position >= self.length || buf.is_empty() {
      return Ok(0);
    }

    let block_size = self.block_size as u64;
    let block = self.position / block_size;
    if self.buffered_block != Some(block) {
      read_block_into(
        self.medium,
        self.block_size,
        self.extent as u64 + block,
        &mut self.buffer,
      )
      .map_err(|err| std::io::Error::other(err.to_string()))?;
      self.buffered_block = Some(block);
    }

    let within = (self.position % block_size) as usize;
    let take = buf
      .len()
      .min(block_size as usize - within)
      .min((self.length - self.position) as usize);

    buf[..take].copy_from_slice(&self.buffer[within..within + take]);
    self.position += take as u64;

    Ok(take)
  }
}
