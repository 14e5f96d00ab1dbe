//! The write path: tree ingestion, per-descriptor name derivation, LBA
//! layout, SUSP trailer synthesis, and emission.

use std::collections::HashMap;
use std::io::Read;

use byteorder::{BigEndian, LittleEndian};
use chrono::Utc;

use crate::codec::{self, RecordTimestamp, TextEncoding, VolumeTimestamp};
use crate::medium::BlockMedium;
use crate::record::{DirectoryRecord, FileFlags, PathTableRecord};
use crate::volume::VolumeDescriptor;
use crate::{Error, Result, SYSTEM_AREA_SECTORS};

pub(crate) mod fs;
mod lba;
mod name;
mod sector;
mod susp;
mod volume;

pub use fs::NodeMetadata;

use fs::{FlatTree, NodeKind, Tree};
use lba::LbaAllocator;
use sector::SectorStream;
use volume::DescriptorLayout;

/// Options controlling one image emission.
#[derive(Debug, Clone)]
pub struct WriterOptions {
  /// Volume identifier; a d-string on the primary descriptor.
  pub volume_identifier: String,
  pub system_identifier: String,
  /// Logical block size; a power of two between 2048 and the sector size.
  pub block_size: usize,
  /// Emit a Joliet supplementary descriptor alongside the primary.
  pub include_supplementary: bool,
  /// Emit an enhanced (UTF-8) descriptor as well.
  pub include_enhanced: bool,
  /// Attach Rock Ridge trailers to the primary hierarchy's records.
  pub enable_susp: bool,
  pub create_optional_path_tables: bool,
  pub default_uid: u32,
  pub default_gid: u32,
  pub publisher_identifier: Option<String>,
  pub data_preparer_identifier: Option<String>,
  pub application_identifier: Option<String>,
}

impl WriterOptions {
  pub fn new(volume_identifier: impl Into<String>) -> Self {
    Self {
      volume_identifier: volume_identifier.into(),
      system_identifier: "LINUX".into(),
      block_size: 2048,
      include_supplementary: true,
      include_enhanced: false,
      enable_susp: true,
      create_optional_path_tables: false,
      default_uid: 0,
      default_gid: 0,
      publisher_identifier: None,
      data_preparer_identifier: None,
      application_identifier: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewKind {
  Primary,
  Supplementary,
  Enhanced,
}

/// What one planned directory record points at, resolved after allocation.
#[derive(Clone, Copy)]
enum RecordRef {
  Dot(usize),
  DotDot(usize),
  Node(usize),
}

struct PlannedDir {
  id: usize,
  records: Vec<DirectoryRecord>,
  refs: Vec<RecordRef>,
  lba: u32,
  len: u32,
}

struct ViewPlan {
  kind: ViewKind,
  dirs: Vec<PlannedDir>,
  dir_index: HashMap<usize, usize>,
  table_le: Vec<u8>,
  table_be: Vec<u8>,
  table_size: u32,
  l_lba: u32,
  m_lba: u32,
  optional_l_lba: u32,
  optional_m_lba: u32,
}

impl ViewPlan {
  fn dir_lba(&self, id: usize) -> u32 {
    self.dirs[self.dir_index[&id]].lba
  }

  fn dir_len(&self, id: usize) -> u32 {
    self.dirs[self.dir_index[&id]].len
  }
}

/// Builds ISO 9660 images from an in-memory tree of directories, files, and
/// symlinks. File bytes are pulled from a per-path callback during
/// [`IsoWriter::write_and_close`].
pub struct IsoWriter<M: BlockMedium> {
  medium: M,
  options: WriterOptions,
  tree: Tree,
  closed: bool,
  timestamp: RecordTimestamp,
}

impl<M: BlockMedium> IsoWriter<M> {
  pub fn new(medium: M, options: WriterOptions) -> Result<Self> {
    if !codec::is_d_string(&options.volume_identifier) {
      return Err(Error::InvalidIdentifier {
        field: "volume",
        value: options.volume_identifier.clone(),
      });
    }

    let block_size = options.block_size;
    if block_size < 2048
      || !block_size.is_power_of_two()
      || block_size > medium.sector_size()
    {
      return Err(Error::InvalidLogicalBlockSize(block_size as u32));
    }

    Ok(Self {
      medium,
      options,
      tree: Tree::new(),
      closed: false,
      timestamp: Utc::now().into(),
    })
  }

  fn check_open(&self) -> Result<()> {
    if self.closed {
      return Err(Error::WriterClosed);
    }
    Ok(())
  }

  pub fn add_directory(&mut self, path: &str, metadata: Option<NodeMetadata>) -> Result<()> {
    self.check_open()?;
    self.tree.insert(path, NodeKind::Directory, metadata)
  }

  pub fn add_file(&mut self, path: &str, size: u64, metadata: Option<NodeMetadata>) -> Result<()> {
    self.check_open()?;

    if size > u32::MAX as u64 {
      return Err(Error::InvalidArgument {
        name: "size",
        message: format!("{size} bytes exceeds the single-extent limit"),
      });
    }

    self.tree.insert(path, NodeKind::File { size }, metadata)
  }

  pub fn add_symlink(
    &mut self,
    path: &str,
    target: &str,
    metadata: Option<NodeMetadata>,
  ) -> Result<()> {
    self.check_open()?;
    self.tree.insert(
      path,
      NodeKind::Symlink {
        target: target.to_string(),
      },
      metadata,
    )
  }

  /// Lay out and emit the image, then sync the medium. The writer rejects
  /// further use afterwards.
  ///
  /// `source` is called exactly once per added file with its volume path and
  /// must yield exactly the byte count declared at [`IsoWriter::add_file`].
  pub fn write_and_close<F>(&mut self, mut source: F) -> Result<()>
  where
    F: FnMut(&str) -> std::io::Result<Box<dyn Read>>,
  {
    self.check_open()?;
    self.closed = true;

    let flat = FlatTree::from_tree(&self.tree);
    let block_size = self.options.block_size as u32;
    let sector_size = self.medium.sector_size();

    let mut kinds = vec![ViewKind::Primary];
    if self.options.include_supplementary {
      kinds.push(ViewKind::Supplementary);
    }
    if self.options.include_enhanced {
      kinds.push(ViewKind::Enhanced);
    }

    // System area plus one sector per descriptor and the terminator.
    let metadata_start = (SYSTEM_AREA_SECTORS + kinds.len() + 1) * sector_size;
    let mut allocator = LbaAllocator::new(block_size, (metadata_start / block_size as usize) as u32);

    let mut views = Vec::with_capacity(kinds.len());
    for kind in kinds {
      views.push(self.plan_view(kind, &flat, &mut allocator)?);
    }

    // File extents share one region; a node's bytes are stored once no
    // matter how many hierarchies reference it.
    let mut file_lba = vec![0u32; flat.nodes.len()];
    for (id, node) in flat.nodes.iter().enumerate() {
      if let NodeKind::File { size } = node.kind {
        file_lba[id] = allocator.allocate(size);
      }
    }

    let volume_space_size = allocator.next_lba();

    for view in &mut views {
      resolve_extents(view, &file_lba, &flat);
    }

    // Descriptors are finalized and validated before any sector is written.
    let timestamp: VolumeTimestamp = self.timestamp.into();
    let mut descriptors = Vec::new();
    for view in &views {
      let layout = descriptor_layout(view, volume_space_size, self.timestamp);
      let descriptor = match view.kind {
        ViewKind::Primary => {
          let primary = volume::build_primary(&self.options, &layout, timestamp);
          primary.validate()?;
          VolumeDescriptor::Primary(primary)
        }
        ViewKind::Supplementary => VolumeDescriptor::Supplementary(volume::build_supplementary(
          &self.options,
          &layout,
          timestamp,
          false,
        )),
        ViewKind::Enhanced => VolumeDescriptor::Enhanced(volume::build_supplementary(
          &self.options,
          &layout,
          timestamp,
          true,
        )),
      };
      descriptors.push(descriptor.serialize()?);
    }
    descriptors.push(VolumeDescriptor::Terminator.serialize()?);

    // Metadata pieces, serialized and ordered by byte offset.
    let mut pieces: Vec<(u64, Vec<u8>)> = Vec::new();
    for view in &views {
      for dir in &view.dirs {
        pieces.push((
          dir.lba as u64 * block_size as u64,
          serialize_directory_extent(dir, block_size)?,
        ));
      }
      pieces.push((view.l_lba as u64 * block_size as u64, view.table_le.clone()));
      pieces.push((view.m_lba as u64 * block_size as u64, view.table_be.clone()));
      if view.optional_l_lba != 0 {
        pieces.push((
          view.optional_l_lba as u64 * block_size as u64,
          view.table_le.clone(),
        ));
        pieces.push((
          view.optional_m_lba as u64 * block_size as u64,
          view.table_be.clone(),
        ));
      }
    }
    pieces.sort_by_key(|(offset, _)| *offset);

    let mut files: Vec<(u64, usize, u64)> = flat
      .nodes
      .iter()
      .enumerate()
      .filter_map(|(id, node)| match node.kind {
        NodeKind::File { size } => Some((file_lba[id] as u64 * block_size as u64, id, size)),
        _ => None,
      })
      .collect();
    files.sort_by_key(|(offset, ..)| *offset);

    // Emission, in strict byte order.
    let mut stream = SectorStream::new(&mut self.medium);
    stream.pad_to_byte((SYSTEM_AREA_SECTORS * sector_size) as u64)?;

    for descriptor in &descriptors {
      let at = stream.byte_position();
      stream.write_bytes(descriptor)?;
      stream.pad_to_byte(at + sector_size as u64)?;
    }

    for (offset, bytes) in &pieces {
      stream.pad_to_byte(*offset)?;
      stream.write_bytes(bytes)?;
    }

    let mut buffer = vec![0u8; 64 * 1024];
    for (offset, id, size) in files {
      stream.pad_to_byte(offset)?;

      let path = &flat.nodes[id].path;
      let mut reader = source(path).map_err(Error::Io)?;
      let mut remaining = size;
      while remaining > 0 {
        let want = buffer.len().min(remaining as usize);
        let got = reader.read(&mut buffer[..want]).map_err(Error::Io)?;
        if got == 0 {
          return Err(Error::PreconditionFailed(format!(
            "stream for {path} ended {remaining} bytes short of the declared size"
          )));
        }
        stream.write_bytes(&buffer[..got])?;
        remaining -= got as u64;
      }
    }

    stream.pad_to_byte(volume_space_size as u64 * block_size as u64)?;
    stream.finish()?;
    self.medium.sync()?;

    log::debug!("emitted {volume_space_size} blocks of {block_size} bytes");
    Ok(())
  }

  /// Release the writer, returning the medium.
  pub fn into_medium(self) -> M {
    self.medium
  }

  /// Derive names, synthesize trailers, and allocate every directory extent
  /// and path table of one hierarchy.
  fn plan_view(
    &self,
    kind: ViewKind,
    flat: &FlatTree,
    allocator: &mut LbaAllocator,
  ) -> Result<ViewPlan> {
    let block_size = self.options.block_size as u32;
    let susp = kind == ViewKind::Primary && self.options.enable_susp;

    // Identifier bytes per node, collision-resolved per directory.
    let mut identifiers: Vec<Vec<u8>> = vec![Vec::new(); flat.nodes.len()];
    let mut included: Vec<bool> = vec![true; flat.nodes.len()];

    for (id, node) in flat.nodes.iter().enumerate() {
      if !flat.is_directory(id) {
        continue;
      }

      let mut taken = std::collections::HashSet::new();
      for &child in &node.children {
        let child_node = &flat.nodes[child];

        if matches!(child_node.kind, NodeKind::Symlink { .. }) && !susp {
          included[child] = false;
          continue;
        }

        identifiers[child] = match kind {
          ViewKind::Primary => {
            let derived = if flat.is_directory(child) {
              name::derive_directory_identifier(&child_node.name, &taken)?
            } else {
              name::derive_file_identifier(&child_node.name, &taken)?
            };
            taken.insert(derived.clone());
            derived.into_bytes()
          }
          ViewKind::Supplementary => {
            name::encode_long_identifier(&child_node.name, TextEncoding::Ucs2Be)
          }
          ViewKind::Enhanced => {
            name::encode_long_identifier(&child_node.name, TextEncoding::Utf8)
          }
        };
      }
    }

    // Record lists per directory, in spec order: dot, dotdot, children by
    // raw name.
    let mut dirs = Vec::new();
    let mut dir_index = HashMap::new();

    for (id, node) in flat.nodes.iter().enumerate() {
      if !flat.is_directory(id) {
        continue;
      }

      let mut records = Vec::new();
      let mut refs = Vec::new();

      let mut dot = DirectoryRecord::current_directory();
      dot.set_file_flags(FileFlags::DIRECTORY);
      dot.recording_date = Some(self.timestamp);
      if susp {
        dot.set_system_use(Some(susp::build_dot_trailer(
          &node.metadata,
          &self.options,
          self.timestamp,
          id == 0,
        )?));
      }
      records.push(dot);
      refs.push(RecordRef::Dot(id));

      let mut dotdot = DirectoryRecord::parent_directory();
      dotdot.set_file_flags(FileFlags::DIRECTORY);
      dotdot.recording_date = Some(self.timestamp);
      if susp {
        dotdot.set_system_use(Some(susp::build_dot_trailer(
          &flat.nodes[node.parent].metadata,
          &self.options,
          self.timestamp,
          false,
        )?));
      }
      records.push(dotdot);
      refs.push(RecordRef::DotDot(node.parent));

      for &child in &node.children {
        if !included[child] {
          continue;
        }
        let child_node = &flat.nodes[child];

        let mut record = DirectoryRecord::new(identifiers[child].clone());
        record.recording_date = Some(self.timestamp);
        match &child_node.kind {
          NodeKind::Directory => record.set_file_flags(FileFlags::DIRECTORY),
          NodeKind::File { size } => record.data_length = *size as u32,
          NodeKind::Symlink { .. } => {}
        }
        if susp {
          record.set_system_use(Some(susp::build_trailer(
            &child_node.kind,
            &child_node.metadata,
            &child_node.name,
            &self.options,
            self.timestamp,
          )?));
        }

        records.push(record);
        refs.push(RecordRef::Node(child));
      }

      let len = directory_extent_len(&records, block_size)?;
      dir_index.insert(id, dirs.len());
      dirs.push(PlannedDir {
        id,
        records,
        refs,
        lba: 0,
        len,
      });
    }

    // Extents are allocated bottom-up so child locations exist before the
    // parent's records are finalized.
    fn allocate_subtree(
      flat: &FlatTree,
      dirs: &mut [PlannedDir],
      dir_index: &HashMap<usize, usize>,
      allocator: &mut LbaAllocator,
      id: usize,
    ) {
      for &child in &flat.nodes[id].children {
        if flat.is_directory(child) {
          allocate_subtree(flat, dirs, dir_index, allocator, child);
        }
      }
      let at = dir_index[&id];
      dirs[at].lba = allocator.allocate(dirs[at].len as u64);
    }
    allocate_subtree(flat, &mut dirs, &dir_index, allocator, 0);

    let mut plan = ViewPlan {
      kind,
      dirs,
      dir_index,
      table_le: Vec::new(),
      table_be: Vec::new(),
      table_size: 0,
      l_lba: 0,
      m_lba: 0,
      optional_l_lba: 0,
      optional_m_lba: 0,
    };

    let (table_le, table_be) = build_path_tables(flat, &plan, &identifiers, &included)?;
    plan.table_size = table_le.len() as u32;
    plan.l_lba = allocator.allocate(table_le.len() as u64);
    plan.m_lba = allocator.allocate(table_be.len() as u64);
    if self.options.create_optional_path_tables {
      plan.optional_l_lba = allocator.allocate(table_le.len() as u64);
      plan.optional_m_lba = allocator.allocate(table_be.len() as u64);
    }
    plan.table_le = table_le;
    plan.table_be = table_be;

    Ok(plan)
  }
}

/// Directory records never straddle a block boundary; a record that would
/// cross is pushed to the next block and the gap zero-filled. The extent
/// itself is a whole number of blocks.
fn directory_extent_len(records: &[DirectoryRecord], block_size: u32) -> Result<u32> {
  let block_size = block_size as usize;
  let mut cursor = 0usize;

  for record in records {
    let len = record.len();
    if len > crate::record::DIRECTORY_RECORD_MAX_LEN {
      return Err(Error::PreconditionFailed(format!(
        "directory record of {len} bytes exceeds the 255 byte cap"
      )));
    }
    if cursor % block_size + len > block_size {
      cursor = (cursor / block_size + 1) * block_size;
    }
    cursor += len;
  }

  Ok(cursor.div_ceil(block_size) as u32 * block_size as u32)
}

fn serialize_directory_extent(dir: &PlannedDir, block_size: u32) -> Result<Vec<u8>> {
  let block_size = block_size as usize;
  let mut bytes = Vec::with_capacity(dir.len as usize);

  for record in &dir.records {
    let len = record.len();
    if bytes.len() % block_size + len > block_size {
      bytes.resize((bytes.len() / block_size + 1) * block_size, 0);
    }

    let at = bytes.len();
    bytes.resize(at + len, 0);
    record.serialize_into(&mut bytes[at..])?;
  }

  bytes.resize(dir.len as usize, 0);
  Ok(bytes)
}

/// Point every planned record at its allocated extent.
fn resolve_extents(view: &mut ViewPlan, file_lba: &[u32], flat: &FlatTree) {
  for at in 0..view.dirs.len() {
    for index in 0..view.dirs[at].records.len() {
      let (target_lba, target_len) = match view.dirs[at].refs[index] {
        RecordRef::Dot(id) | RecordRef::DotDot(id) => (view.dir_lba(id), view.dir_len(id)),
        RecordRef::Node(id) => {
          if flat.is_directory(id) {
            (view.dir_lba(id), view.dir_len(id))
          } else if matches!(flat.nodes[id].kind, NodeKind::File { .. }) {
            (file_lba[id], view.dirs[at].records[index].data_length)
          } else {
            (0, 0)
          }
        }
      };

      let record = &mut view.dirs[at].records[index];
      record.extent_location = target_lba;
      record.data_length = target_len;
    }
  }
}

/// Path table records in breadth-first order: the root first, children in
/// directory order, parent numbers by 1-based record index.
fn build_path_tables(
  flat: &FlatTree,
  view: &ViewPlan,
  identifiers: &[Vec<u8>],
  included: &[bool],
) -> Result<(Vec<u8>, Vec<u8>)> {
  let mut numbered: Vec<(usize, u16)> = vec![(0, 1)];
  let mut at = 0;
  while at < numbered.len() {
    let (id, _) = numbered[at];
    let number = (at + 1) as u16;
    for &child in &flat.nodes[id].children {
      if flat.is_directory(child) && included[child] {
        numbered.push((child, number));
      }
    }
    at += 1;
  }

  let mut table_le = Vec::new();
  let mut table_be = Vec::new();

  for (id, parent_number) in numbered {
    let record = PathTableRecord {
      extended_attribute_length: 0,
      extent_location: view.dir_lba(id),
      parent_directory_number: parent_number,
      identifier: if id == 0 {
        vec![0x00]
      } else {
        identifiers[id].clone()
      },
    };

    table_le.extend(record.serialize::<LittleEndian>()?);
    table_be.extend(record.serialize::<BigEndian>()?);
  }

  Ok((table_le, table_be))
}

fn descriptor_layout(
  view: &ViewPlan,
  volume_space_size: u32,
  timestamp: RecordTimestamp,
) -> DescriptorLayout {
  let mut root_record = DirectoryRecord::current_directory();
  root_record.set_file_flags(FileFlags::DIRECTORY);
  root_record.recording_date = Some(timestamp);
  root_record.extent_location = view.dir_lba(0);
  root_record.data_length = view.dir_len(0);

  DescriptorLayout {
    root_record,
    volume_space_size,
    path_table_size: view.table_size,
    type_l_location: view.l_lba,
    type_m_location: view.m_lba,
    optional_type_l_location: view.optional_l_lba,
    optional_type_m_location: view.optional_m_lba,
  }
}
