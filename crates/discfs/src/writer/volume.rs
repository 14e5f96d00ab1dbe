//! Descriptor construction for the emitter.

use crate::codec::{IdentifierOrFile, VolumeTimestamp};
use crate::record::DirectoryRecord;
use crate::volume::{PrimaryVolumeDescriptor, SupplementaryVolumeDescriptor};
use crate::writer::WriterOptions;

/// Layout results one descriptor needs: its root extent, path tables, and
/// the finished volume size.
pub(crate) struct DescriptorLayout {
  pub root_record: DirectoryRecord,
  pub volume_space_size: u32,
  pub path_table_size: u32,
  pub type_l_location: u32,
  pub type_m_location: u32,
  pub optional_type_l_location: u32,
  pub optional_type_m_location: u32,
}

fn optional_identifier(value: &Option<String>) -> IdentifierOrFile {
  match value {
    Some(value) => IdentifierOrFile::Identifier(value.clone()),
    None => IdentifierOrFile::Empty,
  }
}

pub(crate) fn build_primary(
  options: &WriterOptions,
  layout: &DescriptorLayout,
  timestamp: VolumeTimestamp,
) -> PrimaryVolumeDescriptor {
  PrimaryVolumeDescriptor {
    system_identifier: options.system_identifier.clone(),
    volume_identifier: options.volume_identifier.clone(),
    volume_space_size: layout.volume_space_size,
    volume_set_size: 1,
    volume_sequence_number: 1,
    logical_block_size: options.block_size as u16,
    path_table_size: layout.path_table_size,
    type_l_path_table_location: layout.type_l_location,
    optional_type_l_path_table_location: layout.optional_type_l_location,
    type_m_path_table_location: layout.type_m_location,
    optional_type_m_path_table_location: layout.optional_type_m_location,
    root_directory_record: layout.root_record.clone(),
    volume_set_identifier: String::new(),
    publisher_identifier: optional_identifier(&options.publisher_identifier),
    data_preparer_identifier: optional_identifier(&options.data_preparer_identifier),
    application_identifier: optional_identifier(&options.application_identifier),
    copyright_file_identifier: IdentifierOrFile::Empty,
    abstract_file_identifier: IdentifierOrFile::Empty,
    bibliographic_file_identifier: IdentifierOrFile::Empty,
    creation_date: Some(timestamp),
    modification_date: Some(timestamp),
    expiration_date: None,
    effective_date: None,
    file_structure_version: 1,
    application_use: Vec::new(),
  }
}

/// A supplementary descriptor carries Joliet UCS-2 names (escape `%/E`); an
/// enhanced one carries UTF-8 names (escape `%/I`) and structure version 2.
pub(crate) fn build_supplementary(
  options: &WriterOptions,
  layout: &DescriptorLayout,
  timestamp: VolumeTimestamp,
  enhanced: bool,
) -> SupplementaryVolumeDescriptor {
  let mut escape_sequences = [0u8; 32];
  escape_sequences[..3].copy_from_slice(if enhanced { b"%/I" } else { b"%/E" });

  let version = if enhanced { 2 } else { 1 };

  SupplementaryVolumeDescriptor {
    version,
    volume_flags: 0,
    system_identifier: options.system_identifier.clone(),
    volume_identifier: options.volume_identifier.clone(),
    volume_space_size: layout.volume_space_size,
    escape_sequences,
    volume_set_size: 1,
    volume_sequence_number: 1,
    logical_block_size: options.block_size as u16,
    path_table_size: layout.path_table_size,
    type_l_path_table_location: layout.type_l_location,
    optional_type_l_path_table_location: layout.optional_type_l_location,
    type_m_path_table_location: layout.type_m_location,
    optional_type_m_path_table_location: layout.optional_type_m_location,
    root_directory_record: layout.root_record.clone(),
    volume_set_identifier: String::new(),
    publisher_identifier: optional_identifier(&options.publisher_identifier),
    data_preparer_identifier: optional_identifier(&options.data_preparer_identifier),
    application_identifier: optional_identifier(&options.application_identifier),
    copyright_file_identifier: IdentifierOrFile::Empty,
    abstract_file_identifier: IdentifierOrFile::Empty,
    bibliographic_file_identifier: IdentifierOrFile::Empty,
    creation_date: Some(timestamp),
    modification_date: Some(timestamp),
    expiration_date: None,
    effective_date: None,
    file_structure_version: version,
    application_use: Vec::new(),
  }
}
