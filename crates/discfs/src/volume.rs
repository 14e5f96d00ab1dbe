//! Volume descriptors: discovery, classification, and the 2048-byte
//! serialized forms.

use crate::codec::{self, IdentifierOrFile, TextEncoding, VolumeTimestamp};
use crate::medium::BlockMedium;
use crate::record::DirectoryRecord;
use crate::{Error, Result, DESCRIPTOR_SIZE, STANDARD_IDENTIFIER, SYSTEM_AREA_SECTORS};

/// Descriptor type byte values (ECMA-119 §8.1.1).
pub mod descriptor_type {
  pub const BOOT_RECORD: u8 = 0;
  pub const PRIMARY: u8 = 1;
  pub const SUPPLEMENTARY: u8 = 2;
  pub const PARTITION: u8 = 3;
  pub const TERMINATOR: u8 = 255;
}

/// The primary volume descriptor (ECMA-119 §8.4). Identifier fields are
/// restricted to a- and d-characters and stored space-padded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryVolumeDescriptor {
  pub system_identifier: String,
  pub volume_identifier: String,
  pub volume_space_size: u32,
  pub volume_set_size: u16,
  pub volume_sequence_number: u16,
  pub logical_block_size: u16,
  pub path_table_size: u32,
  pub type_l_path_table_location: u32,
  pub optional_type_l_path_table_location: u32,
  pub type_m_path_table_location: u32,
  pub optional_type_m_path_table_location: u32,
  pub root_directory_record: DirectoryRecord,
  pub volume_set_identifier: String,
  pub publisher_identifier: IdentifierOrFile,
  pub data_preparer_identifier: IdentifierOrFile,
  pub application_identifier: IdentifierOrFile,
  pub copyright_file_identifier: IdentifierOrFile,
  pub abstract_file_identifier: IdentifierOrFile,
  pub bibliographic_file_identifier: IdentifierOrFile,
  pub creation_date: Option<VolumeTimestamp>,
  pub modification_date: Option<VolumeTimestamp>,
  pub expiration_date: Option<VolumeTimestamp>,
  pub effective_date: Option<VolumeTimestamp>,
  pub file_structure_version: u8,
  pub application_use: Vec<u8>,
}

/// A supplementary (type 2, version 1) or enhanced (type 2, version 2)
/// volume descriptor (ECMA-119 §8.5). Identifier fields are stored in the
/// encoding selected by the escape sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplementaryVolumeDescriptor {
  pub version: u8,
  pub volume_flags: u8,
  pub system_identifier: String,
  pub volume_identifier: String,
  pub volume_space_size: u32,
  pub escape_sequences: [u8; 32],
  pub volume_set_size: u16,
  pub volume_sequence_number: u16,
  pub logical_block_size: u16,
  pub path_table_size: u32,
  pub type_l_path_table_location: u32,
  pub optional_type_l_path_table_location: u32,
  pub type_m_path_table_location: u32,
  pub optional_type_m_path_table_location: u32,
  pub root_directory_record: DirectoryRecord,
  pub volume_set_identifier: String,
  pub publisher_identifier: IdentifierOrFile,
  pub data_preparer_identifier: IdentifierOrFile,
  pub application_identifier: IdentifierOrFile,
  pub copyright_file_identifier: IdentifierOrFile,
  pub abstract_file_identifier: IdentifierOrFile,
  pub bibliographic_file_identifier: IdentifierOrFile,
  pub creation_date: Option<VolumeTimestamp>,
  pub modification_date: Option<VolumeTimestamp>,
  pub expiration_date: Option<VolumeTimestamp>,
  pub effective_date: Option<VolumeTimestamp>,
  pub file_structure_version: u8,
  pub application_use: Vec<u8>,
}

/// A boot record (ECMA-119 §8.2). The boot system use area is retained
/// verbatim; no catalog is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootRecord {
  pub boot_system_identifier: String,
  pub boot_identifier: String,
  pub boot_system_use: Vec<u8>,
}

/// A volume partition descriptor (ECMA-119 §8.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionVolumeDescriptor {
  pub system_identifier: String,
  pub volume_partition_identifier: String,
  pub volume_partition_location: u32,
  pub volume_partition_size: u32,
}

/// A descriptor of a type this library does not interpret, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericVolumeDescriptor {
  pub descriptor_type: u8,
  pub version: u8,
  pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeDescriptor {
  Boot(BootRecord),
  Primary(PrimaryVolumeDescriptor),
  Supplementary(SupplementaryVolumeDescriptor),
  Enhanced(SupplementaryVolumeDescriptor),
  Partition(PartitionVolumeDescriptor),
  Generic(GenericVolumeDescriptor),
  Terminator,
}

impl SupplementaryVolumeDescriptor {
  /// Select the name encoding from the escape sequences field.
  ///
  /// Only the ECMA-119 enumerated sequences are honored; anything else keeps
  /// the UCS-2 big-endian default.
  pub fn encoding(&self) -> TextEncoding {
    for window in self.escape_sequences.windows(3) {
      match window {
        [0x25, 0x2F, 0x40 | 0x43 | 0x45 | 0x4A | 0x4B | 0x4C] => return TextEncoding::Ucs2Be,
        [0x25, 0x2F, 0x47 | 0x48 | 0x49] => return TextEncoding::Utf8,
        _ => {}
      }
    }

    TextEncoding::Ucs2Be
  }

  pub fn validate(&self) -> Result<()> {
    validate_block_size_and_app_use(self.logical_block_size, self.application_use.len())
  }
}

fn validate_block_size_and_app_use(block_size: u16, app_use: usize) -> Result<()> {
  if block_size == 0 || !block_size.is_power_of_two() {
    return Err(Error::InvalidLogicalBlockSize(block_size as u32));
  }
  if app_use > 512 {
    return Err(Error::InvalidApplicationUseSize(app_use));
  }

  Ok(())
}

impl PrimaryVolumeDescriptor {
  pub fn validate(&self) -> Result<()> {
    validate_block_size_and_app_use(self.logical_block_size, self.application_use.len())?;

    let a_fields: [(&'static str, &str); 4] = [
      ("system", &self.system_identifier),
      ("publisher", self.publisher_identifier.as_str()),
      ("data preparer", self.data_preparer_identifier.as_str()),
      ("application", self.application_identifier.as_str()),
    ];
    for (field, value) in a_fields {
      if !codec::is_a_string(value) {
        return Err(Error::InvalidIdentifier {
          field,
          value: value.to_string(),
        });
      }
    }

    let d_fields: [(&'static str, &str); 2] = [
      ("volume", &self.volume_identifier),
      ("volume set", &self.volume_set_identifier),
    ];
    for (field, value) in d_fields {
      if !codec::is_d_string(value) {
        return Err(Error::InvalidIdentifier {
          field,
          value: value.to_string(),
        });
      }
    }

    let file_fields: [(&'static str, &str); 3] = [
      ("copyright file", self.copyright_file_identifier.as_str()),
      ("abstract file", self.abstract_file_identifier.as_str()),
      ("bibliographic file", self.bibliographic_file_identifier.as_str()),
    ];
    for (field, value) in file_fields {
      if !codec::is_d_or_separator_string(value) {
        return Err(Error::InvalidIdentifier {
          field,
          value: value.to_string(),
        });
      }
    }

    Ok(())
  }
}

impl VolumeDescriptor {
  pub fn descriptor_type(&self) -> u8 {
    match self {
      VolumeDescriptor::Boot(_) => descriptor_type::BOOT_RECORD,
      VolumeDescriptor::Primary(_) => descriptor_type::PRIMARY,
      VolumeDescriptor::Supplementary(_) | VolumeDescriptor::Enhanced(_) => {
        descriptor_type::SUPPLEMENTARY
      }
      VolumeDescriptor::Partition(_) => descriptor_type::PARTITION,
      VolumeDescriptor::Generic(d) => d.descriptor_type,
      VolumeDescriptor::Terminator => descriptor_type::TERMINATOR,
    }
  }

  /// The root directory record, when this descriptor bears a directory
  /// hierarchy.
  pub fn root_directory_record(&self) -> Option<&DirectoryRecord> {
    match self {
      VolumeDescriptor::Primary(d) => Some(&d.root_directory_record),
      VolumeDescriptor::Supplementary(d) | VolumeDescriptor::Enhanced(d) => {
        Some(&d.root_directory_record)
      }
      _ => None,
    }
  }

  /// The name encoding of a directory-bearing descriptor. Descriptors
  /// without a hierarchy have no encoding and never decode names.
  pub fn encoding(&self) -> Option<TextEncoding> {
    match self {
      VolumeDescriptor::Primary(_) => Some(TextEncoding::Iso),
      VolumeDescriptor::Supplementary(d) | VolumeDescriptor::Enhanced(d) => Some(d.encoding()),
      _ => None,
    }
  }

  pub fn logical_block_size(&self) -> Option<u16> {
    match self {
      VolumeDescriptor::Primary(d) => Some(d.logical_block_size),
      VolumeDescriptor::Supplementary(d) | VolumeDescriptor::Enhanced(d) => {
        Some(d.logical_block_size)
      }
      _ => None,
    }
  }

  /// Path table size and L/M locations of a directory-bearing descriptor.
  pub fn path_table_geometry(&self) -> Option<(u32, u32, u32)> {
    match self {
      VolumeDescriptor::Primary(d) => Some((
        d.path_table_size,
        d.type_l_path_table_location,
        d.type_m_path_table_location,
      )),
      VolumeDescriptor::Supplementary(d) | VolumeDescriptor::Enhanced(d) => Some((
        d.path_table_size,
        d.type_l_path_table_location,
        d.type_m_path_table_location,
      )),
      _ => None,
    }
  }

  /// Parse one descriptor from the first 2048 bytes of a sector.
  pub fn parse(sector: &[u8]) -> Result<Self> {
    if sector.len() < DESCRIPTOR_SIZE || &sector[1..6] != STANDARD_IDENTIFIER {
      return Err(Error::InvalidImage);
    }

    let version = sector[6];

    Ok(match sector[0] {
      descriptor_type::BOOT_RECORD => VolumeDescriptor::Boot(BootRecord {
        boot_system_identifier: TextEncoding::Iso.decode_padded(&sector[7..39]),
        boot_identifier: TextEncoding::Iso.decode_padded(&sector[39..71]),
        boot_system_use: sector[71..DESCRIPTOR_SIZE].to_vec(),
      }),
      descriptor_type::PRIMARY => {
        VolumeDescriptor::Primary(parse_primary(sector)?)
      }
      descriptor_type::SUPPLEMENTARY => {
        let descriptor = parse_supplementary(sector)?;
        if version == 1 {
          VolumeDescriptor::Supplementary(descriptor)
        } else {
          VolumeDescriptor::Enhanced(descriptor)
        }
      }
      descriptor_type::PARTITION => VolumeDescriptor::Partition(PartitionVolumeDescriptor {
        system_identifier: TextEncoding::Iso.decode_padded(&sector[8..40]),
        volume_partition_identifier: TextEncoding::Iso.decode_padded(&sector[40..72]),
        volume_partition_location: codec::decode_u32_both(&sector[72..80]),
        volume_partition_size: codec::decode_u32_both(&sector[80..88]),
      }),
      descriptor_type::TERMINATOR => VolumeDescriptor::Terminator,
      other => VolumeDescriptor::Generic(GenericVolumeDescriptor {
        descriptor_type: other,
        version,
        data: sector[7..DESCRIPTOR_SIZE].to_vec(),
      }),
    })
  }

  /// Serialize into exactly one 2048-byte descriptor.
  pub fn serialize(&self) -> Result<[u8; DESCRIPTOR_SIZE]> {
    let mut out = [0u8; DESCRIPTOR_SIZE];
    out[0] = self.descriptor_type();
    out[1..6].copy_from_slice(STANDARD_IDENTIFIER);
    out[6] = 1;

    match self {
      VolumeDescriptor::Boot(d) => {
        TextEncoding::Iso.encode_padded(&d.boot_system_identifier, &mut out[7..39]);
        TextEncoding::Iso.encode_padded(&d.boot_identifier, &mut out[39..71]);
        let use_len = d.boot_system_use.len().min(DESCRIPTOR_SIZE - 71);
        out[71..71 + use_len].copy_from_slice(&d.boot_system_use[..use_len]);
      }
      VolumeDescriptor::Primary(d) => serialize_primary(d, &mut out)?,
      VolumeDescriptor::Supplementary(d) | VolumeDescriptor::Enhanced(d) => {
        out[6] = d.version;
        serialize_supplementary(d, &mut out)?;
      }
      VolumeDescriptor::Partition(d) => {
        TextEncoding::Iso.encode_padded(&d.system_identifier, &mut out[8..40]);
        TextEncoding::Iso.encode_padded(&d.volume_partition_identifier, &mut out[40..72]);
        codec::encode_u32_both(d.volume_partition_location, &mut out[72..80]);
        codec::encode_u32_both(d.volume_partition_size, &mut out[80..88]);
      }
      VolumeDescriptor::Generic(d) => {
        out[6] = d.version;
        let data_len = d.data.len().min(DESCRIPTOR_SIZE - 7);
        out[7..7 + data_len].copy_from_slice(&d.data[..data_len]);
      }
      VolumeDescriptor::Terminator => {}
    }

    Ok(out)
  }
}

fn parse_root_record(field: &[u8]) -> Result<DirectoryRecord> {
  let (record, _) = DirectoryRecord::parse(field)?;
  Ok(record)
}

fn parse_primary(sector: &[u8]) -> Result<PrimaryVolumeDescriptor> {
  let enc = TextEncoding::Iso;

  Ok(PrimaryVolumeDescriptor {
    system_identifier: enc.decode_padded(&sector[8..40]),
    volume_identifier: enc.decode_padded(&sector[40..72]),
    volume_space_size: codec::decode_u32_both(&sector[80..88]),
    volume_set_size: codec::decode_u16_both(&sector[120..124]),
    volume_sequence_number: codec::decode_u16_both(&sector[124..128]),
    logical_block_size: codec::decode_u16_both(&sector[128..132]),
    path_table_size: codec::decode_u32_both(&sector[132..140]),
    type_l_path_table_location: u32::from_le_bytes(sector[140..144].try_into().unwrap()),
    optional_type_l_path_table_location: u32::from_le_bytes(sector[144..148].try_into().unwrap()),
    type_m_path_table_location: u32::from_be_bytes(sector[148..152].try_into().unwrap()),
    optional_type_m_path_table_location: u32::from_be_bytes(sector[152..156].try_into().unwrap()),
    root_directory_record: parse_root_record(&sector[156..190])?,
    volume_set_identifier: enc.decode_padded(&sector[190..318]),
    publisher_identifier: IdentifierOrFile::deserialize(enc, &sector[318..446]),
    data_preparer_identifier: IdentifierOrFile::deserialize(enc, &sector[446..574]),
    application_identifier: IdentifierOrFile::deserialize(enc, &sector[574..702]),
    copyright_file_identifier: IdentifierOrFile::deserialize(enc, &sector[702..739]),
    abstract_file_identifier: IdentifierOrFile::deserialize(enc, &sector[739..776]),
    bibliographic_file_identifier: IdentifierOrFile::deserialize(enc, &sector[776..813]),
    creation_date: VolumeTimestamp::deserialize(&sector[813..830]),
    modification_date: VolumeTimestamp::deserialize(&sector[830..847]),
    expiration_date: VolumeTimestamp::deserialize(&sector[847..864]),
    effective_date: VolumeTimestamp::deserialize(&sector[864..881]),
    file_structure_version: sector[881],
    application_use: trim_application_use(&sector[883..1395]),
  })
}

fn parse_supplementary(sector: &[u8]) -> Result<SupplementaryVolumeDescriptor> {
  let mut escape_sequences = [0u8; 32];
  escape_sequences.copy_from_slice(&sector[88..120]);

  let mut descriptor = SupplementaryVolumeDescriptor {
    version: sector[6],
    volume_flags: sector[7],
    system_identifier: String::new(),
    volume_identifier: String::new(),
    volume_space_size: codec::decode_u32_both(&sector[80..88]),
    escape_sequences,
    volume_set_size: codec::decode_u16_both(&sector[120..124]),
    volume_sequence_number: codec::decode_u16_both(&sector[124..128]),
    logical_block_size: codec::decode_u16_both(&sector[128..132]),
    path_table_size: codec::decode_u32_both(&sector[132..140]),
    type_l_path_table_location: u32::from_le_bytes(sector[140..144].try_into().unwrap()),
    optional_type_l_path_table_location: u32::from_le_bytes(sector[144..148].try_into().unwrap()),
    type_m_path_table_location: u32::from_be_bytes(sector[148..152].try_into().unwrap()),
    optional_type_m_path_table_location: u32::from_be_bytes(sector[152..156].try_into().unwrap()),
    root_directory_record: parse_root_record(&sector[156..190])?,
    volume_set_identifier: String::new(),
    publisher_identifier: IdentifierOrFile::Empty,
    data_preparer_identifier: IdentifierOrFile::Empty,
    application_identifier: IdentifierOrFile::Empty,
    copyright_file_identifier: IdentifierOrFile::Empty,
    abstract_file_identifier: IdentifierOrFile::Empty,
    bibliographic_file_identifier: IdentifierOrFile::Empty,
    creation_date: VolumeTimestamp::deserialize(&sector[813..830]),
    modification_date: VolumeTimestamp::deserialize(&sector[830..847]),
    expiration_date: VolumeTimestamp::deserialize(&sector[847..864]),
    effective_date: VolumeTimestamp::deserialize(&sector[864..881]),
    file_structure_version: sector[881],
    application_use: trim_application_use(&sector[883..1395]),
  };

  let enc = descriptor.encoding();
  descriptor.system_identifier = enc.decode_padded(&sector[8..40]);
  descriptor.volume_identifier = enc.decode_padded(&sector[40..72]);
  descriptor.volume_set_identifier = enc.decode_padded(&sector[190..318]);
  descriptor.publisher_identifier = IdentifierOrFile::deserialize(enc, &sector[318..446]);
  descriptor.data_preparer_identifier = IdentifierOrFile::deserialize(enc, &sector[446..574]);
  descriptor.application_identifier = IdentifierOrFile::deserialize(enc, &sector[574..702]);
  descriptor.copyright_file_identifier = IdentifierOrFile::deserialize(enc, &sector[702..739]);
  descriptor.abstract_file_identifier = IdentifierOrFile::deserialize(enc, &sector[739..776]);
  descriptor.bibliographic_file_identifier = IdentifierOrFile::deserialize(enc, &sector[776..813]);

  Ok(descriptor)
}

/// The application use field is stored as 512 fixed bytes; trailing zeros
/// collapse so an untouched field reads back empty.
fn trim_application_use(field: &[u8]) -> Vec<u8> {
  let end = field
    .iter()
    .rposition(|&b| b != 0)
    .map(|at| at + 1)
    .unwrap_or(0);
  field[..end].to_vec()
}

fn serialize_primary(d: &PrimaryVolumeDescriptor, out: &mut [u8]) -> Result<()> {
  if d.application_use.len() > 512 {
    return Err(Error::InvalidApplicationUseSize(d.application_use.len()));
  }

  let enc = TextEncoding::Iso;
  enc.encode_padded(&d.system_identifier, &mut out[8..40]);
  enc.encode_padded(&d.volume_identifier, &mut out[40..72]);
  codec::encode_u32_both(d.volume_space_size, &mut out[80..88]);
  serialize_common_tail(
    CommonTail {
      volume_set_size: d.volume_set_size,
      volume_sequence_number: d.volume_sequence_number,
      logical_block_size: d.logical_block_size,
      path_table_size: d.path_table_size,
      type_l: d.type_l_path_table_location,
      optional_type_l: d.optional_type_l_path_table_location,
      type_m: d.type_m_path_table_location,
      optional_type_m: d.optional_type_m_path_table_location,
      root: &d.root_directory_record,
      volume_set_identifier: &d.volume_set_identifier,
      publisher: &d.publisher_identifier,
      preparer: &d.data_preparer_identifier,
      application: &d.application_identifier,
      copyright: &d.copyright_file_identifier,
      abstract_file: &d.abstract_file_identifier,
      bibliographic: &d.bibliographic_file_identifier,
      creation: d.creation_date,
      modification: d.modification_date,
      expiration: d.expiration_date,
      effective: d.effective_date,
      file_structure_version: d.file_structure_version,
      application_use: &d.application_use,
    },
    enc,
    out,
  )
}

fn serialize_supplementary(d: &SupplementaryVolumeDescriptor, out: &mut [u8]) -> Result<()> {
  if d.application_use.len() > 512 {
    return Err(Error::InvalidApplicationUseSize(d.application_use.len()));
  }

  let enc = d.encoding();
  out[7] = d.volume_flags;
  enc.encode_padded(&d.system_identifier, &mut out[8..40]);
  enc.encode_padded(&d.volume_identifier, &mut out[40..72]);
  codec::encode_u32_both(d.volume_space_size, &mut out[80..88]);
  out[88..120].copy_from_slice(&d.escape_sequences);
  serialize_common_tail(
    CommonTail {
      volume_set_size: d.volume_set_size,
      volume_sequence_number: d.volume_sequence_number,
      logical_block_size: d.logical_block_size,
      path_table_size: d.path_table_size,
      type_l: d.type_l_path_table_location,
      optional_type_l: d.optional_type_l_path_table_location,
      type_m: d.type_m_path_table_location,
      optional_type_m: d.optional_type_m_path_table_location,
      root: &d.root_directory_record,
      volume_set_identifier: &d.volume_set_identifier,
      publisher: &d.publisher_identifier,
      preparer: &d.data_preparer_identifier,
      application: &d.application_identifier,
      copyright: &d.copyright_file_identifier,
      abstract_file: &d.abstract_file_identifier,
      bibliographic: &d.bibliographic_file_identifier,
      creation: d.creation_date,
      modification: d.modification_date,
      expiration: d.expiration_date,
      effective: d.effective_date,
      file_structure_version: d.file_structure_version,
      application_use: &d.application_use,
    },
    enc,
    out,
  )
}

/// Fields laid out identically in primary and supplementary descriptors from
/// byte 120 onward.
struct CommonTail<'a> {
  volume_set_size: u16,
  volume_sequence_number: u16,
  logical_block_size: u16,
  path_table_size: u32,
  type_l: u32,
  optional_type_l: u32,
  type_m: u32,
  optional_type_m: u32,
  root: &'a DirectoryRecord,
  volume_set_identifier: &'a str,
  publisher: &'a IdentifierOrFile,
  preparer: &'a IdentifierOrFile,
  application: &'a IdentifierOrFile,
  copyright: &'a IdentifierOrFile,
  abstract_file: &'a IdentifierOrFile,
  bibliographic: &'a IdentifierOrFile,
  creation: Option<VolumeTimestamp>,
  modification: Option<VolumeTimestamp>,
  expiration: Option<VolumeTimestamp>,
  effective: Option<VolumeTimestamp>,
  file_structure_version: u8,
  application_use: &'a [u8],
}

fn serialize_common_tail(tail: CommonTail<'_>, enc: TextEncoding, out: &mut [u8]) -> Result<()> {
  codec::encode_u16_both(tail.volume_set_size, &mut out[120..124]);
  codec::encode_u16_both(tail.volume_sequence_number, &mut out[124..128]);
  codec::encode_u16_both(tail.logical_block_size, &mut out[128..132]);
  codec::encode_u32_both(tail.path_table_size, &mut out[132..140]);
  out[140..144].copy_from_slice(&tail.type_l.to_le_bytes());
  out[144..148].copy_from_slice(&tail.optional_type_l.to_le_bytes());
  out[148..152].copy_from_slice(&tail.type_m.to_be_bytes());
  out[152..156].copy_from_slice(&tail.optional_type_m.to_be_bytes());
  tail.root.serialize_into(&mut out[156..190])?;
  enc.encode_padded(tail.volume_set_identifier, &mut out[190..318]);
  tail.publisher.serialize_padded(enc, &mut out[318..446]);
  tail.preparer.serialize_padded(enc, &mut out[446..574]);
  tail.application.serialize_padded(enc, &mut out[574..702]);
  tail.copyright.serialize_padded(enc, &mut out[702..739]);
  tail.abstract_file.serialize_padded(enc, &mut out[739..776]);
  tail.bibliographic.serialize_padded(enc, &mut out[776..813]);
  out[813..830].copy_from_slice(&VolumeTimestamp::serialize_opt(tail.creation.as_ref()));
  out[830..847].copy_from_slice(&VolumeTimestamp::serialize_opt(tail.modification.as_ref()));
  out[847..864].copy_from_slice(&VolumeTimestamp::serialize_opt(tail.expiration.as_ref()));
  out[864..881].copy_from_slice(&VolumeTimestamp::serialize_opt(tail.effective.as_ref()));
  out[881] = tail.file_structure_version;
  out[883..883 + tail.application_use.len()].copy_from_slice(tail.application_use);

  Ok(())
}

/// Scan the volume descriptor set starting at the first sector past the
/// system area. Sectors lacking the standard identifier invalidate the image;
/// a terminator ends the set.
pub fn read_descriptor_set<M: BlockMedium>(medium: &mut M) -> Result<Vec<VolumeDescriptor>> {
  let mut descriptors = Vec::new();
  let mut sector = vec![0u8; medium.sector_size()];
  let limit = medium.max_sectors().max(SYSTEM_AREA_SECTORS + 1);

  for index in SYSTEM_AREA_SECTORS.. {
    if index >= limit {
      // Ran off the end without a terminator.
      return Err(Error::InvalidImage);
    }

    medium.read_sector_into(index, &mut sector)?;

    let descriptor = VolumeDescriptor::parse(&sector[..DESCRIPTOR_SIZE])?;
    if matches!(descriptor, VolumeDescriptor::Terminator) {
      descriptors.push(descriptor);
      break;
    }

    descriptors.push(descriptor);
  }

  Ok(descriptors)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::medium::MemoryMedium;
  use crate::record::FileFlags;

  fn root_record() -> DirectoryRecord {
    let mut root = DirectoryRecord::current_directory();
    root.extent_location = 20;
    root.data_length = 2048;
    root.set_file_flags(FileFlags::DIRECTORY);
    root
  }

  fn sample_primary() -> PrimaryVolumeDescriptor {
    PrimaryVolumeDescriptor {
      system_identifier: "LINUX".into(),
      volume_identifier: "ARCHIVE".into(),
      volume_space_size: 0x12345678,
      volume_set_size: 1,
      volume_sequence_number: 1,
      logical_block_size: 2048,
      path_table_size: 10,
      type_l_path_table_location: 21,
      optional_type_l_path_table_location: 0,
      type_m_path_table_location: 22,
      optional_type_m_path_table_location: 0,
      root_directory_record: root_record(),
      volume_set_identifier: "SET".into(),
      publisher_identifier: IdentifierOrFile::Identifier("ACME".into()),
      data_preparer_identifier: IdentifierOrFile::Empty,
      application_identifier: IdentifierOrFile::File("APP.TXT".into()),
      copyright_file_identifier: IdentifierOrFile::Empty,
      abstract_file_identifier: IdentifierOrFile::Empty,
      bibliographic_file_identifier: IdentifierOrFile::Empty,
      creation_date: Some(VolumeTimestamp {
        year: 2024,
        month: 2,
        day: 29,
        hour: 1,
        minute: 2,
        second: 3,
        hundredths: 0,
        gmt_offset: 0,
      }),
      modification_date: None,
      expiration_date: None,
      effective_date: None,
      file_structure_version: 1,
      application_use: vec![7; 12],
    }
  }

  fn sample_supplementary(version: u8, escape: &[u8; 3]) -> SupplementaryVolumeDescriptor {
    let mut escape_sequences = [0u8; 32];
    escape_sequences[..3].copy_from_slice(escape);

    SupplementaryVolumeDescriptor {
      version,
      volume_flags: 0,
      system_identifier: "LINUX".into(),
      volume_identifier: "Archive".into(),
      volume_space_size: 5000,
      escape_sequences,
      volume_set_size: 1,
      volume_sequence_number: 1,
      logical_block_size: 2048,
      path_table_size: 10,
      type_l_path_table_location: 30,
      optional_type_l_path_table_location: 0,
      type_m_path_table_location: 31,
      optional_type_m_path_table_location: 0,
      root_directory_record: root_record(),
      volume_set_identifier: String::new(),
      publisher_identifier: IdentifierOrFile::Empty,
      data_preparer_identifier: IdentifierOrFile::Empty,
      application_identifier: IdentifierOrFile::Empty,
      copyright_file_identifier: IdentifierOrFile::Empty,
      abstract_file_identifier: IdentifierOrFile::Empty,
      bibliographic_file_identifier: IdentifierOrFile::Empty,
      creation_date: None,
      modification_date: None,
      expiration_date: None,
      effective_date: None,
      file_structure_version: version,
      application_use: Vec::new(),
    }
  }

  #[test]
  fn primary_round_trips() {
    let descriptor = VolumeDescriptor::Primary(sample_primary());
    let sector = descriptor.serialize().unwrap();

    assert_eq!(sector[0], 1);
    assert_eq!(&sector[1..6], b"CD001");
    assert_eq!(VolumeDescriptor::parse(&sector).unwrap(), descriptor);
  }

  #[test]
  fn supplementary_round_trips_in_ucs2() {
    let descriptor = VolumeDescriptor::Supplementary(sample_supplementary(1, b"%/E"));
    let sector = descriptor.serialize().unwrap();
    assert_eq!(VolumeDescriptor::parse(&sector).unwrap(), descriptor);
  }

  #[test]
  fn enhanced_is_classified_by_version() {
    let descriptor = VolumeDescriptor::Enhanced(sample_supplementary(2, b"%/I"));
    let sector = descriptor.serialize().unwrap();

    let parsed = VolumeDescriptor::parse(&sector).unwrap();
    assert!(matches!(parsed, VolumeDescriptor::Enhanced(_)));
    assert_eq!(parsed.encoding(), Some(TextEncoding::Utf8));
  }

  #[test]
  fn unknown_escape_sequences_default_to_ucs2() {
    let descriptor = sample_supplementary(1, b"%/Z");
    assert_eq!(descriptor.encoding(), TextEncoding::Ucs2Be);
  }

  #[test]
  fn missing_magic_is_invalid() {
    let mut sector = [0u8; DESCRIPTOR_SIZE];
    sector[0] = 1;
    sector[1..6].copy_from_slice(b"CD002");
    assert!(VolumeDescriptor::parse(&sector).is_err());
  }

  #[test]
  fn primary_validation_checks_character_sets() {
    let mut descriptor = sample_primary();
    descriptor.validate().unwrap();

    descriptor.volume_identifier = "lowercase".into();
    assert!(matches!(
      descriptor.validate(),
      Err(Error::InvalidIdentifier { field: "volume", .. })
    ));

    let mut descriptor = sample_primary();
    descriptor.logical_block_size = 1000;
    assert!(matches!(
      descriptor.validate(),
      Err(Error::InvalidLogicalBlockSize(1000))
    ));

    let mut descriptor = sample_primary();
    descriptor.application_use = vec![0; 513];
    assert!(matches!(
      descriptor.validate(),
      Err(Error::InvalidApplicationUseSize(513))
    ));
  }

  #[test]
  fn descriptor_set_discovery() {
    let mut medium = MemoryMedium::new(2048).unwrap();
    let primary = VolumeDescriptor::Primary(sample_primary()).serialize().unwrap();
    let terminator = VolumeDescriptor::Terminator.serialize().unwrap();

    medium.write_sector(16, &primary).unwrap();
    medium.write_sector(17, &terminator).unwrap();

    let descriptors = read_descriptor_set(&mut medium).unwrap();
    assert_eq!(descriptors.len(), 2);
    assert!(matches!(descriptors[0], VolumeDescriptor::Primary(_)));
    assert!(matches!(descriptors[1], VolumeDescriptor::Terminator));
  }

  #[test]
  fn blank_medium_is_invalid() {
    let mut medium = MemoryMedium::new(2048).unwrap();
    assert!(read_descriptor_set(&mut medium).is_err());
  }
}
