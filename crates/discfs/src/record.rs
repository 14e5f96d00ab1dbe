//! Directory records, path table records, and extended attribute records.

use byteorder::ByteOrder;

use crate::codec::{self, RecordTimestamp, TextEncoding, VolumeTimestamp};
use crate::{Error, Result};

/// Fixed portion of a directory record preceding the identifier.
pub const DIRECTORY_RECORD_HEADER_LEN: usize = 33;

/// Hard cap on the length of one directory record.
pub const DIRECTORY_RECORD_MAX_LEN: usize = 255;

bitflags::bitflags! {
  /// File flags byte of a directory record (ECMA-119 §9.1.6).
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct FileFlags: u8 {
    const HIDDEN = 1 << 0;
    const DIRECTORY = 1 << 1;
    const ASSOCIATED_FILE = 1 << 2;
    const RECORD = 1 << 3;
    const PROTECTION = 1 << 4;
    const MULTI_EXTENT = 1 << 7;
  }

  /// Permissions field of an extended attribute record.
  ///
  /// Only the meaningful bits are modeled; the odd "shall be set to 1" bits
  /// are forced on serialization and masked off on parse.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct Permissions: u16 {
    const SYSTEM_READ = 1 << 0;
    const SYSTEM_EXECUTE = 1 << 2;
    const USER_READ = 1 << 4;
    const USER_EXECUTE = 1 << 6;
    const OTHER_READ = 1 << 8;
    const OTHER_EXECUTE = 1 << 10;
    const ALL_READ = 1 << 12;
    const ALL_EXECUTE = 1 << 14;
  }
}

/// The reserved permission bits ECMA-119 requires to be one.
const PERMISSIONS_RESERVED: u16 = 0xAAAA;

/// A decoded directory-record identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordIdentifier {
  /// The single byte `0x00`, naming the directory itself.
  CurrentDirectory,
  /// The single byte `0x01`, naming the parent.
  ParentDirectory,
  Directory(String),
  File(String),
}

/// One variable-length directory record (ECMA-119 §9.1).
///
/// The record length is derived, never stored: 33 header bytes, the
/// identifier, a single pad byte when the identifier length is even, the
/// system-use trailer, rounded up to an even total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
  pub extended_attribute_length: u8,
  pub extent_location: u32,
  pub data_length: u32,
  pub recording_date: Option<RecordTimestamp>,
  flags: FileFlags,
  pub file_unit_size: u8,
  pub interleave_gap_size: u8,
  pub volume_sequence_number: u16,
  identifier: Vec<u8>,
  system_use: Vec<u8>,
}

impl DirectoryRecord {
  pub fn new(identifier: Vec<u8>) -> Self {
    Self {
      extended_attribute_length: 0,
      extent_location: 0,
      data_length: 0,
      recording_date: None,
      flags: FileFlags::empty(),
      file_unit_size: 0,
      interleave_gap_size: 0,
      volume_sequence_number: 1,
      identifier,
      system_use: Vec::new(),
    }
  }

  /// The record for "." inside a directory extent.
  pub fn current_directory() -> Self {
    Self::new(vec![0x00])
  }

  /// The record for ".." inside a directory extent.
  pub fn parent_directory() -> Self {
    Self::new(vec![0x01])
  }

  fn pad_len(identifier_len: usize) -> usize {
    if identifier_len % 2 == 0 {
      1
    } else {
      0
    }
  }

  /// Total on-disc length, rounded up to even.
  pub fn len(&self) -> usize {
    let unpadded = DIRECTORY_RECORD_HEADER_LEN
      + self.identifier.len()
      + Self::pad_len(self.identifier.len())
      + self.system_use.len();

    unpadded + unpadded % 2
  }

  pub fn is_empty(&self) -> bool {
    false
  }

  pub fn file_flags(&self) -> FileFlags {
    self.flags
  }

  /// The directory flag is exclusive with the associated-file, record, and
  /// multi-extent flags; setting it clears them.
  pub fn set_file_flags(&mut self, flags: FileFlags) {
    self.flags = if flags.contains(FileFlags::DIRECTORY) {
      flags - (FileFlags::ASSOCIATED_FILE | FileFlags::RECORD | FileFlags::MULTI_EXTENT)
    } else {
      flags
    };
  }

  pub fn is_directory(&self) -> bool {
    self.flags.contains(FileFlags::DIRECTORY)
  }

  pub fn identifier_bytes(&self) -> &[u8] {
    &self.identifier
  }

  /// Replace the identifier, preserving the system-use trailer.
  pub fn set_identifier_bytes(&mut self, identifier: Vec<u8>) {
    self.identifier = identifier;
  }

  pub fn system_use(&self) -> &[u8] {
    &self.system_use
  }

  /// Replace the system-use trailer; `None` truncates the record to its
  /// header and identifier.
  pub fn set_system_use(&mut self, system_use: Option<Vec<u8>>) {
    self.system_use = system_use.unwrap_or_default();
  }

  /// Decode the identifier with the descriptor's encoding.
  pub fn identifier(&self, encoding: TextEncoding) -> RecordIdentifier {
    match self.identifier.as_slice() {
      [0x00] => RecordIdentifier::CurrentDirectory,
      [0x01] => RecordIdentifier::ParentDirectory,
      bytes => {
        let name = encoding.decode(bytes);
        if self.is_directory() {
          RecordIdentifier::Directory(name)
        } else {
          RecordIdentifier::File(name)
        }
      }
    }
  }

  /// Parse one record from the head of `input`, returning it along with the
  /// number of bytes consumed. A zero length byte is the caller's signal to
  /// advance to the next sector and is not handled here.
  pub fn parse(input: &[u8]) -> Result<(Self, usize)> {
    if input.is_empty() {
      return Err(Error::InvalidImage);
    }

    let length = input[0] as usize;
    if length < DIRECTORY_RECORD_HEADER_LEN + 1 || length > input.len() {
      return Err(Error::InvalidImage);
    }

    let identifier_length = input[32] as usize;
    if identifier_length == 0 {
      return Err(Error::InvalidImage);
    }

    let pad = Self::pad_len(identifier_length);
    if DIRECTORY_RECORD_HEADER_LEN + identifier_length + pad > length {
      return Err(Error::InvalidImage);
    }

    let identifier =
      input[DIRECTORY_RECORD_HEADER_LEN..DIRECTORY_RECORD_HEADER_LEN + identifier_length].to_vec();
    let system_use =
      input[DIRECTORY_RECORD_HEADER_LEN + identifier_length + pad..length].to_vec();

    let record = Self {
      extended_attribute_length: input[1],
      extent_location: codec::decode_u32_both(&input[2..10]),
      data_length: codec::decode_u32_both(&input[10..18]),
      recording_date: RecordTimestamp::deserialize(&input[18..25]),
      // Reserved flag bits are dropped so a rewrite emits a clean byte.
      flags: FileFlags::from_bits_truncate(input[25]),
      file_unit_size: input[26],
      interleave_gap_size: input[27],
      volume_sequence_number: codec::decode_u16_both(&input[28..32]),
      identifier,
      system_use,
    };

    Ok((record, length))
  }

  /// Serialize into `out`, returning the record length. Records longer than
  /// 255 bytes cannot be represented and are rejected.
  pub fn serialize_into(&self, out: &mut [u8]) -> Result<usize> {
    let length = self.len();
    if length > DIRECTORY_RECORD_MAX_LEN {
      return Err(Error::PreconditionFailed(format!(
        "directory record of {length} bytes exceeds the 255 byte cap"
      )));
    }
    if out.len() < length {
      return Err(Error::PreconditionFailed(format!(
        "output of {} bytes cannot hold a {length} byte record",
        out.len()
      )));
    }

    let out = &mut out[..length];
    out.fill(0);

    out[0] = length as u8;
    out[1] = self.extended_attribute_length;
    codec::encode_u32_both(self.extent_location, &mut out[2..10]);
    codec::encode_u32_both(self.data_length, &mut out[10..18]);
    out[18..25].copy_from_slice(&RecordTimestamp::serialize_opt(self.recording_date.as_ref()));
    out[25] = self.flags.bits();
    out[26] = self.file_unit_size;
    out[27] = self.interleave_gap_size;
    codec::encode_u16_both(self.volume_sequence_number, &mut out[28..32]);
    out[32] = self.identifier.len() as u8;
    out[DIRECTORY_RECORD_HEADER_LEN..DIRECTORY_RECORD_HEADER_LEN + self.identifier.len()]
      .copy_from_slice(&self.identifier);

    let trailer_at =
      DIRECTORY_RECORD_HEADER_LEN + self.identifier.len() + Self::pad_len(self.identifier.len());
    out[trailer_at..trailer_at + self.system_use.len()].copy_from_slice(&self.system_use);

    Ok(length)
  }

  pub fn serialize(&self) -> Result<Vec<u8>> {
    let mut out = vec![0u8; self.len()];
    self.serialize_into(&mut out)?;
    Ok(out)
  }
}

/// One path table record (ECMA-119 §9.4). The integer byte order is chosen by
/// the table the record belongs to; a volume stores one table in each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTableRecord {
  pub extended_attribute_length: u8,
  pub extent_location: u32,
  pub parent_directory_number: u16,
  pub identifier: Vec<u8>,
}

impl PathTableRecord {
  pub fn len(&self) -> usize {
    8 + self.identifier.len() + (self.identifier.len() & 1)
  }

  pub fn is_empty(&self) -> bool {
    false
  }

  pub fn parse<E: ByteOrder>(input: &[u8]) -> Result<(Self, usize)> {
    if input.len() < 8 {
      return Err(Error::InvalidImage);
    }

    let identifier_length = input[0] as usize;
    if identifier_length == 0 {
      return Err(Error::InvalidImage);
    }

    let total = 8 + identifier_length + (identifier_length & 1);
    if input.len() < total {
      return Err(Error::InvalidImage);
    }

    Ok((
      Self {
        extended_attribute_length: input[1],
        extent_location: E::read_u32(&input[2..6]),
        parent_directory_number: E::read_u16(&input[6..8]),
        identifier: input[8..8 + identifier_length].to_vec(),
      },
      total,
    ))
  }

  pub fn serialize_into<E: ByteOrder>(&self, out: &mut [u8]) -> Result<usize> {
    let total = self.len();
    if out.len() < total {
      return Err(Error::PreconditionFailed(format!(
        "output of {} bytes cannot hold a {total} byte path table record",
        out.len()
      )));
    }

    let out = &mut out[..total];
    out.fill(0);

    out[0] = self.identifier.len() as u8;
    out[1] = self.extended_attribute_length;
    E::write_u32(&mut out[2..6], self.extent_location);
    E::write_u16(&mut out[6..8], self.parent_directory_number);
    out[8..8 + self.identifier.len()].copy_from_slice(&self.identifier);

    Ok(total)
  }

  pub fn serialize<E: ByteOrder>(&self) -> Result<Vec<u8>> {
    let mut out = vec![0u8; self.len()];
    self.serialize_into::<E>(&mut out)?;
    Ok(out)
  }
}

/// An extended attribute record (ECMA-119 §9.5): a 250-byte fixed prefix
/// followed by the application use bytes and the escape sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedAttributeRecord {
  pub owner_identification: u16,
  pub group_identification: u16,
  pub permissions: Permissions,
  pub creation_date: Option<VolumeTimestamp>,
  pub modification_date: Option<VolumeTimestamp>,
  pub expiration_date: Option<VolumeTimestamp>,
  pub effective_date: Option<VolumeTimestamp>,
  pub record_format: u8,
  pub record_attributes: u8,
  pub record_length: u16,
  pub system_identifier: String,
  pub system_use: [u8; 64],
  pub application_use: Vec<u8>,
  pub escape_sequences: Vec<u8>,
}

impl ExtendedAttributeRecord {
  pub const PREFIX_LEN: usize = 250;

  pub fn len(&self) -> usize {
    Self::PREFIX_LEN + self.application_use.len() + self.escape_sequences.len()
  }

  pub fn is_empty(&self) -> bool {
    false
  }

  pub fn parse(input: &[u8]) -> Result<(Self, usize)> {
    if input.len() < Self::PREFIX_LEN {
      return Err(Error::InvalidImage);
    }

    let escape_len = input[181] as usize;
    let application_len = codec::decode_u16_both(&input[246..250]) as usize;
    let total = Self::PREFIX_LEN + application_len + escape_len;
    if input.len() < total {
      return Err(Error::InvalidImage);
    }

    let mut system_use = [0u8; 64];
    system_use.copy_from_slice(&input[116..180]);

    Ok((
      Self {
        owner_identification: codec::decode_u16_both(&input[0..4]),
        group_identification: codec::decode_u16_both(&input[4..8]),
        permissions: Permissions::from_bits_truncate(u16::from_be_bytes([input[8], input[9]])),
        creation_date: VolumeTimestamp::deserialize(&input[10..27]),
        modification_date: VolumeTimestamp::deserialize(&input[27..44]),
        expiration_date: VolumeTimestamp::deserialize(&input[44..61]),
        effective_date: VolumeTimestamp::deserialize(&input[61..78]),
        record_format: input[78],
        record_attributes: input[79],
        record_length: codec::decode_u16_both(&input[80..84]),
        system_identifier: TextEncoding::Iso.decode_padded(&input[84..116]),
        system_use,
        application_use: input[250..250 + application_len].to_vec(),
        escape_sequences: input[250 + application_len..total].to_vec(),
      },
      total,
    ))
  }

  pub fn serialize(&self) -> Vec<u8> {
    let mut out = vec![0u8; self.len()];

    codec::encode_u16_both(self.owner_identification, &mut out[0..4]);
    codec::encode_u16_both(self.group_identification, &mut out[4..8]);
    out[8..10]
      .copy_from_slice(&(self.permissions.bits() | PERMISSIONS_RESERVED).to_be_bytes());
    out[10..27].copy_from_slice(&VolumeTimestamp::serialize_opt(self.creation_date.as_ref()));
    out[27..44].copy_from_slice(&VolumeTimestamp::serialize_opt(self.modification_date.as_ref()));
    out[44..61].copy_from_slice(&VolumeTimestamp::serialize_opt(self.expiration_date.as_ref()));
    out[61..78].copy_from_slice(&VolumeTimestamp::serialize_opt(self.effective_date.as_ref()));
    out[78] = self.record_format;
    out[79] = self.record_attributes;
    codec::encode_u16_both(self.record_length, &mut out[80..84]);
    TextEncoding::Iso.encode_padded(&self.system_identifier, &mut out[84..116]);
    out[116..180].copy_from_slice(&self.system_use);
    out[180] = 1;
    out[181] = self.escape_sequences.len() as u8;
    codec::encode_u16_both(self.application_use.len() as u16, &mut out[246..250]);
    out[250..250 + self.application_use.len()].copy_from_slice(&self.application_use);
    out[250 + self.application_use.len()..].copy_from_slice(&self.escape_sequences);

    out
  }
}

impl Default for ExtendedAttributeRecord {
  fn default() -> Self {
    Self {
      owner_identification: 0,
      group_identification: 0,
      permissions: Permissions::empty(),
      creation_date: None,
      modification_date: None,
      expiration_date: None,
      effective_date: None,
      record_format: 0,
      record_attributes: 0,
      record_length: 0,
      system_identifier: String::new(),
      system_use: [0u8; 64],
      application_use: Vec::new(),
      escape_sequences: Vec::new(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use byteorder::{BigEndian, LittleEndian};

  fn sample_record() -> DirectoryRecord {
    let mut record = DirectoryRecord::new(b"README.TXT;1".to_vec());
    record.extent_location = 120;
    record.data_length = 5000;
    record.recording_date = Some(RecordTimestamp {
      year: 2023,
      month: 4,
      day: 1,
      hour: 12,
      minute: 30,
      second: 15,
      gmt_offset: 0,
    });
    record.set_system_use(Some(vec![0xAA, 0xBB, 0xCC]));
    record
  }

  #[test]
  fn directory_record_round_trips() {
    let record = sample_record();
    let bytes = record.serialize().unwrap();
    let (parsed, consumed) = DirectoryRecord::parse(&bytes).unwrap();

    assert_eq!(consumed, record.len());
    assert_eq!(parsed, record);
  }

  #[test]
  fn directory_record_length_arithmetic() {
    // Even identifier lengths take a pad byte, odd ones do not.
    assert_eq!(DirectoryRecord::new(vec![0x00]).len(), 34);
    assert_eq!(DirectoryRecord::new(b"AB".to_vec()).len(), 36);
    assert_eq!(DirectoryRecord::new(b"ABC".to_vec()).len(), 36);

    // An odd trailer rounds the total up to even.
    let mut record = DirectoryRecord::new(vec![0x00]);
    record.set_system_use(Some(vec![0x01; 5]));
    assert_eq!(record.len(), 40);
  }

  #[test]
  fn zero_identifier_is_invalid() {
    let mut bytes = sample_record().serialize().unwrap();
    bytes[32] = 0;
    assert!(DirectoryRecord::parse(&bytes).is_err());
  }

  #[test]
  fn oversized_record_is_rejected() {
    let mut record = DirectoryRecord::new(b"NAME".to_vec());
    record.set_system_use(Some(vec![0u8; 230]));

    let mut out = [0u8; 512];
    assert!(record.serialize_into(&mut out).is_err());
  }

  #[test]
  fn directory_flag_clears_exclusive_flags() {
    let mut record = DirectoryRecord::new(b"X".to_vec());
    record.set_file_flags(
      FileFlags::DIRECTORY | FileFlags::ASSOCIATED_FILE | FileFlags::MULTI_EXTENT,
    );
    assert_eq!(record.file_flags(), FileFlags::DIRECTORY);

    record.set_file_flags(FileFlags::RECORD | FileFlags::HIDDEN);
    assert_eq!(record.file_flags(), FileFlags::RECORD | FileFlags::HIDDEN);
  }

  #[test]
  fn identifier_decoding() {
    assert_eq!(
      DirectoryRecord::current_directory().identifier(TextEncoding::Iso),
      RecordIdentifier::CurrentDirectory
    );
    assert_eq!(
      DirectoryRecord::parent_directory().identifier(TextEncoding::Iso),
      RecordIdentifier::ParentDirectory
    );

    let mut dir = DirectoryRecord::new(b"SRC".to_vec());
    dir.set_file_flags(FileFlags::DIRECTORY);
    assert_eq!(
      dir.identifier(TextEncoding::Iso),
      RecordIdentifier::Directory("SRC".into())
    );
  }

  #[test]
  fn set_identifier_preserves_system_use() {
    let mut record = sample_record();
    record.set_identifier_bytes(b"OTHER.BIN;1".to_vec());
    assert_eq!(record.system_use(), &[0xAA, 0xBB, 0xCC]);

    record.set_system_use(None);
    assert_eq!(record.len(), 33 + 11 + 0);
  }

  #[test]
  fn path_table_record_round_trips_both_orders() {
    let record = PathTableRecord {
      extended_attribute_length: 0,
      extent_location: 0x00010203,
      parent_directory_number: 7,
      identifier: b"SRC".to_vec(),
    };

    let le = record.serialize::<LittleEndian>().unwrap();
    let be = record.serialize::<BigEndian>().unwrap();
    assert_eq!(le.len(), 12);
    assert_eq!(&le[2..6], &[0x03, 0x02, 0x01, 0x00]);
    assert_eq!(&be[2..6], &[0x00, 0x01, 0x02, 0x03]);

    assert_eq!(PathTableRecord::parse::<LittleEndian>(&le).unwrap().0, record);
    assert_eq!(PathTableRecord::parse::<BigEndian>(&be).unwrap().0, record);
  }

  #[test]
  fn path_table_record_pads_even_identifiers() {
    let record = PathTableRecord {
      extended_attribute_length: 0,
      extent_location: 1,
      parent_directory_number: 1,
      identifier: b"AB".to_vec(),
    };
    assert_eq!(record.len(), 10);

    let bytes = record.serialize::<LittleEndian>().unwrap();
    assert_eq!(bytes[bytes.len() - 1], 0);
  }

  #[test]
  fn extended_attribute_record_round_trips() {
    let record = ExtendedAttributeRecord {
      owner_identification: 501,
      group_identification: 20,
      permissions: Permissions::USER_READ | Permissions::USER_EXECUTE,
      creation_date: Some(VolumeTimestamp {
        year: 2001,
        month: 1,
        day: 2,
        hour: 3,
        minute: 4,
        second: 5,
        hundredths: 6,
        gmt_offset: 0,
      }),
      modification_date: None,
      expiration_date: None,
      effective_date: None,
      record_format: 0,
      record_attributes: 0,
      record_length: 0,
      system_identifier: "LINUX".into(),
      system_use: [0u8; 64],
      application_use: vec![1, 2, 3],
      escape_sequences: vec![0x25, 0x2F, 0x45],
    };

    let bytes = record.serialize();
    assert_eq!(bytes.len(), 256);

    // Reserved permission bits are forced to one on disc.
    let on_disc = u16::from_be_bytes([bytes[8], bytes[9]]);
    assert_eq!(on_disc & PERMISSIONS_RESERVED, PERMISSIONS_RESERVED);

    let (parsed, consumed) = ExtendedAttributeRecord::parse(&bytes).unwrap();
    assert_eq!(consumed, record.len());
    assert_eq!(parsed, record);
  }
}
