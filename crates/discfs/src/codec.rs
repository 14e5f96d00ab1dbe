//! Primitive on-disc codecs: both-endian integers, the two ECMA-119 date
//! formats, identifier character sets, and padded-string fields.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::{Error, Result};

/// Filler byte used to pad identifier fields.
pub const FILLER: u8 = b' ';

/// Encode a `u16` in both-byte order (ECMA-119 §7.2.3): little-endian
/// immediately followed by big-endian.
pub fn encode_u16_both(value: u16, out: &mut [u8]) {
  LittleEndian::write_u16(&mut out[..2], value);
  BigEndian::write_u16(&mut out[2..4], value);
}

/// Encode a `u32` in both-byte order (ECMA-119 §7.3.3).
pub fn encode_u32_both(value: u32, out: &mut [u8]) {
  LittleEndian::write_u32(&mut out[..4], value);
  BigEndian::write_u32(&mut out[4..8], value);
}

/// Encode a `u64` in both-byte order.
pub fn encode_u64_both(value: u64, out: &mut [u8]) {
  LittleEndian::write_u64(&mut out[..8], value);
  BigEndian::write_u64(&mut out[8..16], value);
}

/// Decode a both-byte-order `u16`, reading the little-endian half.
pub fn decode_u16_both(input: &[u8]) -> u16 {
  LittleEndian::read_u16(&input[..2])
}

/// Decode a both-byte-order `u32`, reading the little-endian half.
pub fn decode_u32_both(input: &[u8]) -> u32 {
  LittleEndian::read_u32(&input[..4])
}

/// Decode a both-byte-order `u64`, reading the little-endian half.
pub fn decode_u64_both(input: &[u8]) -> u64 {
  LittleEndian::read_u64(&input[..8])
}

/// Decode a both-byte-order `u16`, failing when the two halves disagree.
pub fn decode_u16_both_strict(input: &[u8]) -> Result<u16> {
  let le = LittleEndian::read_u16(&input[..2]);
  let be = BigEndian::read_u16(&input[2..4]);

  if le != be {
    return Err(Error::PreconditionFailed(format!(
      "both-endian halves disagree: {le:#06x} vs {be:#06x}"
    )));
  }

  Ok(le)
}

/// Decode a both-byte-order `u32`, failing when the two halves disagree.
pub fn decode_u32_both_strict(input: &[u8]) -> Result<u32> {
  let le = LittleEndian::read_u32(&input[..4]);
  let be = BigEndian::read_u32(&input[4..8]);

  if le != be {
    return Err(Error::PreconditionFailed(format!(
      "both-endian halves disagree: {le:#010x} vs {be:#010x}"
    )));
  }

  Ok(le)
}

/// `[A-Z0-9_]` plus `!"%&'()*+,-./:;<=>?` and space.
pub fn is_a_character(b: u8) -> bool {
  matches!(b,
    b'A'..=b'Z' | b'0'..=b'9' | b'_' | b' '
    | b'!' | b'"' | b'%' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+'
    | b',' | b'-' | b'.' | b'/' | b':' | b';' | b'<' | b'=' | b'>' | b'?')
}

/// `[A-Z0-9_]`
pub fn is_d_character(b: u8) -> bool {
  matches!(b, b'A'..=b'Z' | b'0'..=b'9' | b'_')
}

/// Separators used in file identifiers: `.` and `;`.
pub fn is_separator(b: u8) -> bool {
  matches!(b, b'.' | b';')
}

/// Whether every code point of `s` is an a-character. Empty strings pass.
pub fn is_a_string(s: &str) -> bool {
  s.bytes().all(is_a_character) && s.is_ascii()
}

/// Whether every code point of `s` is a d-character. Empty strings pass.
pub fn is_d_string(s: &str) -> bool {
  s.is_ascii() && s.bytes().all(is_d_character)
}

/// Whether every code point of `s` is a d-character or a separator.
pub fn is_d_or_separator_string(s: &str) -> bool {
  s.is_ascii() && s.bytes().all(|b| is_d_character(b) || is_separator(b))
}

/// String encoding of identifier and name fields.
///
/// `Iso` covers both the a-character and d-character fields of ECMA-119,
/// which are plain single-byte ASCII. The other two are selected by the
/// escape sequences of a Supplementary or Enhanced descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
  Iso,
  Ucs2Be,
  Utf8,
}

impl TextEncoding {
  /// Smallest indivisible code unit in bytes.
  pub fn unit(&self) -> usize {
    match self {
      TextEncoding::Ucs2Be => 2,
      _ => 1,
    }
  }

  /// Encode `s` greedily into at most `max` bytes, stopping before the first
  /// code point whose encoding would overflow. Multi-byte code units are
  /// never split.
  pub fn encode_truncated(&self, s: &str, max: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(max.min(s.len() * self.unit()));

    for ch in s.chars() {
      match self {
        TextEncoding::Iso => {
          if out.len() + 1 > max {
            break;
          }
          out.push(if ch.is_ascii() { ch as u8 } else { b'_' });
        }
        TextEncoding::Ucs2Be => {
          if out.len() + 2 > max {
            break;
          }
          // Code points beyond the BMP are not representable in UCS-2.
          let unit = if (ch as u32) <= 0xFFFF { ch as u32 as u16 } else { b'_' as u16 };
          out.extend_from_slice(&unit.to_be_bytes());
        }
        TextEncoding::Utf8 => {
          let mut buf = [0u8; 4];
          let encoded = ch.encode_utf8(&mut buf);
          if out.len() + encoded.len() > max {
            break;
          }
          out.extend_from_slice(encoded.as_bytes());
        }
      }
    }

    out
  }

  /// Encode `s` into `out`, padding the remainder with filler units. A tail
  /// too short for a whole filler unit is zero-filled.
  pub fn encode_padded(&self, s: &str, out: &mut [u8]) {
    let encoded = self.encode_truncated(s, out.len());
    out[..encoded.len()].copy_from_slice(&encoded);

    let mut at = encoded.len();
    while at < out.len() {
      if out.len() - at >= self.unit() {
        match self {
          TextEncoding::Ucs2Be => {
            out[at] = 0;
            out[at + 1] = FILLER;
          }
          _ => out[at] = FILLER,
        }
        at += self.unit();
      } else {
        out[at] = 0;
        at += 1;
      }
    }
  }

  /// Decode a field of exactly these bytes.
  pub fn decode(&self, bytes: &[u8]) -> String {
    match self {
      TextEncoding::Iso => bytes.iter().map(|&b| b as char).collect(),
      TextEncoding::Ucs2Be => {
        let units = bytes
          .chunks_exact(2)
          .map(|c| u16::from_be_bytes([c[0], c[1]]))
          .collect::<Vec<_>>();
        char::decode_utf16(units)
          .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
          .collect()
      }
      TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
    }
  }

  /// Decode a padded field, stripping trailing filler (and any zero tail).
  pub fn decode_padded(&self, bytes: &[u8]) -> String {
    let mut end = bytes.len();
    match self {
      TextEncoding::Ucs2Be => {
        if end % 2 == 1 && bytes[end - 1] == 0 {
          end -= 1;
        }
        while end >= 2 {
          let unit = u16::from_be_bytes([bytes[end - 2], bytes[end - 1]]);
          if unit == FILLER as u16 || unit == 0 {
            end -= 2;
          } else {
            break;
          }
        }
      }
      _ => {
        while end > 0 && (bytes[end - 1] == FILLER || bytes[end - 1] == 0) {
          end -= 1;
        }
      }
    }

    self.decode(&bytes[..end])
  }
}

/// An identifier field that may alternatively name a file in the root
/// directory, flagged by a leading `0x5F`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentifierOrFile {
  Identifier(String),
  File(String),
  #[default]
  Empty,
}

impl IdentifierOrFile {
  pub fn serialize_padded(&self, encoding: TextEncoding, out: &mut [u8]) {
    match self {
      IdentifierOrFile::Identifier(s) => encoding.encode_padded(s, out),
      IdentifierOrFile::File(s) => {
        let prefixed = format!("_{s}");
        encoding.encode_padded(&prefixed, out);
      }
      IdentifierOrFile::Empty => encoding.encode_padded("", out),
    }
  }

  pub fn deserialize(encoding: TextEncoding, bytes: &[u8]) -> Self {
    let s = encoding.decode_padded(bytes);

    if s.is_empty() {
      IdentifierOrFile::Empty
    } else if let Some(rest) = s.strip_prefix('_') {
      IdentifierOrFile::File(rest.to_string())
    } else {
      IdentifierOrFile::Identifier(s)
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      IdentifierOrFile::Identifier(s) | IdentifierOrFile::File(s) => s,
      IdentifierOrFile::Empty => "",
    }
  }
}

/// The 7-byte binary timestamp recorded in directory records (ECMA-119 §9.1.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTimestamp {
  pub year: u16,
  pub month: u8,
  pub day: u8,
  pub hour: u8,
  pub minute: u8,
  pub second: u8,
  /// Offset from GMT in 15-minute units.
  pub gmt_offset: i8,
}

impl RecordTimestamp {
  pub const LEN: usize = 7;

  pub fn serialize(&self) -> [u8; 7] {
    [
      self.year.saturating_sub(1900).min(255) as u8,
      self.month,
      self.day,
      self.hour,
      self.minute,
      self.second,
      self.gmt_offset as u8,
    ]
  }

  /// Absent timestamps serialize as all zero.
  pub fn serialize_opt(ts: Option<&RecordTimestamp>) -> [u8; 7] {
    ts.map(RecordTimestamp::serialize).unwrap_or([0; 7])
  }

  /// An all-zero payload deserializes as absent.
  pub fn deserialize(input: &[u8]) -> Option<Self> {
    if input.len() < Self::LEN || input[..Self::LEN].iter().all(|&b| b == 0) {
      return None;
    }

    Some(Self {
      year: 1900 + input[0] as u16,
      month: input[1],
      day: input[2],
      hour: input[3],
      minute: input[4],
      second: input[5],
      gmt_offset: input[6] as i8,
    })
  }

  pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
    Utc
      .with_ymd_and_hms(
        self.year as i32,
        self.month as u32,
        self.day as u32,
        self.hour as u32,
        self.minute as u32,
        self.second as u32,
      )
      .single()
      .map(|dt| dt - chrono::Duration::minutes(self.gmt_offset as i64 * 15))
  }
}

impl From<DateTime<Utc>> for RecordTimestamp {
  fn from(dt: DateTime<Utc>) -> Self {
    Self {
      year: dt.year().clamp(1900, 1900 + 255) as u16,
      month: dt.month() as u8,
      day: dt.day() as u8,
      hour: dt.hour() as u8,
      minute: dt.minute() as u8,
      second: dt.second() as u8,
      gmt_offset: 0,
    }
  }
}

/// The 17-byte ASCII timestamp recorded in volume descriptors and extended
/// attribute records (ECMA-119 §8.4.26.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeTimestamp {
  pub year: u16,
  pub month: u8,
  pub day: u8,
  pub hour: u8,
  pub minute: u8,
  pub second: u8,
  pub hundredths: u8,
  /// Offset from GMT in 15-minute units.
  pub gmt_offset: i8,
}

impl VolumeTimestamp {
  pub const LEN: usize = 17;

  pub fn serialize(&self) -> [u8; 17] {
    let mut out = [0u8; 17];
    let digits = format!(
      "{:04}{:02}{:02}{:02}{:02}{:02}{:02}",
      self.year, self.month, self.day, self.hour, self.minute, self.second, self.hundredths
    );
    out[..16].copy_from_slice(&digits.as_bytes()[..16]);
    out[16] = self.gmt_offset as u8;
    out
  }

  /// Absent timestamps serialize as sixteen ASCII zeros and a zero offset.
  pub fn serialize_opt(ts: Option<&VolumeTimestamp>) -> [u8; 17] {
    match ts {
      Some(ts) => ts.serialize(),
      None => {
        let mut out = [0u8; 17];
        out[..16].fill(b'0');
        out
      }
    }
  }

  /// Sixteen ASCII zeros (or an all-zero field) deserialize as absent.
  pub fn deserialize(input: &[u8]) -> Option<Self> {
    if input.len() < Self::LEN {
      return None;
    }

    let digits = &input[..16];
    if digits.iter().all(|&b| b == b'0' || b == 0) && input[16] == 0 {
      return None;
    }

    let field = |range: std::ops::Range<usize>| -> Option<u16> {
      std::str::from_utf8(&digits[range]).ok()?.parse().ok()
    };

    Some(Self {
      year: field(0..4)?,
      month: field(4..6)? as u8,
      day: field(6..8)? as u8,
      hour: field(8..10)? as u8,
      minute: field(10..12)? as u8,
      second: field(12..14)? as u8,
      hundredths: field(14..16)? as u8,
      gmt_offset: input[16] as i8,
    })
  }

  pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
    Utc
      .with_ymd_and_hms(
        self.year as i32,
        self.month as u32,
        self.day as u32,
        self.hour as u32,
        self.minute as u32,
        self.second as u32,
      )
      .single()
      .map(|dt| dt - chrono::Duration::minutes(self.gmt_offset as i64 * 15))
  }
}

impl From<DateTime<Utc>> for VolumeTimestamp {
  fn from(dt: DateTime<Utc>) -> Self {
    Self {
      year: dt.year().clamp(0, 9999) as u16,
      month: dt.month() as u8,
      day: dt.day() as u8,
      hour: dt.hour() as u8,
      minute: dt.minute() as u8,
      second: dt.second() as u8,
      hundredths: (dt.timestamp_subsec_millis() / 10) as u8,
      gmt_offset: 0,
    }
  }
}

impl From<RecordTimestamp> for VolumeTimestamp {
  fn from(ts: RecordTimestamp) -> Self {
    Self {
      year: ts.year,
      month: ts.month,
      day: ts.day,
      hour: ts.hour,
      minute: ts.minute,
      second: ts.second,
      hundredths: 0,
      gmt_offset: ts.gmt_offset,
    }
  }
}

impl From<VolumeTimestamp> for RecordTimestamp {
  fn from(ts: VolumeTimestamp) -> Self {
    Self {
      year: ts.year,
      month: ts.month,
      day: ts.day,
      hour: ts.hour,
      minute: ts.minute,
      second: ts.second,
      gmt_offset: ts.gmt_offset,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn both_endian_layout() {
    let mut buf = [0u8; 8];
    encode_u32_both(0x12345678, &mut buf);
    assert_eq!(buf, [0x78, 0x56, 0x34, 0x12, 0x12, 0x34, 0x56, 0x78]);
    assert_eq!(decode_u32_both(&buf), 0x12345678);
    assert_eq!(decode_u32_both_strict(&buf).unwrap(), 0x12345678);
  }

  #[test]
  fn both_endian_strict_detects_corruption() {
    let mut buf = [0u8; 8];
    encode_u32_both(0xDEADBEEF, &mut buf);
    buf[5] ^= 0xFF;
    assert!(decode_u32_both_strict(&buf).is_err());
  }

  #[test]
  fn character_sets() {
    assert!(is_d_string("HELLO_123"));
    assert!(!is_d_string("hello"));
    assert!(is_d_string(""));
    assert!(is_a_string("A B?C/D:E"));
    assert!(!is_a_string("a"));
    assert!(is_d_or_separator_string("README.TXT;1"));
  }

  #[test]
  fn padded_iso_round_trip() {
    let mut buf = [0u8; 16];
    TextEncoding::Iso.encode_padded("VOLUME", &mut buf);
    assert_eq!(&buf[..7], b"VOLUME ");
    assert_eq!(TextEncoding::Iso.decode_padded(&buf), "VOLUME");
  }

  #[test]
  fn padded_ucs2_never_splits_a_unit() {
    let mut buf = [0u8; 7];
    TextEncoding::Ucs2Be.encode_padded("abcd", &mut buf);
    // Three whole units fit, the seventh byte cannot hold half a filler.
    assert_eq!(&buf[..6], &[0, b'a', 0, b'b', 0, b'c']);
    assert_eq!(buf[6], 0);
    assert_eq!(TextEncoding::Ucs2Be.decode_padded(&buf), "abc");
  }

  #[test]
  fn identifier_or_file_variants() {
    let mut buf = [0u8; 12];

    IdentifierOrFile::File("README".into()).serialize_padded(TextEncoding::Iso, &mut buf);
    assert_eq!(&buf[..7], b"_README");
    assert_eq!(
      IdentifierOrFile::deserialize(TextEncoding::Iso, &buf),
      IdentifierOrFile::File("README".into())
    );

    IdentifierOrFile::Empty.serialize_padded(TextEncoding::Iso, &mut buf);
    assert!(buf.iter().all(|&b| b == FILLER));
    assert_eq!(
      IdentifierOrFile::deserialize(TextEncoding::Iso, &buf),
      IdentifierOrFile::Empty
    );
  }

  #[test]
  fn record_timestamp_zero_is_absent() {
    assert_eq!(RecordTimestamp::deserialize(&[0; 7]), None);
    assert_eq!(RecordTimestamp::serialize_opt(None), [0; 7]);
  }

  #[test]
  fn record_timestamp_round_trip() {
    let ts = RecordTimestamp {
      year: 2024,
      month: 6,
      day: 30,
      hour: 23,
      minute: 59,
      second: 58,
      gmt_offset: -8,
    };
    assert_eq!(RecordTimestamp::deserialize(&ts.serialize()), Some(ts));
  }

  #[test]
  fn volume_timestamp_null_forms() {
    let mut zeros = [0u8; 17];
    zeros[..16].fill(b'0');
    assert_eq!(VolumeTimestamp::deserialize(&zeros), None);
    assert_eq!(VolumeTimestamp::serialize_opt(None), zeros);
    assert_eq!(VolumeTimestamp::deserialize(&[0u8; 17]), None);
  }

  #[test]
  fn volume_timestamp_round_trip() {
    let ts = VolumeTimestamp {
      year: 1999,
      month: 12,
      day: 31,
      hour: 23,
      minute: 59,
      second: 59,
      hundredths: 99,
      gmt_offset: 4,
    };
    assert_eq!(VolumeTimestamp::deserialize(&ts.serialize()), Some(ts));
  }

  proptest! {
    #[test]
    fn both_endian_u16_round_trips(v: u16) {
      let mut buf = [0u8; 4];
      encode_u16_both(v, &mut buf);
      prop_assert_eq!(decode_u16_both(&buf), v);
      prop_assert_eq!(decode_u16_both_strict(&buf).unwrap(), v);
    }

    #[test]
    fn both_endian_u32_round_trips(v: u32) {
      let mut buf = [0u8; 8];
      encode_u32_both(v, &mut buf);
      prop_assert_eq!(decode_u32_both(&buf), v);
    }

    #[test]
    fn truncated_utf8_is_valid(s in "\\PC{0,24}", max in 0usize..32) {
      let bytes = TextEncoding::Utf8.encode_truncated(&s, max);
      prop_assert!(bytes.len() <= max);
      prop_assert!(std::str::from_utf8(&bytes).is_ok());
    }
  }
}
