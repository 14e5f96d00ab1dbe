//! The SUSP entry codec: tagged variants for the SUSP and RRIP signatures
//! plus opaque retention of anything unrecognized.

use crate::codec::{self, RecordTimestamp, VolumeTimestamp};
use crate::{Error, Result};

/// Header bytes common to every entry: signature, length, version.
pub const ENTRY_HEADER_LEN: usize = 4;

bitflags::bitflags! {
  /// Flag byte of an `NM` alternate-name entry (RRIP §4.1.4).
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct NameFlags: u8 {
    const CONTINUE = 0x01;
    const CURRENT = 0x02;
    const PARENT = 0x04;
    const HOST = 0x20;
  }

  /// Flag byte of one `SL` symlink component record (RRIP §4.1.3.1).
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct ComponentFlags: u8 {
    const CONTINUE = 0x01;
    const CURRENT = 0x02;
    const PARENT = 0x04;
    const ROOT = 0x08;
    const VOLUME_ROOT = 0x10;
    const HOST = 0x20;
  }
}

/// One symlink path component. Directory-relative components (`.`/`..`/root)
/// carry no bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkComponent {
  pub flags: ComponentFlags,
  pub bytes: Vec<u8>,
}

impl SymlinkComponent {
  pub fn named(bytes: Vec<u8>) -> Self {
    Self {
      flags: ComponentFlags::empty(),
      bytes,
    }
  }

  pub fn flagged(flags: ComponentFlags) -> Self {
    Self {
      flags,
      bytes: Vec::new(),
    }
  }

  /// Length of the component record including its 2-byte header.
  pub fn record_len(&self) -> usize {
    2 + self.bytes.len()
  }
}

/// A timestamp inside a `TF` entry; the entry's long-form bit selects which
/// of the two on-disc date formats every slot uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TfTimestamp {
  Short(RecordTimestamp),
  Long(VolumeTimestamp),
}

impl TfTimestamp {
  fn serialized(self, long_form: bool) -> Vec<u8> {
    if long_form {
      let ts = match self {
        TfTimestamp::Long(ts) => ts,
        TfTimestamp::Short(ts) => ts.into(),
      };
      ts.serialize().to_vec()
    } else {
      let ts = match self {
        TfTimestamp::Short(ts) => ts,
        TfTimestamp::Long(ts) => ts.into(),
      };
      ts.serialize().to_vec()
    }
  }
}

/// The `TF` timestamp entry (RRIP §4.1.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimestampsEntry {
  pub long_form: bool,
  pub creation: Option<TfTimestamp>,
  pub modification: Option<TfTimestamp>,
  pub access: Option<TfTimestamp>,
  pub attribute_change: Option<TfTimestamp>,
  pub backup: Option<TfTimestamp>,
  pub expiration: Option<TfTimestamp>,
  pub effective: Option<TfTimestamp>,
}

impl TimestampsEntry {
  fn slots(&self) -> [Option<TfTimestamp>; 7] {
    [
      self.creation,
      self.modification,
      self.access,
      self.attribute_change,
      self.backup,
      self.expiration,
      self.effective,
    ]
  }

  fn slots_mut(&mut self) -> [&mut Option<TfTimestamp>; 7] {
    [
      &mut self.creation,
      &mut self.modification,
      &mut self.access,
      &mut self.attribute_change,
      &mut self.backup,
      &mut self.expiration,
      &mut self.effective,
    ]
  }

  fn flags_byte(&self) -> u8 {
    let mut flags = if self.long_form { 0x80 } else { 0 };
    for (bit, slot) in self.slots().iter().enumerate() {
      if slot.is_some() {
        flags |= 1 << bit;
      }
    }
    flags
  }

  fn payload_len(&self) -> usize {
    let each = if self.long_form {
      VolumeTimestamp::LEN
    } else {
      RecordTimestamp::LEN
    };
    1 + self.slots().iter().flatten().count() * each
  }

  /// Fill every slot this entry leaves absent from `other`. The first
  /// entry's long-form choice stands.
  pub fn fill_absent_from(&mut self, other: &TimestampsEntry) {
    let theirs = other.slots();
    for (slot, value) in self.slots_mut().into_iter().zip(theirs) {
      if slot.is_none() {
        *slot = value;
      }
    }
  }
}

/// One SUSP entry: `{signature(2), length(1), version(1), payload}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspEntry {
  /// `CE`: the area continues at the given block, byte offset, and length.
  Continuation { block: u32, offset: u32, length: u32 },
  /// `PD`: padding.
  Padding(Vec<u8>),
  /// `SP`: SUSP is in use; records skip `skip` bytes of system use.
  SharingProtocol { skip: u8 },
  /// `ST`: hard end of the area.
  Terminator,
  /// `PX`: POSIX file attributes.
  PosixAttributes {
    mode: u32,
    links: u32,
    uid: u32,
    gid: u32,
    serial: Option<u32>,
  },
  /// `PN`: POSIX device numbers.
  PosixDevice { high: u32, low: u32 },
  /// `SL`: symlink target components; may continue in the next `SL`.
  Symlink {
    continues: bool,
    components: Vec<SymlinkComponent>,
  },
  /// `NM`: alternate name; fragments concatenate while the continue bit is
  /// set.
  AlternateName { flags: NameFlags, name: Vec<u8> },
  /// `TF`: file timestamps.
  Timestamps(TimestampsEntry),
  /// `SF`: sparse file virtual size. Recognized but not traversed.
  SparseFile { virtual_size: u64 },
  /// `RR`: legacy marker that Rock Ridge entries are present.
  RockRidge { extensions: u8 },
  /// Anything else, retained byte-for-byte.
  Unknown {
    signature: [u8; 2],
    version: u8,
    data: Vec<u8>,
  },
}

impl SuspEntry {
  pub fn signature(&self) -> [u8; 2] {
    match self {
      SuspEntry::Continuation { .. } => *b"CE",
      SuspEntry::Padding(_) => *b"PD",
      SuspEntry::SharingProtocol { .. } => *b"SP",
      SuspEntry::Terminator => *b"ST",
      SuspEntry::PosixAttributes { .. } => *b"PX",
      SuspEntry::PosixDevice { .. } => *b"PN",
      SuspEntry::Symlink { .. } => *b"SL",
      SuspEntry::AlternateName { .. } => *b"NM",
      SuspEntry::Timestamps(_) => *b"TF",
      SuspEntry::SparseFile { .. } => *b"SF",
      SuspEntry::RockRidge { .. } => *b"RR",
      SuspEntry::Unknown { signature, .. } => *signature,
    }
  }

  fn payload_len(&self) -> usize {
    match self {
      SuspEntry::Continuation { .. } => 24,
      SuspEntry::Padding(bytes) => bytes.len(),
      SuspEntry::SharingProtocol { .. } => 3,
      SuspEntry::Terminator => 0,
      SuspEntry::PosixAttributes { serial, .. } => {
        if serial.is_some() {
          40
        } else {
          32
        }
      }
      SuspEntry::PosixDevice { .. } => 16,
      SuspEntry::Symlink { components, .. } => {
        1 + components.iter().map(SymlinkComponent::record_len).sum::<usize>()
      }
      SuspEntry::AlternateName { name, .. } => 1 + name.len(),
      SuspEntry::Timestamps(tf) => tf.payload_len(),
      SuspEntry::SparseFile { .. } => 16,
      SuspEntry::RockRidge { .. } => 1,
      SuspEntry::Unknown { data, .. } => data.len(),
    }
  }

  /// Serialized length including the 4-byte header.
  pub fn len(&self) -> usize {
    ENTRY_HEADER_LEN + self.payload_len()
  }

  pub fn is_empty(&self) -> bool {
    false
  }

  pub fn serialize(&self) -> Result<Vec<u8>> {
    let total = self.len();
    if total > u8::MAX as usize {
      return Err(Error::PreconditionFailed(format!(
        "SUSP entry of {total} bytes exceeds the 255 byte length field"
      )));
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&self.signature());
    out.push(total as u8);
    out.push(match self {
      SuspEntry::Unknown { version, .. } => *version,
      _ => 1,
    });

    match self {
      SuspEntry::Continuation {
        block,
        offset,
        length,
      } => {
        let mut field = [0u8; 8];
        for value in [block, offset, length] {
          codec::encode_u32_both(*value, &mut field);
          out.extend_from_slice(&field);
        }
      }
      SuspEntry::Padding(bytes) => out.extend_from_slice(bytes),
      SuspEntry::SharingProtocol { skip } => {
        out.extend_from_slice(&[0xBE, 0xEF, *skip]);
      }
      SuspEntry::Terminator => {}
      SuspEntry::PosixAttributes {
        mode,
        links,
        uid,
        gid,
        serial,
      } => {
        let mut field = [0u8; 8];
        for value in [mode, links, uid, gid] {
          codec::encode_u32_both(*value, &mut field);
          out.extend_from_slice(&field);
        }
        if let Some(serial) = serial {
          codec::encode_u32_both(*serial, &mut field);
          out.extend_from_slice(&field);
        }
      }
      SuspEntry::PosixDevice { high, low } => {
        let mut field = [0u8; 8];
        codec::encode_u32_both(*high, &mut field);
        out.extend_from_slice(&field);
        codec::encode_u32_both(*low, &mut field);
        out.extend_from_slice(&field);
      }
      SuspEntry::Symlink {
        continues,
        components,
      } => {
        out.push(*continues as u8);
        for component in components {
          out.push(component.flags.bits());
          out.push(component.bytes.len() as u8);
          out.extend_from_slice(&component.bytes);
        }
      }
      SuspEntry::AlternateName { flags, name } => {
        out.push(flags.bits());
        out.extend_from_slice(name);
      }
      SuspEntry::Timestamps(tf) => {
        out.push(tf.flags_byte());
        for slot in tf.slots().into_iter().flatten() {
          out.extend_from_slice(&slot.serialized(tf.long_form));
        }
      }
      SuspEntry::SparseFile { virtual_size } => {
        let mut field = [0u8; 16];
        codec::encode_u64_both(*virtual_size, &mut field);
        out.extend_from_slice(&field);
      }
      SuspEntry::RockRidge { extensions } => out.push(*extensions),
      SuspEntry::Unknown { data, .. } => out.extend_from_slice(data),
    }

    debug_assert_eq!(out.len(), total);
    Ok(out)
  }

  fn decode(signature: [u8; 2], version: u8, payload: &[u8]) -> SuspEntry {
    let unknown = || SuspEntry::Unknown {
      signature,
      version,
      data: payload.to_vec(),
    };

    match &signature {
      b"CE" if payload.len() == 24 => SuspEntry::Continuation {
        block: codec::decode_u32_both(&payload[0..8]),
        offset: codec::decode_u32_both(&payload[8..16]),
        length: codec::decode_u32_both(&payload[16..24]),
      },
      b"PD" => SuspEntry::Padding(payload.to_vec()),
      b"SP" if payload.len() == 3 && payload[0] == 0xBE && payload[1] == 0xEF => {
        SuspEntry::SharingProtocol { skip: payload[2] }
      }
      b"ST" if payload.is_empty() => SuspEntry::Terminator,
      b"PX" if payload.len() == 32 || payload.len() == 40 => SuspEntry::PosixAttributes {
        mode: codec::decode_u32_both(&payload[0..8]),
        links: codec::decode_u32_both(&payload[8..16]),
        uid: codec::decode_u32_both(&payload[16..24]),
        gid: codec::decode_u32_both(&payload[24..32]),
        serial: (payload.len() == 40).then(|| codec::decode_u32_both(&payload[32..40])),
      },
      b"PN" if payload.len() == 16 => SuspEntry::PosixDevice {
        high: codec::decode_u32_both(&payload[0..8]),
        low: codec::decode_u32_both(&payload[8..16]),
      },
      b"SL" if !payload.is_empty() => {
        let continues = payload[0] & 0x01 != 0;
        let mut components = Vec::new();
        let mut at = 1;
        while at + 2 <= payload.len() {
          let flags = ComponentFlags::from_bits_truncate(payload[at]);
          let len = payload[at + 1] as usize;
          if at + 2 + len > payload.len() {
            return unknown();
          }
          components.push(SymlinkComponent {
            flags,
            bytes: payload[at + 2..at + 2 + len].to_vec(),
          });
          at += 2 + len;
        }
        if at != payload.len() {
          return unknown();
        }
        SuspEntry::Symlink {
          continues,
          components,
        }
      }
      b"NM" if !payload.is_empty() => SuspEntry::AlternateName {
        flags: NameFlags::from_bits_truncate(payload[0]),
        name: payload[1..].to_vec(),
      },
      b"TF" if !payload.is_empty() => {
        let flags = payload[0];
        let long_form = flags & 0x80 != 0;
        let each = if long_form {
          VolumeTimestamp::LEN
        } else {
          RecordTimestamp::LEN
        };

        let mut tf = TimestampsEntry {
          long_form,
          ..Default::default()
        };
        let mut at = 1;
        for (bit, slot) in tf.slots_mut().into_iter().enumerate() {
          if flags & (1 << bit) == 0 {
            continue;
          }
          if at + each > payload.len() {
            return unknown();
          }
          let field = &payload[at..at + each];
          *slot = Some(if long_form {
            TfTimestamp::Long(VolumeTimestamp::deserialize(field).unwrap_or(VolumeTimestamp {
              year: 0,
              month: 0,
              day: 0,
              hour: 0,
              minute: 0,
              second: 0,
              hundredths: 0,
              gmt_offset: 0,
            }))
          } else {
            TfTimestamp::Short(RecordTimestamp::deserialize(field).unwrap_or(RecordTimestamp {
              year: 1900,
              month: 0,
              day: 0,
              hour: 0,
              minute: 0,
              second: 0,
              gmt_offset: 0,
            }))
          });
          at += each;
        }
        SuspEntry::Timestamps(tf)
      }
      b"SF" if payload.len() == 16 => SuspEntry::SparseFile {
        virtual_size: codec::decode_u64_both(payload),
      },
      b"RR" if payload.len() == 1 => SuspEntry::RockRidge {
        extensions: payload[0],
      },
      _ => unknown(),
    }
  }

  /// Split this entry so the first half serializes into at most `budget`
  /// bytes. Defined for `NM` and `SL` only; everything else returns `None`.
  ///
  /// For `SL`, a component that straddles the boundary is itself split with
  /// the component-continue bit set on its head.
  pub fn split_at(&self, budget: usize) -> Option<(SuspEntry, SuspEntry)> {
    // Entry header plus the flags byte both halves need.
    let payload_budget = budget.checked_sub(ENTRY_HEADER_LEN + 1)?;

    match self {
      SuspEntry::AlternateName { flags, name } => {
        if name.len() <= payload_budget {
          let first = SuspEntry::AlternateName {
            flags: *flags - NameFlags::CONTINUE,
            name: name.clone(),
          };
          let second = SuspEntry::AlternateName {
            flags: *flags,
            name: Vec::new(),
          };
          return Some((first, second));
        }

        if payload_budget == 0 {
          return None;
        }

        let first = SuspEntry::AlternateName {
          flags: *flags | NameFlags::CONTINUE,
          name: name[..payload_budget].to_vec(),
        };
        let second = SuspEntry::AlternateName {
          flags: *flags,
          name: name[payload_budget..].to_vec(),
        };
        Some((first, second))
      }
      SuspEntry::Symlink {
        continues,
        components,
      } => {
        let whole: usize = components.iter().map(SymlinkComponent::record_len).sum();
        if whole <= payload_budget {
          // Unlike NM, a split SL always marks its first half as continued.
          let first = SuspEntry::Symlink {
            continues: true,
            components: components.clone(),
          };
          let second = SuspEntry::Symlink {
            continues: *continues,
            components: Vec::new(),
          };
          return Some((first, second));
        }

        let mut head = Vec::new();
        let mut used = 0;

        for (index, component) in components.iter().enumerate() {
          let record_len = component.record_len();
          if used + record_len <= payload_budget {
            used += record_len;
            head.push(component.clone());
            continue;
          }

          let room = payload_budget - used;
          if room >= 3 && !component.bytes.is_empty() {
            // Split mid-component; the head keeps the continue bit.
            let take = room - 2;
            head.push(SymlinkComponent {
              flags: component.flags | ComponentFlags::CONTINUE,
              bytes: component.bytes[..take].to_vec(),
            });

            let mut tail = vec![SymlinkComponent {
              flags: component.flags,
              bytes: component.bytes[take..].to_vec(),
            }];
            tail.extend(components[index + 1..].iter().cloned());

            return Some((
              SuspEntry::Symlink {
                continues: true,
                components: head,
              },
              SuspEntry::Symlink {
                continues: *continues,
                components: tail,
              },
            ));
          }

          // Cut before this component.
          if head.is_empty() {
            return None;
          }

          return Some((
            SuspEntry::Symlink {
              continues: true,
              components: head,
            },
            SuspEntry::Symlink {
              continues: *continues,
              components: components[index..].to_vec(),
            },
          ));
        }

        unreachable!("whole > payload_budget, so some component fails to fit");
      }
      _ => None,
    }
  }
}

/// Walk a byte region into entries. Parsing stops on a malformed length and
/// after an `ST` terminator; whatever parsed so far is returned.
pub fn parse_entries(region: &[u8]) -> Vec<SuspEntry> {
  let mut out = Vec::new();
  let mut at = 0;

  while at + ENTRY_HEADER_LEN <= region.len() {
    let signature = [region[at], region[at + 1]];
    let length = region[at + 2] as usize;
    let version = region[at + 3];

    if length < ENTRY_HEADER_LEN || at + length > region.len() {
      if region[at..].iter().any(|&b| b != 0) {
        log::debug!(
          "stopping SUSP walk at offset {at}: malformed entry {signature:?} length {length}"
        );
      }
      break;
    }

    let entry = SuspEntry::decode(signature, version, &region[at + ENTRY_HEADER_LEN..at + length]);
    let done = matches!(entry, SuspEntry::Terminator);
    out.push(entry);
    at += length;

    if done {
      break;
    }
  }

  out
}
