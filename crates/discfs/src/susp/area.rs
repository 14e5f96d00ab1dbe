//! Assembly, compaction, and emission of whole SUSP areas.

use super::entry::{self, ComponentFlags, NameFlags, SuspEntry, SymlinkComponent};
use crate::{Error, Result};

/// Serialized length of one `CE` entry.
pub const CE_LEN: usize = 28;

/// A logical SUSP area: the system-use trailer of one directory record plus
/// any continuations reached through `CE` entries.
#[derive(Debug, Clone)]
pub struct SuspArea {
  raw: Vec<SuspEntry>,
  next: Option<(u32, u32, u32)>,
  visited: Vec<(u32, u32)>,
  complete: bool,
}

impl SuspArea {
  /// Begin an area from the in-record system-use bytes.
  pub fn from_system_use(bytes: &[u8]) -> Self {
    let mut area = Self {
      raw: Vec::new(),
      next: None,
      visited: Vec::new(),
      complete: false,
    };
    area.absorb(entry::parse_entries(bytes));
    area
  }

  fn absorb(&mut self, entries: Vec<SuspEntry>) {
    let mut next = None;
    let mut terminated = false;

    for entry in &entries {
      match entry {
        SuspEntry::Terminator => {
          terminated = true;
          break;
        }
        SuspEntry::Continuation {
          block,
          offset,
          length,
        } => next = Some((*block, *offset, *length)),
        _ => {}
      }
    }

    self.raw.extend(entries);

    if terminated {
      self.complete = true;
      self.next = None;
      return;
    }

    match next {
      Some((block, offset, length)) => {
        if self.visited.contains(&(block, offset)) {
          log::debug!("refusing SUSP continuation loop back to block {block} offset {offset}");
          self.complete = true;
          self.next = None;
        } else {
          self.visited.push((block, offset));
          self.next = Some((block, offset, length));
        }
      }
      None => self.complete = true,
    }
  }

  /// The `(block, offset, length)` of the continuation to fetch next, if the
  /// area is not yet complete.
  pub fn next_continuation(&self) -> Option<(u32, u32, u32)> {
    if self.complete {
      None
    } else {
      self.next
    }
  }

  pub fn is_complete(&self) -> bool {
    self.complete
  }

  /// Append the bytes fetched for the pending continuation. Returns false if
  /// the area was already complete or the chunk parses to no entries.
  pub fn add_continuation(&mut self, bytes: &[u8]) -> bool {
    if self.complete {
      return false;
    }

    let entries = entry::parse_entries(bytes);
    if entries.is_empty() {
      self.complete = true;
      self.next = None;
      return false;
    }

    self.next = None;
    self.absorb(entries);
    true
  }

  /// Every entry in arrival order, continuation plumbing included.
  pub fn raw_entries(&self) -> &[SuspEntry] {
    &self.raw
  }

  /// The canonical entry list: plumbing dropped, `NM`/`SL` chains merged,
  /// at most one `TF`.
  pub fn entries(&self) -> Vec<SuspEntry> {
    compact(&self.raw)
  }

  pub fn is_rock_ridge(&self) -> bool {
    self.raw.iter().any(|entry| {
      matches!(
        entry,
        SuspEntry::RockRidge { .. }
          | SuspEntry::PosixAttributes { .. }
          | SuspEntry::AlternateName { .. }
          | SuspEntry::Symlink { .. }
          | SuspEntry::Timestamps(_)
      )
    })
  }
}

/// Append `fresh` components to `acc`, healing a component split across two
/// `SL` fragments.
fn append_components(acc: &mut Vec<SymlinkComponent>, fresh: Vec<SymlinkComponent>) {
  for component in fresh {
    match acc.last_mut() {
      Some(last) if last.flags.contains(ComponentFlags::CONTINUE) => {
        last.bytes.extend(component.bytes);
        last.flags = (last.flags - ComponentFlags::CONTINUE) | component.flags;
      }
      _ => acc.push(component),
    }
  }
}

/// Produce the canonical entry list of a complete area.
pub fn compact(entries: &[SuspEntry]) -> Vec<SuspEntry> {
  let mut out: Vec<SuspEntry> = Vec::new();

  let mut name_acc: Option<(NameFlags, Vec<u8>)> = None;
  let mut name_done = false;
  let mut link_acc: Option<Vec<SymlinkComponent>> = None;
  let mut link_done = false;
  let mut timestamps_at: Option<usize> = None;

  for entry in entries {
    match entry {
      SuspEntry::Continuation { .. } | SuspEntry::Terminator | SuspEntry::Padding(_) => {}
      SuspEntry::AlternateName { flags, name } => {
        if name_done {
          continue;
        }

        let (acc_flags, acc_name) = name_acc.get_or_insert((NameFlags::empty(), Vec::new()));
        *acc_flags |= *flags - NameFlags::CONTINUE;
        acc_name.extend_from_slice(name);

        if !flags.contains(NameFlags::CONTINUE) {
          let (flags, name) = name_acc.take().unwrap();
          out.push(SuspEntry::AlternateName { flags, name });
          name_done = true;
        }
      }
      SuspEntry::Symlink {
        continues,
        components,
      } => {
        if link_done {
          continue;
        }

        let acc = link_acc.get_or_insert_with(Vec::new);
        append_components(acc, components.clone());

        if !continues {
          out.push(SuspEntry::Symlink {
            continues: false,
            components: link_acc.take().unwrap(),
          });
          link_done = true;
        }
      }
      SuspEntry::Timestamps(tf) => match timestamps_at {
        None => {
          timestamps_at = Some(out.len());
          out.push(SuspEntry::Timestamps(*tf));
        }
        Some(at) => {
          if let SuspEntry::Timestamps(first) = &mut out[at] {
            first.fill_absent_from(tf);
          }
        }
      },
      other => out.push(other.clone()),
    }
  }

  // Chains the area ended without terminating keep their continue state.
  if let Some((flags, name)) = name_acc {
    out.push(SuspEntry::AlternateName {
      flags: flags | NameFlags::CONTINUE,
      name,
    });
  }
  if let Some(components) = link_acc {
    out.push(SuspEntry::Symlink {
      continues: true,
      components,
    });
  }

  out
}

/// A continuation destination handed out by the caller's allocator. The
/// granted size may exceed the request and caps the next region.
#[derive(Debug, Clone, Copy)]
pub struct AllocatedRegion {
  pub block: u32,
  pub offset: u32,
  pub granted: usize,
}

/// One emitted region of a SUSP area. The first region has no location; it
/// lives inside the directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspRegion {
  pub location: Option<(u32, u32)>,
  pub bytes: Vec<u8>,
}

fn entries_len(entries: &[SuspEntry]) -> usize {
  entries.iter().map(SuspEntry::len).sum()
}

/// Emit `content` into one in-record region of at most `first_budget` bytes,
/// spilling to allocator-provided continuations linked by `CE` entries when
/// it does not fit.
pub fn emit_area<A>(
  content: &[SuspEntry],
  first_budget: usize,
  mut alloc: A,
) -> Result<Vec<SuspRegion>>
where
  A: FnMut(usize) -> Result<AllocatedRegion>,
{
  let mut queue: std::collections::VecDeque<SuspEntry> = content.iter().cloned().collect();
  let mut filled: Vec<(Vec<SuspEntry>, Option<(u32, u32)>)> = Vec::new();
  let mut location: Option<(u32, u32)> = None;
  let mut budget = first_budget;

  loop {
    let remaining: usize = queue.iter().map(SuspEntry::len).sum();
    if remaining <= budget {
      filled.push((queue.drain(..).collect(), location));
      break;
    }

    let mut region: Vec<SuspEntry> = Vec::new();
    let mut used = 0;

    while let Some(next) = queue.front() {
      let next_len = next.len();
      if used + next_len + CE_LEN <= budget {
        used += next_len;
        region.push(queue.pop_front().unwrap());
        continue;
      }

      if let Some(room) = budget.checked_sub(used + CE_LEN) {
        if let Some((head, tail)) = next.split_at(room) {
          used += head.len();
          region.push(head);
          queue[0] = tail;
        }
      }
      break;
    }

    if region.is_empty() {
      return Err(Error::PreconditionFailed(format!(
        "SUSP region budget of {budget} bytes holds no entry"
      )));
    }

    let remaining: usize = queue.iter().map(SuspEntry::len).sum();
    let slot = alloc(remaining)?;
    filled.push((region, location));
    location = Some((slot.block, slot.offset));
    budget = slot.granted;
  }

  // Lengths first, then the CE links can be written in one pass.
  let mut lengths: Vec<usize> = filled
    .iter()
    .map(|(entries, _)| entries_len(entries))
    .collect();
  for index in 0..filled.len() {
    if index + 1 < filled.len() {
      lengths[index] += CE_LEN;
    }
  }

  let mut regions = Vec::with_capacity(filled.len());
  for (index, (entries, at)) in filled.iter().enumerate() {
    let mut bytes = Vec::with_capacity(lengths[index]);
    for entry in entries {
      bytes.extend(entry.serialize()?);
    }

    if index + 1 < filled.len() {
      let (block, offset) = filled[index + 1].1.expect("continuation has a location");
      bytes.extend(
        SuspEntry::Continuation {
          block,
          offset,
          length: lengths[index + 1] as u32,
        }
        .serialize()?,
      );
    }

    regions.push(SuspRegion {
      location: *at,
      bytes,
    });
  }

  Ok(regions)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::RecordTimestamp;
  use crate::susp::entry::{TfTimestamp, TimestampsEntry};

  fn px() -> SuspEntry {
    SuspEntry::PosixAttributes {
      mode: 0o644,
      links: 1,
      uid: 1000,
      gid: 100,
      serial: None,
    }
  }

  fn short_ts(second: u8) -> TfTimestamp {
    TfTimestamp::Short(RecordTimestamp {
      year: 2022,
      month: 1,
      day: 1,
      hour: 0,
      minute: 0,
      second,
      gmt_offset: 0,
    })
  }

  #[test]
  fn single_region_area_completes_immediately() {
    let mut bytes = px().serialize().unwrap();
    bytes.extend(
      SuspEntry::AlternateName {
        flags: NameFlags::empty(),
        name: b"notes.txt".to_vec(),
      }
      .serialize()
      .unwrap(),
    );

    let area = SuspArea::from_system_use(&bytes);
    assert!(area.is_complete());
    assert_eq!(area.next_continuation(), None);
    assert_eq!(area.entries().len(), 2);
    assert!(area.is_rock_ridge());
  }

  #[test]
  fn continuation_chain_is_followed_and_merged() {
    let mut first = px().serialize().unwrap();
    first.extend(
      SuspEntry::AlternateName {
        flags: NameFlags::CONTINUE,
        name: b"long-".to_vec(),
      }
      .serialize()
      .unwrap(),
    );
    first.extend(
      SuspEntry::Continuation {
        block: 40,
        offset: 0,
        length: 64,
      }
      .serialize()
      .unwrap(),
    );

    let mut area = SuspArea::from_system_use(&first);
    assert!(!area.is_complete());
    assert_eq!(area.next_continuation(), Some((40, 0, 64)));

    let second = SuspEntry::AlternateName {
      flags: NameFlags::empty(),
      name: b"name.txt".to_vec(),
    }
    .serialize()
    .unwrap();
    assert!(area.add_continuation(&second));
    assert!(area.is_complete());

    let entries = area.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(
      entries[1],
      SuspEntry::AlternateName {
        flags: NameFlags::empty(),
        name: b"long-name.txt".to_vec(),
      }
    );
  }

  #[test]
  fn add_continuation_refused_when_complete() {
    let mut area = SuspArea::from_system_use(&px().serialize().unwrap());
    assert!(area.is_complete());
    assert!(!area.add_continuation(&px().serialize().unwrap()));
  }

  #[test]
  fn empty_continuation_closes_the_area() {
    let first = SuspEntry::Continuation {
      block: 9,
      offset: 0,
      length: 16,
    }
    .serialize()
    .unwrap();

    let mut area = SuspArea::from_system_use(&first);
    assert!(!area.add_continuation(&[0u8; 16]));
    assert!(area.is_complete());
  }

  #[test]
  fn self_loop_terminates_scanning() {
    let ce = SuspEntry::Continuation {
      block: 7,
      offset: 0,
      length: 28,
    }
    .serialize()
    .unwrap();

    let mut area = SuspArea::from_system_use(&ce);
    assert_eq!(area.next_continuation(), Some((7, 0, 28)));

    // The continuation at (7, 0) points straight back at itself.
    assert!(area.add_continuation(&ce));
    assert!(area.is_complete());
    assert_eq!(area.next_continuation(), None);
  }

  #[test]
  fn terminator_is_a_hard_end() {
    let mut bytes = px().serialize().unwrap();
    bytes.extend(SuspEntry::Terminator.serialize().unwrap());
    bytes.extend(
      SuspEntry::Continuation {
        block: 1,
        offset: 2,
        length: 3,
      }
      .serialize()
      .unwrap(),
    );

    let area = SuspArea::from_system_use(&bytes);
    assert!(area.is_complete());
    assert_eq!(area.entries(), vec![px()]);
  }

  #[test]
  fn compaction_merges_split_symlinks() {
    let entries = vec![
      SuspEntry::Symlink {
        continues: true,
        components: vec![
          SymlinkComponent::flagged(ComponentFlags::ROOT),
          SymlinkComponent {
            flags: ComponentFlags::CONTINUE,
            bytes: b"tar".to_vec(),
          },
        ],
      },
      SuspEntry::Symlink {
        continues: false,
        components: vec![SymlinkComponent::named(b"get".to_vec())],
      },
    ];

    let compacted = compact(&entries);
    assert_eq!(
      compacted,
      vec![SuspEntry::Symlink {
        continues: false,
        components: vec![
          SymlinkComponent::flagged(ComponentFlags::ROOT),
          SymlinkComponent::named(b"target".to_vec()),
        ],
      }]
    );
  }

  #[test]
  fn compaction_keeps_first_timestamps() {
    let entries = vec![
      SuspEntry::Timestamps(TimestampsEntry {
        long_form: false,
        creation: Some(short_ts(1)),
        ..Default::default()
      }),
      SuspEntry::Timestamps(TimestampsEntry {
        long_form: false,
        creation: Some(short_ts(2)),
        modification: Some(short_ts(3)),
        ..Default::default()
      }),
    ];

    let compacted = compact(&entries);
    assert_eq!(compacted.len(), 1);
    match &compacted[0] {
      SuspEntry::Timestamps(tf) => {
        assert_eq!(tf.creation, Some(short_ts(1)));
        assert_eq!(tf.modification, Some(short_ts(3)));
      }
      other => panic!("unexpected entry {other:?}"),
    }
  }

  #[test]
  fn compaction_is_idempotent() {
    let entries = vec![
      px(),
      SuspEntry::AlternateName {
        flags: NameFlags::CONTINUE,
        name: b"ab".to_vec(),
      },
      SuspEntry::AlternateName {
        flags: NameFlags::empty(),
        name: b"cd".to_vec(),
      },
      SuspEntry::Padding(vec![0, 0]),
    ];

    let once = compact(&entries);
    let twice = compact(&once);
    assert_eq!(once, twice);
  }

  #[test]
  fn emit_fits_in_record_without_allocating() {
    let content = vec![px()];
    let regions = emit_area(&content, 200, |_| {
      panic!("no continuation should be requested")
    })
    .unwrap();

    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].location, None);
    assert_eq!(regions[0].bytes.len(), 36);
  }

  #[test]
  fn emit_spills_to_continuation_and_links_back() {
    let name = SuspEntry::AlternateName {
      flags: NameFlags::empty(),
      name: vec![b'x'; 120],
    };
    let content = vec![px(), name];

    let regions = emit_area(&content, 80, |requested| {
      assert!(requested > 0);
      Ok(AllocatedRegion {
        block: 99,
        offset: 0,
        granted: 2048,
      })
    })
    .unwrap();

    assert_eq!(regions.len(), 2);
    assert!(regions[0].bytes.len() <= 80);
    assert_eq!(regions[1].location, Some((99, 0)));

    // The in-record region must end with a CE naming the continuation.
    let parsed = entry::parse_entries(&regions[0].bytes);
    match parsed.last() {
      Some(SuspEntry::Continuation {
        block,
        offset,
        length,
      }) => {
        assert_eq!((*block, *offset), (99, 0));
        assert_eq!(*length as usize, regions[1].bytes.len());
      }
      other => panic!("expected trailing CE, found {other:?}"),
    }

    // Reassembling the regions yields the original content.
    let mut area = SuspArea::from_system_use(&regions[0].bytes);
    assert!(area.add_continuation(&regions[1].bytes));
    assert_eq!(area.entries(), content);
  }

  #[test]
  fn emit_splits_entries_across_regions() {
    let name = SuspEntry::AlternateName {
      flags: NameFlags::empty(),
      name: vec![b'n'; 300],
    };

    let regions = emit_area(&[name.clone()], 100, |_| {
      Ok(AllocatedRegion {
        block: 50,
        offset: 0,
        granted: 120,
      })
    })
    .unwrap();

    assert!(regions.len() >= 3);
    for (index, region) in regions.iter().enumerate() {
      let budget = if index == 0 { 100 } else { 120 };
      assert!(region.bytes.len() <= budget);
    }

    let mut area = SuspArea::from_system_use(&regions[0].bytes);
    for region in &regions[1..] {
      assert!(area.add_continuation(&region.bytes));
    }
    assert_eq!(area.entries(), vec![name]);
  }

  #[test]
  fn emit_rejects_an_impossible_budget() {
    assert!(emit_area(&[px()], 10, |_| {
      Ok(AllocatedRegion {
        block: 0,
        offset: 0,
        granted: 10,
      })
    })
    .is_err());
  }
}
