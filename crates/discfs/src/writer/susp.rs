//! Rock Ridge trailer synthesis for emitted directory records.

use crate::codec::RecordTimestamp;
use crate::susp::{ComponentFlags, NameFlags, SuspEntry, SymlinkComponent, TfTimestamp, TimestampsEntry};
use crate::writer::fs::{NodeKind, NodeMetadata};
use crate::writer::WriterOptions;
use crate::Result;

/// Break a symlink target into SL components: `//` names the volume root,
/// `/` the root, `.` and `..` the usual relative steps.
pub(crate) fn symlink_components(target: &str) -> Vec<SymlinkComponent> {
  let mut components = Vec::new();

  let rest = if let Some(rest) = target.strip_prefix("//") {
    components.push(SymlinkComponent::flagged(ComponentFlags::VOLUME_ROOT));
    rest
  } else if let Some(rest) = target.strip_prefix('/') {
    components.push(SymlinkComponent::flagged(ComponentFlags::ROOT));
    rest
  } else {
    target
  };

  for part in rest.split('/').filter(|part| !part.is_empty()) {
    components.push(match part {
      "." => SymlinkComponent::flagged(ComponentFlags::CURRENT),
      ".." => SymlinkComponent::flagged(ComponentFlags::PARENT),
      name => SymlinkComponent::named(name.as_bytes().to_vec()),
    });
  }

  components
}

fn posix_attributes(
  kind: &NodeKind,
  metadata: &NodeMetadata,
  options: &WriterOptions,
) -> SuspEntry {
  let default_mode = match kind {
    NodeKind::Directory => 0o755,
    _ => 0o644,
  };
  let default_links = match kind {
    NodeKind::Directory => 2,
    _ => 1,
  };

  SuspEntry::PosixAttributes {
    mode: metadata.mode.unwrap_or(default_mode),
    links: metadata.links.unwrap_or(default_links),
    uid: metadata.uid.unwrap_or(options.default_uid),
    gid: metadata.gid.unwrap_or(options.default_gid),
    serial: None,
  }
}

fn timestamps(metadata: &NodeMetadata, default: RecordTimestamp) -> SuspEntry {
  let created = metadata.created.map(RecordTimestamp::from).unwrap_or(default);
  let modified = metadata.modified.map(RecordTimestamp::from).unwrap_or(default);

  SuspEntry::Timestamps(TimestampsEntry {
    long_form: false,
    creation: Some(TfTimestamp::Short(created)),
    modification: Some(TfTimestamp::Short(modified)),
    ..Default::default()
  })
}

/// Build the system-use trailer of one named directory record: `PX`, `NM`
/// with the node's original name, `SL` for symlinks, and `TF`.
pub(crate) fn build_trailer(
  kind: &NodeKind,
  metadata: &NodeMetadata,
  alternate_name: &str,
  options: &WriterOptions,
  default_timestamp: RecordTimestamp,
) -> Result<Vec<u8>> {
  let mut entries = vec![posix_attributes(kind, metadata, options)];

  entries.push(SuspEntry::AlternateName {
    flags: NameFlags::empty(),
    name: alternate_name.as_bytes().to_vec(),
  });

  if let NodeKind::Symlink { target } = kind {
    entries.push(SuspEntry::Symlink {
      continues: false,
      components: symlink_components(target),
    });
  }

  entries.push(timestamps(metadata, default_timestamp));

  serialize_entries(&entries)
}

/// Build the trailer of a "." or ".." record: `PX` and `TF` only, preceded
/// by `SP` on the root's own "." record.
pub(crate) fn build_dot_trailer(
  metadata: &NodeMetadata,
  options: &WriterOptions,
  default_timestamp: RecordTimestamp,
  with_sharing_protocol: bool,
) -> Result<Vec<u8>> {
  let mut entries = Vec::new();

  if with_sharing_protocol {
    entries.push(SuspEntry::SharingProtocol { skip: 0 });
  }

  entries.push(posix_attributes(&NodeKind::Directory, metadata, options));
  entries.push(timestamps(metadata, default_timestamp));

  serialize_entries(&entries)
}

fn serialize_entries(entries: &[SuspEntry]) -> Result<Vec<u8>> {
  let mut bytes = Vec::new();
  for entry in entries {
    bytes.extend(entry.serialize()?);
  }
  Ok(bytes)
}
