//! End-to-end scenarios: images produced by the writer read back through the
//! reader with the expected structure, names, and metadata.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use discfs::{
  DescriptorPolicy, FsEntry, IsoFilesystem, IsoWriter, MemoryMedium, NodeMetadata, PathLookup,
  VolumeDescriptor, WriterOptions,
};

/// A file-source callback over fixed contents that insists on being called
/// exactly once per path.
struct Contents {
  map: HashMap<String, Vec<u8>>,
  served: Vec<String>,
}

impl Contents {
  fn new(entries: &[(&str, &[u8])]) -> Self {
    Self {
      map: entries
        .iter()
        .map(|(path, bytes)| (path.to_string(), bytes.to_vec()))
        .collect(),
      served: Vec::new(),
    }
  }

  fn source(&mut self) -> impl FnMut(&str) -> std::io::Result<Box<dyn Read>> + '_ {
    |path| {
      assert!(
        !self.served.contains(&path.to_string()),
        "{path} requested twice"
      );
      self.served.push(path.to_string());

      let bytes = self.map.get(path).unwrap_or_else(|| panic!("unexpected path {path}"));
      Ok(Box::new(Cursor::new(bytes.clone())))
    }
  }
}

fn read_all(stream: &mut impl Read) -> Vec<u8> {
  let mut bytes = Vec::new();
  stream.read_to_end(&mut bytes).unwrap();
  bytes
}

#[test]
fn minimal_primary_image() {
  let mut options = WriterOptions::new("MINIMAL");
  options.include_supplementary = false;
  options.enable_susp = false;

  let mut writer = IsoWriter::new(MemoryMedium::new(2048).unwrap(), options).unwrap();
  writer.add_directory("/A", None).unwrap();
  writer.add_file("/A/HELLO.TXT", 5, None).unwrap();

  let mut contents = Contents::new(&[("/A/HELLO.TXT", b"hello")]);
  writer.write_and_close(contents.source()).unwrap();
  assert_eq!(contents.served, vec!["/A/HELLO.TXT"]);

  let mut fs = IsoFilesystem::open(
    writer.into_medium(),
    DescriptorPolicy::Primary(PathLookup::DirectoryRecords),
  )
  .unwrap();

  assert!(matches!(fs.entry("/A").unwrap(), FsEntry::Directory { .. }));
  assert_eq!(fs.list("/A").unwrap(), vec!["HELLO.TXT;1"]);

  let mut stream = fs.read_file("/A/HELLO.TXT").unwrap();
  assert_eq!(stream.len(), 5);
  assert_eq!(read_all(&mut stream), b"hello");

  // The stream restarts from the top.
  stream.restart();
  assert_eq!(read_all(&mut stream), b"hello");
}

#[test]
fn joliet_and_rock_ridge_metadata() {
  let metadata = NodeMetadata {
    mode: Some(0o644),
    uid: Some(1000),
    gid: Some(1000),
    ..Default::default()
  };

  let mut writer =
    IsoWriter::new(MemoryMedium::new(2048).unwrap(), WriterOptions::new("BOOTDISK")).unwrap();
  writer
    .add_file("/boot/grub.cfg", 18, Some(metadata))
    .unwrap();

  let mut contents = Contents::new(&[("/boot/grub.cfg", b"set timeout=5\nboot")]);
  writer.write_and_close(contents.source()).unwrap();
  let medium = writer.into_medium();

  // Policy Any prefers the primary hierarchy because it carries SUSP.
  let mut fs = IsoFilesystem::open(
    medium.clone(),
    DescriptorPolicy::Any(PathLookup::DirectoryRecords),
  )
  .unwrap();
  assert!(fs.is_rock_ridge().unwrap());
  assert!(matches!(
    fs.active_descriptor(),
    VolumeDescriptor::Primary(_)
  ));

  let entry = fs.entry("/boot/grub.cfg").unwrap();
  match &entry {
    FsEntry::File { name, size, metadata } => {
      assert_eq!(name, "grub.cfg");
      assert_eq!(*size, 18);
      assert_eq!(metadata.mode, Some(0o644));
      assert_eq!(metadata.uid, Some(1000));
      assert_eq!(metadata.gid, Some(1000));
    }
    other => panic!("unexpected entry {other:?}"),
  }
  assert_eq!(read_all(&mut fs.read_file("/boot/grub.cfg").unwrap()), b"set timeout=5\nboot");

  // The supplementary hierarchy carries the name directly.
  let mut fs = IsoFilesystem::open(
    medium,
    DescriptorPolicy::Supplementary(PathLookup::DirectoryRecords),
  )
  .unwrap();
  assert_eq!(fs.list("/boot").unwrap(), vec!["grub.cfg"]);
  assert_eq!(read_all(&mut fs.read_file("/boot/grub.cfg").unwrap()), b"set timeout=5\nboot");
}

#[test]
fn legacy_names_uniquify_on_collision() {
  let mut options = WriterOptions::new("NAMES");
  options.include_supplementary = false;
  options.enable_susp = false;

  let mut writer = IsoWriter::new(MemoryMedium::new(2048).unwrap(), options).unwrap();
  writer.add_file("/ABCDEFGH.TXT", 1, None).unwrap();
  writer.add_file("/Abcdefgh.txt", 1, None).unwrap();
  writer.add_file("/abcdefgh.txt", 1, None).unwrap();

  let mut contents = Contents::new(&[
    ("/ABCDEFGH.TXT", b"1"),
    ("/Abcdefgh.txt", b"2"),
    ("/abcdefgh.txt", b"3"),
  ]);
  writer.write_and_close(contents.source()).unwrap();

  let mut fs = IsoFilesystem::open(
    writer.into_medium(),
    DescriptorPolicy::Primary(PathLookup::DirectoryRecords),
  )
  .unwrap();

  // Children come in raw-name order; collisions perturb trailing characters.
  assert_eq!(
    fs.list("/").unwrap(),
    vec!["ABCDEFGH.TXT;1", "ABCDEFG0.TXT;1", "ABCDEFG1.TXT;1"]
  );
  assert_eq!(read_all(&mut fs.read_file("/ABCDEFG1.TXT").unwrap()), b"3");
}

#[test]
fn duplicate_paths_update_in_place() {
  let mut writer =
    IsoWriter::new(MemoryMedium::new(2048).unwrap(), WriterOptions::new("DUP")).unwrap();
  writer.add_file("/abc.txt", 3, None).unwrap();

  // Same path again: not a new sibling, and the type cannot change.
  let metadata = NodeMetadata {
    uid: Some(7),
    ..Default::default()
  };
  writer.add_file("/abc.txt", 3, Some(metadata)).unwrap();
  assert!(writer.add_directory("/abc.txt", None).is_err());

  let mut contents = Contents::new(&[("/abc.txt", b"abc")]);
  writer.write_and_close(contents.source()).unwrap();
  assert_eq!(contents.served.len(), 1);

  let mut fs = IsoFilesystem::open(
    writer.into_medium(),
    DescriptorPolicy::Primary(PathLookup::DirectoryRecords),
  )
  .unwrap();
  let entry = fs.entry("/abc.txt").unwrap();
  assert_eq!(entry.metadata().uid, Some(7));
}

#[test]
fn symlink_round_trip() {
  let mut writer =
    IsoWriter::new(MemoryMedium::new(2048).unwrap(), WriterOptions::new("LINKS")).unwrap();
  writer.add_symlink("/link", "/a/../b", None).unwrap();
  writer.add_symlink("/rel", "./sibling", None).unwrap();
  writer.write_and_close(|_| unreachable!("symlinks carry no data")).unwrap();

  let mut fs = IsoFilesystem::open(
    writer.into_medium(),
    DescriptorPolicy::Primary(PathLookup::DirectoryRecords),
  )
  .unwrap();

  match fs.entry("/link").unwrap() {
    FsEntry::Symlink { name, target, .. } => {
      assert_eq!(name, "link");
      assert_eq!(target, "/a/../b");
    }
    other => panic!("unexpected entry {other:?}"),
  }
  match fs.entry("/rel").unwrap() {
    FsEntry::Symlink { target, .. } => assert_eq!(target, "./sibling"),
    other => panic!("unexpected entry {other:?}"),
  }

  // Without SUSP the supplementary hierarchy drops symlinks entirely.
  let mut fs = IsoFilesystem::open(
    fs.into_medium(),
    DescriptorPolicy::Supplementary(PathLookup::DirectoryRecords),
  )
  .unwrap();
  assert!(fs.list("/").unwrap().is_empty());
}

#[test]
fn dual_endian_fields_agree() {
  let mut writer =
    IsoWriter::new(MemoryMedium::new(2048).unwrap(), WriterOptions::new("ENDIAN")).unwrap();
  writer.add_file("/pad.bin", 40000, None).unwrap();

  let mut contents = Contents::new(&[("/pad.bin", &vec![0xA5u8; 40000][..])]);
  writer.write_and_close(contents.source()).unwrap();
  let medium = writer.into_medium();

  // The primary descriptor's volume space size reads identically from the
  // little-endian and big-endian halves of the raw sector.
  let bytes = medium.as_bytes();
  let sector = &bytes[16 * 2048..17 * 2048];
  let le = u32::from_le_bytes(sector[80..84].try_into().unwrap());
  let be = u32::from_be_bytes(sector[84..88].try_into().unwrap());
  assert_eq!(le, be);
  assert!(le > 0);

  let mut fs = IsoFilesystem::open(
    medium,
    DescriptorPolicy::Primary(PathLookup::DirectoryRecords),
  )
  .unwrap();
  match fs.descriptors().first().unwrap() {
    VolumeDescriptor::Primary(primary) => assert_eq!(primary.volume_space_size, le),
    other => panic!("unexpected descriptor {other:?}"),
  }
  assert_eq!(read_all(&mut fs.read_file("/pad.bin").unwrap()).len(), 40000);
}

#[test]
fn path_table_resolution() {
  let mut writer =
    IsoWriter::new(MemoryMedium::new(2048).unwrap(), WriterOptions::new("TABLES")).unwrap();
  writer.add_directory("/USR", None).unwrap();
  writer.add_directory("/USR/SHARE", None).unwrap();
  writer.add_directory("/USR/SHARE/DOC", None).unwrap();
  writer.add_file("/USR/SHARE/DOC/README.md", 6, None).unwrap();
  writer.add_directory("/VAR", None).unwrap();

  let mut contents = Contents::new(&[("/USR/SHARE/DOC/README.md", b"notes\n")]);
  writer.write_and_close(contents.source()).unwrap();

  let mut fs = IsoFilesystem::open(
    writer.into_medium(),
    DescriptorPolicy::Primary(PathLookup::PathTable),
  )
  .unwrap();

  assert!(matches!(
    fs.entry("/USR/SHARE/DOC").unwrap(),
    FsEntry::Directory { .. }
  ));

  // The final component is not a directory: resolution falls back to the
  // matched parent's extent.
  match fs.entry("/USR/SHARE/DOC/README.md").unwrap() {
    FsEntry::File { name, size, .. } => {
      assert_eq!(name, "README.md");
      assert_eq!(size, 6);
    }
    other => panic!("unexpected entry {other:?}"),
  }

  assert!(fs.entry("/USR/missing").is_err());
}

#[test]
fn enhanced_descriptor_names() {
  let mut options = WriterOptions::new("ENHANCED");
  options.include_enhanced = true;

  let mut writer = IsoWriter::new(MemoryMedium::new(2048).unwrap(), options).unwrap();
  writer.add_file("/Grüße.txt", 2, None).unwrap();

  let mut contents = Contents::new(&[("/Grüße.txt", b"hi")]);
  writer.write_and_close(contents.source()).unwrap();

  let mut fs = IsoFilesystem::open(
    writer.into_medium(),
    DescriptorPolicy::Enhanced(PathLookup::DirectoryRecords),
  )
  .unwrap();
  assert_eq!(fs.list("/").unwrap(), vec!["Grüße.txt"]);
  assert_eq!(read_all(&mut fs.read_file("/Grüße.txt").unwrap()), b"hi");
}

#[test]
fn oversized_trailers_spill_through_continuations() {
  use discfs::susp::{emit_area, AllocatedRegion, NameFlags, SuspArea, SuspEntry};

  // NM and SL too large for one record: the in-record region keeps PX and a
  // CE; the continuation carries the rest.
  let content = vec![
    SuspEntry::PosixAttributes {
      mode: 0o644,
      links: 1,
      uid: 0,
      gid: 0,
      serial: None,
    },
    SuspEntry::AlternateName {
      flags: NameFlags::empty(),
      name: vec![b'n'; 200],
    },
    SuspEntry::Symlink {
      continues: false,
      components: vec![discfs::susp::SymlinkComponent::named(vec![b't'; 100])],
    },
  ];

  let regions = emit_area(&content, 120, |_| {
    Ok(AllocatedRegion {
      block: 500,
      offset: 0,
      granted: 2048,
    })
  })
  .unwrap();

  assert!(regions.len() >= 2);
  assert!(regions[0].bytes.len() <= 120);

  let mut area = SuspArea::from_system_use(&regions[0].bytes);
  for region in &regions[1..] {
    assert!(area.add_continuation(&region.bytes));
  }
  assert!(area.is_complete());
  assert_eq!(area.entries(), content);
}
