//! ISO 9660 (ECMA-119) filesystem library.
//!
//! `discfs` reads and writes ISO 9660 disc images entirely in user space,
//! including the Joliet supplementary descriptor convention and Rock Ridge
//! metadata carried over SUSP. The library consumes any block-addressable
//! medium (a file, a `Cursor`, or an in-memory store) and exposes
//! filesystem-level operations only; no host mount is involved.
//!
//! Reading:
//!
//! ```no_run
//! use discfs::{DescriptorPolicy, FileMedium, IsoFilesystem, PathLookup};
//!
//! let file = std::fs::File::open("image.iso")?;
//! let medium = FileMedium::new(file, 2048)?;
//! let mut fs = IsoFilesystem::open(medium, DescriptorPolicy::Any(PathLookup::DirectoryRecords))?;
//! for name in fs.list("/")? {
//!   println!("{name}");
//! }
//! # Ok::<(), discfs::Error>(())
//! ```
//!
//! Writing:
//!
//! ```no_run
//! use discfs::{FileMedium, IsoWriter, WriterOptions};
//!
//! let file = std::fs::File::create("image.iso")?;
//! let medium = FileMedium::new(file, 2048)?;
//! let mut writer = IsoWriter::new(medium, WriterOptions::new("BACKUP"))?;
//! writer.add_file("/docs/readme.txt", 13, None)?;
//! writer.write_and_close(|_path| Ok(Box::new(&b"hello, world!"[..])))?;
//! # Ok::<(), discfs::Error>(())
//! ```

pub mod codec;
mod error;
pub mod medium;
pub mod read;
pub mod record;
pub mod susp;
pub mod volume;
pub mod writer;

pub use error::Error;
pub use medium::{BlockMedium, FileMedium, MemoryMedium};
pub use read::{DescriptorPolicy, FileStream, FsEntry, IsoFilesystem, Metadata, PathLookup};
pub use record::{DirectoryRecord, FileFlags, PathTableRecord, RecordIdentifier};
pub use volume::VolumeDescriptor;
pub use writer::{IsoWriter, NodeMetadata, WriterOptions};

/// Result type for operations that may return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Size in bytes of one volume descriptor, and of the sectors conventionally
/// holding them.
pub const DESCRIPTOR_SIZE: usize = 2048;

/// Number of reserved sectors preceding the volume descriptor set.
pub const SYSTEM_AREA_SECTORS: usize = 16;

/// Standard identifier shared by every ISO 9660 volume descriptor.
pub const STANDARD_IDENTIFIER: &[u8; 5] = b"CD001";
