/// Errors raised while reading or producing ISO 9660 structures.
///
/// Parsing of malformed on-disc data is best-effort and usually degrades to
/// partial results instead of returning one of these; writing validates up
/// front and aborts on the first violation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("Invalid path: {0}")]
  InvalidPath(String),

  #[error("Invalid sector size {0}; must be a power of two of at least 2048 bytes")]
  InvalidSectorSize(usize),

  #[error("Invalid logical block size {0}; must be a nonzero power of two")]
  InvalidLogicalBlockSize(u32),

  #[error("Invalid {field} identifier {value:?}")]
  InvalidIdentifier { field: &'static str, value: String },

  #[error("Application use area is {0} bytes; at most 512 allowed")]
  InvalidApplicationUseSize(usize),

  #[error("Invalid SUSP signature {0:?}")]
  InvalidSuspSignature([u8; 2]),

  #[error("Descriptor does not bear a directory hierarchy")]
  InvalidVolumeDirectoryDescriptor,

  #[error("Precondition failed: {0}")]
  PreconditionFailed(String),

  #[error("Invalid argument `{name}`: {message}")]
  InvalidArgument {
    name: &'static str,
    message: String,
  },

  #[error("Not a valid ISO 9660 image")]
  InvalidImage,

  #[error("Writer is already closed")]
  WriterClosed,

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}
