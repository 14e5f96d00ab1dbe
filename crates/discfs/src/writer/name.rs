//! Per-descriptor name derivation: legacy `NAME.EXT;1` identifiers for the
//! primary hierarchy and byte-budgeted Joliet/UTF-8 identifiers for the
//! others.

use std::collections::HashSet;

use crate::codec::{self, TextEncoding};
use crate::{Error, Result};

/// Byte cap on supplementary and enhanced identifiers.
pub(crate) const LONG_NAME_MAX: usize = 207;

fn sanitize(part: &str) -> String {
  part
    .chars()
    .map(|ch| {
      let upper = ch.to_ascii_uppercase();
      if upper.is_ascii() && codec::is_d_character(upper as u8) {
        upper
      } else {
        '_'
      }
    })
    .collect()
}

/// Linear search for an unused name: append digits while the base has room,
/// then substitute trailing base characters to widen the digit field.
fn uniquify<F>(base: &str, render: F, taken: &HashSet<String>) -> Result<String>
where
  F: Fn(&str) -> String,
{
  let candidate = render(base);
  if !taken.contains(&candidate) {
    return Ok(candidate);
  }

  let cap = (base.len() + 1).min(8);
  for digits in 1..=cap {
    let prefix = &base[..cap - digits];
    let limit = 10u32.pow(digits as u32);
    for n in 0..limit {
      let candidate = render(&format!("{prefix}{n:0width$}", width = digits));
      if !taken.contains(&candidate) {
        return Ok(candidate);
      }
    }
  }

  Err(Error::PreconditionFailed(format!(
    "cannot uniquify sibling name derived from {base:?}"
  )))
}

/// Derive the primary-descriptor identifier of a file: uppercase, non
/// d-characters replaced, extension capped at 3, `NAME.EXT` capped at 12,
/// version `;1`, digit perturbation on sibling collisions.
pub(crate) fn derive_file_identifier(name: &str, taken: &HashSet<String>) -> Result<String> {
  let (base, extension) = match name.rsplit_once('.') {
    Some((base, extension)) => (sanitize(base), sanitize(extension)),
    None => (sanitize(name), String::new()),
  };

  let mut extension = extension;
  extension.truncate(3);

  let mut base = base;
  base.truncate(12 - 1 - extension.len());

  uniquify(&base, |base| format!("{base}.{extension};1"), taken)
}

/// Derive the primary-descriptor identifier of a directory: uppercase, non
/// d-characters replaced, capped at 8, digit perturbation on collisions.
pub(crate) fn derive_directory_identifier(name: &str, taken: &HashSet<String>) -> Result<String> {
  let mut base = sanitize(name);
  base.truncate(8);
  uniquify(&base, str::to_string, taken)
}

/// Encode a name for a supplementary or enhanced hierarchy, truncating at a
/// whole-code-unit boundary.
pub(crate) fn encode_long_identifier(name: &str, encoding: TextEncoding) -> Vec<u8> {
  encoding.encode_truncated(name, LONG_NAME_MAX)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn derive_all(names: &[&str]) -> Vec<String> {
    let mut taken = HashSet::new();
    names
      .iter()
      .map(|name| {
        let derived = derive_file_identifier(name, &taken).unwrap();
        taken.insert(derived.clone());
        derived
      })
      .collect()
  }

  #[test]
  fn plain_names_pass_through() {
    assert_eq!(derive_all(&["HELLO.TXT"]), vec!["HELLO.TXT;1"]);
    assert_eq!(derive_all(&["readme.md"]), vec!["README.MD;1"]);
  }

  #[test]
  fn invalid_characters_become_underscores() {
    assert_eq!(derive_all(&["hello world.txt"]), vec!["HELLO_WORLD.TXT;1"]);
    assert_eq!(derive_all(&["grub.cfg"]), vec!["GRUB.CFG;1"]);
  }

  #[test]
  fn long_extensions_and_bases_are_trimmed() {
    assert_eq!(derive_all(&["archive.tar.gz"]), vec!["ARCHIVE_T.GZ;1"]);
    assert_eq!(
      derive_all(&["averylongfilename.json"]),
      vec!["AVERYLON.JSO;1"]
    );
  }

  #[test]
  fn collisions_perturb_with_digits() {
    assert_eq!(
      derive_all(&["ABCDEFGH.TXT", "abcdefgh.txt", "Abcdefgh.TXT"]),
      vec!["ABCDEFGH.TXT;1", "ABCDEFG0.TXT;1", "ABCDEFG1.TXT;1"]
    );
  }

  #[test]
  fn short_bases_append_before_substituting() {
    let names: Vec<&str> = vec!["ab.txt"; 13];
    let derived = derive_all(&names);
    assert_eq!(derived[0], "AB.TXT;1");
    assert_eq!(derived[1], "AB0.TXT;1");
    assert_eq!(derived[10], "AB9.TXT;1");
    // One-digit candidates exhausted; the field widens.
    assert_eq!(derived[11], "A00.TXT;1");
    assert_eq!(derived[12], "A01.TXT;1");
  }

  #[test]
  fn directories_have_no_version() {
    let mut taken = HashSet::new();
    let first = derive_directory_identifier("My Photos", &taken).unwrap();
    assert_eq!(first, "MY_PHOTO");
    taken.insert(first);

    let second = derive_directory_identifier("my.photos", &taken).unwrap();
    assert_eq!(second, "MY_PHOT0");
  }

  #[test]
  fn long_identifiers_respect_the_byte_cap() {
    let name = "x".repeat(300);
    let ucs2 = encode_long_identifier(&name, TextEncoding::Ucs2Be);
    assert!(ucs2.len() <= LONG_NAME_MAX);
    assert_eq!(ucs2.len() % 2, 0);

    let utf8 = encode_long_identifier(&name, TextEncoding::Utf8);
    assert_eq!(utf8.len(), 207);
  }
}
