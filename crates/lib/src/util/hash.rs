//! SHA-256 digests backing item states and hook trigger hashes.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Failure to serialize a value before hashing it.
pub type HashError = serde_json::Error;

/// Lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
  fn of(hasher: Sha256) -> Self {
    ContentHash(format!("{:x}", hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ContentHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash::of(Sha256::new_with_prefix(data))
}

/// Hash a value through its JSON form. Struct fields serialize in
/// declaration order, so equal values hash equally.
pub fn hash_value<T: Serialize + ?Sized>(value: &T) -> Result<ContentHash, HashError> {
  Ok(hash_bytes(&serde_json::to_vec(value)?))
}

/// Hash the contents of a file without reading it into memory.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
  let mut hasher = Sha256::new();
  io::copy(&mut File::open(path)?, &mut hasher)?;
  Ok(ContentHash::of(hasher))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn known_digest() {
    assert_eq!(
      hash_bytes(b"hello\n").as_str(),
      "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
    );
  }

  #[test]
  fn file_digest_matches_contents() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("hosts");
    std::fs::write(&path, "127.0.0.1 localhost\n").unwrap();
    assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"127.0.0.1 localhost\n"));
    assert!(hash_file(&temp.path().join("missing")).is_err());
  }

  #[test]
  fn value_digest_follows_fields() {
    #[derive(Serialize)]
    struct Unit<'a> {
      name: &'a str,
      enabled: bool,
    }
    let on = hash_value(&Unit { name: "sshd", enabled: true }).unwrap();
    assert_eq!(on, hash_value(&Unit { name: "sshd", enabled: true }).unwrap());
    assert_ne!(on, hash_value(&Unit { name: "sshd", enabled: false }).unwrap());
  }
}
