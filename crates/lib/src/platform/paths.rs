use std::path::PathBuf;

use crate::consts::{CACHE_DIR_ENV, DEFAULT_CACHE_DIR};

/// Directory holding the manager stores and the run lock.
///
/// `KOTI_CACHE_DIR` overrides the default `/var/cache/koti`.
pub fn cache_dir() -> PathBuf {
  match std::env::var(CACHE_DIR_ENV) {
    Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
    _ => PathBuf::from(DEFAULT_CACHE_DIR),
  }
}
