//! Host platform queries.

pub mod paths;
pub mod users;

/// Whether the process runs with an effective uid of 0.
pub fn is_root() -> bool {
  nix::unistd::geteuid().is_root()
}
