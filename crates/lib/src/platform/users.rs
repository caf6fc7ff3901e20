//! User and group database lookups.

use nix::unistd::{Gid, Group, Uid, User};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LookupError {
  #[error("no such user: {0}")]
  NoUser(String),

  #[error("no such group: {0}")]
  NoGroup(String),

  #[error("failed to query the user database: {0}")]
  Database(#[from] nix::Error),
}

/// Resolve an owner name and optional group name to ids.
///
/// Without a group the owner's primary group is used.
pub fn resolve_owner(owner: &str, group: Option<&str>) -> Result<(Uid, Gid), LookupError> {
  let user = User::from_name(owner)?.ok_or_else(|| LookupError::NoUser(owner.to_string()))?;
  let gid = match group {
    Some(name) => {
      Group::from_name(name)?
        .ok_or_else(|| LookupError::NoGroup(name.to_string()))?
        .gid
    }
    None => user.gid,
  };
  Ok((user.uid, gid))
}

/// Name of a uid, or the number if it has no entry.
pub fn user_name(uid: u32) -> String {
  match User::from_uid(Uid::from_raw(uid)) {
    Ok(Some(user)) => user.name,
    _ => uid.to_string(),
  }
}

/// Name of the effective user of this process.
pub fn current_user() -> String {
  user_name(nix::unistd::geteuid().as_raw())
}

/// Name of a gid, or the number if it has no entry.
pub fn group_name(gid: u32) -> String {
  match Group::from_gid(Gid::from_raw(gid)) {
    Ok(Some(group)) => group.name,
    _ => gid.to_string(),
  }
}

/// Name of the primary group of `owner`, if the user exists.
pub fn primary_group(owner: &str) -> Option<String> {
  let user = User::from_name(owner).ok()??;
  Some(group_name(user.gid.as_raw()))
}

pub fn user_exists(name: &str) -> bool {
  matches!(User::from_name(name), Ok(Some(_)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn root_resolves() {
    let (uid, gid) = resolve_owner("root", None).unwrap();
    assert!(uid.is_root());
    assert_eq!(gid.as_raw(), 0);
    assert_eq!(user_name(0), "root");
    assert!(user_exists("root"));
  }

  #[test]
  fn unknown_names_are_errors() {
    assert!(matches!(
      resolve_owner("koti-no-such-user", None),
      Err(LookupError::NoUser(_))
    ));
    assert!(matches!(
      resolve_owner("root", Some("koti-no-such-group")),
      Err(LookupError::NoGroup(_))
    ));
    assert!(!user_exists("koti-no-such-user"));
  }

  #[test]
  fn unknown_ids_render_as_numbers() {
    assert_eq!(user_name(4_000_000_001), "4000000001");
  }
}
