//! Configuration items.
//!
//! An item is a typed declarative unit of desired system state. Items are a
//! closed set of variants ([`ConfigItem`]); identity is the [`ItemId`]
//! discriminator built from the class and the primary key, so two
//! declarations with the same id are the same item and must be reconciled
//! through [`ConfigItem::merge`].
//!
//! Managed items are applied by a manager. Unmanaged items (`Option`,
//! `Checkpoint`) only carry meta information for other items and for the
//! scheduler.

pub mod option;
pub mod types;

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::confirm::ConfirmMode;

pub use option::{OptionError, OptionItem, OptionValues};
pub use types::{
  Checkpoint, ContentFn, Directory, DirectorySource, File, FileContent, FlatpakPackage, FlatpakRepo, GroupAssignment,
  HookBody, Package, PacmanKey, PostHook, Swapfile, SystemdUnit, User, UserHome, UserShell,
};

/// The class of an item. Managers claim classes, the registry dispatches on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemKind {
  Package,
  File,
  Directory,
  SystemdUnit,
  Swapfile,
  PacmanKey,
  FlatpakRepo,
  FlatpakPackage,
  User,
  UserShell,
  UserHome,
  GroupAssignment,
  PostHook,
  Option,
  Checkpoint,
}

impl ItemKind {
  pub fn name(self) -> &'static str {
    match self {
      ItemKind::Package => "Package",
      ItemKind::File => "File",
      ItemKind::Directory => "Directory",
      ItemKind::SystemdUnit => "SystemdUnit",
      ItemKind::Swapfile => "Swapfile",
      ItemKind::PacmanKey => "PacmanKey",
      ItemKind::FlatpakRepo => "FlatpakRepo",
      ItemKind::FlatpakPackage => "FlatpakPackage",
      ItemKind::User => "User",
      ItemKind::UserShell => "UserShell",
      ItemKind::UserHome => "UserHome",
      ItemKind::GroupAssignment => "GroupAssignment",
      ItemKind::PostHook => "PostHook",
      ItemKind::Option => "Option",
      ItemKind::Checkpoint => "Checkpoint",
    }
  }

  /// Whether items of this class are applied to the system by a manager.
  pub fn is_managed(self) -> bool {
    !matches!(self, ItemKind::Option | ItemKind::Checkpoint)
  }
}

impl fmt::Display for ItemKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Identity of an item: class, primary key and an optional secondary key.
///
/// Renders as the discriminator used in messages and persistent stores, e.g.
/// `File('/etc/x')`, `SystemdUnit('n', user='u')`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId {
  pub kind: ItemKind,
  pub key: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub qualifier: Option<String>,
}

impl ItemId {
  pub fn new(kind: ItemKind, key: impl Into<String>) -> Self {
    Self {
      kind,
      key: key.into(),
      qualifier: None,
    }
  }

  pub fn qualified(kind: ItemKind, key: impl Into<String>, qualifier: impl Into<String>) -> Self {
    Self {
      kind,
      key: key.into(),
      qualifier: Some(qualifier.into()),
    }
  }

  pub fn package(name: impl Into<String>) -> Self {
    Self::new(ItemKind::Package, name)
  }

  pub fn file(path: impl AsRef<std::path::Path>) -> Self {
    Self::new(ItemKind::File, path.as_ref().display().to_string())
  }

  pub fn directory(path: impl AsRef<std::path::Path>) -> Self {
    Self::new(ItemKind::Directory, path.as_ref().display().to_string())
  }

  pub fn unit(name: impl Into<String>) -> Self {
    Self::new(ItemKind::SystemdUnit, name)
  }

  pub fn user_unit(name: impl Into<String>, user: impl Into<String>) -> Self {
    Self::qualified(ItemKind::SystemdUnit, name, user)
  }

  pub fn swapfile(path: impl AsRef<std::path::Path>) -> Self {
    Self::new(ItemKind::Swapfile, path.as_ref().display().to_string())
  }

  pub fn pacman_key(key_id: impl Into<String>) -> Self {
    Self::new(ItemKind::PacmanKey, key_id)
  }

  pub fn flatpak_repo(name: impl Into<String>) -> Self {
    Self::new(ItemKind::FlatpakRepo, name)
  }

  pub fn flatpak_package(id: impl Into<String>) -> Self {
    Self::new(ItemKind::FlatpakPackage, id)
  }

  pub fn user(username: impl Into<String>) -> Self {
    Self::new(ItemKind::User, username)
  }

  pub fn user_shell(username: impl Into<String>) -> Self {
    Self::new(ItemKind::UserShell, username)
  }

  pub fn user_home(username: impl Into<String>) -> Self {
    Self::new(ItemKind::UserHome, username)
  }

  pub fn group_assignment(username: impl Into<String>, group: impl Into<String>) -> Self {
    Self::qualified(ItemKind::GroupAssignment, username, group)
  }

  pub fn hook(name: impl Into<String>) -> Self {
    Self::new(ItemKind::PostHook, name)
  }

  pub fn option(name: impl Into<String>) -> Self {
    Self::new(ItemKind::Option, name)
  }

  pub fn checkpoint(name: impl Into<String>) -> Self {
    Self::new(ItemKind::Checkpoint, name)
  }
}

impl fmt::Display for ItemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (&self.kind, &self.qualifier) {
      (ItemKind::SystemdUnit, Some(user)) => write!(f, "SystemdUnit('{}', user='{}')", self.key, user),
      (ItemKind::GroupAssignment, Some(group)) => write!(f, "GroupAssignment('{}', group='{}')", self.key, group),
      (kind, Some(q)) => write!(f, "{}('{}', '{}')", kind, self.key, q),
      (kind, None) => write!(f, "{}('{}')", kind, self.key),
    }
  }
}

/// An ordering predicate over items.
#[derive(Clone)]
pub struct ItemPredicate(Rc<dyn Fn(&ConfigItem) -> bool>);

impl ItemPredicate {
  pub fn new<F>(f: F) -> Self
  where
    F: Fn(&ConfigItem) -> bool + 'static,
  {
    Self(Rc::new(f))
  }

  /// Matches exactly one item.
  pub fn id(id: ItemId) -> Self {
    Self::new(move |item| item.id() == id)
  }

  /// Matches any of the given items.
  pub fn any_of<I>(ids: I) -> Self
  where
    I: IntoIterator<Item = ItemId>,
  {
    let ids: Vec<ItemId> = ids.into_iter().collect();
    Self::new(move |item| ids.contains(&item.id()))
  }

  /// Matches every item of a class.
  pub fn kind(kind: ItemKind) -> Self {
    Self::new(move |item| item.kind() == kind)
  }

  pub fn matches(&self, item: &ConfigItem) -> bool {
    (self.0)(item)
  }
}

impl fmt::Debug for ItemPredicate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("ItemPredicate(..)")
  }
}

/// Attributes shared by every item.
#[derive(Debug, Clone, Default)]
pub struct ItemMeta {
  pub tags: BTreeSet<String>,
  pub confirm_mode: Option<ConfirmMode>,
  /// Items that must be scheduled strictly earlier.
  pub requires: Vec<ItemId>,
  /// This item must come before every item matching one of these.
  pub before: Vec<ItemPredicate>,
  /// This item must come after every item matching one of these.
  pub after: Vec<ItemPredicate>,
}

impl ItemMeta {
  pub fn merge(&self, other: &ItemMeta) -> ItemMeta {
    let mut requires = self.requires.clone();
    for id in &other.requires {
      if !requires.contains(id) {
        requires.push(id.clone());
      }
    }

    ItemMeta {
      tags: self.tags.union(&other.tags).cloned().collect(),
      confirm_mode: self.confirm_mode.max(other.confirm_mode),
      requires,
      before: self.before.iter().chain(&other.before).cloned().collect(),
      after: self.after.iter().chain(&other.after).cloned().collect(),
    }
  }
}

/// Two declarations of the same item disagree on an attribute.
#[derive(Debug, Clone, Error)]
#[error("conflicting {field} for {id}: {left} vs {right}")]
pub struct MergeConflict {
  pub id: ItemId,
  pub field: &'static str,
  pub left: String,
  pub right: String,
}

/// Unify two optional attributes: unset yields to set, two different values conflict.
pub(crate) fn unify<T>(id: &ItemId, field: &'static str, a: &Option<T>, b: &Option<T>) -> Result<Option<T>, MergeConflict>
where
  T: Clone + PartialEq + fmt::Debug,
{
  match (a, b) {
    (Some(x), Some(y)) if x != y => Err(MergeConflict {
      id: id.clone(),
      field,
      left: format!("{:?}", x),
      right: format!("{:?}", y),
    }),
    (Some(x), _) => Ok(Some(x.clone())),
    (None, y) => Ok(y.clone()),
  }
}

/// Require two mandatory attributes to be equal.
pub(crate) fn agree<T>(id: &ItemId, field: &'static str, a: &T, b: &T) -> Result<(), MergeConflict>
where
  T: PartialEq + fmt::Debug,
{
  if a == b {
    Ok(())
  } else {
    Err(MergeConflict {
      id: id.clone(),
      field,
      left: format!("{:?}", a),
      right: format!("{:?}", b),
    })
  }
}

/// At most one declaration may provide an attribute that cannot be compared.
pub(crate) fn at_most_one<T: Clone>(
  id: &ItemId,
  field: &'static str,
  a: &Option<T>,
  b: &Option<T>,
) -> Result<Option<T>, MergeConflict> {
  match (a, b) {
    (Some(_), Some(_)) => Err(MergeConflict {
      id: id.clone(),
      field,
      left: "provided".to_string(),
      right: "provided again".to_string(),
    }),
    (Some(x), None) | (None, Some(x)) => Ok(Some(x.clone())),
    (None, None) => Ok(None),
  }
}

/// Builder methods shared by all item types.
pub trait ItemExt: Sized {
  fn meta_mut(&mut self) -> &mut ItemMeta;

  fn tag(mut self, tag: impl Into<String>) -> Self {
    self.meta_mut().tags.insert(tag.into());
    self
  }

  fn confirm_mode(mut self, mode: ConfirmMode) -> Self {
    self.meta_mut().confirm_mode = Some(mode);
    self
  }

  fn requires(mut self, id: ItemId) -> Self {
    let meta = self.meta_mut();
    if !meta.requires.contains(&id) {
      meta.requires.push(id);
    }
    self
  }

  fn before(mut self, predicate: ItemPredicate) -> Self {
    self.meta_mut().before.push(predicate);
    self
  }

  fn after(mut self, predicate: ItemPredicate) -> Self {
    self.meta_mut().after.push(predicate);
    self
  }
}

macro_rules! config_items {
  ($($variant:ident($ty:ty)),* $(,)?) => {
    /// Every item the engine understands.
    #[derive(Debug, Clone)]
    pub enum ConfigItem {
      $($variant($ty),)*
    }

    impl ConfigItem {
      pub fn id(&self) -> ItemId {
        match self {
          $(ConfigItem::$variant(item) => item.id(),)*
        }
      }

      pub fn kind(&self) -> ItemKind {
        match self {
          $(ConfigItem::$variant(_) => ItemKind::$variant,)*
        }
      }

      pub fn meta(&self) -> &ItemMeta {
        match self {
          $(ConfigItem::$variant(item) => &item.meta,)*
        }
      }

      pub fn meta_mut(&mut self) -> &mut ItemMeta {
        match self {
          $(ConfigItem::$variant(item) => &mut item.meta,)*
        }
      }

      /// Reconcile two declarations of the same item.
      pub fn merge(&self, other: &ConfigItem) -> Result<ConfigItem, MergeConflict> {
        match (self, other) {
          $((ConfigItem::$variant(a), ConfigItem::$variant(b)) => {
            let meta = a.meta.merge(&b.meta);
            let mut merged = a.merge(b)?;
            merged.meta = meta;
            Ok(ConfigItem::$variant(merged))
          })*
          (a, b) => Err(MergeConflict {
            id: a.id(),
            field: "class",
            left: a.kind().to_string(),
            right: b.kind().to_string(),
          }),
        }
      }
    }

    $(
      impl From<$ty> for ConfigItem {
        fn from(item: $ty) -> Self {
          ConfigItem::$variant(item)
        }
      }

      impl ItemExt for $ty {
        fn meta_mut(&mut self) -> &mut ItemMeta {
          &mut self.meta
        }
      }
    )*
  };
}

config_items! {
  Package(Package),
  File(File),
  Directory(Directory),
  SystemdUnit(SystemdUnit),
  Swapfile(Swapfile),
  PacmanKey(PacmanKey),
  FlatpakRepo(FlatpakRepo),
  FlatpakPackage(FlatpakPackage),
  User(User),
  UserShell(UserShell),
  UserHome(UserHome),
  GroupAssignment(GroupAssignment),
  PostHook(PostHook),
  Option(OptionItem),
  Checkpoint(Checkpoint),
}

impl ConfigItem {
  pub fn is_managed(&self) -> bool {
    self.kind().is_managed()
  }

  /// Whether this item must be scheduled strictly before `other`.
  pub fn before(&self, other: &ConfigItem) -> bool {
    self.meta().before.iter().any(|p| p.matches(other)) || intrinsic_before(self, other)
  }

  /// Whether this item must be scheduled strictly after `other`.
  pub fn after(&self, other: &ConfigItem) -> bool {
    if let ConfigItem::PostHook(hook) = self
      && hook.triggers.contains(&other.id())
    {
      return true;
    }
    self.meta().after.iter().any(|p| p.matches(other))
  }

  /// The user owning the files this item writes, if any.
  fn owner(&self) -> Option<&str> {
    match self {
      ConfigItem::File(file) => Some(file.owner_name()),
      ConfigItem::Directory(dir) => Some(dir.owner_name()),
      _ => None,
    }
  }
}

/// Orderings that hold regardless of configuration.
fn intrinsic_before(a: &ConfigItem, b: &ConfigItem) -> bool {
  match (a, b) {
    (ConfigItem::PacmanKey(_), ConfigItem::Package(_)) => true,
    (ConfigItem::FlatpakRepo(_), ConfigItem::FlatpakPackage(_)) => true,
    (ConfigItem::User(user), other) => {
      let name = user.username.as_str();
      match other {
        ConfigItem::UserShell(s) => s.username == name,
        ConfigItem::UserHome(h) => h.username == name,
        ConfigItem::GroupAssignment(g) => g.username == name,
        ConfigItem::SystemdUnit(u) => u.user.as_deref() == Some(name),
        _ => other.owner() == Some(name),
      }
    }
    _ => false,
  }
}
