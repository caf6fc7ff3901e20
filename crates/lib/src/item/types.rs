//! Concrete item types and their merge rules.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::{ItemId, ItemMeta, MergeConflict, agree, at_most_one, unify};
use crate::BoxError;
use crate::model::Model;
use crate::shell::Cmd;

pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIRECTORY_MASK: u32 = 0o755;
pub const DEFAULT_OWNER: &str = "root";

/// Produces file content from the merged model.
pub type ContentFn = Rc<dyn Fn(&Model) -> Result<Vec<u8>, BoxError>>;

/// Side effect of a post hook implemented in Rust.
pub type HookFn = Rc<dyn Fn() -> Result<(), BoxError>>;

#[derive(Debug, Clone)]
pub struct Package {
  pub name: String,
  /// Install from this package file URL instead of a repository.
  pub url: Option<String>,
  /// Install by running this shell script.
  pub script: Option<String>,
  pub meta: ItemMeta,
}

impl Package {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      url: None,
      script: None,
      meta: ItemMeta::default(),
    }
  }

  pub fn url(mut self, url: impl Into<String>) -> Self {
    self.url = Some(url.into());
    self
  }

  pub fn script(mut self, script: impl Into<String>) -> Self {
    self.script = Some(script.into());
    self
  }

  pub fn id(&self) -> ItemId {
    ItemId::package(&self.name)
  }

  pub(crate) fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
    let id = self.id();
    Ok(Self {
      name: self.name.clone(),
      url: unify(&id, "url", &self.url, &other.url)?,
      script: unify(&id, "script", &self.script, &other.script)?,
      meta: ItemMeta::default(),
    })
  }
}

/// Where the bytes of a file come from.
#[derive(Clone)]
pub enum FileContent {
  Bytes(Vec<u8>),
  /// Copy of a file on the local filesystem.
  Source(PathBuf),
  /// Computed from the model at plan time.
  Producer(ContentFn),
}

impl FileContent {
  pub fn render(&self, model: &Model) -> Result<Vec<u8>, BoxError> {
    match self {
      FileContent::Bytes(bytes) => Ok(bytes.clone()),
      FileContent::Source(path) => {
        fs::read(path).map_err(|e| format!("failed to read source file {}: {}", path.display(), e).into())
      }
      FileContent::Producer(produce) => produce(model),
    }
  }
}

impl fmt::Debug for FileContent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FileContent::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
      FileContent::Source(path) => write!(f, "Source({})", path.display()),
      FileContent::Producer(_) => f.write_str("Producer(..)"),
    }
  }
}

#[derive(Debug, Clone)]
pub struct File {
  pub filename: PathBuf,
  pub content: Option<FileContent>,
  pub permissions: Option<u32>,
  pub owner: Option<String>,
  pub group: Option<String>,
  pub meta: ItemMeta,
}

impl File {
  pub fn new(filename: impl Into<PathBuf>) -> Self {
    Self {
      filename: filename.into(),
      content: None,
      permissions: None,
      owner: None,
      group: None,
      meta: ItemMeta::default(),
    }
  }

  pub fn content(mut self, content: impl Into<Vec<u8>>) -> Self {
    self.content = Some(FileContent::Bytes(content.into()));
    self
  }

  pub fn content_fn<F>(mut self, produce: F) -> Self
  where
    F: Fn(&Model) -> Result<Vec<u8>, BoxError> + 'static,
  {
    self.content = Some(FileContent::Producer(Rc::new(produce)));
    self
  }

  pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
    self.content = Some(FileContent::Source(path.into()));
    self
  }

  pub fn permissions(mut self, mode: u32) -> Self {
    self.permissions = Some(mode);
    self
  }

  pub fn owner(mut self, owner: impl Into<String>) -> Self {
    self.owner = Some(owner.into());
    self
  }

  pub fn group(mut self, group: impl Into<String>) -> Self {
    self.group = Some(group.into());
    self
  }

  pub fn mode(&self) -> u32 {
    self.permissions.unwrap_or(DEFAULT_FILE_MODE)
  }

  pub fn owner_name(&self) -> &str {
    self.owner.as_deref().unwrap_or(DEFAULT_OWNER)
  }

  pub fn id(&self) -> ItemId {
    ItemId::file(&self.filename)
  }

  pub(crate) fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
    let id = self.id();
    agree(&id, "permissions", &self.mode(), &other.mode())?;
    agree(&id, "owner", &self.owner_name(), &other.owner_name())?;
    Ok(Self {
      filename: self.filename.clone(),
      content: at_most_one(&id, "content", &self.content, &other.content)?,
      permissions: self.permissions.or(other.permissions),
      owner: self.owner.clone().or_else(|| other.owner.clone()),
      group: unify(&id, "group", &self.group, &other.group)?,
      meta: ItemMeta::default(),
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectorySource {
  /// A directory tree on the local filesystem.
  Tree(PathBuf),
  /// A zip archive.
  Zip(PathBuf),
}

impl DirectorySource {
  pub fn path(&self) -> &Path {
    match self {
      DirectorySource::Tree(path) | DirectorySource::Zip(path) => path,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Directory {
  pub dirname: PathBuf,
  pub source: Option<DirectorySource>,
  pub mask: Option<u32>,
  pub owner: Option<String>,
  pub meta: ItemMeta,
}

impl Directory {
  pub fn new(dirname: impl Into<PathBuf>) -> Self {
    Self {
      dirname: dirname.into(),
      source: None,
      mask: None,
      owner: None,
      meta: ItemMeta::default(),
    }
  }

  pub fn source_dir(mut self, path: impl Into<PathBuf>) -> Self {
    self.source = Some(DirectorySource::Tree(path.into()));
    self
  }

  pub fn source_zip(mut self, path: impl Into<PathBuf>) -> Self {
    self.source = Some(DirectorySource::Zip(path.into()));
    self
  }

  pub fn mask(mut self, mask: u32) -> Self {
    self.mask = Some(mask);
    self
  }

  pub fn owner(mut self, owner: impl Into<String>) -> Self {
    self.owner = Some(owner.into());
    self
  }

  pub fn effective_mask(&self) -> u32 {
    self.mask.unwrap_or(DEFAULT_DIRECTORY_MASK)
  }

  pub fn owner_name(&self) -> &str {
    self.owner.as_deref().unwrap_or(DEFAULT_OWNER)
  }

  pub fn id(&self) -> ItemId {
    ItemId::directory(&self.dirname)
  }

  pub(crate) fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
    let id = self.id();
    agree(&id, "mask", &self.effective_mask(), &other.effective_mask())?;
    agree(&id, "owner", &self.owner_name(), &other.owner_name())?;
    Ok(Self {
      dirname: self.dirname.clone(),
      source: unify(&id, "source", &self.source, &other.source)?,
      mask: self.mask.or(other.mask),
      owner: self.owner.clone().or_else(|| other.owner.clone()),
      meta: ItemMeta::default(),
    })
  }
}

/// A systemd unit enabled and started, system-wide or for one user.
#[derive(Debug, Clone)]
pub struct SystemdUnit {
  pub name: String,
  pub user: Option<String>,
  pub meta: ItemMeta,
}

impl SystemdUnit {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      user: None,
      meta: ItemMeta::default(),
    }
  }

  pub fn user(mut self, user: impl Into<String>) -> Self {
    self.user = Some(user.into());
    self
  }

  pub fn id(&self) -> ItemId {
    match &self.user {
      Some(user) => ItemId::user_unit(&self.name, user),
      None => ItemId::unit(&self.name),
    }
  }

  pub(crate) fn merge(&self, _other: &Self) -> Result<Self, MergeConflict> {
    Ok(self.clone())
  }
}

#[derive(Debug, Clone)]
pub struct Swapfile {
  pub path: PathBuf,
  pub size_bytes: u64,
  pub meta: ItemMeta,
}

impl Swapfile {
  pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
    Self {
      path: path.into(),
      size_bytes,
      meta: ItemMeta::default(),
    }
  }

  pub fn id(&self) -> ItemId {
    ItemId::swapfile(&self.path)
  }

  pub(crate) fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
    agree(&self.id(), "size_bytes", &self.size_bytes, &other.size_bytes)?;
    Ok(self.clone())
  }
}

/// A key imported into and locally signed in the pacman keyring.
#[derive(Debug, Clone)]
pub struct PacmanKey {
  pub key_id: String,
  pub key_server: String,
  pub comment: Option<String>,
  pub meta: ItemMeta,
}

impl PacmanKey {
  pub fn new(key_id: impl Into<String>, key_server: impl Into<String>) -> Self {
    Self {
      key_id: key_id.into(),
      key_server: key_server.into(),
      comment: None,
      meta: ItemMeta::default(),
    }
  }

  pub fn comment(mut self, comment: impl Into<String>) -> Self {
    self.comment = Some(comment.into());
    self
  }

  pub fn id(&self) -> ItemId {
    ItemId::pacman_key(&self.key_id)
  }

  pub(crate) fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
    let id = self.id();
    agree(&id, "key_server", &self.key_server, &other.key_server)?;
    Ok(Self {
      key_id: self.key_id.clone(),
      key_server: self.key_server.clone(),
      comment: unify(&id, "comment", &self.comment, &other.comment)?,
      meta: ItemMeta::default(),
    })
  }
}

#[derive(Debug, Clone)]
pub struct FlatpakRepo {
  pub name: String,
  /// URL of a `.flatpakrepo` file.
  pub spec_url: Option<String>,
  /// URL of the repository itself.
  pub repo_url: Option<String>,
  pub meta: ItemMeta,
}

impl FlatpakRepo {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      spec_url: None,
      repo_url: None,
      meta: ItemMeta::default(),
    }
  }

  pub fn spec_url(mut self, url: impl Into<String>) -> Self {
    self.spec_url = Some(url.into());
    self
  }

  pub fn repo_url(mut self, url: impl Into<String>) -> Self {
    self.repo_url = Some(url.into());
    self
  }

  pub fn id(&self) -> ItemId {
    ItemId::flatpak_repo(&self.name)
  }

  pub(crate) fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
    let id = self.id();
    Ok(Self {
      name: self.name.clone(),
      spec_url: unify(&id, "spec_url", &self.spec_url, &other.spec_url)?,
      repo_url: unify(&id, "repo_url", &self.repo_url, &other.repo_url)?,
      meta: ItemMeta::default(),
    })
  }
}

#[derive(Debug, Clone)]
pub struct FlatpakPackage {
  pub app_id: String,
  pub meta: ItemMeta,
}

impl FlatpakPackage {
  pub fn new(app_id: impl Into<String>) -> Self {
    Self {
      app_id: app_id.into(),
      meta: ItemMeta::default(),
    }
  }

  pub fn id(&self) -> ItemId {
    ItemId::flatpak_package(&self.app_id)
  }

  pub(crate) fn merge(&self, _other: &Self) -> Result<Self, MergeConflict> {
    Ok(self.clone())
  }
}

/// A local user account. `shell` and `home` are only used on creation.
#[derive(Debug, Clone)]
pub struct User {
  pub username: String,
  pub shell: Option<String>,
  pub home: Option<PathBuf>,
  pub meta: ItemMeta,
}

impl User {
  pub fn new(username: impl Into<String>) -> Self {
    Self {
      username: username.into(),
      shell: None,
      home: None,
      meta: ItemMeta::default(),
    }
  }

  pub fn shell(mut self, shell: impl Into<String>) -> Self {
    self.shell = Some(shell.into());
    self
  }

  pub fn home(mut self, home: impl Into<PathBuf>) -> Self {
    self.home = Some(home.into());
    self
  }

  pub fn id(&self) -> ItemId {
    ItemId::user(&self.username)
  }

  pub(crate) fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
    let id = self.id();
    Ok(Self {
      username: self.username.clone(),
      shell: unify(&id, "shell", &self.shell, &other.shell)?,
      home: unify(&id, "home", &self.home, &other.home)?,
      meta: ItemMeta::default(),
    })
  }
}

/// Login shell of an existing user.
#[derive(Debug, Clone)]
pub struct UserShell {
  pub username: String,
  pub shell: String,
  pub meta: ItemMeta,
}

impl UserShell {
  pub fn new(username: impl Into<String>, shell: impl Into<String>) -> Self {
    Self {
      username: username.into(),
      shell: shell.into(),
      meta: ItemMeta::default(),
    }
  }

  pub fn id(&self) -> ItemId {
    ItemId::user_shell(&self.username)
  }

  pub(crate) fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
    agree(&self.id(), "shell", &self.shell, &other.shell)?;
    Ok(self.clone())
  }
}

/// Home directory of an existing user.
#[derive(Debug, Clone)]
pub struct UserHome {
  pub username: String,
  pub homedir: PathBuf,
  pub meta: ItemMeta,
}

impl UserHome {
  pub fn new(username: impl Into<String>, homedir: impl Into<PathBuf>) -> Self {
    Self {
      username: username.into(),
      homedir: homedir.into(),
      meta: ItemMeta::default(),
    }
  }

  pub fn id(&self) -> ItemId {
    ItemId::user_home(&self.username)
  }

  pub(crate) fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
    agree(&self.id(), "homedir", &self.homedir, &other.homedir)?;
    Ok(self.clone())
  }
}

#[derive(Debug, Clone)]
pub struct GroupAssignment {
  pub username: String,
  pub group: String,
  pub meta: ItemMeta,
}

impl GroupAssignment {
  pub fn new(username: impl Into<String>, group: impl Into<String>) -> Self {
    Self {
      username: username.into(),
      group: group.into(),
      meta: ItemMeta::default(),
    }
  }

  pub fn id(&self) -> ItemId {
    ItemId::group_assignment(&self.username, &self.group)
  }

  pub(crate) fn merge(&self, _other: &Self) -> Result<Self, MergeConflict> {
    Ok(self.clone())
  }
}

/// What a post hook runs when it fires.
#[derive(Clone)]
pub enum HookBody {
  Command(Cmd),
  Closure(HookFn),
}

impl fmt::Debug for HookBody {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      HookBody::Command(cmd) => write!(f, "Command({})", cmd),
      HookBody::Closure(_) => f.write_str("Closure(..)"),
    }
  }
}

/// Runs once whenever the state of one of its triggers changes.
#[derive(Debug, Clone)]
pub struct PostHook {
  pub name: String,
  pub body: Option<HookBody>,
  /// Sorted and deduplicated.
  pub triggers: Vec<ItemId>,
  pub meta: ItemMeta,
}

impl PostHook {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      body: None,
      triggers: Vec::new(),
      meta: ItemMeta::default(),
    }
  }

  pub fn run(mut self, cmd: Cmd) -> Self {
    self.body = Some(HookBody::Command(cmd));
    self
  }

  pub fn execute<F>(mut self, f: F) -> Self
  where
    F: Fn() -> Result<(), BoxError> + 'static,
  {
    self.body = Some(HookBody::Closure(Rc::new(f)));
    self
  }

  pub fn trigger(self, id: ItemId) -> Self {
    self.triggers([id])
  }

  pub fn triggers<I>(mut self, ids: I) -> Self
  where
    I: IntoIterator<Item = ItemId>,
  {
    self.triggers.extend(ids);
    self.triggers.sort();
    self.triggers.dedup();
    self
  }

  pub fn id(&self) -> ItemId {
    ItemId::hook(&self.name)
  }

  pub(crate) fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
    let body = at_most_one(&self.id(), "execute", &self.body, &other.body)?;
    let merged = Self {
      name: self.name.clone(),
      body,
      triggers: self.triggers.clone(),
      meta: ItemMeta::default(),
    };
    Ok(merged.triggers(other.triggers.iter().cloned()))
  }
}

/// A named dependency target with no effect on the system.
#[derive(Debug, Clone)]
pub struct Checkpoint {
  pub name: String,
  pub meta: ItemMeta,
}

impl Checkpoint {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      meta: ItemMeta::default(),
    }
  }

  pub fn id(&self) -> ItemId {
    ItemId::checkpoint(&self.name)
  }

  pub(crate) fn merge(&self, _other: &Self) -> Result<Self, MergeConflict> {
    Ok(self.clone())
  }
}
