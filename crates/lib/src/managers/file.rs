//! Files and directories.
//!
//! A file's state is the hash of its owner, group, mode and content hash.
//! A directory is expanded into the files of its source (a directory tree or
//! a zip archive) and its state covers every expanded file plus any file a
//! previous run wrote there that the source no longer has.
//!
//! Writes are atomic: content goes to a temporary file in the target
//! directory which is then renamed over the target.

use std::fs;
use std::io::{self, BufReader, Read, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::Ledger;
use crate::action::{Action, ActionError};
use crate::item::{ConfigItem, Directory, DirectorySource, File, ItemId, ItemKind};
use crate::manager::{Context, Manager, ManagerError};
use crate::model::Model;
use crate::platform::users::{group_name, primary_group, resolve_owner, user_name};
use crate::state::ItemState;
use crate::util::hash::{ContentHash, hash_bytes, hash_file};

const DIRECTORY_FILES: &str = "directory_files";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct FileState {
  owner: String,
  group: String,
  mode: u32,
  content: ContentHash,
}

/// The full desired content and attributes of one file on disk.
#[derive(Debug, Clone)]
struct Rendered {
  path: PathBuf,
  bytes: Vec<u8>,
  mode: u32,
  owner: String,
  group: Option<String>,
}

impl Rendered {
  fn state(&self) -> FileState {
    FileState {
      owner: self.owner.clone(),
      group: self
        .group
        .clone()
        .or_else(|| primary_group(&self.owner))
        .unwrap_or_else(|| self.owner.clone()),
      mode: self.mode,
      content: hash_bytes(&self.bytes),
    }
  }

  /// Write atomically, then fix mode and ownership.
  fn write(&self) -> Result<(), ActionError> {
    let dir = self.path.parent().unwrap_or(Path::new("/"));
    fs::create_dir_all(dir).map_err(|e| ActionError::io(format!("failed to create {}", dir.display()), e))?;

    let context = || format!("failed to write {}", self.path.display());
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| ActionError::io(context(), e))?;
    temp.write_all(&self.bytes).map_err(|e| ActionError::io(context(), e))?;
    temp.persist(&self.path).map_err(|e| ActionError::io(context(), e.error))?;

    fs::set_permissions(&self.path, fs::Permissions::from_mode(self.mode))
      .map_err(|e| ActionError::io(format!("failed to chmod {}", self.path.display()), e))?;

    let (uid, gid) = resolve_owner(&self.owner, self.group.as_deref())?;
    nix::unistd::chown(&self.path, Some(uid), Some(gid))
      .map_err(|e| ActionError::io(format!("failed to chown {}", self.path.display()), e.into()))?;

    debug!(path = %self.path.display(), mode = format!("{:o}", self.mode), "file written");
    Ok(())
  }
}

/// State of whatever is at `path`; `None` if nothing is.
fn observe(path: &Path) -> Result<Option<FileState>, ManagerError> {
  let metadata = match fs::symlink_metadata(path) {
    Ok(metadata) => metadata,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(ManagerError::io(format!("failed to stat {}", path.display()), e)),
  };

  let content = if metadata.is_file() {
    hash_file(path).map_err(|e| ManagerError::io(format!("failed to read {}", path.display()), e))?
  } else {
    hash_bytes(format!("not a regular file: {:?}", metadata.file_type()).as_bytes())
  };

  Ok(Some(FileState {
    owner: user_name(metadata.uid()),
    group: group_name(metadata.gid()),
    mode: metadata.mode() & 0o7777,
    content,
  }))
}

fn render_file(file: &File, model: &Model) -> Result<Rendered, ManagerError> {
  let content = file
    .content
    .as_ref()
    .ok_or_else(|| ManagerError::invalid(file.id(), "file has no content"))?;
  let bytes = content.render(model).map_err(|source| ManagerError::Content {
    id: file.id(),
    source,
  })?;

  Ok(Rendered {
    path: file.filename.clone(),
    bytes,
    mode: file.mode(),
    owner: file.owner_name().to_string(),
    group: file.group.clone(),
  })
}

/// Expand a directory into the files of its source, sorted by path.
fn expand(dir: &Directory) -> Result<Vec<Rendered>, ManagerError> {
  let source = dir
    .source
    .as_ref()
    .ok_or_else(|| ManagerError::invalid(dir.id(), "directory has no source"))?;
  let mask = dir.effective_mask();
  let owner = dir.owner_name().to_string();
  let make = |relative: PathBuf, bytes: Vec<u8>, mode: u32| Rendered {
    path: dir.dirname.join(relative),
    bytes,
    mode: mode & 0o7777 & mask,
    owner: owner.clone(),
    group: None,
  };

  let mut files = Vec::new();
  match source {
    DirectorySource::Tree(root) => {
      for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| ManagerError::io(format!("failed to walk {}", root.display()), e.into()))?;
        if !entry.file_type().is_file() {
          continue;
        }
        let read_err = |e| ManagerError::io(format!("failed to read {}", entry.path().display()), e);
        let mode = entry.metadata().map_err(|e| read_err(e.into()))?.permissions().mode();
        let bytes = fs::read(entry.path()).map_err(read_err)?;
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path()).to_path_buf();
        files.push(make(relative, bytes, mode));
      }
    }
    DirectorySource::Zip(archive_path) => {
      let zip_err = |e: zip::result::ZipError| {
        ManagerError::io(format!("failed to read {}", archive_path.display()), io::Error::other(e))
      };
      let file = fs::File::open(archive_path)
        .map_err(|e| ManagerError::io(format!("failed to open {}", archive_path.display()), e))?;
      let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(zip_err)?;

      for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_err)?;
        if entry.is_dir() {
          continue;
        }
        let relative = entry
          .enclosed_name()
          .ok_or_else(|| ManagerError::invalid(dir.id(), format!("unsafe path in archive: {}", entry.name())))?;
        let mode = entry.unix_mode().unwrap_or(0o644);
        let mut bytes = Vec::new();
        entry
          .read_to_end(&mut bytes)
          .map_err(|e| ManagerError::io(format!("failed to extract {}", relative.display()), e))?;
        files.push(make(relative, bytes, mode));
      }
    }
  }
  files.sort_by(|a, b| a.path.cmp(&b.path));
  Ok(files)
}

#[derive(Serialize)]
struct DirectoryState {
  files: Vec<(PathBuf, Option<FileState>)>,
  leftovers: Vec<PathBuf>,
}

/// Manages `File` and `Directory` items.
pub struct FileManager {
  ledger: Ledger,
}

impl FileManager {
  pub fn new(ledger: Ledger) -> Self {
    Self { ledger }
  }

  /// Files a previous run wrote for `dir`.
  fn written(&self, dir: &ItemId) -> Result<Vec<PathBuf>, ManagerError> {
    Ok(
      self
        .ledger
        .store()
        .mapping::<Vec<PathBuf>>(DIRECTORY_FILES)
        .get(&dir.to_string())?
        .unwrap_or_default(),
    )
  }

  /// Previously written files of `dir` that `expanded` no longer contains and that still exist.
  fn leftovers(&self, dir: &Directory, expanded: &[Rendered]) -> Result<Vec<PathBuf>, ManagerError> {
    Ok(
      self
        .written(&dir.id())?
        .into_iter()
        .filter(|path| !expanded.iter().any(|f| &f.path == path))
        .filter(|path| path.exists())
        .collect(),
    )
  }

  fn directory_state(&self, dir: &Directory, expanded: &[Rendered], target: bool) -> Result<ItemState, ManagerError> {
    let files = expanded
      .iter()
      .map(|f| {
        let state = if target { Some(f.state()) } else { observe(&f.path)? };
        Ok((f.path.clone(), state))
      })
      .collect::<Result<Vec<_>, ManagerError>>()?;
    let leftovers = if target { Vec::new() } else { self.leftovers(dir, expanded)? };

    ItemState::of(&DirectoryState { files, leftovers }).map_err(|source| ManagerError::State { id: dir.id(), source })
  }

  fn plan_file(&self, file: &File, ctx: &Context<'_>) -> Result<Option<Action>, ManagerError> {
    let rendered = render_file(file, ctx.model)?;
    let current = observe(&rendered.path)?;
    let target = rendered.state();
    if current.as_ref() == Some(&target) {
      return Ok(None);
    }

    let id = file.id();
    let mode = ctx.model.confirm_mode_of(&id);
    let ledger = self.ledger.clone();
    let recorded = id.clone();
    let action = Action::new(format!("write {}", file.filename.display()), move || {
      rendered.write()?;
      ledger.record(&recorded, mode)?;
      Ok(())
    });

    Ok(Some(match current {
      None => action.installs([id]),
      Some(current) if current.content != target.content => {
        action.updates([id]).info(describe_change(&current, &target)).destructive()
      }
      Some(current) => action.updates([id]).info(describe_change(&current, &target)),
    }))
  }

  fn plan_directory(&self, dir: &Directory, ctx: &Context<'_>) -> Result<Option<Action>, ManagerError> {
    let expanded = expand(dir)?;
    let current = self.directory_state(dir, &expanded, false)?;
    let target = self.directory_state(dir, &expanded, true)?;
    if current == target {
      return Ok(None);
    }

    let id = dir.id();
    let present = dir.dirname.exists();
    let leftovers = self.leftovers(dir, &expanded)?;
    let observed = expanded
      .iter()
      .map(|f| Ok((f, observe(&f.path)?)))
      .collect::<Result<Vec<_>, ManagerError>>()?;
    let overwrites = observed
      .iter()
      .any(|(f, current)| current.as_ref().is_some_and(|c| c.content != f.state().content));
    let changed: Vec<Rendered> = observed
      .into_iter()
      .filter(|(f, current)| current.as_ref() != Some(&f.state()))
      .map(|(f, _)| f.clone())
      .collect();
    let paths: Vec<PathBuf> = expanded.iter().map(|f| f.path.clone()).collect();
    let info = format!("{} files written, {} removed", changed.len(), leftovers.len());
    let removes_files = !leftovers.is_empty();

    let mode = ctx.model.confirm_mode_of(&id);
    let ledger = self.ledger.clone();
    let recorded = id.clone();
    let action = Action::new(format!("write directory {}", dir.dirname.display()), move || {
      for file in &changed {
        file.write()?;
      }
      for path in &leftovers {
        remove_file(path)?;
      }
      ledger
        .store()
        .mapping::<Vec<PathBuf>>(DIRECTORY_FILES)
        .put(&recorded.to_string(), &paths)?;
      ledger.record(&recorded, mode)?;
      Ok(())
    })
    .info(info);

    Ok(Some(if !present {
      action.installs([id])
    } else if overwrites || removes_files {
      action.updates([id]).destructive()
    } else {
      action.updates([id])
    }))
  }
}

fn describe_change(current: &FileState, target: &FileState) -> String {
  let mut changes = Vec::new();
  if current.content != target.content {
    changes.push("content".to_string());
  }
  if current.mode != target.mode {
    changes.push(format!("mode {:o} -> {:o}", current.mode, target.mode));
  }
  if current.owner != target.owner || current.group != target.group {
    changes.push(format!(
      "owner {}:{} -> {}:{}",
      current.owner, current.group, target.owner, target.group
    ));
  }
  changes.join(", ")
}

fn remove_file(path: &Path) -> Result<(), ActionError> {
  match fs::remove_file(path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(ActionError::io(format!("failed to remove {}", path.display()), e)),
  }
}

/// Remove every empty directory under and including `root`.
fn prune_empty(root: &Path) {
  for entry in WalkDir::new(root).contents_first(true).into_iter().flatten() {
    if !entry.file_type().is_dir() {
      continue;
    }
    match fs::remove_dir(entry.path()) {
      Ok(()) => debug!(path = %entry.path().display(), "removed empty directory"),
      Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {}
      Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to remove directory"),
    }
  }
}

impl Manager for FileManager {
  fn name(&self) -> &str {
    "FileManager"
  }

  fn managed_kinds(&self) -> &[ItemKind] {
    &[ItemKind::File, ItemKind::Directory]
  }

  fn assert_installable(&self, item: &ConfigItem, _model: &Model) -> Result<(), ManagerError> {
    match item {
      ConfigItem::File(file) => {
        if !file.filename.is_absolute() {
          return Err(ManagerError::invalid(item.id(), "path must be absolute"));
        }
        if file.content.is_none() {
          return Err(ManagerError::invalid(item.id(), "file has no content"));
        }
        Ok(())
      }
      ConfigItem::Directory(dir) => {
        if !dir.dirname.is_absolute() {
          return Err(ManagerError::invalid(item.id(), "path must be absolute"));
        }
        match &dir.source {
          Some(source) if source.path().exists() => Ok(()),
          Some(source) => Err(ManagerError::invalid(
            item.id(),
            format!("source {} does not exist", source.path().display()),
          )),
          None => Err(ManagerError::invalid(item.id(), "directory has no source")),
        }
      }
      _ => Err(ManagerError::wrong_item(self.name(), item)),
    }
  }

  fn state_current(&self, item: &ConfigItem) -> Result<Option<ItemState>, ManagerError> {
    match item {
      ConfigItem::File(file) => observe(&file.filename)?
        .map(|state| ItemState::of(&state).map_err(|source| ManagerError::State { id: item.id(), source }))
        .transpose(),
      ConfigItem::Directory(dir) => {
        if !dir.dirname.exists() {
          return Ok(None);
        }
        let expanded = expand(dir)?;
        self.directory_state(dir, &expanded, false).map(Some)
      }
      _ => Err(ManagerError::wrong_item(self.name(), item)),
    }
  }

  fn state_target(&self, item: &ConfigItem, ctx: &Context<'_>) -> Result<Option<ItemState>, ManagerError> {
    match item {
      ConfigItem::File(file) => {
        let state = render_file(file, ctx.model)?.state();
        ItemState::of(&state)
          .map(Some)
          .map_err(|source| ManagerError::State { id: item.id(), source })
      }
      ConfigItem::Directory(dir) => {
        let expanded = expand(dir)?;
        self.directory_state(dir, &expanded, true).map(Some)
      }
      _ => Err(ManagerError::wrong_item(self.name(), item)),
    }
  }

  fn plan_install(&self, items: &[&ConfigItem], ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let mut actions = Vec::new();
    for item in items {
      let action = match item {
        ConfigItem::File(file) => self.plan_file(file, ctx)?,
        ConfigItem::Directory(dir) => self.plan_directory(dir, ctx)?,
        _ => return Err(ManagerError::wrong_item(self.name(), item)),
      };
      actions.extend(action);
    }
    Ok(actions)
  }

  fn plan_cleanup(&self, keep: &[&ConfigItem], _ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let mut actions = Vec::new();

    for (id, mode) in self.ledger.orphans(keep)? {
      let ledger = self.ledger.clone();
      let path = PathBuf::from(&id.key);
      let action = match id.kind {
        ItemKind::Directory => {
          let files = self.written(&id)?;
          let forgotten = id.clone();
          Action::new(format!("remove directory {}", path.display()), move || {
            for file in &files {
              remove_file(file)?;
            }
            prune_empty(&path);
            ledger
              .store()
              .mapping::<Vec<PathBuf>>(DIRECTORY_FILES)
              .remove(&forgotten.to_string())?;
            ledger.forget(&forgotten)?;
            Ok(())
          })
        }
        _ => {
          let forgotten = id.clone();
          Action::new(format!("remove {}", path.display()), move || {
            remove_file(&path)?;
            ledger.forget(&forgotten)?;
            Ok(())
          })
        }
      };
      actions.push(action.removes([id]).confirm_mode(mode));
    }

    Ok(actions)
  }

  fn finalize(&self, ctx: &Context<'_>) -> Result<(), ManagerError> {
    let declared = ctx.declared(self.managed_kinds());
    self.ledger.sync(&declared, ctx)?;
    if ctx.dryrun {
      return Ok(());
    }

    let files = self.ledger.store().mapping::<Vec<PathBuf>>(DIRECTORY_FILES);
    for item in declared {
      if let ConfigItem::Directory(dir) = item
        && files.get(&item.id().to_string())?.is_none()
      {
        let paths: Vec<PathBuf> = expand(dir)?.into_iter().map(|f| f.path).collect();
        files.put(&item.id().to_string(), &paths)?;
      }
    }
    Ok(())
  }
}
