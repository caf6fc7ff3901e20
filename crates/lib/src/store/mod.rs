//! Persistent per-manager store.
//!
//! Each manager owns one JSON document under the cache directory and keeps in
//! it whatever it needs to find its own installations again on the next run:
//! the set of items it installed, and per-item policy such as the confirm mode
//! in effect when the item was last declared.
//!
//! # Layout
//!
//! ```text
//! {cache_dir}/
//! ├── FileManager.json      # {"installed": [...], "confirm_modes": {...}}
//! └── <Manager>.json
//! ```
//!
//! The top level of a document is a string-keyed object. Each key is either a
//! [`Mapping`] (a nested object) or a [`Collection`] (an array). The whole
//! document is rewritten atomically after every mutation, so a crash leaves
//! either the old or the new document on disk.

use std::cell::RefCell;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to read store {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("store {path} is not a JSON object: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to write store {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("store entry '{key}' has an unexpected shape: {source}")]
  Shape {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}

/// A file-backed string-keyed JSON document.
#[derive(Debug)]
pub struct JsonStore {
  path: PathBuf,
  data: RefCell<Map<String, Value>>,
}

impl JsonStore {
  /// Open the document of `name` in `dir`.
  ///
  /// A missing file is an empty store; nothing is created until the first
  /// mutation.
  pub fn open(dir: &Path, name: &str) -> Result<Self, StoreError> {
    let path = dir.join(format!("{}.json", name));

    let data = match fs::read_to_string(&path) {
      Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Parse {
        path: path.clone(),
        source,
      })?,
      Err(e) if e.kind() == io::ErrorKind::NotFound => Map::new(),
      Err(source) => return Err(StoreError::Read { path, source }),
    };

    Ok(Self {
      path,
      data: RefCell::new(data),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn mapping<V>(&self, key: &str) -> Mapping<'_, V> {
    Mapping {
      store: self,
      key: key.to_string(),
      _value: PhantomData,
    }
  }

  pub fn collection<T>(&self, key: &str) -> Collection<'_, T> {
    Collection {
      store: self,
      key: key.to_string(),
      _element: PhantomData,
    }
  }

  fn get(&self, key: &str) -> Option<Value> {
    self.data.borrow().get(key).cloned()
  }

  fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
    self.data.borrow_mut().insert(key.to_string(), value);
    self.save()
  }

  /// Write the whole document to a temporary file, then rename it into place.
  fn save(&self) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
      path: self.path.clone(),
      source,
    };

    if let Some(dir) = self.path.parent() {
      fs::create_dir_all(dir).map_err(write_err)?;
    }

    let temp_path = self.path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(&*self.data.borrow()).map_err(|e| write_err(io::Error::other(e)))?;
    fs::write(&temp_path, content).map_err(write_err)?;
    fs::rename(&temp_path, &self.path).map_err(write_err)?;

    debug!(path = %self.path.display(), "store saved");
    Ok(())
  }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, StoreError> {
  serde_json::from_value(value).map_err(|source| StoreError::Shape {
    key: key.to_string(),
    source,
  })
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Value, StoreError> {
  serde_json::to_value(value).map_err(|source| StoreError::Shape {
    key: key.to_string(),
    source,
  })
}

/// String-keyed map view of one store entry.
pub struct Mapping<'a, V> {
  store: &'a JsonStore,
  key: String,
  _value: PhantomData<V>,
}

impl<V: Serialize + DeserializeOwned> Mapping<'_, V> {
  fn load(&self) -> Result<Map<String, Value>, StoreError> {
    match self.store.get(&self.key) {
      Some(value) => decode(&self.key, value),
      None => Ok(Map::new()),
    }
  }

  pub fn get(&self, key: &str) -> Result<Option<V>, StoreError> {
    match self.load()?.remove(key) {
      Some(value) => decode(&self.key, value).map(Some),
      None => Ok(None),
    }
  }

  pub fn put(&self, key: &str, value: &V) -> Result<(), StoreError> {
    let mut map = self.load()?;
    map.insert(key.to_string(), encode(&self.key, value)?);
    self.store.set(&self.key, Value::Object(map))
  }

  pub fn remove(&self, key: &str) -> Result<Option<V>, StoreError> {
    let mut map = self.load()?;
    let Some(old) = map.remove(key) else {
      return Ok(None);
    };
    self.store.set(&self.key, Value::Object(map))?;
    decode(&self.key, old).map(Some)
  }

  pub fn keys(&self) -> Result<Vec<String>, StoreError> {
    Ok(self.load()?.keys().cloned().collect())
  }
}

/// Ordered set view of one store entry.
pub struct Collection<'a, T> {
  store: &'a JsonStore,
  key: String,
  _element: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned + PartialEq> Collection<'_, T> {
  pub fn elements(&self) -> Result<Vec<T>, StoreError> {
    match self.store.get(&self.key) {
      Some(value) => decode(&self.key, value),
      None => Ok(Vec::new()),
    }
  }

  pub fn contains(&self, element: &T) -> Result<bool, StoreError> {
    Ok(self.elements()?.contains(element))
  }

  pub fn add(&self, element: T) -> Result<(), StoreError> {
    self.add_all([element])
  }

  pub fn add_all<I>(&self, elements: I) -> Result<(), StoreError>
  where
    I: IntoIterator<Item = T>,
  {
    let mut current = self.elements()?;
    let before = current.len();
    for element in elements {
      if !current.contains(&element) {
        current.push(element);
      }
    }
    if current.len() == before && self.store.get(&self.key).is_some() {
      return Ok(());
    }
    self.write(&current)
  }

  pub fn remove(&self, element: &T) -> Result<(), StoreError> {
    self.remove_all(std::slice::from_ref(element))
  }

  pub fn remove_all(&self, elements: &[T]) -> Result<(), StoreError> {
    let mut current = self.elements()?;
    let before = current.len();
    current.retain(|e| !elements.contains(e));
    if current.len() == before {
      return Ok(());
    }
    self.write(&current)
  }

  pub fn replace_all<I>(&self, elements: I) -> Result<(), StoreError>
  where
    I: IntoIterator<Item = T>,
  {
    let mut next: Vec<T> = Vec::new();
    for element in elements {
      if !next.contains(&element) {
        next.push(element);
      }
    }
    self.write(&next)
  }

  fn write(&self, elements: &[T]) -> Result<(), StoreError> {
    let value = encode(&self.key, elements)?;
    self.store.set(&self.key, value)
  }
}
