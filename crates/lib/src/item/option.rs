//! Multi-valued options.
//!
//! An option is an unmanaged item that only carries values. Every declaration
//! of the same option contributes its values; merging concatenates them in
//! section order. Other items read options from the model, typically inside a
//! file content producer.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use super::{ItemId, ItemMeta, MergeConflict};

#[derive(Debug, Error)]
pub enum OptionError {
  #[error("option '{name}' has a value that is not of the requested type: {source}")]
  Type {
    name: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("option '{name}' has {count} distinct values, expected at most one")]
  Ambiguous { name: String, count: usize },

  #[error("option '{name}' has no value")]
  Missing { name: String },

  #[error("option value is not serializable: {0}")]
  Value(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct OptionItem {
  pub name: String,
  pub values: Vec<Value>,
  pub meta: ItemMeta,
}

impl OptionItem {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      values: Vec::new(),
      meta: ItemMeta::default(),
    }
  }

  /// Add one value.
  pub fn value(mut self, value: impl Into<Value>) -> Self {
    self.values.push(value.into());
    self
  }

  /// Add every value of an iterator.
  pub fn values<I, V>(mut self, values: I) -> Self
  where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
  {
    self.values.extend(values.into_iter().map(Into::into));
    self
  }

  /// Add a value of any serializable type.
  pub fn serialized<T: Serialize>(mut self, value: &T) -> Result<Self, OptionError> {
    self.values.push(serde_json::to_value(value)?);
    Ok(self)
  }

  pub fn id(&self) -> ItemId {
    ItemId::option(&self.name)
  }

  pub(crate) fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
    let mut values = self.values.clone();
    values.extend(other.values.iter().cloned());
    Ok(Self {
      name: self.name.clone(),
      values,
      meta: ItemMeta::default(),
    })
  }

  /// Deserialize every value into `T`.
  pub fn typed<T: DeserializeOwned>(&self) -> Result<OptionValues<T>, OptionError> {
    let values = self
      .values
      .iter()
      .map(|v| serde_json::from_value(v.clone()))
      .collect::<Result<Vec<T>, _>>()
      .map_err(|source| OptionError::Type {
        name: self.name.clone(),
        source,
      })?;
    Ok(OptionValues {
      name: self.name.clone(),
      values,
    })
  }
}

/// Typed view over the merged values of an option.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionValues<T> {
  name: String,
  values: Vec<T>,
}

impl<T> OptionValues<T> {
  /// Values of an option nobody declared.
  pub fn empty(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      values: Vec::new(),
    }
  }

  /// All values in declaration order, duplicates included.
  pub fn values(&self) -> &[T] {
    &self.values
  }

  pub fn into_values(self) -> Vec<T> {
    self.values
  }
}

impl<T: Clone + PartialEq> OptionValues<T> {
  /// Values with duplicates removed, in first-seen order.
  pub fn distinct(&self) -> Vec<T> {
    let mut seen: Vec<T> = Vec::new();
    for value in &self.values {
      if !seen.contains(value) {
        seen.push(value.clone());
      }
    }
    seen
  }

  /// The value, if every declaration agrees on at most one.
  pub fn optional(&self) -> Result<Option<T>, OptionError> {
    let mut distinct = self.distinct();
    match distinct.len() {
      0 => Ok(None),
      1 => Ok(distinct.pop()),
      count => Err(OptionError::Ambiguous {
        name: self.name.clone(),
        count,
      }),
    }
  }

  /// The value, which must be declared and unique.
  pub fn single(&self) -> Result<T, OptionError> {
    self.optional()?.ok_or_else(|| OptionError::Missing {
      name: self.name.clone(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;
  use serde_json::json;

  #[test]
  fn merge_concatenates_in_order() {
    let a = OptionItem::new("noextract").value("a");
    let b = OptionItem::new("noextract").values(["b", "a"]);
    let merged = a.merge(&b).unwrap();
    assert_eq!(merged.values, vec![json!("a"), json!("b"), json!("a")]);

    let typed = merged.typed::<String>().unwrap();
    assert_eq!(typed.values(), ["a", "b", "a"]);
    assert_eq!(typed.distinct(), ["a", "b"]);
  }

  #[test]
  fn optional_and_single() {
    let one = OptionItem::new("x").values([1, 1]).typed::<u32>().unwrap();
    assert_eq!(one.optional().unwrap(), Some(1));
    assert_eq!(one.single().unwrap(), 1);

    let none = OptionValues::<u32>::empty("x");
    assert_eq!(none.optional().unwrap(), None);
    assert!(matches!(none.single(), Err(OptionError::Missing { .. })));

    let two = OptionItem::new("x").values([1, 2]).typed::<u32>().unwrap();
    assert!(matches!(two.optional(), Err(OptionError::Ambiguous { count: 2, .. })));
  }

  #[test]
  fn wrong_type_is_reported() {
    let item = OptionItem::new("x").value("not a number");
    assert!(matches!(item.typed::<u32>(), Err(OptionError::Type { .. })));
  }

  #[test]
  fn structured_values() {
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Mirror {
      url: String,
      weight: u32,
    }

    let mirror = Mirror {
      url: "https://mirror.example".into(),
      weight: 3,
    };
    let item = OptionItem::new("mirrors").serialized(&mirror).unwrap();
    assert_eq!(item.typed::<Mirror>().unwrap().single().unwrap(), mirror);
  }
}
