// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./label_test.rs"]
mod label_test;

use std::fmt::Display;

// Reserved label carrying the metric name on the line protocol path.
pub const METRIC_NAME_LABEL: &str = "__name__";

//
// Label
//

// A single (name, value) pair identifying part of a series.
#[derive(PartialOrd, Eq, Ord, Debug, Clone, PartialEq, Hash, Default)]
pub struct Label {
  pub name: String,
  pub value: String,
}

impl Label {
  pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      value: value.into(),
    }
  }

  fn overwrite(&mut self, name: &str, value: &str) {
    self.name.clear();
    self.name.push_str(name);
    self.value.clear();
    self.value.push_str(value);
  }
}

impl Display for Label {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}={}", self.name, self.value)
  }
}

//
// LabelSet
//

/// An ordered label sequence that identifies one series. Labels are sorted by name (byte-wise) and
/// names are unique. When a name repeats in the input, the first occurrence wins.
///
/// A `LabelSet` can also be used as reusable scratch space. [`LabelSet::fill_from_map`] overwrites
/// the existing entries in place and only allocates when the new input has more labels than any
/// previous one.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct LabelSet {
  labels: Vec<Label>,
}

impl LabelSet {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      labels: Vec::with_capacity(capacity),
    }
  }

  // Build a canonical set from labels in arbitrary order.
  #[must_use]
  pub fn from_labels(labels: Vec<Label>) -> Self {
    let mut set = Self { labels };
    set.canonicalize();
    set
  }

  /// Replace the contents of this set with the given name/value pairs and canonicalize. The
  /// backing buffer is truncated to exactly the number of pairs, so entries from a previous,
  /// larger input never leak into the result.
  pub fn fill_from_map<K: AsRef<str>, V: AsRef<str>>(
    &mut self,
    pairs: impl IntoIterator<Item = (K, V)>,
  ) {
    let mut filled = 0;
    for (name, value) in pairs {
      if let Some(label) = self.labels.get_mut(filled) {
        label.overwrite(name.as_ref(), value.as_ref());
      } else {
        self.labels.push(Label::new(name.as_ref(), value.as_ref()));
      }
      filled += 1;
    }
    self.labels.truncate(filled);
    self.canonicalize();
  }

  fn canonicalize(&mut self) {
    // Stable so that dedup below keeps the first occurrence of a name.
    self.labels.sort_by(|lhs, rhs| lhs.name.cmp(&rhs.name));
    self.labels.dedup_by(|current, kept| current.name == kept.name);
  }

  pub fn labels(&self) -> &[Label] {
    &self.labels
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .labels
      .binary_search_by(|l| l.name.as_str().cmp(name))
      .ok()
      .map(|i| self.labels[i].value.as_str())
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Label> {
    self.labels.iter()
  }

  pub fn capacity(&self) -> usize {
    self.labels.capacity()
  }
}

impl<'a> IntoIterator for &'a LabelSet {
  type Item = &'a Label;
  type IntoIter = std::slice::Iter<'a, Label>;

  fn into_iter(self) -> Self::IntoIter {
    self.labels.iter()
  }
}

impl Display for LabelSet {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{{")?;
    for (i, label) in self.labels.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{label}")?;
    }
    write!(f, "}}")
  }
}
