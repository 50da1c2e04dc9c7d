// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./singleton_test.rs"]
mod singleton_test;

use parking_lot::RwLock;
use std::sync::Arc;

//
// LazySingleton
//

/// Holds a value that is built lazily, at most once, and then shared by every caller. Callers only
/// ever see a get-or-create operation. Once the value exists, lookups only take the read lock.
///
/// A failed construction leaves the slot empty so the next caller retries. The lock never stays
/// poisoned, even when the init function panics.
pub struct LazySingleton<T: ?Sized> {
  slot: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> Default for LazySingleton<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: ?Sized> LazySingleton<T> {
  #[must_use]
  pub const fn new() -> Self {
    Self {
      slot: RwLock::new(None),
    }
  }

  /// Returns the value if it has already been created.
  pub fn get(&self) -> Option<Arc<T>> {
    self.slot.read().clone()
  }

  pub fn get_or_try_init<E>(
    &self,
    init_func: impl FnOnce() -> Result<Arc<T>, E>,
  ) -> Result<Arc<T>, E> {
    if let Some(existing) = self.slot.read().as_ref() {
      return Ok(existing.clone());
    }

    let mut slot = self.slot.write();
    // Another caller may have won the race between dropping the read lock and taking the write
    // lock.
    if let Some(existing) = slot.as_ref() {
      return Ok(existing.clone());
    }

    let created = init_func()?;
    *slot = Some(created.clone());
    Ok(created)
  }

  /// Drops the held value. The next get-or-create call builds a new one.
  pub fn reset(&self) -> Option<Arc<T>> {
    self.slot.write().take()
  }
}
