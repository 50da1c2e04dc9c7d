// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod memory;

use crate::protos::label::LabelSet;
use ingest_common::singleton::LazySingleton;
use std::time::Duration;

// Opaque reference to a series, handed out by the storage engine on append.
pub type SeriesRef = u64;

//
// Appender
//

/// A write session against the storage engine. Points are appended one at a time. Durability,
/// batching and retry all belong to the implementation.
#[cfg_attr(test, mockall::automock)]
pub trait Appender: Send {
  // Append one point, returning a reference to the series it landed in.
  fn add(&mut self, labels: &LabelSet, timestamp_ms: i64, value: f64) -> anyhow::Result<SeriesRef>;

  // Append one point to a series previously returned by add().
  fn add_fast(
    &mut self,
    labels: &LabelSet,
    series_ref: SeriesRef,
    timestamp_ms: i64,
    value: f64,
  ) -> anyhow::Result<()>;

  // Block until appends issued so far are complete or the timeout expires. Returns the number of
  // appends still pending.
  fn wait_for_completion(&mut self, timeout: Duration) -> anyhow::Result<usize>;
}

//
// StorageBackend
//

// A connected storage engine. Created once per process and shared by every worker.
#[cfg_attr(test, mockall::automock)]
pub trait StorageBackend: Send + Sync {
  fn appender(&self) -> anyhow::Result<Box<dyn Appender>>;
}

pub type BackendSingleton = LazySingleton<dyn StorageBackend>;
