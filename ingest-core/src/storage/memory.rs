// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./memory_test.rs"]
mod memory_test;

use super::{Appender, SeriesRef, StorageBackend};
use crate::pipeline::dispatch::Sample;
use crate::protos::label::LabelSet;
use anyhow::bail;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Inner {
  series: Vec<(LabelSet, Vec<Sample>)>,
  index: HashMap<LabelSet, SeriesRef>,
}

impl Inner {
  fn append(&mut self, labels: &LabelSet, sample: Sample) -> SeriesRef {
    let series_ref = if let Some(series_ref) = self.index.get(labels) {
      *series_ref
    } else {
      let series_ref = self.series.len() as SeriesRef;
      self.series.push((labels.clone(), Vec::new()));
      self.index.insert(labels.clone(), series_ref);
      series_ref
    };
    self.series[series_ref as usize].1.push(sample);
    series_ref
  }
}

//
// MemoryStorage
//

/// Storage engine that keeps every series in memory, keyed by its canonical label set. Series
/// references are indices in creation order. Used for tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryStorage {
  inner: Arc<Mutex<Inner>>,
}

impl MemoryStorage {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  // Samples for a series in append order.
  pub fn samples(&self, labels: &LabelSet) -> Option<Vec<Sample>> {
    let inner = self.inner.lock();
    inner
      .index
      .get(labels)
      .map(|series_ref| inner.series[*series_ref as usize].1.clone())
  }

  pub fn series_count(&self) -> usize {
    self.inner.lock().series.len()
  }

  pub fn sample_count(&self) -> usize {
    self.inner.lock().series.iter().map(|(_, s)| s.len()).sum()
  }
}

impl StorageBackend for MemoryStorage {
  fn appender(&self) -> anyhow::Result<Box<dyn Appender>> {
    Ok(Box::new(MemoryAppender {
      inner: self.inner.clone(),
    }))
  }
}

//
// MemoryAppender
//

struct MemoryAppender {
  inner: Arc<Mutex<Inner>>,
}

impl Appender for MemoryAppender {
  fn add(
    &mut self,
    labels: &LabelSet,
    timestamp_ms: i64,
    value: f64,
  ) -> anyhow::Result<SeriesRef> {
    Ok(self.inner.lock().append(
      labels,
      Sample {
        timestamp_ms,
        value,
      },
    ))
  }

  fn add_fast(
    &mut self,
    labels: &LabelSet,
    series_ref: SeriesRef,
    timestamp_ms: i64,
    value: f64,
  ) -> anyhow::Result<()> {
    let mut inner = self.inner.lock();
    let Some((series_labels, samples)) = inner.series.get_mut(series_ref as usize) else {
      bail!("unknown series ref {series_ref}");
    };
    if series_labels != labels {
      bail!("series ref {series_ref} does not belong to {labels}");
    }
    samples.push(Sample {
      timestamp_ms,
      value,
    });
    Ok(())
  }

  fn wait_for_completion(&mut self, _timeout: Duration) -> anyhow::Result<usize> {
    Ok(0)
  }
}
