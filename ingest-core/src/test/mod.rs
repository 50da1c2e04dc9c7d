// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::pipeline::time::TestTimeProvider;
use crate::pipeline::{IngestHandler, Worker};
use crate::protos::Protocol;
use crate::protos::label::{Label, LabelSet};
use crate::storage::memory::MemoryStorage;
use crate::storage::{BackendSingleton, StorageBackend};
use bd_server_stats::stats::Collector;
use std::sync::Arc;

pub const BATCH_EXAMPLE: &str = r#"{
  "Metric": "cpu",
  "Labels": {
    "dc": "7",
    "hostname": "mybesthost"
  },
  "Samples": [
    {
      "Time": "1532595945142",
      "Value": {
        "N": 95.2
      }
    },
    {
      "Time": "1532595948517",
      "Value": {
        "N": 86.8
      }
    }
  ]
}"#;

#[must_use]
pub fn make_labels(labels: &[(&str, &str)]) -> LabelSet {
  LabelSet::from_labels(
    labels
      .iter()
      .map(|(name, value)| Label::new(*name, *value))
      .collect(),
  )
}

//
// HandlerHelper
//

// A handler wired to in-memory storage and a pinned clock.
pub struct HandlerHelper {
  pub collector: Collector,
  pub handler: IngestHandler,
  pub storage: MemoryStorage,
  pub backend: BackendSingleton,
  pub time_provider: Arc<TestTimeProvider>,
}

impl HandlerHelper {
  #[must_use]
  pub fn new(protocol: Protocol, now_ms: i64) -> Self {
    let collector = Collector::default();
    let time_provider = Arc::new(TestTimeProvider::new(now_ms));
    let handler = IngestHandler::new(
      protocol,
      time_provider.clone(),
      &collector.scope("test"),
    );
    Self {
      collector,
      handler,
      storage: MemoryStorage::new(),
      backend: BackendSingleton::new(),
      time_provider,
    }
  }

  pub fn worker(&self) -> Worker {
    let storage = self.storage.clone();
    self
      .handler
      .new_worker(&self.backend, || {
        Ok(Arc::new(storage) as Arc<dyn StorageBackend>)
      })
      .unwrap()
  }
}
