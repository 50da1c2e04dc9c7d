// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::config::{self, Config};
use crate::{BackendFactory, Server, run_server};
use anyhow::{anyhow, bail};
use bd_server_stats::stats::Collector;
use bd_shutdown::ComponentShutdownTrigger;
use ingest_core::pipeline::time::TestTimeProvider;
use ingest_core::protos::label::{Label, LabelSet};
use ingest_core::storage::memory::MemoryStorage;
use ingest_core::storage::{Appender, SeriesRef, StorageBackend};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

const NOW_MS: i64 = 1_700_000_000_000;

fn make_labels(labels: &[(&str, &str)]) -> LabelSet {
  LabelSet::from_labels(
    labels
      .iter()
      .map(|(name, value)| Label::new(*name, *value))
      .collect(),
  )
}

fn test_config() -> Config {
  config::load_from_str(
    r"
bind: 127.0.0.1:0
storage:
  type: memory
",
  )
  .unwrap()
}

fn memory_factory(storage: &MemoryStorage) -> BackendFactory {
  let storage = storage.clone();
  Arc::new(move || Ok(Arc::new(storage.clone()) as Arc<dyn StorageBackend>))
}

//
// FailingStorage
//

// Accepts `accepted` appends over its lifetime and fails every one after that.
struct FailingStorage {
  accepted: usize,
  calls: Arc<AtomicUsize>,
}

struct FailingAppender {
  accepted: usize,
  calls: Arc<AtomicUsize>,
}

impl StorageBackend for FailingStorage {
  fn appender(&self) -> anyhow::Result<Box<dyn Appender>> {
    Ok(Box::new(FailingAppender {
      accepted: self.accepted,
      calls: self.calls.clone(),
    }))
  }
}

impl Appender for FailingAppender {
  fn add(
    &mut self,
    _labels: &LabelSet,
    _timestamp_ms: i64,
    _value: f64,
  ) -> anyhow::Result<SeriesRef> {
    if self.calls.fetch_add(1, Ordering::SeqCst) >= self.accepted {
      bail!("storage unavailable");
    }
    Ok(0)
  }

  fn add_fast(
    &mut self,
    _labels: &LabelSet,
    _series_ref: SeriesRef,
    _timestamp_ms: i64,
    _value: f64,
  ) -> anyhow::Result<()> {
    unimplemented!()
  }

  fn wait_for_completion(&mut self, _timeout: Duration) -> anyhow::Result<usize> {
    Ok(0)
  }
}

//
// Helper
//

struct Helper {
  address: SocketAddr,
  client: reqwest::Client,
  collector: Collector,
  shutdown_trigger: ComponentShutdownTrigger,
  server_task: JoinHandle<anyhow::Result<()>>,
}

impl Helper {
  async fn new(config: &Config, make_backend: BackendFactory) -> Self {
    let collector = Collector::default();
    let server = Server::bind(
      config,
      collector.clone(),
      make_backend,
      Arc::new(TestTimeProvider::new(NOW_MS)),
    )
    .await
    .unwrap();
    let address = server.local_addr().unwrap();
    let shutdown_trigger = ComponentShutdownTrigger::default();
    let server_task = tokio::spawn(server.serve(shutdown_trigger.make_shutdown()));

    Self {
      address,
      client: reqwest::Client::new(),
      collector,
      shutdown_trigger,
      server_task,
    }
  }

  async fn post(&self, path: &str, body: &'static str) -> (StatusCode, String) {
    let response = self
      .client
      .post(format!("http://{}{path}", self.address))
      .body(body)
      .send()
      .await
      .unwrap();
    let status = response.status();
    (status, response.text().await.unwrap())
  }

  async fn get(&self, path: &str) -> (StatusCode, String) {
    let response = self
      .client
      .get(format!("http://{}{path}", self.address))
      .send()
      .await
      .unwrap();
    let status = response.status();
    (status, response.text().await.unwrap())
  }

  async fn shutdown(self) {
    // Close pooled keep-alive connections so the graceful shutdown does not wait on them.
    drop(self.client);
    self.shutdown_trigger.shutdown().await;
    self.server_task.await.unwrap().unwrap();
  }
}

#[tokio::test]
async fn line_and_batch() {
  let storage = MemoryStorage::new();
  let helper = Helper::new(&test_config(), memory_factory(&storage)).await;

  assert_eq!(
    (StatusCode::OK, String::new()),
    helper
      .post("/ingest", "cpu 1532595945 95.2 dc=7 hostname=mybesthost")
      .await
  );
  assert_eq!(
    (StatusCode::OK, String::new()),
    helper
      .post(
        "/ingest",
        r#"{"Metric": "cpu", "Labels": {"dc": "7", "hostname": "mybesthost"},
            "Samples": [{"Time": "1532595945142", "Value": {"N": 95.2}},
                        {"Time": "1532595948517", "Value": {"N": 86.8}}]}"#,
      )
      .await
  );

  assert_eq!(2, storage.series_count());
  assert_eq!(
    1,
    storage
      .samples(&make_labels(&[
        ("__name__", "cpu"),
        ("dc", "7"),
        ("hostname", "mybesthost"),
      ]))
      .unwrap()
      .len()
  );
  assert_eq!(
    2,
    storage
      .samples(&make_labels(&[("dc", "7"), ("hostname", "mybesthost")]))
      .unwrap()
      .len()
  );

  helper.shutdown().await;
}

#[tokio::test]
async fn malformed_body() {
  let storage = MemoryStorage::new();
  let helper = Helper::new(&test_config(), memory_factory(&storage)).await;

  let response = helper
    .client
    .post(format!("http://{}/ingest", helper.address))
    .body("cpu 1532595945")
    .send()
    .await
    .unwrap();
  assert_eq!(StatusCode::BAD_REQUEST, response.status());
  assert_eq!(
    Some("application/text"),
    response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|value| value.to_str().ok())
  );
  assert_eq!("Not enough columns", response.text().await.unwrap());

  assert_eq!(
    (
      StatusCode::BAD_REQUEST,
      "Failed to parse time: later: not a recognized time expression".to_string()
    ),
    helper
      .post(
        "/ingest",
        r#"{"Metric": "m", "Samples": [{"Time": "later", "Value": {"N": 1}}]}"#
      )
      .await
  );
  assert_eq!(0, storage.sample_count());

  helper.shutdown().await;
}

#[tokio::test]
async fn append_failure_is_server_error() {
  let calls = Arc::new(AtomicUsize::new(0));
  let cloned_calls = calls.clone();
  let helper = Helper::new(
    &test_config(),
    Arc::new(move || {
      Ok(Arc::new(FailingStorage {
        accepted: 1,
        calls: cloned_calls.clone(),
      }) as Arc<dyn StorageBackend>)
    }),
  )
  .await;

  assert_eq!(
    (
      StatusCode::INTERNAL_SERVER_ERROR,
      "storage unavailable".to_string()
    ),
    helper
      .post(
        "/ingest",
        r#"{"Metric": "m", "Samples": [
          {"Time": "1", "Value": {"N": 1}},
          {"Time": "2", "Value": {"N": 2}},
          {"Time": "3", "Value": {"N": 3}}
        ]}"#
      )
      .await
  );
  // The first sample was accepted, the second failed, the third was never attempted.
  assert_eq!(2, calls.load(Ordering::SeqCst));

  helper.shutdown().await;
}

#[tokio::test]
async fn initialization_failure_retries() {
  let storage = MemoryStorage::new();
  let attempts = Arc::new(AtomicUsize::new(0));
  let cloned_attempts = attempts.clone();
  let cloned_storage = storage.clone();
  let helper = Helper::new(
    &test_config(),
    Arc::new(move || {
      if cloned_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
        return Err(anyhow!("storage offline"));
      }
      Ok(Arc::new(cloned_storage.clone()) as Arc<dyn StorageBackend>)
    }),
  )
  .await;

  assert_eq!(
    (
      StatusCode::INTERNAL_SERVER_ERROR,
      "storage offline".to_string()
    ),
    helper.post("/ingest", "up 1 1").await
  );
  assert_eq!(
    (StatusCode::OK, String::new()),
    helper.post("/ingest", "up 2 1").await
  );
  assert_eq!(
    (StatusCode::OK, String::new()),
    helper.post("/ingest", "up 3 1").await
  );
  // The backend is built once and then shared.
  assert_eq!(2, attempts.load(Ordering::SeqCst));
  assert_eq!(2, storage.sample_count());

  helper.shutdown().await;
}

#[tokio::test]
async fn admin_routes() {
  let storage = MemoryStorage::new();
  let mut config = test_config();
  config.path = "/write".to_string();
  let helper = Helper::new(&config, memory_factory(&storage)).await;

  assert_eq!(
    (StatusCode::OK, "OK".to_string()),
    helper.get("/healthcheck").await
  );
  assert_eq!(
    StatusCode::NOT_FOUND,
    helper.post("/ingest", "up 1 1").await.0
  );
  assert_eq!(StatusCode::OK, helper.post("/write", "up 1 1").await.0);
  assert_eq!(
    StatusCode::BAD_REQUEST,
    helper.post("/write", "up").await.0
  );

  let (status, body) = helper.get("/metrics").await;
  assert_eq!(StatusCode::OK, status);
  assert!(body.contains("requests_total"), "{body}");
  assert!(body.contains("requests_4xx"), "{body}");
  assert!(!helper.collector.prometheus_output().is_empty());

  helper.shutdown().await;
}

#[tokio::test]
async fn check_config_only() {
  run_server(test_config(), true, || async {}, Duration::ZERO)
    .await
    .unwrap();
}

#[tokio::test]
async fn run_until_shutdown() {
  run_server(test_config(), false, || async {}, Duration::ZERO)
    .await
    .unwrap();
}
