// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod config;

#[cfg(test)]
mod test;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bd_log::warn_every;
use bd_server_stats::stats::Collector;
use bd_shutdown::{ComponentShutdown, ComponentShutdownTrigger};
use bytes::Bytes;
use config::{Config, HEALTHCHECK_PATH, METRICS_PATH, StorageConfig, StorageType};
use ingest_core::pipeline::time::{RealTimeProvider, TimeProvider};
use ingest_core::pipeline::{CONTENT_TYPE, IngestError, IngestHandler, Worker};
use ingest_core::storage::memory::MemoryStorage;
use ingest_core::storage::{BackendSingleton, StorageBackend};
use log::info;
use parking_lot::Mutex;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use time::ext::NumericalDuration;
use tokio::net::TcpListener;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  use ingest_common::global_initialize;

  global_initialize();
}

pub type BackendFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn StorageBackend>> + Send + Sync>;

// Build the configured storage backend. Connection configuration is passed through unchanged.
pub fn make_backend(storage: &StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
  match storage.storage_type {
    StorageType::Memory => {
      if !storage.connection.is_empty() {
        log::warn!(
          "memory storage ignores {} connection setting(s)",
          storage.connection.len()
        );
      }
      info!("using in-memory storage");
      Ok(Arc::new(MemoryStorage::new()))
    },
  }
}

fn make_text_response(status: StatusCode, body: String) -> Response {
  (status, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}

//
// ServerState
//

struct ServerState {
  handler: IngestHandler,
  backend: BackendSingleton,
  make_backend: BackendFactory,
  // Idle workers. An invocation takes one out for its whole duration so no two invocations ever
  // share an appender or a label scratch buffer.
  workers: Mutex<Vec<Worker>>,
  collector: Collector,
}

impl ServerState {
  fn take_worker(&self) -> Result<Worker, IngestError> {
    if let Some(worker) = self.workers.lock().pop() {
      return Ok(worker);
    }
    self
      .handler
      .new_worker(&self.backend, || (self.make_backend)())
  }

  fn invoke(&self, body: &[u8]) -> Result<ingest_core::pipeline::Response, IngestError> {
    let mut worker = self.take_worker()?;
    let result = self.handler.handle(&mut worker, body);
    self.workers.lock().push(worker);
    result
  }

  fn flush_workers(&self, timeout: Duration) {
    let mut workers = std::mem::take(&mut *self.workers.lock());
    for worker in &mut workers {
      match worker.wait_for_completion(timeout) {
        Ok(0) => {},
        Ok(pending) => log::warn!("{pending} append(s) still pending after {timeout:?}"),
        Err(e) => log::warn!("failed to flush appender: {e}"),
      }
    }
    info!("flushed {} worker(s)", workers.len());
  }
}

async fn ingest_handler(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
  let result = tokio::task::spawn_blocking(move || state.invoke(&body)).await;
  match result {
    Ok(Ok(response)) => make_text_response(response.status, response.body),
    Ok(Err(e)) => {
      warn_every!(1.minutes(), "ingest invocation failed: {}", e);
      make_text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    },
    Err(e) => {
      log::error!("ingest invocation did not complete: {e}");
      make_text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    },
  }
}

#[allow(clippy::unused_async)]
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> Response {
  (
    [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
    state.collector.prometheus_output(),
  )
    .into_response()
}

//
// Server
//

pub struct Server {
  listener: TcpListener,
  router: Router,
  state: Arc<ServerState>,
  append_flush_timeout: Duration,
}

impl Server {
  pub async fn bind(
    config: &Config,
    collector: Collector,
    make_backend: BackendFactory,
    time_provider: Arc<dyn TimeProvider>,
  ) -> anyhow::Result<Self> {
    let handler = IngestHandler::new(
      config.protocol,
      time_provider,
      &collector.scope("ingest_server"),
    );
    let state = Arc::new(ServerState {
      handler,
      backend: BackendSingleton::new(),
      make_backend,
      workers: Mutex::default(),
      collector,
    });
    let router = Router::new()
      .route(&config.path, post(ingest_handler))
      .route(HEALTHCHECK_PATH, get(|| async { "OK" }))
      .route(METRICS_PATH, get(metrics_handler))
      .with_state(state.clone());
    let listener = TcpListener::bind(&config.bind).await?;

    Ok(Self {
      listener,
      router,
      state,
      append_flush_timeout: config.append_flush_timeout,
    })
  }

  pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
    Ok(self.listener.local_addr()?)
  }

  /// Serve until `shutdown` fires, then wait for in-flight appends of every worker to complete.
  pub async fn serve(self, mut shutdown: ComponentShutdown) -> anyhow::Result<()> {
    axum::serve(self.listener, self.router.into_make_service())
      .with_graceful_shutdown(async move {
        shutdown.cancelled().await;
      })
      .await?;

    let state = self.state;
    let timeout = self.append_flush_timeout;
    tokio::task::spawn_blocking(move || state.flush_workers(timeout)).await?;
    Ok(())
  }
}

pub async fn run_server<ShutdownFuture: Future<Output = ()>>(
  config: Config,
  config_check_only: bool,
  shutdown: impl FnOnce() -> ShutdownFuture,
  shutdown_delay: Duration,
) -> anyhow::Result<()> {
  let storage = config.storage.clone();
  let backend_factory: BackendFactory = Arc::new(move || make_backend(&storage));

  if config_check_only {
    backend_factory()?;
    info!("--config-check-and-exit set, exiting");
    return Ok(());
  }

  let server = Server::bind(
    &config,
    Collector::default(),
    backend_factory,
    Arc::new(RealTimeProvider {}),
  )
  .await?;
  info!(
    "ingest server listening on {} (POST {})",
    server.local_addr()?,
    config.path
  );

  let shutdown_trigger = ComponentShutdownTrigger::default();
  let server_task = tokio::spawn(server.serve(shutdown_trigger.make_shutdown()));

  shutdown().await;

  if !shutdown_delay.is_zero() {
    info!(
      "waiting {:?} before shutting down (--shutdown-delay set)",
      shutdown_delay
    );
    tokio::time::sleep(shutdown_delay).await;
  }
  shutdown_trigger.shutdown().await;
  server_task.await??;
  info!("runtime terminated");
  Ok(())
}
