// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


pub mod dispatch;
pub mod time;

use self::dispatch::{DispatchError, Sample, dispatch};
use self::time::{TimeExpressionError, TimeProvider, resolve_time_expression};
use crate::protos::Protocol;
use crate::protos::batch::BatchRequest;
use crate::protos::label::LabelSet;
use crate::protos::line;
use crate::storage::{Appender, BackendSingleton, StorageBackend};
use bd_log::warn_every;
use bd_server_stats::stats::Scope;
use http::StatusCode;
use prometheus::IntCounter;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use ::time::ext::NumericalDuration;

pub const CONTENT_TYPE: &str = "application/text";

//
// Stats
//

#[derive(Clone)]
pub struct Stats {
  pub requests_total: IntCounter,
  pub requests_4xx: IntCounter,
  pub samples_appended: IntCounter,
  pub append_failures: IntCounter,
  pub init_failures: IntCounter,
}

impl Stats {
  pub fn new(scope: &Scope) -> Self {
    let scope = scope.scope("ingest");
    Self {
      requests_total: scope.counter("requests_total"),
      requests_4xx: scope.counter("requests_4xx"),
      samples_appended: scope.counter("samples_appended"),
      append_failures: scope.counter("append_failures"),
      init_failures: scope.counter("init_failures"),
    }
  }
}

//
// Response
//

// Result of an invocation that was handled locally: success, or a rejected body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Response {
  pub status: StatusCode,
  pub body: String,
}

impl Response {
  #[must_use]
  pub const fn ok() -> Self {
    Self {
      status: StatusCode::OK,
      body: String::new(),
    }
  }

  #[must_use]
  pub const fn bad_request(body: String) -> Self {
    Self {
      status: StatusCode::BAD_REQUEST,
      body,
    }
  }
}

//
// IngestError
//

// Failures that are not the client's fault. They are propagated to the host unchanged.
#[derive(Error, Debug)]
pub enum IngestError {
  #[error(transparent)]
  Append(anyhow::Error),
  #[error(transparent)]
  Initialization(anyhow::Error),
}

impl IngestError {
  #[must_use]
  pub fn into_inner(self) -> anyhow::Error {
    match self {
      Self::Append(e) | Self::Initialization(e) => e,
    }
  }
}

//
// SampleTimeError
//

#[derive(Error, Debug)]
#[error("Failed to parse time: {expression}: {error}")]
pub struct SampleTimeError {
  pub expression: String,
  #[source]
  pub error: TimeExpressionError,
}

//
// Worker
//

/// One execution context: an append session plus the label scratch buffer that batch requests
/// reuse. A worker serves one invocation at a time. Concurrent invocations each need their own.
pub struct Worker {
  appender: Box<dyn Appender>,
  labels: LabelSet,
}

impl Worker {
  #[must_use]
  pub fn new(appender: Box<dyn Appender>) -> Self {
    Self {
      appender,
      labels: LabelSet::new(),
    }
  }

  pub fn wait_for_completion(&mut self, timeout: Duration) -> anyhow::Result<usize> {
    self.appender.wait_for_completion(timeout)
  }
}

//
// InvocationContext
//

// State for exactly one invocation. Built at the start of handle() and dropped at the end.
struct InvocationContext<'a> {
  worker: &'a mut Worker,
  time_provider: &'a dyn TimeProvider,
  stats: &'a Stats,
}

impl InvocationContext<'_> {
  fn reject(&self, reason: &dyn Display) -> Response {
    self.stats.requests_4xx.inc();
    warn_every!(1.minutes(), "rejected ingest request: {}", reason);
    Response::bad_request(reason.to_string())
  }

  fn finish<E: Display>(
    &self,
    result: Result<usize, DispatchError<E>>,
  ) -> Result<Response, IngestError> {
    let appended = match &result {
      Ok(appended) => *appended,
      Err(e) => e.appended(),
    };
    self.stats.samples_appended.inc_by(appended as u64);

    match result {
      Ok(_) => Ok(Response::ok()),
      Err(DispatchError::Sample { error, .. }) => Ok(self.reject(&error)),
      Err(DispatchError::Append { error, .. }) => {
        self.stats.append_failures.inc();
        warn_every!(
          1.minutes(),
          "append failed after {} sample(s): {}",
          appended,
          error
        );
        Err(IngestError::Append(error))
      },
    }
  }

  fn ingest_line(&mut self, body: &[u8]) -> Result<Response, IngestError> {
    let point = match line::parse_bytes(body) {
      Ok(point) => point,
      Err(e) => return Ok(self.reject(&e)),
    };
    log::trace!(
      "line point {} @ {} = {}",
      point.labels,
      point.timestamp_ms,
      point.value
    );

    let sample = Sample {
      timestamp_ms: point.timestamp_ms,
      value: point.value,
    };
    let result = dispatch(
      self.worker.appender.as_mut(),
      &point.labels,
      [Ok::<_, Infallible>(sample)],
    );
    self.finish(result)
  }

  fn ingest_batch(&mut self, body: &[u8]) -> Result<Response, IngestError> {
    let request = match BatchRequest::decode(body) {
      Ok(request) => request,
      Err(e) => return Ok(self.reject(&e)),
    };
    log::trace!(
      "batch for metric '{}' with {} sample(s)",
      request.metric,
      request.samples.len()
    );

    // Every sample in the batch shares one label set, built once into the worker's scratch space.
    self.worker.labels.fill_from_map(request.labels());

    let time_provider = self.time_provider;
    let samples = request.samples.iter().map(|sample| {
      let expression = sample.time_expression();
      resolve_time_expression(expression, time_provider)
        .map(|timestamp_ms| Sample {
          timestamp_ms,
          value: sample.value.n,
        })
        .map_err(|error| SampleTimeError {
          expression: expression.to_string(),
          error,
        })
    });
    let result = dispatch(
      self.worker.appender.as_mut(),
      &self.worker.labels,
      samples,
    );
    self.finish(result)
  }
}

//
// IngestHandler
//

/// Turns one event body into appends. The handler holds no per-event state and can be shared by
/// any number of concurrent invocations, as long as each brings its own [`Worker`].
pub struct IngestHandler {
  protocol: Protocol,
  time_provider: Arc<dyn TimeProvider>,
  stats: Stats,
}

impl IngestHandler {
  pub fn new(protocol: Protocol, time_provider: Arc<dyn TimeProvider>, scope: &Scope) -> Self {
    Self {
      protocol,
      time_provider,
      stats: Stats::new(scope),
    }
  }

  pub const fn stats(&self) -> &Stats {
    &self.stats
  }

  /// Build a worker with a fresh append session. The backend is created through `backend` on
  /// first use and shared afterwards. If creation fails, the next call tries again.
  pub fn new_worker(
    &self,
    backend: &BackendSingleton,
    make_backend: impl FnOnce() -> anyhow::Result<Arc<dyn StorageBackend>>,
  ) -> Result<Worker, IngestError> {
    let appender = backend
      .get_or_try_init(make_backend)
      .and_then(|backend| backend.appender())
      .map_err(|e| {
        self.stats.init_failures.inc();
        log::warn!("failed to initialize storage appender: {e}");
        IngestError::Initialization(e)
      })?;
    Ok(Worker::new(appender))
  }

  /// Handle one event body. Malformed input and bad time expressions come back as a 400
  /// [`Response`]. Append failures are returned as errors.
  pub fn handle(&self, worker: &mut Worker, body: &[u8]) -> Result<Response, IngestError> {
    self.stats.requests_total.inc();
    let mut context = InvocationContext {
      worker,
      time_provider: self.time_provider.as_ref(),
      stats: &self.stats,
    };

    match self.protocol.select(body) {
      Protocol::Json => context.ingest_batch(body),
      Protocol::Line | Protocol::Auto => context.ingest_line(body),
    }
  }
}
