// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./dispatch_test.rs"]
mod dispatch_test;

use crate::protos::label::LabelSet;
use crate::storage::Appender;
use thiserror::Error;

//
// Sample
//

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
  pub timestamp_ms: i64,
  pub value: f64,
}

//
// DispatchError
//

// Why dispatch stopped. `appended` is the number of samples appended before the failure.
#[derive(Error, Debug)]
pub enum DispatchError<E> {
  #[error("{error}")]
  Sample { appended: usize, error: E },
  #[error("{error}")]
  Append {
    appended: usize,
    error: anyhow::Error,
  },
}

impl<E> DispatchError<E> {
  pub const fn appended(&self) -> usize {
    match self {
      Self::Sample { appended, .. } | Self::Append { appended, .. } => *appended,
    }
  }
}

/// Append every sample under `labels`, in order, one add() call per sample. Samples are produced
/// lazily, so a sample whose value depends on the current time is evaluated right before its own
/// append. Dispatch stops at the first failing sample or append. Nothing already appended is
/// rolled back.
pub fn dispatch<E>(
  appender: &mut dyn Appender,
  labels: &LabelSet,
  samples: impl IntoIterator<Item = Result<Sample, E>>,
) -> Result<usize, DispatchError<E>> {
  let mut appended = 0;
  for sample in samples {
    let sample = match sample {
      Ok(sample) => sample,
      Err(error) => return Err(DispatchError::Sample { appended, error }),
    };
    if let Err(error) = appender.add(labels, sample.timestamp_ms, sample.value) {
      return Err(DispatchError::Append { appended, error });
    }
    appended += 1;
  }
  Ok(appended)
}
