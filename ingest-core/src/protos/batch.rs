// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./batch_test.rs"]
mod batch_test;

use super::ParseError;
use crate::pipeline::time::NOW;
use serde::Deserialize;
use std::collections::HashMap;

//
// BatchRequest
//

/// A JSON batch: one metric, labels shared by every sample, and an ordered list of samples.
///
/// ```json
/// {
///   "Metric": "cpu",
///   "Labels": {"dc": "7", "hostname": "mybesthost"},
///   "Samples": [{"Time": "1532595945142", "Value": {"N": 95.2}}]
/// }
/// ```
#[derive(Debug, Deserialize, PartialEq)]
pub struct BatchRequest {
  #[serde(rename = "Metric")]
  pub metric: String,
  #[serde(rename = "Labels", default)]
  labels: Option<HashMap<String, String>>,
  #[serde(rename = "Samples")]
  pub samples: Vec<BatchSample>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct BatchSample {
  #[serde(rename = "Time", default)]
  time: Option<String>,
  #[serde(rename = "Value")]
  pub value: SampleValue,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct SampleValue {
  #[serde(rename = "N")]
  pub n: f64,
}

impl BatchRequest {
  pub fn decode(body: &[u8]) -> Result<Self, ParseError> {
    let request: Self = serde_json::from_slice(body)?;
    if request.labels().any(|(name, _)| name.is_empty()) {
      return Err(ParseError::EmptyLabelName);
    }
    Ok(request)
  }

  // Shared labels in arbitrary order. The metric name is not part of them.
  pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
    self
      .labels
      .iter()
      .flatten()
      .map(|(name, value)| (name.as_str(), value.as_str()))
  }
}

impl BatchSample {
  // The time expression to resolve for this sample. A missing or empty time means "now", which is
  // resolved when the sample is dispatched.
  pub fn time_expression(&self) -> &str {
    match self.time.as_deref() {
      None | Some("") => NOW,
      Some(time) => time,
    }
  }
}
