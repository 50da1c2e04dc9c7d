// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./line_test.rs"]
mod line_test;

use super::ParseError;
use super::label::{Label, LabelSet, METRIC_NAME_LABEL};

//
// LinePoint
//

// One point decoded from a line protocol record.
#[derive(Clone, Debug, PartialEq)]
pub struct LinePoint {
  pub labels: LabelSet,
  pub timestamp_ms: i64,
  pub value: f64,
}

/// Parse a single record of the form `<metric> <unix-seconds> <value> [<name>=<value> ...]`.
/// Columns are separated by exactly one space and nothing is escaped. The timestamp is whole
/// seconds and is scaled to milliseconds here. The metric name becomes the `__name__` label.
pub fn parse(input: &str) -> Result<LinePoint, ParseError> {
  let mut columns = input.trim().split(' ');
  let (Some(metric), Some(time), Some(value)) = (columns.next(), columns.next(), columns.next())
  else {
    return Err(ParseError::NotEnoughColumns);
  };

  let seconds: i64 = time.parse().map_err(|_| ParseError::InvalidInt)?;
  let timestamp_ms = seconds.checked_mul(1000).ok_or(ParseError::InvalidInt)?;
  let value: f64 = value.parse().map_err(|_| ParseError::InvalidFloat)?;

  let mut labels = vec![Label::new(METRIC_NAME_LABEL, metric)];
  for column in columns {
    let (name, value) = column.split_once('=').ok_or(ParseError::MissingEquals)?;
    if name.is_empty() {
      return Err(ParseError::EmptyLabelName);
    }
    labels.push(Label::new(name, value));
  }

  Ok(LinePoint {
    labels: LabelSet::from_labels(labels),
    timestamp_ms,
    value,
  })
}

pub fn parse_bytes(input: &[u8]) -> Result<LinePoint, ParseError> {
  parse(std::str::from_utf8(input).map_err(|_| ParseError::InvalidUtf8)?)
}
