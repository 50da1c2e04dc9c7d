// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./time_test.rs"]
mod time_test;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const NOW: &str = "now";

const MILLIS_PER_SECOND: u64 = 1000;
const MILLIS_PER_MINUTE: u64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: u64 = 60 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: u64 = 24 * MILLIS_PER_HOUR;
const MILLIS_PER_WEEK: u64 = 7 * MILLIS_PER_DAY;

//
// TimeProvider
//

pub trait TimeProvider: Send + Sync + 'static {
  fn now_utc(&self) -> OffsetDateTime;

  #[allow(clippy::cast_possible_truncation)]
  fn unix_now_millis(&self) -> i64 {
    (self.now_utc().unix_timestamp_nanos() / 1_000_000) as i64
  }
}

//
// RealTimeProvider
//

pub struct RealTimeProvider {}

impl TimeProvider for RealTimeProvider {
  fn now_utc(&self) -> OffsetDateTime {
    OffsetDateTime::now_utc()
  }
}

//
// TestTimeProvider
//

// Time provider pinned to a settable millisecond epoch.
#[derive(Default)]
pub struct TestTimeProvider {
  pub time_ms: Arc<AtomicI64>,
}

impl TestTimeProvider {
  #[must_use]
  pub fn new(time_ms: i64) -> Self {
    Self {
      time_ms: Arc::new(AtomicI64::new(time_ms)),
    }
  }
}

impl TimeProvider for TestTimeProvider {
  fn now_utc(&self) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(
      i128::from(self.time_ms.load(Ordering::SeqCst)) * 1_000_000,
    )
    .unwrap_or(OffsetDateTime::UNIX_EPOCH)
  }

  fn unix_now_millis(&self) -> i64 {
    self.time_ms.load(Ordering::SeqCst)
  }
}

//
// TimeExpressionError
//

#[derive(Error, Debug, Eq, PartialEq)]
pub enum TimeExpressionError {
  #[error("invalid relative offset")]
  InvalidOffset,
  #[error("unknown offset unit '{0}'")]
  UnknownUnit(String),
  #[error("time is out of range")]
  OutOfRange,
  #[error("not a recognized time expression")]
  Unrecognized,
}

fn unit_to_millis(unit: &str) -> Result<u64, TimeExpressionError> {
  match unit {
    // Bare numbers are hours.
    "" | "h" => Ok(MILLIS_PER_HOUR),
    "ms" => Ok(1),
    "s" => Ok(MILLIS_PER_SECOND),
    "m" => Ok(MILLIS_PER_MINUTE),
    "d" => Ok(MILLIS_PER_DAY),
    "w" => Ok(MILLIS_PER_WEEK),
    _ => Err(TimeExpressionError::UnknownUnit(unit.to_string())),
  }
}

// Parse `<digits><unit>` into milliseconds. An empty offset is zero.
fn parse_offset(offset: &str) -> Result<i64, TimeExpressionError> {
  if offset.is_empty() {
    return Ok(0);
  }

  let digits_end = offset
    .find(|c: char| !c.is_ascii_digit())
    .unwrap_or(offset.len());
  let (digits, unit) = offset.split_at(digits_end);
  if digits.is_empty() {
    return Err(TimeExpressionError::InvalidOffset);
  }
  let amount: u64 = digits
    .parse()
    .map_err(|_| TimeExpressionError::OutOfRange)?;
  amount
    .checked_mul(unit_to_millis(unit)?)
    .and_then(|millis| i64::try_from(millis).ok())
    .ok_or(TimeExpressionError::OutOfRange)
}

// Resolve `now`, `now-<offset>` or `now+<offset>`. Returns None if the expression is not relative.
fn resolve_relative(
  expression: &str,
  time_provider: &dyn TimeProvider,
) -> Option<Result<i64, TimeExpressionError>> {
  let rest = expression.strip_prefix(NOW)?;
  let (negative, offset) = if rest.is_empty() {
    (false, "")
  } else if let Some(offset) = rest.strip_prefix('-') {
    (true, offset)
  } else if let Some(offset) = rest.strip_prefix('+') {
    (false, offset)
  } else {
    return None;
  };

  Some(parse_offset(offset).and_then(|offset| {
    let now = time_provider.unix_now_millis();
    let resolved = if negative {
      now.checked_sub(offset)
    } else {
      now.checked_add(offset)
    };
    resolved.ok_or(TimeExpressionError::OutOfRange)
  }))
}

fn resolve_rfc3339(expression: &str) -> Option<Result<i64, TimeExpressionError>> {
  let date_time = OffsetDateTime::parse(expression, &Rfc3339).ok()?;
  Some(
    i64::try_from(date_time.unix_timestamp_nanos() / 1_000_000)
      .map_err(|_| TimeExpressionError::OutOfRange),
  )
}

/// Resolve a time expression to an absolute millisecond epoch. Forms are tried in order:
///  - `now`, `now-<n><unit>`, `now+<n><unit>` relative to the provider's current time. Units are
///    `ms`, `s`, `m`, `h`, `d` and `w`. A missing unit means hours.
///  - A base 10 integer, taken as milliseconds since the epoch.
///  - An RFC 3339 date time.
///
/// Only the relative forms depend on the provider.
pub fn resolve_time_expression(
  expression: &str,
  time_provider: &dyn TimeProvider,
) -> Result<i64, TimeExpressionError> {
  if let Some(resolved) = resolve_relative(expression, time_provider) {
    return resolved;
  }
  if let Ok(epoch_ms) = expression.parse::<i64>() {
    return Ok(epoch_ms);
  }
  resolve_rfc3339(expression).unwrap_or(Err(TimeExpressionError::Unrecognized))
}
