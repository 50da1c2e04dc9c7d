// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


pub mod batch;
pub mod label;
pub mod line;

use serde::Deserialize;
use thiserror::Error;

//
// ParseError
//

// Errors that arise while decoding a request body. The display strings are returned verbatim to
// the client as the body of a 400 response.
#[derive(Error, Debug)]
pub enum ParseError {
  #[error("Not enough columns")]
  NotEnoughColumns,
  #[error("Failed to parse int")]
  InvalidInt,
  #[error("Failed to parse float")]
  InvalidFloat,
  #[error("Label column missing '='")]
  MissingEquals,
  #[error("Empty label name")]
  EmptyLabelName,
  #[error("Body is not valid UTF-8")]
  InvalidUtf8,
  #[error("{0}")]
  Json(#[from] serde_json::Error),
}

//
// Protocol
//

// Wire format of an incoming body.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
  // Sniff the body: a JSON object selects the batch protocol, anything else is a line.
  #[default]
  Auto,
  Line,
  Json,
}

impl Protocol {
  // Resolve Auto against the body. Line and Json are returned unchanged.
  #[must_use]
  pub fn select(self, body: &[u8]) -> Self {
    match self {
      Self::Auto => {
        if body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{') {
          Self::Json
        } else {
          Self::Line
        }
      },
      Self::Line | Self::Json => self,
    }
  }
}
