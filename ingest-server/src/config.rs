// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use anyhow::{Context, bail};
use ingest_core::protos::Protocol;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_PATH: &str = "/ingest";
const DEFAULT_APPEND_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

// Routes served next to the ingest path.
pub const HEALTHCHECK_PATH: &str = "/healthcheck";
pub const METRICS_PATH: &str = "/metrics";

fn default_path() -> String {
  DEFAULT_PATH.to_string()
}

const fn default_append_flush_timeout() -> Duration {
  DEFAULT_APPEND_FLUSH_TIMEOUT
}

//
// Config
//

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
  // Listen address, e.g. `0.0.0.0:8080`.
  pub bind: String,

  // Route that accepts event bodies via POST.
  #[serde(default = "default_path")]
  pub path: String,

  #[serde(default)]
  pub protocol: Protocol,

  pub storage: StorageConfig,

  // How long to wait for in-flight appends when shutting down.
  #[serde(
    default = "default_append_flush_timeout",
    with = "humantime_serde"
  )]
  pub append_flush_timeout: Duration,
}

impl Config {
  pub fn validate(&self) -> anyhow::Result<()> {
    if self.bind.is_empty() {
      bail!("bind address must not be empty");
    }
    if !self.path.starts_with('/') {
      bail!("ingest path '{}' must start with '/'", self.path);
    }
    if self.path == HEALTHCHECK_PATH || self.path == METRICS_PATH {
      bail!("ingest path '{}' is reserved", self.path);
    }
    Ok(())
  }
}

//
// StorageConfig
//

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
  Memory,
}

// Selects the storage backend. Every key other than `type` is connection configuration that is
// handed to the backend unchanged.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StorageConfig {
  #[serde(rename = "type")]
  pub storage_type: StorageType,

  #[serde(flatten)]
  pub connection: serde_yaml::Mapping,
}

pub fn load_from_str(contents: &str) -> anyhow::Result<Config> {
  let config: Config = serde_yaml::from_str(contents)?;
  config.validate()?;
  Ok(config)
}

pub fn load_from_file(path: &str) -> anyhow::Result<Config> {
  let file_contents =
    std::fs::read_to_string(path).with_context(|| format!("can't read config file {path}"))?;
  load_from_str(&file_contents)
}
