// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use anyhow::Context;
use clap::Parser;
use ingest_common::global_initialize;
use ingest_server::run_server;
use log::info;
use std::num::NonZeroUsize;
use tikv_jemallocator::Jemalloc;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::Duration;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug, Clone)]
struct Options {
  #[arg(short = 'c', long = "config")]
  pub config: String,

  #[arg(long = "config-check-and-exit")]
  pub config_check: bool,

  #[arg(long = "shutdown-delay", default_value = "0")]
  pub shutdown_delay: u32,
}

fn main() -> anyhow::Result<()> {
  global_initialize();
  let opts = Options::parse();

  let config = ingest_server::config::load_from_file(&opts.config)
    .with_context(|| format!("can't load config file from {}", opts.config))?;
  info!("loaded config file {}", opts.config);

  let num_threads = std::thread::available_parallelism().unwrap_or_else(|_| {
    log::warn!("could not determine number of CPUs. Defaulting to 1");
    NonZeroUsize::MIN
  });
  log::info!("running server with {num_threads} workers");
  let runtime = tokio::runtime::Builder::new_multi_thread()
    .worker_threads(num_threads.into())
    .enable_all()
    .build()?;

  runtime.block_on(async {
    // Trap ctrl+c and sigterm messages and perform a clean shutdown
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    run_server(
      config,
      opts.config_check,
      || async move {
        select! {
          _ = sigint.recv() => info!("received sigint"),
          _ = sigterm.recv() => info!("received sigterm"),
        }
      },
      Duration::from_secs(opts.shutdown_delay.into()),
    )
    .await
  })
}
