// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod singleton;

use bd_log::SwapLogger;
use bd_panic::PanicType;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  global_initialize();
}

pub fn global_initialize() {
  // Install the panic handler before the logger. A log line emitted with thread ids during ctor
  // can panic otherwise.
  bd_panic::default(PanicType::ForceAbort);

  SwapLogger::initialize();

  // The ingest host is deployed into environments we don't control, so always log panics on
  // release builds.
  #[cfg(not(debug_assertions))]
  unsafe {
    std::env::set_var("LOG_PANIC", "true");
  }

  log::debug!("global initialization complete");
}
