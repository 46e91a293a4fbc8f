//! A thin wrapper around the library to speed up sccached compilation.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
#![warn(rust_2018_idioms, missing_docs, missing_debug_implementations)]
#![warn(clippy::pedantic, clippy::cargo, clippy::unwrap_used)]
#![forbid(unsafe_code)]

use rusty_telnet_lib::config::RUNTIME_SHUTDOWN_TIMEOUT;
use rusty_telnet_lib::session::{self, Session};
use rusty_telnet_lib::{arg, signal};
use thiserror::Error;
use tracing::{debug, trace};
use tracing_subscriber::{filter, fmt, prelude::*, reload};

/// Errors
#[derive(Error)]
enum Error {
    #[error(transparent)]
    Session(#[from] session::Error),
    #[error("cannot start the runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl std::fmt::Debug for Error {
    // Simply delegate to `Display` so when `main` exits, there
    // is a nice error message.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

const QUIET_QUIET_LOG_LEVEL: filter::LevelFilter = filter::LevelFilter::ERROR;
const QUIET_LOG_LEVEL: filter::LevelFilter = filter::LevelFilter::WARN;
const DEFAULT_LOG_LEVEL: filter::LevelFilter = filter::LevelFilter::INFO;
const VERBOSE_LOG_LEVEL: filter::LevelFilter = filter::LevelFilter::DEBUG;
const VERBOSE_VERBOSE_LOG_LEVEL: filter::LevelFilter = filter::LevelFilter::TRACE;

#[cfg(feature = "deadlock-detection")]
fn spawn_deadlock_detection() {
    use std::thread;
    use tracing::error;

    // Create a background thread which checks for deadlocks every 10s
    thread::spawn(move || {
        loop {
            thread::sleep(std::time::Duration::from_secs(10));
            let deadlocks = parking_lot::deadlock::check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }

            error!("{} deadlocks detected", deadlocks.len());
            for (i, threads) in deadlocks.iter().enumerate() {
                error!("Deadlock #{i}");
                for t in threads {
                    error!("Thread Id {:#?}", t.thread_id());
                    error!("{:#?}", t.backtrace());
                }
            }
        }
    });
}

/// Install the stderr logger and apply `-v`/`-q`
fn setup_logging(cli_args: &arg::TelnetCli) {
    let (level_layer, reload_handle) = reload::Layer::new(DEFAULT_LOG_LEVEL);
    let fmt_layer = fmt::Layer::default()
        .compact()
        .with_timer(fmt::time::time())
        .with_writer(std::io::stderr)
        .with_filter(level_layer);
    #[cfg(not(feature = "tokio-console"))]
    tracing_subscriber::registry().with(fmt_layer).init();
    #[cfg(feature = "tokio-console")]
    tracing_subscriber::registry()
        .with(console_subscriber::spawn())
        .with(fmt_layer)
        .init();
    let level = match (cli_args.verbose, cli_args.quiet) {
        (0, 0) => return,
        (1, _) => VERBOSE_LOG_LEVEL,
        (_, 1) => QUIET_LOG_LEVEL,
        (0, _) => QUIET_QUIET_LOG_LEVEL,
        (_, _) => VERBOSE_VERBOSE_LOG_LEVEL,
    };
    reload_handle
        .reload(level)
        .expect("Resetting log level failed (this is a bug)");
}

/// Entry point
fn main() -> Result<(), Box<Error>> {
    // Argument errors exit with clap's usage message before anything else
    arg::TelnetCli::parse_global();
    let cli_args = arg::TelnetCli::get_global();
    setup_logging(cli_args);
    trace!("cli_args = {cli_args:#?}");
    #[cfg(feature = "deadlock-detection")]
    spawn_deadlock_detection();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Box::new(e.into()))?;
    let mut session = Session::new(cli_args.connection_parameters());
    let result = runtime.block_on(session.run(
        tokio::io::stdin(),
        tokio::io::stdout(),
        signal::interrupted(),
    ));
    // A read on standard input may still be parked in a blocking thread.
    // It cannot be cancelled, so don't let it hold the process open.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    let report = result.map_err(|e| Box::new(e.into()))?;
    debug!("session ended: {}", report.trigger);
    Ok(())
}
