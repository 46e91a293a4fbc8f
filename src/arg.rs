//! Command line arguments parsing.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::connector::ConnectionParameters;
use crate::timing::DialTimeout;
use clap::{ArgAction, Parser, arg, command};
use std::sync::OnceLock;

/// Command line arguments
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(author, version, about, long_about = None)]
pub struct TelnetCli {
    /// Host name or IP address to connect to
    pub host: String,
    /// TCP port to connect to
    pub port: u16,
    /// Give up connecting after this long.
    /// Accepts a number of seconds or units such as `300ms`, `3s` or `1m30s`.
    #[arg(long, default_value = "10s")]
    pub timeout: DialTimeout,
    /// Level of verbosity
    #[arg(short, long, conflicts_with = "quiet", action = ArgAction::Count)]
    pub verbose: u8,
    /// Level of quietness
    #[arg(short, long, conflicts_with = "verbose", action = ArgAction::Count)]
    pub quiet: u8,
}

/// Global args to avoid cloning
pub static ARGS: OnceLock<TelnetCli> = OnceLock::new();

impl TelnetCli {
    /// Obtain reference to the global static instance
    ///
    /// # Panics
    /// Panics if `ARGS` is not initialized
    pub fn get_global() -> &'static Self {
        ARGS.get().expect("ARGS is not initialized (this is a bug)")
    }

    /// Parse command line arguments and set the global static instance
    ///
    /// # Panics
    /// Panics if `ARGS` is already initialized
    pub fn parse_global() {
        ARGS.set(Self::parse())
            .expect("`parse_global` should not be called twice (this is a bug)");
    }

    /// What the connector needs from the command line
    #[must_use]
    pub fn connection_parameters(&self) -> ConnectionParameters {
        ConnectionParameters::new(&self.host, self.port).with_timeout(self.timeout)
    }
}
