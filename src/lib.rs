//! A minimal interactive TCP client: standard input goes to the peer,
//! the peer's bytes go to standard output.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
#![warn(rust_2018_idioms, missing_debug_implementations)]
#![warn(clippy::pedantic, clippy::cargo, clippy::unwrap_used)]
#![forbid(unsafe_code)]
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod arg;
pub mod config;
pub mod connection;
pub mod connector;
pub mod pump;
pub mod session;
pub mod signal;
pub mod termination;
pub mod timing;
