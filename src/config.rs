//! Default configuration parameters.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::timing::DialTimeout;
use std::time::Duration;

/// How long to wait for the TCP dial to complete unless `--timeout` says otherwise
pub const DEFAULT_DIAL_TIMEOUT: DialTimeout = DialTimeout::from_secs(10);

/// Size of the buffer each pump copies through.
/// Interactive traffic is small, but pasting a large block should not
/// take one syscall per line.
pub const PUMP_BUFFER_SIZE: usize = 1 << 13;

/// How long the binary waits for leftover blocking reads on standard input
/// once the session has closed. Those reads are parked in the OS and only
/// return when the user types something, so there is no point waiting long.
pub const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);
