//! Unidirectional byte pumps.
//!
//! A pump copies from its source to its sink until the source ends, either
//! stream fails, or the connection is closed. It never closes either stream
//! itself and always reports how it ended.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::config::PUMP_BUFFER_SIZE;
use crate::connection::CloseWatch;
use std::{fmt, io};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Which way a pump moves bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Connection to local output
    Inbound,
    /// Local input to connection
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

/// Why a pump stopped
#[derive(Debug)]
pub enum EndReason {
    /// The source reached end-of-stream
    Eof,
    /// The connection was closed while the pump was running
    Closed,
    /// The source or the sink failed before the connection was closed
    Error(io::Error),
}

impl EndReason {
    /// Whether this is a genuine stream failure worth a diagnostic
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Outcome of a pump
#[derive(Debug)]
pub struct PumpEnded {
    /// Which pump this was
    pub direction: Direction,
    /// Bytes delivered to the sink
    pub transferred: u64,
    /// Why it stopped
    pub reason: EndReason,
}

/// Copy from `source` to `sink` until one of them ends or the connection
/// behind `closed` is closed.
///
/// An error observed after the connection has been closed is the expected
/// result of that close and is reported as [`EndReason::Closed`].
#[tracing::instrument(skip_all, fields(direction = %direction), level = "debug")]
pub async fn run<R, W>(
    direction: Direction,
    mut source: R,
    mut sink: W,
    mut closed: CloseWatch,
) -> PumpEnded
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0; PUMP_BUFFER_SIZE];
    let mut transferred = 0u64;
    let reason = loop {
        let n = tokio::select! {
            biased;
            () = closed.closed() => break EndReason::Closed,
            result = source.read(&mut buf) => match result {
                Ok(0) => break EndReason::Eof,
                Ok(n) => n,
                Err(err) => break EndReason::Error(err),
            },
        };
        trace!("read {n} bytes");
        let written = tokio::select! {
            biased;
            () = closed.closed() => break EndReason::Closed,
            result = write_and_flush(&mut sink, &buf[..n]) => result,
        };
        if let Err(err) = written {
            break EndReason::Error(err);
        }
        transferred += n as u64;
    };
    let reason = match reason {
        EndReason::Error(err) if closed.is_closed() => {
            debug!("stream error during teardown: {err}");
            EndReason::Closed
        }
        EndReason::Error(err) => {
            warn!("{direction} stream failed: {err}");
            EndReason::Error(err)
        }
        other => other,
    };
    debug!("pump ended after {transferred} bytes: {reason:?}");
    PumpEnded {
        direction,
        transferred,
        reason,
    }
}

/// Standard output is buffered by `tokio`, so every chunk is flushed for
/// the user to see it right away.
async fn write_and_flush<W: AsyncWrite + Unpin>(sink: &mut W, data: &[u8]) -> io::Result<()> {
    sink.write_all(data).await?;
    sink.flush().await
}
