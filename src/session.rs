//! The session controller.
//!
//! A session dials the peer, starts one pump per direction, waits for the
//! first termination source, closes the connection exactly once and then
//! waits for both pumps before reporting.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::connection::CloseError;
use crate::connector::{self, ConnectError, ConnectionParameters};
use crate::pump::{self, Direction, PumpEnded};
use crate::termination::{PumpTask, TerminationSignal, await_first_termination};
use std::{fmt, future::Future};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// Session errors
#[derive(Debug, Error)]
pub enum Error {
    /// The connection could not be established
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// `run` was called on a session that already started
    #[error("session cannot be started from state {0}")]
    NotStartable(SessionState),
    /// The interrupt arrived before the connection was established
    #[error("interrupted while connecting")]
    Interrupted,
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not started yet
    Disconnected,
    /// Dialing the peer
    Connecting,
    /// Both pumps are running
    Active,
    /// The connection is being closed and the pumps joined
    ShuttingDown,
    /// Finished, with or without ever becoming active
    Closed,
}

impl SessionState {
    /// Whether the controller may move from `self` to `next`
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Active | Self::Closed)
                | (Self::Active, Self::ShuttingDown)
                | (Self::ShuttingDown, Self::Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::ShuttingDown => "shutting down",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What happened during a completed session
#[derive(Debug)]
pub struct SessionReport {
    /// The source that started the shutdown
    pub trigger: TerminationSignal,
    /// Outcome of the connection to local output pump
    pub inbound: PumpEnded,
    /// Outcome of the local input to connection pump
    pub outbound: PumpEnded,
    /// How many times the connection's close effect ran
    pub close_count: usize,
    /// Set if closing the connection failed. The session ended anyway.
    pub close_error: Option<CloseError>,
}

/// One relay session between local streams and a remote peer
#[derive(Debug)]
pub struct Session {
    params: ConnectionParameters,
    state: SessionState,
}

impl Session {
    /// A session that has not dialed yet
    #[must_use]
    pub const fn new(params: ConnectionParameters) -> Self {
        Self {
            params,
            state: SessionState::Disconnected,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Where this session connects to
    #[must_use]
    pub const fn params(&self) -> &ConnectionParameters {
        &self.params
    }

    fn advance(&mut self, next: SessionState) {
        if !self.state.can_advance_to(next) {
            error!(
                "Illegal session transition {} -> {next} (this is a bug)",
                self.state
            );
            debug_assert!(false, "illegal session transition");
            return;
        }
        debug!("session {} -> {next}", self.state);
        self.state = next;
    }

    /// Run the session to completion.
    ///
    /// Bytes from `local_in` go to the peer and bytes from the peer go to
    /// `local_out` until local input ends, the peer closes, or `interrupt`
    /// resolves. Whichever happens first closes the connection; both pumps
    /// have exited by the time this returns.
    ///
    /// `interrupt` is polled from the start, so it also aborts the dial.
    ///
    /// # Errors
    /// Connection failures and interrupts during the dial are returned
    /// before any pump starts. Once the session is active it always
    /// completes with a [`SessionReport`].
    #[tracing::instrument(skip_all, fields(target = %self.params), level = "debug")]
    pub async fn run<R, W, I>(
        &mut self,
        local_in: R,
        local_out: W,
        interrupt: I,
    ) -> Result<SessionReport, Error>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        I: Future<Output = ()>,
    {
        if self.state != SessionState::Disconnected {
            return Err(Error::NotStartable(self.state));
        }
        tokio::pin!(interrupt);
        self.advance(SessionState::Connecting);
        let dialed = tokio::select! {
            biased;
            () = &mut interrupt => Err(Error::Interrupted),
            result = connector::connect(&self.params) => result.map_err(Error::from),
        };
        let connection = match dialed {
            Ok(connection) => connection,
            Err(err) => {
                debug!("dial failed: {err}");
                self.advance(SessionState::Closed);
                return Err(err);
            }
        };
        info!("Connected to {}", connection.peer_addr());

        let (close, reader, writer) = connection.into_split();
        let mut inbound = PumpTask::spawn(
            Direction::Inbound,
            pump::run(Direction::Inbound, reader, local_out, close.watch()),
        );
        let mut outbound = PumpTask::spawn(
            Direction::Outbound,
            pump::run(Direction::Outbound, local_in, writer, close.watch()),
        );
        self.advance(SessionState::Active);

        let trigger = await_first_termination(&mut inbound, &mut outbound, interrupt).await;
        self.advance(SessionState::ShuttingDown);
        // Unblocks whichever pump is still running
        let close_error = match close.close() {
            Ok(_) => None,
            Err(err) => {
                warn!("{err}");
                Some(err)
            }
        };
        let (inbound, outbound) = tokio::join!(inbound.join(), outbound.join());
        self.advance(SessionState::Closed);
        debug!(
            "session closed ({trigger}): received {} bytes, sent {} bytes",
            inbound.transferred, outbound.transferred
        );
        Ok(SessionReport {
            trigger,
            inbound,
            outbound,
            close_count: close.close_count(),
            close_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionState; 5] = [
        SessionState::Disconnected,
        SessionState::Connecting,
        SessionState::Active,
        SessionState::ShuttingDown,
        SessionState::Closed,
    ];

    #[test]
    fn test_legal_transitions() {
        let legal = [
            (SessionState::Disconnected, SessionState::Connecting),
            (SessionState::Connecting, SessionState::Active),
            (SessionState::Connecting, SessionState::Closed),
            (SessionState::Active, SessionState::ShuttingDown),
            (SessionState::ShuttingDown, SessionState::Closed),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_advance_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_closed_is_terminal() {
        assert!(ALL.iter().all(|s| !SessionState::Closed.can_advance_to(*s)));
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let session = Session::new(ConnectionParameters::new("localhost", 23));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.params().port, 23);
    }
}
