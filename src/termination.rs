//! Merge the session's termination sources into one decision.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::pump::{Direction, EndReason, PumpEnded};
use std::{fmt, future::Future, io};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error};

/// The event that started the shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// The outbound pump ended: local input is exhausted or broken
    LocalEof,
    /// The inbound pump ended: the peer closed the connection or it broke
    PeerClosed,
    /// An interrupt was requested from outside
    ExternalInterrupt,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalEof => write!(f, "local input ended"),
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::ExternalInterrupt => write!(f, "interrupted"),
        }
    }
}

impl From<Direction> for TerminationSignal {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Inbound => Self::PeerClosed,
            Direction::Outbound => Self::LocalEof,
        }
    }
}

/// A spawned pump whose outcome can be observed more than once
#[derive(Debug)]
pub struct PumpTask {
    direction: Direction,
    handle: JoinHandle<PumpEnded>,
    /// Set as soon as `handle` has completed, so it is never polled again
    outcome: Option<PumpEnded>,
}

impl PumpTask {
    /// Spawn `pump` on the runtime
    pub fn spawn<F>(direction: Direction, pump: F) -> Self
    where
        F: Future<Output = PumpEnded> + Send + 'static,
    {
        Self {
            direction,
            handle: tokio::spawn(pump),
            outcome: None,
        }
    }

    /// Which pump this is
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether the pump has been observed to exit
    #[must_use]
    pub const fn has_exited(&self) -> bool {
        self.outcome.is_some()
    }

    /// Wait for the pump to exit and keep its outcome.
    ///
    /// # Cancel Safety
    /// This method is cancel safe.
    pub async fn exited(&mut self) {
        if self.outcome.is_none() {
            let result = (&mut self.handle).await;
            self.outcome = Some(collect(self.direction, result));
        }
    }

    /// Wait for the pump to exit and take its outcome
    pub async fn join(self) -> PumpEnded {
        match self.outcome {
            Some(outcome) => outcome,
            None => collect(self.direction, self.handle.await),
        }
    }
}

/// A pump that panicked or was aborted still counts as ended
fn collect(direction: Direction, result: Result<PumpEnded, JoinError>) -> PumpEnded {
    result.unwrap_or_else(|err| {
        error!("{direction} pump did not finish cleanly: {err}");
        PumpEnded {
            direction,
            transferred: 0,
            reason: EndReason::Error(io::Error::other(err)),
        }
    })
}

/// Wait for whichever comes first: either pump exiting or `interrupt`.
///
/// Exactly one signal is returned. Ties are broken at random by
/// `tokio::select!`, so no source has priority. A pump observed here keeps
/// its outcome in its [`PumpTask`] for the later join.
pub async fn await_first_termination<I>(
    inbound: &mut PumpTask,
    outbound: &mut PumpTask,
    interrupt: I,
) -> TerminationSignal
where
    I: Future<Output = ()>,
{
    let signal = tokio::select! {
        () = inbound.exited() => TerminationSignal::PeerClosed,
        () = outbound.exited() => TerminationSignal::LocalEof,
        () = interrupt => TerminationSignal::ExternalInterrupt,
    };
    debug!("first termination: {signal}");
    signal
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn ended(direction: Direction) -> PumpEnded {
        PumpEnded {
            direction,
            transferred: 0,
            reason: EndReason::Eof,
        }
    }

    /// A pump that finishes when told to
    fn gated(direction: Direction) -> (oneshot::Sender<()>, PumpTask) {
        let (tx, rx) = oneshot::channel::<()>();
        let task = PumpTask::spawn(direction, async move {
            rx.await.ok();
            ended(direction)
        });
        (tx, task)
    }

    #[tokio::test]
    async fn test_inbound_first() {
        crate::tests::setup_logging();
        let (inbound_tx, mut inbound) = gated(Direction::Inbound);
        let (outbound_tx, mut outbound) = gated(Direction::Outbound);
        assert_eq!(inbound.direction(), Direction::Inbound);
        inbound_tx.send(()).unwrap();
        let signal =
            await_first_termination(&mut inbound, &mut outbound, std::future::pending()).await;
        assert_eq!(signal, TerminationSignal::PeerClosed);
        assert_eq!(signal, inbound.direction().into());
        assert!(inbound.has_exited());
        assert!(!outbound.has_exited());
        outbound_tx.send(()).unwrap();
        assert_eq!(inbound.join().await.direction, Direction::Inbound);
        assert_eq!(outbound.join().await.direction, Direction::Outbound);
    }

    #[tokio::test]
    async fn test_outbound_first() {
        crate::tests::setup_logging();
        let (_inbound_tx, mut inbound) = gated(Direction::Inbound);
        let (outbound_tx, mut outbound) = gated(Direction::Outbound);
        outbound_tx.send(()).unwrap();
        let signal =
            await_first_termination(&mut inbound, &mut outbound, std::future::pending()).await;
        assert_eq!(signal, TerminationSignal::LocalEof);
        assert!(outbound.has_exited());
    }

    #[tokio::test]
    async fn test_interrupt_first() {
        crate::tests::setup_logging();
        let (_inbound_tx, mut inbound) = gated(Direction::Inbound);
        let (_outbound_tx, mut outbound) = gated(Direction::Outbound);
        let (interrupt_tx, interrupt_rx) = oneshot::channel::<()>();
        interrupt_tx.send(()).unwrap();
        let signal = await_first_termination(&mut inbound, &mut outbound, async {
            interrupt_rx.await.ok();
        })
        .await;
        assert_eq!(signal, TerminationSignal::ExternalInterrupt);
        assert!(!inbound.has_exited());
        assert!(!outbound.has_exited());
    }

    #[tokio::test]
    async fn test_simultaneous_sources_deliver_once() {
        crate::tests::setup_logging();
        for _ in 0..32 {
            let (inbound_tx, mut inbound) = gated(Direction::Inbound);
            let (outbound_tx, mut outbound) = gated(Direction::Outbound);
            inbound_tx.send(()).unwrap();
            outbound_tx.send(()).unwrap();
            // Let both tasks finish before racing them
            tokio::time::sleep(Duration::from_millis(1)).await;
            let signal = await_first_termination(&mut inbound, &mut outbound, async {}).await;
            // Exactly one source was taken; the others are still joinable
            let observed = [inbound.has_exited(), outbound.has_exited()]
                .into_iter()
                .filter(|exited| *exited)
                .count();
            match signal {
                TerminationSignal::ExternalInterrupt => assert_eq!(observed, 0),
                _ => assert_eq!(observed, 1),
            }
            inbound.join().await;
            outbound.join().await;
        }
    }

    #[tokio::test]
    async fn test_panicked_pump_still_reports() {
        crate::tests::setup_logging();
        let task = PumpTask::spawn(Direction::Outbound, async {
            let outcome: Option<PumpEnded> = None;
            outcome.expect("pump exploded")
        });
        let outcome = task.join().await;
        assert_eq!(outcome.direction, Direction::Outbound);
        assert!(outcome.reason.is_error());
    }

    #[test]
    fn test_signal_from_direction() {
        assert_eq!(
            TerminationSignal::from(Direction::Inbound),
            TerminationSignal::PeerClosed
        );
        assert_eq!(
            TerminationSignal::from(Direction::Outbound),
            TerminationSignal::LocalEof
        );
    }
}
