//! An established connection to the remote peer.
//!
//! A [`Connection`] splits into a read half, a write half and a
//! [`CloseHandle`]. The halves go to the pumps; the handle stays with the
//! session, which is the only owner allowed to end the connection.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use parking_lot::Mutex;
use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Failure while shutting the connection down.
/// The connection counts as closed regardless.
#[derive(Debug, Error)]
#[error("failed to close the connection: {0}")]
pub struct CloseError(#[from] io::Error);

/// A resource that [`CloseHandle`] can shut down
pub trait Shutdown: Send + Debug {
    /// Shut down both directions, waking anyone blocked on the resource.
    ///
    /// # Errors
    /// Returns the OS error if the shutdown fails.
    fn shutdown_both(&self) -> io::Result<()>;
}

impl Shutdown for std::net::TcpStream {
    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(std::net::Shutdown::Both)
    }
}

#[derive(Debug)]
struct CloseInner {
    /// `None` once the close effect has run
    target: Mutex<Option<Box<dyn Shutdown>>>,
    closed_tx: watch::Sender<bool>,
    close_count: AtomicUsize,
}

/// Close-once control handle of a connection.
///
/// Cloning is cheap and every clone refers to the same guard.
#[derive(Debug, Clone)]
pub struct CloseHandle(Arc<CloseInner>);

impl CloseHandle {
    /// Guard `target` so that it is shut down at most once.
    #[must_use]
    pub fn new(target: impl Shutdown + 'static) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self(Arc::new(CloseInner {
            target: Mutex::new(Some(Box::new(target))),
            closed_tx,
            close_count: AtomicUsize::new(0),
        }))
    }

    /// Close the connection.
    ///
    /// Only the first call, among all clones and across threads, performs
    /// the close and returns `Ok(true)` (or `Err` if the OS complained).
    /// Every later call returns `Ok(false)` without side effects.
    pub fn close(&self) -> Result<bool, CloseError> {
        // Taking the target out under the lock decides the single winner
        let Some(target) = self.0.target.lock().take() else {
            trace!("connection already closed");
            return Ok(false);
        };
        self.0.close_count.fetch_add(1, Ordering::AcqRel);
        // Published before the shutdown so that a pump failing because of
        // it can tell this apart from a genuine I/O error.
        self.0.closed_tx.send_replace(true);
        let result = target.shutdown_both();
        drop(target);
        match result {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => {
                debug!("peer had already disconnected");
                Ok(true)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Whether [`close`](Self::close) has run
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.0.closed_tx.borrow()
    }

    /// How many times the close effect has run. Never more than one.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.0.close_count.load(Ordering::Acquire)
    }

    /// Obtain a receiver that resolves once the connection is closed
    #[must_use]
    pub fn watch(&self) -> CloseWatch {
        CloseWatch(self.0.closed_tx.subscribe())
    }
}

/// Observer side of a [`CloseHandle`].
#[derive(Debug, Clone)]
pub struct CloseWatch(watch::Receiver<bool>);

impl CloseWatch {
    /// Wait until the connection is closed.
    ///
    /// # Cancel Safety
    /// This method is cancel safe.
    pub async fn closed(&mut self) {
        // `Err` means every `CloseHandle` is gone and nobody is left to close
        // it: treat that as closed too.
        self.0.wait_for(|closed| *closed).await.ok();
    }

    /// Whether the connection has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.0.borrow()
    }
}

/// An open TCP connection, owned by the session once established.
#[derive(Debug)]
pub struct Connection {
    peer_addr: SocketAddr,
    close: CloseHandle,
    reader: ConnectionReader,
    writer: ConnectionWriter,
}

impl Connection {
    /// Take ownership of a connected stream.
    ///
    /// # Errors
    /// Fails if the socket cannot be duplicated for the close handle.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        // A duplicate descriptor lets the session shut the socket down while
        // the pumps own the halves.
        let stream = stream.into_std()?;
        let control = stream.try_clone()?;
        let stream = TcpStream::from_std(stream)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            peer_addr,
            close: CloseHandle::new(control),
            reader: ConnectionReader(reader),
            writer: ConnectionWriter(Some(writer)),
        })
    }

    /// Address of the remote peer
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Split into the close handle and the two halves
    #[must_use]
    pub fn into_split(self) -> (CloseHandle, ConnectionReader, ConnectionWriter) {
        (self.close, self.reader, self.writer)
    }
}

/// Read half of a [`Connection`]
#[derive(Debug)]
pub struct ConnectionReader(OwnedReadHalf);

impl AsyncRead for ConnectionReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

/// Write half of a [`Connection`].
///
/// Unlike [`OwnedWriteHalf`], dropping it does not send a FIN: only
/// [`CloseHandle::close`] ends the connection.
#[derive(Debug)]
pub struct ConnectionWriter(Option<OwnedWriteHalf>);

impl ConnectionWriter {
    fn half(&mut self) -> io::Result<Pin<&mut OwnedWriteHalf>> {
        self.0
            .as_mut()
            .map(Pin::new)
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }
}

impl AsyncWrite for ConnectionWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.half() {
            Ok(half) => half.poll_write(cx, buf),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.half() {
            Ok(half) => half.poll_flush(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.half() {
            Ok(half) => half.poll_shutdown(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

impl Drop for ConnectionWriter {
    fn drop(&mut self) {
        if let Some(half) = self.0.take() {
            half.forget();
        }
    }
}
