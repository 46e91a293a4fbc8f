//! Establish the TCP connection.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::config::DEFAULT_DIAL_TIMEOUT;
use crate::connection::Connection;
use crate::timing::DialTimeout;
use std::{fmt, future::Future, io, time::Duration};
use thiserror::Error;
use tokio::net::{TcpStream, lookup_host};
use tracing::{debug, warn};

/// Where to connect and how long to try
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Upper bound for the whole dial, resolution included
    pub dial_timeout: DialTimeout,
}

impl ConnectionParameters {
    /// Parameters with the default dial timeout
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }

    /// Override the dial timeout
    #[must_use]
    pub fn with_timeout(mut self, dial_timeout: DialTimeout) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }
}

impl fmt::Display for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bracket IPv6 literals so the port stays readable
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Connector errors
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Nothing answered within the dial timeout
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
    /// Refused, unresolvable or otherwise impossible to reach
    #[error("cannot reach {addr}: {source}")]
    Unreachable {
        /// What we tried to reach
        addr: String,
        /// The last error seen
        source: io::Error,
    },
    /// Connected, but the socket could not be prepared for relaying
    #[error("cannot set up the connection: {0}")]
    Setup(#[source] io::Error),
}

/// Dial `params.host:params.port` once.
///
/// Every resolved address is tried in order until one accepts, all within
/// the single `dial_timeout`. A refusal fails immediately instead of
/// waiting out the timeout.
///
/// # Errors
/// [`ConnectError::Timeout`] when the deadline passes (or the OS gives up
/// with a timeout of its own), [`ConnectError::Setup`] if the connected
/// socket cannot be prepared, [`ConnectError::Unreachable`] otherwise.
#[tracing::instrument(skip_all, fields(target = %params), level = "debug")]
pub async fn connect(params: &ConnectionParameters) -> Result<Connection, ConnectError> {
    let stream = with_deadline(params.dial_timeout, dial(params)).await?;
    // Interactive traffic: don't sit on small writes
    if let Err(err) = stream.set_nodelay(true) {
        warn!("cannot set TCP_NODELAY: {err}");
    }
    Connection::new(stream).map_err(ConnectError::Setup)
}

/// Bound a dial with the timeout
pub(crate) async fn with_deadline<F, T>(timeout: DialTimeout, dial: F) -> Result<T, ConnectError>
where
    F: Future<Output = Result<T, ConnectError>>,
{
    timeout
        .timeout(dial)
        .await
        .unwrap_or_else(|_| Err(ConnectError::Timeout(timeout.as_duration())))
}

async fn dial(params: &ConnectionParameters) -> Result<TcpStream, ConnectError> {
    let target = params.to_string();
    let unreachable = |source| ConnectError::Unreachable {
        addr: target.clone(),
        source,
    };
    let addrs = lookup_host((params.host.as_str(), params.port))
        .await
        .map_err(unreachable)?;
    let mut last_err = None;
    for addr in addrs {
        debug!("trying {addr}");
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                debug!("{addr}: {err}");
                return Err(ConnectError::Timeout(params.dial_timeout.as_duration()));
            }
            Err(err) => {
                debug!("{addr}: {err}");
                last_err = Some(err);
            }
        }
    }
    Err(unreachable(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "no addresses to connect to")
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::net::TcpListener;

    #[test]
    fn test_parameters() {
        let params = ConnectionParameters::new("example.com", 23);
        assert_eq!(params.dial_timeout, DEFAULT_DIAL_TIMEOUT);
        assert_eq!(params.to_string(), "example.com:23");
        let params = ConnectionParameters::new("::1", 8080).with_timeout(DialTimeout::from_secs(3));
        assert_eq!(params.dial_timeout, DialTimeout::from_secs(3));
        assert_eq!(params.to_string(), "[::1]:8080");
    }

    #[tokio::test]
    async fn test_connect_to_listener() {
        crate::tests::setup_logging();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let params =
            ConnectionParameters::new("127.0.0.1", port).with_timeout(DialTimeout::from_secs(5));
        let start = Instant::now();
        let (connection, accepted) = tokio::join!(connect(&params), listener.accept());
        let connection = connection.unwrap();
        let (_, local_addr) = accepted.unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(connection.peer_addr().port(), port);
        let (handle, _reader, _writer) = connection.into_split();
        assert!(!handle.is_closed());
        assert_ne!(local_addr.port(), port);
    }

    #[tokio::test]
    async fn test_connect_by_name() {
        crate::tests::setup_logging();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // `localhost` may resolve to `::1` first, which refuses: the next
        // address must still be tried.
        let params =
            ConnectionParameters::new("localhost", port).with_timeout(DialTimeout::from_secs(5));
        let (connection, accepted) = tokio::join!(connect(&params), listener.accept());
        connection.unwrap();
        accepted.unwrap();
    }

    #[tokio::test]
    async fn test_refused_is_immediate() {
        crate::tests::setup_logging();
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let params =
            ConnectionParameters::new("127.0.0.1", port).with_timeout(DialTimeout::from_secs(5));
        let start = Instant::now();
        let err = connect(&params).await.unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(5));
        let ConnectError::Unreachable { addr, source } = err else {
            panic!("Expected Unreachable, got {err:?}");
        };
        assert_eq!(addr, format!("127.0.0.1:{port}"));
        assert_eq!(source.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_unresolvable() {
        crate::tests::setup_logging();
        let params = ConnectionParameters::new("host.invalid", 23)
            .with_timeout(DialTimeout::from_secs(5));
        let err = connect(&params).await.unwrap_err();
        // Resolvers in sandboxes may be slow rather than fail, but never succeed
        assert!(
            matches!(
                err,
                ConnectError::Unreachable { .. } | ConnectError::Timeout(_)
            ),
            "Expected Unreachable or Timeout, got {err:?}"
        );
    }

    #[tokio::test]
    async fn test_deadline_elapses() {
        crate::tests::setup_logging();
        let timeout = DialTimeout::from(Duration::from_millis(100));
        let start = Instant::now();
        let err = with_deadline(timeout, std::future::pending::<Result<(), ConnectError>>())
            .await
            .unwrap_err();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(2));
        assert!(matches!(err, ConnectError::Timeout(d) if d == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_deadline_passes_through_result() {
        crate::tests::setup_logging();
        let timeout = DialTimeout::from_secs(1);
        let value = with_deadline(timeout, async { Ok::<_, ConnectError>(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }
}
