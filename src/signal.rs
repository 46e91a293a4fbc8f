//! Process signals that end the session.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use tracing::{debug, warn};

/// Resolve once the process is asked to stop: Ctrl-C, or `SIGTERM` on Unix.
///
/// A signal whose handler cannot be registered is skipped with a warning
/// instead of ending the session.
pub async fn interrupted() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Cannot listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        () = ctrl_c => debug!("received Ctrl-C"),
        () = terminate => debug!("received SIGTERM"),
    }
}
