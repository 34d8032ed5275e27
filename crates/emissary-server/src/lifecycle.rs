//! Signal handling.
//!
//! The parent coding agent sends SIGTERM to abort a single request, not to
//! kill the server: cancel everything in flight and keep serving. SIGINT is
//! an operator stop: cancel, then exit.

use std::sync::Arc;

use tracing::{info, warn};

use crate::ops::OperationManager;

pub fn install_signal_handlers(ops: Arc<OperationManager>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let ops_term = Arc::clone(&ops);
        tokio::spawn(async move {
            let mut term = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "cannot install SIGTERM handler");
                    return;
                }
            };
            loop {
                term.recv().await;
                let cancelled = ops_term.cancel_all_operations();
                info!(
                    cancelled,
                    "SIGTERM received - cancelled active operations, server continues"
                );
                // Deliberately no exit: the server stays up for new requests.
            }
        });

        tokio::spawn(async move {
            let mut int = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "cannot install SIGINT handler");
                    return;
                }
            };
            int.recv().await;
            let cancelled = ops.cancel_all_operations();
            info!(cancelled, "SIGINT received - shutting down");
            std::process::exit(0);
        });
    }

    #[cfg(not(unix))]
    {
        let _ = ops;
    }
}
