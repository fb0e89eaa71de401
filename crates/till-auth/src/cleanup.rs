//! Background cleanup loop for expired sessions and revocation entries

use crate::service::AuthService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Handle to a running cleanup loop
#[derive(Debug)]
pub struct CleanupTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CleanupTask {
    /// Token that stops the loop when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the loop and wait for it to exit
    ///
    /// A pass already in progress finishes first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Run [`AuthService::cleanup_expired_sessions`] every `interval`
///
/// Must be called from within a tokio runtime. The first pass runs one
/// interval after spawning.
pub fn spawn_cleanup(service: Arc<AuthService>, interval: Duration) -> CleanupTask {
    let cancel = CancellationToken::new();

    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            info!("session cleanup started (interval={interval:?})");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("session cleanup stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        debug!("session cleanup scan");
                        service.cleanup_expired_sessions();
                    }
                }
            }
        })
    };

    CleanupTask { cancel, handle }
}
