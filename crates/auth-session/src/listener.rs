//! Identity event subscription
//!
//! Spawns a task that feeds provider session events to the orchestrator one
//! at a time, in emission order. The task only holds a `Weak` reference, so
//! it never keeps a torn-down orchestrator alive, and dropping the returned
//! `Subscription` aborts it.

use std::sync::Weak;

use identity::SessionEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::orchestrator::AuthSession;

/// Handle to a running event subscription. Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Stop receiving events.
    pub fn unsubscribe(self) {}

    /// Whether the listener task is still running.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn the event loop for `session`.
pub(crate) fn spawn_listener(
    session: Weak<AuthSession>,
    mut events: broadcast::Receiver<SessionEvent>,
) -> Subscription {
    let handle = tokio::spawn(async move {
        loop {
            let received = events.recv().await;
            let Some(orchestrator) = session.upgrade() else {
                debug!("auth session dropped, stopping event listener");
                return;
            };

            match received {
                Ok(event) => orchestrator.handle_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session events dropped, resyncing with provider");
                    orchestrator.resync().await;
                }
                Err(RecvError::Closed) => {
                    debug!("identity provider closed its event stream");
                    return;
                }
            }
        }
    });
    Subscription { handle }
}
