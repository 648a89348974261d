use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::store::{StoreOrigin, TaskEvent, TaskStore};

/// Subscription state machine for store notifications.
///
/// Idle holds no subscription; Subscribed holds one receiver bound to
/// one store origin. Rebinding releases the previous subscription
/// first, so handlers never accumulate across handle swaps, and events
/// from a stale origin are dropped.
#[derive(Default)]
pub struct Resync {
    state: State,
}

impl std::fmt::Debug for Resync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resync")
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

#[derive(Default)]
enum State {
    #[default]
    Idle,
    Subscribed {
        origin: StoreOrigin,
        rx: broadcast::Receiver<TaskEvent>,
    },
}

impl Resync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self) -> bool {
        matches!(self.state, State::Subscribed { .. })
    }

    /// Idle -> Subscribed (releasing any previous subscription).
    pub fn bind(&mut self, store: &dyn TaskStore) {
        self.release();
        let origin = store.origin();
        info!(?origin, "subscribed to store events");
        self.state = State::Subscribed {
            origin,
            rx: store.subscribe(),
        };
    }

    /// Subscribed -> Idle.
    pub fn release(&mut self) {
        if self.is_subscribed() {
            debug!("released store subscription");
        }
        self.state = State::Idle;
    }

    /// Waits for the next event from the bound store. Returns `None`
    /// when idle or when the store side closed the channel (the state
    /// drops back to Idle). Every returned event warrants a refresh
    /// with filter and page preserved.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        let State::Subscribed { origin, rx } = &mut self.state else {
            return None;
        };
        let origin = *origin;

        loop {
            match rx.recv().await {
                Ok(event) if event.origin == origin => return Some(event),
                Ok(event) => {
                    debug!(stale = ?event.origin, bound = ?origin, "dropped stale-origin event");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Missed notifications all collapse into the same
                    // full reload, so keep draining.
                    warn!(skipped, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.release();
                    return None;
                }
            }
        }
    }
}
