//! State Reconciler
//!
//! Folds the ordered event stream of one subscription into a single
//! `LiveState`. Events are applied strictly in arrival order; there is no
//! reordering or coalescing here.

use tracing::{debug, warn};

use crate::event::StreamEvent;
use crate::model::LiveState;

/// What applying one event did to the state cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// A snapshot replaced the whole state.
    Replaced,
    /// A delta was merged onto the baseline.
    Merged,
    /// A delta was dropped.
    Ignored(IgnoreReason),
    /// The event carries no state (open, error, heartbeat).
    Unchanged,
}

impl Applied {
    pub fn changed_state(self) -> bool {
        matches!(self, Applied::Replaced | Applied::Merged)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No snapshot has been received on this subscription.
    NoBaseline,
    /// The channel (re)connected and no snapshot has followed yet.
    AwaitingSnapshot,
}

/// The reducer and its state cell.
#[derive(Debug, Default)]
pub struct Reconciler {
    state: Option<LiveState>,
    /// True once a snapshot has arrived on the current connection.
    synced: bool,
    snapshots: u64,
    deltas: u64,
    ignored: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest merged state, `None` until the first snapshot.
    pub fn state(&self) -> Option<&LiveState> {
        self.state.as_ref()
    }

    /// True when the state may lag behind the server: a reconnect happened
    /// and no snapshot has re-established the baseline yet.
    pub fn is_stale(&self) -> bool {
        self.state.is_some() && !self.synced
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// (snapshots applied, deltas merged, deltas ignored)
    pub fn counters(&self) -> (u64, u64, u64) {
        (self.snapshots, self.deltas, self.ignored)
    }

    pub fn apply(&mut self, event: StreamEvent) -> Applied {
        match event {
            StreamEvent::Open | StreamEvent::Error { .. } => {
                // Any (re)connection invalidates the delta chain until a snapshot arrives.
                self.synced = false;
                Applied::Unchanged
            }
            StreamEvent::Snapshot(state) => {
                if !state.history.is_time_ordered() || !state.is_path_time_ordered() {
                    warn!(ts_ms = state.ts_ms, "snapshot carries out-of-order samples");
                }
                self.state = Some(*state);
                self.synced = true;
                self.snapshots += 1;
                debug!(ts_ms = self.state.as_ref().map(|s| s.ts_ms), "snapshot applied");
                Applied::Replaced
            }
            StreamEvent::Delta(patch) => {
                let reason = match (&mut self.state, self.synced) {
                    (Some(state), true) => {
                        state.apply_patch(*patch);
                        self.deltas += 1;
                        return Applied::Merged;
                    }
                    (None, _) => IgnoreReason::NoBaseline,
                    (Some(_), false) => IgnoreReason::AwaitingSnapshot,
                };
                self.ignored += 1;
                warn!(?reason, "delta ignored");
                Applied::Ignored(reason)
            }
            StreamEvent::Heartbeat { .. } => Applied::Unchanged,
        }
    }

    /// Drop the state cell entirely (subscription change or teardown).
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
