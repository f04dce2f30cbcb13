//! LiveSync: subscription lifecycle for the push channel.
//!
//! One subscription key at a time. Switching keys (or dropping the engine)
//! cancels the running task, waits for its channel to close, and discards the
//! old state before the next subscription starts from "no data".
//!
//! ```text
//! subscribe(key) ──► [session exchange] ──► StreamConnector ──► Publisher
//!                                                                 │
//!                          watch<Option<LiveState>> ◄── Reconciler┤
//!                          watch<ConnectionStatus>  ◄─────────────┘
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

use crate::config::SyncConfig;
use crate::connector::{ConnectionState, ConnectionStatus, EventSink, StreamConnector};
use crate::error::{Error, Result};
use crate::event::StreamEvent;
use crate::model::LiveState;
use crate::reconciler::Reconciler;
use crate::session::exchange_session;

/// What one synchronization channel is scoped to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    /// Admin view of a car, by id.
    Car(i64),
    /// Shared view; the token is exchanged for a session cookie first.
    Share(String),
    /// Shared stream relying on an already established session.
    Session,
}

impl SubscriptionKey {
    /// Share key for `token`, or `Session` when there is no token to exchange.
    pub fn share(token: Option<String>) -> Self {
        match token.filter(|t| !t.is_empty()) {
            Some(token) => Self::Share(token),
            None => Self::Session,
        }
    }

    fn stream_url(&self, config: &SyncConfig) -> String {
        match self {
            Self::Car(id) => config.admin_stream_url(*id),
            Self::Share(_) | Self::Session => config.share_stream_url(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Car(id) => write!(f, "car-{id}"),
            // never print the token itself
            Self::Share(_) => write!(f, "share"),
            Self::Session => write!(f, "session"),
        }
    }
}

/// Build the HTTP client the engine uses: cookie jar on, so the session
/// cookie from the exchange is presented on the stream request.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .cookie_store(true)
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(Error::Client)
}

struct ActiveSubscription {
    key: SubscriptionKey,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The synchronization engine.
pub struct LiveSync {
    config: Arc<SyncConfig>,
    client: Client,
    state_tx: watch::Sender<Option<LiveState>>,
    status_tx: watch::Sender<ConnectionStatus>,
    /// Bumped on every teardown; publishers from older epochs are ignored.
    epoch: Arc<AtomicU64>,
    active: Option<ActiveSubscription>,
}

impl LiveSync {
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_client(config, build_client()?))
    }

    /// Use a caller-provided client. It must have a cookie store for share
    /// subscriptions to work.
    pub fn with_client(config: SyncConfig, client: Client) -> Self {
        let (state_tx, _) = watch::channel(None);
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        Self {
            config: Arc::new(config),
            client,
            state_tx,
            status_tx,
            epoch: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Watch the merged state. `None` means no data for the current key.
    pub fn state(&self) -> watch::Receiver<Option<LiveState>> {
        self.state_tx.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn current(&self) -> Option<LiveState> {
        self.state_tx.borrow().clone()
    }

    pub fn current_status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn key(&self) -> Option<&SubscriptionKey> {
        self.active.as_ref().map(|a| &a.key)
    }

    /// Follow `key`. Re-subscribing to the active key is a no-op; any other
    /// key tears the current channel down first.
    pub async fn subscribe(&mut self, key: SubscriptionKey) {
        if self.key() == Some(&key) {
            return;
        }
        self.unsubscribe().await;

        let epoch = self.epoch.load(Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let publisher = Publisher {
            epoch,
            current_epoch: self.epoch.clone(),
            state_tx: self.state_tx.clone(),
            status_tx: self.status_tx.clone(),
            reconciler: Reconciler::new(),
            status: ConnectionStatus::default(),
        };

        info!(key = %key, "subscribing");
        let span = info_span!("subscription", key = %key, epoch);
        let task = tokio::spawn(
            run_subscription(
                self.client.clone(),
                self.config.clone(),
                key.clone(),
                cancel.clone(),
                publisher,
            )
            .instrument(span),
        );

        self.active = Some(ActiveSubscription { key, cancel, task });
    }

    /// Close the channel and discard all state. Consumers observe `None`
    /// immediately after this returns.
    pub async fn unsubscribe(&mut self) {
        self.retire();
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            if let Err(e) = active.task.await {
                if e.is_panic() {
                    error!(key = %active.key, "subscription task panicked");
                }
            }
            info!(key = %active.key, "unsubscribed");
        }
    }

    /// Invalidate the current epoch and clear both cells in one step, so a
    /// late publish from the old task can never land after the reset.
    fn retire(&self) {
        self.state_tx.send_modify(|slot| {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *slot = None;
        });
        self.status_tx.send_replace(ConnectionStatus::default());
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}

async fn run_subscription(
    client: Client,
    config: Arc<SyncConfig>,
    key: SubscriptionKey,
    cancel: CancellationToken,
    mut publisher: Publisher,
) {
    if let SubscriptionKey::Share(token) = &key {
        publisher.set_state(ConnectionState::Connecting);
        let session_url = config.session_url();
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = exchange_session(&client, &session_url, token) => result,
        };
        if let Err(e) = result {
            error!(error = %e, "session exchange failed, not opening stream");
            publisher.session_failed(e.to_string());
            return;
        }
    }

    let mut connector =
        StreamConnector::new(client, key.stream_url(&config), &config.reconnect, cancel);
    connector.run(&mut publisher).await;

    let (snapshots, deltas, ignored) = publisher.reconciler.counters();
    info!(snapshots, deltas, ignored, "subscription ended");
}

/// Event sink for one subscription: applies events to the reconciler and
/// publishes results, but only while its epoch is current.
struct Publisher {
    epoch: u64,
    current_epoch: Arc<AtomicU64>,
    state_tx: watch::Sender<Option<LiveState>>,
    status_tx: watch::Sender<ConnectionStatus>,
    reconciler: Reconciler,
    status: ConnectionStatus,
}

impl Publisher {
    fn is_current(&self) -> bool {
        self.current_epoch.load(Ordering::SeqCst) == self.epoch
    }

    fn publish_state(&self) {
        let state = self.reconciler.state().cloned();
        self.state_tx.send_if_modified(|slot| {
            if !self.is_current() {
                return false;
            }
            *slot = state;
            true
        });
    }

    fn publish_status(&self) {
        let status = self.status.clone();
        self.status_tx.send_if_modified(|slot| {
            if !self.is_current() || *slot == status {
                return false;
            }
            *slot = status;
            true
        });
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.status.state = state;
        self.publish_status();
    }

    fn session_failed(&mut self, message: String) {
        self.status.state = ConnectionState::Disconnected;
        self.status.session_error = Some(message);
        self.publish_status();
    }
}

impl EventSink for Publisher {
    fn on_connecting(&mut self, attempt: u32) {
        self.status.reconnect_attempt = attempt;
        self.set_state(ConnectionState::Connecting);
    }

    fn on_event(&mut self, event: StreamEvent) {
        let now = Utc::now();
        self.status.last_event_at = Some(now);
        match &event {
            StreamEvent::Open => {
                self.status.state = ConnectionState::Connected;
                self.status.last_error = None;
                self.status.reconnect_attempt = 0;
            }
            StreamEvent::Error { message } => {
                self.status.state = ConnectionState::Disconnected;
                self.status.last_error = Some(message.clone());
            }
            StreamEvent::Heartbeat { server_time } => {
                self.status.last_heartbeat = Some(server_time.unwrap_or(now));
            }
            StreamEvent::Snapshot(_) | StreamEvent::Delta(_) => {}
        }

        let applied = self.reconciler.apply(event);
        self.status.stale = self.reconciler.is_stale();
        if applied.changed_state() {
            self.publish_state();
        }
        self.publish_status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatePatch;

    fn publisher(epoch: &Arc<AtomicU64>) -> (Publisher, watch::Receiver<Option<LiveState>>) {
        let (state_tx, state_rx) = watch::channel(None);
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        let p = Publisher {
            epoch: epoch.load(Ordering::SeqCst),
            current_epoch: epoch.clone(),
            state_tx,
            status_tx,
            reconciler: Reconciler::new(),
            status: ConnectionStatus::default(),
        };
        (p, state_rx)
    }

    fn snapshot(ts_ms: i64) -> StreamEvent {
        StreamEvent::Snapshot(Box::new(LiveState {
            ts_ms,
            ..Default::default()
        }))
    }

    #[test]
    fn test_share_key_without_token_is_session() {
        assert_eq!(SubscriptionKey::share(None), SubscriptionKey::Session);
        assert_eq!(
            SubscriptionKey::share(Some(String::new())),
            SubscriptionKey::Session
        );
        assert_eq!(
            SubscriptionKey::share(Some("t".into())),
            SubscriptionKey::Share("t".into())
        );
    }

    #[test]
    fn test_key_display_hides_token() {
        assert_eq!(SubscriptionKey::Share("secret".into()).to_string(), "share");
        assert_eq!(SubscriptionKey::Car(4).to_string(), "car-4");
    }

    #[test]
    fn test_stream_urls() {
        let config = SyncConfig {
            api_base_url: "http://h".into(),
            ..Default::default()
        };
        assert_eq!(
            SubscriptionKey::Car(2).stream_url(&config),
            "http://h/api/v1/admin/cars/2/stream"
        );
        assert_eq!(
            SubscriptionKey::Share("x".into()).stream_url(&config),
            "http://h/api/v1/stream"
        );
    }

    #[test]
    fn test_publisher_applies_events() {
        let epoch = Arc::new(AtomicU64::new(0));
        let (mut p, rx) = publisher(&epoch);
        p.on_connecting(0);
        p.on_event(StreamEvent::Open);
        p.on_event(snapshot(10));
        p.on_event(StreamEvent::Delta(Box::new(StatePatch {
            ts_ms: Some(11),
            ..Default::default()
        })));
        assert_eq!(rx.borrow().as_ref().map(|s| s.ts_ms), Some(11));
        assert!(p.status.is_connected());
    }

    #[test]
    fn test_stale_publisher_is_a_noop() {
        let epoch = Arc::new(AtomicU64::new(0));
        let (mut p, rx) = publisher(&epoch);
        epoch.fetch_add(1, Ordering::SeqCst);
        p.on_event(snapshot(10));
        assert!(rx.borrow().is_none());
    }

    #[test]
    fn test_error_sets_disconnected_and_stale() {
        let epoch = Arc::new(AtomicU64::new(0));
        let (mut p, _rx) = publisher(&epoch);
        p.on_event(StreamEvent::Open);
        p.on_event(snapshot(1));
        p.on_event(StreamEvent::Error {
            message: "reset".into(),
        });
        assert_eq!(p.status.state, ConnectionState::Disconnected);
        assert_eq!(p.status.last_error.as_deref(), Some("reset"));
        assert!(p.status.stale);
    }

    #[test]
    fn test_heartbeat_without_server_time_uses_local_clock() {
        let epoch = Arc::new(AtomicU64::new(0));
        let (mut p, _rx) = publisher(&epoch);
        p.on_event(StreamEvent::Heartbeat { server_time: None });
        assert!(p.status.last_heartbeat.is_some());
    }
}
