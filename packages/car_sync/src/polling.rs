//! Polling Fallback
//!
//! Repeatedly runs a caller-supplied fetch on a timer. Ticks are strictly
//! sequential: the next one is scheduled only after the previous fetch has
//! settled. Failures switch the delay to a doubling backoff and are reported
//! only through [`PollStatus::last_error`]; the loop never stops by itself.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::config::{PollingConfig, SyncConfig};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollStatus {
    /// A fetch is in flight.
    pub is_polling: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Delay until the next tick; the backoff delay after a failure.
    pub next_delay: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct PollOptions {
    pub interval: Duration,
    pub backoff_seed: Duration,
    pub backoff_max: Duration,
}

impl PollOptions {
    pub fn new(interval: Duration, polling: &PollingConfig) -> Self {
        Self {
            interval,
            backoff_seed: polling.seed(),
            backoff_max: polling.max(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.poll_interval(), &config.polling)
    }
}

/// Running poll loop. Dropping the handle stops it.
pub struct PollHandle<T> {
    value: watch::Receiver<Option<T>>,
    status: watch::Receiver<PollStatus>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<T> PollHandle<T> {
    /// Latest successfully fetched value.
    pub fn value(&self) -> watch::Receiver<Option<T>> {
        self.value.clone()
    }

    pub fn status(&self) -> watch::Receiver<PollStatus> {
        self.status.clone()
    }

    /// Stop issuing ticks. A fetch still in flight is abandoned and its
    /// result is never published.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl<T> Drop for PollHandle<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start polling `fetch`. The first tick runs immediately.
pub fn spawn_polling<T, E, F, Fut>(options: PollOptions, fetch: F) -> PollHandle<T>
where
    T: Send + Sync + 'static,
    E: Display + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let (value_tx, value) = watch::channel(None);
    let (status_tx, status) = watch::channel(PollStatus::default());
    let cancel = CancellationToken::new();

    let task = tokio::spawn(poll_loop(
        options,
        fetch,
        value_tx,
        status_tx,
        cancel.clone(),
    ));

    PollHandle {
        value,
        status,
        cancel,
        task: Some(task),
    }
}

async fn poll_loop<T, E, F, Fut>(
    options: PollOptions,
    mut fetch: F,
    value_tx: watch::Sender<Option<T>>,
    status_tx: watch::Sender<PollStatus>,
    cancel: CancellationToken,
) where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = Backoff::new(options.backoff_seed, options.backoff_max);

    loop {
        status_tx.send_modify(|s| s.is_polling = true);

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = fetch() => result,
        };

        // a tick that settles after teardown must not touch state; the
        // cancellation check happens under the watch lock
        let delay = match result {
            Ok(value) => {
                backoff.reset();
                let published = value_tx.send_if_modified(|slot| {
                    if cancel.is_cancelled() {
                        return false;
                    }
                    *slot = Some(value);
                    true
                });
                if !published {
                    break;
                }
                let delay = options.interval;
                status_tx.send_if_modified(|s| {
                    if cancel.is_cancelled() {
                        return false;
                    }
                    s.is_polling = false;
                    s.last_updated = Some(Utc::now());
                    s.last_error = None;
                    s.next_delay = Some(delay);
                    true
                });
                debug!(delay_ms = delay.as_millis() as u64, "poll succeeded");
                delay
            }
            Err(e) => {
                let delay = backoff.fail();
                let message = e.to_string();
                let published = status_tx.send_if_modified(|s| {
                    if cancel.is_cancelled() {
                        return false;
                    }
                    s.is_polling = false;
                    s.last_error = Some(message.clone());
                    s.next_delay = Some(delay);
                    true
                });
                if !published {
                    break;
                }
                warn!(
                    error = %message,
                    failures = backoff.failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "poll failed"
                );
                delay
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!("polling stopped");
}
