//! Stream Connector
//!
//! Owns the lifecycle of one server-push channel: connect, read the
//! `text/event-stream` body, hand every decoded event to an [`EventSink`] in
//! arrival order, and reconnect with capped exponential backoff when the
//! channel fails or the server ends it. Cancellation closes the channel.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::ReconnectConfig;
use crate::event::StreamEvent;
use crate::sse::SseDecoder;

/// Channel state as seen by consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Everything a consumer may show about the synchronization attempt.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Last transport failure, cleared on the next successful open.
    pub last_error: Option<String>,
    /// Session exchange failure; terminal for the attempt.
    pub session_error: Option<String>,
    /// Consecutive failed connection attempts.
    pub reconnect_attempt: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Local time of the most recent event of any kind.
    pub last_event_at: Option<DateTime<Utc>>,
    /// A reconnect happened and no snapshot has arrived since.
    pub stale: bool,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// What a banner should say, if anything.
    pub fn banner(&self) -> Option<String> {
        if let Some(err) = &self.session_error {
            return Some(err.clone());
        }
        match self.state {
            ConnectionState::Connected => None,
            ConnectionState::Connecting => Some("connecting".to_string()),
            ConnectionState::Disconnected => Some(match &self.last_error {
                Some(err) => format!("not connected: {err}"),
                None => "not connected".to_string(),
            }),
        }
    }
}

/// Receiver of connector output. Calls arrive sequentially, in stream order.
pub trait EventSink {
    /// A connection attempt is starting. `attempt` counts failures since the
    /// last successful open.
    fn on_connecting(&mut self, attempt: u32);

    fn on_event(&mut self, event: StreamEvent);
}

/// How one connection attempt ended.
#[derive(Debug)]
struct AttemptEnd {
    opened: bool,
    retry_hint: Option<Duration>,
    reason: String,
}

pub struct StreamConnector {
    client: Client,
    url: String,
    backoff: Backoff,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

impl StreamConnector {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        reconnect: &ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            backoff: Backoff::new(reconnect.base(), reconnect.max()),
            idle_timeout: reconnect.idle_timeout(),
            cancel,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run until cancelled. Never returns on its own.
    pub async fn run<S: EventSink>(&mut self, sink: &mut S) {
        let cancel = self.cancel.clone();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            sink.on_connecting(self.backoff.failures());

            let end = tokio::select! {
                _ = cancel.cancelled() => break,
                end = self.attempt(sink) => end,
            };

            if end.opened {
                self.backoff.reset();
            }
            let delay = match end.retry_hint {
                Some(hint) if end.opened => {
                    self.backoff.fail();
                    hint
                }
                _ => self.backoff.fail(),
            };

            warn!(
                url = %self.url,
                reason = %end.reason,
                retry_in_ms = delay.as_millis() as u64,
                "stream disconnected"
            );
            sink.on_event(StreamEvent::Error {
                message: end.reason,
            });

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!(url = %self.url, "stream connector stopped");
    }

    async fn attempt<S: EventSink>(&self, sink: &mut S) -> AttemptEnd {
        let mut end = AttemptEnd {
            opened: false,
            retry_hint: None,
            reason: String::new(),
        };

        let resp = match self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                end.reason = format!("connect failed: {e}");
                return end;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            end.reason = format!("stream request rejected: {status}");
            return end;
        }

        info!(url = %self.url, "stream open");
        end.opened = true;
        sink.on_event(StreamEvent::Open);

        let mut decoder = SseDecoder::new();
        let mut body = resp.bytes_stream();
        loop {
            let chunk = match tokio::time::timeout(self.idle_timeout, body.next()).await {
                Err(_) => {
                    end.reason = format!("no data for {:?}", self.idle_timeout);
                    return end;
                }
                Ok(None) => {
                    end.reason = "stream closed by server".to_string();
                    return end;
                }
                Ok(Some(Err(e))) => {
                    end.reason = format!("stream read failed: {e}");
                    return end;
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            for frame in decoder.feed(&chunk) {
                if frame.retry.is_some() {
                    end.retry_hint = frame.retry;
                }
                match StreamEvent::try_from(&frame) {
                    Ok(event) => {
                        debug!(kind = event.kind(), "stream event");
                        sink.on_event(event);
                    }
                    Err(e) => {
                        warn!(event = %frame.event, error = %e, "dropping stream event");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_prefers_session_error() {
        let status = ConnectionStatus {
            state: ConnectionState::Disconnected,
            last_error: Some("reset".into()),
            session_error: Some("session exchange rejected (401)".into()),
            ..Default::default()
        };
        assert_eq!(
            status.banner().as_deref(),
            Some("session exchange rejected (401)")
        );
    }

    #[test]
    fn test_banner_when_disconnected() {
        let status = ConnectionStatus {
            last_error: Some("stream closed by server".into()),
            ..Default::default()
        };
        assert_eq!(
            status.banner().as_deref(),
            Some("not connected: stream closed by server")
        );
        assert!(!status.is_connected());
    }

    #[test]
    fn test_no_banner_when_connected() {
        let status = ConnectionStatus {
            state: ConnectionState::Connected,
            ..Default::default()
        };
        assert!(status.banner().is_none());
    }
}
