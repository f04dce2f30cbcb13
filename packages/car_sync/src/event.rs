//! Typed stream events.
//!
//! The connector turns every transport occurrence (channel opened, channel
//! failed, decoded frame) into one `StreamEvent`; the reconciler is a single
//! reducer over this enum.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::PayloadError;
use crate::model::{LiveState, StatePatch};
use crate::sse::SseFrame;

#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// The channel is open and delivering.
    Open,
    /// The channel failed or ended.
    Error { message: String },
    /// Authoritative full state.
    Snapshot(Box<LiveState>),
    /// Partial state to merge onto the current baseline.
    Delta(Box<StatePatch>),
    /// Keep-alive; carries the server clock when provided.
    Heartbeat { server_time: Option<DateTime<Utc>> },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Open => "open",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Snapshot(_) => "snapshot",
            StreamEvent::Delta(_) => "delta",
            StreamEvent::Heartbeat { .. } => "heartbeat",
        }
    }
}

#[derive(Deserialize)]
struct HeartbeatPayload {
    #[serde(default)]
    server_time: Option<DateTime<Utc>>,
}

impl TryFrom<&SseFrame> for StreamEvent {
    type Error = PayloadError;

    fn try_from(frame: &SseFrame) -> Result<Self, PayloadError> {
        match frame.event.as_str() {
            "snapshot" => {
                let state: LiveState =
                    serde_json::from_str(&frame.data).map_err(|source| PayloadError::Json {
                        event: "snapshot",
                        source,
                    })?;
                Ok(StreamEvent::Snapshot(Box::new(state)))
            }
            "delta" => {
                let patch: StatePatch =
                    serde_json::from_str(&frame.data).map_err(|source| PayloadError::Json {
                        event: "delta",
                        source,
                    })?;
                Ok(StreamEvent::Delta(Box::new(patch)))
            }
            "heartbeat" => {
                // The payload only adds liveness detail; an unreadable body is still a heartbeat.
                let server_time = serde_json::from_str::<HeartbeatPayload>(&frame.data)
                    .ok()
                    .and_then(|p| p.server_time);
                Ok(StreamEvent::Heartbeat { server_time })
            }
            other => Err(PayloadError::UnknownEvent(other.to_string())),
        }
    }
}
