//! Client-side synchronization of live vehicle telemetry.
//!
//! A [`LiveSync`] follows one subscription key at a time over a
//! `text/event-stream` channel, folding snapshot and delta events into a single
//! [`LiveState`] cell. [`spawn_polling`] is the fallback driver where push is
//! unavailable, and [`AutoFit`] turns state updates into map viewport commands.

pub mod api;
pub mod autofit;
pub mod backoff;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod polling;
pub mod reconciler;
pub mod session;
pub mod sse;

pub use api::{ApiClient, CarSummary, CreateShareRequest, ShareCreated};
pub use autofit::{
    AutoFit, AutoFitMode, Bounds, InteractionKind, InteractionTarget, MapInteraction,
    ViewportCommand,
};
pub use config::{MapConfig, PollingConfig, ReconnectConfig, SyncConfig};
pub use connector::{ConnectionState, ConnectionStatus, EventSink, StreamConnector};
pub use engine::{LiveSync, SubscriptionKey, build_client};
pub use error::{ApiError, ConfigError, Error, PayloadError, Result, SessionError};
pub use event::StreamEvent;
pub use model::{LatLon, LiveState, StatePatch};
pub use polling::{PollHandle, PollOptions, PollStatus, spawn_polling};
pub use reconciler::{Applied, Reconciler};
pub use session::exchange_session;
