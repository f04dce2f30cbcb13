//! Error types, one per failure class.
//!
//! Transport failures never surface as errors: they only flip the connected
//! flag and drive reconnection. Payload and polling failures are logged and
//! dropped. Session failures end the attempt and are shown to the user.

/// Exchanging a share token for a session cookie failed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("share token is empty")]
    EmptyToken,

    #[error("session exchange failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("session exchange rejected ({status}): {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// A single stream event could not be understood.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed {event} payload: {source}")]
    Json {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown event type: {0}")]
    UnknownEvent(String),
}

/// A collaborator REST call failed.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request failed {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid api base url {url:?}: {reason}")]
    BaseUrl { url: String, reason: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("http client: {0}")]
    Client(#[source] reqwest::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
