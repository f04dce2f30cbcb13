//! Session Exchanger
//!
//! Turns an opaque share token into a server-side session. The server answers
//! with a session cookie which lands in the shared `reqwest` cookie jar, so the
//! stream request that follows is authenticated without carrying the token.

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::SessionError;

#[derive(Serialize)]
struct SessionRequest<'a> {
    token: &'a str,
}

/// One-shot token → session exchange against `url`.
///
/// Not retried: a failure ends the synchronization attempt and the caller has
/// to trigger a new one.
pub async fn exchange_session(client: &Client, url: &str, token: &str) -> Result<(), SessionError> {
    if token.is_empty() {
        return Err(SessionError::EmptyToken);
    }

    debug!(%url, "exchanging share token for session");
    let resp = client
        .post(url)
        .json(&SessionRequest { token })
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(SessionError::Rejected { status, body });
    }

    info!("session established");
    Ok(())
}
