//! End-to-end behavior against a local event-stream server.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::json;

use car_sync::{
    ConnectionState, LiveSync, ReconnectConfig, SubscriptionKey, SyncConfig, build_client,
};

const WAIT: Duration = Duration::from_secs(5);
const SESSION_COOKIE: &str = "sid=s3cret";

/// What one stream connection sends.
struct Script {
    frames: Vec<String>,
    delay: Duration,
    /// Keep the connection open after the last frame.
    keep_open: bool,
    /// Answer with this status instead of a stream.
    reject: Option<StatusCode>,
}

impl Script {
    fn open(frames: Vec<String>) -> Self {
        Self {
            frames,
            delay: Duration::ZERO,
            keep_open: true,
            reject: None,
        }
    }
}

type ScriptFn = dyn Fn(i64, usize) -> Script + Send + Sync;

struct TestServer {
    script: Box<ScriptFn>,
    connections: AtomicUsize,
    session_calls: AtomicUsize,
}

fn frame(event: &str, data: serde_json::Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

fn snapshot(ts_ms: i64, lat: f64) -> String {
    frame(
        "snapshot",
        json!({
            "ts_ms": ts_ms,
            "location": {"lat": lat, "lon": 4.0},
            "battery": {"soc_pct": 80},
            "climate": {},
            "tpms_bar": {},
            "history_30s": {"soc_pct": [{"ts_ms": 0, "v": 80}]},
            "path_30s": []
        }),
    )
}

fn event_stream(script: Script) -> Response {
    if let Some(status) = script.reject {
        return (status, "try again later").into_response();
    }
    let delay = script.delay;
    let frames = futures::stream::iter(script.frames.into_iter().map(Ok::<_, Infallible>));
    let head = futures::stream::once(async move {
        tokio::time::sleep(delay).await;
        Ok::<_, Infallible>(": hello\n\n".to_string())
    });
    let body = if script.keep_open {
        Body::from_stream(head.chain(frames).chain(futures::stream::pending()))
    } else {
        Body::from_stream(head.chain(frames))
    };
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn car_stream(State(server): State<Arc<TestServer>>, Path(id): Path<i64>) -> Response {
    let n = server.connections.fetch_add(1, Ordering::SeqCst);
    event_stream((server.script)(id, n))
}

async fn share_stream(State(server): State<Arc<TestServer>>, headers: HeaderMap) -> Response {
    let has_session = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(SESSION_COOKIE));
    if !has_session {
        return (StatusCode::UNAUTHORIZED, "no session").into_response();
    }
    let n = server.connections.fetch_add(1, Ordering::SeqCst);
    event_stream((server.script)(0, n))
}

async fn session(
    State(server): State<Arc<TestServer>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    server.session_calls.fetch_add(1, Ordering::SeqCst);
    if body["token"] == "good" {
        let cookie = format!("{SESSION_COOKIE}; Path=/; HttpOnly");
        ([(header::SET_COOKIE, cookie)], Json(json!({"ok": true}))).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "invalid share token").into_response()
    }
}

async fn serve(script: impl Fn(i64, usize) -> Script + Send + Sync + 'static) -> (SocketAddr, Arc<TestServer>) {
    let server = Arc::new(TestServer {
        script: Box::new(script),
        connections: AtomicUsize::new(0),
        session_calls: AtomicUsize::new(0),
    });
    let app = Router::new()
        .route("/api/v1/admin/cars/{id}/stream", get(car_stream))
        .route("/api/v1/stream", get(share_stream))
        .route("/api/v1/session", post(session))
        .with_state(server.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, server)
}

fn engine(addr: SocketAddr) -> LiveSync {
    let config = SyncConfig {
        api_base_url: format!("http://{addr}"),
        reconnect: ReconnectConfig {
            base_ms: 50,
            max_ms: 200,
            idle_timeout_ms: 5_000,
        },
        ..Default::default()
    };
    LiveSync::with_client(config, build_client().unwrap())
}

#[tokio::test]
async fn snapshot_then_deltas_with_a_malformed_event_in_between() {
    let (addr, _server) = serve(|_, _| {
        Script::open(vec![
            snapshot(1_000, 52.0),
            frame("delta", json!({"ts_ms": 2_000, "battery": {"soc_pct": 81}, "history_30s": {"soc_pct": [{"ts_ms": 0, "v": 80}, {"ts_ms": 30, "v": 81}]}})),
            "event: delta\ndata: {not json\n\n".to_string(),
            frame("delta", json!({"ts_ms": 3_000, "location": {"lat": 52.1, "lon": 4.0}})),
            frame("heartbeat", json!({"server_time": "2026-01-01T00:00:00.123456789Z"})),
        ])
    })
    .await;

    let mut sync = engine(addr);
    let mut state = sync.state();
    let mut status = sync.status();
    sync.subscribe(SubscriptionKey::Car(1)).await;

    let merged = tokio::time::timeout(WAIT, state.wait_for(|s| s.as_ref().is_some_and(|s| s.ts_ms == 3_000)))
        .await
        .unwrap()
        .unwrap()
        .clone()
        .unwrap();
    assert_eq!(merged.battery.soc_pct, Some(81.0));
    assert_eq!(merged.battery.power_w, None);
    assert_eq!(merged.location.lat, Some(52.1));
    assert_eq!(merged.history.get("soc_pct").unwrap().len(), 2);

    let st = tokio::time::timeout(WAIT, status.wait_for(|s| s.last_heartbeat.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(st.state, ConnectionState::Connected);
    assert!(st.last_error.is_none());
    assert!(!st.stale);

    sync.unsubscribe().await;
    assert!(sync.current().is_none());
}

#[tokio::test]
async fn share_token_is_exchanged_for_a_session_cookie() {
    let (addr, server) = serve(|_, _| Script::open(vec![snapshot(7, 48.8)])).await;

    let mut sync = engine(addr);
    let mut state = sync.state();
    sync.subscribe(SubscriptionKey::Share("good".into())).await;

    tokio::time::timeout(WAIT, state.wait_for(|s| s.as_ref().is_some_and(|s| s.ts_ms == 7)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.session_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
    assert!(sync.current_status().session_error.is_none());
}

#[tokio::test]
async fn rejected_session_never_opens_the_stream() {
    let (addr, server) = serve(|_, _| Script::open(vec![snapshot(7, 48.8)])).await;

    let mut sync = engine(addr);
    let mut status = sync.status();
    sync.subscribe(SubscriptionKey::Share("bad".into())).await;

    let st = tokio::time::timeout(WAIT, status.wait_for(|s| s.session_error.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(st.state, ConnectionState::Disconnected);
    assert!(st.banner().unwrap().contains("401"));

    // not retried on its own
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.session_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.connections.load(Ordering::SeqCst), 0);
    assert!(sync.current().is_none());
}

#[tokio::test]
async fn switching_cars_discards_the_old_state() {
    let (addr, _server) = serve(|id, _| {
        let mut script = Script::open(vec![snapshot(id * 100, 50.0 + id as f64)]);
        if id == 2 {
            script.delay = Duration::from_millis(200);
        }
        script
    })
    .await;

    let mut sync = engine(addr);
    let mut state = sync.state();
    sync.subscribe(SubscriptionKey::Car(1)).await;
    tokio::time::timeout(WAIT, state.wait_for(|s| s.as_ref().is_some_and(|s| s.ts_ms == 100)))
        .await
        .unwrap()
        .unwrap();

    sync.subscribe(SubscriptionKey::Car(2)).await;
    assert!(sync.current().is_none());
    assert_eq!(sync.key(), Some(&SubscriptionKey::Car(2)));

    let seen = tokio::time::timeout(WAIT, state.wait_for(|s| s.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone()
        .unwrap();
    assert_eq!(seen.ts_ms, 200);
}

#[tokio::test]
async fn reconnect_waits_for_a_fresh_snapshot() {
    let (addr, server) = serve(|_, n| match n {
        // first connection ends right after its snapshot
        0 => Script {
            frames: vec![snapshot(1, 52.0)],
            delay: Duration::ZERO,
            keep_open: false,
            reject: None,
        },
        _ => Script::open(vec![
            frame("delta", json!({"ts_ms": 99})),
            snapshot(2, 52.0),
            frame("delta", json!({"ts_ms": 3})),
        ]),
    })
    .await;

    let mut sync = engine(addr);
    let mut state = sync.state();
    sync.subscribe(SubscriptionKey::Car(1)).await;

    let mut seen = Vec::new();
    tokio::time::timeout(WAIT, async {
        loop {
            state.changed().await.unwrap();
            let ts = state.borrow_and_update().as_ref().map(|s| s.ts_ms);
            if let Some(ts) = ts {
                seen.push(ts);
                if ts == 3 {
                    break;
                }
            }
        }
    })
    .await
    .unwrap();

    assert!(!seen.contains(&99), "delta before the fresh snapshot was applied: {seen:?}");
    assert!(server.connections.load(Ordering::SeqCst) >= 2);
    let status = sync.current_status();
    assert!(status.is_connected());
    assert!(!status.stale);
}

#[tokio::test]
async fn resubscribing_the_same_key_keeps_the_channel() {
    let (addr, server) = serve(|_, _| Script::open(vec![snapshot(5, 52.0)])).await;

    let mut sync = engine(addr);
    let mut state = sync.state();
    sync.subscribe(SubscriptionKey::Car(3)).await;
    tokio::time::timeout(WAIT, state.wait_for(|s| s.is_some()))
        .await
        .unwrap()
        .unwrap();

    sync.subscribe(SubscriptionKey::Car(3)).await;
    assert!(sync.current().is_some());
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_stream_request_shows_disconnected_until_retried() {
    let (addr, server) = serve(|_, n| match n {
        0 => Script {
            reject: Some(StatusCode::SERVICE_UNAVAILABLE),
            ..Script::open(Vec::new())
        },
        _ => Script {
            delay: Duration::from_millis(200),
            ..Script::open(vec![snapshot(8, 52.0)])
        },
    })
    .await;

    let mut sync = engine(addr);
    let mut status = sync.status();
    let mut state = sync.state();
    sync.subscribe(SubscriptionKey::Car(4)).await;

    let st = tokio::time::timeout(WAIT, status.wait_for(|s| s.last_error.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone();
    // the retry may already be connecting; the error stays until an open
    assert_ne!(st.state, ConnectionState::Connected);
    assert!(st.last_error.as_deref().unwrap().contains("503"));
    assert!(st.banner().is_some());
    assert!(sync.current().is_none());

    tokio::time::timeout(WAIT, state.wait_for(|s| s.as_ref().is_some_and(|s| s.ts_ms == 8)))
        .await
        .unwrap()
        .unwrap();
    let st = sync.current_status();
    assert!(st.is_connected());
    assert!(st.last_error.is_none());
    assert_eq!(st.reconnect_attempt, 0);
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);
}
