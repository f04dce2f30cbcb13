//! One-line terminal renderings of state, status and viewport commands.

use std::fmt::Write;

use car_sync::model::LiveState;
use car_sync::{ConnectionStatus, PollStatus, ViewportCommand};

pub fn state_line(state: &LiveState, now_ms: i64) -> String {
    let mut line = format!("age {:>5.1}s", state.age(now_ms).as_secs_f64());
    match state.location.position() {
        Some(pos) => {
            let _ = write!(line, "  pos {:.5},{:.5}", pos.lat, pos.lon);
        }
        None => line.push_str("  pos -"),
    }
    if let Some(speed) = state.location.speed_kph {
        let _ = write!(line, "  {speed:.0} km/h");
    }
    if let Some(soc) = state.battery.soc_pct {
        let _ = write!(line, "  soc {soc:.0}%");
    }
    if let Some(power) = state.battery.power_w {
        let _ = write!(line, "  {:.1} kW", power / 1000.0);
    }
    if let Some(inside) = state.climate.inside_c {
        let _ = write!(line, "  in {inside:.1}°C");
    }
    if let Some(route) = &state.route {
        let label = route.dest_label.as_deref().unwrap_or("destination");
        let _ = write!(line, "  → {label}");
        if let Some(km) = route.dist_km {
            let _ = write!(line, " {km:.1} km");
        }
        if let Some(eta) = route.eta_min {
            let _ = write!(line, " eta {eta:.0} min");
        }
        if let Some(delay) = route.traffic_delay_min.filter(|d| *d > 0.0) {
            let _ = write!(line, " (+{delay:.0} traffic)");
        }
    }
    if !state.history.is_empty() {
        let _ = write!(line, "  [{} metrics, {} path pts]", state.history.len(), state.path.len());
    }
    line
}

pub fn status_line(status: &ConnectionStatus) -> String {
    let mut line = match status.banner() {
        Some(banner) => banner,
        None => "connected".to_string(),
    };
    if status.reconnect_attempt > 0 {
        let _ = write!(line, " (attempt {})", status.reconnect_attempt + 1);
    }
    if status.stale {
        line.push_str(" [stale]");
    }
    line
}

pub fn poll_line(status: &PollStatus) -> Option<String> {
    let err = status.last_error.as_ref()?;
    let retry = status
        .next_delay
        .map(|d| format!(", retrying in {}s", d.as_secs()))
        .unwrap_or_default();
    Some(format!("poll failed: {err}{retry}"))
}

pub fn viewport_line(cmd: &ViewportCommand) -> String {
    match cmd {
        ViewportCommand::Center { center, zoom } => {
            format!("map: center {:.5},{:.5} z{zoom}", center.lat, center.lon)
        }
        ViewportCommand::FitBounds { bounds, padding_px } => format!(
            "map: fit {:.5},{:.5} .. {:.5},{:.5} pad {padding_px}px",
            bounds.south_west.lat, bounds.south_west.lon, bounds.north_east.lat, bounds.north_east.lon
        ),
    }
}
