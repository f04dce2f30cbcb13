//! Live telemetry data model.
//!
//! Field names follow the server's JSON wire format (`ts_ms`, `tpms_bar`,
//! `history_30s`, ...). `LiveState` is the fully well-formed record carried by
//! a snapshot; `StatePatch` is the partial record carried by a delta.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Trailing span covered by the history window and path trace.
pub const HISTORY_WINDOW: Duration = Duration::from_secs(30);

/// History metric names the server emits.
pub const KNOWN_METRICS: &[&str] = &[
    "speed_kph",
    "heading",
    "elevation_m",
    "soc_pct",
    "power_w",
    "inside_c",
    "outside_c",
    "tpms_fl",
    "tpms_fr",
    "tpms_rl",
    "tpms_rr",
];

/// A geographic coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Last known fix. The server omits the coordinates until the car has
/// reported one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kph: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation_m: Option<f64>,
}

impl Location {
    pub fn at(lat: f64, lon: f64) -> Self {
        Self {
            lat: Some(lat),
            lon: Some(lon),
            ..Default::default()
        }
    }

    /// The fix as a coordinate, if both halves are present and finite.
    pub fn position(&self) -> Option<LatLon> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => {
                Some(LatLon::new(lat, lon))
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soc_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_w: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Climate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inside_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outside_c: Option<f64>,
}

/// Tire pressures in bar, one per corner.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TirePressure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rr: Option<f64>,
}

/// Active navigation route, if any.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<LatLon>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_delay_min: Option<f64>,
}

/// One history sample. `v` is `None` when the metric had no value at `ts_ms`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub ts_ms: i64,
    #[serde(default)]
    pub v: Option<f64>,
}

/// One breadcrumb of the path trace.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub ts_ms: i64,
    pub lat: f64,
    pub lon: f64,
}

/// Per-metric trailing samples, keyed by metric name.
///
/// Sequences arrive from the server already time-ordered and are stored as
/// received; merging replaces a metric's sequence wholesale. A metric sent
/// as `null` (no samples in the window) reads as an empty sequence.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HistoryWindow(BTreeMap<String, Vec<HistoryPoint>>);

impl<'de> Deserialize<'de> for HistoryWindow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Option<Vec<HistoryPoint>>>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(metric, points)| (metric, points.unwrap_or_default()))
            .collect())
    }
}

impl HistoryWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, metric: &str) -> Option<&[HistoryPoint]> {
        self.0.get(metric).map(Vec::as_slice)
    }

    pub fn insert(&mut self, metric: impl Into<String>, points: Vec<HistoryPoint>) {
        self.0.insert(metric.into(), points);
    }

    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replace, key by key, every metric present in `other`. Metrics that
    /// `other` does not mention keep their current sequence.
    pub fn merge_from(&mut self, other: HistoryWindow) {
        for (metric, points) in other.0 {
            self.0.insert(metric, points);
        }
    }

    /// True when every metric's samples are in non-decreasing time order.
    pub fn is_time_ordered(&self) -> bool {
        self.0
            .values()
            .all(|points| points.windows(2).all(|w| w[0].ts_ms <= w[1].ts_ms))
    }

    /// Latest non-absent value recorded for `metric`.
    pub fn latest(&self, metric: &str) -> Option<f64> {
        self.0
            .get(metric)?
            .iter()
            .rev()
            .find_map(|p| p.v)
    }
}

impl FromIterator<(String, Vec<HistoryPoint>)> for HistoryWindow {
    fn from_iter<I: IntoIterator<Item = (String, Vec<HistoryPoint>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The merged live telemetry of one car.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub ts_ms: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: Location,
    #[serde(default, deserialize_with = "null_as_default")]
    pub battery: Battery,
    #[serde(default, deserialize_with = "null_as_default")]
    pub climate: Climate,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tpms_bar: TirePressure,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    #[serde(default, rename = "history_30s", deserialize_with = "null_as_default")]
    pub history: HistoryWindow,
    #[serde(default, rename = "path_30s", deserialize_with = "null_as_default")]
    pub path: Vec<PathPoint>,
}

impl LiveState {
    /// Destination coordinate of the active route.
    pub fn destination(&self) -> Option<LatLon> {
        self.route.as_ref().and_then(|r| r.dest)
    }

    /// Time elapsed between the state's own timestamp and `now_ms`.
    /// Zero when the state claims to be from the future.
    pub fn age(&self, now_ms: i64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.ts_ms).max(0) as u64)
    }

    pub fn is_path_time_ordered(&self) -> bool {
        self.path.windows(2).all(|w| w[0].ts_ms <= w[1].ts_ms)
    }

    /// Apply a delta: present fields replace wholesale, except the history
    /// window which merges metric by metric.
    pub fn apply_patch(&mut self, patch: StatePatch) {
        let StatePatch {
            ts_ms,
            location,
            battery,
            climate,
            tpms_bar,
            route,
            history,
            path,
        } = patch;

        if let Some(ts_ms) = ts_ms {
            self.ts_ms = ts_ms;
        }
        if let Some(location) = location {
            self.location = location;
        }
        if let Some(battery) = battery {
            self.battery = battery;
        }
        if let Some(climate) = climate {
            self.climate = climate;
        }
        if let Some(tpms_bar) = tpms_bar {
            self.tpms_bar = tpms_bar;
        }
        if let Some(route) = route {
            self.route = Some(route);
        }
        if let Some(history) = history {
            self.history.merge_from(history);
        }
        if let Some(path) = path {
            self.path = path;
        }
    }
}

/// A partial `LiveState`. `None` (or JSON `null`) means "unchanged".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<Battery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub climate: Option<Climate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tpms_bar: Option<TirePressure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    #[serde(
        default,
        rename = "history_30s",
        skip_serializing_if = "Option::is_none"
    )]
    pub history: Option<HistoryWindow>,
    #[serde(default, rename = "path_30s", skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathPoint>>,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Admin state endpoint body: the car state with history and path alongside.
#[derive(Clone, Debug, Deserialize)]
pub struct AdminCarState {
    pub state: LiveState,
    #[serde(default, rename = "history_30s", deserialize_with = "null_as_default")]
    pub history: HistoryWindow,
    #[serde(default, rename = "path_30s", deserialize_with = "null_as_default")]
    pub path: Vec<PathPoint>,
}

impl From<AdminCarState> for LiveState {
    fn from(admin: AdminCarState) -> Self {
        let mut state = admin.state;
        state.history = admin.history;
        state.path = admin.path;
        state
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
