//! Map Auto-Fit State Machine
//!
//! Decides, for every live state update, whether and how the map viewport
//! should move. Raw user interaction with the map surface freezes the
//! viewport; only an explicit control action brings auto-fit back (or, when
//! configured, an idle period after the last interaction).

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::config::MapConfig;
use crate::model::{LatLon, LiveState};

/// Viewport behavior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoFitMode {
    /// Follow the car at a fixed close zoom.
    CenterOnSubject,
    /// Keep car and destination in view.
    #[default]
    FitSubjectAndDestination,
    /// Leave the viewport where the user put it.
    Disabled,
}

impl AutoFitMode {
    pub fn is_active(self) -> bool {
        self != AutoFitMode::Disabled
    }

    pub fn label(self) -> &'static str {
        match self {
            AutoFitMode::CenterOnSubject => "center",
            AutoFitMode::FitSubjectAndDestination => "fit",
            AutoFitMode::Disabled => "off",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InteractionKind {
    PointerDown,
    TouchStart,
    Wheel,
}

/// Where on the map an interaction landed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InteractionTarget {
    #[default]
    Surface,
    /// A control drawn over the map (zoom buttons, the mode toggle, ...).
    Overlay,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapInteraction {
    pub kind: InteractionKind,
    pub target: InteractionTarget,
}

impl MapInteraction {
    pub fn surface(kind: InteractionKind) -> Self {
        Self {
            kind,
            target: InteractionTarget::Surface,
        }
    }

    pub fn overlay(kind: InteractionKind) -> Self {
        Self {
            kind,
            target: InteractionTarget::Overlay,
        }
    }
}

/// Axis-aligned lat/lon rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Bounds {
    pub south_west: LatLon,
    pub north_east: LatLon,
}

impl Bounds {
    pub fn from_point(p: LatLon) -> Self {
        Self {
            south_west: p,
            north_east: p,
        }
    }

    /// Smallest bounds covering every point. `None` for an empty iterator.
    pub fn covering(points: impl IntoIterator<Item = LatLon>) -> Option<Self> {
        let mut points = points.into_iter();
        let mut bounds = Self::from_point(points.next()?);
        for p in points {
            bounds.extend(p);
        }
        Some(bounds)
    }

    pub fn extend(&mut self, p: LatLon) {
        self.south_west.lat = self.south_west.lat.min(p.lat);
        self.south_west.lon = self.south_west.lon.min(p.lon);
        self.north_east.lat = self.north_east.lat.max(p.lat);
        self.north_east.lon = self.north_east.lon.max(p.lon);
    }

    /// Zero-area bounds; fitting one would zoom to the map's maximum.
    pub fn is_point(&self) -> bool {
        self.south_west == self.north_east
    }
}

/// What the map should do with its viewport.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewportCommand {
    Center { center: LatLon, zoom: u8 },
    FitBounds { bounds: Bounds, padding_px: u32 },
}

pub struct AutoFit {
    mode: AutoFitMode,
    /// Mode to come back to when leaving `Disabled`.
    resume_mode: AutoFitMode,
    last_interaction: Option<Instant>,

    center_zoom: u8,
    padding_px: u32,
    include_path: bool,
    idle_resume: Option<Duration>,
}

impl Default for AutoFit {
    fn default() -> Self {
        Self::new(&MapConfig::default())
    }
}

impl AutoFit {
    pub fn new(config: &MapConfig) -> Self {
        Self {
            mode: AutoFitMode::default(),
            resume_mode: AutoFitMode::default(),
            last_interaction: None,
            center_zoom: config.center_zoom,
            padding_px: config.fit_padding_px,
            include_path: config.include_path,
            idle_resume: config.idle_resume_secs.map(Duration::from_secs),
        }
    }

    pub fn mode(&self) -> AutoFitMode {
        self.mode
    }

    /// Raw interaction with the map. Surface interactions disable auto-fit;
    /// overlay interactions are ignored. Returns the new mode on a change.
    pub fn on_interaction(&mut self, interaction: MapInteraction) -> Option<AutoFitMode> {
        if interaction.target == InteractionTarget::Overlay {
            return None;
        }
        self.last_interaction = Some(Instant::now());
        if self.mode == AutoFitMode::Disabled {
            return None;
        }
        debug!(kind = ?interaction.kind, from = self.mode.label(), "auto-fit disabled by interaction");
        self.resume_mode = self.mode;
        self.mode = AutoFitMode::Disabled;
        Some(self.mode)
    }

    /// Explicit control action. Toggles between the two active modes; from
    /// `Disabled` it resumes whichever active mode was interrupted. Never
    /// lands on `Disabled`.
    pub fn cycle(&mut self) -> AutoFitMode {
        self.mode = match self.mode {
            AutoFitMode::CenterOnSubject => AutoFitMode::FitSubjectAndDestination,
            AutoFitMode::FitSubjectAndDestination => AutoFitMode::CenterOnSubject,
            AutoFitMode::Disabled => self.resume_mode,
        };
        self.resume_mode = self.mode;
        self.last_interaction = None;
        self.mode
    }

    /// Called periodically. With idle resume configured, re-enables the
    /// interrupted mode once the map has been left alone long enough.
    pub fn tick(&mut self) -> Option<AutoFitMode> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Option<AutoFitMode> {
        let idle = self.idle_resume?;
        if self.mode != AutoFitMode::Disabled {
            return None;
        }
        let last = self.last_interaction?;
        if now.saturating_duration_since(last) < idle {
            return None;
        }
        self.mode = self.resume_mode;
        self.last_interaction = None;
        debug!(to = self.mode.label(), "auto-fit resumed after idle");
        Some(self.mode)
    }

    /// Viewport command for a state update. `None` while disabled, while no
    /// state has arrived, or while the car has no position fix.
    pub fn on_state(&self, state: Option<&LiveState>) -> Option<ViewportCommand> {
        let state = state?;
        let subject = state.location.position()?;

        match self.mode {
            AutoFitMode::Disabled => None,
            AutoFitMode::CenterOnSubject => Some(self.center_on(subject)),
            AutoFitMode::FitSubjectAndDestination => {
                let destination = state.destination().filter(|d| is_valid(*d));
                let path = self
                    .include_path
                    .then_some(&state.path)
                    .into_iter()
                    .flatten()
                    .map(|p| LatLon::new(p.lat, p.lon))
                    .filter(|p| is_valid(*p));
                let bounds =
                    Bounds::covering(std::iter::once(subject).chain(destination).chain(path))?;
                if bounds.is_point() {
                    return Some(self.center_on(subject));
                }
                Some(ViewportCommand::FitBounds {
                    bounds,
                    padding_px: self.padding_px,
                })
            }
        }
    }

    fn center_on(&self, center: LatLon) -> ViewportCommand {
        ViewportCommand::Center {
            center,
            zoom: self.center_zoom,
        }
    }
}

fn is_valid(p: LatLon) -> bool {
    p.lat.is_finite() && p.lon.is_finite()
}
