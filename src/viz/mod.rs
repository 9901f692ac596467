//! Visualization modes, their cached artifacts and the shared view state.

mod views;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::Stage;

pub use views::{
    BeatMapView, DensityView, SpectrogramView, TempoView, Visualization, WaveformView,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationMode {
    Waveform,
    Spectrogram,
    Density,
    Tempo,
    BeatMap,
}

impl VisualizationMode {
    /// Cycling order for next/prev.
    pub const ALL: [VisualizationMode; 5] = [
        VisualizationMode::Waveform,
        VisualizationMode::Spectrogram,
        VisualizationMode::Density,
        VisualizationMode::Tempo,
        VisualizationMode::BeatMap,
    ];

    pub fn name(self) -> &'static str {
        match self {
            VisualizationMode::Waveform => "waveform",
            VisualizationMode::Spectrogram => "spectrogram",
            VisualizationMode::Density => "density",
            VisualizationMode::Tempo => "tempo",
            VisualizationMode::BeatMap => "beatmap",
        }
    }

    /// Stages whose output this mode is built from, in dependency order.
    pub fn required_stages(self) -> &'static [Stage] {
        match self {
            VisualizationMode::Waveform | VisualizationMode::Density => &[Stage::Waveform],
            VisualizationMode::Spectrogram => &[Stage::Waveform, Stage::Spectrum],
            VisualizationMode::Tempo | VisualizationMode::BeatMap => {
                &[Stage::Waveform, Stage::Spectrum, Stage::Beats]
            }
        }
    }
}

impl fmt::Display for VisualizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VisualizationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waveform" | "wave" => Ok(VisualizationMode::Waveform),
            "spectrogram" | "spectrum" => Ok(VisualizationMode::Spectrogram),
            "density" => Ok(VisualizationMode::Density),
            "tempo" => Ok(VisualizationMode::Tempo),
            "beatmap" | "beat-map" | "beats" => Ok(VisualizationMode::BeatMap),
            other => Err(format!(
                "unknown visualization mode '{}' (expected waveform, spectrogram, density, tempo or beatmap)",
                other
            )),
        }
    }
}

/// Interactive commands forwarded to the active visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationCommand {
    Next,
    Prev,
    ZoomIn,
    ZoomOut,
    PanLeft,
    PanRight,
    Reset,
    Resize(u16, u16),
}

impl FromStr for VisualizationCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(dims) = s.strip_prefix("resize:") {
            let (w, h) = dims
                .split_once('x')
                .ok_or_else(|| format!("bad resize command '{}'", s))?;
            let w = w.trim().parse().map_err(|_| format!("bad width in '{}'", s))?;
            let h = h.trim().parse().map_err(|_| format!("bad height in '{}'", s))?;
            return Ok(VisualizationCommand::Resize(w, h));
        }
        match s {
            "next" => Ok(VisualizationCommand::Next),
            "prev" => Ok(VisualizationCommand::Prev),
            "zoom-in" | "+" | "=" => Ok(VisualizationCommand::ZoomIn),
            "zoom-out" | "-" | "_" => Ok(VisualizationCommand::ZoomOut),
            "left" | "h" => Ok(VisualizationCommand::PanLeft),
            "right" | "l" => Ok(VisualizationCommand::PanRight),
            "reset" | "0" => Ok(VisualizationCommand::Reset),
            other => Err(format!("unknown visualization command '{}'", other)),
        }
    }
}

const ZOOM_FACTOR: f64 = 1.2;
const MIN_ZOOM: f64 = 0.1;
const MAX_ZOOM: f64 = 10.0;
/// Visible span at zoom 1.
const BASE_WINDOW: Duration = Duration::from_secs(10);
const SCROLL_STEP: Duration = Duration::from_secs(1);

/// Navigation state shared by every cached visualization.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub zoom: f64,
    pub offset: Duration,
    pub width: u16,
    pub height: u16,
    pub total_duration: Duration,
}

impl ViewState {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            zoom: 1.0,
            offset: Duration::ZERO,
            width,
            height,
            total_duration: Duration::ZERO,
        }
    }

    fn max_offset(&self) -> Duration {
        self.total_duration
            .saturating_sub(BASE_WINDOW.div_f64(self.zoom))
    }

    pub fn pan_left(&mut self) {
        self.offset = self.offset.saturating_sub(SCROLL_STEP.mul_f64(self.zoom));
    }

    pub fn pan_right(&mut self) {
        self.offset = (self.offset + SCROLL_STEP.mul_f64(self.zoom)).min(self.max_offset());
    }

    pub fn zoom_in(&mut self) {
        self.zoom = (self.zoom * ZOOM_FACTOR).min(MAX_ZOOM);
        self.offset = self.offset.min(self.max_offset());
    }

    pub fn zoom_out(&mut self) {
        self.zoom = (self.zoom / ZOOM_FACTOR).max(MIN_ZOOM);
        self.offset = self.offset.min(self.max_offset());
    }

    pub fn reset(&mut self) {
        self.zoom = 1.0;
        self.offset = Duration::ZERO;
    }
}

/// Built visualizations for the current track plus the active selection.
#[derive(Debug)]
pub struct VisualizationCache {
    entries: HashMap<VisualizationMode, Visualization>,
    active: Option<VisualizationMode>,
    view: ViewState,
}

impl VisualizationCache {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            entries: HashMap::new(),
            active: None,
            view: ViewState::new(width, height),
        }
    }

    pub fn contains(&self, mode: VisualizationMode) -> bool {
        self.entries.contains_key(&mode)
    }

    pub fn get(&self, mode: VisualizationMode) -> Option<&Visualization> {
        self.entries.get(&mode)
    }

    pub fn insert(&mut self, visualization: Visualization) {
        self.entries.insert(visualization.mode(), visualization);
    }

    pub fn active(&self) -> Option<VisualizationMode> {
        self.active
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Cached modes in cycling order.
    pub fn cached_modes(&self) -> Vec<VisualizationMode> {
        VisualizationMode::ALL
            .into_iter()
            .filter(|m| self.entries.contains_key(m))
            .collect()
    }

    /// Makes `mode` active if it has been built.
    pub fn set_active(&mut self, mode: VisualizationMode) -> bool {
        match self.entries.get(&mode) {
            Some(viz) => {
                self.view.total_duration = viz.duration();
                self.view.offset = self.view.offset.min(self.view.max_offset());
                self.active = Some(mode);
                true
            }
            None => false,
        }
    }

    /// Drops every entry; the window size survives a track change.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.active = None;
        self.view = ViewState::new(self.view.width, self.view.height);
    }

    fn cycle(&mut self, step: isize) -> bool {
        let Some(current) = self.active else {
            return false;
        };
        let order = VisualizationMode::ALL;
        let len = order.len() as isize;
        let Some(start) = order.iter().position(|&m| m == current) else {
            return false;
        };
        for k in 1..len {
            let idx = (start as isize + step * k).rem_euclid(len) as usize;
            if self.entries.contains_key(&order[idx]) {
                return self.set_active(order[idx]);
            }
        }
        false
    }

    /// Applies a navigation command to the active visualization; returns
    /// whether it was handled.
    ///
    /// A resize is recorded even with nothing active, so the next
    /// visualization opens at the current window size.
    pub fn handle(&mut self, command: VisualizationCommand) -> bool {
        if let VisualizationCommand::Resize(width, height) = command {
            self.view.width = width;
            self.view.height = height;
            return self.active.is_some();
        }
        if self.active.is_none() {
            return false;
        }
        match command {
            VisualizationCommand::Next => return self.cycle(1),
            VisualizationCommand::Prev => return self.cycle(-1),
            VisualizationCommand::ZoomIn => self.view.zoom_in(),
            VisualizationCommand::ZoomOut => self.view.zoom_out(),
            VisualizationCommand::PanLeft => self.view.pan_left(),
            VisualizationCommand::PanRight => self.view.pan_right(),
            VisualizationCommand::Reset => self.view.reset(),
            VisualizationCommand::Resize(..) => {}
        }
        true
    }

    pub fn active_visualization(&self) -> Option<&Visualization> {
        self.get(self.active?)
    }

    /// Rendered-ready columns of the active visualization.
    pub fn active_columns(&self) -> Option<Vec<f64>> {
        Some(self.active_visualization()?.columns(&self.view))
    }
}
