use std::time::{Duration, Instant};

use serde::Serialize;

const CALCULATING: &str = "calculating...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    Idle,
    Loading,
    Analyzing,
}

/// Snapshot of what the coordinator is doing, as reported to pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingStatus {
    pub state: ProcessingState,
    pub message: String,
    /// Fraction of the current load or analysis, in `[0, 1]`
    pub progress: f64,
    pub cancelable: bool,
    #[serde(skip)]
    pub started_at: Option<Instant>,
    pub bytes_loaded: u64,
    pub total_bytes: Option<u64>,
}

impl Default for ProcessingStatus {
    fn default() -> Self {
        Self::idle("")
    }
}

impl ProcessingStatus {
    pub fn idle(message: impl Into<String>) -> Self {
        Self {
            state: ProcessingState::Idle,
            message: message.into(),
            progress: 0.0,
            cancelable: false,
            started_at: None,
            bytes_loaded: 0,
            total_bytes: None,
        }
    }

    pub fn loading(message: impl Into<String>) -> Self {
        Self {
            state: ProcessingState::Loading,
            cancelable: true,
            started_at: Some(Instant::now()),
            ..Self::idle(message)
        }
    }

    pub fn analyzing(message: impl Into<String>) -> Self {
        Self {
            state: ProcessingState::Analyzing,
            cancelable: true,
            started_at: Some(Instant::now()),
            ..Self::idle(message)
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state != ProcessingState::Idle
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

/// Human-readable remaining time.
pub fn format_eta(remaining: Duration) -> String {
    let secs = remaining.as_secs_f64();
    if secs > 3600.0 {
        format!("{:.1} hours", secs / 3600.0)
    } else if secs > 60.0 {
        format!("{:.1} minutes", secs / 60.0)
    } else {
        format!("{:.0} seconds", secs)
    }
}

/// ETA extrapolated from the fraction of work done so far.
pub fn progress_eta(elapsed: Duration, progress: f64) -> String {
    if progress <= 0.0 || progress >= 1.0 || elapsed.is_zero() {
        return CALCULATING.to_string();
    }
    let total = elapsed.as_secs_f64() / progress;
    format_eta(Duration::from_secs_f64(total - elapsed.as_secs_f64()))
}

/// ETA from byte throughput; needs `min_bytes` read and a known total.
pub fn transfer_eta(elapsed: Duration, read: u64, total: Option<u64>, min_bytes: u64) -> String {
    let Some(total) = total else {
        return CALCULATING.to_string();
    };
    if elapsed.is_zero() || read <= min_bytes {
        return CALCULATING.to_string();
    }
    let rate = read as f64 / elapsed.as_secs_f64();
    let remaining = (total.saturating_sub(read) as f64 / rate).floor();
    format_eta(Duration::from_secs_f64(remaining))
}
