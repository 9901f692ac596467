//! Track loading and on-demand analysis behind a single state machine.
//!
//! The coordinator owns the loaded bytes, the [`AudioModel`], the
//! [`VisualizationCache`] and the [`ProcessingStatus`]. All of it lives in one
//! reader/writer-locked struct. Background threads do their computation
//! outside the lock and take it only to publish a finished stage or a status
//! update, and only while their cancellation token is still the live one.

mod pipeline;
pub mod status;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::audio::decode::{decoder_for, PcmDecoder};
use crate::audio::metadata::extract_track_info;
use crate::audio::{AudioModel, StftParams, TrackInfo};
use crate::cancel::CancelToken;
use crate::config::{Config, InputConfig, LoaderConfig};
use crate::error::{AnalysisError, AnalysisResult};
use crate::pool::WorkerPool;
use crate::source::{is_url, ByteSource, StreamSource};
use crate::viz::{VisualizationCache, VisualizationCommand, VisualizationMode, ViewState};

use pipeline::{Analyzers, StagePlan};
pub use status::{format_eta, ProcessingState, ProcessingStatus};

struct Shared {
    track: Option<Arc<[u8]>>,
    info: Option<TrackInfo>,
    model: AudioModel,
    cache: VisualizationCache,
    status: ProcessingStatus,
    cancel: CancelToken,
}

impl Shared {
    /// True while `token` is still the live cancellation signal.
    fn owns(&self, token: &CancelToken) -> bool {
        self.cancel.same_as(token) && !token.is_cancelled()
    }

    /// Cancels in-flight work and hands out a fresh token.
    fn renew_token(&mut self) -> CancelToken {
        self.cancel.cancel();
        self.cancel = CancelToken::new();
        self.cancel.clone()
    }

    fn abort(&mut self) {
        self.renew_token();
        self.status = ProcessingStatus::idle("Processing cancelled");
    }

    fn forget_track(&mut self) {
        self.track = None;
        self.info = None;
        self.model = AudioModel::default();
        self.cache.clear();
    }
}

pub struct Coordinator {
    shared: Arc<RwLock<Shared>>,
    analyzers: Arc<Analyzers>,
    source: Arc<dyn ByteSource>,
    loader: LoaderConfig,
    input: InputConfig,
}

impl Coordinator {
    /// Coordinator reading files and URLs, decoding per the input config.
    pub fn new(config: Config) -> AnalysisResult<Self> {
        let source: Arc<dyn ByteSource> = Arc::new(StreamSource::new(&config.loader)?);
        let decoder = decoder_for(&config.input);
        Self::with_collaborators(config, source, decoder)
    }

    pub fn with_collaborators(
        config: Config,
        source: Arc<dyn ByteSource>,
        decoder: Arc<dyn PcmDecoder>,
    ) -> AnalysisResult<Self> {
        config.analysis.validate()?;
        let pool = Arc::new(WorkerPool::new(config.analysis.workers)?);
        log::info!(
            "Coordinator ready: window={} hop={} fft={} workers={}",
            config.analysis.window_size,
            config.analysis.hop_size,
            config.analysis.fft_size,
            pool.threads()
        );
        let shared = Shared {
            track: None,
            info: None,
            model: AudioModel::default(),
            cache: VisualizationCache::new(config.view.width, config.view.height),
            status: ProcessingStatus::idle("No track loaded"),
            cancel: CancelToken::new(),
        };
        Ok(Self {
            shared: Arc::new(RwLock::new(shared)),
            analyzers: Arc::new(Analyzers {
                pool,
                decoder,
                params: StftParams::from(&config.analysis),
            }),
            source,
            loader: config.loader,
            input: config.input,
        })
    }

    /// Starts loading `location` in the background, superseding any work in flight.
    pub fn load_track(&self, location: &str) {
        let verb = if is_url(location) {
            "Downloading..."
        } else {
            "Loading file..."
        };
        let token = {
            let mut guard = self.shared.write();
            let token = guard.renew_token();
            guard.forget_track();
            guard.status = ProcessingStatus::loading(format!("{} (ETA: calculating...)", verb));
            token
        };
        log::info!("Loading {}", location);

        let job = LoadJob {
            shared: Arc::clone(&self.shared),
            source: Arc::clone(&self.source),
            loader: self.loader.clone(),
            input: self.input.clone(),
            location: location.to_string(),
            verb,
            token,
        };
        let spawned = std::thread::Builder::new()
            .name("wavetrace-loader".into())
            .spawn(move || job.run());
        if let Err(err) = spawned {
            log::error!("Cannot spawn loader thread: {}", err);
            self.shared.write().status = ProcessingStatus::idle(format!("Load failed: {}", err));
        }
    }

    /// Switches to `mode`, analyzing whatever it still needs in the background.
    ///
    /// Returns immediately. While a load or another analysis is running the
    /// request is rejected with `Busy` rather than queued.
    pub fn request_visualization(&self, mode: VisualizationMode) -> AnalysisResult<String> {
        let mut guard = self.shared.write();
        if guard.status.is_busy() {
            return Err(AnalysisError::Busy(guard.status.message.clone()));
        }
        let Some(bytes) = guard.track.clone() else {
            return Err(AnalysisError::VisualizationUnavailable(mode));
        };

        if guard.cache.contains(mode) {
            guard.cache.set_active(mode);
            let message = format!("Switched to {} visualization", mode);
            guard.status = ProcessingStatus::idle(message.clone());
            return Ok(message);
        }

        let plan = StagePlan::for_mode(mode, &guard.model);
        let token = guard.cancel.clone();
        let message = format!("Preparing {} visualization...", mode);
        guard.status = ProcessingStatus::analyzing(message.clone());
        drop(guard);

        let shared = Arc::clone(&self.shared);
        let analyzers = Arc::clone(&self.analyzers);
        let spawned = std::thread::Builder::new()
            .name(format!("wavetrace-{}", mode))
            .spawn(move || pipeline::run_analysis(shared, analyzers, mode, bytes, plan, token));
        if let Err(err) = spawned {
            let message = format!("cannot spawn analysis thread: {}", err);
            self.shared.write().status = ProcessingStatus::idle(format!("Analysis failed: {}", message));
            return Err(AnalysisError::InvalidParameters(message));
        }
        Ok(message)
    }

    /// Aborts whatever is running; the coordinator is ready for new work on return.
    pub fn cancel_processing(&self) {
        self.shared.write().abort();
        log::info!("Processing cancelled");
    }

    pub fn status(&self) -> ProcessingStatus {
        self.shared.read().status.clone()
    }

    /// Forwards a navigation command to the cache; ignored while busy.
    pub fn handle_visualization_input(&self, command: VisualizationCommand) -> bool {
        let mut guard = self.shared.write();
        if guard.status.is_busy() {
            return false;
        }
        let handled = guard.cache.handle(command);
        if handled && matches!(command, VisualizationCommand::Next | VisualizationCommand::Prev) {
            if let Some(mode) = guard.cache.active() {
                guard.status = ProcessingStatus::idle(format!("Switched to {} visualization", mode));
            }
        }
        handled
    }

    pub fn unload_track(&self) {
        let mut guard = self.shared.write();
        guard.renew_token();
        guard.forget_track();
        guard.status = ProcessingStatus::idle("No track loaded");
    }

    pub fn track_info(&self) -> Option<TrackInfo> {
        self.shared.read().info.clone()
    }

    pub fn active_mode(&self) -> Option<VisualizationMode> {
        self.shared.read().cache.active()
    }

    pub fn cached_modes(&self) -> Vec<VisualizationMode> {
        self.shared.read().cache.cached_modes()
    }

    /// Snapshot of the derived signals; stage outputs are shared, not copied.
    pub fn audio_model(&self) -> AudioModel {
        self.shared.read().model.clone()
    }

    pub fn current_view(&self) -> ViewState {
        self.shared.read().cache.view().clone()
    }

    /// Display name and description of the active visualization.
    pub fn active_label(&self) -> Option<(&'static str, &'static str)> {
        let guard = self.shared.read();
        let viz = guard.cache.active_visualization()?;
        Some((viz.name(), viz.description()))
    }

    pub fn active_columns(&self) -> Option<Vec<f64>> {
        self.shared.read().cache.active_columns()
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shared.read().cancel.cancel();
    }
}

struct LoadJob {
    shared: Arc<RwLock<Shared>>,
    source: Arc<dyn ByteSource>,
    loader: LoaderConfig,
    input: InputConfig,
    location: String,
    verb: &'static str,
    token: CancelToken,
}

impl LoadJob {
    fn run(self) {
        let started = Instant::now();
        let interval = self.loader.status_interval();
        let mut last_report: Option<Instant> = None;

        let mut progress = |read: u64, total: Option<u64>| {
            let finished = total.map_or(false, |t| read >= t);
            if !finished && last_report.map_or(false, |t| t.elapsed() < interval) {
                return;
            }
            last_report = Some(Instant::now());
            let eta = status::transfer_eta(started.elapsed(), read, total, self.loader.min_eta_bytes);
            let mut guard = self.shared.write();
            if !guard.owns(&self.token) {
                return;
            }
            guard.status.message = format!("{} (ETA: {})", self.verb, eta);
            guard.status.progress = match total {
                Some(t) if t > 0 => (read as f64 / t as f64).min(1.0),
                _ => 0.0,
            };
            guard.status.bytes_loaded = read;
            guard.status.total_bytes = total;
        };

        let fetched = self.source.fetch(&self.location, &mut progress, &self.token);
        let outcome = fetched.map_err(|e| format!("Load failed: {}", cause(&e))).and_then(|bytes| {
            let bytes: Arc<[u8]> = bytes.into();
            extract_track_info(&bytes, &self.input)
                .map(|info| (bytes, info))
                .map_err(|e| format!("Metadata extraction failed: {}", cause(&e)))
        });

        let mut guard = self.shared.write();
        if !guard.owns(&self.token) {
            log::debug!("Discarding superseded load of {}", self.location);
            return;
        }
        match outcome {
            Ok((bytes, info)) => {
                log::info!(
                    "Loaded {} ({} bytes, {} Hz, {} ch) in {:.2?}",
                    self.location,
                    bytes.len(),
                    info.sample_rate,
                    info.channels,
                    started.elapsed()
                );
                let total_bytes = guard.status.total_bytes;
                guard.status = ProcessingStatus {
                    bytes_loaded: bytes.len() as u64,
                    total_bytes,
                    ..ProcessingStatus::idle("File loaded successfully")
                };
                guard.model = AudioModel::new(info.sample_rate);
                guard.track = Some(bytes);
                guard.info = Some(info);
            }
            Err(message) => {
                log::error!("{}", message);
                guard.status = ProcessingStatus::idle(message);
            }
        }
    }
}

fn cause(err: &AnalysisError) -> String {
    match err {
        AnalysisError::LoadFailed(cause) => cause.clone(),
        other => other.to_string(),
    }
}
