//! Background analysis runs: stage planning, weighted progress and publishing.

use std::sync::Arc;

use parking_lot::RwLock;

use super::status::{progress_eta, ProcessingStatus};
use super::Shared;
use crate::audio::decode::PcmDecoder;
use crate::audio::{AudioModel, BeatAnalysis, OnsetBeatTracker, SpectralAnalyzer, Spectrogram, StftParams};
use crate::audio::{Waveform, WaveformSource};
use crate::cancel::CancelToken;
use crate::error::{AnalysisError, AnalysisResult, Stage};
use crate::pool::WorkerPool;
use crate::viz::{Visualization, VisualizationMode};

fn base_weight(stage: Stage) -> f64 {
    match stage {
        Stage::Waveform => 0.3,
        Stage::Spectrum => 0.3,
        Stage::Beats => 0.4,
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Waveform => "Decoding audio",
        Stage::Spectrum => "Computing spectrogram",
        Stage::Beats => "Detecting beats",
    }
}

/// Stages still missing for a mode, with their slice of the overall progress.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct StagePlan {
    steps: Vec<(Stage, f64, f64)>,
}

impl StagePlan {
    pub fn for_mode(mode: VisualizationMode, model: &AudioModel) -> Self {
        let missing: Vec<Stage> = mode
            .required_stages()
            .iter()
            .copied()
            .filter(|&s| !model.has(s))
            .collect();
        let total: f64 = missing.iter().map(|&s| base_weight(s)).sum();
        let mut start = 0.0;
        let steps = missing
            .into_iter()
            .map(|stage| {
                let span = base_weight(stage) / total;
                let step = (stage, start, span);
                start += span;
                step
            })
            .collect();
        Self { steps }
    }

    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.steps.iter().map(|&(s, _, _)| s)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Maps a stage-local fraction to overall progress.
    pub fn overall(&self, stage: Stage, local: f64) -> f64 {
        self.steps
            .iter()
            .find(|&&(s, _, _)| s == stage)
            .map(|&(_, start, span)| (start + span * local.clamp(0.0, 1.0)).min(1.0))
            .unwrap_or(0.0)
    }
}

pub(super) enum StageOutput {
    Waveform(Arc<Waveform>),
    Spectrum(Arc<Spectrogram>),
    Beats(Arc<BeatAnalysis>),
}

impl StageOutput {
    fn publish(self, model: &mut AudioModel) {
        match self {
            StageOutput::Waveform(w) => {
                model.sample_rate = w.sample_rate;
                model.waveform = Some(w);
            }
            StageOutput::Spectrum(s) => model.spectrogram = Some(s),
            StageOutput::Beats(b) => model.beats = Some(b),
        }
    }
}

/// Analysis collaborators shared by every run.
pub(super) struct Analyzers {
    pub pool: Arc<WorkerPool>,
    pub decoder: Arc<dyn PcmDecoder>,
    pub params: StftParams,
}

impl Analyzers {
    pub fn run_stage(
        &self,
        stage: Stage,
        bytes: &Arc<[u8]>,
        model: &AudioModel,
        progress: &(dyn Fn(f64) + Sync),
        cancel: &CancelToken,
    ) -> AnalysisResult<StageOutput> {
        let missing = |what: &str| AnalysisError::AnalysisFailed {
            stage,
            cause: format!("{} missing", what),
        };
        let output = match stage {
            Stage::Waveform => {
                let source = WaveformSource::new(self.decoder.as_ref(), &self.pool);
                StageOutput::Waveform(Arc::new(source.decode(bytes, progress, cancel)?))
            }
            Stage::Spectrum => {
                let wave = model.waveform.as_ref().ok_or_else(|| missing("waveform"))?;
                let analyzer = SpectralAnalyzer::new(self.params, &self.pool);
                let spec = analyzer.analyze(&wave.samples, wave.sample_rate, progress, cancel)?;
                StageOutput::Spectrum(Arc::new(spec))
            }
            Stage::Beats => {
                let spec = model.spectrogram.as_ref().ok_or_else(|| missing("spectrogram"))?;
                let tracker = OnsetBeatTracker::new(&self.pool);
                StageOutput::Beats(Arc::new(tracker.detect_beats(spec, cancel, progress)?))
            }
        };
        Ok(output)
    }
}

/// Runs the planned stages for `mode`, then builds and caches its artifact.
pub(super) fn run_analysis(
    shared: Arc<RwLock<Shared>>,
    analyzers: Arc<Analyzers>,
    mode: VisualizationMode,
    bytes: Arc<[u8]>,
    plan: StagePlan,
    token: CancelToken,
) {
    log::info!(
        "Analyzing {} ({} stage(s): {:?})",
        mode,
        plan.steps.len(),
        plan.stages().collect::<Vec<_>>()
    );
    if plan.is_empty() {
        log::debug!("All stages for {} already published", mode);
    }
    match execute(&shared, &analyzers, mode, &bytes, &plan, &token) {
        Ok(()) => log::info!("{} visualization ready", mode),
        Err(err) if err.is_cancelled() => log::info!("Analysis for {} cancelled", mode),
        Err(err) => {
            log::error!("Analysis for {} failed: {}", mode, err);
            let mut guard = shared.write();
            if guard.owns(&token) {
                guard.status = ProcessingStatus::idle(format!("Analysis failed: {}", err));
            }
        }
    }
}

fn execute(
    shared: &RwLock<Shared>,
    analyzers: &Analyzers,
    mode: VisualizationMode,
    bytes: &Arc<[u8]>,
    plan: &StagePlan,
    token: &CancelToken,
) -> AnalysisResult<()> {
    for stage in plan.stages() {
        token.check()?;
        // Snapshot; completed stages are immutable Arcs.
        let model = shared.read().model.clone();
        let label = stage_label(stage);
        let report = |local: f64| {
            let overall = plan.overall(stage, local);
            let mut guard = shared.write();
            if !guard.owns(token) {
                return;
            }
            // Workers report concurrently; keep the published value monotonic.
            let overall = overall.max(guard.status.progress);
            let eta = progress_eta(guard.status.elapsed(), overall);
            guard.status.progress = overall;
            guard.status.message = format!("{} (ETA: {})", label, eta);
        };
        report(0.0);

        let output = analyzers
            .run_stage(stage, bytes, &model, &report, token)
            .map_err(|e| e.in_stage(stage))?;

        let mut guard = shared.write();
        if !guard.owns(token) {
            return Err(AnalysisError::Cancelled);
        }
        output.publish(&mut guard.model);
        log::debug!("Published {} stage", stage);
    }

    let model = shared.read().model.clone();
    let viz = Visualization::build(mode, &model)?;
    let mut guard = shared.write();
    if !guard.owns(token) {
        return Err(AnalysisError::Cancelled);
    }
    guard.cache.insert(viz);
    guard.cache.set_active(mode);
    guard.status = ProcessingStatus {
        progress: 1.0,
        ..ProcessingStatus::idle(format!("{} visualization ready", mode))
    };
    Ok(())
}
