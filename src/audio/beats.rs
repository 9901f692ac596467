//! Onset detection, tempo estimation and beat refinement.
//!
//! The onset proxy is the low-frequency energy of each spectrogram frame. A
//! frame is a raw onset when its energy exceeds 1.3x the mean of the non-zero
//! energies in the last [`HISTORY_FRAMES`] frames. The modal inter-onset
//! distance gives the beat period, and a second pass walks a regular grid at
//! that period, snapping each predicted beat to the strongest nearby frame.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::spectrum::Spectrogram;
use crate::cancel::CancelToken;
use crate::error::{AnalysisError, AnalysisResult, Stage};
use crate::pool::WorkerPool;

/// Rolling onset history, about one second at hop 512 / 44.1 kHz.
pub const HISTORY_FRAMES: usize = 43;
pub const ONSET_RATIO: f64 = 1.3;
pub const DEFAULT_TEMPO_BPM: f64 = 120.0;
/// Half-width of the refinement search, as a fraction of the beat period.
const SEARCH_FRACTION: f64 = 0.1;
/// Half-width of the adaptive threshold window used during refinement.
const LOCAL_HALF_WINDOW: usize = HISTORY_FRAMES / 2;
const LOCAL_STD_FACTOR: f64 = 1.5;

const ENVELOPE_SHARE: f64 = 0.7;
const ONSET_DONE: f64 = 0.8;
const TEMPO_DONE: f64 = 0.85;

#[derive(Debug, Clone, PartialEq)]
pub struct BeatAnalysis {
    /// Low-frequency energy per spectrogram frame
    pub envelope: Vec<f64>,
    /// Refined beat flags (raw onset flags when no tempo could be refined)
    pub onsets: Vec<bool>,
    pub tempo_bpm: f64,
    /// Modal inter-onset distance in frames, if any onsets were found
    pub period_frames: Option<usize>,
    pub raw_onset_count: usize,
    pub hop_size: usize,
    pub sample_rate: u32,
}

impl BeatAnalysis {
    pub fn beat_count(&self) -> usize {
        self.onsets.iter().filter(|&&b| b).count()
    }

    pub fn beat_times(&self) -> Vec<Duration> {
        let frame_secs = self.hop_size as f64 / self.sample_rate.max(1) as f64;
        self.onsets
            .iter()
            .enumerate()
            .filter(|(_, beat)| **beat)
            .map(|(i, _)| Duration::from_secs_f64(i as f64 * frame_secs))
            .collect()
    }
}

pub struct OnsetBeatTracker<'a> {
    pool: &'a WorkerPool,
}

impl<'a> OnsetBeatTracker<'a> {
    pub fn new(pool: &'a WorkerPool) -> Self {
        Self { pool }
    }

    pub fn detect_beats(
        &self,
        spectrogram: &Spectrogram,
        cancel: &CancelToken,
        progress: &(dyn Fn(f64) + Sync),
    ) -> AnalysisResult<BeatAnalysis> {
        if spectrogram.is_empty() {
            return Err(AnalysisError::AnalysisFailed {
                stage: Stage::Beats,
                cause: "spectrogram missing".into(),
            });
        }

        self.analyze(spectrogram, cancel, progress)
            .map_err(|e| e.in_stage(Stage::Beats))
    }

    fn analyze(
        &self,
        spectrogram: &Spectrogram,
        cancel: &CancelToken,
        progress: &(dyn Fn(f64) + Sync),
    ) -> AnalysisResult<BeatAnalysis> {
        let hop_size = spectrogram.params.hop_size;
        let sample_rate = spectrogram.sample_rate;

        let envelope = self.envelope(spectrogram, cancel, &|p| progress(p * ENVELOPE_SHARE))?;

        let raw = raw_onsets(&envelope, cancel)?;
        let raw_onset_count = raw.iter().filter(|&&b| b).count();
        progress(ONSET_DONE);

        let period_frames = modal_interval(&raw);
        progress(TEMPO_DONE);

        let (tempo_bpm, onsets) = match period_frames {
            Some(period) => {
                let bpm = 60.0 / (period as f64 * hop_size as f64 / sample_rate as f64);
                let frames_per_beat = (60.0 / bpm) * sample_rate as f64 / hop_size as f64;
                let refined = refine_beats(&envelope, &raw, frames_per_beat, cancel, &|p| {
                    progress(TEMPO_DONE + p * (1.0 - TEMPO_DONE))
                })?;
                (bpm, refined)
            }
            None => (DEFAULT_TEMPO_BPM, raw),
        };
        progress(1.0);

        log::info!(
            "Beats: {} raw onsets, period {:?} frames, {:.1} BPM",
            raw_onset_count,
            period_frames,
            tempo_bpm
        );

        Ok(BeatAnalysis {
            envelope,
            onsets,
            tempo_bpm,
            period_frames,
            raw_onset_count,
            hop_size,
            sample_rate,
        })
    }

    /// `sqrt(Σ magnitude²)` over the bins below `fft_size / 4`, chunk-parallel.
    fn envelope(
        &self,
        spectrogram: &Spectrogram,
        cancel: &CancelToken,
        progress: &(dyn Fn(f64) + Sync),
    ) -> AnalysisResult<Vec<f64>> {
        let n = spectrogram.len();
        let low_bins = spectrogram.params.fft_size / 4;
        let done = AtomicUsize::new(0);
        let mut envelope = vec![0.0f64; n];

        self.pool.fill_chunks(&mut envelope, cancel, |start, chunk| {
            for (k, slot) in chunk.iter_mut().enumerate() {
                if k % 256 == 0 {
                    cancel.check()?;
                }
                let row = &spectrogram.frames[start + k];
                let energy: f64 = row.iter().take(low_bins).map(|m| m * m).sum();
                *slot = energy.sqrt();
            }
            let finished = done.fetch_add(chunk.len(), Ordering::Relaxed) + chunk.len();
            progress(finished as f64 / n as f64);
            Ok(())
        })?;

        Ok(envelope)
    }
}

/// Flags frames whose energy beats the adaptive threshold.
///
/// The history is one continuous ring over the whole envelope, so the
/// threshold does not depend on how the envelope was split across workers.
pub fn raw_onsets(envelope: &[f64], cancel: &CancelToken) -> AnalysisResult<Vec<bool>> {
    let mut history = [0.0f64; HISTORY_FRAMES];
    let mut onsets = vec![false; envelope.len()];

    for (idx, &energy) in envelope.iter().enumerate() {
        if idx % 4096 == 0 {
            cancel.check()?;
        }
        history[idx % HISTORY_FRAMES] = energy;

        let (sum, count) = history
            .iter()
            .filter(|&&e| e > 0.0)
            .fold((0.0, 0usize), |(s, c), &e| (s + e, c + 1));
        if count > 0 {
            onsets[idx] = energy > ONSET_RATIO * (sum / count as f64);
        }
    }

    Ok(onsets)
}

/// Most common distance between consecutive onsets; ties go to the shorter one.
pub fn modal_interval(onsets: &[bool]) -> Option<usize> {
    let mut histogram: BTreeMap<usize, usize> = BTreeMap::new();
    let mut last = None;
    for (i, _) in onsets.iter().enumerate().filter(|(_, onset)| **onset) {
        if let Some(prev) = last {
            *histogram.entry(i - prev).or_insert(0) += 1;
        }
        last = Some(i);
    }

    let mut best: Option<(usize, usize)> = None;
    for (&interval, &count) in &histogram {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((interval, count));
        }
    }
    best.map(|(interval, _)| interval)
}

fn refine_beats(
    envelope: &[f64],
    raw: &[bool],
    frames_per_beat: f64,
    cancel: &CancelToken,
    progress: &dyn Fn(f64),
) -> AnalysisResult<Vec<bool>> {
    let n = envelope.len();
    let mut refined = vec![false; n];
    let Some(first) = raw.iter().position(|&b| b) else {
        return Ok(raw.to_vec());
    };
    refined[first] = true;

    let search = (frames_per_beat * SEARCH_FRACTION) as usize;
    let mut expected = first as f64;
    let mut steps = 0usize;

    while expected < n as f64 {
        if steps % 64 == 0 {
            cancel.check()?;
            progress(expected / n as f64);
        }
        steps += 1;

        let pos = (expected.round() as usize).min(n - 1);
        let start = pos.saturating_sub(search);
        let end = (pos + search).min(n - 1);

        let mut max_energy = 0.0;
        let mut max_pos = pos;
        for (i, &e) in envelope.iter().enumerate().take(end + 1).skip(start) {
            if e > max_energy {
                max_energy = e;
                max_pos = i;
            }
        }

        if max_energy > local_threshold(envelope, max_pos) {
            refined[max_pos] = true;
        }
        expected += frames_per_beat;
    }

    Ok(refined)
}

/// `mean + 1.5 · stddev` over a symmetric window around `pos`.
fn local_threshold(envelope: &[f64], pos: usize) -> f64 {
    let start = pos.saturating_sub(LOCAL_HALF_WINDOW);
    let end = (pos + LOCAL_HALF_WINDOW).min(envelope.len() - 1);
    let window = &envelope[start..=end];

    let count = window.len() as f64;
    let mean = window.iter().sum::<f64>() / count;
    let variance = window.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / count;
    mean + LOCAL_STD_FACTOR * variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::spectrum::{SpectralAnalyzer, StftParams};

    /// Unit clicks at 120 BPM, each quantised onto the 512-sample hop grid.
    fn click_track(seconds: usize, sample_rate: usize) -> Vec<f64> {
        let n = seconds * sample_rate;
        let period = sample_rate as f64 * 60.0 / 120.0 / 512.0;
        let mut samples = vec![0.0; n];
        for j in 1.. {
            let pos = (j as f64 * period).round() as usize * 512;
            if pos >= n {
                break;
            }
            samples[pos] = 0.9;
        }
        samples
    }

    fn spectrogram_of(samples: &[f64], pool: &WorkerPool) -> Spectrogram {
        SpectralAnalyzer::new(StftParams::default(), pool)
            .analyze(samples, 44_100, &|_| {}, &CancelToken::new())
            .unwrap()
    }

    #[test]
    fn click_track_at_120_bpm() {
        let pool = WorkerPool::new(4).unwrap();
        let spec = spectrogram_of(&click_track(20, 44_100), &pool);
        let beats = OnsetBeatTracker::new(&pool)
            .detect_beats(&spec, &CancelToken::new(), &|_| {})
            .unwrap();

        assert_eq!(beats.period_frames, Some(43));
        assert!((beats.tempo_bpm - 120.0).abs() / 120.0 < 0.01, "{}", beats.tempo_bpm);
        assert_eq!(beats.envelope.len(), spec.len());
        assert_eq!(beats.onsets.len(), spec.len());

        // 39 clicks land inside the analysed frames.
        let count = beats.beat_count();
        assert!((37..=40).contains(&count), "{} refined beats", count);
        let times = beats.beat_times();
        for pair in times.windows(2) {
            let gap = (pair[1] - pair[0]).as_secs_f64();
            assert!((gap - 0.5).abs() < 0.06, "gap {}", gap);
        }
    }

    #[test]
    fn envelope_does_not_depend_on_worker_count() {
        let samples = click_track(6, 44_100);
        let one = WorkerPool::new(1).unwrap();
        let many = WorkerPool::new(5).unwrap();
        let spec = spectrogram_of(&samples, &one);
        let a = OnsetBeatTracker::new(&one)
            .detect_beats(&spec, &CancelToken::new(), &|_| {})
            .unwrap();
        let b = OnsetBeatTracker::new(&many)
            .detect_beats(&spec, &CancelToken::new(), &|_| {})
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn silence_defaults_to_120_bpm() {
        let pool = WorkerPool::new(2).unwrap();
        let spec = spectrogram_of(&vec![0.0; 44_100], &pool);
        let beats = OnsetBeatTracker::new(&pool)
            .detect_beats(&spec, &CancelToken::new(), &|_| {})
            .unwrap();
        assert_eq!(beats.tempo_bpm, DEFAULT_TEMPO_BPM);
        assert_eq!(beats.period_frames, None);
        assert_eq!(beats.beat_count(), 0);
    }

    #[test]
    fn empty_spectrogram_fails_in_beats_stage() {
        let pool = WorkerPool::new(1).unwrap();
        let spec = Spectrogram {
            frames: Vec::new(),
            freq_bands: Vec::new(),
            params: StftParams::default(),
            sample_rate: 44_100,
            features: Default::default(),
        };
        let err = OnsetBeatTracker::new(&pool)
            .detect_beats(&spec, &CancelToken::new(), &|_| {})
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::AnalysisFailed { stage: Stage::Beats, .. }
        ));
    }

    #[test]
    fn raw_onsets_use_nonzero_history() {
        let mut envelope = vec![0.0; 100];
        envelope[10] = 1.0;
        envelope[11] = 1.0;
        envelope[40] = 3.0;
        envelope[90] = 3.0;
        let onsets = raw_onsets(&envelope, &CancelToken::new()).unwrap();
        // A lone first value equals its own mean, so it is not an onset.
        assert!(!onsets[10]);
        assert!(!onsets[11]);
        assert!(onsets[40]);
        // Frames 10 and 11 have left the history by frame 90.
        assert!(!onsets[90]);
        assert_eq!(onsets.iter().filter(|&&b| b).count(), 1);
    }

    #[test]
    fn modal_interval_prefers_shorter_on_ties() {
        let mut onsets = vec![false; 40];
        for i in [0, 10, 20, 25, 30] {
            onsets[i] = true;
        }
        assert_eq!(modal_interval(&onsets), Some(5));
        assert_eq!(modal_interval(&[false, true, false]), None);
    }

    #[test]
    fn cancelled_run_returns_cancelled() {
        let pool = WorkerPool::new(2).unwrap();
        let spec = spectrogram_of(&click_track(3, 44_100), &pool);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = OnsetBeatTracker::new(&pool)
            .detect_beats(&spec, &cancel, &|_| {})
            .unwrap_err();
        assert_eq!(err, AnalysisError::Cancelled);
    }
}
