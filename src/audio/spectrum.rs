//! Short-time magnitude spectrum of the mono waveform.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rustfft::{num_complex::Complex, FftPlanner};

use crate::cancel::CancelToken;
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::pool::WorkerPool;

/// Progress is published once per this many parts of the frame count.
const PROGRESS_STEPS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StftParams {
    pub window_size: usize,
    pub hop_size: usize,
    pub fft_size: usize,
}

impl Default for StftParams {
    fn default() -> Self {
        Self {
            window_size: 2048,
            hop_size: 512,
            fft_size: 2048,
        }
    }
}

impl From<&AnalysisConfig> for StftParams {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            window_size: config.window_size,
            hop_size: config.hop_size,
            fft_size: config.fft_size,
        }
    }
}

impl StftParams {
    /// `floor((n - window) / hop)`, or 0 when the signal is shorter than a window.
    pub fn frame_count(&self, n_samples: usize) -> usize {
        if n_samples < self.window_size || self.hop_size == 0 {
            0
        } else {
            (n_samples - self.window_size) / self.hop_size
        }
    }

    /// Magnitude bins per frame, up to Nyquist.
    pub fn bins(&self) -> usize {
        self.fft_size / 2
    }

    /// Center frequency of every bin, linear from 0 Hz.
    pub fn freq_bands(&self, sample_rate: u32) -> Vec<f64> {
        let bins = self.bins();
        let nyquist = sample_rate as f64 / 2.0;
        (0..bins).map(|i| i as f64 * nyquist / bins as f64).collect()
    }
}

/// Per-frame features derived from the magnitude matrix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectralFeatures {
    /// Positive magnitude change against the previous frame
    pub flux: Vec<f64>,
    /// Frequency of the strongest bin (Hz)
    pub peak_frequencies: Vec<f64>,
    pub rms_energy: Vec<f64>,
    /// Magnitude-weighted mean frequency (Hz)
    pub centroids: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    /// `frames × bins`; frame `i` covers samples `[i·hop, i·hop + window)`
    pub frames: Vec<Vec<f64>>,
    pub freq_bands: Vec<f64>,
    pub params: StftParams,
    pub sample_rate: u32,
    pub features: SpectralFeatures,
}

impl Spectrogram {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Seconds between consecutive frames.
    pub fn frame_secs(&self) -> f64 {
        self.params.hop_size as f64 / self.sample_rate.max(1) as f64
    }

    pub fn frame_at(&self, time: Duration) -> Option<usize> {
        let idx = (time.as_secs_f64() / self.frame_secs()) as usize;
        (idx < self.frames.len()).then_some(idx)
    }

    /// Magnitude spectrum of the frame playing at `time`.
    pub fn frequency_response(&self, time: Duration) -> Option<&[f64]> {
        self.frame_at(time).map(|i| self.frames[i].as_slice())
    }

    /// Spectral centroid for a clamped range of frames.
    pub fn centroids(&self, frames: Range<usize>) -> &[f64] {
        let end = frames.end.min(self.features.centroids.len());
        let start = frames.start.min(end);
        &self.features.centroids[start..end]
    }
}

pub struct SpectralAnalyzer<'a> {
    params: StftParams,
    pool: &'a WorkerPool,
}

impl<'a> SpectralAnalyzer<'a> {
    pub fn new(params: StftParams, pool: &'a WorkerPool) -> Self {
        Self { params, pool }
    }

    pub fn analyze(
        &self,
        samples: &[f64],
        sample_rate: u32,
        progress: &(dyn Fn(f64) + Sync),
        cancel: &CancelToken,
    ) -> AnalysisResult<Spectrogram> {
        let StftParams {
            window_size,
            hop_size,
            fft_size,
        } = self.params;
        if fft_size < window_size || hop_size == 0 {
            return Err(AnalysisError::InvalidParameters(format!(
                "window={} hop={} fft={}",
                window_size, hop_size, fft_size
            )));
        }

        let n_frames = self.params.frame_count(samples.len());
        if n_frames < 1 {
            return Err(AnalysisError::InsufficientData(format!(
                "{} samples give no {}-sample frames at hop {}",
                samples.len(),
                window_size,
                hop_size
            )));
        }

        let bins = self.params.bins();
        log::debug!(
            "STFT: {} frames x {} bins on {} workers",
            n_frames,
            bins,
            self.pool.threads()
        );

        let window = hann_window(window_size);
        let fft = FftPlanner::<f64>::new().plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();

        let step = (n_frames / PROGRESS_STEPS).max(1);
        let done = AtomicUsize::new(0);
        let mut frames = vec![Vec::new(); n_frames];

        self.pool.fill_with(
            &mut frames,
            cancel,
            || {
                (
                    vec![Complex::new(0.0f64, 0.0); fft_size],
                    vec![Complex::new(0.0f64, 0.0); scratch_len],
                )
            },
            |(buffer, scratch), idx, row| {
                let start = idx * hop_size;
                let slice = &samples[start..start + window_size];
                for (i, slot) in buffer.iter_mut().enumerate() {
                    *slot = match slice.get(i) {
                        Some(&s) => Complex::new(s * window[i], 0.0),
                        None => Complex::new(0.0, 0.0),
                    };
                }
                fft.process_with_scratch(buffer, scratch);
                *row = buffer[..bins].iter().map(|c| c.norm()).collect();

                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                if finished % step == 0 || finished == n_frames {
                    progress(finished as f64 / n_frames as f64);
                }
                Ok(())
            },
        )?;

        let freq_bands = self.params.freq_bands(sample_rate);
        let features = spectral_features(&frames, &freq_bands, cancel)?;

        Ok(Spectrogram {
            frames,
            freq_bands,
            params: self.params,
            sample_rate,
            features,
        })
    }
}

fn spectral_features(
    frames: &[Vec<f64>],
    freq_bands: &[f64],
    cancel: &CancelToken,
) -> AnalysisResult<SpectralFeatures> {
    let n = frames.len();
    let mut features = SpectralFeatures {
        flux: vec![0.0; n],
        peak_frequencies: vec![0.0; n],
        rms_energy: vec![0.0; n],
        centroids: vec![0.0; n],
    };

    for (i, frame) in frames.iter().enumerate() {
        if i % 1024 == 0 {
            cancel.check()?;
        }
        if i > 0 {
            features.flux[i] = frame
                .iter()
                .zip(frames[i - 1].iter())
                .map(|(cur, prev)| (cur - prev).max(0.0))
                .sum();
        }

        let (peak_bin, _) = frame
            .iter()
            .enumerate()
            .fold((0, 0.0f64), |best, (bin, &mag)| if mag > best.1 { (bin, mag) } else { best });
        features.peak_frequencies[i] = freq_bands[peak_bin];

        let sum_sq: f64 = frame.iter().map(|m| m * m).sum();
        features.rms_energy[i] = (sum_sq / frame.len().max(1) as f64).sqrt();

        let total: f64 = frame.iter().sum();
        if total > 0.0 {
            features.centroids[i] = frame
                .iter()
                .zip(freq_bands)
                .map(|(mag, freq)| mag * freq)
                .sum::<f64>()
                / total;
        }
    }

    Ok(features)
}

/// Periodic Hann window, `0.5 · (1 − cos(2πi / size))`.
pub fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / size as f64).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: u32, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate as f64).sin())
            .collect()
    }

    #[test]
    fn frame_count_follows_hop_grid() {
        let params = StftParams::default();
        assert_eq!(params.frame_count(2047), 0);
        assert_eq!(params.frame_count(2048), 0);
        assert_eq!(params.frame_count(2048 + 511), 0);
        assert_eq!(params.frame_count(2048 + 512), 1);
        // Three minutes at 44.1 kHz.
        let n = 180 * 44_100;
        assert_eq!(params.frame_count(n), (n - 2048) / 512);
        assert_eq!(params.frame_count(n), 15_499);
    }

    #[test]
    fn freq_bands_are_linear_to_nyquist() {
        let bands = StftParams::default().freq_bands(44_100);
        assert_eq!(bands.len(), 1024);
        assert_eq!(bands[0], 0.0);
        assert!((bands[1] - 21.533203125).abs() < 1e-9);
        assert!((bands[1023] - 1023.0 * 22_050.0 / 1024.0).abs() < 1e-9);
    }

    #[test]
    fn hann_window_is_periodic() {
        let w = hann_window(8);
        assert_eq!(w[0], 0.0);
        assert!((w[4] - 1.0).abs() < 1e-12);
        assert!((w[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn matrix_shape_matches_params() {
        let pool = WorkerPool::new(4).unwrap();
        let samples = sine(440.0, 8000, 20_000);
        let spec = SpectralAnalyzer::new(StftParams::default(), &pool)
            .analyze(&samples, 8000, &|_| {}, &CancelToken::new())
            .unwrap();
        assert_eq!(spec.len(), (20_000 - 2048) / 512);
        assert!(spec.frames.iter().all(|row| row.len() == 1024));
        assert_eq!(spec.features.flux.len(), spec.len());
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let pool = WorkerPool::new(2).unwrap();
        let sample_rate = 8000;
        // 1000 Hz falls exactly on bin 256 at fft 2048.
        let samples = sine(1000.0, sample_rate, 10_000);
        let spec = SpectralAnalyzer::new(StftParams::default(), &pool)
            .analyze(&samples, sample_rate, &|_| {}, &CancelToken::new())
            .unwrap();
        for peak in &spec.features.peak_frequencies {
            assert!((peak - 1000.0).abs() < 1e-6);
        }
        let response = spec.frequency_response(Duration::from_millis(100)).unwrap();
        let loudest = response
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(loudest, 256);
        assert!(spec.centroids(0..3).iter().all(|&c| (c - 1000.0).abs() < 50.0));
    }

    #[test]
    fn zero_padding_when_fft_exceeds_window() {
        let pool = WorkerPool::new(2).unwrap();
        let params = StftParams {
            window_size: 256,
            hop_size: 128,
            fft_size: 1024,
        };
        let samples = sine(500.0, 8000, 4096);
        let spec = SpectralAnalyzer::new(params, &pool)
            .analyze(&samples, 8000, &|_| {}, &CancelToken::new())
            .unwrap();
        assert_eq!(spec.len(), (4096 - 256) / 128);
        assert!(spec.frames.iter().all(|row| row.len() == 512));
    }

    #[test]
    fn short_input_is_insufficient() {
        let pool = WorkerPool::new(1).unwrap();
        let err = SpectralAnalyzer::new(StftParams::default(), &pool)
            .analyze(&vec![0.0; 2500], 44_100, &|_| {}, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData(_)));
    }

    #[test]
    fn progress_is_sampled() {
        let pool = WorkerPool::new(4).unwrap();
        let samples = sine(220.0, 8000, 2048 + 512 * 1000);
        let calls = AtomicUsize::new(0);
        SpectralAnalyzer::new(StftParams::default(), &pool)
            .analyze(
                &samples,
                8000,
                &|_| {
                    calls.fetch_add(1, Ordering::Relaxed);
                },
                &CancelToken::new(),
            )
            .unwrap();
        let calls = calls.load(Ordering::Relaxed);
        assert!(calls >= 1 && calls <= PROGRESS_STEPS + 1, "{} reports", calls);
    }

    #[test]
    fn cancellation_aborts() {
        let pool = WorkerPool::new(2).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = SpectralAnalyzer::new(StftParams::default(), &pool)
            .analyze(&vec![0.1; 100_000], 8000, &|_| {}, &cancel)
            .unwrap_err();
        assert_eq!(err, AnalysisError::Cancelled);
    }
}
