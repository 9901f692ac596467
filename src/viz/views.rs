use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use super::{VisualizationMode, ViewState, BASE_WINDOW};
use crate::audio::{AudioModel, BeatAnalysis, Waveform};
use crate::error::{AnalysisError, AnalysisResult};

/// Samples per RMS window in the density view.
const DENSITY_WINDOW: usize = 1024;

#[derive(Debug, Clone, Copy)]
enum Reduce {
    Peak,
    Mean,
    Any,
}

impl Reduce {
    fn apply(self, values: &[f64]) -> f64 {
        match self {
            Reduce::Peak => values.iter().fold(0.0, |acc: f64, v| acc.max(v.abs())),
            Reduce::Mean => values.iter().sum::<f64>() / values.len().max(1) as f64,
            Reduce::Any => {
                if values.iter().any(|&v| v > 0.0) {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Values behind a series: derived per view, or shared with the audio model.
#[derive(Debug, Clone)]
enum Values {
    Owned(Vec<f64>),
    Samples(Arc<Waveform>),
    Envelope(Arc<BeatAnalysis>),
}

impl Values {
    fn as_slice(&self) -> &[f64] {
        match self {
            Values::Owned(v) => v,
            Values::Samples(w) => &w.samples,
            Values::Envelope(b) => &b.envelope,
        }
    }
}

/// A value series sampled at a fixed rate, reduced to screen columns.
#[derive(Debug, Clone)]
struct Series {
    values: Values,
    /// Values per second
    rate: f64,
    scale: f64,
}

impl Series {
    fn new(values: Values, rate: f64) -> Self {
        let scale = values
            .as_slice()
            .iter()
            .fold(0.0, |acc: f64, v| acc.max(v.abs()));
        Self {
            values,
            rate,
            scale,
        }
    }

    fn values(&self) -> &[f64] {
        self.values.as_slice()
    }

    fn duration(&self) -> Duration {
        if self.rate > 0.0 {
            Duration::from_secs_f64(self.values().len() as f64 / self.rate)
        } else {
            Duration::ZERO
        }
    }

    fn visible(&self, view: &ViewState) -> Range<usize> {
        let len = self.values().len();
        let start = ((view.offset.as_secs_f64() * self.rate) as usize).min(len);
        let span = (BASE_WINDOW.as_secs_f64() / view.zoom * self.rate).ceil() as usize;
        start..start.saturating_add(span.max(1)).min(len)
    }

    fn columns(&self, view: &ViewState, reduce: Reduce) -> Vec<f64> {
        let width = view.width as usize;
        let visible = &self.values()[self.visible(view)];
        if visible.is_empty() {
            return vec![0.0; width];
        }
        (0..width)
            .map(|col| {
                let lo = col * visible.len() / width;
                let hi = ((col + 1) * visible.len() / width)
                    .max(lo + 1)
                    .min(visible.len());
                let value = reduce.apply(&visible[lo..hi]);
                match reduce {
                    Reduce::Any => value,
                    _ if self.scale > 0.0 => (value / self.scale).clamp(0.0, 1.0),
                    _ => 0.0,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct WaveformView {
    series: Series,
}

impl WaveformView {
    fn new(wave: &Arc<Waveform>) -> Self {
        Self {
            series: Series::new(Values::Samples(Arc::clone(wave)), wave.sample_rate as f64),
        }
    }
}

/// RMS energy per fixed window of samples.
#[derive(Debug, Clone)]
pub struct DensityView {
    series: Series,
}

impl DensityView {
    fn new(samples: &[f64], sample_rate: u32) -> Self {
        let rms = samples
            .chunks(DENSITY_WINDOW)
            .map(|w| (w.iter().map(|s| s * s).sum::<f64>() / w.len() as f64).sqrt())
            .collect();
        Self {
            series: Series::new(Values::Owned(rms), sample_rate as f64 / DENSITY_WINDOW as f64),
        }
    }

    pub fn rms(&self) -> &[f64] {
        self.series.values()
    }
}

#[derive(Debug, Clone)]
pub struct SpectrogramView {
    series: Series,
    top_frequency: f64,
}

impl SpectrogramView {
    pub fn top_frequency(&self) -> f64 {
        self.top_frequency
    }
}

#[derive(Debug, Clone)]
pub struct TempoView {
    series: Series,
    pub tempo_bpm: f64,
}

#[derive(Debug, Clone)]
pub struct BeatMapView {
    series: Series,
    beats: Arc<BeatAnalysis>,
}

impl BeatMapView {
    pub fn beat_times(&self) -> Vec<Duration> {
        self.beats.beat_times()
    }
}

fn beat_rate(beats: &BeatAnalysis) -> f64 {
    beats.sample_rate as f64 / beats.hop_size.max(1) as f64
}

/// Rendered-ready artifact for one mode, built from the audio model.
#[derive(Debug, Clone)]
pub enum Visualization {
    Waveform(WaveformView),
    Spectrogram(SpectrogramView),
    Density(DensityView),
    Tempo(TempoView),
    BeatMap(BeatMapView),
}

impl Visualization {
    pub fn build(mode: VisualizationMode, model: &AudioModel) -> AnalysisResult<Self> {
        let unavailable = || AnalysisError::VisualizationUnavailable(mode);
        let viz = match mode {
            VisualizationMode::Waveform => {
                let wave = model.waveform.as_ref().ok_or_else(unavailable)?;
                Visualization::Waveform(WaveformView::new(wave))
            }
            VisualizationMode::Density => {
                let wave = model.waveform.as_ref().ok_or_else(unavailable)?;
                Visualization::Density(DensityView::new(&wave.samples, wave.sample_rate))
            }
            VisualizationMode::Spectrogram => {
                let spec = model.spectrogram.as_ref().ok_or_else(unavailable)?;
                let means = spec
                    .frames
                    .iter()
                    .map(|f| f.iter().sum::<f64>() / f.len().max(1) as f64)
                    .collect();
                let rate = if spec.frame_secs() > 0.0 {
                    1.0 / spec.frame_secs()
                } else {
                    0.0
                };
                Visualization::Spectrogram(SpectrogramView {
                    series: Series::new(Values::Owned(means), rate),
                    top_frequency: spec.freq_bands.last().copied().unwrap_or(0.0),
                })
            }
            VisualizationMode::Tempo => {
                let beats = model.beats.as_ref().ok_or_else(unavailable)?;
                Visualization::Tempo(TempoView {
                    series: Series::new(Values::Envelope(Arc::clone(beats)), beat_rate(beats)),
                    tempo_bpm: beats.tempo_bpm,
                })
            }
            VisualizationMode::BeatMap => {
                let beats = model.beats.as_ref().ok_or_else(unavailable)?;
                let flags = beats
                    .onsets
                    .iter()
                    .map(|&b| if b { 1.0 } else { 0.0 })
                    .collect();
                Visualization::BeatMap(BeatMapView {
                    series: Series::new(Values::Owned(flags), beat_rate(beats)),
                    beats: Arc::clone(beats),
                })
            }
        };
        Ok(viz)
    }

    pub fn mode(&self) -> VisualizationMode {
        match self {
            Visualization::Waveform(_) => VisualizationMode::Waveform,
            Visualization::Spectrogram(_) => VisualizationMode::Spectrogram,
            Visualization::Density(_) => VisualizationMode::Density,
            Visualization::Tempo(_) => VisualizationMode::Tempo,
            Visualization::BeatMap(_) => VisualizationMode::BeatMap,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Visualization::Waveform(_) => "Waveform",
            Visualization::Spectrogram(_) => "Spectrogram",
            Visualization::Density(_) => "Density Map",
            Visualization::Tempo(_) => "Tempo Analysis",
            Visualization::BeatMap(_) => "Beat & Rhythm",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Visualization::Waveform(_) => "Audio waveform with amplitude over time",
            Visualization::Spectrogram(_) => "Frequency content over time",
            Visualization::Density(_) => "Audio density over time with intensity mapping",
            Visualization::Tempo(_) => "Tempo and energy patterns",
            Visualization::BeatMap(_) => "Beat patterns and rhythm structure",
        }
    }

    fn series(&self) -> &Series {
        match self {
            Visualization::Waveform(v) => &v.series,
            Visualization::Spectrogram(v) => &v.series,
            Visualization::Density(v) => &v.series,
            Visualization::Tempo(v) => &v.series,
            Visualization::BeatMap(v) => &v.series,
        }
    }

    pub fn duration(&self) -> Duration {
        self.series().duration()
    }

    /// One value in `[0, 1]` per visible column.
    pub fn columns(&self, view: &ViewState) -> Vec<f64> {
        let reduce = match self {
            Visualization::Waveform(_) => Reduce::Peak,
            Visualization::BeatMap(_) => Reduce::Any,
            _ => Reduce::Mean,
        };
        self.series().columns(view, reduce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(width: u16) -> ViewState {
        let mut view = ViewState::new(width, 24);
        view.total_duration = Duration::from_secs(60);
        view
    }

    fn sine_model(seconds: usize, sample_rate: u32) -> AudioModel {
        let mut model = AudioModel::new(sample_rate);
        let n = seconds * sample_rate as usize;
        model.waveform = Some(Arc::new(Waveform {
            samples: (0..n)
                .map(|i| 0.5 * (i as f64 * 0.05).sin())
                .collect(),
            sample_rate,
        }));
        model
    }

    #[test]
    fn missing_data_is_unavailable() {
        let model = AudioModel::new(44_100);
        for mode in VisualizationMode::ALL {
            assert_eq!(
                Visualization::build(mode, &model).unwrap_err(),
                AnalysisError::VisualizationUnavailable(mode)
            );
        }
    }

    #[test]
    fn waveform_columns_fill_the_width() {
        let model = sine_model(20, 8_000);
        let viz = Visualization::build(VisualizationMode::Waveform, &model).unwrap();
        assert_eq!(viz.mode(), VisualizationMode::Waveform);
        assert_eq!(viz.duration(), Duration::from_secs(20));
        let cols = viz.columns(&view(80));
        assert_eq!(cols.len(), 80);
        assert!(cols.iter().all(|c| (0.0..=1.0).contains(c)));
        assert!(cols.iter().all(|&c| c > 0.9));
    }

    #[test]
    fn density_uses_fixed_windows() {
        let mut model = AudioModel::new(1024);
        model.waveform = Some(Arc::new(Waveform {
            samples: vec![0.25; 1024 * 30],
            sample_rate: 1024,
        }));
        let viz = Visualization::build(VisualizationMode::Density, &model).unwrap();
        let Visualization::Density(density) = &viz else {
            panic!("wrong artifact");
        };
        assert_eq!(density.rms().len(), 30);
        assert!((density.rms()[0] - 0.25).abs() < 1e-12);
        assert!(viz.columns(&view(10)).iter().all(|&c| (c - 1.0).abs() < 1e-12));
    }

    #[test]
    fn panning_past_the_end_yields_empty_columns() {
        let model = sine_model(5, 1_000);
        let viz = Visualization::build(VisualizationMode::Waveform, &model).unwrap();
        let mut view = view(16);
        view.offset = Duration::from_secs(30);
        assert_eq!(viz.columns(&view), vec![0.0; 16]);
    }

    #[test]
    fn beat_map_marks_beat_columns() {
        let mut model = AudioModel::new(1_000);
        let mut onsets = vec![false; 100];
        onsets[0] = true;
        onsets[50] = true;
        model.beats = Some(Arc::new(BeatAnalysis {
            envelope: vec![1.0; 100],
            onsets,
            tempo_bpm: 120.0,
            period_frames: Some(50),
            raw_onset_count: 2,
            hop_size: 100,
            sample_rate: 1_000,
        }));
        let viz = Visualization::build(VisualizationMode::BeatMap, &model).unwrap();
        let cols = viz.columns(&view(10));
        assert_eq!(cols[0], 1.0);
        assert_eq!(cols[5], 1.0);
        assert_eq!(cols.iter().filter(|&&c| c > 0.0).count(), 2);
        let Visualization::BeatMap(map) = &viz else {
            panic!("wrong artifact");
        };
        assert_eq!(
            map.beat_times(),
            vec![Duration::ZERO, Duration::from_secs(5)]
        );

        let tempo = Visualization::build(VisualizationMode::Tempo, &model).unwrap();
        assert_eq!(tempo.duration(), Duration::from_secs(10));
        assert_eq!(tempo.name(), "Tempo Analysis");
    }

    #[test]
    fn waveform_and_tempo_share_model_data() {
        let mut model = sine_model(2, 1_000);
        model.beats = Some(Arc::new(BeatAnalysis {
            envelope: vec![0.5; 40],
            onsets: vec![false; 40],
            tempo_bpm: 120.0,
            period_frames: None,
            raw_onset_count: 0,
            hop_size: 50,
            sample_rate: 1_000,
        }));
        let wave = model.waveform.clone().unwrap();
        let beats = model.beats.clone().unwrap();

        let waveform = Visualization::build(VisualizationMode::Waveform, &model).unwrap();
        let tempo = Visualization::build(VisualizationMode::Tempo, &model).unwrap();
        assert_eq!(Arc::strong_count(&wave), 3);
        assert_eq!(Arc::strong_count(&beats), 3);
        assert!(std::ptr::eq(
            waveform.series().values().as_ptr(),
            wave.samples.as_ptr()
        ));
        assert!(std::ptr::eq(
            tempo.series().values().as_ptr(),
            beats.envelope.as_ptr()
        ));
    }
}
