use std::sync::Arc;

use super::beats::BeatAnalysis;
use super::spectrum::Spectrogram;
use super::waveform::Waveform;
use crate::error::Stage;

/// Derived signals for the loaded track.
///
/// Each field is either fully computed or `None`; a stage that was
/// interrupted never leaves a truncated value behind. Fields are filled in
/// dependency order: samples, then spectrogram, then beats.
#[derive(Debug, Clone, Default)]
pub struct AudioModel {
    pub sample_rate: u32,
    pub waveform: Option<Arc<Waveform>>,
    pub spectrogram: Option<Arc<Spectrogram>>,
    pub beats: Option<Arc<BeatAnalysis>>,
}

impl AudioModel {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..Self::default()
        }
    }

    pub fn has(&self, stage: Stage) -> bool {
        match stage {
            Stage::Waveform => self.waveform.is_some(),
            Stage::Spectrum => self.spectrogram.is_some(),
            Stage::Beats => self.beats.is_some(),
        }
    }

    pub fn estimated_tempo_bpm(&self) -> Option<f64> {
        self.beats.as_ref().map(|b| b.tempo_bpm)
    }
}
