pub mod beats;
pub mod decode;
pub mod metadata;
pub mod model;
pub mod spectrum;
pub mod waveform;

pub use beats::{BeatAnalysis, OnsetBeatTracker};
pub use decode::{PcmBuffer, PcmDecoder, RawPcmDecoder, SymphoniaDecoder};
pub use metadata::TrackInfo;
pub use model::AudioModel;
pub use spectrum::{SpectralAnalyzer, Spectrogram, StftParams};
pub use waveform::{Waveform, WaveformSource};
