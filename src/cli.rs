use clap::Parser;
use std::path::PathBuf;

use wavetrace::viz::VisualizationMode;

#[derive(Parser, Debug)]
#[command(name = "wavetrace", about = "Waveform, spectrum and beat analysis for audio tracks")]
pub struct Cli {
    /// Input audio file or http(s) URL
    pub input: String,

    /// Visualizations to prepare (comma-separated): waveform, spectrogram, density, tempo, beatmap
    #[arg(short, long, value_delimiter = ',', default_value = "waveform")]
    pub mode: Vec<VisualizationMode>,

    /// Config file path (defaults to wavetrace.toml, then the user config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// STFT window length in samples
    #[arg(long, default_value_t = 2048)]
    pub window_size: usize,

    /// Samples between consecutive STFT frames
    #[arg(long, default_value_t = 512)]
    pub hop_size: usize,

    /// FFT length; the window is zero-padded up to this size
    #[arg(long, default_value_t = 2048)]
    pub fft_size: usize,

    /// Worker threads (0 = available parallelism)
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// Treat the input as headerless signed 16-bit little-endian PCM
    #[arg(long)]
    pub raw: bool,

    /// Sample rate of raw PCM input
    #[arg(long, default_value_t = 44_100)]
    pub sample_rate: u32,

    /// Interleaved channel count of raw PCM input
    #[arg(long, default_value_t = 1)]
    pub channels: usize,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_split_on_commas() {
        let cli = Cli::parse_from(["wavetrace", "song.mp3", "--mode", "spectrogram,beatmap"]);
        assert_eq!(
            cli.mode,
            vec![VisualizationMode::Spectrogram, VisualizationMode::BeatMap]
        );
        assert_eq!(cli.hop_size, 512);
        assert!(!cli.raw);
    }

    #[test]
    fn defaults_to_waveform() {
        let cli = Cli::parse_from(["wavetrace", "https://example.com/a.ogg", "--json"]);
        assert_eq!(cli.mode, vec![VisualizationMode::Waveform]);
        assert!(cli.json);
    }

    #[test]
    fn unknown_modes_are_rejected() {
        assert!(Cli::try_parse_from(["wavetrace", "a.wav", "--mode", "sonogram"]).is_err());
    }
}
