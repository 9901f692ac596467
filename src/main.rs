mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use wavetrace::audio::TrackInfo;
use wavetrace::config::{self, Config, InputFormat};
use wavetrace::coordinator::{Coordinator, ProcessingStatus};
use wavetrace::error::AnalysisError;
use wavetrace::viz::VisualizationMode;

use cli::Cli;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const PROGRESS_TICKS: u64 = 1000;

#[derive(Serialize)]
struct ModeSummary {
    mode: VisualizationMode,
    name: &'static str,
    description: &'static str,
    message: String,
    columns: Vec<f64>,
}

#[derive(Serialize)]
struct Summary {
    input: String,
    track: Option<TrackInfo>,
    duration_secs: Option<f64>,
    spectrogram_frames: Option<usize>,
    tempo_bpm: Option<f64>,
    beat_count: Option<usize>,
    modes: Vec<ModeSummary>,
}

fn find_config(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let local = PathBuf::from("wavetrace.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("wavetrace").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("wavetrace").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    })
}

/// Config file values, overridden by flags that were moved off their defaults.
fn resolve_config(cli: &Cli) -> Config {
    let mut cfg = Config::default();
    if let Some(path) = find_config(cli.config.clone()) {
        match config::load_config(&path) {
            Some(loaded) => {
                log::info!("Loaded config from {}", path.display());
                cfg = loaded;
            }
            None => log::warn!("Failed to load config from {}", path.display()),
        }
    }

    if cli.window_size != 2048 { cfg.analysis.window_size = cli.window_size; }
    if cli.hop_size != 512 { cfg.analysis.hop_size = cli.hop_size; }
    if cli.fft_size != 2048 { cfg.analysis.fft_size = cli.fft_size; }
    if cli.workers != 0 { cfg.analysis.workers = cli.workers; }
    if cli.raw {
        cfg.input.format = InputFormat::Raw;
    }
    if cli.sample_rate != 44_100 { cfg.input.raw_sample_rate = cli.sample_rate; }
    if cli.channels != 1 { cfg.input.raw_channels = cli.channels; }
    cfg
}

/// Polls until the coordinator is idle, mirroring its progress on `pb`.
fn wait_idle(coordinator: &Coordinator, pb: &ProgressBar) -> ProcessingStatus {
    loop {
        let status = coordinator.status();
        pb.set_position((status.progress * PROGRESS_TICKS as f64) as u64);
        pb.set_message(status.message.clone());
        if !status.is_busy() {
            return status;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn progress_bar(quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(PROGRESS_TICKS);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn prepare(coordinator: &Coordinator, mode: VisualizationMode, pb: &ProgressBar) -> Result<String> {
    loop {
        match coordinator.request_visualization(mode) {
            Ok(ack) => {
                log::debug!("{}", ack);
                let status = wait_idle(coordinator, pb);
                if coordinator.cached_modes().contains(&mode) {
                    return Ok(status.message);
                }
                bail!("{}", status.message);
            }
            Err(AnalysisError::Busy(current)) => {
                log::debug!("Busy ({}), retrying {}", current, mode);
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(&cli);
    let coordinator = Coordinator::new(cfg).context("Failed to set up analysis")?;

    log::info!("wavetrace - audio analysis");
    log::info!("Input: {}", cli.input);

    let pb = progress_bar(cli.json)?;
    coordinator.load_track(&cli.input);
    let status = wait_idle(&coordinator, &pb);
    let track = coordinator.track_info();
    if track.is_none() {
        pb.abandon();
        bail!("{}", status.message);
    }

    let mut modes = Vec::new();
    for &mode in &cli.mode {
        pb.set_position(0);
        let message = prepare(&coordinator, mode, &pb)
            .with_context(|| format!("Failed to prepare {} visualization", mode))?;
        let (name, description) = coordinator.active_label().unwrap_or((mode.name(), ""));
        modes.push(ModeSummary {
            mode,
            name,
            description,
            message,
            columns: coordinator.active_columns().unwrap_or_default(),
        });
    }
    pb.finish_and_clear();

    let model = coordinator.audio_model();
    let summary = Summary {
        input: cli.input.clone(),
        duration_secs: model.waveform.as_ref().map(|w| w.duration_secs()),
        spectrogram_frames: model.spectrogram.as_ref().map(|s| s.len()),
        tempo_bpm: model.estimated_tempo_bpm(),
        beat_count: model.beats.as_ref().map(|b| b.beat_count()),
        track,
        modes,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &Summary) {
    println!("{}", summary.input);
    if let Some(track) = &summary.track {
        let title = track.title.as_deref().unwrap_or("(untitled)");
        let artist = track.artist.as_deref().unwrap_or("unknown artist");
        println!("  {} - {}", artist, title);
        println!(
            "  {} Hz, {} channel(s), {} bytes",
            track.sample_rate, track.channels, track.byte_len
        );
    }
    if let Some(secs) = summary.duration_secs {
        println!("  Duration:    {:.2}s", secs);
    }
    if let Some(frames) = summary.spectrogram_frames {
        println!("  Spectrogram: {} frames", frames);
    }
    if let Some(bpm) = summary.tempo_bpm {
        println!(
            "  Tempo:       {:.1} BPM ({} beats)",
            bpm,
            summary.beat_count.unwrap_or(0)
        );
    }
    for m in &summary.modes {
        println!("  [{}] {}: {}", m.name, m.description, m.message);
    }
}
