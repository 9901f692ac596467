//! Mono float PCM from raw track bytes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::decode::{PcmBuffer, PcmDecoder};
use crate::cancel::CancelToken;
use crate::error::{AnalysisError, AnalysisResult};
use crate::pool::WorkerPool;

/// Share of the waveform stage spent in the decoder; the rest is mixdown.
const DECODE_SHARE: f64 = 0.5;
/// Frames converted between cancellation checks inside one chunk.
const SUB_CHUNK_FRAMES: usize = 4096;

/// Output of the waveform stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f64>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f64 / self.sample_rate as f64
        }
    }
}

pub struct WaveformSource<'a> {
    decoder: &'a dyn PcmDecoder,
    pool: &'a WorkerPool,
}

impl<'a> WaveformSource<'a> {
    pub fn new(decoder: &'a dyn PcmDecoder, pool: &'a WorkerPool) -> Self {
        Self { decoder, pool }
    }

    /// Decodes `bytes` and mixes them down to mono samples in `[-1, 1]`.
    ///
    /// Nothing is returned on cancellation, so the caller never sees a
    /// partially converted buffer.
    pub fn decode(
        &self,
        bytes: &Arc<[u8]>,
        progress: &(dyn Fn(f64) + Sync),
        cancel: &CancelToken,
    ) -> AnalysisResult<Waveform> {
        if bytes.len() < 2 {
            return Err(AnalysisError::InsufficientData(format!(
                "{} bytes of audio",
                bytes.len()
            )));
        }

        let pcm = self
            .decoder
            .decode(bytes, cancel, &|p| progress(p.clamp(0.0, 1.0) * DECODE_SHARE))?;
        cancel.check()?;

        log::debug!(
            "Decoded {} frames, {} channels at {} Hz",
            pcm.frames(),
            pcm.channels,
            pcm.sample_rate
        );

        let samples = mix_to_mono(&pcm, self.pool, cancel, &|p| {
            progress(DECODE_SHARE + p * (1.0 - DECODE_SHARE))
        })?;

        Ok(Waveform {
            samples,
            sample_rate: pcm.sample_rate,
        })
    }
}

/// Averages interleaved channels into mono, one chunk per worker.
///
/// Progress is reported as the fraction of PCM bytes converted.
pub fn mix_to_mono(
    pcm: &PcmBuffer,
    pool: &WorkerPool,
    cancel: &CancelToken,
    progress: &(dyn Fn(f64) + Sync),
) -> AnalysisResult<Vec<f64>> {
    let channels = pcm.channels.max(1);
    let frames = pcm.frames();
    if frames == 0 {
        return Err(AnalysisError::InsufficientData(
            "decoder produced no samples".into(),
        ));
    }

    let total_bytes = frames * channels * 2;
    let processed = AtomicUsize::new(0);
    let mut mono = vec![0.0f64; frames];

    pool.fill_chunks(&mut mono, cancel, |start, chunk| {
        for (sub, out) in chunk.chunks_mut(SUB_CHUNK_FRAMES).enumerate() {
            cancel.check()?;
            let first = start + sub * SUB_CHUNK_FRAMES;
            for (k, slot) in out.iter_mut().enumerate() {
                let base = (first + k) * channels;
                let sum: f64 = pcm.samples[base..base + channels]
                    .iter()
                    .map(|&s| s as f64)
                    .sum();
                *slot = sum / channels as f64 / 32768.0;
            }
            let bytes = out.len() * channels * 2;
            let done = processed.fetch_add(bytes, Ordering::Relaxed) + bytes;
            progress(done as f64 / total_bytes as f64);
        }
        Ok(())
    })?;

    Ok(mono)
}
