//! Decode-to-PCM primitives feeding the waveform stage.

use std::io::Cursor;
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::{Hint, ProbeResult};

use crate::cancel::CancelToken;
use crate::config::{InputConfig, InputFormat};
use crate::error::{AnalysisError, AnalysisResult};

/// Interleaved signed 16-bit PCM as produced by a decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<i16>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }
}

/// Turns an encoded track into interleaved PCM.
///
/// Implementations check `cancel` regularly and report their own progress
/// in `[0, 1]`.
pub trait PcmDecoder: Send + Sync {
    fn decode(
        &self,
        bytes: &Arc<[u8]>,
        cancel: &CancelToken,
        progress: &dyn Fn(f64),
    ) -> AnalysisResult<PcmBuffer>;
}

/// Picks the decoder matching the configured input format.
pub fn decoder_for(input: &InputConfig) -> Arc<dyn PcmDecoder> {
    match input.format {
        InputFormat::Auto => Arc::new(SymphoniaDecoder),
        InputFormat::Raw => Arc::new(RawPcmDecoder::new(input.raw_sample_rate, input.raw_channels)),
    }
}

/// Container/codec decoding through symphonia's default registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

pub(crate) fn probe(bytes: &Arc<[u8]>) -> AnalysisResult<ProbeResult> {
    let source = Cursor::new(Arc::clone(bytes));
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AnalysisError::LoadFailed(format!("failed to probe audio format: {}", e)))
}

impl PcmDecoder for SymphoniaDecoder {
    fn decode(
        &self,
        bytes: &Arc<[u8]>,
        cancel: &CancelToken,
        progress: &dyn Fn(f64),
    ) -> AnalysisResult<PcmBuffer> {
        let probed = probe(bytes)?;
        let mut format: Box<dyn FormatReader> = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AnalysisError::LoadFailed("no audio tracks found".into()))?;

        let track_id = track.id;
        let channels = track.codec_params.channels.map_or(1, |c| c.count());
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| AnalysisError::LoadFailed("unknown sample rate".into()))?;
        let total_frames = track.codec_params.n_frames;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AnalysisError::LoadFailed(format!("failed to create decoder: {}", e)))?;

        let mut samples: Vec<i16> = Vec::new();
        let mut skipped = 0usize;

        loop {
            cancel.check()?;

            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(AnalysisError::LoadFailed(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(symphonia::core::errors::Error::DecodeError(_)) => {
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(AnalysisError::LoadFailed(e.to_string())),
            };

            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<i16>::new(decoded.frames() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());

            if let Some(total) = total_frames.filter(|&t| t > 0) {
                let end = packet.ts() + packet.dur();
                progress((end as f64 / total as f64).min(1.0));
            }
        }

        if skipped > 0 {
            log::warn!("Skipped {} undecodable packets", skipped);
        }
        progress(1.0);

        Ok(PcmBuffer {
            samples,
            channels,
            sample_rate,
        })
    }
}

/// Headerless signed 16-bit little-endian PCM.
#[derive(Debug, Clone, Copy)]
pub struct RawPcmDecoder {
    sample_rate: u32,
    channels: usize,
}

impl RawPcmDecoder {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
        }
    }
}

impl PcmDecoder for RawPcmDecoder {
    fn decode(
        &self,
        bytes: &Arc<[u8]>,
        cancel: &CancelToken,
        progress: &dyn Fn(f64),
    ) -> AnalysisResult<PcmBuffer> {
        if bytes.len() < 2 {
            return Err(AnalysisError::InsufficientData(format!(
                "{} bytes of PCM",
                bytes.len()
            )));
        }

        let whole_frames = bytes.len() / (2 * self.channels);
        let usable = whole_frames * 2 * self.channels;
        let mut samples = Vec::with_capacity(usable / 2);

        for (i, block) in bytes[..usable].chunks(64 * 1024).enumerate() {
            cancel.check()?;
            samples.extend(
                block
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
            );
            progress(((i + 1) * 64 * 1024).min(usable) as f64 / usable.max(1) as f64);
        }

        Ok(PcmBuffer {
            samples,
            channels: self.channels,
            sample_rate: self.sample_rate,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Canonical 44-byte RIFF header followed by s16le frames.
    pub(crate) fn wav_bytes(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;
        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    pub(crate) fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn raw_decoder_reads_little_endian_pairs() {
        let bytes: Arc<[u8]> = pcm_bytes(&[1, -2, 300, i16::MIN]).into();
        let pcm = RawPcmDecoder::new(8000, 1)
            .decode(&bytes, &CancelToken::new(), &|_| {})
            .unwrap();
        assert_eq!(pcm.samples, vec![1, -2, 300, i16::MIN]);
        assert_eq!(pcm.sample_rate, 8000);
        assert_eq!(pcm.frames(), 4);
    }

    #[test]
    fn raw_decoder_drops_partial_frames() {
        let mut raw = pcm_bytes(&[10, 20, 30]);
        raw.push(0xff);
        let bytes: Arc<[u8]> = raw.into();
        let pcm = RawPcmDecoder::new(8000, 2)
            .decode(&bytes, &CancelToken::new(), &|_| {})
            .unwrap();
        assert_eq!(pcm.samples, vec![10, 20]);
        assert_eq!(pcm.frames(), 1);
    }

    #[test]
    fn raw_decoder_needs_two_bytes() {
        let bytes: Arc<[u8]> = vec![7u8].into();
        let err = RawPcmDecoder::new(8000, 1)
            .decode(&bytes, &CancelToken::new(), &|_| {})
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData(_)));
    }

    #[test]
    fn symphonia_decodes_wav() {
        let frames: Vec<i16> = (0..4000).flat_map(|i| [i as i16, -(i as i16)]).collect();
        let bytes: Arc<[u8]> = wav_bytes(&frames, 2, 22_050).into();
        let pcm = SymphoniaDecoder
            .decode(&bytes, &CancelToken::new(), &|_| {})
            .unwrap();
        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.sample_rate, 22_050);
        assert_eq!(pcm.frames(), 4000);
        assert_eq!(&pcm.samples[..4], &[0, 0, 1, -1]);
    }

    #[test]
    fn symphonia_rejects_garbage() {
        let bytes: Arc<[u8]> = vec![0x42u8; 512].into();
        let err = SymphoniaDecoder
            .decode(&bytes, &CancelToken::new(), &|_| {})
            .unwrap_err();
        assert!(matches!(err, AnalysisError::LoadFailed(_)));
    }

    #[test]
    fn cancelled_decode_returns_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let bytes: Arc<[u8]> = pcm_bytes(&[0; 64]).into();
        let err = RawPcmDecoder::new(8000, 1)
            .decode(&bytes, &cancel, &|_| {})
            .unwrap_err();
        assert_eq!(err, AnalysisError::Cancelled);
    }
}
