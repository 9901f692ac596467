use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::meta::{MetadataRevision, StandardTagKey};

use super::decode::probe;
use crate::config::{InputConfig, InputFormat};
use crate::error::AnalysisResult;

/// Basic facts about a loaded track, read before any analysis runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackInfo {
    pub sample_rate: u32,
    pub channels: usize,
    pub duration: Option<Duration>,
    pub byte_len: usize,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

pub fn extract_track_info(bytes: &Arc<[u8]>, input: &InputConfig) -> AnalysisResult<TrackInfo> {
    match input.format {
        InputFormat::Raw => Ok(raw_track_info(bytes.len(), input)),
        InputFormat::Auto => probe_track_info(bytes),
    }
}

fn raw_track_info(byte_len: usize, input: &InputConfig) -> TrackInfo {
    let channels = input.raw_channels.max(1);
    let frames = byte_len / (2 * channels);
    let duration = (input.raw_sample_rate > 0)
        .then(|| Duration::from_secs_f64(frames as f64 / input.raw_sample_rate as f64));

    TrackInfo {
        sample_rate: input.raw_sample_rate,
        channels,
        duration,
        byte_len,
        ..TrackInfo::default()
    }
}

fn probe_track_info(bytes: &Arc<[u8]>) -> AnalysisResult<TrackInfo> {
    let mut probed = probe(bytes)?;
    let mut info = TrackInfo {
        byte_len: bytes.len(),
        ..TrackInfo::default()
    };

    if let Some(track) = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
    {
        let params = &track.codec_params;
        info.sample_rate = params.sample_rate.unwrap_or(0);
        info.channels = params.channels.map_or(1, |c| c.count());
        if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
            info.duration = Some(Duration::from_secs_f64(frames as f64 / rate as f64));
        }
    }

    // Container-level tags take precedence over tags found while probing.
    if let Some(meta) = probed.metadata.get() {
        if let Some(revision) = meta.current() {
            apply_tags(&mut info, revision);
        }
    }
    if let Some(revision) = probed.format.metadata().current() {
        apply_tags(&mut info, revision);
    }

    log::debug!(
        "Track info: {} Hz, {} ch, {:?}, title={:?}",
        info.sample_rate,
        info.channels,
        info.duration,
        info.title
    );
    Ok(info)
}

fn apply_tags(info: &mut TrackInfo, revision: &MetadataRevision) {
    for tag in revision.tags() {
        let slot = match tag.std_key {
            Some(StandardTagKey::TrackTitle) => &mut info.title,
            Some(StandardTagKey::Artist) => &mut info.artist,
            Some(StandardTagKey::Album) => &mut info.album,
            _ => continue,
        };
        let value = tag.value.to_string();
        if !value.trim().is_empty() {
            *slot = Some(value.trim().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::tests::wav_bytes;
    use crate::error::AnalysisError;

    #[test]
    fn raw_info_comes_from_byte_length() {
        let input = InputConfig {
            format: InputFormat::Raw,
            raw_sample_rate: 8000,
            raw_channels: 2,
        };
        let bytes: Arc<[u8]> = vec![0u8; 8000 * 4].into();
        let info = extract_track_info(&bytes, &input).unwrap();
        assert_eq!(info.sample_rate, 8000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.duration, Some(Duration::from_secs(1)));
        assert_eq!(info.byte_len, 32_000);
    }

    #[test]
    fn wav_info_is_probed() {
        let bytes: Arc<[u8]> = wav_bytes(&vec![0i16; 44_100], 1, 44_100).into();
        let info = extract_track_info(&bytes, &InputConfig::default()).unwrap();
        assert_eq!(info.sample_rate, 44_100);
        assert_eq!(info.channels, 1);
        assert_eq!(info.duration, Some(Duration::from_secs(1)));
        assert_eq!(info.title, None);
    }

    #[test]
    fn unknown_container_fails() {
        let bytes: Arc<[u8]> = vec![1u8; 100].into();
        let err = extract_track_info(&bytes, &InputConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::LoadFailed(_)));
    }
}
