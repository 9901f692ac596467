//! Error taxonomy shared by the analysis stages and the coordinator.

use std::fmt;

use thiserror::Error;

use crate::viz::VisualizationMode;

/// Pipeline stage that produced an error or a progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Waveform,
    Spectrum,
    Beats,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Waveform => "waveform",
            Stage::Spectrum => "spectrum",
            Stage::Beats => "beats",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Track too short for the requested analysis
    #[error("insufficient audio data: {0}")]
    InsufficientData(String),

    /// User- or reload-triggered abort
    #[error("cancelled")]
    Cancelled,

    #[error("{stage} analysis failed: {cause}")]
    AnalysisFailed { stage: Stage, cause: String },

    /// Another analysis run owns the pipeline
    #[error("analysis in progress: {0}")]
    Busy(String),

    #[error("{0} visualization unavailable: no audio data loaded")]
    VisualizationUnavailable(VisualizationMode),

    #[error("load failed: {0}")]
    LoadFailed(String),

    #[error("invalid analysis parameters: {0}")]
    InvalidParameters(String),
}

impl AnalysisError {
    /// Wraps a stage error as `AnalysisFailed`, leaving cancellation untouched.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            AnalysisError::Cancelled => AnalysisError::Cancelled,
            err @ AnalysisError::AnalysisFailed { .. } => err,
            other => AnalysisError::AnalysisFailed {
                stage,
                cause: other.to_string(),
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AnalysisError::Cancelled)
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_stage_wraps_but_keeps_cancellation() {
        let err = AnalysisError::InsufficientData("3 frames".into()).in_stage(Stage::Spectrum);
        assert_eq!(
            err,
            AnalysisError::AnalysisFailed {
                stage: Stage::Spectrum,
                cause: "insufficient audio data: 3 frames".into(),
            }
        );
        assert!(AnalysisError::Cancelled.in_stage(Stage::Beats).is_cancelled());
    }

    #[test]
    fn messages_name_the_stage() {
        let err = AnalysisError::AnalysisFailed {
            stage: Stage::Beats,
            cause: "spectrogram missing".into(),
        };
        assert_eq!(err.to_string(), "beats analysis failed: spectrogram missing");
    }
}
