//! Audio analysis for on-demand visualizations.
//!
//! A [`coordinator::Coordinator`] loads a track from a file or URL, then turns
//! it into mono samples, a magnitude spectrogram and a beat/tempo estimate as
//! visualizations ask for them. Stages run on a shared worker pool, can be
//! cancelled at any time and report weighted progress through a polled status.

pub mod audio;
pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod pool;
pub mod source;
pub mod viz;
