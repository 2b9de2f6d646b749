//! Remote audio meter.
//!
//! Exposes a continuously updated loudness value for whatever remote audio
//! stream is flowing, by tapping the connection constructor shared by every
//! transport:
//!
//! - [`AudioTapRegistry`] wraps the [`ConnectionHost`](crate::core::transport::ConnectionHost)
//!   factory once and restores it when the last registration goes away.
//! - [`RemoteAudioMeter`] registers with the registry, builds an analysis
//!   graph for each new remote stream, and polls it on a fixed interval.
//!
//! Readings are the RMS of the analyser's time-domain samples blended into the
//! previous value with a 55/45 exponential moving average.

mod analysis;
#[allow(clippy::module_inception)]
mod meter;
mod registry;

pub use analysis::{
    AudioAnalyser, AudioBackend, AudioContext, FFT_SIZE, MeterError, MeterResult,
    SMOOTHING_CURRENT, SMOOTHING_PREVIOUS, SoftwareAudioBackend, rms_from_bytes, smooth,
};
pub use meter::{DEFAULT_POLL_INTERVAL, RemoteAudioMeter};
pub use registry::{AudioTapRegistry, StreamListener, TapHandle};
