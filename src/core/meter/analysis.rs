//! Analysis graph abstraction and loudness math.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::core::transport::{AudioSampleSource, RemoteAudioStream};

/// Analyser FFT size. Time-domain reads return half as many samples.
pub const FFT_SIZE: usize = 256;

/// Weight of the previous reading in the moving average.
pub const SMOOTHING_PREVIOUS: f32 = 0.55;

/// Weight of the new reading in the moving average.
pub const SMOOTHING_CURRENT: f32 = 0.45;

/// Errors building an analysis graph.
#[derive(Debug, Clone, Error)]
pub enum MeterError {
    #[error("Audio context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("Analyser creation failed: {0}")]
    AnalyserFailed(String),

    #[error("No async runtime available to poll the analyser")]
    NoRuntime,
}

pub type MeterResult<T> = Result<T, MeterError>;

// =============================================================================
// Graph Traits
// =============================================================================

/// Analyser node fed by one remote stream.
pub trait AudioAnalyser: Send + Sync {
    fn fft_size(&self) -> usize;

    /// Number of samples a time-domain read fills.
    fn frequency_bin_count(&self) -> usize {
        self.fft_size() / 2
    }

    /// Fill `out` with unsigned 8-bit time-domain samples, 128 being silence.
    fn get_byte_time_domain_data(&self, out: &mut [u8]);
}

/// Audio processing context owning analyser nodes.
pub trait AudioContext: Send + Sync {
    /// Connect `stream` to a new analyser node.
    fn create_analyser(
        &self,
        stream: &RemoteAudioStream,
        fft_size: usize,
    ) -> MeterResult<Arc<dyn AudioAnalyser>>;

    /// Release the context and every node in it.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Creates audio contexts.
pub trait AudioBackend: Send + Sync {
    fn create_context(&self) -> MeterResult<Arc<dyn AudioContext>>;
}

// =============================================================================
// Math
// =============================================================================

/// RMS of unsigned 8-bit time-domain samples, each normalized to [-1, 1].
pub fn rms_from_bytes(data: &[u8]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let sum: f32 = data
        .iter()
        .map(|b| {
            let v = (*b as f32 - 128.0) / 128.0;
            v * v
        })
        .sum();
    (sum / data.len() as f32).sqrt()
}

/// Blend a new RMS reading into the previous smoothed value.
#[inline]
pub fn smooth(previous: f32, rms: f32) -> f32 {
    previous * SMOOTHING_PREVIOUS + rms * SMOOTHING_CURRENT
}

fn to_byte(sample: f32) -> u8 {
    (sample.clamp(-1.0, 1.0) * 128.0 + 128.0)
        .round()
        .clamp(0.0, 255.0) as u8
}

// =============================================================================
// Software Backend
// =============================================================================

/// Backend reading samples straight from the stream's sample source.
#[derive(Debug, Default)]
pub struct SoftwareAudioBackend;

impl AudioBackend for SoftwareAudioBackend {
    fn create_context(&self) -> MeterResult<Arc<dyn AudioContext>> {
        Ok(Arc::new(SoftwareAudioContext::default()))
    }
}

#[derive(Default)]
struct SoftwareAudioContext {
    closed: Arc<AtomicBool>,
}

impl AudioContext for SoftwareAudioContext {
    fn create_analyser(
        &self,
        stream: &RemoteAudioStream,
        fft_size: usize,
    ) -> MeterResult<Arc<dyn AudioAnalyser>> {
        if self.is_closed() {
            return Err(MeterError::AnalyserFailed("context is closed".to_string()));
        }
        if fft_size < 2 || !fft_size.is_power_of_two() {
            return Err(MeterError::AnalyserFailed(format!(
                "fft size {} is not a power of two",
                fft_size
            )));
        }
        Ok(Arc::new(SoftwareAnalyser {
            source: stream.source(),
            fft_size,
            scratch: Mutex::new(vec![0.0; fft_size / 2]),
            closed: self.closed.clone(),
        }))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct SoftwareAnalyser {
    source: Arc<dyn AudioSampleSource>,
    fft_size: usize,
    scratch: Mutex<Vec<f32>>,
    closed: Arc<AtomicBool>,
}

impl AudioAnalyser for SoftwareAnalyser {
    fn fft_size(&self) -> usize {
        self.fft_size
    }

    fn get_byte_time_domain_data(&self, out: &mut [u8]) {
        if self.closed.load(Ordering::SeqCst) {
            out.fill(128);
            return;
        }
        let mut scratch = self.scratch.lock();
        scratch.resize(out.len(), 0.0);
        self.source.read_latest(&mut scratch);
        for (byte, sample) in out.iter_mut().zip(scratch.iter()) {
            *byte = to_byte(*sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::PcmSampleBuffer;

    #[test]
    fn test_rms_of_silence_and_full_scale() {
        assert_eq!(rms_from_bytes(&[128; 128]), 0.0);
        assert_eq!(rms_from_bytes(&[]), 0.0);
        assert_eq!(rms_from_bytes(&[0; 128]), 1.0);

        let half: Vec<u8> = (0..128).map(|i| if i % 2 == 0 { 64 } else { 192 }).collect();
        assert!((rms_from_bytes(&half) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rms_stays_bounded() {
        for b in [0u8, 1, 127, 128, 200, 255] {
            let rms = rms_from_bytes(&[b; 16]);
            assert!((0.0..=1.0).contains(&rms));
        }
    }

    #[test]
    fn test_smoothing_weights() {
        assert!((smooth(0.0, 1.0) - 0.45).abs() < 1e-6);
        assert!((smooth(1.0, 0.0) - 0.55).abs() < 1e-6);

        let mut v = 1.0;
        for _ in 0..10 {
            v = smooth(v, 0.0);
        }
        assert!(v < 0.01);
    }

    #[test]
    fn test_software_analyser_reads_stream() {
        let buffer = Arc::new(PcmSampleBuffer::new());
        buffer.push_pcm16(&[16384; 128]);
        let stream = RemoteAudioStream::new("s1", buffer.clone() as Arc<dyn AudioSampleSource>);

        let context = SoftwareAudioBackend.create_context().unwrap();
        let analyser = context.create_analyser(&stream, FFT_SIZE).unwrap();
        assert_eq!(analyser.frequency_bin_count(), 128);

        let mut data = vec![0u8; analyser.frequency_bin_count()];
        analyser.get_byte_time_domain_data(&mut data);
        assert!(data.iter().all(|b| *b == 192));

        context.close();
        analyser.get_byte_time_domain_data(&mut data);
        assert!(data.iter().all(|b| *b == 128));
        assert!(context.create_analyser(&stream, FFT_SIZE).is_err());
    }
}
