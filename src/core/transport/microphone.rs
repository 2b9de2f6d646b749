//! Microphone acquisition and the capture-constraint patch.
//!
//! Transports acquire microphone audio through a [`MicrophoneHost`]. While a
//! session is connecting or connected, the controller wraps the host's
//! acquirer so every request gets echo cancellation, noise suppression and
//! auto gain control defaults merged in, without overriding values the caller
//! set explicitly.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::base::{TransportError, TransportResult};

/// Constraints of one audio capture request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioCaptureConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo_cancellation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_suppression: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_gain_control: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl AudioCaptureConstraints {
    /// Voice-call processing defaults.
    pub fn voice_defaults() -> Self {
        Self {
            echo_cancellation: Some(true),
            noise_suppression: Some(true),
            auto_gain_control: Some(true),
            ..Default::default()
        }
    }

    /// Fill every unset field from `defaults`. Set fields are kept.
    pub fn merged_with(mut self, defaults: &Self) -> Self {
        self.echo_cancellation = self.echo_cancellation.or(defaults.echo_cancellation);
        self.noise_suppression = self.noise_suppression.or(defaults.noise_suppression);
        self.auto_gain_control = self.auto_gain_control.or(defaults.auto_gain_control);
        self.sample_rate = self.sample_rate.or(defaults.sample_rate);
        self.channel_count = self.channel_count.or(defaults.channel_count);
        if self.device_id.is_none() {
            self.device_id = defaults.device_id.clone();
        }
        self
    }
}

/// A live microphone capture.
pub struct CaptureStream {
    pub id: String,
    /// Constraints the capture was opened with
    pub constraints: AudioCaptureConstraints,
    /// PCM16 little-endian frames
    pub frames: mpsc::Receiver<Bytes>,
}

/// Opens microphone captures.
#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    async fn acquire(&self, constraints: AudioCaptureConstraints)
    -> TransportResult<CaptureStream>;
}

/// Acquirer for hosts without a microphone.
#[derive(Debug, Default)]
pub struct NoMicrophone;

#[async_trait]
impl MediaAcquirer for NoMicrophone {
    async fn acquire(
        &self,
        _constraints: AudioCaptureConstraints,
    ) -> TransportResult<CaptureStream> {
        Err(TransportError::MediaAccess(
            "no microphone available".to_string(),
        ))
    }
}

/// Wrapper merging default constraints into every request.
struct ConstrainedAcquirer {
    inner: Arc<dyn MediaAcquirer>,
    defaults: AudioCaptureConstraints,
}

#[async_trait]
impl MediaAcquirer for ConstrainedAcquirer {
    async fn acquire(
        &self,
        constraints: AudioCaptureConstraints,
    ) -> TransportResult<CaptureStream> {
        self.inner
            .acquire(constraints.merged_with(&self.defaults))
            .await
    }
}

#[derive(Default)]
struct PatchState {
    ref_count: usize,
    original: Option<Arc<dyn MediaAcquirer>>,
}

/// Holder of the current microphone acquirer.
///
/// The capture-constraint patch is reference counted: the wrapper is installed
/// by the first [`CapturePatch`] and the original acquirer comes back only
/// when the last one is restored, whatever order sessions disconnect in.
pub struct MicrophoneHost {
    acquirer: RwLock<Arc<dyn MediaAcquirer>>,
    patch: Mutex<PatchState>,
}

impl MicrophoneHost {
    pub fn new(acquirer: Arc<dyn MediaAcquirer>) -> Self {
        Self {
            acquirer: RwLock::new(acquirer),
            patch: Mutex::new(PatchState::default()),
        }
    }

    /// A host whose acquisitions always fail.
    pub fn unavailable() -> Self {
        Self::new(Arc::new(NoMicrophone))
    }

    pub fn acquirer(&self) -> Arc<dyn MediaAcquirer> {
        self.acquirer.read().clone()
    }

    /// Install `acquirer` and return the one it replaced.
    pub fn replace_acquirer(&self, acquirer: Arc<dyn MediaAcquirer>) -> Arc<dyn MediaAcquirer> {
        std::mem::replace(&mut *self.acquirer.write(), acquirer)
    }

    /// Open a capture through the installed acquirer.
    pub async fn acquire(
        &self,
        constraints: AudioCaptureConstraints,
    ) -> TransportResult<CaptureStream> {
        let acquirer = self.acquirer();
        acquirer.acquire(constraints).await
    }

    /// Wrap the installed acquirer so `defaults` are merged into every request.
    ///
    /// Only the first outstanding patch installs a wrapper; later ones share
    /// it. The original acquirer is put back when every patch has been
    /// restored or dropped.
    pub fn install_constraint_patch(
        self: &Arc<Self>,
        defaults: AudioCaptureConstraints,
    ) -> CapturePatch {
        let mut state = self.patch.lock();

        if state.ref_count == 0 {
            let inner = self.acquirer();
            let wrapper: Arc<dyn MediaAcquirer> = Arc::new(ConstrainedAcquirer { inner, defaults });
            state.original = Some(self.replace_acquirer(wrapper));
            tracing::debug!("Installed microphone capture-constraint patch");
        }
        state.ref_count += 1;
        tracing::debug!("Capture patch acquired (refs={})", state.ref_count);

        CapturePatch {
            host: Some(self.clone()),
        }
    }

    fn release_patch(&self) {
        let mut state = self.patch.lock();
        state.ref_count = state.ref_count.saturating_sub(1);
        tracing::debug!("Capture patch released (refs={})", state.ref_count);

        if state.ref_count == 0
            && let Some(original) = state.original.take()
        {
            self.replace_acquirer(original);
            tracing::debug!("Restored original microphone acquirer");
        }
    }

    /// Number of outstanding capture patches.
    pub fn patch_count(&self) -> usize {
        self.patch.lock().ref_count
    }

    /// Whether the constraint wrapper is currently installed.
    pub fn is_patched(&self) -> bool {
        self.patch.lock().original.is_some()
    }
}

impl Default for MicrophoneHost {
    fn default() -> Self {
        Self::unavailable()
    }
}

/// One outstanding capture-constraint patch.
pub struct CapturePatch {
    host: Option<Arc<MicrophoneHost>>,
}

impl CapturePatch {
    /// Release this patch; the original acquirer returns with the last one.
    pub fn restore(mut self) {
        self.restore_inner();
    }

    fn restore_inner(&mut self) {
        if let Some(host) = self.host.take() {
            host.release_patch();
        }
    }
}

impl Drop for CapturePatch {
    fn drop(&mut self) {
        self.restore_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingAcquirer {
        seen: Mutex<Vec<AudioCaptureConstraints>>,
    }

    #[async_trait]
    impl MediaAcquirer for RecordingAcquirer {
        async fn acquire(
            &self,
            constraints: AudioCaptureConstraints,
        ) -> TransportResult<CaptureStream> {
            self.seen.lock().push(constraints.clone());
            let (_tx, frames) = mpsc::channel(1);
            Ok(CaptureStream {
                id: "mic".to_string(),
                constraints,
                frames,
            })
        }
    }

    #[test]
    fn test_merge_keeps_caller_values() {
        let requested = AudioCaptureConstraints {
            echo_cancellation: Some(false),
            sample_rate: Some(24000),
            ..Default::default()
        };
        let merged = requested.merged_with(&AudioCaptureConstraints::voice_defaults());
        assert_eq!(merged.echo_cancellation, Some(false));
        assert_eq!(merged.noise_suppression, Some(true));
        assert_eq!(merged.auto_gain_control, Some(true));
        assert_eq!(merged.sample_rate, Some(24000));
    }

    #[tokio::test]
    async fn test_patch_applies_and_restores() {
        let recorder = Arc::new(RecordingAcquirer::default());
        let original: Arc<dyn MediaAcquirer> = recorder.clone();
        let host = Arc::new(MicrophoneHost::new(original.clone()));

        let patch = host.install_constraint_patch(AudioCaptureConstraints::voice_defaults());
        assert!(!Arc::ptr_eq(&host.acquirer(), &original));

        let stream = host
            .acquire(AudioCaptureConstraints::default())
            .await
            .unwrap();
        assert_eq!(stream.constraints.noise_suppression, Some(true));

        patch.restore();
        assert!(Arc::ptr_eq(&host.acquirer(), &original));

        host.acquire(AudioCaptureConstraints::default())
            .await
            .unwrap();
        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].noise_suppression, None);
    }

    #[tokio::test]
    async fn test_patch_restores_on_drop() {
        let original: Arc<dyn MediaAcquirer> = Arc::new(NoMicrophone);
        let host = Arc::new(MicrophoneHost::new(original.clone()));
        {
            let _patch = host.install_constraint_patch(AudioCaptureConstraints::voice_defaults());
            assert!(!Arc::ptr_eq(&host.acquirer(), &original));
        }
        assert!(Arc::ptr_eq(&host.acquirer(), &original));

        let err = host
            .acquire(AudioCaptureConstraints::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::MediaAccess(_)));
    }

    #[tokio::test]
    async fn test_interleaved_patches_restore_original() {
        let recorder = Arc::new(RecordingAcquirer::default());
        let original: Arc<dyn MediaAcquirer> = recorder.clone();
        let host = Arc::new(MicrophoneHost::new(original.clone()));

        let first = host.install_constraint_patch(AudioCaptureConstraints::voice_defaults());
        let second = host.install_constraint_patch(AudioCaptureConstraints::voice_defaults());
        assert_eq!(host.patch_count(), 2);

        // Releasing the first keeps the wrapper for the second
        first.restore();
        assert!(host.is_patched());
        host.acquire(AudioCaptureConstraints::default())
            .await
            .unwrap();
        assert_eq!(recorder.seen.lock()[0].echo_cancellation, Some(true));

        second.restore();
        assert_eq!(host.patch_count(), 0);
        assert!(!host.is_patched());
        assert!(Arc::ptr_eq(&host.acquirer(), &original));
    }

    #[test]
    fn test_wrapper_is_not_stacked() {
        let original: Arc<dyn MediaAcquirer> = Arc::new(NoMicrophone);
        let host = Arc::new(MicrophoneHost::new(original.clone()));

        let first = host.install_constraint_patch(AudioCaptureConstraints::voice_defaults());
        let wrapper = host.acquirer();
        let second = host.install_constraint_patch(AudioCaptureConstraints::voice_defaults());
        assert!(Arc::ptr_eq(&host.acquirer(), &wrapper));

        drop(second);
        drop(first);
        assert!(Arc::ptr_eq(&host.acquirer(), &original));
    }
}
