//! Remote audio meter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::analysis::{
    AudioBackend, AudioContext, FFT_SIZE, MeterError, MeterResult, rms_from_bytes, smooth,
};
use super::registry::{AudioTapRegistry, TapHandle};
use crate::core::transport::RemoteAudioStream;

/// Default analyser polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Analysis graph of the stream currently tracked.
struct AnalysisGraph {
    stream_id: String,
    context: Arc<dyn AudioContext>,
    poller: JoinHandle<()>,
}

impl AnalysisGraph {
    fn teardown(self) {
        self.poller.abort();
        self.context.close();
        tracing::debug!("Tore down analysis graph for stream {}", self.stream_id);
    }
}

struct MeterInner {
    backend: Arc<dyn AudioBackend>,
    poll_interval: Duration,
    runtime: Handle,
    volume: Arc<watch::Sender<f32>>,
    graph: Mutex<Option<AnalysisGraph>>,
    mounted: AtomicBool,
}

impl MeterInner {
    fn attach(&self, stream: RemoteAudioStream) {
        if !self.mounted.load(Ordering::SeqCst) {
            return;
        }

        let mut graph = self.graph.lock();
        if graph
            .as_ref()
            .is_some_and(|current| current.stream_id == stream.id())
        {
            return;
        }
        if let Some(previous) = graph.take() {
            previous.teardown();
        }

        match self.build(&stream) {
            Ok(built) => {
                tracing::debug!("Built analysis graph for stream {}", built.stream_id);
                *graph = Some(built);
            }
            Err(e) => tracing::warn!("Cannot meter stream {}: {}", stream.id(), e),
        }
    }

    fn build(&self, stream: &RemoteAudioStream) -> MeterResult<AnalysisGraph> {
        let context = self.backend.create_context()?;
        let analyser = match context.create_analyser(stream, FFT_SIZE) {
            Ok(analyser) => analyser,
            Err(e) => {
                context.close();
                return Err(e);
            }
        };

        let volume = self.volume.clone();
        let interval = self.poll_interval;
        let poller = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut data = vec![0u8; analyser.frequency_bin_count()];
            loop {
                ticker.tick().await;
                analyser.get_byte_time_domain_data(&mut data);
                let rms = rms_from_bytes(&data);
                volume.send_modify(|current| *current = smooth(*current, rms));
            }
        });

        Ok(AnalysisGraph {
            stream_id: stream.id().to_string(),
            context,
            poller,
        })
    }

    fn release_graph(&self) {
        if let Some(graph) = self.graph.lock().take() {
            graph.teardown();
        }
    }
}

/// Continuously updated loudness of the remote participant.
///
/// Mounting registers with the shared [`AudioTapRegistry`]; unmounting (or
/// dropping) releases the registration and this meter's own analysis graph
/// independently.
pub struct RemoteAudioMeter {
    inner: Arc<MeterInner>,
    tap: Mutex<Option<TapHandle>>,
}

impl RemoteAudioMeter {
    /// Mount a meter polling at [`DEFAULT_POLL_INTERVAL`].
    pub fn mount(
        registry: &Arc<AudioTapRegistry>,
        backend: Arc<dyn AudioBackend>,
    ) -> MeterResult<Self> {
        Self::mount_with_interval(registry, backend, DEFAULT_POLL_INTERVAL)
    }

    pub fn mount_with_interval(
        registry: &Arc<AudioTapRegistry>,
        backend: Arc<dyn AudioBackend>,
        poll_interval: Duration,
    ) -> MeterResult<Self> {
        let runtime = Handle::try_current().map_err(|_| MeterError::NoRuntime)?;
        let (volume, _) = watch::channel(0.0f32);

        let inner = Arc::new(MeterInner {
            backend,
            poll_interval,
            runtime,
            volume: Arc::new(volume),
            graph: Mutex::new(None),
            mounted: AtomicBool::new(true),
        });

        let weak: Weak<MeterInner> = Arc::downgrade(&inner);
        let tap = registry.register(Arc::new(move |stream| {
            if let Some(inner) = weak.upgrade() {
                inner.attach(stream);
            }
        }));

        Ok(Self {
            inner,
            tap: Mutex::new(Some(tap)),
        })
    }

    /// Smoothed RMS of the tracked stream, 0 when none.
    pub fn current_volume(&self) -> f32 {
        *self.inner.volume.borrow()
    }

    pub fn subscribe_volume(&self) -> watch::Receiver<f32> {
        self.inner.volume.subscribe()
    }

    /// ID of the stream currently analysed.
    pub fn tracked_stream(&self) -> Option<String> {
        self.inner
            .graph
            .lock()
            .as_ref()
            .map(|graph| graph.stream_id.clone())
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    /// Release the tap registration and the analysis graph. Idempotent.
    pub fn unmount(&self) {
        if !self.inner.mounted.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tap) = self.tap.lock().take() {
            tap.release();
        }
        self.inner.release_graph();
        self.inner.volume.send_replace(0.0);
    }
}

impl Drop for RemoteAudioMeter {
    fn drop(&mut self) {
        self.unmount();
    }
}
