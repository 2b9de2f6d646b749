//! Media connections and the replaceable connection constructor.
//!
//! Every transport creates its media leg through a [`ConnectionHost`]. The host
//! holds the current [`PeerConnectionFactory`]; the audio meter swaps it for a
//! tapping wrapper so it can observe remote audio streams of connections it did
//! not create itself.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

/// Most recent samples kept per remote stream.
const REMOTE_BUFFER_SAMPLES: usize = 4096;

/// A stream with no audio pushed for this long reads as silence.
pub const REMOTE_STREAM_IDLE: Duration = Duration::from_millis(250);

// =============================================================================
// Remote Audio
// =============================================================================

/// Source of time-domain samples for a remote stream.
pub trait AudioSampleSource: Send + Sync {
    /// Fill `out` with the most recent samples, normalized to [-1, 1].
    ///
    /// Reads do not consume: any number of readers may share one source. When
    /// fewer samples are available the head of `out` is zero-filled, and an
    /// idle source reads as all zeros.
    fn read_latest(&self, out: &mut [f32]);
}

/// A remote audio stream delivered by a connection's `track` event.
#[derive(Clone)]
pub struct RemoteAudioStream {
    id: String,
    source: Arc<dyn AudioSampleSource>,
}

impl RemoteAudioStream {
    pub fn new(id: impl Into<String>, source: Arc<dyn AudioSampleSource>) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> Arc<dyn AudioSampleSource> {
        self.source.clone()
    }
}

impl std::fmt::Debug for RemoteAudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAudioStream")
            .field("id", &self.id)
            .finish()
    }
}

#[derive(Default)]
struct SampleRing {
    samples: VecDeque<f32>,
    last_push: Option<Instant>,
}

/// Ring buffer of the latest PCM received from the provider.
pub struct PcmSampleBuffer {
    ring: Mutex<SampleRing>,
    idle_after: Duration,
}

impl PcmSampleBuffer {
    pub fn new() -> Self {
        Self::with_idle_after(REMOTE_STREAM_IDLE)
    }

    pub fn with_idle_after(idle_after: Duration) -> Self {
        Self {
            ring: Mutex::new(SampleRing::default()),
            idle_after,
        }
    }

    /// Append signed 16-bit samples.
    pub fn push_pcm16(&self, pcm: &[i16]) {
        let mut ring = self.ring.lock();
        ring.samples
            .extend(pcm.iter().map(|s| *s as f32 / 32768.0));
        let excess = ring.samples.len().saturating_sub(REMOTE_BUFFER_SAMPLES);
        ring.samples.drain(..excess);
        ring.last_push = Some(Instant::now());
    }

    /// Whether audio arrived within the idle window.
    pub fn is_active(&self) -> bool {
        self.ring
            .lock()
            .last_push
            .is_some_and(|at| at.elapsed() <= self.idle_after)
    }
}

impl Default for PcmSampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSampleSource for PcmSampleBuffer {
    fn read_latest(&self, out: &mut [f32]) {
        let ring = self.ring.lock();
        let active = ring
            .last_push
            .is_some_and(|at| at.elapsed() <= self.idle_after);
        if !active {
            out.fill(0.0);
            return;
        }

        let take = ring.samples.len().min(out.len());
        let skip = ring.samples.len() - take;
        let pad = out.len() - take;

        out[..pad].fill(0.0);
        for (slot, sample) in out[pad..].iter_mut().zip(ring.samples.iter().skip(skip)) {
            *slot = *sample;
        }
    }
}

// =============================================================================
// Connections
// =============================================================================

/// Listener for the `track` event of a connection.
pub type TrackListener = Arc<dyn Fn(RemoteAudioStream) + Send + Sync>;

/// Media leg of a transport.
pub trait PeerConnection: Send + Sync {
    fn id(&self) -> &str;

    /// Register a listener invoked for every new remote audio stream.
    fn add_track_listener(&self, listener: TrackListener);

    /// Feed remote PCM16 audio received by the transport.
    fn ingest_remote_pcm16(&self, pcm: &[i16]);

    /// Release the connection. Listeners are dropped.
    fn close(&self);
}

/// Constructor of media connections.
pub trait PeerConnectionFactory: Send + Sync {
    fn create(&self) -> Arc<dyn PeerConnection>;
}

/// Default media connection: one remote stream, created on first audio.
pub struct MediaConnection {
    id: String,
    listeners: Mutex<Vec<TrackListener>>,
    remote: Mutex<Option<Arc<PcmSampleBuffer>>>,
    closed: AtomicBool,
}

impl MediaConnection {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            listeners: Mutex::new(Vec::new()),
            remote: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for MediaConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerConnection for MediaConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn add_track_listener(&self, listener: TrackListener) {
        self.listeners.lock().push(listener);
    }

    fn ingest_remote_pcm16(&self, pcm: &[i16]) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let (buffer, is_new) = {
            let mut remote = self.remote.lock();
            match remote.as_ref() {
                Some(buffer) => (buffer.clone(), false),
                None => {
                    let buffer = Arc::new(PcmSampleBuffer::new());
                    *remote = Some(buffer.clone());
                    (buffer, true)
                }
            }
        };
        buffer.push_pcm16(pcm);

        if is_new {
            let stream = RemoteAudioStream::new(
                format!("{}-remote", self.id),
                buffer as Arc<dyn AudioSampleSource>,
            );
            tracing::debug!("Remote audio stream {} started", stream.id());
            let listeners: Vec<TrackListener> = self.listeners.lock().clone();
            for listener in listeners {
                listener(stream.clone());
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.listeners.lock().clear();
        self.remote.lock().take();
    }
}

/// Factory for [`MediaConnection`].
#[derive(Debug, Default)]
pub struct MediaConnectionFactory;

impl PeerConnectionFactory for MediaConnectionFactory {
    fn create(&self) -> Arc<dyn PeerConnection> {
        Arc::new(MediaConnection::new())
    }
}

// =============================================================================
// Host
// =============================================================================

/// Holder of the current connection constructor.
///
/// Shared by every transport and meter of a process (or of a test).
pub struct ConnectionHost {
    factory: RwLock<Arc<dyn PeerConnectionFactory>>,
}

impl ConnectionHost {
    pub fn new(factory: Arc<dyn PeerConnectionFactory>) -> Self {
        Self {
            factory: RwLock::new(factory),
        }
    }

    /// The constructor currently installed.
    pub fn factory(&self) -> Arc<dyn PeerConnectionFactory> {
        self.factory.read().clone()
    }

    /// Install `factory` and return the one it replaced.
    pub fn replace_factory(
        &self,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> Arc<dyn PeerConnectionFactory> {
        std::mem::replace(&mut *self.factory.write(), factory)
    }

    /// Construct a connection through the installed constructor.
    pub fn create_connection(&self) -> Arc<dyn PeerConnection> {
        let factory = self.factory();
        factory.create()
    }
}

impl Default for ConnectionHost {
    fn default() -> Self {
        Self::new(Arc::new(MediaConnectionFactory))
    }
}
