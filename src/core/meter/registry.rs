//! Reference-counted tap on the connection constructor.
//!
//! The first registration wraps the host's connection factory so every
//! connection it creates reports its remote audio streams to the registry.
//! The wrapper is installed once no matter how many meters register, and the
//! original factory is put back only when the last registration is released.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::transport::{
    ConnectionHost, PeerConnection, PeerConnectionFactory, RemoteAudioStream,
};

/// Callback receiving every remote audio stream of every tapped connection.
pub type StreamListener = Arc<dyn Fn(RemoteAudioStream) + Send + Sync>;

type ListenerList = Mutex<Vec<(u64, StreamListener)>>;

#[derive(Default)]
struct TapState {
    ref_count: usize,
    original: Option<Arc<dyn PeerConnectionFactory>>,
    next_id: u64,
}

/// Shared service owning the connection-constructor patch.
pub struct AudioTapRegistry {
    host: Arc<ConnectionHost>,
    state: Mutex<TapState>,
    listeners: Arc<ListenerList>,
}

impl AudioTapRegistry {
    pub fn new(host: Arc<ConnectionHost>) -> Arc<Self> {
        Arc::new(Self {
            host,
            state: Mutex::new(TapState::default()),
            listeners: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn host(&self) -> &Arc<ConnectionHost> {
        &self.host
    }

    /// Register a stream listener, installing the tap if this is the first.
    pub fn register(self: &Arc<Self>, listener: StreamListener) -> TapHandle {
        let mut state = self.state.lock();

        if state.ref_count == 0 {
            let current = self.host.factory();
            let tapping: Arc<dyn PeerConnectionFactory> = Arc::new(TappingFactory {
                inner: current,
                listeners: Arc::downgrade(&self.listeners),
            });
            state.original = Some(self.host.replace_factory(tapping));
            tracing::info!("Installed remote audio tap on connection constructor");
        }

        state.ref_count += 1;
        state.next_id += 1;
        let id = state.next_id;
        self.listeners.lock().push((id, listener));
        tracing::debug!("Audio tap registered (refs={})", state.ref_count);

        TapHandle {
            registry: Some(self.clone()),
            id,
        }
    }

    fn unregister(&self, id: u64) {
        let mut state = self.state.lock();
        self.listeners.lock().retain(|(lid, _)| *lid != id);
        state.ref_count = state.ref_count.saturating_sub(1);
        tracing::debug!("Audio tap released (refs={})", state.ref_count);

        if state.ref_count == 0
            && let Some(original) = state.original.take()
        {
            self.host.replace_factory(original);
            tracing::info!("Restored original connection constructor");
        }
    }

    /// Number of live registrations.
    pub fn ref_count(&self) -> usize {
        self.state.lock().ref_count
    }

    /// Whether the tapping wrapper is currently installed.
    pub fn is_installed(&self) -> bool {
        self.state.lock().original.is_some()
    }
}

/// One registration. Releasing (or dropping) it decrements the count.
pub struct TapHandle {
    registry: Option<Arc<AudioTapRegistry>>,
    id: u64,
}

impl TapHandle {
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(registry) = self.registry.take() {
            registry.unregister(self.id);
        }
    }
}

impl Drop for TapHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Factory wrapper adding a track listener to every created connection.
struct TappingFactory {
    inner: Arc<dyn PeerConnectionFactory>,
    listeners: Weak<ListenerList>,
}

impl PeerConnectionFactory for TappingFactory {
    fn create(&self) -> Arc<dyn PeerConnection> {
        let connection = self.inner.create();
        let listeners = self.listeners.clone();
        connection.add_track_listener(Arc::new(move |stream: RemoteAudioStream| {
            let Some(listeners) = listeners.upgrade() else {
                return;
            };
            let snapshot: Vec<StreamListener> =
                listeners.lock().iter().map(|(_, l)| l.clone()).collect();
            for listener in snapshot {
                listener(stream.clone());
            }
        }));
        connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener(counter: &Arc<AtomicUsize>) -> StreamListener {
        let counter = counter.clone();
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_install_once_restore_at_zero() {
        let host = Arc::new(ConnectionHost::default());
        let original = host.factory();
        let registry = AudioTapRegistry::new(host.clone());
        let hits = Arc::new(AtomicUsize::new(0));

        let first = registry.register(counting_listener(&hits));
        let patched = host.factory();
        assert!(!Arc::ptr_eq(&patched, &original));

        let second = registry.register(counting_listener(&hits));
        assert!(Arc::ptr_eq(&host.factory(), &patched));
        assert_eq!(registry.ref_count(), 2);

        first.release();
        assert!(registry.is_installed());
        assert!(Arc::ptr_eq(&host.factory(), &patched));

        drop(second);
        assert!(!registry.is_installed());
        assert!(Arc::ptr_eq(&host.factory(), &original));
    }

    #[test]
    fn test_tapped_connections_report_streams() {
        let host = Arc::new(ConnectionHost::default());
        let registry = AudioTapRegistry::new(host.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let _a = registry.register(counting_listener(&hits));
        let _b = registry.register(counting_listener(&hits));

        let connection = host.create_connection();
        connection.ingest_remote_pcm16(&[1, 2, 3]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reinstall_after_full_release() {
        let host = Arc::new(ConnectionHost::default());
        let original = host.factory();
        let registry = AudioTapRegistry::new(host.clone());

        registry.register(Arc::new(|_| {})).release();
        assert!(Arc::ptr_eq(&host.factory(), &original));

        let handle = registry.register(Arc::new(|_| {}));
        assert!(!Arc::ptr_eq(&host.factory(), &original));
        drop(handle);
        assert!(Arc::ptr_eq(&host.factory(), &original));
    }
}
