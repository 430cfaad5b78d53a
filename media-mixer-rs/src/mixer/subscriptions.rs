//! Native change-notification registrations.
//!
//! `SubscriptionManager` owns every live `Subscription`: one per active
//! endpoint, one per running session, the session-creation watcher and the
//! topology watcher. Re-registration drops the old handles before creating
//! new ones, so an endpoint never has more than one callback.

use super::publisher::StatePublisher;
use super::registry::EndpointRegistry;
use crate::audio::{
    AudioBackend, AudioError, AudioEvent, Direction, EventSink, SessionControl, Subscription,
};
use crate::schema::{self, UNKNOWN_DEVICE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::mem;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct SubscriptionManager {
    backend: Arc<dyn AudioBackend>,
    registry: Arc<EndpointRegistry>,
    publisher: Arc<StatePublisher>,
    sink: EventSink,
    /// Serializes `register_all`.
    register_lock: Mutex<()>,
    endpoints: Mutex<HashMap<String, Subscription>>,
    /// Lowercase process name -> session instance id -> watcher.
    sessions: Mutex<HashMap<String, HashMap<String, Subscription>>>,
    session_created: Mutex<Option<Subscription>>,
    topology: Mutex<Option<Subscription>>,
}

impl SubscriptionManager {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        registry: Arc<EndpointRegistry>,
        publisher: Arc<StatePublisher>,
        sink: EventSink,
    ) -> Self {
        Self {
            backend,
            registry,
            publisher,
            sink,
            register_lock: Mutex::new(()),
            endpoints: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            session_created: Mutex::new(None),
            topology: Mutex::new(None),
        }
    }

    /// Register the topology watcher, then everything else.
    pub fn start(&self) {
        {
            let mut topology = self.topology.lock();
            if topology.is_none() {
                match self.backend.watch_topology(self.sink.clone()) {
                    Ok(sub) => *topology = Some(sub),
                    Err(e) => tracing::warn!("Failed to watch device changes: {}", e),
                }
            }
        }
        self.register_all();
    }

    /// Rebuild every endpoint and session registration from scratch.
    pub fn register_all(&self) {
        let _serial = self.register_lock.lock();
        self.unregister_all();

        let endpoints = self.registry.refresh();
        self.publisher.sync_devices(&endpoints);
        self.publish_defaults();

        for info in &endpoints {
            match self.backend.watch_endpoint(&info.id, self.sink.clone()) {
                Ok(sub) => {
                    self.endpoints.lock().insert(info.id.clone(), sub);
                }
                Err(e) => {
                    tracing::warn!("Failed to watch {} ({}): {}", info.name, info.direction, e);
                    continue;
                }
            }
            match self.backend.endpoint_volume(&info.id) {
                Ok(state) => {
                    self.sink.post(AudioEvent::EndpointVolumeChanged {
                        device_id: info.id.clone(),
                        state,
                    });
                }
                Err(e) => tracing::debug!("No initial volume for {}: {}", info.name, e),
            }
        }
        tracing::info!("Watching {} audio devices", self.endpoint_count());

        self.register_sessions();
    }

    /// Drop every endpoint and session registration. Topology stays.
    pub fn unregister_all(&self) {
        let endpoints = mem::take(&mut *self.endpoints.lock());
        let sessions = mem::take(&mut *self.sessions.lock());
        let created = self.session_created.lock().take();
        if !endpoints.is_empty() || !sessions.is_empty() {
            tracing::debug!(
                "Unregistering {} endpoint and {} session watchers",
                endpoints.len(),
                sessions.values().map(HashMap::len).sum::<usize>()
            );
        }
        drop(endpoints);
        drop(sessions);
        drop(created);
    }

    /// Unregister everything, including the topology watcher.
    pub fn shutdown(&self) {
        let _serial = self.register_lock.lock();
        self.unregister_all();
        if let Some(topology) = self.topology.lock().take() {
            topology.unregister();
        }
    }

    /// Bring the watchers of `name` in line with its live sessions: new
    /// sessions are watched and get their snapshot posted, watchers of
    /// sessions that are gone are dropped.
    ///
    /// Returns the number of live sessions `name` still owns.
    pub fn watch_session(&self, name: &str) -> Result<usize, AudioError> {
        let _serial = self.register_lock.lock();
        let live: Vec<_> = self
            .backend
            .sessions()?
            .into_iter()
            .filter(|s| s.process_name().eq_ignore_ascii_case(name))
            .collect();

        let key = name.to_lowercase();
        let mut watched = self.sessions.lock().remove(&key).unwrap_or_default();
        watched.retain(|instance, _| live.iter().any(|s| s.instance_id() == instance));

        for session in &live {
            if watched.contains_key(session.instance_id()) {
                continue;
            }
            match session.watch(self.sink.clone()) {
                Ok(sub) => {
                    watched.insert(session.instance_id().to_string(), sub);
                }
                Err(e) => {
                    tracing::warn!("Failed to watch session {}: {}", name, e);
                    continue;
                }
            }
            self.post_snapshot(session.as_ref());
        }

        if !watched.is_empty() {
            self.sessions.lock().insert(key, watched);
        }
        Ok(live.len())
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().len()
    }

    pub fn is_watching(&self, device_id: &str) -> bool {
        self.endpoints.lock().contains_key(device_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().values().map(HashMap::len).sum()
    }

    fn register_sessions(&self) {
        match self.backend.watch_session_creation(self.sink.clone()) {
            Ok(sub) => *self.session_created.lock() = Some(sub),
            Err(e) => tracing::warn!("Failed to watch new audio sessions: {}", e),
        }

        let sessions = match self.backend.sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!("Failed to list audio sessions: {}", e);
                return;
            }
        };

        let mut watched: HashMap<String, HashMap<String, Subscription>> = HashMap::new();
        for session in &sessions {
            match session.watch(self.sink.clone()) {
                Ok(sub) => {
                    watched
                        .entry(session.process_name().to_lowercase())
                        .or_default()
                        .insert(session.instance_id().to_string(), sub);
                }
                Err(e) => {
                    tracing::warn!("Failed to watch session {}: {}", session.process_name(), e);
                    continue;
                }
            }
            self.post_snapshot(session.as_ref());
        }
        tracing::debug!("Watching {} audio sessions", sessions.len());
        *self.sessions.lock() = watched;
    }

    fn post_snapshot(&self, session: &dyn SessionControl) {
        let name = session.process_name().to_string();
        match session.volume_state() {
            Ok(state) => {
                self.sink.post(AudioEvent::SessionVolumeChanged {
                    process_name: name.clone(),
                    state,
                });
            }
            Err(e) => tracing::debug!("No initial volume for {}: {}", name, e),
        }
        if let Ok(state) = session.state() {
            self.sink.post(AudioEvent::SessionStateChanged {
                process_name: name,
                state,
            });
        }
    }

    /// Publish the friendly names of all four default slots.
    fn publish_defaults(&self) {
        let defaults = self.registry.defaults();
        for direction in Direction::ALL {
            for communications in [false, true] {
                let name = defaults
                    .get(direction, communications)
                    .and_then(|id| self.registry.friendly_name(id))
                    .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
                self.publisher
                    .update_state(schema::default_device_state(direction, communications), &name);
            }
        }
    }
}

/// Background re-registration.
///
/// Callers never wait for `register_all`; a burst of requests collapses
/// into a single pass.
pub struct Refresher {
    tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Refresher {
    pub fn spawn(manager: Arc<SubscriptionManager>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("refresher".to_string())
            .spawn(move || {
                while rx.recv().is_ok() {
                    // Coalesce whatever piled up while the last pass ran.
                    while rx.try_recv().is_ok() {}
                    tracing::debug!("Refreshing audio subscriptions");
                    manager.register_all();
                }
            })?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Ask for a `register_all` pass. Never blocks.
    pub fn request(&self) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(());
        }
    }

    /// Finish pending requests and join the thread. Idempotent.
    pub fn stop(&self) {
        drop(self.tx.lock().take());
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Refresher thread panicked");
            }
        }
    }
}

impl Drop for Refresher {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================
