//! Audio backend capability.
//!
//! `AudioBackend` is the seam between the mixer and the operating system. The
//! WASAPI implementation lives in [`crate::audio::enumerator`]; tests use an
//! in-memory mock.

use super::device::{
    AudioError, AudioEvent, DeviceRole, Direction, EndpointInfo, SessionState, VolumeState,
};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

/// Messages delivered to the reconciler loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Event(AudioEvent),
    Stop,
}

/// Sending half of the bounded event channel.
///
/// Cloned into every native callback. Posting never blocks: when the channel
/// is full the event is dropped with a warning.
#[derive(Clone)]
pub struct EventSink {
    tx: SyncSender<Envelope>,
}

impl EventSink {
    /// Create a sink and the receiver the reconciler drains.
    pub fn channel(capacity: usize) -> (Self, Receiver<Envelope>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (Self { tx }, rx)
    }

    /// Post an event. Returns false if it was dropped.
    pub fn post(&self, event: AudioEvent) -> bool {
        match self.tx.try_send(Envelope::Event(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(Envelope::Event(event))) => {
                tracing::warn!("Event queue full, dropping {:?}", event);
                false
            }
            Err(_) => false,
        }
    }

    /// Ask the reconciler loop to exit after draining what is queued.
    pub(crate) fn stop(&self) {
        // Blocking here is fine: only the owner of the loop calls this.
        let _ = self.tx.send(Envelope::Stop);
    }
}

/// A live native callback registration. Unregisters when dropped.
pub struct Subscription {
    label: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(label: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Unregister now. Equivalent to dropping the handle.
    pub fn unregister(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            tracing::trace!("Unregistering {}", self.label);
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("label", &self.label).finish()
    }
}

/// Handle to one application audio session.
///
/// Handles are not cached: every `AudioBackend::sessions` call returns fresh
/// ones.
pub trait SessionControl: Send {
    /// Executable file name of the owning process (e.g. "chrome.exe").
    fn process_name(&self) -> &str;

    /// Identifier unique to this session instance.
    fn instance_id(&self) -> &str;

    fn process_id(&self) -> u32;

    fn volume(&self) -> Result<f32, AudioError>;
    fn set_volume(&self, volume: f32) -> Result<(), AudioError>;
    fn muted(&self) -> Result<bool, AudioError>;
    fn set_muted(&self, muted: bool) -> Result<(), AudioError>;
    fn state(&self) -> Result<SessionState, AudioError>;

    /// Current volume and mute together.
    fn volume_state(&self) -> Result<VolumeState, AudioError> {
        Ok(VolumeState::new(self.volume()?, self.muted()?))
    }

    /// Register for volume, mute and state changes of this session.
    fn watch(&self, sink: EventSink) -> Result<Subscription, AudioError>;
}

/// Operating-system audio capability used by the mixer.
pub trait AudioBackend: Send + Sync {
    /// Active endpoints for one direction, in OS order.
    fn endpoints(&self, direction: Direction) -> Result<Vec<EndpointInfo>, AudioError>;

    /// Current default endpoint id, `None` when the role has no device.
    fn default_endpoint(
        &self,
        direction: Direction,
        role: DeviceRole,
    ) -> Result<Option<String>, AudioError>;

    fn endpoint_volume(&self, device_id: &str) -> Result<VolumeState, AudioError>;
    fn set_endpoint_volume(&self, device_id: &str, volume: f32) -> Result<(), AudioError>;
    fn set_endpoint_mute(&self, device_id: &str, muted: bool) -> Result<(), AudioError>;
    fn set_default_endpoint(&self, device_id: &str, role: DeviceRole) -> Result<(), AudioError>;

    /// Every live session on the default output device whose owning
    /// process could be named. Expired sessions are left out.
    fn sessions(&self) -> Result<Vec<Box<dyn SessionControl>>, AudioError>;

    /// Route the processes owning sessions of `process_name` to `device_id`
    /// for `direction`. `None` hands them back to the system default.
    fn set_app_endpoint(
        &self,
        process_name: &str,
        direction: Direction,
        device_id: Option<&str>,
    ) -> Result<(), AudioError>;

    /// Register for volume/mute changes on one endpoint.
    fn watch_endpoint(&self, device_id: &str, sink: EventSink)
        -> Result<Subscription, AudioError>;

    /// Register for device added/removed/state/default changes.
    fn watch_topology(&self, sink: EventSink) -> Result<Subscription, AudioError>;

    /// Register for new sessions on the default output device.
    fn watch_session_creation(&self, sink: EventSink) -> Result<Subscription, AudioError>;

    /// Install a foreground-window hook. `on_change` receives the full
    /// executable path of each newly focused window's process.
    fn watch_foreground(
        &self,
        on_change: Box<dyn Fn(String) + Send>,
    ) -> Result<Subscription, AudioError>;

    /// Full executable path of the current foreground process.
    fn foreground_executable(&self) -> Option<String>;
}

/// File name portion of an executable path, accepting either separator.
pub fn executable_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

// ============================================================================
// Tests
// ============================================================================
