//! Foreground application tracking.

use super::publisher::StatePublisher;
use super::sessions::SessionTracker;
use crate::audio::{
    executable_name, mute_label, AudioBackend, AudioError, Subscription, VolumeState,
};
use crate::schema::{self, states, CURRENT_APP};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

#[derive(Default)]
struct FocusState {
    path: String,
    last_volume: Option<u8>,
    last_muted: Option<bool>,
}

/// Follows the foreground window and mirrors its process's session onto the
/// "Current app" slider and states.
pub struct ForegroundTracker {
    backend: Arc<dyn AudioBackend>,
    sessions: Arc<SessionTracker>,
    publisher: Arc<StatePublisher>,
    state: Mutex<FocusState>,
    hook: Mutex<Option<Subscription>>,
}

impl ForegroundTracker {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        sessions: Arc<SessionTracker>,
        publisher: Arc<StatePublisher>,
    ) -> Self {
        Self {
            backend,
            sessions,
            publisher,
            state: Mutex::new(FocusState::default()),
            hook: Mutex::new(None),
        }
    }

    /// Install the focus hook. Does nothing if already running.
    pub fn start(self: &Arc<Self>) -> Result<(), AudioError> {
        let mut hook = self.hook.lock();
        if hook.is_some() {
            return Ok(());
        }

        let tracker: Weak<Self> = Arc::downgrade(self);
        let sub = self.backend.watch_foreground(Box::new(move |path| {
            if let Some(tracker) = tracker.upgrade() {
                tracker.on_focus(path);
            }
        }))?;
        *hook = Some(sub);
        drop(hook);

        if let Some(path) = self.backend.foreground_executable() {
            self.on_focus(path);
        }
        tracing::debug!("Foreground tracking started");
        Ok(())
    }

    /// Remove the hook and join its thread. Idempotent.
    pub fn stop(&self) {
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook.unregister();
            tracing::debug!("Foreground tracking stopped");
        }
    }

    /// Full path of the foreground executable, empty when unknown.
    pub fn current_path(&self) -> String {
        self.state.lock().path.clone()
    }

    /// Executable name of the foreground process.
    pub fn current_app(&self) -> Option<String> {
        let state = self.state.lock();
        let name = executable_name(&state.path);
        (!name.is_empty()).then(|| name.to_string())
    }

    pub fn is_current(&self, process_name: &str) -> bool {
        self.current_app()
            .is_some_and(|app| app.eq_ignore_ascii_case(process_name))
    }

    /// Handle a focus change reported by the hook.
    pub fn on_focus(&self, path: String) {
        let name = executable_name(&path).to_string();
        {
            let mut state = self.state.lock();
            if state.path == path {
                return;
            }
            state.path = path;
        }
        tracing::debug!("Foreground app: {}", name);
        self.publisher.update_state(states::FOCUSED_APP, &name);

        let volume = if name.is_empty() {
            None
        } else {
            self.sessions.volume_of(&name)
        };
        self.publish_current(volume.unwrap_or(VolumeState::new(0.0, false)));
    }

    /// Publish the foreground app's volume, skipping unchanged values.
    pub fn publish_current(&self, volume: VolumeState) {
        let percent = volume.percent();
        let (volume_changed, mute_changed) = {
            let mut state = self.state.lock();
            let volume_changed = state.last_volume.replace(percent) != Some(percent);
            let mute_changed = state.last_muted.replace(volume.muted) != Some(volume.muted);
            (volume_changed, mute_changed)
        };

        if volume_changed {
            self.publisher
                .publish_slider(&schema::app_slider_key(CURRENT_APP), percent);
            self.publisher
                .update_state(states::CURRENT_APP_VOLUME, &percent.to_string());
        }
        if mute_changed {
            self.publisher
                .update_state(states::CURRENT_APP_MUTE, mute_label(volume.muted));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
