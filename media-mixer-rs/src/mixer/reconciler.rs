//! Notification reconciler.
//!
//! Native callbacks post `AudioEvent`s into a bounded channel; a single loop
//! thread drains it and applies each event to the registry, the session
//! mirror and the outward state. Nothing here runs on an OS callback thread.

use super::focus::ForegroundTracker;
use super::publisher::StatePublisher;
use super::registry::EndpointRegistry;
use super::sessions::SessionTracker;
use super::subscriptions::{Refresher, SubscriptionManager};
use crate::audio::{
    mute_label, AudioEvent, DeviceRole, DeviceState, Direction, Envelope, SessionState,
    VolumeState,
};
use crate::schema::{self, DEFAULT_DEVICE, MASTER_VOLUME, UNKNOWN_DEVICE};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Receiver of decoded audio notifications.
pub trait NotificationHandler: Send + Sync {
    fn on_endpoint_volume(&self, device_id: &str, state: VolumeState);
    fn on_default_device(&self, direction: Direction, role: DeviceRole, device_id: Option<&str>);
    fn on_device_added(&self, device_id: &str);
    fn on_device_removed(&self, device_id: &str);
    fn on_device_state(&self, device_id: &str, state: DeviceState);
    fn on_session_created(&self, process_name: &str);
    fn on_session_volume(&self, process_name: &str, state: VolumeState);
    fn on_session_state(&self, process_name: &str, state: SessionState);
}

/// Route one event to the matching handler method.
pub fn dispatch(handler: &dyn NotificationHandler, event: AudioEvent) {
    match event {
        AudioEvent::EndpointVolumeChanged { device_id, state } => {
            handler.on_endpoint_volume(&device_id, state)
        }
        AudioEvent::DefaultDeviceChanged {
            direction,
            role,
            device_id,
        } => handler.on_default_device(direction, role, device_id.as_deref()),
        AudioEvent::DeviceAdded { device_id } => handler.on_device_added(&device_id),
        AudioEvent::DeviceRemoved { device_id } => handler.on_device_removed(&device_id),
        AudioEvent::DeviceStateChanged {
            device_id,
            new_state,
        } => handler.on_device_state(&device_id, new_state),
        AudioEvent::SessionCreated { process_name } => handler.on_session_created(&process_name),
        AudioEvent::SessionVolumeChanged {
            process_name,
            state,
        } => handler.on_session_volume(&process_name, state),
        AudioEvent::SessionStateChanged {
            process_name,
            state,
        } => handler.on_session_state(&process_name, state),
    }
}

/// Spawn the loop that drains `events` until a `Stop` arrives or every
/// sender is gone.
pub fn spawn_loop(
    handler: Arc<dyn NotificationHandler>,
    events: Receiver<Envelope>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("reconciler".to_string())
        .spawn(move || {
            tracing::debug!("Reconciler started");
            for envelope in events {
                match envelope {
                    Envelope::Event(event) => {
                        tracing::trace!("{:?}", event);
                        dispatch(handler.as_ref(), event);
                    }
                    Envelope::Stop => break,
                }
            }
            tracing::debug!("Reconciler stopped");
        })
}

/// Applies audio notifications to the mixer state.
pub struct Reconciler {
    registry: Arc<EndpointRegistry>,
    sessions: Arc<SessionTracker>,
    publisher: Arc<StatePublisher>,
    subscriptions: Arc<SubscriptionManager>,
    refresher: Arc<Refresher>,
    focus: Arc<ForegroundTracker>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        sessions: Arc<SessionTracker>,
        publisher: Arc<StatePublisher>,
        subscriptions: Arc<SubscriptionManager>,
        refresher: Arc<Refresher>,
        focus: Arc<ForegroundTracker>,
    ) -> Self {
        Self {
            registry,
            sessions,
            publisher,
            subscriptions,
            refresher,
            focus,
        }
    }
}

impl NotificationHandler for Reconciler {
    fn on_endpoint_volume(&self, device_id: &str, state: VolumeState) {
        let percent = state.percent();
        let value = percent.to_string();
        let muted = mute_label(state.muted);
        let info = self.registry.describe(device_id);

        if let Some(info) = &info {
            self.publisher
                .update_state(&schema::device_volume_state(info.direction, &info.name), &value);
            self.publisher
                .update_state(&schema::device_mute_state(info.direction, &info.name), muted);
        }

        for direction in self.registry.defaults().default_directions(device_id) {
            let (volume_state, mute_state) = schema::master_states(direction);
            self.publisher.update_state(volume_state, &value);
            self.publisher.update_state(mute_state, muted);
            self.publisher
                .publish_slider(&schema::device_slider_key(direction, DEFAULT_DEVICE), percent);
            if direction == Direction::Output {
                self.publisher
                    .publish_slider(&schema::app_slider_key(MASTER_VOLUME), percent);
            }
        }

        match info {
            Some(info) => {
                let key = schema::device_slider_key(info.direction, &info.name);
                self.publisher.publish_slider(&key, percent);
            }
            None => tracing::debug!("Volume change on unknown device {}", device_id),
        }
    }

    fn on_default_device(&self, direction: Direction, role: DeviceRole, device_id: Option<&str>) {
        self.registry
            .set_default(direction, role, device_id.map(str::to_string));

        let name = device_id
            .and_then(|id| self.registry.friendly_name(id))
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
        tracing::info!("Default {} device ({:?}) is now {}", direction, role, name);
        self.publisher.update_state(
            schema::default_device_state(direction, role.is_communications()),
            &name,
        );

        self.refresher.request();
    }

    fn on_device_added(&self, device_id: &str) {
        tracing::info!("Audio device added: {}", device_id);
    }

    fn on_device_removed(&self, device_id: &str) {
        tracing::info!("Audio device removed: {}", device_id);
    }

    fn on_device_state(&self, device_id: &str, state: DeviceState) {
        tracing::info!("Audio device {} is now {:?}", device_id, state);
        self.refresher.request();
    }

    fn on_session_created(&self, process_name: &str) {
        if self.publisher.is_ignored(process_name) {
            tracing::debug!("Ignoring new session of {}", process_name);
            return;
        }
        tracing::debug!("New audio session: {}", process_name);
        if let Err(e) = self.subscriptions.watch_session(process_name) {
            tracing::warn!("Failed to watch new session of {}: {}", process_name, e);
        }
    }

    fn on_session_volume(&self, process_name: &str, state: VolumeState) {
        if self.publisher.is_ignored(process_name) {
            return;
        }
        self.sessions.record(process_name, state);
        if !self.publisher.ensure_tracked(process_name) {
            return;
        }

        self.publisher.publish_app(process_name, state);
        self.publisher
            .publish_slider(&schema::app_slider_key(process_name), state.percent());
        if self.focus.is_current(process_name) {
            self.focus.publish_current(state);
        }
    }

    fn on_session_state(&self, process_name: &str, state: SessionState) {
        match state {
            SessionState::Expired => {
                // Other sessions of the same process keep the app alive.
                match self.subscriptions.watch_session(process_name) {
                    Ok(0) => {}
                    Ok(remaining) => {
                        tracing::debug!(
                            "Session of {} expired, {} still running",
                            process_name,
                            remaining
                        );
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to list sessions of {}: {}", process_name, e);
                        self.refresher.request();
                        return;
                    }
                }
                self.sessions.forget(process_name);
                if self.publisher.remove_tracked(process_name) {
                    tracing::debug!("Last session of {} expired", process_name);
                }
            }
            SessionState::Active | SessionState::Inactive => {
                self.sessions.set_state(process_name, state);
                if self.publisher.is_tracked(process_name) {
                    let active = if state == SessionState::Active { "True" } else { "False" };
                    self.publisher
                        .update_state(&schema::app_active_state(process_name), active);
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
