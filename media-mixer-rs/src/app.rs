//! Application wiring and panel event dispatch.
//!
//! `MixerApp` owns every mixer component and the threads behind them, and
//! turns inbound Touch Portal messages into audio operations.

use crate::audio::{
    AudioBackend, AudioError, Adjustment, DeviceRole, Direction, EventSink, MuteAction,
};
use crate::config::PluginSettings;
use crate::mixer::reconciler::{self, NotificationHandler};
use crate::mixer::{
    EndpointRegistry, ForegroundTracker, Reconciler, Refresher, Remote, SessionTracker,
    StatePublisher, SubscriptionManager,
};
use crate::schema::{actions, connectors, CURRENT_APP, DEFAULT_DEVICE, MASTER_VOLUME};
use anyhow::Context;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tp_client::{DataField, Inbound, SettingsList};

/// Capacity of the queue between native callbacks and the reconciler.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Interval between repeats while a volume button is held.
pub const REPEAT_INTERVAL: Duration = Duration::from_millis(50);

/// Main application state.
pub struct MixerApp {
    backend: Arc<dyn AudioBackend>,
    remote: Arc<dyn Remote>,
    registry: Arc<EndpointRegistry>,
    sessions: Arc<SessionTracker>,
    publisher: Arc<StatePublisher>,
    subscriptions: Arc<SubscriptionManager>,
    refresher: Arc<Refresher>,
    focus: Arc<ForegroundTracker>,
    sink: EventSink,
    reconciler: Mutex<Option<JoinHandle<()>>>,
    repeaters: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopping: AtomicBool,
}

impl MixerApp {
    /// Build every component and start the reconciler and refresher threads.
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        remote: Arc<dyn Remote>,
    ) -> anyhow::Result<Arc<Self>> {
        let (sink, events) = EventSink::channel(EVENT_QUEUE_CAPACITY);

        let registry = Arc::new(EndpointRegistry::new(backend.clone()));
        let sessions = Arc::new(SessionTracker::new(backend.clone()));
        let publisher = Arc::new(StatePublisher::new(remote.clone()));
        let subscriptions = Arc::new(SubscriptionManager::new(
            backend.clone(),
            registry.clone(),
            publisher.clone(),
            sink.clone(),
        ));
        let refresher = Arc::new(
            Refresher::spawn(subscriptions.clone()).context("Failed to start refresher thread")?,
        );
        let focus = Arc::new(ForegroundTracker::new(
            backend.clone(),
            sessions.clone(),
            publisher.clone(),
        ));

        let handler: Arc<dyn NotificationHandler> = Arc::new(Reconciler::new(
            registry.clone(),
            sessions.clone(),
            publisher.clone(),
            subscriptions.clone(),
            refresher.clone(),
            focus.clone(),
        ));
        let reconciler =
            reconciler::spawn_loop(handler, events).context("Failed to start reconciler thread")?;

        Ok(Arc::new(Self {
            backend,
            remote,
            registry,
            sessions,
            publisher,
            subscriptions,
            refresher,
            focus,
            sink,
            reconciler: Mutex::new(Some(reconciler)),
            repeaters: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }))
    }

    /// Register every native watcher and the focus hook. Runs once.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.subscriptions.start();
        if let Err(e) = self.focus.start() {
            tracing::warn!("Failed to start foreground tracking: {}", e);
        }
    }

    /// Handle one inbound message. Returns false when the panel asked the
    /// plugin to close.
    pub fn handle(self: &Arc<Self>, message: Inbound) -> bool {
        match message {
            Inbound::Info {
                tp_version_string,
                plugin_version,
                settings,
            } => {
                tracing::info!(
                    "Connected to Touch Portal {} (plugin v{})",
                    tp_version_string.as_deref().unwrap_or("?"),
                    plugin_version.unwrap_or_default()
                );
                self.apply_settings(&settings);
                self.start();
            }
            Inbound::Settings { values } => self.apply_settings(&values),
            Inbound::Action { action_id, data } => self.handle_action(&action_id, &data),
            Inbound::Down { action_id, data } => {
                if action_id == actions::APP_VOLUME {
                    self.start_repeat(data);
                }
            }
            Inbound::Up { .. } => {}
            Inbound::ConnectorChange {
                connector_id,
                value,
                data,
            } => self.handle_connector(&connector_id, value, &data),
            Inbound::ListChange {
                action_id,
                list_id,
                instance_id,
                value,
            } => self.handle_list_change(&action_id, &list_id, instance_id.as_deref(), &value),
            Inbound::ShortConnectorIdNotification {
                short_id,
                connector_id,
            } => tracing::debug!("Slider {} bound to {}", short_id, connector_id),
            Inbound::ClosePlugin => {
                tracing::info!("Touch Portal asked the plugin to close");
                return false;
            }
            Inbound::Unknown => {}
        }
        true
    }

    /// Stop every thread and drop every native registration. Idempotent.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down");

        for handle in self.repeaters.lock().drain(..) {
            let _ = handle.join();
        }

        if let Some(handle) = self.reconciler.lock().take() {
            self.sink.stop();
            if handle.join().is_err() {
                tracing::error!("Reconciler thread panicked");
            }
        }
        self.refresher.stop();
        self.subscriptions.shutdown();
        self.focus.stop();
    }

    fn apply_settings(&self, list: &SettingsList) {
        let settings = PluginSettings::from_list(list);
        if let Some(ignore) = settings.ignore_list {
            tracing::info!("Ignore list: {:?}", ignore.iter().collect::<Vec<_>>());
            let removed = self.publisher.set_ignore_list(ignore);
            if !removed.is_empty() {
                tracing::info!("Stopped tracking ignored apps: {:?}", removed);
            }
            // Re-posts every session snapshot so un-ignored apps reappear.
            if self.started.load(Ordering::SeqCst) {
                self.refresher.request();
            }
        }
    }

    fn handle_action(&self, action_id: &str, data: &[DataField]) {
        match action_id {
            actions::APP_MUTE => {
                let Some(name) = self.target_app(field(data, 0)) else {
                    return;
                };
                match MuteAction::parse(field(data, 1)) {
                    Some(action) => report("mute", self.sessions.set_mute(&name, action)),
                    None => tracing::warn!("Unknown mute choice {:?}", field(data, 1)),
                }
            }
            actions::APP_VOLUME => self.app_volume(data),
            actions::CHANGE_DEVICE => {
                let Some(direction) = Direction::parse(field(data, 0)) else {
                    return;
                };
                let Some(roles) = DeviceRole::for_choice(field(data, 2)) else {
                    tracing::warn!("Unknown device role {:?}", field(data, 2));
                    return;
                };
                report(
                    "change default device",
                    self.set_default_device(direction, field(data, 1), roles),
                );
            }
            actions::TOGGLE_DEVICE => {
                let Some(direction) = Direction::parse(field(data, 0)) else {
                    return;
                };
                let Some(roles) = DeviceRole::for_choice(field(data, 3)) else {
                    tracing::warn!("Unknown device role {:?}", field(data, 3));
                    return;
                };
                report(
                    "toggle default device",
                    self.toggle_default_device(direction, field(data, 1), field(data, 2), roles),
                );
            }
            actions::DEVICE_VOLUME => {
                let Some(direction) = Direction::parse(field(data, 0)) else {
                    return;
                };
                let Some(percent) = parse_percent(field(data, 2)) else {
                    tracing::warn!("Invalid volume {:?}", field(data, 2));
                    return;
                };
                report(
                    "set device volume",
                    self.set_device_volume(direction, field(data, 1), percent),
                );
            }
            actions::DEVICE_MUTE => {
                let Some(direction) = Direction::parse(field(data, 0)) else {
                    return;
                };
                let Some(action) = MuteAction::parse(field(data, 2)) else {
                    tracing::warn!("Unknown mute choice {:?}", field(data, 2));
                    return;
                };
                report(
                    "set device mute",
                    self.set_device_mute(direction, field(data, 1), action),
                );
            }
            actions::APP_AUDIO_SWITCH => {
                let Some(direction) = Direction::parse(field(data, 2)) else {
                    return;
                };
                let Some(name) = self.target_app(field(data, 0)) else {
                    return;
                };
                report(
                    "switch app device",
                    self.set_app_device(&name, direction, field(data, 1)),
                );
            }
            other => tracing::warn!("Unknown action {}", other),
        }
    }

    fn handle_connector(&self, connector_id: &str, value: i64, data: &[DataField]) {
        let percent = value.clamp(0, 100) as u8;
        match connector_id {
            connectors::APP_CONTROL => match field(data, 0) {
                "" => {}
                MASTER_VOLUME => report(
                    "set master volume",
                    self.set_device_volume(Direction::Output, DEFAULT_DEVICE, percent),
                ),
                choice => {
                    if let Some(name) = self.target_app(choice) {
                        report(
                            "set app volume",
                            self.sessions.adjust(&name, percent, Adjustment::Set),
                        );
                    }
                }
            },
            connectors::WIN_AUDIO => {
                let Some(direction) = Direction::parse(field(data, 0)) else {
                    return;
                };
                report(
                    "set device volume",
                    self.set_device_volume(direction, field(data, 1), percent),
                );
            }
            other => tracing::warn!("Unknown connector {}", other),
        }
    }

    fn handle_list_change(
        &self,
        action_id: &str,
        list_id: &str,
        instance_id: Option<&str>,
        value: &str,
    ) {
        let targets: &[(&str, bool)] = match (action_id, list_id) {
            (actions::CHANGE_DEVICE, actions::CHANGE_DEVICE_TYPE) => {
                &[(actions::CHANGE_DEVICE_LIST, false)]
            }
            (actions::TOGGLE_DEVICE, actions::TOGGLE_DEVICE_TYPE) => &[
                (actions::TOGGLE_DEVICE_LIST_1, false),
                (actions::TOGGLE_DEVICE_LIST_2, false),
            ],
            (actions::DEVICE_VOLUME, actions::DEVICE_VOLUME_TYPE) => {
                &[(actions::DEVICE_VOLUME_LIST, true)]
            }
            (actions::DEVICE_MUTE, actions::DEVICE_MUTE_TYPE) => {
                &[(actions::DEVICE_MUTE_LIST, true)]
            }
            (actions::APP_AUDIO_SWITCH, actions::APP_AUDIO_SWITCH_TYPE) => {
                &[(actions::APP_AUDIO_SWITCH_LIST, true)]
            }
            (connectors::WIN_AUDIO, connectors::WIN_AUDIO_TYPE) => {
                &[(connectors::WIN_AUDIO_DEVICE, true)]
            }
            _ => return,
        };
        let Some(direction) = Direction::parse(value) else {
            return;
        };

        let names = self.registry.names(direction);
        for (list, with_default) in targets {
            let mut choices = Vec::with_capacity(names.len() + 1);
            if *with_default {
                choices.push(DEFAULT_DEVICE.to_string());
            }
            choices.extend(names.iter().cloned());
            self.publisher.update_choices(list, &choices, instance_id);
        }
    }

    fn app_volume(&self, data: &[DataField]) {
        let Some(name) = self.target_app(field(data, 0)) else {
            return;
        };
        let Some(adjustment) = Adjustment::parse(field(data, 1)) else {
            tracing::warn!("Unknown volume choice {:?}", field(data, 1));
            return;
        };
        let Some(percent) = parse_percent(field(data, 2)) else {
            tracing::warn!("Invalid volume {:?}", field(data, 2));
            return;
        };
        report("adjust app volume", self.sessions.adjust(&name, percent, adjustment));
    }

    /// Repeat the volume action every `REPEAT_INTERVAL` while held.
    fn start_repeat(self: &Arc<Self>, data: Vec<DataField>) {
        let app = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("hold-repeat".to_string())
            .spawn(move || {
                while !app.stopping.load(Ordering::SeqCst)
                    && app.remote.is_held(actions::APP_VOLUME)
                {
                    app.app_volume(&data);
                    thread::sleep(REPEAT_INTERVAL);
                }
            });
        match spawned {
            Ok(handle) => {
                let mut repeaters = self.repeaters.lock();
                repeaters.retain(|h| !h.is_finished());
                repeaters.push(handle);
            }
            Err(e) => tracing::warn!("Failed to start hold repeat: {}", e),
        }
    }

    /// Resolve "Current app" to the foreground executable.
    fn target_app(&self, process: &str) -> Option<String> {
        match process {
            "" => None,
            CURRENT_APP => {
                let app = self.focus.current_app();
                if app.is_none() {
                    tracing::debug!("No foreground app");
                }
                app
            }
            name => Some(name.to_string()),
        }
    }

    fn set_default_device(
        &self,
        direction: Direction,
        device: &str,
        roles: &[DeviceRole],
    ) -> Result<(), AudioError> {
        let id = self.registry.resolve(device, direction)?;
        for role in roles {
            self.backend.set_default_endpoint(&id, *role)?;
        }
        tracing::info!("Default {} device set to {}", direction, device);
        Ok(())
    }

    /// Switch to whichever of the two devices is not the current default.
    fn toggle_default_device(
        &self,
        direction: Direction,
        first: &str,
        second: &str,
        roles: &[DeviceRole],
    ) -> Result<(), AudioError> {
        let communications = roles.iter().any(|r| r.is_communications());
        let current = self.registry.defaults().get(direction, communications).map(str::to_string);
        let first_id = self.registry.resolve(first, direction)?;
        let target = if current.as_deref() == Some(first_id.as_str()) {
            second
        } else {
            first
        };
        self.set_default_device(direction, target, roles)
    }

    fn set_device_volume(
        &self,
        direction: Direction,
        device: &str,
        percent: u8,
    ) -> Result<(), AudioError> {
        let id = self.registry.resolve(device, direction)?;
        self.backend
            .set_endpoint_volume(&id, f32::from(percent.min(100)) / 100.0)
    }

    fn set_device_mute(
        &self,
        direction: Direction,
        device: &str,
        action: MuteAction,
    ) -> Result<(), AudioError> {
        let id = self.registry.resolve(device, direction)?;
        let current = self.backend.endpoint_volume(&id)?.muted;
        self.backend.set_endpoint_mute(&id, action.apply(current))
    }

    /// Route an application to a device. "Default" clears its route so it
    /// follows the system default again.
    fn set_app_device(
        &self,
        name: &str,
        direction: Direction,
        device: &str,
    ) -> Result<(), AudioError> {
        let id = match device {
            DEFAULT_DEVICE => None,
            device => Some(self.registry.resolve(device, direction)?),
        };
        self.backend.set_app_endpoint(name, direction, id.as_deref())?;
        tracing::info!("{} {} device set to {}", name, direction, device);
        Ok(())
    }
}

/// Value of the data field at `index`, empty when missing.
fn field(data: &[DataField], index: usize) -> &str {
    data.get(index).map(|f| f.value.as_str()).unwrap_or_default()
}

/// Parse panel volume text ("0" to "100") to a whole percentage.
fn parse_percent(text: &str) -> Option<u8> {
    let value: f32 = text.trim().parse().ok()?;
    value.is_finite().then(|| value.clamp(0.0, 100.0).round() as u8)
}

/// Log the outcome of a panel-triggered operation.
fn report<T>(operation: &str, result: Result<T, AudioError>) {
    match result {
        Ok(_) => {}
        Err(e) if e.is_not_found() => tracing::info!("Cannot {}: {}", operation, e),
        Err(AudioError::Unsupported(what)) => {
            tracing::warn!("Cannot {}: {} is not supported", operation, what)
        }
        Err(e) => tracing::warn!("Failed to {}: {}", operation, e),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockBackend;
    use crate::config::IgnoreList;
    use crate::mixer::mock::RecordingRemote;
    use crate::schema;
    use std::collections::HashMap;

    fn setup() -> (Arc<MockBackend>, Arc<RecordingRemote>, Arc<MixerApp>) {
        let backend = Arc::new(MockBackend::new());
        backend.add_endpoint("out-1", "Speakers", Direction::Output, 0.5);
        backend.add_endpoint("out-2", "Headphones", Direction::Output, 0.3);
        backend.add_endpoint("in-1", "Microphone", Direction::Input, 0.8);
        backend.set_default(Direction::Output, DeviceRole::Multimedia, "out-1");
        backend.set_default(Direction::Input, DeviceRole::Multimedia, "in-1");
        backend.add_session("chrome.exe", 0.5, false);
        backend.set_foreground(Some("C:\\Apps\\chrome.exe"));

        let remote = Arc::new(RecordingRemote::new());
        let app = MixerApp::new(backend.clone(), remote.clone()).unwrap();
        assert!(app.handle(Inbound::Info {
            tp_version_string: Some("4.0".to_string()),
            plugin_version: Some(1),
            settings: Vec::new(),
        }));
        (backend, remote, app)
    }

    fn data(values: &[&str]) -> Vec<DataField> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| DataField {
                id: format!("field{}", i),
                value: v.to_string(),
            })
            .collect()
    }

    fn action(id: &str, values: &[&str]) -> Inbound {
        Inbound::Action {
            action_id: id.to_string(),
            data: data(values),
        }
    }

    #[test]
    fn test_app_mute_toggle_twice() {
        let (backend, _, app) = setup();
        app.handle(action(actions::APP_MUTE, &["chrome.exe", "Toggle"]));
        assert!(backend.session_volume("chrome.exe").unwrap().muted);
        app.handle(action(actions::APP_MUTE, &["chrome.exe", "Toggle"]));
        assert!(!backend.session_volume("chrome.exe").unwrap().muted);
        app.shutdown();
    }

    #[test]
    fn test_app_volume_current_app() {
        let (backend, _, app) = setup();
        app.handle(action(actions::APP_VOLUME, &["Current app", "Set", "20"]));
        assert_eq!(backend.session_volume("chrome.exe").unwrap().percent(), 20);
        app.handle(action(actions::APP_VOLUME, &["chrome.exe", "Increase", "15"]));
        assert_eq!(backend.session_volume("chrome.exe").unwrap().percent(), 35);
        app.handle(action(actions::APP_VOLUME, &["missing.exe", "Set", "10"]));
        app.shutdown();
    }

    #[test]
    fn test_change_default_device_sets_both_roles() {
        let (backend, _, app) = setup();
        app.handle(action(actions::CHANGE_DEVICE, &["Output", "Headphones", "Default"]));
        assert_eq!(
            backend.default_switches(),
            vec![
                ("out-2".to_string(), DeviceRole::Console),
                ("out-2".to_string(), DeviceRole::Multimedia)
            ]
        );

        app.handle(action(actions::CHANGE_DEVICE, &["Pick One", "Headphones", "Default"]));
        assert_eq!(backend.default_switches().len(), 2);
        app.shutdown();
    }

    #[test]
    fn test_toggle_device_picks_the_other_one() {
        let (backend, _, app) = setup();
        let toggle =
            || action(actions::TOGGLE_DEVICE, &["Output", "Speakers", "Headphones", "Default"]);

        app.handle(toggle());
        assert_eq!(backend.default_switches().last().unwrap().0, "out-2");

        app.registry
            .set_default(Direction::Output, DeviceRole::Multimedia, Some("out-2".to_string()));
        app.handle(toggle());
        assert_eq!(backend.default_switches().last().unwrap().0, "out-1");
        app.shutdown();
    }

    #[test]
    fn test_device_volume_and_mute() {
        let (backend, _, app) = setup();
        app.handle(action(actions::DEVICE_VOLUME, &["Output", "Default", "64"]));
        assert_eq!(backend.endpoint_state("out-1").unwrap().percent(), 64);

        app.handle(action(actions::DEVICE_MUTE, &["Input", "Microphone", "Toggle"]));
        assert!(backend.endpoint_state("in-1").unwrap().muted);
        app.handle(action(actions::DEVICE_MUTE, &["Input", "Default", "Un-Mute"]));
        assert!(!backend.endpoint_state("in-1").unwrap().muted);
        app.shutdown();
    }

    #[test]
    fn test_connectors() {
        let (backend, _, app) = setup();
        app.handle(Inbound::ConnectorChange {
            connector_id: connectors::APP_CONTROL.to_string(),
            value: 30,
            data: data(&[MASTER_VOLUME]),
        });
        assert_eq!(backend.endpoint_state("out-1").unwrap().percent(), 30);

        app.handle(Inbound::ConnectorChange {
            connector_id: connectors::APP_CONTROL.to_string(),
            value: 70,
            data: data(&["chrome.exe"]),
        });
        assert_eq!(backend.session_volume("chrome.exe").unwrap().percent(), 70);

        app.handle(Inbound::ConnectorChange {
            connector_id: connectors::WIN_AUDIO.to_string(),
            value: 150,
            data: data(&["Output", "Headphones"]),
        });
        assert_eq!(backend.endpoint_state("out-2").unwrap().percent(), 100);
        app.shutdown();
    }

    #[test]
    fn test_list_change_updates_instance_choices() {
        let (_, remote, app) = setup();
        app.handle(Inbound::ListChange {
            action_id: actions::DEVICE_VOLUME.to_string(),
            list_id: actions::DEVICE_VOLUME_TYPE.to_string(),
            instance_id: Some("inst-1".to_string()),
            value: "Output".to_string(),
        });
        assert!(remote.sent().contains(&crate::mixer::mock::Sent::Choices {
            id: actions::DEVICE_VOLUME_LIST.to_string(),
            values: vec!["Default".into(), "Speakers".into(), "Headphones".into()],
            instance: Some("inst-1".to_string()),
        }));

        app.handle(Inbound::ListChange {
            action_id: actions::TOGGLE_DEVICE.to_string(),
            list_id: actions::TOGGLE_DEVICE_TYPE.to_string(),
            instance_id: None,
            value: "Input".to_string(),
        });
        assert_eq!(remote.choices(actions::TOGGLE_DEVICE_LIST_1).unwrap(), vec!["Microphone"]);
        assert_eq!(remote.choices(actions::TOGGLE_DEVICE_LIST_2).unwrap(), vec!["Microphone"]);
        app.shutdown();
    }

    #[test]
    fn test_settings_ignore_list_removes_app() {
        let (_, remote, app) = setup();
        app.publisher.ensure_tracked("chrome.exe");
        app.handle(Inbound::Settings {
            values: vec![HashMap::from([(
                schema::settings::IGNORE_LIST.to_string(),
                "chrome.exe".to_string(),
            )])],
        });
        assert!(!app.publisher.is_tracked("chrome.exe"));
        assert!(app.publisher.is_ignored("CHROME.EXE"));
        assert!(remote.removed_count(&schema::app_volume_state("chrome.exe")) >= 1);
        assert_eq!(
            app.publisher.set_ignore_list(IgnoreList::default()),
            Vec::<String>::new()
        );
        app.shutdown();
    }

    #[test]
    fn test_unknown_and_close() {
        let (_, _, app) = setup();
        assert!(app.handle(action("some.other.action", &[])));
        assert!(app.handle(action(actions::APP_AUDIO_SWITCH, &["chrome.exe"])));
        assert!(app.handle(action(
            actions::APP_AUDIO_SWITCH,
            &["chrome.exe", "Speakers", "Pick One"]
        )));
        assert!(app.handle(Inbound::Unknown));
        assert!(!app.handle(Inbound::ClosePlugin));
        app.shutdown();
        app.shutdown();
    }

    #[test]
    fn test_held_volume_repeats_until_released() {
        let (backend, remote, app) = setup();
        remote.hold(actions::APP_VOLUME);
        app.handle(Inbound::Down {
            action_id: actions::APP_VOLUME.to_string(),
            data: data(&["chrome.exe", "Increase", "1"]),
        });
        thread::sleep(Duration::from_millis(200));
        remote.release(actions::APP_VOLUME);
        app.shutdown();

        let after = backend.session_volume("chrome.exe").unwrap().percent();
        assert!(after > 50, "volume {}", after);
        thread::sleep(REPEAT_INTERVAL * 2);
        assert_eq!(backend.session_volume("chrome.exe").unwrap().percent(), after);
    }

    #[test]
    fn test_app_audio_switch_routes_every_process() {
        let (backend, _, app) = setup();
        let second = backend.add_session("chrome.exe", 0.4, false);

        app.handle(action(
            actions::APP_AUDIO_SWITCH,
            &["chrome.exe", "Headphones", "Output"],
        ));
        let routes = backend.app_routes();
        assert_eq!(routes.len(), 2);
        assert!(routes.contains(&(second, Direction::Output, Some("out-2".to_string()))));

        app.handle(action(
            actions::APP_AUDIO_SWITCH,
            &["Current app", "Default", "Output"],
        ));
        let routes = backend.app_routes();
        assert_eq!(routes.len(), 4);
        assert!(routes[2..].iter().all(|(_, _, device)| device.is_none()));

        // Unknown device or process leaves routing untouched.
        app.handle(action(actions::APP_AUDIO_SWITCH, &["chrome.exe", "Nope", "Input"]));
        app.handle(action(
            actions::APP_AUDIO_SWITCH,
            &["missing.exe", "Microphone", "Input"],
        ));
        assert_eq!(backend.app_routes().len(), 4);
        app.shutdown();
    }

    #[test]
    fn test_app_audio_switch_list_change() {
        let (_, remote, app) = setup();
        app.handle(Inbound::ListChange {
            action_id: actions::APP_AUDIO_SWITCH.to_string(),
            list_id: actions::APP_AUDIO_SWITCH_TYPE.to_string(),
            instance_id: Some("inst-2".to_string()),
            value: "Input".to_string(),
        });
        assert!(remote.sent().contains(&crate::mixer::mock::Sent::Choices {
            id: actions::APP_AUDIO_SWITCH_LIST.to_string(),
            values: vec!["Default".into(), "Microphone".into()],
            instance: Some("inst-2".to_string()),
        }));
        app.shutdown();
    }

    /// Poll `condition` for up to two seconds.
    fn eventually(condition: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn test_unignored_app_reappears_after_refresh() {
        let (_, remote, app) = setup();
        let ignore = |value: &str| Inbound::Settings {
            values: vec![HashMap::from([(
                schema::settings::IGNORE_LIST.to_string(),
                value.to_string(),
            )])],
        };
        assert!(eventually(|| app.publisher.is_tracked("chrome.exe")));

        app.handle(ignore("chrome.exe"));
        assert!(!app.publisher.is_tracked("chrome.exe"));
        assert_eq!(remote.removed_count(&schema::app_volume_state("chrome.exe")), 1);

        app.handle(ignore(""));
        assert!(eventually(|| app.publisher.is_tracked("chrome.exe")));
        assert!(eventually(|| {
            remote.last_state(&schema::app_volume_state("chrome.exe")).as_deref() == Some("50")
        }));
        assert!(remote
            .choices(actions::APP_VOLUME_PROCESS)
            .unwrap()
            .contains(&"chrome.exe".to_string()));
        assert_eq!(
            remote
                .sent()
                .iter()
                .filter(|m| matches!(
                    m,
                    crate::mixer::mock::Sent::Create { id, .. }
                        if *id == schema::app_volume_state("chrome.exe")
                ))
                .count(),
            2
        );
        app.shutdown();
    }

    #[test]
    fn test_release_stops_repeat_without_shutdown() {
        let (backend, remote, app) = setup();
        remote.hold(actions::APP_VOLUME);
        app.handle(Inbound::Down {
            action_id: actions::APP_VOLUME.to_string(),
            data: data(&["chrome.exe", "Decrease", "1"]),
        });
        assert!(eventually(|| backend.session_volume("chrome.exe").unwrap().percent() < 48));

        remote.release(actions::APP_VOLUME);
        assert!(eventually(|| app.repeaters.lock().iter().all(|h| h.is_finished())));

        let after = backend.session_volume("chrome.exe").unwrap().percent();
        assert!(after > 0, "volume {}", after);
        thread::sleep(REPEAT_INTERVAL * 4);
        assert_eq!(backend.session_volume("chrome.exe").unwrap().percent(), after);
        app.shutdown();
    }

    #[test]
    fn test_field_and_percent_parsing() {
        assert_eq!(field(&data(&["a"]), 3), "");
        assert_eq!(parse_percent(" 42 "), Some(42));
        assert_eq!(parse_percent("250"), Some(100));
        assert_eq!(parse_percent("abc"), None);
    }
}
