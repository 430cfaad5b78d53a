//! In-memory audio backend for tests.

use super::backend::{AudioBackend, EventSink, SessionControl, Subscription};
use super::device::{
    AudioError, DeviceRole, Direction, EndpointInfo, SessionState, VolumeState,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type FocusCallback = Arc<Mutex<Box<dyn Fn(String) + Send>>>;

#[derive(Debug, Clone)]
struct MockSessionData {
    name: String,
    instance: String,
    pid: u32,
    volume: f32,
    muted: bool,
    state: SessionState,
}

#[derive(Default)]
struct MockState {
    endpoints: Vec<(EndpointInfo, VolumeState)>,
    defaults: HashMap<(Direction, DeviceRole), String>,
    sessions: Vec<Arc<Mutex<MockSessionData>>>,
    failing_watches: HashSet<String>,
    foreground: Option<String>,
    focus_callback: Option<FocusCallback>,
    default_switches: Vec<(String, DeviceRole)>,
    app_routes: Vec<(u32, Direction, Option<String>)>,
    next_pid: u32,
    enumerate_fails: bool,
    sessions_fail: bool,
}

/// Scriptable backend. Tracks how many subscriptions of each label are live.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    live: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_endpoint(&self, id: &str, name: &str, direction: Direction, volume: f32) {
        self.state.lock().endpoints.push((
            EndpointInfo::new(id, name, direction),
            VolumeState::new(volume, false),
        ));
    }

    pub fn remove_endpoint(&self, id: &str) {
        self.state.lock().endpoints.retain(|(info, _)| info.id != id);
    }

    pub fn set_default(&self, direction: Direction, role: DeviceRole, id: &str) {
        self.state
            .lock()
            .defaults
            .insert((direction, role), id.to_string());
    }

    /// Add a session owned by a new process. Returns its pid.
    pub fn add_session(&self, name: &str, volume: f32, muted: bool) -> u32 {
        let mut state = self.state.lock();
        state.next_pid += 1;
        let pid = 1000 + state.next_pid;
        state.sessions.push(Arc::new(Mutex::new(MockSessionData {
            name: name.to_string(),
            instance: format!("{}|{}", name.to_lowercase(), pid),
            pid,
            volume,
            muted,
            state: SessionState::Active,
        })));
        pid
    }

    /// Expire every session of `name`.
    pub fn expire_session(&self, name: &str) {
        for session in self.state.lock().sessions.iter() {
            let mut session = session.lock();
            if session.name.eq_ignore_ascii_case(name) {
                session.state = SessionState::Expired;
            }
        }
    }

    /// Expire the oldest live session of `name`. Returns false if none was live.
    pub fn expire_one(&self, name: &str) -> bool {
        let state = self.state.lock();
        for session in state.sessions.iter() {
            let mut session = session.lock();
            if session.name.eq_ignore_ascii_case(name) && session.state != SessionState::Expired {
                session.state = SessionState::Expired;
                return true;
            }
        }
        false
    }

    pub fn session_volume(&self, name: &str) -> Option<VolumeState> {
        self.state.lock().sessions.iter().find_map(|s| {
            let s = s.lock();
            s.name
                .eq_ignore_ascii_case(name)
                .then(|| VolumeState::new(s.volume, s.muted))
        })
    }

    pub fn endpoint_state(&self, id: &str) -> Option<VolumeState> {
        self.state
            .lock()
            .endpoints
            .iter()
            .find(|(info, _)| info.id == id)
            .map(|(_, v)| *v)
    }

    /// Make `watch_endpoint` fail for one device.
    pub fn fail_watch(&self, id: &str) {
        self.state.lock().failing_watches.insert(id.to_string());
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.state.lock().enumerate_fails = fail;
    }

    pub fn fail_sessions(&self, fail: bool) {
        self.state.lock().sessions_fail = fail;
    }

    pub fn set_foreground(&self, path: Option<&str>) {
        self.state.lock().foreground = path.map(str::to_string);
    }

    /// Change the foreground path and fire the installed hook, if any.
    pub fn focus(&self, path: &str) {
        let callback = {
            let mut state = self.state.lock();
            state.foreground = Some(path.to_string());
            state.focus_callback.clone()
        };
        if let Some(callback) = callback {
            (callback.lock())(path.to_string());
        }
    }

    pub fn default_switches(&self) -> Vec<(String, DeviceRole)> {
        self.state.lock().default_switches.clone()
    }

    /// Per-process routes set through `set_app_endpoint`, oldest first.
    pub fn app_routes(&self) -> Vec<(u32, Direction, Option<String>)> {
        self.state.lock().app_routes.clone()
    }

    /// Number of live subscriptions with this label.
    pub fn live(&self, label: &str) -> usize {
        self.live.lock().get(label).copied().unwrap_or(0)
    }

    /// Number of live subscriptions whose label starts with `prefix`.
    pub fn live_with_prefix(&self, prefix: &str) -> usize {
        self.live
            .lock()
            .iter()
            .filter(|(label, _)| label.starts_with(prefix))
            .map(|(_, count)| *count)
            .sum()
    }

    fn track(&self, label: String) -> Subscription {
        track(&self.live, label)
    }
}

fn track(live: &Arc<Mutex<HashMap<String, usize>>>, label: String) -> Subscription {
    *live.lock().entry(label.clone()).or_insert(0) += 1;
    let live = Arc::clone(live);
    let key = label.clone();
    Subscription::new(label, move || {
        let mut live = live.lock();
        if let Some(count) = live.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                live.remove(&key);
            }
        }
    })
}

impl AudioBackend for MockBackend {
    fn endpoints(&self, direction: Direction) -> Result<Vec<EndpointInfo>, AudioError> {
        let state = self.state.lock();
        if state.enumerate_fails {
            return Err(AudioError::Backend("enumeration disabled".to_string()));
        }
        Ok(state
            .endpoints
            .iter()
            .filter(|(info, _)| info.direction == direction)
            .map(|(info, _)| info.clone())
            .collect())
    }

    fn default_endpoint(
        &self,
        direction: Direction,
        role: DeviceRole,
    ) -> Result<Option<String>, AudioError> {
        Ok(self.state.lock().defaults.get(&(direction, role)).cloned())
    }

    fn endpoint_volume(&self, device_id: &str) -> Result<VolumeState, AudioError> {
        self.endpoint_state(device_id)
            .ok_or_else(|| AudioError::DeviceNotFound {
                device_id: device_id.to_string(),
            })
    }

    fn set_endpoint_volume(&self, device_id: &str, volume: f32) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let entry = state
            .endpoints
            .iter_mut()
            .find(|(info, _)| info.id == device_id)
            .ok_or_else(|| AudioError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;
        entry.1.volume = volume.clamp(0.0, 1.0);
        Ok(())
    }

    fn set_endpoint_mute(&self, device_id: &str, muted: bool) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let entry = state
            .endpoints
            .iter_mut()
            .find(|(info, _)| info.id == device_id)
            .ok_or_else(|| AudioError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;
        entry.1.muted = muted;
        Ok(())
    }

    fn set_default_endpoint(&self, device_id: &str, role: DeviceRole) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let direction = state
            .endpoints
            .iter()
            .find(|(info, _)| info.id == device_id)
            .map(|(info, _)| info.direction)
            .ok_or_else(|| AudioError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;
        state
            .defaults
            .insert((direction, role), device_id.to_string());
        state
            .default_switches
            .push((device_id.to_string(), role));
        Ok(())
    }

    fn sessions(&self) -> Result<Vec<Box<dyn SessionControl>>, AudioError> {
        let state = self.state.lock();
        if state.sessions_fail {
            return Err(AudioError::Backend("session listing disabled".to_string()));
        }
        Ok(state
            .sessions
            .iter()
            .filter(|s| s.lock().state != SessionState::Expired)
            .map(|s| {
                let (name, instance, pid) = {
                    let s = s.lock();
                    (s.name.clone(), s.instance.clone(), s.pid)
                };
                Box::new(MockSession {
                    name,
                    instance,
                    pid,
                    data: Arc::clone(s),
                    live: Arc::clone(&self.live),
                }) as Box<dyn SessionControl>
            })
            .collect())
    }

    fn set_app_endpoint(
        &self,
        process_name: &str,
        direction: Direction,
        device_id: Option<&str>,
    ) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        if let Some(id) = device_id {
            if !state
                .endpoints
                .iter()
                .any(|(info, _)| info.id == id && info.direction == direction)
            {
                return Err(AudioError::DeviceNotFound {
                    device_id: id.to_string(),
                });
            }
        }
        let pids: Vec<u32> = state
            .sessions
            .iter()
            .map(|s| s.lock().clone())
            .filter(|s| {
                s.state != SessionState::Expired && s.name.eq_ignore_ascii_case(process_name)
            })
            .map(|s| s.pid)
            .collect();
        if pids.is_empty() {
            return Err(AudioError::SessionNotFound {
                process_name: process_name.to_string(),
            });
        }
        for pid in pids {
            state
                .app_routes
                .push((pid, direction, device_id.map(str::to_string)));
        }
        Ok(())
    }

    fn watch_endpoint(
        &self,
        device_id: &str,
        _sink: EventSink,
    ) -> Result<Subscription, AudioError> {
        if self.state.lock().failing_watches.contains(device_id) {
            return Err(AudioError::VolumeNotAvailable);
        }
        Ok(self.track(format!("endpoint:{}", device_id)))
    }

    fn watch_topology(&self, _sink: EventSink) -> Result<Subscription, AudioError> {
        Ok(self.track("topology".to_string()))
    }

    fn watch_session_creation(&self, _sink: EventSink) -> Result<Subscription, AudioError> {
        Ok(self.track("session-created".to_string()))
    }

    fn watch_foreground(
        &self,
        on_change: Box<dyn Fn(String) + Send>,
    ) -> Result<Subscription, AudioError> {
        self.state.lock().focus_callback = Some(Arc::new(Mutex::new(on_change)));
        Ok(self.track("foreground".to_string()))
    }

    fn foreground_executable(&self) -> Option<String> {
        self.state.lock().foreground.clone()
    }
}

/// Session handle backed by shared mock data.
struct MockSession {
    name: String,
    instance: String,
    pid: u32,
    data: Arc<Mutex<MockSessionData>>,
    live: Arc<Mutex<HashMap<String, usize>>>,
}

impl SessionControl for MockSession {
    fn process_name(&self) -> &str {
        &self.name
    }

    fn instance_id(&self) -> &str {
        &self.instance
    }

    fn process_id(&self) -> u32 {
        self.pid
    }

    fn volume(&self) -> Result<f32, AudioError> {
        Ok(self.data.lock().volume)
    }

    fn set_volume(&self, volume: f32) -> Result<(), AudioError> {
        self.data.lock().volume = volume.clamp(0.0, 1.0);
        Ok(())
    }

    fn muted(&self) -> Result<bool, AudioError> {
        Ok(self.data.lock().muted)
    }

    fn set_muted(&self, muted: bool) -> Result<(), AudioError> {
        self.data.lock().muted = muted;
        Ok(())
    }

    fn state(&self) -> Result<SessionState, AudioError> {
        Ok(self.data.lock().state)
    }

    fn watch(&self, _sink: EventSink) -> Result<Subscription, AudioError> {
        Ok(track(&self.live, format!("session:{}", self.name.to_lowercase())))
    }
}
