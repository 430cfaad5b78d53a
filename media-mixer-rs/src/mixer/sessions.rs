//! Per-application session control.
//!
//! Session handles are never cached: every operation asks the backend for
//! the current sessions and matches the process name case-insensitively.
//! A process may own several sessions; setters apply to all of them.

use crate::audio::{
    AudioBackend, AudioError, Adjustment, MuteAction, SessionControl, SessionState, VolumeState,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Last known values of a session, as reported by its callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSnapshot {
    pub volume: VolumeState,
    pub state: SessionState,
}

pub struct SessionTracker {
    backend: Arc<dyn AudioBackend>,
    /// Live mirror keyed by lowercase process name.
    mirror: Mutex<HashMap<String, SessionSnapshot>>,
}

impl SessionTracker {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            mirror: Mutex::new(HashMap::new()),
        }
    }

    /// First live session owned by `name`.
    pub fn find_session(&self, name: &str) -> Result<Box<dyn SessionControl>, AudioError> {
        self.find_sessions(name)?
            .into_iter()
            .next()
            .ok_or_else(|| AudioError::SessionNotFound {
                process_name: name.to_string(),
            })
    }

    /// Every live session owned by `name`.
    pub fn find_sessions(&self, name: &str) -> Result<Vec<Box<dyn SessionControl>>, AudioError> {
        Ok(self
            .backend
            .sessions()?
            .into_iter()
            .filter(|s| s.process_name().eq_ignore_ascii_case(name))
            .collect())
    }

    /// Set the volume scalar. Returns false when no session matched.
    pub fn set_volume(&self, name: &str, volume: f32) -> Result<bool, AudioError> {
        let sessions = self.find_sessions(name)?;
        if sessions.is_empty() {
            tracing::info!("No audio session for {}, volume unchanged", name);
            return Ok(false);
        }
        let volume = volume.clamp(0.0, 1.0);
        for session in &sessions {
            session.set_volume(volume)?;
        }
        tracing::debug!("{} volume set to {:.2}", name, volume);
        Ok(true)
    }

    /// Mute, unmute or toggle. Toggle reads each session's current flag.
    pub fn set_mute(&self, name: &str, action: MuteAction) -> Result<bool, AudioError> {
        let sessions = self.find_sessions(name)?;
        if sessions.is_empty() {
            tracing::info!("No audio session for {}, mute unchanged", name);
            return Ok(false);
        }
        for session in &sessions {
            let muted = action.apply(session.muted()?);
            session.set_muted(muted)?;
            tracing::debug!("{} muted: {}", name, muted);
        }
        Ok(true)
    }

    /// Move the volume by `delta` (0.0 to 1.0), reading the current value
    /// immediately before writing.
    pub fn adjust_volume(
        &self,
        name: &str,
        delta: f32,
        adjustment: Adjustment,
    ) -> Result<bool, AudioError> {
        let sessions = self.find_sessions(name)?;
        let Some(first) = sessions.first() else {
            tracing::info!("No audio session for {}, volume unchanged", name);
            return Ok(false);
        };
        let next = adjustment.apply(first.volume()?, delta);
        for session in &sessions {
            session.set_volume(next)?;
        }
        tracing::debug!("{} volume {:?} to {:.2}", name, adjustment, next);
        Ok(true)
    }

    /// `adjust_volume` with a whole percentage.
    pub fn adjust(
        &self,
        name: &str,
        percent: u8,
        adjustment: Adjustment,
    ) -> Result<bool, AudioError> {
        self.adjust_volume(name, f32::from(percent.min(100)) / 100.0, adjustment)
    }

    /// Live volume and mute of the first matching session.
    pub fn volume_of(&self, name: &str) -> Option<VolumeState> {
        match self.find_session(name) {
            Ok(session) => session.volume_state().ok(),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                tracing::debug!("Failed to read {} volume: {}", name, e);
                None
            }
        }
    }

    pub fn record(&self, name: &str, volume: VolumeState) {
        let mut mirror = self.mirror.lock();
        mirror
            .entry(name.to_lowercase())
            .and_modify(|s| s.volume = volume)
            .or_insert(SessionSnapshot {
                volume,
                state: SessionState::Active,
            });
    }

    pub fn set_state(&self, name: &str, state: SessionState) {
        if let Some(snapshot) = self.mirror.lock().get_mut(&name.to_lowercase()) {
            snapshot.state = state;
        }
    }

    /// Drop a session from the mirror. Returns false if it was not there.
    pub fn forget(&self, name: &str) -> bool {
        self.mirror.lock().remove(&name.to_lowercase()).is_some()
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.mirror.lock().contains_key(&name.to_lowercase())
    }

    pub fn snapshot(&self, name: &str) -> Option<SessionSnapshot> {
        self.mirror.lock().get(&name.to_lowercase()).copied()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockBackend;

    fn setup() -> (Arc<MockBackend>, SessionTracker) {
        let backend = Arc::new(MockBackend::new());
        backend.add_session("chrome.exe", 0.5, false);
        backend.add_session("Spotify.exe", 0.8, true);
        let tracker = SessionTracker::new(backend.clone());
        (backend, tracker)
    }

    #[test]
    fn test_find_session_is_case_insensitive() {
        let (_, tracker) = setup();
        assert_eq!(tracker.find_session("spotify.EXE").unwrap().process_name(), "Spotify.exe");
        assert!(matches!(
            tracker.find_session("firefox.exe"),
            Err(e) if e.is_not_found()
        ));
    }

    #[test]
    fn test_set_volume_missing_session_is_noop() {
        let (backend, tracker) = setup();
        assert!(!tracker.set_volume("firefox.exe", 0.3).unwrap());
        assert_eq!(backend.session_volume("chrome.exe").unwrap().volume, 0.5);
        assert!(!tracker.set_mute("firefox.exe", MuteAction::Toggle).unwrap());
        assert!(!tracker.adjust("firefox.exe", 10, Adjustment::Increase).unwrap());
    }

    #[test]
    fn test_set_volume_clamps() {
        let (backend, tracker) = setup();
        assert!(tracker.set_volume("chrome.exe", 1.7).unwrap());
        assert_eq!(backend.session_volume("chrome.exe").unwrap().volume, 1.0);
    }

    #[test]
    fn test_double_toggle_restores_mute() {
        let (backend, tracker) = setup();
        tracker.set_mute("spotify.exe", MuteAction::Toggle).unwrap();
        assert!(!backend.session_volume("spotify.exe").unwrap().muted);
        tracker.set_mute("spotify.exe", MuteAction::Toggle).unwrap();
        assert!(backend.session_volume("spotify.exe").unwrap().muted);

        tracker.set_mute("chrome.exe", MuteAction::Mute).unwrap();
        tracker.set_mute("chrome.exe", MuteAction::Mute).unwrap();
        assert!(backend.session_volume("chrome.exe").unwrap().muted);
    }

    #[test]
    fn test_adjust_reads_current_volume() {
        let (backend, tracker) = setup();
        tracker.adjust("chrome.exe", 10, Adjustment::Increase).unwrap();
        assert!((backend.session_volume("chrome.exe").unwrap().volume - 0.6).abs() < 1e-6);

        tracker.adjust("chrome.exe", 100, Adjustment::Decrease).unwrap();
        assert_eq!(backend.session_volume("chrome.exe").unwrap().volume, 0.0);

        tracker.adjust("chrome.exe", 42, Adjustment::Set).unwrap();
        assert_eq!(tracker.volume_of("chrome.exe").unwrap().percent(), 42);
    }

    #[test]
    fn test_applies_to_every_session_of_a_process() {
        let (backend, tracker) = setup();
        backend.add_session("chrome.exe", 0.1, false);
        tracker.set_mute("chrome.exe", MuteAction::Mute).unwrap();
        assert_eq!(tracker.find_sessions("chrome.exe").unwrap().len(), 2);
        for session in tracker.find_sessions("chrome.exe").unwrap() {
            assert!(session.muted().unwrap());
        }
    }

    #[test]
    fn test_mirror() {
        let (_, tracker) = setup();
        assert!(!tracker.is_tracked("chrome.exe"));
        tracker.record("Chrome.exe", VolumeState::new(0.5, false));
        assert!(tracker.is_tracked("chrome.exe"));

        tracker.set_state("chrome.exe", SessionState::Inactive);
        let snapshot = tracker.snapshot("chrome.exe").unwrap();
        assert_eq!(snapshot.state, SessionState::Inactive);
        assert_eq!(snapshot.volume.percent(), 50);

        assert!(tracker.forget("chrome.exe"));
        assert!(!tracker.forget("chrome.exe"));
    }
}
