//! Outward state published to Touch Portal.
//!
//! `StatePublisher` owns the mirror of what the panel currently shows:
//! created per-app and per-device states, last published values and the
//! app choice lists. Every write goes through the `Remote` trait so the
//! mixer never touches the socket directly.

use crate::audio::{mute_label, Direction, EndpointInfo, VolumeState};
use crate::config::IgnoreList;
use crate::schema::{
    self, actions, connectors, APP_STATE_GROUP, CURRENT_APP, DEVICE_STATE_GROUP, MASTER_VOLUME,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Sink for outbound panel updates.
pub trait Remote: Send + Sync {
    fn create_state(
        &self,
        id: &str,
        desc: &str,
        parent_group: &str,
        default_value: &str,
    ) -> anyhow::Result<()>;
    fn update_state(&self, id: &str, value: &str) -> anyhow::Result<()>;
    fn remove_state(&self, id: &str) -> anyhow::Result<()>;
    fn update_choices(&self, id: &str, values: &[String], instance_id: Option<&str>)
        -> anyhow::Result<()>;
    fn update_connector(&self, short_id: &str, value: u8) -> anyhow::Result<()>;

    /// Short id of a bound slider, `None` when no page shows it.
    fn short_id(&self, connector_key: &str) -> Option<String>;

    /// Whether the button for `action_id` is held down.
    fn is_held(&self, action_id: &str) -> bool;
}

impl Remote for tp_client::Client {
    fn create_state(
        &self,
        id: &str,
        desc: &str,
        parent_group: &str,
        default_value: &str,
    ) -> anyhow::Result<()> {
        Ok(tp_client::Client::create_state(self, id, desc, parent_group, default_value)?)
    }

    fn update_state(&self, id: &str, value: &str) -> anyhow::Result<()> {
        Ok(self.state_update(id, value)?)
    }

    fn remove_state(&self, id: &str) -> anyhow::Result<()> {
        Ok(tp_client::Client::remove_state(self, id)?)
    }

    fn update_choices(
        &self,
        id: &str,
        values: &[String],
        instance_id: Option<&str>,
    ) -> anyhow::Result<()> {
        Ok(self.choice_update(id, values, instance_id)?)
    }

    fn update_connector(&self, short_id: &str, value: u8) -> anyhow::Result<()> {
        Ok(self.connector_update(short_id, value)?)
    }

    fn short_id(&self, connector_key: &str) -> Option<String> {
        tp_client::Client::short_id(self, connector_key)
    }

    fn is_held(&self, action_id: &str) -> bool {
        tp_client::Client::is_held(self, action_id)
    }
}

#[derive(Default)]
struct Outward {
    /// Last value sent per state id.
    states: HashMap<String, String>,
    /// Last value sent per slider short id.
    sliders: HashMap<String, u8>,
    /// Tracked applications in the order they appeared.
    apps: Vec<String>,
    /// Devices with created per-device states.
    devices: BTreeSet<(Direction, String)>,
    ignore: IgnoreList,
}

impl Outward {
    fn app_index(&self, name: &str) -> Option<usize> {
        self.apps.iter().position(|a| a.eq_ignore_ascii_case(name))
    }
}

/// Deduplicating front for every outbound update.
pub struct StatePublisher {
    remote: Arc<dyn Remote>,
    outward: Mutex<Outward>,
}

impl StatePublisher {
    pub fn new(remote: Arc<dyn Remote>) -> Self {
        Self {
            remote,
            outward: Mutex::new(Outward::default()),
        }
    }

    pub fn remote(&self) -> &Arc<dyn Remote> {
        &self.remote
    }

    /// Send a state value unless it equals the last one sent.
    pub fn update_state(&self, id: &str, value: &str) {
        let mut outward = self.outward.lock();
        if outward.states.get(id).map(String::as_str) == Some(value) {
            return;
        }
        match self.remote.update_state(id, value) {
            Ok(()) => {
                outward.states.insert(id.to_string(), value.to_string());
            }
            Err(e) => tracing::warn!("Failed to update state {}: {:#}", id, e),
        }
    }

    /// Move the slider bound to `key`. Returns false when it is unbound.
    pub fn publish_slider(&self, key: &str, value: u8) -> bool {
        let Some(short_id) = self.remote.short_id(key) else {
            tracing::trace!("No slider bound for {}", key);
            return false;
        };
        let value = value.min(100);

        let mut outward = self.outward.lock();
        if outward.sliders.get(&short_id) == Some(&value) {
            return true;
        }
        match self.remote.update_connector(&short_id, value) {
            Ok(()) => {
                outward.sliders.insert(short_id, value);
            }
            Err(e) => tracing::warn!("Failed to update slider {}: {:#}", key, e),
        }
        true
    }

    /// Pass-through for per-instance device lists.
    pub fn update_choices(&self, id: &str, values: &[String], instance_id: Option<&str>) {
        if let Err(e) = self.remote.update_choices(id, values, instance_id) {
            tracing::warn!("Failed to update choices {}: {:#}", id, e);
        }
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.outward.lock().ignore.contains(name)
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.outward.lock().app_index(name).is_some()
    }

    /// Tracked applications in the order they appeared.
    pub fn tracked(&self) -> Vec<String> {
        self.outward.lock().apps.clone()
    }

    /// Make sure an application has its three states and a choice entry.
    ///
    /// Returns whether the application is tracked afterwards; ignored
    /// applications never are.
    pub fn ensure_tracked(&self, name: &str) -> bool {
        let mut outward = self.outward.lock();
        if outward.ignore.contains(name) {
            return false;
        }
        if outward.app_index(name).is_some() {
            return true;
        }

        let [mute, volume, active] = schema::app_state_ids(name);
        let created = [
            (mute, format!("{} Mute State", name)),
            (volume, format!("{} Volume", name)),
            (active, format!("is {} Active", name)),
        ]
        .iter()
        .try_for_each(|(id, desc)| self.remote.create_state(id, desc, APP_STATE_GROUP, ""));
        if let Err(e) = created {
            tracing::warn!("Failed to create states for {}: {:#}", name, e);
            // Undo the partial set so the app stays fully untracked.
            for id in schema::app_state_ids(name) {
                if let Err(e) = self.remote.remove_state(&id) {
                    tracing::warn!("Failed to roll back state {}: {:#}", id, e);
                }
            }
            return false;
        }

        outward.apps.push(name.to_string());
        tracing::info!("Tracking {}", name);
        self.push_app_choices(&outward.apps);
        true
    }

    /// Remove an application's states and choice entry. Returns false if it
    /// was not tracked.
    pub fn remove_tracked(&self, name: &str) -> bool {
        let mut outward = self.outward.lock();
        let Some(index) = outward.app_index(name) else {
            tracing::debug!("{} is not tracked", name);
            return false;
        };
        let name = outward.apps.remove(index);
        for id in schema::app_state_ids(&name) {
            if let Err(e) = self.remote.remove_state(&id) {
                tracing::warn!("Failed to remove state {}: {:#}", id, e);
            }
            outward.states.remove(&id);
        }
        tracing::info!("No longer tracking {}", name);
        self.push_app_choices(&outward.apps);
        true
    }

    /// Replace the ignore list, dropping tracked apps it now names.
    ///
    /// Returns the applications that were removed.
    pub fn set_ignore_list(&self, list: IgnoreList) -> Vec<String> {
        let newly_ignored: Vec<String> = {
            let mut outward = self.outward.lock();
            outward.ignore = list;
            outward
                .apps
                .iter()
                .filter(|app| outward.ignore.contains(app))
                .cloned()
                .collect()
        };
        newly_ignored
            .into_iter()
            .filter(|app| self.remove_tracked(app))
            .collect()
    }

    /// Publish an application's mute and volume states.
    pub fn publish_app(&self, name: &str, state: VolumeState) {
        self.update_state(&schema::app_mute_state(name), mute_label(state.muted));
        self.update_state(&schema::app_volume_state(name), &state.percent().to_string());
    }

    /// Create per-device states for new endpoints and remove those of
    /// endpoints that disappeared.
    pub fn sync_devices(&self, endpoints: &[EndpointInfo]) {
        let mut outward = self.outward.lock();
        let current: BTreeSet<(Direction, String)> = endpoints
            .iter()
            .map(|e| (e.direction, e.name.clone()))
            .collect();

        let gone: Vec<_> = outward.devices.difference(&current).cloned().collect();
        for (direction, name) in gone {
            for id in [
                schema::device_volume_state(direction, &name),
                schema::device_mute_state(direction, &name),
            ] {
                if let Err(e) = self.remote.remove_state(&id) {
                    tracing::warn!("Failed to remove state {}: {:#}", id, e);
                }
                outward.states.remove(&id);
            }
            outward.devices.remove(&(direction, name));
        }

        let added: Vec<_> = current.difference(&outward.devices).cloned().collect();
        for (direction, name) in added {
            let result = self
                .remote
                .create_state(
                    &schema::device_volume_state(direction, &name),
                    &format!("{} {} Volume", direction, name),
                    DEVICE_STATE_GROUP,
                    "",
                )
                .and_then(|()| {
                    self.remote.create_state(
                        &schema::device_mute_state(direction, &name),
                        &format!("{} {} Mute State", direction, name),
                        DEVICE_STATE_GROUP,
                        "",
                    )
                });
            match result {
                Ok(()) => {
                    outward.devices.insert((direction, name));
                }
                Err(e) => tracing::warn!("Failed to create states for {}: {:#}", name, e),
            }
        }
    }

    fn push_app_choices(&self, apps: &[String]) {
        let mut slider = vec![MASTER_VOLUME.to_string(), CURRENT_APP.to_string()];
        slider.extend(apps.iter().cloned());
        let buttons = slider[1..].to_vec();

        self.update_choices(connectors::APP_CONTROL_CHOICE, &slider, None);
        self.update_choices(actions::APP_MUTE_PROCESS, &buttons, None);
        self.update_choices(actions::APP_VOLUME_PROCESS, &buttons, None);
        self.update_choices(actions::APP_AUDIO_SWITCH_PROCESS, &buttons, None);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::mock::{RecordingRemote, Sent};

    fn setup() -> (Arc<RecordingRemote>, StatePublisher) {
        let remote = Arc::new(RecordingRemote::new());
        let publisher = StatePublisher::new(remote.clone());
        (remote, publisher)
    }

    #[test]
    fn test_ensure_then_remove_round_trips() {
        let (remote, publisher) = setup();
        assert!(publisher.ensure_tracked("chrome.exe"));
        assert!(publisher.ensure_tracked("Chrome.exe"));
        assert_eq!(remote.created_count(), 3);
        assert_eq!(
            remote.choices(actions::APP_MUTE_PROCESS).unwrap(),
            vec!["Current app", "chrome.exe"]
        );
        assert_eq!(
            remote.choices(connectors::APP_CONTROL_CHOICE).unwrap(),
            vec!["Master Volume", "Current app", "chrome.exe"]
        );
        assert_eq!(
            remote.choices(actions::APP_AUDIO_SWITCH_PROCESS).unwrap(),
            vec!["Current app", "chrome.exe"]
        );

        assert!(publisher.remove_tracked("chrome.exe"));
        assert!(!publisher.remove_tracked("chrome.exe"));
        assert!(publisher.tracked().is_empty());
        for id in schema::app_state_ids("chrome.exe") {
            assert_eq!(remote.removed_count(&id), 1);
        }
        assert_eq!(remote.choices(actions::APP_MUTE_PROCESS).unwrap(), vec!["Current app"]);
    }

    #[test]
    fn test_failed_create_rolls_back_every_state() {
        let (remote, publisher) = setup();
        let [mute, volume, active] = schema::app_state_ids("chrome.exe");
        remote.fail_on(&active);
        remote.fail_on(&mute);

        assert!(!publisher.ensure_tracked("chrome.exe"));
        assert!(!publisher.is_tracked("chrome.exe"));
        for id in [&mute, &volume, &active] {
            assert_eq!(remote.removed_count(id), 1, "{}", id);
        }
        assert!(remote.choices(actions::APP_MUTE_PROCESS).is_none());
    }

    #[test]
    fn test_ignored_app_is_never_tracked() {
        let (remote, publisher) = setup();
        publisher.set_ignore_list(IgnoreList::parse("game.exe"));
        assert!(!publisher.ensure_tracked("GAME.exe"));
        assert_eq!(remote.created_count(), 0);
    }

    #[test]
    fn test_ignore_list_update_removes_tracked_apps() {
        let (remote, publisher) = setup();
        publisher.ensure_tracked("chrome.exe");
        publisher.ensure_tracked("discord.exe");

        let removed = publisher.set_ignore_list(IgnoreList::parse("discord.exe"));
        assert_eq!(removed, vec!["discord.exe"]);
        assert_eq!(publisher.tracked(), vec!["chrome.exe"]);
        assert_eq!(remote.removed_count(&schema::app_volume_state("discord.exe")), 1);
    }

    #[test]
    fn test_state_updates_are_deduplicated() {
        let (remote, publisher) = setup();
        publisher.publish_app("chrome.exe", VolumeState::new(0.755, false));
        publisher.publish_app("chrome.exe", VolumeState::new(0.755, false));

        let volume_id = schema::app_volume_state("chrome.exe");
        assert_eq!(remote.updates(&volume_id), vec!["76"]);
        assert_eq!(
            remote.updates(&schema::app_mute_state("chrome.exe")),
            vec!["Un-muted"]
        );
    }

    #[test]
    fn test_removal_forgets_last_value() {
        let (remote, publisher) = setup();
        publisher.ensure_tracked("chrome.exe");
        publisher.publish_app("chrome.exe", VolumeState::new(0.5, false));
        publisher.remove_tracked("chrome.exe");
        publisher.ensure_tracked("chrome.exe");
        publisher.publish_app("chrome.exe", VolumeState::new(0.5, false));
        assert_eq!(remote.updates(&schema::app_volume_state("chrome.exe")).len(), 2);
    }

    #[test]
    fn test_publish_slider_requires_binding() {
        let (remote, publisher) = setup();
        let key = schema::app_slider_key("chrome.exe");
        assert!(!publisher.publish_slider(&key, 40));

        remote.bind(&key, "s1");
        assert!(publisher.publish_slider(&key, 40));
        assert!(publisher.publish_slider(&key, 40));
        assert!(publisher.publish_slider(&key, 41));
        assert_eq!(remote.connector_values("s1"), vec![40, 41]);
    }

    #[test]
    fn test_sync_devices_creates_and_removes() {
        let (remote, publisher) = setup();
        let speakers = EndpointInfo::new("out-1", "Speakers", Direction::Output);
        let mic = EndpointInfo::new("in-1", "Mic", Direction::Input);

        publisher.sync_devices(&[speakers.clone(), mic.clone()]);
        publisher.sync_devices(&[speakers.clone(), mic]);
        assert_eq!(remote.created_count(), 4);

        publisher.sync_devices(&[speakers]);
        let mic_volume = schema::device_volume_state(Direction::Input, "Mic");
        assert_eq!(remote.removed_count(&mic_volume), 1);
        assert!(remote
            .sent()
            .iter()
            .any(|m| matches!(m, Sent::Create { group, .. } if group == DEVICE_STATE_GROUP)));
    }
}
