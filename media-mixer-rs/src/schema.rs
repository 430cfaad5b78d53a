//! Touch Portal identifiers used by the plugin.
//!
//! These must match the ids declared in the plugin's `entry.tp`.

use crate::audio::Direction;

pub const PLUGIN_ID: &str = "com.github.KillerBOSS2019.WinMediaMixer";
pub const PLUGIN_NAME: &str = "TouchPortal Windows Media Mixer";

/// Parent group for per-application states.
pub const APP_STATE_GROUP: &str = "Audio process state";
/// Parent group for per-device states.
pub const DEVICE_STATE_GROUP: &str = "Audio device state";

pub const MASTER_VOLUME: &str = "Master Volume";
pub const CURRENT_APP: &str = "Current app";
pub const DEFAULT_DEVICE: &str = "Default";
pub const UNKNOWN_DEVICE: &str = "Unknown";

pub mod settings {
    pub const IGNORE_LIST: &str = "Audio process ignore list";
    /// Placeholder text shipped as the setting's default value.
    pub const IGNORE_LIST_PLACEHOLDER: &str =
        "Enter '.exe' name seperated by a comma for more then 1";
}

pub mod states {
    pub const OUTPUT_DEVICE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.state.CurrentOutputDevice";
    pub const OUTPUT_COMMUNICATION_DEVICE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.state.CurrentOutputCommicationDevice";
    pub const INPUT_DEVICE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.state.CurrentInputDevice";
    pub const INPUT_COMMUNICATION_DEVICE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.state.CurrentInputCommucationDevice";

    pub const MASTER_VOLUME: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.state.currentMasterVolume";
    pub const MASTER_VOLUME_MUTE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.state.currentMasterVolumeMute";
    pub const INPUT_MASTER_VOLUME: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.state.currentInputMasterVolume";
    pub const INPUT_MASTER_VOLUME_MUTE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.state.currentInputMasterVolumeMute";

    pub const FOCUSED_APP: &str = "com.github.KillerBOSS2019.WinMediaMixer.state.currentFocusedAPP";
    pub const CURRENT_APP_VOLUME: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.state.currentAppVolume";
    pub const CURRENT_APP_MUTE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.state.currentAppMute";
}

pub mod actions {
    pub const APP_MUTE: &str = "com.github.KillerBOSS2019.WinMediaMixer.act.Mute/Unmute";
    pub const APP_MUTE_PROCESS: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.Mute/Unmute.data.process";

    pub const APP_VOLUME: &str = "com.github.KillerBOSS2019.WinMediaMixer.act.Inc/DecrVol";
    pub const APP_VOLUME_PROCESS: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.Inc/DecrVol.data.process";

    pub const CHANGE_DEVICE: &str = "com.github.KillerBOSS2019.WinMediaMixer.act.ChangeAudioOutput";
    pub const CHANGE_DEVICE_TYPE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.ChangeAudioOutput.choice";
    pub const CHANGE_DEVICE_LIST: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.ChangeAudioOutput.data.device";

    pub const TOGGLE_DEVICE: &str = "com.github.KillerBOSS2019.WinMediaMixer.act.ToggleAudioOutput";
    pub const TOGGLE_DEVICE_TYPE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.ToggleAudioOutput.choice";
    pub const TOGGLE_DEVICE_LIST_1: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.ToggleAudioOutput.data.device1";
    pub const TOGGLE_DEVICE_LIST_2: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.ToggleAudioOutput.data.device2";

    pub const DEVICE_VOLUME: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.changeDeviceVolume";
    pub const DEVICE_VOLUME_TYPE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.changeDeviceVolume.deviceType";
    pub const DEVICE_VOLUME_LIST: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.changeDeviceVolume.devices";

    pub const DEVICE_MUTE: &str = "com.github.KillerBOSS2019.WinMediaMixer.act.changeDeviceMute";
    pub const DEVICE_MUTE_TYPE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.changeDeviceMute.deviceType";
    pub const DEVICE_MUTE_LIST: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.changeDeviceMute.devices";

    pub const APP_AUDIO_SWITCH: &str = "com.github.KillerBOSS2019.WinMediaMixer.act.appAudioSwitch";
    pub const APP_AUDIO_SWITCH_PROCESS: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.appAudioSwitch.data.process";
    pub const APP_AUDIO_SWITCH_LIST: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.appAudioSwitch.data.devices";
    /// Shares its id with the device-change action's type list.
    pub const APP_AUDIO_SWITCH_TYPE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.act.ChangeAudioOutput.deviceType";
}

pub mod connectors {
    pub const APP_CONTROL: &str = "com.github.KillerBOSS2019.WinMediaMixer.connector.APPcontrol";
    pub const APP_CONTROL_CHOICE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.connector.APPcontrol.data.slidercontrol";

    pub const WIN_AUDIO: &str = "com.github.KillerBOSS2019.WinMediaMixer.connector.WinAudio";
    pub const WIN_AUDIO_TYPE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.connector.WinAudio.deviceType";
    pub const WIN_AUDIO_DEVICE: &str =
        "com.github.KillerBOSS2019.WinMediaMixer.connector.WinAudio.devices";
}

/// The three state ids owned by one tracked application.
pub fn app_state_ids(app: &str) -> [String; 3] {
    [
        app_mute_state(app),
        app_volume_state(app),
        app_active_state(app),
    ]
}

pub fn app_mute_state(app: &str) -> String {
    format!("{}.createState.{}.muteState", PLUGIN_ID, app)
}

pub fn app_volume_state(app: &str) -> String {
    format!("{}.createState.{}.volume", PLUGIN_ID, app)
}

pub fn app_active_state(app: &str) -> String {
    format!("{}.createState.{}.active", PLUGIN_ID, app)
}

pub fn device_volume_state(direction: Direction, name: &str) -> String {
    format!("{}.createState.{}.{}.volume", PLUGIN_ID, direction.label(), name)
}

pub fn device_mute_state(direction: Direction, name: &str) -> String {
    format!("{}.createState.{}.{}.muteState", PLUGIN_ID, direction.label(), name)
}

/// States naming the default device for (direction, communications?).
pub fn default_device_state(direction: Direction, communications: bool) -> &'static str {
    match (direction, communications) {
        (Direction::Output, false) => states::OUTPUT_DEVICE,
        (Direction::Output, true) => states::OUTPUT_COMMUNICATION_DEVICE,
        (Direction::Input, false) => states::INPUT_DEVICE,
        (Direction::Input, true) => states::INPUT_COMMUNICATION_DEVICE,
    }
}

/// Master volume and mute state ids for a direction.
pub fn master_states(direction: Direction) -> (&'static str, &'static str) {
    match direction {
        Direction::Output => (states::MASTER_VOLUME, states::MASTER_VOLUME_MUTE),
        Direction::Input => (states::INPUT_MASTER_VOLUME, states::INPUT_MASTER_VOLUME_MUTE),
    }
}

/// Long connector key: `pc_<plugin>_<connector>|<data>=<value>|...`.
pub fn connector_key(connector: &str, data: &[(&str, &str)]) -> String {
    let mut key = format!("pc_{}_{}", PLUGIN_ID, connector);
    for (id, value) in data {
        key.push('|');
        key.push_str(id);
        key.push('=');
        key.push_str(value);
    }
    key
}

/// Key of the APP control slider bound to `choice` (an app, "Current app"
/// or "Master Volume").
pub fn app_slider_key(choice: &str) -> String {
    connector_key(connectors::APP_CONTROL, &[(connectors::APP_CONTROL_CHOICE, choice)])
}

/// Key of the Windows Audio slider bound to a device name or "Default".
pub fn device_slider_key(direction: Direction, device: &str) -> String {
    connector_key(
        connectors::WIN_AUDIO,
        &[
            (connectors::WIN_AUDIO_TYPE, direction.label()),
            (connectors::WIN_AUDIO_DEVICE, device),
        ],
    )
}

// ============================================================================
// Tests
// ============================================================================
