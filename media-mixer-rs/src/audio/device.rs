//! Audio data models.
//!
//! Defines the endpoint and session types shared by the native backend and
//! the mixer, the events they produce, and the audio error type.

use thiserror::Error;

/// Data-flow direction of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    /// Render endpoints (speakers, headphones)
    Output,

    /// Capture endpoints (microphones, line-in)
    Input,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Output, Direction::Input];

    /// Label used by the panel's device-type choice lists.
    pub fn label(self) -> &'static str {
        match self {
            Direction::Output => "Output",
            Direction::Input => "Input",
        }
    }

    /// Parse a device-type choice. "Pick One" and anything else yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("output") {
            Some(Direction::Output)
        } else if value.eq_ignore_ascii_case("input") {
            Some(Direction::Input)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Audio device role (maps to Windows ERole enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DeviceRole {
    /// Used by games, system sounds, most general applications
    Console = 0,

    /// Used by music players, video players
    Multimedia = 1,

    /// Used by Teams, Zoom, Discord, and other VoIP applications
    Communications = 2,
}

impl DeviceRole {
    /// Roles addressed by a panel role choice.
    ///
    /// "Default" covers both Console and Multimedia so a switched device is
    /// picked up by every non-communication application.
    pub fn for_choice(value: &str) -> Option<&'static [DeviceRole]> {
        match value {
            "Default" => Some(&[DeviceRole::Console, DeviceRole::Multimedia]),
            "Communications" => Some(&[DeviceRole::Communications]),
            _ => None,
        }
    }

    pub fn is_communications(self) -> bool {
        self == DeviceRole::Communications
    }
}

/// Windows device state flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Device is active and available for use
    Active,

    /// Device is disabled in Windows Sound settings
    Disabled,

    /// Device is not present (driver issue)
    NotPresent,

    /// Device is unplugged (for pluggable devices)
    Unplugged,
}

/// Liveness of an application audio session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Inactive,
    Expired,
}

/// Volume scalar and mute flag, as delivered by volume notifications.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeState {
    /// Volume level as scalar (0.0 to 1.0)
    pub volume: f32,
    pub muted: bool,
}

impl VolumeState {
    pub fn new(volume: f32, muted: bool) -> Self {
        Self { volume, muted }
    }

    /// Volume as an integer percentage.
    pub fn percent(&self) -> u8 {
        to_percent(self.volume)
    }
}

/// An active endpoint as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Unique Windows device ID (opaque string from IMMDevice::GetId)
    pub id: String,

    /// Human-readable device name (from device properties)
    pub name: String,

    pub direction: Direction,
}

impl EndpointInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, direction: Direction) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            direction,
        }
    }
}

/// Events from the Windows audio system.
///
/// Native callbacks only construct one of these and post it; all decisions
/// happen on the reconciler thread.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Volume or mute state changed on an endpoint
    EndpointVolumeChanged {
        device_id: String,
        state: VolumeState,
    },

    /// Default device changed for a specific direction and role
    DefaultDeviceChanged {
        direction: Direction,
        role: DeviceRole,
        device_id: Option<String>, // None if no default device
    },

    /// A new audio device was connected
    DeviceAdded { device_id: String },

    /// An audio device was disconnected
    DeviceRemoved { device_id: String },

    /// Device state changed (active, disabled, not present, unplugged)
    DeviceStateChanged {
        device_id: String,
        new_state: DeviceState,
    },

    /// A new application session appeared on the default output device
    SessionCreated { process_name: String },

    /// Volume or mute changed on an application session
    SessionVolumeChanged {
        process_name: String,
        state: VolumeState,
    },

    /// Session became active, inactive or expired
    SessionStateChanged {
        process_name: String,
        state: SessionState,
    },
}

/// Mute operation requested by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteAction {
    Mute,
    Unmute,
    Toggle,
}

impl MuteAction {
    /// Accepts both the app ("Unmute") and device ("Un-Mute") spellings.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Mute" => Some(MuteAction::Mute),
            "Unmute" | "Un-Mute" | "Un-mute" => Some(MuteAction::Unmute),
            "Toggle" => Some(MuteAction::Toggle),
            _ => None,
        }
    }

    /// Resolve against the current mute flag.
    pub fn apply(self, current: bool) -> bool {
        match self {
            MuteAction::Mute => true,
            MuteAction::Unmute => false,
            MuteAction::Toggle => !current,
        }
    }
}

/// Volume operation requested by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Increase,
    Decrease,
    Set,
}

impl Adjustment {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Increase" => Some(Adjustment::Increase),
            "Decrease" => Some(Adjustment::Decrease),
            "Set" => Some(Adjustment::Set),
            _ => None,
        }
    }

    /// New scalar after applying `delta` (0.0 to 1.0) to `current`.
    pub fn apply(self, current: f32, delta: f32) -> f32 {
        let next = match self {
            Adjustment::Increase => current + delta,
            Adjustment::Decrease => current - delta,
            Adjustment::Set => delta,
        };
        next.clamp(0.0, 1.0)
    }
}

/// Convert a volume scalar to the integer percentage shown on the panel.
///
/// Rounds half up. The small bias absorbs f32 representation error so a
/// scalar of 0.755 publishes as 76, not 75.
pub fn to_percent(scalar: f32) -> u8 {
    let scaled = (scalar.clamp(0.0, 1.0) as f64) * 100.0 + 0.5 + 1e-4;
    (scaled.floor() as u8).min(100)
}

/// Mute text used by every mute state.
pub fn mute_label(muted: bool) -> &'static str {
    if muted {
        "Muted"
    } else {
        "Un-muted"
    }
}

/// Audio service error types.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("Audio session not found: {process_name}")]
    SessionNotFound { process_name: String },

    #[error("No default device available")]
    NoDefaultDevice,

    #[cfg(windows)]
    #[error("COM initialization failed: {0}")]
    ComInitFailed(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Failed to enumerate devices: {0}")]
    EnumerationFailed(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Failed to set default device: {0}")]
    SetDefaultFailed(#[source] windows::core::Error),

    #[error("Volume control not available for device")]
    VolumeNotAvailable,

    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsError(#[source] windows::core::Error),

    #[error("Audio backend failure: {0}")]
    Backend(String),

    #[error("String conversion error: {0}")]
    StringConversion(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl AudioError {
    /// True for lookups that missed rather than native failures.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AudioError::DeviceNotFound { .. }
                | AudioError::SessionNotFound { .. }
                | AudioError::NoDefaultDevice
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
