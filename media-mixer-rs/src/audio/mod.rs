//! Audio module for Windows Core Audio API interactions.
//!
//! This module provides the backend capability trait, the data models it
//! speaks in, and the WASAPI implementation: endpoint enumeration, volume
//! control, session control and change notifications.

pub mod backend;
pub mod device;

#[cfg(windows)]
pub mod enumerator;
#[cfg(windows)]
pub mod notifications;
#[cfg(windows)]
pub mod policy;
#[cfg(windows)]
pub mod session;
#[cfg(windows)]
pub mod volume;

#[cfg(test)]
pub mod mock;

pub use backend::{
    executable_name, AudioBackend, Envelope, EventSink, SessionControl, Subscription,
};
pub use device::{
    mute_label, to_percent, Adjustment, AudioError, AudioEvent, DeviceRole, DeviceState,
    Direction, EndpointInfo, MuteAction, SessionState, VolumeState,
};
#[cfg(windows)]
pub use enumerator::{ComGuard, WasapiBackend};
