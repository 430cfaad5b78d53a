//! Endpoint volume control and change notifications.
//!
//! Wraps IAudioEndpointVolume for reads and writes, and registers an
//! IAudioEndpointVolumeCallback that forwards changes to the event sink.

use super::backend::{EventSink, Subscription};
use super::device::{AudioError, AudioEvent, VolumeState};
use super::enumerator::{Agile, ComGuard};
use windows::core::implement;
use windows::Win32::Media::Audio::Endpoints::{
    IAudioEndpointVolume, IAudioEndpointVolumeCallback, IAudioEndpointVolumeCallback_Impl,
};
use windows::Win32::Media::Audio::{IMMDevice, AUDIO_VOLUME_NOTIFICATION_DATA};
use windows::Win32::System::Com::CLSCTX_ALL;
// Re-export windows_core so the implement macro can find it
#[allow(unused_imports)]
use windows_core;

/// Volume controller for a specific device.
pub struct VolumeController {
    endpoint_volume: IAudioEndpointVolume,
}

impl VolumeController {
    /// Create a new VolumeController for the given device.
    pub fn new(device: &IMMDevice) -> Result<Self, AudioError> {
        unsafe {
            let endpoint_volume: IAudioEndpointVolume = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|_| AudioError::VolumeNotAvailable)?;

            Ok(Self { endpoint_volume })
        }
    }

    pub fn get_mute(&self) -> Result<bool, AudioError> {
        unsafe {
            let muted = self
                .endpoint_volume
                .GetMute()
                .map_err(AudioError::WindowsError)?;
            Ok(muted.as_bool())
        }
    }

    pub fn set_mute(&self, muted: bool) -> Result<(), AudioError> {
        unsafe {
            self.endpoint_volume
                .SetMute(muted, std::ptr::null())
                .map_err(AudioError::WindowsError)
        }
    }

    /// Get the current volume level (0.0 to 1.0).
    pub fn get_volume(&self) -> Result<f32, AudioError> {
        unsafe {
            self.endpoint_volume
                .GetMasterVolumeLevelScalar()
                .map_err(AudioError::WindowsError)
        }
    }

    /// Set the volume level, clamped to 0.0..=1.0.
    pub fn set_volume(&self, level: f32) -> Result<(), AudioError> {
        let level = level.clamp(0.0, 1.0);
        unsafe {
            self.endpoint_volume
                .SetMasterVolumeLevelScalar(level, std::ptr::null())
                .map_err(AudioError::WindowsError)
        }
    }

    pub fn state(&self) -> Result<VolumeState, AudioError> {
        Ok(VolumeState::new(self.get_volume()?, self.get_mute()?))
    }
}

/// Forwards endpoint volume notifications for one device.
#[implement(IAudioEndpointVolumeCallback)]
struct EndpointVolumeCallback {
    device_id: String,
    sink: EventSink,
}

impl IAudioEndpointVolumeCallback_Impl for EndpointVolumeCallback_Impl {
    fn OnNotify(&self, pnotify: *mut AUDIO_VOLUME_NOTIFICATION_DATA) -> windows::core::Result<()> {
        // SAFETY: the OS passes a valid pointer for the duration of the call.
        if let Some(data) = unsafe { pnotify.as_ref() } {
            self.sink.post(AudioEvent::EndpointVolumeChanged {
                device_id: self.device_id.clone(),
                state: VolumeState::new(data.fMasterVolume, data.bMuted.as_bool()),
            });
        }
        Ok(())
    }
}

/// Register a volume callback on `device`. Dropping the returned handle
/// unregisters it.
pub fn watch(
    device: &IMMDevice,
    device_id: &str,
    sink: EventSink,
) -> Result<Subscription, AudioError> {
    let controller = VolumeController::new(device)?;
    let callback: IAudioEndpointVolumeCallback = EndpointVolumeCallback {
        device_id: device_id.to_string(),
        sink,
    }
    .into();

    unsafe {
        controller
            .endpoint_volume
            .RegisterControlChangeNotify(&callback)
            .map_err(AudioError::WindowsError)?;
    }

    let held = Agile::new((controller.endpoint_volume, callback));
    Ok(Subscription::new(format!("endpoint:{}", device_id), move || {
        let _com = ComGuard::new();
        let (endpoint_volume, callback) = held.into_inner();
        unsafe {
            if let Err(e) = endpoint_volume.UnregisterControlChangeNotify(&callback) {
                tracing::debug!("UnregisterControlChangeNotify failed: {}", e);
            }
        }
    }))
}
