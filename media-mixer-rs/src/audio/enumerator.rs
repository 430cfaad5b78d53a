//! Device enumeration using Windows MMDevice API.
//!
//! Provides COM initialization, device enumeration and the WASAPI
//! implementation of [`AudioBackend`].

use super::backend::{AudioBackend, EventSink, SessionControl, Subscription};
use super::device::{AudioError, DeviceRole, Direction, EndpointInfo, VolumeState};
use super::{notifications, policy, session, volume};
use crate::platform::{focus, process};
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Devices::Properties::DEVPKEY_Device_FriendlyName;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Media::Audio::{
    eCapture, eCommunications, eConsole, eMultimedia, eRender, EDataFlow, ERole, IMMDevice,
    IMMDeviceEnumerator, MMDeviceEnumerator, DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL,
    COINIT_MULTITHREADED, STGM,
};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

/// COM initialization guard that uninitializes COM on drop.
pub struct ComGuard {
    initialized: bool,
}

impl ComGuard {
    /// Join the multithreaded apartment for the current thread.
    pub fn new() -> Result<Self, AudioError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            // Thread already lives in an STA; use it as is.
            return Ok(Self { initialized: false });
        }
        hr.ok().map_err(AudioError::ComInitFailed)?;
        Ok(Self { initialized: true })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// Run `f` with COM initialized on the calling thread.
pub fn with_com<T>(f: impl FnOnce() -> Result<T, AudioError>) -> Result<T, AudioError> {
    let _com = ComGuard::new()?;
    f()
}

/// Carries a free-threaded COM pointer to another thread.
pub(crate) struct Agile<T>(T);

// SAFETY: only used for WASAPI objects, which are free-threaded, and only
// dereferenced from threads that joined the MTA.
unsafe impl<T> Send for Agile<T> {}

impl<T> Agile<T> {
    pub(crate) fn new(inner: T) -> Self {
        Self(inner)
    }

    pub(crate) fn into_inner(self) -> T {
        self.0
    }
}

pub(crate) fn data_flow(direction: Direction) -> EDataFlow {
    match direction {
        Direction::Output => eRender,
        Direction::Input => eCapture,
    }
}

pub(crate) fn direction_of(flow: EDataFlow) -> Option<Direction> {
    if flow == eRender {
        Some(Direction::Output)
    } else if flow == eCapture {
        Some(Direction::Input)
    } else {
        None
    }
}

pub(crate) fn erole(role: DeviceRole) -> ERole {
    match role {
        DeviceRole::Console => eConsole,
        DeviceRole::Multimedia => eMultimedia,
        DeviceRole::Communications => eCommunications,
    }
}

/// Null-terminated UTF-16 copy of `s`.
pub(crate) fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Take ownership of a COM-allocated string.
pub(crate) unsafe fn take_pwstr(value: PWSTR) -> Result<String, AudioError> {
    let result = value
        .to_string()
        .map_err(|e| AudioError::StringConversion(e.to_string()));
    CoTaskMemFree(Some(value.0 as *const _));
    result
}

/// Device enumerator using Windows MMDevice API.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    /// Create a new DeviceEnumerator.
    ///
    /// Note: COM must be initialized before calling this function.
    pub fn new() -> Result<Self, AudioError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .map_err(AudioError::EnumerationFailed)?;

            Ok(Self { enumerator })
        }
    }

    /// Get all active endpoints for a direction.
    pub fn endpoints(&self, direction: Direction) -> Result<Vec<EndpointInfo>, AudioError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(data_flow(direction), DEVICE_STATE_ACTIVE)
                .map_err(AudioError::EnumerationFailed)?;

            let count = collection
                .GetCount()
                .map_err(AudioError::EnumerationFailed)?;

            let mut endpoints = Vec::with_capacity(count as usize);

            for i in 0..count {
                let device = collection.Item(i).map_err(AudioError::EnumerationFailed)?;
                match self.describe(&device, direction) {
                    Ok(info) => endpoints.push(info),
                    Err(e) => tracing::debug!("Skipping unreadable endpoint: {}", e),
                }
            }

            Ok(endpoints)
        }
    }

    /// Get a specific device by ID.
    pub fn device(&self, device_id: &str) -> Result<IMMDevice, AudioError> {
        let wide = to_wide(device_id);
        unsafe {
            self.enumerator
                .GetDevice(PCWSTR::from_raw(wide.as_ptr()))
                .map_err(|_| AudioError::DeviceNotFound {
                    device_id: device_id.to_string(),
                })
        }
    }

    /// Get the default device for a direction and role.
    pub fn default_device(
        &self,
        direction: Direction,
        role: DeviceRole,
    ) -> Result<IMMDevice, AudioError> {
        unsafe {
            self.enumerator
                .GetDefaultAudioEndpoint(data_flow(direction), erole(role))
                .map_err(|_| AudioError::NoDefaultDevice)
        }
    }

    /// Get the default device ID for a direction and role.
    pub fn default_device_id(
        &self,
        direction: Direction,
        role: DeviceRole,
    ) -> Result<Option<String>, AudioError> {
        let device = match self.default_device(direction, role) {
            Ok(d) => d,
            Err(_) => return Ok(None),
        };
        device_id(&device).map(Some)
    }

    /// Get the raw IMMDeviceEnumerator for notification registration.
    pub fn raw_enumerator(&self) -> &IMMDeviceEnumerator {
        &self.enumerator
    }

    fn describe(
        &self,
        device: &IMMDevice,
        direction: Direction,
    ) -> Result<EndpointInfo, AudioError> {
        let id = device_id(device)?;
        let name = unsafe {
            let props: IPropertyStore = device
                .OpenPropertyStore(STGM(0))
                .map_err(AudioError::EnumerationFailed)?;
            friendly_name(&props).unwrap_or_else(|| "Unknown".to_string())
        };
        Ok(EndpointInfo::new(id, name, direction))
    }
}

pub(crate) fn device_id(device: &IMMDevice) -> Result<String, AudioError> {
    unsafe {
        let id = device.GetId().map_err(AudioError::EnumerationFailed)?;
        take_pwstr(id)
    }
}

/// Get the friendly name of a device from its property store.
fn friendly_name(props: &IPropertyStore) -> Option<String> {
    unsafe {
        // Convert DEVPROPKEY to PROPERTYKEY
        let key = PROPERTYKEY {
            fmtid: DEVPKEY_Device_FriendlyName.fmtid,
            pid: DEVPKEY_Device_FriendlyName.pid,
        };

        let prop = props.GetValue(&key).ok()?;

        // Use the Display trait to get the string value
        let s = prop.to_string();
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    }
}

/// [`AudioBackend`] backed by WASAPI.
///
/// Holds no COM state of its own; each call opens a fresh enumerator inside
/// a COM scope.
#[derive(Debug, Default)]
pub struct WasapiBackend;

impl WasapiBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for WasapiBackend {
    fn endpoints(&self, direction: Direction) -> Result<Vec<EndpointInfo>, AudioError> {
        with_com(|| DeviceEnumerator::new()?.endpoints(direction))
    }

    fn default_endpoint(
        &self,
        direction: Direction,
        role: DeviceRole,
    ) -> Result<Option<String>, AudioError> {
        with_com(|| DeviceEnumerator::new()?.default_device_id(direction, role))
    }

    fn endpoint_volume(&self, device_id: &str) -> Result<VolumeState, AudioError> {
        with_com(|| {
            let device = DeviceEnumerator::new()?.device(device_id)?;
            volume::VolumeController::new(&device)?.state()
        })
    }

    fn set_endpoint_volume(&self, device_id: &str, level: f32) -> Result<(), AudioError> {
        with_com(|| {
            let device = DeviceEnumerator::new()?.device(device_id)?;
            volume::VolumeController::new(&device)?.set_volume(level)
        })
    }

    fn set_endpoint_mute(&self, device_id: &str, muted: bool) -> Result<(), AudioError> {
        with_com(|| {
            let device = DeviceEnumerator::new()?.device(device_id)?;
            volume::VolumeController::new(&device)?.set_mute(muted)
        })
    }

    fn set_default_endpoint(&self, device_id: &str, role: DeviceRole) -> Result<(), AudioError> {
        with_com(|| policy::set_default_device(device_id, role))
    }

    fn sessions(&self) -> Result<Vec<Box<dyn SessionControl>>, AudioError> {
        with_com(|| {
            let device =
                DeviceEnumerator::new()?.default_device(Direction::Output, DeviceRole::Multimedia)?;
            session::sessions_on(&device)
        })
    }

    fn set_app_endpoint(
        &self,
        process_name: &str,
        direction: Direction,
        device_id: Option<&str>,
    ) -> Result<(), AudioError> {
        let mut pids: Vec<u32> = self
            .sessions()?
            .iter()
            .filter(|s| s.process_name().eq_ignore_ascii_case(process_name))
            .map(|s| s.process_id())
            .collect();
        pids.sort_unstable();
        pids.dedup();
        if pids.is_empty() {
            return Err(AudioError::SessionNotFound {
                process_name: process_name.to_string(),
            });
        }
        with_com(|| {
            pids.iter()
                .try_for_each(|pid| policy::set_app_endpoint(*pid, direction, device_id))
        })
    }

    fn watch_endpoint(
        &self,
        device_id: &str,
        sink: EventSink,
    ) -> Result<Subscription, AudioError> {
        with_com(|| {
            let device = DeviceEnumerator::new()?.device(device_id)?;
            volume::watch(&device, device_id, sink)
        })
    }

    fn watch_topology(&self, sink: EventSink) -> Result<Subscription, AudioError> {
        with_com(|| notifications::watch(DeviceEnumerator::new()?, sink))
    }

    fn watch_session_creation(&self, sink: EventSink) -> Result<Subscription, AudioError> {
        with_com(|| {
            let device =
                DeviceEnumerator::new()?.default_device(Direction::Output, DeviceRole::Multimedia)?;
            session::watch_creation(&device, sink)
        })
    }

    fn watch_foreground(
        &self,
        on_change: Box<dyn Fn(String) + Send>,
    ) -> Result<Subscription, AudioError> {
        focus::spawn(on_change)
    }

    fn foreground_executable(&self) -> Option<String> {
        process::foreground_executable()
    }
}
