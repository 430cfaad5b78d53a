//! Application audio sessions.
//!
//! Enumerates sessions through IAudioSessionManager2 and wires
//! IAudioSessionEvents / IAudioSessionNotification into the event sink.

use super::backend::{executable_name, EventSink, SessionControl, Subscription};
use super::device::{AudioError, AudioEvent, SessionState, VolumeState};
use super::enumerator::{take_pwstr, Agile, ComGuard};
use crate::platform::process;
use windows::core::{implement, Interface, GUID, PCWSTR};
use windows::Win32::Foundation::BOOL;
use windows::Win32::Media::Audio::{
    AudioSessionDisconnectReason, AudioSessionState, AudioSessionStateActive,
    AudioSessionStateExpired, IAudioSessionControl, IAudioSessionControl2,
    IAudioSessionEvents, IAudioSessionEvents_Impl, IAudioSessionManager2,
    IAudioSessionNotification, IAudioSessionNotification_Impl, IMMDevice, ISimpleAudioVolume,
};
use windows::Win32::System::Com::CLSCTX_ALL;
// Re-export windows_core so the implement macro can find it
#[allow(unused_imports)]
use windows_core;

fn convert_state(state: AudioSessionState) -> SessionState {
    if state == AudioSessionStateActive {
        SessionState::Active
    } else if state == AudioSessionStateExpired {
        SessionState::Expired
    } else {
        SessionState::Inactive
    }
}

/// Pid and executable name of the process owning a session. `None` for the
/// system sounds session and for processes we cannot open.
fn owner(control: &IAudioSessionControl) -> Option<(u32, String)> {
    let control2: IAudioSessionControl2 = control.cast().ok()?;
    let pid = unsafe { control2.GetProcessId().ok()? };
    if pid == 0 {
        return None;
    }
    let path = process::executable_path(pid)?;
    Some((pid, executable_name(&path).to_string()))
}

fn instance_identifier(control: &IAudioSessionControl) -> Option<String> {
    let control2: IAudioSessionControl2 = control.cast().ok()?;
    unsafe {
        let id = control2.GetSessionInstanceIdentifier().ok()?;
        take_pwstr(id).ok()
    }
}

/// One session on the default output device.
pub struct WasapiSession {
    name: String,
    instance: String,
    pid: u32,
    control: IAudioSessionControl,
    volume: ISimpleAudioVolume,
}

// SAFETY: session interfaces are free-threaded; every call site joins the MTA.
unsafe impl Send for WasapiSession {}

impl WasapiSession {
    fn new(control: IAudioSessionControl) -> Option<Self> {
        let (pid, name) = owner(&control)?;
        let instance = instance_identifier(&control)?;
        let volume: ISimpleAudioVolume = control.cast().ok()?;
        Some(Self {
            name,
            instance,
            pid,
            control,
            volume,
        })
    }
}

impl SessionControl for WasapiSession {
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
        let _com = ComGuard::new()?;
        unsafe { self.volume.GetMasterVolume().map_err(AudioError::WindowsError) }
    }

    fn set_volume(&self, volume: f32) -> Result<(), AudioError> {
        let _com = ComGuard::new()?;
        unsafe {
            self.volume
                .SetMasterVolume(volume.clamp(0.0, 1.0), std::ptr::null())
                .map_err(AudioError::WindowsError)
        }
    }

    fn muted(&self) -> Result<bool, AudioError> {
        let _com = ComGuard::new()?;
        unsafe {
            self.volume
                .GetMute()
                .map(|m| m.as_bool())
                .map_err(AudioError::WindowsError)
        }
    }

    fn set_muted(&self, muted: bool) -> Result<(), AudioError> {
        let _com = ComGuard::new()?;
        unsafe {
            self.volume
                .SetMute(muted, std::ptr::null())
                .map_err(AudioError::WindowsError)
        }
    }

    fn state(&self) -> Result<SessionState, AudioError> {
        let _com = ComGuard::new()?;
        unsafe {
            self.control
                .GetState()
                .map(convert_state)
                .map_err(AudioError::WindowsError)
        }
    }

    fn watch(&self, sink: EventSink) -> Result<Subscription, AudioError> {
        let _com = ComGuard::new()?;
        let events: IAudioSessionEvents = SessionEventsClient {
            process_name: self.name.clone(),
            sink,
        }
        .into();

        unsafe {
            self.control
                .RegisterAudioSessionNotification(&events)
                .map_err(AudioError::WindowsError)?;
        }

        let held = Agile::new((self.control.clone(), events));
        Ok(Subscription::new(
            format!("session:{}", self.name.to_lowercase()),
            move || {
                let _com = ComGuard::new();
                let (control, events) = held.into_inner();
                unsafe {
                    if let Err(e) = control.UnregisterAudioSessionNotification(&events) {
                        tracing::debug!("UnregisterAudioSessionNotification failed: {}", e);
                    }
                }
            },
        ))
    }
}

/// Live sessions owned by named processes on `device`.
pub fn sessions_on(device: &IMMDevice) -> Result<Vec<Box<dyn SessionControl>>, AudioError> {
    unsafe {
        let manager: IAudioSessionManager2 = device
            .Activate(CLSCTX_ALL, None)
            .map_err(AudioError::WindowsError)?;
        let enumerator = manager
            .GetSessionEnumerator()
            .map_err(AudioError::WindowsError)?;
        let count = enumerator.GetCount().map_err(AudioError::WindowsError)?;

        let mut sessions: Vec<Box<dyn SessionControl>> = Vec::with_capacity(count.max(0) as usize);
        for i in 0..count {
            let control = match enumerator.GetSession(i) {
                Ok(control) => control,
                Err(e) => {
                    tracing::debug!("GetSession({}) failed: {}", i, e);
                    continue;
                }
            };
            if matches!(control.GetState(), Ok(state) if state == AudioSessionStateExpired) {
                continue;
            }
            if let Some(session) = WasapiSession::new(control) {
                sessions.push(Box::new(session));
            }
        }
        Ok(sessions)
    }
}

/// Forwards per-session volume and state changes.
#[implement(IAudioSessionEvents)]
struct SessionEventsClient {
    process_name: String,
    sink: EventSink,
}

impl IAudioSessionEvents_Impl for SessionEventsClient_Impl {
    fn OnDisplayNameChanged(
        &self,
        _newdisplayname: &PCWSTR,
        _eventcontext: *const GUID,
    ) -> windows::core::Result<()> {
        Ok(())
    }

    fn OnIconPathChanged(
        &self,
        _newiconpath: &PCWSTR,
        _eventcontext: *const GUID,
    ) -> windows::core::Result<()> {
        Ok(())
    }

    fn OnSimpleVolumeChanged(
        &self,
        newvolume: f32,
        newmute: BOOL,
        _eventcontext: *const GUID,
    ) -> windows::core::Result<()> {
        self.sink.post(AudioEvent::SessionVolumeChanged {
            process_name: self.process_name.clone(),
            state: VolumeState::new(newvolume, newmute.as_bool()),
        });
        Ok(())
    }

    fn OnChannelVolumeChanged(
        &self,
        _channelcount: u32,
        _newchannelvolumearray: *const f32,
        _changedchannel: u32,
        _eventcontext: *const GUID,
    ) -> windows::core::Result<()> {
        Ok(())
    }

    fn OnGroupingParamChanged(
        &self,
        _newgroupingparam: *const GUID,
        _eventcontext: *const GUID,
    ) -> windows::core::Result<()> {
        Ok(())
    }

    fn OnStateChanged(&self, newstate: AudioSessionState) -> windows::core::Result<()> {
        self.sink.post(AudioEvent::SessionStateChanged {
            process_name: self.process_name.clone(),
            state: convert_state(newstate),
        });
        Ok(())
    }

    fn OnSessionDisconnected(
        &self,
        _disconnectreason: AudioSessionDisconnectReason,
    ) -> windows::core::Result<()> {
        self.sink.post(AudioEvent::SessionStateChanged {
            process_name: self.process_name.clone(),
            state: SessionState::Expired,
        });
        Ok(())
    }
}

/// Reports sessions created after registration.
#[implement(IAudioSessionNotification)]
struct SessionCreatedClient {
    sink: EventSink,
}

impl IAudioSessionNotification_Impl for SessionCreatedClient_Impl {
    fn OnSessionCreated(
        &self,
        newsession: Option<&IAudioSessionControl>,
    ) -> windows::core::Result<()> {
        if let Some((_, process_name)) = newsession.and_then(owner) {
            self.sink.post(AudioEvent::SessionCreated { process_name });
        }
        Ok(())
    }
}

/// Register for new sessions on `device`. Dropping the handle unregisters.
pub fn watch_creation(device: &IMMDevice, sink: EventSink) -> Result<Subscription, AudioError> {
    unsafe {
        let manager: IAudioSessionManager2 = device
            .Activate(CLSCTX_ALL, None)
            .map_err(AudioError::WindowsError)?;
        let notification: IAudioSessionNotification = SessionCreatedClient { sink }.into();
        manager
            .RegisterSessionNotification(&notification)
            .map_err(AudioError::WindowsError)?;

        // Creation events only start flowing once the session list has been
        // enumerated at least once.
        let _ = manager.GetSessionEnumerator();

        let held = Agile::new((manager, notification));
        Ok(Subscription::new("session-created", move || {
            let _com = ComGuard::new();
            let (manager, notification) = held.into_inner();
            if let Err(e) = manager.UnregisterSessionNotification(&notification) {
                tracing::debug!("UnregisterSessionNotification failed: {}", e);
            }
        }))
    }
}
