//! Device change notifications using IMMNotificationClient.
//!
//! Implements callbacks for device state changes, additions, removals and
//! default device changes for both directions.

use super::backend::{EventSink, Subscription};
use super::device::{AudioError, AudioEvent, DeviceRole, DeviceState};
use super::enumerator::{direction_of, Agile, ComGuard, DeviceEnumerator};
use windows::core::{implement, PCWSTR};
use windows::Win32::Media::Audio::{
    eCommunications, eConsole, EDataFlow, ERole, IMMNotificationClient,
    IMMNotificationClient_Impl, DEVICE_STATE,
};
use windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY;
// Re-export windows_core so the implement macro can find it
#[allow(unused_imports)]
use windows_core;

/// Notification client that posts topology events to the sink.
#[implement(IMMNotificationClient)]
pub struct DeviceNotificationClient {
    sink: EventSink,
}

impl DeviceNotificationClient {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }

    fn convert_role(role: ERole) -> DeviceRole {
        if role == eConsole {
            DeviceRole::Console
        } else if role == eCommunications {
            DeviceRole::Communications
        } else {
            DeviceRole::Multimedia
        }
    }

    fn convert_state(state: DEVICE_STATE) -> DeviceState {
        match state.0 {
            1 => DeviceState::Active,
            2 => DeviceState::Disabled,
            4 => DeviceState::NotPresent,
            8 => DeviceState::Unplugged,
            _ => DeviceState::NotPresent,
        }
    }
}

impl IMMNotificationClient_Impl for DeviceNotificationClient_Impl {
    fn OnDeviceStateChanged(
        &self,
        pwstrdeviceid: &PCWSTR,
        dwnewstate: DEVICE_STATE,
    ) -> windows::core::Result<()> {
        unsafe {
            if let Ok(id) = pwstrdeviceid.to_string() {
                self.sink.post(AudioEvent::DeviceStateChanged {
                    device_id: id,
                    new_state: DeviceNotificationClient::convert_state(dwnewstate),
                });
            }
        }
        Ok(())
    }

    fn OnDeviceAdded(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        unsafe {
            if let Ok(id) = pwstrdeviceid.to_string() {
                self.sink.post(AudioEvent::DeviceAdded { device_id: id });
            }
        }
        Ok(())
    }

    fn OnDeviceRemoved(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        unsafe {
            if let Ok(id) = pwstrdeviceid.to_string() {
                self.sink.post(AudioEvent::DeviceRemoved { device_id: id });
            }
        }
        Ok(())
    }

    fn OnDefaultDeviceChanged(
        &self,
        flow: EDataFlow,
        role: ERole,
        pwstrdefaultdeviceid: &PCWSTR,
    ) -> windows::core::Result<()> {
        let Some(direction) = direction_of(flow) else {
            return Ok(());
        };

        unsafe {
            let device_id = if pwstrdefaultdeviceid.is_null() {
                None
            } else {
                pwstrdefaultdeviceid.to_string().ok()
            };

            self.sink.post(AudioEvent::DefaultDeviceChanged {
                direction,
                role: DeviceNotificationClient::convert_role(role),
                device_id,
            });
        }
        Ok(())
    }

    fn OnPropertyValueChanged(
        &self,
        _pwstrdeviceid: &PCWSTR,
        _key: &PROPERTYKEY,
    ) -> windows::core::Result<()> {
        Ok(())
    }
}

/// Register the topology client. Dropping the handle unregisters it.
pub fn watch(enumerator: DeviceEnumerator, sink: EventSink) -> Result<Subscription, AudioError> {
    let client: IMMNotificationClient = DeviceNotificationClient::new(sink).into();
    unsafe {
        enumerator
            .raw_enumerator()
            .RegisterEndpointNotificationCallback(&client)
            .map_err(AudioError::WindowsError)?;
    }

    let held = Agile::new((enumerator, client));
    Ok(Subscription::new("topology", move || {
        let _com = ComGuard::new();
        let (enumerator, client) = held.into_inner();
        unsafe {
            if let Err(e) = enumerator
                .raw_enumerator()
                .UnregisterEndpointNotificationCallback(&client)
            {
                tracing::debug!("UnregisterEndpointNotificationCallback failed: {}", e);
            }
        }
    }))
}
