//! Default endpoint switching through the undocumented IPolicyConfig, and
//! per-application routing through IAudioPolicyConfigFactory.

use super::device::{AudioError, DeviceRole, Direction};
use super::enumerator::{data_flow, to_wide};
use std::ffi::c_void;
use windows::core::{
    h, IInspectable, IInspectable_Vtbl, IUnknown, IUnknown_Vtbl, GUID, HRESULT, HSTRING, PCWSTR,
};
use windows::Win32::Media::Audio::{eConsole, eMultimedia, EDataFlow, ERole};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL};
use windows::Win32::System::WinRT::RoGetActivationFactory;

/// IPolicyConfig COM interface (undocumented but stable)
/// Used to set the default audio device
#[windows::core::interface("F8679F50-850A-41CF-9C72-430F290290C8")]
pub unsafe trait IPolicyConfig: IUnknown {
    // Reserved methods to maintain vtable order
    fn reserved1(&self) -> HRESULT;
    fn reserved2(&self) -> HRESULT;
    fn reserved3(&self) -> HRESULT;
    fn reserved4(&self) -> HRESULT;
    fn reserved5(&self) -> HRESULT;
    fn reserved6(&self) -> HRESULT;
    fn reserved7(&self) -> HRESULT;
    fn reserved8(&self) -> HRESULT;
    fn reserved9(&self) -> HRESULT;
    fn reserved10(&self) -> HRESULT;

    fn SetDefaultEndpoint(&self, device_id: PCWSTR, role: u32) -> HRESULT;
}

// PolicyConfigClient CLSID
const CLSID_POLICY_CONFIG_CLIENT: GUID = GUID::from_u128(0x870af99c_171d_4f9e_af0d_e63df40c2bc9);

/// Make `device_id` the default endpoint for `role`.
///
/// COM must be initialized on the calling thread.
pub fn set_default_device(device_id: &str, role: DeviceRole) -> Result<(), AudioError> {
    unsafe {
        let policy_config: IPolicyConfig =
            CoCreateInstance(&CLSID_POLICY_CONFIG_CLIENT, None, CLSCTX_ALL)
                .map_err(AudioError::SetDefaultFailed)?;

        let wide = to_wide(device_id);
        policy_config
            .SetDefaultEndpoint(PCWSTR(wide.as_ptr()), role as u32)
            .ok()
            .map_err(AudioError::SetDefaultFailed)
    }
}

/// Activation factory of `Windows.Media.Internal.AudioPolicyConfig`
/// (Windows 10 21H2 and later). Only the persisted-endpoint methods are
/// called; the rest keep the vtable in order.
#[windows::core::interface("ab3d4648-e242-459f-b02f-541c70306324")]
pub unsafe trait IAudioPolicyConfigFactory: IInspectable {
    fn add_ctx_volume_change(&self) -> HRESULT;
    fn remove_ctx_volume_changed(&self) -> HRESULT;
    fn add_ringer_vibrate_state_changed(&self) -> HRESULT;
    fn remove_ringer_vibrate_state_change(&self) -> HRESULT;
    fn set_volume_group_gain_for_id(&self) -> HRESULT;
    fn get_volume_group_gain_for_id(&self) -> HRESULT;
    fn get_active_volume_group_for_endpoint_id(&self) -> HRESULT;
    fn get_volume_groups_for_endpoint(&self) -> HRESULT;
    fn get_current_volume_context(&self) -> HRESULT;
    fn set_volume_group_mute_for_id(&self) -> HRESULT;
    fn get_volume_group_mute_for_id(&self) -> HRESULT;
    fn set_ringer_vibrate_state(&self) -> HRESULT;
    fn get_ringer_vibrate_state(&self) -> HRESULT;
    fn set_preferred_chat_application(&self) -> HRESULT;
    fn reset_preferred_chat_application(&self) -> HRESULT;
    fn get_preferred_chat_application(&self) -> HRESULT;
    fn get_current_chat_applications(&self) -> HRESULT;
    fn add_chat_context_changed(&self) -> HRESULT;
    fn remove_chat_context_changed(&self) -> HRESULT;

    /// `device_id` is an HSTRING handle; null clears the route.
    fn SetPersistedDefaultAudioEndpoint(
        &self,
        process_id: u32,
        flow: EDataFlow,
        role: ERole,
        device_id: *mut c_void,
    ) -> HRESULT;
    fn GetPersistedDefaultAudioEndpoint(
        &self,
        process_id: u32,
        flow: EDataFlow,
        role: ERole,
        device_id: *mut *mut c_void,
    ) -> HRESULT;
    fn ClearAllPersistedApplicationDefaultEndpoints(&self) -> HRESULT;
}

const MMDEVAPI_TOKEN: &str = r"\\?\SWD#MMDEVAPI#";
const DEVINTERFACE_AUDIO_RENDER: &str = "#{e6327cad-dcec-4949-ae8a-991e976a79d2}";
const DEVINTERFACE_AUDIO_CAPTURE: &str = "#{2eef81be-33fa-4800-9670-1cd474972c3f}";

/// Device interface path the policy factory expects for an endpoint id.
pub fn interface_path(device_id: &str, direction: Direction) -> String {
    let suffix = match direction {
        Direction::Output => DEVINTERFACE_AUDIO_RENDER,
        Direction::Input => DEVINTERFACE_AUDIO_CAPTURE,
    };
    format!("{}{}{}", MMDEVAPI_TOKEN, device_id, suffix)
}

/// Route `process_id` to `device_id` for `direction`, or clear its route
/// when `device_id` is `None`.
///
/// COM must be initialized on the calling thread.
pub fn set_app_endpoint(
    process_id: u32,
    direction: Direction,
    device_id: Option<&str>,
) -> Result<(), AudioError> {
    let factory: IAudioPolicyConfigFactory = unsafe {
        RoGetActivationFactory(h!("Windows.Media.Internal.AudioPolicyConfig")).map_err(|e| {
            tracing::debug!("AudioPolicyConfig activation failed: {}", e);
            AudioError::Unsupported("per-application device routing")
        })?
    };

    let path = device_id
        .map(|id| HSTRING::from(interface_path(id, direction)))
        .unwrap_or_default();
    // SAFETY: HSTRING is a transparent wrapper around the handle pointer and
    // `path` outlives both calls.
    let handle: *mut c_void = unsafe { std::mem::transmute_copy(&path) };

    for role in [eConsole, eMultimedia] {
        unsafe {
            factory
                .SetPersistedDefaultAudioEndpoint(process_id, data_flow(direction), role, handle)
                .ok()
                .map_err(AudioError::WindowsError)?;
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
