//! Wire messages exchanged with Touch Portal.
//!
//! Every message is a single JSON object terminated by a newline and tagged
//! by its `type` field.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One `{ "id": ..., "value": ... }` entry of an action or connector payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataField {
    pub id: String,
    #[serde(default)]
    pub value: String,
}

/// Settings arrive as a list of single-key objects: `[{"Name": "value"}]`.
pub type SettingsList = Vec<HashMap<String, String>>;

/// Messages sent by Touch Portal to the plugin.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inbound {
    #[serde(rename_all = "camelCase")]
    Info {
        #[serde(default)]
        tp_version_string: Option<String>,
        #[serde(default)]
        plugin_version: Option<u32>,
        #[serde(default)]
        settings: SettingsList,
    },

    #[serde(rename_all = "camelCase")]
    Action {
        action_id: String,
        #[serde(default)]
        data: Vec<DataField>,
    },

    /// Button pressed on an action with hold functionality.
    #[serde(rename_all = "camelCase")]
    Down {
        action_id: String,
        #[serde(default)]
        data: Vec<DataField>,
    },

    /// Button released on an action with hold functionality.
    #[serde(rename_all = "camelCase")]
    Up {
        action_id: String,
        #[serde(default)]
        data: Vec<DataField>,
    },

    #[serde(rename_all = "camelCase")]
    ConnectorChange {
        connector_id: String,
        value: i64,
        #[serde(default)]
        data: Vec<DataField>,
    },

    #[serde(rename_all = "camelCase")]
    ListChange {
        action_id: String,
        list_id: String,
        #[serde(default)]
        instance_id: Option<String>,
        #[serde(default)]
        value: String,
    },

    Settings {
        #[serde(default)]
        values: SettingsList,
    },

    #[serde(rename_all = "camelCase")]
    ShortConnectorIdNotification {
        short_id: String,
        connector_id: String,
    },

    ClosePlugin,

    /// Anything this client does not interpret (broadcasts, notifications).
    #[serde(other)]
    Unknown,
}

/// Messages sent by the plugin to Touch Portal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    Pair {
        id: String,
    },

    StateUpdate {
        id: String,
        value: String,
    },

    #[serde(rename_all = "camelCase")]
    CreateState {
        id: String,
        desc: String,
        default_value: String,
        parent_group: String,
    },

    RemoveState {
        id: String,
    },

    #[serde(rename_all = "camelCase")]
    ChoiceUpdate {
        id: String,
        value: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        instance_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    ConnectorUpdate {
        short_id: String,
        value: u8,
    },
}

impl Outbound {
    /// Encode as a single newline-terminated line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Flatten a settings list into a single map. Later entries win.
pub fn flatten_settings(settings: &SettingsList) -> HashMap<String, String> {
    settings
        .iter()
        .flat_map(|entry| entry.iter())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
