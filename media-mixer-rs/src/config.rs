//! Configuration.
//!
//! Command-line options for the plugin process, and the typed form of the
//! settings Touch Portal sends on connect and whenever the user edits them.

use crate::schema;
use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tp_client::{flatten_settings, SettingsList};

/// Touch Portal plugin bridging Windows per-app and device audio.
#[derive(Parser, Debug, Clone)]
#[command(name = "media-mixer-rs", version, about, long_about = None)]
pub struct Cli {
    /// Use debug logging.
    #[arg(short = 'd', conflicts_with_all = ["warnings", "quiet"])]
    pub debug: bool,

    /// Only log warnings and errors.
    #[arg(short = 'w', conflicts_with = "quiet")]
    pub warnings: bool,

    /// Disable all logging (quiet).
    #[arg(short = 'q')]
    pub quiet: bool,

    /// Log to this file (default is stdout).
    #[arg(short = 'l', value_name = "LOGFILE")]
    pub log_file: Option<PathBuf>,

    /// If logging to file, also output to stdout.
    #[arg(short = 's')]
    pub stdout: bool,

    /// Touch Portal host.
    #[arg(long, env = "TP_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Touch Portal plugin port.
    #[arg(long, env = "TP_PORT", default_value_t = 12136)]
    pub port: u16,
}

impl Cli {
    /// `host:port` of the Touch Portal socket.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Default log level selected by the flags.
    pub fn level(&self) -> Option<tracing::Level> {
        if self.quiet {
            None
        } else if self.debug {
            Some(tracing::Level::DEBUG)
        } else if self.warnings {
            Some(tracing::Level::WARN)
        } else {
            Some(tracing::Level::INFO)
        }
    }
}

/// Settings the plugin understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    IgnoreList,
}

impl SettingKey {
    pub const ALL: [SettingKey; 1] = [SettingKey::IgnoreList];

    /// Display name used as the key on the wire.
    pub fn name(self) -> &'static str {
        match self {
            SettingKey::IgnoreList => schema::settings::IGNORE_LIST,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }
}

/// Executable names excluded from tracking. Case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    names: BTreeSet<String>,
}

impl IgnoreList {
    /// Parse the free-text setting.
    ///
    /// Names are split on ".exe" so both "a.exe, b.exe" and "a.exeb.exe"
    /// work. The shipped placeholder text means an empty list.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw == schema::settings::IGNORE_LIST_PLACEHOLDER {
            return Self::default();
        }

        let names = raw
            .to_lowercase()
            .split(".exe")
            .map(|part| part.replace(',', "").trim().to_string())
            .filter(|part| !part.is_empty())
            .map(|part| format!("{}.exe", part))
            .collect();
        Self { names }
    }

    pub fn contains(&self, process_name: &str) -> bool {
        self.names.contains(&process_name.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Typed plugin settings. Fields are `None` when the update did not carry
/// that setting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginSettings {
    pub ignore_list: Option<IgnoreList>,
}

impl PluginSettings {
    pub fn from_list(list: &SettingsList) -> Self {
        let mut settings = Self::default();
        for (name, value) in flatten_settings(list) {
            match SettingKey::from_name(&name) {
                Some(SettingKey::IgnoreList) => {
                    settings.ignore_list = Some(IgnoreList::parse(&value));
                }
                None => tracing::debug!("Ignoring unknown setting {:?}", name),
            }
        }
        settings
    }
}

// ============================================================================
// Tests
// ============================================================================
