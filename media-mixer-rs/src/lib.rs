//! Windows Media Mixer - Library
//!
//! A Touch Portal plugin that mirrors Windows audio onto the panel and lets
//! the panel control it.
//!
//! ## Features
//!
//! - Per-application volume, mute and active states for every audio session
//! - Output and input device volume, mute and default-device states
//! - Sliders bound to apps, "Current app", master volume and single devices
//! - Default device switching and toggling for both Default and
//!   Communications roles
//! - Per-application output and input device routing
//! - Foreground application tracking
//! - User-configurable process ignore list

pub mod app;
pub mod audio;
pub mod config;
pub mod logging;
pub mod mixer;
#[cfg(windows)]
pub mod platform;
pub mod schema;

pub use app::MixerApp;
pub use audio::{AudioBackend, AudioError, AudioEvent, Direction};
pub use config::{Cli, PluginSettings};
