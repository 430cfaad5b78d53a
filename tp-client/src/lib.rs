//! Touch Portal plugin client.
//!
//! A small threaded client for the Touch Portal plugin API. It pairs over
//! TCP and decodes inbound events on a reader thread. Outbound state, choice
//! and connector updates are queued and written as newline-delimited JSON by
//! a writer thread.

pub mod client;
pub mod error;
pub mod message;

pub use client::{Client, DEFAULT_ADDR};
pub use error::ClientError;
pub use message::{flatten_settings, DataField, Inbound, Outbound, SettingsList};
