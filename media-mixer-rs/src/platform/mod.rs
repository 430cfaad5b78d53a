//! Platform-specific module for Windows utilities.
//!
//! Process identity lookups and the foreground window hook.

pub mod focus;
pub mod process;
