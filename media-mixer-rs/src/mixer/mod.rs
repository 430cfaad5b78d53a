//! Mixer core.
//!
//! Keeps the panel's view of Windows audio in sync: the endpoint catalog,
//! per-application sessions, native subscriptions, the reconciler that turns
//! OS events into outward state, and the foreground-app tracker.

pub mod focus;
pub mod publisher;
pub mod reconciler;
pub mod registry;
pub mod sessions;
pub mod subscriptions;

pub use focus::ForegroundTracker;
pub use publisher::{Remote, StatePublisher};
pub use reconciler::{NotificationHandler, Reconciler};
pub use registry::{DefaultDevicePointers, EndpointRegistry};
pub use sessions::{SessionSnapshot, SessionTracker};
pub use subscriptions::{Refresher, SubscriptionManager};
