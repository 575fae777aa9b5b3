//! # boxpilot-control
//!
//! Client for the running kernel's local control API: version and proxy
//! queries, proxy selection, and the newline-delimited JSON event streams
//! (`/logs`, `/memory`, `/traffic`).
//!
//! A [`Session`] ties the three streams to one kernel lifetime and fans them
//! out to any number of subscribers.

pub mod client;
pub mod error;
pub mod model;
pub mod session;
pub mod stream;

pub use client::{ControlClient, DEFAULT_CONTROLLER};
pub use error::ControlError;
pub use model::{
    DelayRecord, LogEvent, LogLevel, MemorySample, ProxyEntry, ProxyListing, TrafficSample,
    VersionInfo,
};
pub use session::{Readiness, Session, Telemetry, CHANNEL_CAPACITY};
pub use stream::EventStream;
