//! # boxpilot-service
//!
//! One facade over settings, config synthesis, the kernel supervisor and the
//! control API. Front ends call [`Service`] operations and render the
//! returned [`Report`].

mod error;
pub mod release;
mod report;
mod service;

pub use error::{ReleaseError, ServiceError};
pub use release::{InstalledKernel, ReleaseAsset, ReleaseManifest, Unpacker, ZipUnpacker};
pub use report::Report;
pub use service::{Service, ServiceBuilder};
