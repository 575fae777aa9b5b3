//! # boxpilot-synth
//!
//! Builds the kernel configuration from a fixed routing template and a
//! downloaded subscription.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use boxpilot_synth::{pipeline, SynthOptions, Template};
//!
//! fn write_config(subscription: &[u8]) {
//!     if let Ok(template) = Template::embedded() {
//!         let dest = std::path::Path::new("config.json");
//!         if let Ok(result) = pipeline::apply(&template, subscription, dest, &SynthOptions::default()) {
//!             println!("{} endpoints", result.appended.len());
//!         }
//!     }
//! }
//! ```

pub mod error;
pub mod model;
pub mod pipeline;
pub mod synthesize;
pub mod template;
pub mod writer;

pub use error::SynthError;
pub use model::{Inbound, KernelConfig, Outbound, SubscriptionDocument, TlsBlock};
pub use synthesize::{synthesize, synthesize_with, SynthOptions, Synthesis};
pub use template::{Template, DEFAULT_TEMPLATE};
