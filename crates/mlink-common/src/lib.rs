//! ---
//! mlink_section: "01-core-functionality"
//! mlink_subsection: "module"
//! mlink_type: "source"
//! mlink_scope: "code"
//! mlink_description: "Shared primitives for processes embedding the M-Link bridge."
//! mlink_version: "v0.0.0-prealpha"
//! mlink_owner: "tbd"
//! ---
//! Shared primitives for the M-Link workspace.
//! This crate exposes configuration loading and logging bootstrap
//! utilities consumed by the engine- and platform-side processes.
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub use config::{AppConfig, LoadedAppConfig, LoggingConfig, MessagingConfig, MetricsConfig};
pub use logging::{init_tracing, LogFormat};
