//! # tmpl-rs-core
//!
//! Core types, settings, the application object and its plugin registry, and the
//! error types for the tmpl-rs workspace. Every other crate builds on this one.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Application settings and per-plugin option tables
//! - [`settings_loader`] - Loading settings from TOML/JSON files and the environment
//! - [`apps`] - The hosting application and its plugin registry
//! - [`logging`] - Tracing-based logging integration

pub mod apps;
pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use apps::{Application, Plugin};
pub use error::{TmplError, TmplResult};
pub use settings::Settings;
