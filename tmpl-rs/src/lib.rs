//! # tmpl-rs
//!
//! A Jinja template plugin for pluggable Rust web applications.
//!
//! This is the meta-crate that re-exports all sub-crates for convenient access.
//! You can depend on `tmpl-rs` to get everything, or depend on individual
//! crates for finer-grained control.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tmpl_rs::prelude::*;
//!
//! # async fn run() -> TmplResult<()> {
//! let settings = tmpl_rs::core::settings_loader::from_file("settings.toml")?;
//! tmpl_rs::core::logging::setup_logging(&settings);
//!
//! let app = Application::new(settings);
//! let jinja = app.install(Arc::new(JinjaPlugin::new()))?;
//! let html = jinja.render("index.html", Context::new()).await?;
//! # let _ = html;
//! # Ok(())
//! # }
//! ```

/// Core types, settings, the application and its plugin registry, and error types.
pub use tmpl_rs_core as core;

/// Ordered observer lists with scoped receivers.
#[cfg(feature = "signals")]
pub use tmpl_rs_signals as signals;

/// The Jinja template plugin.
#[cfg(feature = "jinja")]
pub use tmpl_rs_jinja as jinja;

/// Third-party crates re-exported for convenience.
pub use async_trait;
pub use serde;
pub use serde_json;
pub use tracing;
pub use tracing_subscriber;

/// The types most applications need.
pub mod prelude {
    pub use tmpl_rs_core::{Application, Plugin, Settings, TmplError, TmplResult};

    #[cfg(feature = "jinja")]
    pub use tmpl_rs_jinja::{
        context_from, Context, ContextProvider, JinjaPlugin, TemplateRef, Value,
    };
}
