//! Settings for a tmpl-rs application.
//!
//! This module provides the [`Settings`] struct holding application-wide
//! configuration plus one free-form option table per plugin. Plugins read their
//! own table (keyed by plugin name) during setup and merge it over their defaults.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Application-wide settings.
///
/// ```
/// use tmpl_rs_core::settings::Settings;
///
/// let blog = Settings::named("blog");
/// assert!(blog.debug && blog.plugins.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Shown by the `app` template global.
    pub name: String,
    /// Debug mode. Plugins use it as the default for reloading and tracing output.
    pub debug: bool,
    /// Default tracing filter directive, used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Option tables keyed by plugin name, e.g. `[plugins.jinja]`.
    pub plugins: HashMap<String, serde_json::Value>,

    /// Application-specific values tmpl-rs itself never reads.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: "tmpl-rs".to_string(),
            debug: true,
            log_level: "info".to_string(),
            plugins: HashMap::new(),
            extra: HashMap::new(),
        }
    }
}

impl Settings {
    /// Creates default settings for an application with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the option table configured for the plugin `name`, if any.
    pub fn plugin_options(&self, name: &str) -> Option<&serde_json::Value> {
        self.plugins.get(name)
    }

    /// Sets (replacing) the option table for the plugin `name`.
    #[must_use]
    pub fn with_plugin_options(mut self, name: impl Into<String>, options: serde_json::Value) -> Self {
        self.plugins.insert(name.into(), options);
        self
    }
}
