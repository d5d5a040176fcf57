//! Plugin configuration.
//!
//! [`JinjaConfig`] is assembled at setup time from three layers, later layers
//! winning key by key:
//!
//! 1. the defaults below,
//! 2. the application's `[plugins.<name>]` settings table,
//! 3. explicit options given to [`JinjaPluginBuilder`](crate::plugin::JinjaPluginBuilder).
//!
//! | Option | Default |
//! |---|---|
//! | `auto_reload` | `false` |
//! | `cache_size` | `50` |
//! | `extensions` | `[]` |
//! | `encoding` | `"utf-8"` |
//! | `template_folders` | `["templates"]` |
//! | `autoescape` | `false` |
//! | `undefined` | `"lenient"` |
//!
//! The `loader` override is not serialisable and is set on the builder only.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tmpl_rs_core::error::{TmplError, TmplResult};
use tmpl_rs_core::settings_loader::merge_json;

use crate::loaders::TemplateLoader;

/// The folder searched when no template folders are configured.
pub const DEFAULT_TEMPLATE_FOLDER: &str = "templates";

/// The default number of compiled templates kept in the environment.
pub const DEFAULT_CACHE_SIZE: usize = 50;

/// How undefined variables behave while rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndefinedPolicy {
    /// Undefined values render as empty strings and are falsy.
    #[default]
    Lenient,
    /// Attribute access on undefined values yields undefined instead of failing.
    Chainable,
    /// Any use of an undefined value fails the render.
    Strict,
}

impl From<UndefinedPolicy> for minijinja::UndefinedBehavior {
    fn from(policy: UndefinedPolicy) -> Self {
        match policy {
            UndefinedPolicy::Lenient => Self::Lenient,
            UndefinedPolicy::Chainable => Self::Chainable,
            UndefinedPolicy::Strict => Self::Strict,
        }
    }
}

/// Source file encodings understood by [`FileSystemLoader`](crate::loaders::FileSystemLoader).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8; invalid sequences fail the load.
    Utf8,
    /// ISO-8859-1; every byte maps to the code point of the same value.
    Latin1,
    /// 7-bit ASCII; bytes above 0x7f fail the load.
    Ascii,
}

impl Encoding {
    /// Parses an encoding label such as `"utf-8"` or `"latin-1"` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns `ImproperlyConfigured` for unsupported labels.
    pub fn from_label(label: &str) -> TmplResult<Self> {
        match label.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" => Ok(Self::Latin1),
            "ascii" | "us-ascii" => Ok(Self::Ascii),
            other => Err(TmplError::ImproperlyConfigured(format!(
                "Unsupported template encoding '{other}'"
            ))),
        }
    }

    /// Decodes raw template bytes.
    pub fn decode(self, bytes: Vec<u8>) -> Result<String, String> {
        match self {
            Self::Utf8 => String::from_utf8(bytes).map_err(|e| e.to_string()),
            Self::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
            Self::Ascii => {
                if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
                    return Err(format!("non-ASCII byte at offset {pos}"));
                }
                // All bytes are ASCII, so this cannot fail.
                String::from_utf8(bytes).map_err(|e| e.to_string())
            }
        }
    }
}

/// The resolved configuration of a [`JinjaPlugin`](crate::plugin::JinjaPlugin).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JinjaConfig {
    /// Recompile templates whose source changed since they were loaded.
    pub auto_reload: bool,
    /// How many compiled templates to keep; `0` disables caching.
    pub cache_size: usize,
    /// Extension identifiers installed into the environment, in order.
    pub extensions: Vec<String>,
    /// Encoding of template files read by the default loader.
    pub encoding: String,
    /// Folders searched by the default loader, first match wins.
    pub template_folders: Vec<PathBuf>,
    /// HTML-escape every rendered expression.
    pub autoescape: bool,
    /// Undefined variable handling.
    pub undefined: UndefinedPolicy,
    /// A pre-built loader replacing the default file-system loader.
    #[serde(skip)]
    pub loader: Option<Arc<dyn TemplateLoader>>,
}

impl Default for JinjaConfig {
    fn default() -> Self {
        Self {
            auto_reload: false,
            cache_size: DEFAULT_CACHE_SIZE,
            extensions: Vec::new(),
            encoding: "utf-8".to_string(),
            template_folders: vec![PathBuf::from(DEFAULT_TEMPLATE_FOLDER)],
            autoescape: false,
            undefined: UndefinedPolicy::default(),
            loader: None,
        }
    }
}

impl fmt::Debug for JinjaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JinjaConfig")
            .field("auto_reload", &self.auto_reload)
            .field("cache_size", &self.cache_size)
            .field("extensions", &self.extensions)
            .field("encoding", &self.encoding)
            .field("template_folders", &self.template_folders)
            .field("autoescape", &self.autoescape)
            .field("undefined", &self.undefined)
            .field("loader", &self.loader.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

impl JinjaConfig {
    /// Builds the configuration from the application table and explicit overrides.
    ///
    /// Both layers are JSON objects keyed by option name. An empty
    /// `template_folders` list falls back to the default folder, and duplicate
    /// extension identifiers are dropped keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if a layer has the wrong shape or types,
    /// and `ImproperlyConfigured` for an unsupported encoding.
    pub fn resolve(
        app_options: Option<&serde_json::Value>,
        overrides: &serde_json::Map<String, serde_json::Value>,
    ) -> TmplResult<Self> {
        let mut merged = serde_json::to_value(Self::default()).map_err(|e| {
            TmplError::ConfigurationError(format!("Failed to serialize default plugin config: {e}"))
        })?;

        if let Some(options) = app_options {
            if !options.is_object() {
                return Err(TmplError::ConfigurationError(
                    "Plugin settings table must be an object".to_string(),
                ));
            }
            merged = merge_json(merged, options.clone());
        }
        merged = merge_json(merged, serde_json::Value::Object(overrides.clone()));

        let mut config: Self = serde_json::from_value(merged).map_err(|e| {
            TmplError::ConfigurationError(format!("Invalid plugin configuration: {e}"))
        })?;
        config.normalize()?;
        Ok(config)
    }

    /// Returns the parsed [`Encoding`].
    ///
    /// # Errors
    ///
    /// Returns `ImproperlyConfigured` for an unsupported encoding label.
    pub fn encoding(&self) -> TmplResult<Encoding> {
        Encoding::from_label(&self.encoding)
    }

    fn normalize(&mut self) -> TmplResult<()> {
        if self.template_folders.is_empty() {
            self.template_folders = vec![PathBuf::from(DEFAULT_TEMPLATE_FOLDER)];
        }

        let mut seen = std::collections::HashSet::new();
        self.extensions.retain(|ext| seen.insert(ext.clone()));

        self.encoding()?;
        Ok(())
    }
}
