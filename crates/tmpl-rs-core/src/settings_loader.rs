//! Loading [`Settings`] from files and the environment.
//!
//! Settings are built in layers, each one deep-merged over the previous:
//!
//! 1. [`Settings::default`],
//! 2. a TOML or JSON document,
//! 3. `TMPL_*` environment variables.
//!
//! | Env Var | Setting |
//! |---|---|
//! | `TMPL_NAME` | `name` |
//! | `TMPL_DEBUG` | `debug` (`true`/`1`/`yes`/`on` are true) |
//! | `TMPL_LOG_LEVEL` | `log_level` |
//! | `TMPL_PLUGINS__<PLUGIN>__<OPTION>` | `plugins.<plugin>.<option>` |
//!
//! Plugin option values are parsed as JSON when possible (`10`, `true`,
//! `["a","b"]`) and kept as strings otherwise. Plugin and option names are
//! lowercased.
//!
//! ```rust,no_run
//! use tmpl_rs_core::settings_loader;
//!
//! let settings = settings_loader::from_file_with_env("config/settings.toml")?;
//! # Ok::<(), tmpl_rs_core::TmplError>(())
//! ```

use std::path::Path;

use serde_json::Value;

use crate::error::{TmplError, TmplResult};
use crate::settings::Settings;

const ENV_PREFIX: &str = "TMPL_";
const PLUGIN_ENV_PREFIX: &str = "TMPL_PLUGINS__";

/// A settings document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// TOML, with plugin tables under `[plugins.<name>]`.
    Toml,
    /// JSON, with plugin tables under `"plugins": {"<name>": {...}}`.
    Json,
}

impl Format {
    /// Picks the format from a file extension (`.toml` or `.json`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for any other extension.
    pub fn from_path(path: &Path) -> TmplResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(Self::Toml),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Self::Json),
            _ => Err(TmplError::ConfigurationError(format!(
                "Cannot tell the settings format of '{}'; use a .toml or .json file",
                path.display()
            ))),
        }
    }

    fn parse(self, content: &str) -> TmplResult<Value> {
        match self {
            Self::Toml => toml::from_str::<toml::Value>(content)
                .map(toml_to_json)
                .map_err(|e| TmplError::ConfigurationError(format!("Failed to parse TOML: {e}"))),
            Self::Json => serde_json::from_str(content)
                .map_err(|e| TmplError::ConfigurationError(format!("Failed to parse JSON: {e}"))),
        }
    }
}

/// Parses a settings document; missing fields keep their defaults.
///
/// # Errors
///
/// Returns `ConfigurationError` if the document is malformed or has wrong types.
pub fn from_str(content: &str, format: Format) -> TmplResult<Settings> {
    let document = format.parse(content)?;
    let defaults = serde_json::to_value(Settings::default())
        .map_err(|e| TmplError::ConfigurationError(format!("Failed to serialize defaults: {e}")))?;

    serde_json::from_value(merge_json(defaults, document)).map_err(|e| {
        TmplError::ConfigurationError(format!("Invalid {format:?} settings: {e}"))
    })
}

/// Shorthand for [`from_str`] with [`Format::Toml`].
///
/// # Errors
///
/// See [`from_str`].
pub fn from_toml_str(content: &str) -> TmplResult<Settings> {
    from_str(content, Format::Toml)
}

/// Shorthand for [`from_str`] with [`Format::Json`].
///
/// # Errors
///
/// See [`from_str`].
pub fn from_json_str(content: &str) -> TmplResult<Settings> {
    from_str(content, Format::Json)
}

/// Reads a `.toml` or `.json` settings file.
///
/// # Errors
///
/// Returns `ConfigurationError` if the file cannot be read, has an unknown
/// extension, or is malformed.
pub fn from_file(path: impl AsRef<Path>) -> TmplResult<Settings> {
    let path = path.as_ref();
    let format = Format::from_path(path)?;
    let content = std::fs::read_to_string(path).map_err(|e| {
        TmplError::ConfigurationError(format!("Failed to read '{}': {e}", path.display()))
    })?;
    from_str(&content, format)
}

/// Reads a settings file, then applies `TMPL_*` environment overrides.
///
/// # Errors
///
/// See [`from_file`].
pub fn from_file_with_env(path: impl AsRef<Path>) -> TmplResult<Settings> {
    let mut settings = from_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults with `TMPL_*` environment overrides applied.
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies overrides from the process environment.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides(settings, std::env::vars());
}

/// Applies overrides from `vars`; names outside the `TMPL_` namespace are ignored.
pub fn apply_overrides<I, K, V>(settings: &mut Settings, vars: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    for (key, value) in vars {
        let key = key.as_ref();
        if !key.starts_with(ENV_PREFIX) {
            continue;
        }
        let value = value.into();

        if let Some(path) = key.strip_prefix(PLUGIN_ENV_PREFIX) {
            let Some((plugin, option)) = path.split_once("__") else {
                tracing::warn!(var = %key, "Ignoring plugin override without an option name");
                continue;
            };
            let table = settings
                .plugins
                .entry(plugin.to_lowercase())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Value::Object(options) = table {
                let parsed = serde_json::from_str(&value).unwrap_or(Value::String(value));
                options.insert(option.to_lowercase(), parsed);
            }
            continue;
        }

        match key {
            "TMPL_NAME" => settings.name = value,
            "TMPL_DEBUG" => {
                settings.debug = matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on");
            }
            "TMPL_LOG_LEVEL" => settings.log_level = value,
            _ => {}
        }
    }
}

/// Deep-merges `overlay` into `base`.
///
/// Objects merge key by key; any other value (arrays included) in `overlay`
/// replaces the one in `base`. Plugins layer their option tables with this too.
pub fn merge_json(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}
