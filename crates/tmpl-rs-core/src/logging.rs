//! Tracing setup and spans.
//!
//! Applications call [`setup_logging`] once at startup. Plugins only emit
//! `tracing` events; they never install a subscriber themselves.

use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

/// How log lines are formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable output with file and line.
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Pretty in debug mode, JSON otherwise.
    pub const fn for_settings(settings: &Settings) -> Self {
        if settings.debug {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Builds the event filter.
///
/// `RUST_LOG` wins when set and valid. Otherwise `settings.log_level` is used,
/// and an unparsable level falls back to `info`.
pub fn env_filter(settings: &Settings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global tracing subscriber for `settings`.
///
/// Returns `false` if a subscriber was already installed, in which case the
/// existing one is kept.
pub fn setup_logging(settings: &Settings) -> bool {
    use tracing_subscriber::fmt;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(env_filter(settings))
        .with_target(true);

    let installed = match LogFormat::for_settings(settings) {
        LogFormat::Pretty => builder
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };

    if installed {
        tracing::debug!(app = %settings.name, level = %settings.log_level, "Logging initialised");
    }
    installed
}

/// Creates the span one template render runs in.
///
/// # Examples
///
/// ```
/// use tmpl_rs_core::logging::render_span;
///
/// let span = render_span("index.html");
/// let _guard = span.enter();
/// tracing::debug!("rendering");
/// ```
pub fn render_span(template: &str) -> tracing::Span {
    tracing::debug_span!("render", template = template)
}
