//! Core error types for the tmpl-rs workspace.
//!
//! This module provides the [`TmplError`] enum covering plugin lifecycle errors,
//! template resolution and rendering errors, context provider and observer
//! failures, and configuration errors.

use thiserror::Error;

/// The primary error type for tmpl-rs.
///
/// Every failure is surfaced to the caller unmodified: nothing in the workspace
/// retries or downgrades an error. The hosting application decides how to turn
/// an error into a user-visible failure, usually via [`TmplError::status_code`].
#[derive(Error, Debug)]
pub enum TmplError {
    // ── Plugin lifecycle ─────────────────────────────────────────────

    /// A registration or render call was made before the plugin was set up.
    #[error("Plugin '{0}' is not installed. Install it into an application first.")]
    PluginNotInstalled(String),

    /// The plugin was set up a second time.
    #[error("Plugin '{0}' is already installed")]
    PluginAlreadyInstalled(String),

    /// A callable was registered without a usable name.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    // ── Templates ────────────────────────────────────────────────────

    /// The requested template was not found by the loader.
    #[error("Template does not exist: {0}")]
    TemplateDoesNotExist(String),

    /// A template contains invalid syntax.
    #[error("Template syntax error: {0}")]
    TemplateSyntaxError(String),

    /// Evaluating a template against its context failed.
    #[error("Template render error: {0}")]
    TemplateRenderError(String),

    // ── Render pipeline ──────────────────────────────────────────────

    /// A context provider failed while the render context was assembled.
    #[error("Context provider error: {0}")]
    ContextProviderError(String),

    /// A render observer failed.
    #[error("Render observer error: {0}")]
    ObserverError(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The plugin or application is improperly configured.
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TmplError {
    /// Returns the HTTP status code a hosting application should answer with.
    ///
    /// A missing template is a server-side fault (the template name comes from
    /// code, not from the client), so every variant maps to 500.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::PluginNotInstalled(_)
            | Self::PluginAlreadyInstalled(_)
            | Self::InvalidName(_)
            | Self::TemplateDoesNotExist(_)
            | Self::TemplateSyntaxError(_)
            | Self::TemplateRenderError(_)
            | Self::ContextProviderError(_)
            | Self::ObserverError(_)
            | Self::ConfigurationError(_)
            | Self::ImproperlyConfigured(_)
            | Self::SerializationError(_)
            | Self::IoError(_) => 500,
        }
    }

    /// Returns `true` for errors raised while resolving or rendering a template.
    pub const fn is_template_error(&self) -> bool {
        matches!(
            self,
            Self::TemplateDoesNotExist(_)
                | Self::TemplateSyntaxError(_)
                | Self::TemplateRenderError(_)
        )
    }
}

/// A convenience type alias for `Result<T, TmplError>`.
pub type TmplResult<T> = Result<T, TmplError>;
