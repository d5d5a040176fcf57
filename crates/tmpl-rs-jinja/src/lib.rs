//! # tmpl-rs-jinja
//!
//! A Jinja template plugin for tmpl-rs applications, built on
//! [minijinja](https://docs.rs/minijinja).
//!
//! Install a [`JinjaPlugin`] into an [`Application`](tmpl_rs_core::Application),
//! register globals, filters, tests, and context providers on it, and render
//! templates with a context merged from all of them.
//!
//! ## Modules
//!
//! - [`plugin`] - The plugin, its builder, and the render pipeline
//! - [`config`] - Plugin options and how they are layered
//! - [`loaders`] - Template loaders (filesystem, in-memory, chained)
//! - [`context`] - Render contexts and context providers
//! - [`registry`] - Named and auto-named registration of callables
//! - [`observers`] - Render observers and a recording observer
//! - [`extensions`] - Environment extensions
//! - [`builtins`] - The `app` and `debug` globals and the `jsonify` filter
//! - [`cache`] - Compiled template bookkeeping

pub mod builtins;
pub mod cache;
pub mod config;
pub mod context;
pub mod extensions;
pub mod loaders;
pub mod observers;
pub mod plugin;
pub mod registry;

pub use config::{JinjaConfig, UndefinedPolicy};
pub use context::{context_from, Context, ContextProvider};
pub use loaders::{ChoiceLoader, FileSystemLoader, StringLoader, TemplateLoader};
pub use minijinja::Value;
pub use observers::{ObserverGuard, RenderObserver, RenderRecorder};
pub use plugin::{JinjaPlugin, JinjaPluginBuilder, TemplateRef};
