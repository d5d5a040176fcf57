//! The hosting application and its plugin registry.
//!
//! This module provides the [`Plugin`] trait and [`Application`], which together
//! manage the lifecycle of installed plugins. A plugin is attached exactly once:
//! [`Application::install`] runs its [`setup`](Plugin::setup) and then records it
//! under its name so request handlers can look it up again.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{TmplError, TmplResult};
use crate::settings::Settings;

/// A unit of functionality attached to an [`Application`].
///
/// # Examples
///
/// ```
/// use tmpl_rs_core::apps::{Application, Plugin};
/// use tmpl_rs_core::error::TmplResult;
/// use tmpl_rs_core::settings::Settings;
/// use std::sync::Arc;
///
/// struct Greeter;
///
/// impl Plugin for Greeter {
///     fn name(&self) -> &str { "greeter" }
///     fn setup(&self, _app: &Application) -> TmplResult<()> { Ok(()) }
/// }
///
/// let app = Application::new(Settings::named("demo"));
/// app.install(Arc::new(Greeter)).unwrap();
/// assert!(app.plugin::<Greeter>("greeter").is_some());
/// ```
pub trait Plugin: Send + Sync {
    /// Returns the name the plugin is registered under.
    fn name(&self) -> &str;

    /// Attaches the plugin to the application.
    ///
    /// Called once by [`Application::install`].
    fn setup(&self, app: &Application) -> TmplResult<()>;
}

struct InstalledPlugin {
    plugin: Arc<dyn Plugin>,
    any: Arc<dyn Any + Send + Sync>,
}

/// The hosting application: settings plus a named plugin registry.
pub struct Application {
    settings: Settings,
    plugins: RwLock<HashMap<String, InstalledPlugin>>,
    order: RwLock<Vec<String>>,
    /// Names whose `setup` is running. Always locked before `plugins`.
    installing: Mutex<HashSet<String>>,
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.settings.name)
            .field("debug", &self.settings.debug)
            .field("plugins", &self.plugin_names())
            .finish()
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Application: {}", self.settings.name)
    }
}

impl Application {
    /// Creates an application with the given settings and no plugins.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            plugins: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            installing: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the application name.
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Returns `true` if the application runs in debug mode.
    pub const fn debug(&self) -> bool {
        self.settings.debug
    }

    /// Returns the application settings.
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Sets up `plugin` against this application and registers it by name.
    ///
    /// Returns the plugin back so callers can keep using it directly. The name
    /// is reserved while `setup` runs, so of two concurrent installs under one
    /// name only one ever reaches `setup`. No registry lock is held during
    /// `setup`, which may look up other plugins.
    ///
    /// # Errors
    ///
    /// Returns `PluginAlreadyInstalled` if a plugin with the same name is
    /// registered or being installed, or whatever the plugin's `setup` fails with.
    pub fn install<P: Plugin + 'static>(&self, plugin: Arc<P>) -> TmplResult<Arc<P>> {
        let name = plugin.name().to_string();
        {
            let mut installing = self.installing.lock().expect("plugin registry lock poisoned");
            if self.has_plugin(&name) || !installing.insert(name.clone()) {
                return Err(TmplError::PluginAlreadyInstalled(name));
            }
        }

        let result = plugin.setup(self);
        let mut installing = self.installing.lock().expect("plugin registry lock poisoned");
        installing.remove(&name);
        result?;

        let mut plugins = self.plugins.write().expect("plugin registry lock poisoned");
        plugins.insert(
            name.clone(),
            InstalledPlugin {
                plugin: plugin.clone(),
                any: plugin.clone(),
            },
        );
        self.order
            .write()
            .expect("plugin registry lock poisoned")
            .push(name.clone());

        tracing::info!(app = %self.settings.name, plugin = %name, "Plugin installed");
        Ok(plugin)
    }

    /// Returns the installed plugin `name`, downcast to its concrete type.
    ///
    /// Returns `None` if nothing is registered under `name` or if it is not a `P`.
    pub fn plugin<P: Plugin + 'static>(&self, name: &str) -> Option<Arc<P>> {
        let plugins = self.plugins.read().expect("plugin registry lock poisoned");
        plugins
            .get(name)
            .and_then(|installed| Arc::clone(&installed.any).downcast::<P>().ok())
    }

    /// Returns the installed plugin `name` as a trait object.
    pub fn plugin_dyn(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        let plugins = self.plugins.read().expect("plugin registry lock poisoned");
        plugins.get(name).map(|installed| Arc::clone(&installed.plugin))
    }

    /// Returns `true` if a plugin is registered under `name`.
    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins
            .read()
            .expect("plugin registry lock poisoned")
            .contains_key(name)
    }

    /// Returns the names of installed plugins in installation order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.order
            .read()
            .expect("plugin registry lock poisoned")
            .clone()
    }
}
