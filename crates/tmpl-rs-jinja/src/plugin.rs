//! The Jinja template plugin.
//!
//! [`JinjaPlugin`] owns a minijinja environment built at setup time, an ordered
//! list of context providers, and an ordered list of render observers. Each
//! render resolves the template, assembles the effective context, notifies the
//! observers, and renders.
//!
//! ## Effective context
//!
//! Layers are merged in this order, later layers winning key by key:
//!
//! 1. the plugin globals (`app`, `debug`, and anything registered as a global),
//! 2. each context provider, in registration order,
//! 3. the context passed to [`render`](JinjaPlugin::render).
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tmpl_rs_core::{Application, Settings};
//! use tmpl_rs_jinja::context::{context_from, Context};
//! use tmpl_rs_jinja::JinjaPlugin;
//!
//! fn sum(a: i64, b: i64) -> i64 {
//!     a + b
//! }
//!
//! # async fn run() -> tmpl_rs_core::TmplResult<()> {
//! let app = Application::new(Settings::named("blog"));
//! let jinja = app.install(Arc::new(JinjaPlugin::new()))?;
//!
//! jinja.add_global(sum)?;
//! jinja.add_context(|| context_from([("site", "My blog")]));
//!
//! let html = jinja
//!     .render("index.html", context_from([("name", "world")]))
//!     .await?;
//! # let _ = html;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use minijinja::functions::Function;
use minijinja::value::{FunctionArgs, FunctionResult};
use minijinja::{AutoEscape, Environment, ErrorKind, Value};
use tmpl_rs_core::apps::{Application, Plugin};
use tmpl_rs_core::error::{TmplError, TmplResult};
use tmpl_rs_core::logging::render_span;
use tmpl_rs_signals::Signal;
use tracing::Instrument;

use crate::builtins;
use crate::cache::TemplateCache;
use crate::config::{JinjaConfig, UndefinedPolicy};
use crate::context::{merge_into, AsyncFnProvider, Context, ContextProvider, FnProvider};
use crate::extensions::{self, Extension};
use crate::loaders::{into_minijinja_loader, FileSystemLoader, TemplateLoader};
use crate::observers::{ObserverGuard, RenderObserver};
use crate::registry::{callable_name, Kind, Registrar};

/// The default name the plugin registers under.
pub const DEFAULT_PLUGIN_NAME: &str = "jinja";

/// Identifies the template a render should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateRef {
    /// A template resolved through the configured loader.
    Name(String),
    /// Template source supplied directly, bypassing the loader.
    Source {
        /// The name used in error messages and reported to observers.
        name: String,
        /// The template source.
        source: String,
    },
}

impl TemplateRef {
    /// Creates a reference to inline template source.
    pub fn inline(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self::Source {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Returns the template's name.
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Source { name, .. } => name,
        }
    }
}

impl From<&str> for TemplateRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for TemplateRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything that exists only once the plugin is set up.
struct Installed {
    env: Environment<'static>,
    globals: Context,
    /// Shared with the loader callback, which records every template it serves.
    cache: Arc<Mutex<TemplateCache>>,
    config: JinjaConfig,
    loader: Arc<dyn TemplateLoader>,
}

/// Builds a [`JinjaPlugin`].
///
/// Options set here override the application's `[plugins.<name>]` table.
#[derive(Default)]
pub struct JinjaPluginBuilder {
    name: Option<String>,
    options: serde_json::Map<String, serde_json::Value>,
    loader: Option<Arc<dyn TemplateLoader>>,
    extensions: Vec<Arc<dyn Extension>>,
}

impl JinjaPluginBuilder {
    /// Sets the name the plugin registers under (default `"jinja"`).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets a raw configuration option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Sets the folders searched by the default loader.
    #[must_use]
    pub fn template_folders<P: AsRef<Path>>(self, folders: impl IntoIterator<Item = P>) -> Self {
        let folders: Vec<serde_json::Value> = folders
            .into_iter()
            .map(|p| p.as_ref().to_string_lossy().into_owned().into())
            .collect();
        self.option("template_folders", folders)
    }

    /// Enables or disables reloading of changed templates.
    #[must_use]
    pub fn auto_reload(self, enabled: bool) -> Self {
        self.option("auto_reload", enabled)
    }

    /// Sets how many compiled templates are kept.
    #[must_use]
    pub fn cache_size(self, size: usize) -> Self {
        self.option("cache_size", size)
    }

    /// Sets the encoding of template files.
    #[must_use]
    pub fn encoding(self, encoding: &str) -> Self {
        self.option("encoding", encoding)
    }

    /// Sets the extensions to install, in order.
    #[must_use]
    pub fn extensions<S: Into<String>>(self, names: impl IntoIterator<Item = S>) -> Self {
        let names: Vec<serde_json::Value> =
            names.into_iter().map(|n| serde_json::Value::String(n.into())).collect();
        self.option("extensions", names)
    }

    /// Enables HTML autoescaping.
    #[must_use]
    pub fn autoescape(self, enabled: bool) -> Self {
        self.option("autoescape", enabled)
    }

    /// Sets the undefined variable policy.
    #[must_use]
    pub fn undefined(self, policy: UndefinedPolicy) -> Self {
        let label = match policy {
            UndefinedPolicy::Lenient => "lenient",
            UndefinedPolicy::Chainable => "chainable",
            UndefinedPolicy::Strict => "strict",
        };
        self.option("undefined", label)
    }

    /// Replaces the default file-system loader.
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn TemplateLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Makes a custom extension available to the `extensions` option.
    #[must_use]
    pub fn register_extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Builds the plugin. Nothing is validated until setup.
    pub fn build(self) -> JinjaPlugin {
        JinjaPlugin {
            name: self
                .name
                .unwrap_or_else(|| DEFAULT_PLUGIN_NAME.to_string()),
            options: self.options,
            loader: self.loader,
            extensions: self.extensions,
            state: RwLock::new(None),
            providers: RwLock::new(Vec::new()),
            observers: Signal::new(),
        }
    }
}

/// Integrates a minijinja environment into an [`Application`].
pub struct JinjaPlugin {
    name: String,
    options: serde_json::Map<String, serde_json::Value>,
    loader: Option<Arc<dyn TemplateLoader>>,
    extensions: Vec<Arc<dyn Extension>>,
    state: RwLock<Option<Installed>>,
    providers: RwLock<Vec<Arc<dyn ContextProvider>>>,
    observers: Signal<RenderObserver>,
}

impl Default for JinjaPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JinjaPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JinjaPlugin")
            .field("name", &self.name)
            .field("installed", &self.is_installed())
            .field("providers", &self.provider_count())
            .field("observers", &self.observers.receiver_ids())
            .finish_non_exhaustive()
    }
}

impl JinjaPlugin {
    /// Creates a plugin named `"jinja"` with no explicit options.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a builder for a customised plugin.
    pub fn builder() -> JinjaPluginBuilder {
        JinjaPluginBuilder::default()
    }

    /// Returns `true` once setup has completed.
    pub fn is_installed(&self) -> bool {
        self.state.read().expect("template environment lock poisoned").is_some()
    }

    /// Returns the resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns `PluginNotInstalled` before setup.
    pub fn config(&self) -> TmplResult<JinjaConfig> {
        self.with_state(|state| Ok(state.config.clone()))
    }

    /// Returns the names of compiled templates currently kept, least recently
    /// used first.
    ///
    /// # Errors
    ///
    /// Returns `PluginNotInstalled` before setup.
    pub fn cached_templates(&self) -> TmplResult<Vec<String>> {
        self.with_state(|state| Ok(lock_cache(&state.cache).names()))
    }

    fn not_installed(&self) -> TmplError {
        TmplError::PluginNotInstalled(self.name.clone())
    }

    fn with_state<R>(&self, f: impl FnOnce(&Installed) -> TmplResult<R>) -> TmplResult<R> {
        let guard = self.state.read().expect("template environment lock poisoned");
        let state = guard.as_ref().ok_or_else(|| self.not_installed())?;
        f(state)
    }

    fn with_state_mut<R>(
        &self,
        f: impl FnOnce(&mut Installed) -> TmplResult<R>,
    ) -> TmplResult<R> {
        let mut guard = self.state.write().expect("template environment lock poisoned");
        let state = guard.as_mut().ok_or_else(|| self.not_installed())?;
        f(state)
    }

    // ── Globals, filters, tests ──────────────────────────────────────

    /// Returns a registrar for a global function named `name`.
    pub fn global(&self, name: impl Into<String>) -> Registrar<'_> {
        Registrar::new(self, Kind::Global, name)
    }

    /// Returns a registrar for a filter named `name`.
    pub fn filter(&self, name: impl Into<String>) -> Registrar<'_> {
        Registrar::new(self, Kind::Filter, name)
    }

    /// Returns a registrar for a test named `name`.
    pub fn test(&self, name: impl Into<String>) -> Registrar<'_> {
        Registrar::new(self, Kind::Test, name)
    }

    /// Registers a global function under its own item name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` for closures and `PluginNotInstalled` before setup.
    pub fn add_global<F, Rv, Args>(&self, f: F) -> TmplResult<F>
    where
        F: Function<Rv, Args>
            + for<'a> Function<Rv, <Args as FunctionArgs<'a>>::Output>
            + Clone,
        Rv: FunctionResult,
        Args: for<'a> FunctionArgs<'a>,
    {
        self.global(callable_name::<F>()?).register(f)
    }

    /// Registers a filter under its own item name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` for closures and `PluginNotInstalled` before setup.
    pub fn add_filter<F, Rv, Args>(&self, f: F) -> TmplResult<F>
    where
        F: Function<Rv, Args>
            + for<'a> Function<Rv, <Args as FunctionArgs<'a>>::Output>
            + Clone,
        Rv: FunctionResult,
        Args: for<'a> FunctionArgs<'a>,
    {
        self.filter(callable_name::<F>()?).register(f)
    }

    /// Registers a test under its own item name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` for closures and `PluginNotInstalled` before setup.
    pub fn add_test<F, Rv, Args>(&self, f: F) -> TmplResult<F>
    where
        F: Function<Rv, Args>
            + for<'a> Function<Rv, <Args as FunctionArgs<'a>>::Output>
            + Clone,
        Rv: FunctionResult,
        Args: for<'a> FunctionArgs<'a>,
    {
        self.test(callable_name::<F>()?).register(f)
    }

    /// Exposes a plain value as a global.
    ///
    /// # Errors
    ///
    /// Returns `PluginNotInstalled` before setup.
    pub fn add_global_value(&self, name: impl Into<String>, value: impl Into<Value>) -> TmplResult<()> {
        let name = name.into();
        let value = value.into();
        self.with_state_mut(|state| {
            state.env.add_global(name.clone(), value.clone());
            state.globals.insert(name.clone(), value);
            tracing::debug!(plugin = %self.name, global = %name, "Global value registered");
            Ok(())
        })
    }

    pub(crate) fn register_callable<F, Rv, Args>(
        &self,
        kind: Kind,
        name: &str,
        f: F,
    ) -> TmplResult<()>
    where
        F: Function<Rv, Args> + for<'a> Function<Rv, <Args as FunctionArgs<'a>>::Output>,
        Rv: FunctionResult,
        Args: for<'a> FunctionArgs<'a>,
    {
        self.with_state_mut(|state| {
            match kind {
                Kind::Global => {
                    let value = Value::from_function::<F, Rv, Args>(f);
                    state.env.add_global(name.to_string(), value.clone());
                    state.globals.insert(name.to_string(), value);
                }
                Kind::Filter => state.env.add_filter::<_, F, Rv, Args>(name.to_string(), f),
                Kind::Test => state.env.add_test::<_, F, Rv, Args>(name.to_string(), f),
            }
            tracing::debug!(plugin = %self.name, kind = kind.label(), name = %name, "Callable registered");
            Ok(())
        })
    }

    // ── Context providers ────────────────────────────────────────────

    /// Appends a synchronous context provider and returns it unchanged.
    pub fn add_context<F>(&self, f: F) -> F
    where
        F: Fn() -> Context + Clone + Send + Sync + 'static,
    {
        self.add_provider(Arc::new(FnProvider(f.clone())));
        f
    }

    /// Appends an asynchronous, fallible context provider and returns it
    /// unchanged.
    pub fn add_async_context<F, Fut>(&self, f: F) -> F
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = TmplResult<Context>> + Send + 'static,
    {
        self.add_provider(Arc::new(AsyncFnProvider(f.clone())));
        f
    }

    /// Appends a context provider and returns it unchanged.
    pub fn add_provider(&self, provider: Arc<dyn ContextProvider>) -> Arc<dyn ContextProvider> {
        self.providers
            .write()
            .expect("context provider lock poisoned")
            .push(Arc::clone(&provider));
        provider
    }

    /// Returns the number of registered context providers.
    pub fn provider_count(&self) -> usize {
        self.providers.read().expect("context provider lock poisoned").len()
    }

    // ── Render observers ─────────────────────────────────────────────

    /// Connects an observer under `id`, replacing one with the same id.
    pub fn connect_observer(&self, id: impl Into<String>, observer: Arc<RenderObserver>) {
        self.observers.connect(id, observer);
    }

    /// Disconnects the observer `id`. Returns `true` if one was connected.
    pub fn disconnect_observer(&self, id: &str) -> bool {
        self.observers.disconnect(id)
    }

    /// Connects an observer until the returned guard is dropped.
    #[must_use = "the observer is disconnected as soon as the guard is dropped"]
    pub fn observe(&self, observer: Arc<RenderObserver>) -> ObserverGuard {
        self.observers.connect_scoped(observer)
    }

    /// Returns the ids of connected observers, in notification order.
    pub fn observer_ids(&self) -> Vec<String> {
        self.observers.receiver_ids()
    }

    // ── Rendering ────────────────────────────────────────────────────

    /// Assembles the effective context for one render.
    ///
    /// # Errors
    ///
    /// Returns `PluginNotInstalled` before setup, or the first provider error.
    pub async fn get_context(&self, explicit: Context) -> TmplResult<Context> {
        let mut context = self.with_state(|state| Ok(state.globals.clone()))?;

        let providers = self
            .providers
            .read()
            .expect("context provider lock poisoned")
            .clone();
        for provider in providers {
            merge_into(&mut context, provider.provide().await?);
        }

        merge_into(&mut context, explicit);
        Ok(context)
    }

    /// Renders `template` with `context` layered over globals and providers.
    ///
    /// # Errors
    ///
    /// - `PluginNotInstalled` before setup
    /// - `TemplateDoesNotExist` / `TemplateSyntaxError` if the template cannot be resolved
    /// - any context provider error
    /// - `ObserverError` if an observer fails; earlier observers have already run
    /// - `TemplateRenderError` if evaluation fails
    pub async fn render(
        &self,
        template: impl Into<TemplateRef>,
        context: Context,
    ) -> TmplResult<String> {
        let template = template.into();
        let span = render_span(template.name());

        async {
            self.resolve(&template)?;
            let context = self.get_context(context).await?;

            self.observers
                .send(|observer| observer(&template, &context))
                .map_err(|e| TmplError::ObserverError(e.to_string()))?;

            let rendered = self.with_state(|state| render_resolved(&state.env, &template, &context));
            self.trim_cache()?;
            let output = rendered?;
            tracing::debug!(bytes = output.len(), "Template rendered");
            Ok(output)
        }
        .instrument(span)
        .await
    }

    /// Renders inline template source.
    ///
    /// # Errors
    ///
    /// Same as [`render`](Self::render).
    pub async fn render_str(&self, source: &str, context: Context) -> TmplResult<String> {
        self.render(TemplateRef::inline("<string>", source), context)
            .await
    }

    /// Compiles a named template, honouring `auto_reload`.
    ///
    /// A cached template whose recorded dependencies are all fresh is served
    /// under the read lock. Otherwise the write lock is taken; with
    /// `auto_reload`, any stale resident template clears the whole
    /// environment, since minijinja does not expose which templates extend or
    /// include it.
    fn resolve(&self, template: &TemplateRef) -> TmplResult<()> {
        let TemplateRef::Name(name) = template else {
            return Ok(());
        };

        let fresh = self.with_state(|state| {
            let mut cache = lock_cache(&state.cache);
            let fresh = cache.contains(name)
                && !(state.config.auto_reload
                    && cache.names().iter().any(|n| state.loader.is_stale(n)));
            if fresh {
                cache.touch(name);
            }
            Ok(fresh)
        })?;
        if fresh {
            return Ok(());
        }

        self.with_state_mut(|state| {
            if state.config.auto_reload {
                let resident = lock_cache(&state.cache).names();
                if let Some(stale) = resident.iter().find(|n| state.loader.is_stale(n)) {
                    tracing::debug!(template = %stale, "Template changed, clearing compiled templates");
                    state.env.clear_templates();
                    lock_cache(&state.cache).clear();
                }
            }

            // The loader callback locks the cache, so no guard may be held here.
            let compiled = state.env.get_template(name).map(|_| ());
            let mut cache = lock_cache(&state.cache);
            match compiled {
                Ok(()) => {
                    cache.touch(name);
                    Ok(())
                }
                Err(err) => {
                    cache.remove(name);
                    Err(template_error(err))
                }
            }
        })
    }

    /// Drops the least recently used templates beyond `cache_size`.
    fn trim_cache(&self) -> TmplResult<()> {
        let over = self.with_state(|state| Ok(lock_cache(&state.cache).is_over_capacity()))?;
        if !over {
            return Ok(());
        }

        self.with_state_mut(|state| {
            let evicted = lock_cache(&state.cache).overflow();
            for name in &evicted {
                state.env.remove_template(name);
            }
            tracing::debug!(evicted = ?evicted, "Compiled templates evicted");
            Ok(())
        })
    }
}

fn lock_cache(cache: &Mutex<TemplateCache>) -> std::sync::MutexGuard<'_, TemplateCache> {
    cache.lock().expect("template cache lock poisoned")
}

fn render_resolved(
    env: &Environment<'static>,
    template: &TemplateRef,
    context: &Context,
) -> TmplResult<String> {
    match template {
        TemplateRef::Name(name) => env
            .get_template(name)
            .and_then(|t| t.render(context))
            .map_err(template_error),
        TemplateRef::Source { name, source } => env
            .render_named_str(name, source, context)
            .map_err(template_error),
    }
}

fn template_error(err: minijinja::Error) -> TmplError {
    match err.kind() {
        ErrorKind::TemplateNotFound => TmplError::TemplateDoesNotExist(err.to_string()),
        ErrorKind::SyntaxError => TmplError::TemplateSyntaxError(err.to_string()),
        _ => TmplError::TemplateRenderError(format!("{err:#}")),
    }
}

impl Plugin for JinjaPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&self, app: &Application) -> TmplResult<()> {
        let mut guard = self.state.write().expect("template environment lock poisoned");
        if guard.is_some() {
            return Err(TmplError::PluginAlreadyInstalled(self.name.clone()));
        }

        let mut config = JinjaConfig::resolve(app.settings().plugin_options(&self.name), &self.options)?;
        config.loader.clone_from(&self.loader);

        let loader: Arc<dyn TemplateLoader> = match &config.loader {
            Some(loader) => Arc::clone(loader),
            None => Arc::new(FileSystemLoader::with_encoding(
                config.template_folders.clone(),
                config.encoding()?,
            )),
        };

        let cache = Arc::new(Mutex::new(TemplateCache::new(config.cache_size)));
        let load = into_minijinja_loader(Arc::clone(&loader));
        let served = Arc::clone(&cache);

        let mut env = Environment::new();
        env.set_loader(move |name: &str| {
            let source = load(name)?;
            if source.is_some() {
                lock_cache(&served).touch(name);
            }
            Ok(source)
        });
        env.set_undefined_behavior(config.undefined.into());
        let autoescape = config.autoescape;
        env.set_auto_escape_callback(move |_| {
            if autoescape {
                AutoEscape::Html
            } else {
                AutoEscape::None
            }
        });

        extensions::install_all(&mut env, &config.extensions, &self.extensions)?;
        let globals = builtins::install(&mut env, app);

        tracing::info!(
            plugin = %self.name,
            app = %app.name(),
            folders = ?config.template_folders,
            cache_size = config.cache_size,
            auto_reload = config.auto_reload,
            "Template environment configured"
        );

        *guard = Some(Installed {
            env,
            globals,
            cache,
            config,
            loader,
        });
        Ok(())
    }
}
