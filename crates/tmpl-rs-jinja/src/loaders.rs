//! Template loaders.
//!
//! Template loaders find and read template source text by name. The
//! [`TemplateLoader`] trait defines the interface, with built-in implementations
//! for the filesystem, in-memory strings, and an ordered chain of loaders.
//!
//! Loaders also answer [`is_stale`](TemplateLoader::is_stale), which the plugin
//! consults when `auto_reload` is enabled to decide whether a compiled template
//! must be thrown away and loaded again.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use tmpl_rs_core::error::{TmplError, TmplResult};

use crate::config::Encoding;

/// Loads template source text by name.
pub trait TemplateLoader: Send + Sync {
    /// Loads the template source with the given name.
    ///
    /// # Errors
    ///
    /// Returns `TemplateDoesNotExist` if the template cannot be found, or
    /// another error if it was found but could not be read.
    fn load(&self, name: &str) -> TmplResult<String>;

    /// Returns `true` if the source behind `name` changed since it was last loaded.
    fn is_stale(&self, _name: &str) -> bool {
        false
    }
}

/// Loads templates from one or more directories on the filesystem.
///
/// Searches each configured directory in order and returns the first match.
/// Names are always relative: absolute names and names containing `..` are
/// never resolved.
pub struct FileSystemLoader {
    dirs: Vec<PathBuf>,
    encoding: Encoding,
    /// Path and modification time of each template at its last load.
    loaded: Mutex<HashMap<String, (PathBuf, Option<SystemTime>)>>,
}

impl FileSystemLoader {
    /// Creates a UTF-8 `FileSystemLoader` with the given search directories.
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self::with_encoding(dirs, Encoding::Utf8)
    }

    /// Creates a `FileSystemLoader` decoding files with `encoding`.
    pub fn with_encoding(dirs: Vec<PathBuf>, encoding: Encoding) -> Self {
        Self {
            dirs,
            encoding,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the search directories, in search order.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    fn find(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        self.dirs
            .iter()
            .map(|dir| dir.join(relative))
            .find(|path| path.is_file())
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl TemplateLoader for FileSystemLoader {
    fn load(&self, name: &str) -> TmplResult<String> {
        let Some(path) = self.find(name) else {
            return Err(TmplError::TemplateDoesNotExist(format!(
                "Template '{name}' not found in directories: {:?}",
                self.dirs
            )));
        };

        let mtime = modified(&path);
        let bytes = std::fs::read(&path)?;
        let source = self.encoding.decode(bytes).map_err(|e| {
            TmplError::TemplateSyntaxError(format!(
                "Template '{}' is not valid {:?}: {e}",
                path.display(),
                self.encoding
            ))
        })?;

        tracing::debug!(template = %name, path = %path.display(), "Template source loaded");
        self.loaded
            .lock()
            .expect("loader lock poisoned")
            .insert(name.to_string(), (path, mtime));
        Ok(source)
    }

    fn is_stale(&self, name: &str) -> bool {
        let loaded = self.loaded.lock().expect("loader lock poisoned");
        let Some((path, mtime)) = loaded.get(name) else {
            return false;
        };
        // A template that moved to an earlier folder is also stale.
        self.find(name).as_ref() != Some(path) || modified(path) != *mtime
    }
}

/// Loads templates from an in-memory map of name to source strings.
///
/// This is useful for testing and for applications that embed templates in
/// the binary or keep them in a database.
pub struct StringLoader {
    templates: RwLock<HashMap<String, String>>,
    changed: Mutex<HashSet<String>>,
}

impl StringLoader {
    /// Creates a new empty `StringLoader`.
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
            changed: Mutex::new(HashSet::new()),
        }
    }

    /// Creates a `StringLoader` from a map of template names to source strings.
    pub fn from_map(templates: HashMap<String, String>) -> Self {
        Self {
            templates: RwLock::new(templates),
            changed: Mutex::new(HashSet::new()),
        }
    }

    /// Adds or replaces a template.
    pub fn add(&self, name: impl Into<String>, source: impl Into<String>) {
        let name = name.into();
        self.changed
            .lock()
            .expect("loader lock poisoned")
            .insert(name.clone());
        self.templates
            .write()
            .expect("loader lock poisoned")
            .insert(name, source.into());
    }
}

impl Default for StringLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateLoader for StringLoader {
    fn load(&self, name: &str) -> TmplResult<String> {
        let source = self
            .templates
            .read()
            .expect("loader lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| {
                TmplError::TemplateDoesNotExist(format!(
                    "Template '{name}' not found in StringLoader"
                ))
            })?;
        self.changed.lock().expect("loader lock poisoned").remove(name);
        Ok(source)
    }

    fn is_stale(&self, name: &str) -> bool {
        self.changed.lock().expect("loader lock poisoned").contains(name)
    }
}

/// Tries a list of loaders in order and returns the first template found.
pub struct ChoiceLoader {
    loaders: Vec<Arc<dyn TemplateLoader>>,
}

impl ChoiceLoader {
    /// Creates a `ChoiceLoader` over `loaders`, searched in order.
    pub fn new(loaders: Vec<Arc<dyn TemplateLoader>>) -> Self {
        Self { loaders }
    }
}

impl TemplateLoader for ChoiceLoader {
    fn load(&self, name: &str) -> TmplResult<String> {
        for loader in &self.loaders {
            match loader.load(name) {
                Err(TmplError::TemplateDoesNotExist(_)) => {}
                other => return other,
            }
        }

        Err(TmplError::TemplateDoesNotExist(format!(
            "Template '{name}' could not be found"
        )))
    }

    fn is_stale(&self, name: &str) -> bool {
        self.loaders.iter().any(|loader| loader.is_stale(name))
    }
}

/// Adapts a [`TemplateLoader`] to the loader callback minijinja expects.
///
/// A missing template maps to `Ok(None)` so minijinja reports its own
/// "template not found" error. Undecodable sources become syntax errors; any
/// other read failure is reported as "not found" with the reason attached.
pub(crate) fn into_minijinja_loader(
    loader: Arc<dyn TemplateLoader>,
) -> impl Fn(&str) -> Result<Option<String>, minijinja::Error> + Send + Sync + 'static {
    move |name: &str| match loader.load(name) {
        Ok(source) => Ok(Some(source)),
        Err(TmplError::TemplateDoesNotExist(_)) => Ok(None),
        Err(TmplError::TemplateSyntaxError(reason)) => Err(minijinja::Error::new(
            minijinja::ErrorKind::SyntaxError,
            reason,
        )),
        Err(other) => Err(minijinja::Error::new(
            minijinja::ErrorKind::TemplateNotFound,
            format!("could not read template '{name}': {other}"),
        )),
    }
}
