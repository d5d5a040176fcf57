//! Environment extensions.
//!
//! An [`Extension`] adds behaviour to the environment at setup time. The
//! `extensions` option lists identifiers resolved against the built-in set
//! below and against extensions registered with
//! [`JinjaPluginBuilder::register_extension`](crate::plugin::JinjaPluginBuilder::register_extension).
//!
//! | Identifier | Effect |
//! |---|---|
//! | `pycompat` | Python string, list and dict methods such as `.upper()` and `.items()` |
//! | `contrib` | the extra filters and functions of `minijinja-contrib` |

use std::sync::Arc;

use minijinja::Environment;
use tmpl_rs_core::error::{TmplError, TmplResult};

/// Something that can be installed into a template environment.
pub trait Extension: Send + Sync {
    /// The identifier used in the `extensions` option.
    fn name(&self) -> &str;

    /// Installs the extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the extension cannot be installed.
    fn install(&self, env: &mut Environment<'static>) -> TmplResult<()>;
}

/// Python-compatible methods on strings, lists, and maps.
pub struct PyCompat;

impl Extension for PyCompat {
    fn name(&self) -> &str {
        "pycompat"
    }

    fn install(&self, env: &mut Environment<'static>) -> TmplResult<()> {
        env.set_unknown_method_callback(minijinja_contrib::pycompat::unknown_method_callback);
        Ok(())
    }
}

/// The additional filters and globals from `minijinja-contrib`.
pub struct Contrib;

impl Extension for Contrib {
    fn name(&self) -> &str {
        "contrib"
    }

    fn install(&self, env: &mut Environment<'static>) -> TmplResult<()> {
        minijinja_contrib::add_to_environment(env);
        Ok(())
    }
}

/// Returns the extensions that ship with the crate.
pub fn builtin_extensions() -> Vec<Arc<dyn Extension>> {
    vec![Arc::new(PyCompat), Arc::new(Contrib)]
}

/// Resolves each identifier in `names` and installs it, in order.
///
/// `custom` extensions shadow built-ins with the same name.
///
/// # Errors
///
/// Returns `ImproperlyConfigured` for an identifier nothing provides.
pub(crate) fn install_all(
    env: &mut Environment<'static>,
    names: &[String],
    custom: &[Arc<dyn Extension>],
) -> TmplResult<()> {
    let builtins = builtin_extensions();
    for name in names {
        let extension = custom
            .iter()
            .chain(builtins.iter())
            .find(|ext| ext.name() == name)
            .ok_or_else(|| {
                TmplError::ImproperlyConfigured(format!("Unknown template extension '{name}'"))
            })?;
        extension.install(env)?;
        tracing::debug!(extension = %name, "Template extension installed");
    }
    Ok(())
}
