//! Registration of globals, filters, and tests.
//!
//! Callables can be registered under an explicit name through a [`Registrar`]
//! (`plugin.filter("test").register(my_test)`) or under the name of the Rust
//! item itself (`plugin.add_filter(my_test)` registers `my_test`).

use minijinja::functions::Function;
use minijinja::value::{FunctionArgs, FunctionResult};
use tmpl_rs_core::error::{TmplError, TmplResult};

use crate::plugin::JinjaPlugin;

/// The environment extension point a callable is registered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Callable from any expression: `{{ sum(1, 2) }}`.
    Global,
    /// Applied with a pipe: `{{ value|name }}`.
    Filter,
    /// Used after `is`: `{% if value is name %}`.
    Test,
}

impl Kind {
    /// Returns a lowercase label used in logs and errors.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Filter => "filter",
            Self::Test => "test",
        }
    }
}

/// Registers one callable under a name chosen up front.
///
/// Created by [`JinjaPlugin::global`], [`JinjaPlugin::filter`] and
/// [`JinjaPlugin::test`].
#[must_use = "nothing is registered until `register` is called"]
pub struct Registrar<'a> {
    plugin: &'a JinjaPlugin,
    kind: Kind,
    name: String,
}

impl<'a> Registrar<'a> {
    pub(crate) fn new(plugin: &'a JinjaPlugin, kind: Kind, name: impl Into<String>) -> Self {
        Self {
            plugin,
            kind,
            name: name.into(),
        }
    }

    /// Returns the name the callable will be registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers `f` and hands it back unchanged.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` for an empty name and `PluginNotInstalled` if the
    /// plugin has not been set up yet.
    pub fn register<F, Rv, Args>(self, f: F) -> TmplResult<F>
    where
        F: Function<Rv, Args>
            + for<'b> Function<Rv, <Args as FunctionArgs<'b>>::Output>
            + Clone,
        Rv: FunctionResult,
        Args: for<'b> FunctionArgs<'b>,
    {
        if self.name.trim().is_empty() {
            return Err(TmplError::InvalidName(format!(
                "Cannot register a {} under an empty name",
                self.kind.label()
            )));
        }
        self.plugin
            .register_callable(self.kind, &self.name, f.clone())?;
        Ok(f)
    }
}

/// Derives a template-visible name from the type of a callable.
///
/// Function items are named after their last path segment with generic
/// arguments removed, so `my_crate::helpers::sum::<i64>` becomes `sum`.
/// Closures and function pointers have no usable name.
///
/// # Errors
///
/// Returns `InvalidName` when no identifier can be derived.
pub fn callable_name<F>() -> TmplResult<String> {
    let type_name = std::any::type_name::<F>();
    let path = strip_generics(type_name);
    let last = path.rsplit("::").next().unwrap_or(&path);

    if is_identifier(last) {
        Ok(last.to_string())
    } else {
        Err(TmplError::InvalidName(format!(
            "Cannot derive a name for '{type_name}'; register it with an explicit name"
        )))
    }
}

/// Removes every balanced `<...>` group, so `a::outer<T>::{{closure}}`
/// becomes `a::outer::{{closure}}`.
fn strip_generics(type_name: &str) -> String {
    let mut depth = 0usize;
    let mut path = String::with_capacity(type_name.len());
    for c in type_name.chars() {
        match c {
            '<' => depth += 1,
            '>' if depth > 0 => depth -= 1,
            _ if depth == 0 => path.push(c),
            _ => {}
        }
    }
    path
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}
