//! Globals and filters installed into every environment at setup.
//!
//! - `app`: the hosting application. Renders as `Application: <name>` and
//!   exposes `app.name` and `app.debug`.
//! - `debug`: `debug()` pretty-prints the current render state, `debug(value)`
//!   pretty-prints one value.
//! - `jsonify`: serialises any value to JSON text.

use std::fmt;
use std::sync::Arc;

use minijinja::value::{Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind, State};
use tmpl_rs_core::apps::Application;

use crate::context::Context;

/// The hosting application as seen from templates.
#[derive(Debug, Clone)]
pub struct AppGlobal {
    name: String,
    debug: bool,
}

impl AppGlobal {
    /// Captures the template-visible parts of `app`.
    pub fn new(app: &Application) -> Self {
        Self {
            name: app.name().to_string(),
            debug: app.debug(),
        }
    }
}

impl Object for AppGlobal {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "name" => Some(Value::from(self.name.as_str())),
            "debug" => Some(Value::from(self.debug)),
            _ => None,
        }
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Application: {}", self.name)
    }
}

/// `debug()` / `debug(value)`.
#[allow(clippy::needless_pass_by_value)]
pub fn debug(state: &State, value: Option<Value>) -> String {
    match value {
        Some(value) => format!("{value:#?}"),
        None => format!("{state:#?}"),
    }
}

/// `value|jsonify`.
///
/// The output is marked safe: JSON is emitted as-is even with autoescape on.
#[allow(clippy::needless_pass_by_value)]
pub fn jsonify(value: Value) -> Result<Value, Error> {
    serde_json::to_string(&value)
        .map(Value::from_safe_string)
        .map_err(|e| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("cannot serialize value to JSON: {e}"),
            )
        })
}

/// Installs the built-in globals and filters and returns the globals.
pub(crate) fn install(env: &mut minijinja::Environment<'static>, app: &Application) -> Context {
    env.add_filter("jsonify", jsonify);

    let globals = Context::from([
        ("app".to_string(), Value::from_object(AppGlobal::new(app))),
        ("debug".to_string(), Value::from_function(debug)),
    ]);
    for (name, value) in &globals {
        env.add_global(name.clone(), value.clone());
    }
    globals
}
