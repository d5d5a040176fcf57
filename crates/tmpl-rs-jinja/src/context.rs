//! Render contexts and context providers.
//!
//! A [`Context`] maps variable names to minijinja values. Context providers add
//! variables to every render automatically; they mirror the request-independent
//! part of context processors in other frameworks and may be synchronous or
//! asynchronous.

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use minijinja::value::ValueKind;
use minijinja::Value;
use serde::Serialize;
use tmpl_rs_core::error::{TmplError, TmplResult};

/// The variables available to one render, in deterministic (sorted) order.
pub type Context = BTreeMap<String, Value>;

/// Supplies variables to every template render.
///
/// Providers run in registration order each time a context is assembled; a
/// failing provider aborts the render.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Returns the variables to merge into the render context.
    async fn provide(&self) -> TmplResult<Context>;
}

/// A synchronous, infallible provider built from a closure.
pub struct FnProvider<F>(pub F);

#[async_trait]
impl<F> ContextProvider for FnProvider<F>
where
    F: Fn() -> Context + Send + Sync,
{
    async fn provide(&self) -> TmplResult<Context> {
        Ok((self.0)())
    }
}

/// An asynchronous, fallible provider built from a closure returning a future.
pub struct AsyncFnProvider<F>(pub F);

#[async_trait]
impl<F, Fut> ContextProvider for AsyncFnProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = TmplResult<Context>> + Send,
{
    async fn provide(&self) -> TmplResult<Context> {
        (self.0)().await
    }
}

/// Builds a [`Context`] from name/value pairs.
///
/// # Examples
///
/// ```
/// use tmpl_rs_jinja::context::context_from;
///
/// let ctx = context_from([("name", "jinja"), ("greeting", "hello")]);
/// assert_eq!(ctx["name"].as_str(), Some("jinja"));
/// ```
pub fn context_from<K, V, I>(pairs: I) -> Context
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Builds a [`Context`] from any serializable map-like value (a struct, a
/// `HashMap`, parsed query parameters, ...).
///
/// # Errors
///
/// Returns `SerializationError` if `value` does not serialize to a map.
pub fn context_from_serialize<S: Serialize>(value: &S) -> TmplResult<Context> {
    let value = Value::from_serialize(value);
    if value.kind() != ValueKind::Map {
        return Err(TmplError::SerializationError(format!(
            "Expected a map-like context, got {}",
            value.kind()
        )));
    }

    let keys = value
        .try_iter()
        .map_err(|e| TmplError::SerializationError(e.to_string()))?;
    let mut ctx = Context::new();
    for key in keys {
        let item = value
            .get_item(&key)
            .map_err(|e| TmplError::SerializationError(e.to_string()))?;
        ctx.insert(key.to_string(), item);
    }
    Ok(ctx)
}

/// Merges `layer` into `base`; keys in `layer` win.
pub fn merge_into(base: &mut Context, layer: Context) {
    base.extend(layer);
}
