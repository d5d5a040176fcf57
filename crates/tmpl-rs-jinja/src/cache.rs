//! Bookkeeping for compiled templates.
//!
//! minijinja keeps every template it compiles until it is removed explicitly.
//! [`TemplateCache`] records every name the loader served, whether it was
//! rendered directly or pulled in through `{% extends %}`, `{% include %}` or
//! `{% import %}`, in least-recently-used order. The plugin asks it for the
//! [`overflow`](TemplateCache::overflow) after each render and drops those
//! templates from the environment, so at most `capacity` stay resident.

use std::collections::VecDeque;

/// An LRU list of compiled template names.
#[derive(Debug)]
pub struct TemplateCache {
    capacity: usize,
    order: VecDeque<String>,
}

impl TemplateCache {
    /// Creates a cache that keeps at most `capacity` templates.
    ///
    /// A capacity of `0` keeps nothing between renders.
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
        }
    }

    /// Returns the configured capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Marks `name` as most recently used, adding it if needed.
    pub fn touch(&mut self, name: &str) {
        self.remove(name);
        self.order.push_back(name.to_string());
    }

    /// Returns `true` if more than `capacity` templates are recorded.
    pub fn is_over_capacity(&self) -> bool {
        self.order.len() > self.capacity
    }

    /// Forgets the least recently used names beyond `capacity` and returns
    /// them, oldest first.
    pub fn overflow(&mut self) -> Vec<String> {
        let excess = self.order.len().saturating_sub(self.capacity);
        self.order.drain(..excess).collect()
    }

    /// Forgets every name and returns them, oldest first.
    pub fn clear(&mut self) -> Vec<String> {
        self.order.drain(..).collect()
    }

    /// Forgets `name`. Returns `true` if it was cached.
    pub fn remove(&mut self, name: &str) -> bool {
        if let Some(pos) = self.order.iter().position(|n| n == name) {
            self.order.remove(pos);
            true
        } else {
            false
        }
    }

    /// Returns `true` if `name` is cached.
    pub fn contains(&self, name: &str) -> bool {
        self.order.iter().any(|n| n == name)
    }

    /// Returns the number of cached templates.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the cached names, least recently used first.
    pub fn names(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }
}
