//! Route table and prefix handling

use std::collections::HashMap;
use std::sync::Arc;

use crate::behavior::Behavior;
use crate::error::{Result, SocketError};

/// Exact path to behavior. Entries are never overwritten.
#[derive(Debug, Default)]
pub struct RouteTable {
    order: Vec<String>,
    entries: HashMap<String, Arc<Behavior>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `behavior` under `path` exactly as given
    pub fn add(&mut self, path: impl Into<String>, behavior: Arc<Behavior>) -> Result<()> {
        let path = path.into();
        if self.entries.contains_key(&path) {
            return Err(SocketError::DuplicateRoute(path));
        }
        self.order.push(path.clone());
        self.entries.insert(path, behavior);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&Arc<Behavior>> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Registered paths, in registration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Accept only `[A-Za-z0-9/_-]*`
pub fn validate_prefix(prefix: &str) -> Result<()> {
    let valid = prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(SocketError::InvalidPrefix(prefix.to_string()))
    }
}

/// Empty becomes `/`, a leading `/` is ensured and slash runs collapse
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        return "/".to_string();
    }
    if prefix.starts_with('/') {
        collapse_slashes(prefix)
    } else {
        collapse_slashes(&format!("/{}", prefix))
    }
}

/// Final route key for `name` under an already normalized prefix
pub fn route_path(prefix: &str, name: &str) -> String {
    collapse_slashes(&format!("{}{}", prefix, name))
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_slash = false;
    for c in path.chars() {
        if c == '/' {
            if last_slash {
                continue;
            }
            last_slash = true;
        } else {
            last_slash = false;
        }
        out.push(c);
    }
    out
}
