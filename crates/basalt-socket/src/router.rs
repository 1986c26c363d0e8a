//! Event registry
//!
//! A [`Router`] collects named behaviors before they are mounted on a
//! server under a prefix.

use crate::behavior::Behavior;
use crate::error::{Result, SocketError};

/// Named behaviors, kept in insertion order
#[derive(Debug, Clone, Default)]
pub struct Router {
    events: Vec<(String, Behavior)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `behavior` under `name`. Names are unique per router.
    pub fn add(&mut self, name: impl Into<String>, behavior: Behavior) -> Result<()> {
        let name = name.into();
        if self.contains(&name) {
            return Err(SocketError::DuplicateEvent(name));
        }
        self.events.push((name, behavior));
        Ok(())
    }

    /// Builder-style [`Router::add`]
    pub fn event(mut self, name: impl Into<String>, behavior: Behavior) -> Result<Self> {
        self.add(name, behavior)?;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.events.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&Behavior> {
        self.events
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, behavior)| behavior)
    }

    /// Registered events, in insertion order
    pub fn events(&self) -> impl Iterator<Item = (&str, &Behavior)> {
        self.events.iter().map(|(name, b)| (name.as_str(), b))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
