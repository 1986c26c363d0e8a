//! Config file loading

use anyhow::{Context, Result};
use basalt_socket::{ListenOptions, ServerOptions};
use serde::Deserialize;
use std::path::Path;

/// Contents of a `basalt-server.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub listen: ListenOptions,
    pub server: ServerOptions,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
