//! Engine configuration.
//!
//! Injected at orchestrator construction; there is no process-wide config
//! state. A TOML file can override the defaults.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_MAX_ERRORS_PER_FILE: usize = 100;

/// Tunable knobs for one orchestrator instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parse errors tolerated per file before the file is abandoned.
    pub max_errors_per_file: usize,
    /// Table names suppressed from SQL reference emission (for example
    /// `dual`). Compared lower-case.
    pub table_exceptions: Vec<String>,
    /// Worker pool size override; defaults to the CPU count.
    pub workers: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_errors_per_file: DEFAULT_MAX_ERRORS_PER_FILE,
            table_exceptions: Vec::new(),
            workers: None,
        }
    }
}

impl EngineConfig {
    /// Load overrides from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: EngineConfig = toml::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Lower-cased exception set for the SQL table extractor.
    pub fn exception_set(&self) -> HashSet<String> {
        self.table_exceptions
            .iter()
            .map(|name| name.to_lowercase())
            .collect()
    }
}
