use std::path::Path;

use anyhow::Result;

use crate::infrastructure::manifest::Manifest;

pub mod report;

/// Options forwarded to an extractor implementation.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub source_version: Option<String>,
}

/// The extraction contract the orchestrator consumes. Implementations must
/// keep per-object failures inside the manifest; only environment-level
/// problems (missing input, broken toolchain) may return an error.
pub trait Extractor {
    fn extract(&self, input: &Path, out_dir: &Path, options: &ExtractOptions) -> Result<Manifest>;
}
