//! Extraction manifest.
//!
//! The extractor contract hands the orchestrator a manifest: one entry per
//! extracted object plus per-object failures. Stored as JSON next to the
//! extracted files so a run can be re-analyzed without re-extracting.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::ir::ObjectType;

/// One extracted object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub object_type: ObjectType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub source_path: String,
    pub extracted_path: String,
}

/// A per-object extraction failure. Never aborts the run; degrades the
/// outcome to partial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractFailure {
    pub path: String,
    pub reason: String,
}

/// The extractor output consumed by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub source_root: String,
    #[serde(default)]
    pub generated_at: String,
    #[serde(default)]
    pub extractor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,
    #[serde(default)]
    pub objects: Vec<ManifestEntry>,
    #[serde(default)]
    pub failures: Vec<ExtractFailure>,
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("manifest file not found: {}", path.display()))?;
    let manifest = serde_json::from_str(&raw)
        .with_context(|| format!("invalid manifest file: {}", path.display()))?;
    Ok(manifest)
}

pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let payload = serde_json::to_string_pretty(manifest).context("failed to encode manifest")?;
    std::fs::write(path, payload)
        .with_context(|| format!("failed to write manifest {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_manifest_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/manifest.json");

        let manifest = Manifest {
            source_root: "/src".to_string(),
            generated_at: "2024-01-01T00:00:00Z".to_string(),
            extractor: "text".to_string(),
            source_version: Some("r42".to_string()),
            objects: vec![ManifestEntry {
                object_type: ObjectType::Screen,
                name: "w_main".to_string(),
                module: Some("orders".to_string()),
                source_path: "/src/orders/w_main.srw".to_string(),
                extracted_path: "/out/objects/screen__w_main.txt".to_string(),
            }],
            failures: vec![ExtractFailure {
                path: "/src/broken.srw".to_string(),
                reason: "unreadable".to_string(),
            }],
        };

        write_manifest(&path, &manifest).unwrap();
        let loaded = load_manifest(&path).unwrap();
        assert_eq!(loaded.objects.len(), 1);
        assert_eq!(loaded.objects[0].object_type, ObjectType::Screen);
        assert_eq!(loaded.failures.len(), 1);
        assert_eq!(loaded.source_version.as_deref(), Some("r42"));
    }

    #[test]
    fn test_missing_manifest_is_error() {
        assert!(load_manifest(Path::new("/nonexistent/manifest.json")).is_err());
    }
}
