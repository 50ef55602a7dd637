//! Default extractor adapters.
//!
//! The orchestrator consumes the [`Extractor`] contract; these are the
//! implementations the CLI can select. The text extractor walks an export
//! directory and normalizes every recognized source into UTF-8. The auto
//! extractor additionally unpacks archive inputs (depth-guarded, members
//! named `archive.zip!path/inside`) and recovers printable strings from
//! binary libraries when no external tool is configured. The command
//! extractor shells out to an external tool (the binary-library toolchain)
//! through a `{input}`/`{output}` template, then re-walks its output. The
//! manifest extractor replays a manifest written by an earlier extraction.

use std::collections::BTreeMap;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{debug, warn};

use crate::domain::source_kind::SourceKind;
use crate::error::EngineError;
use crate::infrastructure::encoding::decode_source;
use crate::infrastructure::manifest::{
    load_manifest, write_manifest, ExtractFailure, Manifest, ManifestEntry,
};
use crate::ports::{ExtractOptions, Extractor};

pub const DEFAULT_ARCHIVE_DEPTH: usize = 3;

const BINARY_SCAN_MAX_BYTES: usize = 12 * 1024 * 1024;
const BINARY_SCAN_MAX_STRINGS: usize = 20_000;
const BINARY_MIN_STRING_RUN: usize = 4;

/// File extensions handled by the binary string fallback.
const BINARY_LIBRARY_EXTENSIONS: &[&str] = &["pbl", "pbr", "pbd", "exe", "dll", "bin"];

/// Walks a directory of exported text sources.
pub struct TextExtractor;

/// Runs an external extraction command, then walks its output directory.
pub struct CommandExtractor {
    template: String,
}

impl CommandExtractor {
    pub fn new(template: impl Into<String>) -> Self {
        CommandExtractor {
            template: template.into(),
        }
    }
}

/// Replays a previously written manifest so a corpus can be re-analyzed
/// without re-extracting.
pub struct ManifestExtractor {
    manifest_path: PathBuf,
}

impl ManifestExtractor {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        ManifestExtractor {
            manifest_path: manifest_path.into(),
        }
    }
}

impl Extractor for ManifestExtractor {
    fn extract(&self, _input: &Path, _out_dir: &Path, _options: &ExtractOptions) -> Result<Manifest> {
        load_manifest(&self.manifest_path)
    }
}

/// Auto-detecting extractor. Accepts export directories, single source
/// files, archives of either, and binary libraries. Archives unpack into a
/// scratch area under the output directory and their members keep
/// `archive.zip!path/inside` source names; binary libraries fall back to
/// printable-string recovery when no external tool handles them.
pub struct AutoExtractor {
    archive_depth_limit: usize,
}

impl AutoExtractor {
    pub fn new(archive_depth_limit: usize) -> Self {
        AutoExtractor {
            archive_depth_limit,
        }
    }
}

impl Default for AutoExtractor {
    fn default() -> Self {
        AutoExtractor::new(DEFAULT_ARCHIVE_DEPTH)
    }
}

struct AutoCandidate {
    source_path: String,
    kind: SourceKind,
    name: String,
    module: Option<String>,
    text: String,
}

struct PendingBinary {
    source_key: String,
    source_path: String,
    file_path: PathBuf,
    name: String,
    module: Option<String>,
}

impl Extractor for AutoExtractor {
    fn extract(&self, input: &Path, out_dir: &Path, options: &ExtractOptions) -> Result<Manifest> {
        if !input.exists() {
            return Err(EngineError::input(format!(
                "input path does not exist: {}",
                input.display()
            ))
            .into());
        }

        let objects_dir = out_dir.join("objects");
        std::fs::create_dir_all(&objects_dir)
            .with_context(|| format!("failed to create {}", objects_dir.display()))?;
        let scratch = out_dir.join("unpacked");

        let mut candidates: BTreeMap<String, AutoCandidate> = BTreeMap::new();
        let mut binaries: Vec<PendingBinary> = Vec::new();
        let mut failures: Vec<ExtractFailure> = Vec::new();

        let root = if input.is_dir() {
            input.to_path_buf()
        } else {
            input.parent().map(Path::to_path_buf).unwrap_or_default()
        };
        self.collect(
            input,
            &root,
            "",
            "",
            0,
            &scratch,
            &mut candidates,
            &mut binaries,
            &mut failures,
        );

        for binary in binaries {
            if candidates.contains_key(&binary.source_key) {
                continue;
            }
            match extract_binary_strings(&binary.file_path) {
                Ok(text) => {
                    candidates.insert(
                        binary.source_key,
                        AutoCandidate {
                            source_path: binary.source_path,
                            kind: SourceKind::Library,
                            name: binary.name,
                            module: binary.module,
                            text,
                        },
                    );
                }
                Err(err) => failures.push(ExtractFailure {
                    path: binary.source_path,
                    reason: format!("binary fallback failed: {err:#}"),
                }),
            }
        }

        // candidate texts are in memory; the unpack area can go
        let _ = std::fs::remove_dir_all(&scratch);

        if candidates.is_empty() && failures.is_empty() && input.is_file() {
            return Err(EngineError::input(format!(
                "no analyzable source found in {}",
                input.display()
            ))
            .into());
        }

        let mut entries = Vec::new();
        for (source_key, candidate) in &candidates {
            let target = objects_dir.join(format!(
                "{}__{}__{}.txt",
                candidate.kind.name().to_lowercase(),
                sanitize(&candidate.name),
                source_key_digest(source_key)
            ));
            if let Err(err) = std::fs::write(&target, &candidate.text) {
                failures.push(ExtractFailure {
                    path: candidate.source_path.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
            entries.push(ManifestEntry {
                object_type: candidate.kind.object_type(),
                name: candidate.name.clone(),
                module: candidate.module.clone(),
                source_path: candidate.source_path.clone(),
                extracted_path: target.display().to_string(),
            });
        }

        if !failures.is_empty() {
            warn!("extraction finished with {} failure(s)", failures.len());
        }

        let manifest = Manifest {
            source_root: input.display().to_string(),
            generated_at: Utc::now().to_rfc3339(),
            extractor: "auto".to_string(),
            source_version: options.source_version.clone(),
            objects: entries,
            failures,
        };
        write_manifest(&out_dir.join("manifest.json"), &manifest)?;
        Ok(manifest)
    }
}

impl AutoExtractor {
    /// Recursive walk. `key_prefix`/`display_prefix` accumulate the
    /// `archive!` chain; `depth` counts unpacked archives on the way here.
    #[allow(clippy::too_many_arguments)]
    fn collect(
        &self,
        path: &Path,
        root: &Path,
        key_prefix: &str,
        display_prefix: &str,
        depth: usize,
        scratch: &Path,
        candidates: &mut BTreeMap<String, AutoCandidate>,
        binaries: &mut Vec<PendingBinary>,
        failures: &mut Vec<ExtractFailure>,
    ) {
        if path.is_dir() {
            let mut children: Vec<PathBuf> = match std::fs::read_dir(path) {
                Ok(entries) => entries.flatten().map(|entry| entry.path()).collect(),
                Err(err) => {
                    failures.push(ExtractFailure {
                        path: path.display().to_string(),
                        reason: err.to_string(),
                    });
                    return;
                }
            };
            children.sort();
            for child in children {
                self.collect(
                    &child,
                    root,
                    key_prefix,
                    display_prefix,
                    depth,
                    scratch,
                    candidates,
                    binaries,
                    failures,
                );
            }
            return;
        }
        if !path.is_file() {
            return;
        }

        let rel_key = relative_key(path, root);
        let source_key = format!("{key_prefix}{rel_key}");
        let source_display = if display_prefix.is_empty() {
            path.display().to_string()
        } else {
            format!("{display_prefix}{rel_key}")
        };

        if let Some(kind) = archive_kind(path) {
            if depth >= self.archive_depth_limit {
                failures.push(ExtractFailure {
                    path: source_display,
                    reason: format!(
                        "archive depth limit exceeded ({})",
                        self.archive_depth_limit
                    ),
                });
                return;
            }
            let unpack_dir = scratch.join(format!("archive_{}", source_key_digest(&source_key)));
            if let Err(err) = unpack_archive(kind, path, &unpack_dir) {
                failures.push(ExtractFailure {
                    path: source_display,
                    reason: format!("{err:#}"),
                });
                return;
            }
            let nested_key = format!("{source_key}!");
            let nested_display = format!("{source_display}!");
            self.collect(
                &unpack_dir,
                &unpack_dir,
                &nested_key,
                &nested_display,
                depth + 1,
                scratch,
                candidates,
                binaries,
                failures,
            );
            return;
        }

        if is_binary_library(path) {
            binaries.push(PendingBinary {
                source_key,
                source_path: source_display,
                file_path: path.to_path_buf(),
                name: stem_of(path),
                module: module_from_rel_key(&rel_key),
            });
            return;
        }

        let kind = match SourceKind::from_path(path) {
            Some(kind) => kind,
            None => return,
        };
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                failures.push(ExtractFailure {
                    path: source_display,
                    reason: err.to_string(),
                });
                return;
            }
        };
        let (text, encoding) = decode_source(&bytes);
        if encoding != "utf-8" {
            debug!("{source_display} decoded as {encoding}");
        }
        candidates.insert(
            source_key,
            AutoCandidate {
                source_path: source_display,
                kind,
                name: stem_of(path),
                module: module_from_rel_key(&rel_key),
                text,
            },
        );
    }
}

/// Resolve the CLI extractor selector.
pub fn select_extractor(
    selector: &str,
    command_template: Option<&str>,
) -> Result<Box<dyn Extractor>> {
    match selector.trim().to_lowercase().as_str() {
        "text" => Ok(Box::new(TextExtractor)),
        "binary" => {
            let template = command_template.ok_or_else(|| {
                EngineError::input("binary extractor requires an extractor command template")
            })?;
            Ok(Box::new(CommandExtractor::new(template)))
        }
        "auto" => match command_template {
            Some(template) => Ok(Box::new(CommandExtractor::new(template))),
            None => Ok(Box::new(AutoExtractor::default())),
        },
        other => Err(EngineError::input(format!("unknown extractor selector: {other}")).into()),
    }
}

impl Extractor for TextExtractor {
    fn extract(&self, input: &Path, out_dir: &Path, options: &ExtractOptions) -> Result<Manifest> {
        if !input.is_dir() {
            return Err(EngineError::input(format!(
                "input path must be an existing directory: {}",
                input.display()
            ))
            .into());
        }
        walk_into_manifest(input, out_dir, "text", options)
    }
}

impl Extractor for CommandExtractor {
    fn extract(&self, input: &Path, out_dir: &Path, options: &ExtractOptions) -> Result<Manifest> {
        if !input.exists() {
            return Err(EngineError::input(format!(
                "input path does not exist: {}",
                input.display()
            ))
            .into());
        }

        let command_dir = out_dir.join("command_output");
        std::fs::create_dir_all(&command_dir)
            .with_context(|| format!("failed to create {}", command_dir.display()))?;

        let command_line = self
            .template
            .replace("{input}", &input.display().to_string())
            .replace("{output}", &command_dir.display().to_string());
        debug!("running extractor command: {command_line}");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&command_line)
            .output()
            .with_context(|| format!("failed to spawn extractor command: {command_line}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::input(format!(
                "extractor command failed ({}): {}",
                output.status,
                stderr.trim()
            ))
            .into());
        }

        walk_into_manifest(&command_dir, out_dir, "command", options)
    }
}

/// Collect recognized sources under `root` into `out_dir/objects`, writing
/// the manifest next to them. Per-file problems become manifest failures.
fn walk_into_manifest(
    root: &Path,
    out_dir: &Path,
    extractor_name: &str,
    options: &ExtractOptions,
) -> Result<Manifest> {
    let objects_dir = out_dir.join("objects");
    std::fs::create_dir_all(&objects_dir)
        .with_context(|| format!("failed to create {}", objects_dir.display()))?;

    let mut entries = Vec::new();
    let mut failures = Vec::new();
    let mut files = Vec::new();
    collect_files(root, &mut files, &mut failures);
    files.sort();

    for (seq, path) in files.iter().enumerate() {
        // the text walk leaves binary libraries to the auto extractor
        if is_binary_library(path) {
            continue;
        }
        let kind = match SourceKind::from_path(path) {
            Some(kind) => kind,
            None => continue,
        };
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_lowercase(),
            None => continue,
        };

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                failures.push(ExtractFailure {
                    path: path.display().to_string(),
                    reason: err.to_string(),
                });
                continue;
            }
        };
        let (text, encoding) = decode_source(&bytes);
        if encoding != "utf-8" {
            debug!("{} decoded as {encoding}", path.display());
        }

        let target = objects_dir.join(format!(
            "{}__{}__{:04}.txt",
            kind.name().to_lowercase(),
            sanitize(&stem),
            seq
        ));
        if let Err(err) = std::fs::write(&target, &text) {
            failures.push(ExtractFailure {
                path: path.display().to_string(),
                reason: err.to_string(),
            });
            continue;
        }

        entries.push(ManifestEntry {
            object_type: kind.object_type(),
            name: stem,
            module: module_of(root, path),
            source_path: path.display().to_string(),
            extracted_path: target.display().to_string(),
        });
    }

    if !failures.is_empty() {
        warn!("extraction finished with {} failure(s)", failures.len());
    }

    let manifest = Manifest {
        source_root: root.display().to_string(),
        generated_at: Utc::now().to_rfc3339(),
        extractor: extractor_name.to_string(),
        source_version: options.source_version.clone(),
        objects: entries,
        failures,
    };

    write_manifest(&out_dir.join("manifest.json"), &manifest)?;
    Ok(manifest)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>, failures: &mut Vec<ExtractFailure>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            failures.push(ExtractFailure {
                path: dir.display().to_string(),
                reason: err.to_string(),
            });
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out, failures);
        } else if path.is_file() {
            out.push(path);
        }
    }
}

/// Module = first directory component under the source root.
fn module_of(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut components = relative.components();
    let first = components.next()?;
    // a file directly under the root has no module
    components.next()?;
    Some(first.as_os_str().to_string_lossy().to_string())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

fn archive_kind(path: &Path) -> Option<ArchiveKind> {
    let name = path.file_name()?.to_str()?.to_lowercase();
    if name.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz") || name.ends_with(".tbz2") {
        Some(ArchiveKind::TarBz2)
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        Some(ArchiveKind::TarXz)
    } else if name.ends_with(".tar") {
        Some(ArchiveKind::Tar)
    } else {
        None
    }
}

fn unpack_archive(kind: ArchiveKind, path: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("failed to create {}", dest.display()))?;
    let file = File::open(path)
        .with_context(|| format!("failed to open archive {}", path.display()))?;
    match kind {
        ArchiveKind::Zip => zip::ZipArchive::new(file)
            .and_then(|mut archive| archive.extract(dest))
            .with_context(|| format!("failed to unpack archive {}", path.display()))?,
        ArchiveKind::Tar => unpack_tar(file, dest, path)?,
        ArchiveKind::TarGz => unpack_tar(flate2::read::GzDecoder::new(file), dest, path)?,
        ArchiveKind::TarBz2 => unpack_tar(bzip2::read::BzDecoder::new(file), dest, path)?,
        ArchiveKind::TarXz => unpack_tar(xz2::read::XzDecoder::new(file), dest, path)?,
    }
    Ok(())
}

fn unpack_tar<R: std::io::Read>(reader: R, dest: &Path, origin: &Path) -> Result<()> {
    tar::Archive::new(reader)
        .unpack(dest)
        .with_context(|| format!("failed to unpack archive {}", origin.display()))
}

fn is_binary_library(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| BINARY_LIBRARY_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Printable-ASCII runs of a binary library, synthesized into a pseudo
/// source so the analysis pipeline can still surface object and table
/// names. Coarser than a real export; last resort when no external tool is
/// configured.
fn extract_binary_strings(path: &Path) -> Result<String> {
    let payload =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if payload.is_empty() {
        bail!("binary file is empty");
    }

    let window = &payload[..payload.len().min(BINARY_SCAN_MAX_BYTES)];
    let mut strings: Vec<&str> = Vec::new();
    let mut run_start: Option<usize> = None;
    for (idx, byte) in window.iter().enumerate() {
        let printable = (0x20..=0x7e).contains(byte);
        match (printable, run_start) {
            (true, None) => run_start = Some(idx),
            (false, Some(start)) => {
                push_printable_run(window, start, idx, &mut strings);
                run_start = None;
            }
            _ => {}
        }
        if strings.len() >= BINARY_SCAN_MAX_STRINGS {
            run_start = None;
            break;
        }
    }
    if let Some(start) = run_start {
        push_printable_run(window, start, window.len(), &mut strings);
    }

    if strings.is_empty() {
        bail!("no printable strings detected");
    }

    let source_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut out = format!("// recovered from binary library strings\n// source={source_name}\n");
    for string in &strings {
        out.push_str(string);
        out.push('\n');
    }
    Ok(out)
}

fn push_printable_run<'a>(window: &'a [u8], start: usize, end: usize, strings: &mut Vec<&'a str>) {
    if end - start < BINARY_MIN_STRING_RUN {
        return;
    }
    if let Ok(text) = std::str::from_utf8(&window[start..end]) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            strings.push(trimmed);
        }
    }
}

/// Short stable digest of a source key; keeps extracted file names unique
/// across archive members with identical stems.
fn source_key_digest(source_key: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    source_key.hash(&mut hasher);
    format!("{:012x}", hasher.finish() & 0xffff_ffff_ffff)
}

/// Path of a file relative to the walk root, `/`-separated.
fn relative_key(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

fn module_from_rel_key(rel_key: &str) -> Option<String> {
    let parts: Vec<&str> = rel_key.split('/').filter(|part| !part.is_empty()).collect();
    if parts.len() > 1 {
        Some(parts[0].to_string())
    } else {
        None
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
