//! Package discovery.
//!
//! Two layouts are recognised under each root:
//!
//! ```text
//! <root>/
//! ├── my-display/            package: has extension.toml
//! │   ├── extension.toml
//! │   └── src/index.js
//! └── hooks/                 local layout: <type-plural>/<name>/index.*
//!     └── audit/
//!         └── index.json
//! ```
//!
//! A broken package never stops the scan; it is skipped and reported as a
//! warning. A missing root is a configuration error.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use super::classifier;
use super::types::{DisplayMeta, EntryPaths, ExtensionDescriptor, ExtensionSource, TypeTag};
use crate::error::{ExtensionError, ExtensionWarning, Result, WarningStage};

/// Manifest file name inside a package directory.
pub const MANIFEST_FILE: &str = "extension.toml";

/// Entry file of a local app extension.
pub const LOCAL_APP_ENTRY: &str = "index.js";

/// Entry file of a local api extension.
pub const LOCAL_API_ENTRY: &str = "index.json";

/// Prefix marking an api entry implemented by the host itself.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Outcome of one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Descriptors sorted by name.
    pub descriptors: Vec<ExtensionDescriptor>,
    pub warnings: Vec<ExtensionWarning>,
}

/// `extension.toml` contents.
#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    entry: ManifestEntry,
    #[serde(default)]
    entries: Vec<ManifestChild>,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestEntry {
    app: Option<String>,
    api: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ManifestChild {
    name: String,
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    entry: ManifestEntry,
}

fn default_enabled() -> bool {
    true
}

/// Scans extension roots into descriptors.
#[derive(Debug, Clone)]
pub struct PackageScanner {
    roots: Vec<PathBuf>,
    disabled: HashSet<String>,
}

impl PackageScanner {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            disabled: HashSet::new(),
        }
    }

    /// Force the named extensions to disabled.
    pub fn with_disabled(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.disabled = names.into_iter().map(Into::into).collect();
        self
    }

    /// Scan every root.
    pub fn scan(&self) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let mut seen = HashSet::new();

        for root in &self.roots {
            for candidate in self.scan_root(root, &mut report.warnings)? {
                if let Some(dup) = candidate.names().find(|n| seen.contains(*n)) {
                    let dup = dup.to_string();
                    warn!(category = "extensions", extension = %dup, root = %candidate.root.display(), "Duplicate extension name, skipping package");
                    report.warnings.push(ExtensionWarning::new(
                        dup,
                        WarningStage::Manifest,
                        format!("duplicate name in {}", candidate.root.display()),
                    ));
                    continue;
                }
                seen.extend(candidate.names().map(str::to_string));
                report.descriptors.push(candidate);
            }
        }

        for descriptor in &mut report.descriptors {
            self.apply_disabled(descriptor);
        }
        report.descriptors.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(
            category = "extensions",
            count = report.descriptors.len(),
            warnings = report.warnings.len(),
            "Scan finished"
        );
        Ok(report)
    }

    fn apply_disabled(&self, descriptor: &mut ExtensionDescriptor) {
        if self.disabled.contains(&descriptor.name) {
            descriptor.enabled = false;
        }
        for child in &mut descriptor.children {
            if self.disabled.contains(&child.name) {
                child.enabled = false;
            }
        }
    }

    fn scan_root(
        &self,
        root: &Path,
        warnings: &mut Vec<ExtensionWarning>,
    ) -> Result<Vec<ExtensionDescriptor>> {
        let mut found = Vec::new();

        for dir in sorted_subdirs(root).map_err(|e| ExtensionError::RootUnavailable {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })? {
            if dir.join(MANIFEST_FILE).is_file() {
                match read_package(&dir) {
                    Ok(descriptor) => found.push(descriptor),
                    Err(e) => {
                        let label = dir_label(&dir);
                        warn!(category = "extensions", package = %dir.display(), error = %e, "Skipping package");
                        warnings.push(ExtensionWarning::new(label, stage_of(&e), e));
                    }
                }
                continue;
            }

            let folder = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            match TypeTag::from_plural(folder) {
                Some(tag) if tag != TypeTag::Bundle => {
                    found.extend(read_local_type_dir(&dir, tag, warnings));
                }
                _ => debug!(category = "extensions", dir = %dir.display(), "Ignoring directory without manifest"),
            }
        }

        Ok(found)
    }
}

/// Scan `directories` with no disable list.
pub fn scan(directories: &[PathBuf]) -> Result<ScanReport> {
    PackageScanner::new(directories.iter().cloned()).scan()
}

fn stage_of(err: &ExtensionError) -> WarningStage {
    match err {
        ExtensionError::UnknownType(_) => WarningStage::Classify,
        _ => WarningStage::Manifest,
    }
}

fn dir_label(dir: &Path) -> String {
    dir.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| dir.display().to_string())
}

fn sorted_subdirs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn read_package(dir: &Path) -> Result<ExtensionDescriptor> {
    let content = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
    let manifest: Manifest = toml::from_str(&content)
        .map_err(|e| ExtensionError::Manifest(format!("{}: {}", MANIFEST_FILE, e)))?;

    validate_name(&manifest.name)?;
    let (tag, _) = classifier::classify_declared(&manifest.type_tag)?;

    let version = manifest
        .version
        .as_deref()
        .map(semver::Version::parse)
        .transpose()
        .map_err(|e| ExtensionError::Manifest(format!("invalid version: {}", e)))?;

    let mut descriptor = ExtensionDescriptor::new(&manifest.name, tag, dir);
    descriptor.enabled = manifest.enabled;
    descriptor.version = version;
    descriptor.display = DisplayMeta {
        label: manifest.label,
        description: manifest.description,
        icon: manifest.icon,
    };

    if tag == TypeTag::Bundle {
        if manifest.entries.is_empty() {
            return Err(ExtensionError::Manifest("bundle declares no entries".to_string()));
        }
        let mut names = HashSet::from([manifest.name.clone()]);
        let mut children = Vec::with_capacity(manifest.entries.len());
        for child in manifest.entries {
            validate_name(&child.name)?;
            if !names.insert(child.name.clone()) {
                return Err(ExtensionError::Manifest(format!(
                    "bundle entry '{}' declared twice",
                    child.name
                )));
            }
            let (child_tag, _) = classifier::classify_declared(&child.type_tag)?;
            if child_tag == TypeTag::Bundle {
                return Err(ExtensionError::Manifest(format!(
                    "bundle entry '{}' cannot itself be a bundle",
                    child.name
                )));
            }
            let mut c = ExtensionDescriptor::new(&child.name, child_tag, dir);
            c.enabled = child.enabled;
            c.display = DisplayMeta {
                label: child.label,
                description: child.description,
                icon: child.icon,
            };
            c.entry_paths = resolve_entries(dir, child_tag, &child.entry)?;
            children.push(c);
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        descriptor = descriptor.with_children(children);
    } else {
        if !manifest.entries.is_empty() {
            return Err(ExtensionError::Manifest(
                "only bundles may declare entries".to_string(),
            ));
        }
        descriptor.entry_paths = resolve_entries(dir, tag, &manifest.entry)?;
    }

    Ok(descriptor)
}

fn read_local_type_dir(
    type_dir: &Path,
    tag: TypeTag,
    warnings: &mut Vec<ExtensionWarning>,
) -> Vec<ExtensionDescriptor> {
    let dirs = match sorted_subdirs(type_dir) {
        Ok(dirs) => dirs,
        Err(e) => {
            warnings.push(ExtensionWarning::new(dir_label(type_dir), WarningStage::Manifest, e));
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for dir in dirs {
        let name = dir_label(&dir);
        if let Err(e) = validate_name(&name) {
            warnings.push(ExtensionWarning::new(name, WarningStage::Manifest, e));
            continue;
        }

        let entry_file = if classifier::is_app_type(tag) {
            LOCAL_APP_ENTRY
        } else {
            LOCAL_API_ENTRY
        };
        let entry = dir.join(entry_file);
        if !entry.is_file() {
            warn!(category = "extensions", extension = %name, "Local extension has no {}", entry_file);
            warnings.push(ExtensionWarning::new(
                name,
                WarningStage::Manifest,
                format!("missing entry file {}", entry_file),
            ));
            continue;
        }

        let mut descriptor = ExtensionDescriptor::new(name, tag, &dir);
        descriptor.source = ExtensionSource::Local;
        if classifier::is_app_type(tag) {
            descriptor.entry_paths.app = Some(entry);
        } else {
            descriptor.entry_paths.api = Some(entry);
        }
        found.push(descriptor);
    }
    found
}

fn resolve_entries(dir: &Path, tag: TypeTag, entry: &ManifestEntry) -> Result<EntryPaths> {
    let app = entry.app.as_deref().map(|p| resolve_entry(dir, p)).transpose()?;
    let api = entry.api.as_deref().map(|p| resolve_entry(dir, p)).transpose()?;

    if classifier::is_app_type(tag) && app.is_none() {
        return Err(ExtensionError::Manifest(format!("{} extension requires entry.app", tag)));
    }
    if classifier::is_api_type(tag) && api.is_none() {
        return Err(ExtensionError::Manifest(format!("{} extension requires entry.api", tag)));
    }

    Ok(EntryPaths { app, api })
}

fn resolve_entry(dir: &Path, relative: &str) -> Result<PathBuf> {
    if relative.starts_with(BUILTIN_PREFIX) {
        return Ok(PathBuf::from(relative));
    }

    let rel = Path::new(relative);
    let escapes = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ExtensionError::Manifest(format!(
            "entry path '{}' must stay inside the package",
            relative
        )));
    }

    let path = dir.join(rel);
    if !path.is_file() {
        return Err(ExtensionError::Manifest(format!("entry file '{}' not found", relative)));
    }
    Ok(path)
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ExtensionError::Manifest(format!("invalid extension name '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::types::ExecutionClass;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn display_package(root: &Path, name: &str) {
        write(
            &root.join(name).join(MANIFEST_FILE),
            &format!("name = \"{name}\"\ntype = \"display\"\n[entry]\napp = \"index.js\"\n"),
        );
        write(&root.join(name).join("index.js"), "export default {};");
    }

    #[test]
    fn test_scan_package_and_local_layouts() {
        let tmp = tempfile::tempdir().unwrap();
        display_package(tmp.path(), "b-display");
        write(&tmp.path().join("hooks/audit/index.json"), "{}");
        write(&tmp.path().join("interfaces/slider/index.js"), "export default {};");

        let report = scan(&[tmp.path().to_path_buf()]).unwrap();
        let names: Vec<_> = report.descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["audit", "b-display", "slider"]);
        assert!(report.warnings.is_empty());

        let audit = &report.descriptors[0];
        assert_eq!(audit.type_tag, TypeTag::Hook);
        assert_eq!(audit.execution_class, ExecutionClass::Api);
        assert_eq!(audit.source, ExtensionSource::Local);
        assert!(audit.entry_paths.api.is_some());
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let result = scan(&[PathBuf::from("/definitely/not/here")]);
        assert!(matches!(result, Err(ExtensionError::RootUnavailable { .. })));
    }

    #[test]
    fn test_broken_manifest_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        display_package(tmp.path(), "good");
        write(&tmp.path().join("broken").join(MANIFEST_FILE), "name = ");
        write(
            &tmp.path().join("weird").join(MANIFEST_FILE),
            "name = \"weird\"\ntype = \"widget\"\n",
        );

        let report = scan(&[tmp.path().to_path_buf()]).unwrap();
        assert_eq!(report.descriptors.len(), 1);
        assert_eq!(report.descriptors[0].name, "good");
        assert_eq!(report.warnings.len(), 2);

        let weird = report.warnings.iter().find(|w| w.extension == "weird").unwrap();
        assert_eq!(weird.stage, WarningStage::Classify);
    }

    #[test]
    fn test_missing_entry_file_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            &tmp.path().join("ghost").join(MANIFEST_FILE),
            "name = \"ghost\"\ntype = \"panel\"\n[entry]\napp = \"dist/index.js\"\n",
        );

        let report = scan(&[tmp.path().to_path_buf()]).unwrap();
        assert!(report.descriptors.is_empty());
        assert!(report.warnings[0].message.contains("not found"));
    }

    #[test]
    fn test_entry_cannot_escape_package() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("secret.js"), "export default {};");
        write(
            &tmp.path().join("sneaky").join(MANIFEST_FILE),
            "name = \"sneaky\"\ntype = \"panel\"\n[entry]\napp = \"../secret.js\"\n",
        );

        let report = scan(&[tmp.path().to_path_buf()]).unwrap();
        assert!(report.descriptors.is_empty());
        assert!(report.warnings[0].message.contains("inside the package"));
    }

    #[test]
    fn test_bundle_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("kit");
        write(
            &dir.join(MANIFEST_FILE),
            r#"
name = "kit"
type = "bundle"
version = "1.0.0"

[[entries]]
name = "kit-panel"
type = "panel"
[entries.entry]
app = "panel.js"

[[entries]]
name = "kit-hook"
type = "hook"
[entries.entry]
api = "hook.json"
"#,
        );
        write(&dir.join("panel.js"), "export default {};");
        write(&dir.join("hook.json"), "{}");

        let report = scan(&[tmp.path().to_path_buf()]).unwrap();
        let kit = &report.descriptors[0];
        assert_eq!(kit.execution_class, ExecutionClass::Hybrid);
        assert_eq!(kit.children.len(), 2);
        assert_eq!(kit.children[0].name, "kit-hook");
        assert_eq!(kit.version, Some(semver::Version::new(1, 0, 0)));
    }

    #[test]
    fn test_bundle_entry_cannot_reuse_bundle_name() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("kit");
        write(
            &dir.join(MANIFEST_FILE),
            r#"
name = "kit"
type = "bundle"

[[entries]]
name = "kit"
type = "panel"
[entries.entry]
app = "panel.js"
"#,
        );
        write(&dir.join("panel.js"), "export default {};");

        let report = scan(&[tmp.path().to_path_buf()]).unwrap();
        assert!(report.descriptors.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("declared twice"));
    }

    #[test]
    fn test_duplicate_names_across_roots() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        display_package(first.path(), "same");
        display_package(second.path(), "same");

        let report = scan(&[first.path().to_path_buf(), second.path().to_path_buf()]).unwrap();
        assert_eq!(report.descriptors.len(), 1);
        assert!(report.descriptors[0].root.starts_with(first.path()));
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].extension, "same");
    }

    #[test]
    fn test_disabled_list_and_manifest_flag() {
        let tmp = tempfile::tempdir().unwrap();
        display_package(tmp.path(), "a");
        display_package(tmp.path(), "b");
        write(
            &tmp.path().join("c").join(MANIFEST_FILE),
            "name = \"c\"\ntype = \"display\"\nenabled = false\n[entry]\napp = \"index.js\"\n",
        );
        write(&tmp.path().join("c/index.js"), "export default {};");

        let report = PackageScanner::new([tmp.path()])
            .with_disabled(["b"])
            .scan()
            .unwrap();
        let enabled: Vec<_> = report
            .descriptors
            .iter()
            .map(|d| (d.name.as_str(), d.enabled))
            .collect();
        assert_eq!(enabled, vec![("a", true), ("b", false), ("c", false)]);
    }
}
