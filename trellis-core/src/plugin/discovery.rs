//! Plugin discovery: filesystem scanning and the manifest catalog.
//!
//! The scanner walks exactly one directory level below the plugins root and
//! reads a `plugin.toml` from each subdirectory. A broken plugin yields a
//! [`DiscoveryError`] and never prevents discovery of its neighbors. Scans
//! publish a complete catalog by swapping an `Arc`, so concurrent readers
//! always see either the previous snapshot or the finished new one, never a
//! half-built map.

use crate::plugin::error::{DiscoveryError, DiscoveryErrorKind};
use crate::plugin::manifest::{PluginManifest, MANIFEST_FILE};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Immutable result of one discovery pass.
#[derive(Debug, Default)]
pub struct Catalog {
    manifests: HashMap<String, PluginManifest>,
    errors: Vec<DiscoveryError>,
    scanned_at: Option<Instant>,
}

impl Catalog {
    /// Look up a manifest by plugin name.
    pub fn manifest(&self, name: &str) -> Option<&PluginManifest> {
        self.manifests.get(name)
    }

    /// All discovered manifests.
    pub fn manifests(&self) -> impl Iterator<Item = &PluginManifest> {
        self.manifests.values()
    }

    /// Number of discovered manifests.
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    /// Per-directory failures of the pass that built this catalog.
    pub fn errors(&self) -> &[DiscoveryError] {
        &self.errors
    }

    /// Manifests carrying the given capability tag.
    pub fn tagged(&self, tag: &str) -> Vec<&PluginManifest> {
        self.manifests.values().filter(|m| m.has_tag(tag)).collect()
    }
}

/// Filesystem scanner with a TTL-cached, swap-published catalog.
pub struct DiscoveryScanner {
    root: PathBuf,
    cache_ttl: Duration,
    slot: RwLock<Arc<Catalog>>,
}

impl DiscoveryScanner {
    /// Create a scanner over the given plugins root.
    ///
    /// `cache_ttl` bounds how stale a cached catalog may be before
    /// [`DiscoveryScanner::cached`] re-walks the filesystem.
    pub fn new(root: impl Into<PathBuf>, cache_ttl: Duration) -> Self {
        Self { root: root.into(), cache_ttl, slot: RwLock::new(Arc::new(Catalog::default())) }
    }

    /// The plugins root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the plugins directory and publish a fresh catalog.
    ///
    /// Safe to call repeatedly and concurrently with readers.
    pub fn scan(&self) -> Arc<Catalog> {
        let mut manifests: HashMap<String, PluginManifest> = HashMap::new();
        let mut errors = Vec::new();

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(root = %self.root.display(), error = %e, "plugins root not readable");
                let catalog = Arc::new(Catalog {
                    manifests,
                    errors,
                    scanned_at: Some(Instant::now()),
                });
                *self.slot.write() = catalog.clone();
                return catalog;
            },
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            let dir_name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if dir_name.starts_with('.') {
                continue;
            }
            match read_manifest(&dir, &dir_name) {
                Ok(manifest) => {
                    if manifests.contains_key(&manifest.name) {
                        errors.push(DiscoveryError {
                            directory: dir_name.clone(),
                            kind: DiscoveryErrorKind::DuplicateName,
                            reason: format!("plugin name {:?} already claimed", manifest.name),
                        });
                        tracing::warn!(directory = %dir_name, plugin = %manifest.name, "duplicate plugin name");
                        continue;
                    }
                    tracing::debug!(plugin = %manifest.name, version = %manifest.version, "discovered plugin");
                    manifests.insert(manifest.name.clone(), manifest);
                },
                Err(error) => {
                    tracing::warn!(directory = %dir_name, reason = %error.reason, "plugin discovery failure");
                    errors.push(error);
                },
            }
        }

        tracing::info!(
            root = %self.root.display(),
            plugins = manifests.len(),
            failures = errors.len(),
            "plugin discovery pass complete"
        );

        let catalog = Arc::new(Catalog { manifests, errors, scanned_at: Some(Instant::now()) });
        *self.slot.write() = catalog.clone();
        catalog
    }

    /// Return the cached catalog, re-scanning when it is stale or absent.
    pub fn cached(&self) -> Arc<Catalog> {
        {
            let current = self.slot.read();
            if let Some(at) = current.scanned_at {
                if at.elapsed() < self.cache_ttl {
                    return current.clone();
                }
            }
        }
        self.scan()
    }

    /// Drop the cached catalog so the next read re-walks the filesystem.
    pub fn invalidate(&self) {
        *self.slot.write() = Arc::new(Catalog::default());
    }

    /// The most recently published catalog without freshness checks.
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.slot.read().clone()
    }
}

fn read_manifest(dir: &Path, dir_name: &str) -> Result<PluginManifest, DiscoveryError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(DiscoveryError {
            directory: dir_name.to_string(),
            kind: DiscoveryErrorKind::MissingManifest,
            reason: format!("no {MANIFEST_FILE} found"),
        });
    }
    let text = std::fs::read_to_string(&manifest_path).map_err(|e| DiscoveryError {
        directory: dir_name.to_string(),
        kind: DiscoveryErrorKind::UnreadableManifest,
        reason: e.to_string(),
    })?;
    PluginManifest::load_str(&text).map_err(|e| DiscoveryError {
        directory: dir_name.to_string(),
        kind: DiscoveryErrorKind::InvalidManifest,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_plugin(root: &Path, dir: &str, manifest: &str) {
        let plugin_dir = root.join(dir);
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join(MANIFEST_FILE), manifest).unwrap();
    }

    #[test]
    fn one_broken_plugin_never_hides_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(
            dir.path(),
            "good",
            "[plugin]\nname = \"good\"\nversion = \"1.0.0\"\n",
        );
        // Missing the required name field.
        write_plugin(dir.path(), "broken", "[plugin]\nversion = \"1.0.0\"\n");

        let scanner = DiscoveryScanner::new(dir.path(), Duration::from_secs(60));
        let catalog = scanner.scan();

        assert_eq!(catalog.len(), 1);
        assert!(catalog.manifest("good").is_some());
        assert_eq!(catalog.errors().len(), 1);
        assert_eq!(catalog.errors()[0].directory, "broken");
        assert_eq!(catalog.errors()[0].kind, DiscoveryErrorKind::InvalidManifest);
    }

    #[test]
    fn directory_without_manifest_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();

        let scanner = DiscoveryScanner::new(dir.path(), Duration::from_secs(60));
        let catalog = scanner.scan();

        assert!(catalog.is_empty());
        assert_eq!(catalog.errors()[0].kind, DiscoveryErrorKind::MissingManifest);
    }

    #[test]
    fn duplicate_names_keep_the_first_directory() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = "[plugin]\nname = \"twin\"\nversion = \"1.0.0\"\n";
        write_plugin(dir.path(), "a-twin", manifest);
        write_plugin(dir.path(), "b-twin", manifest);

        let scanner = DiscoveryScanner::new(dir.path(), Duration::from_secs(60));
        let catalog = scanner.scan();

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.errors().len(), 1);
        assert_eq!(catalog.errors()[0].kind, DiscoveryErrorKind::DuplicateName);
        // Directories are walked in sorted order, so a-twin wins.
        assert_eq!(catalog.errors()[0].directory, "b-twin");
    }

    #[test]
    fn hidden_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), ".git", "not a manifest");

        let scanner = DiscoveryScanner::new(dir.path(), Duration::from_secs(60));
        let catalog = scanner.scan();
        assert!(catalog.is_empty());
        assert!(catalog.errors().is_empty());
    }

    #[test]
    fn cached_reads_do_not_rescan_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "stable", "[plugin]\nname = \"stable\"\nversion = \"1.0.0\"\n");

        let scanner = DiscoveryScanner::new(dir.path(), Duration::from_secs(3600));
        assert_eq!(scanner.cached().len(), 1);

        // A plugin added after the scan stays invisible to cached reads...
        write_plugin(dir.path(), "late", "[plugin]\nname = \"late\"\nversion = \"1.0.0\"\n");
        assert_eq!(scanner.cached().len(), 1);

        // ...until the cache is explicitly invalidated.
        scanner.invalidate();
        assert_eq!(scanner.cached().len(), 2);
    }

    #[test]
    fn missing_root_yields_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let scanner =
            DiscoveryScanner::new(dir.path().join("does-not-exist"), Duration::from_secs(60));
        let catalog = scanner.scan();
        assert!(catalog.is_empty());
    }
}
