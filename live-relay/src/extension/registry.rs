//! Extension discovery and the handler lookup tables.
//!
//! Components are not discovered by reflection. Each archive lists its
//! components in `components.json`, and every listed id must have a factory
//! registered in the [`ExtensionCatalog`] for it to be instantiated.
//!
//! The [`ExtensionRegistry`] is populated once at boot and then frozen into a
//! read-only [`HandlerRegistry`].

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, error, info, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use super::manifest::{
    COMPONENT_DESCRIPTOR, ComponentEntry, DEPENDENCY_DESCRIPTOR, Dependency, ExtensionMeta,
    PLUGIN_DESCRIPTOR,
};
use crate::handler::EventHandler;
use crate::{Error, Result};

/// Archive file extensions recognised as extensions.
const ARCHIVE_EXTENSIONS: [&str; 2] = ["zip", "jar"];

type HandlerFactory = Arc<dyn Fn() -> Arc<dyn EventHandler> + Send + Sync>;

/// Factories for every component id the binary knows how to build.
#[derive(Clone, Default)]
pub struct ExtensionCatalog {
    factories: HashMap<String, HandlerFactory>,
}

impl ExtensionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn EventHandler> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    fn create(&self, id: &str) -> Option<Arc<dyn EventHandler>> {
        self.factories.get(id).map(|factory| factory())
    }
}

/// An extension that was registered by a scan.
#[derive(Debug, Clone)]
pub struct LoadedExtension {
    pub meta: ExtensionMeta,
    pub archive: PathBuf,
    pub components: Vec<String>,
    pub dependencies: Vec<Dependency>,
}

/// Declared dependencies of one extension that are not present locally.
pub type MissingDependencies = Vec<(ExtensionMeta, Vec<Dependency>)>;

/// Mutable registry used during boot.
pub struct ExtensionRegistry {
    catalog: ExtensionCatalog,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    defaults: HashMap<String, Arc<dyn EventHandler>>,
    extensions: Vec<LoadedExtension>,
}

impl ExtensionRegistry {
    pub fn new(catalog: ExtensionCatalog) -> Self {
        Self {
            catalog,
            handlers: HashMap::new(),
            defaults: HashMap::new(),
            extensions: Vec::new(),
        }
    }

    /// Register a handler that does not come from an archive.
    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>, default_for: Option<&str>) {
        let id = handler.id().to_string();
        if self.handlers.contains_key(&id) {
            warn!(handler = %id, "Handler already registered, keeping the first one");
            return;
        }
        if let Some(event_type) = default_for {
            self.register_default(event_type, &id, handler.clone());
        }
        self.handlers.insert(id, handler);
    }

    pub fn extensions(&self) -> &[LoadedExtension] {
        &self.extensions
    }

    /// Scan `plugin_dir` for extension archives and register their components.
    ///
    /// Returns, per extension, the declared dependencies whose artifact has no
    /// file in any of `lib_dirs`. Broken archives are logged and skipped.
    pub fn scan(&mut self, plugin_dir: &Path, lib_dirs: &[PathBuf]) -> MissingDependencies {
        info!(dir = %plugin_dir.display(), "Scanning extensions");

        let available = available_artifacts(lib_dirs);
        let mut missing = MissingDependencies::new();
        let mut registered = 0usize;

        for archive in list_files(plugin_dir, |name| {
            ARCHIVE_EXTENSIONS
                .iter()
                .any(|ext| name.to_ascii_lowercase().ends_with(&format!(".{ext}")))
        }) {
            match self.load_archive(&archive) {
                Ok(Some(extension)) => {
                    let absent: Vec<Dependency> = extension
                        .dependencies
                        .iter()
                        .filter(|d| !available.contains(&d.artifact_id))
                        .cloned()
                        .collect();

                    info!(
                        "Registered extension {}: {}",
                        extension.meta, extension.meta.description
                    );
                    missing.push((extension.meta.clone(), absent));
                    self.extensions.push(extension);
                    registered += 1;
                }
                Ok(None) => debug!(archive = %archive.display(), "Not an extension, skipping"),
                Err(e) => {
                    error!(archive = %archive.display(), error = %e, "Failed to load extension")
                }
            }
        }

        if registered == 0 {
            info!("No extensions to load");
        } else {
            info!("Registered {} extensions", registered);
        }
        missing
    }

    /// Read one archive. `Ok(None)` means it is not an extension.
    fn load_archive(&mut self, path: &Path) -> Result<Option<LoadedExtension>> {
        let archive_name = path.display().to_string();
        let file = File::open(path)?;
        let mut zip = ZipArchive::new(file).map_err(|e| Error::malformed(&archive_name, e.to_string()))?;

        let Some(meta_json) = read_entry(&mut zip, PLUGIN_DESCRIPTOR)? else {
            return Ok(None);
        };
        let meta: ExtensionMeta = serde_json::from_str(&meta_json)
            .map_err(|e| Error::malformed(&archive_name, format!("{PLUGIN_DESCRIPTOR}: {e}")))?;

        let mut dependencies: Vec<Dependency> = match read_entry(&mut zip, DEPENDENCY_DESCRIPTOR)? {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                Error::malformed(&archive_name, format!("{DEPENDENCY_DESCRIPTOR}: {e}"))
            })?,
            None => Vec::new(),
        };
        let mut seen = HashSet::new();
        dependencies.retain(|d| seen.insert(d.clone()));

        let entries: Vec<ComponentEntry> = match read_entry(&mut zip, COMPONENT_DESCRIPTOR)? {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                Error::malformed(&archive_name, format!("{COMPONENT_DESCRIPTOR}: {e}"))
            })?,
            None => Vec::new(),
        };

        let mut components = Vec::new();
        for entry in entries.into_iter().filter(ComponentEntry::is_component) {
            match self.catalog.create(&entry.id) {
                Some(handler) => {
                    debug!(archive = %archive_name, component = %entry.id, "Found component");
                    components.push((entry, handler));
                }
                None => warn!(
                    archive = %archive_name,
                    component = %entry.id,
                    "Unknown component, no factory registered"
                ),
            }
        }

        if components.is_empty() {
            return Ok(None);
        }

        let ids = components.iter().map(|(entry, _)| entry.id.clone()).collect();
        for (entry, handler) in components {
            // A duplicate id is dropped entirely, default declaration included.
            if self.handlers.contains_key(&entry.id) {
                warn!(handler = %entry.id, archive = %archive_name, "Handler already registered, keeping the first one");
                continue;
            }
            if let Some(event_type) = entry.default_for.as_deref() {
                self.register_default(event_type, &entry.id, handler.clone());
            }
            self.handlers.insert(entry.id, handler);
        }

        Ok(Some(LoadedExtension {
            meta,
            archive: path.to_path_buf(),
            components: ids,
            dependencies,
        }))
    }

    fn register_default(&mut self, event_type: &str, id: &str, handler: Arc<dyn EventHandler>) {
        match self.defaults.get(event_type) {
            Some(existing) => debug!(
                event_type,
                handler = id,
                existing = existing.id(),
                "Default handler already set, ignoring"
            ),
            None => {
                self.defaults.insert(event_type.to_string(), handler);
            }
        }
    }

    /// Finish registration. The returned tables are read-only.
    pub fn freeze(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
            defaults: self.defaults,
            extensions: self.extensions,
        }
    }
}

/// Read-only handler lookup tables.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    defaults: HashMap<String, Arc<dyn EventHandler>>,
    extensions: Vec<LoadedExtension>,
}

impl HandlerRegistry {
    /// Resolve the handler for a binding.
    ///
    /// With an explicit `handler_id` only the handler table is consulted;
    /// otherwise the default handler for `event_type` is used.
    pub fn resolve_handler(
        &self,
        event_type: &str,
        handler_id: Option<&str>,
    ) -> Result<Arc<dyn EventHandler>> {
        let found = match handler_id {
            Some(id) => self.handlers.get(id),
            None => self.defaults.get(event_type),
        };
        found
            .cloned()
            .ok_or_else(|| Error::handler_miss(event_type, handler_id))
    }

    pub fn handler_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn extensions(&self) -> &[LoadedExtension] {
        &self.extensions
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn library_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.+)-([\d.]+[\w.-]*)\.(\w+)$").unwrap())
}

/// Artifact names of the libraries present in `lib_dirs`.
fn available_artifacts(lib_dirs: &[PathBuf]) -> HashSet<String> {
    let mut artifacts = HashSet::new();
    for dir in lib_dirs {
        for file in list_files(dir, |_| true) {
            let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match library_pattern().captures(name) {
                Some(caps) => {
                    artifacts.insert(caps[1].to_string());
                }
                None => warn!(file = %file.display(), "Unrecognized library file name"),
            }
        }
    }
    artifacts
}

/// Regular files in `dir` whose name passes `filter`, sorted by name.
/// A missing directory yields nothing.
fn list_files(dir: &Path, filter: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "Failed to list directory");
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(&filter)
        })
        .collect();
    files.sort();
    files
}

fn read_entry(zip: &mut ZipArchive<File>, name: &str) -> Result<Option<String>> {
    let mut entry = match zip.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(Some(content))
}
