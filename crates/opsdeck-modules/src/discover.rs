//! Manifest-driven module discovery.
//!
//! A module installation is a subdirectory of the modules directory
//! carrying a `module.toml` manifest that names which built-in
//! implementation backs it. Discovery is all-or-nothing per module and
//! never fatal: a directory that fails to load is logged and skipped,
//! leaving its siblings untouched.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::builtin;
use crate::error::{ModuleError, Result};
use crate::registry::ModuleRegistry;

/// Contents of a `module.toml` manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleManifest {
    /// Stable module id -- becomes the Tool name and URL namespace.
    pub id: String,
    /// Human display name.
    pub name: String,
    /// Semantic version of the module package.
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Which built-in implementation to instantiate (e.g. "docker").
    pub kind: String,
}

/// Scan `dir` and register every loadable module package.
///
/// A missing directory is created and the call is a no-op. Returns the
/// number of modules registered by this pass.
pub fn discover(registry: &ModuleRegistry, dir: &Path) -> usize {
    if !dir.exists() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %e, "could not create modules directory");
        }
        return 0;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "could not read modules directory");
            return 0;
        }
    };

    let mut package_dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    package_dirs.sort();

    let mut registered = 0;
    for path in package_dirs {
        let manifest_path = path.join("module.toml");
        if !manifest_path.is_file() {
            continue;
        }
        match load_manifest(&manifest_path).and_then(|m| builtin::instantiate(&m)) {
            Ok(module) => {
                registry.register(module);
                registered += 1;
            }
            Err(e) => {
                warn!(package = %path.display(), error = %e, "failed to load module -- skipping");
            }
        }
    }
    info!(dir = %dir.display(), registered, "module discovery complete");
    registered
}

fn load_manifest(path: &Path) -> Result<ModuleManifest> {
    Figment::new()
        .merge(Toml::file(path))
        .extract()
        .map_err(|e| ModuleError::Manifest(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
