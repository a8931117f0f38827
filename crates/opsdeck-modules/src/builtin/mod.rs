//! Built-in module implementations.
//!
//! A `module.toml` manifest names one of these kinds; discovery
//! instantiates it with the manifest's identity. The factory table below
//! is the only place a kind string meets an implementation.

use std::sync::Arc;

use crate::discover::ModuleManifest;
use crate::error::{ModuleError, Result};
use crate::module::Module;

pub mod docker;
pub mod kube;

pub use docker::DockerModule;
pub use kube::KubeModule;

/// Deadline for read-only status/version probes (seconds).
pub(crate) const PROBE_TIMEOUT_SECS: u64 = 10;

/// Instantiate the built-in implementation a manifest names.
pub fn instantiate(manifest: &ModuleManifest) -> Result<Arc<dyn Module>> {
    match manifest.kind.as_str() {
        "docker" => Ok(Arc::new(DockerModule::from_manifest(manifest))),
        "k8s" => Ok(Arc::new(KubeModule::from_manifest(manifest))),
        other => Err(ModuleError::UnknownKind {
            kind: other.to_string(),
        }),
    }
}
