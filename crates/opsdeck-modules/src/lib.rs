//! opsdeck-modules -- the extension-point system.
//!
//! Modules are installable capability bundles: each declares its identity,
//! HTTP and websocket routes, terminal session kinds, and status/version
//! probes through the [`Module`] trait. The registry discovers them from a
//! manifest directory, indexes them process-wide, and keeps the persisted
//! tool table in step.

pub mod builtin;
pub mod discover;
pub mod error;
pub mod module;
pub mod registry;
pub mod resources;

pub use discover::{discover, ModuleManifest};
pub use error::{ModuleError, Result};
pub use module::{
    Fragment, Module, ModuleRequest, ResourceTab, RouteSpec, ServiceStatus, SessionFactory,
    WsRouteSpec,
};
pub use registry::ModuleRegistry;
pub use resources::{DockerClient, KubeClient, ResourceError, ResourceRecord};
