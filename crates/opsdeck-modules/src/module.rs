//! The module capability interface.
//!
//! Every installable module implements [`Module`]. All hooks carry
//! side-effect-free defaults, so a minimal module needs only `id`, `name`,
//! and `version` -- the registry and the gateway can treat every module
//! uniformly without probing for optional methods.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use opsdeck_terminal::SessionSpec;
use opsdeck_tools::{Tool, ToolStore};

/// Builds a spawnable spec for one module-declared session kind from the
/// connection's parameters. `None` means the parameters were rejected.
pub type SessionFactory =
    Arc<dyn Fn(&BTreeMap<String, String>) -> Option<SessionSpec> + Send + Sync>;

/// An HTTP route a module wants mounted. Requests to `path` are answered
/// by the module's `handle_fragment` with the given target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    pub path: String,
    pub target: String,
}

/// A websocket route a module wants mounted, serving interactive shells of
/// the named session kind. Path captures become session parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRouteSpec {
    pub path: String,
    pub kind: String,
}

/// One tab on a tool's resource view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTab {
    pub id: String,
    pub label: String,
    pub template: String,
    /// Seconds between automatic refreshes, when the tab is live.
    pub refresh_secs: Option<u64>,
}

/// A renderable answer from `handle_fragment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub template: String,
    pub context: serde_json::Value,
}

/// Live state of the service a tool manages, as reported by its probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Running,
    Stopped,
    Error,
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Error => "error",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a module hook may need from the incoming request.
#[derive(Debug, Clone, Default)]
pub struct ModuleRequest {
    /// Stable identity of the requesting viewer, when known.
    pub viewer: Option<String>,
    /// Query parameters (tab, namespace, …).
    pub params: BTreeMap<String, String>,
    /// JSON body for mutating requests.
    pub body: Option<serde_json::Value>,
}

/// Capability contract implemented by every installable module.
#[async_trait]
pub trait Module: Send + Sync {
    /// Stable unique identifier -- doubles as the Tool name and the URL
    /// namespace.
    fn id(&self) -> &str;

    /// Human-readable display name.
    fn name(&self) -> &str;

    /// Semantic version of the module itself.
    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// HTTP routes to mount for this module.
    fn routes(&self) -> Vec<RouteSpec> {
        Vec::new()
    }

    /// Websocket shell routes to mount for this module.
    fn websocket_routes(&self) -> Vec<WsRouteSpec> {
        Vec::new()
    }

    /// Icon identifier for the frontend icon set.
    fn icon(&self) -> String {
        self.id().to_string()
    }

    /// Inline SVG payload overriding the icon set, if any.
    fn custom_icon_svg(&self) -> Option<String> {
        None
    }

    /// Template reference for the tool detail view.
    fn detail_template(&self) -> String {
        format!("modules/{}.html", self.id())
    }

    /// Template reference for the installation view, if the module has one.
    fn install_template(&self) -> Option<String> {
        None
    }

    fn resource_tabs(&self) -> Vec<ResourceTab> {
        Vec::new()
    }

    /// Terminal session kinds this module provides.
    fn session_types(&self) -> HashMap<String, SessionFactory> {
        HashMap::new()
    }

    /// Extra context for the tool detail view.
    async fn context_data(&self, _req: &ModuleRequest, _tool: &Tool) -> serde_json::Value {
        serde_json::json!({})
    }

    /// Generic interactive-request dispatcher keyed by an opaque target.
    /// `None` is the no-op sentinel -- the gateway answers 204.
    async fn handle_fragment(
        &self,
        _req: &ModuleRequest,
        _tool: &Tool,
        _target: &str,
    ) -> Option<Fragment> {
        None
    }

    /// Perform (or kick off) installation of the underlying service.
    async fn install(&self, _req: &ModuleRequest, _tool: &Tool, _store: &ToolStore) -> Result<()> {
        Ok(())
    }

    /// Probe the live state of the managed service.
    async fn service_status(&self, _tool: &Tool) -> ServiceStatus {
        ServiceStatus::Running
    }

    /// Version of the managed service itself (not the module).
    async fn service_version(&self) -> Option<String> {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
