//! Docker module: container browsing and exec-into-container shells.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::builtin::PROBE_TIMEOUT_SECS;
use crate::discover::ModuleManifest;
use crate::error::{ModuleError, Result};
use crate::module::{
    Fragment, Module, ModuleRequest, ResourceTab, RouteSpec, ServiceStatus, SessionFactory,
    WsRouteSpec,
};
use crate::resources::DockerClient;
use opsdeck_terminal::{exec, SessionSpec, TerminalError};
use opsdeck_tools::{Tool, ToolStatus, ToolStore};

pub struct DockerModule {
    id: String,
    name: String,
    version: String,
    description: String,
    client: DockerClient,
}

impl DockerModule {
    pub fn from_manifest(manifest: &ModuleManifest) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            client: DockerClient::new(PROBE_TIMEOUT_SECS),
        }
    }
}

impl Default for DockerModule {
    fn default() -> Self {
        Self {
            id: "docker".to_string(),
            name: "Docker".to_string(),
            version: "1.0.0".to_string(),
            description: "Container runtime management".to_string(),
            client: DockerClient::new(PROBE_TIMEOUT_SECS),
        }
    }
}

#[async_trait]
impl Module for DockerModule {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn routes(&self) -> Vec<RouteSpec> {
        vec![RouteSpec {
            path: format!("/api/modules/{}/containers", self.id),
            target: "containers".to_string(),
        }]
    }

    fn websocket_routes(&self) -> Vec<WsRouteSpec> {
        vec![WsRouteSpec {
            path: "/ws/shell/docker/{container}".to_string(),
            kind: "docker".to_string(),
        }]
    }

    fn resource_tabs(&self) -> Vec<ResourceTab> {
        vec![
            ResourceTab {
                id: "containers".to_string(),
                label: "Containers".to_string(),
                template: "modules/docker/containers.html".to_string(),
                refresh_secs: Some(10),
            },
            ResourceTab {
                id: "images".to_string(),
                label: "Images".to_string(),
                template: "modules/docker/images.html".to_string(),
                refresh_secs: None,
            },
        ]
    }

    fn session_types(&self) -> HashMap<String, SessionFactory> {
        let mut types = HashMap::new();
        let factory: SessionFactory = Arc::new(|params: &BTreeMap<String, String>| {
            let container = params.get("container")?;
            Some(
                SessionSpec::new("docker")
                    .args(["exec", "-it", container.as_str(), "/bin/sh"])
                    .env("TERM", "xterm-256color"),
            )
        });
        types.insert("docker".to_string(), factory);
        types
    }

    async fn context_data(&self, _req: &ModuleRequest, _tool: &Tool) -> serde_json::Value {
        serde_json::json!({
            "containers": self.client.list_containers(true).await,
            "server_version": self.client.server_version().await,
        })
    }

    async fn handle_fragment(
        &self,
        _req: &ModuleRequest,
        _tool: &Tool,
        target: &str,
    ) -> Option<Fragment> {
        match target {
            "containers" => Some(Fragment {
                template: "modules/docker/containers.html".to_string(),
                context: serde_json::json!({
                    "containers": self.client.list_containers(true).await,
                }),
            }),
            _ => None,
        }
    }

    async fn install(&self, _req: &ModuleRequest, tool: &Tool, store: &ToolStore) -> Result<()> {
        // Installation here means adopting an already-present CLI; actually
        // provisioning the daemon is the operator's job.
        match exec::run("docker", &["--version"], exec::ExecOptions::default()).await {
            Ok(_) => {
                store.update_status(&tool.name, ToolStatus::Installed)?;
                if let Some(version) = self.client.server_version().await {
                    store.update_version(&tool.name, &version)?;
                }
                Ok(())
            }
            Err(e) => {
                warn!(tool = %tool.name, error = %e, "docker CLI not usable");
                store.update_status(&tool.name, ToolStatus::Error)?;
                Err(ModuleError::Install(format!("docker CLI not usable: {e}")))
            }
        }
    }

    async fn service_status(&self, _tool: &Tool) -> ServiceStatus {
        match self.client.info().await {
            Ok(_) => ServiceStatus::Running,
            Err(TerminalError::CommandFailed { .. }) => ServiceStatus::Stopped,
            Err(_) => ServiceStatus::Unknown,
        }
    }

    async fn service_version(&self) -> Option<String> {
        self.client.server_version().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_factory_requires_a_container() {
        let module = DockerModule::default();
        let types = module.session_types();
        let factory = types.get("docker").unwrap();

        assert!(factory(&BTreeMap::new()).is_none());

        let mut params = BTreeMap::new();
        params.insert("container".to_string(), "redis".to_string());
        let spec = factory(&params).unwrap();
        assert_eq!(spec.program, "docker");
        assert_eq!(spec.args, vec!["exec", "-it", "redis", "/bin/sh"]);
    }

    #[test]
    fn declares_its_shell_route() {
        let routes = DockerModule::default().websocket_routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].kind, "docker");
        assert!(routes[0].path.contains("{container}"));
    }
}
