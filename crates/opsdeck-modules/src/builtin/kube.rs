//! Kubernetes module: cluster browsing and exec-into-pod shells.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::builtin::PROBE_TIMEOUT_SECS;
use crate::discover::ModuleManifest;
use crate::module::{
    Fragment, Module, ModuleRequest, ResourceTab, ServiceStatus, SessionFactory, WsRouteSpec,
};
use crate::resources::{find_kubeconfig, KubeClient};
use opsdeck_terminal::SessionSpec;
use opsdeck_tools::Tool;

pub struct KubeModule {
    id: String,
    name: String,
    version: String,
    description: String,
    client: KubeClient,
}

impl KubeModule {
    pub fn from_manifest(manifest: &ModuleManifest) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            client: KubeClient::new(PROBE_TIMEOUT_SECS),
        }
    }
}

impl Default for KubeModule {
    fn default() -> Self {
        Self {
            id: "k8s".to_string(),
            name: "Kubernetes".to_string(),
            version: "1.0.0".to_string(),
            description: "Cluster management".to_string(),
            client: KubeClient::new(PROBE_TIMEOUT_SECS),
        }
    }
}

#[async_trait]
impl Module for KubeModule {
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

    fn websocket_routes(&self) -> Vec<WsRouteSpec> {
        vec![WsRouteSpec {
            path: "/ws/shell/k8s/{namespace}/{pod}".to_string(),
            kind: "k8s".to_string(),
        }]
    }

    fn resource_tabs(&self) -> Vec<ResourceTab> {
        vec![
            ResourceTab {
                id: "pods".to_string(),
                label: "Pods".to_string(),
                template: "modules/k8s/pods.html".to_string(),
                refresh_secs: Some(10),
            },
            ResourceTab {
                id: "deployments".to_string(),
                label: "Deployments".to_string(),
                template: "modules/k8s/deployments.html".to_string(),
                refresh_secs: Some(30),
            },
            ResourceTab {
                id: "services".to_string(),
                label: "Services".to_string(),
                template: "modules/k8s/services.html".to_string(),
                refresh_secs: None,
            },
        ]
    }

    fn session_types(&self) -> HashMap<String, SessionFactory> {
        let mut types = HashMap::new();
        let factory: SessionFactory = Arc::new(|params: &BTreeMap<String, String>| {
            let namespace = params.get("namespace")?;
            let pod = params.get("pod")?;
            let mut spec = SessionSpec::new("kubectl")
                .args(["exec", "-it", "-n", namespace.as_str(), pod.as_str(), "--", "/bin/sh"])
                .env("TERM", "xterm-256color");
            if let Some(kubeconfig) = find_kubeconfig() {
                spec = spec.env("KUBECONFIG", kubeconfig);
            }
            Some(spec)
        });
        types.insert("k8s".to_string(), factory);
        types
    }

    async fn context_data(&self, req: &ModuleRequest, _tool: &Tool) -> serde_json::Value {
        let namespace = req
            .params
            .get("namespace")
            .map(String::as_str)
            .unwrap_or("default");
        serde_json::json!({
            "context": self.client.current_context().await,
            "namespaces": self.client.namespaces().await,
            "pods": self.client.list("pods", Some(namespace), false).await,
        })
    }

    async fn handle_fragment(
        &self,
        req: &ModuleRequest,
        _tool: &Tool,
        target: &str,
    ) -> Option<Fragment> {
        let namespace = req.params.get("namespace").map(String::as_str);
        match target {
            "pods" => Some(Fragment {
                template: "modules/k8s/pods.html".to_string(),
                context: serde_json::json!({
                    "pods": self.client.list("pods", namespace, namespace.is_none()).await,
                }),
            }),
            "deployments" => Some(Fragment {
                template: "modules/k8s/deployments.html".to_string(),
                context: serde_json::json!({
                    "deployments": self
                        .client
                        .list("deployments", namespace, namespace.is_none())
                        .await,
                }),
            }),
            "services" => Some(Fragment {
                template: "modules/k8s/services.html".to_string(),
                context: serde_json::json!({
                    "services": self.client.list("services", namespace, namespace.is_none()).await,
                }),
            }),
            _ => None,
        }
    }

    async fn service_status(&self, _tool: &Tool) -> ServiceStatus {
        // An answering API server counts as running; an unreachable one as
        // stopped; anything slower than the probe deadline is unknown.
        match self.client.server_version().await {
            Some(_) => ServiceStatus::Running,
            None => ServiceStatus::Stopped,
        }
    }

    async fn service_version(&self) -> Option<String> {
        self.client.server_version().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
