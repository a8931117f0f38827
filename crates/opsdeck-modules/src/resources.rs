//! Typed adapters over orchestration CLI output.
//!
//! `kubectl`/`docker` emit JSON with their own casing and nesting; these
//! adapters resolve an explicit field-mapping at parse time into a flat
//! [`ResourceRecord`]. Unknown fields fail with a typed error at lookup --
//! there is no reflective fallback. Every listing call tolerates
//! malformed or empty CLI output by returning an empty result.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use opsdeck_terminal::exec::{run, ExecOptions};

#[derive(Debug, Error)]
pub enum ResourceError {
    /// The record has no mapping for this field name.
    #[error("field not found: {field}")]
    FieldNotFound { field: String },
}

/// Field-mapping table: our snake_case field name → path into the raw CLI
/// payload (the CLI's own casing).
type FieldPaths = &'static [(&'static str, &'static [&'static str])];

const K8S_FIELDS: FieldPaths = &[
    ("name", &["metadata", "name"]),
    ("scope", &["metadata", "namespace"]),
    ("uid", &["metadata", "uid"]),
    ("status", &["status", "phase"]),
    ("created_at", &["metadata", "creationTimestamp"]),
    ("replicas", &["spec", "replicas"]),
];

const DOCKER_FIELDS: FieldPaths = &[
    ("name", &["Names"]),
    ("id", &["ID"]),
    ("image", &["Image"]),
    ("state", &["State"]),
    ("status", &["Status"]),
    ("created_at", &["CreatedAt"]),
];

/// One resource row (pod, deployment, container, …) in a shape the rest of
/// the system can consume without knowing which CLI produced it.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceRecord {
    pub name: String,
    /// Namespace or equivalent grouping; `None` for unscoped resources.
    pub scope: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<String>,
    #[serde(skip)]
    raw: Value,
    #[serde(skip)]
    fields: FieldPaths,
}

impl ResourceRecord {
    /// Parse one item from `kubectl get -o json`. `None` if the item lacks
    /// a name -- malformed items are dropped, not propagated.
    pub fn from_k8s(item: &Value) -> Option<Self> {
        let name = lookup(item, &["metadata", "name"])?.as_str()?.to_string();
        Some(Self {
            name,
            scope: lookup_str(item, &["metadata", "namespace"]),
            status: lookup_str(item, &["status", "phase"]),
            created_at: lookup_str(item, &["metadata", "creationTimestamp"]),
            raw: item.clone(),
            fields: K8S_FIELDS,
        })
    }

    /// Parse one line of `docker ps --format '{{json .}}'`.
    pub fn from_docker(item: &Value) -> Option<Self> {
        let name = lookup_str(item, &["Names"])
            .or_else(|| lookup_str(item, &["ID"]))?;
        Some(Self {
            name,
            scope: None,
            status: lookup_str(item, &["State"]).or_else(|| lookup_str(item, &["Status"])),
            created_at: lookup_str(item, &["CreatedAt"]),
            raw: item.clone(),
            fields: DOCKER_FIELDS,
        })
    }

    /// Typed lookup into the raw payload by mapped field name.
    pub fn field(&self, name: &str) -> Result<&Value, ResourceError> {
        let path = self
            .fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, path)| *path)
            .ok_or_else(|| ResourceError::FieldNotFound {
                field: name.to_string(),
            })?;
        lookup(&self.raw, path).ok_or_else(|| ResourceError::FieldNotFound {
            field: name.to_string(),
        })
    }
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, segment| v.get(segment))
}

fn lookup_str(value: &Value, path: &[&str]) -> Option<String> {
    lookup(value, path)?.as_str().map(str::to_string)
}

/// Parse a `kubectl get -o json` document into records, tolerating
/// malformed output.
pub fn parse_k8s_items(output: &str) -> Vec<ResourceRecord> {
    let doc: Value = match serde_json::from_str(output) {
        Ok(doc) => doc,
        Err(e) => {
            debug!(error = %e, "unparseable kubectl output");
            return Vec::new();
        }
    };
    doc.get("items")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(ResourceRecord::from_k8s).collect())
        .unwrap_or_default()
}

/// Parse newline-delimited `{{json .}}` docker output, dropping bad lines.
pub fn parse_docker_lines(output: &str) -> Vec<ResourceRecord> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|item| ResourceRecord::from_docker(&item))
        .collect()
}

// ---------------------------------------------------------------------------
// Kubernetes client
// ---------------------------------------------------------------------------

/// Kubeconfig locations probed in order, covering kubeadm, k3s, microk8s,
/// and plain user setups.
const KUBECONFIG_PATHS: &[&str] = &[
    "/etc/kubernetes/admin.conf",
    "/etc/rancher/k3s/k3s.yaml",
    "/var/snap/microk8s/current/credentials/client.config",
    "/root/.kube/config",
];

/// First readable, non-empty kubeconfig, if any.
pub fn find_kubeconfig() -> Option<String> {
    let mut candidates: Vec<String> = KUBECONFIG_PATHS.iter().map(|p| p.to_string()).collect();
    if let Ok(home) = std::env::var("HOME") {
        candidates.push(format!("{home}/.kube/config"));
    }
    candidates.into_iter().find(|path| {
        std::fs::metadata(Path::new(path))
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    })
}

/// Thin `kubectl` adapter.
pub struct KubeClient {
    kubeconfig: Option<String>,
    timeout_secs: u64,
}

impl KubeClient {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            kubeconfig: find_kubeconfig(),
            timeout_secs,
        }
    }

    fn options(&self) -> ExecOptions {
        let mut options = ExecOptions::with_timeout(self.timeout_secs);
        if let Some(ref path) = self.kubeconfig {
            options.env.push(("KUBECONFIG".to_string(), path.clone()));
        }
        options
    }

    /// List resources of one kind; empty on any CLI or parse failure.
    pub async fn list(
        &self,
        resource: &str,
        namespace: Option<&str>,
        all_namespaces: bool,
    ) -> Vec<ResourceRecord> {
        let mut args = vec!["get", resource, "-o", "json"];
        if all_namespaces {
            args.push("-A");
        } else if let Some(ns) = namespace {
            args.extend(["-n", ns]);
        }
        match run("kubectl", &args, self.options()).await {
            Ok(output) => parse_k8s_items(&output.stdout),
            Err(e) => {
                debug!(resource, error = %e, "kubectl list failed");
                Vec::new()
            }
        }
    }

    /// Fetch one resource by name; `None` on absence or failure.
    pub async fn get(
        &self,
        resource: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Option<ResourceRecord> {
        let mut args = vec!["get", resource, name, "-o", "json"];
        if let Some(ns) = namespace {
            args.extend(["-n", ns]);
        }
        let output = run("kubectl", &args, self.options()).await.ok()?;
        let item: Value = serde_json::from_str(&output.stdout).ok()?;
        ResourceRecord::from_k8s(&item)
    }

    pub async fn delete(
        &self,
        resource: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> opsdeck_terminal::Result<()> {
        let mut args = vec!["delete", resource, name];
        if let Some(ns) = namespace {
            args.extend(["-n", ns]);
        }
        run("kubectl", &args, self.options()).await.map(|_| ())
    }

    pub async fn namespaces(&self) -> Vec<String> {
        self.list("namespaces", None, false)
            .await
            .into_iter()
            .map(|record| record.name)
            .collect()
    }

    /// Server version string (e.g. "v1.31.2"), if the cluster answers.
    pub async fn server_version(&self) -> Option<String> {
        let output = run("kubectl", &["version", "-o", "json"], self.options())
            .await
            .ok()?;
        let doc: Value = serde_json::from_str(&output.stdout).ok()?;
        lookup_str(&doc, &["serverVersion", "gitVersion"])
    }

    pub async fn current_context(&self) -> Option<String> {
        let output = run("kubectl", &["config", "current-context"], self.options())
            .await
            .ok()?;
        let context = output.stdout.trim().to_string();
        (!context.is_empty()).then_some(context)
    }

    pub fn kubeconfig(&self) -> Option<&str> {
        self.kubeconfig.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Docker client
// ---------------------------------------------------------------------------

/// Thin `docker` CLI adapter.
pub struct DockerClient {
    timeout_secs: u64,
}

impl DockerClient {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    fn options(&self) -> ExecOptions {
        ExecOptions::with_timeout(self.timeout_secs)
    }

    /// List containers; empty on any CLI or parse failure.
    pub async fn list_containers(&self, all: bool) -> Vec<ResourceRecord> {
        let mut args = vec!["ps", "--format", "{{json .}}"];
        if all {
            args.push("-a");
        }
        match run("docker", &args, self.options()).await {
            Ok(output) => parse_docker_lines(&output.stdout),
            Err(e) => {
                debug!(error = %e, "docker ps failed");
                Vec::new()
            }
        }
    }

    /// Daemon reachability probe -- the typed error distinguishes "stopped"
    /// from "no answer in time".
    pub async fn info(&self) -> opsdeck_terminal::Result<opsdeck_terminal::ExecOutput> {
        run(
            "docker",
            &["info", "--format", "{{.ServerVersion}}"],
            self.options(),
        )
        .await
    }

    pub async fn server_version(&self) -> Option<String> {
        let output = run(
            "docker",
            &["version", "--format", "{{.Server.Version}}"],
            self.options(),
        )
        .await
        .ok()?;
        let version = output.stdout.trim().to_string();
        (!version.is_empty()).then_some(version)
    }

    pub async fn remove_container(&self, name: &str) -> opsdeck_terminal::Result<()> {
        run("docker", &["rm", "-f", name], self.options())
            .await
            .map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_json() -> Value {
        serde_json::json!({
            "metadata": {
                "name": "web-1",
                "namespace": "default",
                "uid": "abc-123",
                "creationTimestamp": "2026-08-01T10:00:00Z"
            },
            "status": { "phase": "Running" }
        })
    }

    #[test]
    fn k8s_record_maps_camel_case_at_parse_time() {
        let record = ResourceRecord::from_k8s(&pod_json()).unwrap();
        assert_eq!(record.name, "web-1");
        assert_eq!(record.scope.as_deref(), Some("default"));
        assert_eq!(record.status.as_deref(), Some("Running"));
        assert_eq!(record.created_at.as_deref(), Some("2026-08-01T10:00:00Z"));
    }

    #[test]
    fn field_lookup_is_typed() {
        let record = ResourceRecord::from_k8s(&pod_json()).unwrap();
        assert_eq!(record.field("uid").unwrap(), "abc-123");

        let err = record.field("flux_capacitance").unwrap_err();
        assert!(matches!(err, ResourceError::FieldNotFound { .. }));
    }

    #[test]
    fn nameless_item_is_dropped() {
        assert!(ResourceRecord::from_k8s(&serde_json::json!({ "status": {} })).is_none());
    }

    #[test]
    fn malformed_list_output_is_empty_not_an_error() {
        assert!(parse_k8s_items("").is_empty());
        assert!(parse_k8s_items("NAME READY STATUS").is_empty());
        assert!(parse_k8s_items("{\"kind\": \"List\"}").is_empty());
    }

    #[test]
    fn k8s_list_parses_items() {
        let doc = serde_json::json!({ "items": [pod_json(), { "bogus": true }] });
        let records = parse_k8s_items(&doc.to_string());
        // The malformed sibling is dropped, not fatal.
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "web-1");
    }

    #[test]
    fn docker_lines_parse_and_tolerate_garbage() {
        let output = concat!(
            "{\"Names\":\"redis\",\"ID\":\"a1b2\",\"State\":\"running\",\"CreatedAt\":\"2026-08-01\"}\n",
            "not json at all\n",
            "{\"Names\":\"postgres\",\"State\":\"exited\"}\n",
        );
        let records = parse_docker_lines(output);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "redis");
        assert_eq!(records[0].status.as_deref(), Some("running"));
        assert_eq!(records[1].name, "postgres");
        assert_eq!(records[1].field("state").unwrap(), "exited");
    }
}
