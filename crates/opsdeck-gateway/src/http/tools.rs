//! JSON API over tools and their modules.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::app::AppState;
use opsdeck_core::OpsdeckError;
use opsdeck_modules::{ModuleRequest, ServiceStatus};
use opsdeck_tools::ToolStatus;

/// GET /api/tools -- every known tool with live status/version probes.
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Value> {
    // Lazily make sure every registered module has its row (idempotent --
    // a completed pass short-circuits).
    state.modules.sync_tools(&state.tools, false);

    let mut out = Vec::new();
    for tool in state.tools.list().unwrap_or_default() {
        let Some(module) = state.modules.get_module(&tool.name) else {
            continue;
        };
        // Probing an uninstalled service is pointless -- report stopped.
        let service_status = if tool.status == ToolStatus::Installed {
            module.service_status(&tool).await
        } else {
            ServiceStatus::Stopped
        };
        out.push(json!({
            "name": tool.name,
            "display_name": module.name(),
            "status": tool.status,
            "current_stage": tool.current_stage,
            "module_version": module.version(),
            "service_version": module.service_version().await.or_else(|| tool.version.clone()),
            "service_status": service_status,
            "icon": module.icon(),
        }));
    }
    Json(json!({ "tools": out }))
}

/// GET /api/tools/{name} -- detail view context, with the module's context
/// data served through the TTL cache.
pub async fn tool_detail(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let tool = match state.tools.get(&name) {
        Ok(Some(tool)) => tool,
        Ok(None) => return not_found(OpsdeckError::ToolNotFound { name }),
        Err(e) => return internal(e),
    };

    let mut body = json!({ "tool": tool });

    if let Some(module) = state.modules.get_module(&name) {
        let req = module_request(&headers, &params);
        let cache_key = context_cache_key(&name, req.viewer.as_deref(), &req.params);
        let context = match state.context_cache.get(&cache_key) {
            Some(cached) => cached,
            None => {
                let fresh = module.context_data(&req, &tool).await;
                state.context_cache.insert(cache_key, fresh.clone());
                fresh
            }
        };

        body["module"] = json!({
            "id": module.id(),
            "name": module.name(),
            "version": module.version(),
            "description": module.description(),
            "icon": module.icon(),
            "custom_icon_svg": module.custom_icon_svg(),
            "detail_template": module.detail_template(),
            "install_template": module.install_template(),
            "resource_tabs": module.resource_tabs(),
            "service_version": module.service_version().await.or_else(|| tool.version.clone()),
            "context": context,
        });
    }

    Json(body).into_response()
}

/// GET /api/tools/{name}/fragment?target=… -- the module's interactive
/// dispatcher. The no-op sentinel answers 204.
pub async fn tool_fragment(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let target = match params.get("target").or_else(|| params.get("tab")) {
        Some(target) => target.clone(),
        None => {
            let err = OpsdeckError::Internal("missing target parameter".to_string());
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": err.to_string(), "code": err.code() })),
            )
                .into_response();
        }
    };
    module_fragment(state, name, target, params, headers).await
}

/// Shared fragment dispatch, also backing module-declared routes.
pub async fn module_fragment(
    state: Arc<AppState>,
    module_id: String,
    target: String,
    params: HashMap<String, String>,
    headers: HeaderMap,
) -> Response {
    let Some(module) = state.modules.get_module(&module_id) else {
        return not_found(OpsdeckError::ModuleNotFound { id: module_id });
    };
    let tool = match state.tools.get(&module_id) {
        Ok(Some(tool)) => tool,
        Ok(None) => return not_found(OpsdeckError::ToolNotFound { name: module_id }),
        Err(e) => return internal(e),
    };

    let req = module_request(&headers, &params);
    match module.handle_fragment(&req, &tool, &target).await {
        Some(fragment) => Json(fragment).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// POST /api/tools/{name}/install -- run the module's install hook. An
/// install failure leaves the tool row in whatever state the module set
/// and reports the error; it never crashes the gateway.
pub async fn install_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Response {
    let tool = match state.tools.get(&name) {
        Ok(Some(tool)) => tool,
        Ok(None) => return not_found(OpsdeckError::ToolNotFound { name }),
        Err(e) => return internal(e),
    };
    let Some(module) = state.modules.get_module(&name) else {
        return not_found(OpsdeckError::ModuleNotFound { id: name });
    };

    let mut req = module_request(&headers, &HashMap::new());
    req.body = body.map(|Json(value)| value);

    match module.install(&req, &tool, &state.tools).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => {
            warn!(tool = %name, error = %e, "install failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// POST /api/modules/discover -- re-scan the modules directory and sync
/// tool rows. Routes for newly discovered modules mount on next start.
pub async fn rediscover(State(state): State<Arc<AppState>>) -> Json<Value> {
    let dir = std::path::PathBuf::from(&state.config.modules.dir);
    let registered = opsdeck_modules::discover(&state.modules, &dir);
    let synced = state.modules.sync_tools(&state.tools, false);
    Json(json!({ "registered": registered, "synced": synced }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn module_request(headers: &HeaderMap, params: &HashMap<String, String>) -> ModuleRequest {
    ModuleRequest {
        viewer: headers
            .get("x-opsdeck-viewer")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        params: params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<BTreeMap<_, _>>(),
        body: None,
    }
}

/// Cache key over module id, viewer identity, and the request's query
/// parameters (tab, namespace, …) in sorted order.
fn context_cache_key(module: &str, viewer: Option<&str>, params: &BTreeMap<String, String>) -> String {
    let mut key = format!("{module}:{}", viewer.unwrap_or("anonymous"));
    for (name, value) in params {
        key.push(':');
        key.push_str(name);
        key.push('=');
        key.push_str(value);
    }
    key
}

fn not_found(err: OpsdeckError) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": err.to_string(), "code": err.code() })),
    )
        .into_response()
}

fn internal(e: impl std::fmt::Display) -> Response {
    warn!(error = %e, "request failed");
    let err = OpsdeckError::Database(e.to_string());
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string(), "code": err.code() })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_deterministic_over_param_order() {
        let mut a = BTreeMap::new();
        a.insert("tab".to_string(), "pods".to_string());
        a.insert("namespace".to_string(), "default".to_string());

        let key = context_cache_key("k8s", Some("admin"), &a);
        assert_eq!(key, "k8s:admin:namespace=default:tab=pods");
    }

    #[test]
    fn anonymous_viewer_gets_a_stable_key() {
        let key = context_cache_key("docker", None, &BTreeMap::new());
        assert_eq!(key, "docker:anonymous");
    }
}
