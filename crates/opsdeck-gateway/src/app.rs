use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query},
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use opsdeck_core::config::OpsdeckConfig;
use opsdeck_modules::ModuleRegistry;
use opsdeck_terminal::SessionRegistry;
use opsdeck_tools::ToolStore;

use crate::context_cache::ContextCache;
use crate::{http, ws};

/// Central shared state -- passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: OpsdeckConfig,
    pub tools: ToolStore,
    pub modules: Arc<ModuleRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub context_cache: ContextCache,
    /// Active WS connections: conn_id -> session key.
    pub ws_clients: DashMap<String, String>,
}

impl AppState {
    pub fn new(
        config: OpsdeckConfig,
        tools: ToolStore,
        modules: Arc<ModuleRegistry>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        let ttl = Duration::from_secs(config.ui.context_cache_ttl_secs);
        Self {
            config,
            tools,
            modules,
            sessions,
            context_cache: ContextCache::new(ttl),
            ws_clients: DashMap::new(),
        }
    }
}

/// Assemble the full Axum router.
///
/// Module-declared routes are mounted here, after discovery -- a module
/// added at runtime gets its routes on the next start.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(http::health::health_handler))
        .route("/api/tools", get(http::tools::list_tools))
        .route("/api/tools/{name}", get(http::tools::tool_detail))
        .route("/api/tools/{name}/fragment", get(http::tools::tool_fragment))
        .route("/api/tools/{name}/install", post(http::tools::install_tool))
        .route("/api/modules/discover", post(http::tools::rediscover))
        .route("/ws/shell/system", get(ws::terminal::system_shell_handler));

    for module in state.modules.all_modules() {
        for spec in module.websocket_routes() {
            let kind = spec.kind.clone();
            let shared = Arc::clone(&state);
            router = router.route(
                &spec.path,
                get(
                    move |upgrade: WebSocketUpgrade,
                          Path(params): Path<HashMap<String, String>>| {
                        let state = Arc::clone(&shared);
                        let kind = kind.clone();
                        async move { ws::terminal::shell_upgrade(upgrade, state, kind, params) }
                    },
                ),
            );
        }
        for spec in module.routes() {
            let module_id = module.id().to_string();
            let target = spec.target.clone();
            let shared = Arc::clone(&state);
            router = router.route(
                &spec.path,
                get(
                    move |Query(params): Query<HashMap<String, String>>, headers: HeaderMap| {
                        let state = Arc::clone(&shared);
                        let module_id = module_id.clone();
                        let target = target.clone();
                        async move {
                            http::tools::module_fragment(state, module_id, target, params, headers)
                                .await
                        }
                    },
                ),
            );
        }
    }

    router
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use opsdeck_terminal::SessionKindResolver;

    fn test_state() -> Arc<AppState> {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        opsdeck_tools::db::init_db(&conn).unwrap();
        let tools = ToolStore::new(conn);
        let modules = ModuleRegistry::new();
        let sessions = SessionRegistry::new(
            Arc::clone(&modules) as Arc<dyn SessionKindResolver>,
            None,
        );
        Arc::new(AppState::new(
            OpsdeckConfig::default(),
            tools,
            modules,
            sessions,
        ))
    }

    #[tokio::test]
    async fn router_builds_with_module_routes_mounted() {
        let state = test_state();
        state
            .modules
            .register(Arc::new(opsdeck_modules::builtin::DockerModule::default()));
        // Re-assembling after registration mounts the docker shell route;
        // this is a build-time smoke check, not a request-level test.
        let _router = build_router(state);
    }
}
