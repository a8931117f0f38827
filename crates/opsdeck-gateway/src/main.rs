use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

mod app;
mod context_cache;
mod http;
mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opsdeck_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path via OPSDECK_CONFIG > ~/.opsdeck/opsdeck.toml
    let config_path = std::env::var("OPSDECK_CONFIG").ok();
    let config = opsdeck_core::OpsdeckConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        opsdeck_core::OpsdeckConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    // initialize SQLite database
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    opsdeck_tools::db::init_db(&db)?;
    info!("database migrations complete");

    let tools = opsdeck_tools::ToolStore::new(db);

    // discover installed modules, then make sure each has its tool row
    let modules = opsdeck_modules::ModuleRegistry::new();
    let modules_dir = std::path::PathBuf::from(&config.modules.dir);
    opsdeck_modules::discover(&modules, &modules_dir);
    modules.sync_tools(&tools, false);

    // terminal registry -- "system" built in, everything else resolved
    // through the installed modules
    let sessions = opsdeck_terminal::SessionRegistry::new(
        Arc::clone(&modules) as Arc<dyn opsdeck_terminal::SessionKindResolver>,
        config.terminal.shell.clone(),
    );

    let state = Arc::new(app::AppState::new(config, tools, modules, sessions));
    let router = app::build_router(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("opsdeck gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
