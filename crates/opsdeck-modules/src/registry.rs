//! `ModuleRegistry` -- the process-wide id → module mapping.
//!
//! Written only during discovery and registration (low frequency,
//! effectively single-writer), read constantly by request handlers and the
//! terminal layer, so a plain `RwLock<HashMap>` is enough. Nothing in this
//! component has a fatal path: a misbehaving module is logged and skipped,
//! never propagated.

use std::collections::{BTreeMap, HashMap};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use tracing::{debug, info, warn};

use crate::module::Module;
use opsdeck_terminal::{SessionKindResolver, SessionSpec};
use opsdeck_tools::ToolStore;

pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<dyn Module>>>,
    /// Set after a sync pass; cleared by `register` so newly added modules
    /// get their Tool row on the next pass.
    synced: AtomicBool,
}

impl ModuleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            modules: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
        })
    }

    /// Insert (or replace) the module under its id. Replacement is
    /// last-write-wins and worth a warning in the log.
    pub fn register(&self, module: Arc<dyn Module>) {
        let id = module.id().to_string();
        let previous = self.modules.write().unwrap().insert(id.clone(), module);
        if previous.is_some() {
            warn!(module = %id, "module re-registered -- previous instance replaced");
        } else {
            info!(module = %id, "registered module");
        }
        self.synced.store(false, Ordering::Release);
    }

    pub fn get_module(&self, id: &str) -> Option<Arc<dyn Module>> {
        self.modules.read().unwrap().get(id).cloned()
    }

    pub fn all_modules(&self) -> Vec<Arc<dyn Module>> {
        self.modules.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.modules.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ensure a Tool row exists for every registered module.
    ///
    /// Idempotent: without `force`, a repeat call after a completed pass
    /// short-circuits and touches nothing. Returns the number of modules
    /// visited in this pass (0 when short-circuited). Per-module store
    /// failures are logged and skipped -- the store may simply not be ready
    /// yet during initial setup.
    pub fn sync_tools(&self, store: &ToolStore, force: bool) -> usize {
        if !force && self.synced.load(Ordering::Acquire) {
            return 0;
        }

        let modules = self.all_modules();
        let mut visited = 0;
        for module in &modules {
            match store.get_or_create(module.id(), Some(module.version())) {
                Ok(_) => visited += 1,
                Err(e) => {
                    debug!(module = %module.id(), error = %e, "could not sync module with store")
                }
            }
        }
        self.synced.store(true, Ordering::Release);
        visited
    }
}

/// The seam the terminal layer resolves non-built-in session kinds
/// through: first module declaring the kind wins.
impl SessionKindResolver for ModuleRegistry {
    fn resolve(&self, kind: &str, params: &BTreeMap<String, String>) -> Option<SessionSpec> {
        for module in self.all_modules() {
            if let Some(factory) = module.session_types().get(kind) {
                return factory(params);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::SessionFactory;
    use async_trait::async_trait;
    use opsdeck_tools::{db::init_db, ToolStatus};

    struct MockModule {
        id: &'static str,
        version: &'static str,
    }

    #[async_trait]
    impl Module for MockModule {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            "Mock"
        }
        fn version(&self) -> &str {
            self.version
        }
        fn session_types(&self) -> HashMap<String, SessionFactory> {
            let mut types = HashMap::new();
            let factory: SessionFactory = Arc::new(|_params: &BTreeMap<String, String>| {
                Some(SessionSpec::new("/bin/cat"))
            });
            types.insert("mock".to_string(), factory);
            types
        }
    }

    fn store() -> ToolStore {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        ToolStore::new(conn)
    }

    #[test]
    fn register_and_lookup() {
        let registry = ModuleRegistry::new();
        registry.register(Arc::new(MockModule {
            id: "mock-tool",
            version: "1.0.0",
        }));

        assert!(registry.get_module("mock-tool").is_some());
        assert!(registry.get_module("absent").is_none());
        assert_eq!(registry.all_modules().len(), 1);
    }

    #[test]
    fn reregistration_is_last_write_wins() {
        let registry = ModuleRegistry::new();
        registry.register(Arc::new(MockModule {
            id: "mock-tool",
            version: "1.0.0",
        }));
        registry.register(Arc::new(MockModule {
            id: "mock-tool",
            version: "2.0.0",
        }));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_module("mock-tool").unwrap().version(), "2.0.0");
    }

    #[test]
    fn sync_creates_rows_and_short_circuits() {
        let registry = ModuleRegistry::new();
        let store = store();
        registry.register(Arc::new(MockModule {
            id: "mock-tool",
            version: "1.0.0",
        }));

        assert_eq!(registry.sync_tools(&store, false), 1);
        let tool = store.get("mock-tool").unwrap().unwrap();
        assert_eq!(tool.status, ToolStatus::NotInstalled);
        assert_eq!(tool.version.as_deref(), Some("1.0.0"));

        // A repeat call without force performs no second pass.
        assert_eq!(registry.sync_tools(&store, false), 0);
        // Force always re-evaluates.
        assert_eq!(registry.sync_tools(&store, true), 1);
    }

    #[test]
    fn registering_a_module_resets_the_synced_flag() {
        let registry = ModuleRegistry::new();
        let store = store();
        registry.register(Arc::new(MockModule {
            id: "first",
            version: "1.0.0",
        }));
        assert_eq!(registry.sync_tools(&store, false), 1);

        registry.register(Arc::new(MockModule {
            id: "second",
            version: "1.0.0",
        }));
        assert_eq!(registry.sync_tools(&store, false), 2);
        assert!(store.get("second").unwrap().is_some());
    }

    #[test]
    fn resolves_session_kinds_from_modules() {
        let registry = ModuleRegistry::new();
        registry.register(Arc::new(MockModule {
            id: "mock-tool",
            version: "1.0.0",
        }));

        let params = BTreeMap::new();
        assert!(registry.resolve("mock", &params).is_some());
        assert!(registry.resolve("unheard-of", &params).is_none());
    }
}
