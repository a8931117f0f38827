//! `SessionRegistry` -- the process-wide table mapping session keys to live
//! PTY sessions.
//!
//! The table lock is held only around map mutation. Per-key creation goes
//! through a `tokio::sync::OnceCell`, so two concurrent requests for the
//! same new key produce exactly one child process while requests for
//! different keys never block each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::TerminalError;
use crate::key::SessionKey;
use crate::session::{PtySession, SessionSpec};

/// The only session kind the registry itself knows how to build. Every
/// other kind is resolved through the installed modules.
pub const SYSTEM_KIND: &str = "system";

/// Seam to the module layer: maps a non-built-in session kind plus its
/// parameters to a spawnable spec.
///
/// `None` means "no such session type" -- the caller treats it as session
/// unavailable, not as an error.
pub trait SessionKindResolver: Send + Sync {
    fn resolve(&self, kind: &str, params: &BTreeMap<String, String>) -> Option<SessionSpec>;
}

/// Resolver for deployments with no installed modules.
pub struct NoSessionKinds;

impl SessionKindResolver for NoSessionKinds {
    fn resolve(&self, _kind: &str, _params: &BTreeMap<String, String>) -> Option<SessionSpec> {
        None
    }
}

type Slot = Arc<OnceCell<Arc<PtySession>>>;

pub struct SessionRegistry {
    slots: Mutex<HashMap<SessionKey, Slot>>,
    resolver: Arc<dyn SessionKindResolver>,
    /// Shell override for "system" sessions (from config).
    shell: Option<String>,
}

impl SessionRegistry {
    pub fn new(resolver: Arc<dyn SessionKindResolver>, shell: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
            resolver,
            shell,
        })
    }

    /// Return the live session for this target, creating it on demand.
    ///
    /// `None` means the session is unavailable: the kind is unknown to
    /// every installed module, the parameters were rejected, or the
    /// process/PTY could not be allocated (logged, never propagated).
    pub async fn get_or_create(
        self: &Arc<Self>,
        kind: &str,
        params: &BTreeMap<String, String>,
    ) -> Option<Arc<PtySession>> {
        let key = SessionKey::derive(kind, params);

        let spec = if kind == SYSTEM_KIND {
            SessionSpec::system_shell(self.shell.as_deref())
        } else {
            match self.resolver.resolve(kind, params) {
                Some(spec) => spec,
                None => {
                    debug!(kind, key = %key, "no session type registered for kind");
                    return None;
                }
            }
        };

        // One retry covers the race where a session dies between the
        // aliveness check and the hand-out.
        for _ in 0..2 {
            let cell = self.slot_for(&key);

            let init = cell
                .get_or_try_init(|| async {
                    let spawn_key = key.clone();
                    let spawn_spec = spec.clone();
                    let session =
                        tokio::task::spawn_blocking(move || PtySession::spawn(spawn_key, spawn_spec))
                            .await
                            .map_err(|e| {
                                TerminalError::PtySpawn(format!("spawn task failed: {e}"))
                            })??;

                    let registry = Arc::downgrade(self);
                    session.start(move |ended: &PtySession| {
                        if let Some(registry) = registry.upgrade() {
                            registry.remove_if_same(ended);
                        }
                    });

                    info!(key = %session.key(), "terminal session created");
                    Ok::<Arc<PtySession>, TerminalError>(session)
                })
                .await;

            match init {
                Ok(session) if session.is_alive() => return Some(Arc::clone(session)),
                Ok(_) => {
                    // Initialized earlier but died since -- evict and retry.
                    // Only our own slot may be dropped: a concurrent caller
                    // may already have replaced the entry with a fresh one.
                    self.remove_if_same_cell(&key, &cell);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to create terminal session");
                    self.remove_if_same_cell(&key, &cell);
                    return None;
                }
            }
        }
        None
    }

    /// Request an in-place restart. Fire-and-forget: returns whether a
    /// session exists for the key, not whether the restart succeeded -- the
    /// restart marker in the output stream is the feedback channel.
    pub fn restart(&self, key: &SessionKey) -> bool {
        let session = {
            let slots = self.slots.lock().unwrap();
            slots.get(key).and_then(|cell| cell.get().cloned())
        };
        match session {
            Some(session) => {
                session.restart();
                true
            }
            None => false,
        }
    }

    /// Look up a live session without creating one.
    pub fn get(&self, key: &SessionKey) -> Option<Arc<PtySession>> {
        let slots = self.slots.lock().unwrap();
        slots.get(key).and_then(|cell| cell.get().cloned())
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the table entry for a session that terminated, but only if the
    /// entry still points at that exact session (a replacement created
    /// after its death must survive).
    pub fn remove_if_same(&self, session: &PtySession) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(cell) = slots.get(session.key()) {
            if let Some(current) = cell.get() {
                if std::ptr::eq(Arc::as_ptr(current), session as *const PtySession) {
                    slots.remove(session.key());
                    debug!(key = %session.key(), "session evicted after pump exit");
                }
            }
        }
    }

    fn remove_if_same_cell(&self, key: &SessionKey, cell: &Slot) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(existing) = slots.get(key) {
            if Arc::ptr_eq(existing, cell) {
                slots.remove(key);
            }
        }
    }

    /// Fetch (or install) the once-cell for `key`, evicting a dead entry
    /// first. The table lock is held only for the map operations -- never
    /// across process startup.
    fn slot_for(&self, key: &SessionKey) -> Slot {
        let mut slots = self.slots.lock().unwrap();
        if let Some(cell) = slots.get(key) {
            if let Some(session) = cell.get() {
                if !session.is_alive() {
                    slots.remove(key);
                }
            }
        }
        slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Tests -- see tests/session_lifecycle.rs for the full concurrency and
// restart coverage; these stay at the resolver seam.
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_kind_is_absent_not_an_error() {
        let registry = SessionRegistry::new(Arc::new(NoSessionKinds), None);
        let session = registry.get_or_create("warp-core", &BTreeMap::new()).await;
        assert!(session.is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn restart_of_missing_key_returns_false() {
        let registry = SessionRegistry::new(Arc::new(NoSessionKinds), None);
        let key = SessionKey::derive("system", &BTreeMap::new());
        assert!(!registry.restart(&key));
    }
}
