//! opsdeck-terminal -- multiplexed interactive PTY sessions.
//!
//! The terminal subsystem behind the gateway's live shells:
//! - `PtySession`: one PTY-attached process, a bounded history ring, and a
//!   set of attached viewers fed by a background pump thread
//! - `SessionRegistry`: the process-wide key → session table with
//!   create-on-demand, dead-session eviction, and in-place restart
//! - `exec`: one-shot command execution with a hard timeout, used by
//!   status/version probes and CLI adapters
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use opsdeck_terminal::registry::{NoSessionKinds, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = SessionRegistry::new(Arc::new(NoSessionKinds), None);
//!
//!     // Resolve (or create) the shared system shell.
//!     let session = registry
//!         .get_or_create("system", &BTreeMap::new())
//!         .await
//!         .expect("session unavailable");
//!     session.send_input(b"uptime\n");
//! }
//! ```

pub mod error;
pub mod exec;
pub mod key;
pub mod registry;
pub mod session;

pub use error::{Result, TerminalError};
pub use exec::{run, ExecOptions, ExecOutput, DEFAULT_EXEC_TIMEOUT_SECS};
pub use key::SessionKey;
pub use registry::{NoSessionKinds, SessionKindResolver, SessionRegistry, SYSTEM_KIND};
pub use session::{PtySession, SessionSpec, ViewerHandle, ViewerId, RESTART_MARKER};
