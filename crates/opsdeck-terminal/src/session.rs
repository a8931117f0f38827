//! PTY session: a shareable interactive terminal backed by `portable-pty`.
//!
//! Each `PtySession` owns a pseudo-terminal pair, a spawned child process,
//! a bounded ring buffer of raw output chunks, and a set of attached
//! viewers. A background pump thread continuously drains the master
//! read-end, appending each chunk to history and fanning it out to every
//! viewer. Sessions survive viewer disconnects and can be restarted in
//! place without losing their key or attached viewers.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread::JoinHandle;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, TerminalError};
use crate::key::SessionKey;
use opsdeck_core::config::HISTORY_CAPACITY;

/// Marker appended after a successful in-place restart. Clears the
/// viewer's screen and announces the new process.
pub const RESTART_MARKER: &[u8] =
    b"\r\n\x1b[2J\x1b[H\x1b[32m--- Session Restarted ---\x1b[0m\r\n";

/// What to launch for a session kind.
///
/// Remote-exec shells (container/pod) are expressed as local CLI
/// invocations (`docker exec -it …`, `kubectl exec -it …`) attached to a
/// PTY, so one spec type covers every kind.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<String>,
    pub rows: u16,
    pub cols: u16,
}

impl SessionSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            rows: 24,
            cols: 80,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The built-in "system" kind: an interactive login shell with a
    /// terminal-capable environment.
    pub fn system_shell(shell: Option<&str>) -> Self {
        let shell = shell
            .map(str::to_string)
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/bash".to_string());

        Self::new(shell)
            .arg("--login")
            .env("TERM", "xterm-256color")
            .env("COLORTERM", "truecolor")
    }

    fn command(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(ref cwd) = self.cwd {
            cmd.cwd(cwd);
        }
        cmd
    }
}

/// Identifies one attached viewer within a session.
pub type ViewerId = String;

/// Handle to one connected viewer.
///
/// Output chunks are pushed into the channel best-effort: a full or closed
/// queue drops the frame for that viewer only and never blocks delivery to
/// the others.
#[derive(Clone)]
pub struct ViewerHandle {
    pub id: ViewerId,
    tx: mpsc::Sender<Vec<u8>>,
}

impl ViewerHandle {
    pub fn new(id: impl Into<ViewerId>, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { id: id.into(), tx }
    }

    fn push(&self, chunk: &[u8]) {
        let _ = self.tx.try_send(chunk.to_vec());
    }
}

/// History ring plus viewer set -- everything the pump and the transports
/// mutate, guarded by one lock so chunk ordering is identical for history
/// and every viewer.
struct SharedState {
    history: VecDeque<Vec<u8>>,
    viewers: HashMap<ViewerId, ViewerHandle>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(64),
            viewers: HashMap::new(),
        }
    }

    fn append(&mut self, chunk: &[u8]) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(chunk.to_vec());
        for viewer in self.viewers.values() {
            viewer.push(chunk);
        }
    }

    fn register(&mut self, handle: ViewerHandle) {
        if self.viewers.contains_key(&handle.id) {
            return;
        }
        // Only the first viewer on an otherwise-empty session gets the full
        // replay; a viewer joining an already-watched session starts from
        // the live stream.
        if self.viewers.is_empty() {
            for chunk in &self.history {
                handle.push(chunk);
            }
        }
        self.viewers.insert(handle.id.clone(), handle);
    }
}

/// The OS-level half of a session: PTY master, its write end, and the
/// child. Present while a process is attached; taken during teardown.
struct ProcHandles {
    writer: Box<dyn Write + Send>,
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
}

type ExitHook = Arc<dyn Fn(&PtySession) + Send + Sync>;

/// A live terminal session wrapping a single PTY-attached process.
pub struct PtySession {
    key: SessionKey,
    spec: SessionSpec,
    shared: Mutex<SharedState>,
    proc: Mutex<Option<ProcHandles>>,
    /// Reader produced by the last `setup_process`, waiting for a pump.
    pending_reader: Mutex<Option<Box<dyn Read + Send>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Invoked once when the pump finishes for good (not during restart).
    exit_hook: Mutex<Option<ExitHook>>,
    keep_running: AtomicBool,
    alive: AtomicBool,
    restarting: AtomicBool,
}

impl PtySession {
    /// Allocate a PTY and spawn the child described by `spec`.
    ///
    /// The pump is not started yet -- call [`PtySession::start`] next.
    pub fn spawn(key: SessionKey, spec: SessionSpec) -> Result<Arc<Self>> {
        let session = Arc::new(Self {
            key,
            spec,
            shared: Mutex::new(SharedState::new()),
            proc: Mutex::new(None),
            pending_reader: Mutex::new(None),
            pump: Mutex::new(None),
            exit_hook: Mutex::new(None),
            keep_running: AtomicBool::new(true),
            alive: AtomicBool::new(true),
            restarting: AtomicBool::new(false),
        });
        session.setup_process()?;
        Ok(session)
    }

    /// Begin the I/O pump on a dedicated OS thread; returns immediately.
    ///
    /// `on_exit` runs exactly once when the session terminates for good --
    /// the registry uses it to drop its table entry.
    pub fn start(self: &Arc<Self>, on_exit: impl Fn(&PtySession) + Send + Sync + 'static) {
        *self.exit_hook.lock().unwrap() = Some(Arc::new(on_exit));
        self.spawn_pump();
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Whether the session still owns (or is mid-restart toward) a live
    /// process. Dead sessions are evicted by the registry on next lookup.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Forward raw input bytes to the process. Best-effort -- a dead
    /// process simply drops the input.
    pub fn send_input(&self, data: &[u8]) {
        if let Some(handles) = self.proc.lock().unwrap().as_mut() {
            let _ = handles
                .writer
                .write_all(data)
                .and_then(|_| handles.writer.flush());
        }
    }

    /// Propagate a terminal geometry change. Best-effort.
    pub fn resize(&self, rows: u16, cols: u16) {
        if let Some(handles) = self.proc.lock().unwrap().as_ref() {
            let _ = handles.master.resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            });
        }
    }

    /// Attach a viewer. If the viewer set was empty immediately before
    /// this call, buffered history is replayed to the new viewer first.
    pub fn register_viewer(&self, handle: ViewerHandle) {
        self.shared.lock().unwrap().register(handle);
    }

    /// Detach a viewer. Never terminates the process -- sessions persist
    /// across zero-viewer gaps.
    pub fn unregister_viewer(&self, id: &str) {
        self.shared.lock().unwrap().viewers.remove(id);
    }

    pub fn viewer_count(&self) -> usize {
        self.shared.lock().unwrap().viewers.len()
    }

    /// Append a chunk to history and fan it out to every viewer.
    pub fn append_output(&self, chunk: &[u8]) {
        self.shared.lock().unwrap().append(chunk);
    }

    /// Clone of the buffered history, oldest first.
    pub fn history_snapshot(&self) -> Vec<Vec<u8>> {
        self.shared.lock().unwrap().history.iter().cloned().collect()
    }

    /// Stop the session: the pump observes `keep_running`, and killing the
    /// child unblocks a read that is already in flight.
    pub fn close(&self) {
        self.keep_running.store(false, Ordering::Release);
        if let Some(handles) = self.proc.lock().unwrap().as_mut() {
            let _ = handles.child.kill();
        }
    }

    /// Restart the underlying process in place, keeping the session's key
    /// and attached viewers. Runs on its own thread so the caller (often a
    /// viewer transport, possibly even the pump) is never blocked by
    /// teardown.
    pub fn restart(self: &Arc<Self>) {
        let session = Arc::clone(self);
        std::thread::spawn(move || {
            info!(key = %session.key, "restarting session");
            session.restarting.store(true, Ordering::Release);
            session.close();

            // Wait for the old pump to drain and release the process.
            let old_pump = session.pump.lock().unwrap().take();
            if let Some(handle) = old_pump {
                let _ = handle.join();
            }

            session.shared.lock().unwrap().history.clear();
            session.keep_running.store(true, Ordering::Release);

            match session.setup_process() {
                Ok(()) => {
                    session.restarting.store(false, Ordering::Release);
                    session.spawn_pump();
                    session.append_output(RESTART_MARKER);
                    info!(key = %session.key, "session restarted");
                }
                Err(e) => {
                    warn!(key = %session.key, error = %e, "session restart failed");
                    session.append_output(
                        format!("\r\n\x1b[31mFailed to restart session: {e}\x1b[0m\r\n")
                            .as_bytes(),
                    );
                    session.restarting.store(false, Ordering::Release);
                    session.alive.store(false, Ordering::Release);
                    session.run_exit_hook();
                }
            }
        });
    }

    // -----------------------------------------------------------------------
    // Internal: process lifecycle
    // -----------------------------------------------------------------------

    /// Allocate a fresh PTY pair and spawn the child from the stored spec.
    fn setup_process(&self) -> Result<()> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: self.spec.rows,
                cols: self.spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::PtySpawn(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(self.spec.command())
            .map_err(|e| TerminalError::PtySpawn(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::PtySpawn(e.to_string()))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::PtySpawn(e.to_string()))?;

        *self.proc.lock().unwrap() = Some(ProcHandles {
            writer,
            master: pair.master,
            child,
        });
        *self.pending_reader.lock().unwrap() = Some(reader);
        Ok(())
    }

    fn spawn_pump(self: &Arc<Self>) {
        let reader = self.pending_reader.lock().unwrap().take();
        let Some(reader) = reader else {
            warn!(key = %self.key, "no reader available -- pump not started");
            return;
        };
        let session = Arc::clone(self);
        let handle = std::thread::spawn(move || pump(session, reader));
        *self.pump.lock().unwrap() = Some(handle);
    }

    /// Reap the child (kill first if still running) and drop the PTY
    /// handles, closing the descriptors.
    fn teardown_process(&self) {
        let handles = self.proc.lock().unwrap().take();
        if let Some(mut handles) = handles {
            match handles.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(key = %self.key, status = ?status, "session process exited")
                }
                _ => {
                    let _ = handles.child.kill();
                    let _ = handles.child.wait();
                }
            }
        }
    }

    fn child_exited(&self) -> bool {
        match self.proc.lock().unwrap().as_mut() {
            Some(handles) => matches!(handles.child.try_wait(), Ok(Some(_))),
            None => true,
        }
    }

    fn run_exit_hook(&self) {
        let hook = self.exit_hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(self);
        }
    }
}

/// Per-session read loop. Blocking I/O runs on its own OS thread so it
/// never blocks the async runtime; `close()` kills the child, which
/// unblocks an in-flight read promptly.
fn pump(session: Arc<PtySession>, mut reader: Box<dyn Read + Send>) {
    debug!(key = %session.key, "pump loop started");
    let mut buf = [0u8; 4096];

    loop {
        if !session.keep_running.load(Ordering::Acquire) {
            break;
        }
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!(key = %session.key, "PTY EOF reached");
                break;
            }
            Ok(n) => session.append_output(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO is the normal Linux signal that the child went away;
                // only an error on a still-live session is unexpected.
                let expected = !session.keep_running.load(Ordering::Acquire)
                    || session.child_exited();
                if expected {
                    debug!(key = %session.key, error = %e, "PTY read ended");
                } else {
                    warn!(key = %session.key, error = %e, "PTY read error");
                    session.append_output(
                        format!("\r\n\x1b[31mError reading from PTY: {e}\x1b[0m\r\n").as_bytes(),
                    );
                }
                break;
            }
        }
    }

    session.teardown_process();

    // During a restart the session identity lives on and a new pump takes
    // over; only a terminal exit marks the session dead and self-evicts.
    if !session.restarting.load(Ordering::Acquire) {
        session.alive.store(false, Ordering::Release);
        session.run_exit_hook();
    }
    debug!(key = %session.key, "pump loop finished");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str) -> (ViewerHandle, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(HISTORY_CAPACITY + 16);
        (ViewerHandle::new(id, tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            out.push(chunk);
        }
        out
    }

    #[test]
    fn history_is_bounded_fifo() {
        let mut state = SharedState::new();
        for i in 0..(HISTORY_CAPACITY + 1) {
            state.append(format!("c{i}").as_bytes());
        }
        assert_eq!(state.history.len(), HISTORY_CAPACITY);
        // Oldest chunk was evicted; the newest survives.
        assert_eq!(state.history.front().unwrap(), b"c1");
        assert_eq!(
            state.history.back().unwrap(),
            format!("c{HISTORY_CAPACITY}").as_bytes()
        );
    }

    #[test]
    fn first_viewer_gets_full_replay_in_order() {
        let mut state = SharedState::new();
        state.append(b"c1");
        state.append(b"c2");
        state.append(b"c3");

        let (viewer, mut rx) = handle("v1");
        state.register(viewer);
        assert_eq!(drain(&mut rx), vec![b"c1".to_vec(), b"c2".to_vec(), b"c3".to_vec()]);
    }

    #[test]
    fn second_viewer_gets_nothing_retroactively() {
        let mut state = SharedState::new();
        state.append(b"c1");

        let (first, mut first_rx) = handle("v1");
        state.register(first);
        drain(&mut first_rx);

        let (second, mut second_rx) = handle("v2");
        state.register(second);
        assert!(drain(&mut second_rx).is_empty());

        // Both see chunks produced after they joined.
        state.append(b"c2");
        assert_eq!(drain(&mut first_rx), vec![b"c2".to_vec()]);
        assert_eq!(drain(&mut second_rx), vec![b"c2".to_vec()]);
    }

    #[test]
    fn replay_happens_again_after_all_viewers_leave() {
        let mut state = SharedState::new();
        state.append(b"c1");

        let (first, mut first_rx) = handle("v1");
        state.register(first);
        drain(&mut first_rx);
        state.viewers.remove("v1");

        // The set was empty again, so the next viewer is replayed to.
        let (second, mut second_rx) = handle("v2");
        state.register(second);
        assert_eq!(drain(&mut second_rx), vec![b"c1".to_vec()]);
    }

    #[test]
    fn duplicate_registration_is_ignored() {
        let mut state = SharedState::new();
        let (viewer, _rx) = handle("v1");
        state.register(viewer.clone());
        state.register(viewer);
        assert_eq!(state.viewers.len(), 1);
    }

    #[test]
    fn one_dead_viewer_does_not_block_the_rest() {
        let mut state = SharedState::new();
        let (dead, dead_rx) = handle("dead");
        drop(dead_rx); // closed channel -- every push fails
        state.register(dead);

        let (live, mut live_rx) = handle("live");
        state.register(live);

        state.append(b"chunk");
        assert_eq!(drain(&mut live_rx), vec![b"chunk".to_vec()]);
    }

    #[test]
    fn system_shell_spec_has_terminal_env() {
        let spec = SessionSpec::system_shell(Some("/bin/bash"));
        assert_eq!(spec.program, "/bin/bash");
        assert_eq!(spec.args, vec!["--login".to_string()]);
        assert!(spec
            .env
            .iter()
            .any(|(k, v)| k == "TERM" && v == "xterm-256color"));
    }
}
