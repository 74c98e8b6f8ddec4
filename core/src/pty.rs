//! Long-lived pseudoterminal sessions.
//!
//! Each session wraps one child process attached to a fresh PTY. Output is
//! drained by a blocking reader thread into a broadcast channel; reads by
//! callers collect from that channel for a bounded yield window. Operations
//! on one session serialize; distinct sessions are independent.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use portable_pty::CommandBuilder;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::Duration;
use tokio::time::Instant;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::error::LinconaErr;
use crate::error::Result;
use crate::truncate;

/// How long a read window lasts by default.
pub const DEFAULT_YIELD_MS: u64 = 200;
/// Cap on bytes collected per read window.
pub const MAX_CAPTURE_BYTES: usize = 64 * 1024;
/// Grace given to SIGTERM before escalating to SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Output captured from one read window, already passed through the limiter.
#[derive(Debug)]
pub struct PtyOutput {
    pub output: String,
    pub truncated: bool,
    /// Exit code when the child terminated during (or before) this window.
    pub exited: Option<i32>,
}

struct PtySession {
    writer_tx: mpsc::Sender<Vec<u8>>,
    output_tx: broadcast::Sender<Vec<u8>>,
    exit_rx: watch::Receiver<Option<i32>>,
    killer: StdMutex<Box<dyn portable_pty::ChildKiller + Send + Sync>>,
    pid: Option<u32>,
    /// Serializes open/write/close on this session.
    op_lock: Arc<Mutex<()>>,
}

#[derive(Default)]
pub struct PtyManager {
    sessions: Mutex<HashMap<String, PtySession>>,
}

impl PtyManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn active_ids(&self) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Spawn `/bin/sh -c <cmd>` in `workdir` (already boundary-resolved) under
    /// a new PTY registered as `id`, then collect the initial output window.
    pub async fn open(&self, id: &str, cmd: &str, workdir: &Path) -> Result<PtyOutput> {
        let (handles, op_lock) = {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(id) {
                return Err(LinconaErr::PtyAlreadyOpen(id.to_string()));
            }
            let session = spawn_session(cmd, workdir)?;
            let op_lock = Arc::clone(&session.op_lock);
            let handles = session_handles(&session);
            sessions.insert(id.to_string(), session);
            (handles, op_lock)
        };
        let _guard = op_lock.lock().await;
        debug!(id, cmd, "opened pty session");

        let output = self
            .read_window(id, handles, DEFAULT_YIELD_MS, MAX_CAPTURE_BYTES)
            .await;
        Ok(output)
    }

    /// Write `chars` to the session's stdin and collect output for at most
    /// `yield_ms` or until `max_output_bytes`. When the child exited since the
    /// last call, the final chunk is returned with a termination marker and
    /// the session is closed; later writes fail with `PtyUnknownSession`.
    pub async fn write(
        &self,
        id: &str,
        chars: &str,
        yield_ms: u64,
        max_output_bytes: usize,
    ) -> Result<PtyOutput> {
        // Grab handles without holding the sessions lock across awaits.
        let (handles, op_lock) = {
            let sessions = self.sessions.lock().await;
            let Some(session) = sessions.get(id) else {
                return Err(LinconaErr::PtyUnknownSession(id.to_string()));
            };
            (session_handles(session), Arc::clone(&session.op_lock))
        };
        let _guard = op_lock.lock().await;

        if !chars.is_empty() && handles.writer_tx.send(chars.as_bytes().to_vec()).await.is_err() {
            // Writer task gone means the child is gone; fall through so the
            // final output window and exit status still reach the caller.
            debug!(id, "stdin write failed, child has exited");
        }

        let output = self.read_window(id, handles, yield_ms, max_output_bytes).await;
        Ok(output)
    }

    async fn read_window(
        &self,
        id: &str,
        handles: SessionHandles,
        yield_ms: u64,
        max_output_bytes: usize,
    ) -> PtyOutput {
        let SessionHandles {
            mut output_rx,
            mut exit_rx,
            ..
        } = handles;
        let (collected, exited) =
            collect_window(&mut output_rx, &mut exit_rx, yield_ms, max_output_bytes).await;

        let mut text = String::from_utf8_lossy(&collected).to_string();
        if let Some(code) = exited {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[process exited with code {code}]"));
            self.remove(id).await;
        }
        let (output, truncated) = truncate::truncate_default(&text);
        PtyOutput {
            output,
            truncated,
            exited,
        }
    }

    /// Terminate one session: SIGTERM, up to 2s grace, then SIGKILL.
    pub async fn close(&self, id: &str) -> Result<()> {
        let Some(session) = self.sessions.lock().await.remove(id) else {
            return Err(LinconaErr::PtyUnknownSession(id.to_string()));
        };
        let _guard = session.op_lock.lock().await;
        terminate(&session).await;
        debug!(id, "closed pty session");
        Ok(())
    }

    /// Terminate every session. Exposed to the shutdown coordinator.
    pub async fn close_all(&self) {
        let sessions = std::mem::take(&mut *self.sessions.lock().await);
        for (id, session) in sessions {
            let _guard = session.op_lock.lock().await;
            terminate(&session).await;
            debug!(id, "closed pty session");
        }
    }

    async fn remove(&self, id: &str) {
        self.sessions.lock().await.remove(id);
    }
}

/// Cloneable per-call view of a session's channels.
struct SessionHandles {
    writer_tx: mpsc::Sender<Vec<u8>>,
    output_rx: broadcast::Receiver<Vec<u8>>,
    exit_rx: watch::Receiver<Option<i32>>,
}

fn session_handles(session: &PtySession) -> SessionHandles {
    SessionHandles {
        writer_tx: session.writer_tx.clone(),
        output_rx: session.output_tx.subscribe(),
        exit_rx: session.exit_rx.clone(),
    }
}

async fn terminate(session: &PtySession) {
    if session.exit_rx.borrow().is_some() {
        return;
    }
    if let Some(pid) = session.pid {
        // SAFETY: plain kill(2) on a pid we spawned; no memory is involved.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    let mut exit_rx = session.exit_rx.clone();
    let graceful = timeout(TERM_GRACE, async {
        while exit_rx.borrow().is_none() {
            if exit_rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
    if graceful.is_err() {
        let kill_result = session.killer.lock().map(|mut killer| killer.kill());
        match kill_result {
            Ok(Err(e)) => warn!("SIGKILL failed: {e}"),
            Err(_) => warn!("pty killer mutex poisoned"),
            Ok(Ok(())) => {}
        }
    }
}

/// Collect broadcast output until the deadline, the byte cap, or (with a
/// short drain grace) child exit.
async fn collect_window(
    output_rx: &mut broadcast::Receiver<Vec<u8>>,
    exit_rx: &mut watch::Receiver<Option<i32>>,
    yield_ms: u64,
    cap_bytes: usize,
) -> (Vec<u8>, Option<i32>) {
    let mut collected: Vec<u8> = Vec::with_capacity(4096);
    let deadline = Instant::now() + Duration::from_millis(yield_ms);
    let mut exit_code = *exit_rx.borrow();

    loop {
        let now = Instant::now();
        if now >= deadline || collected.len() >= cap_bytes {
            break;
        }
        let remaining = deadline - now;
        tokio::select! {
            biased;
            changed = exit_rx.changed(), if exit_code.is_none() => {
                if changed.is_ok() {
                    exit_code = *exit_rx.borrow();
                }
                // Small grace period to pull remaining buffered output.
                let grace = Instant::now() + Duration::from_millis(25);
                while Instant::now() < grace && collected.len() < cap_bytes {
                    match timeout(Duration::from_millis(1), output_rx.recv()).await {
                        Ok(Ok(chunk)) => collected.extend_from_slice(&chunk),
                        Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                        _ => break,
                    }
                }
                break;
            }
            chunk = timeout(remaining, output_rx.recv()) => {
                match chunk {
                    Ok(Ok(chunk)) => collected.extend_from_slice(&chunk),
                    Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
                    Ok(Err(broadcast::error::RecvError::Closed)) => {
                        // Reader thread is done; pick up a pending exit code.
                        exit_code = *exit_rx.borrow();
                        break;
                    }
                    Err(_) => break,
                }
            }
        }
    }

    collected.truncate(cap_bytes);
    (collected, exit_code)
}

fn spawn_session(cmd: &str, workdir: &Path) -> Result<PtySession> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| LinconaErr::Io(std::io::Error::other(e.to_string())))?;

    let mut command = CommandBuilder::new("/bin/sh");
    command.arg("-c");
    command.arg(cmd);
    command.cwd(workdir);

    let mut child = pair
        .slave
        .spawn_command(command)
        .map_err(|e| LinconaErr::Io(std::io::Error::other(e.to_string())))?;
    let killer = child.clone_killer();
    let pid = child.process_id();

    // Reader thread: drain the PTY into a broadcast channel.
    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| LinconaErr::Io(std::io::Error::other(e.to_string())))?;
    let (output_tx, _) = broadcast::channel::<Vec<u8>>(256);
    let reader_tx = output_tx.clone();
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let _ = reader_tx.send(buf[..n].to_vec());
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                    continue;
                }
                Err(_) => break,
            }
        }
    });

    // Writer task: apply stdin writes on a blocking thread.
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| LinconaErr::Io(std::io::Error::other(e.to_string())))?;
    let writer = Arc::new(StdMutex::new(writer));
    let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
    tokio::spawn(async move {
        while let Some(bytes) = writer_rx.recv().await {
            let writer = Arc::clone(&writer);
            let _ = tokio::task::spawn_blocking(move || {
                if let Ok(mut guard) = writer.lock() {
                    use std::io::Write;
                    let _ = guard.write_all(&bytes);
                    let _ = guard.flush();
                }
            })
            .await;
        }
    });

    // Reap the child and publish its exit code.
    let (exit_tx, exit_rx) = watch::channel::<Option<i32>>(None);
    tokio::task::spawn_blocking(move || {
        let code = match child.wait() {
            Ok(status) => status.exit_code() as i32,
            Err(_) => -1,
        };
        let _ = exit_tx.send(Some(code));
    });

    Ok(PtySession {
        writer_tx,
        output_tx,
        exit_rx,
        killer: StdMutex::new(killer),
        pid,
        op_lock: Arc::new(Mutex::new(())),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn pty_unavailable(err: &LinconaErr) -> bool {
        let text = err.to_string();
        text.contains("openpty") || text.contains("Operation not permitted")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn duplicate_open_is_rejected() {
        let manager = PtyManager::new();
        let dir = std::env::temp_dir();
        match manager.open("dup", "sleep 5", &dir).await {
            Ok(_) => {}
            Err(e) if pty_unavailable(&e) => return,
            Err(e) => panic!("open failed: {e}"),
        }
        let err = manager.open("dup", "sleep 5", &dir).await.unwrap_err();
        assert!(matches!(err, LinconaErr::PtyAlreadyOpen(_)));
        manager.close_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn write_to_unknown_session_errors() {
        let manager = PtyManager::new();
        let err = manager.write("ghost", "hi\n", 100, 1024).await.unwrap_err();
        assert!(matches!(err, LinconaErr::PtyUnknownSession(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cat_echoes_stdin_back() {
        let manager = PtyManager::new();
        let dir = std::env::temp_dir();
        match manager.open("cat", "/bin/cat", &dir).await {
            Ok(_) => {}
            Err(e) if pty_unavailable(&e) => return,
            Err(e) => panic!("open failed: {e}"),
        }
        let out = manager.write("cat", "hi\n", 500, 64 * 1024).await.unwrap();
        assert!(out.output.contains("hi"), "got: {}", out.output);

        manager.close_all().await;
        let err = manager.write("cat", "again\n", 100, 1024).await.unwrap_err();
        assert!(matches!(err, LinconaErr::PtyUnknownSession(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exited_child_reports_termination() {
        let manager = PtyManager::new();
        let dir = std::env::temp_dir();
        match manager.open("short", "echo done", &dir).await {
            Ok(out) => {
                if out.exited.is_some() {
                    // Exit observed in the first window; session already gone.
                    assert!(out.output.contains("[process exited"));
                    return;
                }
            }
            Err(e) if pty_unavailable(&e) => return,
            Err(e) => panic!("open failed: {e}"),
        }
        // Give the child time to finish, then observe the exit on write.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let out = manager.write("short", "", 200, 64 * 1024).await.unwrap();
        assert!(out.exited.is_some());
        assert!(out.output.contains("[process exited"));
        let err = manager.write("short", "", 100, 1024).await.unwrap_err();
        assert!(matches!(err, LinconaErr::PtyUnknownSession(_)));
    }
}
