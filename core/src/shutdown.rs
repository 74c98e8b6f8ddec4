//! One-shot shutdown coordinator and process signal plumbing.
//!
//! Components register during startup; the first trigger (SIGTERM, a fatal
//! error, or the normal exit path) runs cleanup in reverse registration
//! order. Later triggers are no-ops. The intended registration order is
//! loggers, then writers, then the PTY manager, then ad-hoc callbacks, so
//! that cleanup runs callbacks first and closes the transcript last.
//! The coordinator also owns the signal listener: SIGTERM triggers shutdown
//! directly, while SIGINT is forwarded to the driver, which decides whether
//! it aborts just the in-flight turn or ends the session.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio::sync::Notify;
use tracing::debug;
use tracing::warn;

use crate::events::EventWriter;
use crate::pty::PtyManager;
use crate::session_log::SessionLogger;

type Callback = Box<dyn FnOnce() -> std::io::Result<()> + Send>;

enum CleanupTask {
    Callback { name: String, run: Callback },
    Writer(Arc<Mutex<EventWriter>>),
    Logger(Arc<Mutex<SessionLogger>>),
    Pty(Arc<PtyManager>),
}

#[derive(Default)]
pub struct ShutdownCoordinator {
    fired: AtomicBool,
    tasks: Mutex<Vec<CleanupTask>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn register_callback(
        &self,
        name: &str,
        run: impl FnOnce() -> std::io::Result<()> + Send + 'static,
    ) {
        self.push(CleanupTask::Callback {
            name: name.to_string(),
            run: Box::new(run),
        });
    }

    pub fn register_writer(&self, writer: Arc<Mutex<EventWriter>>) {
        self.push(CleanupTask::Writer(writer));
    }

    pub fn register_logger(&self, logger: Arc<Mutex<SessionLogger>>) {
        self.push(CleanupTask::Logger(logger));
    }

    pub fn register_pty_manager(&self, manager: Arc<PtyManager>) {
        self.push(CleanupTask::Pty(manager));
    }

    fn push(&self, task: CleanupTask) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }

    /// Run cleanup once, in reverse registration order. Failures are logged
    /// and do not abort the remaining tasks.
    pub async fn shutdown(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("running shutdown cleanup");

        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => return,
        };
        for task in tasks.into_iter().rev() {
            match task {
                CleanupTask::Callback { name, run } => {
                    if let Err(e) = run() {
                        warn!(name, "shutdown callback failed: {e}");
                    }
                }
                CleanupTask::Pty(manager) => manager.close_all().await,
                CleanupTask::Writer(writer) => {
                    let result = writer.lock().map(|mut w| w.sync().and_then(|()| w.close()));
                    match result {
                        Ok(Err(e)) => warn!("failed to close event writer: {e}"),
                        Err(_) => warn!("event writer mutex poisoned during shutdown"),
                        Ok(Ok(())) => {}
                    }
                }
                CleanupTask::Logger(logger) => {
                    let result = logger.lock().map(|mut l| l.close());
                    match result {
                        Ok(Err(e)) => warn!("failed to close session logger: {e}"),
                        Err(_) => warn!("session logger mutex poisoned during shutdown"),
                        Ok(Ok(())) => {}
                    }
                }
            }
        }
    }

    /// Own the process signal handling. SIGTERM runs shutdown and exits;
    /// SIGINT only wakes waiters on the returned [`Notify`] — the driver
    /// selects on it to abort the in-flight turn, and the prompt loop treats
    /// it as a quit, so the coordinator never pre-empts either. When the
    /// listener task ends with the process the streams drop and the default
    /// dispositions come back.
    pub fn listen_for_signals(self: &Arc<Self>) -> Arc<Notify> {
        let interrupts = Arc::new(Notify::new());
        let this = Arc::clone(self);
        let notify = Arc::clone(&interrupts);
        tokio::spawn(async move {
            let (Ok(mut sigint), Ok(mut sigterm)) = (
                signal(SignalKind::interrupt()),
                signal(SignalKind::terminate()),
            ) else {
                warn!("could not install signal handlers");
                return;
            };
            loop {
                tokio::select! {
                    _ = sigint.recv() => {
                        debug!("interrupt received");
                        notify.notify_waiters();
                    }
                    _ = sigterm.recv() => {
                        this.shutdown().await;
                        std::process::exit(143);
                    }
                }
            }
        });
        interrupts
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn runs_callbacks_in_reverse_order_once() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let coordinator = ShutdownCoordinator::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            coordinator.register_callback(&format!("cb{i}"), move || {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }
        coordinator.shutdown().await;
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn second_trigger_is_a_noop() {
        let count = Arc::new(AtomicUsize::new(0));
        let coordinator = ShutdownCoordinator::new();
        {
            let count = Arc::clone(&count);
            coordinator.register_callback("counter", move || {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        coordinator.shutdown().await;
        coordinator.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(coordinator.has_fired());
    }

    #[tokio::test]
    async fn callback_failure_does_not_abort_cleanup() {
        let ran = Arc::new(AtomicBool::new(false));
        let coordinator = ShutdownCoordinator::new();
        {
            let ran = Arc::clone(&ran);
            coordinator.register_callback("first", move || {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            });
        }
        coordinator.register_callback("failing", || Err(std::io::Error::other("boom")));
        coordinator.shutdown().await;
        // "failing" registered last, runs first, and must not stop "first".
        assert!(ran.load(Ordering::SeqCst));
    }
}
