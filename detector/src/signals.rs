use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Process-wide requests raised by signals and polled at loop checkpoints.
///
/// Each flag has a single writer (its signal listener) and is read by the
/// capture loop or the scheduler. The `Notify` only wakes waiters so they can
/// re-check the flags; it carries no state of its own.
#[derive(Debug, Default)]
pub struct SignalFlags {
    terminate: AtomicBool,
    reload: AtomicBool,
    capture_now: AtomicBool,
    wakeup: Notify,
}

impl SignalFlags {
    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.wakeup.notify_waiters();
    }

    pub fn terminate_requested(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::SeqCst);
        self.wakeup.notify_waiters();
    }

    pub fn reload_requested(&self) -> bool {
        self.reload.load(Ordering::SeqCst)
    }

    /// Consume a pending reload request.
    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }

    pub fn request_capture(&self) {
        self.capture_now.store(true, Ordering::SeqCst);
        self.wakeup.notify_waiters();
    }

    pub fn capture_requested(&self) -> bool {
        self.capture_now.load(Ordering::SeqCst)
    }

    pub fn clear_capture(&self) {
        self.capture_now.store(false, Ordering::SeqCst);
    }

    /// Resolve once `ready` holds, re-checking after every signal.
    pub async fn wait_until(&self, ready: impl Fn(&Self) -> bool) {
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            // Register before checking so a signal in between isn't lost
            notified.as_mut().enable();
            if ready(self) {
                return;
            }
            notified.await;
        }
    }

    pub async fn terminated(&self) {
        self.wait_until(Self::terminate_requested).await;
    }
}

/// Route SIGTERM/SIGINT, SIGHUP and SIGUSR1 into `flags`.
#[cfg(unix)]
pub fn install(flags: &Arc<SignalFlags>) -> std::io::Result<()> {
    use tokio::signal::unix::SignalKind;

    listen(SignalKind::terminate(), "SIGTERM", flags, SignalFlags::request_terminate)?;
    listen(SignalKind::interrupt(), "SIGINT", flags, SignalFlags::request_terminate)?;
    listen(SignalKind::hangup(), "SIGHUP", flags, SignalFlags::request_reload)?;
    listen(SignalKind::user_defined1(), "SIGUSR1", flags, SignalFlags::request_capture)?;
    Ok(())
}

#[cfg(unix)]
fn listen(
    kind: tokio::signal::unix::SignalKind,
    name: &'static str,
    flags: &Arc<SignalFlags>,
    raise: fn(&SignalFlags),
) -> std::io::Result<()> {
    let mut stream = tokio::signal::unix::signal(kind)?;
    let flags = Arc::clone(flags);
    tokio::spawn(async move {
        while stream.recv().await.is_some() {
            info!(signal = name, "caught signal");
            raise(&flags);
        }
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn install(flags: &Arc<SignalFlags>) -> std::io::Result<()> {
    let flags = Arc::clone(flags);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!(signal = "ctrl-c", "caught signal");
            flags.request_terminate();
        }
    });
    Ok(())
}
