//! Signal handling for the post-run park.
//!
//! After the report is written the runner idles in STEADY_STATE or HALTED
//! until SIGINT or SIGTERM arrives. Handlers only set an atomic flag; a
//! poll thread forwards it to the shared state.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Signals that end the park.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM.
    Terminate,
    /// SIGINT (Ctrl+C).
    Interrupt,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Flags shared between the poll thread and the runner.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    signal_count: AtomicU32,
}

impl SignalState {
    /// Fresh state with no signal seen.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a shutdown signal arrived.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Request shutdown from any thread.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    fn record_signal(&self, kind: SignalKind) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
        info!(signal = %kind, "Signal received");
    }

    /// Signals received so far.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }
}

static SIGTERM_FLAG: AtomicBool = AtomicBool::new(false);
static SIGINT_FLAG: AtomicBool = AtomicBool::new(false);

/// Registers SIGINT/SIGTERM handlers and exposes the resulting state.
#[derive(Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Install handlers and start the poll thread.
    ///
    /// # Errors
    ///
    /// Fails if the poll thread cannot be spawned.
    pub fn new() -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(SignalState::new()),
        };

        #[cfg(unix)]
        handler.register_unix_handlers()?;

        Ok(handler)
    }

    #[cfg(unix)]
    fn register_unix_handlers(&self) -> std::io::Result<()> {
        use std::os::raw::c_int;

        extern "C" fn on_sigterm(_: c_int) {
            SIGTERM_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn on_sigint(_: c_int) {
            SIGINT_FLAG.store(true, Ordering::Relaxed);
        }

        let state = Arc::clone(&self.state);
        std::thread::Builder::new()
            .name("signal-poll".into())
            .spawn(move || loop {
                if SIGTERM_FLAG.swap(false, Ordering::Relaxed) {
                    state.record_signal(SignalKind::Terminate);
                    state.request_shutdown();
                }
                if SIGINT_FLAG.swap(false, Ordering::Relaxed) {
                    state.record_signal(SignalKind::Interrupt);
                    state.request_shutdown();
                }
                if state.shutdown_requested() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            })?;

        // Handlers only touch atomics, which is async-signal-safe
        unsafe {
            libc::signal(
                libc::SIGTERM,
                on_sigterm as extern "C" fn(c_int) as *const () as libc::sighandler_t,
            );
            libc::signal(
                libc::SIGINT,
                on_sigint as extern "C" fn(c_int) as *const () as libc::sighandler_t,
            );
        }

        debug!("Signal handlers registered");
        Ok(())
    }

    /// Check if shutdown was requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }

    /// Shared signal state.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}

/// Block until shutdown is requested or `timeout` expires.
///
/// Returns `true` if shutdown was requested.
pub fn wait_for_shutdown(handler: &SignalHandler, timeout: Duration) -> bool {
    let start = Instant::now();
    let poll_interval = Duration::from_millis(50);

    while start.elapsed() < timeout {
        if handler.shutdown_requested() {
            return true;
        }
        std::thread::sleep(poll_interval.min(timeout.saturating_sub(start.elapsed())));
    }

    handler.shutdown_requested()
}
