//! Interrupt handling
//!
//! A test interrupted with Ctrl-C or SIGTERM must still delete what it
//! created. One [`ShutdownCoordinator`] per process owns the signal handlers
//! and records the first interrupt. Every test holding resources enters it
//! with a [`ScopeGuard`], races its body against the interrupt and closes its
//! resource scope either way. The process exits with [`EXIT_INTERRUPTED`]
//! once the last guard is released.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use tokio::sync::watch;
use tracing::{info, warn};

/// Exit status of a process stopped by an interrupt
pub const EXIT_INTERRUPTED: i32 = 130;

static COORDINATOR: OnceLock<ShutdownCoordinator> = OnceLock::new();

/// Which signal stopped the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Interrupt,
    Terminate,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Interrupt => f.write_str("SIGINT"),
            Interrupt::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Records the first interrupt and counts scopes still cleaning up
///
/// The flag lives in a `watch` channel, so a scope entered after the signal
/// still observes it.
pub struct ShutdownCoordinator {
    sender: watch::Sender<Option<Interrupt>>,
    active: AtomicUsize,
    exit_when_idle: bool,
}

impl ShutdownCoordinator {
    /// Coordinator without signal handlers that never exits the process
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender,
            active: AtomicUsize::new(0),
            exit_when_idle: false,
        }
    }

    /// Process-wide coordinator
    ///
    /// The first call installs the SIGINT/SIGTERM handlers on a dedicated
    /// thread, so they outlive the runtime of any single test.
    pub fn global() -> &'static Self {
        let mut installed = false;
        let coordinator = COORDINATOR.get_or_init(|| {
            installed = true;
            Self {
                exit_when_idle: true,
                ..Self::new()
            }
        });

        if installed {
            coordinator.listen();
        }
        coordinator
    }

    fn listen(&'static self) {
        let spawned = std::thread::Builder::new()
            .name("kuadrant-e2e-signals".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        warn!(error = %e, "Failed to start signal listener");
                        return;
                    }
                };
                runtime.block_on(self.handle_signals());
            });

        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn signal listener");
        }
    }

    async fn handle_signals(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let handlers = signal(SignalKind::terminate())
                .and_then(|term| signal(SignalKind::interrupt()).map(|int| (term, int)));

            let (mut sigterm, mut sigint) = match handlers {
                Ok(handlers) => handlers,
                Err(e) => {
                    warn!(error = %e, "Failed to register signal handlers");
                    return;
                }
            };

            loop {
                let interrupt = tokio::select! {
                    _ = sigterm.recv() => Interrupt::Terminate,
                    _ = sigint.recv() => Interrupt::Interrupt,
                };
                self.initiate(interrupt);
            }
        }

        #[cfg(not(unix))]
        {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to register Ctrl+C handler");
                    return;
                }
                self.initiate(Interrupt::Interrupt);
            }
        }
    }

    /// Record `interrupt`; later interrupts only log
    pub fn initiate(&self, interrupt: Interrupt) {
        let first = self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(interrupt);
            true
        });

        if first {
            info!(%interrupt, active = self.active(), "Interrupted, cleaning up");
        } else {
            warn!(%interrupt, active = self.active(), "Cleanup still running");
        }
        self.settle();
    }

    /// First interrupt received, if any
    #[must_use]
    pub fn interrupted(&self) -> Option<Interrupt> {
        *self.sender.borrow()
    }

    /// Scopes entered and not yet released
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Resolves with the first interrupt, immediately if one was received
    pub async fn wait(&self) -> Interrupt {
        let mut receiver = self.sender.subscribe();
        let received = match receiver.wait_for(Option::is_some).await {
            Ok(interrupt) => *interrupt,
            Err(_) => None,
        };

        match received {
            Some(interrupt) => interrupt,
            // The sender lives as long as the coordinator
            None => std::future::pending().await,
        }
    }

    /// Register a scope that must finish cleanup before the process exits
    pub fn enter(&self) -> ScopeGuard<'_> {
        self.active.fetch_add(1, Ordering::SeqCst);
        ScopeGuard { coordinator: self }
    }

    fn settle(&self) {
        if self.exit_when_idle && self.interrupted().is_some() && self.active() == 0 {
            info!("Cleanup finished, exiting");
            std::process::exit(EXIT_INTERRUPTED);
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// A scope registered with a [`ShutdownCoordinator`]
///
/// Dropping the guard releases the scope. After an interrupt, releasing the
/// last scope of the process-wide coordinator exits the process.
pub struct ScopeGuard<'a> {
    coordinator: &'a ShutdownCoordinator,
}

impl ScopeGuard<'_> {
    /// Run a future unless an interrupt arrives first
    ///
    /// An interrupt received before the call wins without polling `future`.
    pub async fn run_until_interrupted<F>(&self, future: F) -> Result<F::Output, Interrupt>
    where
        F: Future,
    {
        tokio::pin!(future);

        tokio::select! {
            biased;
            interrupt = self.coordinator.wait() => Err(interrupt),
            output = &mut future => Ok(output),
        }
    }

    #[must_use]
    pub fn interrupted(&self) -> Option<Interrupt> {
        self.coordinator.interrupted()
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.active.fetch_sub(1, Ordering::SeqCst);
        self.coordinator.settle();
    }
}
