use crate::error::SignalError;
use crate::shutdown::ShutdownToken;
use crate::stacktrace;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

/// Set while some [`SignalListener`] in this process owns the OS signal streams.
static REGISTERED: AtomicBool = AtomicBool::new(false);

struct Registration;

impl Registration {
    fn acquire() -> Result<Self, SignalError> {
        REGISTERED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Registration)
            .map_err(|_| SignalError::AlreadyRegistered)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        REGISTERED.store(false, Ordering::Release);
    }
}

/// Forwards SIGINT and SIGTERM to a [`ShutdownToken`] and answers SIGQUIT with a stack dump.
///
/// Only one listener may exist per process at a time.
pub struct SignalListener {
    task: JoinHandle<()>,
    _registration: Registration,
}

impl SignalListener {
    pub fn register(shutdown: ShutdownToken) -> Result<Self, SignalError> {
        let registration = Registration::acquire()?;

        // We need to create the streams here rather than inside the spawned task to ensure that the signals are registered by the time we return.
        // Otherwise we would be at the mercy of whenever tokio decides to start running the task.
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut quit = signal(SignalKind::quit())?;

        let task = tokio::spawn(async move {
            let tracked = stacktrace::track("signal listener");
            loop {
                tracked.checkpoint("signal");
                let name = tokio::select! {
                    Some(()) = interrupt.recv() => "SIGINT",
                    Some(()) = terminate.recv() => "SIGTERM",
                    Some(()) = quit.recv() => {
                        tracked.running();
                        tracing::info!(stack = %stacktrace::capture_stack_trace(), "stack snapshot");
                        continue;
                    }
                    else => break,
                };

                if shutdown.trigger() {
                    tracing::info!("received {name}, beginning graceful shutdown");
                } else {
                    tracing::info!("received {name} while already shutting down, ignoring");
                }
            }
        });

        Ok(SignalListener {
            task,
            _registration: registration,
        })
    }

    /// Stop listening and wait for the listener task to be gone.
    pub async fn stop(mut self) {
        self.task.abort();
        (&mut self.task).await.ok();
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}
