//! Startup and graceful shutdown of the HTTP server.
//!
//! ```text
//! Lifecycle::new ──start──▶ ServerHandle ──run──▶ ShutdownReport
//!   Created                  Listening     ShuttingDown → Stopped
//! ```
//!
//! Shutdown begins on the first SIGINT/SIGTERM (once [`Lifecycle::register_signals`] was called)
//! or the first [`ServerHandle::stop`]. The accept loop then closes the listener, tells every open
//! connection to finish its current request, and waits up to the grace period for them before
//! aborting whatever is left. [`ServerHandle::run`] only returns once all of that is done, so no
//! task or socket of the instance outlives it.
use crate::config::ServerConfig;
use crate::error::{LifecycleError, ShutdownTimeout};
use crate::http;
use crate::shutdown::ShutdownToken;
use crate::signals::SignalListener;
use crate::stacktrace;
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

/// Pause after a failed accept, e.g. when the process ran out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Listening,
    ShuttingDown,
    Stopped,
}

/// Outcome of a completed shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Time from the shutdown trigger until everything was released.
    pub elapsed: Duration,
    /// Set when in-flight connections had to be abandoned.
    pub timeout: Option<ShutdownTimeout>,
}

/// A server that has not started listening yet.
pub struct Lifecycle {
    config: ServerConfig,
    routes: Router,
    shutdown: ShutdownToken,
    signals: Option<SignalListener>,
    state: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub fn new(config: ServerConfig) -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);
        Lifecycle {
            config,
            routes: Router::new(),
            shutdown: ShutdownToken::new(),
            signals: None,
            state,
        }
    }

    /// Serve application routes alongside the liveness probe.
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.routes = self.routes.merge(routes);
        self
    }

    /// Route SIGINT and SIGTERM to shutdown and SIGQUIT to a stack dump.
    ///
    /// Calling this again on the same instance is a no-op.
    /// Fails if another instance in this process already owns the signal handlers.
    pub fn register_signals(&mut self) -> Result<(), LifecycleError> {
        if self.signals.is_none() {
            self.signals = Some(SignalListener::register(self.shutdown.clone())?);
        }
        Ok(())
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Connections are accepted from the moment this returns. Bind failures are not retried.
    pub async fn start(self) -> Result<ServerHandle, LifecycleError> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| LifecycleError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| LifecycleError::Bind { addr, source })?;

        let app = http::app(self.routes, self.config.debug);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            app,
            self.shutdown.clone(),
            self.config.grace_period,
        ));

        self.state.send_replace(LifecycleState::Listening);
        tracing::info!(address = %local_addr, "accepting inbound connections");

        Ok(ServerHandle {
            local_addr,
            grace_period: self.config.grace_period,
            shutdown: self.shutdown,
            state: self.state,
            accept_task: Some(accept_task),
            signals: self.signals,
        })
    }
}

/// A listening server.
///
/// Dropping the handle without calling [`ServerHandle::run`] still triggers shutdown, but nothing
/// waits for it to complete.
pub struct ServerHandle {
    local_addr: SocketAddr,
    grace_period: Duration,
    shutdown: ShutdownToken,
    state: watch::Sender<LifecycleState>,
    /// Always Some until `run` takes it
    accept_task: Option<JoinHandle<Option<ShutdownTimeout>>>,
    signals: Option<SignalListener>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Begin shutdown. Returns false if shutdown had already begun.
    pub fn stop(&self) -> bool {
        self.shutdown.trigger()
    }

    /// Wait for shutdown to be triggered, then carry it out.
    ///
    /// Shutdown problems are logged and reported, never returned as errors:
    /// once this returns the listener, every connection and the signal listener are gone.
    pub async fn run(mut self) -> ShutdownReport {
        {
            let tracked = stacktrace::track("lifecycle run");
            tracked.checkpoint("shutdown signal");
            self.shutdown.wait().await;
        }

        let started = Instant::now();
        self.state.send_replace(LifecycleState::ShuttingDown);
        tracing::info!(grace_period = ?self.grace_period, "shutting down");

        let timeout = match self.accept_task.take() {
            Some(accept_task) => match accept_task.await {
                Ok(timeout) => timeout,
                Err(err) => {
                    tracing::error!("accept loop terminated abnormally: {err}");
                    None
                }
            },
            None => None,
        };
        if let Some(timeout) = &timeout {
            tracing::warn!("{timeout}");
        }

        if let Some(signals) = self.signals.take() {
            signals.stop().await;
        }

        self.state.send_replace(LifecycleState::Stopped);
        let report = ShutdownReport {
            elapsed: started.elapsed(),
            timeout,
        };
        tracing::info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            "shutdown complete"
        );
        report
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.accept_task.is_some() {
            self.shutdown.trigger();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    app: Router,
    shutdown: ShutdownToken,
    grace_period: Duration,
) -> Option<ShutdownTimeout> {
    let tracked = stacktrace::track("accept loop");
    let mut connections = JoinSet::new();

    loop {
        tracked.checkpoint("accept");
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(err) = joined {
                    tracing::error!("connection task failed: {err}");
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "accepted connection");
                    connections.spawn(serve_connection(stream, app.clone(), shutdown.clone()));
                }
                Err(err) => {
                    tracing::warn!("failed to accept connection: {err}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    // Closing the listener refuses every connection attempt from here on.
    drop(listener);
    tracked.running();

    drain(connections, grace_period).await
}

async fn drain(mut connections: JoinSet<()>, grace_period: Duration) -> Option<ShutdownTimeout> {
    if !connections.is_empty() {
        tracing::info!(in_flight = connections.len(), "waiting for in-flight connections");
    }

    let drained = tokio::time::timeout(grace_period, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    match drained {
        Ok(()) => None,
        Err(_) => Some(ShutdownTimeout {
            grace_period,
            abandoned: abort_remaining(&mut connections).await,
        }),
    }
}

/// Abort every connection that is still being served and return how many were cut short.
async fn abort_remaining(connections: &mut JoinSet<()>) -> usize {
    // Connections that finished after the deadline but were never joined completed on their own.
    while connections.try_join_next().is_some() {}

    connections.abort_all();
    let mut abandoned = 0;
    while let Some(joined) = connections.join_next().await {
        if matches!(joined, Err(err) if err.is_cancelled()) {
            abandoned += 1;
        }
    }
    abandoned
}

async fn serve_connection(stream: TcpStream, app: Router, shutdown: ShutdownToken) {
    let connection = http1::Builder::new()
        .timer(TokioTimer::new())
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(app));
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.wait() => {
            // Lets the current request finish, then closes instead of keeping the connection alive.
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };

    if let Err(err) = result {
        tracing::debug!("connection closed with error: {err}");
    }
}
