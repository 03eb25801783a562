use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Fatal errors raised while bringing the server up.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to register termination signal handler: {0}")]
    SignalHandling(#[from] SignalError),
}

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("signal handlers are already owned by another running server")]
    AlreadyRegistered,
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// In-flight connections outlived the grace period and were abandoned.
///
/// Never surfaced as a process failure: the server still reaches `Stopped`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{abandoned} connection(s) still in flight after the {grace_period:?} grace period were abandoned")]
pub struct ShutdownTimeout {
    pub grace_period: Duration,
    pub abandoned: usize,
}
