use std::io;

use mojo_system::{MojoError, MojoResult};
use thiserror::Error;

/// Errors from starting an async waiter.
#[derive(Error, Debug)]
pub enum WaiterError {
    #[error("failed to create wake-up pipe: {0}")]
    Pipe(#[from] MojoError),

    #[error("failed to spawn waiter thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Errors surfaced by [`crate::Connector`].
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("connector is closed")]
    Closed,

    #[error(transparent)]
    Mojo(#[from] MojoError),
}

impl ConnectorError {
    /// The other end of the pipe is gone and no more messages will arrive.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, Self::Mojo(e) if e.result() == MojoResult::FailedPrecondition)
    }
}

/// Errors surfaced by [`crate::Stub`].
#[derive(Error, Debug)]
pub enum StubError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// The receiver's own error, unchanged.
    #[error(transparent)]
    Receiver(anyhow::Error),
}
