//! # mojo-bindings
//!
//! Blocking, thread-safe helpers on top of [`mojo_system`] message pipes.
//!
//! A [`Connector`] owns one pipe endpoint and turns the non-blocking
//! `read_message` into a blocking call by parking on an [`AsyncWaiter`]
//! notification. A [`Stub`] reads requests from a connector and dispatches
//! them to a [`MessageReceiver`].

pub mod async_waiter;
pub mod connector;
pub mod error;
pub mod message;
pub mod stub;

pub use async_waiter::{AsyncWaitId, AsyncWaiter, ThreadAsyncWaiter, WaitResponse};
pub use connector::Connector;
pub use error::{ConnectorError, StubError, WaiterError};
pub use message::Message;
pub use stub::{MessageReceiver, Stub};
