//! # mojo-system
//!
//! Owned handles over a Mojo-style native core: message pipes, data pipes
//! and shared buffers, plus waiting on their signals.
//!
//! Everything below [`Core`] goes through the [`SystemThunks`] trait. The
//! crate ships one implementation, [`Embedder`], which keeps every object in
//! this process.
//!
//! ## Layout
//!
//! ```text
//! Core ──── Arc<dyn SystemThunks> ──── Embedder (handle table + condvar)
//!  │
//!  ├── MessagePipeHandle  read_message / write_message
//!  ├── ProducerHandle     write_data / begin_write_data
//!  ├── ConsumerHandle     read_data / begin_read_data
//!  └── SharedBufferHandle duplicate / map_buffer
//! ```

pub mod config;
pub mod core;
pub mod data_pipe;
pub mod embedder;
pub mod handle;
pub mod message_pipe;
pub mod result;
pub mod shared_buffer;
pub mod thunks;
pub mod types;

pub use crate::config::{ConfigError, EmbedderConfig};
pub use crate::core::Core;
pub use crate::data_pipe::{ConsumerHandle, ProducerHandle, ReadDataBuffer, WriteDataBuffer};
pub use crate::embedder::Embedder;
pub use crate::handle::{Handle, UntypedHandle};
pub use crate::message_pipe::MessagePipeHandle;
pub use crate::result::{MojoError, MojoResult, Result};
pub use crate::shared_buffer::{BufferMapping, SharedBufferHandle};
pub use crate::thunks::{RawBuffer, ReadMessageSizes, SystemThunks, WaitManyOutcome, WaitOutcome};
pub use crate::types::*;
