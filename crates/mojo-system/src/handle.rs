//! Owned handles.
//!
//! A handle owns one native identifier. It is move-only; dropping a valid
//! handle closes it, and every conversion between handle kinds consumes the
//! source, so no two values ever name the same identifier.

use std::fmt;
use std::mem;

use tracing::trace;

use crate::core::Core;
use crate::data_pipe::{ConsumerHandle, ProducerHandle};
use crate::message_pipe::MessagePipeHandle;
use crate::result::{MojoResult, Result};
use crate::shared_buffer::SharedBufferHandle;
use crate::thunks::WaitOutcome;
use crate::types::{MojoDeadline, MojoHandle, MojoHandleSignals, INVALID_HANDLE};

/// Operations shared by every handle kind.
pub trait Handle {
    fn native_handle(&self) -> MojoHandle;

    fn is_valid(&self) -> bool {
        self.native_handle() != INVALID_HANDLE
    }

    /// Release the native object. The handle is invalid afterwards, whatever
    /// the result; closing an invalid handle is INVALID_ARGUMENT.
    fn close(&mut self) -> Result<()>;

    /// Block until one of `signals` is satisfied, all of them become
    /// unsatisfiable, or `deadline` elapses.
    fn wait(&self, signals: MojoHandleSignals, deadline: MojoDeadline) -> WaitOutcome;

    /// Give up ownership without closing.
    fn release_native_handle(self) -> MojoHandle
    where
        Self: Sized;

    fn to_untyped_handle(self) -> UntypedHandle
    where
        Self: Sized;
}

/// Ownership core shared by all handle kinds.
pub(crate) struct BaseHandle {
    pub(crate) core: Core,
    pub(crate) value: MojoHandle,
}

impl BaseHandle {
    pub(crate) fn new(core: Core, value: MojoHandle) -> Self {
        Self { core, value }
    }

    pub(crate) fn take(&mut self) -> MojoHandle {
        mem::replace(&mut self.value, INVALID_HANDLE)
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        let value = self.take();
        if value == INVALID_HANDLE {
            return Err(MojoResult::InvalidArgument.into());
        }
        let result = self.core.thunks().close(value);
        trace!(handle = value, %result, "Closed handle");
        result.into_result()
    }

    pub(crate) fn wait(&self, signals: MojoHandleSignals, deadline: MojoDeadline) -> WaitOutcome {
        if self.value == INVALID_HANDLE {
            return WaitOutcome {
                result: MojoResult::InvalidArgument,
                state: None,
            };
        }
        self.core.thunks().wait(self.value, signals, deadline)
    }
}

impl Drop for BaseHandle {
    fn drop(&mut self) {
        if self.value != INVALID_HANDLE {
            let _ = self.close();
        }
    }
}

impl fmt::Debug for BaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

macro_rules! impl_handle {
    ($name:ident) => {
        impl $crate::handle::Handle for $name {
            fn native_handle(&self) -> $crate::types::MojoHandle {
                self.base.value
            }

            fn close(&mut self) -> $crate::result::Result<()> {
                self.base.close()
            }

            fn wait(
                &self,
                signals: $crate::types::MojoHandleSignals,
                deadline: $crate::types::MojoDeadline,
            ) -> $crate::thunks::WaitOutcome {
                self.base.wait(signals, deadline)
            }

            fn release_native_handle(mut self) -> $crate::types::MojoHandle {
                self.base.take()
            }

            fn to_untyped_handle(self) -> $crate::handle::UntypedHandle {
                $crate::handle::UntypedHandle::from_base(self.base)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.base).finish()
            }
        }
    };
}
pub(crate) use impl_handle;

/// A handle whose kind is not known, e.g. one just received in a message.
pub struct UntypedHandle {
    base: BaseHandle,
}

impl_handle!(UntypedHandle);

impl UntypedHandle {
    pub(crate) fn from_base(base: BaseHandle) -> Self {
        Self { base }
    }

    pub fn to_message_pipe_handle(self) -> MessagePipeHandle {
        MessagePipeHandle::from_base(self.base)
    }

    pub fn to_producer_handle(self) -> ProducerHandle {
        ProducerHandle::from_base(self.base)
    }

    pub fn to_consumer_handle(self) -> ConsumerHandle {
        ConsumerHandle::from_base(self.base)
    }

    pub fn to_shared_buffer_handle(self) -> SharedBufferHandle {
        SharedBufferHandle::from_base(self.base)
    }
}
