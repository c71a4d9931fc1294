//! The fixed call surface of the native core.
//!
//! Everything above this trait is bookkeeping: typed wrappers, ownership and
//! lifetime. Everything below it (signal semantics, buffering, ownership
//! transfer on write) belongs to the implementation. [`crate::Embedder`] is the
//! in-process implementation; a process hosted by a real broker would provide
//! its own.

use std::ptr::NonNull;

use crate::result::MojoResult;
use crate::types::{
    DataPipeOptions, DuplicateBufferHandleOptions, MessagePipeOptions, MojoDeadline, MojoHandle,
    MojoHandleSignals, MojoMapBufferFlags, MojoReadDataFlags, MojoReadMessageFlags,
    MojoTimeTicks, MojoWriteDataFlags, MojoWriteMessageFlags, SharedBufferOptions, SignalsState,
};

/// A span of memory owned by the native core: a two-phase window or a buffer
/// mapping. Valid until the matching end/unmap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBuffer {
    pub ptr: NonNull<u8>,
    pub len: usize,
}

// Safety: a RawBuffer is only an address; access rules are enforced by the
// guard types that wrap it.
unsafe impl Send for RawBuffer {}
unsafe impl Sync for RawBuffer {}

/// Outcome of a multi-handle wait.
///
/// `index` is `None` when the result is not attributable to one handle
/// (deadline exceeded, malformed arguments). `states` is `None` when the core
/// could not produce them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitManyOutcome {
    pub result: MojoResult,
    pub index: Option<usize>,
    pub states: Option<Vec<SignalsState>>,
}

/// Outcome of a single-handle wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    pub result: MojoResult,
    pub state: Option<SignalsState>,
}

/// Sizes reported by [`SystemThunks::read_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadMessageSizes {
    pub num_bytes: u32,
    pub num_handles: u32,
}

pub trait SystemThunks: Send + Sync {
    fn get_time_ticks_now(&self) -> MojoTimeTicks;

    fn close(&self, handle: MojoHandle) -> MojoResult;

    fn wait(
        &self,
        handle: MojoHandle,
        signals: MojoHandleSignals,
        deadline: MojoDeadline,
    ) -> WaitOutcome;

    fn wait_many(
        &self,
        handles: &[MojoHandle],
        signals: &[MojoHandleSignals],
        deadline: MojoDeadline,
    ) -> WaitManyOutcome;

    fn create_message_pipe(
        &self,
        options: Option<&MessagePipeOptions>,
    ) -> Result<(MojoHandle, MojoHandle), MojoResult>;

    /// On `Ok` the attached handles belong to the peer and are no longer
    /// valid in this process. On failure they are untouched.
    fn write_message(
        &self,
        handle: MojoHandle,
        bytes: &[u8],
        handles: &[MojoHandle],
        flags: MojoWriteMessageFlags,
    ) -> MojoResult;

    /// Reads the next message into the supplied buffers. Passing `None` (or
    /// too-small buffers) reports RESOURCE_EXHAUSTED together with the sizes
    /// needed, leaving the message queued unless `MAY_DISCARD` is set.
    fn read_message(
        &self,
        handle: MojoHandle,
        bytes: Option<&mut [u8]>,
        handles: Option<&mut [MojoHandle]>,
        flags: MojoReadMessageFlags,
    ) -> (MojoResult, ReadMessageSizes);

    fn create_data_pipe(
        &self,
        options: Option<&DataPipeOptions>,
    ) -> Result<(MojoHandle, MojoHandle), MojoResult>;

    /// Returns the number of bytes accepted.
    fn write_data(
        &self,
        producer: MojoHandle,
        data: &[u8],
        flags: MojoWriteDataFlags,
    ) -> Result<u32, MojoResult>;

    fn begin_write_data(
        &self,
        producer: MojoHandle,
        flags: MojoWriteDataFlags,
    ) -> Result<RawBuffer, MojoResult>;

    fn end_write_data(&self, producer: MojoHandle, num_bytes_written: u32) -> MojoResult;

    /// Returns the number of bytes read, discarded, peeked or (with `QUERY`)
    /// available.
    fn read_data(
        &self,
        consumer: MojoHandle,
        buf: &mut [u8],
        flags: MojoReadDataFlags,
    ) -> Result<u32, MojoResult>;

    /// Drops up to `num_bytes` from the front of the pipe and returns how
    /// many went. `PEEK` is rejected.
    fn discard_data(
        &self,
        consumer: MojoHandle,
        num_bytes: u32,
        flags: MojoReadDataFlags,
    ) -> Result<u32, MojoResult>;

    fn begin_read_data(
        &self,
        consumer: MojoHandle,
        flags: MojoReadDataFlags,
    ) -> Result<RawBuffer, MojoResult>;

    fn end_read_data(&self, consumer: MojoHandle, num_bytes_read: u32) -> MojoResult;

    fn create_shared_buffer(
        &self,
        options: Option<&SharedBufferOptions>,
        num_bytes: u64,
    ) -> Result<MojoHandle, MojoResult>;

    fn duplicate_buffer_handle(
        &self,
        handle: MojoHandle,
        options: Option<&DuplicateBufferHandleOptions>,
    ) -> Result<MojoHandle, MojoResult>;

    fn map_buffer(
        &self,
        handle: MojoHandle,
        offset: u64,
        num_bytes: u64,
        flags: MojoMapBufferFlags,
    ) -> Result<RawBuffer, MojoResult>;

    fn unmap_buffer(&self, buffer: RawBuffer) -> MojoResult;
}
