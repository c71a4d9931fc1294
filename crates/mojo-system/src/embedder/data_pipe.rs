//! Data pipe ring buffer and two-phase windows.

use std::ptr::{self, NonNull};

use super::{Dispatcher, State};
use crate::result::MojoResult;
use crate::thunks::RawBuffer;
use crate::types::{MojoHandle, MojoHandleSignals, MojoReadDataFlags, MojoWriteDataFlags, SignalsState};

/// Fixed heap allocation addressed only through raw pointers, so a two-phase
/// window handed out to one side never aliases a slice taken by the other.
struct RingStorage {
    ptr: NonNull<u8>,
    capacity: usize,
}

// Safety: the storage is plain bytes; all access happens under the core lock
// or inside a two-phase window that the lock keeps disjoint from other access.
unsafe impl Send for RingStorage {}

impl RingStorage {
    fn new(capacity: usize) -> Self {
        let boxed = vec![0u8; capacity].into_boxed_slice();
        let ptr = NonNull::from(Box::leak(boxed)).cast::<u8>();
        Self { ptr, capacity }
    }

    /// Copy `src` in at `pos`, wrapping at the end.
    fn copy_in(&mut self, pos: usize, src: &[u8]) {
        let first = src.len().min(self.capacity - pos);
        // Safety: both ranges lie inside the allocation; `pos < capacity`.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(pos), first);
            ptr::copy_nonoverlapping(src.as_ptr().add(first), self.ptr.as_ptr(), src.len() - first);
        }
    }

    /// Copy out `dst.len()` bytes starting at `pos`, wrapping at the end.
    fn copy_out(&self, pos: usize, dst: &mut [u8]) {
        let first = dst.len().min(self.capacity - pos);
        // Safety: as in copy_in.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr().add(pos), dst.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(self.ptr.as_ptr(), dst.as_mut_ptr().add(first), dst.len() - first);
        }
    }

    fn span(&self, pos: usize, len: usize) -> RawBuffer {
        // Safety: pos < capacity.
        let ptr = unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(pos)) };
        RawBuffer { ptr, len }
    }
}

impl Drop for RingStorage {
    fn drop(&mut self) {
        // Safety: ptr/capacity came from Box::leak of a boxed slice of this length.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.capacity,
            )));
        }
    }
}

impl std::fmt::Debug for RingStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingStorage")
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Unframed byte stream between one producer and one consumer.
#[derive(Debug)]
pub(super) struct DataPipe {
    element_num_bytes: usize,
    ring: RingStorage,
    /// Read position.
    head: usize,
    /// Bytes readable from `head`.
    len: usize,
    producer_open: bool,
    consumer_open: bool,
    /// Length of the outstanding two-phase write window.
    write_window: Option<usize>,
    /// Length of the outstanding two-phase read window.
    read_window: Option<usize>,
}

impl DataPipe {
    pub(super) fn new(element_num_bytes: usize, capacity: usize) -> Self {
        Self {
            element_num_bytes,
            ring: RingStorage::new(capacity),
            head: 0,
            len: 0,
            producer_open: true,
            consumer_open: true,
            write_window: None,
            read_window: None,
        }
    }

    fn capacity(&self) -> usize {
        self.ring.capacity
    }

    fn free(&self) -> usize {
        self.capacity() - self.len
    }

    fn tail(&self) -> usize {
        (self.head + self.len) % self.capacity()
    }

    pub(super) fn in_two_phase_write(&self) -> bool {
        self.write_window.is_some()
    }

    pub(super) fn in_two_phase_read(&self) -> bool {
        self.read_window.is_some()
    }

    pub(super) fn close_producer(&mut self) {
        self.producer_open = false;
        self.write_window = None;
    }

    pub(super) fn close_consumer(&mut self) {
        self.consumer_open = false;
        self.read_window = None;
    }

    pub(super) fn is_dead(&self) -> bool {
        !self.producer_open && !self.consumer_open
    }

    pub(super) fn producer_signals(&self) -> SignalsState {
        if self.consumer_open {
            let satisfied = if self.free() > 0 {
                MojoHandleSignals::WRITABLE
            } else {
                MojoHandleSignals::NONE
            };
            SignalsState::new(
                satisfied,
                MojoHandleSignals::WRITABLE | MojoHandleSignals::PEER_CLOSED,
            )
        } else {
            SignalsState::new(MojoHandleSignals::PEER_CLOSED, MojoHandleSignals::PEER_CLOSED)
        }
    }

    pub(super) fn consumer_signals(&self) -> SignalsState {
        let mut satisfied = MojoHandleSignals::NONE;
        let mut satisfiable = MojoHandleSignals::PEER_CLOSED;
        if self.len > 0 {
            satisfied |= MojoHandleSignals::READABLE;
        }
        if self.len > 0 || self.producer_open {
            satisfiable |= MojoHandleSignals::READABLE;
        }
        if !self.producer_open {
            satisfied |= MojoHandleSignals::PEER_CLOSED;
        }
        SignalsState::new(satisfied, satisfiable)
    }

    pub(super) fn write(&mut self, data: &[u8], flags: MojoWriteDataFlags) -> Result<u32, MojoResult> {
        if self.write_window.is_some() {
            return Err(MojoResult::Busy);
        }
        if !self.consumer_open {
            return Err(MojoResult::FailedPrecondition);
        }
        if data.len() % self.element_num_bytes != 0 {
            return Err(MojoResult::InvalidArgument);
        }
        if data.is_empty() {
            return Ok(0);
        }
        if flags.contains(MojoWriteDataFlags::ALL_OR_NONE) && data.len() > self.free() {
            return Err(MojoResult::OutOfRange);
        }

        let n = data.len().min(self.free());
        if n == 0 {
            return Err(MojoResult::ShouldWait);
        }
        let tail = self.tail();
        self.ring.copy_in(tail, &data[..n]);
        self.len += n;
        Ok(n as u32)
    }

    pub(super) fn begin_write(&mut self) -> Result<RawBuffer, MojoResult> {
        if self.write_window.is_some() {
            return Err(MojoResult::Busy);
        }
        if !self.consumer_open {
            return Err(MojoResult::FailedPrecondition);
        }
        if self.free() == 0 {
            return Err(MojoResult::ShouldWait);
        }
        let tail = self.tail();
        let contiguous = self.free().min(self.capacity() - tail);
        self.write_window = Some(contiguous);
        Ok(self.ring.span(tail, contiguous))
    }

    pub(super) fn end_write(&mut self, written: usize) -> MojoResult {
        let Some(window) = self.write_window.take() else {
            return MojoResult::FailedPrecondition;
        };
        if written > window || written % self.element_num_bytes != 0 {
            return MojoResult::InvalidArgument;
        }
        self.len += written;
        MojoResult::Ok
    }

    pub(super) fn read(&mut self, buf: &mut [u8], flags: MojoReadDataFlags) -> Result<u32, MojoResult> {
        if flags.contains(MojoReadDataFlags::DISCARD) {
            return self.discard(buf.len(), flags);
        }
        self.consume(buf.len(), Some(buf), flags)
    }

    /// Drop up to `num_bytes` from the front without copying them anywhere.
    pub(super) fn discard(&mut self, num_bytes: usize, flags: MojoReadDataFlags) -> Result<u32, MojoResult> {
        self.consume(num_bytes, None, flags)
    }

    fn consume(
        &mut self,
        requested: usize,
        out: Option<&mut [u8]>,
        flags: MojoReadDataFlags,
    ) -> Result<u32, MojoResult> {
        if self.read_window.is_some() {
            return Err(MojoResult::Busy);
        }
        if flags.contains(MojoReadDataFlags::QUERY) {
            return Ok(self.len as u32);
        }
        if out.is_none() && flags.contains(MojoReadDataFlags::PEEK) {
            return Err(MojoResult::InvalidArgument);
        }
        if requested % self.element_num_bytes != 0 {
            return Err(MojoResult::InvalidArgument);
        }
        if self.len == 0 {
            return Err(if self.producer_open {
                MojoResult::ShouldWait
            } else {
                MojoResult::FailedPrecondition
            });
        }
        if flags.contains(MojoReadDataFlags::ALL_OR_NONE) && requested > self.len {
            return Err(if self.producer_open {
                MojoResult::OutOfRange
            } else {
                MojoResult::FailedPrecondition
            });
        }

        let n = requested.min(self.len);
        if let Some(buf) = out {
            self.ring.copy_out(self.head, &mut buf[..n]);
        }
        if !flags.contains(MojoReadDataFlags::PEEK) {
            self.head = (self.head + n) % self.capacity();
            self.len -= n;
        }
        Ok(n as u32)
    }

    pub(super) fn begin_read(&mut self) -> Result<RawBuffer, MojoResult> {
        if self.read_window.is_some() {
            return Err(MojoResult::Busy);
        }
        if self.len == 0 {
            return Err(if self.producer_open {
                MojoResult::ShouldWait
            } else {
                MojoResult::FailedPrecondition
            });
        }
        let contiguous = self.len.min(self.capacity() - self.head);
        self.read_window = Some(contiguous);
        Ok(self.ring.span(self.head, contiguous))
    }

    pub(super) fn end_read(&mut self, read: usize) -> MojoResult {
        let Some(window) = self.read_window.take() else {
            return MojoResult::FailedPrecondition;
        };
        if read > window || read % self.element_num_bytes != 0 {
            return MojoResult::InvalidArgument;
        }
        self.head = (self.head + read) % self.capacity();
        self.len -= read;
        MojoResult::Ok
    }
}

impl State {
    pub(super) fn producer_mut(&mut self, handle: MojoHandle) -> Result<&mut DataPipe, MojoResult> {
        match self.handles.get(&handle) {
            Some(Dispatcher::DataPipeProducer { pipe }) => self
                .data_pipes
                .get_mut(pipe)
                .ok_or(MojoResult::InvalidArgument),
            _ => Err(MojoResult::InvalidArgument),
        }
    }

    pub(super) fn consumer_mut(&mut self, handle: MojoHandle) -> Result<&mut DataPipe, MojoResult> {
        match self.handles.get(&handle) {
            Some(Dispatcher::DataPipeConsumer { pipe }) => self
                .data_pipes
                .get_mut(pipe)
                .ok_or(MojoResult::InvalidArgument),
            _ => Err(MojoResult::InvalidArgument),
        }
    }
}
