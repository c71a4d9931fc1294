//! In-process implementation of the native call surface.
//!
//! All objects live in one handle table behind a single lock. Every state
//! change signals `changed`, which is what blocked waiters sleep on. Objects
//! are reached only through their dispatchers; a dispatcher attached to a
//! message leaves the table until the message is read on the other side.

mod data_pipe;
mod message_pipe;
mod shared_buffer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::config::EmbedderConfig;
use crate::result::MojoResult;
use crate::thunks::{
    RawBuffer, ReadMessageSizes, SystemThunks, WaitManyOutcome, WaitOutcome,
};
use crate::types::{
    DataPipeOptions, DuplicateBufferHandleOptions, MessagePipeOptions, MojoDeadline, MojoHandle,
    MojoHandleSignals, MojoMapBufferFlags, MojoReadDataFlags, MojoReadMessageFlags,
    MojoTimeTicks, MojoWriteDataFlags, MojoWriteMessageFlags, SharedBufferOptions, SignalsState,
    DEADLINE_INDEFINITE, INVALID_HANDLE,
};

use data_pipe::DataPipe;
use message_pipe::MessagePipe;
use shared_buffer::SharedRegion;

type ObjectId = u64;

/// What a handle table slot refers to.
#[derive(Debug)]
enum Dispatcher {
    MessagePipe { pipe: ObjectId, side: usize },
    DataPipeProducer { pipe: ObjectId },
    DataPipeConsumer { pipe: ObjectId },
    SharedBuffer { region: Arc<SharedRegion> },
}

#[derive(Default)]
struct State {
    handles: HashMap<MojoHandle, Dispatcher>,
    next_handle: MojoHandle,
    next_object: ObjectId,
    message_pipes: HashMap<ObjectId, MessagePipe>,
    data_pipes: HashMap<ObjectId, DataPipe>,
    mappings: Vec<(RawBuffer, Arc<SharedRegion>)>,
}

impl State {
    fn alloc_object(&mut self) -> ObjectId {
        self.next_object += 1;
        self.next_object
    }

    /// Put a dispatcher in the table under a fresh identifier.
    fn install(&mut self, dispatcher: Dispatcher) -> MojoHandle {
        loop {
            self.next_handle = self.next_handle.wrapping_add(1);
            let candidate = self.next_handle;
            if candidate != INVALID_HANDLE && !self.handles.contains_key(&candidate) {
                self.handles.insert(candidate, dispatcher);
                return candidate;
            }
        }
    }

    fn close(&mut self, handle: MojoHandle) -> MojoResult {
        match self.handles.remove(&handle) {
            Some(dispatcher) => {
                self.release(dispatcher);
                MojoResult::Ok
            }
            None => MojoResult::InvalidArgument,
        }
    }

    /// Drop a dispatcher that left the table, together with anything it kept
    /// alive (messages queued for a closed endpoint carry dispatchers too).
    fn release(&mut self, dispatcher: Dispatcher) {
        let mut pending = vec![dispatcher];
        while let Some(dispatcher) = pending.pop() {
            match dispatcher {
                Dispatcher::MessagePipe { pipe, side } => {
                    if let Some(state) = self.message_pipes.get_mut(&pipe) {
                        pending.extend(state.close_side(side));
                        if state.is_dead() {
                            self.message_pipes.remove(&pipe);
                        }
                    }
                }
                Dispatcher::DataPipeProducer { pipe } => {
                    if let Some(state) = self.data_pipes.get_mut(&pipe) {
                        state.close_producer();
                        if state.is_dead() {
                            self.data_pipes.remove(&pipe);
                        }
                    }
                }
                Dispatcher::DataPipeConsumer { pipe } => {
                    if let Some(state) = self.data_pipes.get_mut(&pipe) {
                        state.close_consumer();
                        if state.is_dead() {
                            self.data_pipes.remove(&pipe);
                        }
                    }
                }
                Dispatcher::SharedBuffer { region } => drop(region),
            }
        }
    }

    /// A handle in the middle of a two-phase operation cannot be transferred.
    fn is_busy(&self, dispatcher: &Dispatcher) -> bool {
        match dispatcher {
            Dispatcher::DataPipeProducer { pipe } => self
                .data_pipes
                .get(pipe)
                .is_some_and(|p| p.in_two_phase_write()),
            Dispatcher::DataPipeConsumer { pipe } => self
                .data_pipes
                .get(pipe)
                .is_some_and(|p| p.in_two_phase_read()),
            _ => false,
        }
    }

    fn signals_state(&self, handle: MojoHandle) -> Option<SignalsState> {
        let state = match self.handles.get(&handle)? {
            Dispatcher::MessagePipe { pipe, side } => self.message_pipes.get(pipe)?.signals(*side),
            Dispatcher::DataPipeProducer { pipe } => self.data_pipes.get(pipe)?.producer_signals(),
            Dispatcher::DataPipeConsumer { pipe } => self.data_pipes.get(pipe)?.consumer_signals(),
            Dispatcher::SharedBuffer { .. } => SignalsState::default(),
        };
        Some(state)
    }
}

/// A self-contained native core living in this process.
pub struct Embedder {
    config: EmbedderConfig,
    origin: Instant,
    state: Mutex<State>,
    changed: Condvar,
}

impl Default for Embedder {
    fn default() -> Self {
        Self::new(EmbedderConfig::default())
    }
}

impl Embedder {
    pub fn new(config: EmbedderConfig) -> Self {
        debug!(?config, "Starting in-process core");
        Self {
            config,
            origin: Instant::now(),
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
        }
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    /// Number of live handles in the table.
    pub fn handle_count(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Run a mutation and wake every waiter afterwards.
    fn mutate<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock();
        let out = f(&mut state);
        drop(state);
        self.changed.notify_all();
        out
    }
}

fn deadline_instant(deadline: MojoDeadline) -> Option<Instant> {
    if deadline == DEADLINE_INDEFINITE {
        return None;
    }
    Instant::now().checked_add(Duration::from_micros(deadline))
}

impl SystemThunks for Embedder {
    fn get_time_ticks_now(&self) -> MojoTimeTicks {
        i64::try_from(self.origin.elapsed().as_micros()).unwrap_or(i64::MAX)
    }

    fn close(&self, handle: MojoHandle) -> MojoResult {
        let result = self.mutate(|state| state.close(handle));
        trace!(handle, %result, "close");
        result
    }

    fn wait(
        &self,
        handle: MojoHandle,
        signals: MojoHandleSignals,
        deadline: MojoDeadline,
    ) -> WaitOutcome {
        let outcome = self.wait_many(&[handle], &[signals], deadline);
        WaitOutcome {
            result: outcome.result,
            state: outcome.states.and_then(|states| states.first().copied()),
        }
    }

    fn wait_many(
        &self,
        handles: &[MojoHandle],
        signals: &[MojoHandleSignals],
        deadline: MojoDeadline,
    ) -> WaitManyOutcome {
        // An empty set can never be satisfied or fail.
        if handles.is_empty() || handles.len() != signals.len() {
            return WaitManyOutcome {
                result: MojoResult::InvalidArgument,
                index: None,
                states: None,
            };
        }

        let deadline_at = deadline_instant(deadline);
        let mut state = self.state.lock();
        let mut first_pass = true;
        loop {
            let mut states = Vec::with_capacity(handles.len());
            for (index, handle) in handles.iter().enumerate() {
                match state.signals_state(*handle) {
                    Some(s) => states.push(s),
                    None => {
                        // Present when we started, gone now: closed or transferred under us.
                        let result = if first_pass {
                            MojoResult::InvalidArgument
                        } else {
                            MojoResult::Cancelled
                        };
                        return WaitManyOutcome {
                            result,
                            index: Some(index),
                            states: None,
                        };
                    }
                }
            }

            for (index, (s, wanted)) in states.iter().zip(signals).enumerate() {
                if s.is_satisfied(*wanted) {
                    return WaitManyOutcome {
                        result: MojoResult::Ok,
                        index: Some(index),
                        states: Some(states),
                    };
                }
                if s.is_unsatisfiable(*wanted) {
                    return WaitManyOutcome {
                        result: MojoResult::FailedPrecondition,
                        index: Some(index),
                        states: Some(states),
                    };
                }
            }

            first_pass = false;
            match deadline_at {
                None => self.changed.wait(&mut state),
                Some(at) => {
                    if Instant::now() >= at {
                        return WaitManyOutcome {
                            result: MojoResult::DeadlineExceeded,
                            index: None,
                            states: Some(states),
                        };
                    }
                    let _ = self.changed.wait_until(&mut state, at);
                }
            }
        }
    }

    fn create_message_pipe(
        &self,
        _options: Option<&MessagePipeOptions>,
    ) -> Result<(MojoHandle, MojoHandle), MojoResult> {
        let pair = self.mutate(|state| {
            let pipe = state.alloc_object();
            state.message_pipes.insert(pipe, MessagePipe::new());
            let h0 = state.install(Dispatcher::MessagePipe { pipe, side: 0 });
            let h1 = state.install(Dispatcher::MessagePipe { pipe, side: 1 });
            (h0, h1)
        });
        debug!(h0 = pair.0, h1 = pair.1, "Created message pipe");
        Ok(pair)
    }

    fn write_message(
        &self,
        handle: MojoHandle,
        bytes: &[u8],
        handles: &[MojoHandle],
        _flags: MojoWriteMessageFlags,
    ) -> MojoResult {
        if bytes.len() > self.config.max_message_num_bytes as usize
            || handles.len() > self.config.max_message_num_handles as usize
        {
            return MojoResult::ResourceExhausted;
        }
        self.mutate(|state| state.write_message(handle, bytes, handles))
    }

    fn read_message(
        &self,
        handle: MojoHandle,
        bytes: Option<&mut [u8]>,
        handles: Option<&mut [MojoHandle]>,
        flags: MojoReadMessageFlags,
    ) -> (MojoResult, ReadMessageSizes) {
        self.mutate(|state| state.read_message(handle, bytes, handles, flags))
    }

    fn create_data_pipe(
        &self,
        options: Option<&DataPipeOptions>,
    ) -> Result<(MojoHandle, MojoHandle), MojoResult> {
        let options = options.copied().unwrap_or_default();
        let element = options.element_num_bytes;
        if element == 0 {
            return Err(MojoResult::InvalidArgument);
        }
        let capacity = if options.capacity_num_bytes == 0 {
            let default = self.config.default_data_pipe_capacity;
            (default - default % element).max(element)
        } else {
            options.capacity_num_bytes
        };
        if capacity % element != 0 {
            return Err(MojoResult::InvalidArgument);
        }
        if capacity > self.config.max_data_pipe_capacity {
            return Err(MojoResult::ResourceExhausted);
        }

        let pair = self.mutate(|state| {
            let pipe = state.alloc_object();
            state
                .data_pipes
                .insert(pipe, DataPipe::new(element as usize, capacity as usize));
            let producer = state.install(Dispatcher::DataPipeProducer { pipe });
            let consumer = state.install(Dispatcher::DataPipeConsumer { pipe });
            (producer, consumer)
        });
        debug!(
            producer = pair.0,
            consumer = pair.1,
            element,
            capacity,
            "Created data pipe"
        );
        Ok(pair)
    }

    fn write_data(
        &self,
        producer: MojoHandle,
        data: &[u8],
        flags: MojoWriteDataFlags,
    ) -> Result<u32, MojoResult> {
        self.mutate(|state| state.producer_mut(producer)?.write(data, flags))
    }

    fn begin_write_data(
        &self,
        producer: MojoHandle,
        _flags: MojoWriteDataFlags,
    ) -> Result<RawBuffer, MojoResult> {
        self.mutate(|state| state.producer_mut(producer)?.begin_write())
    }

    fn end_write_data(&self, producer: MojoHandle, num_bytes_written: u32) -> MojoResult {
        self.mutate(|state| match state.producer_mut(producer) {
            Ok(pipe) => pipe.end_write(num_bytes_written as usize),
            Err(result) => result,
        })
    }

    fn read_data(
        &self,
        consumer: MojoHandle,
        buf: &mut [u8],
        flags: MojoReadDataFlags,
    ) -> Result<u32, MojoResult> {
        self.mutate(|state| state.consumer_mut(consumer)?.read(buf, flags))
    }

    fn discard_data(
        &self,
        consumer: MojoHandle,
        num_bytes: u32,
        flags: MojoReadDataFlags,
    ) -> Result<u32, MojoResult> {
        self.mutate(|state| state.consumer_mut(consumer)?.discard(num_bytes as usize, flags))
    }

    fn begin_read_data(
        &self,
        consumer: MojoHandle,
        _flags: MojoReadDataFlags,
    ) -> Result<RawBuffer, MojoResult> {
        self.mutate(|state| state.consumer_mut(consumer)?.begin_read())
    }

    fn end_read_data(&self, consumer: MojoHandle, num_bytes_read: u32) -> MojoResult {
        self.mutate(|state| match state.consumer_mut(consumer) {
            Ok(pipe) => pipe.end_read(num_bytes_read as usize),
            Err(result) => result,
        })
    }

    fn create_shared_buffer(
        &self,
        _options: Option<&SharedBufferOptions>,
        num_bytes: u64,
    ) -> Result<MojoHandle, MojoResult> {
        if num_bytes == 0 {
            return Err(MojoResult::InvalidArgument);
        }
        if num_bytes > self.config.max_shared_buffer_num_bytes {
            return Err(MojoResult::ResourceExhausted);
        }
        let len = usize::try_from(num_bytes).map_err(|_| MojoResult::ResourceExhausted)?;
        let region = Arc::new(SharedRegion::new(len)?);
        let handle = self.mutate(|state| state.install(Dispatcher::SharedBuffer { region }));
        debug!(handle, num_bytes, "Created shared buffer");
        Ok(handle)
    }

    fn duplicate_buffer_handle(
        &self,
        handle: MojoHandle,
        _options: Option<&DuplicateBufferHandleOptions>,
    ) -> Result<MojoHandle, MojoResult> {
        self.mutate(|state| {
            let region = state.region(handle)?;
            Ok(state.install(Dispatcher::SharedBuffer { region }))
        })
    }

    fn map_buffer(
        &self,
        handle: MojoHandle,
        offset: u64,
        num_bytes: u64,
        _flags: MojoMapBufferFlags,
    ) -> Result<RawBuffer, MojoResult> {
        self.mutate(|state| {
            let region = state.region(handle)?;
            let buffer = region.span(offset, num_bytes)?;
            state.mappings.push((buffer, region));
            Ok(buffer)
        })
    }

    fn unmap_buffer(&self, buffer: RawBuffer) -> MojoResult {
        self.mutate(|state| {
            match state.mappings.iter().position(|(mapped, _)| *mapped == buffer) {
                Some(pos) => {
                    state.mappings.swap_remove(pos);
                    MojoResult::Ok
                }
                None => MojoResult::InvalidArgument,
            }
        })
    }
}
