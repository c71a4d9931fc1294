//! Message pipe queues and handle transfer.

use std::collections::VecDeque;

use super::{Dispatcher, ObjectId, State};
use crate::result::MojoResult;
use crate::thunks::ReadMessageSizes;
use crate::types::{MojoHandle, MojoHandleSignals, MojoReadMessageFlags, SignalsState};

/// A message in flight: payload plus the dispatchers of attached handles.
#[derive(Debug)]
pub(super) struct PipeMessage {
    bytes: Vec<u8>,
    dispatchers: Vec<Dispatcher>,
}

/// Two endpoints; `queues[side]` holds messages waiting to be read by `side`.
#[derive(Debug)]
pub(super) struct MessagePipe {
    queues: [VecDeque<PipeMessage>; 2],
    open: [bool; 2],
}

impl MessagePipe {
    pub(super) fn new() -> Self {
        Self {
            queues: [VecDeque::new(), VecDeque::new()],
            open: [true, true],
        }
    }

    pub(super) fn signals(&self, side: usize) -> SignalsState {
        let peer_open = self.open[1 - side];
        let has_message = !self.queues[side].is_empty();

        let mut satisfied = MojoHandleSignals::NONE;
        let mut satisfiable = MojoHandleSignals::PEER_CLOSED;
        if has_message {
            satisfied |= MojoHandleSignals::READABLE;
        }
        if peer_open {
            satisfied |= MojoHandleSignals::WRITABLE;
            satisfiable |= MojoHandleSignals::READABLE | MojoHandleSignals::WRITABLE;
        } else {
            satisfied |= MojoHandleSignals::PEER_CLOSED;
        }
        if has_message {
            satisfiable |= MojoHandleSignals::READABLE;
        }
        SignalsState::new(satisfied, satisfiable)
    }

    /// Close one endpoint. Messages it will never read are handed back so the
    /// dispatchers they carry can be released.
    pub(super) fn close_side(&mut self, side: usize) -> Vec<Dispatcher> {
        self.open[side] = false;
        self.queues[side]
            .drain(..)
            .flat_map(|message| message.dispatchers)
            .collect()
    }

    pub(super) fn is_dead(&self) -> bool {
        !self.open[0] && !self.open[1]
    }
}

impl State {
    fn message_pipe_endpoint(&self, handle: MojoHandle) -> Result<(ObjectId, usize), MojoResult> {
        match self.handles.get(&handle) {
            Some(Dispatcher::MessagePipe { pipe, side }) => Ok((*pipe, *side)),
            _ => Err(MojoResult::InvalidArgument),
        }
    }

    pub(super) fn write_message(
        &mut self,
        handle: MojoHandle,
        bytes: &[u8],
        attached: &[MojoHandle],
    ) -> MojoResult {
        let (pipe_id, side) = match self.message_pipe_endpoint(handle) {
            Ok(endpoint) => endpoint,
            Err(result) => return result,
        };

        for (i, candidate) in attached.iter().enumerate() {
            if *candidate == handle || attached[..i].contains(candidate) {
                return MojoResult::InvalidArgument;
            }
            match self.handles.get(candidate) {
                None => return MojoResult::InvalidArgument,
                Some(dispatcher) if self.is_busy(dispatcher) => return MojoResult::Busy,
                Some(_) => {}
            }
        }

        let peer_open = self
            .message_pipes
            .get(&pipe_id)
            .is_some_and(|pipe| pipe.open[1 - side]);
        if !peer_open {
            return MojoResult::FailedPrecondition;
        }

        let dispatchers = attached
            .iter()
            .filter_map(|h| self.handles.remove(h))
            .collect();
        if let Some(pipe) = self.message_pipes.get_mut(&pipe_id) {
            pipe.queues[1 - side].push_back(PipeMessage {
                bytes: bytes.to_vec(),
                dispatchers,
            });
        }
        MojoResult::Ok
    }

    pub(super) fn read_message(
        &mut self,
        handle: MojoHandle,
        bytes: Option<&mut [u8]>,
        handles: Option<&mut [MojoHandle]>,
        flags: MojoReadMessageFlags,
    ) -> (MojoResult, ReadMessageSizes) {
        let (pipe_id, side) = match self.message_pipe_endpoint(handle) {
            Ok(endpoint) => endpoint,
            Err(result) => return (result, ReadMessageSizes::default()),
        };
        let Some(pipe) = self.message_pipes.get_mut(&pipe_id) else {
            return (MojoResult::InvalidArgument, ReadMessageSizes::default());
        };

        let Some(front) = pipe.queues[side].front() else {
            let result = if pipe.open[1 - side] {
                MojoResult::ShouldWait
            } else {
                MojoResult::FailedPrecondition
            };
            return (result, ReadMessageSizes::default());
        };

        let sizes = ReadMessageSizes {
            num_bytes: front.bytes.len() as u32,
            num_handles: front.dispatchers.len() as u32,
        };
        let byte_capacity = bytes.as_ref().map_or(0, |b| b.len());
        let handle_capacity = handles.as_ref().map_or(0, |h| h.len());
        let fits = byte_capacity >= front.bytes.len() && handle_capacity >= front.dispatchers.len();

        if !fits {
            if flags.contains(MojoReadMessageFlags::MAY_DISCARD) {
                if let Some(dropped) = pipe.queues[side].pop_front() {
                    for dispatcher in dropped.dispatchers {
                        self.release(dispatcher);
                    }
                }
            }
            return (MojoResult::ResourceExhausted, sizes);
        }

        let Some(message) = pipe.queues[side].pop_front() else {
            return (MojoResult::Internal, sizes);
        };
        if let Some(out) = bytes {
            out[..message.bytes.len()].copy_from_slice(&message.bytes);
        }
        if let Some(out) = handles {
            for (slot, dispatcher) in out.iter_mut().zip(message.dispatchers) {
                *slot = self.install(dispatcher);
            }
        }
        (MojoResult::Ok, sizes)
    }
}
