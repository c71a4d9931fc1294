//! Turning blocking waits into one-shot channel notifications.
//!
//! [`ThreadAsyncWaiter`] parks a single background thread in `wait_many`
//! over every registered handle plus a private wake-up pipe. Registering or
//! cancelling queues a command and pokes the wake-up pipe so the thread
//! rebuilds its wait set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError, TrySendError};
use mojo_system::{
    Core, Handle, MessagePipeHandle, MojoHandle, MojoHandleSignals, MojoReadMessageFlags,
    MojoResult, MojoWriteMessageFlags, SignalsState, DEADLINE_INDEFINITE,
};
use tracing::{debug, trace, warn};

use crate::error::WaiterError;

pub type AsyncWaitId = u64;

/// Delivered exactly once per registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitResponse {
    pub result: MojoResult,
    pub state: Option<SignalsState>,
}

pub trait AsyncWaiter: Send + Sync {
    /// Register interest in `signals` on `handle`. `responder` receives one
    /// [`WaitResponse`] when the signals are satisfied or become
    /// unsatisfiable, unless the wait is cancelled first.
    fn async_wait(
        &self,
        handle: &dyn Handle,
        signals: MojoHandleSignals,
        responder: Sender<WaitResponse>,
    ) -> AsyncWaitId;

    /// Drop a registration. A no-op if it already fired.
    fn cancel_wait(&self, id: AsyncWaitId);
}

struct Registration {
    id: AsyncWaitId,
    handle: MojoHandle,
    signals: MojoHandleSignals,
    responder: Sender<WaitResponse>,
}

impl Registration {
    fn respond(self, response: WaitResponse) {
        match self.responder.try_send(response) {
            Ok(()) => trace!(id = self.id, result = %response.result, "Wait fired"),
            Err(TrySendError::Disconnected(_)) => {
                trace!(id = self.id, "Wait fired after responder went away");
            }
            Err(TrySendError::Full(_)) => {
                warn!(id = self.id, "Wait response dropped: responder is full");
            }
        }
    }
}

enum Command {
    Register(Registration),
    Cancel(AsyncWaitId),
    Shutdown,
}

pub struct ThreadAsyncWaiter {
    next_id: AtomicU64,
    commands: Sender<Command>,
    wake: MessagePipeHandle,
    worker: Option<JoinHandle<()>>,
}

impl ThreadAsyncWaiter {
    pub fn new(core: Core) -> Result<Self, WaiterError> {
        let (wake, wake_rx) = core.create_message_pipe(None)?;
        let (commands, command_rx) = unbounded();
        let worker = thread::Builder::new()
            .name("mojo-async-waiter".to_string())
            .spawn(move || run(core, wake_rx, command_rx))?;
        debug!("Started async waiter thread");
        Ok(Self {
            next_id: AtomicU64::new(1),
            commands,
            wake,
            worker: Some(worker),
        })
    }

    fn submit(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Async waiter thread is gone");
            return;
        }
        if let Err(e) = self
            .wake
            .write_message(&[], Vec::new(), MojoWriteMessageFlags::NONE)
        {
            warn!(error = %e, "Failed to wake async waiter thread");
        }
    }
}

impl AsyncWaiter for ThreadAsyncWaiter {
    fn async_wait(
        &self,
        handle: &dyn Handle,
        signals: MojoHandleSignals,
        responder: Sender<WaitResponse>,
    ) -> AsyncWaitId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = handle.native_handle();
        trace!(id, handle, ?signals, "Registering wait");
        self.submit(Command::Register(Registration {
            id,
            handle,
            signals,
            responder,
        }));
        id
    }

    fn cancel_wait(&self, id: AsyncWaitId) {
        trace!(id, "Cancelling wait");
        self.submit(Command::Cancel(id));
    }
}

impl Drop for ThreadAsyncWaiter {
    fn drop(&mut self) {
        self.submit(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Async waiter thread panicked");
            }
        }
    }
}

fn cancel_all(pending: Vec<Registration>, result: MojoResult) {
    for registration in pending {
        registration.respond(WaitResponse {
            result,
            state: None,
        });
    }
}

fn run(core: Core, wake: MessagePipeHandle, commands: Receiver<Command>) {
    let mut pending: Vec<Registration> = Vec::new();
    loop {
        loop {
            match commands.try_recv() {
                Ok(Command::Register(registration)) => pending.push(registration),
                Ok(Command::Cancel(id)) => pending.retain(|r| r.id != id),
                Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => {
                    debug!(pending = pending.len(), "Async waiter shutting down");
                    cancel_all(pending, MojoResult::Cancelled);
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        let mut handles = Vec::with_capacity(pending.len() + 1);
        let mut signals = Vec::with_capacity(pending.len() + 1);
        handles.push(wake.native_handle());
        signals.push(MojoHandleSignals::READABLE);
        for registration in &pending {
            handles.push(registration.handle);
            signals.push(registration.signals);
        }

        let outcome = core.wait_many_native(&handles, &signals, DEADLINE_INDEFINITE);
        match outcome.index {
            Some(0) => {
                if outcome.result != MojoResult::Ok {
                    warn!(result = %outcome.result, "Wake-up pipe failed");
                    cancel_all(pending, MojoResult::Cancelled);
                    return;
                }
                while wake.read_message(MojoReadMessageFlags::NONE).is_ok() {}
            }
            Some(index) => {
                let registration = pending.remove(index - 1);
                let state = outcome
                    .states
                    .as_ref()
                    .and_then(|states| states.get(index).copied());
                registration.respond(WaitResponse {
                    result: outcome.result,
                    state,
                });
            }
            None => {
                warn!(result = %outcome.result, "Wait failed for every handle");
                cancel_all(pending, outcome.result);
                return;
            }
        }
    }
}
