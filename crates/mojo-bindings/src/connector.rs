//! Blocking reads and writes over one message pipe.
//!
//! Two locks guard a connector. The `pipe` lock protects the handle itself:
//! reads and writes take it shared, `close` takes it exclusively. The
//! `read_lock` serializes readers so at most one wait on the pipe is ever
//! outstanding; writers never touch it, so a write can go out while a read
//! is blocked.

use std::sync::Arc;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use mojo_system::{
    Handle, MessagePipeHandle, MojoHandleSignals, MojoReadMessageFlags, MojoResult,
    MojoWriteMessageFlags,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::async_waiter::{AsyncWaiter, WaitResponse};
use crate::error::ConnectorError;
use crate::message::Message;

pub struct Connector {
    pipe: RwLock<Option<MessagePipeHandle>>,
    read_lock: Mutex<()>,
    waiter: Arc<dyn AsyncWaiter>,
    wait_tx: Sender<WaitResponse>,
    wait_rx: Receiver<WaitResponse>,
    /// Dropped on close; its disconnection wakes every blocked reader.
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
}

impl Connector {
    pub fn new(pipe: MessagePipeHandle, waiter: Arc<dyn AsyncWaiter>) -> Self {
        let (wait_tx, wait_rx) = unbounded();
        let (done_tx, done_rx) = unbounded();
        Self {
            pipe: RwLock::new(Some(pipe)),
            read_lock: Mutex::new(()),
            waiter,
            wait_tx,
            wait_rx,
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.done_tx.lock().is_none()
    }

    /// Try a read under the shared handle lock.
    fn try_read(&self) -> Result<Message, ConnectorError> {
        let pipe = self.pipe.read();
        let pipe = pipe.as_ref().ok_or(ConnectorError::Closed)?;
        let (payload, handles) = pipe.read_message(MojoReadMessageFlags::NONE)?;
        Ok(Message::new(payload, handles))
    }

    /// Read the next message, blocking until one arrives or the connector is
    /// closed.
    pub fn read_message(&self) -> Result<Message, ConnectorError> {
        let _reader = self.read_lock.lock();
        if self.is_closed() {
            return Err(ConnectorError::Closed);
        }

        let wait_id = {
            let pipe = self.pipe.read();
            let pipe = pipe.as_ref().ok_or(ConnectorError::Closed)?;
            match pipe.read_message(MojoReadMessageFlags::NONE) {
                Ok((payload, handles)) => return Ok(Message::new(payload, handles)),
                Err(e) if e.result() == MojoResult::ShouldWait => {}
                Err(e) => return Err(e.into()),
            }
            // Left over from a wait that was cancelled after it fired.
            while self.wait_rx.try_recv().is_ok() {}
            self.waiter
                .async_wait(pipe, MojoHandleSignals::READABLE, self.wait_tx.clone())
        };
        trace!(wait_id, "Blocked waiting for a message");

        select! {
            recv(self.wait_rx) -> response => {
                if let Ok(response) = response {
                    trace!(wait_id, result = %response.result, "Pipe signalled");
                }
                self.try_read()
            }
            recv(self.done_rx) -> _ => {
                self.waiter.cancel_wait(wait_id);
                Err(ConnectorError::Closed)
            }
        }
    }

    /// Send a message. Never blocks on readers.
    pub fn write_message(&self, message: Message) -> Result<(), ConnectorError> {
        let pipe = self.pipe.read();
        let pipe = pipe.as_ref().ok_or(ConnectorError::Closed)?;
        pipe.write_message(
            &message.payload,
            message.handles,
            MojoWriteMessageFlags::NONE,
        )?;
        Ok(())
    }

    /// Wake blocked readers, then close the pipe. Later calls return
    /// [`ConnectorError::Closed`].
    pub fn close(&self) -> Result<(), ConnectorError> {
        let done = self.done_tx.lock().take().ok_or(ConnectorError::Closed)?;
        drop(done);

        let pipe = self.pipe.write().take();
        debug!(
            handle = pipe.as_ref().map(|p| p.native_handle()),
            "Connector closed"
        );
        if let Some(mut pipe) = pipe {
            pipe.close()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("pipe", &*self.pipe.read())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_waiter::ThreadAsyncWaiter;
    use mojo_system::Core;
    use std::thread;
    use std::time::Duration;

    fn pair(core: &Core) -> (Connector, Connector) {
        let waiter: Arc<dyn AsyncWaiter> = Arc::new(ThreadAsyncWaiter::new(core.clone()).unwrap());
        let (h0, h1) = core.create_message_pipe(None).unwrap();
        (
            Connector::new(h0, Arc::clone(&waiter)),
            Connector::new(h1, waiter),
        )
    }

    #[test]
    fn test_immediate_read() {
        let core = Core::embedded();
        let (a, b) = pair(&core);
        a.write_message(Message::from_payload("ping")).unwrap();
        let message = b.read_message().unwrap();
        assert_eq!(message.payload, b"ping");
        assert!(message.handles.is_empty());
    }

    #[test]
    fn test_blocked_read_wakes_on_write() {
        let core = Core::embedded();
        let (a, b) = pair(&core);

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            a.write_message(Message::from_payload("later")).unwrap();
            a
        });

        let message = b.read_message().unwrap();
        assert_eq!(message.payload, b"later");
        writer.join().unwrap();
    }

    #[test]
    fn test_read_after_peer_gone() {
        let core = Core::embedded();
        let (a, b) = pair(&core);
        a.close().unwrap();
        let err = b.read_message().unwrap_err();
        assert!(err.is_peer_closed());
    }

    #[test]
    fn test_second_close_is_an_error() {
        let core = Core::embedded();
        let (a, _b) = pair(&core);
        a.close().unwrap();
        assert!(matches!(a.close(), Err(ConnectorError::Closed)));
        assert!(matches!(
            a.write_message(Message::default()),
            Err(ConnectorError::Closed)
        ));
        assert!(matches!(a.read_message(), Err(ConnectorError::Closed)));
    }
}
