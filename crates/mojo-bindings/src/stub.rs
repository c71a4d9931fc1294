//! Dispatch of incoming messages to a `MessageReceiver`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::connector::Connector;
use crate::error::{ConnectorError, StubError};
use crate::message::Message;

/// Handles incoming messages for a [`Stub`].
pub trait MessageReceiver: Send + Sync {
    fn accept(&self, message: Message) -> anyhow::Result<()>;
}

impl<F> MessageReceiver for F
where
    F: Fn(Message) -> anyhow::Result<()> + Send + Sync,
{
    fn accept(&self, message: Message) -> anyhow::Result<()> {
        self(message)
    }
}

/// Reads requests off a connector and hands each one to a receiver.
///
/// Safe to serve from several threads at once; each call gets its own
/// message because the connector serializes reads.
pub struct Stub {
    connector: Arc<Connector>,
    receiver: Arc<dyn MessageReceiver>,
}

impl Stub {
    pub fn new(connector: Arc<Connector>, receiver: Arc<dyn MessageReceiver>) -> Self {
        Self {
            connector,
            receiver,
        }
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    /// Block for one message and dispatch it.
    pub fn serve_request(&self) -> Result<(), StubError> {
        let message = self.connector.read_message()?;
        self.receiver.accept(message).map_err(StubError::Receiver)
    }

    /// Serve until the connector is closed or the peer goes away. Receiver
    /// failures are logged and do not stop the loop. Returns the number of
    /// messages accepted.
    pub fn serve_until_closed(&self) -> Result<usize, StubError> {
        let mut served = 0;
        loop {
            match self.serve_request() {
                Ok(()) => served += 1,
                Err(StubError::Receiver(e)) => {
                    warn!(error = %format!("{e:#}"), "Receiver rejected message");
                }
                Err(StubError::Connector(ConnectorError::Closed)) => break,
                Err(StubError::Connector(e)) if e.is_peer_closed() => break,
                Err(e) => return Err(e),
            }
        }
        debug!(served, "Stub stopped serving");
        Ok(served)
    }

    pub fn close(&self) -> Result<(), ConnectorError> {
        self.connector.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_waiter::{AsyncWaiter, ThreadAsyncWaiter};
    use mojo_system::Core;
    use parking_lot::Mutex;

    fn connectors() -> (Arc<Connector>, Arc<Connector>) {
        let core = Core::embedded();
        let waiter: Arc<dyn AsyncWaiter> = Arc::new(ThreadAsyncWaiter::new(core.clone()).unwrap());
        let (h0, h1) = core.create_message_pipe(None).unwrap();
        (
            Arc::new(Connector::new(h0, Arc::clone(&waiter))),
            Arc::new(Connector::new(h1, waiter)),
        )
    }

    #[test]
    fn test_dispatches_to_receiver() {
        let (client, server) = connectors();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let stub = Stub::new(
            server,
            Arc::new(move |message: Message| -> anyhow::Result<()> {
                sink.lock().push(message.payload);
                Ok(())
            }),
        );

        client.write_message(Message::from_payload("one")).unwrap();
        stub.serve_request().unwrap();
        assert_eq!(*seen.lock(), vec![b"one".to_vec()]);
    }

    #[test]
    fn test_receiver_error_is_returned_unchanged() {
        let (client, server) = connectors();
        let stub = Stub::new(
            server,
            Arc::new(|message: Message| {
                if message.payload == b"bad" {
                    anyhow::bail!("unsupported request");
                }
                Ok(())
            }),
        );

        client.write_message(Message::from_payload("bad")).unwrap();
        client.write_message(Message::from_payload("good")).unwrap();

        match stub.serve_request() {
            Err(StubError::Receiver(e)) => assert_eq!(e.to_string(), "unsupported request"),
            other => panic!("unexpected result: {other:?}"),
        }
        // The failure does not poison the connector.
        stub.serve_request().unwrap();
    }

    #[test]
    fn test_serve_until_peer_closes() {
        let (client, server) = connectors();
        let stub = Stub::new(server, Arc::new(|_: Message| -> anyhow::Result<()> { Ok(()) }));

        for i in 0..3u8 {
            client.write_message(Message::from_payload(vec![i])).unwrap();
        }
        client.close().unwrap();
        assert_eq!(stub.serve_until_closed().unwrap(), 3);
    }

    #[test]
    fn test_closed_stub_fails() {
        let (_client, server) = connectors();
        let stub = Stub::new(server, Arc::new(|_: Message| -> anyhow::Result<()> { Ok(()) }));
        stub.close().unwrap();
        assert!(matches!(
            stub.serve_request(),
            Err(StubError::Connector(ConnectorError::Closed))
        ));
    }
}
