use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use mojo_bindings::{
    AsyncWaiter, Connector, ConnectorError, Message, Stub, StubError, ThreadAsyncWaiter,
};
use mojo_system::{Core, Handle, MojoReadMessageFlags, MojoResult, MojoWriteMessageFlags};

fn setup() -> (Core, Arc<dyn AsyncWaiter>) {
    let core = Core::embedded();
    let waiter: Arc<dyn AsyncWaiter> = Arc::new(ThreadAsyncWaiter::new(core.clone()).unwrap());
    (core, waiter)
}

/// Two readers racing on one connector fed two messages each get exactly one.
#[test]
fn test_concurrent_readers_get_distinct_messages() {
    let (core, waiter) = setup();
    let (h0, h1) = core.create_message_pipe(None).unwrap();
    let reader = Arc::new(Connector::new(h1, waiter));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let reader = Arc::clone(&reader);
            thread::spawn(move || reader.read_message().unwrap().payload)
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    h0.write_message(b"first", Vec::new(), MojoWriteMessageFlags::NONE)
        .unwrap();
    h0.write_message(b"second", Vec::new(), MojoWriteMessageFlags::NONE)
        .unwrap();

    let received: HashSet<Vec<u8>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let expected: HashSet<Vec<u8>> = [b"first".to_vec(), b"second".to_vec()].into();
    assert_eq!(received, expected);
}

/// Closing the connector releases a reader blocked on an idle pipe.
#[test]
fn test_close_unblocks_reader() {
    let (core, waiter) = setup();
    let (_h0, h1) = core.create_message_pipe(None).unwrap();
    let connector = Arc::new(Connector::new(h1, waiter));

    let (tx, rx) = unbounded();
    let blocked = {
        let connector = Arc::clone(&connector);
        thread::spawn(move || {
            let result = connector.read_message();
            tx.send(()).unwrap();
            result
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    connector.close().unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(blocked.join().unwrap(), Err(ConnectorError::Closed)));
}

/// Closing also fails readers still queued behind the blocked one.
#[test]
fn test_close_fails_every_queued_reader() {
    let (core, waiter) = setup();
    let (_h0, h1) = core.create_message_pipe(None).unwrap();
    let connector = Arc::new(Connector::new(h1, waiter));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let connector = Arc::clone(&connector);
            thread::spawn(move || connector.read_message())
        })
        .collect();

    thread::sleep(Duration::from_millis(30));
    connector.close().unwrap();
    for reader in readers {
        assert!(matches!(reader.join().unwrap(), Err(ConnectorError::Closed)));
    }
}

/// A write on the same connector goes through while a read is blocked.
#[test]
fn test_write_during_blocked_read() {
    let (core, waiter) = setup();
    let (h0, h1) = core.create_message_pipe(None).unwrap();
    let connector = Arc::new(Connector::new(h1, waiter));

    let blocked = {
        let connector = Arc::clone(&connector);
        thread::spawn(move || connector.read_message())
    };
    thread::sleep(Duration::from_millis(20));

    connector
        .write_message(Message::from_payload("full duplex"))
        .unwrap();
    let (bytes, _) = h0.read_message(MojoReadMessageFlags::NONE).unwrap();
    assert_eq!(bytes, b"full duplex");

    h0.write_message(b"reply", Vec::new(), MojoWriteMessageFlags::NONE)
        .unwrap();
    assert_eq!(blocked.join().unwrap().unwrap().payload, b"reply");
}

/// The raw pipe reports SHOULD_WAIT; a connector on it blocks until a writer
/// on another thread delivers.
#[test]
fn test_should_wait_then_deliver() {
    let (core, waiter) = setup();
    let (h0, h1) = core.create_message_pipe(None).unwrap();
    let err = h1.read_message(MojoReadMessageFlags::NONE).unwrap_err();
    assert_eq!(err.result(), MojoResult::ShouldWait);

    let connector = Connector::new(h1, waiter);
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        h0.write_message(b"delivered", Vec::new(), MojoWriteMessageFlags::NONE)
            .unwrap();
        h0
    });
    assert_eq!(connector.read_message().unwrap().payload, b"delivered");
    writer.join().unwrap();
}

/// Handles attached through a connector arrive valid and in order.
#[test]
fn test_handles_travel_through_connectors() {
    let (core, waiter) = setup();
    let (h0, h1) = core.create_message_pipe(None).unwrap();
    let sender = Connector::new(h0, Arc::clone(&waiter));
    let receiver = Connector::new(h1, waiter);

    let (p, c) = core.create_data_pipe(None).unwrap();
    sender
        .write_message(Message::new(
            b"pipes".to_vec(),
            vec![p.to_untyped_handle(), c.to_untyped_handle()],
        ))
        .unwrap();

    let mut message = receiver.read_message().unwrap();
    assert_eq!(message.handles.len(), 2);
    let consumer = message.handles.pop().unwrap().to_consumer_handle();
    let producer = message.handles.pop().unwrap().to_producer_handle();
    producer
        .write_data(b"through", Default::default())
        .unwrap();
    assert_eq!(consumer.read_data(Default::default()).unwrap(), b"through");
}

/// Concurrent serve_request calls each dispatch a different message, and a
/// receiver error reaches only the caller that hit it.
#[test]
fn test_stub_serves_concurrently() {
    let (core, waiter) = setup();
    let (h0, h1) = core.create_message_pipe(None).unwrap();
    let client = Connector::new(h0, Arc::clone(&waiter));
    let server = Arc::new(Connector::new(h1, waiter));

    let stub = Arc::new(Stub::new(
        server,
        Arc::new(|message: Message| -> anyhow::Result<()> {
            if message.payload == b"reject" {
                anyhow::bail!("rejected");
            }
            Ok(())
        }),
    ));

    for payload in ["a", "reject", "b"] {
        client.write_message(Message::from_payload(payload)).unwrap();
    }

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let stub = Arc::clone(&stub);
            thread::spawn(move || stub.serve_request())
        })
        .collect();
    let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(StubError::Receiver(_))))
            .count(),
        1
    );

    stub.close().unwrap();
    assert!(matches!(
        stub.serve_request(),
        Err(StubError::Connector(ConnectorError::Closed))
    ));
}
