use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, ensure, Context, Result};
use tracing::{debug, info};

use mojo_bindings::{AsyncWaiter, Connector, Message, Stub, ThreadAsyncWaiter};
use mojo_system::Core;

/// Request payload: little-endian id followed by a filler derived from it.
fn payload(id: u64, len: usize) -> Vec<u8> {
    let len = len.max(8);
    let mut bytes = Vec::with_capacity(len);
    bytes.extend_from_slice(&id.to_le_bytes());
    bytes.extend((8..len).map(|i| (id as usize).wrapping_add(i) as u8));
    bytes
}

fn request_id(bytes: &[u8]) -> Result<u64> {
    let head: [u8; 8] = bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| anyhow!("reply too short: {} bytes", bytes.len()))?;
    Ok(u64::from_le_bytes(head))
}

pub fn run(core: Core, requests: u64, workers: usize, payload_bytes: usize) -> Result<()> {
    ensure!(workers > 0, "at least one worker is required");

    let waiter: Arc<dyn AsyncWaiter> = Arc::new(ThreadAsyncWaiter::new(core.clone())?);
    let (client_end, server_end) = core.create_message_pipe(None)?;
    let client = Connector::new(client_end, Arc::clone(&waiter));
    let server = Arc::new(Connector::new(server_end, waiter));

    let replies = Arc::clone(&server);
    let stub = Arc::new(Stub::new(
        server,
        Arc::new(move |message: Message| -> Result<()> {
            replies.write_message(message)?;
            Ok(())
        }),
    ));

    let mut pool = Vec::with_capacity(workers);
    for i in 0..workers {
        let stub = Arc::clone(&stub);
        let worker = thread::Builder::new()
            .name(format!("echo-{i}"))
            .spawn(move || stub.serve_until_closed())
            .context("Failed to spawn echo worker")?;
        pool.push(worker);
    }

    let started = Instant::now();
    for id in 0..requests {
        client.write_message(Message::from_payload(payload(id, payload_bytes)))?;
    }

    let mut seen = HashSet::with_capacity(requests as usize);
    for _ in 0..requests {
        let reply = client.read_message()?;
        let id = request_id(&reply.payload)?;
        ensure!(
            reply.payload == payload(id, payload_bytes),
            "corrupt reply for request {id}"
        );
        ensure!(seen.insert(id), "duplicate reply for request {id}");
    }
    let elapsed = started.elapsed();

    // The workers stop once they see the client end go away.
    client.close()?;
    let mut served = 0;
    for worker in pool {
        let count = worker
            .join()
            .map_err(|_| anyhow!("echo worker panicked"))??;
        debug!(count, "Echo worker finished");
        served += count;
    }

    info!(
        requests,
        workers,
        served,
        elapsed_ms = elapsed.as_millis() as u64,
        "Echo finished"
    );
    println!("✓ Echo complete");
    println!("  Requests: {}", requests);
    println!("  Workers:  {}", workers);
    println!("  Elapsed:  {:.2?}", elapsed);
    Ok(())
}
