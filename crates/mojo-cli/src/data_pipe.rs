use std::thread;
use std::time::Instant;

use anyhow::{anyhow, bail, ensure, Context, Result};
use tracing::{debug, info};

use mojo_system::{
    ConsumerHandle, Core, DataPipeOptions, Handle, MojoHandleSignals, MojoReadDataFlags,
    MojoResult, MojoWriteDataFlags, ProducerHandle, DEADLINE_INDEFINITE,
};

fn pattern(offset: u64) -> u8 {
    (offset.wrapping_mul(31).wrapping_add(7) % 251) as u8
}

fn produce(mut producer: ProducerHandle, total: u64) -> Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    let mut sent = 0u64;
    while sent < total {
        let outcome = producer.wait(MojoHandleSignals::WRITABLE, DEADLINE_INDEFINITE);
        if outcome.result != MojoResult::Ok {
            bail!("consumer went away after {sent} bytes: {}", outcome.result);
        }

        let mut window = match producer.begin_write_data(MojoWriteDataFlags::NONE) {
            Ok(window) => window,
            Err(e) if e.is_transient() => continue,
            Err(e) => return Err(e.into()),
        };
        let remaining = usize::try_from(total - sent).unwrap_or(usize::MAX);
        let n = window.len().min(remaining);
        for (i, byte) in window[..n].iter_mut().enumerate() {
            *byte = pattern(sent + i as u64);
        }
        hasher.update(&window[..n]);
        window.commit(n)?;
        sent += n as u64;
    }
    debug!(sent, "Producer done");
    Ok(hasher.finalize())
}

fn consume(consumer: &mut ConsumerHandle) -> Result<(u64, blake3::Hash)> {
    let mut hasher = blake3::Hasher::new();
    let mut received = 0u64;
    loop {
        let outcome = consumer.wait(MojoHandleSignals::READABLE, DEADLINE_INDEFINITE);
        match outcome.result {
            MojoResult::Ok => {}
            // Producer closed and everything has been drained.
            MojoResult::FailedPrecondition => break,
            other => bail!("wait on consumer failed: {other}"),
        }

        let window = match consumer.begin_read_data(MojoReadDataFlags::NONE) {
            Ok(window) => window,
            Err(e) if e.result() == MojoResult::ShouldWait => continue,
            Err(e) if e.result() == MojoResult::FailedPrecondition => break,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&window);
        let n = window.len();
        window.commit(n)?;
        received += n as u64;
    }
    Ok((received, hasher.finalize()))
}

pub fn run(core: Core, bytes: u64, capacity: u32) -> Result<()> {
    let options = DataPipeOptions {
        capacity_num_bytes: capacity,
        ..Default::default()
    };
    let (producer, mut consumer) = core
        .create_data_pipe(Some(&options))
        .context("Failed to create data pipe")?;

    let started = Instant::now();
    let writer = thread::Builder::new()
        .name("data-pipe-producer".to_string())
        .spawn(move || produce(producer, bytes))
        .context("Failed to spawn producer")?;

    let (received, consumer_hash) = consume(&mut consumer)?;
    let producer_hash = writer
        .join()
        .map_err(|_| anyhow!("producer thread panicked"))??;
    let elapsed = started.elapsed();

    ensure!(
        received == bytes,
        "received {received} bytes, expected {bytes}"
    );
    ensure!(
        producer_hash == consumer_hash,
        "hash mismatch: sent {producer_hash}, received {consumer_hash}"
    );

    let mib_per_sec = bytes as f64 / (1024.0 * 1024.0) / elapsed.as_secs_f64().max(f64::EPSILON);
    info!(bytes, capacity, hash = %consumer_hash, "Data pipe transfer verified");
    println!("✓ Data pipe transfer complete");
    println!("  Bytes:    {}", bytes);
    println!("  Capacity: {}", capacity);
    println!("  BLAKE3:   {}", consumer_hash);
    println!("  Rate:     {:.1} MiB/s", mib_per_sec);
    Ok(())
}
