//! Property-based tests for the bounded pipe
//!
//! Covers the FIFO prefix property under arbitrary chunked interleavings,
//! the fixed-length residency bound, and buffer release on close.

use std::time::Duration;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use procflow_pipe::{Pipe, MAX_STABLE_CAPACITY};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("test runtime")
}

/// Concatenated reads equal the written byte stream, for any chunking of
/// writes and reads, with and without backpressure.
#[test]
fn prop_fifo_byte_stream_is_preserved() {
    proptest!(ProptestConfig::with_cases(64), |(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..2000), 0..20),
        read_sizes in prop::collection::vec(1usize..1500, 1..40),
        fixed in any::<bool>(),
    )| {
        let expected: Vec<u8> = chunks.iter().flatten().copied().collect();
        let rt = runtime();
        let collected = rt.block_on(async {
            let pipe = Pipe::new();
            if fixed {
                pipe.set_fixed_length();
            }
            let writer = pipe.writer();
            let reader = pipe.reader();

            let producer = tokio::spawn(async move {
                for chunk in &chunks {
                    writer.write(chunk).await.unwrap();
                }
                writer.close();
            });

            let consumer = tokio::spawn(async move {
                let mut out = Vec::new();
                let mut sizes = read_sizes.iter().cycle();
                loop {
                    let mut buf = vec![0u8; *sizes.next().unwrap()];
                    let n = reader.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    out.extend_from_slice(&buf[..n]);
                }
                out
            });

            producer.await.unwrap();
            consumer.await.unwrap()
        });
        prop_assert_eq!(collected, expected);
    });
}

/// In fixed-length mode the resident buffer never exceeds the clamp once a
/// read drains the pipe, no matter how much data streams through.
#[test]
fn prop_fixed_length_residency_stays_clamped() {
    proptest!(ProptestConfig::with_cases(32), |(
        total in 1usize..(6 * MAX_STABLE_CAPACITY),
    )| {
        let rt = runtime();
        let max_resident = rt.block_on(async {
            let pipe = Pipe::new();
            pipe.set_fixed_length();
            let writer = pipe.writer();
            let reader = pipe.reader();

            let producer = tokio::spawn(async move {
                writer.write(&vec![0xAB; total]).await.unwrap();
                writer.close();
            });

            let mut buf = vec![0u8; 700];
            let mut seen = 0usize;
            let mut max_resident = 0usize;
            loop {
                let n = reader.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen += n;
                max_resident = max_resident.max(pipe.resident_capacity());
            }
            assert_eq!(seen, total);
            producer.await.unwrap();
            max_resident
        });
        prop_assert!(max_resident <= MAX_STABLE_CAPACITY);
    });
}

/// Closing both halves releases the backing allocation regardless of how
/// much was buffered and how much was left unread.
#[test]
fn prop_close_releases_backing_memory() {
    proptest!(ProptestConfig::with_cases(32), |(
        written in 0usize..100_000,
        read_back in 0usize..100_000,
    )| {
        let rt = runtime();
        let (resident, buffered) = rt.block_on(async {
            let pipe = Pipe::new();
            let writer = pipe.writer();
            let reader = pipe.reader();
            writer.write(&vec![1u8; written]).await.unwrap();
            let mut buf = vec![0u8; read_back.min(written)];
            if !buf.is_empty() {
                reader.read(&mut buf).await.unwrap();
            }
            writer.close();
            reader.close();
            (pipe.resident_capacity(), pipe.buffered())
        });
        prop_assert_eq!(resident, 0);
        prop_assert_eq!(buffered, 0);
    });
}

/// Chained fixed-length pipes: a head write larger than the chain's total
/// capacity stays incomplete until the tail is read, and the bytes arrive
/// verbatim.
#[tokio::test]
async fn chained_fixed_pipes_exert_end_to_end_backpressure() {
    const STAGES: usize = 4;
    let total = 8 * MAX_STABLE_CAPACITY + 1;

    let pipes: Vec<Pipe> = (0..STAGES).map(|_| Pipe::new()).collect();
    for pipe in &pipes {
        pipe.set_fixed_length();
    }

    // Copy stages chain pipe N's reader into pipe N+1's writer.
    let mut copiers = Vec::new();
    for window in 0..STAGES - 1 {
        let reader = pipes[window].reader();
        let writer = pipes[window + 1].writer();
        copiers.push(tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            loop {
                let n = reader.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                writer.write(&buf[..n]).await.unwrap();
            }
            writer.close();
        }));
    }

    let head = pipes[0].writer();
    let payload: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();
    let head_write = tokio::spawn(async move {
        head.write(&payload).await.unwrap();
        head.close();
    });

    // The chain can absorb at most STAGES * clamp bytes, so the head write
    // must still be pending before anyone reads the tail.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!head_write.is_finished());

    let tail = pipes[STAGES - 1].reader();
    let mut out = Vec::with_capacity(total);
    let mut buf = vec![0u8; 2048];
    let deadline = Duration::from_secs(10);
    let drained = tokio::time::timeout(deadline, async {
        loop {
            let n = tail.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    })
    .await
    .expect("chain drained within the deadline");

    tokio::time::timeout(deadline, head_write)
        .await
        .expect("head write completed within the deadline")
        .unwrap();
    for copier in copiers {
        copier.await.unwrap();
    }
    assert_eq!(drained.len(), expected.len());
    assert_eq!(drained, expected);
}

/// A cancelled blocked write leaves no partial prefix behind.
#[tokio::test]
async fn cancelled_blocked_write_has_no_effect() {
    let pipe = Pipe::new();
    pipe.set_fixed_length();
    let writer = pipe.writer();
    let reader = pipe.reader();
    writer.write(&vec![9u8; MAX_STABLE_CAPACITY]).await.unwrap();

    let token = CancellationToken::new();
    let blocked = {
        let writer = writer.clone();
        let token = token.clone();
        tokio::spawn(async move { writer.write_with(b"extra", None, &token).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();
    assert_eq!(
        blocked.await.unwrap(),
        Err(procflow_pipe::PipeError::Cancelled)
    );

    let mut buf = vec![0u8; MAX_STABLE_CAPACITY];
    let mut total = 0;
    while total < buf.len() {
        total += reader.read(&mut buf[total..]).await.unwrap();
    }
    writer.close();
    assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    assert!(buf.iter().all(|&b| b == 9));
}
