//! End-to-end tests for piping tokio I/O through a throttle.

use std::io::{self, Cursor};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::task::LocalSet;
use tokio::time::Instant;
use trickle_flow::{FlowError, Throttle, ThrottleConfig};
use trickle_io::{forward, pipe, throttle_reader, PipeError, CHUNK_SIZE_DEFAULT};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn payload(len: usize) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation)]
    (0..len).map(|i| (i % 239) as u8).collect()
}

/// Yields `remaining` bytes, then fails every read.
struct FailingReader {
    remaining: usize,
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.remaining == 0 {
            return Poll::Ready(Err(io::Error::other("source failed")));
        }
        let n = self.remaining.min(buf.remaining());
        buf.put_slice(&vec![1u8; n]);
        self.remaining -= n;
        Poll::Ready(Ok(()))
    }
}

/// Rejects every write.
struct FailingWriter;

impl AsyncWrite for FailingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_reader_is_delivered_intact_at_rate() {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            let data = payload(4_096);
            let start = Instant::now();
            let mut throttled =
                throttle_reader(Cursor::new(data.clone()), ThrottleConfig::new(1_024)).unwrap();

            let mut sink = Vec::new();
            let written = forward(&mut throttled.events, &mut sink).await.unwrap();
            let read = throttled.task.await.unwrap().unwrap();

            assert_eq!(read, 4_096);
            assert_eq!(written, 4_096);
            assert_eq!(sink, data);

            // 4 KB at 1 KB/s; the last wake-up may land just short of 4 s
            // because rounding lets the final byte through early.
            let elapsed = Instant::now() - start;
            assert!(elapsed >= Duration::from_millis(3_900), "{elapsed:?}");
            assert!(elapsed < Duration::from_millis(4_300), "{elapsed:?}");
            assert!(throttled.throttle.is_ended());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_small_reads_preserve_order() {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            let data = payload(3_000);
            let throttle = Throttle::new(ThrottleConfig::new(10_000));
            let mut events = throttle.events();

            let feeder = throttle.clone();
            let source = data.clone();
            let task =
                tokio::task::spawn_local(async move { pipe(Cursor::new(source), &feeder, 97).await });

            let mut sink = Vec::new();
            forward(&mut events, &mut sink).await.unwrap();

            assert_eq!(task.await.unwrap().unwrap(), 3_000);
            assert_eq!(sink, data);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_pipe_stops_when_consumer_ends_stream() {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            let throttle = Throttle::new(ThrottleConfig::new(1_000));
            let weak = throttle.downgrade();
            throttle.on_data(move |_| {
                if let Some(throttle) = weak.upgrade() {
                    throttle.end();
                }
            });

            let result = pipe(Cursor::new(payload(100_000)), &throttle, 100).await;
            assert!(matches!(result, Err(PipeError::Flow(FlowError::Ended))));
            assert_eq!(throttle.stats().total_bytes_emitted, 100);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_read_error_destroys_throttle() {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            let throttle = Throttle::new(ThrottleConfig::new(1_000));
            let mut events = throttle.events();

            let feeder = throttle.clone();
            let task = tokio::task::spawn_local(async move {
                pipe(FailingReader { remaining: 10 }, &feeder, 64).await
            });

            let mut sink = Vec::new();
            let result = forward(&mut events, &mut sink).await;
            assert!(matches!(result, Err(PipeError::Aborted { bytes_written: 10 })));
            assert!(matches!(task.await.unwrap(), Err(PipeError::Io(_))));
            assert!(throttle.is_ended());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_write_error_destroys_throttle() {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            let mut throttled =
                throttle_reader(Cursor::new(payload(1 << 20)), ThrottleConfig::new(4_096))
                    .unwrap();

            let result = forward(&mut throttled.events, FailingWriter).await;
            assert!(matches!(result, Err(PipeError::Io(_))));
            assert!(throttled.throttle.is_ended());

            let piped = throttled.task.await.unwrap();
            assert!(matches!(piped, Err(PipeError::Flow(FlowError::Ended))));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_writer_holds_producer_back() {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            let throttled =
                throttle_reader(Cursor::new(payload(8 << 20)), ThrottleConfig::new(1 << 20))
                    .unwrap();
            let throttle = throttled.throttle.clone();
            let mut events = throttled.events;

            // The peer never reads, so the writer stalls after 64 bytes.
            let (writer, _peer) = tokio::io::duplex(64);
            let forwarder =
                tokio::task::spawn_local(async move { forward(&mut events, writer).await });

            tokio::time::sleep(Duration::from_secs(4)).await;

            let stats = throttle.stats();
            assert!(stats.paused);
            assert!(!stats.timer_armed);
            assert!(
                stats.total_bytes_emitted <= 4 * CHUNK_SIZE_DEFAULT as u64,
                "{stats:?}"
            );
            assert!(!forwarder.is_finished());
            throttle.destroy();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_pipe_fails_when_throttle_destroyed_while_waiting() {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            let throttle = Throttle::new(ThrottleConfig::new(1_000));
            let feeder = throttle.clone();
            let task = tokio::task::spawn_local(async move {
                pipe(Cursor::new(payload(100)), &feeder, 1_024).await
            });

            // The only chunk is held back; the pipe is waiting for the queue.
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(throttle.stats().pending_bytes, 100);
            throttle.destroy();

            let result = task.await.unwrap();
            assert!(matches!(result, Err(PipeError::Flow(FlowError::Ended))));
            assert_eq!(throttle.stats().total_bytes_emitted, 0);
        })
        .await;
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = throttle_reader(Cursor::new(Vec::new()), ThrottleConfig::new(0));
    assert!(matches!(
        result,
        Err(PipeError::Flow(FlowError::InvalidConfig { .. }))
    ));
}
