//! Feeding a throttle from an [`AsyncRead`].

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trickle_flow::{FlowError, Throttle, ThrottleConfig, ThrottleEvents, WriteOutcome};

use crate::error::PipeResult;

/// Default read size for [`pipe`] (16 KB).
pub const CHUNK_SIZE_DEFAULT: usize = 16 * 1024;

/// Reads `reader` to EOF and writes everything into `throttle`.
///
/// Honors the throttle's backpressure: after a write is not fully accepted,
/// no further read happens until the pending queue has emptied. At EOF the
/// queue is allowed to drain before the throttle is ended, so no accepted
/// byte is lost.
///
/// Returns the number of bytes read.
///
/// # Errors
///
/// - `PipeError::Io` if a read fails; the throttle is destroyed first.
/// - `PipeError::Flow(FlowError::Ended)` if the throttle ends or is
///   destroyed before the pipe ends it.
pub async fn pipe<R>(mut reader: R, throttle: &Throttle, chunk_size: usize) -> PipeResult<u64>
where
    R: AsyncRead + Unpin,
{
    let chunk_size = chunk_size.max(1);
    let mut buf = BytesMut::with_capacity(chunk_size);
    let mut total_bytes = 0u64;

    debug!(chunk_size, "Pipe started");
    loop {
        buf.reserve(chunk_size);
        let n = match (&mut reader).take(chunk_size as u64).read_buf(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, total_bytes, "Pipe read failed, destroying throttle");
                throttle.destroy();
                return Err(e.into());
            }
        };
        if n == 0 {
            break;
        }
        total_bytes += n as u64;

        match throttle.write(buf.split().freeze()) {
            WriteOutcome::Accepted => {}
            WriteOutcome::Backpressure => throttle.writable().await,
            WriteOutcome::Dropped => {
                debug!(total_bytes, "Throttle ended before source EOF");
                return Err(FlowError::Ended.into());
            }
        }
    }

    throttle.writable().await;
    if throttle.is_ended() {
        debug!(total_bytes, "Throttle ended before pipe could finish");
        return Err(FlowError::Ended.into());
    }
    throttle.end();
    info!(total_bytes, "Pipe finished");
    Ok(total_bytes)
}

/// A throttle fed from a reader by a background task.
#[derive(Debug)]
pub struct ThrottledReader {
    /// The throttle. Use it for consumer backpressure (`pause`/`resume`).
    pub throttle: Throttle,
    /// Signals from the throttle, subscribed before the first read.
    pub events: ThrottleEvents,
    /// The task running [`pipe`].
    pub task: JoinHandle<PipeResult<u64>>,
}

/// Throttles `reader` according to `config`.
///
/// Must be called inside a [`tokio::task::LocalSet`].
///
/// # Errors
///
/// Returns `PipeError::Flow` if the configuration is invalid.
pub fn throttle_reader<R>(reader: R, config: ThrottleConfig) -> PipeResult<ThrottledReader>
where
    R: AsyncRead + Unpin + 'static,
{
    let throttle = Throttle::try_new(config)?;
    let events = throttle.events();
    let feeder = throttle.clone();
    let task = tokio::task::spawn_local(async move {
        pipe(reader, &feeder, CHUNK_SIZE_DEFAULT).await
    });

    Ok(ThrottledReader {
        throttle,
        events,
        task,
    })
}
