//! Writing a throttle's output into an [`AsyncWrite`].

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};
use trickle_flow::{Signal, ThrottleEvents};

use crate::error::{PipeError, PipeResult};

/// Copies every forwarded chunk from `events` into `writer`.
///
/// The throttle is paused for the duration of every write and resumed once
/// the writer has accepted the chunk, so a slow writer holds the producer
/// back instead of letting chunks pile up in `events`. `forward` owns the
/// consumer side of the throttle: a pause made elsewhere is lifted after the
/// next write.
///
/// On end of stream the writer is flushed and shut down. Returns the number
/// of bytes written.
///
/// # Errors
///
/// - `PipeError::Io` if writing fails. The throttle is destroyed so the
///   producer stops.
/// - `PipeError::Aborted` if the throttle is destroyed before it ends.
pub async fn forward<W>(events: &mut ThrottleEvents, mut writer: W) -> PipeResult<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes_written = 0u64;

    while let Some(signal) = events.recv().await {
        match signal {
            Signal::Data(chunk) => {
                // Hold emissions back while the writer is busy so the
                // channel cannot outgrow the sink.
                let throttle = events.throttle().clone();
                throttle.pause();
                let written = writer.write_all(&chunk).await;
                throttle.resume();
                if let Err(e) = written {
                    throttle.destroy();
                    return Err(e.into());
                }
                bytes_written += chunk.len() as u64;
                trace!(bytes = chunk.len(), bytes_written, "Forwarded chunk");
            }
            Signal::Drain => {}
            Signal::End => {
                writer.flush().await?;
                writer.shutdown().await?;
                debug!(bytes_written, "Forward finished");
                return Ok(bytes_written);
            }
        }
    }

    writer.flush().await?;
    Err(PipeError::Aborted { bytes_written })
}
