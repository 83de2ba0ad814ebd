//! Tokio I/O adapters for Trickle throttles.
//!
//! [`pipe`] connects any [`tokio::io::AsyncRead`] to a
//! [`Throttle`](trickle_flow::Throttle) while honoring its backpressure, and
//! [`forward`] copies the throttle's output into a
//! [`tokio::io::AsyncWrite`]. [`throttle_reader`] wires a reader to a new
//! throttle in one call.
//!
//! # Example
//!
//! ```rust
//! use tokio::task::LocalSet;
//! use trickle_flow::ThrottleConfig;
//! use trickle_io::{forward, throttle_reader};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> trickle_io::PipeResult<()> {
//! LocalSet::new()
//!     .run_until(async {
//!         let source: &'static [u8] = b"rate limited bytes";
//!         let mut throttled = throttle_reader(source, ThrottleConfig::new(1024))?;
//!
//!         let mut sink = Vec::new();
//!         let written = forward(&mut throttled.events, &mut sink).await?;
//!         assert_eq!(written, 18);
//!         assert_eq!(sink, source);
//!         Ok::<(), trickle_io::PipeError>(())
//!     })
//!     .await
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod forward;
mod pipe;

pub use error::{PipeError, PipeResult};
pub use forward::forward;
pub use pipe::{pipe, throttle_reader, ThrottledReader, CHUNK_SIZE_DEFAULT};
