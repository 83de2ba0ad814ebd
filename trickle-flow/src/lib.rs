//! Rate-limited byte streams for Trickle.
//!
//! This crate provides a [`Throttle`]: a single-stream flow controller that
//! forwards byte chunks from a producer to a consumer without exceeding a
//! configured long-run average rate, while honoring the consumer's own
//! pause/resume backpressure.
//!
//! # Architecture
//!
//! ```text
//!              write()                          Data / End / Drain
//!  producer ──────────▶ ┌──────────────────────┐ ────────────────────▶ consumer
//!                       │       Throttle        │
//!   ◀── WriteOutcome ── │  ┌────────────────┐   │ ◀── pause()/resume() ──
//!                       │  │ EmissionBudget │   │
//!                       │  └────────────────┘   │
//!                       │  pending: VecDeque    │
//!                       │  timer: one slot      │
//!                       └──────────────────────┘
//! ```
//!
//! # Budget
//!
//! The budget is cumulative from the first emission attempt:
//! `allowed = round(rate * elapsed)`. A chunk that would push the lifetime
//! total past the allowance is split; the prefix is forwarded, the rest is
//! queued, and the throttle sleeps for `min(overflow / rate, max_wait)`.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use tokio::task::LocalSet;
//! use trickle_flow::{Signal, Throttle, ThrottleConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! LocalSet::new()
//!     .run_until(async {
//!         let config = ThrottleConfig::new(64 * 1024).with_max_wait(Duration::from_millis(50));
//!         let throttle = Throttle::new(config);
//!         let mut events = throttle.events();
//!
//!         throttle.write(Bytes::from_static(b"hello"));
//!         throttle.end();
//!
//!         while let Some(signal) = events.recv().await {
//!             if signal == Signal::End {
//!                 break;
//!             }
//!         }
//!     })
//!     .await;
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod budget;
pub mod config;
pub mod error;
pub mod events;
pub mod signal;
pub mod throttle;

// Re-export main types for convenience.
pub use budget::{Admission, EmissionBudget};
pub use config::{limits, ThrottleConfig};
pub use error::{FlowError, FlowResult};
pub use events::ThrottleEvents;
pub use signal::{ByteSink, ListenerId, Signal, SignalSource};
pub use throttle::{create_throttle, Throttle, ThrottleStats, WeakThrottle, WriteOutcome};
