//! Channel bridge from throttle listeners to async consumers.

use std::fmt;

use tokio::sync::mpsc;

use crate::signal::{ListenerId, Signal};
use crate::throttle::Throttle;

/// Receives a throttle's signals through an unbounded channel.
///
/// Created by [`Throttle::events`]. The underlying listeners are removed
/// when this value is dropped.
pub struct ThrottleEvents {
    throttle: Throttle,
    rx: mpsc::UnboundedReceiver<Signal>,
    listeners: [ListenerId; 3],
}

impl Throttle {
    /// Subscribes to every signal this throttle emits from now on.
    #[must_use]
    pub fn events(&self) -> ThrottleEvents {
        let (tx, rx) = mpsc::unbounded_channel();

        let data_tx = tx.clone();
        let data = self.on_data(move |chunk| {
            // A closed receiver only means nobody is listening any more.
            let _ = data_tx.send(Signal::Data(chunk.clone()));
        });
        let end_tx = tx.clone();
        let end = self.on_end(move || {
            let _ = end_tx.send(Signal::End);
        });
        let drain = self.on_drain(move || {
            let _ = tx.send(Signal::Drain);
        });

        ThrottleEvents {
            throttle: self.clone(),
            rx,
            listeners: [data, end, drain],
        }
    }
}

impl ThrottleEvents {
    /// Returns the throttle these events come from.
    #[must_use]
    pub const fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    /// Receives the next signal.
    ///
    /// Returns `None` once the throttle has ended or been destroyed and
    /// every signal emitted before that has been received. After an end the
    /// last signal returned is [`Signal::End`]; after a destroy the stream
    /// simply stops.
    pub async fn recv(&mut self) -> Option<Signal> {
        tokio::select! {
            biased;
            signal = self.rx.recv() => signal,
            () = self.throttle.closed() => self.rx.try_recv().ok(),
        }
    }

    /// Receives a signal if one is already queued.
    pub fn try_recv(&mut self) -> Option<Signal> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ThrottleEvents {
    fn drop(&mut self) {
        for id in self.listeners {
            self.throttle.remove_listener(id);
        }
    }
}

impl fmt::Debug for ThrottleEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleEvents")
            .field("throttle", &self.throttle)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}
