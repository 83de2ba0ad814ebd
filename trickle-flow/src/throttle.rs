//! The throttle state machine.
//!
//! A [`Throttle`] forwards chunks to its listeners no faster than its
//! [`EmissionBudget`] allows. Chunks that do not fit are held in a FIFO
//! pending queue while the throttle pauses itself and arms a wake-up timer.
//! The consumer may pause and resume the same throttle for its own
//! backpressure; both mechanisms share one paused flag and one timer slot.
//!
//! # Execution model
//!
//! The throttle is single-threaded (`!Send`). Wake-up timers and deferred
//! drain passes are spawned with [`tokio::task::spawn_local`], so every
//! operation that can pause or resume must run inside a
//! [`tokio::task::LocalSet`].
//!
//! Every state transition is applied before any listener is called, and no
//! borrow is held while listeners run. Listeners may call back into the
//! throttle freely.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::budget::{Admission, EmissionBudget};
use crate::config::ThrottleConfig;
use crate::error::FlowResult;
use crate::signal::{ByteSink, Listeners, ListenerId, NotifyKind, SignalSource};

/// Result of offering a chunk to a throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The whole chunk was forwarded. The producer may keep writing.
    Accepted,
    /// Some or all of the chunk was queued. The producer should stop writing
    /// until the next drain signal.
    Backpressure,
    /// The throttle has ended; the chunk was discarded.
    Dropped,
}

impl WriteOutcome {
    /// Returns true if the producer may write again immediately.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Point-in-time view of a throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleStats {
    /// Bytes forwarded so far.
    pub total_bytes_emitted: u64,
    /// Bytes waiting in the pending queue.
    pub pending_bytes: u64,
    /// Chunks waiting in the pending queue.
    pub pending_chunks: usize,
    /// Whether the throttle is paused.
    pub paused: bool,
    /// Whether the throttle has ended or been destroyed.
    pub ended: bool,
    /// Whether a wake-up timer is outstanding.
    pub timer_armed: bool,
}

/// Mutable throttle state. Only touched through `Shared::state`.
struct ThrottleState {
    budget: EmissionBudget,
    paused: bool,
    ended: bool,
    pending: VecDeque<Bytes>,
    pending_bytes: u64,
    /// The single wake-up slot. Written only by `arm_timer` and `cancel_timer`.
    timer: Option<JoinHandle<()>>,
    drain_scheduled: bool,
}

impl ThrottleState {
    fn new(config: &ThrottleConfig) -> Self {
        Self {
            budget: EmissionBudget::new(config),
            paused: false,
            ended: false,
            pending: VecDeque::new(),
            pending_bytes: 0,
            timer: None,
            drain_scheduled: false,
        }
    }

    fn push_front(&mut self, chunk: Bytes) {
        self.pending_bytes += chunk.len() as u64;
        self.pending.push_front(chunk);
    }

    fn push_back(&mut self, chunk: Bytes) {
        self.pending_bytes += chunk.len() as u64;
        self.pending.push_back(chunk);
    }

    fn pop_front(&mut self) -> Option<Bytes> {
        let chunk = self.pending.pop_front()?;
        self.pending_bytes -= chunk.len() as u64;
        Some(chunk)
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            total_bytes_emitted: self.budget.total_bytes_emitted(),
            pending_bytes: self.pending_bytes,
            pending_chunks: self.pending.len(),
            paused: self.paused,
            ended: self.ended,
            timer_armed: self.timer.is_some(),
        }
    }
}

impl Drop for ThrottleState {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

struct Shared {
    config: ThrottleConfig,
    state: RefCell<ThrottleState>,
    listeners: RefCell<Listeners>,
    /// Woken after every drain pass and on end/destroy.
    progress: Notify,
}

/// What one emission attempt produced. Listeners are called after the
/// state borrow is released.
struct Step {
    data: Option<Bytes>,
    held_back: bool,
}

/// A rate-limited byte stream.
///
/// Cloning yields another handle to the same stream.
#[derive(Clone)]
pub struct Throttle {
    shared: Rc<Shared>,
}

/// A non-owning handle to a [`Throttle`], for listeners that need to call
/// back into the stream without keeping it alive.
#[derive(Clone)]
pub struct WeakThrottle {
    shared: Weak<Shared>,
}

impl WeakThrottle {
    /// Returns the throttle if any strong handle is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Throttle> {
        self.shared.upgrade().map(|shared| Throttle { shared })
    }
}

impl fmt::Debug for WeakThrottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakThrottle").finish_non_exhaustive()
    }
}

/// Creates a throttle for `rate_bytes_per_sec` whose sleeps never exceed
/// `max_wait`.
///
/// The configuration is not validated; see [`Throttle::new`].
#[must_use]
pub fn create_throttle(rate_bytes_per_sec: u64, max_wait: Duration) -> Throttle {
    Throttle::new(ThrottleConfig::new(rate_bytes_per_sec).with_max_wait(max_wait))
}

impl Throttle {
    /// Creates a throttle.
    ///
    /// The configuration is taken as-is. A zero rate is degenerate: nothing
    /// is ever forwarded and the throttle wakes every `max_wait` to find its
    /// budget still empty. Use [`Throttle::try_new`] to reject such configs.
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            shared: Rc::new(Shared {
                config,
                state: RefCell::new(ThrottleState::new(&config)),
                listeners: RefCell::new(Listeners::default()),
                progress: Notify::new(),
            }),
        }
    }

    /// Creates a throttle after validating the configuration.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` if the configuration is invalid.
    pub fn try_new(config: ThrottleConfig) -> FlowResult<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ThrottleConfig {
        &self.shared.config
    }

    /// Returns a non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakThrottle {
        WeakThrottle {
            shared: Rc::downgrade(&self.shared),
        }
    }

    /// Returns a snapshot of the throttle's counters and flags.
    #[must_use]
    pub fn stats(&self) -> ThrottleStats {
        self.shared.state.borrow().stats()
    }

    /// Returns true if the throttle is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.state.borrow().paused
    }

    /// Returns true once the throttle has ended or been destroyed.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.shared.state.borrow().ended
    }

    /// Offers a chunk.
    ///
    /// When the throttle is running and nothing is queued, as much of the
    /// chunk as the budget allows is forwarded immediately and any remainder
    /// goes to the front of the queue. Otherwise the whole chunk goes to the
    /// back of the queue. Writes after end are dropped silently, and an empty
    /// chunk has no effect.
    ///
    /// `Backpressure` can be returned while the throttle is not paused: after
    /// `resume` the queue is emptied by a deferred pass, and writes made
    /// before that pass runs are queued behind the older data.
    ///
    /// # Panics
    ///
    /// Panics if the budget is exhausted outside a `LocalSet`, because the
    /// wake-up timer cannot be spawned.
    pub fn write(&self, chunk: Bytes) -> WriteOutcome {
        let step = {
            let mut state = self.shared.state.borrow_mut();
            if state.ended {
                trace!(bytes = chunk.len(), "Write after end dropped");
                return WriteOutcome::Dropped;
            }
            if chunk.is_empty() {
                return WriteOutcome::Accepted;
            }
            // A scheduled drain pass may still be waiting to run; new data
            // must not overtake it.
            if state.paused || !state.pending.is_empty() {
                state.push_back(chunk);
                return WriteOutcome::Backpressure;
            }
            self.admit(&mut state, chunk)
        };

        if let Some(data) = step.data {
            self.dispatch_data(&data);
        }
        if step.held_back {
            WriteOutcome::Backpressure
        } else {
            WriteOutcome::Accepted
        }
    }

    /// Ends the stream.
    ///
    /// Only the first call has an effect: the wake-up timer is cancelled, the
    /// stream is marked ended, and the end signal is emitted. Queued data is
    /// not forwarded.
    pub fn end(&self) {
        {
            let mut state = self.shared.state.borrow_mut();
            if state.ended {
                return;
            }
            state.ended = true;
            state.cancel_timer();
            debug!(
                total_bytes = state.budget.total_bytes_emitted(),
                pending_bytes = state.pending_bytes,
                "Throttle ended"
            );
        }
        self.shared.progress.notify_waiters();
        self.dispatch_notify(NotifyKind::End);
    }

    /// Pauses forwarding and cancels any outstanding wake-up.
    pub fn pause(&self) {
        let mut state = self.shared.state.borrow_mut();
        state.paused = true;
        state.cancel_timer();
    }

    /// Resumes forwarding.
    ///
    /// Queued data is drained on a later scheduler tick, never inside this
    /// call. Has no effect once the stream has ended.
    ///
    /// # Panics
    ///
    /// Panics outside a `LocalSet` when data is queued.
    pub fn resume(&self) {
        let mut state = self.shared.state.borrow_mut();
        if state.ended {
            return;
        }
        state.paused = false;
        state.cancel_timer();
        self.schedule_drain(&mut state);
    }

    /// Tears the stream down: marks it ended and cancels the wake-up without
    /// flushing queued data or emitting the end signal.
    pub fn destroy(&self) {
        {
            let mut state = self.shared.state.borrow_mut();
            if !state.ended {
                debug!(
                    total_bytes = state.budget.total_bytes_emitted(),
                    pending_bytes = state.pending_bytes,
                    "Throttle destroyed"
                );
            }
            state.ended = true;
            state.cancel_timer();
        }
        self.shared.progress.notify_waiters();
    }

    /// Waits until a write would not queue behind older data: the pending
    /// queue is empty or the stream has ended.
    pub async fn writable(&self) {
        loop {
            let notified = self.shared.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.shared.state.borrow();
                if state.ended || state.pending.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Waits until the stream has ended or been destroyed.
    pub async fn closed(&self) {
        loop {
            let notified = self.shared.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_ended() {
                return;
            }
            notified.await;
        }
    }

    /// Charges `chunk` against the budget. A held-back remainder is queued at
    /// the front and the throttle pauses until the wake-up fires.
    fn admit(&self, state: &mut ThrottleState, mut chunk: Bytes) -> Step {
        match state.budget.admit(chunk.len(), Instant::now()) {
            Admission::Whole => {
                trace!(bytes = chunk.len(), "Forwarding chunk");
                Step {
                    data: Some(chunk),
                    held_back: false,
                }
            }
            Admission::Partial { consumed, wait } => {
                let prefix = chunk.split_to(consumed);
                #[allow(clippy::cast_possible_truncation)] // Clamped to max_wait.
                let wait_us = wait.as_micros() as u64;
                debug!(
                    forwarded = prefix.len(),
                    held_back = chunk.len(),
                    wait_us,
                    "Rate limit reached, pausing"
                );
                state.push_front(chunk);
                state.paused = true;
                self.arm_timer(state, wait);
                Step {
                    data: (!prefix.is_empty()).then_some(prefix),
                    held_back: true,
                }
            }
        }
    }

    /// Replaces the wake-up slot with a new timer, cancelling any old one.
    fn arm_timer(&self, state: &mut ThrottleState, wait: Duration) {
        state.cancel_timer();
        let weak = Rc::downgrade(&self.shared);
        state.timer = Some(tokio::task::spawn_local(async move {
            tokio::time::sleep(wait).await;
            if let Some(shared) = weak.upgrade() {
                Throttle { shared }.on_timer();
            }
        }));
    }

    fn on_timer(&self) {
        // The firing task owns this slot; detach it rather than abort itself.
        drop(self.shared.state.borrow_mut().timer.take());
        trace!("Wake-up timer fired");
        self.resume();
    }

    fn schedule_drain(&self, state: &mut ThrottleState) {
        if state.pending.is_empty() || state.drain_scheduled {
            return;
        }
        state.drain_scheduled = true;
        let throttle = self.clone();
        tokio::task::spawn_local(async move {
            throttle.drain_pending();
        });
    }

    /// Forwards queued chunks until the queue empties or the throttle pauses.
    fn drain_pending(&self) {
        let had_pending = {
            let mut state = self.shared.state.borrow_mut();
            state.drain_scheduled = false;
            !state.pending.is_empty()
        };
        if !had_pending {
            return;
        }

        loop {
            let step = {
                let mut state = self.shared.state.borrow_mut();
                if state.ended || state.paused {
                    break;
                }
                let Some(chunk) = state.pop_front() else {
                    break;
                };
                self.admit(&mut state, chunk)
            };
            if let Some(data) = step.data {
                self.dispatch_data(&data);
            }
        }

        let drained = {
            let state = self.shared.state.borrow();
            trace!(
                pending_bytes = state.pending_bytes,
                paused = state.paused,
                "Drain pass finished"
            );
            !state.paused && !state.ended && state.pending.is_empty()
        };
        self.shared.progress.notify_waiters();
        if drained {
            self.dispatch_notify(NotifyKind::Drain);
        }
    }

    fn dispatch_data(&self, chunk: &Bytes) {
        let listeners = self.shared.listeners.borrow().data_snapshot();
        for listener in listeners {
            listener(chunk);
        }
    }

    fn dispatch_notify(&self, kind: NotifyKind) {
        let listeners = self.shared.listeners.borrow().notify_snapshot(kind);
        for listener in listeners {
            listener();
        }
    }

    /// Registers a listener for forwarded chunks.
    pub fn on_data<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Bytes) + 'static,
    {
        self.shared.listeners.borrow_mut().add_data(Rc::new(listener))
    }

    /// Registers a listener for end of stream.
    pub fn on_end<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + 'static,
    {
        self.shared
            .listeners
            .borrow_mut()
            .add_notify(NotifyKind::End, Rc::new(listener))
    }

    /// Registers a listener for drain notifications.
    pub fn on_drain<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + 'static,
    {
        self.shared
            .listeners
            .borrow_mut()
            .add_notify(NotifyKind::Drain, Rc::new(listener))
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.borrow_mut().remove(id)
    }
}

impl ByteSink for Throttle {
    fn write(&self, chunk: Bytes) -> WriteOutcome {
        Self::write(self, chunk)
    }

    fn end(&self) {
        Self::end(self);
    }

    fn destroy(&self) {
        Self::destroy(self);
    }
}

impl SignalSource for Throttle {
    fn on_data<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Bytes) + 'static,
    {
        Self::on_data(self, listener)
    }

    fn on_end<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + 'static,
    {
        Self::on_end(self, listener)
    }

    fn on_drain<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + 'static,
    {
        Self::on_drain(self, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        Self::remove_listener(self, id)
    }
}

impl fmt::Debug for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .field("listeners", &*self.shared.listeners.borrow())
            .finish()
    }
}
