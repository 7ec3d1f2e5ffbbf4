// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Isolation contexts: independent dispatch loops and their relay queues.
//!
//! Each [`IsolationContext`] owns a FIFO of relayed focus events. A sender on
//! another context posts an event and receives a [`RelayTicket`]; the
//! context's dispatch loop pops the event, hands it to the installed
//! [`RelaySink`] (normally the context's
//! [`FocusManager`](crate::manager::FocusManager)), and settles the ticket.
//!
//! Disposal is the only cancellation signal. Disposing a context settles every
//! queued ticket as [`TicketState::Abandoned`], wakes its loop, and makes any
//! later post fail.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use understory_focus_dispatch::context::IsolationContext;
//! use understory_focus_dispatch::types::ContextId;
//!
//! let ctx = IsolationContext::new(ContextId(1));
//! let worker = {
//!     let ctx = Arc::clone(&ctx);
//!     std::thread::spawn(move || ctx.run())
//! };
//! ctx.dispose();
//! worker.join().unwrap();
//! assert!(ctx.is_disposed());
//! ```

use core::fmt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread::{self, ThreadId};

use hashbrown::HashMap;
use web_time::{Duration, Instant};

use crate::config::DEFAULT_PUMP_TICK_MS;
use crate::error::RelayError;
use crate::types::{ContextId, FocusEvent};

/// Receiver of relayed events on a context's dispatch loop.
pub trait RelaySink: Send + Sync {
    /// Dispatch an event that another context relayed here.
    ///
    /// Returns whether the event was considered handled.
    fn dispatch_relayed(&self, event: FocusEvent) -> bool;
}

/// Progress of a relayed event.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TicketState {
    /// Queued or being dispatched.
    Pending,
    /// The target loop dispatched the event.
    Dispatched,
    /// The target context went away before dispatching the event.
    Abandoned,
}

#[derive(Debug)]
struct TicketInner {
    state: Mutex<TicketState>,
    settled: Condvar,
}

/// Completion handle of one relayed event.
///
/// Cloning shares the same completion state.
#[derive(Clone, Debug)]
pub struct RelayTicket {
    inner: Arc<TicketInner>,
}

impl RelayTicket {
    fn new() -> Self {
        Self {
            inner: Arc::new(TicketInner {
                state: Mutex::new(TicketState::Pending),
                settled: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TicketState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn state(&self) -> TicketState {
        *self.lock()
    }

    /// Returns `true` once the ticket left [`TicketState::Pending`].
    pub fn is_settled(&self) -> bool {
        self.state() != TicketState::Pending
    }

    /// Move from pending to `to` and wake waiters. Settling twice is a no-op.
    fn settle(&self, to: TicketState) -> bool {
        let mut state = self.lock();
        if *state != TicketState::Pending {
            return false;
        }
        *state = to;
        self.inner.settled.notify_all();
        true
    }

    /// Block until the ticket settles or `duration` elapses.
    pub fn wait_timeout(&self, duration: Duration) -> TicketState {
        let start = Instant::now();
        let mut state = self.lock();
        while *state == TicketState::Pending {
            let elapsed = start.elapsed();
            if elapsed >= duration {
                break;
            }
            let (guard, _) = self
                .inner
                .settled
                .wait_timeout(state, duration - elapsed)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        *state
    }
}

#[derive(Debug)]
struct Posted {
    event: FocusEvent,
    ticket: RelayTicket,
}

/// One independent dispatch loop.
pub struct IsolationContext {
    id: ContextId,
    queue: Mutex<VecDeque<Posted>>,
    ready: Condvar,
    disposed: AtomicBool,
    dispatch_thread: Mutex<Option<ThreadId>>,
    sink: RwLock<Option<Weak<dyn RelaySink>>>,
}

impl fmt::Debug for IsolationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationContext")
            .field("id", &self.id)
            .field("pending", &self.pending())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl IsolationContext {
    /// Fresh context with an empty queue and no sink.
    pub fn new(id: ContextId) -> Arc<Self> {
        Arc::new(Self {
            id,
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            disposed: AtomicBool::new(false),
            dispatch_thread: Mutex::new(None),
            sink: RwLock::new(None),
        })
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Posted>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identifier of this context.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Returns `true` once [`IsolationContext::dispose`] ran.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Tear the context down.
    ///
    /// Queued relays are abandoned and the dispatch loop wakes and exits.
    /// Returns `false` if the context was already disposed.
    pub fn dispose(&self) -> bool {
        let abandoned: Vec<Posted> = {
            let mut queue = self.queue();
            if self.disposed.swap(true, Ordering::AcqRel) {
                return false;
            }
            queue.drain(..).collect()
        };
        tracing::debug!(context = %self.id, abandoned = abandoned.len(), "context disposed");
        for posted in abandoned {
            posted.ticket.settle(TicketState::Abandoned);
        }
        self.ready.notify_all();
        true
    }

    /// Install the receiver of relayed events.
    pub fn install_sink(&self, sink: Weak<dyn RelaySink>) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn sink(&self) -> Option<Arc<dyn RelaySink>> {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Declare the calling thread to be this context's dispatch thread.
    pub fn bind_current_thread(&self) {
        *self
            .dispatch_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(thread::current().id());
    }

    /// Returns `true` when called on this context's dispatch thread.
    pub fn is_dispatch_thread(&self) -> bool {
        *self
            .dispatch_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            == Some(thread::current().id())
    }

    /// Queue `event` for this context's loop.
    pub(crate) fn post(&self, event: FocusEvent) -> Result<RelayTicket, RelayError> {
        let ticket = RelayTicket::new();
        {
            let mut queue = self.queue();
            if self.is_disposed() {
                return Err(RelayError::Disposed(self.id));
            }
            queue.push_back(Posted {
                event,
                ticket: ticket.clone(),
            });
        }
        self.ready.notify_all();
        Ok(ticket)
    }

    /// Number of queued relays.
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Dispatch one queued relay, if any. Returns `false` when the queue was
    /// empty.
    pub fn pump_one(&self) -> bool {
        let Some(Posted { event, ticket }) = self.queue().pop_front() else {
            return false;
        };
        match self.sink() {
            Some(sink) => {
                sink.dispatch_relayed(event);
                ticket.settle(TicketState::Dispatched);
            }
            None => {
                tracing::debug!(context = %self.id, "relay dropped: no sink installed");
                ticket.settle(TicketState::Abandoned);
            }
        }
        true
    }

    /// Dispatch queued relays until `done` holds or the context is disposed.
    ///
    /// Waits at most `tick` for new work between checks of `done`. Returns the
    /// final value of `done`.
    pub fn pump_until(&self, mut done: impl FnMut() -> bool, tick: Duration) -> bool {
        loop {
            if done() {
                return true;
            }
            if self.is_disposed() {
                return done();
            }
            if !self.pump_one() {
                let queue = self.queue();
                let _ = self
                    .ready
                    .wait_timeout_while(queue, tick, |q| q.is_empty() && !self.is_disposed())
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    /// Run the dispatch loop on the calling thread until disposed.
    pub fn run(&self) {
        self.bind_current_thread();
        tracing::trace!(context = %self.id, "dispatch loop started");
        while !self.is_disposed() {
            if self.pump_one() {
                continue;
            }
            let queue = self.queue();
            let _ = self
                .ready
                .wait_timeout_while(
                    queue,
                    Duration::from_millis(DEFAULT_PUMP_TICK_MS * 10),
                    |q| q.is_empty() && !self.is_disposed(),
                )
                .unwrap_or_else(PoisonError::into_inner);
        }
        tracing::trace!(context = %self.id, "dispatch loop exited");
    }
}

/// Registry of live isolation contexts.
#[derive(Debug, Default)]
pub struct ContextTable {
    contexts: RwLock<HashMap<ContextId, Arc<IsolationContext>>>,
}

impl ContextTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context `id`, created if absent.
    pub fn create(&self, id: ContextId) -> Arc<IsolationContext> {
        let mut contexts = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(contexts.entry(id).or_insert_with(|| IsolationContext::new(id)))
    }

    /// Register an existing context, replacing any context with the same id.
    pub fn insert(&self, context: Arc<IsolationContext>) -> Option<Arc<IsolationContext>> {
        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(context.id(), context)
    }

    /// Context `id`, if registered.
    pub fn get(&self, id: ContextId) -> Option<Arc<IsolationContext>> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Unregister context `id`. The context is not disposed.
    pub fn remove(&self, id: ContextId) -> Option<Arc<IsolationContext>> {
        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ElementId, SurfaceEvent};
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    impl RelaySink for Counter {
        fn dispatch_relayed(&self, _event: FocusEvent) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn event() -> FocusEvent {
        FocusEvent::SurfaceActivated(SurfaceEvent::new(ElementId::from_raw(0, 1), None))
    }

    #[test]
    fn pumped_relay_settles_dispatched() {
        let ctx = IsolationContext::new(ContextId(1));
        let sink = Arc::new(Counter(AtomicUsize::new(0)));
        let weak: Weak<dyn RelaySink> = Arc::downgrade(&sink) as Weak<dyn RelaySink>;
        ctx.install_sink(weak);

        let ticket = ctx.post(event()).unwrap();
        assert_eq!(ticket.state(), TicketState::Pending);
        assert!(ctx.pump_one());
        assert!(!ctx.pump_one());
        assert_eq!(ticket.state(), TicketState::Dispatched);
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn relay_without_sink_is_abandoned() {
        let ctx = IsolationContext::new(ContextId(1));
        let ticket = ctx.post(event()).unwrap();
        ctx.pump_one();
        assert_eq!(ticket.state(), TicketState::Abandoned);
    }

    #[test]
    fn dispose_abandons_queue_and_refuses_posts() {
        let ctx = IsolationContext::new(ContextId(2));
        let ticket = ctx.post(event()).unwrap();
        assert!(ctx.dispose());
        assert!(!ctx.dispose());
        assert_eq!(ticket.wait_timeout(Duration::from_secs(1)), TicketState::Abandoned);
        assert_eq!(ctx.post(event()).unwrap_err(), RelayError::Disposed(ContextId(2)));
        assert_eq!(ctx.pending(), 0);
    }

    #[test]
    fn wait_times_out_while_pending() {
        let ctx = IsolationContext::new(ContextId(3));
        let ticket = ctx.post(event()).unwrap();
        assert_eq!(ticket.wait_timeout(Duration::from_millis(10)), TicketState::Pending);
    }

    #[test]
    fn loop_thread_dispatches_posts() {
        let ctx = IsolationContext::new(ContextId(4));
        let sink = Arc::new(Counter(AtomicUsize::new(0)));
        let weak: Weak<dyn RelaySink> = Arc::downgrade(&sink) as Weak<dyn RelaySink>;
        ctx.install_sink(weak);
        let worker = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || ctx.run())
        };

        let ticket = ctx.post(event()).unwrap();
        assert_eq!(ticket.wait_timeout(Duration::from_secs(5)), TicketState::Dispatched);
        ctx.dispose();
        worker.join().unwrap();
        assert!(!ctx.is_dispatch_thread());
    }

    #[test]
    fn table_creates_once() {
        let table = ContextTable::new();
        let a = table.create(ContextId(7));
        let b = table.create(ContextId(7));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(table.remove(ContextId(7)).is_some());
        assert!(table.get(ContextId(7)).is_none());
    }

    #[test]
    fn table_insert_replaces_same_id() {
        let table = ContextTable::new();
        let first = table.create(ContextId(3));
        let second = IsolationContext::new(ContextId(3));
        let replaced = table.insert(second.clone()).unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(Arc::ptr_eq(&table.get(ContextId(3)).unwrap(), &second));
        assert!(table.insert(IsolationContext::new(ContextId(4))).is_none());
    }
}
