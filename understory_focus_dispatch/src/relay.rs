// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cross-context dispatcher.
//!
//! A synthesized focus event goes to its target's isolation context. When that
//! is the sender's own context the event is dispatched in place, one
//! [`RelayDepth`](crate::types::RelayDepth) deeper. Otherwise it is posted to
//! the target context and the sender waits for the ticket to settle, choosing
//! a [`WaitStrategy`] that cannot deadlock its own loop.

use web_time::{Duration, Instant};

use crate::config::RelayConfig;
use crate::context::{ContextTable, IsolationContext, RelayTicket, TicketState};
use crate::error::RelayError;
use crate::model::ElementModel;
use crate::types::FocusEvent;

/// How a sender blocks on a cross-context relay.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum WaitStrategy {
    /// The sender is its context's dispatch thread: keep pumping that loop
    /// until the ticket settles. No timeout.
    NestedPump,
    /// Every context shares one native thread: poll briefly within a fixed
    /// budget, then give up.
    BoundedPoll,
    /// Park on the ticket, re-checking disposal every poll interval, up to the
    /// configured overall timeout.
    Blocking,
}

impl WaitStrategy {
    /// Strategy for a sender running in `caller`.
    pub fn for_caller(caller: &IsolationContext, config: &RelayConfig) -> Self {
        if caller.is_dispatch_thread() {
            Self::NestedPump
        } else if config.shared_dispatch_thread {
            Self::BoundedPoll
        } else {
            Self::Blocking
        }
    }
}

/// Deliver `event` to its target's context.
///
/// `local` runs the event in place when the target is in `caller`'s context,
/// or when the event has no target.
pub(crate) fn send<M: ElementModel + ?Sized>(
    caller: &IsolationContext,
    contexts: &ContextTable,
    model: &M,
    event: FocusEvent,
    config: &RelayConfig,
    local: impl FnOnce(FocusEvent),
) -> Result<(), RelayError> {
    let Some(target) = event.target() else {
        local(event);
        return Ok(());
    };
    let target_ctx = model
        .context_of(target)
        .ok_or(RelayError::Detached(target))?;
    if target_ctx == caller.id() {
        local(event);
        return Ok(());
    }
    let context = contexts
        .get(target_ctx)
        .ok_or(RelayError::UnknownContext(target_ctx))?;
    if context.is_disposed() {
        return Err(RelayError::Disposed(target_ctx));
    }
    let ticket = context.post(event)?;
    let strategy = WaitStrategy::for_caller(caller, config);
    tracing::trace!(from = %caller.id(), to = %target_ctx, ?strategy, "relay posted");
    let state = match strategy {
        WaitStrategy::NestedPump => {
            caller.pump_until(
                || ticket.is_settled() || context.is_disposed(),
                config.pump_tick,
            );
            ticket.state()
        }
        WaitStrategy::BoundedPoll => poll(
            &ticket,
            &context,
            config.shared_thread_poll,
            Some(config.shared_thread_budget),
        ),
        WaitStrategy::Blocking => poll(&ticket, &context, config.poll_interval, config.timeout),
    };
    match state {
        TicketState::Dispatched => Ok(()),
        TicketState::Abandoned => Err(RelayError::Abandoned(target_ctx)),
        TicketState::Pending if context.is_disposed() => Err(RelayError::Disposed(target_ctx)),
        TicketState::Pending => Err(RelayError::TimedOut(target_ctx)),
    }
}

/// Wait in `interval` slices until the ticket settles, the target is disposed,
/// or `budget` runs out.
///
/// A budget too large to add to the current instant is treated as none.
fn poll(
    ticket: &RelayTicket,
    target: &IsolationContext,
    interval: Duration,
    budget: Option<Duration>,
) -> TicketState {
    let deadline = budget.and_then(|b| Instant::now().checked_add(b));
    loop {
        let slice = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return ticket.state();
                }
                interval.min(deadline - now)
            }
            None => interval,
        };
        let state = ticket.wait_timeout(slice);
        if state != TicketState::Pending || target.is_disposed() {
            return state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ElementFlags, ElementTree, SurfaceKind};
    use crate::types::{ContextId, SurfaceEvent};

    fn gained(surface: crate::types::ElementId) -> FocusEvent {
        FocusEvent::SurfaceGainedFocus(SurfaceEvent::new(surface, None))
    }

    #[test]
    fn same_context_runs_in_place() {
        let contexts = ContextTable::new();
        let a = contexts.create(ContextId(0));
        let tree = ElementTree::new();
        let s = tree.insert_surface(ContextId(0), None, SurfaceKind::Root, ElementFlags::default());

        let mut ran = None;
        send(&a, &contexts, &tree, gained(s), &RelayConfig::default(), |e| ran = Some(e)).unwrap();
        assert_eq!(ran, Some(gained(s)));
    }

    #[test]
    fn disposed_target_fails_fast() {
        let contexts = ContextTable::new();
        let a = contexts.create(ContextId(0));
        let b = contexts.create(ContextId(1));
        let tree = ElementTree::new();
        let s = tree.insert_surface(ContextId(1), None, SurfaceKind::Root, ElementFlags::default());
        b.dispose();

        let start = Instant::now();
        let result = send(&a, &contexts, &tree, gained(s), &RelayConfig::default(), |_| {
            panic!("must not dispatch locally")
        });
        assert_eq!(result, Err(RelayError::Disposed(ContextId(1))));
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(b.pending(), 0);
    }

    #[test]
    fn unregistered_and_detached_targets_fail() {
        let contexts = ContextTable::new();
        let a = contexts.create(ContextId(0));
        let tree = ElementTree::new();
        let s = tree.insert_surface(ContextId(9), None, SurfaceKind::Root, ElementFlags::default());
        let config = RelayConfig::default();

        assert_eq!(
            send(&a, &contexts, &tree, gained(s), &config, |_| {}),
            Err(RelayError::UnknownContext(ContextId(9)))
        );
        tree.remove(s);
        assert_eq!(
            send(&a, &contexts, &tree, gained(s), &config, |_| {}),
            Err(RelayError::Detached(s))
        );
    }

    #[test]
    fn unpumped_target_times_out() {
        let contexts = ContextTable::new();
        let a = contexts.create(ContextId(0));
        let _b = contexts.create(ContextId(1));
        let tree = ElementTree::new();
        let s = tree.insert_surface(ContextId(1), None, SurfaceKind::Root, ElementFlags::default());
        let config = RelayConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_timeout(Some(Duration::from_millis(30)));

        assert_eq!(
            send(&a, &contexts, &tree, gained(s), &config, |_| {}),
            Err(RelayError::TimedOut(ContextId(1)))
        );
    }

    #[test]
    fn unbounded_timeout_waits_for_disposal() {
        let contexts = ContextTable::new();
        let a = contexts.create(ContextId(0));
        let b = contexts.create(ContextId(1));
        let tree = ElementTree::new();
        let s = tree.insert_surface(ContextId(1), None, SurfaceKind::Root, ElementFlags::default());
        // Not validated: the deadline would overflow `Instant`.
        let config = RelayConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_timeout(Some(Duration::MAX));

        let disposer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            b.dispose();
        });
        let result = send(&a, &contexts, &tree, gained(s), &config, |_| {});
        disposer.join().unwrap();
        assert!(
            matches!(
                result,
                Err(RelayError::Abandoned(ContextId(1)) | RelayError::Disposed(ContextId(1)))
            ),
            "disposal must end the wait, got {result:?}"
        );
    }

    #[test]
    fn strategy_follows_caller() {
        let a = IsolationContext::new(ContextId(0));
        let config = RelayConfig::default();
        assert_eq!(WaitStrategy::for_caller(&a, &config), WaitStrategy::Blocking);
        let shared = config.clone().with_shared_dispatch_thread(true);
        assert_eq!(WaitStrategy::for_caller(&a, &shared), WaitStrategy::BoundedPoll);
        a.bind_current_thread();
        assert_eq!(WaitStrategy::for_caller(&a, &shared), WaitStrategy::NestedPump);
    }
}
