// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The dispatch state machine.
//!
//! A [`FocusManager`] arbitrates focus for one isolation context. It receives
//! every [`FocusEvent`] of that context, writes the shared
//! [`FocusRegistry`], synthesizes the events needed to keep surface and
//! element focus consistent (sending them across contexts when needed), runs
//! rollback when a transition does not stick, and gates raw keys through the
//! type-ahead queue.
//!
//! ## Ordering
//!
//! A surface focus transition always delivers the element loss to the current
//! owner before the surface state changes, so input never observes two owners.
//!
//! ## Locking
//!
//! The manager's own state lock is never held across a relay, a focus request,
//! or a listener notification. While it is held the manager may query the
//! model, so models must not call back into the manager from queries.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use understory_focus_dispatch::config::FocusConfig;
//! use understory_focus_dispatch::domain::FocusDomain;
//! use understory_focus_dispatch::manager::FocusManager;
//! use understory_focus_dispatch::tree::{ElementFlags, ElementTree, SurfaceKind};
//! use understory_focus_dispatch::types::{
//!     ContextId, ElementEvent, FocusEvent, KeyEvent, SurfaceEvent, Timestamp,
//! };
//!
//! let tree = Arc::new(ElementTree::new());
//! let frame = tree.insert_surface(ContextId(0), None, SurfaceKind::Root, ElementFlags::default());
//! let field = tree.insert(frame, ElementFlags::default()).unwrap();
//!
//! let config = FocusConfig::default();
//! let manager = FocusManager::new(FocusDomain::new(), ContextId(0), tree.clone(), config);
//! manager.dispatch(FocusEvent::SurfaceGainedFocus(SurfaceEvent::new(frame, None)));
//!
//! // The toolkit asked `field` to take focus at t=100: later keys wait for it.
//! manager.enqueue_key_events(Timestamp(100), Some(field));
//! assert!(manager.dispatch(FocusEvent::Key(KeyEvent::pressed(Timestamp(120), "x"))));
//! assert_eq!(manager.pending_key_events().len(), 1);
//!
//! manager.dispatch(FocusEvent::ElementGainedFocus(ElementEvent::new(field)));
//! assert_eq!(manager.focus_owner(), Some(field));
//! assert!(manager.pending_key_events().is_empty());
//! ```

use core::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use crate::config::FocusConfig;
use crate::context::{IsolationContext, RelaySink};
use crate::domain::FocusDomain;
use crate::error::RegistryError;
use crate::model::{ElementModel, KeyDispatcher, TeardownObserver};
use crate::registry::{FocusRegistry, FocusSnapshot};
use crate::relay;
use crate::rollback::RollbackRequest;
use crate::type_ahead::{Admission, TypeAheadMarker, TypeAheadQueue};
use crate::types::{
    ContextId, ElementEvent, ElementId, FocusCause, FocusEvent, KeyEvent, Outcome, RelayDepth,
    RequestScope, SurfaceEvent, Timestamp, Transition,
};

#[derive(Debug, Default)]
pub(crate) struct ManagerState {
    pub(crate) type_ahead: TypeAheadQueue,
    pub(crate) real_opposite_surface: Option<ElementId>,
    pub(crate) real_opposite_element: Option<ElementId>,
    pub(crate) restore_focus_to: Option<ElementId>,
}

/// Focus arbiter for one isolation context.
pub struct FocusManager<M: ElementModel + 'static> {
    domain: Arc<FocusDomain>,
    context: Arc<IsolationContext>,
    pub(crate) model: Arc<M>,
    config: FocusConfig,
    state: Mutex<ManagerState>,
    key_dispatchers: RwLock<Vec<Arc<dyn KeyDispatcher>>>,
}

impl<M: ElementModel + 'static> fmt::Debug for FocusManager<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FocusManager")
            .field("context", &self.context.id())
            .field("snapshot", &self.global_snapshot())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<M: ElementModel + 'static> FocusManager<M> {
    /// Manager for context `context` of `domain`.
    ///
    /// The context is created in the domain if needed, and the manager is
    /// installed as the receiver of relays posted to it.
    pub fn new(
        domain: Arc<FocusDomain>,
        context: ContextId,
        model: Arc<M>,
        config: FocusConfig,
    ) -> Arc<Self> {
        let context = domain.contexts().create(context);
        let manager = Arc::new(Self {
            domain,
            context,
            model,
            config,
            state: Mutex::new(ManagerState::default()),
            key_dispatchers: RwLock::new(Vec::new()),
        });
        let sink: Weak<dyn RelaySink> = Arc::downgrade(&manager) as Weak<dyn RelaySink>;
        manager.context.install_sink(sink);
        manager
    }

    /// This manager as a teardown observer, for models that accept one.
    pub fn teardown_observer(self: &Arc<Self>) -> Weak<dyn TeardownObserver> {
        Arc::downgrade(self) as Weak<dyn TeardownObserver>
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The shared registry.
    pub fn registry(&self) -> &FocusRegistry {
        self.domain.registry()
    }

    /// This manager's isolation context.
    pub fn context(&self) -> &Arc<IsolationContext> {
        &self.context
    }

    /// The element model.
    pub fn model(&self) -> &Arc<M> {
        &self.model
    }

    /// Settings this manager was built with.
    pub fn config(&self) -> &FocusConfig {
        &self.config
    }

    /// Log a registry write that did not take effect. Callers detect the
    /// rejection by re-reading the registry.
    pub(crate) fn apply(&self, result: Result<(), RegistryError>) {
        if let Err(err) = result {
            tracing::debug!(context = %self.context.id(), %err, "registry write rejected");
        }
    }

    fn visible(&self, id: Option<ElementId>) -> Option<ElementId> {
        id.filter(|&id| self.model.context_of(id) == Some(self.context.id()))
    }

    /// Focus owner, if it belongs to this context.
    pub fn focus_owner(&self) -> Option<ElementId> {
        self.visible(self.registry().focus_owner())
    }

    /// Permanent focus owner, if it belongs to this context.
    pub fn permanent_focus_owner(&self) -> Option<ElementId> {
        self.visible(self.registry().permanent_focus_owner())
    }

    /// Focused surface, if it belongs to this context.
    pub fn focused_surface(&self) -> Option<ElementId> {
        self.visible(self.registry().focused_surface())
    }

    /// Active surface, if it belongs to this context.
    pub fn active_surface(&self) -> Option<ElementId> {
        self.visible(self.registry().active_surface())
    }

    /// Unfiltered view of the shared registry.
    pub fn global_snapshot(&self) -> FocusSnapshot {
        self.registry().snapshot()
    }

    /// Type-ahead markers, oldest first.
    pub fn markers(&self) -> Vec<TypeAheadMarker> {
        self.state().type_ahead.markers().copied().collect()
    }

    /// Held key events in arrival order.
    pub fn pending_key_events(&self) -> Vec<KeyEvent> {
        self.state().type_ahead.pending().cloned().collect()
    }

    /// Element a rollback could not request synchronously, if any.
    pub fn pending_restore(&self) -> Option<ElementId> {
        self.state().restore_focus_to
    }

    /// Add a hook that sees released keys before the focus owner.
    pub fn add_key_dispatcher(&self, dispatcher: Arc<dyn KeyDispatcher>) {
        self.key_dispatchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dispatcher);
    }

    /// Hold keys stamped after `after` until `until_focused` gains focus.
    ///
    /// No-op for `None`.
    pub fn enqueue_key_events(&self, after: Timestamp, until_focused: Option<ElementId>) {
        let Some(element) = until_focused else {
            return;
        };
        self.state().type_ahead.enqueue(after, element);
        tracing::trace!(?element, after = after.as_millis(), "type-ahead marker added");
    }

    /// Cancel a marker: the oldest for the element when `after` is `None`,
    /// otherwise the exact `(after, element)` pair.
    pub fn dequeue_key_events(&self, after: Option<Timestamp>, until_focused: Option<ElementId>) {
        let Some(element) = until_focused else {
            return;
        };
        let removed = self.state().type_ahead.dequeue(after, element);
        tracing::trace!(?element, removed, "type-ahead marker dequeued");
    }

    /// Drop markers for `element` and its descendants, and the held keys they
    /// were gating.
    pub fn discard_key_events(&self, element: Option<ElementId>) {
        let Some(element) = element else {
            return;
        };
        let mut state = self.state();
        let removed = state
            .type_ahead
            .discard(|m| self.model.is_within(m, element));
        if removed > 0 {
            tracing::trace!(?element, removed, "type-ahead markers discarded");
        }
    }

    /// Deliver every held key no longer gated by a marker.
    pub fn pump_approved_key_events(&self) {
        loop {
            let next = self.state().type_ahead.next_approved();
            let Some(key) = next else {
                break;
            };
            tracing::trace!(when = key.when.as_millis(), "held key released");
            self.pre_dispatch_key(key);
        }
    }

    /// Process one event. Returns whether it was handled.
    ///
    /// Focus events are always handled, since rejections are resolved by
    /// rollback. Keys are handled when delivered or held.
    pub fn dispatch(&self, event: FocusEvent) -> bool {
        let is_key = event.is_key();
        let transition = self.dispatch_event(event);
        !is_key || transition == Transition::Applied
    }

    /// Process one top-level event and report the transition.
    pub fn dispatch_event(&self, event: FocusEvent) -> Transition {
        self.dispatch_at(event, RelayDepth::TOP)
    }

    /// Deliver `event` to its target, relaying to the target's context when it
    /// is not this one. Returns whether the event was dispatched.
    pub fn send(&self, event: FocusEvent) -> bool {
        self.send_at(event, RelayDepth::TOP)
    }

    /// Clear the focus owner and permanent focus owner, bypassing vetoes.
    ///
    /// The former owner's listeners receive an element loss. Returns the former
    /// owner.
    pub fn clear_global_focus_owner(&self) -> Option<ElementId> {
        let previous = self.registry().clear_focus_owner();
        if let Some(prev) = previous {
            tracing::debug!(owner = ?prev, "global focus owner cleared");
            let lost = ElementEvent::new(prev).with_cause(FocusCause::ClearGlobalFocusOwner);
            self.model.notify(prev, &FocusEvent::ElementLostFocus(lost));
        }
        previous
    }

    /// Request focus on the traversal successor of the focus owner.
    pub fn focus_next_element(&self) -> bool {
        let Some(owner) = self.focus_owner() else {
            return false;
        };
        match self.model.next_focus_candidate(owner) {
            Some(next) => self
                .model
                .request_focus(next, FocusCause::Traversal, RequestScope::Global),
            None => false,
        }
    }

    /// Request focus on the traversal predecessor of the focus owner.
    pub fn focus_previous_element(&self) -> bool {
        let Some(owner) = self.focus_owner() else {
            return false;
        };
        match self.model.previous_focus_candidate(owner) {
            Some(previous) => self
                .model
                .request_focus(previous, FocusCause::Traversal, RequestScope::Global),
            None => false,
        }
    }

    pub(crate) fn send_at(&self, event: FocusEvent, depth: RelayDepth) -> bool {
        let result = relay::send(
            &self.context,
            self.domain.contexts(),
            &*self.model,
            event,
            &self.config.relay,
            |event| {
                self.dispatch_at(event, depth.deeper());
            },
        );
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(context = %self.context.id(), %err, "relay not dispatched");
                false
            }
        }
    }

    fn dispatch_at(&self, event: FocusEvent, depth: RelayDepth) -> Transition {
        tracing::trace!(context = %self.context.id(), depth = depth.get(), ?event, "dispatch");
        let transition = match event {
            FocusEvent::SurfaceGainedFocus(e) => self.surface_gained(e, depth),
            FocusEvent::SurfaceActivated(e) => self.surface_activated(e, depth),
            FocusEvent::SurfaceDeactivated(e) => self.surface_deactivated(e),
            FocusEvent::SurfaceLostFocus(e) => self.surface_lost(e, depth),
            FocusEvent::ElementGainedFocus(e) => self.element_gained(e, depth),
            FocusEvent::ElementLostFocus(e) => self.element_lost(e),
            FocusEvent::Key(key) => {
                if self.type_ahead_assertions(None, FocusEvent::Key(key)) {
                    Transition::Applied
                } else {
                    Transition::Ignored
                }
            }
        };
        if transition == Transition::Rejected {
            tracing::debug!(context = %self.context.id(), "transition rejected");
        }
        transition
    }

    fn surface_gained(&self, e: SurfaceEvent, depth: RelayDepth) -> Transition {
        let registry = self.registry();
        let new_focused = e.surface;
        let old_focused = registry.focused_surface();
        if old_focused == Some(new_focused) {
            return Transition::Ignored;
        }

        if !(self.model.is_focusable(new_focused)
            && self.model.is_showing(new_focused)
            && self.model.is_displayable(new_focused))
        {
            let real_opposite = self.state().real_opposite_surface;
            self.rollback(RollbackRequest {
                vetoed: None,
                fallback_surface: Some(new_focused),
                real_opposite,
                stated_opposite: e.opposite,
            });
            return Transition::Rejected;
        }

        if let Some(old) = old_focused {
            let lost = SurfaceEvent::new(old, Some(new_focused));
            if !self.send_at(FocusEvent::SurfaceLostFocus(lost), depth) {
                self.apply(registry.set_focus_owner(None, None));
                self.apply(registry.set_focused_surface(None));
            }
        }

        let new_active = self.model.owning_root(new_focused).unwrap_or(new_focused);
        let current_active = registry.active_surface();
        if Some(new_active) != current_active {
            let activated = SurfaceEvent::new(new_active, current_active);
            self.send_at(FocusEvent::SurfaceActivated(activated), depth);
            if registry.active_surface() != Some(new_active) {
                self.rollback_surface_event(&e);
                return Transition::Rejected;
            }
        }

        self.apply(registry.set_focused_surface(Some(new_focused)));
        if registry.focused_surface() != Some(new_focused) {
            self.rollback_surface_event(&e);
            return Transition::Rejected;
        }

        // Inside a relay, the element gain that follows picks the target.
        if !depth.is_relay() {
            self.focus_initial_element(new_focused);
        }

        let real_opposite = {
            let mut state = self.state();
            state.restore_focus_to = None;
            state.real_opposite_surface
        };
        let mut event = e;
        if real_opposite != e.opposite {
            event.opposite = real_opposite;
        }
        self.type_ahead_assertions(Some(new_focused), FocusEvent::SurfaceGainedFocus(event));
        Transition::Applied
    }

    fn focus_initial_element(&self, surface: ElementId) {
        let mut to_focus = self.model.most_recent_focus_owner(surface);
        let is_restore = {
            let state = self.state();
            state.restore_focus_to.is_some() && to_focus == state.restore_focus_to
        };
        if to_focus.is_none() && self.model.is_focusable(surface) {
            to_focus = self.model.initial_element(surface);
        }
        let temp_lost = self.model.set_temporary_lost(surface, None);
        if let Some(lost) = temp_lost {
            let cause = if is_restore && Some(lost) == to_focus {
                FocusCause::Rollback
            } else {
                FocusCause::Activation
            };
            self.model
                .request_focus(lost, cause, RequestScope::InSurface);
        }
        if let Some(target) = to_focus
            && Some(target) != temp_lost
        {
            self.model
                .request_focus(target, FocusCause::Activation, RequestScope::InSurface);
        }
    }

    fn rollback_surface_event(&self, e: &SurfaceEvent) {
        let real_opposite = self.state().real_opposite_surface;
        self.rollback(RollbackRequest {
            vetoed: None,
            fallback_surface: None,
            real_opposite,
            stated_opposite: e.opposite,
        });
    }

    fn surface_activated(&self, e: SurfaceEvent, depth: RelayDepth) -> Transition {
        let registry = self.registry();
        let new_active = e.surface;
        let old_active = registry.active_surface();
        if old_active == Some(new_active) {
            return Transition::Ignored;
        }
        if let Some(old) = old_active {
            let deactivated = SurfaceEvent::new(old, Some(new_active));
            if !self.send_at(FocusEvent::SurfaceDeactivated(deactivated), depth) {
                self.apply(registry.set_active_surface(None));
            }
            if registry.active_surface().is_some() {
                return Transition::Rejected;
            }
        }
        self.apply(registry.set_active_surface(Some(new_active)));
        if registry.active_surface() != Some(new_active) {
            return Transition::Rejected;
        }
        self.type_ahead_assertions(Some(new_active), FocusEvent::SurfaceActivated(e));
        Transition::Applied
    }

    fn surface_deactivated(&self, e: SurfaceEvent) -> Transition {
        let registry = self.registry();
        let Some(active) = registry.active_surface() else {
            return Transition::Ignored;
        };
        if active != e.surface {
            // Stale: listeners still hear about it, registry stays.
            self.type_ahead_assertions(Some(e.surface), FocusEvent::SurfaceDeactivated(e));
            return Transition::Ignored;
        }
        self.apply(registry.set_active_surface(None));
        if registry.active_surface().is_some() {
            return Transition::Rejected;
        }
        self.type_ahead_assertions(Some(active), FocusEvent::SurfaceDeactivated(e));
        Transition::Applied
    }

    fn surface_lost(&self, e: SurfaceEvent, depth: RelayDepth) -> Transition {
        let registry = self.registry();
        let Some(focused) = registry.focused_surface() else {
            return Transition::Ignored;
        };
        let active = registry.active_surface();
        // The native layer reports the active surface losing focus to the
        // surface that already has it.
        if !depth.is_relay() && Some(e.surface) == active && e.opposite == Some(focused) {
            tracing::debug!(surface = ?e.surface, "spurious surface focus loss dropped");
            return Transition::Ignored;
        }

        if let Some(owner) = registry.focus_owner() {
            let opposite = e
                .opposite
                .and_then(|w| {
                    self.model
                        .temporary_lost(w)
                        .or_else(|| self.model.most_recent_focus_owner(w))
                })
                .or(e.opposite);
            let lost = ElementEvent::new(owner)
                .with_opposite(opposite)
                .temporary()
                .with_cause(FocusCause::Activation);
            self.send_at(FocusEvent::ElementLostFocus(lost), depth);
        }

        self.apply(registry.set_focused_surface(None));
        if registry.focused_surface().is_some() {
            self.rollback(RollbackRequest {
                fallback_surface: Some(focused),
                ..RollbackRequest::default()
            });
            return Transition::Rejected;
        }

        self.state().real_opposite_surface = e.opposite.map(|_| focused);
        let retargeted = SurfaceEvent::new(focused, e.opposite);
        self.type_ahead_assertions(Some(focused), FocusEvent::SurfaceLostFocus(retargeted));

        if e.opposite.is_none()
            && let Some(active) = active
        {
            let deactivated = SurfaceEvent::new(active, None);
            self.send_at(FocusEvent::SurfaceDeactivated(deactivated), depth);
            if registry.active_surface().is_some() {
                self.rollback(RollbackRequest {
                    fallback_surface: Some(focused),
                    ..RollbackRequest::default()
                });
                return Transition::Rejected;
            }
        }
        Transition::Applied
    }

    fn element_gained(&self, e: ElementEvent, depth: RelayDepth) -> Transition {
        let registry = self.registry();
        self.state().restore_focus_to = None;
        let new_owner = e.element;
        let old_owner = registry.focus_owner();

        if old_owner == Some(new_owner) {
            // Markers for the owner must not linger in the queue.
            let retired = self.state().type_ahead.retire_all(new_owner);
            tracing::trace!(owner = ?new_owner, retired, "focus gain on current owner");
            self.pump_approved_key_events();
            return Transition::Ignored;
        }

        if let Some(old) = old_owner {
            let mut lost = ElementEvent::new(old)
                .with_opposite(Some(new_owner))
                .with_cause(e.cause);
            lost.temporary = e.temporary;
            if !self.send_at(FocusEvent::ElementLostFocus(lost), depth) {
                self.apply(registry.set_focus_owner(None, None));
                if !e.temporary {
                    self.apply(registry.set_permanent_focus_owner(None));
                }
            }
        }

        let new_surface = self.model.surface_of(new_owner);
        let current_focused = registry.focused_surface();
        if let Some(surface) = new_surface
            && Some(surface) != current_focused
        {
            let gained = SurfaceEvent::new(surface, current_focused);
            self.send_at(FocusEvent::SurfaceGainedFocus(gained), depth);
            if registry.focused_surface() != Some(surface) {
                // Rollback already ran in the surface handler.
                self.state().type_ahead.dequeue(None, new_owner);
                return Transition::Rejected;
            }
        }

        let acceptable = self.model.is_focusable(new_owner)
            && self.model.is_showing(new_owner)
            && (self.model.is_enabled(new_owner) || e.cause == FocusCause::Unknown);
        if !acceptable {
            self.state().type_ahead.dequeue(None, new_owner);
            if self.config.auto_focus_transfer {
                self.rollback_element_event(&e, new_surface.or(current_focused));
                if let Some(surface) = new_surface {
                    self.model.set_most_recent_focus_owner(surface, None);
                }
            }
            return Transition::Rejected;
        }

        self.apply(registry.set_focus_owner(Some(new_owner), new_surface));
        if registry.focus_owner() != Some(new_owner) {
            self.state().type_ahead.dequeue(None, new_owner);
            if self.config.auto_focus_transfer {
                self.rollback_element_event(&e, new_surface);
            }
            return Transition::Rejected;
        }

        if !e.temporary {
            self.apply(registry.set_permanent_focus_owner(Some(new_owner)));
            if registry.permanent_focus_owner() != Some(new_owner) {
                self.state().type_ahead.dequeue(None, new_owner);
                if self.config.auto_focus_transfer {
                    self.rollback_element_event(&e, new_surface);
                }
                return Transition::Rejected;
            }
            if let Some(surface) = new_surface {
                self.model.set_most_recent_focus_owner(surface, Some(new_owner));
            }
        }

        let mut event = e;
        let real_opposite = self.state().real_opposite_element;
        if real_opposite.is_some() && real_opposite != e.opposite {
            event.opposite = real_opposite;
        }
        self.type_ahead_assertions(Some(new_owner), FocusEvent::ElementGainedFocus(event));
        Transition::Applied
    }

    fn rollback_element_event(&self, e: &ElementEvent, surface: Option<ElementId>) {
        let real_opposite = self.state().real_opposite_element;
        self.rollback(RollbackRequest {
            vetoed: Some(e.element),
            fallback_surface: surface,
            real_opposite,
            stated_opposite: e.opposite,
        });
    }

    fn element_lost(&self, e: ElementEvent) -> Transition {
        let registry = self.registry();
        let Some(current) = registry.focus_owner() else {
            return Transition::Ignored;
        };
        // Losing focus to itself is a retargeting artifact.
        if e.opposite == Some(current) {
            return Transition::Ignored;
        }

        self.apply(registry.set_focus_owner(None, None));
        if registry.focus_owner().is_some() {
            self.rollback(RollbackRequest {
                stated_opposite: Some(current),
                ..RollbackRequest::default()
            });
            return Transition::Rejected;
        }

        if e.temporary {
            if let Some(surface) = self.model.surface_of(current) {
                self.model.set_temporary_lost(surface, Some(current));
            }
        } else {
            self.apply(registry.set_permanent_focus_owner(None));
            if registry.permanent_focus_owner().is_some() {
                self.rollback(RollbackRequest {
                    stated_opposite: Some(current),
                    ..RollbackRequest::default()
                });
                return Transition::Rejected;
            }
        }

        self.state().real_opposite_element = e.opposite.map(|_| current);
        let mut event = e;
        event.element = current;
        self.type_ahead_assertions(Some(current), FocusEvent::ElementLostFocus(event));
        Transition::Applied
    }

    /// Gate keys, retire markers on element gain, and notify listeners.
    fn type_ahead_assertions(&self, target: Option<ElementId>, event: FocusEvent) -> bool {
        self.pump_approved_key_events();
        match event {
            FocusEvent::Key(key) => {
                let admission = self.state().type_ahead.admit(key);
                match admission {
                    Admission::Held => {
                        tracing::trace!("key held for pending focus request");
                        true
                    }
                    Admission::Deliver(key) => self.pre_dispatch_key(key),
                }
            }
            FocusEvent::ElementGainedFocus(e) => {
                let owner = target.unwrap_or(e.element);
                if !self.state().type_ahead.release_for(owner) {
                    tracing::trace!(?owner, "focus gain without type-ahead marker");
                }
                self.model.notify(owner, &FocusEvent::ElementGainedFocus(e));
                self.pump_approved_key_events();
                true
            }
            other => {
                if let Some(target) = target.or_else(|| other.target()) {
                    self.model.notify(target, &other);
                }
                true
            }
        }
    }

    /// Route a released key to the visible focus owner (or focused surface).
    fn pre_dispatch_key(&self, key: KeyEvent) -> bool {
        let Some(target) = self.focus_owner().or_else(|| self.focused_surface()) else {
            tracing::trace!(when = key.when.as_millis(), "key dropped: nothing focused");
            return false;
        };
        let dispatchers = self
            .key_dispatchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for dispatcher in &dispatchers {
            if dispatcher.dispatch_key(target, &key) == Outcome::Stop {
                tracing::trace!(?target, "key consumed by dispatcher");
                return true;
            }
        }
        self.model.deliver_key(target, &key);
        true
    }
}

impl<M: ElementModel + 'static> RelaySink for FocusManager<M> {
    fn dispatch_relayed(&self, event: FocusEvent) -> bool {
        let is_key = event.is_key();
        let transition = self.dispatch_at(event, RelayDepth::TOP.deeper());
        !is_key || transition == Transition::Applied
    }
}

impl<M: ElementModel + 'static> TeardownObserver for FocusManager<M> {
    fn element_removed(&self, id: ElementId) {
        let within = |x: Option<ElementId>| x.is_some_and(|x| self.model.is_within(x, id));
        {
            let mut state = self.state();
            let removed = state.type_ahead.discard(|m| self.model.is_within(m, id));
            if within(state.real_opposite_surface) {
                state.real_opposite_surface = None;
            }
            if within(state.real_opposite_element) {
                state.real_opposite_element = None;
            }
            if within(state.restore_focus_to) {
                state.restore_focus_to = None;
            }
            if removed > 0 {
                tracing::trace!(?id, removed, "type-ahead purged on teardown");
            }
        }
        if self.registry().forget(|slot| self.model.is_within(slot, id)) {
            tracing::debug!(?id, "registry slots cleared on teardown");
        }
    }
}
