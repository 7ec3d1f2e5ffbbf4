// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Collaborator traits: the element/surface model, teardown hooks, and key
//! dispatch hooks.
//!
//! The focus core never owns elements. It refers to them by [`ElementId`] and
//! asks an [`ElementModel`] every question it has about them: capabilities,
//! hierarchy, which isolation context they live in, and where focus should go
//! next. [`ElementTree`](crate::tree::ElementTree) is a complete in-memory
//! implementation; toolkits with their own widget tree implement the trait
//! directly.
//!
//! Methods take `&self`: a model is shared between the manager and the
//! dispatch threads of every isolation context, so implementations use interior
//! mutability for the per-surface slots.

use crate::types::{ContextId, ElementId, FocusCause, FocusEvent, KeyEvent, Outcome, RequestScope};

/// The element/surface model consumed by the focus core.
pub trait ElementModel: Send + Sync {
    /// Returns `true` if `id` refers to a live element or surface.
    fn is_alive(&self, id: ElementId) -> bool;

    /// Parent of `id`; `None` for surfaces and stale handles.
    fn parent_of(&self, id: ElementId) -> Option<ElementId>;

    /// Returns `true` if `id` is a top-level surface.
    fn is_surface(&self, id: ElementId) -> bool;

    /// Surface containing `id` (`id` itself for a surface).
    fn surface_of(&self, id: ElementId) -> Option<ElementId> {
        let mut current = id;
        loop {
            if !self.is_alive(current) {
                return None;
            }
            if self.is_surface(current) {
                return Some(current);
            }
            current = self.parent_of(current)?;
        }
    }

    /// Owner of a surface in the owner chain (for example, the frame that owns a
    /// dialog).
    fn surface_owner(&self, surface: ElementId) -> Option<ElementId>;

    /// Returns `true` if the surface can become the active surface itself
    /// (frames and dialogs, not owned popups).
    fn is_activatable(&self, surface: ElementId) -> bool;

    /// Nearest activatable surface up the owner chain of `surface`.
    fn owning_root(&self, surface: ElementId) -> Option<ElementId> {
        let mut current = Some(surface);
        while let Some(s) = current {
            if self.is_activatable(s) {
                return Some(s);
            }
            current = self.surface_owner(s);
        }
        None
    }

    /// Returns `true` if `ancestor` is `id` or one of its parents, stopping at
    /// the surface.
    fn is_within(&self, id: ElementId, ancestor: ElementId) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            if self.is_surface(c) {
                return false;
            }
            current = self.parent_of(c);
        }
        false
    }

    /// Isolation context the element belongs to.
    fn context_of(&self, id: ElementId) -> Option<ContextId>;

    /// The element accepts focus at all.
    fn is_focusable(&self, id: ElementId) -> bool;

    /// The element and its ancestors are visible.
    fn is_showing(&self, id: ElementId) -> bool;

    /// The element accepts input.
    fn is_enabled(&self, id: ElementId) -> bool;

    /// The element has a native peer (it can be drawn).
    fn is_displayable(&self, id: ElementId) -> bool;

    /// The element can currently become the focus owner.
    fn can_be_focus_owner(&self, id: ElementId) -> bool {
        self.is_focusable(id) && self.is_enabled(id) && self.is_showing(id)
    }

    /// Ask the toolkit to move focus to `id`.
    ///
    /// Returns `true` if the request was accepted. Acceptance does not mean
    /// focus moved; the resulting focus events arrive through
    /// [`FocusManager::dispatch`](crate::manager::FocusManager::dispatch).
    fn request_focus(&self, id: ElementId, cause: FocusCause, scope: RequestScope) -> bool;

    /// Next element after `from` in traversal order inside its surface.
    fn next_focus_candidate(&self, from: ElementId) -> Option<ElementId>;

    /// Element before `from` in traversal order inside its surface.
    fn previous_focus_candidate(&self, from: ElementId) -> Option<ElementId>;

    /// Element a surface focuses when it has no history.
    fn initial_element(&self, surface: ElementId) -> Option<ElementId>;

    /// Element that last owned focus permanently inside `surface`.
    fn most_recent_focus_owner(&self, surface: ElementId) -> Option<ElementId>;

    /// Record the most recent focus owner of `surface`.
    fn set_most_recent_focus_owner(&self, surface: ElementId, owner: Option<ElementId>);

    /// Element of `surface` that lost focus temporarily.
    fn temporary_lost(&self, surface: ElementId) -> Option<ElementId>;

    /// Record the temporarily lost element of `surface`, returning the previous
    /// one.
    fn set_temporary_lost(&self, surface: ElementId, element: Option<ElementId>)
    -> Option<ElementId>;

    /// Deliver a focus notification to the listeners of `target`.
    fn notify(&self, target: ElementId, event: &FocusEvent) {
        let _ = (target, event);
    }

    /// Deliver a released key to `target`.
    fn deliver_key(&self, target: ElementId, event: &KeyEvent);
}

/// Hook invoked before an element is torn down.
///
/// Registered observers see the root of the removed subtree while the subtree
/// is still queryable.
pub trait TeardownObserver: Send + Sync {
    /// `id` and its descendants are about to be removed.
    fn element_removed(&self, id: ElementId);
}

/// Hook that sees every released key before the focus owner does.
///
/// Returning [`Outcome::Stop`] consumes the key.
pub trait KeyDispatcher: Send + Sync {
    /// Inspect a key addressed to `target`.
    fn dispatch_key(&self, target: ElementId, event: &KeyEvent) -> Outcome;
}

impl<F> KeyDispatcher for F
where
    F: Fn(ElementId, &KeyEvent) -> Outcome + Send + Sync,
{
    fn dispatch_key(&self, target: ElementId, event: &KeyEvent) -> Outcome {
        self(target, event)
    }
}
