// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recovery after a rejected focus transition.
//!
//! Rollback walks a fixed chain and stops at the first step that lands:
//!
//! 1. the fallback surface's most recent focus owner,
//! 2. the recorded real opposite of the rejected transition,
//! 3. the rejected event's stated opposite,
//! 4. clearing the focus owner.
//!
//! Each step issues at most a couple of focus requests and never re-enters
//! rollback, so the chain always ends. The last step clears the registry
//! without consulting vetoes.
//!
//! A request that cannot be issued because its surface is not focused yet is
//! remembered as the pending restore target; the next surface gain reconciles
//! it instead of picking a generic initial element.

use crate::manager::FocusManager;
use crate::model::ElementModel;
use crate::types::{ElementId, FocusCause, RequestScope};

/// Inputs of one rollback.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub(crate) struct RollbackRequest {
    /// Element whose gain was rejected; never chosen as a fallback.
    pub(crate) vetoed: Option<ElementId>,
    /// Surface whose most recent owner is tried first.
    pub(crate) fallback_surface: Option<ElementId>,
    /// True counterpart recorded by an earlier transition.
    pub(crate) real_opposite: Option<ElementId>,
    /// Counterpart named by the rejected event.
    pub(crate) stated_opposite: Option<ElementId>,
}

/// The step of the chain that ended a rollback.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) enum RollbackStep {
    /// Focus restored inside the fallback surface.
    FallbackSurface,
    /// Focus restored to the recorded real opposite.
    RealOpposite,
    /// Focus restored to the stated opposite.
    StatedOpposite,
    /// Nothing could take focus; the owner was cleared.
    Cleared,
}

impl<M: ElementModel + 'static> FocusManager<M> {
    /// Run the fallback chain for a rejected transition.
    pub(crate) fn rollback(&self, request: RollbackRequest) -> RollbackStep {
        let step = if request
            .fallback_surface
            .is_some_and(|s| self.restore_in_surface(s, request.vetoed))
        {
            RollbackStep::FallbackSurface
        } else if request
            .real_opposite
            .is_some_and(|o| self.restore_opposite(o, request.vetoed))
        {
            RollbackStep::RealOpposite
        } else if request
            .stated_opposite
            .is_some_and(|o| self.restore_opposite(o, request.vetoed))
        {
            RollbackStep::StatedOpposite
        } else {
            self.clear_global_focus_owner();
            RollbackStep::Cleared
        };
        tracing::debug!(?step, ?request, "rollback finished");
        step
    }

    fn restore_opposite(&self, target: ElementId, vetoed: Option<ElementId>) -> bool {
        if self.model.is_surface(target) {
            self.restore_in_surface(target, vetoed)
        } else {
            self.restore_element(target, vetoed)
        }
    }

    /// Give focus back to the most recent owner of `surface`.
    fn restore_in_surface(&self, surface: ElementId, vetoed: Option<ElementId>) -> bool {
        self.state().restore_focus_to = None;
        let Some(to_focus) = self
            .model
            .most_recent_focus_owner(surface)
            .filter(|&t| Some(t) != vetoed)
        else {
            return false;
        };

        if self.registry().focused_surface() == Some(surface) {
            return self.restore_element(to_focus, vetoed);
        }

        // The surface is not focused: the request completes later.
        let target = if self.model.is_showing(to_focus) && self.model.can_be_focus_owner(to_focus)
        {
            Some(to_focus)
        } else {
            self.model.next_focus_candidate(to_focus)
        };
        match target {
            Some(target) if Some(target) != vetoed => {
                if !self
                    .model
                    .request_focus(target, FocusCause::Rollback, RequestScope::Global)
                {
                    self.state().restore_focus_to = Some(target);
                }
                true
            }
            _ => false,
        }
    }

    /// Give focus to `to_focus`, or to its traversal successor.
    fn restore_element(&self, to_focus: ElementId, vetoed: Option<ElementId>) -> bool {
        let mut accepted = true;
        if Some(to_focus) != vetoed
            && self.model.is_showing(to_focus)
            && self.model.can_be_focus_owner(to_focus)
        {
            accepted = self
                .model
                .request_focus(to_focus, FocusCause::Rollback, RequestScope::Global);
            if accepted {
                return true;
            }
        }
        if !accepted && self.registry().focused_surface() != self.model.surface_of(to_focus) {
            self.state().restore_focus_to = Some(to_focus);
            return true;
        }
        match self.model.next_focus_candidate(to_focus) {
            Some(next) if Some(next) != vetoed => {
                self.model
                    .request_focus(next, FocusCause::Rollback, RequestScope::InSurface)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::FocusConfig;
    use crate::domain::FocusDomain;
    use crate::tree::{ElementFlags, ElementTree, SurfaceKind};
    use crate::types::{ContextId, ElementEvent, FocusEvent, SurfaceEvent};

    fn setup() -> (Arc<ElementTree>, Arc<FocusManager<ElementTree>>, ElementId) {
        let tree = Arc::new(ElementTree::new());
        let frame =
            tree.insert_surface(ContextId(0), None, SurfaceKind::Root, ElementFlags::default());
        let manager = FocusManager::new(
            FocusDomain::new(),
            ContextId(0),
            tree.clone(),
            FocusConfig::default(),
        );
        manager.dispatch(FocusEvent::SurfaceGainedFocus(SurfaceEvent::new(frame, None)));
        (tree, manager, frame)
    }

    #[test]
    fn empty_request_clears_owner() {
        let (tree, manager, frame) = setup();
        let a = tree.insert(frame, ElementFlags::default()).unwrap();
        manager.dispatch(FocusEvent::ElementGainedFocus(ElementEvent::new(a)));

        assert_eq!(manager.rollback(RollbackRequest::default()), RollbackStep::Cleared);
        assert_eq!(manager.focus_owner(), None);
        assert_eq!(manager.permanent_focus_owner(), None);
    }

    #[test]
    fn vetoed_element_is_skipped_for_successor() {
        let (tree, manager, frame) = setup();
        let a = tree.insert(frame, ElementFlags::default()).unwrap();
        let b = tree.insert(frame, ElementFlags::default()).unwrap();
        tree.set_most_recent_focus_owner(frame, Some(a));

        let step = manager.rollback(RollbackRequest {
            vetoed: Some(a),
            stated_opposite: Some(a),
            ..RollbackRequest::default()
        });
        assert_eq!(step, RollbackStep::StatedOpposite);
        let requests = tree.take_focus_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].element, b);
        assert_eq!(requests[0].scope, RequestScope::InSurface);
    }

    #[test]
    fn refused_request_in_unfocused_surface_is_remembered() {
        let (tree, manager, _frame) = setup();
        let other =
            tree.insert_surface(ContextId(0), None, SurfaceKind::Root, ElementFlags::default());
        let x = tree.insert(other, ElementFlags::default()).unwrap();
        tree.set_most_recent_focus_owner(other, Some(x));
        tree.refuse_requests(x, true);

        let step = manager.rollback(RollbackRequest {
            fallback_surface: Some(other),
            ..RollbackRequest::default()
        });
        assert_eq!(step, RollbackStep::FallbackSurface);
        assert_eq!(manager.pending_restore(), Some(x));

        // The next surface gain clears it.
        manager.dispatch(FocusEvent::SurfaceGainedFocus(SurfaceEvent::new(other, None)));
        assert_eq!(manager.pending_restore(), None);
    }

    #[test]
    fn real_opposite_surface_restores_its_owner() {
        let (tree, manager, frame) = setup();
        let a = tree.insert(frame, ElementFlags::default()).unwrap();
        tree.set_most_recent_focus_owner(frame, Some(a));
        let step = manager.rollback(RollbackRequest {
            real_opposite: Some(frame),
            ..RollbackRequest::default()
        });
        assert_eq!(step, RollbackStep::RealOpposite);
        assert_eq!(tree.take_focus_requests()[0].cause, FocusCause::Rollback);
    }
}
