// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property tests for the focus registry as driven by the dispatcher.
//!
//! Whatever sequence of surface and element events arrives, at most one focus
//! owner exists and it lives in the focused surface.

use std::sync::Arc;

use proptest::prelude::*;
use understory_focus_dispatch::{
    ContextId, ElementEvent, ElementFlags, ElementId, ElementModel, ElementTree, FocusConfig,
    FocusDomain, FocusEvent, FocusManager, SurfaceEvent, SurfaceKind,
};

#[derive(Clone, Debug)]
enum Step {
    SurfaceGained(usize, Option<usize>),
    SurfaceLost(usize, Option<usize>),
    Activated(usize),
    Deactivated(usize),
    ElementGained(usize, bool),
    ElementLost(usize, bool, Option<usize>),
    ToggleFocusable(usize),
    Traverse(bool),
}

struct Desk {
    tree: Arc<ElementTree>,
    manager: Arc<FocusManager<ElementTree>>,
    surfaces: [ElementId; 2],
    elements: [ElementId; 4],
}

fn desk() -> Desk {
    let tree = Arc::new(ElementTree::new());
    let frame = tree.insert_surface(ContextId(0), None, SurfaceKind::Root, ElementFlags::default());
    let popup =
        tree.insert_surface(ContextId(0), Some(frame), SurfaceKind::Owned, ElementFlags::default());
    let elements = [
        tree.insert(frame, ElementFlags::default()).unwrap(),
        tree.insert(frame, ElementFlags::default()).unwrap(),
        tree.insert(popup, ElementFlags::default()).unwrap(),
        tree.insert(popup, ElementFlags::default()).unwrap(),
    ];
    let manager = FocusManager::new(
        FocusDomain::new(),
        ContextId(0),
        tree.clone(),
        FocusConfig::default(),
    );
    Desk {
        tree,
        manager,
        surfaces: [frame, popup],
        elements,
    }
}

fn step() -> impl Strategy<Value = Step> {
    let surface = 0usize..2;
    let element = 0usize..4;
    prop_oneof![
        (surface.clone(), proptest::option::of(0usize..2))
            .prop_map(|(s, o)| Step::SurfaceGained(s, o)),
        (surface.clone(), proptest::option::of(0usize..2))
            .prop_map(|(s, o)| Step::SurfaceLost(s, o)),
        surface.clone().prop_map(Step::Activated),
        surface.prop_map(Step::Deactivated),
        (element.clone(), any::<bool>()).prop_map(|(e, t)| Step::ElementGained(e, t)),
        (element.clone(), any::<bool>(), proptest::option::of(0usize..4))
            .prop_map(|(e, t, o)| Step::ElementLost(e, t, o)),
        element.prop_map(Step::ToggleFocusable),
        any::<bool>().prop_map(Step::Traverse),
    ]
}

fn apply(desk: &Desk, step: &Step) {
    let s = |i: usize| desk.surfaces[i];
    let e = |i: usize| desk.elements[i];
    match *step {
        Step::SurfaceGained(surface, opposite) => {
            let event = SurfaceEvent::new(s(surface), opposite.map(s));
            desk.manager.dispatch(FocusEvent::SurfaceGainedFocus(event));
        }
        Step::SurfaceLost(surface, opposite) => {
            let event = SurfaceEvent::new(s(surface), opposite.map(s));
            desk.manager.dispatch(FocusEvent::SurfaceLostFocus(event));
        }
        Step::Activated(surface) => {
            let event = SurfaceEvent::new(s(surface), None);
            desk.manager.dispatch(FocusEvent::SurfaceActivated(event));
        }
        Step::Deactivated(surface) => {
            let event = SurfaceEvent::new(s(surface), None);
            desk.manager.dispatch(FocusEvent::SurfaceDeactivated(event));
        }
        Step::ElementGained(element, temporary) => {
            let mut event = ElementEvent::new(e(element));
            event.temporary = temporary;
            desk.manager.dispatch(FocusEvent::ElementGainedFocus(event));
        }
        Step::ElementLost(element, temporary, opposite) => {
            let mut event = ElementEvent::new(e(element)).with_opposite(opposite.map(e));
            event.temporary = temporary;
            desk.manager.dispatch(FocusEvent::ElementLostFocus(event));
        }
        Step::ToggleFocusable(element) => {
            let id = e(element);
            let flags = desk.tree.flags(id).unwrap_or_default();
            desk.tree.set_flags(id, flags ^ ElementFlags::FOCUSABLE);
        }
        Step::Traverse(forward) => {
            if forward {
                desk.manager.focus_next_element();
            } else {
                desk.manager.focus_previous_element();
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn owner_always_lives_in_focused_surface(
        steps in proptest::collection::vec(step(), 0..40),
    ) {
        let desk = desk();
        for step in &steps {
            apply(&desk, step);
            let snap = desk.manager.global_snapshot();
            if let Some(owner) = snap.focus_owner {
                prop_assert!(snap.focused_surface.is_some());
                prop_assert_eq!(desk.tree.surface_of(owner), snap.focused_surface);
            }
        }
    }

    #[test]
    fn owner_is_one_of_the_known_elements(
        steps in proptest::collection::vec(step(), 0..40),
    ) {
        let desk = desk();
        for step in &steps {
            apply(&desk, step);
        }
        let snap = desk.manager.global_snapshot();
        prop_assert!(snap.focus_owner.is_none_or(|o| desk.elements.contains(&o)));
        prop_assert!(snap.focused_surface.is_none_or(|s| desk.surfaces.contains(&s)));
    }
}
