// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory element model: surfaces and elements in a generational arena.
//!
//! [`ElementTree`] implements [`ElementModel`] for toolkits that do not have a
//! widget tree of their own, and it is the model the crate's tests drive.
//!
//! - Surfaces are roots. Each has a [`SurfaceKind`], an optional owner surface,
//!   and the per-surface focus slots (most recent owner, temporarily lost
//!   element, designated initial element).
//! - Elements hang off a surface and inherit its isolation context.
//! - Handles are generational: removing an element bumps its slot generation,
//!   so old handles go stale instead of aliasing a new element.
//!
//! Focus requests, focus notifications, and key deliveries are journaled so a
//! caller can observe what the focus core asked for and delivered.
//!
//! ## Example
//!
//! ```rust
//! use understory_focus_dispatch::model::ElementModel;
//! use understory_focus_dispatch::tree::{ElementFlags, ElementTree, SurfaceKind};
//! use understory_focus_dispatch::types::ContextId;
//!
//! let tree = ElementTree::new();
//! let frame = tree.insert_surface(ContextId(0), None, SurfaceKind::Root, ElementFlags::default());
//! let a = tree.insert(frame, ElementFlags::default()).unwrap();
//! let b = tree.insert(frame, ElementFlags::default()).unwrap();
//!
//! assert_eq!(tree.surface_of(b), Some(frame));
//! assert_eq!(tree.next_focus_candidate(a), Some(b));
//! // Traversal wraps inside the surface.
//! assert_eq!(tree.next_focus_candidate(b), Some(a));
//! ```

use core::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use hashbrown::HashSet;
use smallvec::SmallVec;

use crate::model::{ElementModel, TeardownObserver};
use crate::types::{ContextId, ElementId, FocusCause, FocusEvent, KeyEvent, RequestScope};

bitflags::bitflags! {
    /// Capability flags of an element or surface.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ElementFlags: u8 {
        /// Accepts focus at all.
        const FOCUSABLE   = 0b0000_0001;
        /// Visible; an element is showing only if its ancestors are too.
        const SHOWING     = 0b0000_0010;
        /// Accepts input.
        const ENABLED     = 0b0000_0100;
        /// Has a native peer.
        const DISPLAYABLE = 0b0000_1000;
    }
}

impl Default for ElementFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Role of a surface in the owner chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SurfaceKind {
    /// Frame or dialog; can become the active surface.
    Root,
    /// Popup or tool window; activation goes to its owner.
    Owned,
}

/// A journaled [`ElementModel::request_focus`] call.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FocusRequest {
    /// Requested element.
    pub element: ElementId,
    /// Declared cause.
    pub cause: FocusCause,
    /// Declared scope.
    pub scope: RequestScope,
}

/// A journaled notification or key delivery.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Delivery {
    /// Focus notification delivered to listeners of the element.
    Focus(ElementId, FocusEvent),
    /// Key delivered to the element.
    Key(ElementId, KeyEvent),
}

#[derive(Clone, Debug)]
struct SurfaceSlots {
    kind: SurfaceKind,
    owner: Option<ElementId>,
    initial: Option<ElementId>,
    most_recent: Option<ElementId>,
    temporary_lost: Option<ElementId>,
}

#[derive(Clone, Debug)]
struct Element {
    generation: u32,
    parent: Option<ElementId>,
    children: SmallVec<[ElementId; 4]>,
    flags: ElementFlags,
    context: ContextId,
    surface: Option<SurfaceSlots>,
}

#[derive(Debug, Default)]
struct TreeInner {
    /// slots
    nodes: Vec<Option<Element>>,
    /// last generation per slot (persists across frees)
    generations: Vec<u32>,
    free_list: Vec<usize>,
}

impl TreeInner {
    fn get(&self, id: ElementId) -> Option<&Element> {
        self.nodes
            .get(id.idx())?
            .as_ref()
            .filter(|n| n.generation == id.1)
    }

    fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.nodes
            .get_mut(id.idx())?
            .as_mut()
            .filter(|n| n.generation == id.1)
    }

    fn slots(&self, surface: ElementId) -> Option<&SurfaceSlots> {
        self.get(surface)?.surface.as_ref()
    }

    fn slots_mut(&mut self, surface: ElementId) -> Option<&mut SurfaceSlots> {
        self.get_mut(surface)?.surface.as_mut()
    }

    /// Filter a stored handle through liveness.
    fn live(&self, id: Option<ElementId>) -> Option<ElementId> {
        id.filter(|&id| self.get(id).is_some())
    }

    fn alloc(&mut self, make: impl FnOnce(u32) -> Element) -> ElementId {
        let (idx, generation) = if let Some(idx) = self.free_list.pop() {
            let generation = self.generations[idx].saturating_add(1);
            self.generations[idx] = generation;
            self.nodes[idx] = Some(make(generation));
            (idx, generation)
        } else {
            let generation = 1_u32;
            self.nodes.push(Some(make(generation)));
            self.generations.push(generation);
            (self.nodes.len() - 1, generation)
        };
        #[allow(
            clippy::cast_possible_truncation,
            reason = "ElementId uses 32-bit indices."
        )]
        ElementId(idx as u32, generation)
    }

    fn remove_subtree(&mut self, id: ElementId) {
        let Some(node) = self.get(id) else {
            return;
        };
        let children = node.children.clone();
        if let Some(parent) = node.parent
            && let Some(p) = self.get_mut(parent)
        {
            p.children.retain(|c| *c != id);
        }
        for child in children {
            self.remove_subtree(child);
        }
        self.nodes[id.idx()] = None;
        self.free_list.push(id.idx());
    }

    /// All of `flag` set on `id` and each ancestor.
    fn inherited(&self, id: ElementId, flag: ElementFlags) -> bool {
        let mut current = Some(id);
        let mut seen = false;
        while let Some(c) = current {
            let Some(node) = self.get(c) else {
                return false;
            };
            if !node.flags.contains(flag) {
                return false;
            }
            seen = true;
            current = node.parent;
        }
        seen
    }

    fn own(&self, id: ElementId, flag: ElementFlags) -> bool {
        self.get(id).is_some_and(|n| n.flags.contains(flag))
    }

    fn can_be_focus_owner(&self, id: ElementId) -> bool {
        self.own(id, ElementFlags::FOCUSABLE)
            && self.own(id, ElementFlags::ENABLED)
            && self.inherited(id, ElementFlags::SHOWING)
    }

    fn surface_root(&self, id: ElementId) -> Option<ElementId> {
        let mut current = id;
        loop {
            let node = self.get(current)?;
            match node.parent {
                Some(p) => current = p,
                None => return node.surface.is_some().then_some(current),
            }
        }
    }

    fn next_sibling(&self, node: ElementId) -> Option<ElementId> {
        let parent = self.get(node)?.parent?;
        let siblings = &self.get(parent)?.children;
        let pos = siblings.iter().position(|&id| id == node)?;
        siblings.get(pos + 1).copied()
    }

    fn previous_sibling(&self, node: ElementId) -> Option<ElementId> {
        let parent = self.get(node)?.parent?;
        let siblings = &self.get(parent)?.children;
        let pos = siblings.iter().position(|&id| id == node)?;
        siblings.get(pos.checked_sub(1)?).copied()
    }

    /// Deepest last descendant of `node`, or `node` itself when it is a leaf.
    fn last_descendant(&self, node: ElementId) -> ElementId {
        let mut current = node;
        while let Some(&last) = self.get(current).and_then(|n| n.children.last()) {
            current = last;
        }
        current
    }

    /// Depth-first successor of `current`, not leaving its root.
    fn next_in_order(&self, current: ElementId) -> Option<ElementId> {
        if let Some(&first) = self.get(current)?.children.first() {
            return Some(first);
        }
        let mut node = current;
        while let Some(parent) = self.get(node)?.parent {
            if let Some(next) = self.next_sibling(node) {
                return Some(next);
            }
            node = parent;
        }
        None
    }

    /// Depth-first predecessor of `current`, not leaving its root.
    fn previous_in_order(&self, current: ElementId) -> Option<ElementId> {
        let parent = self.get(current)?.parent?;
        match self.previous_sibling(current) {
            Some(sibling) => Some(self.last_descendant(sibling)),
            None => Some(parent),
        }
    }
}

/// Generational element/surface arena implementing [`ElementModel`].
#[derive(Default)]
pub struct ElementTree {
    inner: RwLock<TreeInner>,
    requests: Mutex<Vec<FocusRequest>>,
    deliveries: Mutex<Vec<Delivery>>,
    refused: Mutex<HashSet<ElementId>>,
    observers: Mutex<Vec<Weak<dyn TeardownObserver>>>,
}

impl fmt::Debug for ElementTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        let total = inner.nodes.len();
        let alive = inner.nodes.iter().filter(|n| n.is_some()).count();
        f.debug_struct("ElementTree")
            .field("nodes_total", &total)
            .field("nodes_alive", &alive)
            .field("free_list", &inner.free_list.len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ElementTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, TreeInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TreeInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a top-level surface in `context`.
    ///
    /// `owner` links the surface into an owner chain (a dialog's frame, a
    /// popup's window); it is ignored if stale.
    pub fn insert_surface(
        &self,
        context: ContextId,
        owner: Option<ElementId>,
        kind: SurfaceKind,
        flags: ElementFlags,
    ) -> ElementId {
        let mut inner = self.write();
        let owner = owner.filter(|&o| inner.slots(o).is_some());
        inner.alloc(|generation| Element {
            generation,
            parent: None,
            children: SmallVec::new(),
            flags,
            context,
            surface: Some(SurfaceSlots {
                kind,
                owner,
                initial: None,
                most_recent: None,
                temporary_lost: None,
            }),
        })
    }

    /// Create an element under `parent`, in the parent's context.
    ///
    /// Returns `None` if `parent` is stale.
    pub fn insert(&self, parent: ElementId, flags: ElementFlags) -> Option<ElementId> {
        let mut inner = self.write();
        let context = inner.get(parent)?.context;
        let id = inner.alloc(|generation| Element {
            generation,
            parent: Some(parent),
            children: SmallVec::new(),
            flags,
            context,
            surface: None,
        });
        inner.get_mut(parent)?.children.push(id);
        Some(id)
    }

    /// Remove `id` and its subtree.
    ///
    /// Teardown observers run first, while the subtree is still queryable.
    pub fn remove(&self, id: ElementId) {
        if !self.is_alive(id) {
            return;
        }
        let observers: Vec<_> = {
            let mut list = lock(&self.observers);
            list.retain(|o| o.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.element_removed(id);
        }
        self.write().remove_subtree(id);
        tracing::trace!(?id, "element removed");
    }

    /// Register a teardown observer. Dropped observers are pruned lazily.
    pub fn add_teardown_observer(&self, observer: Weak<dyn TeardownObserver>) {
        lock(&self.observers).push(observer);
    }

    /// Capability flags of `id`, if live.
    pub fn flags(&self, id: ElementId) -> Option<ElementFlags> {
        self.read().get(id).map(|n| n.flags)
    }

    /// Replace the capability flags of `id`. Returns `false` if stale.
    pub fn set_flags(&self, id: ElementId, flags: ElementFlags) -> bool {
        match self.write().get_mut(id) {
            Some(node) => {
                node.flags = flags;
                true
            }
            None => false,
        }
    }

    /// Designate the element a surface focuses when it has no history.
    pub fn set_initial_element(&self, surface: ElementId, element: Option<ElementId>) {
        if let Some(slots) = self.write().slots_mut(surface) {
            slots.initial = element;
        }
    }

    /// Make [`ElementModel::request_focus`] refuse (or accept again) requests
    /// for `id`, regardless of its flags.
    pub fn refuse_requests(&self, id: ElementId, refuse: bool) {
        let mut refused = lock(&self.refused);
        if refuse {
            refused.insert(id);
        } else {
            refused.remove(&id);
        }
    }

    /// Children of `id` in traversal order; empty if stale.
    pub fn children_of(&self, id: ElementId) -> Vec<ElementId> {
        self.read()
            .get(id)
            .map(|n| n.children.to_vec())
            .unwrap_or_default()
    }

    /// Focus requests seen so far.
    pub fn focus_requests(&self) -> Vec<FocusRequest> {
        lock(&self.requests).clone()
    }

    /// Drain the focus request journal.
    pub fn take_focus_requests(&self) -> Vec<FocusRequest> {
        core::mem::take(&mut *lock(&self.requests))
    }

    /// Notifications and key deliveries seen so far.
    pub fn deliveries(&self) -> Vec<Delivery> {
        lock(&self.deliveries).clone()
    }

    /// Drain the delivery journal.
    pub fn take_deliveries(&self) -> Vec<Delivery> {
        core::mem::take(&mut *lock(&self.deliveries))
    }
}

impl ElementModel for ElementTree {
    fn is_alive(&self, id: ElementId) -> bool {
        self.read().get(id).is_some()
    }

    fn parent_of(&self, id: ElementId) -> Option<ElementId> {
        self.read().get(id)?.parent
    }

    fn is_surface(&self, id: ElementId) -> bool {
        self.read().slots(id).is_some()
    }

    fn surface_of(&self, id: ElementId) -> Option<ElementId> {
        self.read().surface_root(id)
    }

    fn surface_owner(&self, surface: ElementId) -> Option<ElementId> {
        let inner = self.read();
        let owner = inner.slots(surface)?.owner;
        inner.live(owner)
    }

    fn is_activatable(&self, surface: ElementId) -> bool {
        self.read()
            .slots(surface)
            .is_some_and(|s| s.kind == SurfaceKind::Root)
    }

    fn context_of(&self, id: ElementId) -> Option<ContextId> {
        self.read().get(id).map(|n| n.context)
    }

    fn is_focusable(&self, id: ElementId) -> bool {
        self.read().own(id, ElementFlags::FOCUSABLE)
    }

    fn is_showing(&self, id: ElementId) -> bool {
        self.read().inherited(id, ElementFlags::SHOWING)
    }

    fn is_enabled(&self, id: ElementId) -> bool {
        self.read().own(id, ElementFlags::ENABLED)
    }

    fn is_displayable(&self, id: ElementId) -> bool {
        self.read().inherited(id, ElementFlags::DISPLAYABLE)
    }

    fn can_be_focus_owner(&self, id: ElementId) -> bool {
        self.read().can_be_focus_owner(id)
    }

    fn request_focus(&self, id: ElementId, cause: FocusCause, scope: RequestScope) -> bool {
        lock(&self.requests).push(FocusRequest {
            element: id,
            cause,
            scope,
        });
        let accepted = self.read().can_be_focus_owner(id) && !lock(&self.refused).contains(&id);
        tracing::trace!(?id, ?cause, ?scope, accepted, "focus requested");
        accepted
    }

    fn next_focus_candidate(&self, from: ElementId) -> Option<ElementId> {
        let inner = self.read();
        let surface = inner.surface_root(from)?;
        // Every live node is visited at most once before wrapping back.
        let mut remaining = inner.nodes.len();
        let mut current = from;
        while remaining > 0 {
            remaining -= 1;
            current = inner.next_in_order(current).unwrap_or(surface);
            if current == from {
                return None;
            }
            if current != surface && inner.can_be_focus_owner(current) {
                return Some(current);
            }
        }
        None
    }

    fn previous_focus_candidate(&self, from: ElementId) -> Option<ElementId> {
        let inner = self.read();
        let surface = inner.surface_root(from)?;
        let mut remaining = inner.nodes.len();
        let mut current = from;
        while remaining > 0 {
            remaining -= 1;
            current = inner
                .previous_in_order(current)
                .unwrap_or_else(|| inner.last_descendant(surface));
            if current == from {
                return None;
            }
            if current != surface && inner.can_be_focus_owner(current) {
                return Some(current);
            }
        }
        None
    }

    fn initial_element(&self, surface: ElementId) -> Option<ElementId> {
        let inner = self.read();
        let initial = inner.slots(surface)?.initial;
        inner.live(initial)
    }

    fn most_recent_focus_owner(&self, surface: ElementId) -> Option<ElementId> {
        let inner = self.read();
        let recent = inner.slots(surface)?.most_recent;
        inner.live(recent)
    }

    fn set_most_recent_focus_owner(&self, surface: ElementId, owner: Option<ElementId>) {
        if let Some(slots) = self.write().slots_mut(surface) {
            slots.most_recent = owner;
        }
    }

    fn temporary_lost(&self, surface: ElementId) -> Option<ElementId> {
        let inner = self.read();
        let lost = inner.slots(surface)?.temporary_lost;
        inner.live(lost)
    }

    fn set_temporary_lost(
        &self,
        surface: ElementId,
        element: Option<ElementId>,
    ) -> Option<ElementId> {
        let mut inner = self.write();
        let previous = core::mem::replace(&mut inner.slots_mut(surface)?.temporary_lost, element);
        inner.live(previous)
    }

    fn notify(&self, target: ElementId, event: &FocusEvent) {
        lock(&self.deliveries).push(Delivery::Focus(target, event.clone()));
    }

    fn deliver_key(&self, target: ElementId, event: &KeyEvent) {
        lock(&self.deliveries).push(Delivery::Key(target, event.clone()));
    }
}
