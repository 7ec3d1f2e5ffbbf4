// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Type-ahead gating: markers and held key events.
//!
//! When the toolkit asks for focus to move to an element, it first records a
//! [`TypeAheadMarker`]: "keys stamped after `after` belong to `until_focused`".
//! While a marker exists, keys newer than the oldest marker are held instead of
//! delivered. When the element gains focus, the markers for it are retired and
//! the held keys flow out in their original order.
//!
//! Markers are kept sorted by `after` (stable for equal stamps), and held keys
//! are kept in arrival order.
//!
//! The queue is plain data. [`FocusManager`](crate::manager::FocusManager)
//! owns one per isolation context behind its state lock.

use std::collections::VecDeque;

use crate::types::{ElementId, KeyEvent, Timestamp};

/// A pending focus request that gates key delivery.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TypeAheadMarker {
    /// Keys stamped strictly after this time are held.
    pub after: Timestamp,
    /// Element whose gain of focus releases the marker.
    pub until_focused: ElementId,
}

/// What [`TypeAheadQueue::admit`] decided about a key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Admission {
    /// No marker covers the key; deliver it now.
    Deliver(KeyEvent),
    /// The key was appended to the held queue.
    Held,
}

/// Ordered markers plus held key events.
#[derive(Clone, Debug, Default)]
pub struct TypeAheadQueue {
    markers: VecDeque<TypeAheadMarker>,
    pending: VecDeque<KeyEvent>,
}

impl TypeAheadQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Markers, oldest first.
    pub fn markers(&self) -> impl ExactSizeIterator<Item = &TypeAheadMarker> + '_ {
        self.markers.iter()
    }

    /// Held key events in arrival order.
    pub fn pending(&self) -> impl ExactSizeIterator<Item = &KeyEvent> + '_ {
        self.pending.iter()
    }

    /// Returns `true` while any marker exists.
    pub fn has_marker(&self) -> bool {
        !self.markers.is_empty()
    }

    /// Insert a marker, keeping markers sorted by `after`.
    ///
    /// Equal stamps keep insertion order.
    pub fn enqueue(&mut self, after: Timestamp, until_focused: ElementId) {
        let at = self
            .markers
            .iter()
            .rposition(|m| m.after <= after)
            .map_or(0, |i| i + 1);
        self.markers.insert(
            at,
            TypeAheadMarker {
                after,
                until_focused,
            },
        );
    }

    /// Remove one marker for `until_focused`.
    ///
    /// With `after == None` the oldest marker for the element is removed;
    /// otherwise the newest marker with exactly that stamp. Returns `true` if a
    /// marker was removed.
    pub fn dequeue(&mut self, after: Option<Timestamp>, until_focused: ElementId) -> bool {
        let found = match after {
            None => self
                .markers
                .iter()
                .position(|m| m.until_focused == until_focused),
            Some(after) => self
                .markers
                .iter()
                .rposition(|m| m.until_focused == until_focused && m.after == after),
        };
        found.and_then(|i| self.markers.remove(i)).is_some()
    }

    /// Remove every marker whose element satisfies `owned_by`, along with the
    /// held keys those markers were gating.
    ///
    /// A removed marker gates the held keys stamped after it and up to the next
    /// surviving marker; keys covered by a surviving marker stay held. Returns
    /// the number of markers removed.
    pub fn discard(&mut self, mut owned_by: impl FnMut(ElementId) -> bool) -> usize {
        let mut removed = 0;
        let mut i = 0;
        while i < self.markers.len() {
            if !owned_by(self.markers[i].until_focused) {
                i += 1;
                continue;
            }
            let start = self.markers[i].after;
            self.markers.remove(i);
            removed += 1;
            // The next marker (if any) now sits at `i`.
            let end = self.markers.get(i).map(|m| m.after);
            self.purge_stamped(start, end);
        }
        removed
    }

    /// Drop every held key with `start < when` and `when <= end` (no upper
    /// bound when `end` is `None`).
    fn purge_stamped(&mut self, start: Timestamp, end: Option<Timestamp>) {
        self.pending
            .retain(|k| !(k.when > start && end.is_none_or(|end| k.when <= end)));
    }

    /// Deliver or hold `key`.
    ///
    /// A key is held while a marker exists and the key is strictly newer than
    /// the oldest marker; a key stamped exactly at the marker time was typed
    /// before the focus request and is delivered.
    pub fn admit(&mut self, key: KeyEvent) -> Admission {
        match self.markers.front() {
            Some(front) if key.when > front.after => {
                self.pending.push_back(key);
                Admission::Held
            }
            _ => Admission::Deliver(key),
        }
    }

    /// Retire the markers satisfied by `target` gaining focus.
    ///
    /// Removes every marker from the head up to and including the first
    /// contiguous run of markers for `target`: one successful gain satisfies
    /// all requests stacked before it. Returns `false` (and changes nothing)
    /// when no marker names `target`.
    pub fn release_for(&mut self, target: ElementId) -> bool {
        let Some(first) = self.markers.iter().position(|m| m.until_focused == target) else {
            return false;
        };
        let run = self
            .markers
            .iter()
            .skip(first)
            .take_while(|m| m.until_focused == target)
            .count();
        let trimmed = self.markers.drain(..first + run).count();
        tracing::trace!(?target, trimmed, "type-ahead markers released");
        true
    }

    /// Remove every marker for `target`, wherever it sits.
    pub fn retire_all(&mut self, target: ElementId) -> usize {
        let before = self.markers.len();
        self.markers.retain(|m| m.until_focused != target);
        before - self.markers.len()
    }

    /// Pop the next held key that is no longer gated.
    ///
    /// With no markers everything is approved. Otherwise only keys stamped at
    /// or before the oldest marker are approved.
    pub fn next_approved(&mut self) -> Option<KeyEvent> {
        let front = self.pending.front()?;
        let gated = self.markers.front().is_some_and(|m| front.when > m.after);
        if gated {
            None
        } else {
            self.pending.pop_front()
        }
    }

    /// Drop every marker and held key.
    pub fn clear(&mut self) {
        self.markers.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ElementId = ElementId(1, 1);
    const B: ElementId = ElementId(2, 1);

    fn key(ms: u64) -> KeyEvent {
        KeyEvent::pressed(Timestamp(ms), "k")
    }

    fn stamps(q: &TypeAheadQueue) -> Vec<u64> {
        q.pending().map(|k| k.when.as_millis()).collect()
    }

    #[test]
    fn markers_stay_sorted_and_stable() {
        let mut q = TypeAheadQueue::new();
        q.enqueue(Timestamp(200), A);
        q.enqueue(Timestamp(100), B);
        q.enqueue(Timestamp(200), B);
        let order: Vec<_> = q.markers().map(|m| (m.after.0, m.until_focused)).collect();
        assert_eq!(order, vec![(100, B), (200, A), (200, B)]);
    }

    #[test]
    fn key_at_marker_time_is_delivered() {
        let mut q = TypeAheadQueue::new();
        q.enqueue(Timestamp(100), A);
        assert_eq!(q.admit(key(100)), Admission::Deliver(key(100)));
        assert_eq!(q.admit(key(101)), Admission::Held);
        assert_eq!(stamps(&q), vec![101]);
    }

    #[test]
    fn release_flows_held_keys_in_order() {
        let mut q = TypeAheadQueue::new();
        q.enqueue(Timestamp(100), A);
        assert_eq!(q.admit(key(150)), Admission::Held);
        assert_eq!(q.admit(key(160)), Admission::Held);
        assert_eq!(q.next_approved(), None);

        assert!(q.release_for(A));
        assert!(!q.has_marker());
        assert_eq!(q.next_approved(), Some(key(150)));
        assert_eq!(q.next_approved(), Some(key(160)));
        assert_eq!(q.next_approved(), None);
    }

    #[test]
    fn release_trims_through_first_run_only() {
        let mut q = TypeAheadQueue::new();
        q.enqueue(Timestamp(100), A);
        q.enqueue(Timestamp(200), B);
        q.enqueue(Timestamp(300), B);
        q.enqueue(Timestamp(400), A);
        q.admit(key(150));
        q.admit(key(450));

        assert!(!q.release_for(ElementId(9, 1)));
        assert_eq!(q.markers().len(), 4);

        // Gaining B satisfies the earlier A request and both B requests.
        assert!(q.release_for(B));
        let left: Vec<_> = q.markers().map(|m| m.after.0).collect();
        assert_eq!(left, vec![400]);
        assert_eq!(q.next_approved(), Some(key(150)));
        assert_eq!(q.next_approved(), None);
        assert_eq!(stamps(&q), vec![450]);
    }

    #[test]
    fn dequeue_oldest_or_exact() {
        let mut q = TypeAheadQueue::new();
        q.enqueue(Timestamp(100), A);
        q.enqueue(Timestamp(200), A);
        assert!(!q.dequeue(Some(Timestamp(150)), A));
        assert!(q.dequeue(Some(Timestamp(200)), A));
        assert!(q.dequeue(None, A));
        assert!(!q.dequeue(None, A));
    }

    #[test]
    fn discard_only_drops_keys_the_marker_gated() {
        let mut q = TypeAheadQueue::new();
        q.enqueue(Timestamp(100), A);
        q.enqueue(Timestamp(200), B);
        for ms in [150, 250] {
            q.admit(key(ms));
        }
        assert_eq!(q.discard(|id| id == A), 1);
        // 150 was gated by A only; 250 is still gated by B.
        assert_eq!(stamps(&q), vec![250]);
        assert_eq!(q.markers().len(), 1);
    }

    #[test]
    fn retire_all_removes_buried_markers() {
        let mut q = TypeAheadQueue::new();
        q.enqueue(Timestamp(100), B);
        q.enqueue(Timestamp(200), A);
        q.enqueue(Timestamp(300), A);
        assert_eq!(q.retire_all(A), 2);
        assert_eq!(q.markers().len(), 1);
    }

    #[test]
    fn clear_drops_markers_and_held_keys() {
        let mut q = TypeAheadQueue::new();
        q.enqueue(Timestamp(100), A);
        q.admit(key(150));
        q.clear();
        assert!(!q.has_marker());
        assert_eq!(q.pending().len(), 0);
        // Nothing gates a fresh key afterwards.
        assert_eq!(q.admit(key(200)), Admission::Deliver(key(200)));
    }
}
