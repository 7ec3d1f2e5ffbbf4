// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared focus registry: the focus owner, focused surface, and active surface.
//!
//! One registry is shared by every isolation context of a
//! [`FocusDomain`](crate::domain::FocusDomain). All four slots live behind a
//! single lock, so a [`FocusSnapshot`] is always an atomic view.
//!
//! Writes go through [`FocusVeto`] observers first. A write that is vetoed, that
//! would break the single-owner invariant, or whose slot was changed by another
//! writer while the vetoes ran returns a [`RegistryError`] and leaves the
//! registry untouched; the state machine detects this by re-reading the slot
//! and then runs rollback.
//!
//! ## Invariant
//!
//! If there is a focus owner there is a focused surface, and the owner lives in
//! it. [`FocusRegistry::set_focus_owner`] refuses owners outside the focused
//! surface, and [`FocusRegistry::set_focused_surface`] clears an owner that the
//! new surface does not contain, in the same critical section.

use core::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::error::RegistryError;
use crate::types::ElementId;

/// One slot of the registry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RegistryField {
    /// Element receiving keyboard input.
    FocusOwner,
    /// Last focus owner reached through a non-temporary transfer.
    PermanentFocusOwner,
    /// Surface containing the focus owner.
    FocusedSurface,
    /// Foreground surface.
    ActiveSurface,
}

impl fmt::Display for RegistryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FocusOwner => "focus owner",
            Self::PermanentFocusOwner => "permanent focus owner",
            Self::FocusedSurface => "focused surface",
            Self::ActiveSurface => "active surface",
        })
    }
}

/// A proposed registry write, as seen by vetoes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RegistryChange {
    /// Slot being written.
    pub field: RegistryField,
    /// Current value.
    pub old: Option<ElementId>,
    /// Proposed value.
    pub new: Option<ElementId>,
}

/// Observer that may refuse a registry change.
///
/// Vetoes run without any registry lock held, so they may read the registry.
/// They must not write to it.
pub trait FocusVeto: Send + Sync {
    /// Return `false` to refuse `change`.
    fn allow(&self, change: &RegistryChange) -> bool;
}

impl<F> FocusVeto for F
where
    F: Fn(&RegistryChange) -> bool + Send + Sync,
{
    fn allow(&self, change: &RegistryChange) -> bool {
        self(change)
    }
}

/// Atomic view of the registry.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct FocusSnapshot {
    /// Element receiving keyboard input.
    pub focus_owner: Option<ElementId>,
    /// Last non-temporary focus owner.
    pub permanent_focus_owner: Option<ElementId>,
    /// Surface containing the focus owner.
    pub focused_surface: Option<ElementId>,
    /// Foreground surface.
    pub active_surface: Option<ElementId>,
}

impl FocusSnapshot {
    /// Value of `field`.
    pub fn get(&self, field: RegistryField) -> Option<ElementId> {
        match field {
            RegistryField::FocusOwner => self.focus_owner,
            RegistryField::PermanentFocusOwner => self.permanent_focus_owner,
            RegistryField::FocusedSurface => self.focused_surface,
            RegistryField::ActiveSurface => self.active_surface,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    slots: FocusSnapshot,
    // Surface the owner was validated against when it was set.
    owner_surface: Option<ElementId>,
}

impl RegistryState {
    /// `field` must still hold the value the vetoes approved a change from.
    fn unchanged(&self, change: &RegistryChange) -> Result<(), RegistryError> {
        let current = self.slots.get(change.field);
        if current == change.old {
            Ok(())
        } else {
            tracing::debug!(field = %change.field, ?current, "registry write superseded");
            Err(RegistryError::Superseded {
                field: change.field,
                current,
            })
        }
    }
}

/// The shared focus registry.
#[derive(Default)]
pub struct FocusRegistry {
    state: Mutex<RegistryState>,
    vetoes: RwLock<Vec<Arc<dyn FocusVeto>>>,
}

impl fmt::Debug for FocusRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vetoes = self
            .vetoes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("FocusRegistry")
            .field("snapshot", &self.snapshot())
            .field("vetoes", &vetoes)
            .finish()
    }
}

impl FocusRegistry {
    /// Empty registry with no vetoes.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomic view of all slots.
    pub fn snapshot(&self) -> FocusSnapshot {
        self.lock().slots
    }

    /// Current focus owner.
    pub fn focus_owner(&self) -> Option<ElementId> {
        self.lock().slots.focus_owner
    }

    /// Current permanent focus owner.
    pub fn permanent_focus_owner(&self) -> Option<ElementId> {
        self.lock().slots.permanent_focus_owner
    }

    /// Current focused surface.
    pub fn focused_surface(&self) -> Option<ElementId> {
        self.lock().slots.focused_surface
    }

    /// Current active surface.
    pub fn active_surface(&self) -> Option<ElementId> {
        self.lock().slots.active_surface
    }

    /// Install a veto observer.
    pub fn add_veto(&self, veto: Arc<dyn FocusVeto>) {
        self.vetoes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(veto);
    }

    /// Remove every veto observer.
    pub fn clear_vetoes(&self) {
        self.vetoes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn approve(&self, change: &RegistryChange) -> Result<(), RegistryError> {
        // Snapshot the list so vetoes run without the lock.
        let vetoes: Vec<Arc<dyn FocusVeto>> = self
            .vetoes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if vetoes.iter().all(|v| v.allow(change)) {
            Ok(())
        } else {
            let proposed = change.new;
            tracing::debug!(field = %change.field, ?proposed, "registry change vetoed");
            Err(RegistryError::Vetoed {
                field: change.field,
                proposed: change.new,
            })
        }
    }

    /// Set the focus owner.
    ///
    /// `owner_surface` is the surface containing `owner`; it must be the
    /// focused surface.
    pub fn set_focus_owner(
        &self,
        owner: Option<ElementId>,
        owner_surface: Option<ElementId>,
    ) -> Result<(), RegistryError> {
        let (old, focused) = {
            let state = self.lock();
            (state.slots.focus_owner, state.slots.focused_surface)
        };
        if old == owner {
            return Ok(());
        }
        if let Some(owner) = owner
            && (owner_surface.is_none() || owner_surface != focused)
        {
            return Err(RegistryError::OutsideFocusedSurface { owner, focused });
        }
        let change = RegistryChange {
            field: RegistryField::FocusOwner,
            old,
            new: owner,
        };
        self.approve(&change)?;
        let mut state = self.lock();
        state.unchanged(&change)?;
        // The focused surface may have moved while vetoes ran.
        if let Some(owner) = owner
            && state.slots.focused_surface != owner_surface
        {
            return Err(RegistryError::OutsideFocusedSurface {
                owner,
                focused: state.slots.focused_surface,
            });
        }
        state.slots.focus_owner = owner;
        state.owner_surface = owner.and(owner_surface);
        Ok(())
    }

    /// Set the permanent focus owner.
    pub fn set_permanent_focus_owner(&self, owner: Option<ElementId>) -> Result<(), RegistryError> {
        let old = self.lock().slots.permanent_focus_owner;
        if old == owner {
            return Ok(());
        }
        let change = RegistryChange {
            field: RegistryField::PermanentFocusOwner,
            old,
            new: owner,
        };
        self.approve(&change)?;
        let mut state = self.lock();
        state.unchanged(&change)?;
        state.slots.permanent_focus_owner = owner;
        Ok(())
    }

    /// Set the focused surface.
    ///
    /// An owner that is not inside `surface` is cleared in the same step.
    pub fn set_focused_surface(&self, surface: Option<ElementId>) -> Result<(), RegistryError> {
        let old = self.lock().slots.focused_surface;
        if old == surface {
            return Ok(());
        }
        let change = RegistryChange {
            field: RegistryField::FocusedSurface,
            old,
            new: surface,
        };
        self.approve(&change)?;
        let mut state = self.lock();
        state.unchanged(&change)?;
        state.slots.focused_surface = surface;
        if state.slots.focus_owner.is_some() && state.owner_surface != surface {
            tracing::trace!(owner = ?state.slots.focus_owner, "owner cleared with its surface");
            state.slots.focus_owner = None;
            state.owner_surface = None;
        }
        Ok(())
    }

    /// Set the active surface.
    pub fn set_active_surface(&self, surface: Option<ElementId>) -> Result<(), RegistryError> {
        let old = self.lock().slots.active_surface;
        if old == surface {
            return Ok(());
        }
        let change = RegistryChange {
            field: RegistryField::ActiveSurface,
            old,
            new: surface,
        };
        self.approve(&change)?;
        let mut state = self.lock();
        state.unchanged(&change)?;
        state.slots.active_surface = surface;
        Ok(())
    }

    /// Clear the focus owner and permanent focus owner without consulting vetoes.
    ///
    /// This is the terminal state of rollback. Returns the previous owner.
    pub fn clear_focus_owner(&self) -> Option<ElementId> {
        let mut state = self.lock();
        let previous = state.slots.focus_owner.take();
        state.slots.permanent_focus_owner = None;
        state.owner_surface = None;
        previous
    }

    /// Drop every slot whose value satisfies `gone`, without consulting vetoes.
    ///
    /// Used when elements are torn down. Returns `true` if anything changed.
    pub(crate) fn forget(&self, mut gone: impl FnMut(ElementId) -> bool) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut changed = false;
        let slots = &mut state.slots;
        for slot in [
            &mut slots.focus_owner,
            &mut slots.permanent_focus_owner,
            &mut slots.focused_surface,
            &mut slots.active_surface,
        ] {
            if slot.is_some_and(&mut gone) {
                *slot = None;
                changed = true;
            }
        }
        if slots.focus_owner.is_none() || slots.focused_surface.is_none() {
            slots.focus_owner = None;
            state.owner_surface = None;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    const SURFACE: ElementId = ElementId(0, 1);
    const OTHER: ElementId = ElementId(1, 1);
    const BUTTON: ElementId = ElementId(2, 1);

    #[test]
    fn owner_must_live_in_focused_surface() {
        let registry = FocusRegistry::new();
        assert_eq!(
            registry.set_focus_owner(Some(BUTTON), Some(SURFACE)),
            Err(RegistryError::OutsideFocusedSurface {
                owner: BUTTON,
                focused: None,
            })
        );

        registry.set_focused_surface(Some(SURFACE)).unwrap();
        registry.set_focus_owner(Some(BUTTON), Some(SURFACE)).unwrap();
        assert_eq!(registry.focus_owner(), Some(BUTTON));
    }

    #[test]
    fn moving_surface_focus_clears_foreign_owner() {
        let registry = FocusRegistry::new();
        registry.set_focused_surface(Some(SURFACE)).unwrap();
        registry.set_focus_owner(Some(BUTTON), Some(SURFACE)).unwrap();
        registry.set_permanent_focus_owner(Some(BUTTON)).unwrap();

        registry.set_focused_surface(Some(OTHER)).unwrap();
        let snap = registry.snapshot();
        assert_eq!(snap.focus_owner, None);
        assert_eq!(snap.focused_surface, Some(OTHER));
        // The permanent owner survives surface changes.
        assert_eq!(snap.permanent_focus_owner, Some(BUTTON));
    }

    #[test]
    fn veto_leaves_registry_untouched() {
        let registry = FocusRegistry::new();
        registry.add_veto(Arc::new(|change: &RegistryChange| {
            !(change.field == RegistryField::ActiveSurface && change.new == Some(OTHER))
        }));

        registry.set_active_surface(Some(SURFACE)).unwrap();
        let err = registry.set_active_surface(Some(OTHER)).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Vetoed {
                field: RegistryField::ActiveSurface,
                proposed: Some(OTHER),
            }
        );
        assert_eq!(registry.active_surface(), Some(SURFACE));

        registry.clear_vetoes();
        registry.set_active_surface(Some(OTHER)).unwrap();
        assert_eq!(registry.active_surface(), Some(OTHER));
    }

    #[test]
    fn clear_focus_owner_ignores_vetoes() {
        let registry = FocusRegistry::new();
        registry.set_focused_surface(Some(SURFACE)).unwrap();
        registry.set_focus_owner(Some(BUTTON), Some(SURFACE)).unwrap();
        registry.add_veto(Arc::new(|_: &RegistryChange| false));

        assert!(registry.set_focus_owner(None, None).is_err());
        assert_eq!(registry.clear_focus_owner(), Some(BUTTON));
        assert_eq!(registry.focus_owner(), None);
        assert_eq!(registry.permanent_focus_owner(), None);
    }

    #[test]
    fn forget_drops_matching_slots() {
        let registry = FocusRegistry::new();
        registry.set_focused_surface(Some(SURFACE)).unwrap();
        registry.set_active_surface(Some(SURFACE)).unwrap();
        registry.set_focus_owner(Some(BUTTON), Some(SURFACE)).unwrap();

        assert!(registry.forget(|id| id == SURFACE));
        assert_eq!(registry.snapshot(), FocusSnapshot::default());
        assert!(!registry.forget(|id| id == SURFACE));
    }

    #[test]
    fn write_racing_the_vetoes_is_not_overwritten() {
        let registry = Arc::new(FocusRegistry::new());
        registry.set_active_surface(Some(SURFACE)).unwrap();

        // While the change to OTHER is being judged, another writer moves the
        // slot to BUTTON.
        let raced = AtomicBool::new(false);
        let writer = Arc::downgrade(&registry);
        registry.add_veto(Arc::new(move |change: &RegistryChange| {
            if change.new == Some(OTHER)
                && !raced.swap(true, Ordering::SeqCst)
                && let Some(registry) = writer.upgrade()
            {
                registry.set_active_surface(Some(BUTTON)).unwrap();
            }
            true
        }));

        assert_eq!(
            registry.set_active_surface(Some(OTHER)),
            Err(RegistryError::Superseded {
                field: RegistryField::ActiveSurface,
                current: Some(BUTTON),
            })
        );
        assert_eq!(registry.active_surface(), Some(BUTTON));
        assert_eq!(registry.snapshot().get(RegistryField::ActiveSurface), Some(BUTTON));

        // Without interference the same write goes through.
        registry.set_active_surface(Some(OTHER)).unwrap();
        assert_eq!(registry.active_surface(), Some(OTHER));
    }
}
