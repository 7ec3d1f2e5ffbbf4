// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rejection values surfaced by the registry and the cross-context relay.
//!
//! Neither error reaches callers of
//! [`FocusManager::dispatch`](crate::manager::FocusManager::dispatch): registry
//! errors become a re-read of the registry followed by rollback, and relay
//! errors become the `false` result of a send.

use crate::registry::RegistryField;
use crate::types::{ContextId, ElementId};

/// A registry write that did not take effect.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A [`FocusVeto`](crate::registry::FocusVeto) rejected the change.
    #[error("{field} change to {proposed:?} was vetoed")]
    Vetoed {
        /// Slot that was being written.
        field: RegistryField,
        /// Value that was refused.
        proposed: Option<ElementId>,
    },
    /// The owner would not be contained in the focused surface.
    #[error("focus owner {owner:?} is outside the focused surface {focused:?}")]
    OutsideFocusedSurface {
        /// Proposed focus owner.
        owner: ElementId,
        /// Surface that currently holds focus.
        focused: Option<ElementId>,
    },
    /// Another writer changed the slot while vetoes were judging this change.
    #[error("{field} changed to {current:?} while the write was being approved")]
    Superseded {
        /// Slot that was being written.
        field: RegistryField,
        /// Value written in the meantime, which is kept.
        current: Option<ElementId>,
    },
}

/// A cross-context relay that was not dispatched.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The target element is stale or belongs to no context.
    #[error("element {0:?} belongs to no isolation context")]
    Detached(ElementId),
    /// The target context is not registered with the domain.
    #[error("isolation context {0} is not registered")]
    UnknownContext(ContextId),
    /// The target context was torn down before the relay was posted.
    #[error("isolation context {0} is disposed")]
    Disposed(ContextId),
    /// The target context was torn down while the relay was queued.
    #[error("relay to {0} was abandoned before dispatch")]
    Abandoned(ContextId),
    /// The caller stopped waiting; the relay may still run later.
    #[error("gave up waiting for relay to {0}")]
    TimedOut(ContextId),
}
