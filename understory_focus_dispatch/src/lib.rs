// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Focus Dispatch: keyboard focus arbitration across isolation
//! contexts.
//!
//! This crate decides which element owns keyboard input, how that ownership
//! moves between surfaces and between independent dispatch loops, and how
//! keys already in flight are reconciled with a focus change that may be
//! rejected, delayed, or applied on another loop.
//!
//! - A shared [`FocusRegistry`](registry::FocusRegistry) holds the focus
//!   owner, the focused surface, and the active surface. Writes can be vetoed;
//!   the owner is always inside the focused surface.
//! - A [`FocusManager`](manager::FocusManager) per isolation context is the
//!   state machine. It takes [`FocusEvent`](types::FocusEvent)s, updates the
//!   registry, synthesizes the surface and element events needed to keep it
//!   consistent, and returns a [`Transition`](types::Transition).
//! - A [`TypeAheadQueue`](type_ahead::TypeAheadQueue) holds keys typed after a
//!   focus request until the requested element actually gains focus.
//! - Synthesized events for another context go through the cross-context
//!   relay: the event is posted to the target's
//!   [`IsolationContext`](context::IsolationContext) and the sender waits,
//!   bounded, for it to be dispatched.
//! - When a transition does not stick, rollback restores a consistent owner or
//!   clears it.
//!
//! The crate never owns elements. It talks to the toolkit through the
//! [`ElementModel`](model::ElementModel) trait;
//! [`ElementTree`](tree::ElementTree) is a ready-made in-memory model.
//!
//! ## Minimal example
//!
//! ```rust
//! use std::sync::Arc;
//! use understory_focus_dispatch::{
//!     ContextId, ElementEvent, ElementFlags, ElementTree, FocusConfig, FocusDomain,
//!     FocusEvent, FocusManager, SurfaceEvent, SurfaceKind, Transition,
//! };
//!
//! let tree = Arc::new(ElementTree::new());
//! let frame = tree.insert_surface(ContextId(0), None, SurfaceKind::Root, ElementFlags::default());
//! let button = tree.insert(frame, ElementFlags::default()).unwrap();
//!
//! let manager = FocusManager::new(FocusDomain::new(), ContextId(0), tree, FocusConfig::default());
//! manager.dispatch(FocusEvent::SurfaceGainedFocus(SurfaceEvent::new(frame, None)));
//! let t = manager.dispatch_event(FocusEvent::ElementGainedFocus(ElementEvent::new(button)));
//!
//! assert_eq!(t, Transition::Applied);
//! assert_eq!(manager.focus_owner(), Some(button));
//! assert_eq!(manager.active_surface(), Some(frame));
//! ```
//!
//! ## Threads
//!
//! Each isolation context has one dispatch loop, driven by
//! [`IsolationContext::run`](context::IsolationContext::run) or pumped by hand.
//! A sender that is itself a dispatch loop keeps pumping its own queue while it
//! waits, so two contexts relaying to each other do not deadlock.
//!
//! Diagnostics go through `tracing`; the crate never installs a subscriber.

pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod manager;
pub mod model;
pub mod registry;
pub mod relay;
mod rollback;
pub mod tree;
pub mod type_ahead;
pub mod types;

pub use config::{FocusConfig, RelayConfig};
pub use context::{ContextTable, IsolationContext, RelayTicket, TicketState};
pub use domain::FocusDomain;
pub use error::{RegistryError, RelayError};
pub use manager::FocusManager;
pub use model::{ElementModel, KeyDispatcher, TeardownObserver};
pub use registry::{FocusRegistry, FocusSnapshot, FocusVeto, RegistryChange, RegistryField};
pub use tree::{ElementFlags, ElementTree, SurfaceKind};
pub use type_ahead::{Admission, TypeAheadMarker, TypeAheadQueue};
pub use types::{
    ContextId, ElementEvent, ElementId, FocusCause, FocusEvent, KeyEvent, KeyState, Modifiers,
    Outcome, RelayDepth, RequestScope, SurfaceEvent, Timestamp, Transition,
};
