// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Public types: handles, timestamps, key events, and the focus event union.

use core::fmt;

/// Generational handle of an element or surface.
///
/// The first field is the slot index, the second the slot generation. A handle
/// whose generation no longer matches its slot is stale and refers to nothing;
/// this replaces weak back-references to elements.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ElementId(pub(crate) u32, pub(crate) u32);

impl ElementId {
    /// Build a handle from a raw slot index and generation.
    ///
    /// Models other than [`ElementTree`](crate::tree::ElementTree) use this to
    /// mint their own handles.
    pub const fn from_raw(index: u32, generation: u32) -> Self {
        Self(index, generation)
    }

    /// Slot index of this handle.
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Generation of this handle.
    pub const fn generation(self) -> u32 {
        self.1
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of an isolation context (an independent dispatch loop).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Monotonic event time in milliseconds, as stamped by the native input layer.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Timestamp from a millisecond count.
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Millisecond count of this timestamp.
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

/// Why a focus change was requested.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum FocusCause {
    /// System generated; no attributable request.
    #[default]
    Unknown,
    /// Direct request from the user (pointer click, explicit API call).
    UserRequested,
    /// Keyboard traversal to the next candidate.
    Traversal,
    /// Recovery after a rejected transition.
    Rollback,
    /// Restoring focus inside a surface that became focused or active.
    Activation,
    /// The focus owner is being cleared.
    ClearGlobalFocusOwner,
}

/// How far a focus request may reach.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RequestScope {
    /// The request may also move surface focus.
    Global,
    /// The request only succeeds if the element's surface is already focused.
    InSurface,
}

bitflags::bitflags! {
    /// Modifier keys held during a key event.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        /// Shift.
        const SHIFT   = 0b0000_0001;
        /// Control.
        const CONTROL = 0b0000_0010;
        /// Alt / Option.
        const ALT     = 0b0000_0100;
        /// Meta / Command / Super.
        const META    = 0b0000_1000;
    }
}

/// Press/release/typed phase of a key event.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum KeyState {
    /// Key went down.
    #[default]
    Pressed,
    /// Key went up.
    Released,
    /// Character produced.
    Typed,
}

/// A raw key event awaiting delivery to the focus owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    /// Time the native layer observed the key.
    pub when: Timestamp,
    /// Logical key (for example `"a"`, `"Enter"`, `"ArrowUp"`).
    pub key: String,
    /// Phase of the key.
    pub state: KeyState,
    /// Held modifiers.
    pub modifiers: Modifiers,
}

impl KeyEvent {
    /// A key press stamped at `when`.
    pub fn pressed(when: Timestamp, key: impl Into<String>) -> Self {
        Self {
            when,
            key: key.into(),
            state: KeyState::Pressed,
            modifiers: Modifiers::empty(),
        }
    }

    /// Replace the modifiers.
    #[must_use]
    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Replace the key phase.
    #[must_use]
    pub fn with_state(mut self, state: KeyState) -> Self {
        self.state = state;
        self
    }
}

/// Payload of surface focus and activation events.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SurfaceEvent {
    /// Surface the event is about.
    pub surface: ElementId,
    /// The other party of the transfer, if known.
    pub opposite: Option<ElementId>,
}

impl SurfaceEvent {
    /// Event for `surface` with the given counterpart.
    pub const fn new(surface: ElementId, opposite: Option<ElementId>) -> Self {
        Self { surface, opposite }
    }
}

/// Payload of element focus events.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ElementEvent {
    /// Element gaining or losing focus.
    pub element: ElementId,
    /// The other party of the transfer, if known.
    pub opposite: Option<ElementId>,
    /// Transient transfer (for example, focus moving to another surface).
    pub temporary: bool,
    /// Why the transfer happened.
    pub cause: FocusCause,
}

impl ElementEvent {
    /// Permanent transfer for `element` with unknown cause and no counterpart.
    pub const fn new(element: ElementId) -> Self {
        Self {
            element,
            opposite: None,
            temporary: false,
            cause: FocusCause::Unknown,
        }
    }

    /// Set the counterpart.
    #[must_use]
    pub const fn with_opposite(mut self, opposite: Option<ElementId>) -> Self {
        self.opposite = opposite;
        self
    }

    /// Mark the transfer as temporary.
    #[must_use]
    pub const fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    /// Set the cause.
    #[must_use]
    pub const fn with_cause(mut self, cause: FocusCause) -> Self {
        self.cause = cause;
        self
    }
}

/// Every event the dispatch state machine understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FocusEvent {
    /// A surface became the focused surface.
    SurfaceGainedFocus(SurfaceEvent),
    /// A surface became the active surface.
    SurfaceActivated(SurfaceEvent),
    /// A surface stopped being the active surface.
    SurfaceDeactivated(SurfaceEvent),
    /// A surface stopped being the focused surface.
    SurfaceLostFocus(SurfaceEvent),
    /// An element became the focus owner.
    ElementGainedFocus(ElementEvent),
    /// An element stopped being the focus owner.
    ElementLostFocus(ElementEvent),
    /// Raw keyboard input.
    Key(KeyEvent),
}

impl FocusEvent {
    /// The element or surface this event is addressed to, if any.
    ///
    /// Key events are addressed to whoever owns focus when they are released,
    /// so they have no fixed target.
    pub fn target(&self) -> Option<ElementId> {
        match self {
            Self::SurfaceGainedFocus(e)
            | Self::SurfaceActivated(e)
            | Self::SurfaceDeactivated(e)
            | Self::SurfaceLostFocus(e) => Some(e.surface),
            Self::ElementGainedFocus(e) | Self::ElementLostFocus(e) => Some(e.element),
            Self::Key(_) => None,
        }
    }

    /// The counterpart of the transfer, if any.
    pub fn opposite(&self) -> Option<ElementId> {
        match self {
            Self::SurfaceGainedFocus(e)
            | Self::SurfaceActivated(e)
            | Self::SurfaceDeactivated(e)
            | Self::SurfaceLostFocus(e) => e.opposite,
            Self::ElementGainedFocus(e) | Self::ElementLostFocus(e) => e.opposite,
            Self::Key(_) => None,
        }
    }

    /// Returns `true` for raw key input.
    pub fn is_key(&self) -> bool {
        matches!(self, Self::Key(_))
    }
}

/// Result of running one event through the state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Transition {
    /// The requested state change took effect (or the key was delivered or held).
    Applied,
    /// The change did not stick; rollback has already run.
    Rejected,
    /// The event required no change (duplicate, stale, or relay artifact).
    Ignored,
}

/// Nesting depth of synchronous relays.
///
/// Top-level events are dispatched at [`RelayDepth::TOP`]; events the state
/// machine synthesizes and delivers to itself run one level deeper.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RelayDepth(u32);

impl RelayDepth {
    /// A fresh event from the native layer.
    pub const TOP: Self = Self(0);

    /// One relay level below `self`.
    #[must_use]
    pub const fn deeper(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns `true` when dispatching inside a relay.
    pub const fn is_relay(self) -> bool {
        self.0 > 0
    }

    /// Raw nesting level.
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Propagation outcome returned by key dispatch hooks.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Outcome {
    /// Keep going: later hooks and the focus owner still see the key.
    Continue,
    /// Consume the key; nothing after this hook sees it.
    Stop,
}
