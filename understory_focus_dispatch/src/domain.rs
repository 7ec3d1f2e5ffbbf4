// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The injected shared state of a process: one focus registry plus the table of
//! isolation contexts that share it.

use std::sync::Arc;

use crate::context::ContextTable;
use crate::registry::FocusRegistry;

/// Shared registry and context table.
///
/// Every [`FocusManager`](crate::manager::FocusManager) is built against a
/// domain; managers of different contexts in the same domain arbitrate over
/// the same registry.
#[derive(Debug, Default)]
pub struct FocusDomain {
    registry: FocusRegistry,
    contexts: ContextTable,
}

impl FocusDomain {
    /// Empty domain.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The shared focus registry.
    pub fn registry(&self) -> &FocusRegistry {
        &self.registry
    }

    /// The isolation contexts of this domain.
    pub fn contexts(&self) -> &ContextTable {
        &self.contexts
    }
}
