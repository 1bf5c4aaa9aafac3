// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-class FSM adapters.
//!
//! A [`Behavior`] knows how to build state machines for one entity class:
//! fresh ones for entities that have never been signalled, and rehydrated
//! ones positioned at a persisted state. The runtime resolves behaviors
//! through a [`BehaviorRegistry`] keyed by stable class-name strings; class
//! names are persisted in entity and signal rows, so renaming a class
//! without migrating the store breaks rehydration.
//!
//! Behaviors are expected to be referentially transparent: their only
//! channel back into the runtime is the signals their machines emit.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{BehaviorError, RuntimeError};
use crate::signal::{Event, Signal};

/// A state machine instance for one entity.
///
/// Transitions are pure: [`Machine::signal`] consumes the machine and
/// returns its successor. Emissions accumulate in outboxes that
/// [`Machine::take_self_signals`] and [`Machine::take_other_signals`] drain:
/// each call returns every emission not yet retrieved, in emission order.
/// Draining rather than peeking is what lets the apply engine pick up
/// creation-time emissions after the first real event without delivering
/// anything twice.
pub trait Machine: Send {
    /// Entity class name of this machine.
    fn class(&self) -> &str;

    /// Entity id of this machine.
    fn id(&self) -> &str;

    /// Apply one event, producing the successor machine.
    ///
    /// Events with no transition from the current state are ignored (the
    /// machine returns itself unchanged, emitting nothing).
    fn signal(self: Box<Self>, event: &Event) -> Result<Box<dyn Machine>, BehaviorError>;

    /// Entity snapshot, absent until some transition has produced one.
    fn current(&self) -> Option<Value>;

    /// Persisted name of the current state.
    fn state(&self) -> String;

    /// Drain events this machine wants delivered to itself, in emission order.
    fn take_self_signals(&mut self) -> Vec<Event>;

    /// Drain signals to other entities, in emission order.
    fn take_other_signals(&mut self) -> Vec<Signal>;
}

/// Adapter between the byte-opaque runtime and one entity class's FSM.
pub trait Behavior: Send + Sync {
    /// A fresh machine for an entity that has never been signalled.
    ///
    /// The machine has not yet seen [`Event::Create`]; the runtime delivers
    /// that immediately after construction.
    fn create(&self, id: &str) -> Box<dyn Machine>;

    /// A machine positioned at a persisted state with an entity snapshot.
    fn rehydrate(
        &self,
        id: &str,
        entity: Value,
        state: &str,
    ) -> Result<Box<dyn Machine>, BehaviorError>;

    /// Parse a persisted state name back into its canonical form.
    ///
    /// Returns [`BehaviorError::UnknownState`] for names this behavior does
    /// not recognize; the canonical name round-trips through
    /// [`Behavior::rehydrate`].
    fn from_state(&self, state: &str) -> Result<String, BehaviorError>;
}

/// Maps stable entity class names to their behaviors.
#[derive(Clone, Default)]
pub struct BehaviorRegistry {
    behaviors: HashMap<String, Arc<dyn Behavior>>,
}

impl BehaviorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a behavior for `class`, replacing any previous registration.
    pub fn register(mut self, class: impl Into<String>, behavior: Arc<dyn Behavior>) -> Self {
        self.behaviors.insert(class.into(), behavior);
        self
    }

    /// Resolve the behavior for `class`.
    pub fn resolve(&self, class: &str) -> Result<&Arc<dyn Behavior>, RuntimeError> {
        self.behaviors
            .get(class)
            .ok_or_else(|| RuntimeError::BehaviorResolution {
                class: class.to_string(),
            })
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}

impl std::fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut classes: Vec<&str> = self.behaviors.keys().map(String::as_str).collect();
        classes.sort_unstable();
        f.debug_struct("BehaviorRegistry")
            .field("classes", &classes)
            .finish()
    }
}
