// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Signals and the event taxonomy.
//!
//! A [`Signal`] targets one entity instance and carries one [`Event`],
//! optionally with a fire-at time. Two events are distinguished: the
//! synthetic [`Event::Create`] delivered to entities that do not exist yet,
//! and [`Event::CancelTimedSignal`] which removes a matching delayed signal
//! before any state machine work happens. Everything else is a
//! [`Event::Custom`] tagged with its stable class name.

use serde_json::{Value, json};

use crate::error::RuntimeError;
use crate::serializer::Serializer;

/// Wire class name of the synthetic creation event.
pub const CREATE_CLASS: &str = "Create";

/// Wire class name of the cancellation event.
pub const CANCEL_TIMED_SIGNAL_CLASS: &str = "CancelTimedSignal";

/// An event targeted at an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Synthetic event delivered to a fresh entity before its first real one.
    Create,
    /// Removes the delayed signal keyed by (`from_class`, `from_id`, target).
    CancelTimedSignal {
        /// Class of the entity that scheduled the timed signal.
        from_class: String,
        /// Id of the entity that scheduled the timed signal.
        from_id: String,
    },
    /// User-defined event tagged with its stable class name.
    Custom {
        /// Stable class name persisted in signal rows.
        class: String,
        /// Event payload in serde's data model.
        body: Value,
    },
}

impl Event {
    /// Build a custom event from a class name and payload.
    pub fn custom(class: impl Into<String>, body: Value) -> Self {
        Event::Custom {
            class: class.into(),
            body,
        }
    }

    /// The stable class name this event is persisted under.
    pub fn class(&self) -> &str {
        match self {
            Event::Create => CREATE_CLASS,
            Event::CancelTimedSignal { .. } => CANCEL_TIMED_SIGNAL_CLASS,
            Event::Custom { class, .. } => class,
        }
    }

    /// Encode the event body with the configured event serializer.
    pub(crate) fn encode(&self, serializer: &dyn Serializer) -> Result<Vec<u8>, RuntimeError> {
        let body = match self {
            Event::Create => Value::Null,
            Event::CancelTimedSignal { from_class, from_id } => {
                json!({"from_cls": from_class, "from_id": from_id})
            }
            Event::Custom { body, .. } => body.clone(),
        };
        serializer.serialize(self.class(), &body)
    }

    /// Decode an event from its persisted class name and body bytes.
    pub(crate) fn decode(
        class: &str,
        bytes: &[u8],
        serializer: &dyn Serializer,
    ) -> Result<Event, RuntimeError> {
        match class {
            CREATE_CLASS => Ok(Event::Create),
            CANCEL_TIMED_SIGNAL_CLASS => {
                let body = serializer.deserialize(class, bytes)?;
                let from_class = body
                    .get("from_cls")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RuntimeError::serialization(class, "missing from_cls"))?
                    .to_string();
                let from_id = body
                    .get("from_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RuntimeError::serialization(class, "missing from_id"))?
                    .to_string();
                Ok(Event::CancelTimedSignal { from_class, from_id })
            }
            _ => Ok(Event::Custom {
                class: class.to_string(),
                body: serializer.deserialize(class, bytes)?,
            }),
        }
    }
}

/// An event addressed to one entity instance, optionally timed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// Target entity class name.
    pub class: String,
    /// Target entity id.
    pub id: String,
    /// The event to deliver.
    pub event: Event,
    /// Delivery time in epoch milliseconds; `None` delivers as soon as possible.
    pub fire_at: Option<i64>,
}

impl Signal {
    /// A signal delivered as soon as the drain reaches it.
    pub fn to(class: impl Into<String>, id: impl Into<String>, event: Event) -> Self {
        Signal {
            class: class.into(),
            id: id.into(),
            event,
            fire_at: None,
        }
    }

    /// A signal delivered no earlier than `fire_at` (epoch milliseconds).
    pub fn at(
        class: impl Into<String>,
        id: impl Into<String>,
        event: Event,
        fire_at: i64,
    ) -> Self {
        Signal {
            class: class.into(),
            id: id.into(),
            event,
            fire_at: Some(fire_at),
        }
    }
}

/// A signal paired with its durable sequence number.
///
/// This is the in-memory handle the drain scheduler works with; the number
/// is the primary key of the row backing the signal.
#[derive(Debug, Clone)]
pub(crate) struct NumberedSignal {
    pub signal: Signal,
    pub number: i64,
}
