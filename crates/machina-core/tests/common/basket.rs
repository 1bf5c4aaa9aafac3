// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shopping-basket behavior used by the scenario tests.
//!
//! The machine mirrors the classic basket lifecycle: `Created` clears
//! itself into `Empty`; a `Change` moves to `Changed` and schedules a
//! `Timeout` to self; `Checkout` re-schedules it; `Payment` reaches `Paid`
//! and cancels the pending timeout; an undelivered basket times out into
//! `TimedOut`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use machina_core::error::BehaviorError;
use machina_core::{Behavior, Clock, Event, Machine, Signal, SystemClock};

/// Stable class name the basket is persisted under.
pub const BASKET_CLASS: &str = "shop.Basket";

pub const CLEAR: &str = "basket.Clear";
pub const CHANGE: &str = "basket.Change";
pub const CHECKOUT: &str = "basket.Checkout";
pub const PAYMENT: &str = "basket.Payment";
pub const TIMEOUT: &str = "basket.Timeout";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub sku: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Basket {
    pub items: Vec<Item>,
}

pub fn clear() -> Event {
    Event::custom(CLEAR, Value::Null)
}

pub fn change(items: &[Item]) -> Event {
    Event::custom(
        CHANGE,
        serde_json::json!({ "items": serde_json::to_value(items).unwrap() }),
    )
}

pub fn checkout() -> Event {
    Event::custom(CHECKOUT, Value::Null)
}

pub fn payment() -> Event {
    Event::custom(PAYMENT, Value::Null)
}

pub fn timeout() -> Event {
    Event::custom(TIMEOUT, Value::Null)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    // Pre-initial, only ever observed before the creation event.
    New,
    Created,
    Empty,
    Changed,
    CheckedOut,
    Paid,
    TimedOut,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::New => "New",
            State::Created => "Created",
            State::Empty => "Empty",
            State::Changed => "Changed",
            State::CheckedOut => "CheckedOut",
            State::Paid => "Paid",
            State::TimedOut => "TimedOut",
        }
    }

    fn parse(name: &str) -> Option<State> {
        match name {
            "Created" => Some(State::Created),
            "Empty" => Some(State::Empty),
            "Changed" => Some(State::Changed),
            "CheckedOut" => Some(State::CheckedOut),
            "Paid" => Some(State::Paid),
            "TimedOut" => Some(State::TimedOut),
            _ => None,
        }
    }
}

/// Behavior for [`BASKET_CLASS`].
///
/// `timeout_ms` controls how far ahead the basket schedules its `Timeout`;
/// production would use a day, tests use milliseconds.
pub struct BasketBehavior {
    clock: Arc<dyn Clock>,
    timeout_ms: i64,
}

impl BasketBehavior {
    pub fn new(timeout_ms: i64) -> Self {
        BasketBehavior {
            clock: Arc::new(SystemClock),
            timeout_ms,
        }
    }
}

impl Default for BasketBehavior {
    fn default() -> Self {
        // one day
        Self::new(86_400_000)
    }
}

impl Behavior for BasketBehavior {
    fn create(&self, id: &str) -> Box<dyn Machine> {
        Box::new(BasketMachine {
            id: id.to_string(),
            state: State::New,
            entity: None,
            clock: Arc::clone(&self.clock),
            timeout_ms: self.timeout_ms,
            outbox_self: Vec::new(),
            outbox_other: Vec::new(),
        })
    }

    fn rehydrate(
        &self,
        id: &str,
        entity: Value,
        state: &str,
    ) -> Result<Box<dyn Machine>, BehaviorError> {
        let state = State::parse(state).ok_or_else(|| BehaviorError::UnknownState {
            class: BASKET_CLASS.to_string(),
            state: state.to_string(),
        })?;
        let basket: Basket =
            serde_json::from_value(entity).map_err(|e| BehaviorError::InvalidEntity {
                class: BASKET_CLASS.to_string(),
                message: e.to_string(),
            })?;
        Ok(Box::new(BasketMachine {
            id: id.to_string(),
            state,
            entity: Some(basket),
            clock: Arc::clone(&self.clock),
            timeout_ms: self.timeout_ms,
            outbox_self: Vec::new(),
            outbox_other: Vec::new(),
        }))
    }

    fn from_state(&self, state: &str) -> Result<String, BehaviorError> {
        State::parse(state)
            .map(|s| s.name().to_string())
            .ok_or_else(|| BehaviorError::UnknownState {
                class: BASKET_CLASS.to_string(),
                state: state.to_string(),
            })
    }
}

pub struct BasketMachine {
    id: String,
    state: State,
    entity: Option<Basket>,
    clock: Arc<dyn Clock>,
    timeout_ms: i64,
    outbox_self: Vec<Event>,
    outbox_other: Vec<Signal>,
}

impl BasketMachine {
    fn schedule_timeout(&mut self) {
        let fire_at = self.clock.now() + self.timeout_ms;
        self.outbox_other
            .push(Signal::at(BASKET_CLASS, self.id.clone(), timeout(), fire_at));
    }

    fn cancel_timeout(&mut self) {
        self.outbox_other.push(Signal::to(
            BASKET_CLASS,
            self.id.clone(),
            Event::CancelTimedSignal {
                from_class: BASKET_CLASS.to_string(),
                from_id: self.id.clone(),
            },
        ));
    }

    fn parse_items(body: &Value) -> Vec<Item> {
        body.get("items")
            .cloned()
            .and_then(|items| serde_json::from_value(items).ok())
            .unwrap_or_default()
    }
}

impl Machine for BasketMachine {
    fn class(&self) -> &str {
        BASKET_CLASS
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn signal(mut self: Box<Self>, event: &Event) -> Result<Box<dyn Machine>, BehaviorError> {
        match (self.state, event) {
            (State::New, Event::Create) => {
                self.state = State::Created;
                self.entity = Some(Basket::default());
                self.outbox_self.push(clear());
            }
            (State::Created, Event::Custom { class, .. }) if class == CLEAR => {
                self.state = State::Empty;
            }
            (State::Empty | State::Changed, Event::Custom { class, body })
                if class == CHANGE =>
            {
                let items = Self::parse_items(body);
                if let Some(basket) = self.entity.as_mut() {
                    basket.items = items;
                }
                self.state = State::Changed;
                if self.entity.as_ref().is_none_or(|b| b.items.is_empty()) {
                    self.outbox_self.push(clear());
                } else {
                    self.schedule_timeout();
                }
            }
            (State::Changed | State::TimedOut, Event::Custom { class, .. })
                if class == CLEAR =>
            {
                self.state = State::Empty;
            }
            (State::Changed, Event::Custom { class, .. }) if class == CHECKOUT => {
                self.state = State::CheckedOut;
                self.schedule_timeout();
            }
            (State::Changed | State::CheckedOut, Event::Custom { class, .. })
                if class == TIMEOUT =>
            {
                self.state = State::TimedOut;
            }
            (State::CheckedOut, Event::Custom { class, .. }) if class == PAYMENT => {
                self.state = State::Paid;
                self.cancel_timeout();
            }
            // Anything else has no transition from the current state.
            _ => {}
        }
        Ok(self)
    }

    fn current(&self) -> Option<Value> {
        self.entity
            .as_ref()
            .map(|basket| serde_json::to_value(basket).expect("basket serializes"))
    }

    fn state(&self) -> String {
        self.state.name().to_string()
    }

    fn take_self_signals(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.outbox_self)
    }

    fn take_other_signals(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.outbox_other)
    }
}
