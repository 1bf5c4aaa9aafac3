// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The per-signal transactional apply cycle.
//!
//! One call to [`Inner::apply`] consumes one numbered signal: it verifies
//! the signal is still queued, drives the target entity's state machine
//! through the input event and every self-signal it cascades into, and
//! persists the results. Either all of the effects commit together or none
//! do; on failure the input row survives and the work is retriable.

use std::collections::VecDeque;

use tracing::{debug, instrument};

use crate::behavior::Machine;
use crate::error::{Result, RuntimeError};
use crate::runtime::Inner;
use crate::signal::{Event, NumberedSignal, Signal};
use crate::store;

/// Outbound signals produced by one committed apply, already numbered.
#[derive(Debug, Default)]
pub(crate) struct ApplyOutcome {
    /// Non-delayed signals to offer straight back to the drain.
    pub to_offer: Vec<NumberedSignal>,
    /// Delayed signals to hand to the timer.
    pub to_schedule: Vec<NumberedSignal>,
}

impl Inner {
    /// Process one numbered signal inside a single transaction.
    #[instrument(
        skip(self, input),
        fields(class = %input.signal.class, id = %input.signal.id, seq = input.number)
    )]
    pub(crate) async fn apply(&self, input: &NumberedSignal) -> Result<ApplyOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RuntimeError::storage("begin apply transaction", e))?;

        // A previous attempt may have committed before the process died.
        let present = if input.signal.fire_at.is_some() {
            store::delayed_signal_exists(&mut tx, &self.sql, input.number).await?
        } else {
            store::signal_exists(&mut tx, &self.sql, input.number).await?
        };
        if !present {
            debug!("signal no longer queued, treating as already processed");
            return Ok(ApplyOutcome::default());
        }

        // Cancellation is handled before any state machine work.
        if let Event::CancelTimedSignal { from_class, from_id } = &input.signal.event {
            store::delete_delayed_by_key(
                &mut tx,
                &self.sql,
                from_class,
                from_id,
                &input.signal.class,
                &input.signal.id,
            )
            .await?;
            self.delete_input(&mut tx, input).await?;
            tx.commit()
                .await
                .map_err(|e| RuntimeError::storage("commit cancellation", e))?;
            debug!(%from_class, %from_id, "timed signal cancelled");
            return Ok(ApplyOutcome::default());
        }

        let behavior = self.behaviors.resolve(&input.signal.class)?;

        let stored = store::read_entity(&mut tx, &self.sql, &input.signal.class, &input.signal.id)
            .await?;
        let (mut machine, mut processed): (Box<dyn Machine>, Vec<Event>) = match stored {
            Some((bytes, state)) => {
                let entity = self
                    .entity_serializer
                    .deserialize(&input.signal.class, &bytes)?;
                let state = behavior.from_state(&state)?;
                let machine = behavior.rehydrate(&input.signal.id, entity, &state)?;
                (machine, Vec::new())
            }
            None => {
                let machine = behavior
                    .create(&input.signal.id)
                    .signal(&Event::Create)?;
                // The synthetic creation event reached the entity too, except
                // when it is itself the input (then the loop records it).
                let processed = if input.signal.event == Event::Create {
                    Vec::new()
                } else {
                    vec![Event::Create]
                };
                (machine, processed)
            }
        };

        // Cascade: self-signals are worked off head-first within this same
        // transaction, so the entity observes its own follow-up events
        // atomically. Signals to other entities only accumulate here; they
        // are delivered after commit.
        let mut to_self: VecDeque<Event> = VecDeque::new();
        to_self.push_back(input.signal.event.clone());
        let mut to_other: Vec<Signal> = Vec::new();

        while let Some(event) = to_self.pop_front() {
            machine = machine.signal(&event)?;
            for emitted in machine.take_self_signals().into_iter().rev() {
                to_self.push_front(emitted);
            }
            to_other.extend(machine.take_other_signals());
            processed.push(event);
        }

        if self.store_signals {
            for event in &processed {
                let bytes = event.encode(self.event_serializer.as_ref())?;
                store::append_signal_store(
                    &mut tx,
                    &self.sql,
                    machine.class(),
                    machine.id(),
                    event.class(),
                    &bytes,
                )
                .await?;
            }
        }

        let mut outcome = ApplyOutcome::default();
        for outbound in to_other {
            let bytes = outbound.event.encode(self.event_serializer.as_ref())?;
            match outbound.fire_at {
                None => {
                    let seq = store::enqueue_signal(
                        &mut tx,
                        &self.sql,
                        &outbound.class,
                        &outbound.id,
                        outbound.event.class(),
                        &bytes,
                    )
                    .await?;
                    outcome.to_offer.push(NumberedSignal {
                        signal: outbound,
                        number: seq,
                    });
                }
                Some(fire_at) => {
                    let seq = store::insert_delayed_signal(
                        &mut tx,
                        &self.sql,
                        machine.class(),
                        machine.id(),
                        &outbound.class,
                        &outbound.id,
                        outbound.event.class(),
                        &bytes,
                        fire_at,
                    )
                    .await?;
                    outcome.to_schedule.push(NumberedSignal {
                        signal: outbound,
                        number: seq,
                    });
                }
            }
        }

        self.delete_input(&mut tx, input).await?;

        if let Some(entity) = machine.current() {
            let bytes = self.entity_serializer.serialize(machine.class(), &entity)?;
            let state = machine.state();
            store::save_entity(&mut tx, &self.sql, machine.class(), machine.id(), &bytes, &state)
                .await?;
            let properties = (self.properties_factory)(machine.class(), &entity);
            store::save_properties(&mut tx, &self.sql, machine.class(), machine.id(), &properties)
                .await?;
        }

        tx.commit()
            .await
            .map_err(|e| RuntimeError::storage("commit apply", e))?;

        debug!(
            events = processed.len(),
            outbound = outcome.to_offer.len(),
            delayed = outcome.to_schedule.len(),
            "apply committed"
        );
        Ok(outcome)
    }

    async fn delete_input(
        &self,
        conn: &mut sqlx::SqliteConnection,
        input: &NumberedSignal,
    ) -> Result<()> {
        if input.signal.fire_at.is_some() {
            store::delete_delayed_signal(conn, &self.sql, input.number).await
        } else {
            store::delete_signal(conn, &self.sql, input.number).await
        }
    }
}
