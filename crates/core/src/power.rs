// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::SimTime;
use dpm_ir::{PowerState, TransitionClass, DELAY_CLASSES};
use std::ops::{Index, IndexMut};

/// Delay applied to every transition class until software configures it.
pub const DEFAULT_DELAY: u64 = 1;

/// Per-component transition delays, indexed by [`TransitionClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DelayTable([u64; DELAY_CLASSES]);

impl Default for DelayTable {
    fn default() -> Self {
        Self([DEFAULT_DELAY; DELAY_CLASSES])
    }
}

impl DelayTable {
    pub fn new(values: [u64; DELAY_CLASSES]) -> Self {
        Self(values)
    }

    pub fn get(&self, class: TransitionClass) -> u64 {
        self.0[class.index()]
    }

    pub fn set(&mut self, class: TransitionClass, ticks: u64) {
        self.0[class.index()] = ticks;
    }

    pub fn as_array(&self) -> [u64; DELAY_CLASSES] {
        self.0
    }
}

impl Index<TransitionClass> for DelayTable {
    type Output = u64;

    fn index(&self, class: TransitionClass) -> &u64 {
        &self.0[class.index()]
    }
}

impl IndexMut<TransitionClass> for DelayTable {
    fn index_mut(&mut self, class: TransitionClass) -> &mut u64 {
        &mut self.0[class.index()]
    }
}

/// Picks the delay class for a requested transition.
///
/// ON is reached either from OFF or, for every other origin, through the clock-gated
/// wake-up path. Any request for OFF pays the ON to OFF delay and any request for
/// CLOCK_GATED pays the ON to CLOCK_GATED delay.
pub fn transition_class(current: PowerState, target: PowerState) -> TransitionClass {
    match target {
        PowerState::On if current == PowerState::Off => TransitionClass::OffOn,
        PowerState::On => TransitionClass::ClockGatedOn,
        PowerState::Off => TransitionClass::OnOff,
        PowerState::ClockGated => TransitionClass::OnClockGated,
    }
}

/// An accepted transition waiting for its delay to elapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PendingTransition {
    pub target: PowerState,
    pub class: TransitionClass,
    pub requested_at: SimTime,
    pub fire_at: SimTime,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "Last change of {component} is still in progress ({pending} due at {fire_at}), request for {requested} dropped"
)]
pub struct TransitionRejected {
    pub component: String,
    pub requested: PowerState,
    pub pending: PowerState,
    pub fire_at: SimTime,
}

/// One component under power management and its timed state machine.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ManagedComponent {
    name: String,
    slot_index: usize,
    delays: DelayTable,
    state: PowerState,
    pending: Option<PendingTransition>,
    voltage: Option<f32>,
}

impl ManagedComponent {
    pub fn new(name: impl Into<String>, slot_index: usize, initial: PowerState) -> Self {
        Self {
            name: name.into(),
            slot_index,
            delays: DelayTable::default(),
            state: initial,
            pending: None,
            voltage: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn pending(&self) -> Option<&PendingTransition> {
        self.pending.as_ref()
    }

    pub fn delays(&self) -> &DelayTable {
        &self.delays
    }

    pub fn voltage(&self) -> Option<f32> {
        self.voltage
    }

    /// Computes the transition a request would start, without committing it.
    pub fn plan_transition(
        &self,
        now: SimTime,
        target: PowerState,
    ) -> Result<PendingTransition, TransitionRejected> {
        if let Some(pending) = &self.pending {
            return Err(TransitionRejected {
                component: self.name.clone(),
                requested: target,
                pending: pending.target,
                fire_at: pending.fire_at,
            });
        }

        let class = transition_class(self.state, target);
        Ok(PendingTransition {
            target,
            class,
            requested_at: now,
            fire_at: now.saturating_add(self.delays[class]),
        })
    }

    /// Records a planned transition once the scheduler has accepted it.
    pub fn commit(&mut self, transition: PendingTransition) {
        debug_assert!(self.pending.is_none());
        self.pending = Some(transition);
    }

    /// Applies the pending transition on expiry. Returns the new state.
    pub fn complete(&mut self, target: PowerState) -> PowerState {
        if let Some(pending) = self.pending.take() {
            debug_assert_eq!(pending.target, target);
        }
        self.state = target;
        target
    }

    /// Sets the state directly, leaving any pending transition untouched.
    ///
    /// Used by the periodic toggler, which is not subject to the request guard.
    pub fn force_state(&mut self, state: PowerState) {
        self.state = state;
    }

    /// Updates one delay entry. Transitions already pending keep their fire time.
    pub fn set_delay(&mut self, class: TransitionClass, ticks: u64) {
        self.delays[class] = ticks;
    }

    pub fn set_voltage(&mut self, voltage: f32) {
        self.voltage = Some(voltage);
    }
}
