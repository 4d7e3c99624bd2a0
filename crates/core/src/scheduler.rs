// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::SimTime;
use dpm_ir::PowerState;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// Apply a register-requested transition.
    ApplyTransition(PowerState),
    /// Flip a periodically toggled component.
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub fire_at: SimTime,
    pub seq: u64,
    pub slot: usize,
    pub action: EventAction,
}

// Earliest time first, enqueue order breaks ties.
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.fire_at, self.seq).cmp(&(other.fire_at, other.seq))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Slot {slot} already has a transition due at {fire_at}")]
    AlreadyPending { slot: usize, fire_at: SimTime },
    #[error("Slot {0} is not managed by this scheduler")]
    UnknownSlot(usize),
    #[error("Cannot schedule at {at}, simulation time is already {now}")]
    InPast { at: SimTime, now: SimTime },
}

/// Time-ordered event queue shared by every managed component.
///
/// Register-requested transitions occupy their slot until they fire, so each component has
/// at most one outstanding transition. Toggle events do not occupy the slot.
#[derive(Debug)]
pub struct EventScheduler {
    now: SimTime,
    next_seq: u64,
    queue: BinaryHeap<Reverse<ScheduledEvent>>,
    outstanding: Vec<Option<SimTime>>,
}

impl EventScheduler {
    pub fn new(slots: usize) -> Self {
        Self {
            now: 0,
            next_seq: 0,
            queue: BinaryHeap::new(),
            outstanding: vec![None; slots],
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Fire time of the outstanding transition of `slot`, if any.
    pub fn pending_for(&self, slot: usize) -> Option<SimTime> {
        self.outstanding.get(slot).copied().flatten()
    }

    pub fn next_fire_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|Reverse(evt)| evt.fire_at)
    }

    /// Enqueues a transition for `slot` to fire `delay` ticks from now.
    pub fn schedule_transition(
        &mut self,
        slot: usize,
        target: PowerState,
        delay: u64,
    ) -> Result<ScheduledEvent, ScheduleError> {
        let fire_at = self.now.saturating_add(delay);
        match self.outstanding.get(slot) {
            None => return Err(ScheduleError::UnknownSlot(slot)),
            Some(Some(existing)) => {
                return Err(ScheduleError::AlreadyPending {
                    slot,
                    fire_at: *existing,
                })
            }
            Some(None) => {}
        }

        let evt = self.push(slot, fire_at, EventAction::ApplyTransition(target));
        self.outstanding[slot] = Some(fire_at);
        Ok(evt)
    }

    /// Enqueues a toggle for `slot` at absolute time `at`.
    pub fn schedule_toggle(&mut self, slot: usize, at: SimTime) -> Result<ScheduledEvent, ScheduleError> {
        if slot >= self.outstanding.len() {
            return Err(ScheduleError::UnknownSlot(slot));
        }
        if at < self.now {
            return Err(ScheduleError::InPast { at, now: self.now });
        }
        Ok(self.push(slot, at, EventAction::Toggle))
    }

    fn push(&mut self, slot: usize, fire_at: SimTime, action: EventAction) -> ScheduledEvent {
        let evt = ScheduledEvent {
            fire_at,
            seq: self.next_seq,
            slot,
            action,
        };
        self.next_seq += 1;
        self.queue.push(Reverse(evt));
        evt
    }

    /// Removes the earliest event if it is due at or before `until`.
    ///
    /// Simulation time moves to the event's fire time and the slot is released for
    /// transition events.
    pub fn pop_due(&mut self, until: SimTime) -> Option<ScheduledEvent> {
        let due = matches!(self.queue.peek(), Some(Reverse(evt)) if evt.fire_at <= until);
        if !due {
            return None;
        }

        let Reverse(evt) = self.queue.pop()?;
        self.now = self.now.max(evt.fire_at);
        if let EventAction::ApplyTransition(_) = evt.action {
            self.outstanding[evt.slot] = None;
        }
        Some(evt)
    }

    /// Moves simulation time forward. Never moves backwards.
    pub fn advance_to(&mut self, time: SimTime) {
        self.now = self.now.max(time);
    }
}
