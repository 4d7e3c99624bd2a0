// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::scheduler::{EventScheduler, ScheduleError};
use crate::SimTime;
use dpm_config::ScheduleSpec;
use dpm_ir::{PowerRegisterMap, PowerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleEntry {
    pub slot: usize,
    pub activation_time: SimTime,
    pub time_on: u64,
}

/// Free-running ON / CLOCK_GATED oscillator for the components listed in a schedule.
///
/// Each listed component is switched ON at its activation time, back to CLOCK_GATED
/// `time_on` ticks later, and ON again at the start of the next period.
#[derive(Debug, Clone)]
pub struct PeriodicToggler {
    period: u64,
    entries: Vec<ToggleEntry>,
}

impl PeriodicToggler {
    /// Keeps the schedule entries that name a slot of `map`, in slot order.
    pub fn from_schedule(spec: &ScheduleSpec, map: &PowerRegisterMap) -> Self {
        let entries = map
            .slots()
            .iter()
            .filter_map(|slot| {
                spec.get(&slot.name).map(|entry| ToggleEntry {
                    slot: slot.slot_index,
                    activation_time: entry.activation_time,
                    time_on: entry.time_on,
                })
            })
            .collect();
        Self {
            period: spec.period,
            entries,
        }
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn entries(&self) -> &[ToggleEntry] {
        &self.entries
    }

    pub fn entry(&self, slot: usize) -> Option<&ToggleEntry> {
        self.entries.iter().find(|e| e.slot == slot)
    }

    /// Seeds the first toggle of every entry.
    pub fn arm(&self, scheduler: &mut EventScheduler) -> Result<(), ScheduleError> {
        for entry in &self.entries {
            scheduler.schedule_toggle(entry.slot, entry.activation_time)?;
        }
        Ok(())
    }

    /// State a toggle moves to from `current`.
    pub fn next_state(current: PowerState) -> PowerState {
        if current == PowerState::On {
            PowerState::ClockGated
        } else {
            PowerState::On
        }
    }

    /// Ticks until the toggle after the one that produced `applied`.
    pub fn rearm_delay(&self, entry: &ToggleEntry, applied: PowerState) -> u64 {
        if applied == PowerState::On {
            entry.time_on
        } else {
            self.period.saturating_sub(entry.time_on).max(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_follow_slot_order() {
        let spec = ScheduleSpec::from_json(
            r#"{"period": 100, "components": {"sensor1": {"activation_time": 5, "time_on": 10},
                                              "host": {"activation_time": 10, "time_on": 20}}}"#,
        )
        .unwrap();
        let map = PowerRegisterMap::allocate(&["host", "mem", "sensor1"], 4).unwrap();
        let toggler = PeriodicToggler::from_schedule(&spec, &map);

        let slots: Vec<_> = toggler.entries().iter().map(|e| e.slot).collect();
        assert_eq!(slots, vec![0, 2]);
        assert!(toggler.entry(1).is_none());
    }

    #[test]
    fn test_rearm_delays() {
        let spec = ScheduleSpec::from_json(
            r#"{"period": 100, "components": {"host": {"activation_time": 10, "time_on": 20}}}"#,
        )
        .unwrap();
        let map = PowerRegisterMap::allocate(&["host"], 4).unwrap();
        let toggler = PeriodicToggler::from_schedule(&spec, &map);
        let entry = *toggler.entry(0).unwrap();

        assert_eq!(toggler.rearm_delay(&entry, PowerState::On), 20);
        assert_eq!(toggler.rearm_delay(&entry, PowerState::ClockGated), 80);
        assert_eq!(PeriodicToggler::next_state(PowerState::Off), PowerState::On);
        assert_eq!(PeriodicToggler::next_state(PowerState::On), PowerState::ClockGated);
    }
}
