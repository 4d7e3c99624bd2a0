// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::power::PendingTransition;
use crate::{AccessError, SimTime};
use dpm_ir::PowerState;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Hooks called by the controller as it runs. Every method defaults to a no-op.
pub trait ControllerObserver: std::fmt::Debug + Send + Sync {
    fn on_initial_state(&self, _component: &str, _state: PowerState) {}
    fn on_transition_scheduled(&self, _component: &str, _transition: &PendingTransition) {}
    fn on_state_applied(&self, _component: &str, _time: SimTime, _state: PowerState) {}
    fn on_voltage_forwarded(&self, _component: &str, _time: SimTime, _voltage: f32) {}
    fn on_access_rejected(&self, _time: SimTime, _error: &AccessError) {}
}

/// One observable change of a component's state signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StateSample {
    pub time: SimTime,
    pub value: u8,
}

/// Records the encoded state signal of every component.
///
/// Each component's trace starts with its initial value at time 0. Applying a state equal
/// to the current one still records a sample, matching a signal write.
#[derive(Debug, Default)]
pub struct StateTrace {
    samples: Mutex<BTreeMap<String, Vec<StateSample>>>,
}

impl StateTrace {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, component: &str, time: SimTime, state: PowerState) {
        if let Ok(mut samples) = self.samples.lock() {
            samples
                .entry(component.to_string())
                .or_default()
                .push(StateSample {
                    time,
                    value: state.encoding(),
                });
        }
    }

    pub fn samples(&self, component: &str) -> Vec<StateSample> {
        self.samples
            .lock()
            .ok()
            .and_then(|s| s.get(component).cloned())
            .unwrap_or_default()
    }

    pub fn all(&self) -> BTreeMap<String, Vec<StateSample>> {
        self.samples.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ControllerObserver for StateTrace {
    fn on_initial_state(&self, component: &str, state: PowerState) {
        self.record(component, 0, state);
    }

    fn on_state_applied(&self, component: &str, time: SimTime, state: PowerState) {
        self.record(component, time, state);
    }
}
