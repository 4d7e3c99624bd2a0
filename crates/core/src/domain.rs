// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::ports::WireSink;
use dpm_ir::PowerState;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DomainState {
    pub power: Option<PowerState>,
    pub voltage: Option<f32>,
    pub power_history: Vec<PowerState>,
    pub voltage_history: Vec<f32>,
    /// True while the dynamic part of the background power is drawn.
    pub dynamic_power_active: bool,
}

/// Stand-in for an external component with power and voltage control inputs.
///
/// Dynamic power starts when the domain is switched ON and stops on any other state, the
/// same way a generic sensor model reacts to its power supply.
#[derive(Debug, Clone, Default)]
pub struct GenericDomain {
    name: String,
    state: Arc<Mutex<DomainState>>,
}

impl GenericDomain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn power_input(&self) -> Box<dyn WireSink<PowerState>> {
        Box::new(PowerInput {
            domain: self.name.clone(),
            state: self.state.clone(),
        })
    }

    pub fn voltage_input(&self) -> Box<dyn WireSink<f32>> {
        Box::new(VoltageInput {
            domain: self.name.clone(),
            state: self.state.clone(),
        })
    }

    pub fn snapshot(&self) -> DomainState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct PowerInput {
    domain: String,
    state: Arc<Mutex<DomainState>>,
}

impl WireSink<PowerState> for PowerInput {
    fn sync(&mut self, value: PowerState) {
        tracing::debug!("{}: power supply set to {}", self.domain, value);
        if let Ok(mut s) = self.state.lock() {
            s.power = Some(value);
            s.power_history.push(value);
            s.dynamic_power_active = value == PowerState::On;
        }
    }
}

#[derive(Debug)]
struct VoltageInput {
    domain: String,
    state: Arc<Mutex<DomainState>>,
}

impl WireSink<f32> for VoltageInput {
    fn sync(&mut self, value: f32) {
        tracing::debug!("{}: voltage set to {}", self.domain, value);
        if let Ok(mut s) = self.state.lock() {
            s.voltage = Some(value);
            s.voltage_history.push(value);
        }
    }
}
