// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::ControllerError;
use dpm_ir::{PowerRegisterMap, PowerState};
use std::collections::HashMap;

/// Input side of a wire, implemented by the external component that receives a value.
pub trait WireSink<T>: std::fmt::Debug + Send {
    fn sync(&mut self, value: T);
}

/// Output side of a wire owned by the controller.
///
/// An unbound master still records the last value it drove, so the controller can run
/// with only part of the platform attached.
#[derive(Debug)]
pub struct WireMaster<T> {
    name: String,
    sink: Option<Box<dyn WireSink<T>>>,
    last: Option<T>,
}

impl<T: Copy + std::fmt::Debug> WireMaster<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sink: None,
            last: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_bound(&self) -> bool {
        self.sink.is_some()
    }

    pub fn last(&self) -> Option<T> {
        self.last
    }

    /// Attaches the receiving end. A port is bound at most once.
    pub fn bind(&mut self, sink: Box<dyn WireSink<T>>) -> Result<(), ControllerError> {
        if self.sink.is_some() {
            return Err(ControllerError::PortAlreadyBound(self.name.clone()));
        }
        self.sink = Some(sink);
        Ok(())
    }

    pub fn sync(&mut self, value: T) {
        self.last = Some(value);
        match &mut self.sink {
            Some(sink) => sink.sync(value),
            None => tracing::trace!("Port {} is unbound, dropping {:?}", self.name, value),
        }
    }
}

#[derive(Debug)]
pub struct ComponentPorts {
    pub power: WireMaster<PowerState>,
    pub voltage: WireMaster<f32>,
}

/// Power and voltage outputs of every managed component, addressed by name or slot.
#[derive(Debug)]
pub struct PortRegistry {
    ports: Vec<ComponentPorts>,
    by_name: HashMap<String, usize>,
}

impl PortRegistry {
    pub fn new(map: &PowerRegisterMap) -> Self {
        let ports = map
            .slots()
            .iter()
            .map(|slot| ComponentPorts {
                power: WireMaster::new(format!("power_ctrl_{}", slot.name)),
                voltage: WireMaster::new(format!("voltage_ctrl_{}", slot.name)),
            })
            .collect();
        let by_name = map
            .slots()
            .iter()
            .map(|slot| (slot.name.clone(), slot.slot_index))
            .collect();
        Self { ports, by_name }
    }

    fn lookup(&self, name: &str) -> Result<usize, ControllerError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ControllerError::UnknownComponent(name.to_string()))
    }

    pub fn power_port(&self, name: &str) -> Option<&WireMaster<PowerState>> {
        self.by_name.get(name).map(|&idx| &self.ports[idx].power)
    }

    pub fn voltage_port(&self, name: &str) -> Option<&WireMaster<f32>> {
        self.by_name.get(name).map(|&idx| &self.ports[idx].voltage)
    }

    pub fn bind_power(
        &mut self,
        name: &str,
        sink: Box<dyn WireSink<PowerState>>,
    ) -> Result<(), ControllerError> {
        let idx = self.lookup(name)?;
        self.ports[idx].power.bind(sink)
    }

    pub fn bind_voltage(
        &mut self,
        name: &str,
        sink: Box<dyn WireSink<f32>>,
    ) -> Result<(), ControllerError> {
        let idx = self.lookup(name)?;
        self.ports[idx].voltage.bind(sink)
    }

    pub(crate) fn slot_mut(&mut self, slot: usize) -> &mut ComponentPorts {
        &mut self.ports[slot]
    }
}
