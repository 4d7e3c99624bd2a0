// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::meter::PowerMeter;
use crate::ports::{PortRegistry, WireSink};
use crate::power::{ManagedComponent, PendingTransition, TransitionRejected};
use crate::registry::resolve_components;
use crate::scheduler::{EventAction, EventScheduler, ScheduleError, ScheduledEvent};
use crate::toggle::PeriodicToggler;
use crate::trace::{ControllerObserver, StateTrace};
use crate::{AccessError, AccessResult, ControllerError, SimTime};
use dpm_config::{PlatformManifest, PowerCoefficients, ScheduleSpec};
use dpm_ir::{AddressError, DecodedRegister, PowerRegisterMap, PowerState, Region, RegisterKind};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ControllerStats {
    pub accepted: u64,
    pub rejected: u64,
    pub applied: u64,
    pub toggles: u64,
    pub voltage_writes: u64,
    pub address_errors: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ControllerSnapshot {
    pub name: String,
    pub time: SimTime,
    pub components: Vec<ManagedComponent>,
    pub capturing: bool,
    pub last_measure: f64,
    pub stats: ControllerStats,
}

/// The power manager: one timed state machine per managed component behind a register
/// block.
///
/// Register accesses are region-relative and happen at the current simulation time, which
/// only moves forward through [`PowerController::run_until`] and [`PowerController::step`].
#[derive(Debug)]
pub struct PowerController {
    name: String,
    map: PowerRegisterMap,
    components: Vec<ManagedComponent>,
    ports: PortRegistry,
    scheduler: EventScheduler,
    toggler: Option<PeriodicToggler>,
    meter: PowerMeter,
    trace: Arc<StateTrace>,
    observers: Vec<Arc<dyn ControllerObserver>>,
    stats: ControllerStats,
}

impl PowerController {
    pub fn new(name: impl Into<String>, map: PowerRegisterMap, initial: PowerState) -> Self {
        let components = map
            .slots()
            .iter()
            .map(|slot| ManagedComponent::new(slot.name.clone(), slot.slot_index, initial))
            .collect();
        let mut controller = Self {
            name: name.into(),
            ports: PortRegistry::new(&map),
            scheduler: EventScheduler::new(map.len()),
            meter: PowerMeter::new(map.len()),
            toggler: None,
            trace: Arc::new(StateTrace::new()),
            observers: Vec::new(),
            stats: ControllerStats::default(),
            components,
            map,
        };
        let trace = controller.trace.clone();
        controller.add_observer(trace);
        controller
    }

    /// Builds a controller from a platform manifest, loading its schedule relative to
    /// `manifest_dir`.
    pub fn from_manifest(
        manifest: &PlatformManifest,
        manifest_dir: &Path,
    ) -> Result<Self, ControllerError> {
        let config = &manifest.controller;
        let schedule = manifest.load_schedule(manifest_dir)?;
        let names = resolve_components(
            &manifest.sibling_names(),
            &config.id,
            config.components.as_deref(),
            schedule.as_ref(),
        )?;
        let map = PowerRegisterMap::allocate(&names, config.word_size)?;

        let mut controller = Self::new(config.id.clone(), map, config.initial_state);
        for name in &names {
            controller.set_coefficients(name, manifest.coefficients(name))?;
        }
        if let Some(schedule) = &schedule {
            controller.enable_schedule(schedule)?;
        }
        tracing::info!(
            "Power manager '{}' managing {} components",
            controller.name,
            controller.components.len()
        );
        Ok(controller)
    }

    /// Starts the periodic toggler for every listed component the map knows.
    pub fn enable_schedule(&mut self, spec: &ScheduleSpec) -> Result<(), ControllerError> {
        spec.validate()?;
        let toggler = PeriodicToggler::from_schedule(spec, &self.map);
        toggler.arm(&mut self.scheduler)?;
        tracing::info!(
            "Periodic toggler armed for {} components, period {}",
            toggler.entries().len(),
            toggler.period()
        );
        self.toggler = Some(toggler);
        Ok(())
    }

    pub fn set_coefficients(
        &mut self,
        name: &str,
        coefficients: PowerCoefficients,
    ) -> Result<(), ControllerError> {
        let slot = self.slot_of(name)?;
        self.meter.set_coefficients(slot, coefficients);
        Ok(())
    }

    /// Registers an observer. It immediately receives the current state of every component.
    pub fn add_observer(&mut self, observer: Arc<dyn ControllerObserver>) {
        for c in &self.components {
            observer.on_initial_state(c.name(), c.state());
        }
        self.observers.push(observer);
    }

    pub fn bind_power(
        &mut self,
        name: &str,
        sink: Box<dyn WireSink<PowerState>>,
    ) -> Result<(), ControllerError> {
        self.ports.bind_power(name, sink)
    }

    pub fn bind_voltage(
        &mut self,
        name: &str,
        sink: Box<dyn WireSink<f32>>,
    ) -> Result<(), ControllerError> {
        self.ports.bind_voltage(name, sink)
    }

    fn slot_of(&self, name: &str) -> Result<usize, ControllerError> {
        self.map
            .index_of(name)
            .ok_or_else(|| ControllerError::UnknownComponent(name.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn map(&self) -> &PowerRegisterMap {
        &self.map
    }

    pub fn ports(&self) -> &PortRegistry {
        &self.ports
    }

    pub fn trace(&self) -> &StateTrace {
        &self.trace
    }

    pub fn stats(&self) -> ControllerStats {
        self.stats
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn component(&self, name: &str) -> Option<&ManagedComponent> {
        self.map.index_of(name).map(|slot| &self.components[slot])
    }

    pub fn components(&self) -> &[ManagedComponent] {
        &self.components
    }

    pub fn state_of(&self, name: &str) -> Option<PowerState> {
        self.component(name).map(|c| c.state())
    }

    pub fn next_event_time(&self) -> Option<SimTime> {
        self.scheduler.next_fire_time()
    }

    pub fn pending_events(&self) -> usize {
        self.scheduler.len()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            name: self.name.clone(),
            time: self.now(),
            components: self.components.clone(),
            capturing: self.meter.is_capturing(),
            last_measure: self.meter.last_measure(),
            stats: self.stats,
        }
    }

    pub fn snapshot_value(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }

    /// Fires every event due at or before `until`, then moves time to `until`.
    pub fn run_until(&mut self, until: SimTime) {
        while let Some(evt) = self.scheduler.pop_due(until) {
            self.fire(evt);
        }
        if until > self.scheduler.now() {
            self.meter
                .advance(until, self.components.iter().map(|c| c.state()));
            self.scheduler.advance_to(until);
        }
    }

    /// Fires the earliest pending event. Returns its fire time.
    pub fn step(&mut self) -> Option<SimTime> {
        let evt = self.scheduler.pop_due(SimTime::MAX)?;
        self.fire(evt);
        Some(evt.fire_at)
    }

    fn fire(&mut self, evt: ScheduledEvent) {
        match evt.action {
            EventAction::ApplyTransition(target) => {
                self.apply_state(evt.slot, target, evt.fire_at);
                self.components[evt.slot].complete(target);
                self.stats.applied += 1;
            }
            EventAction::Toggle => {
                let next = PeriodicToggler::next_state(self.components[evt.slot].state());
                self.apply_state(evt.slot, next, evt.fire_at);
                self.components[evt.slot].force_state(next);
                self.stats.toggles += 1;
                self.rearm_toggle(evt.slot, next, evt.fire_at);
            }
        }
    }

    fn rearm_toggle(&mut self, slot: usize, applied: PowerState, at: SimTime) {
        let Some(toggler) = &self.toggler else {
            return;
        };
        let Some(entry) = toggler.entry(slot) else {
            return;
        };
        let next_at = at.saturating_add(toggler.rearm_delay(entry, applied));
        if let Err(e) = self.scheduler.schedule_toggle(slot, next_at) {
            tracing::warn!("Failed to re-arm toggle of slot {}: {}", slot, e);
        }
    }

    // Drives the output port and observers; the caller updates the component.
    fn apply_state(&mut self, slot: usize, state: PowerState, at: SimTime) {
        self.meter
            .advance(at, self.components.iter().map(|c| c.state()));

        let name = self.components[slot].name();
        tracing::debug!("{}: state set to {} at {}", name, state, at);
        for observer in &self.observers {
            observer.on_state_applied(name, at, state);
        }
        self.ports.slot_mut(slot).power.sync(state);
    }

    /// Requests a transition for the component in `slot`, as a state-control write does.
    pub fn request_transition(
        &mut self,
        slot: usize,
        target: PowerState,
    ) -> AccessResult<PendingTransition> {
        let result = self.schedule_transition(slot, target);
        self.finish(result)
    }

    fn schedule_transition(
        &mut self,
        slot: usize,
        target: PowerState,
    ) -> AccessResult<PendingTransition> {
        let now = self.scheduler.now();
        let component = self
            .components
            .get(slot)
            .ok_or(ScheduleError::UnknownSlot(slot))?;
        let plan = component.plan_transition(now, target)?;

        match self
            .scheduler
            .schedule_transition(slot, target, plan.fire_at - now)
        {
            Ok(_) => {}
            Err(ScheduleError::AlreadyPending { fire_at, .. }) => {
                return Err(TransitionRejected {
                    component: component.name().to_string(),
                    requested: target,
                    pending: component.pending().map_or(target, |p| p.target),
                    fire_at,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }

        let component = &mut self.components[slot];
        component.commit(plan);
        self.stats.accepted += 1;
        tracing::debug!(
            "{}: {:?} to {} accepted at {}, due at {}",
            component.name(),
            plan.class,
            target,
            now,
            plan.fire_at
        );
        for observer in &self.observers {
            observer.on_transition_scheduled(component.name(), &plan);
        }
        Ok(plan)
    }

    /// Handles a register write at a region-relative offset.
    pub fn write(&mut self, region: Region, offset: u64, value: u64) -> AccessResult<()> {
        let result = self.dispatch_write(region, offset, value);
        self.finish(result)
    }

    /// Handles a register read at a region-relative offset.
    pub fn read(&mut self, region: Region, offset: u64) -> AccessResult<u64> {
        let result = self.dispatch_read(region, offset);
        self.finish(result)
    }

    fn decode(&self, region: Region, offset: u64) -> AccessResult<(DecodedRegister, usize)> {
        let decoded = self.map.resolve(region, offset)?;
        let slot = match decoded.kind {
            RegisterKind::PowerReport | RegisterKind::CaptureControl => 0,
            _ => decoded
                .slot
                .ok_or(AddressError::Unmapped { region, offset })?,
        };
        Ok((decoded, slot))
    }

    fn dispatch_write(&mut self, region: Region, offset: u64, value: u64) -> AccessResult<()> {
        let (decoded, slot) = self.decode(region, offset)?;
        let now = self.scheduler.now();
        match decoded.kind {
            RegisterKind::StateControl => {
                self.schedule_transition(slot, PowerState::from_register(value))?;
            }
            RegisterKind::VoltageControl => {
                let voltage = f32::from_bits(value as u32);
                let component = &mut self.components[slot];
                component.set_voltage(voltage);
                self.stats.voltage_writes += 1;
                tracing::debug!("{}: voltage set to {} at {}", component.name(), voltage, now);
                for observer in &self.observers {
                    observer.on_voltage_forwarded(component.name(), now, voltage);
                }
                self.ports.slot_mut(slot).voltage.sync(voltage);
            }
            RegisterKind::DelayConfig(class) => {
                let component = &mut self.components[slot];
                component.set_delay(class, value);
                tracing::debug!("{}: {} delay set to {}", component.name(), class.symbol(), value);
            }
            RegisterKind::CaptureControl => {
                self.meter
                    .advance(now, self.components.iter().map(|c| c.state()));
                // Only bit 0 is decoded: 1 starts, 0 stops.
                if value & 1 == 0 {
                    self.meter.stop(now);
                } else {
                    self.meter.start(now);
                }
            }
            RegisterKind::PowerReport => return Err(AccessError::ReadOnly(decoded.kind)),
        }
        Ok(())
    }

    fn dispatch_read(&mut self, region: Region, offset: u64) -> AccessResult<u64> {
        let (decoded, slot) = self.decode(region, offset)?;
        let value = match decoded.kind {
            RegisterKind::StateControl => self.components[slot].state().encoding() as u64,
            RegisterKind::VoltageControl => self.components[slot]
                .voltage()
                .map_or(0, |v| v.to_bits() as u64),
            RegisterKind::DelayConfig(class) => self.components[slot].delays().get(class),
            RegisterKind::CaptureControl => self.meter.is_capturing() as u64,
            RegisterKind::PowerReport => self.meter.last_measure().to_bits(),
        };
        Ok(value)
    }

    fn finish<T>(&mut self, result: AccessResult<T>) -> AccessResult<T> {
        result.map_err(|e| self.reject(e))
    }

    /// Logs and counts a failed access, then hands the error back to the caller.
    pub(crate) fn reject(&mut self, error: AccessError) -> AccessError {
        let now = self.scheduler.now();
        match &error {
            AccessError::Rejected(r) => {
                self.stats.rejected += 1;
                tracing::debug!("{}", r);
            }
            other => {
                self.stats.address_errors += 1;
                tracing::warn!("{}: access rejected at {}: {}", self.name, now, other);
            }
        }
        for observer in &self.observers {
            observer.on_access_rejected(now, &error);
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GenericDomain;
    use dpm_ir::TransitionClass;

    fn controller(names: &[&str]) -> PowerController {
        let map = PowerRegisterMap::allocate(names, 4).unwrap();
        PowerController::new("pm", map, PowerState::Off)
    }

    #[test]
    fn test_state_write_applies_after_delay() {
        let mut pm = controller(&["host", "sensor1"]);
        let domain = GenericDomain::new("sensor1");
        pm.bind_power("sensor1", domain.power_input()).unwrap();

        pm.write(Region::State, 4, 0x3).unwrap();
        assert_eq!(pm.read(Region::State, 4).unwrap(), 0x0);

        pm.run_until(1);
        assert_eq!(pm.read(Region::State, 4).unwrap(), 0x3);
        assert_eq!(domain.snapshot().power_history, vec![PowerState::On]);
        assert_eq!(pm.state_of("host"), Some(PowerState::Off));
    }

    #[test]
    fn test_state_value_masked() {
        let mut pm = controller(&["host"]);
        pm.write(Region::State, 0, 0xFF).unwrap();
        pm.run_until(1);
        assert_eq!(pm.state_of("host"), Some(PowerState::On));

        pm.write(Region::State, 0, 0x2).unwrap();
        pm.run_until(2);
        assert_eq!(pm.state_of("host"), Some(PowerState::Off));
    }

    #[test]
    fn test_delay_config_round_trip() {
        let mut pm = controller(&["host", "sensor1"]);
        // sensor1, class 3 (CLOCK_GATED to ON)
        pm.write(Region::DelayConfig, 16 + 12, 42).unwrap();
        assert_eq!(pm.read(Region::DelayConfig, 28).unwrap(), 42);
        assert_eq!(
            pm.component("sensor1")
                .unwrap()
                .delays()
                .get(TransitionClass::ClockGatedOn),
            42
        );
        assert_eq!(pm.read(Region::DelayConfig, 12).unwrap(), 1);
    }

    #[test]
    fn test_voltage_forwarded_immediately() {
        let mut pm = controller(&["host"]);
        let domain = GenericDomain::new("host");
        pm.bind_voltage("host", domain.voltage_input()).unwrap();

        pm.write(Region::Voltage, 0, 1.8f32.to_bits() as u64).unwrap();
        assert_eq!(domain.snapshot().voltage, Some(1.8));
        assert_eq!(
            pm.read(Region::Voltage, 0).unwrap(),
            1.8f32.to_bits() as u64
        );
        assert_eq!(pm.pending_events(), 0);
        assert_eq!(pm.stats().voltage_writes, 1);
    }

    #[test]
    fn test_power_report_is_read_only() {
        let mut pm = controller(&["host"]);
        let err = pm.write(Region::PowerReport, 8, 1).unwrap_err();
        assert_eq!(err, AccessError::ReadOnly(RegisterKind::PowerReport));
        assert_eq!(pm.stats().address_errors, 1);
    }

    #[test]
    fn test_capture_measures_average_power() {
        let mut pm = controller(&["host"]);
        pm.set_coefficients(
            "host",
            PowerCoefficients {
                on: 4.0,
                clock_gated: 1.0,
                off: 0.0,
            },
        )
        .unwrap();

        pm.write(Region::PowerReport, 0, 1).unwrap();
        assert_eq!(pm.read(Region::PowerReport, 0).unwrap(), 1);
        pm.write(Region::State, 0, 0x3).unwrap();
        pm.run_until(10);
        pm.write(Region::PowerReport, 0, 0).unwrap();

        // OFF for 1 tick, ON for 9 ticks.
        let avg = f64::from_bits(pm.read(Region::PowerReport, 8).unwrap());
        assert!((avg - 3.6).abs() < 1e-9);
        assert_eq!(pm.read(Region::PowerReport, 0).unwrap(), 0);
    }

    #[test]
    fn test_capture_control_decodes_bit_zero() {
        let mut pm = controller(&["host"]);
        pm.write(Region::PowerReport, 0, 0x3).unwrap();
        assert_eq!(pm.read(Region::PowerReport, 0).unwrap(), 1);

        pm.run_until(5);
        pm.write(Region::PowerReport, 0, 0x2).unwrap();
        assert_eq!(pm.read(Region::PowerReport, 0).unwrap(), 0);

        pm.write(Region::PowerReport, 0, 0x2).unwrap();
        assert_eq!(pm.read(Region::PowerReport, 0).unwrap(), 0);
    }

    #[test]
    fn test_misaligned_access_rejected() {
        let mut pm = controller(&["host", "sensor1"]);
        let err = pm.write(Region::State, 2, 0x3).unwrap_err();
        assert!(matches!(
            err,
            AccessError::Address(AddressError::Misaligned { offset: 2, .. })
        ));
        assert_eq!(pm.pending_events(), 0);
    }

    #[test]
    fn test_trace_records_initial_and_applied() {
        let mut pm = controller(&["host"]);
        pm.write(Region::State, 0, 0x1).unwrap();
        pm.run_until(5);
        let samples: Vec<_> = pm
            .trace()
            .samples("host")
            .iter()
            .map(|s| (s.time, s.value))
            .collect();
        assert_eq!(samples, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_snapshot_value() {
        let mut pm = controller(&["host"]);
        pm.write(Region::State, 0, 0x3).unwrap();
        pm.write(Region::State, 0, 0x1).unwrap_err();
        pm.run_until(3);

        let snap = pm.snapshot_value();
        assert_eq!(snap["time"], 3);
        assert_eq!(snap["components"][0]["name"], "host");
        assert_eq!(snap["components"][0]["state"], "on");
        assert_eq!(snap["stats"]["accepted"], 1);
        assert_eq!(snap["stats"]["rejected"], 1);
    }

    #[test]
    fn test_unknown_component_binding() {
        let mut pm = controller(&["host"]);
        let domain = GenericDomain::new("sensor9");
        assert!(matches!(
            pm.bind_power("sensor9", domain.power_input()),
            Err(ControllerError::UnknownComponent(_))
        ));
    }
}
