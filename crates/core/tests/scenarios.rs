// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use dpm_config::{PlatformManifest, ScheduleSpec};
use dpm_core::scheduler::ScheduleError;
use dpm_core::{
    AccessError, ControllerError, ControllerObserver, GenericDomain, Interconnect,
    PowerController, PowerRegisterMap, PowerState, Region, SimTime, TransitionClass,
};
use std::sync::{Arc, Mutex};

fn platform(names: &[&str]) -> (PowerController, Vec<GenericDomain>) {
    let map = PowerRegisterMap::allocate(names, 4).unwrap();
    let mut pm = PowerController::new("pm", map, PowerState::Off);
    let domains = names
        .iter()
        .map(|name| {
            let domain = GenericDomain::new(*name);
            pm.bind_power(name, domain.power_input()).unwrap();
            pm.bind_voltage(name, domain.voltage_input()).unwrap();
            domain
        })
        .collect();
    (pm, domains)
}

fn state_offset(pm: &PowerController, name: &str) -> u64 {
    pm.map().slot(name).unwrap().state_offset
}

#[test]
fn scenario_a_single_transition_fires_once_after_default_delay() {
    let (mut pm, domains) = platform(&["sensor1"]);

    pm.write(Region::State, state_offset(&pm, "sensor1"), 0x3)
        .unwrap();

    pm.run_until(0);
    assert!(domains[0].snapshot().power_history.is_empty());
    assert_eq!(pm.state_of("sensor1"), Some(PowerState::Off));

    pm.run_until(1);
    assert_eq!(domains[0].snapshot().power_history, vec![PowerState::On]);
    assert_eq!(pm.state_of("sensor1"), Some(PowerState::On));

    pm.run_until(100);
    assert_eq!(domains[0].snapshot().power_history, vec![PowerState::On]);
}

#[test]
fn scenario_b_request_while_pending_is_rejected() {
    let (mut pm, domains) = platform(&["sensor1"]);

    pm.write(Region::State, 0, 0x3).unwrap();
    let err = pm.write(Region::State, 0, 0x3).unwrap_err();

    let AccessError::Rejected(rejected) = &err else {
        panic!("expected a rejected transition, got {err:?}");
    };
    assert_eq!(rejected.component, "sensor1");
    assert_eq!(rejected.fire_at, 1);
    assert_eq!(pm.pending_events(), 1);

    pm.run_until(10);
    assert_eq!(domains[0].snapshot().power_history, vec![PowerState::On]);
    assert_eq!(pm.stats().accepted, 1);
    assert_eq!(pm.stats().rejected, 1);
}

#[test]
fn scenario_b_rejection_holds_until_fire_time() {
    let (mut pm, _domains) = platform(&["sensor1"]);
    pm.write(Region::DelayConfig, 4, 10).unwrap();

    pm.write(Region::State, 0, 0x3).unwrap();
    pm.run_until(5);
    assert!(pm.write(Region::State, 0, 0x1).is_err());
    assert_eq!(pm.state_of("sensor1"), Some(PowerState::Off));

    pm.run_until(9);
    assert_eq!(pm.state_of("sensor1"), Some(PowerState::Off));
    pm.run_until(10);
    assert_eq!(pm.state_of("sensor1"), Some(PowerState::On));

    // The slot is free again once the transition fired.
    assert!(pm.write(Region::State, 0, 0x1).is_ok());
}

#[test]
fn scenario_c_configured_delay_used_for_off_to_on() {
    let (mut pm, domains) = platform(&["sensor1", "sensor2"]);
    let slot = pm.map().slot("sensor2").unwrap().clone();

    pm.run_until(3);
    let off_on = slot.delay_offset(TransitionClass::OffOn, pm.map().word_size());
    pm.write(Region::DelayConfig, off_on, 5).unwrap();
    pm.write(Region::State, slot.state_offset, 0x3).unwrap();

    pm.run_until(4);
    assert_eq!(pm.state_of("sensor2"), Some(PowerState::Off));
    pm.run_until(7);
    assert_eq!(pm.state_of("sensor2"), Some(PowerState::Off));
    pm.run_until(8);
    assert_eq!(pm.state_of("sensor2"), Some(PowerState::On));
    assert!(domains[0].snapshot().power_history.is_empty());
}

#[test]
fn scenario_d_periodic_toggle_oscillates() {
    let map = PowerRegisterMap::allocate(&["host"], 4).unwrap();
    let mut pm = PowerController::new("pm", map, PowerState::Off);
    let domain = GenericDomain::new("host");
    pm.bind_power("host", domain.power_input()).unwrap();

    let spec = ScheduleSpec::from_json(
        r#"{"period": 100, "components": {"host": {"activation_time": 10, "time_on": 20}}}"#,
    )
    .unwrap();
    pm.enable_schedule(&spec).unwrap();

    pm.run_until(9);
    assert_eq!(pm.state_of("host"), Some(PowerState::Off));

    pm.run_until(350);
    let changes: Vec<_> = pm
        .trace()
        .samples("host")
        .iter()
        .map(|s| (s.time, s.value))
        .collect();
    assert_eq!(
        changes,
        vec![
            (0, 0),
            (10, 3),
            (30, 1),
            (110, 3),
            (130, 1),
            (210, 3),
            (230, 1),
            (310, 3),
            (330, 1),
        ]
    );
    assert_eq!(domain.snapshot().power_history.len(), 8);
    assert_eq!(pm.next_event_time(), Some(410));
}

#[test]
fn scenario_e_unmapped_write_mutates_nothing() {
    let (mut pm, domains) = platform(&["host", "sensor1"]);
    let before = pm.snapshot_value();

    let err = pm.write(Region::State, 0x40, 0x3).unwrap_err();
    assert!(matches!(err, AccessError::Address(_)));
    let err = pm.write(Region::DelayConfig, 0x200, 7).unwrap_err();
    assert!(matches!(err, AccessError::Address(_)));

    pm.run_until(10);
    assert_eq!(pm.pending_events(), 0);
    assert!(domains.iter().all(|d| d.snapshot().power_history.is_empty()));

    let after = pm.snapshot_value();
    assert_eq!(before["components"], after["components"]);
    assert_eq!(pm.stats().address_errors, 2);
}

#[test]
fn delay_config_is_not_retroactive() {
    let (mut pm, _domains) = platform(&["host"]);

    pm.write(Region::State, 0, 0x3).unwrap();
    pm.write(Region::DelayConfig, 4, 50).unwrap();

    pm.run_until(1);
    assert_eq!(pm.state_of("host"), Some(PowerState::On));

    pm.write(Region::State, 0, 0x0).unwrap();
    pm.run_until(2);
    assert_eq!(pm.state_of("host"), Some(PowerState::Off));

    // Only transitions requested after the write pay the new delay.
    pm.write(Region::State, 0, 0x3).unwrap();
    pm.run_until(51);
    assert_eq!(pm.state_of("host"), Some(PowerState::Off));
    pm.run_until(52);
    assert_eq!(pm.state_of("host"), Some(PowerState::On));
}

#[test]
fn voltage_writes_never_touch_state() {
    let (mut pm, domains) = platform(&["host"]);

    pm.write(Region::State, 0, 0x3).unwrap();
    let pending = pm.component("host").unwrap().pending().copied();

    pm.write(Region::Voltage, 0, 0.9f32.to_bits() as u64).unwrap();
    assert_eq!(domains[0].snapshot().voltage, Some(0.9));
    assert_eq!(pm.state_of("host"), Some(PowerState::Off));
    assert_eq!(pm.component("host").unwrap().pending().copied(), pending);
    assert_eq!(pm.pending_events(), 1);
}

#[derive(Debug, Default)]
struct ApplyOrder(Mutex<Vec<(SimTime, String)>>);

impl ControllerObserver for ApplyOrder {
    fn on_state_applied(&self, component: &str, time: SimTime, _state: PowerState) {
        self.0.lock().unwrap().push((time, component.to_string()));
    }
}

#[test]
fn same_time_events_fire_in_request_order() {
    let (mut pm, domains) = platform(&["host", "sensor1", "sensor2"]);
    let order = Arc::new(ApplyOrder::default());
    pm.add_observer(order.clone());

    for name in ["sensor2", "host", "sensor1"] {
        let offset = state_offset(&pm, name);
        pm.write(Region::State, offset, 0x3).unwrap();
    }
    pm.run_until(1);

    let applied = order.0.lock().unwrap().clone();
    assert_eq!(
        applied,
        vec![
            (1, "sensor2".to_string()),
            (1, "host".to_string()),
            (1, "sensor1".to_string())
        ]
    );
    assert!(domains
        .iter()
        .all(|d| d.snapshot().power_history == vec![PowerState::On]));
}

#[test]
fn identical_stimulus_is_deterministic() {
    let run = || {
        let (mut pm, _domains) = platform(&["host", "sensor1", "sensor2"]);
        pm.write(Region::DelayConfig, 16 + 4, 3).unwrap();
        pm.write(Region::State, 4, 0x3).unwrap();
        pm.write(Region::State, 8, 0x1).unwrap();
        pm.run_until(2);
        pm.write(Region::State, 8, 0x3).unwrap();
        pm.run_until(20);
        pm.snapshot_value()
    };
    assert_eq!(run(), run());
}

#[test]
fn interconnect_routes_absolute_addresses() {
    let map = PowerRegisterMap::allocate(&["host", "sensor1"], 4).unwrap();
    let bus = Interconnect::new(&Default::default(), &map).unwrap();
    let mut pm = PowerController::new("pm", map, PowerState::Off);

    let state_base = bus.base_of(Region::State).unwrap();
    bus.write(&mut pm, state_base + 4, 0x3).unwrap();
    pm.run_until(1);
    assert_eq!(bus.read(&mut pm, state_base + 4).unwrap(), 0x3);
    assert_eq!(bus.read(&mut pm, state_base).unwrap(), 0x0);
}

#[test]
fn manifest_builds_controller_with_schedule() {
    let dir = std::env::temp_dir().join(format!("dpm-core-manifest-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("schedule.json"),
        r#"{"period": 50, "components": {"sensor2": {"activation_time": 5, "time_on": 10}}}"#,
    )
    .unwrap();

    let manifest = PlatformManifest::from_yaml(
        r#"
name: "soc"
components:
  - id: "pm"
  - id: "host"
  - id: "sensor1"
  - id: "sensor2"
controller:
  id: "pm"
  schedule: "schedule.json"
"#,
    )
    .unwrap();
    let mut pm = PowerController::from_manifest(&manifest, &dir).unwrap();

    let names: Vec<_> = pm.components().iter().map(|c| c.name().to_string()).collect();
    assert_eq!(names, vec!["sensor2"]);

    pm.run_until(15);
    assert_eq!(pm.state_of("sensor2"), Some(PowerState::ClockGated));
    assert_eq!(pm.stats().toggles, 2);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn manifest_rejects_duplicate_components() {
    let manifest = PlatformManifest::from_yaml(
        r#"
name: "soc"
controller:
  id: "pm"
  components: ["host", "sensor1", "host"]
"#,
    )
    .unwrap();
    let err = PowerController::from_manifest(&manifest, std::path::Path::new(".")).unwrap_err();
    assert!(matches!(err, ControllerError::DuplicateComponent(name) if name == "host"));
}

#[test]
fn toggle_in_the_past_is_refused() {
    let map = PowerRegisterMap::allocate(&["host"], 4).unwrap();
    let mut pm = PowerController::new("pm", map, PowerState::Off);
    pm.run_until(50);

    let spec = ScheduleSpec::from_json(
        r#"{"period": 100, "components": {"host": {"activation_time": 10, "time_on": 20}}}"#,
    )
    .unwrap();
    let err = pm.enable_schedule(&spec).unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Schedule(ScheduleError::InPast { at: 10, now: 50 })
    ));
}
