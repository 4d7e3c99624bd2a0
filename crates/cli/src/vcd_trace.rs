// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use dpm_core::{ControllerObserver, PowerState, SimTime};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use vcd::{IdCode, TimescaleUnit, Value, Writer};

const STATE_WIDTH: u32 = 2;

/// Streams the state signal of every managed component to a VCD file.
pub struct VcdObserver {
    state: Mutex<VcdState>,
    ids: HashMap<String, IdCode>,
}

struct VcdState {
    writer: Option<Writer<BufWriter<File>>>,
    current_time: SimTime,
}

impl VcdObserver {
    pub fn new(path: std::path::PathBuf, module: &str, components: &[String]) -> anyhow::Result<Self> {
        let file = File::create(path)?;
        let buf = BufWriter::new(file);
        let mut writer = Writer::new(buf);

        writer.timescale(1, TimescaleUnit::NS)?;
        writer.add_module(module)?;
        let mut ids = HashMap::with_capacity(components.len());
        for name in components {
            let id = writer.add_wire(STATE_WIDTH, &format!("{}_state", name))?;
            ids.insert(name.clone(), id);
        }
        writer.upscope()?;
        writer.enddefinitions()?;
        writer.timestamp(0)?;

        Ok(Self {
            state: Mutex::new(VcdState {
                writer: Some(writer),
                current_time: 0,
            }),
            ids,
        })
    }

    fn change(&self, component: &str, time: SimTime, state: PowerState) {
        let Some(id) = self.ids.get(component) else {
            return;
        };
        if let Ok(mut s) = self.state.lock() {
            let advance = time > s.current_time;
            if advance {
                s.current_time = time;
            }
            let Some(writer) = s.writer.as_mut() else {
                return;
            };
            if let Err(e) = write_change(writer, advance.then_some(time), *id, state) {
                tracing::warn!("Failed to write VCD change of {} at {}: {}", component, time, e);
            }
        }
    }

    /// Writes the final timestamp and closes the file. Later changes are ignored.
    pub fn finish(&self, end_time: SimTime) -> anyhow::Result<()> {
        let mut s = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("VCD writer lock poisoned"))?;
        let current = s.current_time;
        if let Some(mut writer) = s.writer.take() {
            if end_time > current {
                writer.timestamp(end_time)?;
            }
            writer.writer().flush()?;
        }
        s.current_time = s.current_time.max(end_time);
        Ok(())
    }
}

fn write_change(
    writer: &mut Writer<BufWriter<File>>,
    timestamp: Option<SimTime>,
    id: IdCode,
    state: PowerState,
) -> std::io::Result<()> {
    if let Some(time) = timestamp {
        writer.timestamp(time)?;
    }
    writer.change_vector(id, u64_to_vec(state.encoding() as u64, STATE_WIDTH))
}

// Helper to convert u64 to Vec<Value> (MSB first)
fn u64_to_vec(val: u64, width: u32) -> Vec<Value> {
    let mut bits = Vec::with_capacity(width as usize);
    for i in (0..width).rev() {
        let bit = (val >> i) & 1;
        bits.push(if bit == 1 { Value::V1 } else { Value::V0 });
    }
    bits
}

impl core::fmt::Debug for VcdObserver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "VcdObserver")
    }
}

impl ControllerObserver for VcdObserver {
    fn on_initial_state(&self, component: &str, state: PowerState) {
        self.change(component, 0, state);
    }

    fn on_state_applied(&self, component: &str, time: SimTime, state: PowerState) {
        self.change(component, time, state);
    }
}
