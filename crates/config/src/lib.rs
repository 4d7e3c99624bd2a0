// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use dpm_ir::PowerState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_controller_id() -> String {
    "pm".to_string()
}

fn default_word_size() -> u64 {
    dpm_ir::DEFAULT_WORD_SIZE
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn read_file(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSchedule {
    pub activation_time: u64,
    pub time_on: u64,
}

/// Declarative schedule for the periodic toggle mode.
///
/// ```json
/// {"period": 100, "components": {"host": {"activation_time": 10, "time_on": 20}}}
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub period: u64,
    pub components: BTreeMap<String, ComponentSchedule>,
}

impl ScheduleSpec {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading schedule from {:?}", path);
        Self::from_json(&read_file(path)?)
    }

    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.period == 0 {
            return Err(invalid("Schedule 'period' must be greater than zero"));
        }
        for (name, entry) in &self.components {
            if entry.time_on == 0 {
                return Err(invalid(format!(
                    "Schedule entry '{}' must have a non-zero 'time_on'",
                    name
                )));
            }
            if entry.time_on >= self.period {
                return Err(invalid(format!(
                    "Schedule entry '{}' has 'time_on' {} not shorter than period {}",
                    name, entry.time_on, self.period
                )));
            }
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ComponentSchedule> {
        self.components.get(name)
    }
}

/// Declarative power draw of a component in each state, in watts.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct PowerCoefficients {
    #[serde(default)]
    pub on: f64,
    #[serde(default)]
    pub clock_gated: f64,
    #[serde(default)]
    pub off: f64,
}

impl PowerCoefficients {
    pub fn for_state(&self, state: PowerState) -> f64 {
        match state {
            PowerState::On => self.on,
            PowerState::ClockGated => self.clock_gated,
            PowerState::Off => self.off,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ComponentDescriptor {
    pub id: String,
    #[serde(default)]
    pub power: PowerCoefficients,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum RegionSize {
    Bytes(u64),
    Human(String), // e.g. "4KB"
}

impl RegionSize {
    pub fn bytes(&self) -> ConfigResult<u64> {
        match self {
            RegionSize::Bytes(n) => Ok(*n),
            RegionSize::Human(s) => parse_size(s),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RegionWindow {
    pub base: u64,
    pub size: RegionSize,
}

impl RegionWindow {
    fn new(base: u64, size: u64) -> Self {
        Self {
            base,
            size: RegionSize::Bytes(size),
        }
    }
}

/// Absolute windows the interconnect maps onto the controller.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RegionLayout {
    pub state: RegionWindow,
    pub voltage: RegionWindow,
    pub delay_config: RegionWindow,
    pub power_report: RegionWindow,
}

impl Default for RegionLayout {
    fn default() -> Self {
        Self {
            state: RegionWindow::new(0x2000_4000, 0x1000),
            voltage: RegionWindow::new(0x2000_5000, 0x1000),
            power_report: RegionWindow::new(0x2000_6000, 0x10),
            delay_config: RegionWindow::new(0x2000_7000, 0x1000),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControllerConfig {
    #[serde(default = "default_controller_id")]
    pub id: String,
    /// Explicit managed component list. Used verbatim when present.
    #[serde(default)]
    pub components: Option<Vec<String>>,
    #[serde(default = "default_word_size")]
    pub word_size: u64,
    #[serde(default)]
    pub initial_state: PowerState,
    /// Schedule file path, relative to the manifest.
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub regions: RegionLayout,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            id: default_controller_id(),
            components: None,
            word_size: default_word_size(),
            initial_state: PowerState::Off,
            schedule: None,
            regions: RegionLayout::default(),
        }
    }
}

/// Describes the platform a power manager is instantiated in.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlatformManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    /// Sibling components known to the parent context, in declaration order.
    #[serde(default)]
    pub components: Vec<ComponentDescriptor>,
    #[serde(default)]
    pub controller: ControllerConfig,
}

impl PlatformManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading platform manifest from {:?}", path);
        Self::from_yaml(&read_file(path)?)
    }

    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let manifest: Self = serde_yaml::from_str(yaml)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.schema_version != "1.0" {
            return Err(invalid(format!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            )));
        }
        if self.controller.id.trim().is_empty() {
            return Err(invalid("Controller 'id' cannot be empty"));
        }
        for c in &self.components {
            if c.id.trim().is_empty() {
                return Err(invalid("Component 'id' cannot be empty"));
            }
        }
        Ok(())
    }

    /// Names of the sibling components, in declaration order.
    pub fn sibling_names(&self) -> Vec<String> {
        self.components.iter().map(|c| c.id.clone()).collect()
    }

    pub fn coefficients(&self, name: &str) -> PowerCoefficients {
        self.components
            .iter()
            .find(|c| c.id == name)
            .map(|c| c.power)
            .unwrap_or_default()
    }

    /// Loads the schedule referenced by the controller, resolving it against `manifest_dir`.
    pub fn load_schedule(&self, manifest_dir: &Path) -> ConfigResult<Option<ScheduleSpec>> {
        let Some(schedule) = &self.controller.schedule else {
            return Ok(None);
        };
        ScheduleSpec::from_file(manifest_dir.join(schedule)).map(Some)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Read,
    Write,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum RegisterValue {
    Int(u64),
    Float(f64),
}

impl RegisterValue {
    /// The raw word written on the bus. Floats travel as `f32` bits.
    pub fn as_word(&self) -> u64 {
        match self {
            RegisterValue::Int(v) => *v,
            RegisterValue::Float(v) => (*v as f32).to_bits() as u64,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StimulusStep {
    pub at: u64,
    pub access: AccessKind,
    pub addr: u64,
    #[serde(default)]
    pub value: Option<RegisterValue>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StimulusLimits {
    pub max_time: u64,
}

/// A timed sequence of register accesses replayed against the controller.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StimulusScript {
    pub schema_version: String,
    pub limits: StimulusLimits,
    #[serde(default)]
    pub steps: Vec<StimulusStep>,
}

impl StimulusScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        Self::from_yaml(&read_file(path.as_ref())?)
    }

    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let script: Self = serde_yaml::from_str(yaml)?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.schema_version != "1.0" {
            return Err(invalid(format!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            )));
        }

        if self.limits.max_time == 0 {
            return Err(invalid("Limit 'max_time' must be greater than zero"));
        }

        let mut last = 0;
        for (i, step) in self.steps.iter().enumerate() {
            if step.at < last {
                return Err(invalid(format!(
                    "Step {} at time {} is earlier than the previous step",
                    i, step.at
                )));
            }
            if step.at > self.limits.max_time {
                return Err(invalid(format!(
                    "Step {} at time {} is past 'max_time'",
                    i, step.at
                )));
            }
            if step.access == AccessKind::Write && step.value.is_none() {
                return Err(invalid(format!("Write step {} has no 'value'", i)));
            }
            last = step.at;
        }

        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> ConfigResult<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| invalid(format!("Invalid size format '{}': {}", size_str, e)))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
