//! Power Manager Intermediate Representation (IR)
//!
//! This crate defines the portable data structures that describe the register block of the
//! power manager. It is shared by:
//!
//! 1. **The Generator**: which renders offset tables and handler scaffolding from a map.
//! 2. **The Controller Runtime**: which decodes region-relative register accesses with it.
//!
//! A [`PowerRegisterMap`] is a pure function of the ordered component list and the word size.
//! Allocating twice from the same input yields the same map.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Default register width in bytes.
pub const DEFAULT_WORD_SIZE: u64 = 4;

/// Number of delay-config words owned by each component.
pub const DELAY_CLASSES: usize = 4;

/// Offset of the capture-control byte inside the power-report region.
pub const CAPTURE_CONTROL_OFFSET: u64 = 0x0;

/// Offset of the read-only power report value inside the power-report region.
pub const POWER_REPORT_OFFSET: u64 = 0x8;

/// Commanded operating mode of a managed power domain.
///
/// The discriminants are the register encoding written by software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PowerState {
    /// Domain is powered down.
    #[default]
    Off = 0x0,
    /// Domain is powered but its clock is stopped.
    #[serde(alias = "on_clock_gated", alias = "cg")]
    ClockGated = 0x1,
    /// Domain is fully running.
    On = 0x3,
}

impl PowerState {
    /// Decodes a state-control register value.
    ///
    /// Only the low two bits are significant. `0b10` has no dedicated state and maps to `Off`.
    pub fn from_register(value: u64) -> Self {
        match value & 0x3 {
            0x1 => PowerState::ClockGated,
            0x3 => PowerState::On,
            _ => PowerState::Off,
        }
    }

    /// The register encoding of this state.
    pub fn encoding(self) -> u8 {
        self as u8
    }

    /// Human readable name used in diagnostics.
    pub fn label(self) -> &'static str {
        match self {
            PowerState::Off => "OFF",
            PowerState::ClockGated => "ON CLOCK GATED",
            PowerState::On => "ON",
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A pair of power states whose transition delay is configured independently.
///
/// The discriminant is the word index inside a component's delay-config block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TransitionClass {
    /// ON to OFF.
    OnOff = 0,
    /// OFF to ON.
    OffOn = 1,
    /// ON to CLOCK_GATED.
    OnClockGated = 2,
    /// CLOCK_GATED to ON.
    ClockGatedOn = 3,
}

impl TransitionClass {
    /// All classes in delay-config word order.
    pub const ALL: [TransitionClass; DELAY_CLASSES] = [
        TransitionClass::OnOff,
        TransitionClass::OffOn,
        TransitionClass::OnClockGated,
        TransitionClass::ClockGatedOn,
    ];

    /// Word index inside the delay-config block.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Inverse of [`TransitionClass::index`].
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Short symbolic name, also used for generated constants.
    pub fn symbol(self) -> &'static str {
        match self {
            TransitionClass::OnOff => "on_off",
            TransitionClass::OffOn => "off_on",
            TransitionClass::OnClockGated => "on_cg",
            TransitionClass::ClockGatedOn => "cg_on",
        }
    }
}

/// An address window exposed by the power manager.
///
/// The interconnect strips the window base before the controller sees an access, so every
/// offset in this crate is relative to one of these regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    /// One state-control word per component.
    State,
    /// One voltage-control word per component.
    Voltage,
    /// Four delay-config words per component.
    DelayConfig,
    /// Capture control and power read-back.
    PowerReport,
}

impl Region {
    /// All regions in declaration order.
    pub const ALL: [Region; 4] = [
        Region::State,
        Region::Voltage,
        Region::DelayConfig,
        Region::PowerReport,
    ];
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Region::State => "state",
            Region::Voltage => "voltage",
            Region::DelayConfig => "delay_config",
            Region::PowerReport => "power_report",
        };
        f.write_str(name)
    }
}

/// What a decoded register controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    /// Requests a power state transition.
    StateControl,
    /// Forwards a voltage immediately.
    VoltageControl,
    /// One entry of the per-component delay table.
    DelayConfig(TransitionClass),
    /// Read-back of the last power measurement.
    PowerReport,
    /// Starts or stops an energy capture window.
    CaptureControl,
}

/// Result of resolving a region-relative offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedRegister {
    /// Slot of the addressed component, `None` for controller-global registers.
    pub slot: Option<usize>,
    /// The register that was hit.
    pub kind: RegisterKind,
}

/// Address allocation of one managed component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSlot {
    /// Unique component name, stable across generation and runtime.
    pub name: String,

    /// Dense index in registry order.
    pub slot_index: usize,

    /// Byte offset of the state-control register inside [`Region::State`].
    pub state_offset: u64,

    /// Byte offset of the voltage-control register inside [`Region::Voltage`].
    pub voltage_offset: u64,

    /// Byte offset of the first delay-config word inside [`Region::DelayConfig`].
    pub config_offset: u64,
}

impl ComponentSlot {
    /// Byte offset of the delay-config word for `class`.
    pub fn delay_offset(&self, class: TransitionClass, word_size: u64) -> u64 {
        self.config_offset + class.index() as u64 * word_size
    }
}

/// Errors raised while building a register map.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// Two components resolve to the same name and would alias one slot.
    #[error("Component '{0}' is listed more than once")]
    DuplicateComponent(String),
    /// Component names must be non-empty.
    #[error("Component at position {0} has an empty name")]
    EmptyName(usize),
    /// Word size must be a non-zero power of two no larger than 8.
    #[error("Unsupported word size {0}")]
    InvalidWordSize(u64),
}

/// Errors raised while decoding a register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// No register lives at this offset.
    #[error("No register mapped at {region} offset {offset:#x}")]
    Unmapped {
        /// Region that was accessed.
        region: Region,
        /// Region-relative offset.
        offset: u64,
    },
    /// The offset falls inside a register but not on its first byte.
    #[error("Misaligned access at {region} offset {offset:#x} (word size {word_size})")]
    Misaligned {
        /// Region that was accessed.
        region: Region,
        /// Region-relative offset.
        offset: u64,
        /// Register width in bytes.
        word_size: u64,
    },
}

/// The complete register layout of a power manager instance.
///
/// Immutable after [`PowerRegisterMap::allocate`].
#[derive(Debug, Clone, Serialize)]
pub struct PowerRegisterMap {
    word_size: u64,
    slots: Vec<ComponentSlot>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
    #[serde(skip)]
    decode: BTreeMap<(Region, u64), DecodedRegister>,
}

impl PowerRegisterMap {
    /// Assigns one slot per component in list order.
    ///
    /// State and voltage registers sit at `slot * word_size`, the delay-config block at
    /// `slot * 4 * word_size`. The power-report region carries capture control at offset 0
    /// and the report value at offset 8.
    pub fn allocate<S: AsRef<str>>(names: &[S], word_size: u64) -> Result<Self, MapError> {
        if !matches!(word_size, 1 | 2 | 4 | 8) {
            return Err(MapError::InvalidWordSize(word_size));
        }

        let mut slots = Vec::with_capacity(names.len());
        let mut by_name = HashMap::with_capacity(names.len());
        let mut decode = BTreeMap::new();

        for (slot_index, name) in names.iter().enumerate() {
            let name = name.as_ref();
            if name.trim().is_empty() {
                return Err(MapError::EmptyName(slot_index));
            }
            if by_name.insert(name.to_string(), slot_index).is_some() {
                return Err(MapError::DuplicateComponent(name.to_string()));
            }

            let slot = ComponentSlot {
                name: name.to_string(),
                slot_index,
                state_offset: slot_index as u64 * word_size,
                voltage_offset: slot_index as u64 * word_size,
                config_offset: slot_index as u64 * DELAY_CLASSES as u64 * word_size,
            };

            let owned = Some(slot_index);
            decode.insert(
                (Region::State, slot.state_offset),
                DecodedRegister {
                    slot: owned,
                    kind: RegisterKind::StateControl,
                },
            );
            decode.insert(
                (Region::Voltage, slot.voltage_offset),
                DecodedRegister {
                    slot: owned,
                    kind: RegisterKind::VoltageControl,
                },
            );
            for class in TransitionClass::ALL {
                decode.insert(
                    (Region::DelayConfig, slot.delay_offset(class, word_size)),
                    DecodedRegister {
                        slot: owned,
                        kind: RegisterKind::DelayConfig(class),
                    },
                );
            }

            slots.push(slot);
        }

        decode.insert(
            (Region::PowerReport, CAPTURE_CONTROL_OFFSET),
            DecodedRegister {
                slot: None,
                kind: RegisterKind::CaptureControl,
            },
        );
        decode.insert(
            (Region::PowerReport, POWER_REPORT_OFFSET),
            DecodedRegister {
                slot: None,
                kind: RegisterKind::PowerReport,
            },
        );

        Ok(Self {
            word_size,
            slots,
            by_name,
            decode,
        })
    }

    /// Register width in bytes.
    pub fn word_size(&self) -> u64 {
        self.word_size
    }

    /// Slots in allocation order.
    pub fn slots(&self) -> &[ComponentSlot] {
        &self.slots
    }

    /// Number of managed components.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no component is managed.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Looks up a component by name.
    pub fn slot(&self, name: &str) -> Option<&ComponentSlot> {
        self.by_name.get(name).map(|&idx| &self.slots[idx])
    }

    /// Slot index of a component.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Resolves a region-relative offset to the register it addresses.
    pub fn resolve(&self, region: Region, offset: u64) -> Result<DecodedRegister, AddressError> {
        if let Some(decoded) = self.decode.get(&(region, offset)) {
            return Ok(*decoded);
        }

        // An offset inside a mapped word is a misaligned hit, anything else is a miss.
        let aligned = offset - offset % self.word_size;
        if aligned != offset && self.decode.contains_key(&(region, aligned)) {
            return Err(AddressError::Misaligned {
                region,
                offset,
                word_size: self.word_size,
            });
        }

        Err(AddressError::Unmapped { region, offset })
    }

    /// Number of bytes a region needs to expose every register of this map.
    pub fn region_span(&self, region: Region) -> u64 {
        let n = self.slots.len() as u64;
        match region {
            Region::State | Region::Voltage => n * self.word_size,
            Region::DelayConfig => n * DELAY_CLASSES as u64 * self.word_size,
            Region::PowerReport => POWER_REPORT_OFFSET + 8,
        }
    }
}

impl PartialEq for PowerRegisterMap {
    fn eq(&self, other: &Self) -> bool {
        self.word_size == other.word_size && self.slots == other.slots
    }
}

impl Eq for PowerRegisterMap {}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<&'static str> {
        vec!["host", "sensor1", "sensor2", "sensor3"]
    }

    #[test]
    fn test_allocation_matches_reference_layout() {
        let map = PowerRegisterMap::allocate(&names(), 4).unwrap();

        let sensor2 = map.slot("sensor2").unwrap();
        assert_eq!(sensor2.slot_index, 2);
        assert_eq!(sensor2.state_offset, 8);
        assert_eq!(sensor2.voltage_offset, 8);
        assert_eq!(sensor2.config_offset, 32);
        assert_eq!(sensor2.delay_offset(TransitionClass::ClockGatedOn, 4), 44);
    }

    #[test]
    fn test_allocation_is_deterministic() {
        let a = PowerRegisterMap::allocate(&names(), 4).unwrap();
        let b = PowerRegisterMap::allocate(&names(), 4).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_offsets_are_unique() {
        let map = PowerRegisterMap::allocate(&names(), 4).unwrap();
        let mut seen = std::collections::HashSet::new();
        for slot in map.slots() {
            assert!(seen.insert((Region::State, slot.state_offset)));
            for class in TransitionClass::ALL {
                assert!(seen.insert((Region::DelayConfig, slot.delay_offset(class, 4))));
            }
        }
    }

    #[test]
    fn test_duplicate_component_rejected() {
        let err = PowerRegisterMap::allocate(&["host", "sensor1", "host"], 4).unwrap_err();
        assert_eq!(err, MapError::DuplicateComponent("host".to_string()));
    }

    #[test]
    fn test_invalid_word_size() {
        let err = PowerRegisterMap::allocate(&["host"], 3).unwrap_err();
        assert_eq!(err, MapError::InvalidWordSize(3));
    }

    #[test]
    fn test_resolve_component_registers() {
        let map = PowerRegisterMap::allocate(&names(), 4).unwrap();

        let hit = map.resolve(Region::State, 4).unwrap();
        assert_eq!(hit.slot, Some(1));
        assert_eq!(hit.kind, RegisterKind::StateControl);

        let hit = map.resolve(Region::DelayConfig, 16 + 4).unwrap();
        assert_eq!(hit.slot, Some(1));
        assert_eq!(hit.kind, RegisterKind::DelayConfig(TransitionClass::OffOn));

        let hit = map.resolve(Region::PowerReport, 0).unwrap();
        assert_eq!(hit.slot, None);
        assert_eq!(hit.kind, RegisterKind::CaptureControl);
    }

    #[test]
    fn test_resolve_errors() {
        let map = PowerRegisterMap::allocate(&names(), 4).unwrap();

        assert_eq!(
            map.resolve(Region::State, 0x40),
            Err(AddressError::Unmapped {
                region: Region::State,
                offset: 0x40
            })
        );
        assert_eq!(
            map.resolve(Region::Voltage, 6),
            Err(AddressError::Misaligned {
                region: Region::Voltage,
                offset: 6,
                word_size: 4
            })
        );
    }

    #[test]
    fn test_state_register_encoding() {
        assert_eq!(PowerState::from_register(0), PowerState::Off);
        assert_eq!(PowerState::from_register(1), PowerState::ClockGated);
        assert_eq!(PowerState::from_register(2), PowerState::Off);
        assert_eq!(PowerState::from_register(0xFF), PowerState::On);
        assert_eq!(PowerState::On.encoding(), 3);
    }
}
