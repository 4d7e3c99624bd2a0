// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod controller;
pub mod domain;
pub mod meter;
pub mod ports;
pub mod power;
pub mod registry;
pub mod scheduler;
pub mod toggle;
pub mod trace;

pub use bus::Interconnect;
pub use controller::{ControllerSnapshot, ControllerStats, PowerController};
pub use domain::GenericDomain;
pub use dpm_ir::{
    AddressError, MapError, PowerRegisterMap, PowerState, Region, RegisterKind, TransitionClass,
};
pub use power::{ManagedComponent, TransitionRejected};
pub use trace::{ControllerObserver, StateTrace};

/// Simulation time in ticks.
pub type SimTime = u64;

/// Construction-time failures. Fatal before the simulation starts.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] dpm_config::ConfigError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error("Component '{0}' is managed more than once")]
    DuplicateComponent(String),
    #[error("Unknown component '{0}'")]
    UnknownComponent(String),
    #[error("Port '{0}' is already bound")]
    PortAlreadyBound(String),
    #[error("Region {region} is {size:#x} bytes but the register map needs {required:#x}")]
    RegionTooSmall {
        region: Region,
        size: u64,
        required: u64,
    },
    #[error("Regions {0} and {1} overlap")]
    OverlappingRegions(Region, Region),
    #[error(transparent)]
    Schedule(#[from] scheduler::ScheduleError),
}

/// Failure of a single register access. The simulation continues.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccessError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Rejected(#[from] TransitionRejected),
    #[error("Register {0:?} is read-only")]
    ReadOnly(RegisterKind),
    #[error("No region mapped at {0:#x}")]
    BusFault(u64),
    #[error(transparent)]
    Schedule(#[from] scheduler::ScheduleError),
}

pub type AccessResult<T> = Result<T, AccessError>;
