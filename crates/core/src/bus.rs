// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::controller::PowerController;
use crate::{AccessError, AccessResult, ControllerError};
use dpm_config::{RegionLayout, RegionWindow};
use dpm_ir::{PowerRegisterMap, Region};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RegionEntry {
    pub region: Region,
    pub base: u64,
    pub size: u64,
}

impl RegionEntry {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    fn overlaps(&self, other: &RegionEntry) -> bool {
        self.base < other.base.saturating_add(other.size)
            && other.base < self.base.saturating_add(self.size)
    }
}

/// Address-mapped request path in front of the controller.
///
/// Strips the window base so the controller only sees region-relative offsets.
#[derive(Debug, Clone)]
pub struct Interconnect {
    regions: Vec<RegionEntry>,
}

impl Interconnect {
    /// Builds the windows of `layout`, checking each can hold every register of `map`.
    pub fn new(layout: &RegionLayout, map: &PowerRegisterMap) -> Result<Self, ControllerError> {
        let windows: [(Region, &RegionWindow); 4] = [
            (Region::State, &layout.state),
            (Region::Voltage, &layout.voltage),
            (Region::DelayConfig, &layout.delay_config),
            (Region::PowerReport, &layout.power_report),
        ];

        let mut regions: Vec<RegionEntry> = Vec::with_capacity(windows.len());
        for (region, window) in windows {
            let size = window.size.bytes()?;
            let required = map.region_span(region);
            if size < required {
                return Err(ControllerError::RegionTooSmall {
                    region,
                    size,
                    required,
                });
            }
            let entry = RegionEntry {
                region,
                base: window.base,
                size,
            };
            if let Some(other) = regions.iter().find(|r| r.overlaps(&entry)) {
                return Err(ControllerError::OverlappingRegions(other.region, region));
            }
            tracing::debug!(
                "Mapped {} region at {:#x} ({:#x} bytes)",
                region,
                entry.base,
                size
            );
            regions.push(entry);
        }

        Ok(Self { regions })
    }

    pub fn regions(&self) -> &[RegionEntry] {
        &self.regions
    }

    pub fn base_of(&self, region: Region) -> Option<u64> {
        self.regions
            .iter()
            .find(|r| r.region == region)
            .map(|r| r.base)
    }

    /// Region and region-relative offset of an absolute address.
    pub fn route(&self, addr: u64) -> Option<(Region, u64)> {
        self.regions
            .iter()
            .find(|r| r.contains(addr))
            .map(|r| (r.region, addr - r.base))
    }

    pub fn read(&self, controller: &mut PowerController, addr: u64) -> AccessResult<u64> {
        match self.route(addr) {
            Some((region, offset)) => controller.read(region, offset),
            None => Err(controller.reject(AccessError::BusFault(addr))),
        }
    }

    pub fn write(
        &self,
        controller: &mut PowerController,
        addr: u64,
        value: u64,
    ) -> AccessResult<()> {
        match self.route(addr) {
            Some((region, offset)) => controller.write(region, offset, value),
            None => Err(controller.reject(AccessError::BusFault(addr))),
        }
    }
}
