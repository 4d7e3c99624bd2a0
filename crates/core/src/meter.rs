// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::SimTime;
use dpm_config::PowerCoefficients;
use dpm_ir::PowerState;

#[derive(Debug, Clone, Copy, PartialEq)]
struct CaptureWindow {
    started_at: SimTime,
    last_update: SimTime,
    energy: f64,
}

/// Accumulates declarative energy while a capture window is open.
///
/// Energy is `coefficient(state) * ticks` summed over every managed component. Stopping the
/// window stores the average power over it as the read-back value.
#[derive(Debug, Clone)]
pub struct PowerMeter {
    coefficients: Vec<PowerCoefficients>,
    window: Option<CaptureWindow>,
    last_measure: f64,
}

impl PowerMeter {
    pub fn new(slots: usize) -> Self {
        Self {
            coefficients: vec![PowerCoefficients::default(); slots],
            window: None,
            last_measure: 0.0,
        }
    }

    pub fn set_coefficients(&mut self, slot: usize, coefficients: PowerCoefficients) {
        if let Some(c) = self.coefficients.get_mut(slot) {
            *c = coefficients;
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.window.is_some()
    }

    pub fn last_measure(&self) -> f64 {
        self.last_measure
    }

    /// Integrates the current states up to `now`. Call before any state changes.
    pub fn advance(&mut self, now: SimTime, states: impl Iterator<Item = PowerState>) {
        let Some(window) = &mut self.window else {
            return;
        };
        let elapsed = now.saturating_sub(window.last_update);
        if elapsed == 0 {
            return;
        }
        let draw: f64 = states
            .zip(&self.coefficients)
            .map(|(state, c)| c.for_state(state))
            .sum();
        window.energy += draw * elapsed as f64;
        window.last_update = now;
    }

    /// Opens a capture window. Restarting an open window discards what it accumulated.
    pub fn start(&mut self, now: SimTime) {
        tracing::debug!("Power capture started at {}", now);
        self.window = Some(CaptureWindow {
            started_at: now,
            last_update: now,
            energy: 0.0,
        });
    }

    /// Closes the window and returns the average power over it.
    pub fn stop(&mut self, now: SimTime) -> Option<f64> {
        let window = self.window.take()?;
        let length = now.saturating_sub(window.started_at);
        self.last_measure = if length == 0 {
            0.0
        } else {
            window.energy / length as f64
        };
        tracing::debug!(
            "Power capture stopped at {}: {:.6} W over {} ticks",
            now,
            self.last_measure,
            length
        );
        Some(self.last_measure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coeffs(on: f64, clock_gated: f64) -> PowerCoefficients {
        PowerCoefficients {
            on,
            clock_gated,
            off: 0.0,
        }
    }

    #[test]
    fn test_average_power_over_window() {
        let mut meter = PowerMeter::new(2);
        meter.set_coefficients(0, coeffs(2.0, 0.5));
        meter.set_coefficients(1, coeffs(1.0, 0.25));

        meter.start(0);
        assert!(meter.is_capturing());

        // 10 ticks with both ON, then 10 ticks with slot 0 clock gated.
        meter.advance(10, [PowerState::On, PowerState::On].into_iter());
        meter.advance(20, [PowerState::ClockGated, PowerState::On].into_iter());

        let avg = meter.stop(20).unwrap();
        assert!((avg - 2.25).abs() < 1e-9);
        assert_eq!(meter.last_measure(), avg);
        assert!(!meter.is_capturing());
    }

    #[test]
    fn test_stop_without_start() {
        let mut meter = PowerMeter::new(1);
        assert_eq!(meter.stop(5), None);
        assert_eq!(meter.last_measure(), 0.0);
    }

    #[test]
    fn test_advance_ignored_when_idle() {
        let mut meter = PowerMeter::new(1);
        meter.set_coefficients(0, coeffs(3.0, 1.0));
        meter.advance(100, [PowerState::On].into_iter());
        meter.start(100);
        assert_eq!(meter.stop(100), Some(0.0));
    }
}
