#![warn(clippy::pedantic)]

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::hardware::LaserSource;

/// Source parameters requested for a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaserSettings {
    wavelength_nm: f64,
    power_mw: f64,
}

impl LaserSettings {
    #[must_use]
    pub fn new(wavelength_nm: f64, power_mw: f64) -> Self {
        LaserSettings {
            wavelength_nm,
            power_mw,
        }
    }

    #[inline]
    #[must_use]
    pub fn wavelength_nm(&self) -> f64 {
        self.wavelength_nm
    }

    #[inline]
    #[must_use]
    pub fn power_mw(&self) -> f64 {
        self.power_mw
    }

    /// Cycles the source off, applies these parameters, turns it back on and waits `settle` for
    /// the output to stabilise.
    pub fn apply<L: LaserSource + ?Sized>(&self, laser: &mut L, settle: Duration) {
        debug!(
            "configuring laser: {} nm, {} mW",
            self.wavelength_nm, self.power_mw
        );
        laser.deactivate();
        laser.set_parameters(self.wavelength_nm, self.power_mw);
        laser.activate();
        if !settle.is_zero() {
            thread::sleep(settle);
        }
    }
}

impl Default for LaserSettings {
    fn default() -> Self {
        LaserSettings {
            wavelength_nm: 1550.0,
            power_mw: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl LaserSource for Recorder {
        fn deactivate(&mut self) {
            self.0.push("off".into());
        }
        fn set_parameters(&mut self, wavelength_nm: f64, power_mw: f64) {
            self.0.push(format!("set {wavelength_nm} {power_mw}"));
        }
        fn activate(&mut self) {
            self.0.push("on".into());
        }
    }

    #[test]
    fn apply_cycles_the_source() {
        let mut laser = Recorder::default();
        LaserSettings::new(1310.0, 2.5).apply(&mut laser, Duration::ZERO);
        assert_eq!(laser.0, vec!["off", "set 1310 2.5", "on"]);
    }
}
