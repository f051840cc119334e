//! # Delays
//!
//! Short busy-wait delays used between register polls.

/// Busy-wait delay source
///
/// Injected into the resource manager so drain timing can be driven by a
/// test clock instead of real hardware latency.
pub trait Delay: Send {
    /// Wait at least `us` microseconds
    fn delay_us(&mut self, us: u32);
}

/// Calibrated spin-loop delay
#[derive(Debug, Clone, Copy)]
pub struct SpinDelay {
    /// Spin iterations per microsecond
    spins_per_us: u32,
}

impl SpinDelay {
    /// Default calibration (roughly one microsecond on a 1-2 GHz core)
    pub const DEFAULT_SPINS_PER_US: u32 = 1_000;

    /// Create with an explicit calibration
    pub const fn new(spins_per_us: u32) -> Self {
        Self { spins_per_us }
    }

    /// Spin iterations per microsecond
    pub const fn spins_per_us(&self) -> u32 {
        self.spins_per_us
    }
}

impl Default for SpinDelay {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SPINS_PER_US)
    }
}

impl Delay for SpinDelay {
    fn delay_us(&mut self, us: u32) {
        let spins = u64::from(us) * u64::from(self.spins_per_us);
        for _ in 0..spins {
            core::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spin_delay_terminates() {
        let mut delay = SpinDelay::new(1);
        delay.delay_us(10);
        assert_eq!(delay.spins_per_us(), 1);
        assert_eq!(SpinDelay::default().spins_per_us(), SpinDelay::DEFAULT_SPINS_PER_US);
    }
}
