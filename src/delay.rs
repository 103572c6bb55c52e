//! Simple busy-loop delay provider

use embedded_hal::delay::DelayNs;

use crate::rcc::Clocks;

/// A delay provided by busy-looping
pub struct CycleDelay {
    /// Core clock in Hz
    hclk: u32,
}

impl CycleDelay {
    pub fn new(clocks: &Clocks) -> Self {
        Self {
            hclk: clocks.hfclk.raw(),
        }
    }

    // one spin is taken as 1.5 core cycles
    fn spin(cycles: u64) {
        for _ in 0..cycles {
            core::hint::spin_loop();
        }
    }
}

impl DelayNs for CycleDelay {
    fn delay_ns(&mut self, ns: u32) {
        Self::spin(ns as u64 * self.hclk as u64 / 1_500_000_000);
    }

    fn delay_us(&mut self, us: u32) {
        Self::spin(us as u64 * self.hclk as u64 / 1_500_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        let spins_per_us = self.hclk as u64 / 1_500_000;

        for _ in 0..ms {
            Self::spin(spins_per_us * 1000);
        }
    }
}
