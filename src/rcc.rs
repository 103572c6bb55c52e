use fugit::HertzU32 as Hertz;

// Power on default: HFRCO at 19 MHz, HFCLK and HFPERCLK undivided
const DEFAULT_FREQUENCY: Hertz = Hertz::from_raw(19_000_000);

/// Clock tree branch feeding one peripheral.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockId(pub u8);

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Clocks {
    /// Core clock
    pub hfclk: Hertz,
    /// Clock of the high frequency peripheral bus, drives the USART baud generator
    pub hfperclk: Hertz,
}

impl Default for Clocks {
    fn default() -> Self {
        Self {
            hfclk: DEFAULT_FREQUENCY,
            hfperclk: DEFAULT_FREQUENCY,
        }
    }
}

/// Clock gating owned by the SoC layer.
pub trait ClockControl {
    fn enable(&mut self, clock: ClockId);
}
