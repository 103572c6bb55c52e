//! Per-transaction SPI configuration
//!
//! The USART only does a subset of SPI: master, mode 0, MSB first, 8-bit
//! frames on a single data line. Anything else is rejected before a register
//! is written.

use embedded_hal::spi::{Mode, Phase, Polarity, MODE_0};
use fugit::HertzU32 as Hertz;

use crate::regs::{Ctrl, Frame, CLKDIV_DIV_MASK};
use crate::spi::{Error, RangeError};

pub const MAX_CHIP_SELECTS: u8 = 3;
pub const WORD_SIZE: u8 = 8;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitOrder {
    LsbFirst,
    MsbFirst,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CsPolarity {
    ActiveLow,
    ActiveHigh,
}

/// Number of data lines.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lines {
    Single,
    Dual,
    Quad,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    Master,
    Slave,
}

/// Why a [`Config`] was refused.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    WordSize(u8),
    CsActiveHigh,
    LockOn,
    Lines(Lines),
    LsbFirst,
    ClockMode(Mode),
    SlaveMode,
    /// Requested bitrate in Hz
    Frequency(u32),
}

#[non_exhaustive]
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Config {
    pub mode: Mode,
    pub bit_order: BitOrder,
    pub word_size: u8,
    pub cs_polarity: CsPolarity,
    pub loopback: bool,
    /// Keep the bus locked to this configuration after the transaction
    pub lock_on: bool,
    pub lines: Lines,
    pub role: Role,
    /// Chip select index
    pub slave: u8,
    pub frequency: Hertz,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: MODE_0,
            bit_order: BitOrder::MsbFirst,
            word_size: WORD_SIZE,
            cs_polarity: CsPolarity::ActiveLow,
            loopback: false,
            lock_on: false,
            lines: Lines::Single,
            role: Role::Master,
            slave: 0,
            frequency: Hertz::from_raw(1_000_000),
        }
    }
}

/// Register values for a validated [`Config`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ControlEncoding {
    pub frame: Frame,
    pub loopback: bool,
    pub auto_cs: bool,
    pub clkdiv: u32,
    pub chip_select: u8,
}

impl ControlEncoding {
    /// CTRL with the per-transaction bits replaced, other bits kept.
    pub fn ctrl(&self, current: u32) -> u32 {
        let mut ctrl = Ctrl::from(current);
        ctrl.set_loopbk(self.loopback);
        ctrl.set_autocs(self.auto_cs);
        ctrl.into()
    }
}

impl Config {
    pub fn with_loopback(mut self, loopback: bool) -> Self {
        self.loopback = loopback;
        self
    }

    pub fn with_slave(mut self, slave: u8) -> Self {
        self.slave = slave;
        self
    }

    pub fn with_frequency(mut self, frequency: Hertz) -> Self {
        self.frequency = frequency;
        self
    }

    /// Check the configuration against what the USART can do and compute the
    /// register encoding. `pclk` is the clock feeding the baud generator.
    pub fn validate(&self, pclk: Hertz) -> Result<ControlEncoding, Error> {
        if self.slave >= MAX_CHIP_SELECTS {
            error!("More slaves than supported: {=u8}", self.slave);
            return Err(Error::Range(RangeError::ChipSelect(self.slave)));
        }

        if self.word_size != WORD_SIZE {
            error!("Word size must be {=u8}", WORD_SIZE);
            return Err(ConfigError::WordSize(self.word_size).into());
        }

        if self.cs_polarity == CsPolarity::ActiveHigh {
            error!("CS active high not supported");
            return Err(ConfigError::CsActiveHigh.into());
        }

        if self.lock_on {
            error!("Lock On not supported");
            return Err(ConfigError::LockOn.into());
        }

        if self.lines != Lines::Single {
            error!("Only supports single mode");
            return Err(ConfigError::Lines(self.lines).into());
        }

        if self.bit_order == BitOrder::LsbFirst {
            error!("LSB first not supported");
            return Err(ConfigError::LsbFirst.into());
        }

        if self.mode.polarity != Polarity::IdleLow || self.mode.phase != Phase::CaptureOnFirstTransition {
            error!("Only supports CPOL=CPHA=0");
            return Err(ConfigError::ClockMode(self.mode).into());
        }

        if self.role == Role::Slave {
            error!("Slave mode not supported");
            return Err(ConfigError::SlaveMode.into());
        }

        let clkdiv = match calculate_clock_div(pclk.raw(), self.frequency.raw()) {
            Some(div) => div,
            None => {
                error!("Bitrate {=u32} Hz not reachable", self.frequency.raw());
                return Err(ConfigError::Frequency(self.frequency.raw()).into());
            }
        };

        Ok(ControlEncoding {
            frame: Frame::with_data_bits(self.word_size),
            loopback: self.loopback,
            auto_cs: false,
            clkdiv,
            chip_select: self.slave,
        })
    }
}

// CLKDIV = 256 * (pclk / (2 * bitrate) - 1), rounded so the bitrate never
// exceeds the request
pub(crate) fn calculate_clock_div(pclk: u32, bitrate: u32) -> Option<u32> {
    if bitrate == 0 || bitrate > pclk / 2 {
        return None;
    }

    let div = (pclk - 1) / (2 * bitrate);
    if div > CLKDIV_DIV_MASK >> 8 {
        return None;
    }
    Some(div << 8)
}

/// Bitrate the USART actually produces for a CLKDIV value.
pub fn effective_bitrate(pclk: Hertz, clkdiv: u32) -> Hertz {
    let pclk = pclk.raw() as u64;
    let hz = (pclk * 256) / (2 * (256 + clkdiv as u64));
    Hertz::from_raw(hz as u32)
}
