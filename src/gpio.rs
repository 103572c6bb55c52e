//! GPIO and USART pin routing
//!
//! The USART signals reach the pads through a per-signal location code. The
//! pads themselves still need their electrical mode set by the GPIO block.

use crate::regs::{Reg, Registers, RouteLoc0, RoutePen, MAX_LOCATION, ROUTELOC1_RESETVALUE};

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    A,
    B,
    C,
    D,
    E,
    F,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pin {
    pub port: Port,
    pub pin: u8,
}

impl Pin {
    pub const fn new(port: Port, pin: u8) -> Self {
        Self { port, pin }
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinMode {
    Input,
    PushPull,
    OpenDrain,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(val: bool) -> Self {
        match val {
            true => Self::High,
            false => Self::Low,
        }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> bool {
        match level {
            Level::Low => false,
            Level::High => true,
        }
    }
}

/// Electrical pin setup owned by the SoC layer.
pub trait PinConfigurator {
    fn configure(&mut self, pin: Pin, mode: PinMode, level: Level);
}

/// A pad together with the USART location code that connects it.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Route {
    pub pin: Pin,
    pub location: u8,
}

impl Route {
    pub const fn new(pin: Pin, location: u8) -> Self {
        Self { pin, location }
    }
}

/// Pads used by one USART in SPI mode.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinBinding {
    pub clk: Route,
    /// MOSI
    pub tx: Route,
    /// MISO
    pub rx: Route,
    pub cs: Route,
}

impl PinBinding {
    /// Set the pad modes: MISO as input, everything else push-pull idling high.
    pub fn configure(&self, pins: &mut impl PinConfigurator) {
        pins.configure(self.rx.pin, PinMode::Input, Level::High);
        pins.configure(self.tx.pin, PinMode::PushPull, Level::High);
        pins.configure(self.clk.pin, PinMode::PushPull, Level::High);
        pins.configure(self.cs.pin, PinMode::PushPull, Level::High);
    }

    pub fn route_loc0(&self) -> RouteLoc0 {
        debug_assert!(
            [self.clk, self.tx, self.rx, self.cs]
                .iter()
                .all(|r| r.location <= MAX_LOCATION)
        );

        let mut loc = RouteLoc0::from(0u32);
        loc.set_txloc(self.tx.location);
        loc.set_rxloc(self.rx.location);
        loc.set_clkloc(self.clk.location);
        loc.set_csloc(self.cs.location);
        loc
    }

    /// Connect the four signals to their pads.
    ///
    /// All signals are disconnected while the locations change so that no
    /// mix of old and new routes is ever live.
    pub fn apply<R: Registers>(&self, regs: &R) {
        regs.write(Reg::RoutePen, 0);

        regs.write(Reg::RouteLoc0, self.route_loc0().into());
        regs.write(Reg::RouteLoc1, ROUTELOC1_RESETVALUE);

        let mut pen = RoutePen::from(0u32);
        pen.set_rxpen(true);
        pen.set_txpen(true);
        pen.set_clkpen(true);
        pen.set_cspen(true);
        regs.write(Reg::RoutePen, pen.into());

        trace!(
            "usart route: tx={=u8} rx={=u8} clk={=u8} cs={=u8}",
            self.tx.location,
            self.rx.location,
            self.clk.location,
            self.cs.location
        );
    }
}
