//! SPI master on a USART

/*
Supports full-duplex synchronous master mode only
Supports 8-bit frames, MSB first, CPOL=0 CPHA=0
Bitrate up to half of HFPERCLK
Chip select driven in software, up to 3 slaves
Transfers are polled, one frame at a time
*/

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorKind, ErrorType, Operation, SpiDevice};
use fugit::HertzU32 as Hertz;

use crate::config::{calculate_clock_div, effective_bitrate, Config, ConfigError, ControlEncoding, WORD_SIZE};
use crate::context::{ContextGuard, TransferContext, MAX_BUFFER_PAIRS};
use crate::cs::ChipSelect;
use crate::engine;
use crate::gpio::{PinBinding, PinConfigurator};
use crate::rcc::{ClockControl, ClockId, Clocks};
use crate::regs::*;

/// STATUS reads before a frame that never completes is given up.
pub const DEFAULT_POLL_LIMIT: u32 = 100_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RangeError {
    /// Slave index without a chip select line
    ChipSelect(u8),
    /// Buffer count of a transaction other than one pair
    BufferCount(usize),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Config(ConfigError),
    Range(RangeError),
    /// Another transaction holds the peripheral, or it is not idle
    Busy,
    /// TXC never came up
    Timeout,
    ChipSelect,
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<RangeError> for Error {
    fn from(e: RangeError) -> Self {
        Error::Range(e)
    }
}

impl embedded_hal::spi::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::ChipSelect | Error::Range(RangeError::ChipSelect(_)) => ErrorKind::ChipSelectFault,
            _ => ErrorKind::Other,
        }
    }
}

/// Board data for one USART instance.
#[non_exhaustive]
#[derive(Copy, Clone, Debug)]
pub struct InstanceConfig {
    pub clock: ClockId,
    pub clocks: Clocks,
    pub pins: PinBinding,
    /// Bitrate programmed at init, before the first transaction
    pub bitrate: Hertz,
    pub poll_limit: u32,
}

impl InstanceConfig {
    pub fn new(clock: ClockId, pins: PinBinding) -> Self {
        Self {
            clock,
            clocks: Clocks::default(),
            pins,
            bitrate: Hertz::from_raw(1_000_000),
            poll_limit: DEFAULT_POLL_LIMIT,
        }
    }

    pub fn with_clocks(mut self, clocks: Clocks) -> Self {
        self.clocks = clocks;
        self
    }

    /// At least one STATUS read is always made.
    pub fn with_poll_limit(mut self, poll_limit: u32) -> Self {
        self.poll_limit = poll_limit.max(1);
        self
    }
}

/// SPI master driver for one USART.
pub struct Spi<R, C> {
    regs: R,
    ctx: TransferContext<C>,
    clocks: Clocks,
    poll_limit: u32,
}

impl<R: Registers, C: ChipSelect> Spi<R, C> {
    /// Bring the USART up in synchronous master mode.
    ///
    /// Enables the peripheral clock, sets up the pads and routes, and leaves
    /// the transmitter, receiver and master enabled.
    pub fn new(
        regs: R,
        cs: C,
        config: &InstanceConfig,
        clock_control: &mut impl ClockControl,
        pin_control: &mut impl PinConfigurator,
    ) -> Result<Self, Error> {
        let pclk = config.clocks.hfperclk;
        let clkdiv = match calculate_clock_div(pclk.raw(), config.bitrate.raw()) {
            Some(div) => div,
            None => {
                error!("Bitrate {=u32} Hz not reachable", config.bitrate.raw());
                return Err(ConfigError::Frequency(config.bitrate.raw()).into());
            }
        };

        clock_control.enable(config.clock);

        regs.write(
            Reg::Cmd,
            CMD_RXDIS | CMD_TXDIS | CMD_MASTERDIS | CMD_CLEARTX | CMD_CLEARRX,
        );

        let mut ctrl = Ctrl::from(0u32);
        ctrl.set_sync(true);
        ctrl.set_msbf(true);
        regs.write(Reg::Ctrl, ctrl.into());
        regs.write(Reg::Frame, Frame::with_data_bits(WORD_SIZE).into());
        regs.write(Reg::ClkDiv, clkdiv);

        config.pins.configure(pin_control);
        config.pins.apply(&regs);

        regs.write(Reg::Cmd, CMD_RXEN | CMD_TXEN | CMD_MASTEREN);

        info!(
            "usart spi: pclk={=u32} Hz bitrate={=u32} Hz",
            pclk.raw(),
            effective_bitrate(pclk, clkdiv).raw()
        );

        Ok(Self {
            regs,
            ctx: TransferContext::new(cs),
            clocks: config.clocks,
            poll_limit: config.poll_limit.max(1),
        })
    }

    /// Run one transaction, waiting for any transaction in flight to finish.
    ///
    /// Each set holds at most one buffer. `max(tx, rx)` frames are clocked:
    /// a short `tx` is padded with dummy bytes and received bytes beyond the
    /// end of `rx` are dropped.
    pub fn transceive<'b>(&self, config: &Config, tx: &[&'b [u8]], rx: &mut [&'b mut [u8]]) -> Result<(), Error> {
        let guard = self.ctx.lock();
        self.transceive_locked(guard, config, tx, rx)
    }

    /// Like [`Spi::transceive`], but fails with [`Error::Busy`] instead of
    /// waiting for the peripheral.
    pub fn try_transceive<'b>(
        &self,
        config: &Config,
        tx: &[&'b [u8]],
        rx: &mut [&'b mut [u8]],
    ) -> Result<(), Error> {
        let guard = self.ctx.try_lock()?;
        self.transceive_locked(guard, config, tx, rx)
    }

    fn transceive_locked<'b>(
        &self,
        guard: ContextGuard<'_, C>,
        config: &Config,
        tx: &[&'b [u8]],
        rx: &mut [&'b mut [u8]],
    ) -> Result<(), Error> {
        let encoding = config.validate(self.clocks.hfperclk)?;

        let count = tx.len().max(rx.len()).max(MAX_BUFFER_PAIRS);
        let xfer = guard.setup(tx, rx, count)?;

        self.configure(&encoding);
        engine::run(&self.regs, xfer, encoding.chip_select, self.poll_limit).wait()
    }

    fn configure(&self, encoding: &ControlEncoding) {
        self.regs.modify(Reg::Ctrl, |ctrl| encoding.ctrl(ctrl));
        self.regs.write(Reg::Frame, encoding.frame.into());
        self.regs.write(Reg::ClkDiv, encoding.clkdiv);
    }

    /// The transmitter is idle, no frame is on the wire.
    pub fn can_release(&self) -> bool {
        Status::from(self.regs.read(Reg::Status)).txidle()
    }

    /// Check that the peripheral can be handed back: no transaction holds it
    /// and the transmitter is idle.
    pub fn release(&self) -> Result<(), Error> {
        let _guard = self.ctx.try_lock()?;
        if !self.can_release() {
            warn!("usart spi: release while busy");
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// A device on this bus, with its own configuration, for use through
    /// [`SpiDevice`].
    pub fn device<D: DelayNs>(&self, config: Config, delay: D) -> Device<'_, R, C, D> {
        Device {
            bus: self,
            config,
            delay,
        }
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    /// Disable the USART, disconnect its pads and give back the resources.
    pub fn free(self) -> (R, C) {
        self.regs.write(Reg::Cmd, CMD_RXDIS | CMD_TXDIS | CMD_MASTERDIS);
        self.regs.write(Reg::RoutePen, 0);
        (self.regs, self.ctx.into_inner())
    }
}

/// One slave on a shared [`Spi`].
pub struct Device<'a, R, C, D> {
    bus: &'a Spi<R, C>,
    config: Config,
    delay: D,
}

impl<R, C, D> ErrorType for Device<'_, R, C, D> {
    type Error = Error;
}

impl<R: Registers, C: ChipSelect, D: DelayNs> SpiDevice<u8> for Device<'_, R, C, D> {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Error> {
        let bus = self.bus;
        let mut guard = bus.ctx.lock();

        let encoding = self.config.validate(bus.clocks.hfperclk)?;
        bus.configure(&encoding);
        engine::flush_rx(&bus.regs);

        let slave = encoding.chip_select;
        guard.chip_select().select(slave)?;
        let result = self.run(operations);
        let released = guard.chip_select().deselect(slave);

        result.and(released)
    }
}

impl<R: Registers, C, D: DelayNs> Device<'_, R, C, D> {
    fn run(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Error> {
        let bus = self.bus;
        let regs = &bus.regs;
        let limit = bus.poll_limit;

        for op in operations {
            match op {
                Operation::Read(buf) => engine::shift(regs, &[], buf, limit)?,
                Operation::Write(buf) => engine::shift(regs, buf, &mut [], limit)?,
                Operation::Transfer(read, write) => engine::shift(regs, write, read, limit)?,
                Operation::TransferInPlace(buf) => engine::shift_in_place(regs, buf, limit)?,
                Operation::DelayNs(ns) => self.delay.delay_ns(*ns),
            }
        }
        Ok(())
    }
}

// embedded-hal
impl<R, C> ErrorType for Spi<R, C> {
    type Error = Error;
}

impl<R: Registers, C> embedded_hal_nb::spi::FullDuplex<u8> for Spi<R, C> {
    fn read(&mut self) -> nb::Result<u8, Error> {
        if !Status::from(self.regs.read(Reg::Status)).rxdatav() {
            return Err(nb::Error::WouldBlock);
        }
        Ok(self.regs.read(Reg::RxData) as u8)
    }

    fn write(&mut self, word: u8) -> nb::Result<(), Error> {
        if !Status::from(self.regs.read(Reg::Status)).txbl() {
            return Err(nb::Error::WouldBlock);
        }
        self.regs.write(Reg::TxData, word as u32);
        Ok(())
    }
}
