//! USART register map
//!
//! Register layout follows the EFM32 Series 1 USART block. Only the registers
//! the SPI master path touches are modelled.

use core::ptr;

use bitfield::bitfield;

/// Registers used by the driver.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    Ctrl,
    Frame,
    Cmd,
    Status,
    ClkDiv,
    RxData,
    TxData,
    RoutePen,
    RouteLoc0,
    RouteLoc1,
}

impl Reg {
    /// Byte offset from the peripheral base address.
    pub const fn offset(self) -> usize {
        match self {
            Reg::Ctrl => 0x000,
            Reg::Frame => 0x004,
            Reg::Cmd => 0x00C,
            Reg::Status => 0x010,
            Reg::ClkDiv => 0x014,
            Reg::RxData => 0x01C,
            Reg::TxData => 0x034,
            Reg::RoutePen => 0x074,
            Reg::RouteLoc0 => 0x078,
            Reg::RouteLoc1 => 0x07C,
        }
    }
}

// CMD is write-only, one strobe per bit
pub const CMD_RXEN: u32 = 1 << 0;
pub const CMD_RXDIS: u32 = 1 << 1;
pub const CMD_TXEN: u32 = 1 << 2;
pub const CMD_TXDIS: u32 = 1 << 3;
pub const CMD_MASTEREN: u32 = 1 << 4;
pub const CMD_MASTERDIS: u32 = 1 << 5;
pub const CMD_CLEARTX: u32 = 1 << 10;
pub const CMD_CLEARRX: u32 = 1 << 11;

pub const STATUS_RESETVALUE: u32 = 0x0000_2040;
pub const ROUTELOC1_RESETVALUE: u32 = 0;

/// DIV field of CLKDIV, bits 22:3.
pub const CLKDIV_DIV_MASK: u32 = 0x007F_FFF8;

pub const FRAME_STOPBITS_ONE: u8 = 1;
pub const FRAME_PARITY_NONE: u8 = 0;

/// Highest location code a ROUTELOC0 field can hold.
pub const MAX_LOCATION: u8 = 0x3F;

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Ctrl(u32);
    impl Debug;
    pub sync, set_sync: 0;
    pub loopbk, set_loopbk: 1;
    pub clkpol, set_clkpol: 8;
    pub clkpha, set_clkpha: 9;
    pub msbf, set_msbf: 10;
    pub csinv, set_csinv: 15;
    pub autocs, set_autocs: 16;
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Frame(u32);
    impl Debug;
    /// Encoded as `bits - 3`.
    pub u8, databits, set_databits: 3, 0;
    pub u8, parity, set_parity: 9, 8;
    pub u8, stopbits, set_stopbits: 13, 12;
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Status(u32);
    impl Debug;
    pub rxens, set_rxens: 0;
    pub txens, set_txens: 1;
    pub master, set_master: 2;
    pub txc, set_txc: 5;
    pub txbl, set_txbl: 6;
    pub rxdatav, set_rxdatav: 7;
    pub txidle, set_txidle: 13;
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct RoutePen(u32);
    impl Debug;
    pub rxpen, set_rxpen: 0;
    pub txpen, set_txpen: 1;
    pub cspen, set_cspen: 2;
    pub clkpen, set_clkpen: 3;
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct RouteLoc0(u32);
    impl Debug;
    pub u8, rxloc, set_rxloc: 5, 0;
    pub u8, txloc, set_txloc: 13, 8;
    pub u8, csloc, set_csloc: 21, 16;
    pub u8, clkloc, set_clkloc: 29, 24;
}

macro_rules! impl_raw {
    ($($view:ident),* $(,)?) => {
        $(
            impl From<u32> for $view {
                fn from(raw: u32) -> Self {
                    Self(raw)
                }
            }

            impl From<$view> for u32 {
                fn from(view: $view) -> u32 {
                    view.0
                }
            }
        )*
    };
}

impl_raw!(Ctrl, Frame, Status, RoutePen, RouteLoc0);

impl Frame {
    /// Frame format for `bits` data bits, no parity, one stop bit. Only
    /// called with a validated word size; shorter values clamp to the
    /// 3-bit minimum.
    pub(crate) fn with_data_bits(bits: u8) -> Self {
        let mut frame = Frame::from(0u32);
        frame.set_databits(bits.saturating_sub(3));
        frame.set_parity(FRAME_PARITY_NONE);
        frame.set_stopbits(FRAME_STOPBITS_ONE);
        frame
    }

    pub fn data_bits(&self) -> u8 {
        self.databits() + 3
    }
}

/// Raw access to one USART register block.
///
/// Accesses are uncached and take effect immediately. Reading RXDATA pops the
/// receive buffer and writing TXDATA starts a frame, so implementations must
/// not elide or reorder them.
pub trait Registers {
    fn read(&self, reg: Reg) -> u32;

    fn write(&self, reg: Reg, value: u32);

    fn modify(&self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }
}

impl<T: Registers + ?Sized> Registers for &T {
    fn read(&self, reg: Reg) -> u32 {
        (**self).read(reg)
    }

    fn write(&self, reg: Reg, value: u32) {
        (**self).write(reg, value)
    }
}

/// Memory-mapped USART instance.
pub struct Usart {
    base: usize,
}

impl Usart {
    /// # Safety
    ///
    /// `base` must be the address of a USART register block that nothing else
    /// accesses for the lifetime of the returned value.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub const fn base(&self) -> usize {
        self.base
    }
}

impl Registers for Usart {
    #[inline]
    fn read(&self, reg: Reg) -> u32 {
        unsafe { ptr::read_volatile((self.base + reg.offset()) as *const u32) }
    }

    #[inline]
    fn write(&self, reg: Reg, value: u32) {
        unsafe { ptr::write_volatile((self.base + reg.offset()) as *mut u32, value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_bit_frame_matches_reset_layout() {
        let frame = Frame::with_data_bits(8);
        assert_eq!(u32::from(frame), 0x0000_1005);
        assert_eq!(frame.data_bits(), 8);
    }

    #[test]
    fn data_bits_below_minimum_clamp() {
        assert_eq!(Frame::with_data_bits(2).databits(), 0);
        assert_eq!(Frame::with_data_bits(0).data_bits(), 3);
    }

    #[test]
    fn route_location_fields_do_not_overlap() {
        let mut loc = RouteLoc0::from(0u32);
        loc.set_rxloc(MAX_LOCATION);
        loc.set_clkloc(1);
        assert_eq!(u32::from(loc), 0x0100_003F);
        assert_eq!(loc.txloc(), 0);
        assert_eq!(loc.csloc(), 0);
    }

    #[test]
    fn mmio_accesses_land_on_offsets() {
        let mut block = [0u32; 0x80 / 4];
        let usart = unsafe { Usart::new(block.as_mut_ptr() as usize) };

        usart.write(Reg::RouteLoc0, 0xDEAD_BEEF);
        usart.modify(Reg::Ctrl, |v| v | 0b10);

        assert_eq!(usart.read(Reg::RouteLoc0), 0xDEAD_BEEF);
        assert_eq!(block[Reg::RouteLoc0.offset() / 4], 0xDEAD_BEEF);
        assert_eq!(block[Reg::Ctrl.offset() / 4], 0b10);
    }
}
