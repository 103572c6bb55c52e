//! Chip select control
//!
//! The engine asserts the selected line before the first frame and releases it
//! after the last one. The hardware auto-CS feature is never used.

use embedded_hal::digital::OutputPin;

use crate::config::MAX_CHIP_SELECTS;
use crate::spi::{Error, RangeError};

pub trait ChipSelect {
    fn select(&mut self, index: u8) -> Result<(), Error>;

    fn deselect(&mut self, index: u8) -> Result<(), Error>;
}

impl<T: ChipSelect + ?Sized> ChipSelect for &mut T {
    fn select(&mut self, index: u8) -> Result<(), Error> {
        (**self).select(index)
    }

    fn deselect(&mut self, index: u8) -> Result<(), Error> {
        (**self).deselect(index)
    }
}

/// Active-low chip select lines on plain GPIO outputs, one per slave index.
pub struct ActiveLow<P, const N: usize> {
    pins: [P; N],
}

impl<P: OutputPin, const N: usize> ActiveLow<P, N> {
    /// Take the pins and drive them all to the inactive (high) level.
    ///
    /// More lines than the USART has slave indices is a range error.
    pub fn new(mut pins: [P; N]) -> Result<Self, Error> {
        if N > MAX_CHIP_SELECTS as usize {
            error!("More chip select lines than slaves: {=usize}", N);
            return Err(Error::Range(RangeError::ChipSelect(
                u8::try_from(N).unwrap_or(u8::MAX),
            )));
        }

        for pin in pins.iter_mut() {
            pin.set_high().map_err(|_| Error::ChipSelect)?;
        }
        Ok(Self { pins })
    }

    fn pin(&mut self, index: u8) -> Result<&mut P, Error> {
        self.pins
            .get_mut(index as usize)
            .ok_or(Error::Range(RangeError::ChipSelect(index)))
    }

    pub fn free(self) -> [P; N] {
        self.pins
    }
}

impl<P: OutputPin, const N: usize> ChipSelect for ActiveLow<P, N> {
    fn select(&mut self, index: u8) -> Result<(), Error> {
        self.pin(index)?.set_low().map_err(|_| Error::ChipSelect)
    }

    fn deselect(&mut self, index: u8) -> Result<(), Error> {
        self.pin(index)?.set_high().map_err(|_| Error::ChipSelect)
    }
}

#[cfg(test)]
mod tests {
    use core::convert::Infallible;

    use super::*;

    #[derive(Default)]
    struct FakePin {
        high: bool,
        toggles: u32,
    }

    impl embedded_hal::digital::ErrorType for FakePin {
        type Error = Infallible;
    }

    impl OutputPin for FakePin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.high = false;
            self.toggles += 1;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.high = true;
            self.toggles += 1;
            Ok(())
        }
    }

    #[test]
    fn lines_start_inactive() {
        let cs = ActiveLow::new([FakePin::default(), FakePin::default()]).unwrap();
        assert!(cs.free().iter().all(|p| p.high));
    }

    #[test]
    fn only_the_indexed_line_moves() {
        let mut cs = ActiveLow::new([FakePin::default(), FakePin::default(), FakePin::default()]).unwrap();

        cs.select(1).unwrap();
        let pins = cs.free();
        assert!(pins[0].high);
        assert!(!pins[1].high);
        assert!(pins[2].high);

        let mut cs = ActiveLow::new(pins).unwrap();
        cs.select(2).unwrap();
        cs.deselect(2).unwrap();
        let pins = cs.free();
        assert!(pins[2].high);
        assert_eq!(pins[2].toggles, 4);
    }

    #[test]
    fn more_lines_than_slaves_is_refused() {
        let pins = [FakePin::default(), FakePin::default(), FakePin::default(), FakePin::default()];
        assert_eq!(
            ActiveLow::new(pins).err(),
            Some(Error::Range(RangeError::ChipSelect(4)))
        );
    }

    #[test]
    fn unbacked_index_is_a_range_error() {
        let mut cs = ActiveLow::new([FakePin::default()]).unwrap();
        assert_eq!(cs.select(1), Err(Error::Range(RangeError::ChipSelect(1))));
    }
}
