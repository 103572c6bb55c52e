#![cfg_attr(not(test), no_std)]

// This must go first so the log macros are visible to the other modules.
#[macro_use]
mod fmt;

pub mod regs;

pub mod gpio;
pub mod rcc;

pub mod config;
pub mod context;
pub mod cs;
pub mod delay;
pub mod engine;
pub mod spi;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use config::Config;
pub use spi::{Device, Error, InstanceConfig, RangeError, Spi};
