// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! # sama5-pio-tools
//!
//! Support library for a small set of command-line diagnostics aimed at
//! embedded Linux on SAMA5D2-class SoCs:
//!
//! * `tcwave` drives a Timer Counter channel in waveform mode through
//!   `/dev/mem` to produce PWM-like outputs ([`tc`]).
//! * `i2cxfer` talks to slaves through the kernel i2c-dev character
//!   device interface: <https://www.kernel.org/doc/Documentation/i2c/dev-interface>
//!   ([`i2cdev`]).
//! * `i2cbb` implements an I2C master in software by bit-banging two
//!   GPIO lines exported through sysfs ([`softi2c`], [`gpio`]).
//!
//! The protocol engine in [`softi2c`] is written against the [`core::Line`]
//! capability trait, so it can run against the in-memory slave emulator in
//! [`mock`] as well as against real pins.

pub mod core;
pub mod gpio;
pub mod i2cdev;
pub mod mock;
pub mod parse;
pub mod softi2c;
pub mod tc;

mod ffi;

pub use crate::core::{Direction, Line, LineError, LineResult};
pub use crate::i2cdev::{CharDevError, I2cCharDev, I2cFuncs};
pub use crate::softi2c::{I2cBbError, I2cBus, Timing, Transaction};
