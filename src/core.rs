// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

use std::io;

use thiserror::Error;

/// Direction of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// High-impedance input.  On a bus wired with a pull-up resistor the
    /// line floats high unless some other party drives it low.
    In,
    /// Actively driven output.
    Out,
}

/// Error that occurred while operating on a GPIO line.
#[derive(Debug, Error)]
pub enum LineError {
    /// An operation on one of the backing files failed.  Carries the path
    /// so the user can tell which attribute of which pin was involved.
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Other(&'static str),
}

/// Result of a GPIO line operation.
pub type LineResult<T> = Result<T, LineError>;

/// A single digital I/O line.
///
/// This is the only interface the software I2C master consumes.  Any
/// concrete implementation (the sysfs pins in [`crate::gpio`], a
/// memory-mapped controller, or the simulation double in [`crate::mock`])
/// satisfies the protocol engine.
///
/// Implementations must retain the output latch across direction changes:
/// `write_value` while the line is an input records the level the line
/// will drive once it is switched to output, so a write-then-`Out`
/// sequence never glitches through the opposite level.
pub trait Line {
    /// Configure the line as an input or an output.  Switching to `Out`
    /// drives the most recently written value (low for a fresh line).
    fn set_direction(&mut self, dir: Direction) -> LineResult<()>;

    /// Set the output latch.  Takes effect immediately when the line is an
    /// output, otherwise when it next becomes one.
    fn write_value(&mut self, value: bool) -> LineResult<()>;

    /// Sample the current level of the line.
    fn read_value(&mut self) -> LineResult<bool>;
}
