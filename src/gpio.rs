// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! GPIO lines through the legacy sysfs interface
//! (`/sys/class/gpio`), as still shipped on SAMA5D2 BSPs.
//!
//! A [`SysfsLine`] exports the pin on creation and unexports it again
//! when dropped, so both lines are always released on every exit path of
//! the owning process.  Direction changes are written as `high`/`low`
//! rather than `out` so a line never glitches through the wrong level
//! (see the [`Line`] latch contract).

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;

use crate::core::{Direction, Line, LineError, LineResult};

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// SAMA5D2 PIO banks are 32 bits wide, A through D.
const BANK_SPAN: u32 = 32;
const BANK_COUNT: u32 = 4;

#[derive(Debug, Error)]
pub enum PinSpecError {
    #[error("invalid pin spec `{0}` (expected e.g. PA17, pd3 or a raw number)")]
    Invalid(String),
    #[error("no such bank in `{0}` (banks are A-D)")]
    Bank(String),
    #[error("bit out of range in `{0}` (bits are 0-31)")]
    Bit(String),
}

/// A pin named either `P<bank><bit>` (`PA17`, `pd3`) or as a raw kernel
/// GPIO number.  The bank form is relative to the controller's number
/// base, which the caller supplies (0 on mainline SAMA5D2 kernels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinSpec {
    Banked { bank: u32, bit: u32 },
    Raw(u32),
}

impl PinSpec {
    /// Kernel GPIO number for this spec given the controller base.
    pub fn kernel_number(&self, base: u32) -> u32 {
        match *self {
            PinSpec::Banked { bank, bit } => base + bank * BANK_SPAN + bit,
            PinSpec::Raw(n) => n,
        }
    }
}

impl FromStr for PinSpec {
    type Err = PinSpecError;

    fn from_str(s: &str) -> Result<PinSpec, PinSpecError> {
        let t = s.trim();
        if t.is_empty() {
            return Err(PinSpecError::Invalid(s.to_string()));
        }
        if let Ok(n) = t.parse::<u32>() {
            return Ok(PinSpec::Raw(n));
        }

        let mut chars = t.chars();
        let p = chars.next().unwrap();
        if p != 'P' && p != 'p' {
            return Err(PinSpecError::Invalid(s.to_string()));
        }
        let bank_char = chars
            .next()
            .ok_or_else(|| PinSpecError::Invalid(s.to_string()))?
            .to_ascii_uppercase();
        if !('A'..='Z').contains(&bank_char) {
            return Err(PinSpecError::Invalid(s.to_string()));
        }
        let bank = bank_char as u32 - 'A' as u32;
        if bank >= BANK_COUNT {
            return Err(PinSpecError::Bank(s.to_string()));
        }
        let bit: u32 = chars
            .as_str()
            .parse()
            .map_err(|_| PinSpecError::Invalid(s.to_string()))?;
        if bit >= BANK_SPAN {
            return Err(PinSpecError::Bit(s.to_string()));
        }
        Ok(PinSpec::Banked { bank, bit })
    }
}

impl fmt::Display for PinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PinSpec::Banked { bank, bit } => {
                write!(f, "P{}{}", (b'A' + bank as u8) as char, bit)
            }
            PinSpec::Raw(n) => write!(f, "gpio{}", n),
        }
    }
}

fn io_err(path: &Path, source: io::Error) -> LineError {
    LineError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn write_attr(path: &Path, value: &str) -> LineResult<()> {
    let mut f = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    f.write_all(value.as_bytes()).map_err(|e| io_err(path, e))
}

/// One exported sysfs GPIO.
pub struct SysfsLine {
    number: u32,
    pin_dir: PathBuf,
    value: File,
    direction: Option<Direction>,
    latch: bool,
    exported_here: bool,
}

impl SysfsLine {
    /// Export the pin and open its `value` attribute.
    ///
    /// A pin that is already exported (e.g. left over from a previous
    /// run) is reused as-is and not unexported on drop.
    pub fn export(number: u32) -> LineResult<SysfsLine> {
        let root = Path::new(SYSFS_GPIO_ROOT);
        let pin_dir = root.join(format!("gpio{}", number));

        let exported_here = if pin_dir.exists() {
            debug!("gpio{} already exported, reusing", number);
            false
        } else {
            write_attr(&root.join("export"), &number.to_string())?;
            true
        };

        // udev may still be adjusting permissions right after the
        // export; give it a few tries.
        let value_path = pin_dir.join("value");
        let mut last_err = None;
        let mut value = None;
        for _ in 0..10 {
            match OpenOptions::new()
                .read(true)
                .write(true)
                .open(&value_path)
            {
                Ok(f) => {
                    value = Some(f);
                    break;
                }
                Err(e) => {
                    last_err = Some(e);
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }
        let value = match value {
            Some(f) => f,
            None => {
                let err = io_err(&value_path, last_err.unwrap());
                if exported_here {
                    let _ = write_attr(&root.join("unexport"), &number.to_string());
                }
                return Err(err);
            }
        };

        Ok(SysfsLine {
            number,
            pin_dir,
            value,
            direction: None,
            latch: false,
            exported_here,
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    fn write_value_file(&mut self, value: bool) -> LineResult<()> {
        let path = self.pin_dir.join("value");
        self.value
            .write_all(if value { b"1" } else { b"0" })
            .map_err(|e| io_err(&path, e))
    }
}

impl Line for SysfsLine {
    fn set_direction(&mut self, dir: Direction) -> LineResult<()> {
        if self.direction == Some(dir) {
            if dir == Direction::Out {
                // Direction unchanged; make sure the latch is on the pin.
                return self.write_value_file(self.latch);
            }
            return Ok(());
        }
        let path = self.pin_dir.join("direction");
        let word = match dir {
            Direction::In => "in",
            // Atomically configure output level with the direction.
            Direction::Out if self.latch => "high",
            Direction::Out => "low",
        };
        write_attr(&path, word)?;
        self.direction = Some(dir);
        Ok(())
    }

    fn write_value(&mut self, value: bool) -> LineResult<()> {
        self.latch = value;
        if self.direction == Some(Direction::Out) {
            self.write_value_file(value)?;
        }
        Ok(())
    }

    fn read_value(&mut self) -> LineResult<bool> {
        let path = self.pin_dir.join("value");
        self.value
            .seek(SeekFrom::Start(0))
            .map_err(|e| io_err(&path, e))?;
        let mut buf = [0u8; 1];
        self.value
            .read_exact(&mut buf)
            .map_err(|e| io_err(&path, e))?;
        Ok(buf[0] != b'0')
    }
}

impl Drop for SysfsLine {
    fn drop(&mut self) {
        if !self.exported_here {
            return;
        }
        let path = Path::new(SYSFS_GPIO_ROOT).join("unexport");
        if let Err(e) = write_attr(&path, &self.number.to_string()) {
            warn!("failed to unexport gpio{}: {}", self.number, e);
        }
    }
}
