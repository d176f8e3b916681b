// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! Access to an I2C bus through the kernel i2c-dev character device.
//!
//! The kernel exposes one device (e.g. `/dev/i2c-1`) per bus; this code
//! acts as the bus master on it.  Plain writes and reads go through the
//! file descriptor after an `I2C_SLAVE` ioctl; write-then-read exchanges
//! use a single `I2C_RDWR` transaction so the read is joined to the
//! write with a repeated START instead of a STOP/START pair.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::prelude::*;
use std::path::{Path, PathBuf};
use std::ptr;

use log::debug;
use thiserror::Error;

use crate::ffi;
pub use crate::ffi::I2cFuncs;

#[derive(Debug, Error)]
pub enum CharDevError {
    #[error("{path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ioctl on {path}: {source}")]
    Ioctl {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("adapter transferred {completed} of {expected} messages")]
    ShortTransfer { completed: u32, expected: u32 },
    #[error("read length {0} exceeds a single i2c_msg (65535)")]
    ReadTooLong(usize),
    #[error("write length {0} exceeds a single i2c_msg (65535)")]
    WriteTooLong(usize),
}

/// An open i2c-dev bus device.
pub struct I2cCharDev {
    devfile: File,
    path: PathBuf,
}

impl AsRawFd for I2cCharDev {
    fn as_raw_fd(&self) -> RawFd {
        self.devfile.as_raw_fd()
    }
}

impl I2cCharDev {
    /// Open the given i2c-dev node, e.g. `/dev/i2c-1`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<I2cCharDev, CharDevError> {
        let path = path.as_ref().to_path_buf();
        let devfile = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| CharDevError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(I2cCharDev { devfile, path })
    }

    /// Open bus `n` as `/dev/i2c-<n>`.
    pub fn open_bus(n: u32) -> Result<I2cCharDev, CharDevError> {
        I2cCharDev::open(format!("/dev/i2c-{}", n))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ioctl_err(&self, source: nix::Error) -> CharDevError {
        CharDevError::Ioctl {
            path: self.path.clone(),
            source,
        }
    }

    fn io_err(&self, source: io::Error) -> CharDevError {
        CharDevError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Bind this fd to a slave address for plain read/write.
    ///
    /// Addresses are 7-bit here; `force` claims the address even when a
    /// kernel driver already owns it (`I2C_SLAVE_FORCE`).  Little
    /// validation is done on our side, the kernel is good at that.
    pub fn set_slave_address(&self, addr: u16, force: bool) -> Result<(), CharDevError> {
        debug!("{}: slave address 0x{:02x}", self.path.display(), addr);
        let res = if force {
            ffi::i2c_set_slave_address_force(self.as_raw_fd(), addr)
        } else {
            ffi::i2c_set_slave_address(self.as_raw_fd(), addr)
        };
        res.map_err(|e| self.ioctl_err(e))
    }

    /// Write the buffer to the bound slave as one transaction.
    pub fn write(&mut self, data: &[u8]) -> Result<(), CharDevError> {
        self.devfile
            .write_all(data)
            .map_err(|e| self.io_err(e))
    }

    /// Fill the buffer from the bound slave as one transaction.
    pub fn read(&mut self, data: &mut [u8]) -> Result<(), CharDevError> {
        self.devfile
            .read_exact(data)
            .map_err(|e| self.io_err(e))
    }

    /// Write `wbuf` then read `rbuf` from `addr` as a single combined
    /// transaction with a repeated START between the two phases.  Either
    /// buffer may be empty, degenerating to a plain write or read.
    pub fn write_read(
        &self,
        addr: u16,
        wbuf: &[u8],
        rbuf: &mut [u8],
    ) -> Result<(), CharDevError> {
        if rbuf.len() > u16::MAX as usize {
            return Err(CharDevError::ReadTooLong(rbuf.len()));
        }
        if wbuf.len() > u16::MAX as usize {
            return Err(CharDevError::WriteTooLong(wbuf.len()));
        }

        let mut msgs: Vec<ffi::i2c_msg> = Vec::with_capacity(2);
        if !wbuf.is_empty() {
            msgs.push(ffi::i2c_msg {
                addr,
                flags: ffi::I2cMsgFlags::empty().bits(),
                len: wbuf.len() as u16,
                buf: wbuf.as_ptr() as *mut u8,
            });
        }
        if !rbuf.is_empty() {
            msgs.push(ffi::i2c_msg {
                addr,
                flags: ffi::I2cMsgFlags::I2C_M_RD.bits(),
                len: rbuf.len() as u16,
                buf: rbuf.as_mut_ptr(),
            });
        }
        if msgs.is_empty() {
            // Probe only: zero-length write, the classic bus scan.
            msgs.push(ffi::i2c_msg {
                addr,
                flags: ffi::I2cMsgFlags::empty().bits(),
                len: 0,
                buf: ptr::null_mut(),
            });
        }

        let expected = msgs.len() as u32;
        let completed = ffi::i2c_rdwr(self.as_raw_fd(), &mut msgs)
            .map_err(|e| self.ioctl_err(e))?;
        if completed != expected {
            return Err(CharDevError::ShortTransfer {
                completed,
                expected,
            });
        }
        Ok(())
    }

    /// Capabilities of the adapter behind this device node.
    pub fn functionality(&self) -> Result<I2cFuncs, CharDevError> {
        ffi::i2c_get_functionality(self.as_raw_fd()).map_err(|e| self.ioctl_err(e))
    }
}
