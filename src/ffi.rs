// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! Thin wrappers over the i2c-dev ioctl ABI
//! (`include/uapi/linux/i2c-dev.h` and `i2c.h`).

#![allow(non_camel_case_types)]

use std::os::unix::prelude::*;

use bitflags::bitflags;
use nix;

bitflags! {
    /// Flags for one [`i2c_msg`] segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct I2cMsgFlags: u16 {
        /// read data, from slave to master
        const I2C_M_RD = 0x0001;
        /// this is a ten bit chip address
        const I2C_M_TEN = 0x0010;
        /// length will be first received byte
        const I2C_M_RECV_LEN = 0x0400;
        /// if I2C_FUNC_PROTOCOL_MANGLING
        const I2C_M_NO_RD_ACK = 0x0800;
        /// if I2C_FUNC_PROTOCOL_MANGLING
        const I2C_M_IGNORE_NAK = 0x1000;
        /// if I2C_FUNC_PROTOCOL_MANGLING
        const I2C_M_REV_DIR_ADDR = 0x2000;
        /// if I2C_FUNC_NOSTART
        const I2C_M_NOSTART = 0x4000;
        /// if I2C_FUNC_PROTOCOL_MANGLING
        const I2C_M_STOP = 0x8000;
    }
}

/// One segment of an I2C transaction, beginning with a (repeated)
/// START.  Matches `struct i2c_msg`.
#[repr(C)]
pub struct i2c_msg {
    /// slave address
    pub addr: u16,
    /// serialized I2cMsgFlags
    pub flags: u16,
    /// msg length
    pub len: u16,
    /// pointer to msg data
    pub buf: *mut u8,
}

bitflags! {
    /// Adapter capabilities reported by `I2C_FUNCS`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct I2cFuncs: u32 {
        const I2C_FUNC_I2C = 0x0000_0001;
        const I2C_FUNC_10BIT_ADDR = 0x0000_0002;
        const I2C_FUNC_PROTOCOL_MANGLING = 0x0000_0004;
        const I2C_FUNC_SMBUS_PEC = 0x0000_0008;
        const I2C_FUNC_NOSTART = 0x0000_0010;
        const I2C_FUNC_SMBUS_BLOCK_PROC_CALL = 0x0000_8000;
        const I2C_FUNC_SMBUS_QUICK = 0x0001_0000;
        const I2C_FUNC_SMBUS_READ_BYTE = 0x0002_0000;
        const I2C_FUNC_SMBUS_WRITE_BYTE = 0x0004_0000;
        const I2C_FUNC_SMBUS_READ_BYTE_DATA = 0x0008_0000;
        const I2C_FUNC_SMBUS_WRITE_BYTE_DATA = 0x0010_0000;
        const I2C_FUNC_SMBUS_READ_WORD_DATA = 0x0020_0000;
        const I2C_FUNC_SMBUS_WRITE_WORD_DATA = 0x0040_0000;
        const I2C_FUNC_SMBUS_PROC_CALL = 0x0080_0000;
        const I2C_FUNC_SMBUS_READ_BLOCK_DATA = 0x0100_0000;
        const I2C_FUNC_SMBUS_WRITE_BLOCK_DATA = 0x0200_0000;
        const I2C_FUNC_SMBUS_READ_I2C_BLOCK = 0x0400_0000;
        const I2C_FUNC_SMBUS_WRITE_I2C_BLOCK = 0x0800_0000;
    }
}

// from include/uapi/linux/i2c-dev.h
const I2C_SLAVE: u16 = 0x0703;
const I2C_FUNCS: u16 = 0x0705;
const I2C_SLAVE_FORCE: u16 = 0x0706;
const I2C_RDWR: u16 = 0x0707;

/// This is the structure as used in the I2C_RDWR ioctl call
#[repr(C)]
pub struct i2c_rdwr_ioctl_data {
    // struct i2c_msg __user *msgs;
    msgs: *mut i2c_msg,
    // __u32 nmsgs;
    nmsgs: u32,
}

mod ioctl {
    use super::{i2c_rdwr_ioctl_data, I2C_FUNCS, I2C_RDWR, I2C_SLAVE, I2C_SLAVE_FORCE};

    nix::ioctl_write_int_bad!(set_i2c_slave_address, I2C_SLAVE);
    nix::ioctl_write_int_bad!(set_i2c_slave_address_force, I2C_SLAVE_FORCE);
    nix::ioctl_read_bad!(i2c_get_funcs, I2C_FUNCS, libc::c_ulong);
    nix::ioctl_write_ptr_bad!(i2c_rdwr, I2C_RDWR, i2c_rdwr_ioctl_data);
}

pub fn i2c_set_slave_address(fd: RawFd, slave_address: u16) -> Result<(), nix::Error> {
    unsafe {
        ioctl::set_i2c_slave_address(fd, i32::from(slave_address))?;
    }
    Ok(())
}

pub fn i2c_set_slave_address_force(fd: RawFd, slave_address: u16) -> Result<(), nix::Error> {
    unsafe {
        ioctl::set_i2c_slave_address_force(fd, i32::from(slave_address))?;
    }
    Ok(())
}

pub fn i2c_get_functionality(fd: RawFd) -> Result<I2cFuncs, nix::Error> {
    let mut funcs: libc::c_ulong = 0;
    unsafe {
        ioctl::i2c_get_funcs(fd, &mut funcs)?;
    }
    Ok(I2cFuncs::from_bits_truncate(funcs as u32))
}

/// Issue one `I2C_RDWR` ioctl carrying all of `msgs` as a single
/// transaction (repeated STARTs between segments, one final STOP).
/// Returns the number of messages transferred.
pub fn i2c_rdwr(fd: RawFd, msgs: &mut [i2c_msg]) -> Result<u32, nix::Error> {
    let data = i2c_rdwr_ioctl_data {
        msgs: msgs.as_mut_ptr(),
        nmsgs: msgs.len() as u32,
    };
    let n = unsafe { ioctl::i2c_rdwr(fd, &data)? };
    Ok(n as u32)
}
