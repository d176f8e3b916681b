// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! SAMA5D2 Timer Counter (TC) waveform generation over `/dev/mem`.
//!
//! Each TC block has three 32-bit channels.  In waveform mode with
//! WAVSEL=UP_RC the counter runs 0..RC; TIOA is set on the RC wrap and
//! cleared on the RA compare, so RC fixes the period and RA the duty
//! cycle.  Register writes go straight to physical memory, which is the
//! point of the tool: it works without any TC kernel driver bound.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::prelude::*;
use std::path::PathBuf;
use std::ptr;

use log::{debug, info};
use thiserror::Error;

/// Physical bases of the two TC blocks.
pub const TC0_BASE: usize = 0xF800_C000;
pub const TC1_BASE: usize = 0xF801_0000;

/// Register window covered by one block (channels + block registers).
pub const TC_BLOCK_SPAN: usize = 0x100;

pub const CHANNELS_PER_BLOCK: usize = 3;
const CHANNEL_SPAN: usize = 0x40;

/// Per-channel and block register offsets.
pub mod regs {
    /// Channel Control Register
    pub const CCR: usize = 0x00;
    /// Channel Mode Register
    pub const CMR: usize = 0x04;
    /// Register A
    pub const RA: usize = 0x14;
    /// Register B
    pub const RB: usize = 0x18;
    /// Register C
    pub const RC: usize = 0x1C;
    /// Status Register
    pub const SR: usize = 0x20;
    /// Interrupt Disable Register
    pub const IDR: usize = 0x28;

    /// Write Protection Mode Register (block scope)
    pub const WPMR: usize = 0xE4;
}

// CCR bits
const CCR_CLKEN: u32 = 1 << 0;
const CCR_CLKDIS: u32 = 1 << 1;
const CCR_SWTRG: u32 = 1 << 2;

// CMR bits (waveform mode)
const CMR_WAVE: u32 = 1 << 15;
const CMR_WAVSEL_UP_RC: u32 = 2 << 13;
const CMR_ACPA_CLEAR: u32 = 2 << 16;
const CMR_ACPC_SET: u32 = 1 << 18;

/// WPMR key "TIM"; written with WPEN clear to unlock the block.
const WPMR_KEY: u32 = 0x54494D << 8;

/// TCCLKS selections 0..=3: peripheral clock divided down.
const TIMER_CLOCKS: [(u32, u64); 4] = [(0, 2), (1, 8), (2, 32), (3, 128)];

/// The channel counters are 32 bits wide on SAMA5D2.
const COUNTER_MAX: u64 = u32::MAX as u64;

#[derive(Debug, Error)]
pub enum TcError {
    #[error("{path}: {source}")]
    DevMem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no timer clock can produce {0} Hz")]
    FreqOutOfRange(u64),
    #[error("duty cycle {0}% out of range (1-99)")]
    DutyOutOfRange(u32),
    #[error("channel {0} out of range (0-2)")]
    BadChannel(usize),
}

/// A resolved waveform configuration for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waveform {
    /// TCCLKS field value.
    pub tcclks: u32,
    /// Selected timer clock in Hz.
    pub clock_hz: u64,
    /// Period in timer ticks.
    pub rc: u32,
    /// Duty threshold in timer ticks.
    pub ra: u32,
}

impl Waveform {
    /// Pick the finest timer clock whose 32-bit counter still covers one
    /// period of `freq_hz`, then derive RC and the RA duty threshold.
    pub fn compute(pclk_hz: u64, freq_hz: u64, duty_pct: u32) -> Result<Waveform, TcError> {
        if freq_hz == 0 {
            return Err(TcError::FreqOutOfRange(freq_hz));
        }
        if duty_pct == 0 || duty_pct >= 100 {
            return Err(TcError::DutyOutOfRange(duty_pct));
        }

        for &(tcclks, div) in TIMER_CLOCKS.iter() {
            let clock_hz = pclk_hz / div;
            let rc = clock_hz / freq_hz;
            if rc < 2 {
                // Even the finest clock cannot resolve this frequency.
                return Err(TcError::FreqOutOfRange(freq_hz));
            }
            if rc <= COUNTER_MAX {
                let ra = (rc * u64::from(duty_pct) / 100).clamp(1, rc - 1);
                return Ok(Waveform {
                    tcclks,
                    clock_hz,
                    rc: rc as u32,
                    ra: ra as u32,
                });
            }
        }
        Err(TcError::FreqOutOfRange(freq_hz))
    }

    /// CMR value for this waveform: up-count to RC, TIOA set on the RC
    /// wrap and cleared on the RA compare.
    pub fn cmr(&self) -> u32 {
        self.tcclks | CMR_WAVE | CMR_WAVSEL_UP_RC | CMR_ACPA_CLEAR | CMR_ACPC_SET
    }

    /// Frequency the hardware will actually produce.
    pub fn actual_hz(&self) -> u64 {
        self.clock_hz / u64::from(self.rc)
    }
}

/// A `/dev/mem` mapping of one physical register window.
pub struct DevMem {
    map: *mut libc::c_void,
    maplen: usize,
    /// Offset of the requested base within the page-aligned mapping.
    delta: usize,
    _devmem: File,
}

impl DevMem {
    /// Map `len` bytes of physical address space starting at `phys`.
    pub fn map(phys: usize, len: usize) -> Result<DevMem, TcError> {
        let path = PathBuf::from("/dev/mem");
        let devmem = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(|source| TcError::DevMem {
                path: path.clone(),
                source,
            })?;

        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let aligned = phys & !(page - 1);
        let delta = phys - aligned;
        let maplen = delta + len;

        let map = unsafe {
            libc::mmap64(
                ptr::null_mut(),
                maplen,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                devmem.as_raw_fd(),
                aligned as libc::off64_t,
            )
        };
        if map == libc::MAP_FAILED {
            return Err(TcError::DevMem {
                path,
                source: io::Error::last_os_error(),
            });
        }
        debug!("mapped {:#010x}+{:#x} from /dev/mem", phys, len);

        Ok(DevMem {
            map,
            maplen,
            delta,
            _devmem: devmem,
        })
    }

    fn reg_ptr(&self, offset: usize) -> *mut u32 {
        assert!(offset % 4 == 0 && self.delta + offset + 4 <= self.maplen);
        unsafe { (self.map as *mut u8).add(self.delta + offset) as *mut u32 }
    }

    pub fn read32(&self, offset: usize) -> u32 {
        unsafe { ptr::read_volatile(self.reg_ptr(offset)) }
    }

    pub fn write32(&self, offset: usize, value: u32) {
        unsafe { ptr::write_volatile(self.reg_ptr(offset), value) }
    }
}

impl Drop for DevMem {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.map, self.maplen);
        }
    }
}

/// Byte offset of a channel register within the block window.
fn ch_reg(channel: usize, reg: usize) -> usize {
    channel * CHANNEL_SPAN + reg
}

/// One mapped TC block.
pub struct TcBlock {
    mem: DevMem,
}

impl TcBlock {
    pub fn map(base: usize) -> Result<TcBlock, TcError> {
        Ok(TcBlock {
            mem: DevMem::map(base, TC_BLOCK_SPAN)?,
        })
    }

    fn check_channel(channel: usize) -> Result<(), TcError> {
        if channel >= CHANNELS_PER_BLOCK {
            return Err(TcError::BadChannel(channel));
        }
        Ok(())
    }

    /// Clear register write protection for the whole block.
    pub fn unlock(&self) {
        self.mem.write32(regs::WPMR, WPMR_KEY);
    }

    /// Program the channel for the given frequency and duty cycle and
    /// start its clock.  Returns the resolved settings.
    pub fn configure_waveform(
        &self,
        channel: usize,
        pclk_hz: u64,
        freq_hz: u64,
        duty_pct: u32,
    ) -> Result<Waveform, TcError> {
        TcBlock::check_channel(channel)?;
        let wf = Waveform::compute(pclk_hz, freq_hz, duty_pct)?;

        self.unlock();
        self.mem.write32(ch_reg(channel, regs::CCR), CCR_CLKDIS);
        self.mem.write32(ch_reg(channel, regs::IDR), 0xFFFF_FFFF);
        self.mem.write32(ch_reg(channel, regs::CMR), wf.cmr());
        self.mem.write32(ch_reg(channel, regs::RC), wf.rc);
        self.mem.write32(ch_reg(channel, regs::RA), wf.ra);
        self.mem
            .write32(ch_reg(channel, regs::CCR), CCR_CLKEN | CCR_SWTRG);

        info!(
            "channel {}: clock {} Hz (TCCLKS={}), RC={}, RA={}, actual {} Hz",
            channel,
            wf.clock_hz,
            wf.tcclks,
            wf.rc,
            wf.ra,
            wf.actual_hz()
        );
        Ok(wf)
    }

    /// Stop the channel clock; TIOA holds its last level.
    pub fn disable(&self, channel: usize) -> Result<(), TcError> {
        TcBlock::check_channel(channel)?;
        self.unlock();
        self.mem.write32(ch_reg(channel, regs::CCR), CCR_CLKDIS);
        Ok(())
    }

    /// Raw channel status register.
    pub fn status(&self, channel: usize) -> Result<u32, TcError> {
        TcBlock::check_channel(channel)?;
        Ok(self.mem.read32(ch_reg(channel, regs::SR)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PCLK: u64 = 83_000_000;

    #[test]
    fn waveform_midrange() {
        let wf = Waveform::compute(PCLK, 1_000, 50).unwrap();
        assert_eq!(wf.tcclks, 0);
        assert_eq!(wf.clock_hz, PCLK / 2);
        assert_eq!(wf.rc, 41_500);
        assert_eq!(wf.ra, 20_750);
        assert_eq!(wf.actual_hz(), 1_000);
    }

    #[test]
    fn waveform_duty_scaling() {
        let wf = Waveform::compute(PCLK, 1_000, 10).unwrap();
        assert_eq!(wf.ra, 4_150);
        let wf = Waveform::compute(PCLK, 1_000, 99).unwrap();
        assert_eq!(wf.ra, 41_085);
    }

    #[test]
    fn waveform_limits() {
        // Highest representable frequency: RC of exactly 2.
        let wf = Waveform::compute(PCLK, 20_000_000, 50).unwrap();
        assert_eq!(wf.rc, 2);
        assert_eq!(wf.ra, 1);

        assert!(matches!(
            Waveform::compute(PCLK, 25_000_000, 50),
            Err(TcError::FreqOutOfRange(_))
        ));
        assert!(matches!(
            Waveform::compute(PCLK, 0, 50),
            Err(TcError::FreqOutOfRange(0))
        ));
    }

    #[test]
    fn waveform_duty_bounds() {
        assert!(matches!(
            Waveform::compute(PCLK, 1_000, 0),
            Err(TcError::DutyOutOfRange(0))
        ));
        assert!(matches!(
            Waveform::compute(PCLK, 1_000, 100),
            Err(TcError::DutyOutOfRange(100))
        ));
        // RA is pinned inside 1..RC-1 even for extreme duty requests.
        let wf = Waveform::compute(PCLK, 20_000_000, 99).unwrap();
        assert_eq!(wf.ra, 1);
    }

    #[test]
    fn cmr_encoding() {
        let wf = Waveform::compute(PCLK, 1_000, 50).unwrap();
        let cmr = wf.cmr();
        assert_eq!(cmr & 0x7, 0); // TCCLKS
        assert_ne!(cmr & CMR_WAVE, 0);
        assert_eq!(cmr & (3 << 13), CMR_WAVSEL_UP_RC);
        assert_eq!(cmr & (3 << 16), CMR_ACPA_CLEAR);
        assert_eq!(cmr & (3 << 18), CMR_ACPC_SET);
    }

    #[test]
    fn register_layout() {
        assert_eq!(ch_reg(0, regs::CCR), 0x00);
        assert_eq!(ch_reg(1, regs::RC), 0x5C);
        assert_eq!(ch_reg(2, regs::SR), 0xA0);
        assert_eq!(regs::WPMR, 0xE4);
    }
}
