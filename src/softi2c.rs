// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! Software I2C master driven over two GPIO lines.
//!
//! The engine reproduces I2C master signaling (START, STOP, byte write
//! with ACK sensing, byte read with ACK generation) by toggling a clock
//! and a data line through the [`Line`] trait.  Timing is approximated
//! with a monotonic-clock busy wait; I2C tolerates an arbitrarily slow
//! master, so preemption stretching a clock phase is harmless.
//!
//! Both lines are assumed to be wired open-drain style with external
//! pull-ups: a line is driven low or released to float high.  SCL can
//! optionally be force-driven high for setups without a pull-up on the
//! clock (no slave clock stretching is possible in that mode).

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use thiserror::Error;

use crate::core::{Direction, Line, LineError};

/// Error produced while running a bit-banged transaction.
#[derive(Debug, Error)]
pub enum I2cBbError {
    /// A written byte was not acknowledged and NAK-ignoring was not
    /// requested.  `index` is 1-based and counts the address byte.
    #[error("byte {index} (0x{value:02x}) not acknowledged by slave")]
    WriteNak { index: usize, value: u8 },

    /// The read-address byte was NAK'd on every attempt.
    #[error("read address 0x{address:02x} not acknowledged after {attempts} attempts")]
    ReadNak { address: u8, attempts: u32 },

    /// Nothing to do: no bytes to write and no read requested.
    #[error("transaction is empty")]
    Empty,

    /// A read was requested but neither an explicit slave address nor a
    /// first payload byte is available to derive the read address from.
    #[error("read requested but no slave address available")]
    NoReadAddress,

    /// A zero bus frequency cannot be clocked.
    #[error("bus frequency must be nonzero")]
    ZeroFrequency,

    #[error(transparent)]
    Line(#[from] LineError),
}

/// Bus timing parameters.
///
/// [`I2cBus::half_clock_delay`] spins for one quarter of the nominal bit
/// period; it runs twice per SCL transition, four times per full clock.
/// Precision is not a goal, only a lower bound on the cycle time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    quarter_period: Duration,
}

impl Timing {
    /// Timing for a nominal bus frequency in hertz.  Zero is refused;
    /// [`Timing::disabled`] is the way to run without delays.
    pub fn from_frequency(hz: u32) -> Result<Timing, I2cBbError> {
        if hz == 0 {
            return Err(I2cBbError::ZeroFrequency);
        }
        Ok(Timing {
            quarter_period: Duration::from_nanos(250_000_000 / u64::from(hz)),
        })
    }

    /// No delays at all.  Useful against the simulation double and for
    /// throughput experiments on real pins.
    pub fn disabled() -> Timing {
        Timing {
            quarter_period: Duration::ZERO,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.quarter_period == Duration::ZERO
    }

    pub fn quarter_period(&self) -> Duration {
        self.quarter_period
    }
}

impl Default for Timing {
    /// Standard-mode 100 kHz.
    fn default() -> Timing {
        Timing {
            quarter_period: Duration::from_nanos(2_500),
        }
    }
}

/// One write-then-read exchange with a single slave.
///
/// Built once from CLI input and consumed by [`I2cBus::run`].  When
/// `address` is `None` the first payload byte is taken as the already
/// direction-encoded address byte.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// 7-bit slave address, prepended as `(address << 1) | W`.
    pub address: Option<u8>,
    /// Bytes clocked out during the write phase.
    pub payload: Vec<u8>,
    /// Number of bytes to read back after the write phase.
    pub read_len: usize,
    /// Keep going after a write-phase NAK instead of aborting.
    pub ignore_nak: bool,
    /// Extra attempts when the read-address byte is NAK'd.
    pub read_retries: u32,
    /// Pause between read-address retries.
    pub retry_wait: Duration,
    /// Explicit wait between the write and read phases.
    pub read_delay: Duration,
}

impl Default for Transaction {
    fn default() -> Transaction {
        Transaction {
            address: None,
            payload: Vec::new(),
            read_len: 0,
            ignore_nak: false,
            read_retries: 0,
            retry_wait: Duration::from_millis(1),
            read_delay: Duration::ZERO,
        }
    }
}

impl Transaction {
    /// Bytes clocked out during the write phase.  A pure read (explicit
    /// address, empty payload) has no write phase: the address is only
    /// ever sent with the R bit, by the read loop.
    fn wire_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + 1);
        if let Some(addr) = self.address {
            if !self.payload.is_empty() || self.read_len == 0 {
                bytes.push(addr << 1);
            }
        }
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    fn read_address(&self) -> Option<u8> {
        self.address
            .map(|a| (a << 1) | 1)
            .or_else(|| self.payload.first().map(|b| b | 1))
    }
}

/// Bit-banged I2C master owning its clock and data lines.
pub struct I2cBus<C: Line, D: Line> {
    scl: C,
    sda: D,
    timing: Timing,
    scl_push_pull: bool,
}

impl<C: Line, D: Line> I2cBus<C, D> {
    pub fn new(scl: C, sda: D) -> I2cBus<C, D> {
        I2cBus {
            scl,
            sda,
            timing: Timing::default(),
            scl_push_pull: false,
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> I2cBus<C, D> {
        self.timing = timing;
        self
    }

    /// Actively drive SCL high instead of releasing it to the pull-up.
    pub fn with_forced_scl(mut self) -> I2cBus<C, D> {
        self.scl_push_pull = true;
        self
    }

    /// Put both lines into the idle-bus state: SDA released to float
    /// high, SCL high.
    pub fn init(&mut self) -> Result<(), I2cBbError> {
        self.sda_release()?;
        self.scl_high()?;
        self.half_clock_delay();
        Ok(())
    }

    /// Generate a START condition: with SCL low bring SDA high, raise
    /// SCL, then pull SDA low while SCL is high.  Also serves as a
    /// repeated START between the write and read phases.
    pub fn start(&mut self) -> Result<(), I2cBbError> {
        self.scl_low()?;
        self.half_clock_delay();
        self.sda_release()?;
        self.half_clock_delay();
        self.scl_high()?;
        self.half_clock_delay();
        self.sda_low()?;
        self.half_clock_delay();
        trace!("start");
        Ok(())
    }

    /// Generate a STOP condition: with SCL low pull SDA low, raise SCL,
    /// then release SDA while SCL is high.  Idles the bus.
    pub fn stop(&mut self) -> Result<(), I2cBbError> {
        self.scl_low()?;
        self.half_clock_delay();
        self.sda_low()?;
        self.half_clock_delay();
        self.scl_high()?;
        self.half_clock_delay();
        self.sda_release()?;
        self.half_clock_delay();
        trace!("stop");
        Ok(())
    }

    /// Clock out one byte MSB-first and sample the slave's ACK on the
    /// ninth clock.  Returns `true` when the slave pulled SDA low.
    ///
    /// The caller decides what a NAK means; nothing is aborted here.
    pub fn write_byte(&mut self, byte: u8) -> Result<bool, I2cBbError> {
        self.scl_low()?;
        for bit in (0..8).rev() {
            self.sda_set(byte & (1 << bit) != 0)?;
            self.half_clock_delay();
            self.scl_high()?;
            self.half_clock_delay();
            self.half_clock_delay();
            self.scl_low()?;
            self.half_clock_delay();
        }

        // Ninth clock: release SDA and see whether the slave holds it low.
        self.sda_release()?;
        self.half_clock_delay();
        self.scl_high()?;
        self.half_clock_delay();
        let ack = !self.sda.read_value()?;
        self.half_clock_delay();
        self.scl_low()?;
        self.half_clock_delay();

        trace!("write 0x{:02x} {}", byte, if ack { "ack" } else { "nak" });
        Ok(ack)
    }

    /// Clock in one byte MSB-first.  Unless `is_last` is set, an ACK
    /// (SDA low) is driven on the ninth clock; for the final byte the
    /// ninth clock runs with SDA released, NAK-ing so the slave stops
    /// driving data.
    pub fn read_byte(&mut self, is_last: bool) -> Result<u8, I2cBbError> {
        self.scl_low()?;
        self.sda_release()?;

        let mut byte = 0u8;
        for _ in 0..8 {
            self.half_clock_delay();
            self.scl_high()?;
            self.half_clock_delay();
            byte = (byte << 1) | u8::from(self.sda.read_value()?);
            self.half_clock_delay();
            self.scl_low()?;
            self.half_clock_delay();
        }

        if !is_last {
            self.sda_low()?;
        }
        self.half_clock_delay();
        self.scl_high()?;
        self.half_clock_delay();
        self.half_clock_delay();
        self.scl_low()?;
        self.half_clock_delay();
        self.sda_release()?;

        trace!("read 0x{:02x}{}", byte, if is_last { " (last)" } else { "" });
        Ok(byte)
    }

    /// Busy-wait for a quarter of the nominal bit period on the
    /// monotonic clock.  A no-op when timing is disabled.  OS preemption
    /// only ever lengthens a phase, which the protocol tolerates.
    pub fn half_clock_delay(&self) {
        if self.timing.is_disabled() {
            return;
        }
        let deadline = Instant::now() + self.timing.quarter_period;
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }

    /// Run a complete transaction and return the bytes read back.
    ///
    /// Write-phase NAKs abort with a clean STOP (unless ignoring NAKs);
    /// a NAK'd read address is retried up to `read_retries` times, with a
    /// STOP and a pause between attempts.  A failing line aborts too, but
    /// a best-effort STOP is still issued so the bus is not left wedged.
    pub fn run(&mut self, txn: &Transaction) -> Result<Vec<u8>, I2cBbError> {
        match self.run_protocol(txn) {
            Err(e @ I2cBbError::Line(_)) => {
                warn!("line failure mid-transaction, issuing STOP: {}", e);
                let _ = self.stop();
                Err(e)
            }
            other => other,
        }
    }

    fn run_protocol(&mut self, txn: &Transaction) -> Result<Vec<u8>, I2cBbError> {
        let bytes = txn.wire_bytes();
        if bytes.is_empty() && txn.read_len == 0 {
            return Err(I2cBbError::Empty);
        }

        self.init()?;

        if !bytes.is_empty() {
            debug!("write phase: {} byte(s)", bytes.len());
            self.start()?;
            for (i, &b) in bytes.iter().enumerate() {
                let ack = self.write_byte(b)?;
                if !ack {
                    if !txn.ignore_nak {
                        self.stop()?;
                        return Err(I2cBbError::WriteNak {
                            index: i + 1,
                            value: b,
                        });
                    }
                    warn!("ignoring NAK for byte {} (0x{:02x})", i + 1, b);
                }
            }
        }

        if txn.read_len == 0 {
            self.stop()?;
            return Ok(Vec::new());
        }

        if txn.read_delay > Duration::ZERO {
            thread::sleep(txn.read_delay);
        }

        let read_addr = txn.read_address().ok_or(I2cBbError::NoReadAddress)?;
        debug!(
            "read phase: {} byte(s) from 0x{:02x}",
            txn.read_len, read_addr
        );

        let mut attempts = 0;
        loop {
            attempts += 1;
            self.start()?;
            if self.write_byte(read_addr)? {
                break;
            }
            self.stop()?;
            if attempts > txn.read_retries {
                return Err(I2cBbError::ReadNak {
                    address: read_addr,
                    attempts,
                });
            }
            debug!("read address NAK'd, retrying (attempt {})", attempts + 1);
            thread::sleep(txn.retry_wait);
        }

        let mut out = Vec::with_capacity(txn.read_len);
        for i in 0..txn.read_len {
            out.push(self.read_byte(i + 1 == txn.read_len)?);
        }
        self.stop()?;
        Ok(out)
    }

    // Open-drain style line control.  Values are latched before the
    // direction flips so an output never glitches through the wrong
    // level (see the Line contract).

    fn sda_set(&mut self, bit: bool) -> Result<(), I2cBbError> {
        if bit {
            self.sda_release()
        } else {
            self.sda_low()
        }
    }

    fn sda_low(&mut self) -> Result<(), I2cBbError> {
        self.sda.write_value(false)?;
        self.sda.set_direction(Direction::Out)?;
        Ok(())
    }

    fn sda_release(&mut self) -> Result<(), I2cBbError> {
        self.sda.set_direction(Direction::In)?;
        Ok(())
    }

    fn scl_low(&mut self) -> Result<(), I2cBbError> {
        self.scl.write_value(false)?;
        self.scl.set_direction(Direction::Out)?;
        Ok(())
    }

    fn scl_high(&mut self) -> Result<(), I2cBbError> {
        if self.scl_push_pull {
            self.scl.write_value(true)?;
            self.scl.set_direction(Direction::Out)?;
        } else {
            self.scl.set_direction(Direction::In)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{BusEvent, SoftSlave};
    use std::time::Instant;

    fn bus_for(slave: &SoftSlave) -> I2cBus<crate::mock::MockLine, crate::mock::MockLine> {
        let (scl, sda) = slave.lines();
        I2cBus::new(scl, sda).with_timing(Timing::disabled())
    }

    #[test]
    fn write_byte_is_msb_first_and_clean() {
        for &value in &[0x00u8, 0xFF, 0xA5, 0x5A, 0xD0] {
            let slave = SoftSlave::new(value >> 1);
            let mut bus = bus_for(&slave);
            bus.init().unwrap();
            bus.start().unwrap();
            let ack = bus.write_byte(value).unwrap();
            assert!(ack, "slave should ack its own address byte 0x{:02x}", value);
            // Exactly one start and one byte seen by the slave proves both
            // the bit order and that SDA only moved while SCL was low.
            assert_eq!(
                slave.events(),
                vec![
                    BusEvent::Start,
                    BusEvent::Write {
                        value,
                        acked: true
                    }
                ]
            );
        }
    }

    #[test]
    fn unmatched_address_is_nakked() {
        let slave = SoftSlave::new(0x2A);
        let mut bus = bus_for(&slave);
        bus.init().unwrap();
        bus.start().unwrap();
        assert!(!bus.write_byte(0x30 << 1).unwrap());
    }

    #[test]
    fn start_stop_leaves_idle_bus() {
        let slave = SoftSlave::new(0x10);
        let mut bus = bus_for(&slave);
        bus.init().unwrap();
        assert_eq!(slave.levels(), (true, true));
        bus.start().unwrap();
        bus.stop().unwrap();
        assert_eq!(slave.events(), vec![BusEvent::Start, BusEvent::Stop]);
        assert_eq!(slave.levels(), (true, true));
    }

    #[test]
    fn read_byte_ack_pulse_only_when_not_last() {
        let slave = SoftSlave::new(0x3C);
        slave.load_read_data(&[0x11, 0x22]);
        let mut bus = bus_for(&slave);
        bus.init().unwrap();
        bus.start().unwrap();
        assert!(bus.write_byte((0x3C << 1) | 1).unwrap());
        assert_eq!(bus.read_byte(false).unwrap(), 0x11);
        assert_eq!(bus.read_byte(true).unwrap(), 0x22);
        bus.stop().unwrap();
        assert_eq!(
            slave.events(),
            vec![
                BusEvent::Start,
                BusEvent::Write {
                    value: (0x3C << 1) | 1,
                    acked: true
                },
                BusEvent::Read {
                    value: 0x11,
                    acked: true
                },
                BusEvent::Read {
                    value: 0x22,
                    acked: false
                },
                BusEvent::Stop,
            ]
        );
    }

    #[test]
    fn register_read_transaction_sequence() {
        // Write register pointer 0x00 to 0x68, then read 8 bytes back.
        let data = [0x10u8, 0x21, 0x32, 0x43, 0x54, 0x65, 0x76, 0x87];
        let slave = SoftSlave::new(0x68);
        slave.load_read_data(&data);
        let mut bus = bus_for(&slave);

        let txn = Transaction {
            address: Some(0x68),
            payload: vec![0x00],
            read_len: 8,
            ..Transaction::default()
        };
        let got = bus.run(&txn).unwrap();
        assert_eq!(got, data);
        assert_eq!(slave.written(), vec![0x00]);

        let mut expected = vec![
            BusEvent::Start,
            BusEvent::Write {
                value: 0xD0,
                acked: true,
            },
            BusEvent::Write {
                value: 0x00,
                acked: true,
            },
            BusEvent::Start,
            BusEvent::Write {
                value: 0xD1,
                acked: true,
            },
        ];
        for (i, &value) in data.iter().enumerate() {
            expected.push(BusEvent::Read {
                value,
                acked: i + 1 < data.len(),
            });
        }
        expected.push(BusEvent::Stop);
        assert_eq!(slave.events(), expected);
    }

    #[test]
    fn first_byte_nak_stops_once_and_reports_index_one() {
        let slave = SoftSlave::new(0x21);
        slave.set_respond(false);
        let mut bus = bus_for(&slave);

        let txn = Transaction {
            address: Some(0x21),
            payload: vec![0x01, 0x02],
            ..Transaction::default()
        };
        match bus.run(&txn) {
            Err(I2cBbError::WriteNak { index, value }) => {
                assert_eq!(index, 1);
                assert_eq!(value, 0x21 << 1);
            }
            other => panic!("expected WriteNak, got {:?}", other),
        }
        // One start, the NAK'd address byte, exactly one stop; the
        // payload bytes were never sent.
        assert_eq!(
            slave.events(),
            vec![
                BusEvent::Start,
                BusEvent::Write {
                    value: 0x21 << 1,
                    acked: false
                },
                BusEvent::Stop,
            ]
        );
    }

    #[test]
    fn ignore_nak_pushes_through_write_phase() {
        let slave = SoftSlave::new(0x21);
        slave.set_respond(false);
        let mut bus = bus_for(&slave);

        let txn = Transaction {
            address: Some(0x21),
            payload: vec![0x01],
            ignore_nak: true,
            ..Transaction::default()
        };
        assert!(bus.run(&txn).unwrap().is_empty());
        assert_eq!(
            slave.events(),
            vec![
                BusEvent::Start,
                BusEvent::Write {
                    value: 0x21 << 1,
                    acked: false
                },
                BusEvent::Write {
                    value: 0x01,
                    acked: false
                },
                BusEvent::Stop,
            ]
        );
    }

    #[test]
    fn read_nak_retries_bounded_start_count() {
        let slave = SoftSlave::new(0x68);
        slave.set_nak_reads(true);
        let mut bus = bus_for(&slave);

        let txn = Transaction {
            address: Some(0x68),
            payload: Vec::new(),
            read_len: 4,
            read_retries: 2,
            retry_wait: Duration::ZERO,
            ..Transaction::default()
        };
        match bus.run(&txn) {
            Err(I2cBbError::ReadNak { address, attempts }) => {
                assert_eq!(address, 0xD1);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected ReadNak, got {:?}", other),
        }
        let starts = slave
            .events()
            .iter()
            .filter(|e| **e == BusEvent::Start)
            .count();
        assert_eq!(starts, 3, "initial attempt plus two retries");
    }

    #[test]
    fn caller_encoded_address_byte_drives_read_address() {
        let slave = SoftSlave::new(0x68);
        slave.load_read_data(&[0xEE]);
        let mut bus = bus_for(&slave);

        // No explicit address: first payload byte already carries W.
        let txn = Transaction {
            payload: vec![0xD0, 0x07],
            read_len: 1,
            ..Transaction::default()
        };
        assert_eq!(bus.run(&txn).unwrap(), vec![0xEE]);
        assert!(slave.events().contains(&BusEvent::Write {
            value: 0xD1,
            acked: true
        }));
    }

    #[test]
    fn line_fault_aborts_with_stop_attempt() {
        let slave = SoftSlave::new(0x50);
        let (scl, mut sda) = slave.lines();
        sda.fail_after(6);
        let mut bus = I2cBus::new(scl, sda).with_timing(Timing::disabled());

        let txn = Transaction {
            address: Some(0x50),
            payload: vec![0xAB],
            ..Transaction::default()
        };
        match bus.run(&txn) {
            Err(I2cBbError::Line(_)) => {}
            other => panic!("expected Line error, got {:?}", other),
        }
    }

    #[test]
    fn empty_transaction_is_rejected() {
        let slave = SoftSlave::new(0x01);
        let mut bus = bus_for(&slave);
        match bus.run(&Transaction::default()) {
            Err(I2cBbError::Empty) => {}
            other => panic!("expected Empty, got {:?}", other),
        }
    }

    #[test]
    fn pure_read_without_address_is_rejected() {
        let slave = SoftSlave::new(0x01);
        let mut bus = bus_for(&slave);
        let txn = Transaction {
            read_len: 2,
            ..Transaction::default()
        };
        match bus.run(&txn) {
            Err(I2cBbError::NoReadAddress) => {}
            other => panic!("expected NoReadAddress, got {:?}", other),
        }
    }

    #[test]
    fn timing_quarter_period() {
        assert_eq!(
            Timing::from_frequency(100_000).unwrap().quarter_period(),
            Duration::from_nanos(2_500)
        );
        assert_eq!(
            Timing::from_frequency(400_000).unwrap().quarter_period(),
            Duration::from_nanos(625)
        );
        assert_eq!(Timing::default(), Timing::from_frequency(100_000).unwrap());
        assert!(Timing::disabled().is_disabled());
        assert!(!Timing::default().is_disabled());
    }

    #[test]
    fn zero_frequency_is_an_error_not_a_panic() {
        match Timing::from_frequency(0) {
            Err(I2cBbError::ZeroFrequency) => {}
            other => panic!("expected ZeroFrequency, got {:?}", other),
        }
    }

    // Smoke test only: checks that the delay loop enforces a lower bound
    // on the cycle time.  Slow by construction, so not run by default.
    #[test]
    #[ignore]
    fn delay_loop_enforces_lower_bound() {
        let slave = SoftSlave::new(0x01);
        let (scl, sda) = slave.lines();
        let bus = I2cBus::new(scl, sda).with_timing(Timing::from_frequency(1_000_000).unwrap());

        let cycles = 10_000_000u32;
        let quarters = cycles * 4;
        let begin = Instant::now();
        for _ in 0..quarters {
            bus.half_clock_delay();
        }
        let floor = bus.timing.quarter_period() * quarters;
        assert!(begin.elapsed() >= floor);
    }
}
