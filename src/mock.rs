// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! In-memory doubles for the GPIO [`Line`] contract.
//!
//! [`SoftSlave`] models a register-style I2C slave attached to a pair of
//! open-drain wires with pull-ups.  The two [`MockLine`] handles it hands
//! out behave like the sysfs pins: the master drives or releases them,
//! and the emulated slave reacts to the resulting SCL/SDA edges exactly
//! as a hardware slave would (address matching, ACK driving, data
//! shifting).  Every decoded bus event is recorded, which lets the
//! protocol tests assert on bit-exact signaling without real pins.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::{Direction, Line, LineError, LineResult};

/// One decoded event as seen from the slave side of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Start,
    Stop,
    /// A byte shifted in from the master (address or data) and whether
    /// this slave acknowledged it.
    Write { value: u8, acked: bool },
    /// A byte shifted out to the master and whether the master
    /// acknowledged it.
    Read { value: u8, acked: bool },
}

/// Master-side driver of one wire.
#[derive(Debug, Clone, Copy)]
struct Driver {
    dir: Direction,
    latch: bool,
}

impl Driver {
    fn new() -> Driver {
        Driver {
            dir: Direction::In,
            latch: false,
        }
    }

    fn level(&self) -> Option<bool> {
        match self.dir {
            Direction::In => None,
            Direction::Out => Some(self.latch),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Address,
    Data,
}

#[derive(Debug, Clone, Copy)]
enum SlaveState {
    Idle,
    /// Shifting a byte in, MSB first.
    Rx { shift: u8, nbits: u8, phase: Phase },
    /// Ninth clock of a received byte; ACK is already on the wire.
    AckClock { enter_read: bool },
    /// Shifting a byte out; `bit` is the index currently presented.
    Tx { byte: u8, bit: u8 },
    /// Ninth clock of a transmitted byte; master drives the ACK.
    TxAck { byte: u8 },
}

struct BusInner {
    scl: Driver,
    sda: Driver,
    /// Slave-side SDA drive: `Some(false)` pulls the line low.
    sda_slave: Option<bool>,
    prev_scl: bool,
    prev_sda: bool,

    state: SlaveState,
    address: u8,
    respond: bool,
    nak_reads: bool,
    /// Did the slave acknowledge the current transaction's address?
    addressed: bool,
    master_ack: bool,

    tx_data: Vec<u8>,
    tx_pos: usize,
    rx_data: Vec<u8>,
    events: Vec<BusEvent>,
}

impl BusInner {
    fn new(address: u8) -> BusInner {
        BusInner {
            scl: Driver::new(),
            sda: Driver::new(),
            sda_slave: None,
            prev_scl: true,
            prev_sda: true,
            state: SlaveState::Idle,
            address,
            respond: true,
            nak_reads: false,
            addressed: false,
            master_ack: false,
            tx_data: Vec::new(),
            tx_pos: 0,
            rx_data: Vec::new(),
            events: Vec::new(),
        }
    }

    fn scl_level(&self) -> bool {
        // Pull-up wins when nobody drives.
        self.scl.level().unwrap_or(true)
    }

    fn sda_level(&self) -> bool {
        // Wired-AND of the master and slave open-drain drivers.
        self.sda.level().unwrap_or(true) && self.sda_slave.unwrap_or(true)
    }

    /// Re-evaluate the wires after a master-side change and feed any
    /// edge into the slave state machine.
    fn settle(&mut self) {
        let scl = self.scl_level();
        let sda = self.sda_level();

        if scl && self.prev_scl && sda != self.prev_sda {
            if !sda {
                self.on_start();
            } else {
                self.on_stop();
            }
        }
        if scl && !self.prev_scl {
            self.on_scl_rising(sda);
        }
        if !scl && self.prev_scl {
            self.on_scl_falling();
        }

        self.prev_scl = scl;
        // The falling-edge handler may have moved the slave driver.
        self.prev_sda = self.sda_level();
    }

    fn on_start(&mut self) {
        self.state = SlaveState::Rx {
            shift: 0,
            nbits: 0,
            phase: Phase::Address,
        };
        self.sda_slave = None;
        self.master_ack = false;
        self.events.push(BusEvent::Start);
    }

    fn on_stop(&mut self) {
        self.state = SlaveState::Idle;
        self.sda_slave = None;
        self.addressed = false;
        self.events.push(BusEvent::Stop);
    }

    fn on_scl_rising(&mut self, sda: bool) {
        match self.state {
            SlaveState::Rx { shift, nbits, phase } if nbits < 8 => {
                self.state = SlaveState::Rx {
                    shift: (shift << 1) | u8::from(sda),
                    nbits: nbits + 1,
                    phase,
                };
            }
            SlaveState::TxAck { .. } => {
                self.master_ack = !sda;
            }
            _ => {}
        }
    }

    fn on_scl_falling(&mut self) {
        match self.state {
            SlaveState::Rx {
                shift,
                nbits: 8,
                phase,
            } => self.byte_received(shift, phase),
            SlaveState::AckClock { enter_read } => {
                self.sda_slave = None;
                if enter_read {
                    self.begin_tx();
                } else {
                    self.state = SlaveState::Rx {
                        shift: 0,
                        nbits: 0,
                        phase: Phase::Data,
                    };
                }
            }
            SlaveState::Tx { byte, bit } => {
                if bit == 7 {
                    self.sda_slave = None;
                    self.state = SlaveState::TxAck { byte };
                } else {
                    self.present(byte, bit + 1);
                    self.state = SlaveState::Tx { byte, bit: bit + 1 };
                }
            }
            SlaveState::TxAck { byte } => {
                let acked = self.master_ack;
                self.events.push(BusEvent::Read { value: byte, acked });
                if acked {
                    self.begin_tx();
                } else {
                    self.state = SlaveState::Idle;
                }
            }
            _ => {}
        }
    }

    fn byte_received(&mut self, value: u8, phase: Phase) {
        let (acked, enter_read) = match phase {
            Phase::Address => {
                let want_read = value & 1 == 1;
                let acked = self.respond
                    && (value >> 1) == self.address
                    && !(self.nak_reads && want_read);
                self.addressed = acked;
                (acked, acked && want_read)
            }
            Phase::Data => {
                let acked = self.addressed && self.respond;
                if acked {
                    self.rx_data.push(value);
                }
                (acked, false)
            }
        };
        self.events.push(BusEvent::Write { value, acked });
        self.sda_slave = if acked { Some(false) } else { None };
        self.state = SlaveState::AckClock { enter_read };
    }

    fn begin_tx(&mut self) {
        // Past the loaded data a real device typically shifts out 0xFF.
        let byte = *self.tx_data.get(self.tx_pos).unwrap_or(&0xFF);
        self.tx_pos += 1;
        self.present(byte, 0);
        self.state = SlaveState::Tx { byte, bit: 0 };
    }

    fn present(&mut self, byte: u8, bit: u8) {
        let high = byte & (0x80 >> bit) != 0;
        self.sda_slave = if high { None } else { Some(false) };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Scl,
    Sda,
}

/// One end of the emulated two-wire bus, usable wherever a real pin is.
pub struct MockLine {
    bus: Rc<RefCell<BusInner>>,
    role: Role,
    fuse: Option<usize>,
}

impl MockLine {
    /// Make every operation after the next `n` fail, to exercise the
    /// abort-and-STOP path of the protocol engine.
    pub fn fail_after(&mut self, n: usize) {
        self.fuse = Some(n);
    }

    fn step(&mut self) -> LineResult<()> {
        if let Some(left) = self.fuse.as_mut() {
            if *left == 0 {
                return Err(LineError::Other("injected line fault"));
            }
            *left -= 1;
        }
        Ok(())
    }

    fn driver<'a>(inner: &'a mut BusInner, role: Role) -> &'a mut Driver {
        match role {
            Role::Scl => &mut inner.scl,
            Role::Sda => &mut inner.sda,
        }
    }
}

impl Line for MockLine {
    fn set_direction(&mut self, dir: Direction) -> LineResult<()> {
        self.step()?;
        let mut inner = self.bus.borrow_mut();
        MockLine::driver(&mut inner, self.role).dir = dir;
        inner.settle();
        Ok(())
    }

    fn write_value(&mut self, value: bool) -> LineResult<()> {
        self.step()?;
        let mut inner = self.bus.borrow_mut();
        MockLine::driver(&mut inner, self.role).latch = value;
        inner.settle();
        Ok(())
    }

    fn read_value(&mut self) -> LineResult<bool> {
        self.step()?;
        let inner = self.bus.borrow();
        Ok(match self.role {
            Role::Scl => inner.scl_level(),
            Role::Sda => inner.sda_level(),
        })
    }
}

/// A software I2C slave plus the wires it hangs off.
pub struct SoftSlave {
    inner: Rc<RefCell<BusInner>>,
}

impl SoftSlave {
    /// Slave listening on the given 7-bit address, acknowledging writes
    /// and serving reads from the loaded data.
    pub fn new(address: u8) -> SoftSlave {
        SoftSlave {
            inner: Rc::new(RefCell::new(BusInner::new(address))),
        }
    }

    /// The `(scl, sda)` line pair for the master side.
    pub fn lines(&self) -> (MockLine, MockLine) {
        let mk = |role| MockLine {
            bus: Rc::clone(&self.inner),
            role,
            fuse: None,
        };
        (mk(Role::Scl), mk(Role::Sda))
    }

    /// When `false` the slave acknowledges nothing at all.
    pub fn set_respond(&self, respond: bool) {
        self.inner.borrow_mut().respond = respond;
    }

    /// NAK the address byte whenever its R bit is set, while still
    /// acknowledging writes.
    pub fn set_nak_reads(&self, nak: bool) {
        self.inner.borrow_mut().nak_reads = nak;
    }

    /// Queue the bytes served to master reads, starting from the first.
    pub fn load_read_data(&self, data: &[u8]) {
        let mut inner = self.inner.borrow_mut();
        inner.tx_data = data.to_vec();
        inner.tx_pos = 0;
    }

    /// All bus events decoded so far, in order.
    pub fn events(&self) -> Vec<BusEvent> {
        self.inner.borrow().events.clone()
    }

    /// Data bytes the slave accepted during write phases.
    pub fn written(&self) -> Vec<u8> {
        self.inner.borrow().rx_data.clone()
    }

    /// Current `(scl, sda)` wire levels.
    pub fn levels(&self) -> (bool, bool) {
        let inner = self.inner.borrow();
        (inner.scl_level(), inner.sda_level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_wires_float_high() {
        let slave = SoftSlave::new(0x42);
        assert_eq!(slave.levels(), (true, true));
    }

    #[test]
    fn master_drive_low_wins_over_pull_up() {
        let slave = SoftSlave::new(0x42);
        let (mut scl, mut sda) = slave.lines();
        scl.write_value(false).unwrap();
        scl.set_direction(Direction::Out).unwrap();
        assert_eq!(slave.levels(), (false, true));
        assert!(!scl.read_value().unwrap());
        assert!(sda.read_value().unwrap());
    }

    #[test]
    fn latch_is_retained_across_direction_changes() {
        let slave = SoftSlave::new(0x42);
        let (mut scl, _) = slave.lines();
        scl.write_value(true).unwrap();
        scl.set_direction(Direction::Out).unwrap();
        // Never dipped low, so the slave saw no edge at all.
        assert!(slave.events().is_empty());
        assert_eq!(slave.levels(), (true, true));
    }

    #[test]
    fn injected_fault_trips_after_limit() {
        let slave = SoftSlave::new(0x42);
        let (_, mut sda) = slave.lines();
        sda.fail_after(2);
        assert!(sda.read_value().is_ok());
        assert!(sda.write_value(false).is_ok());
        assert!(sda.set_direction(Direction::Out).is_err());
    }
}
