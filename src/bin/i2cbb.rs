// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

// Bit-banged I2C master over two sysfs GPIO lines.

use std::convert::TryFrom;
use std::error::Error;
use std::process;
use std::time::Duration;

use docopt::{ArgvMap, Docopt};
use log::error;

use sama5_pio_tools::gpio::{PinSpec, SysfsLine};
use sama5_pio_tools::parse;
use sama5_pio_tools::{I2cBus, Timing, Transaction};

const USAGE: &str = "
Drive an I2C bus by bit-banging two GPIO lines.

Both lines are treated as open-drain with external pull-ups: driven low
or released to float high.  Read bytes are printed as two-digit hex to
standard output, sixteen per line.

Usage:
  i2cbb [options] [-v...] --scl=<pin> --sda=<pin>
  i2cbb (-h | --help)

Options:
  --scl=<pin>        Clock line: PA17-style pin name or raw GPIO number.
  --sda=<pin>        Data line.
  -a, --addr=<addr>  7-bit slave address, prepended to the payload with
                     the W bit.  Without it the first payload byte must
                     already carry the direction bit.
  -w, --write=<hex>  Payload bytes as a hex string (e.g. 'd0 00').
  -r, --read=<n>     Read <n> bytes after the write phase [default: 0].
  --ignore-nak       Keep clocking after a write-phase NAK.
  --retries=<n>      Extra attempts for a NAK'd read address [default: 0].
  --wait=<us>        Microseconds between write and read phase [default: 0].
  --freq=<hz>        Nominal bus clock, e.g. 100k [default: 100k].
  --no-delay         Disable the clock delay loop (as fast as the pins go).
  --force-scl-high   Actively drive SCL high instead of releasing it.
  --gpio-base=<n>    Kernel GPIO number of bank A bit 0 [default: 0].
  -v, --verbose      Raise log verbosity (repeatable).
  -h, --help         Show this help text.
";

fn init_logger(verbosity: u64) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();
}

fn pin_number(args: &ArgvMap, opt: &str, base: u32) -> Result<u32, Box<dyn Error>> {
    let spec: PinSpec = args
        .get_str(opt)
        .parse()
        .map_err(|e| format!("{}: {}", opt, e))?;
    Ok(spec.kernel_number(base))
}

fn build_transaction(args: &ArgvMap) -> Result<Transaction, Box<dyn Error>> {
    let mut txn = Transaction::default();

    let addr_str = args.get_str("--addr");
    if !addr_str.is_empty() {
        let addr = parse::number(addr_str)?;
        if addr > 0x7F {
            return Err(format!("slave address 0x{:x} does not fit 7 bits", addr).into());
        }
        txn.address = Some(addr as u8);
    }

    let write_str = args.get_str("--write");
    if !write_str.is_empty() {
        txn.payload = parse::hex_bytes(write_str)?;
    }
    if txn.address.is_none() && txn.payload.is_empty() {
        return Err("nothing to send: need --addr and/or --write".into());
    }

    txn.read_len = usize::try_from(parse::number(args.get_str("--read"))?)
        .map_err(|_| "read length out of range")?;
    txn.ignore_nak = args.get_bool("--ignore-nak");
    txn.read_retries = u32::try_from(parse::number(args.get_str("--retries"))?)
        .map_err(|_| "retry count out of range")?;
    txn.read_delay = Duration::from_micros(parse::number(args.get_str("--wait"))?);
    Ok(txn)
}

fn bus_timing(args: &ArgvMap) -> Result<Timing, Box<dyn Error>> {
    if args.get_bool("--no-delay") {
        return Ok(Timing::disabled());
    }
    let hz = u32::try_from(parse::number(args.get_str("--freq"))?)
        .map_err(|_| "bus frequency out of range")?;
    Ok(Timing::from_frequency(hz)?)
}

fn run(args: &ArgvMap) -> Result<(), Box<dyn Error>> {
    // Validate every argument before any pin is exported.
    let base = u32::try_from(parse::number(args.get_str("--gpio-base"))?)
        .map_err(|_| "GPIO base out of range")?;
    let scl_pin = pin_number(args, "--scl", base)?;
    let sda_pin = pin_number(args, "--sda", base)?;
    let timing = bus_timing(args)?;
    let txn = build_transaction(args)?;

    let scl = SysfsLine::export(scl_pin)?;
    let sda = SysfsLine::export(sda_pin)?;
    let mut bus = I2cBus::new(scl, sda).with_timing(timing);
    if args.get_bool("--force-scl-high") {
        bus = bus.with_forced_scl();
    }

    let received = bus.run(&txn)?;
    if !received.is_empty() {
        println!("{}", parse::hex_dump(&received));
    }
    Ok(())
}

fn main() {
    let args = Docopt::new(USAGE)
        .and_then(|d| d.parse())
        .unwrap_or_else(|e| e.exit());
    init_logger(args.get_count("--verbose"));

    if let Err(e) = run(&args) {
        error!("{}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(argv: &[&str]) -> ArgvMap {
        Docopt::new(USAGE)
            .unwrap()
            .argv(argv.iter().copied())
            .parse()
            .unwrap()
    }

    #[test]
    fn verbose_flag_is_repeatable() {
        let args = argv(&["i2cbb", "-vv", "--scl=PA17", "--sda=PA18"]);
        assert_eq!(args.get_count("--verbose"), 2);
    }

    #[test]
    fn zero_frequency_is_rejected_before_export() {
        let args = argv(&["i2cbb", "--freq=0", "--scl=PA17", "--sda=PA18"]);
        assert!(bus_timing(&args).is_err());
    }

    #[test]
    fn no_delay_skips_frequency_validation() {
        let args = argv(&["i2cbb", "--no-delay", "--freq=0", "--scl=PA17", "--sda=PA18"]);
        assert!(bus_timing(&args).unwrap().is_disabled());
    }

    #[test]
    fn oversized_retry_count_is_rejected() {
        let args = argv(&[
            "i2cbb",
            "--retries=4294967296",
            "-a",
            "0x68",
            "--scl=PA17",
            "--sda=PA18",
        ]);
        assert!(build_transaction(&args).is_err());
    }
}
