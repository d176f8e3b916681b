// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

// I2C transfers through the kernel i2c-dev character device.

use std::convert::TryFrom;
use std::error::Error;
use std::fmt::Write as _;
use std::process;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use docopt::{ArgvMap, Docopt};
use log::error;

use sama5_pio_tools::parse;
use sama5_pio_tools::I2cCharDev;

const USAGE: &str = "
Write to and read from an I2C slave through /dev/i2c-N.

By default the write and read phases are joined into one combined
transaction (repeated START, via I2C_RDWR); --plain uses separate
write()/read() calls with a STOP in between.  Read bytes are printed as
two-digit hex to standard output, sixteen per line.

Usage:
  i2cxfer [options] [-v...] <bus> <addr>
  i2cxfer --funcs [-v...] <bus>
  i2cxfer (-h | --help)

Arguments:
  <bus>   Bus number, or a device path such as /dev/i2c-1.
  <addr>  7-bit slave address (decimal or 0x hex).

Options:
  -w, --write=<hex>  Bytes to write, as a hex string.
  -r, --read=<n>     Bytes to read back [default: 0].
  --plain            Separate write/read transactions instead of I2C_RDWR.
  --words=<end>      Print the read bytes as 16-bit words, <end> is
                     `be` or `le`.
  --force            Claim the address even if a kernel driver owns it.
  --funcs            Print the adapter's capability flags and exit.
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

fn word_dump(buf: &[u8], big_endian: bool) -> Result<String, Box<dyn Error>> {
    if buf.len() % 2 != 0 {
        return Err("read an odd number of bytes, cannot print words".into());
    }
    let mut out = String::new();
    for (i, pair) in buf.chunks(2).enumerate() {
        let word = if big_endian {
            BigEndian::read_u16(pair)
        } else {
            LittleEndian::read_u16(pair)
        };
        if i > 0 {
            out.push(if i % 8 == 0 { '\n' } else { ' ' });
        }
        let _ = write!(out, "0x{:04x}", word);
    }
    Ok(out)
}

fn open_bus(spec: &str) -> Result<I2cCharDev, Box<dyn Error>> {
    if spec.starts_with('/') {
        Ok(I2cCharDev::open(spec)?)
    } else {
        let n = u32::try_from(parse::number(spec)?).map_err(|_| "bus number out of range")?;
        Ok(I2cCharDev::open_bus(n)?)
    }
}

fn run(args: &ArgvMap) -> Result<(), Box<dyn Error>> {
    if args.get_bool("--funcs") {
        let dev = open_bus(args.get_str("<bus>"))?;
        for (name, _) in dev.functionality()?.iter_names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let addr = parse::number(args.get_str("<addr>"))?;
    if addr > 0x7F {
        return Err(format!("slave address 0x{:x} does not fit 7 bits", addr).into());
    }
    let addr = addr as u16;

    let write_str = args.get_str("--write");
    let wbuf = if write_str.is_empty() {
        Vec::new()
    } else {
        parse::hex_bytes(write_str)?
    };
    let read_len = usize::try_from(parse::number(args.get_str("--read"))?)
        .map_err(|_| "read length out of range")?;
    let mut rbuf = vec![0u8; read_len];

    let mut dev = open_bus(args.get_str("<bus>"))?;

    if args.get_bool("--plain") {
        dev.set_slave_address(addr, args.get_bool("--force"))?;
        if !wbuf.is_empty() {
            dev.write(&wbuf)?;
        }
        if !rbuf.is_empty() {
            dev.read(&mut rbuf)?;
        }
    } else {
        if args.get_bool("--force") {
            // RDWR bypasses the bound address, but claiming it up front
            // surfaces an EBUSY conflict before any bus traffic.
            dev.set_slave_address(addr, true)?;
        }
        dev.write_read(addr, &wbuf, &mut rbuf)?;
    }

    if !rbuf.is_empty() {
        match args.get_str("--words") {
            "" => println!("{}", parse::hex_dump(&rbuf)),
            "be" => println!("{}", word_dump(&rbuf, true)?),
            "le" => println!("{}", word_dump(&rbuf, false)?),
            other => return Err(format!("--words takes `be` or `le`, not `{}`", other).into()),
        }
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
        let args = argv(&["i2cxfer", "-vv", "1", "0x68"]);
        assert_eq!(args.get_count("--verbose"), 2);
    }

    #[test]
    fn word_dump_formats_both_endiannesses() {
        assert_eq!(word_dump(&[0x12, 0x34], true).unwrap(), "0x1234");
        assert_eq!(word_dump(&[0x12, 0x34], false).unwrap(), "0x3412");
        assert!(word_dump(&[0x12], true).is_err());
    }
}
