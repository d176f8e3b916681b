// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

// PWM-like waveforms from a SAMA5D2 Timer Counter channel, programmed
// through /dev/mem.

use std::convert::TryFrom;
use std::error::Error;
use std::process;

use docopt::{ArgvMap, Docopt};
use log::error;

use sama5_pio_tools::parse;
use sama5_pio_tools::tc::{TcBlock, TC0_BASE, TC1_BASE};

const USAGE: &str = "
Generate a frequency/duty-cycle waveform on a TC channel's TIOA pin.

The channel runs in waveform mode, counting up to RC; TIOA is set on
the RC wrap and cleared on the RA compare.  Needs the TC peripheral
clock enabled and the TIOA pin muxed to the TC function.

Usage:
  tcwave [options] [-v...] <channel> <freq>
  tcwave --off [options] [-v...] <channel>
  tcwave (-h | --help)

Arguments:
  <channel>  Channel within the block, 0-2.
  <freq>     Target frequency in Hz, e.g. 1k or 2M.

Options:
  --block=<n>    TC block, 0 or 1 [default: 0].
  --duty=<pct>   Duty cycle percent, 1-99 [default: 50].
  --pclk=<hz>    TC peripheral clock [default: 83M].
  --off          Stop the channel clock instead of programming it.
  -v, --verbose  Raise log verbosity (repeatable).
  -h, --help     Show this help text.
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

struct WaveArgs {
    base: usize,
    channel: usize,
    off: bool,
    freq: u64,
    duty: u32,
    pclk: u64,
}

/// Decode and validate every argument before `/dev/mem` is touched.
fn wave_args(args: &ArgvMap) -> Result<WaveArgs, Box<dyn Error>> {
    let base = match parse::number(args.get_str("--block"))? {
        0 => TC0_BASE,
        1 => TC1_BASE,
        n => return Err(format!("no TC block {} (blocks are 0 and 1)", n).into()),
    };
    let channel = usize::try_from(parse::number(args.get_str("<channel>"))?)
        .map_err(|_| "channel out of range")?;
    let off = args.get_bool("--off");
    let (freq, duty) = if off {
        (0, 0)
    } else {
        let freq = parse::number(args.get_str("<freq>"))?;
        let duty = u32::try_from(parse::number(args.get_str("--duty"))?)
            .map_err(|_| "duty cycle out of range")?;
        (freq, duty)
    };
    let pclk = parse::number(args.get_str("--pclk"))?;
    Ok(WaveArgs {
        base,
        channel,
        off,
        freq,
        duty,
        pclk,
    })
}

fn run(args: &ArgvMap) -> Result<(), Box<dyn Error>> {
    let wa = wave_args(args)?;
    let block = TcBlock::map(wa.base)?;

    if wa.off {
        block.disable(wa.channel)?;
        return Ok(());
    }

    let wf = block.configure_waveform(wa.channel, wa.pclk, wa.freq, wa.duty)?;
    println!(
        "channel {} running at {} Hz, duty {}% (RC={}, RA={})",
        wa.channel,
        wf.actual_hz(),
        wa.duty,
        wf.rc,
        wf.ra
    );
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
    fn wave_arguments_parse() {
        let args = argv(&["tcwave", "--block=1", "--duty=25", "2", "1k"]);
        let wa = wave_args(&args).unwrap();
        assert_eq!(wa.base, TC1_BASE);
        assert_eq!(wa.channel, 2);
        assert!(!wa.off);
        assert_eq!(wa.freq, 1_000);
        assert_eq!(wa.duty, 25);
        assert_eq!(wa.pclk, 83_000_000);
    }

    #[test]
    fn oversized_duty_is_rejected_not_wrapped() {
        // Would truncate to 100 under a plain cast.
        let args = argv(&["tcwave", "--duty=4294967396", "0", "1k"]);
        assert!(wave_args(&args).is_err());
    }

    #[test]
    fn verbose_flag_is_repeatable() {
        let args = argv(&["tcwave", "-vv", "--off", "0"]);
        assert_eq!(args.get_count("--verbose"), 2);
    }
}
