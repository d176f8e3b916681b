// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! Small parsing helpers shared by the CLI front ends.

use std::fmt::Write as _;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid number `{0}`")]
    Number(String),
    #[error("invalid hex byte string `{0}`")]
    Hex(String),
}

/// Parse an unsigned number: decimal, `0x` hex, or decimal with a `k`
/// or `M` suffix (`100k` == 100000).
pub fn number(s: &str) -> Result<u64, ParseError> {
    let t = s.trim();
    let err = || ParseError::Number(s.to_string());

    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_err(|_| err());
    }

    let (digits, mult) = match t.char_indices().last() {
        Some((i, 'k')) | Some((i, 'K')) => (&t[..i], 1_000),
        Some((i, 'M')) => (&t[..i], 1_000_000),
        _ => (t, 1),
    };
    let base: u64 = digits.parse().map_err(|_| err())?;
    base.checked_mul(mult).ok_or_else(err)
}

/// Parse a hex byte string.  Separators (spaces, `:`, `,`) are allowed
/// between bytes; the digit count must be even.
pub fn hex_bytes(s: &str) -> Result<Vec<u8>, ParseError> {
    let err = || ParseError::Hex(s.to_string());
    let digits: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != ',')
        .collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(err());
    }
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let txt = std::str::from_utf8(pair).map_err(|_| err())?;
            u8::from_str_radix(txt, 16).map_err(|_| err())
        })
        .collect()
}

/// Format bytes as two-digit hex, space separated, sixteen per line.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(if i % 16 == 0 { '\n' } else { ' ' });
        }
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers() {
        assert_eq!(number("0").unwrap(), 0);
        assert_eq!(number("41500").unwrap(), 41_500);
        assert_eq!(number("100k").unwrap(), 100_000);
        assert_eq!(number("2M").unwrap(), 2_000_000);
        assert_eq!(number("0x68").unwrap(), 0x68);
        assert_eq!(number("0XfF").unwrap(), 0xFF);
        assert_eq!(number(" 12 ").unwrap(), 12);
    }

    #[test]
    fn bad_numbers() {
        assert!(number("").is_err());
        assert!(number("k").is_err());
        assert!(number("12q").is_err());
        assert!(number("0x").is_err());
        assert!(number("-3").is_err());
        assert!(number("99999999999999999999M").is_err());
    }

    #[test]
    fn hex_strings() {
        assert_eq!(hex_bytes("d000").unwrap(), vec![0xD0, 0x00]);
        assert_eq!(hex_bytes("D0 00 ff").unwrap(), vec![0xD0, 0x00, 0xFF]);
        assert_eq!(hex_bytes("a1:b2,c3").unwrap(), vec![0xA1, 0xB2, 0xC3]);
    }

    #[test]
    fn bad_hex_strings() {
        assert!(hex_bytes("").is_err());
        assert!(hex_bytes("abc").is_err());
        assert!(hex_bytes("zz").is_err());
        assert!(hex_bytes("  ").is_err());
    }

    #[test]
    fn hex_dump_wraps_every_sixteen() {
        assert_eq!(hex_dump(&[]), "");
        assert_eq!(hex_dump(&[0xAB]), "ab");
        assert_eq!(hex_dump(&[1, 2, 3]), "01 02 03");

        let bytes: Vec<u8> = (0u8..18).collect();
        let dump = hex_dump(&bytes);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f"
        );
        assert_eq!(lines[1], "10 11");
    }
}
