//! Human-friendly byte sizes (`"20GiB"`, `"500MB"`, or a plain integer).

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

const UNITS: &[(&str, u64)] = &[
    ("b", 1),
    ("k", 1_000),
    ("kb", 1_000),
    ("kib", 1 << 10),
    ("m", 1_000_000),
    ("mb", 1_000_000),
    ("mib", 1 << 20),
    ("g", 1_000_000_000),
    ("gb", 1_000_000_000),
    ("gib", 1 << 30),
    ("t", 1_000_000_000_000),
    ("tb", 1_000_000_000_000),
    ("tib", 1 << 40),
];

/// A number of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "RawSize")]
pub struct ByteSize(u64);

impl ByteSize {
    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        let number: u64 = number.parse().map_err(|_| format!("`{s}` does not start with a whole number"))?;
        let unit = unit.trim().to_ascii_lowercase();
        if unit.is_empty() {
            return Ok(Self(number));
        }
        let Some((_, multiplier)) = UNITS.iter().find(|(name, _)| *name == unit) else {
            return Err(format!("unknown size unit `{unit}`"));
        };
        number.checked_mul(*multiplier).map(Self).ok_or_else(|| format!("`{s}` overflows 64 bits"))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSize {
    Bytes(u64),
    Text(String),
}

impl TryFrom<RawSize> for ByteSize {
    type Error = String;
    fn try_from(raw: RawSize) -> Result<Self, Self::Error> {
        match raw {
            RawSize::Bytes(bytes) => Ok(Self(bytes)),
            RawSize::Text(text) => text.parse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1024", 1024)]
    #[case("0", 0)]
    #[case("10B", 10)]
    #[case("2k", 2_000)]
    #[case("500MB", 500_000_000)]
    #[case("500 mb", 500_000_000)]
    #[case("1KiB", 1024)]
    #[case("20GiB", 20 * 1024 * 1024 * 1024)]
    #[case("3TB", 3_000_000_000_000)]
    fn test_parse(#[case] input: &str, #[case] expected: u64) {
        assert_eq!(input.parse::<ByteSize>().unwrap().bytes(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("GiB")]
    #[case("1.5GB")]
    #[case("12 parsecs")]
    #[case("99999999999TiB")]
    fn test_parse_rejects(#[case] input: &str) {
        assert!(input.parse::<ByteSize>().is_err());
    }
}
