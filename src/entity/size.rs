use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Mul, Sub};

use humanize_rs::bytes;
use serde::{Deserialize, Serialize};

use crate::errors::ReconcileError;

/// Byte count of a block device or allocation
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Size(pub u64);

impl Size {
    pub const ZERO: Size = Size(0);

    pub fn bytes(self) -> u64 {
        self.0
    }

    pub fn round_up(self, granularity: Size) -> Size {
        if granularity.0 == 0 {
            return self;
        }

        Size(self.0.div_ceil(granularity.0) * granularity.0)
    }

    pub fn round_down(self, granularity: Size) -> Size {
        if granularity.0 == 0 {
            return self;
        }

        Size(self.0 / granularity.0 * granularity.0)
    }

    pub fn percent_of(self, percent: f64) -> Size {
        Size((self.0 as f64 * percent / 100.0).ceil() as u64)
    }

    /// Returns how many percent `self` must shrink to reach `target`
    pub fn shrink_percent(self, target: Size) -> f64 {
        if self.0 == 0 || target >= self {
            return 0.0;
        }

        (1.0 - target.0 as f64 / self.0 as f64) * 100.0
    }
}

impl Add for Size {
    type Output = Size;

    fn add(self, rhs: Size) -> Size {
        Size(self.0.saturating_add(rhs.0))
    }
}

// Device arithmetic never goes below zero
impl Sub for Size {
    type Output = Size;

    fn sub(self, rhs: Size) -> Size {
        Size(self.0.saturating_sub(rhs.0))
    }
}

impl Mul<u64> for Size {
    type Output = Size;

    fn mul(self, rhs: u64) -> Size {
        Size(self.0.saturating_mul(rhs))
    }
}

impl Sum for Size {
    fn sum<I: Iterator<Item = Size>>(iter: I) -> Size {
        iter.fold(Size::ZERO, |acc, s| acc + s)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

        if self.0 < 1024 {
            return write!(f, "{} B", self.0);
        }

        let mut value = self.0 as f64;
        let mut unit = "B";
        for u in UNITS {
            if value < 1024.0 {
                break;
            }
            value /= 1024.0;
            unit = u;
        }

        let value = format!("{value:.2}");
        let value = value.trim_end_matches('0').trim_end_matches('.');
        write!(f, "{value} {unit}")
    }
}

/// A declared size: either absolute or a percentage of the parent
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeSpec {
    Absolute(Size),
    Percent(f64),
}

impl SizeSpec {
    pub fn parse(s: &str) -> Result<Self, ReconcileError> {
        let s = s.trim();

        if let Some(percent) = s.strip_suffix('%') {
            let percent = percent.trim().parse::<f64>().map_err(|err| {
                ReconcileError::InvalidSize(format!("invalid percentage '{s}': {err}"))
            })?;

            if !percent.is_finite() || percent <= 0.0 {
                return Err(ReconcileError::InvalidSize(format!(
                    "invalid percentage '{s}': must be greater than zero"
                )));
            }

            return Ok(Self::Percent(percent));
        }

        parse_human_bytes(s).map(Self::Absolute)
    }

    /// Percentages are taken of `base` and both variants are rounded up to `granularity`
    pub fn resolve(&self, base: Option<Size>, granularity: Size) -> Result<Size, ReconcileError> {
        match self {
            Self::Absolute(size) => Ok(size.round_up(granularity)),
            Self::Percent(percent) => {
                let base = base.ok_or(ReconcileError::InvalidSize(format!(
                    "percentage size {percent}% requires a parent device"
                )))?;

                Ok(base.percent_of(*percent).round_up(granularity))
            }
        }
    }
}

/// Parses sizes like `10 GiB`, `1.5g` or `4096`. Fractional sizes are
/// rounded to the nearest byte.
pub fn parse_human_bytes(s: &str) -> Result<Size, ReconcileError> {
    let s = s.trim();
    let invalid = |reason: &str| ReconcileError::InvalidSize(format!("bad byte unit string {s}: {reason}"));

    // Plain byte counts, e.g. from lsblk --bytes
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        return s
            .parse::<u64>()
            .map(Size)
            .map_err(|err| ReconcileError::InvalidSize(format!("bad byte count {s}: {err}")));
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    if number.is_empty() {
        return Err(invalid("missing number"));
    }

    let value: f64 = number.parse().map_err(|_| invalid("bad number"))?;

    let unit = unit.trim().to_lowercase();
    let factor = match unit.is_empty() {
        true => 1,
        false => format!("1{unit}")
            .parse::<bytes::Bytes>()
            .map(|b| b.size() as u64)
            .map_err(|err| invalid(&err.to_string()))?,
    };

    let bytes = (value * factor as f64).round();
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(invalid("out of range"));
    }

    Ok(Size(bytes as u64))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::constants::sizes::{GIB, MIB};

    #[test]
    #[rustfmt::skip]
    fn test_parse_human_bytes() {
        let valids = vec![
            ("1kib", 1024), ("1 KiB", 1024), ("1k", 1000),
            ("10 GiB", 10 * GIB), ("10gib", 10 * GIB), ("10 G", 10_000_000_000),
            ("256MiB", 256 * MIB), ("0 MiB", 0), ("4096", 4096),
            ("1.5 GiB", 3 * GIB / 2), ("0.5 MiB", MIB / 2), ("10.29 GiB", 11_048_803_369),
            ("1048.576 KB", 1_048_576), (" 2.5gib ", 5 * GIB / 2),
        ];

        for (s, expected) in valids {
            match parse_human_bytes(s) {
                Ok(size) => assert_eq!(Size(expected), size, "unexpected size for {s}"),
                Err(err) => panic!("{s} should be valid, but was invalid: {err}"),
            }
        }

        let invalids = vec![
            "", "GiB", "-1 GiB", "-0.5 GiB", "1.2.3 GiB", ".", "kibibyte", "2000EiB", "ten", "10 parsecs",
        ];

        for s in invalids {
            if let Ok(size) = parse_human_bytes(s) {
                panic!("{s} should be invalid, but got {size:?}");
            }
        }
    }

    #[test]
    fn test_size_spec() {
        struct Test {
            input: &'static str,
            base: Option<Size>,
            granularity: Size,
            expected: Size,
        }

        let tests = vec![
            Test {
                input: "10 GiB",
                base: None,
                granularity: Size(4 * MIB),
                expected: Size(10 * GIB),
            },
            Test {
                input: "50%",
                base: Some(Size(100 * GIB)),
                granularity: Size(4 * MIB),
                expected: Size(50 * GIB),
            },
            Test {
                input: "120%",
                base: Some(Size(100 * GIB)),
                granularity: Size(4 * MIB),
                expected: Size(120 * GIB),
            },
            Test {
                // 33% of 10 MiB is 3.3 MiB, rounded up to the extent size
                input: "33%",
                base: Some(Size(10 * MIB)),
                granularity: Size(4 * MIB),
                expected: Size(4 * MIB),
            },
            Test {
                input: "1000",
                base: None,
                granularity: Size(MIB),
                expected: Size(MIB),
            },
        ];

        for test in tests {
            let spec = SizeSpec::parse(test.input).expect("failed to parse size spec");
            let size = spec
                .resolve(test.base, test.granularity)
                .expect("failed to resolve size spec");

            assert_eq!(test.expected, size, "unexpected size for {}", test.input);
        }

        assert_matches!(SizeSpec::parse("0%"), Err(ReconcileError::InvalidSize(_)));
        assert_matches!(SizeSpec::parse("abc%"), Err(ReconcileError::InvalidSize(_)));
        assert_matches!(
            SizeSpec::parse("10%").unwrap().resolve(None, Size(MIB)),
            Err(ReconcileError::InvalidSize(_))
        );
    }

    #[test]
    fn test_size_display() {
        assert_eq!("512 B", Size(512).to_string());
        assert_eq!("10 GiB", Size(10 * GIB).to_string());
        assert_eq!("1.5 MiB", Size(MIB + MIB / 2).to_string());
    }

    #[test]
    fn test_shrink_percent() {
        assert_eq!(0.0, Size(100).shrink_percent(Size(200)));
        assert!((Size(100).shrink_percent(Size(99)) - 1.0).abs() < 1e-9);
    }
}
