//! Byte-size values with unit-preserving parsing and display.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::CoreError;

/// A non-negative quantity of bytes, displayed in the largest unit for
/// which the value is at least 1 (rounded up).
///
/// Internally this is always a byte count; `kb`/`mb`/`gb` are purely
/// display and parsing units, related by powers of 1024 (`1 KiB = 1024 B`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Size(u64);

/// One of the three display/parse units `Size` understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    /// Kilobytes (2^10 bytes).
    Kb,
    /// Megabytes (2^20 bytes).
    Mb,
    /// Gigabytes (2^30 bytes).
    Gb,
}

impl Unit {
    const fn bytes(self) -> u64 {
        match self {
            Unit::Kb => 1024,
            Unit::Mb => 1024 * 1024,
            Unit::Gb => 1024 * 1024 * 1024,
        }
    }

    const fn suffix(self) -> &'static str {
        match self {
            Unit::Kb => "kb",
            Unit::Mb => "mb",
            Unit::Gb => "gb",
        }
    }
}

impl Size {
    /// The smallest representable size: 1 KiB. Construction normalizes any
    /// input that would otherwise resolve to zero up to this value — there
    /// is no distinct "empty" `Size`, matching the reference implementation's
    /// behavior of always materializing a minimum-granularity non-zero size.
    pub const MIN_NONZERO: Size = Size(1024);

    /// Builds a normalized `Size` from a kilobyte count, flooring any
    /// fractional KiB and raising a zero result up to one KiB.
    fn from_kb(kb: u64) -> Self {
        if kb == 0 { Size(1024) } else { Size(kb * 1024) }
    }

    /// Constructs a `Size` from a byte count, normalizing to whole
    /// kilobytes (flooring) and raising zero up to 1 KiB.
    pub fn from_bytes(bytes: u64) -> Self {
        Size::from_kb(bytes / 1024)
    }

    /// Returns the raw byte count.
    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    /// Returns the size in whole kilobytes.
    fn as_kb(self) -> u64 {
        self.0 / 1024
    }

    /// Parses a `<int><unit>` string, where unit is one of `kb`, `mb`, `gb`
    /// (case-insensitive).
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        let (digits, unit) = [Unit::Gb, Unit::Mb, Unit::Kb]
            .into_iter()
            .find_map(|u| lower.strip_suffix(u.suffix()).map(|d| (d, u)))
            .ok_or_else(|| CoreError::InvalidSize(s.to_string()))?;

        let value: u64 = digits
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidSize(s.to_string()))?;

        Ok(Size::from_kb(value * (unit.bytes() / 1024)))
    }

    /// Multiplies by an integer scalar.
    pub fn multiply(self, factor: u64) -> Self {
        Size::from_kb(self.as_kb() * factor)
    }

    /// Integer floor-divides by an integer scalar, with ceiling semantics:
    /// the result is rounded up to the nearest whole kilobyte, so a
    /// positive dividend never rounds down to zero.
    pub fn div_ceil_by(self, divisor: u64) -> Result<Self, CoreError> {
        if divisor == 0 {
            return Err(CoreError::DivisionByZero);
        }
        Ok(Size::from_kb(self.as_kb().div_ceil(divisor)))
    }

    /// True-divides by another `Size`, yielding a dimensionless ratio.
    pub fn ratio(self, other: Size) -> Result<f64, CoreError> {
        if other.0 == 0 {
            return Err(CoreError::DivisionByZero);
        }
        Ok(self.0 as f64 / other.0 as f64)
    }

    /// Renders the value in kilobytes, as PBS/Slurm expect
    /// (`mem=8388608kb`).
    pub fn as_kb_floor(self) -> u64 {
        self.as_kb()
    }

    /// Picks the largest unit in which the value is >= 1, rounding the
    /// displayed number up.
    fn display_unit_and_value(self) -> (Unit, u64) {
        for unit in [Unit::Gb, Unit::Mb, Unit::Kb] {
            let base = unit.bytes();
            if self.0 >= base {
                return (unit, self.0.div_ceil(base));
            }
        }
        (Unit::Kb, if self.0 == 0 { 0 } else { 1 })
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (unit, value) = self.display_unit_and_value();
        write!(f, "{value}{}", unit.suffix())
    }
}

impl FromStr for Size {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Size::parse(s)
    }
}

impl TryFrom<String> for Size {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Size::parse(&value)
    }
}

impl From<Size> for String {
    fn from(value: Size) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(Size::parse("1kb").unwrap().as_bytes(), 1024);
        assert_eq!(Size::parse("8gb").unwrap().as_bytes(), 8 * 1024 * 1024 * 1024);
        assert_eq!(Size::parse("4MB").unwrap().as_bytes(), 4 * 1024 * 1024);
    }

    #[test]
    fn display_picks_largest_unit() {
        assert_eq!(Size::from_bytes(8 * 1024 * 1024 * 1024).to_string(), "8gb");
        assert_eq!(Size::from_bytes(1024).to_string(), "1kb");
    }

    #[test]
    fn floor_div_never_rounds_to_zero() {
        // Size(0, "mb") // 3 == 1 kb: constructing a zero-valued size
        // normalizes it up to 1 KiB, and dividing 1 KiB by 3 still ceils
        // back up to 1 KiB.
        assert_eq!(
            Size::parse("0mb").unwrap().div_ceil_by(3).unwrap(),
            Size::parse("1kb").unwrap()
        );
        assert_eq!(Size::from_bytes(0), Size::parse("1kb").unwrap());
    }

    #[test]
    fn division_by_zero_fails() {
        assert!(matches!(
            Size::from_bytes(10).div_ceil_by(0),
            Err(CoreError::DivisionByZero)
        ));
        assert!(matches!(
            Size::from_bytes(10).ratio(Size::from_bytes(0)),
            Err(CoreError::DivisionByZero)
        ));
    }

    #[test]
    fn round_trips_through_string() {
        for s in ["1kb", "8gb", "4mb"] {
            let parsed = Size::parse(s).unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Size::parse("8xb").is_err());
        assert!(Size::parse("gb").is_err());
    }
}
