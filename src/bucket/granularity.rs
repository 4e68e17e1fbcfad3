//! Granularity strings such as `15m`, `1h` or `1mo`.
//!
//! A granularity is a positive multiplier followed by a unit code. Parsing is
//! total: [`GranularitySpec::parse`] never fails, it produces an invalid spec
//! that callers filter out.

use crate::core::{BucketryError, Result};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{all_consuming, map_res, value},
    sequence::pair,
    IResult,
};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

/// Calendar unit a bucket width is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeUnit {
    /// All units, finest first.
    pub const ALL: [TimeUnit; 8] = [
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
        TimeUnit::Week,
        TimeUnit::Month,
        TimeUnit::Quarter,
        TimeUnit::Year,
    ];

    /// Short code used in granularity strings.
    pub fn code(&self) -> &'static str {
        match self {
            TimeUnit::Second => "s",
            TimeUnit::Minute => "m",
            TimeUnit::Hour => "h",
            TimeUnit::Day => "d",
            TimeUnit::Week => "w",
            TimeUnit::Month => "mo",
            TimeUnit::Quarter => "q",
            TimeUnit::Year => "y",
        }
    }
}

/// Bucket width: `multiplier` whole `unit`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Granularity {
    multiplier: NonZeroU32,
    unit: TimeUnit,
}

impl Granularity {
    pub fn new(multiplier: NonZeroU32, unit: TimeUnit) -> Self {
        Self { multiplier, unit }
    }

    /// Build a granularity from a raw multiplier.
    ///
    /// # Panics
    ///
    /// Panics when `multiplier` is zero. Use [`GranularitySpec::parse`] for
    /// untrusted input.
    pub fn of(multiplier: u32, unit: TimeUnit) -> Self {
        let multiplier = NonZeroU32::new(multiplier)
            .unwrap_or_else(|| panic!("granularity multiplier must be positive, got {multiplier}"));
        Self { multiplier, unit }
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier.get()
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// The tag stored alongside bucketed keys, e.g. `33m`.
    pub fn tag(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.multiplier, self.unit.code())
    }
}

impl FromStr for Granularity {
    type Err = BucketryError;

    fn from_str(s: &str) -> Result<Self> {
        GranularitySpec::parse(s)
            .granularity()
            .ok_or_else(|| BucketryError::parse(format!("invalid granularity '{}'", s)))
    }
}

/// A parsed granularity string, valid or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranularitySpec {
    raw: String,
    granularity: Option<Granularity>,
}

impl GranularitySpec {
    /// Parse `^\d+(s|m|h|d|w|mo|q|y)$`. Never fails; check [`is_valid`](Self::is_valid).
    pub fn parse(input: &str) -> Self {
        let granularity = match all_consuming(multiplier_and_unit)(input) {
            Ok((_, (multiplier, unit))) => NonZeroU32::new(multiplier).map(|m| Granularity::new(m, unit)),
            Err(_) => None,
        };

        Self {
            raw: input.to_string(),
            granularity,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.granularity.is_some()
    }

    pub fn granularity(&self) -> Option<Granularity> {
        self.granularity
    }

    /// The string this spec was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn multiplier_and_unit(input: &str) -> IResult<&str, (u32, TimeUnit)> {
    pair(map_res(digit1, |digits: &str| digits.parse::<u32>()), unit)(input)
}

/// `mo` must be tried before `m` so month codes are matched whole.
fn unit(input: &str) -> IResult<&str, TimeUnit> {
    alt((
        value(TimeUnit::Month, tag("mo")),
        value(TimeUnit::Second, tag("s")),
        value(TimeUnit::Minute, tag("m")),
        value(TimeUnit::Hour, tag("h")),
        value(TimeUnit::Day, tag("d")),
        value(TimeUnit::Week, tag("w")),
        value(TimeUnit::Quarter, tag("q")),
        value(TimeUnit::Year, tag("y")),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minutes() {
        let spec = GranularitySpec::parse("33m");
        assert!(spec.is_valid());
        assert_eq!(spec.granularity(), Some(Granularity::of(33, TimeUnit::Minute)));
    }

    #[test]
    fn test_month_code_not_confused_with_minute() {
        assert_eq!(
            GranularitySpec::parse("1mo").granularity(),
            Some(Granularity::of(1, TimeUnit::Month))
        );
        assert_eq!(
            GranularitySpec::parse("1m").granularity(),
            Some(Granularity::of(1, TimeUnit::Minute))
        );
    }

    #[test]
    fn test_every_unit_round_trips() {
        for unit in TimeUnit::ALL {
            let text = format!("12{}", unit.code());
            let parsed: Granularity = text.parse().unwrap();
            assert_eq!(parsed.unit(), unit);
            assert_eq!(parsed.multiplier(), 12);
            assert_eq!(parsed.to_string(), text);
        }
    }

    #[test]
    fn test_invalid_specs() {
        for input in ["", "m", "15", "0m", "15x", "1mo ", " 1h", "1.5h", "-1d", "1M", "1hh", "1mon", "99999999999s"] {
            assert!(!GranularitySpec::parse(input).is_valid(), "{input:?} should be invalid");
        }
    }

    #[test]
    fn test_from_str_reports_input() {
        let err = "abc".parse::<Granularity>().unwrap_err();
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    #[should_panic(expected = "must be positive")]
    fn test_zero_multiplier_panics() {
        let _ = Granularity::of(0, TimeUnit::Hour);
    }
}
