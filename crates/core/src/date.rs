use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};
use std::fmt;

/// A calendar date rendered in the canonical receipt form `DD-MM-YY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalDate(NaiveDate);

impl CanonicalDate {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(CanonicalDate)
    }

    pub fn as_naive(self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for CanonicalDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}-{:02}-{:02}",
            self.0.day(),
            self.0.month(),
            self.0.year().rem_euclid(100)
        )
    }
}

impl Serialize for CanonicalDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Two-digit years below this pivot land in the 2000s, the rest in the 1900s.
pub const YEAR_PIVOT: u32 = 70;

/// Normalize a recognized date token into a [`CanonicalDate`].
///
/// `-`, `/` and `.` are interchangeable separators. A four-digit leading part
/// means year-month-day; anything else is read as day-month-year, with
/// two-digit years expanded around [`YEAR_PIVOT`]. Tokens that do not name a
/// real calendar day yield `None`.
pub fn normalize_date(token: &str) -> Option<CanonicalDate> {
    let unified = token.trim().replace(['.', '/'], "-");
    let parts: Vec<&str> = unified.split('-').collect();
    let [first, second, third] = parts.as_slice() else {
        return None;
    };

    let (year, month, day) = if first.len() == 4 {
        (parse_part(first)?, parse_part(second)?, parse_part(third)?)
    } else {
        (expand_year(parse_part(third)?), parse_part(second)?, parse_part(first)?)
    };

    CanonicalDate::from_ymd(i32::try_from(year).ok()?, month, day)
}

fn parse_part(part: &str) -> Option<u32> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

fn expand_year(year: u32) -> u32 {
    match year {
        y if y < YEAR_PIVOT => 2000 + y,
        y if y < 100 => 1900 + y,
        y => y,
    }
}
