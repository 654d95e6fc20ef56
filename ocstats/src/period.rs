//! Calendar months
//!
//! A [`Period`] is the unit every snapshot covers. Periods order
//! lexicographically on `(year, month)` and walk forward one month at a
//! time, December rolling into January of the following year.

use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;

#[allow(clippy::unwrap_used)]
static EMBEDDED_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})-(\d{2})").unwrap());
#[allow(clippy::unwrap_used)]
static SNAPSHOT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^oc-(\d{4})-(\d{2})\.prom$").unwrap());
#[allow(clippy::unwrap_used)]
static PERIOD_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})$").unwrap());

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors produced when building a [`Period`]
pub enum Error {
    /// Month outside 1..=12
    #[error("month {0} is outside 1..=12")]
    Month(u32),
    /// Text is not `YYYY-MM`
    #[error("{0:?} is not a YYYY-MM period")]
    Format(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// One calendar month
pub struct Period {
    // Field order matters, the derived ordering is (year, month).
    year: u16,
    month: u8,
}

impl Period {
    /// Create a new period
    ///
    /// # Errors
    ///
    /// Function will error if `month` is not in 1..=12.
    pub fn new(year: u16, month: u8) -> Result<Self, Error> {
        if (1..=12).contains(&month) {
            Ok(Self { year, month })
        } else {
            Err(Error::Month(u32::from(month)))
        }
    }

    /// The calendar year
    #[must_use]
    pub fn year(self) -> u16 {
        self.year
    }

    /// The calendar month, 1 through 12
    #[must_use]
    pub fn month(self) -> u8 {
        self.month
    }

    /// The month after this one, `None` past the last representable year
    #[must_use]
    pub fn successor(self) -> Option<Self> {
        if self.month == 12 {
            let year = self.year.checked_add(1)?;
            Some(Self { year, month: 1 })
        } else {
            Some(Self {
                year: self.year,
                month: self.month + 1,
            })
        }
    }

    /// Every month from `from` through `to` inclusive, oldest first
    ///
    /// Empty when `from > to`.
    #[must_use]
    pub fn walk(from: Self, to: Self) -> Walk {
        Walk {
            next: Some(from),
            last: to,
        }
    }

    /// The current UTC calendar month
    #[must_use]
    pub fn current() -> Self {
        let now = time::OffsetDateTime::now_utc();
        Self {
            year: u16::try_from(now.year()).unwrap_or(u16::MAX),
            month: u8::from(now.month()),
        }
    }

    /// The first `YYYY-MM` embedded in a file name, if any
    ///
    /// Input logs are conventionally named like `oc-2024-03-gdpr.csv.gz`.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let caps = EMBEDDED_DATE.captures(name)?;
        Self::from_digits(&caps[1], &caps[2])
    }

    /// Parse a snapshot file name, `oc-YYYY-MM.prom`
    #[must_use]
    pub fn from_snapshot_file_name(name: &str) -> Option<Self> {
        let caps = SNAPSHOT_NAME.captures(name)?;
        Self::from_digits(&caps[1], &caps[2])
    }

    /// The snapshot file name for this period
    #[must_use]
    pub fn snapshot_file_name(self) -> String {
        format!("oc-{self}.prom")
    }

    fn from_digits(year: &str, month: &str) -> Option<Self> {
        let year = year.parse().ok()?;
        let month = month.parse().ok()?;
        Self::new(year, month).ok()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = PERIOD_TEXT
            .captures(s)
            .ok_or_else(|| Error::Format(s.to_string()))?;
        let year = caps[1]
            .parse()
            .map_err(|_| Error::Format(s.to_string()))?;
        let month: u8 = caps[2]
            .parse()
            .map_err(|_| Error::Format(s.to_string()))?;
        Self::new(year, month)
    }
}

#[derive(Debug, Clone)]
/// Iterator returned by [`Period::walk`]
pub struct Walk {
    next: Option<Period>,
    last: Period,
}

impl Iterator for Walk {
    type Item = Period;

    fn next(&mut self) -> Option<Period> {
        let current = self.next.filter(|p| *p <= self.last)?;
        self.next = current.successor();
        Some(current)
    }
}
