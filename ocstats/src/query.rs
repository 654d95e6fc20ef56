//! Date tokens
//!
//! The query surface takes a single token: `last-month`, a single `YYYY-MM`
//! or a range `YYYY-MM_YYYY-MM`.

use std::str::FromStr;

use crate::period::Period;

/// Token selecting the most recent period present in the store
pub const LATEST: &str = "last-month";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors produced by [`DateQuery::parse`]
pub enum Error {
    /// Token matches none of the accepted forms
    #[error("Bad date format the required one is: year-month or year-month_year-month.")]
    UnrecognizedDateToken(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A parsed date token
pub enum DateQuery {
    /// The most recent period present
    Latest,
    /// Exactly one period
    Single(Period),
    /// An inclusive range of periods, not yet validated for order
    Range {
        /// First month
        from: Period,
        /// Last month
        to: Period,
    },
}

impl DateQuery {
    /// Parse a date token
    ///
    /// # Errors
    ///
    /// Function will error if the token is not one of the accepted forms,
    /// including when a month falls outside 1..=12.
    pub fn parse(token: &str) -> Result<Self, Error> {
        let unrecognized = || Error::UnrecognizedDateToken(token.to_string());
        if token == LATEST {
            return Ok(Self::Latest);
        }
        match token.split_once('_') {
            Some((from, to)) => Ok(Self::Range {
                from: from.parse().map_err(|_| unrecognized())?,
                to: to.parse().map_err(|_| unrecognized())?,
            }),
            None => Ok(Self::Single(token.parse().map_err(|_| unrecognized())?)),
        }
    }
}

impl FromStr for DateQuery {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(year: u16, month: u8) -> Period {
        Period::new(year, month).expect("valid period")
    }

    #[test]
    fn accepted_forms() {
        assert_eq!(DateQuery::parse("last-month"), Ok(DateQuery::Latest));
        assert_eq!(
            DateQuery::parse("2024-03"),
            Ok(DateQuery::Single(p(2024, 3)))
        );
        assert_eq!(
            DateQuery::parse("2023-11_2024-02"),
            Ok(DateQuery::Range {
                from: p(2023, 11),
                to: p(2024, 2)
            })
        );
    }

    #[test]
    fn reversed_ranges_still_parse() {
        // Order is checked by the aggregator, not the parser.
        assert_eq!(
            DateQuery::parse("2024-01_2023-12"),
            Ok(DateQuery::Range {
                from: p(2024, 1),
                to: p(2023, 12)
            })
        );
    }

    #[test]
    fn rejected_tokens() {
        for token in [
            "",
            "latest",
            "2024",
            "2024-3",
            "2024-13",
            "2024-00",
            "2024-01_",
            "_2024-01",
            "2024-01_2024-02_2024-03",
            "2024-01-2024-02",
            "24-01",
            " 2024-01",
        ] {
            assert_eq!(
                DateQuery::parse(token),
                Err(Error::UnrecognizedDateToken(token.to_string())),
                "{token:?}"
            );
        }
    }
}
