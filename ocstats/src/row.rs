//! Canonical log rows
//!
//! The upstream normalizer writes one request per line as ten
//! comma-separated fields, quoted CSV style when a field holds a comma or a
//! quote. Fields are whitespace-trimmed after splitting.

use std::borrow::Cow;

/// Number of fields in a canonical row
pub const FIELD_COUNT: usize = 10;

/// Leading text of the header line the normalizer writes
pub const HEADER_PREFIX: &str = "continent_name,country_iso_code,";

/// Token values standing for "no token", compared case-insensitively
pub const PLACEHOLDER_TOKENS: [&str; 3] =
    ["null", "YOUR-TOKEN-HERE", "YOUR-OPENCITATIONS-ACCESS-TOKEN"];

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors produced when splitting a row
pub enum Error {
    /// Wrong number of fields
    #[error("expected {FIELD_COUNT} fields, found {0}")]
    FieldCount(usize),
    /// A quoted field never closes
    #[error("unterminated quoted field")]
    UnterminatedQuote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One canonical log row
#[allow(missing_docs)]
pub struct Row<'a> {
    pub continent: Cow<'a, str>,
    pub country_iso: Cow<'a, str>,
    pub country: Cow<'a, str>,
    pub method: Cow<'a, str>,
    pub host: Cow<'a, str>,
    pub path: Cow<'a, str>,
    pub status: Cow<'a, str>,
    pub user_agent: Cow<'a, str>,
    pub token: Cow<'a, str>,
    pub timestamp: Cow<'a, str>,
}

impl<'a> Row<'a> {
    /// Parse one line, without its line terminator
    ///
    /// # Errors
    ///
    /// Function will error if a quoted field is left open or the line does not
    /// hold exactly [`FIELD_COUNT`] fields.
    pub fn parse(line: &'a str) -> Result<Self, Error> {
        let fields = split_fields(line)?;
        let fields: [Cow<'a, str>; FIELD_COUNT] = fields
            .try_into()
            .map_err(|fields: Vec<_>| Error::FieldCount(fields.len()))?;
        let [
            continent,
            country_iso,
            country,
            method,
            host,
            path,
            status,
            user_agent,
            token,
            timestamp,
        ] = fields;
        Ok(Self {
            continent,
            country_iso,
            country,
            method,
            host,
            path,
            status,
            user_agent,
            token,
            timestamp,
        })
    }

    /// The caller token, `None` when empty or a placeholder
    #[must_use]
    pub fn api_token(&self) -> Option<&str> {
        let token = &*self.token;
        if is_placeholder_token(token) {
            None
        } else {
            Some(token)
        }
    }
}

/// True when `token` carries no caller identity
#[must_use]
pub fn is_placeholder_token(token: &str) -> bool {
    token.is_empty()
        || PLACEHOLDER_TOKENS
            .iter()
            .any(|placeholder| placeholder.eq_ignore_ascii_case(token))
}

/// True when `line` is the normalizer's header line
#[must_use]
pub fn is_header(line: &str) -> bool {
    line.trim_start_matches('\u{feff}').starts_with(HEADER_PREFIX)
}

/// Split a line into trimmed fields
///
/// Unquoted fields borrow from `line`. A quoted field may contain commas and
/// doubled quotes; text following its closing quote is kept as is.
///
/// # Errors
///
/// Function will error if a quoted field is not closed before the end of the
/// line.
pub fn split_fields(line: &str) -> Result<Vec<Cow<'_, str>>, Error> {
    let mut fields = Vec::with_capacity(FIELD_COUNT);
    let mut rest = line;

    loop {
        let (field, remainder) = if rest.trim_start().starts_with('"') {
            let (field, remainder) = quoted_field(rest.trim_start())?;
            (Cow::Owned(field.trim().to_string()), remainder)
        } else {
            match rest.split_once(',') {
                Some((field, remainder)) => (Cow::Borrowed(field.trim()), Some(remainder)),
                None => (Cow::Borrowed(rest.trim()), None),
            }
        };
        fields.push(field);
        match remainder {
            Some(remainder) => rest = remainder,
            None => return Ok(fields),
        }
    }
}

// Returns the unescaped field and what follows its separating comma, if any.
fn quoted_field(text: &str) -> Result<(String, Option<&str>), Error> {
    let mut field = String::new();
    let mut chars = text.char_indices().skip(1).peekable();

    while let Some((_, ch)) = chars.next() {
        if ch != '"' {
            field.push(ch);
            continue;
        }
        if let Some((_, '"')) = chars.peek() {
            field.push('"');
            chars.next();
            continue;
        }
        // Closing quote; anything up to the next comma is appended verbatim.
        let after = chars.peek().map_or(text.len(), |(idx, _)| *idx);
        let tail = &text[after..];
        return Ok(match tail.split_once(',') {
            Some((trailing, remainder)) => {
                field.push_str(trailing);
                (field, Some(remainder))
            }
            None => {
                field.push_str(tail);
                (field, None)
            }
        });
    }
    Err(Error::UnterminatedQuote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ROW: &str = "Europe,IT,Italy,GET,api.opencitations.net,/index/v1/citations/10.1/x,200,curl/8.0,abc-123,2024-01-02T03:04:05";

    #[test]
    fn parses_ten_fields() {
        let row = Row::parse(ROW).expect("valid row");
        assert_eq!(row.continent, "Europe");
        assert_eq!(row.country_iso, "IT");
        assert_eq!(row.country, "Italy");
        assert_eq!(row.method, "GET");
        assert_eq!(row.host, "api.opencitations.net");
        assert_eq!(row.path, "/index/v1/citations/10.1/x");
        assert_eq!(row.status, "200");
        assert_eq!(row.user_agent, "curl/8.0");
        assert_eq!(row.api_token(), Some("abc-123"));
        assert_eq!(row.timestamp, "2024-01-02T03:04:05");
    }

    #[test]
    fn fields_are_trimmed() {
        let row = Row::parse(" Europe , IT,Italy,GET,h,/p, 200 ,ua, tok ,t").expect("valid row");
        assert_eq!(row.continent, "Europe");
        assert_eq!(row.status, "200");
        assert_eq!(row.token, "tok");
    }

    #[test]
    fn quoted_fields() {
        let line = r#"Europe,KR,"Korea, Republic of",GET,h,/p,200,"Mozilla/5.0 (X11; ""Linux"")",null,t"#;
        let row = Row::parse(line).expect("valid row");
        assert_eq!(row.country, "Korea, Republic of");
        assert_eq!(row.user_agent, r#"Mozilla/5.0 (X11; "Linux")"#);
        assert_eq!(row.api_token(), None);
    }

    #[test]
    fn wrong_field_counts() {
        assert_eq!(
            Row::parse("a,b,c,d,e,f,g"),
            Err(Error::FieldCount(7))
        );
        assert_eq!(
            Row::parse("a,b,c,d,e,f,g,h,i,j,k"),
            Err(Error::FieldCount(11))
        );
        assert_eq!(Row::parse(""), Err(Error::FieldCount(1)));
    }

    #[test]
    fn unterminated_quote() {
        assert_eq!(
            Row::parse(r#"Europe,IT,"Italy,GET,h,/p,200,ua,null,t"#),
            Err(Error::UnterminatedQuote)
        );
    }

    #[test]
    fn placeholders_any_case() {
        for token in [
            "",
            "null",
            "NULL",
            "Null",
            "YOUR-TOKEN-HERE",
            "your-token-here",
            "YOUR-OPENCITATIONS-ACCESS-TOKEN",
            "your-opencitations-access-token",
        ] {
            assert!(is_placeholder_token(token), "{token:?}");
        }
        assert!(!is_placeholder_token("nullx"));
        assert!(!is_placeholder_token("b3f1c2d4"));
    }

    #[test]
    fn header_detection() {
        assert!(is_header(
            "continent_name,country_iso_code,country_name,method,host,path,status,user_agent,token,date"
        ));
        assert!(is_header("\u{feff}continent_name,country_iso_code,country_name"));
        assert!(!is_header(ROW));
    }

    proptest! {
        #[test]
        fn plain_fields_split_on_commas(fields in proptest::collection::vec("[a-zA-Z0-9/._ -]{0,16}", 1..16)) {
            let line = fields.join(",");
            let split = split_fields(&line).expect("no quotes, no errors");
            let expected: Vec<&str> = fields.iter().map(|f| f.trim()).collect();
            prop_assert_eq!(split, expected);
        }

        #[test]
        fn quoted_fields_unescape(fields in proptest::collection::vec("[ -~]{0,16}", 1..16)) {
            let line = fields
                .iter()
                .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
                .collect::<Vec<_>>()
                .join(",");
            let split = split_fields(&line).expect("balanced quotes");
            let expected: Vec<&str> = fields.iter().map(|f| f.trim()).collect();
            prop_assert_eq!(split, expected);
        }

        #[test]
        fn never_panics(line in "\\PC*") {
            let _ = Row::parse(&line);
        }
    }
}
