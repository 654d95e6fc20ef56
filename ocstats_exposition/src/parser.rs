//! Prometheus text format parser
//!
//! Reads documents in the Prometheus text exposition format, both the ones the
//! period compiler writes and the ones produced by older, client-library based
//! snapshot generations.
//! <https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md>

use std::str::FromStr;

use rustc_hash::FxHashMap;

use crate::family::Labels;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Prometheus metric types
pub enum MetricType {
    /// A single numerical value that can arbitrarily go up and down
    Gauge,
    /// A cumulative, monotonically increasing value
    Counter,
    /// Observations counted in configurable buckets
    Histogram,
    /// Observations summarised as quantiles
    Summary,
    /// A metric without a declared type
    Untyped,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors that can occur while parsing Prometheus text format
pub enum ParseError {
    /// Unknown metric type in TYPE line
    #[error("unknown metric type: {0}")]
    UnknownMetricType(String),
    /// Invalid format in the line
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// Invalid value that cannot be parsed as a number
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// Missing value in metric line
    #[error("missing value")]
    MissingValue,
    /// Missing name in metric line
    #[error("missing metric name")]
    MissingName,
    /// Invalid label format
    #[error("invalid label: {0}")]
    InvalidLabel(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {error}")]
/// A [`ParseError`] together with the line it was found on
pub struct LineError {
    /// One-based line number in the parsed document
    pub line: usize,
    /// The fault found on that line
    #[source]
    pub error: ParseError,
}

impl FromStr for MetricType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(Self::Counter),
            "gauge" => Ok(Self::Gauge),
            "histogram" => Ok(Self::Histogram),
            "summary" => Ok(Self::Summary),
            "untyped" => Ok(Self::Untyped),
            _ => Err(ParseError::UnknownMetricType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A parsed sample line
pub struct Sample {
    /// The sample name, suffixes such as `_total` included
    pub name: String,
    /// The metric type if known from a TYPE line
    pub metric_type: Option<MetricType>,
    /// The sample labels
    pub labels: Labels,
    /// The sample value
    pub value: f64,
    /// Optional timestamp in milliseconds since Unix epoch
    pub timestamp: Option<i64>,
}

impl Sample {
    /// Value of the label `key`, if the sample carries it
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

#[derive(Debug, Default)]
/// Parser for Prometheus text exposition format
///
/// The parser is stateful: TYPE and HELP lines seen so far are remembered and
/// attached to the samples that follow them.
pub struct Parser {
    typemap: FxHashMap<String, MetricType>,
    helpmap: FxHashMap<String, String>,
}

impl Parser {
    /// Create a new parser instance
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a complete document, continuing past faulty lines
    pub fn parse_text(&mut self, text: &str) -> Vec<Result<Sample, LineError>> {
        let mut results = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            if let Some(result) = self.parse_line(line) {
                results.push(result.map_err(|error| LineError {
                    line: idx + 1,
                    error,
                }));
            }
        }

        results
    }

    /// Parse a complete document, all or nothing
    ///
    /// # Errors
    ///
    /// Returns the first faulty line of the document.
    pub fn parse_document(text: &str) -> Result<Vec<Sample>, LineError> {
        let mut parser = Self::new();
        parser.parse_text(text).into_iter().collect()
    }

    /// The type declared for `name`, if any TYPE line covered it
    #[must_use]
    pub fn metric_type(&self, name: &str) -> Option<MetricType> {
        self.typemap.get(name).copied()
    }

    /// The HELP text declared for `name`
    #[must_use]
    pub fn help(&self, name: &str) -> Option<&str> {
        self.helpmap.get(name).map(String::as_str)
    }

    /// Parse a single line of Prometheus text format
    ///
    /// Returns `None` for blank lines, HELP lines, well-formed TYPE lines and
    /// plain comments.
    pub fn parse_line(&mut self, line: &str) -> Option<Result<Sample, ParseError>> {
        let line = line.trim();

        if line.is_empty() {
            return None;
        }

        if let Some(comment) = line.strip_prefix('#') {
            let mut parts = comment.trim_start().splitn(3, char::is_whitespace);
            return match parts.next() {
                Some("TYPE") => self.parse_type_line(parts.next(), parts.next()).err().map(Err),
                Some("HELP") => {
                    self.record_help(parts.next(), parts.next());
                    None
                }
                _ => None,
            };
        }

        Some(self.parse_metric_line(line))
    }

    fn parse_type_line(
        &mut self,
        name: Option<&str>,
        metric_type: Option<&str>,
    ) -> Result<(), ParseError> {
        let name = name.filter(|n| !n.is_empty()).ok_or_else(|| {
            ParseError::InvalidFormat("Missing metric name in TYPE line".to_string())
        })?;

        let metric_type: MetricType = metric_type
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ParseError::InvalidFormat("Missing metric type in TYPE line".to_string())
            })?
            .parse()?;

        // Samples of these types carry suffixed names.
        let suffixes: &[&str] = match metric_type {
            MetricType::Histogram | MetricType::Summary => &["_sum", "_count", "_bucket"],
            MetricType::Counter => &["_total", "_created"],
            MetricType::Gauge | MetricType::Untyped => &[],
        };
        for suffix in suffixes {
            self.typemap
                .entry(format!("{name}{suffix}"))
                .or_insert(metric_type);
        }

        self.typemap.insert(name.to_owned(), metric_type);
        Ok(())
    }

    fn record_help(&mut self, name: Option<&str>, text: Option<&str>) {
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            return;
        };
        let text = text.unwrap_or_default().trim();
        let mut help = String::with_capacity(text.len());
        let mut chars = text.chars();
        while let Some(ch) = chars.next() {
            if ch == '\\' {
                match chars.next() {
                    Some('n') => help.push('\n'),
                    Some(other) => help.push(other),
                    None => help.push('\\'),
                }
            } else {
                help.push(ch);
            }
        }
        self.helpmap.insert(name.to_owned(), help);
    }

    fn parse_metric_line(&self, line: &str) -> Result<Sample, ParseError> {
        let end = line
            .find(|c: char| c == '{' || c.is_whitespace())
            .unwrap_or(line.len());
        let (name, rest) = line.split_at(end);
        if name.is_empty() {
            return Err(ParseError::MissingName);
        }

        let rest = rest.trim_start();
        let (labels, rest) = match rest.strip_prefix('{') {
            Some(body) => Self::parse_labels(body)?,
            None => (Labels::new(), rest),
        };
        let (value, timestamp) = Self::parse_value_and_timestamp(rest)?;

        Ok(Sample {
            name: name.to_string(),
            metric_type: self.typemap.get(name).copied(),
            labels,
            value,
            timestamp,
        })
    }

    /// Parse the label block following `{`, returning the text after `}`.
    fn parse_labels(body: &str) -> Result<(Labels, &str), ParseError> {
        let mut labels = Labels::new();
        let mut rest = body.trim_start();

        loop {
            if rest.is_empty() {
                return Err(ParseError::InvalidFormat(
                    "Unclosed labels bracket".to_string(),
                ));
            }
            if let Some(after) = rest.strip_prefix('}') {
                return Ok((labels, after));
            }

            let (label_name, after_name) = rest
                .split_once('=')
                .ok_or_else(|| ParseError::InvalidLabel(format!("Label missing '=': {rest}")))?;
            let label_name = label_name.trim();
            Self::validate_label_name(label_name)?;

            let (label_value, after_value) = Self::parse_label_value(after_name.trim_start())?;
            if labels.insert(label_name.to_string(), label_value).is_some() {
                return Err(ParseError::InvalidLabel(format!(
                    "Duplicate label: {label_name}"
                )));
            }

            rest = after_value.trim_start();
            if let Some(after) = rest.strip_prefix(',') {
                rest = after.trim_start();
            } else if !rest.starts_with('}') {
                return Err(ParseError::InvalidLabel(
                    "Expected ',' or '}' after label value".to_string(),
                ));
            }
        }
    }

    fn validate_label_name(name: &str) -> Result<(), ParseError> {
        if name.is_empty() {
            return Err(ParseError::InvalidLabel("Empty label key".to_string()));
        }

        // Label names starting with __ are reserved for internal use
        if name.starts_with("__") {
            return Err(ParseError::InvalidLabel(
                "Label names starting with '__' are reserved for internal use".to_string(),
            ));
        }

        if name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '"' | ',' | '='))
        {
            return Err(ParseError::InvalidLabel(format!(
                "Malformed label name: {name}"
            )));
        }

        Ok(())
    }

    /// Parse a quoted label value, returning the unescaped value and the text
    /// after the closing quote.
    fn parse_label_value(input: &str) -> Result<(String, &str), ParseError> {
        let Some(inner) = input.strip_prefix('"') else {
            return Err(ParseError::InvalidLabel(
                "Label value must be quoted".to_string(),
            ));
        };

        let mut value = String::with_capacity(inner.len());
        let mut chars = inner.char_indices();

        while let Some((idx, ch)) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, c)) => {
                        return Err(ParseError::InvalidLabel(format!(
                            "Invalid escape sequence: \\{c}"
                        )));
                    }
                    None => {
                        return Err(ParseError::InvalidLabel(
                            "Backslash at end of label value".to_string(),
                        ));
                    }
                },
                '"' => return Ok((value, &inner[idx + 1..])),
                _ => value.push(ch),
            }
        }

        Err(ParseError::InvalidLabel(
            "Unterminated label value".to_string(),
        ))
    }

    fn parse_value_and_timestamp(value_str: &str) -> Result<(f64, Option<i64>), ParseError> {
        let mut parts = value_str.split_whitespace();

        let value_part = parts.next().ok_or(ParseError::MissingValue)?;

        if value_part.contains('#') {
            return Err(ParseError::InvalidFormat(
                "Value contains comment marker".to_string(),
            ));
        }

        let value = match value_part {
            "NaN" => f64::NAN,
            "+Inf" => f64::INFINITY,
            "-Inf" => f64::NEG_INFINITY,
            _ => value_part
                .parse::<f64>()
                .map_err(|_| ParseError::InvalidValue(value_part.to_string()))?,
        };

        let timestamp = match parts.next() {
            Some(ts_str) => Some(ts_str.parse::<i64>().map_err(|_| {
                ParseError::InvalidFormat(format!("Invalid timestamp: {ts_str}"))
            })?),
            None => None,
        };

        if let Some(extra) = parts.next() {
            return Err(ParseError::InvalidFormat(format!(
                "Unexpected trailing data: {extra}"
            )));
        }

        Ok((value, timestamp))
    }
}
