//! In-memory metric families and their text rendering
//!
//! A [`Family`] is a named counter or gauge holding one value per label set.
//! Rendering is deterministic: families in the order given, series in label
//! order, values written as integers whenever they are integral.

use std::{collections::BTreeMap, fmt::Write as _};

/// A label set, ordered by label name
pub type Labels = BTreeMap<String, String>;

/// Build a [`Labels`] from name/value pairs
#[must_use]
pub fn labels<I, K, V>(pairs: I) -> Labels
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// How a family's values behave over time, and so how they merge
pub enum Kind {
    /// Accumulated, merges by summation
    Counter,
    /// Point in time, merges by overwrite
    Gauge,
}

impl Kind {
    /// The name used on `# TYPE` lines
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Counter => "counter",
            Kind::Gauge => "gauge",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A named metric family
pub struct Family {
    name: String,
    help: String,
    kind: Kind,
    series: BTreeMap<Labels, f64>,
}

impl Family {
    /// Create an empty family
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
            series: BTreeMap::new(),
        }
    }

    /// Create an empty counter family
    #[must_use]
    pub fn counter(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, Kind::Counter)
    }

    /// Create an empty gauge family
    #[must_use]
    pub fn gauge(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, Kind::Gauge)
    }

    /// The family name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The family HELP text
    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    /// The family kind
    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Make sure a series exists for `labels`, starting it at zero
    pub fn touch(&mut self, labels: Labels) -> &mut Self {
        self.series.entry(labels).or_insert(0.0);
        self
    }

    /// Add `by` to the series for `labels`
    pub fn inc(&mut self, labels: Labels, by: f64) -> &mut Self {
        *self.series.entry(labels).or_insert(0.0) += by;
        self
    }

    /// Replace the value of the series for `labels`
    pub fn set(&mut self, labels: Labels, value: f64) -> &mut Self {
        self.series.insert(labels, value);
        self
    }

    /// Fold `value` into the series for `labels` according to the family kind
    pub fn merge(&mut self, labels: Labels, value: f64) -> &mut Self {
        match self.kind {
            Kind::Counter => self.inc(labels, value),
            Kind::Gauge => self.set(labels, value),
        }
    }

    /// The value of the series for `labels`
    #[must_use]
    pub fn value(&self, labels: &Labels) -> Option<f64> {
        self.series.get(labels).copied()
    }

    /// The value of the unlabelled series, zero if absent
    #[must_use]
    pub fn scalar(&self) -> f64 {
        self.series.get(&Labels::new()).copied().unwrap_or_default()
    }

    /// Iterate series in label order
    pub fn series(&self) -> impl Iterator<Item = (&Labels, f64)> {
        self.series.iter().map(|(l, v)| (l, *v))
    }

    /// Number of series held
    #[must_use]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// True when no series is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    fn write_to(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, escape_help(&self.help));
        let _ = writeln!(out, "# TYPE {} {}", self.name, self.kind.as_str());
        for (labels, value) in &self.series {
            out.push_str(&self.name);
            if !labels.is_empty() {
                out.push('{');
                for (idx, (key, val)) in labels.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{key}=\"{}\"", escape_label_value(val));
                }
                out.push('}');
            }
            out.push(' ');
            out.push_str(&format_value(*value));
            out.push('\n');
        }
    }
}

/// Render families as a text exposition document
///
/// Each family is followed by a blank line.
#[must_use]
pub fn render(families: &[Family]) -> String {
    let mut out = String::new();
    for family in families {
        family.write_to(&mut out);
        out.push('\n');
    }
    out
}

/// Format a sample value, integral values without a fractional part
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    #[test]
    fn counter_merge_sums_and_gauge_merge_overwrites() {
        let mut counter = Family::counter("c_total", "a counter");
        counter.merge(labels([("token", "abc")]), 3.0);
        counter.merge(labels([("token", "abc")]), 4.0);
        counter.merge(labels([("token", "def")]), 1.0);
        assert_eq!(counter.value(&labels([("token", "abc")])), Some(7.0));
        assert_eq!(counter.value(&labels([("token", "def")])), Some(1.0));

        let mut gauge = Family::gauge("g", "a gauge");
        gauge.merge(Labels::new(), 100.0);
        gauge.merge(Labels::new(), 110.0);
        assert_eq!(gauge.scalar(), 110.0);
    }

    #[test]
    fn render_layout() {
        let mut requests = Family::counter(
            "opencitations_requests_total",
            "Total number of HTTP requests",
        );
        requests.inc(Labels::new(), 4.0);
        let mut by_status = Family::counter(
            "opencitations_requests_by_status_total",
            "HTTP requests by status code",
        );
        by_status.inc(labels([("status", "404")]), 1.0);
        by_status.inc(labels([("status", "200")]), 3.0);

        let text = render(&[requests, by_status]);
        assert_eq!(
            text,
            "# HELP opencitations_requests_total Total number of HTTP requests\n\
             # TYPE opencitations_requests_total counter\n\
             opencitations_requests_total 4\n\
             \n\
             # HELP opencitations_requests_by_status_total HTTP requests by status code\n\
             # TYPE opencitations_requests_by_status_total counter\n\
             opencitations_requests_by_status_total{status=\"200\"} 3\n\
             opencitations_requests_by_status_total{status=\"404\"} 1\n\
             \n"
        );
    }

    #[test]
    fn empty_vector_family_renders_header_only() {
        let family = Family::counter("by_token_total", "per token");
        assert_eq!(
            render(&[family]),
            "# HELP by_token_total per token\n# TYPE by_token_total counter\n\n"
        );
    }

    #[test]
    fn rendered_labels_parse_back() {
        let mut family = Family::counter("by_token_total", "per token");
        family.inc(labels([("token", "we\"ird\\to,ken}\n")]), 2.0);

        let samples = Parser::parse_document(&render(&[family])).expect("renders valid text");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].label("token"), Some("we\"ird\\to,ken}\n"));
        assert_eq!(samples[0].value, 2.0);
    }

    #[test]
    fn value_formatting() {
        assert_eq!(format_value(12.0), "12");
        assert_eq!(format_value(-3.0), "-3");
        assert_eq!(format_value(2_216_426_689.0), "2216426689");
        assert_eq!(format_value(0.5), "0.5");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NAN), "NaN");
    }
}
