//! Exposition text for OpenCitations statistics
//!
//! Snapshots and aggregated answers are Prometheus text exposition
//! documents. This crate parses them back into typed samples, holds metric
//! families in memory, renders them deterministically and canonicalizes
//! rendered text for stable output.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod canonical;
pub mod family;
pub mod parser;

pub use canonical::canonicalize;
pub use family::{Family, Kind, Labels, labels, render};
pub use parser::{LineError, MetricType, ParseError, Parser, Sample};
