//! OpenCitations usage statistics
//!
//! Compiles a month of canonical access-log rows into a Prometheus text
//! snapshot, stores one snapshot per month and answers date queries over
//! them: the latest month, a single month, or a range of months merged
//! family by family.

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

pub mod aggregator;
pub mod catalog;
pub mod classify;
pub mod codec;
pub mod compiler;
pub mod config;
pub mod httpd;
pub mod indexed_records;
pub mod period;
pub mod query;
pub mod row;
pub mod store;
