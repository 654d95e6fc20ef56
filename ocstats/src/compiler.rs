//! Period compiler
//!
//! Streams one calendar month of canonical rows, classifies every request
//! and accumulates the month's counts, then writes them out as a snapshot.
//! The indexed records lookup runs alongside the row loop and is joined
//! right before the snapshot is rendered.
//!
//! Malformed rows are counted and skipped. An input that cannot be opened,
//! fails to decode part way or holds no bytes at all aborts the run.

use std::{io, path::Path};

use metrics::counter;
use ocstats_exposition::{Family, Labels, labels, render};
use rustc_hash::FxHashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, trace, warn};

use crate::{
    catalog::Series,
    classify::{ApiRoute, ApiVersion, Category, Classifier, DEFAULT_DOMAIN, Scheme},
    codec,
    indexed_records::{self, Pending},
    period::Period,
    row::{self, Row},
};

/// Rows between two progress messages
pub const PROGRESS_INTERVAL: u64 = 1_000_000;
/// Countries written to a snapshot unless configured otherwise
pub const DEFAULT_COUNTRY_LIMIT: usize = 20;
/// Harvested data sources unless configured otherwise
pub const DEFAULT_HARVESTED_DATA_SOURCES: u64 = 9;

const TOP_TOKENS_LOGGED: usize = 20;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Compiler`]
pub enum Error {
    /// The input could not be opened
    #[error(transparent)]
    Codec(#[from] codec::Error),
    /// Reading or decoding the input failed part way
    #[error("failed reading input: {0}")]
    Read(#[source] io::Error),
    /// The input holds no bytes
    #[error("input is empty")]
    EmptyInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Compiler settings
pub struct Settings {
    /// Addressing scheme of the rows
    pub scheme: Scheme,
    /// Canonical host of the old scheme
    pub domain: String,
    /// Value of the harvested data sources gauge
    pub harvested_data_sources: u64,
    /// Countries kept in the by-country family
    pub country_limit: usize,
    /// Indexed records lookup
    pub indexed_records: indexed_records::Config,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scheme: Scheme::default(),
            domain: DEFAULT_DOMAIN.to_string(),
            harvested_data_sources: DEFAULT_HARVESTED_DATA_SOURCES,
            country_limit: DEFAULT_COUNTRY_LIMIT,
            indexed_records: indexed_records::Config::default(),
        }
    }
}

/// Counts accumulated over one period's rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accumulator {
    total_requests: u64,
    malformed_lines: u64,
    methods: FxHashMap<String, u64>,
    statuses: FxHashMap<String, u64>,
    countries: FxHashMap<String, u64>,
    continents: FxHashMap<String, u64>,
    api_total: u64,
    api_index_total: u64,
    api_index_v1: u64,
    api_index_v2: u64,
    api_meta_total: u64,
    sparql_total: u64,
    search_total: u64,
    api_tokens: FxHashMap<String, u64>,
    response_200: u64,
    response_301: u64,
    response_404: u64,
}

impl Accumulator {
    /// Count one well-formed row
    pub fn observe(&mut self, row: &Row<'_>, classifier: &Classifier) {
        self.total_requests += 1;
        bump(&mut self.methods, &row.method);
        bump(&mut self.statuses, &row.status);
        bump(&mut self.countries, &row.country);
        bump(&mut self.continents, &row.continent);

        match classifier.classify(&row.host, &row.path) {
            Some(Category::Api) => {
                self.api_total += 1;
                if let Some(token) = row.api_token() {
                    bump(&mut self.api_tokens, token);
                }
                match classifier.api_route(&row.path) {
                    ApiRoute::Meta => self.api_meta_total += 1,
                    ApiRoute::Index(version) => {
                        self.api_index_total += 1;
                        match version {
                            Some(ApiVersion::V1) => self.api_index_v1 += 1,
                            Some(ApiVersion::V2) => self.api_index_v2 += 1,
                            None => {}
                        }
                    }
                }
            }
            Some(Category::Sparql) => self.sparql_total += 1,
            Some(Category::Search) => self.search_total += 1,
            Some(Category::Dataset) | None => {}
        }

        match &*row.status {
            "200" => self.response_200 += 1,
            "301" => self.response_301 += 1,
            "404" => self.response_404 += 1,
            _ => {}
        }
    }

    /// Count one malformed row
    pub fn reject(&mut self) {
        self.malformed_lines += 1;
    }

    /// Well-formed rows seen
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    /// Malformed rows seen
    #[must_use]
    pub fn malformed_lines(&self) -> u64 {
        self.malformed_lines
    }

    /// API requests
    #[must_use]
    pub fn api_total(&self) -> u64 {
        self.api_total
    }

    /// INDEX API requests, all versions
    #[must_use]
    pub fn api_index_total(&self) -> u64 {
        self.api_index_total
    }

    /// INDEX API requests of one version
    #[must_use]
    pub fn api_index(&self, version: ApiVersion) -> u64 {
        match version {
            ApiVersion::V1 => self.api_index_v1,
            ApiVersion::V2 => self.api_index_v2,
        }
    }

    /// META API requests
    #[must_use]
    pub fn api_meta_total(&self) -> u64 {
        self.api_meta_total
    }

    /// SPARQL requests
    #[must_use]
    pub fn sparql_total(&self) -> u64 {
        self.sparql_total
    }

    /// Search requests
    #[must_use]
    pub fn search_total(&self) -> u64 {
        self.search_total
    }

    /// SPARQL plus search requests
    #[must_use]
    pub fn dataset_total(&self) -> u64 {
        self.sparql_total + self.search_total
    }

    /// Distinct caller tokens with at least one API request
    #[must_use]
    pub fn unique_tokens(&self) -> usize {
        self.api_tokens.len()
    }

    /// Requests with the given status code
    #[must_use]
    pub fn status(&self, status: &str) -> u64 {
        self.statuses.get(status).copied().unwrap_or_default()
    }

    /// API requests made with `token`
    #[must_use]
    pub fn token_hits(&self, token: &str) -> u64 {
        self.api_tokens.get(token).copied().unwrap_or_default()
    }

    /// The `n` tokens with the most API requests, most first
    #[must_use]
    pub fn top_tokens(&self, n: usize) -> Vec<(&str, u64)> {
        top(&self.api_tokens, n)
    }

    /// The `n` countries with the most requests, most first
    #[must_use]
    pub fn top_countries(&self, n: usize) -> Vec<(&str, u64)> {
        top(&self.countries, n)
    }

    /// The snapshot families for these counts, in writing order
    #[must_use]
    pub fn families(&self, period: Period, indexed_records: u64, settings: &Settings) -> Vec<Family> {
        Series::SNAPSHOT
            .iter()
            .map(|series| self.family(*series, period, indexed_records, settings))
            .collect()
    }

    fn family(
        &self,
        series: Series,
        period: Period,
        indexed_records: u64,
        settings: &Settings,
    ) -> Family {
        let mut family = series.family();
        match series {
            Series::Requests => set_scalar(&mut family, self.total_requests),
            Series::ApiRequests => set_scalar(&mut family, self.api_total),
            Series::ApiIndexRequests => set_scalar(&mut family, self.api_index_total),
            Series::ApiIndexRequestsByVersion => {
                for version in [ApiVersion::V1, ApiVersion::V2] {
                    family.set(
                        labels([("version", version.as_str())]),
                        self.api_index(version) as f64,
                    );
                }
            }
            Series::ApiMetaRequests => set_scalar(&mut family, self.api_meta_total),
            Series::SparqlRequests => set_scalar(&mut family, self.sparql_total),
            Series::SearchRequests => set_scalar(&mut family, self.search_total),
            Series::DatasetTotal => set_scalar(&mut family, self.dataset_total()),
            Series::IndexedRecords => set_scalar(&mut family, indexed_records),
            Series::HarvestedDataSources => {
                set_scalar(&mut family, settings.harvested_data_sources);
            }
            Series::DateInfo => {
                family.set(
                    labels([
                        ("month", format!("{:02}", period.month())),
                        ("year", format!("{:04}", period.year())),
                    ]),
                    1.0,
                );
            }
            Series::UniqueTokens => set_scalar(&mut family, self.unique_tokens() as u64),
            Series::ApiRequestsByToken => set_vector(&mut family, "token", &self.api_tokens),
            Series::RequestsByResponseClass => {
                for (class, count) in [
                    ("200", self.response_200),
                    ("301", self.response_301),
                    ("404", self.response_404),
                ] {
                    family.set(labels([("response_class", class)]), count as f64);
                }
            }
            Series::RequestsByMethod => set_vector(&mut family, "method", &self.methods),
            Series::RequestsByStatus => set_vector(&mut family, "status", &self.statuses),
            Series::RequestsByCountry => {
                for (country, count) in self.top_countries(settings.country_limit) {
                    family.set(labels([("country", country)]), count as f64);
                }
            }
            Series::RequestsByContinent => {
                set_vector(&mut family, "continent", &self.continents);
            }
            Series::MalformedLines => set_scalar(&mut family, self.malformed_lines),
            Series::LegacyAggregate | Series::LegacyHttpRequests => {}
        }
        family
    }
}

fn bump(map: &mut FxHashMap<String, u64>, key: &str) {
    if let Some(count) = map.get_mut(key) {
        *count += 1;
    } else {
        map.insert(key.to_string(), 1);
    }
}

fn top(map: &FxHashMap<String, u64>, n: usize) -> Vec<(&str, u64)> {
    let mut entries: Vec<(&str, u64)> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    entries.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries.truncate(n);
    entries
}

fn set_scalar(family: &mut Family, value: u64) {
    family.set(Labels::new(), value as f64);
}

fn set_vector(family: &mut Family, label: &str, counts: &FxHashMap<String, u64>) {
    for (value, count) in counts {
        family.set(labels([(label, value.as_str())]), *count as f64);
    }
}

#[derive(Debug, Clone)]
/// The outcome of one compiler run
pub struct Compilation {
    /// Period the snapshot covers
    pub period: Period,
    /// Counts gathered from the rows
    pub accumulator: Accumulator,
    /// Value of the indexed records gauge
    pub indexed_records: u64,
    /// The snapshot document
    pub text: String,
}

impl Compilation {
    /// Log the run's headline figures
    pub fn log_summary(&self) {
        let acc = &self.accumulator;
        info!(
            period = %self.period,
            requests = acc.total_requests(),
            malformed = acc.malformed_lines(),
            indexed_records = self.indexed_records,
            "period compiled"
        );
        info!(
            total = acc.api_total(),
            index = acc.api_index_total(),
            index_v1 = acc.api_index(ApiVersion::V1),
            index_v2 = acc.api_index(ApiVersion::V2),
            meta = acc.api_meta_total(),
            "API requests"
        );
        info!(
            sparql = acc.sparql_total(),
            search = acc.search_total(),
            dataset = acc.dataset_total(),
            "dataset requests"
        );
        info!(
            success = acc.response_200,
            redirect = acc.response_301,
            not_found = acc.response_404,
            "response classes"
        );
        info!(unique = acc.unique_tokens(), "tokens");
        for (rank, (token, hits)) in acc.top_tokens(TOP_TOKENS_LOGGED).iter().enumerate() {
            info!("top token {}: {token} with {hits} API requests", rank + 1);
        }
    }
}

#[derive(Debug)]
/// Compiles canonical rows into snapshots
pub struct Compiler {
    classifier: Classifier,
    settings: Settings,
}

impl Compiler {
    /// Create a new compiler
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            classifier: Classifier::new(settings.scheme, settings.domain.clone()),
            settings,
        }
    }

    /// Compile the rows in `path`
    ///
    /// The period is read from the file name, the current month standing in
    /// when the name carries none.
    ///
    /// # Errors
    ///
    /// Function will error if the file cannot be opened, decoding fails part
    /// way or the file is empty.
    pub async fn compile_path(&self, path: &Path) -> Result<Compilation, Error> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        let period = Period::from_file_name(&name).unwrap_or_else(|| {
            let current = Period::current();
            warn!(file = %name, period = %current, "no YYYY-MM in input name, using the current month");
            current
        });
        let (encoding, source) = codec::open(path).await?;
        info!(path = %path.display(), ?encoding, scheme = ?self.settings.scheme, %period, "compiling period");
        self.compile_reader(source, period).await
    }

    /// Compile rows read from `reader` as the snapshot of `period`
    ///
    /// # Errors
    ///
    /// Function will error if reading fails or `reader` yields no bytes.
    pub async fn compile_reader<R>(&self, reader: R, period: Period) -> Result<Compilation, Error>
    where
        R: AsyncBufRead + Unpin,
    {
        let pending = Pending::spawn(&self.settings.indexed_records);
        let accumulator = self.accumulate(reader).await?;
        debug!("rows exhausted, joining indexed records lookup");
        let indexed_records = pending.join().await;

        let families = accumulator.families(period, indexed_records, &self.settings);
        Ok(Compilation {
            period,
            accumulator,
            indexed_records,
            text: render(&families),
        })
    }

    async fn accumulate<R>(&self, mut reader: R) -> Result<Accumulator, Error>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut acc = Accumulator::default();
        let mut buf = Vec::with_capacity(1024);
        let mut line_no: u64 = 0;

        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf).await.map_err(Error::Read)?;
            if read == 0 {
                break;
            }
            line_no += 1;
            if line_no % PROGRESS_INTERVAL == 0 {
                info!(lines = line_no, "compiling");
            }

            let Ok(line) = std::str::from_utf8(&buf) else {
                trace!(line = line_no, "skipping row: not UTF-8");
                acc.reject();
                continue;
            };
            let line = line.trim_end_matches(['\n', '\r']);
            if line_no == 1 && row::is_header(line) {
                debug!("skipping header");
                continue;
            }

            match Row::parse(line) {
                Ok(row) => acc.observe(&row, &self.classifier),
                Err(err) => {
                    trace!(line = line_no, "skipping row: {err}");
                    acc.reject();
                }
            }
        }

        if line_no == 0 {
            return Err(Error::EmptyInput);
        }
        counter!("rows_processed").increment(acc.total_requests());
        counter!("rows_malformed").increment(acc.malformed_lines());
        info!(
            lines = line_no,
            valid = acc.total_requests(),
            malformed = acc.malformed_lines(),
            "rows exhausted"
        );
        Ok(acc)
    }
}
