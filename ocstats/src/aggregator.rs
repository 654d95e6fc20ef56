//! Multi-period aggregation
//!
//! A range query walks every month from its first to its last, parses each
//! snapshot present and folds its samples into a fresh [`Registry`]:
//! counters add up per label set, gauges take the value of the latest
//! period that reported one. Months without a snapshot contribute nothing,
//! and a snapshot that fails to parse is skipped whole. The registry is
//! built per query and dropped once rendered.

use metrics::counter;
use ocstats_exposition::{Family, Kind, Parser, Sample, canonicalize, labels, render};
use rustc_hash::FxHashMap;
use tracing::{debug, info, trace, warn};

use crate::{
    catalog::Series,
    period::Period,
    query::{self, DateQuery},
    store::{self, SnapshotStore},
};

const RANGE_INFO_NAME: &str = "opencitations_date_info";
const RANGE_INFO_HELP: &str = "Date to which the statistics refers to";

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Aggregator`]
pub enum Error {
    /// The range ends before it starts
    #[error("Bad date provided, the ending date is lower than the beginning date.")]
    InvalidDateRange {
        /// First month requested
        from: Period,
        /// Last month requested
        to: Period,
    },
    /// The date token could not be understood
    #[error(transparent)]
    Query(#[from] query::Error),
    /// Nothing stored for the requested period
    #[error("No statistics found.")]
    NoDataForRequest,
    /// The snapshot store failed
    #[error(transparent)]
    Store(#[from] store::Error),
}

#[derive(Debug, Clone)]
/// Families merged over a range of periods
pub struct Registry {
    from: Period,
    to: Period,
    families: FxHashMap<Series, Family>,
    merged: Vec<Period>,
}

impl Registry {
    /// An empty registry for the range `from..=to`, every family at zero
    #[must_use]
    pub fn new(from: Period, to: Period) -> Self {
        Self {
            from,
            to,
            families: Series::MERGED
                .iter()
                .map(|series| (*series, series.family()))
                .collect(),
            merged: Vec::new(),
        }
    }

    /// Fold one period's snapshot in
    ///
    /// Returns false, leaving the registry untouched, when the snapshot does
    /// not parse.
    pub fn absorb(&mut self, period: Period, text: &str) -> bool {
        let samples = match Parser::parse_document(text) {
            Ok(samples) => samples,
            Err(err) => {
                warn!(%period, "skipping unparseable snapshot: {err}");
                counter!("snapshots_skipped").increment(1);
                return false;
            }
        };
        let applied = samples.iter().filter(|sample| self.apply(sample)).count();
        debug!(%period, samples = samples.len(), applied, "snapshot merged");
        self.merged.push(period);
        true
    }

    /// Fold one sample in. Returns false when the sample is ignored.
    pub fn apply(&mut self, sample: &Sample) -> bool {
        let Some(series) = Series::from_sample_name(&sample.name) else {
            trace!(name = %sample.name, "ignoring unknown family");
            return false;
        };
        let Some(family) = self.families.get_mut(&series) else {
            return false;
        };

        let value = sample.value;
        match family.kind() {
            Kind::Counter if value.is_nan() || value < 0.0 => {
                warn!(name = %sample.name, value, "skipping invalid counter value");
                return false;
            }
            Kind::Gauge if value.is_nan() => {
                warn!(name = %sample.name, "skipping NaN gauge value");
                return false;
            }
            Kind::Counter | Kind::Gauge => {}
        }
        family.merge(sample.labels.clone(), value);
        true
    }

    /// The merged family of `series`, `None` for families not merged
    #[must_use]
    pub fn family(&self, series: Series) -> Option<&Family> {
        self.families.get(&series)
    }

    /// Periods whose snapshot was folded in, oldest first
    #[must_use]
    pub fn merged_periods(&self) -> &[Period] {
        &self.merged
    }

    /// Render the registry as a canonical exposition document
    #[must_use]
    pub fn render(&self) -> String {
        let mut info = Family::gauge(RANGE_INFO_NAME, RANGE_INFO_HELP);
        info.set(
            labels([
                ("month_from", format!("{:02}", self.from.month())),
                ("year_from", format!("{:04}", self.from.year())),
                ("month_to", format!("{:02}", self.to.month())),
                ("year_to", format!("{:04}", self.to.year())),
            ]),
            1.0,
        );

        let mut families = Vec::with_capacity(Series::MERGED.len() + 1);
        families.push(info);
        families.extend(
            Series::MERGED
                .iter()
                .filter_map(|series| self.families.get(series).cloned()),
        );
        canonicalize(&render(&families))
    }
}

#[derive(Debug)]
/// Answers date queries from a snapshot store
pub struct Aggregator<S> {
    store: S,
}

impl<S: SnapshotStore> Aggregator<S> {
    /// Create a new aggregator over `store`
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Answer a date token
    ///
    /// # Errors
    ///
    /// See [`Aggregator::answer`]. Tokens that do not parse are
    /// [`Error::Query`].
    pub fn answer_token(&self, token: &str) -> Result<String, Error> {
        self.answer(&DateQuery::parse(token)?)
    }

    /// Answer a parsed date query
    ///
    /// # Errors
    ///
    /// Function will error if a range ends before it starts, if the latest
    /// or single period requested is absent, or if the store fails.
    pub fn answer(&self, query: &DateQuery) -> Result<String, Error> {
        match *query {
            DateQuery::Latest => self.latest(),
            DateQuery::Single(period) => self.single(period),
            DateQuery::Range { from, to } => self.aggregate(from, to),
        }
    }

    /// The snapshot of the most recent period present, verbatim
    ///
    /// # Errors
    ///
    /// Function will error if the store holds nothing or fails.
    pub fn latest(&self) -> Result<String, Error> {
        let period = self.store.latest()?.ok_or(Error::NoDataForRequest)?;
        self.single(period)
    }

    /// The snapshot of `period`, verbatim
    ///
    /// # Errors
    ///
    /// Function will error if `period` is absent or the store fails.
    pub fn single(&self, period: Period) -> Result<String, Error> {
        self.store.get(period)?.ok_or(Error::NoDataForRequest)
    }

    /// Merge and render every snapshot in `from..=to`
    ///
    /// A range with no snapshot at all renders every family at zero.
    ///
    /// # Errors
    ///
    /// Function will error if `to` is before `from` or the store fails.
    pub fn aggregate(&self, from: Period, to: Period) -> Result<String, Error> {
        Ok(self.merge(from, to)?.render())
    }

    /// Merge every snapshot in `from..=to`
    ///
    /// The range is checked before the store is touched.
    ///
    /// # Errors
    ///
    /// Function will error if `to` is before `from` or the store fails.
    pub fn merge(&self, from: Period, to: Period) -> Result<Registry, Error> {
        if from > to {
            return Err(Error::InvalidDateRange { from, to });
        }

        let mut registry = Registry::new(from, to);
        for period in Period::walk(from, to) {
            if let Some(text) = self.store.get(period)? {
                registry.absorb(period, &text);
            }
        }
        info!(
            %from,
            %to,
            merged = registry.merged_periods().len(),
            "range aggregated"
        );
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ocstats_exposition::Labels;
    use proptest::prelude::*;

    use super::*;
    use crate::{
        classify::Scheme,
        compiler::{Compiler, Settings},
        indexed_records,
        store::MemoryStore,
    };

    fn p(year: u16, month: u8) -> Period {
        Period::new(year, month).expect("valid period")
    }

    fn snapshot(api: u64, indexed: u64) -> String {
        format!(
            "# HELP opencitations_api_requests_total Total API requests\n\
             # TYPE opencitations_api_requests_total counter\n\
             opencitations_api_requests_total {api}\n\
             \n\
             # HELP opencitations_indexed_records Total indexed records\n\
             # TYPE opencitations_indexed_records gauge\n\
             opencitations_indexed_records {indexed}\n"
        )
    }

    fn scalar(registry: &Registry, series: Series) -> f64 {
        registry.family(series).expect("merged family").scalar()
    }

    #[derive(Debug, Default)]
    struct CountingStore {
        inner: MemoryStore,
        calls: AtomicUsize,
    }

    impl CountingStore {
        fn touch(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SnapshotStore for CountingStore {
        fn put(&self, period: Period, text: &str) -> Result<(), store::Error> {
            self.touch();
            self.inner.put(period, text)
        }

        fn replace(&self, period: Period, text: &str) -> Result<(), store::Error> {
            self.touch();
            self.inner.replace(period, text)
        }

        fn get(&self, period: Period) -> Result<Option<String>, store::Error> {
            self.touch();
            self.inner.get(period)
        }

        fn list(&self) -> Result<Vec<Period>, store::Error> {
            self.touch();
            self.inner.list()
        }
    }

    #[test]
    fn counters_sum_and_gauges_take_the_latest() {
        let store = MemoryStore::new();
        store.put(p(2024, 1), &snapshot(10, 100)).expect("put");
        store.put(p(2024, 2), &snapshot(15, 110)).expect("put");

        let aggregator = Aggregator::new(store);
        let registry = aggregator.merge(p(2024, 1), p(2024, 2)).expect("merges");
        assert_eq!(scalar(&registry, Series::ApiRequests), 25.0);
        assert_eq!(scalar(&registry, Series::IndexedRecords), 110.0);

        let text = aggregator.answer_token("2024-01_2024-02").expect("answers");
        assert!(text.contains("\nopencitations_api_requests_total 25\n"));
        assert!(text.contains("\nopencitations_indexed_records 110\n"));
    }

    #[test]
    fn gauge_survives_later_periods_without_it() {
        let store = MemoryStore::new();
        store.put(p(2024, 1), &snapshot(1, 100)).expect("put");
        store
            .put(p(2024, 2), "opencitations_api_requests_total 2\n")
            .expect("put");

        let registry = Aggregator::new(store)
            .merge(p(2024, 1), p(2024, 3))
            .expect("merges");
        assert_eq!(scalar(&registry, Series::IndexedRecords), 100.0);
        assert_eq!(scalar(&registry, Series::ApiRequests), 3.0);
        assert_eq!(registry.merged_periods(), [p(2024, 1), p(2024, 2)]);
    }

    #[test]
    fn token_counts_accrue_across_periods() {
        let store = MemoryStore::new();
        for (month, hits) in [(11, 1), (12, 2), (1, 4)] {
            let year = if month == 1 { 2024 } else { 2023 };
            store
                .put(
                    p(year, month),
                    &format!(
                        "opencitations_api_requests_by_token_total{{token=\"abc\"}} {hits}\n\
                         opencitations_api_requests_by_token_total{{token=\"m{month}\"}} 1\n"
                    ),
                )
                .expect("put");
        }

        let registry = Aggregator::new(store)
            .merge(p(2023, 11), p(2024, 1))
            .expect("merges");
        let tokens = registry
            .family(Series::ApiRequestsByToken)
            .expect("merged family");
        assert_eq!(tokens.value(&labels([("token", "abc")])), Some(7.0));
        assert_eq!(tokens.value(&labels([("token", "m12")])), Some(1.0));
        assert_eq!(tokens.len(), 4);
    }

    #[test]
    fn reversed_range_never_touches_the_store() {
        let aggregator = Aggregator::new(CountingStore::default());
        let err = aggregator.answer_token("2024-01_2023-12").err();
        assert!(matches!(
            err,
            Some(Error::InvalidDateRange { from, to }) if from == p(2024, 1) && to == p(2023, 12)
        ));
        assert_eq!(aggregator.store().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn range_visits_each_month_once() {
        let aggregator = Aggregator::new(CountingStore::default());
        aggregator.merge(p(2022, 11), p(2024, 2)).expect("merges");
        assert_eq!(aggregator.store().calls.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn empty_range_renders_zeros() {
        let text = Aggregator::new(MemoryStore::new())
            .answer_token("2020-01_2020-12")
            .expect("answers");
        assert!(text.starts_with(
            "# HELP opencitations_date_info Date to which the statistics refers to\n\
             # TYPE opencitations_date_info gauge\n\
             opencitations_date_info{month_from=\"01\",month_to=\"12\",year_from=\"2020\",year_to=\"2020\"} 1\n"
        ));
        assert!(text.contains("\nopencitations_requests_total 0\n"));
        assert!(text.contains("\nopencitations_indexed_records 0\n"));
        assert!(text.contains(
            "\nopencitations_api_index_requests_by_version_total{version=\"v1\"} 0\n"
        ));
        let samples = Parser::parse_document(&text).expect("answer parses");
        assert!(
            samples
                .iter()
                .filter(|s| s.name != RANGE_INFO_NAME)
                .all(|s| s.value == 0.0)
        );
    }

    #[test]
    fn unknown_families_and_created_series_are_ignored() {
        let store = MemoryStore::new();
        store
            .put(
                p(2021, 5),
                "# TYPE opencitations_agg_counter counter\n\
                 opencitations_agg_counter_total{category=\"oc_api_requests\"} 3.0\n\
                 opencitations_agg_counter_created{category=\"oc_api_requests\"} 1.62e+09\n\
                 opencitations_date_info{month=\"05\",year=\"2021\"} 1\n\
                 process_cpu_seconds_total 12.5\n",
            )
            .expect("put");
        store
            .put(
                p(2021, 6),
                "opencitations_agg_counter_total{category=\"oc_api_requests\"} 4.000000000001\n",
            )
            .expect("put");

        let text = Aggregator::new(store)
            .answer_token("2021-05_2021-06")
            .expect("answers");
        assert!(text.contains("opencitations_agg_counter_total{category=\"oc_api_requests\"} 7\n"));
        assert!(!text.contains("_created"));
        assert!(!text.contains("process_cpu_seconds_total"));
        assert!(!text.contains("month=\"05\""));
    }

    #[test]
    fn unparseable_snapshot_contributes_nothing() {
        let store = MemoryStore::new();
        store.put(p(2024, 1), &snapshot(10, 100)).expect("put");
        store
            .put(
                p(2024, 2),
                "opencitations_api_requests_total 1000\nthis is not exposition\n",
            )
            .expect("put");
        store.put(p(2024, 3), &snapshot(5, 120)).expect("put");

        let registry = Aggregator::new(store)
            .merge(p(2024, 1), p(2024, 3))
            .expect("merges");
        assert_eq!(scalar(&registry, Series::ApiRequests), 15.0);
        assert_eq!(registry.merged_periods(), [p(2024, 1), p(2024, 3)]);
    }

    #[test]
    fn invalid_counter_values_are_skipped() {
        let mut registry = Registry::new(p(2024, 1), p(2024, 1));
        let sample = |value: f64| Sample {
            name: Series::Requests.name().to_string(),
            metric_type: None,
            labels: Labels::new(),
            value,
            timestamp: None,
        };
        assert!(registry.apply(&sample(2.0)));
        assert!(!registry.apply(&sample(-1.0)));
        assert!(!registry.apply(&sample(f64::NAN)));
        assert_eq!(scalar(&registry, Series::Requests), 2.0);
    }

    #[test]
    fn latest_and_single_are_verbatim() {
        let store = MemoryStore::new();
        store.put(p(2023, 12), "a 1.0\n").expect("put");
        store.put(p(2024, 2), "b 2.0\n").expect("put");
        let aggregator = Aggregator::new(store);

        assert_eq!(aggregator.answer_token("last-month").expect("latest"), "b 2.0\n");
        assert_eq!(aggregator.answer_token("2023-12").expect("single"), "a 1.0\n");
        assert!(matches!(
            aggregator.answer_token("2024-01"),
            Err(Error::NoDataForRequest)
        ));
    }

    #[test]
    fn latest_on_empty_store_is_no_data() {
        assert!(matches!(
            Aggregator::new(MemoryStore::new()).answer_token("last-month"),
            Err(Error::NoDataForRequest)
        ));
    }

    #[test]
    fn bad_tokens_are_query_errors() {
        assert!(matches!(
            Aggregator::new(MemoryStore::new()).answer_token("2024-13"),
            Err(Error::Query(query::Error::UnrecognizedDateToken(_)))
        ));
    }

    #[tokio::test]
    async fn compiled_snapshots_aggregate() {
        let settings = Settings {
            scheme: Scheme::New,
            indexed_records: indexed_records::Config {
                enabled: false,
                sources: vec![],
                ..indexed_records::Config::default()
            },
            ..Settings::default()
        };
        let compiler = Compiler::new(settings);
        let store = MemoryStore::new();
        for (period, rows) in [
            (
                p(2024, 1),
                "Europe,IT,Italy,GET,api.opencitations.net,/index/v1/x,200,ua,abc,t\n",
            ),
            (
                p(2024, 2),
                "Europe,IT,Italy,GET,api.opencitations.net,/index/v2/x,200,ua,abc,t\n\
                 Europe,IT,Italy,GET,sparql.opencitations.net,/meta,200,ua,null,t\n",
            ),
        ] {
            let compiled = compiler
                .compile_reader(rows.as_bytes(), period)
                .await
                .expect("compiles");
            store.put(period, &compiled.text).expect("put");
        }

        let registry = Aggregator::new(store)
            .merge(p(2024, 1), p(2024, 2))
            .expect("merges");
        assert_eq!(scalar(&registry, Series::Requests), 3.0);
        assert_eq!(scalar(&registry, Series::ApiRequests), 2.0);
        assert_eq!(scalar(&registry, Series::DatasetTotal), 1.0);
        assert_eq!(scalar(&registry, Series::HarvestedDataSources), 9.0);
        let by_version = registry
            .family(Series::ApiIndexRequestsByVersion)
            .expect("merged family");
        assert_eq!(by_version.value(&labels([("version", "v1")])), Some(1.0));
        assert_eq!(by_version.value(&labels([("version", "v2")])), Some(1.0));
        let tokens = registry
            .family(Series::ApiRequestsByToken)
            .expect("merged family");
        assert_eq!(tokens.value(&labels([("token", "abc")])), Some(2.0));
    }

    proptest! {
        #[test]
        fn summation_and_gauge_laws(
            months in proptest::collection::vec(proptest::option::of((0u32..10_000, 0u32..10_000)), 1..30),
        ) {
            let first = p(2022, 6);
            let store = MemoryStore::new();
            let mut period = first;
            let mut last = first;
            let mut expected_sum = 0.0;
            let mut expected_gauge = 0.0;
            for month in &months {
                if let Some((api, indexed)) = month {
                    store.put(period, &snapshot(u64::from(*api), u64::from(*indexed))).expect("put");
                    expected_sum += f64::from(*api);
                    expected_gauge = f64::from(*indexed);
                }
                last = period;
                period = period.successor().expect("in range");
            }

            let registry = Aggregator::new(store).merge(first, last).expect("merges");
            prop_assert_eq!(scalar(&registry, Series::ApiRequests), expected_sum);
            prop_assert_eq!(scalar(&registry, Series::IndexedRecords), expected_gauge);
        }
    }
}
