//! Known metric families
//!
//! Every family a snapshot may carry is a [`Series`]. Sample names are
//! resolved through [`Series::from_sample_name`], and the kind a family
//! merges with comes from here, never from the `# TYPE` line of the
//! document being read. Names not listed are unknown to this version and
//! are ignored by the aggregator.

use ocstats_exposition::{Family, Kind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// A known metric family
pub enum Series {
    /// `opencitations_requests_total`
    Requests,
    /// `opencitations_api_requests_total`
    ApiRequests,
    /// `opencitations_api_index_requests_total`
    ApiIndexRequests,
    /// `opencitations_api_index_requests_by_version_total{version}`
    ApiIndexRequestsByVersion,
    /// `opencitations_api_meta_requests_total`
    ApiMetaRequests,
    /// `opencitations_sparql_requests_total`
    SparqlRequests,
    /// `opencitations_search_requests_total`
    SearchRequests,
    /// `opencitations_dataset_total_count`
    DatasetTotal,
    /// `opencitations_indexed_records`
    IndexedRecords,
    /// `opencitations_harvested_data_sources`
    HarvestedDataSources,
    /// `opencitations_date_info`
    DateInfo,
    /// `opencitations_unique_tokens_total`
    UniqueTokens,
    /// `opencitations_api_requests_by_token_total{token}`
    ApiRequestsByToken,
    /// `opencitations_requests_by_response_class_total{response_class}`
    RequestsByResponseClass,
    /// `opencitations_requests_by_method_total{method}`
    RequestsByMethod,
    /// `opencitations_requests_by_status_total{status}`
    RequestsByStatus,
    /// `opencitations_requests_by_country_total{country}`
    RequestsByCountry,
    /// `opencitations_requests_by_continent_total{continent}`
    RequestsByContinent,
    /// `opencitations_malformed_lines_total`
    MalformedLines,
    /// `opencitations_agg_counter_total{category}`, older snapshots only
    LegacyAggregate,
    /// `opencitations_http_requests_total{endpoint}`, older snapshots only
    LegacyHttpRequests,
}

impl Series {
    /// Families a compiled snapshot carries, in writing order
    pub const SNAPSHOT: [Series; 19] = [
        Series::Requests,
        Series::ApiRequests,
        Series::ApiIndexRequests,
        Series::ApiIndexRequestsByVersion,
        Series::ApiMetaRequests,
        Series::SparqlRequests,
        Series::SearchRequests,
        Series::DatasetTotal,
        Series::IndexedRecords,
        Series::HarvestedDataSources,
        Series::DateInfo,
        Series::UniqueTokens,
        Series::ApiRequestsByToken,
        Series::RequestsByResponseClass,
        Series::RequestsByMethod,
        Series::RequestsByStatus,
        Series::RequestsByCountry,
        Series::RequestsByContinent,
        Series::MalformedLines,
    ];

    /// Families an aggregated answer carries, in writing order
    ///
    /// The per-period date info is replaced by the range info the
    /// aggregator writes itself.
    pub const MERGED: [Series; 20] = [
        Series::Requests,
        Series::ApiRequests,
        Series::ApiIndexRequests,
        Series::ApiIndexRequestsByVersion,
        Series::ApiMetaRequests,
        Series::SparqlRequests,
        Series::SearchRequests,
        Series::DatasetTotal,
        Series::IndexedRecords,
        Series::HarvestedDataSources,
        Series::UniqueTokens,
        Series::ApiRequestsByToken,
        Series::RequestsByResponseClass,
        Series::RequestsByMethod,
        Series::RequestsByStatus,
        Series::RequestsByCountry,
        Series::RequestsByContinent,
        Series::MalformedLines,
        Series::LegacyAggregate,
        Series::LegacyHttpRequests,
    ];

    /// Sample name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Series::Requests => "opencitations_requests_total",
            Series::ApiRequests => "opencitations_api_requests_total",
            Series::ApiIndexRequests => "opencitations_api_index_requests_total",
            Series::ApiIndexRequestsByVersion => {
                "opencitations_api_index_requests_by_version_total"
            }
            Series::ApiMetaRequests => "opencitations_api_meta_requests_total",
            Series::SparqlRequests => "opencitations_sparql_requests_total",
            Series::SearchRequests => "opencitations_search_requests_total",
            Series::DatasetTotal => "opencitations_dataset_total_count",
            Series::IndexedRecords => "opencitations_indexed_records",
            Series::HarvestedDataSources => "opencitations_harvested_data_sources",
            Series::DateInfo => "opencitations_date_info",
            Series::UniqueTokens => "opencitations_unique_tokens_total",
            Series::ApiRequestsByToken => "opencitations_api_requests_by_token_total",
            Series::RequestsByResponseClass => "opencitations_requests_by_response_class_total",
            Series::RequestsByMethod => "opencitations_requests_by_method_total",
            Series::RequestsByStatus => "opencitations_requests_by_status_total",
            Series::RequestsByCountry => "opencitations_requests_by_country_total",
            Series::RequestsByContinent => "opencitations_requests_by_continent_total",
            Series::MalformedLines => "opencitations_malformed_lines_total",
            Series::LegacyAggregate => "opencitations_agg_counter_total",
            Series::LegacyHttpRequests => "opencitations_http_requests_total",
        }
    }

    /// HELP text
    #[must_use]
    pub fn help(self) -> &'static str {
        match self {
            Series::Requests => "Total number of HTTP requests",
            Series::ApiRequests => "Total API requests",
            Series::ApiIndexRequests => "Total INDEX API requests",
            Series::ApiIndexRequestsByVersion => "INDEX API requests by version",
            Series::ApiMetaRequests => "Total META API requests",
            Series::SparqlRequests => "Total SPARQL requests",
            Series::SearchRequests => "Total SEARCH requests",
            Series::DatasetTotal => "Total dataset requests (SPARQL + SEARCH)",
            Series::IndexedRecords => {
                "Total indexed records (Citations + Expressions + Agents)"
            }
            Series::HarvestedDataSources => "Number of harvested data sources",
            Series::DateInfo => "Date information for the statistics",
            Series::UniqueTokens => "Total number of unique tokens",
            Series::ApiRequestsByToken => "API requests by token (all users)",
            Series::RequestsByResponseClass => "HTTP requests by response class",
            Series::RequestsByMethod => "HTTP requests by method",
            Series::RequestsByStatus => "HTTP requests by status code",
            Series::RequestsByCountry => "HTTP requests by country",
            Series::RequestsByContinent => "HTTP requests by continent",
            Series::MalformedLines => "Log lines skipped as malformed",
            Series::LegacyAggregate => "Aggregate HTTP requests counter to opencitations endpoints",
            Series::LegacyHttpRequests => "Counter for HTTP requests to opencitations endpoints",
        }
    }

    /// How the family merges across periods
    #[must_use]
    pub fn kind(self) -> Kind {
        match self {
            Series::IndexedRecords
            | Series::HarvestedDataSources
            | Series::DateInfo
            | Series::UniqueTokens => Kind::Gauge,
            Series::Requests
            | Series::ApiRequests
            | Series::ApiIndexRequests
            | Series::ApiIndexRequestsByVersion
            | Series::ApiMetaRequests
            | Series::SparqlRequests
            | Series::SearchRequests
            | Series::DatasetTotal
            | Series::ApiRequestsByToken
            | Series::RequestsByResponseClass
            | Series::RequestsByMethod
            | Series::RequestsByStatus
            | Series::RequestsByCountry
            | Series::RequestsByContinent
            | Series::MalformedLines
            | Series::LegacyAggregate
            | Series::LegacyHttpRequests => Kind::Counter,
        }
    }

    /// The label dimension of a vector family, `None` for scalars
    ///
    /// The date info family carries several labels and reports `None`.
    #[must_use]
    pub fn label(self) -> Option<&'static str> {
        match self {
            Series::ApiIndexRequestsByVersion => Some("version"),
            Series::ApiRequestsByToken => Some("token"),
            Series::RequestsByResponseClass => Some("response_class"),
            Series::RequestsByMethod => Some("method"),
            Series::RequestsByStatus => Some("status"),
            Series::RequestsByCountry => Some("country"),
            Series::RequestsByContinent => Some("continent"),
            Series::LegacyAggregate => Some("category"),
            Series::LegacyHttpRequests => Some("endpoint"),
            Series::Requests
            | Series::ApiRequests
            | Series::ApiIndexRequests
            | Series::ApiMetaRequests
            | Series::SparqlRequests
            | Series::SearchRequests
            | Series::DatasetTotal
            | Series::IndexedRecords
            | Series::HarvestedDataSources
            | Series::DateInfo
            | Series::UniqueTokens
            | Series::MalformedLines => None,
        }
    }

    /// Label values always present, even at zero
    #[must_use]
    pub fn fixed_label_values(self) -> &'static [&'static str] {
        match self {
            Series::ApiIndexRequestsByVersion => &["v1", "v2"],
            Series::RequestsByResponseClass => &["200", "301", "404"],
            _ => &[],
        }
    }

    /// True when the aggregator folds this family into its answer
    #[must_use]
    pub fn merged(self) -> bool {
        !matches!(self, Series::DateInfo)
    }

    /// Resolve a sample name
    #[must_use]
    pub fn from_sample_name(name: &str) -> Option<Self> {
        Some(match name {
            "opencitations_requests_total" => Series::Requests,
            "opencitations_api_requests_total" => Series::ApiRequests,
            "opencitations_api_index_requests_total" => Series::ApiIndexRequests,
            "opencitations_api_index_requests_by_version_total" => {
                Series::ApiIndexRequestsByVersion
            }
            "opencitations_api_meta_requests_total" => Series::ApiMetaRequests,
            "opencitations_sparql_requests_total" => Series::SparqlRequests,
            "opencitations_search_requests_total" => Series::SearchRequests,
            "opencitations_dataset_total_count" => Series::DatasetTotal,
            "opencitations_indexed_records" => Series::IndexedRecords,
            "opencitations_harvested_data_sources" => Series::HarvestedDataSources,
            "opencitations_date_info" => Series::DateInfo,
            "opencitations_unique_tokens_total" => Series::UniqueTokens,
            "opencitations_api_requests_by_token_total" => Series::ApiRequestsByToken,
            "opencitations_requests_by_response_class_total" => Series::RequestsByResponseClass,
            "opencitations_requests_by_method_total" => Series::RequestsByMethod,
            "opencitations_requests_by_status_total" => Series::RequestsByStatus,
            "opencitations_requests_by_country_total" => Series::RequestsByCountry,
            "opencitations_requests_by_continent_total" => Series::RequestsByContinent,
            "opencitations_malformed_lines_total" => Series::MalformedLines,
            "opencitations_agg_counter_total" => Series::LegacyAggregate,
            "opencitations_http_requests_total" => Series::LegacyHttpRequests,
            _ => return None,
        })
    }

    /// An empty family for this series, fixed label values and scalars
    /// started at zero
    #[must_use]
    pub fn family(self) -> Family {
        let mut family = Family::new(self.name(), self.help(), self.kind());
        match self.label() {
            None if self != Series::DateInfo => {
                family.touch(ocstats_exposition::Labels::new());
            }
            Some(label) => {
                for value in self.fixed_label_values() {
                    family.touch(ocstats_exposition::labels([(label, *value)]));
                }
            }
            None => {}
        }
        family
    }
}
