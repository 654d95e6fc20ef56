//! Request classification
//!
//! A request is attributed to one service category from its host and path.
//! Two addressing schemes have been in use over the service's lifetime:
//!
//! * old: everything served from the canonical domain, the category encoded
//!   in the path prefix;
//! * new: one subdomain per service, `api.`, `sparql.`, `search.`.
//!
//! The scheme in force is chosen by the caller per run, never detected.
//! API requests are further split between META and INDEX, the latter by
//! version. Classification is pure and never fails.

use serde::Deserialize;

/// The canonical domain of the old addressing scheme
pub const DEFAULT_DOMAIN: &str = "opencitations.net";

const OLD_SPARQL_PREFIXES: [&str; 3] = ["/sparql", "/index/sparql", "/meta/sparql"];
const OLD_SEARCH_PREFIX: &str = "/search";
const OLD_API_PREFIXES: [&str; 5] = [
    "/index/api/v1/",
    "/index/api/v2/",
    "/meta/api/v1/",
    "/api/v1/",
    "/api/v2/",
];
const OLD_V1_PREFIXES: [&str; 2] = ["/index/api/v1/", "/api/v1/"];
const OLD_V2_PREFIXES: [&str; 2] = ["/index/api/v2/", "/api/v2/"];
const OLD_META_PREFIX: &str = "/meta/api/v1/";

const NEW_V1_PREFIX: &str = "/index/v1/";
const NEW_V2_PREFIX: &str = "/index/v2/";
const NEW_META_PREFIX: &str = "/meta/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Addressing scheme in force for the rows being compiled
pub enum Scheme {
    /// Category in the path prefix, single canonical host
    Old,
    /// Category in the subdomain
    #[default]
    New,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Service category of a request
pub enum Category {
    /// REST API
    Api,
    /// SPARQL endpoint
    Sparql,
    /// Search interface
    Search,
    /// Anything else served: dumps, browser pages, the website
    Dataset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// INDEX API version
pub enum ApiVersion {
    /// `v1`
    V1,
    /// `v2`
    V2,
}

impl ApiVersion {
    /// Label value used in the by-version family
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Which API an API request went to
///
/// META and a versioned INDEX are exclusive by construction.
pub enum ApiRoute {
    /// The META API
    Meta,
    /// The INDEX API, with its version when the path carries one
    Index(Option<ApiVersion>),
}

#[derive(Debug, Clone)]
/// Classifies requests under one addressing scheme
pub struct Classifier {
    scheme: Scheme,
    domain: String,
}

impl Classifier {
    /// Create a new classifier. `domain` is the canonical host of the old
    /// scheme.
    #[must_use]
    pub fn new(scheme: Scheme, domain: impl Into<String>) -> Self {
        Self {
            scheme,
            domain: domain.into(),
        }
    }

    /// The scheme in force
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Service category of a request, `None` when the old scheme does not
    /// cover its host
    #[must_use]
    pub fn classify(&self, host: &str, path: &str) -> Option<Category> {
        match self.scheme {
            Scheme::Old => self.classify_old(host, path),
            Scheme::New => Some(classify_new(host)),
        }
    }

    /// The API a request went to. Only meaningful for [`Category::Api`].
    #[must_use]
    pub fn api_route(&self, path: &str) -> ApiRoute {
        if self.is_meta(path) {
            ApiRoute::Meta
        } else {
            ApiRoute::Index(self.api_version(path))
        }
    }

    /// INDEX version carried by `path`
    #[must_use]
    pub fn api_version(&self, path: &str) -> Option<ApiVersion> {
        match self.scheme {
            Scheme::Old => {
                if starts_with_any(path, &OLD_V1_PREFIXES) {
                    Some(ApiVersion::V1)
                } else if starts_with_any(path, &OLD_V2_PREFIXES) {
                    Some(ApiVersion::V2)
                } else {
                    None
                }
            }
            Scheme::New => {
                if path.starts_with(NEW_V1_PREFIX) {
                    Some(ApiVersion::V1)
                } else if path.starts_with(NEW_V2_PREFIX) {
                    Some(ApiVersion::V2)
                } else {
                    None
                }
            }
        }
    }

    /// True when `path` addresses the META API
    #[must_use]
    pub fn is_meta(&self, path: &str) -> bool {
        match self.scheme {
            Scheme::Old => path.starts_with(OLD_META_PREFIX),
            Scheme::New => path.starts_with(NEW_META_PREFIX),
        }
    }

    fn classify_old(&self, host: &str, path: &str) -> Option<Category> {
        if !strip_port(host).eq_ignore_ascii_case(&self.domain) {
            return None;
        }
        Some(if starts_with_any(path, &OLD_SPARQL_PREFIXES) {
            Category::Sparql
        } else if path.starts_with(OLD_SEARCH_PREFIX) {
            Category::Search
        } else if starts_with_any(path, &OLD_API_PREFIXES) {
            Category::Api
        } else {
            Category::Dataset
        })
    }
}

fn classify_new(host: &str) -> Category {
    let host = strip_port(host);
    let Some((subdomain, _)) = host.split_once('.') else {
        return Category::Dataset;
    };
    if subdomain.eq_ignore_ascii_case("api") {
        Category::Api
    } else if subdomain.eq_ignore_ascii_case("sparql") {
        Category::Sparql
    } else if subdomain.eq_ignore_ascii_case("search") {
        Category::Search
    } else {
        Category::Dataset
    }
}

fn starts_with_any(path: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| path.starts_with(prefix))
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}
