pub mod arxiv;
pub mod crossref;
pub mod dblp;
pub mod openalex;
pub mod semantic_scholar;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::{normalize_doi, Identifier};

/// The five upstreams this server knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "openalex")]
    OpenAlex,
    #[serde(rename = "dblp")]
    Dblp,
    #[serde(rename = "semantic_scholar")]
    SemanticScholar,
    #[serde(rename = "arxiv")]
    Arxiv,
    #[serde(rename = "crossref")]
    CrossRef,
}

impl SourceKind {
    /// All sources, ordered by search merge priority.
    pub const ALL: [SourceKind; 5] = [
        SourceKind::OpenAlex,
        SourceKind::Dblp,
        SourceKind::SemanticScholar,
        SourceKind::Arxiv,
        SourceKind::CrossRef,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SourceKind::OpenAlex => "openalex",
            SourceKind::Dblp => "dblp",
            SourceKind::SemanticScholar => "semantic_scholar",
            SourceKind::Arxiv => "arxiv",
            SourceKind::CrossRef => "crossref",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Rank used when duplicate search hits are merged (lower wins).
    pub fn search_priority(self) -> u8 {
        match self {
            SourceKind::OpenAlex => 0,
            SourceKind::Dblp => 1,
            SourceKind::SemanticScholar => 2,
            SourceKind::Arxiv => 3,
            SourceKind::CrossRef => 4,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-source identifiers known for a paper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperIds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openalex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arxiv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dblp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_scholar: Option<String>,
}

impl PaperIds {
    /// Best identifier: OpenAlex > DOI > arXiv > DBLP > Semantic Scholar.
    pub fn canonical(&self) -> Option<&str> {
        self.openalex
            .as_deref()
            .or(self.doi.as_deref())
            .or(self.arxiv.as_deref())
            .or(self.dblp.as_deref())
            .or(self.semantic_scholar.as_deref())
    }

    fn fill_from(&mut self, other: &PaperIds) {
        fill(&mut self.openalex, &other.openalex);
        fill(&mut self.doi, &other.doi);
        fill(&mut self.arxiv, &other.arxiv);
        fill(&mut self.dblp, &other.dblp);
        fill(&mut self.semantic_scholar, &other.semantic_scholar);
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, other: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(other);
    }
}

/// Normalized paper record, whatever upstream produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<u32>,
    pub venue: Option<String>,
    pub abstract_text: Option<String>,
    pub citation_count: Option<u32>,
    pub url: Option<String>,
    pub pdf_url: Option<String>,
    pub source: SourceKind,
    pub ids: PaperIds,
}

impl Paper {
    pub fn new(source: SourceKind, title: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            authors: Vec::new(),
            year: None,
            venue: None,
            abstract_text: None,
            citation_count: None,
            url: None,
            pdf_url: None,
            source,
            ids: PaperIds::default(),
        }
    }

    pub fn doi(&self) -> Option<&str> {
        self.ids.doi.as_deref()
    }

    /// Apply the record invariants: lower-case bare DOI, year within
    /// 1900..=2100, collapsed title whitespace, canonical `id`.
    pub fn normalized(mut self) -> Self {
        self.ids.doi = self.ids.doi.as_deref().and_then(normalize_doi);
        self.year = self.year.filter(|y| (1900..=2100).contains(y));
        self.title = self.title.split_whitespace().collect::<Vec<_>>().join(" ");
        self.venue = self.venue.filter(|v| !v.trim().is_empty());
        self.abstract_text = self.abstract_text.filter(|a| !a.trim().is_empty());
        self.id = self.ids.canonical().unwrap_or_default().to_string();
        self
    }

    /// Fill gaps in this record from a duplicate returned by another source.
    /// Fields already present here win.
    pub fn absorb(&mut self, other: &Paper) {
        self.ids.fill_from(&other.ids);
        if self.authors.is_empty() {
            self.authors.clone_from(&other.authors);
        }
        fill(&mut self.year, &other.year);
        fill(&mut self.venue, &other.venue);
        fill(&mut self.abstract_text, &other.abstract_text);
        fill(&mut self.citation_count, &other.citation_count);
        fill(&mut self.url, &other.url);
        fill(&mut self.pdf_url, &other.pdf_url);
        self.id = self.ids.canonical().unwrap_or_default().to_string();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
    pub source: SourceKind,
    pub affiliation: Option<String>,
    pub paper_count: Option<u32>,
    pub citation_count: Option<u32>,
    pub url: Option<String>,
}

const FILTER_KEYS: [&str; 4] = ["year", "year_from", "year_to", "venue"];

/// Search filters as an order-insensitive map of lower-cased keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchFilters(BTreeMap<String, String>);

impl SearchFilters {
    /// Build filters from loosely-typed tool arguments, rejecting unknown keys.
    pub fn from_json(map: &HashMap<String, serde_json::Value>) -> Result<Self, String> {
        let mut filters = Self::default();
        for (key, value) in map {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Null => continue,
                other => return Err(format!("filter '{}' must be a string or number, got {}", key, other)),
            };
            filters.insert(key, &value)?;
        }
        Ok(filters)
    }

    pub fn insert(&mut self, key: &str, value: &str) -> Result<(), String> {
        let key = key.trim().to_lowercase();
        if !FILTER_KEYS.contains(&key.as_str()) {
            return Err(format!(
                "unknown filter '{}' (supported: {})",
                key,
                FILTER_KEYS.join(", ")
            ));
        }
        let value = value.trim();
        if key.starts_with("year") && parse_year_range(value).is_none() {
            return Err(format!("filter '{}' has invalid year value '{}'", key, value));
        }
        self.0.insert(key, value.to_string());
        Ok(())
    }

    /// Key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Inclusive year bounds. `year` accepts `2020` or `2018-2020`;
    /// `year_from`/`year_to` narrow it further.
    pub fn year_range(&self) -> (Option<u32>, Option<u32>) {
        let (mut from, mut to) = self
            .0
            .get("year")
            .and_then(|y| parse_year_range(y))
            .unwrap_or((None, None));
        if let Some((f, _)) = self.0.get("year_from").and_then(|y| parse_year_range(y)) {
            from = from.max(f);
        }
        if let Some((_, t)) = self.0.get("year_to").and_then(|y| parse_year_range(y)) {
            to = match (to, t) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        (from, to)
    }

    pub fn venue(&self) -> Option<&str> {
        self.0.get("venue").map(String::as_str)
    }

    /// Year range and venue applied locally, so results match the filters
    /// whichever source produced them. Venue is a case-insensitive substring.
    pub fn accepts(&self, paper: &Paper) -> bool {
        let year_ok = match self.year_range() {
            (None, None) => true,
            (from, to) => paper
                .year
                .is_some_and(|y| from.map_or(true, |f| y >= f) && to.map_or(true, |t| y <= t)),
        };
        let venue_ok = match self.venue() {
            None => true,
            Some(wanted) => paper
                .venue
                .as_deref()
                .is_some_and(|v| v.to_lowercase().contains(&wanted.to_lowercase())),
        };
        year_ok && venue_ok
    }
}

fn parse_year_range(value: &str) -> Option<(Option<u32>, Option<u32>)> {
    let parse = |s: &str| -> Option<Option<u32>> {
        let s = s.trim();
        if s.is_empty() {
            return Some(None);
        }
        s.parse::<u32>().ok().filter(|y| (1900..=2100).contains(y)).map(Some)
    };
    match value.split_once('-') {
        Some((a, b)) => Some((parse(a)?, parse(b)?)),
        None => {
            let y = parse(value)??;
            Some((Some(y), Some(y)))
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0} rate limit exceeded")]
    RateLimited(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error: {0}")]
    Api(String),
}

impl SourceError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, SourceError::RateLimited(_))
    }
}

/// Map throttling and non-success statuses to errors.
pub(crate) fn check_status(
    resp: reqwest::Response,
    source: SourceKind,
) -> Result<reqwest::Response, SourceError> {
    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(SourceError::RateLimited(source.name().to_string()));
    }
    if !status.is_success() {
        return Err(SourceError::Api(format!("{} returned status {}", source, status)));
    }
    Ok(resp)
}

pub(crate) fn http_client(user_agent: &str) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
}

pub(crate) fn user_agent(email: Option<&str>) -> String {
    match email {
        Some(e) => format!("paper-hub/{} (mailto:{})", env!("CARGO_PKG_VERSION"), e),
        None => format!("paper-hub/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// One upstream API. `get_paper` reports a missing record as `Ok(None)`;
/// errors are reserved for transport, throttling and malformed responses.
#[async_trait]
pub trait PaperSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn name(&self) -> &str {
        self.kind().name()
    }

    fn supports_search(&self) -> bool {
        true
    }

    fn supports_citations(&self) -> bool {
        false
    }

    /// The lookup key this source understands for `id`, if any.
    fn native_id(&self, id: &Identifier) -> Option<String>;

    async fn search(
        &self,
        query: &str,
        limit: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<Paper>, SourceError>;

    async fn get_paper(&self, native_id: &str) -> Result<Option<Paper>, SourceError>;

    async fn get_citations(&self, _paper: &Paper, _limit: u32) -> Result<Vec<Paper>, SourceError> {
        Ok(vec![])
    }

    async fn get_references(&self, _paper: &Paper, _limit: u32) -> Result<Vec<Paper>, SourceError> {
        Ok(vec![])
    }

    async fn get_related(&self, _paper: &Paper, _limit: u32) -> Result<Vec<Paper>, SourceError> {
        Ok(vec![])
    }

    async fn search_authors(&self, _name: &str, _limit: u32) -> Result<Vec<Author>, SourceError> {
        Ok(vec![])
    }

    /// Source-native BibTeX, if this source publishes it for `id`.
    async fn get_bibtex(&self, _id: &Identifier) -> Result<Option<String>, SourceError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_id_priority() {
        let mut ids = PaperIds {
            semantic_scholar: Some("abc".into()),
            dblp: Some("conf/x/Y20".into()),
            ..Default::default()
        };
        assert_eq!(ids.canonical(), Some("conf/x/Y20"));
        ids.arxiv = Some("2301.12345".into());
        assert_eq!(ids.canonical(), Some("2301.12345"));
        ids.doi = Some("10.1/x".into());
        assert_eq!(ids.canonical(), Some("10.1/x"));
        ids.openalex = Some("W1".into());
        assert_eq!(ids.canonical(), Some("W1"));
    }

    #[test]
    fn test_normalized_paper() {
        let mut p = Paper::new(SourceKind::CrossRef, "  A   spaced\ntitle ");
        p.ids.doi = Some("https://doi.org/10.1038/NATURE12345".into());
        p.year = Some(1850);
        let p = p.normalized();
        assert_eq!(p.title, "A spaced title");
        assert_eq!(p.doi(), Some("10.1038/nature12345"));
        assert_eq!(p.id, "10.1038/nature12345");
        assert_eq!(p.year, None);
    }

    #[test]
    fn test_absorb_fills_gaps_and_recomputes_id() {
        let mut kept = Paper::new(SourceKind::Dblp, "Title");
        kept.ids.dblp = Some("conf/a/B20".into());
        let kept_venue = Some("NeurIPS".to_string());
        kept.venue = kept_venue.clone();
        let mut kept = kept.normalized();

        let mut other = Paper::new(SourceKind::SemanticScholar, "Title");
        other.ids.doi = Some("10.5/abc".into());
        other.venue = Some("Other".into());
        other.abstract_text = Some("Abstract".into());
        other.citation_count = Some(7);

        kept.absorb(&other.normalized());
        assert_eq!(kept.id, "10.5/abc");
        assert_eq!(kept.venue, kept_venue);
        assert_eq!(kept.abstract_text.as_deref(), Some("Abstract"));
        assert_eq!(kept.citation_count, Some(7));
        assert_eq!(kept.source, SourceKind::Dblp);
    }

    #[test]
    fn test_filters_reject_unknown_keys() {
        let mut f = SearchFilters::default();
        assert!(f.insert("colour", "red").is_err());
        assert!(f.insert("year", "nineteen").is_err());
        assert!(f.insert("Year", "2020").is_ok());
        assert_eq!(f.year_range(), (Some(2020), Some(2020)));
    }

    #[test]
    fn test_filters_year_range() {
        let mut f = SearchFilters::default();
        f.insert("year", "2015-2022").unwrap();
        f.insert("year_from", "2018").unwrap();
        assert_eq!(f.year_range(), (Some(2018), Some(2022)));

        let mut p = Paper::new(SourceKind::OpenAlex, "x");
        p.year = Some(2019);
        assert!(f.accepts(&p));
        p.year = Some(2016);
        assert!(!f.accepts(&p));
        p.year = None;
        assert!(!f.accepts(&p));
    }

    #[test]
    fn test_filters_venue() {
        let mut f = SearchFilters::default();
        f.insert("venue", "icml").unwrap();
        let mut p = Paper::new(SourceKind::OpenAlex, "x");
        assert!(!f.accepts(&p));
        p.venue = Some("Proceedings of ICML 2021".into());
        assert!(f.accepts(&p));
        p.venue = Some("Nature".into());
        assert!(!f.accepts(&p));
    }

    #[test]
    fn test_filters_from_json() {
        let mut map = HashMap::new();
        map.insert("year_to".to_string(), serde_json::json!(2021));
        map.insert("venue".to_string(), serde_json::json!("ICML"));
        let f = SearchFilters::from_json(&map).unwrap();
        assert_eq!(f.year_range(), (None, Some(2021)));
        assert_eq!(f.venue(), Some("ICML"));

        map.insert("bogus".to_string(), serde_json::json!(true));
        assert!(SearchFilters::from_json(&map).is_err());
    }

    #[test]
    fn test_source_kind_names_round_trip() {
        for kind in SourceKind::ALL {
            assert_eq!(SourceKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(SourceKind::from_name("CrossRef"), Some(SourceKind::CrossRef));
        assert_eq!(SourceKind::from_name("inspire"), None);
    }
}
