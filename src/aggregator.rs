use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{timeout_at, Instant};

use crate::apis::{Author, Paper, PaperSource, SearchFilters, SourceError, SourceKind};
use crate::bibtex;
use crate::cache::{cache_key, Cache, CacheClass, CacheStats};
use crate::identifier::{classify, Identifier};

pub const MAX_LIMIT: u32 = 100;
pub const MAX_BATCH: usize = 50;
pub const MAX_NETWORK_DEPTH: u8 = 2;
/// Papers fetched per relation per node when building a citation network.
const NETWORK_FANOUT: u32 = 10;
/// Nodes carried into the next level of a citation network.
const NETWORK_FRONTIER: usize = 10;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("no paper found for '{0}'")]
    NotFound(String),
    #[error("all sources unavailable for '{id}': {}", .failures.join("; "))]
    Unavailable { id: String, failures: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    pub papers: Vec<Paper>,
    /// Distinct matches found before truncation; not an upstream total.
    pub total_found: Option<usize>,
    pub sources_queried: Vec<SourceKind>,
    pub sources_failed: Vec<SourceKind>,
    pub truncated: bool,
}

impl SearchResult {
    /// Every queried source answered in time.
    pub fn is_complete(&self) -> bool {
        self.sources_failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CitationEdge {
    /// The citing paper.
    pub from: String,
    /// The cited paper.
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationNetwork {
    pub root: String,
    pub depth: u8,
    pub nodes: Vec<Paper>,
    pub edges: Vec<CitationEdge>,
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Citations,
    References,
}

impl Relation {
    fn operation(self) -> &'static str {
        match self {
            Relation::Citations => "get_citations",
            Relation::References => "get_references",
        }
    }
}

/// How a candidate source is asked for a paper.
enum Lookup {
    Native(String),
    Title(String),
}

impl Lookup {
    async fn run(&self, source: &dyn PaperSource) -> Result<Option<Paper>, SourceError> {
        match self {
            Lookup::Native(id) => source.get_paper(id).await,
            Lookup::Title(title) => Ok(source
                .search(title, 1, &SearchFilters::default())
                .await?
                .into_iter()
                .next()),
        }
    }
}

/// Results of one concurrent fan-out.
struct FanOut<T> {
    ok: Vec<(SourceKind, T)>,
    failed: Vec<(SourceKind, String)>,
}

impl<T> FanOut<T> {
    fn all_failed(&self) -> bool {
        self.ok.is_empty() && !self.failed.is_empty()
    }

    fn failures(&self) -> Vec<String> {
        self.failed.iter().map(|(k, e)| format!("{}: {}", k, e)).collect()
    }
}

/// Candidate sources for a paper lookup, in the order they are tried.
pub fn routing(id: &Identifier) -> &'static [SourceKind] {
    use SourceKind::*;
    match id {
        Identifier::ArxivDoi { .. } | Identifier::ArxivId { .. } => &[Arxiv, SemanticScholar, OpenAlex],
        Identifier::Doi { .. } => &[CrossRef, OpenAlex, SemanticScholar],
        Identifier::OpenAlexId { .. } => &[OpenAlex],
        Identifier::SemanticScholarId { .. } => &[SemanticScholar],
        Identifier::DblpKey { .. } => &[Dblp],
        Identifier::FreeText { .. } => &[OpenAlex, SemanticScholar],
    }
}

pub struct Aggregator {
    sources: Vec<Arc<dyn PaperSource>>,
    cache: Arc<Cache>,
    request_timeout: Duration,
}

impl Aggregator {
    pub fn new(sources: Vec<Arc<dyn PaperSource>>, cache: Arc<Cache>, request_timeout: Duration) -> Self {
        Self {
            sources,
            cache,
            request_timeout,
        }
    }

    fn source(&self, kind: SourceKind) -> Option<&Arc<dyn PaperSource>> {
        self.sources.iter().find(|s| s.kind() == kind)
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.request_timeout
    }

    /// Compact expired entries, then report per-class statistics.
    pub fn cache_stats(&self) -> Vec<CacheStats> {
        let purged = self.cache.purge_expired();
        if purged > 0 {
            tracing::debug!("Purged {} expired cache entries", purged);
        }
        self.cache.stats()
    }

    /// Run `call` against every source in `sources` concurrently, bounded by
    /// `deadline`. Calls still running at the deadline are dropped.
    async fn fan_out<T, F, Fut>(
        &self,
        sources: Vec<Arc<dyn PaperSource>>,
        deadline: Instant,
        operation: &'static str,
        call: F,
    ) -> FanOut<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn PaperSource>) -> Fut,
        Fut: Future<Output = Result<T, SourceError>> + Send + 'static,
    {
        let handles: Vec<_> = sources
            .into_iter()
            .map(|source| {
                let kind = source.kind();
                (kind, tokio::spawn(timeout_at(deadline, call(source))))
            })
            .collect();

        let mut out = FanOut {
            ok: Vec::new(),
            failed: Vec::new(),
        };
        for (kind, handle) in handles {
            match handle.await {
                Ok(Ok(Ok(value))) => out.ok.push((kind, value)),
                Ok(Ok(Err(e))) => {
                    tracing::warn!(source = %kind, operation, "Source failed: {}", e);
                    out.failed.push((kind, e.to_string()));
                }
                Ok(Err(_)) => {
                    tracing::warn!(source = %kind, operation, "Source timed out");
                    out.failed.push((kind, "timed out".to_string()));
                }
                Err(e) => {
                    tracing::warn!(source = %kind, operation, "Source task panicked: {}", e);
                    out.failed.push((kind, "task failed".to_string()));
                }
            }
        }
        out
    }

    // ── Paper lookup ────────────────────────────────────────────────────────

    /// Resolve one identifier to a paper. `Ok(None)` means every candidate
    /// source agreed there is no such paper (or none could address it).
    pub async fn get_paper(&self, input: &str) -> Result<Option<Paper>, AggregateError> {
        self.lookup_paper(input, self.deadline()).await
    }

    async fn lookup_paper(&self, input: &str, deadline: Instant) -> Result<Option<Paper>, AggregateError> {
        if input.trim().is_empty() {
            return Err(AggregateError::Validation("identifier must not be empty".into()));
        }
        let id = classify(input);
        let key = id_key("get_paper", &id, &[]);
        if let Some(paper) = self.cache.get::<Paper>(CacheClass::Paper, &key) {
            return Ok(Some(paper));
        }

        tracing::debug!(identifier = %id, "Resolving paper");
        let paper = self.resolve(&id, deadline).await?;
        if let Some(paper) = &paper {
            self.cache.set(CacheClass::Paper, &key, paper);
        }
        Ok(paper)
    }

    async fn resolve(&self, id: &Identifier, deadline: Instant) -> Result<Option<Paper>, AggregateError> {
        let mut saw_not_found = false;
        let mut failures = Vec::new();

        for &kind in routing(id) {
            let Some(source) = self.source(kind) else {
                continue;
            };
            let lookup = match (id, source.native_id(id)) {
                (Identifier::FreeText { value }, _) => Lookup::Title(value.clone()),
                (_, Some(native)) => Lookup::Native(native),
                (_, None) => continue,
            };

            match timeout_at(deadline, lookup.run(&**source)).await {
                Ok(Ok(Some(paper))) => {
                    tracing::debug!(source = %kind, id = %paper.id, "Resolved paper");
                    return Ok(Some(paper));
                }
                Ok(Ok(None)) => {
                    tracing::debug!(source = %kind, "Not found, trying next source");
                    saw_not_found = true;
                }
                Ok(Err(e)) if e.is_rate_limit() => {
                    tracing::warn!(source = %kind, identifier = %id, "Rate limited, trying next source");
                    failures.push(format!("{}: {}", kind, e));
                }
                Ok(Err(e)) => {
                    tracing::warn!(source = %kind, identifier = %id, "Lookup failed: {}", e);
                    failures.push(format!("{}: {}", kind, e));
                }
                Err(_) => {
                    tracing::warn!(source = %kind, identifier = %id, "Lookup timed out");
                    failures.push(format!("{}: timed out", kind));
                    break;
                }
            }
        }

        if saw_not_found || failures.is_empty() {
            Ok(None)
        } else {
            Err(AggregateError::Unavailable {
                id: id.value().to_string(),
                failures,
            })
        }
    }

    async fn require_paper(&self, input: &str, deadline: Instant) -> Result<Paper, AggregateError> {
        self.lookup_paper(input, deadline)
            .await?
            .ok_or_else(|| AggregateError::NotFound(input.trim().to_string()))
    }

    // ── Search ──────────────────────────────────────────────────────────────

    pub async fn search(
        &self,
        query: &str,
        limit: u32,
        filters: &SearchFilters,
    ) -> Result<SearchResult, AggregateError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AggregateError::Validation("query must not be empty".into()));
        }
        validate_limit(limit)?;

        let limit_str = limit.to_string();
        let mut params = vec![("query", query), ("limit", limit_str.as_str())];
        params.extend(filters.iter());
        let key = cache_key("search", &params);
        if let Some(result) = self.cache.get::<SearchResult>(CacheClass::Search, &key) {
            return Ok(result);
        }

        let sources: Vec<_> = self.sources.iter().filter(|s| s.supports_search()).cloned().collect();
        let sources_queried: Vec<_> = sources.iter().map(|s| s.kind()).collect();
        let q = query.to_string();
        let f = filters.clone();
        let fan = self
            .fan_out(sources, self.deadline(), "search", move |source| {
                let (q, f) = (q.clone(), f.clone());
                async move { source.search(&q, limit, &f).await }
            })
            .await;
        if fan.all_failed() {
            return Err(AggregateError::Unavailable {
                id: query.to_string(),
                failures: fan.failures(),
            });
        }

        let mut papers = merge_ranked(fan.ok);
        papers.retain(|p| filters.accepts(p));
        let total = papers.len();
        papers.truncate(limit as usize);

        let result = SearchResult {
            query: query.to_string(),
            papers,
            total_found: Some(total),
            sources_queried,
            sources_failed: fan.failed.iter().map(|(k, _)| *k).collect(),
            truncated: total > limit as usize,
        };
        tracing::info!(
            query,
            results = result.papers.len(),
            failed = result.sources_failed.len(),
            "Search complete"
        );
        // A partial answer is not cached, so the next request retries the missing sources.
        if result.is_complete() {
            self.cache.set(CacheClass::Search, &key, &result);
        }
        Ok(result)
    }

    pub async fn search_author(&self, name: &str, limit: u32) -> Result<Vec<Author>, AggregateError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AggregateError::Validation("author name must not be empty".into()));
        }
        validate_limit(limit)?;
        let key = cache_key("search_author", &[("name", name), ("limit", &limit.to_string())]);
        if let Some(authors) = self.cache.get::<Vec<Author>>(CacheClass::Search, &key) {
            return Ok(authors);
        }

        let n = name.to_string();
        let fan = self
            .fan_out(self.sources.clone(), self.deadline(), "search_author", move |source| {
                let n = n.clone();
                async move { source.search_authors(&n, limit).await }
            })
            .await;
        if fan.all_failed() {
            return Err(AggregateError::Unavailable {
                id: name.to_string(),
                failures: fan.failures(),
            });
        }

        let mut batches = fan.ok;
        batches.sort_by_key(|(k, _)| k.search_priority());
        let mut authors: Vec<Author> = batches.into_iter().flat_map(|(_, a)| a).collect();
        authors.truncate(limit as usize);
        if fan.failed.is_empty() {
            self.cache.set(CacheClass::Search, &key, &authors);
        }
        Ok(authors)
    }

    // ── Relations ───────────────────────────────────────────────────────────

    pub async fn get_citations(&self, input: &str, limit: u32) -> Result<Vec<Paper>, AggregateError> {
        self.relation(input, limit, Relation::Citations).await
    }

    pub async fn get_references(&self, input: &str, limit: u32) -> Result<Vec<Paper>, AggregateError> {
        self.relation(input, limit, Relation::References).await
    }

    async fn relation(&self, input: &str, limit: u32, relation: Relation) -> Result<Vec<Paper>, AggregateError> {
        validate_limit(limit)?;
        let key = id_key(relation.operation(), &classify(input), &[("limit", &limit.to_string())]);
        if let Some(papers) = self.cache.get::<Vec<Paper>>(CacheClass::Paper, &key) {
            return Ok(papers);
        }

        let deadline = self.deadline();
        let seed = self.require_paper(input, deadline).await?;
        let fan = self.fan_out_relation(&seed, relation, limit, deadline).await;
        if fan.all_failed() {
            return Err(AggregateError::Unavailable {
                id: seed.id,
                failures: fan.failures(),
            });
        }

        let complete = fan.failed.is_empty();
        let mut papers = merge_ranked(fan.ok);
        papers.retain(|p| p.id != seed.id);
        papers.truncate(limit as usize);
        if complete {
            self.cache.set(CacheClass::Paper, &key, &papers);
        }
        Ok(papers)
    }

    async fn fan_out_relation(
        &self,
        seed: &Paper,
        relation: Relation,
        limit: u32,
        deadline: Instant,
    ) -> FanOut<Vec<Paper>> {
        let sources: Vec<_> = self.sources.iter().filter(|s| s.supports_citations()).cloned().collect();
        let seed = Arc::new(seed.clone());
        self.fan_out(sources, deadline, relation.operation(), move |source| {
            let seed = Arc::clone(&seed);
            async move {
                match relation {
                    Relation::Citations => source.get_citations(&seed, limit).await,
                    Relation::References => source.get_references(&seed, limit).await,
                }
            }
        })
        .await
    }

    /// Related papers: Semantic Scholar recommendations first, then OpenAlex
    /// related works. The first non-empty answer wins.
    pub async fn get_related(&self, input: &str, limit: u32) -> Result<Vec<Paper>, AggregateError> {
        validate_limit(limit)?;
        let key = id_key("get_related", &classify(input), &[("limit", &limit.to_string())]);
        if let Some(papers) = self.cache.get::<Vec<Paper>>(CacheClass::Paper, &key) {
            return Ok(papers);
        }

        let deadline = self.deadline();
        let seed = self.require_paper(input, deadline).await?;
        let mut failures = Vec::new();
        let mut answered = false;
        for kind in [SourceKind::SemanticScholar, SourceKind::OpenAlex] {
            let Some(source) = self.source(kind) else {
                continue;
            };
            match timeout_at(deadline, source.get_related(&seed, limit)).await {
                Ok(Ok(papers)) => {
                    answered = true;
                    let papers: Vec<Paper> = papers
                        .into_iter()
                        .filter(|p| p.id != seed.id)
                        .take(limit as usize)
                        .collect();
                    if !papers.is_empty() {
                        self.cache.set(CacheClass::Paper, &key, &papers);
                        return Ok(papers);
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(source = %kind, "Related lookup failed: {}", e);
                    failures.push(format!("{}: {}", kind, e));
                }
                Err(_) => {
                    tracing::warn!(source = %kind, "Related lookup timed out");
                    failures.push(format!("{}: timed out", kind));
                    break;
                }
            }
        }
        if !answered && !failures.is_empty() {
            return Err(AggregateError::Unavailable { id: seed.id, failures });
        }
        Ok(Vec::new())
    }

    /// Breadth-first citation graph around a paper. Each level's nodes are
    /// expanded concurrently; on timeout the network built so far is returned.
    pub async fn get_citation_network(&self, input: &str, depth: u8) -> Result<CitationNetwork, AggregateError> {
        if !(1..=MAX_NETWORK_DEPTH).contains(&depth) {
            return Err(AggregateError::Validation(format!(
                "depth must be between 1 and {}",
                MAX_NETWORK_DEPTH
            )));
        }
        let key = id_key("get_citation_network", &classify(input), &[("depth", &depth.to_string())]);
        if let Some(network) = self.cache.get::<CitationNetwork>(CacheClass::Paper, &key) {
            return Ok(network);
        }

        let deadline = self.deadline();
        let root = self.require_paper(input, deadline).await?;
        let root_id = root.id.clone();
        let mut index: HashMap<String, usize> = HashMap::from([(root.id.clone(), 0)]);
        let mut nodes = vec![root.clone()];
        let mut edges: Vec<CitationEdge> = Vec::new();
        let mut seen_edges: HashSet<CitationEdge> = HashSet::new();
        let mut complete = true;
        let mut frontier = vec![root];

        for level in 0..depth {
            if Instant::now() >= deadline {
                complete = false;
                break;
            }
            let expansions = join_all(frontier.iter().map(|paper| async move {
                let (citing, cited) = tokio::join!(
                    self.fan_out_relation(paper, Relation::Citations, NETWORK_FANOUT, deadline),
                    self.fan_out_relation(paper, Relation::References, NETWORK_FANOUT, deadline),
                );
                (paper.id.clone(), citing, cited)
            }))
            .await;

            let mut next = Vec::new();
            for (center, citing, cited) in expansions {
                complete &= citing.failed.is_empty() && cited.failed.is_empty();
                let incoming = merge_ranked(citing.ok).into_iter().map(|p| (p, true));
                let outgoing = merge_ranked(cited.ok).into_iter().map(|p| (p, false));
                for (paper, cites_center) in incoming.chain(outgoing) {
                    if paper.id.is_empty() || paper.id == center {
                        continue;
                    }
                    let edge = if cites_center {
                        CitationEdge { from: paper.id.clone(), to: center.clone() }
                    } else {
                        CitationEdge { from: center.clone(), to: paper.id.clone() }
                    };
                    if seen_edges.insert(edge.clone()) {
                        edges.push(edge);
                    }
                    if !index.contains_key(&paper.id) {
                        index.insert(paper.id.clone(), nodes.len());
                        nodes.push(paper.clone());
                        next.push(paper);
                    }
                }
            }
            tracing::debug!(hop = level + 1, nodes = nodes.len(), edges = edges.len(), "Expanded citation network");

            next.sort_by(|a, b| b.citation_count.unwrap_or(0).cmp(&a.citation_count.unwrap_or(0)));
            next.truncate(NETWORK_FRONTIER);
            frontier = next;
        }

        let network = CitationNetwork {
            root: root_id,
            depth,
            nodes,
            edges,
            complete,
        };
        if network.complete {
            self.cache.set(CacheClass::Paper, &key, &network);
        }
        Ok(network)
    }

    // ── BibTeX ──────────────────────────────────────────────────────────────

    /// BibTeX for each input, in input order. Items fail independently.
    pub async fn get_bibtex(
        &self,
        inputs: &[String],
    ) -> Result<Vec<(String, Result<String, AggregateError>)>, AggregateError> {
        if inputs.is_empty() {
            return Err(AggregateError::Validation("at least one identifier is required".into()));
        }
        if inputs.len() > MAX_BATCH {
            return Err(AggregateError::Validation(format!(
                "at most {} identifiers per request",
                MAX_BATCH
            )));
        }
        Ok(join_all(inputs.iter().map(|input| async move {
            let id = input.trim().to_string();
            let bib = self.bibtex_one(&id).await;
            (id, bib)
        }))
        .await)
    }

    async fn bibtex_one(&self, input: &str) -> Result<String, AggregateError> {
        let id = classify(input);
        if id.is_free_text() {
            return Err(AggregateError::Validation(format!(
                "'{}' is not a recognized paper identifier",
                input
            )));
        }
        let key = id_key("get_bibtex", &id, &[]);
        if let Some(bib) = self.cache.get::<String>(CacheClass::Bibtex, &key) {
            return Ok(bib);
        }

        let deadline = self.deadline();
        if let Some(dblp) = self.source(SourceKind::Dblp) {
            match timeout_at(deadline, dblp.get_bibtex(&id)).await {
                Ok(Ok(Some(bib))) => {
                    self.cache.set(CacheClass::Bibtex, &key, &bib);
                    return Ok(bib);
                }
                Ok(Ok(None)) => tracing::debug!(identifier = %id, "No DBLP BibTeX, generating"),
                Ok(Err(e)) => tracing::warn!(identifier = %id, "DBLP BibTeX failed: {}", e),
                Err(_) => tracing::warn!(identifier = %id, "DBLP BibTeX timed out"),
            }
        }

        let paper = self.require_paper(input, deadline).await?;
        let bib = bibtex::to_bibtex(&paper);
        self.cache.set(CacheClass::Bibtex, &key, &bib);
        Ok(bib)
    }
}

/// Cache key for an identifier-addressed operation. Keyed on the classified
/// form, since `w123` (free text) and `W123` (OpenAlex) are different lookups.
fn id_key(operation: &str, id: &Identifier, extra: &[(&str, &str)]) -> String {
    let mut params = vec![("kind", id.kind_name()), ("id", id.value())];
    params.extend_from_slice(extra);
    cache_key(operation, &params)
}

fn validate_limit(limit: u32) -> Result<(), AggregateError> {
    if (1..=MAX_LIMIT).contains(&limit) {
        Ok(())
    } else {
        Err(AggregateError::Validation(format!(
            "limit must be between 1 and {}, got {}",
            MAX_LIMIT, limit
        )))
    }
}

/// Concatenate per-source result lists in source priority order and collapse
/// duplicates into the first (highest-priority) occurrence.
fn merge_ranked(mut batches: Vec<(SourceKind, Vec<Paper>)>) -> Vec<Paper> {
    batches.sort_by_key(|(kind, _)| kind.search_priority());
    let mut merged: Vec<Paper> = Vec::new();
    for paper in batches.into_iter().flat_map(|(_, papers)| papers) {
        match merged.iter_mut().find(|m| is_duplicate(m, &paper)) {
            Some(existing) => existing.absorb(&paper),
            None => merged.push(paper),
        }
    }
    merged
}

/// Same DOI when both have one; otherwise same normalized title and year.
fn is_duplicate(a: &Paper, b: &Paper) -> bool {
    if let (Some(x), Some(y)) = (a.doi(), b.doi()) {
        return x == y;
    }
    if a.year != b.year {
        return false;
    }
    let (ta, tb) = (normalize_title(&a.title), normalize_title(&b.title));
    if ta.is_empty() || tb.is_empty() {
        return false;
    }
    ta == tb || (ta.len() >= 20 && strsim::levenshtein(&ta, &tb) < 3)
}

fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
