// Search uses the JSON API; records and BibTeX come from rec/<key>.{xml,bib}.

use super::{check_status, http_client, user_agent, Author, Paper, PaperSource, SearchFilters, SourceError, SourceKind};
use crate::identifier::{normalize_doi, strip_arxiv_version, Identifier};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Deserialize;

const BASE_URL: &str = "https://dblp.org";

/// DBLP appends a homonym counter ("Wei Wang 0001") to disambiguate authors.
static HOMONYM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+\d{4}$").expect("valid regex"));
static NEW_ARXIV_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})\.(\d{4,5})$").expect("valid regex"));

pub struct DblpClient {
    client: reqwest::Client,
}

impl DblpClient {
    pub fn new(email: Option<String>) -> Self {
        Self {
            client: http_client(&user_agent(email.as_deref())),
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<Option<String>, SourceError> {
        let resp = self.client.get(url).send().await?;
        if resp.status() == 404 {
            return Ok(None);
        }
        Ok(Some(check_status(resp, SourceKind::Dblp)?.text().await?))
    }

    async fn search_hits(&self, query: &str, limit: u32) -> Result<Vec<DblpInfo>, SourceError> {
        let resp = self
            .client
            .get(format!("{}/search/publ/api", BASE_URL))
            .query(&[
                ("q", query),
                ("format", "json"),
                ("h", limit.clamp(1, 1000).to_string().as_str()),
            ])
            .send()
            .await?;
        let resp: DblpResponse<DblpInfo> = check_status(resp, SourceKind::Dblp)?.json().await?;
        Ok(resp.result.hits.hit.unwrap_or_default().into_iter().map(|h| h.info).collect())
    }

    /// Resolve a DOI to a DBLP key via search, accepting only an exact DOI match.
    async fn key_for_doi(&self, doi: &str) -> Result<Option<String>, SourceError> {
        let hits = self.search_hits(doi, 5).await?;
        Ok(hits
            .into_iter()
            .find(|h| h.doi.as_deref().and_then(normalize_doi).as_deref() == Some(doi))
            .and_then(|h| h.key))
    }
}

/// DBLP indexes new-style arXiv preprints under `journals/corr/abs-YYMM-NNNNN`.
fn corr_key(arxiv_id: &str) -> Option<String> {
    let caps = NEW_ARXIV_RE.captures(strip_arxiv_version(arxiv_id))?;
    Some(format!("journals/corr/abs-{}-{}", &caps[1], &caps[2]))
}

fn clean_author(name: &str) -> String {
    HOMONYM_RE.replace(name.trim(), "").to_string()
}

#[derive(Deserialize)]
struct DblpResponse<T> {
    result: DblpResult<T>,
}
#[derive(Deserialize)]
struct DblpResult<T> {
    hits: DblpHits<T>,
}
#[derive(Deserialize)]
struct DblpHits<T> {
    hit: Option<Vec<DblpHit<T>>>,
}
#[derive(Deserialize)]
struct DblpHit<T> {
    info: T,
}

/// DBLP collapses single-element lists into a bare value.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Deserialize)]
struct DblpInfo {
    authors: Option<DblpAuthors>,
    title: Option<String>,
    venue: Option<OneOrMany<String>>,
    year: Option<String>,
    key: Option<String>,
    doi: Option<String>,
    ee: Option<OneOrMany<String>>,
    url: Option<String>,
}
#[derive(Deserialize)]
struct DblpAuthors {
    author: OneOrMany<DblpAuthorName>,
}
#[derive(Deserialize)]
struct DblpAuthorName {
    text: String,
}

#[derive(Deserialize)]
struct DblpAuthorInfo {
    author: String,
    url: Option<String>,
}

fn info_to_paper(info: DblpInfo) -> Paper {
    let title = info.title.unwrap_or_default();
    let mut paper = Paper::new(SourceKind::Dblp, title.trim_end_matches('.'));
    paper.authors = info
        .authors
        .map(|a| a.author.into_vec().iter().map(|n| clean_author(&n.text)).collect())
        .unwrap_or_default();
    paper.venue = info.venue.and_then(|v| v.into_vec().into_iter().next());
    paper.year = info.year.and_then(|y| y.parse().ok());
    paper.ids.doi = info.doi;
    if let Some(key) = &info.key {
        if let Some(id) = key.strip_prefix("journals/corr/abs-") {
            paper.ids.arxiv = Some(id.replacen('-', ".", 1));
        }
    }
    paper.ids.dblp = info.key;
    paper.url = info.url;
    paper.pdf_url = info
        .ee
        .and_then(|ee| ee.into_vec().into_iter().find(|u| u.ends_with(".pdf")));
    paper.normalized()
}

/// Parse a `rec/<key>.xml` record.
fn parse_record(xml: &str) -> Result<Option<Paper>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut key: Option<String> = None;
    let mut current = String::new();
    let mut title = String::new();
    let mut authors = Vec::new();
    let mut year = String::new();
    let mut venue = String::new();
    let mut ee = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                // <dblp> wraps exactly one publication element.
                if depth == 2 {
                    key = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"key")
                        .map(|a| String::from_utf8_lossy(&a.value).to_string());
                } else if depth == 3 {
                    current = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    text.clear();
                }
            }
            Ok(Event::Text(e)) if depth >= 3 => {
                text.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::End(_)) => {
                if depth == 3 {
                    let value = text.trim().to_string();
                    match current.as_str() {
                        "title" => title = value,
                        "author" | "editor" => authors.push(clean_author(&value)),
                        "year" => year = value,
                        "journal" | "booktitle" | "publisher" if venue.is_empty() => venue = value,
                        "ee" => ee.push(value),
                        _ => {}
                    }
                    current.clear();
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    let Some(key) = key else {
        return Ok(None);
    };
    let mut paper = Paper::new(SourceKind::Dblp, title.trim_end_matches('.'));
    paper.authors = authors;
    paper.year = year.parse().ok();
    paper.venue = Some(venue);
    paper.ids.doi = ee.iter().find(|u| u.contains("doi.org/")).cloned();
    paper.url = Some(format!("{}/rec/{}.html", BASE_URL, key));
    paper.ids.dblp = Some(key);
    Ok(Some(paper.normalized()))
}

#[async_trait]
impl PaperSource for DblpClient {
    fn kind(&self) -> SourceKind {
        SourceKind::Dblp
    }

    fn native_id(&self, id: &Identifier) -> Option<String> {
        match id {
            Identifier::DblpKey { value } => Some(value.clone()),
            _ => id.arxiv_id().and_then(corr_key),
        }
    }

    async fn search(
        &self,
        query: &str,
        limit: u32,
        _filters: &SearchFilters,
    ) -> Result<Vec<Paper>, SourceError> {
        let hits = self.search_hits(query, limit).await?;
        Ok(hits.into_iter().map(info_to_paper).collect())
    }

    async fn get_paper(&self, key: &str) -> Result<Option<Paper>, SourceError> {
        match self.fetch_text(&format!("{}/rec/{}.xml", BASE_URL, key)).await? {
            Some(xml) => parse_record(&xml),
            None => Ok(None),
        }
    }

    async fn search_authors(&self, name: &str, limit: u32) -> Result<Vec<Author>, SourceError> {
        let resp = self
            .client
            .get(format!("{}/search/author/api", BASE_URL))
            .query(&[
                ("q", name),
                ("format", "json"),
                ("h", limit.clamp(1, 1000).to_string().as_str()),
            ])
            .send()
            .await?;
        let resp: DblpResponse<DblpAuthorInfo> = check_status(resp, SourceKind::Dblp)?.json().await?;
        Ok(resp
            .result
            .hits
            .hit
            .unwrap_or_default()
            .into_iter()
            .map(|h| {
                let url = h.info.url;
                Author {
                    id: url
                        .as_deref()
                        .and_then(|u| u.split("/pid/").nth(1))
                        .unwrap_or_default()
                        .to_string(),
                    name: clean_author(&h.info.author),
                    source: SourceKind::Dblp,
                    affiliation: None,
                    paper_count: None,
                    citation_count: None,
                    url,
                }
            })
            .collect())
    }

    async fn get_bibtex(&self, id: &Identifier) -> Result<Option<String>, SourceError> {
        let key = match id {
            Identifier::Doi { value } => match normalize_doi(value) {
                Some(doi) => self.key_for_doi(&doi).await?,
                None => None,
            },
            other => self.native_id(other),
        };
        let Some(key) = key else {
            return Ok(None);
        };
        let bib = self.fetch_text(&format!("{}/rec/{}.bib", BASE_URL, key)).await?;
        Ok(bib.map(|b| b.trim().to_string()).filter(|b| b.starts_with('@')))
    }
}
