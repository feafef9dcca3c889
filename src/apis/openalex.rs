use std::collections::HashMap;

use super::{
    check_status, http_client, user_agent, Author, Paper, PaperSource, SearchFilters,
    SourceError, SourceKind,
};
use crate::identifier::Identifier;
use async_trait::async_trait;
use serde::Deserialize;

const BASE_URL: &str = "https://api.openalex.org";
const SELECT: &str = "id,title,authorships,publication_year,doi,open_access,cited_by_count,primary_location,abstract_inverted_index";

pub struct OpenAlexClient {
    client: reqwest::Client,
    email: Option<String>,
}

impl OpenAlexClient {
    pub fn new(email: Option<String>) -> Self {
        Self {
            client: http_client(&user_agent(email.as_deref())),
            email,
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(format!("{}{}", BASE_URL, path));
        match &self.email {
            Some(e) => req.query(&[("mailto", e.as_str())]),
            None => req,
        }
    }

    async fn works(&self, filter: &str, limit: u32) -> Result<Vec<Paper>, SourceError> {
        let per_page = limit.clamp(1, 200).to_string();
        let resp = self
            .get("/works")
            .query(&[("filter", filter), ("per_page", per_page.as_str()), ("select", SELECT)])
            .send()
            .await?;
        let resp: OAResponse<OAWork> = check_status(resp, SourceKind::OpenAlex)?.json().await?;
        Ok(resp.results.iter().map(oa_to_paper).collect())
    }

    /// OpenAlex relation filters need a W-id; look it up by DOI when the
    /// paper came from elsewhere.
    async fn work_id(&self, paper: &Paper) -> Result<Option<String>, SourceError> {
        if let Some(id) = &paper.ids.openalex {
            return Ok(Some(id.clone()));
        }
        let Some(doi) = paper.doi() else {
            return Ok(None);
        };
        Ok(self
            .get_paper(&format!("doi:{}", doi))
            .await?
            .and_then(|p| p.ids.openalex))
    }
}

#[derive(Deserialize)]
struct OAResponse<T> {
    results: Vec<T>,
}

#[derive(Deserialize)]
struct OAWork {
    id: Option<String>,
    title: Option<String>,
    authorships: Option<Vec<OAAuthorship>>,
    publication_year: Option<u32>,
    doi: Option<String>,
    open_access: Option<OAOpenAccess>,
    cited_by_count: Option<u32>,
    primary_location: Option<OALocation>,
    abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
}

#[derive(Deserialize)]
struct OAAuthorship {
    author: OAAuthorRef,
}
#[derive(Deserialize)]
struct OAAuthorRef {
    display_name: Option<String>,
}
#[derive(Deserialize)]
struct OAOpenAccess {
    oa_url: Option<String>,
}
#[derive(Deserialize)]
struct OALocation {
    source: Option<OASource>,
}
#[derive(Deserialize)]
struct OASource {
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct OAAuthor {
    id: String,
    display_name: Option<String>,
    works_count: Option<u32>,
    cited_by_count: Option<u32>,
    last_known_institutions: Option<Vec<OAInstitution>>,
}
#[derive(Deserialize)]
struct OAInstitution {
    display_name: Option<String>,
}

fn short_id(id: &str) -> String {
    id.rsplit('/').next().unwrap_or(id).to_string()
}

/// Rebuild plain text from OpenAlex's word -> positions index.
fn rebuild_abstract(index: &HashMap<String, Vec<usize>>) -> Option<String> {
    let mut words: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |p| (*p, word.as_str())))
        .collect();
    if words.is_empty() {
        return None;
    }
    words.sort_unstable_by_key(|(p, _)| *p);
    Some(words.into_iter().map(|(_, w)| w).collect::<Vec<_>>().join(" "))
}

fn oa_to_paper(w: &OAWork) -> Paper {
    let mut paper = Paper::new(SourceKind::OpenAlex, w.title.clone().unwrap_or_default());
    paper.ids.openalex = w.id.as_deref().map(short_id);
    paper.ids.doi = w.doi.clone();
    paper.authors = w
        .authorships
        .as_ref()
        .map(|a| a.iter().filter_map(|a| a.author.display_name.clone()).collect())
        .unwrap_or_default();
    paper.year = w.publication_year;
    paper.venue = w
        .primary_location
        .as_ref()
        .and_then(|l| l.source.as_ref())
        .and_then(|s| s.display_name.clone());
    paper.abstract_text = w.abstract_inverted_index.as_ref().and_then(rebuild_abstract);
    paper.citation_count = w.cited_by_count;
    paper.url = w.id.clone();
    paper.pdf_url = w.open_access.as_ref().and_then(|oa| oa.oa_url.clone());
    paper.normalized()
}

fn year_filter(filters: &SearchFilters) -> Option<String> {
    match filters.year_range() {
        (None, None) => None,
        (Some(f), Some(t)) if f == t => Some(format!("publication_year:{}", f)),
        (f, t) => Some(format!(
            "publication_year:{}-{}",
            f.map(|y| y.to_string()).unwrap_or_default(),
            t.map(|y| y.to_string()).unwrap_or_default()
        )),
    }
}

#[async_trait]
impl PaperSource for OpenAlexClient {
    fn kind(&self) -> SourceKind {
        SourceKind::OpenAlex
    }

    fn supports_citations(&self) -> bool {
        true
    }

    fn native_id(&self, id: &Identifier) -> Option<String> {
        match id {
            Identifier::OpenAlexId { value } => Some(value.clone()),
            Identifier::Doi { .. } | Identifier::ArxivDoi { .. } | Identifier::ArxivId { .. } => {
                id.doi().map(|doi| format!("doi:{}", doi))
            }
            _ => None,
        }
    }

    async fn search(
        &self,
        query: &str,
        limit: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<Paper>, SourceError> {
        let per_page = limit.clamp(1, 200).to_string();
        let mut params = vec![
            ("search", query.to_string()),
            ("per_page", per_page),
            ("select", SELECT.to_string()),
        ];
        if let Some(f) = year_filter(filters) {
            params.push(("filter", f));
        }
        let resp = self.get("/works").query(&params).send().await?;
        let resp: OAResponse<OAWork> = check_status(resp, SourceKind::OpenAlex)?.json().await?;
        Ok(resp.results.iter().map(oa_to_paper).collect())
    }

    async fn get_paper(&self, id: &str) -> Result<Option<Paper>, SourceError> {
        let resp = self
            .get(&format!("/works/{}", id))
            .query(&[("select", SELECT)])
            .send()
            .await?;
        if resp.status() == 404 {
            return Ok(None);
        }
        let w: OAWork = check_status(resp, SourceKind::OpenAlex)?.json().await?;
        Ok(Some(oa_to_paper(&w)))
    }

    async fn get_citations(&self, paper: &Paper, limit: u32) -> Result<Vec<Paper>, SourceError> {
        match self.work_id(paper).await? {
            Some(id) => self.works(&format!("cites:{}", id), limit).await,
            None => Ok(vec![]),
        }
    }

    async fn get_references(&self, paper: &Paper, limit: u32) -> Result<Vec<Paper>, SourceError> {
        match self.work_id(paper).await? {
            Some(id) => self.works(&format!("cited_by:{}", id), limit).await,
            None => Ok(vec![]),
        }
    }

    async fn get_related(&self, paper: &Paper, limit: u32) -> Result<Vec<Paper>, SourceError> {
        match self.work_id(paper).await? {
            Some(id) => self.works(&format!("related_to:{}", id), limit).await,
            None => Ok(vec![]),
        }
    }

    async fn search_authors(&self, name: &str, limit: u32) -> Result<Vec<Author>, SourceError> {
        let per_page = limit.clamp(1, 200).to_string();
        let resp = self
            .get("/authors")
            .query(&[("search", name), ("per_page", per_page.as_str())])
            .send()
            .await?;
        let resp: OAResponse<OAAuthor> = check_status(resp, SourceKind::OpenAlex)?.json().await?;
        Ok(resp
            .results
            .into_iter()
            .map(|a| Author {
                id: short_id(&a.id),
                name: a.display_name.unwrap_or_default(),
                source: SourceKind::OpenAlex,
                affiliation: a
                    .last_known_institutions
                    .and_then(|i| i.into_iter().find_map(|i| i.display_name)),
                paper_count: a.works_count,
                citation_count: a.cited_by_count,
                url: Some(a.id),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::classify;

    #[test]
    fn test_work_mapping() {
        let json = r#"{
            "id": "https://openalex.org/W2741809807",
            "title": "Attention Is All You Need",
            "authorships": [{"author": {"display_name": "Ashish Vaswani"}}],
            "publication_year": 2017,
            "doi": "https://doi.org/10.48550/ARXIV.1706.03762",
            "cited_by_count": 100000,
            "primary_location": {"source": {"display_name": "NeurIPS"}},
            "abstract_inverted_index": {"models": [1], "Sequence": [0]}
        }"#;
        let w: OAWork = serde_json::from_str(json).unwrap();
        let p = oa_to_paper(&w);
        assert_eq!(p.id, "W2741809807");
        assert_eq!(p.doi(), Some("10.48550/arxiv.1706.03762"));
        assert_eq!(p.venue.as_deref(), Some("NeurIPS"));
        assert_eq!(p.abstract_text.as_deref(), Some("Sequence models"));
        assert_eq!(p.authors, vec!["Ashish Vaswani"]);
    }

    #[test]
    fn test_native_ids() {
        let client = OpenAlexClient::new(None);
        assert_eq!(client.native_id(&classify("W123")).as_deref(), Some("W123"));
        assert_eq!(
            client.native_id(&classify("10.1038/Nature12345")).as_deref(),
            Some("doi:10.1038/nature12345")
        );
        assert_eq!(
            client.native_id(&classify("arXiv:2301.12345v2")).as_deref(),
            Some("doi:10.48550/arxiv.2301.12345")
        );
        assert_eq!(client.native_id(&classify("conf/a/B20")), None);
    }

    #[test]
    fn test_year_filter() {
        let mut f = SearchFilters::default();
        assert_eq!(year_filter(&f), None);
        f.insert("year", "2020").unwrap();
        assert_eq!(year_filter(&f).as_deref(), Some("publication_year:2020"));
        let mut f = SearchFilters::default();
        f.insert("year_from", "2018").unwrap();
        assert_eq!(year_filter(&f).as_deref(), Some("publication_year:2018-"));
    }
}
