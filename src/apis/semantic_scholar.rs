use super::{
    check_status, http_client, user_agent, Author, Paper, PaperSource, SearchFilters,
    SourceError, SourceKind,
};
use crate::identifier::{strip_arxiv_version, Identifier};
use async_trait::async_trait;
use serde::Deserialize;

const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
const RECOMMENDATIONS_URL: &str = "https://api.semanticscholar.org/recommendations/v1/papers/forpaper";
const FIELDS: &str = "title,authors,abstract,year,venue,externalIds,citationCount,url,openAccessPdf";
const AUTHOR_FIELDS: &str = "name,affiliations,paperCount,citationCount,url";

pub struct SemanticScholarClient {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    pub fn new(api_key: Option<String>, email: Option<String>) -> Self {
        Self {
            client: http_client(&user_agent(email.as_deref())),
            api_key,
        }
    }

    fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }

    async fn edges(
        &self,
        paper: &Paper,
        relation: &str,
        nested: &str,
        limit: u32,
    ) -> Result<Vec<Paper>, SourceError> {
        let Some(paper_id) = paper_ref(paper) else {
            return Ok(vec![]);
        };
        let url = format!("{}/paper/{}/{}", BASE_URL, paper_id, relation);
        let fields = FIELDS
            .split(',')
            .map(|f| format!("{}.{}", nested, f))
            .collect::<Vec<_>>()
            .join(",");
        let limit = limit.clamp(1, 1000).to_string();
        let resp = self
            .add_auth(self.client.get(&url).query(&[("fields", fields.as_str()), ("limit", limit.as_str())]))
            .send()
            .await?;
        if resp.status() == 404 {
            return Ok(vec![]);
        }
        let resp: S2EdgeResponse = check_status(resp, SourceKind::SemanticScholar)?.json().await?;
        Ok(resp
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(|edge| edge.citing_paper.or(edge.cited_paper))
            .filter(|p| p.paper_id.is_some())
            .map(|p| s2_to_paper(&p))
            .collect())
    }
}

/// The most specific Semantic Scholar lookup key for a paper.
fn paper_ref(paper: &Paper) -> Option<String> {
    if let Some(id) = &paper.ids.semantic_scholar {
        return Some(id.clone());
    }
    if let Some(doi) = paper.doi() {
        return Some(format!("DOI:{}", doi));
    }
    paper
        .ids
        .arxiv
        .as_deref()
        .map(|a| format!("ARXIV:{}", strip_arxiv_version(a)))
}

#[derive(Deserialize)]
struct S2SearchResponse {
    data: Option<Vec<S2Paper>>,
}

#[derive(Deserialize)]
struct S2EdgeResponse {
    data: Option<Vec<S2Edge>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Edge {
    citing_paper: Option<S2Paper>,
    cited_paper: Option<S2Paper>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Recommendations {
    recommended_papers: Option<Vec<S2Paper>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    paper_id: Option<String>,
    title: Option<String>,
    authors: Option<Vec<S2AuthorRef>>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    year: Option<u32>,
    venue: Option<String>,
    external_ids: Option<S2ExternalIds>,
    citation_count: Option<u32>,
    url: Option<String>,
    open_access_pdf: Option<S2Pdf>,
}

#[derive(Deserialize)]
struct S2AuthorRef {
    name: Option<String>,
}

#[derive(Deserialize)]
struct S2ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "ArXiv")]
    arxiv: Option<String>,
    #[serde(rename = "DBLP")]
    dblp: Option<String>,
}

#[derive(Deserialize)]
struct S2Pdf {
    url: Option<String>,
}

#[derive(Deserialize)]
struct S2AuthorSearch {
    data: Option<Vec<S2Author>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Author {
    author_id: Option<String>,
    name: Option<String>,
    affiliations: Option<Vec<String>>,
    paper_count: Option<u32>,
    citation_count: Option<u32>,
    url: Option<String>,
}

fn s2_to_paper(p: &S2Paper) -> Paper {
    let mut paper = Paper::new(SourceKind::SemanticScholar, p.title.clone().unwrap_or_default());
    paper.ids.semantic_scholar = p.paper_id.clone();
    if let Some(ext) = &p.external_ids {
        paper.ids.doi = ext.doi.clone();
        paper.ids.arxiv = ext.arxiv.clone();
        paper.ids.dblp = ext.dblp.clone();
    }
    paper.authors = p
        .authors
        .as_ref()
        .map(|a| a.iter().filter_map(|a| a.name.clone()).collect())
        .unwrap_or_default();
    paper.abstract_text = p.abstract_text.clone();
    paper.year = p.year;
    paper.venue = p.venue.clone();
    paper.citation_count = p.citation_count;
    paper.url = p.url.clone();
    paper.pdf_url = p.open_access_pdf.as_ref().and_then(|pdf| pdf.url.clone());
    paper.normalized()
}

fn year_param(filters: &SearchFilters) -> Option<String> {
    match filters.year_range() {
        (None, None) => None,
        (Some(f), Some(t)) if f == t => Some(f.to_string()),
        (f, t) => Some(format!(
            "{}-{}",
            f.map(|y| y.to_string()).unwrap_or_default(),
            t.map(|y| y.to_string()).unwrap_or_default()
        )),
    }
}

#[async_trait]
impl PaperSource for SemanticScholarClient {
    fn kind(&self) -> SourceKind {
        SourceKind::SemanticScholar
    }

    fn supports_citations(&self) -> bool {
        true
    }

    fn native_id(&self, id: &Identifier) -> Option<String> {
        match id {
            Identifier::SemanticScholarId { value } => Some(value.clone()),
            Identifier::Doi { value } => Some(format!("DOI:{}", value)),
            Identifier::ArxivDoi { arxiv_id: a, .. } | Identifier::ArxivId { value: a } => {
                Some(format!("ARXIV:{}", strip_arxiv_version(a)))
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
        let url = format!("{}/paper/search", BASE_URL);
        let mut params = vec![
            ("query", query.to_string()),
            ("limit", limit.clamp(1, 100).to_string()),
            ("fields", FIELDS.to_string()),
        ];
        if let Some(year) = year_param(filters) {
            params.push(("year", year));
        }
        if let Some(venue) = filters.venue() {
            params.push(("venue", venue.to_string()));
        }
        let resp = self.add_auth(self.client.get(&url).query(&params)).send().await?;
        let resp: S2SearchResponse = check_status(resp, SourceKind::SemanticScholar)?.json().await?;
        Ok(resp.data.unwrap_or_default().iter().map(s2_to_paper).collect())
    }

    async fn get_paper(&self, paper_id: &str) -> Result<Option<Paper>, SourceError> {
        let url = format!("{}/paper/{}", BASE_URL, paper_id);
        let resp = self
            .add_auth(self.client.get(&url).query(&[("fields", FIELDS)]))
            .send()
            .await?;
        if resp.status() == 404 {
            return Ok(None);
        }
        let paper: S2Paper = check_status(resp, SourceKind::SemanticScholar)?.json().await?;
        Ok(Some(s2_to_paper(&paper)))
    }

    async fn get_citations(&self, paper: &Paper, limit: u32) -> Result<Vec<Paper>, SourceError> {
        self.edges(paper, "citations", "citingPaper", limit).await
    }

    async fn get_references(&self, paper: &Paper, limit: u32) -> Result<Vec<Paper>, SourceError> {
        self.edges(paper, "references", "citedPaper", limit).await
    }

    async fn get_related(&self, paper: &Paper, limit: u32) -> Result<Vec<Paper>, SourceError> {
        let Some(paper_id) = paper_ref(paper) else {
            return Ok(vec![]);
        };
        let url = format!("{}/{}", RECOMMENDATIONS_URL, paper_id);
        let limit = limit.clamp(1, 500).to_string();
        let resp = self
            .add_auth(self.client.get(&url).query(&[("fields", FIELDS), ("limit", limit.as_str())]))
            .send()
            .await?;
        if resp.status() == 404 {
            return Ok(vec![]);
        }
        let resp: S2Recommendations = check_status(resp, SourceKind::SemanticScholar)?.json().await?;
        Ok(resp
            .recommended_papers
            .unwrap_or_default()
            .iter()
            .map(s2_to_paper)
            .collect())
    }

    async fn search_authors(&self, name: &str, limit: u32) -> Result<Vec<Author>, SourceError> {
        let url = format!("{}/author/search", BASE_URL);
        let limit = limit.clamp(1, 100).to_string();
        let resp = self
            .add_auth(self.client.get(&url).query(&[
                ("query", name),
                ("fields", AUTHOR_FIELDS),
                ("limit", limit.as_str()),
            ]))
            .send()
            .await?;
        let resp: S2AuthorSearch = check_status(resp, SourceKind::SemanticScholar)?.json().await?;
        Ok(resp
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| {
                Some(Author {
                    id: a.author_id?,
                    name: a.name.unwrap_or_default(),
                    source: SourceKind::SemanticScholar,
                    affiliation: a.affiliations.and_then(|v| v.into_iter().next()),
                    paper_count: a.paper_count,
                    citation_count: a.citation_count,
                    url: a.url,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::classify;

    #[test]
    fn test_paper_mapping_collects_external_ids() {
        let json = r#"{
            "paperId": "649def34f8be52c8b66281af98ae884c09aef38b",
            "title": "Some Paper",
            "authors": [{"name": "A. Author"}],
            "year": 2019,
            "venue": "ACL",
            "externalIds": {"DOI": "10.18653/V1/P19-1001", "ArXiv": "1905.00001", "DBLP": "conf/acl/Author19"},
            "citationCount": 3
        }"#;
        let p: S2Paper = serde_json::from_str(json).unwrap();
        let paper = s2_to_paper(&p);
        assert_eq!(paper.id, "10.18653/v1/p19-1001");
        assert_eq!(paper.ids.arxiv.as_deref(), Some("1905.00001"));
        assert_eq!(paper.ids.dblp.as_deref(), Some("conf/acl/Author19"));
        assert_eq!(paper_ref(&paper).as_deref(), Some("649def34f8be52c8b66281af98ae884c09aef38b"));
    }

    #[test]
    fn test_edge_response_picks_nested_paper() {
        let json = r#"{"data": [{"citingPaper": {"paperId": "abc", "title": "Citing"}}, {"citingPaper": {"paperId": null}}]}"#;
        let resp: S2EdgeResponse = serde_json::from_str(json).unwrap();
        let papers: Vec<_> = resp
            .data
            .unwrap()
            .into_iter()
            .filter_map(|e| e.citing_paper.or(e.cited_paper))
            .filter(|p| p.paper_id.is_some())
            .collect();
        assert_eq!(papers.len(), 1);
    }

    #[test]
    fn test_native_ids() {
        let client = SemanticScholarClient::new(None, None);
        assert_eq!(
            client.native_id(&classify("10.1038/nature12345")).as_deref(),
            Some("DOI:10.1038/nature12345")
        );
        assert_eq!(
            client.native_id(&classify("10.48550/arXiv.2301.12345v3")).as_deref(),
            Some("ARXIV:2301.12345")
        );
        assert_eq!(client.native_id(&classify("W1")), None);
    }
}
