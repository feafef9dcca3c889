use super::{
    check_status, http_client, user_agent, Paper, PaperSource, SearchFilters, SourceError,
    SourceKind,
};
use crate::identifier::Identifier;
use async_trait::async_trait;
use serde::Deserialize;

const BASE_URL: &str = "https://api.crossref.org/works";
const SELECT: &str = "DOI,title,author,published,is-referenced-by-count,link,container-title,abstract";

pub struct CrossRefClient {
    client: reqwest::Client,
    email: Option<String>,
}

impl CrossRefClient {
    pub fn new(email: Option<String>) -> Self {
        Self {
            client: http_client(&user_agent(email.as_deref())),
            email,
        }
    }

    fn with_mailto(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.email {
            Some(e) => req.query(&[("mailto", e.as_str())]),
            None => req,
        }
    }
}

#[derive(Deserialize)]
struct CRSearchResponse {
    message: CRSearchMessage,
}
#[derive(Deserialize)]
struct CRSearchMessage {
    items: Option<Vec<CRItem>>,
}
#[derive(Deserialize)]
struct CRWorkResponse {
    message: CRItem,
}
#[derive(Deserialize)]
struct CRItem {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    title: Option<Vec<String>>,
    author: Option<Vec<CRAuthor>>,
    #[serde(rename = "is-referenced-by-count")]
    citation_count: Option<u32>,
    published: Option<CRDate>,
    link: Option<Vec<CRLink>>,
    #[serde(rename = "container-title")]
    container_title: Option<Vec<String>>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
}
#[derive(Deserialize)]
struct CRAuthor {
    given: Option<String>,
    family: Option<String>,
    name: Option<String>,
}
#[derive(Deserialize)]
struct CRDate {
    #[serde(rename = "date-parts")]
    date_parts: Option<Vec<Vec<Option<u32>>>>,
}
#[derive(Deserialize)]
struct CRLink {
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(rename = "content-type")]
    content_type: Option<String>,
}

/// CrossRef abstracts arrive as JATS markup.
fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn item_to_paper(item: &CRItem) -> Paper {
    let title = item.title.as_ref().and_then(|t| t.first()).cloned().unwrap_or_default();
    let mut paper = Paper::new(SourceKind::CrossRef, title);
    paper.ids.doi = item.doi.clone();
    paper.authors = item
        .author
        .as_ref()
        .map(|a| {
            a.iter()
                .map(|a| match &a.name {
                    Some(name) => name.clone(),
                    None => format!(
                        "{} {}",
                        a.given.as_deref().unwrap_or(""),
                        a.family.as_deref().unwrap_or("")
                    )
                    .trim()
                    .to_string(),
                })
                .filter(|n| !n.is_empty())
                .collect()
        })
        .unwrap_or_default();
    paper.year = item
        .published
        .as_ref()
        .and_then(|d| d.date_parts.as_ref())
        .and_then(|p| p.first())
        .and_then(|p| p.first())
        .copied()
        .flatten();
    paper.venue = item.container_title.as_ref().and_then(|t| t.first()).cloned();
    paper.abstract_text = item.abstract_text.as_deref().map(strip_tags);
    paper.citation_count = item.citation_count;
    paper.url = item.doi.as_ref().map(|d| format!("https://doi.org/{}", d));
    paper.pdf_url = item
        .link
        .as_ref()
        .and_then(|links| {
            links
                .iter()
                .find(|l| l.content_type.as_deref() == Some("application/pdf"))
        })
        .and_then(|l| l.url.clone());
    paper.normalized()
}

#[async_trait]
impl PaperSource for CrossRefClient {
    fn kind(&self) -> SourceKind {
        SourceKind::CrossRef
    }

    fn native_id(&self, id: &Identifier) -> Option<String> {
        match id {
            Identifier::Doi { value } => Some(value.to_lowercase()),
            _ => None,
        }
    }

    async fn search(
        &self,
        query: &str,
        limit: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<Paper>, SourceError> {
        let rows = limit.clamp(1, 100).to_string();
        let mut params = vec![
            ("query", query.to_string()),
            ("rows", rows),
            ("select", SELECT.to_string()),
        ];
        let mut date_filter = Vec::new();
        let (from, to) = filters.year_range();
        if let Some(f) = from {
            date_filter.push(format!("from-pub-date:{}", f));
        }
        if let Some(t) = to {
            date_filter.push(format!("until-pub-date:{}", t));
        }
        if !date_filter.is_empty() {
            params.push(("filter", date_filter.join(",")));
        }
        if let Some(venue) = filters.venue() {
            params.push(("query.container-title", venue.to_string()));
        }
        let resp = self.with_mailto(self.client.get(BASE_URL).query(&params)).send().await?;
        let resp: CRSearchResponse = check_status(resp, SourceKind::CrossRef)?.json().await?;
        Ok(resp.message.items.unwrap_or_default().iter().map(item_to_paper).collect())
    }

    async fn get_paper(&self, doi: &str) -> Result<Option<Paper>, SourceError> {
        let url = format!("{}/{}", BASE_URL, doi);
        let resp = self.with_mailto(self.client.get(&url)).send().await?;
        if resp.status() == 404 {
            return Ok(None);
        }
        let cr: CRWorkResponse = check_status(resp, SourceKind::CrossRef)?.json().await?;
        Ok(Some(item_to_paper(&cr.message)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_mapping() {
        let json = r#"{
            "DOI": "10.1038/NATURE12345",
            "title": ["A Study"],
            "author": [{"given": "Ada", "family": "Lovelace"}, {"name": "The Consortium"}],
            "published": {"date-parts": [[2013, 5]]},
            "container-title": ["Nature"],
            "abstract": "<jats:p>Some <jats:italic>text</jats:italic>.</jats:p>",
            "is-referenced-by-count": 12
        }"#;
        let item: CRItem = serde_json::from_str(json).unwrap();
        let p = item_to_paper(&item);
        assert_eq!(p.id, "10.1038/nature12345");
        assert_eq!(p.authors, vec!["Ada Lovelace", "The Consortium"]);
        assert_eq!(p.year, Some(2013));
        assert_eq!(p.venue.as_deref(), Some("Nature"));
        assert_eq!(p.abstract_text.as_deref(), Some("Some text ."));
        assert_eq!(p.source, SourceKind::CrossRef);
    }
}
