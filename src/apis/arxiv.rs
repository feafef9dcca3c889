use std::time::{Duration, Instant};

use super::{check_status, http_client, user_agent, Paper, PaperSource, SearchFilters, SourceError, SourceKind};
use crate::identifier::{strip_arxiv_version, Identifier};
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tokio::sync::Mutex;

const BASE_URL: &str = "https://export.arxiv.org/api/query";
/// arXiv asks clients to leave three seconds between requests.
const MIN_INTERVAL: Duration = Duration::from_secs(3);

pub struct ArxivClient {
    client: reqwest::Client,
    last_request: Mutex<Option<Instant>>,
}

impl ArxivClient {
    pub fn new(email: Option<String>) -> Self {
        Self {
            client: http_client(&user_agent(email.as_deref())),
            last_request: Mutex::new(None),
        }
    }

    async fn fetch(&self, params: &[(&str, String)]) -> Result<Vec<Paper>, SourceError> {
        {
            let mut last = self.last_request.lock().await;
            if let Some(at) = *last {
                let wait = MIN_INTERVAL.saturating_sub(at.elapsed());
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }
            *last = Some(Instant::now());
        }
        let resp = self.client.get(BASE_URL).query(params).send().await?;
        let body = check_status(resp, SourceKind::Arxiv)?.text().await?;
        parse_atom_feed(&body)
    }
}

fn date_clause(filters: &SearchFilters) -> Option<String> {
    match filters.year_range() {
        (None, None) => None,
        (from, to) => Some(format!(
            "submittedDate:[{}01010000 TO {}12312359]",
            from.unwrap_or(1991),
            to.unwrap_or(2100)
        )),
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    fn kind(&self) -> SourceKind {
        SourceKind::Arxiv
    }

    fn native_id(&self, id: &Identifier) -> Option<String> {
        id.arxiv_id().map(str::to_string)
    }

    async fn search(
        &self,
        query: &str,
        limit: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<Paper>, SourceError> {
        let mut search_query = format!("all:{}", query);
        if let Some(clause) = date_clause(filters) {
            search_query = format!("({}) AND {}", search_query, clause);
        }
        self.fetch(&[
            ("search_query", search_query),
            ("start", "0".to_string()),
            ("max_results", limit.clamp(1, 100).to_string()),
            ("sortBy", "relevance".to_string()),
            ("sortOrder", "descending".to_string()),
        ])
        .await
    }

    async fn get_paper(&self, id: &str) -> Result<Option<Paper>, SourceError> {
        let results = self.fetch(&[("id_list", id.to_string())]).await?;
        Ok(results.into_iter().next())
    }
}

#[derive(Default)]
struct EntryState {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    author_name: String,
    doi: String,
    journal_ref: String,
    link_abs: String,
    link_pdf: String,
}

impl EntryState {
    fn read_link(&mut self, e: &BytesStart<'_>) {
        let mut href = String::new();
        let mut title = String::new();
        for attr in e.attributes().flatten() {
            let val = String::from_utf8_lossy(&attr.value).to_string();
            match attr.key.as_ref() {
                b"href" => href = val,
                b"title" => title = val,
                _ => {}
            }
        }
        if title == "pdf" {
            self.link_pdf = href;
        } else if self.link_abs.is_empty() && href.contains("/abs/") {
            self.link_abs = href;
        }
    }

    fn into_paper(self) -> Option<Paper> {
        // Lookups of malformed ids come back as an entry pointing at the error docs.
        if self.id.contains("/api/errors") {
            return None;
        }
        let versioned = self.id.trim().rsplit("/abs/").next().unwrap_or("").to_string();
        if versioned.is_empty() || self.title.trim().is_empty() {
            return None;
        }
        let mut paper = Paper::new(SourceKind::Arxiv, self.title.trim());
        paper.ids.arxiv = Some(strip_arxiv_version(&versioned).to_string());
        paper.ids.doi = Some(self.doi.trim().to_string()).filter(|d| !d.is_empty());
        paper.authors = self.authors;
        paper.abstract_text = Some(self.summary.split_whitespace().collect::<Vec<_>>().join(" "));
        paper.year = self.published.get(..4).and_then(|y| y.parse().ok());
        paper.venue = Some(self.journal_ref.trim().to_string()).filter(|j| !j.is_empty());
        paper.url = Some(if self.link_abs.is_empty() {
            format!("https://arxiv.org/abs/{}", versioned)
        } else {
            self.link_abs
        });
        paper.pdf_url = Some(self.link_pdf).filter(|l| !l.is_empty());
        Some(paper.normalized())
    }
}

fn parse_atom_feed(xml: &str) -> Result<Vec<Paper>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut papers = Vec::new();
    let mut entry: Option<EntryState> = None;
    let mut current_tag = String::new();
    let mut in_author = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    entry = Some(EntryState::default());
                } else if let Some(state) = entry.as_mut() {
                    match tag.as_str() {
                        "author" => {
                            in_author = true;
                            state.author_name.clear();
                        }
                        "link" => state.read_link(&e),
                        _ => {}
                    }
                    current_tag = tag;
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(state) = entry.as_mut() {
                    if e.name().as_ref() == b"link" {
                        state.read_link(&e);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(state) = entry.as_mut() {
                    let text = e.unescape().unwrap_or_default().to_string();
                    match current_tag.as_str() {
                        "title" => state.title.push_str(&text),
                        "summary" => state.summary.push_str(&text),
                        "id" => state.id.push_str(&text),
                        "published" => state.published.push_str(&text),
                        "name" if in_author => state.author_name.push_str(&text),
                        "arxiv:doi" => state.doi.push_str(&text),
                        "arxiv:journal_ref" => state.journal_ref.push_str(&text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    if let Some(paper) = entry.take().and_then(EntryState::into_paper) {
                        papers.push(paper);
                    }
                } else if tag == "author" && in_author {
                    in_author = false;
                    if let Some(state) = entry.as_mut() {
                        let name = state.author_name.trim().to_string();
                        if !name.is_empty() {
                            state.authors.push(name);
                        }
                    }
                }
                if tag == current_tag {
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(papers)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_ATOM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <entry>
    <id>http://arxiv.org/abs/2301.12345v2</id>
    <title>Test Paper on
      AdS/CFT</title>
    <summary>This is a test abstract
      about AdS/CFT correspondence.</summary>
    <published>2023-01-15T00:00:00Z</published>
    <author><name>John Doe</name></author>
    <author><name>Jane Smith</name></author>
    <arxiv:doi>10.1103/PhysRevD.1.1</arxiv:doi>
    <arxiv:journal_ref>Phys. Rev. D 1, 1 (2023)</arxiv:journal_ref>
    <link href="http://arxiv.org/abs/2301.12345v2" rel="alternate" type="text/html"/>
    <link href="http://arxiv.org/pdf/2301.12345v2" title="pdf" type="application/pdf"/>
  </entry>
</feed>"#;

    const ERROR_ATOM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_9999.0</id>
    <title>Error</title>
    <summary>incorrect id format for 9999.0</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_atom_feed() {
        let papers = parse_atom_feed(SAMPLE_ATOM).unwrap();
        assert_eq!(papers.len(), 1);
        let p = &papers[0];
        assert_eq!(p.ids.arxiv.as_deref(), Some("2301.12345"));
        assert_eq!(p.id, "10.1103/physrevd.1.1");
        assert_eq!(p.title, "Test Paper on AdS/CFT");
        assert_eq!(p.authors, vec!["John Doe", "Jane Smith"]);
        assert_eq!(p.year, Some(2023));
        assert_eq!(p.venue.as_deref(), Some("Phys. Rev. D 1, 1 (2023)"));
        assert_eq!(p.url.as_deref(), Some("http://arxiv.org/abs/2301.12345v2"));
        assert!(p.pdf_url.is_some());
    }

    #[test]
    fn test_error_entry_is_not_a_paper() {
        assert!(parse_atom_feed(ERROR_ATOM).unwrap().is_empty());
    }

    #[test]
    fn test_date_clause() {
        let mut f = SearchFilters::default();
        assert_eq!(date_clause(&f), None);
        f.insert("year", "2020-2021").unwrap();
        assert_eq!(
            date_clause(&f).as_deref(),
            Some("submittedDate:[202001010000 TO 202112312359]")
        );
    }
}
