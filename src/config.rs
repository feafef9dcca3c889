use std::sync::Arc;
use std::time::Duration;

use crate::apis::{self, PaperSource, SourceKind};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 300;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub contact_email: Option<String>,
    pub semantic_scholar_api_key: Option<String>,
    pub enabled_source_names: Vec<String>,
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let contact_email = non_empty("PAPER_HUB_EMAIL").or_else(|| non_empty("OPENALEX_EMAIL"));
        let semantic_scholar_api_key = non_empty("SEMANTIC_SCHOLAR_API_KEY");

        let enabled_source_names = non_empty("PAPER_HUB_SOURCES")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let timeout_secs = match non_empty("PAPER_HUB_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
                tracing::warn!("Ignoring invalid PAPER_HUB_TIMEOUT_SECS={:?}", raw);
                DEFAULT_TIMEOUT_SECS
            }),
            None => DEFAULT_TIMEOUT_SECS,
        };

        Self {
            contact_email,
            semantic_scholar_api_key,
            enabled_source_names,
            request_timeout: Duration::from_secs(timeout_secs.clamp(1, MAX_TIMEOUT_SECS)),
        }
    }

    fn is_enabled(&self, kind: SourceKind) -> bool {
        self.enabled_source_names.is_empty() || self.enabled_source_names.iter().any(|n| n == kind.name())
    }

    /// Build the list of enabled paper sources based on configuration.
    pub fn build_sources(&self) -> Vec<Arc<dyn PaperSource>> {
        for name in &self.enabled_source_names {
            if SourceKind::from_name(name).is_none() {
                tracing::warn!("Unknown source '{}' in PAPER_HUB_SOURCES", name);
            }
        }

        let email = || self.contact_email.clone();
        SourceKind::ALL
            .into_iter()
            .filter(|k| self.is_enabled(*k))
            .map(|kind| -> Arc<dyn PaperSource> {
                match kind {
                    SourceKind::OpenAlex => Arc::new(apis::openalex::OpenAlexClient::new(email())),
                    SourceKind::Dblp => Arc::new(apis::dblp::DblpClient::new(email())),
                    SourceKind::SemanticScholar => Arc::new(apis::semantic_scholar::SemanticScholarClient::new(
                        self.semantic_scholar_api_key.clone(),
                        email(),
                    )),
                    SourceKind::Arxiv => Arc::new(apis::arxiv::ArxivClient::new(email())),
                    SourceKind::CrossRef => Arc::new(apis::crossref::CrossRefClient::new(email())),
                }
            })
            .collect()
    }

    /// Return a list of source status descriptions.
    pub fn source_status(&self) -> Vec<SourceStatus> {
        let polite = if self.contact_email.is_some() {
            "Polite pool email set"
        } else {
            "No contact email (shared rate limit)"
        };
        SourceKind::ALL
            .into_iter()
            .map(|kind| {
                let note = if !self.is_enabled(kind) {
                    "Disabled by PAPER_HUB_SOURCES filter"
                } else {
                    match kind {
                        SourceKind::SemanticScholar if self.semantic_scholar_api_key.is_some() => "API key set",
                        SourceKind::SemanticScholar => "No API key (rate limited)",
                        SourceKind::Arxiv => "No API key required (3s between requests)",
                        SourceKind::Dblp => "No API key required",
                        SourceKind::OpenAlex | SourceKind::CrossRef => polite,
                    }
                };
                SourceStatus {
                    name: kind.name().to_string(),
                    enabled: self.is_enabled(kind),
                    note: note.to_string(),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub enabled: bool,
    pub note: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert_eq!(c.request_timeout, Duration::from_secs(30));
        assert!(c.contact_email.is_none());
        assert_eq!(c.build_sources().len(), 5);
    }

    #[test]
    fn test_email_fallback_and_timeout_clamp() {
        let c = config(&[("OPENALEX_EMAIL", "a@b.org"), ("PAPER_HUB_TIMEOUT_SECS", "9000")]);
        assert_eq!(c.contact_email.as_deref(), Some("a@b.org"));
        assert_eq!(c.request_timeout, Duration::from_secs(300));

        let c = config(&[("PAPER_HUB_EMAIL", "x@y.org"), ("OPENALEX_EMAIL", "a@b.org")]);
        assert_eq!(c.contact_email.as_deref(), Some("x@y.org"));
        assert_eq!(config(&[("PAPER_HUB_TIMEOUT_SECS", "soon")]).request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_source_filter() {
        let c = config(&[("PAPER_HUB_SOURCES", "DBLP, crossref,")]);
        let kinds: Vec<_> = c.build_sources().iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec![SourceKind::Dblp, SourceKind::CrossRef]);

        let status = c.source_status();
        let openalex = status.iter().find(|s| s.name == "openalex").unwrap();
        assert!(!openalex.enabled);
        assert!(status.iter().find(|s| s.name == "dblp").unwrap().enabled);
    }
}
