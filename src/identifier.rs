// Identifier rules are tried in a fixed order; the first match wins and
// anything unrecognized is free text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// DOI prefix DataCite assigns to arXiv preprints.
pub const ARXIV_DOI_PREFIX: &str = "10.48550/arxiv.";

static ARXIV_DOI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^10\.48550/arxiv\.(\S+)$").expect("valid regex"));
static DOI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^10\.\d+(?:\.\d+)*/\S+$").expect("valid regex"));
static ARXIV_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:arxiv:)?(\d{4}\.\d{4,5}(?:v\d+)?|[a-z][a-z\-]*(?:\.[a-z]{2})?/\d{7}(?:v\d+)?)$")
        .expect("valid regex")
});
static OPENALEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^W\d+$").expect("valid regex"));
static S2_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{40}$").expect("valid regex"));
static DBLP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]+(?:/[A-Za-z0-9_\-]+){2,}$").expect("valid regex"));
static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").expect("valid regex"));

/// Wrappers people paste around identifiers. Matched case-insensitively.
const STRIP_PREFIXES: [&str; 10] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
    "https://arxiv.org/abs/",
    "http://arxiv.org/abs/",
    "https://openalex.org/",
    "https://api.openalex.org/works/",
    "https://dblp.org/rec/",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identifier {
    ArxivDoi { value: String, arxiv_id: String },
    Doi { value: String },
    ArxivId { value: String },
    OpenAlexId { value: String },
    SemanticScholarId { value: String },
    DblpKey { value: String },
    FreeText { value: String },
}

impl Identifier {
    pub fn value(&self) -> &str {
        match self {
            Identifier::ArxivDoi { value, .. }
            | Identifier::Doi { value }
            | Identifier::ArxivId { value }
            | Identifier::OpenAlexId { value }
            | Identifier::SemanticScholarId { value }
            | Identifier::DblpKey { value }
            | Identifier::FreeText { value } => value,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Identifier::ArxivDoi { .. } => "arxiv_doi",
            Identifier::Doi { .. } => "doi",
            Identifier::ArxivId { .. } => "arxiv_id",
            Identifier::OpenAlexId { .. } => "openalex_id",
            Identifier::SemanticScholarId { .. } => "semantic_scholar_id",
            Identifier::DblpKey { .. } => "dblp_key",
            Identifier::FreeText { .. } => "free_text",
        }
    }

    /// The arXiv id for either arXiv form.
    pub fn arxiv_id(&self) -> Option<&str> {
        match self {
            Identifier::ArxivDoi { arxiv_id, .. } => Some(arxiv_id),
            Identifier::ArxivId { value } => Some(value),
            _ => None,
        }
    }

    /// A DOI for this identifier. arXiv ids map onto their DataCite DOI.
    pub fn doi(&self) -> Option<String> {
        match self {
            Identifier::Doi { value } => Some(value.to_lowercase()),
            Identifier::ArxivDoi { value, .. } => Some(value.to_lowercase()),
            Identifier::ArxivId { value } => Some(format!(
                "{}{}",
                ARXIV_DOI_PREFIX,
                strip_arxiv_version(value).to_lowercase()
            )),
            _ => None,
        }
    }

    pub fn is_free_text(&self) -> bool {
        matches!(self, Identifier::FreeText { .. })
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.value(), self.kind_name())
    }
}

/// Classify `input`. Total and deterministic: every string maps to exactly
/// one variant, with `FreeText` as the fallback.
pub fn classify(input: &str) -> Identifier {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Identifier::FreeText {
            value: input.to_string(),
        };
    }
    let s = strip_wrappers(trimmed);

    if let Some(caps) = ARXIV_DOI_RE.captures(s) {
        return Identifier::ArxivDoi {
            value: s.to_string(),
            arxiv_id: caps[1].to_string(),
        };
    }
    if DOI_RE.is_match(s) {
        return Identifier::Doi {
            value: s.to_string(),
        };
    }
    if let Some(caps) = ARXIV_ID_RE.captures(s) {
        return Identifier::ArxivId {
            value: caps[1].to_string(),
        };
    }
    if OPENALEX_RE.is_match(s) {
        return Identifier::OpenAlexId {
            value: s.to_string(),
        };
    }
    if S2_RE.is_match(s) {
        return Identifier::SemanticScholarId {
            value: s.to_string(),
        };
    }
    if DBLP_RE.is_match(s) {
        return Identifier::DblpKey {
            value: s.to_string(),
        };
    }
    Identifier::FreeText {
        value: trimmed.to_string(),
    }
}

fn strip_wrappers(s: &str) -> &str {
    for prefix in STRIP_PREFIXES {
        if let Some(head) = s.get(..prefix.len()) {
            if head.eq_ignore_ascii_case(prefix) {
                let rest = s[prefix.len()..].trim();
                if !rest.is_empty() {
                    return rest;
                }
            }
        }
    }
    s
}

pub fn strip_arxiv_version(id: &str) -> &str {
    match VERSION_RE.find(id) {
        Some(m) => &id[..m.start()],
        None => id,
    }
}

/// Bare lower-case DOI with any resolver prefix removed.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let doi = strip_wrappers(raw.trim()).to_lowercase();
    if doi.is_empty() {
        None
    } else {
        Some(doi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_arxiv_doi_carries_arxiv_id() {
        let id = classify("10.48550/arXiv.2301.12345");
        assert_eq!(
            id,
            Identifier::ArxivDoi {
                value: "10.48550/arXiv.2301.12345".into(),
                arxiv_id: "2301.12345".into(),
            }
        );
        assert_eq!(classify("10.48550/ARXIV.1706.03762").arxiv_id(), Some("1706.03762"));
        assert_eq!(classify("10.48550/arxiv.1706.03762v5").arxiv_id(), Some("1706.03762v5"));
    }

    #[test]
    fn test_doi() {
        assert_eq!(
            classify("10.1038/nature12345"),
            Identifier::Doi { value: "10.1038/nature12345".into() }
        );
        assert_eq!(classify("https://doi.org/10.1145/3292500.3330701").kind_name(), "doi");
        assert_eq!(classify("doi:10.1000.10/abc").kind_name(), "doi");
    }

    #[test]
    fn test_arxiv_id() {
        assert_eq!(classify("2301.12345"), Identifier::ArxivId { value: "2301.12345".into() });
        assert_eq!(classify("arXiv:1706.03762v7"), Identifier::ArxivId { value: "1706.03762v7".into() });
        assert_eq!(classify("ARXIV:1706.0376"), Identifier::ArxivId { value: "1706.0376".into() });
        assert_eq!(classify("hep-th/9901001").kind_name(), "arxiv_id");
        assert_eq!(classify("https://arxiv.org/abs/2301.12345").kind_name(), "arxiv_id");
    }

    #[test]
    fn test_openalex_id() {
        assert_eq!(classify("W2741809807"), Identifier::OpenAlexId { value: "W2741809807".into() });
        assert_eq!(classify("https://openalex.org/W2741809807").kind_name(), "openalex_id");
        assert!(classify("W").is_free_text());
    }

    #[test]
    fn test_semantic_scholar_id_length() {
        let hex40 = "649def34f8be52c8b66281af98ae884c09aef38b";
        assert_eq!(classify(hex40).kind_name(), "semantic_scholar_id");
        assert_ne!(classify(&hex40[..39]).kind_name(), "semantic_scholar_id");
        assert_ne!(classify(&format!("{}a", hex40)).kind_name(), "semantic_scholar_id");
    }

    #[test]
    fn test_dblp_key() {
        assert_eq!(
            classify("conf/nips/VaswaniSPUJGKP17"),
            Identifier::DblpKey { value: "conf/nips/VaswaniSPUJGKP17".into() }
        );
        assert_eq!(classify("journals/corr/abs-1706-03762").kind_name(), "dblp_key");
        assert!(classify("conf/nips").is_free_text());
        assert!(classify("conf/nips/Some Author").is_free_text());
    }

    #[test]
    fn test_free_text_and_empty() {
        assert_eq!(
            classify("  attention is all you need "),
            Identifier::FreeText { value: "attention is all you need".into() }
        );
        assert_eq!(classify("   "), Identifier::FreeText { value: "   ".into() });
        assert_eq!(classify(""), Identifier::FreeText { value: "".into() });
        assert!(classify("not-a-valid-id-at-all").is_free_text());
    }

    #[test]
    fn test_doi_for_arxiv_id_drops_version() {
        assert_eq!(
            classify("2301.12345v2").doi().as_deref(),
            Some("10.48550/arxiv.2301.12345")
        );
        assert_eq!(classify("W1").doi(), None);
    }

    #[test]
    fn test_normalize_doi() {
        assert_eq!(normalize_doi("https://doi.org/10.1038/NATURE1").as_deref(), Some("10.1038/nature1"));
        assert_eq!(normalize_doi("  "), None);
    }

    proptest! {
        #[test]
        fn classify_is_deterministic(input in ".{0,80}") {
            prop_assert_eq!(classify(&input), classify(&input));
        }

        #[test]
        fn arxiv_doi_strips_prefix(
            arxiv in "[0-9]{4}\\.[0-9]{4,5}",
            spelling in prop::sample::select(vec!["arXiv", "arxiv", "ARXIV", "ArXiv"]),
        ) {
            let input = format!("10.48550/{}.{}", spelling, arxiv);
            let id = classify(&input);
            prop_assert_eq!(id.arxiv_id(), Some(arxiv.as_str()));
            prop_assert_eq!(id.kind_name(), "arxiv_doi");
        }

        #[test]
        fn forty_hex_is_semantic_scholar(hex in "[0-9a-f]{40}") {
            prop_assert_eq!(classify(&hex).kind_name(), "semantic_scholar_id");
        }

        #[test]
        fn other_hex_lengths_are_not_semantic_scholar(hex in "[a-f]{39}|[a-f]{41}") {
            prop_assert_ne!(classify(&hex).kind_name(), "semantic_scholar_id");
        }
    }
}
