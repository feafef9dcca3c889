use crate::apis::Paper;

const JOURNAL_MARKERS: [&str; 9] = [
    "journal",
    "transactions",
    "letters",
    "review",
    "magazine",
    "annals",
    "bulletin",
    "nature",
    "science",
];

const STOP_WORDS: [&str; 8] = ["a", "an", "the", "on", "of", "in", "for", "towards"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryType {
    Article,
    InProceedings,
    Misc,
}

fn entry_type(paper: &Paper) -> EntryType {
    let venue = paper.venue.as_deref().map(str::to_lowercase);
    match venue.as_deref() {
        None | Some("corr") | Some("arxiv") | Some("arxiv.org") => EntryType::Misc,
        Some(v) if JOURNAL_MARKERS.iter().any(|m| v.contains(m)) => EntryType::Article,
        Some(_) => EntryType::InProceedings,
    }
}

/// `<lastname><year><firstword>`, e.g. `vaswani2017attention`.
pub fn citation_key(paper: &Paper) -> String {
    let last_name = paper
        .authors
        .first()
        .and_then(|a| {
            // "Last, First" or "First Last"
            match a.split_once(',') {
                Some((last, _)) => Some(last.to_string()),
                None => a.split_whitespace().last().map(str::to_string),
            }
        })
        .unwrap_or_else(|| "anon".to_string());
    let first_word = paper
        .title
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase())
        .find(|w| !w.is_empty() && !STOP_WORDS.contains(&w.as_str()))
        .unwrap_or_default();
    let year = paper.year.map(|y| y.to_string()).unwrap_or_default();

    let key: String = format!("{}{}{}", last_name.to_lowercase(), year, first_word)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if key.is_empty() {
        "paper".to_string()
    } else {
        key
    }
}

/// Escape characters LaTeX treats specially.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

pub fn to_bibtex(paper: &Paper) -> String {
    let kind = entry_type(paper);
    let mut fields: Vec<(&str, String)> = vec![("title", escape(&paper.title))];
    if !paper.authors.is_empty() {
        let authors: Vec<String> = paper.authors.iter().map(|a| escape(a)).collect();
        fields.push(("author", authors.join(" and ")));
    }
    match (kind, &paper.venue) {
        (EntryType::Article, Some(v)) => fields.push(("journal", escape(v))),
        (EntryType::InProceedings, Some(v)) => fields.push(("booktitle", escape(v))),
        _ => {}
    }
    if let Some(year) = paper.year {
        fields.push(("year", year.to_string()));
    }
    if let Some(doi) = paper.doi() {
        // DOIs and URLs are verbatim fields; escaping breaks the links.
        fields.push(("doi", doi.to_string()));
    }
    if let Some(arxiv) = &paper.ids.arxiv {
        fields.push(("eprint", arxiv.clone()));
        fields.push(("archivePrefix", "arXiv".to_string()));
    }
    if let Some(url) = &paper.url {
        fields.push(("url", url.clone()));
    }

    let type_name = match kind {
        EntryType::Article => "article",
        EntryType::InProceedings => "inproceedings",
        EntryType::Misc => "misc",
    };
    let body = fields
        .iter()
        .map(|(k, v)| format!("  {} = {{{}}}", k, v))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("@{}{{{},\n{}\n}}", type_name, citation_key(paper), body)
}
