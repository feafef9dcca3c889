use std::fmt::Write as _;

use crate::aggregator::{AggregateError, CitationNetwork, SearchResult};
use crate::apis::{Author, Paper};
use crate::cache::CacheStats;

const ABSTRACT_PREVIEW_CHARS: usize = 300;

pub fn paper_markdown(paper: &Paper, index: Option<usize>) -> String {
    let mut out = String::new();
    match index {
        Some(i) => {
            let _ = writeln!(out, "## {}. {}\n", i, paper.title);
        }
        None => {
            let _ = writeln!(out, "## {}\n", paper.title);
        }
    }

    if !paper.authors.is_empty() {
        let _ = writeln!(out, "**Authors**: {}\n", paper.authors.join(", "));
    }

    let mut meta = Vec::new();
    if let Some(year) = paper.year {
        meta.push(format!("**Year**: {}", year));
    }
    if let Some(venue) = &paper.venue {
        meta.push(format!("**Venue**: {}", venue));
    }
    if let Some(count) = paper.citation_count {
        meta.push(format!("**Citations**: {}", count));
    }
    meta.push(format!("**Source**: {}", paper.source));
    let _ = writeln!(out, "{}\n", meta.join(" | "));

    let mut links = Vec::new();
    if let Some(doi) = paper.doi() {
        links.push(format!("[DOI](https://doi.org/{})", doi));
    }
    if let Some(arxiv) = &paper.ids.arxiv {
        links.push(format!("[arXiv](https://arxiv.org/abs/{})", arxiv));
    }
    if let Some(oa) = &paper.ids.openalex {
        links.push(format!("[OpenAlex](https://openalex.org/{})", oa));
    }
    if let Some(dblp) = &paper.ids.dblp {
        links.push(format!("[DBLP](https://dblp.org/rec/{})", dblp));
    }
    if let Some(s2) = &paper.ids.semantic_scholar {
        links.push(format!("[S2](https://www.semanticscholar.org/paper/{})", s2));
    }
    if !links.is_empty() {
        let _ = writeln!(out, "**Links**: {}\n", links.join(" | "));
    }
    if let Some(pdf) = &paper.pdf_url {
        let _ = writeln!(out, "**PDF**: [Open Access]({})\n", pdf);
    }

    if let Some(abs) = &paper.abstract_text {
        let preview: String = abs.chars().take(ABSTRACT_PREVIEW_CHARS).collect();
        let ellipsis = if abs.chars().count() > ABSTRACT_PREVIEW_CHARS { "..." } else { "" };
        let _ = writeln!(out, "**Abstract**: {}{}", preview, ellipsis);
    }
    out
}

pub fn papers_markdown(heading: &str, papers: &[Paper]) -> String {
    if papers.is_empty() {
        return format!("# {}\n\nNo papers found.", heading);
    }
    let mut out = format!("# {} ({} results)\n\n", heading, papers.len());
    for (i, paper) in papers.iter().enumerate() {
        out.push_str(&paper_markdown(paper, Some(i + 1)));
        out.push_str("\n---\n\n");
    }
    out
}

pub fn search_markdown(result: &SearchResult) -> String {
    let mut out = papers_markdown(&format!("Search: {}", result.query), &result.papers);
    let queried: Vec<&str> = result.sources_queried.iter().map(|k| k.name()).collect();
    let _ = write!(out, "\n_Sources queried: {}_", queried.join(", "));
    if !result.sources_failed.is_empty() {
        let failed: Vec<&str> = result.sources_failed.iter().map(|k| k.name()).collect();
        let _ = write!(out, "\n_Unavailable: {}_", failed.join(", "));
    }
    if result.truncated {
        if let Some(total) = result.total_found {
            let _ = write!(out, "\n_Showing {} of {} matches._", result.papers.len(), total);
        }
    }
    out
}

pub fn authors_markdown(authors: &[Author]) -> String {
    if authors.is_empty() {
        return "No authors found.".to_string();
    }
    let mut out = format!("# Authors ({} results)\n\n", authors.len());
    for (i, author) in authors.iter().enumerate() {
        let _ = writeln!(out, "## {}. {}\n", i + 1, author.name);
        if let Some(aff) = &author.affiliation {
            let _ = writeln!(out, "**Affiliation**: {}\n", aff);
        }
        let mut meta = vec![format!("**Source**: {}", author.source)];
        if let Some(n) = author.paper_count {
            meta.push(format!("**Papers**: {}", n));
        }
        if let Some(n) = author.citation_count {
            meta.push(format!("**Citations**: {}", n));
        }
        let _ = writeln!(out, "{}\n", meta.join(" | "));
        if let Some(url) = &author.url {
            let _ = writeln!(out, "**Profile**: {}\n", url);
        }
        out.push_str("---\n\n");
    }
    out
}

/// Successful entries as one `.bib` block, failures listed after it.
pub fn bibtex_markdown(entries: &[(String, Result<String, AggregateError>)]) -> String {
    let ok: Vec<&str> = entries
        .iter()
        .filter_map(|(_, r)| r.as_ref().ok().map(String::as_str))
        .collect();
    let mut out = String::new();
    if !ok.is_empty() {
        let _ = write!(out, "```bibtex\n{}\n```\n", ok.join("\n\n"));
    }
    let failed: Vec<_> = entries
        .iter()
        .filter_map(|(id, r)| r.as_ref().err().map(|e| (id, e)))
        .collect();
    if !failed.is_empty() {
        out.push_str("\n**Failed**:\n\n");
        for (id, e) in failed {
            let _ = writeln!(out, "- `{}`: {}", id, e);
        }
    }
    out
}

pub fn network_markdown(network: &CitationNetwork) -> String {
    let title = |id: &str| {
        network
            .nodes
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.title.as_str())
            .unwrap_or(id)
            .to_string()
    };
    let mut out = format!(
        "# Citation network of {} (depth {})\n\n{} papers, {} citations\n\n",
        title(&network.root),
        network.depth,
        network.nodes.len(),
        network.edges.len()
    );
    if !network.complete {
        out.push_str("_Partial: some sources failed or timed out._\n\n");
    }
    for edge in &network.edges {
        let _ = writeln!(out, "- {} → {}", title(&edge.from), title(&edge.to));
    }
    out
}

pub fn cache_stats_markdown(stats: &[CacheStats]) -> String {
    let mut out = String::from("| Class | TTL (s) | Entries | Hits | Misses | Hit rate |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for s in stats {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {:.1}% |",
            s.class.name(),
            s.ttl_secs,
            s.size,
            s.hits,
            s.misses,
            s.hit_rate * 100.0
        );
    }
    out
}
