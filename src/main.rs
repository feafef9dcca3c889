use std::collections::HashMap;
use std::sync::Arc;

use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters,
    model::*, tool, tool_handler, tool_router,
    transport::stdio, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

mod aggregator;
mod apis;
mod bibtex;
mod cache;
mod config;
mod identifier;
mod render;

use aggregator::{AggregateError, Aggregator};
use apis::SearchFilters;
use cache::Cache;
use config::Config;

const DEFAULT_LIMIT: u32 = 10;
const DEFAULT_RELATION_LIMIT: u32 = 25;

// ── Parameter structs ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum OutputFormat {
    #[default]
    Json,
    Markdown,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchPapersParams {
    #[schemars(description = "Search query string")]
    query: String,
    #[schemars(description = "Maximum results to return (default 10, 1-100)")]
    limit: Option<u32>,
    #[schemars(description = "Optional filters: year (\"2020\" or \"2018-2020\"), year_from, year_to, venue")]
    filters: Option<HashMap<String, serde_json::Value>>,
    #[schemars(description = "Output format: 'json' (default) or 'markdown'")]
    format: Option<OutputFormat>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PaperParams {
    #[schemars(description = "DOI, arXiv id, OpenAlex id (W...), Semantic Scholar id, DBLP key, or a title")]
    id: String,
    #[schemars(description = "Output format: 'json' (default) or 'markdown'")]
    format: Option<OutputFormat>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct BibtexParams {
    #[schemars(description = "Comma-separated paper identifiers (DOI, arXiv id, OpenAlex id, S2 id, DBLP key), at most 50")]
    ids: String,
    #[schemars(description = "Output format: 'json' (default) or 'markdown'")]
    format: Option<OutputFormat>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RelationParams {
    #[schemars(description = "Identifier of the paper to start from")]
    id: String,
    #[schemars(description = "Maximum papers to return (default 25, 1-100)")]
    limit: Option<u32>,
    #[schemars(description = "Output format: 'json' (default) or 'markdown'")]
    format: Option<OutputFormat>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchAuthorParams {
    #[schemars(description = "Author name")]
    name: String,
    #[schemars(description = "Maximum authors to return (default 10, 1-100)")]
    limit: Option<u32>,
    #[schemars(description = "Output format: 'json' (default) or 'markdown'")]
    format: Option<OutputFormat>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct NetworkParams {
    #[schemars(description = "Identifier of the root paper")]
    id: String,
    #[schemars(description = "Expansion depth, 1 or 2 (default 1)")]
    depth: Option<u8>,
    #[schemars(description = "Output format: 'json' (default) or 'markdown'")]
    format: Option<OutputFormat>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CacheStatsParams {
    #[schemars(description = "Output format: 'json' (default) or 'markdown'")]
    format: Option<OutputFormat>,
}

#[derive(Serialize)]
struct BibtexEntry<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    bibtex: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// ── Response helpers ────────────────────────────────────────────────────────

fn respond<T: Serialize>(
    format: Option<OutputFormat>,
    value: &T,
    markdown: impl FnOnce(&T) -> String,
) -> Result<CallToolResult, McpError> {
    let text = match format.unwrap_or_default() {
        OutputFormat::Json => serde_json::to_string_pretty(value)
            .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?,
        OutputFormat::Markdown => markdown(value),
    };
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// Not-found is an answer, not a failure; everything else is a tool error.
fn failure(e: AggregateError) -> Result<CallToolResult, McpError> {
    match e {
        AggregateError::NotFound(_) => Ok(CallToolResult::success(vec![Content::text(e.to_string())])),
        AggregateError::Validation(msg) => Err(McpError::invalid_params(msg, None)),
        AggregateError::Unavailable { .. } => Err(McpError::internal_error(e.to_string(), None)),
    }
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PaperHubServer {
    tool_router: ToolRouter<Self>,
    config: Arc<Config>,
    aggregator: Arc<Aggregator>,
}

#[tool_router]
impl PaperHubServer {
    pub fn create() -> Self {
        let config = Config::from_env();
        let sources = config.build_sources();
        tracing::info!(
            "Initialized {} paper sources, request timeout {:?}",
            sources.len(),
            config.request_timeout
        );

        let aggregator = Aggregator::new(sources, Arc::new(Cache::default()), config.request_timeout);
        Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
            aggregator: Arc::new(aggregator),
        }
    }

    #[tool(description = "List available paper sources and their status")]
    async fn list_sources(&self) -> Result<CallToolResult, McpError> {
        let statuses = self.config.source_status();
        let json = serde_json::to_string_pretty(&statuses)
            .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Search papers across OpenAlex, DBLP, Semantic Scholar, arXiv and CrossRef. Returns deduplicated, ranked results.")]
    async fn search_papers(
        &self,
        Parameters(params): Parameters<SearchPapersParams>,
    ) -> Result<CallToolResult, McpError> {
        let filters = match &params.filters {
            Some(map) => SearchFilters::from_json(map).map_err(|e| McpError::invalid_params(e, None))?,
            None => SearchFilters::default(),
        };
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
        match self.aggregator.search(&params.query, limit, &filters).await {
            Ok(result) => respond(params.format, &result, render::search_markdown),
            Err(e) => failure(e),
        }
    }

    #[tool(description = "Get metadata for one paper. Accepts a DOI, arXiv id, OpenAlex id, Semantic Scholar id, DBLP key, URL, or title; the identifier type is detected automatically.")]
    async fn get_paper_details(
        &self,
        Parameters(params): Parameters<PaperParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.aggregator.get_paper(&params.id).await {
            Ok(Some(paper)) => respond(params.format, &paper, |p| render::paper_markdown(p, None)),
            Ok(None) => Ok(CallToolResult::success(vec![Content::text(format!(
                "No paper found for '{}'",
                params.id.trim()
            ))])),
            Err(e) => failure(e),
        }
    }

    #[tool(description = "Get BibTeX for one or more papers (comma-separated identifiers). DBLP's own BibTeX is used when available; otherwise an entry is generated from metadata. Each identifier succeeds or fails independently.")]
    async fn get_bibtex(
        &self,
        Parameters(params): Parameters<BibtexParams>,
    ) -> Result<CallToolResult, McpError> {
        let ids: Vec<String> = params
            .ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let entries = match self.aggregator.get_bibtex(&ids).await {
            Ok(entries) => entries,
            Err(e) => return failure(e),
        };
        match params.format.unwrap_or_default() {
            OutputFormat::Markdown => Ok(CallToolResult::success(vec![Content::text(
                render::bibtex_markdown(&entries),
            )])),
            OutputFormat::Json => {
                let json: Vec<BibtexEntry<'_>> = entries
                    .iter()
                    .map(|(id, r)| BibtexEntry {
                        id,
                        bibtex: r.as_ref().ok().map(String::as_str),
                        error: r.as_ref().err().map(ToString::to_string),
                    })
                    .collect();
                respond(Some(OutputFormat::Json), &json, |_| String::new())
            }
        }
    }

    #[tool(description = "Get papers that cite a given paper, merged from OpenAlex and Semantic Scholar")]
    async fn get_citations(
        &self,
        Parameters(params): Parameters<RelationParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = params.limit.unwrap_or(DEFAULT_RELATION_LIMIT);
        match self.aggregator.get_citations(&params.id, limit).await {
            Ok(papers) => respond(params.format, &papers, |p| render::papers_markdown("Citing papers", p)),
            Err(e) => failure(e),
        }
    }

    #[tool(description = "Get papers referenced by a given paper, merged from OpenAlex and Semantic Scholar")]
    async fn get_references(
        &self,
        Parameters(params): Parameters<RelationParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = params.limit.unwrap_or(DEFAULT_RELATION_LIMIT);
        match self.aggregator.get_references(&params.id, limit).await {
            Ok(papers) => respond(params.format, &papers, |p| render::papers_markdown("References", p)),
            Err(e) => failure(e),
        }
    }

    #[tool(description = "Find papers related to a given paper (Semantic Scholar recommendations, falling back to OpenAlex related works)")]
    async fn get_related_papers(
        &self,
        Parameters(params): Parameters<RelationParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
        match self.aggregator.get_related(&params.id, limit).await {
            Ok(papers) => respond(params.format, &papers, |p| render::papers_markdown("Related papers", p)),
            Err(e) => failure(e),
        }
    }

    #[tool(description = "Search for authors by name across OpenAlex, Semantic Scholar and DBLP")]
    async fn search_author(
        &self,
        Parameters(params): Parameters<SearchAuthorParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
        match self.aggregator.search_author(&params.name, limit).await {
            Ok(authors) => respond(params.format, &authors, |a| render::authors_markdown(a)),
            Err(e) => failure(e),
        }
    }

    #[tool(description = "Build a citation network around a paper: citing and cited papers up to depth 2, with directed citation edges")]
    async fn get_citation_network(
        &self,
        Parameters(params): Parameters<NetworkParams>,
    ) -> Result<CallToolResult, McpError> {
        let depth = params.depth.unwrap_or(1);
        match self.aggregator.get_citation_network(&params.id, depth).await {
            Ok(network) => respond(params.format, &network, render::network_markdown),
            Err(e) => failure(e),
        }
    }

    #[tool(description = "Show cache hit/miss statistics per cache class (search, paper, bibtex)")]
    async fn cache_stats(
        &self,
        Parameters(params): Parameters<CacheStatsParams>,
    ) -> Result<CallToolResult, McpError> {
        let stats = self.aggregator.cache_stats();
        respond(params.format, &stats, |s| render::cache_stats_markdown(s))
    }
}

#[tool_handler]
impl ServerHandler for PaperHubServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Search and look up academic papers across OpenAlex, DBLP, Semantic Scholar, \
                 arXiv and CrossRef. Paper identifiers (DOI, arXiv id, OpenAlex id, Semantic \
                 Scholar id, DBLP key) are detected automatically and routed to the right \
                 source with fallback. Results are cached."
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting paper-hub MCP server");

    let server = PaperHubServer::create();
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
