//! Research stage: seed searches, a budgeted search tool and cited findings.
//!
//! A fixed plan of seed queries runs first so the agent starts from real
//! sources. The agent may then search on its own through [`SearchTool`],
//! sharing one budget with the seeds. Every URL the agent cites is resolved
//! against the snippets actually retrieved; claims that end up without a
//! source are dropped.

use crate::agent::{Agent, AgentConfig, LlmGate, Tool, ToolInfo};
use crate::context::{Context, keys};
use crate::error::{Error, Result, SearchError};
use crate::llm::LlmClient;
use crate::retry::{RetryPolicy, execute_with_retry};
use crate::roles;
use crate::search::{SearchClient, format_results};
use crate::types::{Finding, ResearchRequest, SourceSnippet};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Total searches per run, seeds included.
pub const MAX_SEARCHES: u32 = 5;

/// Seed searches in flight at once.
pub const SEED_CONCURRENCY: usize = 2;

/// The deterministic seed plan for a topic.
pub fn seed_queries(topic: &str) -> Vec<String> {
    vec![
        topic.to_string(),
        format!("{} latest developments", topic),
        format!("{} expert analysis statistics", topic),
    ]
}

/// Searches left in this run.
#[derive(Debug)]
pub struct SearchBudget {
    remaining: AtomicU32,
}

impl SearchBudget {
    pub fn new(total: u32) -> Self {
        Self {
            remaining: AtomicU32::new(total),
        }
    }

    /// Consume one search if any are left.
    pub fn try_take(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }
}

/// Snippets gathered so far, unique by URL in first-seen order.
#[derive(Debug, Default)]
pub struct SnippetPool {
    snippets: Mutex<Vec<SourceSnippet>>,
}

impl SnippetPool {
    /// Add snippets whose URL is not yet known. Returns how many were new.
    pub fn merge(&self, incoming: Vec<SourceSnippet>) -> usize {
        let mut snippets = self.snippets.lock().unwrap_or_else(|p| p.into_inner());
        let before = snippets.len();
        for snippet in incoming {
            let key = url_key(&snippet.url);
            if !snippets.iter().any(|s| url_key(&s.url) == key) {
                snippets.push(snippet);
            }
        }
        snippets.len() - before
    }

    pub fn snapshot(&self) -> Vec<SourceSnippet> {
        self.snippets
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.snippets.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn url_key(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

/// Run one budgeted search with retry and merge its results into `pool`.
async fn budgeted_search(
    client: &dyn SearchClient,
    budget: &SearchBudget,
    pool: &SnippetPool,
    retry: &RetryPolicy,
    query: &str,
    max_results: u32,
) -> std::result::Result<Option<Vec<SourceSnippet>>, SearchError> {
    if !budget.try_take() {
        return Ok(None);
    }
    let results = execute_with_retry(
        retry,
        |e: &SearchError| e.transient,
        move || client.search(query, max_results),
    )
    .await?;

    let added = pool.merge(results.clone());
    tracing::debug!(query, results = results.len(), added, "search complete");
    Ok(Some(results))
}

/// Web search exposed to the research agent.
pub struct SearchTool {
    client: Arc<dyn SearchClient>,
    budget: Arc<SearchBudget>,
    pool: Arc<SnippetPool>,
    retry: RetryPolicy,
    max_results: u32,
}

#[async_trait]
impl Tool for SearchTool {
    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            "search",
            "Search the web. Returns numbered results with title, URL and snippet.",
        )
        .arg_required("query", "str", "The search query")
    }

    async fn call(&self, args: Value) -> std::result::Result<String, String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| "'query' must be a non-empty string".to_string())?;

        let outcome = budgeted_search(
            self.client.as_ref(),
            &self.budget,
            &self.pool,
            &self.retry,
            query,
            self.max_results,
        )
        .await
        .map_err(|e| e.to_string())?;

        Ok(match outcome {
            None => "Search budget exhausted. Work with the sources you already have.".to_string(),
            Some(results) if results.is_empty() => format!("No results found for '{}'.", query),
            Some(results) => format_results(&results),
        })
    }
}

/// A finding as the agent reports it, with sources as bare URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftFinding {
    pub claim: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutput {
    pub findings: Vec<DraftFinding>,
}

/// Attach retrieved snippets to each draft finding.
///
/// Unknown URLs are ignored, a finding without any known URL is dropped and
/// at most `limit` findings are kept.
pub fn resolve_findings(
    drafts: Vec<DraftFinding>,
    snippets: &[SourceSnippet],
    limit: usize,
) -> Vec<Finding> {
    drafts
        .into_iter()
        .filter_map(|draft| {
            let mut supporting: Vec<SourceSnippet> = Vec::new();
            for url in &draft.sources {
                let Some(snippet) = snippets.iter().find(|s| url_key(&s.url) == url_key(url))
                else {
                    tracing::debug!(url = %url, "dropping citation to unretrieved source");
                    continue;
                };
                if !supporting.iter().any(|s| s.url == snippet.url) {
                    supporting.push(snippet.clone());
                }
            }
            let claim = draft.claim.trim().to_string();
            (!supporting.is_empty() && !claim.is_empty()).then_some(Finding {
                claim,
                supporting_snippets: supporting,
            })
        })
        .take(limit)
        .collect()
}

/// Runs the research agent for one request.
pub struct Researcher {
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
    base: AgentConfig,
    gate: Option<LlmGate>,
    retry: RetryPolicy,
    verbose: bool,
}

impl Researcher {
    pub fn new(llm: Arc<dyn LlmClient>, search: Arc<dyn SearchClient>, base: AgentConfig) -> Self {
        Self {
            llm,
            search,
            base,
            gate: None,
            retry: RetryPolicy::default(),
            verbose: false,
        }
    }

    pub fn gate(mut self, gate: LlmGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Retry policy for search calls.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Gather sources and return verified findings, also stored under
    /// [`keys::FINDINGS`] in `ctx`.
    pub async fn research(&self, request: &ResearchRequest, ctx: &Context) -> Result<Vec<Finding>> {
        let budget = Arc::new(SearchBudget::new(MAX_SEARCHES));
        let pool = Arc::new(SnippetPool::default());
        let max_results = u32::from(request.source_count());

        let client = self.search.as_ref();
        let (budget_ref, pool_ref, retry) = (budget.as_ref(), pool.as_ref(), &self.retry);
        let outcomes: Vec<_> = stream::iter(seed_queries(request.topic()))
            .map(move |query| async move {
                budgeted_search(client, budget_ref, pool_ref, retry, &query, max_results).await
            })
            .buffered(SEED_CONCURRENCY)
            .collect()
            .await;

        let last_error = outcomes.into_iter().filter_map(|o| o.err()).last();
        if pool.is_empty() {
            let reason = match last_error {
                Some(e) => format!("no sources retrieved for '{}' ({})", request.topic(), e),
                None => format!("no sources found for '{}'", request.topic()),
            };
            return Err(Error::ResearchIncomplete(reason));
        }
        if let Some(e) = last_error {
            tracing::warn!(error = %e, "some seed searches failed");
        }
        tracing::info!(sources = pool.len(), "seed searches complete");

        let config = roles::researcher(self.base.clone(), request);
        let mut agent = Agent::new(config, self.llm.clone())
            .verbose(self.verbose)
            .from_context(ctx, keys::REQUEST);
        if let Some(gate) = &self.gate {
            agent = agent.gate(gate.clone());
        }
        agent.register(SearchTool {
            client: self.search.clone(),
            budget: budget.clone(),
            pool: pool.clone(),
            retry: self.retry.clone(),
            max_results,
        });

        let task = format!(
            "Research \"{topic}\" and report up to {count} key findings.\n\n\
             Sources gathered so far:\n{sources}\n\n\
             You may run {left} more searches with the search tool. Every finding must cite \
             the exact URLs of the sources that support it. Reply with \
             <finish>{{\"findings\": [{{\"claim\": \"...\", \"sources\": [\"https://...\"]}}]}}</finish>.",
            topic = request.topic(),
            count = request.source_count(),
            sources = format_results(&pool.snapshot()),
            left = budget.remaining(),
        );

        // Provider errors pass through so the caller can tell them apart
        let output: ResearchOutput = agent.run(&task).await.map_err(|e| match e {
            Error::MaxIterations(_) | Error::InvalidOutput(_) => {
                Error::ResearchIncomplete(e.to_string())
            }
            other => other,
        })?;

        let findings = resolve_findings(
            output.findings,
            &pool.snapshot(),
            usize::from(request.source_count()),
        );
        if findings.is_empty() {
            return Err(Error::ResearchIncomplete(
                "no finding cites a retrieved source".to_string(),
            ));
        }

        tracing::info!(
            findings = findings.len(),
            searches = MAX_SEARCHES - budget.remaining(),
            "research complete"
        );
        ctx.set(keys::FINDINGS, &findings);
        Ok(findings)
    }
}
