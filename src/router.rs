//! Query routing across corpora.
//!
//! ```text
//! Scope ──catalog──▶ [(CorpusId, corpus_ref)] ──spawn──▶ one task per corpus
//!                                                        │ timeout + child token
//!                                                        ▼
//!                         SearchResponse ◀──aggregate── pages / warnings
//! ```
//!
//! A corpus that fails or times out becomes a `PartialFailure` warning.
//! Only when every target fails does the search itself fail.
//!
//! A [`MetadataFilter`] is forwarded to every backend call. Hits that come
//! back carrying metadata which contradicts the filter are dropped as well;
//! hits without metadata are trusted to have been filtered by the backend.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use edu_rag_core::aggregate;
use edu_rag_core::backend::{Hit, IndexBackend, SearchOptions};
use edu_rag_core::catalog::Catalog;
use edu_rag_core::codec;
use edu_rag_core::error::TargetFailure;
use edu_rag_core::filter::{CoordinatePattern, CorpusFilter};
use edu_rag_core::metadata::MetadataFilter;
use edu_rag_core::models::{CitedResult, CorpusId, SearchResult};
use edu_rag_core::{BackendError, Error, Result};

use crate::config::SearchConfig;

/// Which corpora a query goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    /// One corpus by id; the id need not parse.
    Single(String),
    BySubject(String),
    ByCoordinate(CoordinatePattern),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => f.write_str("all"),
            Scope::Single(id) => write!(f, "corpus={id}"),
            Scope::BySubject(s) => write!(f, "subject={s}"),
            Scope::ByCoordinate(p) => write!(f, "{p}"),
        }
    }
}

impl From<CorpusFilter> for Scope {
    fn from(filter: CorpusFilter) -> Self {
        match filter {
            CorpusFilter::All => Scope::All,
            CorpusFilter::BySubject(s) => Scope::BySubject(s),
            CorpusFilter::ByCoordinate(p) => Scope::ByCoordinate(p),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchWarning {
    /// A target corpus could not be searched.
    PartialFailure { corpus_id: String, reason: String },
    /// A hit whose URI does not map back into its corpus.
    UnresolvedHit {
        corpus_id: String,
        uri: String,
        reason: String,
    },
}

impl fmt::Display for SearchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchWarning::PartialFailure { corpus_id, reason } => {
                write!(f, "corpus {corpus_id} unavailable: {reason}")
            }
            SearchWarning::UnresolvedHit {
                corpus_id,
                uri,
                reason,
            } => write!(f, "dropped hit {uri} from {corpus_id}: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    /// Corpora the query was dispatched to, ascending.
    pub searched: Vec<CorpusId>,
    pub results: Vec<CitedResult>,
    pub warnings: Vec<SearchWarning>,
}

impl SearchResponse {
    fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            searched: Vec::new(),
            results: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// True when at least one target could not be searched.
    pub fn is_partial(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, SearchWarning::PartialFailure { .. }))
    }
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub top_k_per_corpus: usize,
    pub top_k_single: usize,
    pub final_limit: usize,
    pub per_call_timeout: Duration,
    pub distance_threshold: Option<f64>,
}

impl RouterSettings {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            top_k_per_corpus: config.top_k_per_corpus,
            top_k_single: config.top_k_single,
            final_limit: config.final_limit,
            per_call_timeout: Duration::from_secs(config.per_call_timeout_secs),
            distance_threshold: config.distance_threshold,
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

enum CallFailure {
    Backend(BackendError),
    TimedOut(Duration),
    Cancelled,
    Aborted(String),
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallFailure::Backend(e) => write!(f, "{e}"),
            CallFailure::TimedOut(d) => write!(f, "timed out after {d:?}"),
            CallFailure::Cancelled => f.write_str("cancelled"),
            CallFailure::Aborted(reason) => write!(f, "search task aborted: {reason}"),
        }
    }
}

type CallOutcome = std::result::Result<Vec<Hit>, CallFailure>;

pub struct QueryRouter {
    catalog: Arc<Catalog>,
    index: Arc<dyn IndexBackend>,
    settings: RouterSettings,
}

impl QueryRouter {
    pub fn new(catalog: Arc<Catalog>, index: Arc<dyn IndexBackend>, settings: RouterSettings) -> Self {
        Self {
            catalog,
            index,
            settings,
        }
    }

    /// Resolve a scope to `(corpus id, backend handle)` pairs, ascending.
    pub fn resolve(&self, scope: &Scope) -> Result<Vec<(CorpusId, String)>> {
        let filter = match scope {
            Scope::Single(id) => {
                let record = self.catalog.record_for(id)?;
                return Ok(vec![(record.id, record.backend_ref)]);
            }
            Scope::All => CorpusFilter::All,
            Scope::BySubject(subject) => CorpusFilter::BySubject(subject.clone()),
            Scope::ByCoordinate(pattern) => CorpusFilter::ByCoordinate(pattern.clone()),
        };

        let targets: Vec<(CorpusId, String)> = self
            .catalog
            .corpora_matching(&filter)?
            .into_iter()
            .filter_map(|id| {
                let corpus_ref = self.catalog.corpus_ref(id.as_str())?;
                Some((id, corpus_ref))
            })
            .collect();
        if targets.is_empty() {
            return Err(Error::EmptyScope {
                scope: scope.to_string(),
            });
        }
        Ok(targets)
    }

    pub async fn search(&self, query: &str, scope: &Scope) -> Result<SearchResponse> {
        self.search_with_cancel(query, scope, &CancellationToken::new())
            .await
    }

    pub async fn search_with_cancel(
        &self,
        query: &str,
        scope: &Scope,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        self.search_filtered(query, scope, &MetadataFilter::default(), cancel)
            .await
    }

    /// Search every corpus in `scope` concurrently, keeping only files
    /// whose metadata matches `filter`. Cancelling `cancel` aborts all
    /// in-flight calls and yields [`Error::Cancelled`].
    pub async fn search_filtered(
        &self,
        query: &str,
        scope: &Scope,
        filter: &MetadataFilter,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        let targets = self.resolve(scope)?;
        if query.trim().is_empty() {
            return Ok(SearchResponse::empty(query));
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let options = SearchOptions {
            top_k: match scope {
                Scope::Single(_) => self.settings.top_k_single,
                _ => self.settings.top_k_per_corpus,
            },
            distance_threshold: self.settings.distance_threshold,
            metadata_filter: filter.clone(),
        };
        tracing::debug!(
            %scope,
            targets = targets.len(),
            top_k = options.top_k,
            filter = %options.metadata_filter,
            "dispatching search"
        );

        // Dropping this future (or returning early) cancels every call.
        let calls = cancel.child_token();
        let _cancel_on_drop = calls.clone().drop_guard();

        let handles: Vec<(CorpusId, String, JoinHandle<CallOutcome>)> = targets
            .into_iter()
            .map(|(corpus_id, corpus_ref)| {
                let handle = tokio::spawn(search_one(
                    Arc::clone(&self.index),
                    corpus_ref.clone(),
                    query.to_string(),
                    options.clone(),
                    self.settings.per_call_timeout,
                    calls.child_token(),
                ));
                (corpus_id, corpus_ref, handle)
            })
            .collect();

        let mut response = SearchResponse::empty(query);
        let mut pages: BTreeMap<CorpusId, Vec<SearchResult>> = BTreeMap::new();
        let mut failures: Vec<TargetFailure> = Vec::new();

        for (corpus_id, corpus_ref, handle) in handles {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("search cancelled");
                    return Err(Error::Cancelled);
                }
                joined = handle => joined.unwrap_or_else(|e| Err(CallFailure::Aborted(e.to_string()))),
            };
            response.searched.push(corpus_id.clone());

            match outcome {
                Ok(hits) => {
                    let results = resolve_hits(&corpus_id, hits, &mut response.warnings);
                    pages.insert(corpus_id, results);
                }
                Err(CallFailure::Cancelled) if cancel.is_cancelled() => return Err(Error::Cancelled),
                Err(failure) => {
                    let reason = failure.to_string();
                    tracing::warn!(corpus = %corpus_id, corpus_ref = %corpus_ref, %reason, "corpus search failed");
                    response.warnings.push(SearchWarning::PartialFailure {
                        corpus_id: corpus_id.to_string(),
                        reason: reason.clone(),
                    });
                    failures.push(TargetFailure {
                        corpus_id: corpus_id.to_string(),
                        reason,
                    });
                }
            }
        }

        if pages.is_empty() && !failures.is_empty() {
            return Err(Error::AllTargetsFailed { failures });
        }

        response.results = aggregate::merge(&pages, self.settings.final_limit);
        Ok(response)
    }
}

async fn search_one(
    index: Arc<dyn IndexBackend>,
    corpus_ref: String,
    query: String,
    options: SearchOptions,
    timeout: Duration,
    token: CancellationToken,
) -> CallOutcome {
    tokio::select! {
        _ = token.cancelled() => Err(CallFailure::Cancelled),
        result = tokio::time::timeout(timeout, index.search_corpus(&corpus_ref, &query, &options)) => {
            match result {
                Ok(Ok(mut hits)) => {
                    hits.retain(|hit| {
                        hit.metadata.is_empty() || options.metadata_filter.matches(&hit.metadata)
                    });
                    Ok(hits)
                }
                Ok(Err(e)) => Err(CallFailure::Backend(e)),
                Err(_) => Err(CallFailure::TimedOut(timeout)),
            }
        }
    }
}

/// Map raw hits to results, dropping hits that do not belong to `corpus_id`.
fn resolve_hits(
    corpus_id: &CorpusId,
    hits: Vec<Hit>,
    warnings: &mut Vec<SearchWarning>,
) -> Vec<SearchResult> {
    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        let (base, page) = codec::split_page_fragment(&hit.uri);
        let resolved = codec::parse_location_uri(base).and_then(|location| {
            let coordinate = codec::decode_location(&location)?;
            Ok((location, coordinate))
        });
        match resolved {
            Ok((location, coordinate)) if &coordinate == corpus_id.coordinate() => {
                results.push(SearchResult {
                    corpus_id: corpus_id.clone(),
                    source_location: location,
                    snippet: hit.snippet,
                    score: hit.score,
                    chunk_ref: hit.chunk_ref,
                    page,
                });
            }
            Ok((_, coordinate)) => warnings.push(SearchWarning::UnresolvedHit {
                corpus_id: corpus_id.to_string(),
                uri: hit.uri.clone(),
                reason: format!("belongs to {}", codec::encode_corpus_id(&coordinate)),
            }),
            Err(e) => warnings.push(SearchWarning::UnresolvedHit {
                corpus_id: corpus_id.to_string(),
                uri: hit.uri.clone(),
                reason: e.to_string(),
            }),
        }
    }
    results
}
