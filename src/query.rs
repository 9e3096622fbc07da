//! Similarity query engine.
//!
//! Exact linear scan over the store: every record is scored with cosine
//! distance (`1 - dot` on unit vectors), filtered by a relevance threshold,
//! sorted ascending with ties broken by insertion order, stripped of
//! heading-style boilerplate that got past ingestion, and assembled under a
//! result-count cap and a cumulative token budget.
//!
//! Token counts use the ~4-chars-per-token approximation; an exact tokenizer
//! is not worth a model-specific dependency for a budget heuristic.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::{cosine_distance, l2_normalize, EmbeddingProvider};
use crate::error::StoreError;
use crate::store::{Record, VectorStore};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Heading-style prefix; candidates starting with it are dropped from results
/// regardless of how they got past ingestion.
const HEADING_PREFIX: &str = "== ";

/// Estimate the token cost of a passage.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Rank stored records against a unit-normalized query vector and assemble
/// the bounded result list. Returns passage texts, closest first; may be
/// empty.
pub fn rank_passages(
    records: &[Arc<Record>],
    query_vec: &[f64],
    retrieval: &RetrievalConfig,
) -> Vec<String> {
    let mut candidates: Vec<(f64, &Arc<Record>)> = records
        .iter()
        .map(|r| (cosine_distance(query_vec, &r.vector), r))
        .filter(|(distance, _)| *distance <= retrieval.distance_threshold)
        .collect();

    // Stable sort: equal distances keep insertion order.
    candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut results = Vec::new();
    let mut spent_tokens = 0usize;

    for (_, record) in candidates {
        if results.len() >= retrieval.max_results {
            break;
        }
        if record.text.starts_with(HEADING_PREFIX) {
            continue;
        }
        let cost = estimate_tokens(&record.text);
        // A candidate that would overflow the budget ends assembly; it is
        // never truncated to fit.
        if spent_tokens + cost > retrieval.token_budget {
            break;
        }
        spent_tokens += cost;
        results.push(record.text.clone());
    }

    results
}

/// Embed a query text and rank the store against it.
///
/// A provider failure aborts this request only; an empty store yields an
/// empty result, not an error.
pub async fn run_query(
    store: &VectorStore,
    provider: &dyn EmbeddingProvider,
    retrieval: &RetrievalConfig,
    text: &str,
) -> Result<Vec<String>, StoreError> {
    if text.trim().is_empty() {
        return Err(StoreError::Validation(
            "query text must not be empty".to_string(),
        ));
    }

    let mut query_vec = provider.embed(text).await?;
    l2_normalize(&mut query_vec);

    Ok(rank_passages(&store.iterate(), &query_vec, retrieval))
}
