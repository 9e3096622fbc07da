//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow for a batch of passages: input set-dedup → structural
//! exclusion and content-hash precheck → embedding call → embedding-hash
//! check → store append. The whole batch runs under a wall-clock time budget,
//! checked cooperatively between candidates; an in-flight provider call is
//! never cancelled, it just consumes budget.
//!
//! Per-item provider failures are logged and skipped — they never abort the
//! rest of the batch.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::dedup::{self, PreCheck};
use crate::embedding::{l2_normalize, EmbeddingProvider};
use crate::hash::embedding_hash;
use crate::store::{Record, VectorStore};

/// Counters for one ingestion batch. Partial completion (`out_of_time`) is a
/// normal outcome, not an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestOutcome {
    /// Records actually committed to the store.
    pub added: usize,
    /// Candidates skipped by dedup or structural exclusion.
    pub skipped: usize,
    /// Candidates that failed at the provider or the store.
    pub failed: usize,
    /// True when the time budget expired before the batch was exhausted.
    pub out_of_time: bool,
}

/// Ingest a batch of texts under a wall-clock time budget.
///
/// Exact-duplicate input strings collapse before processing (set semantics,
/// first-seen order preserved). Returns counts reflecting only work committed
/// before the budget ran out.
pub async fn ingest_batch(
    store: &VectorStore,
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    time_budget: Duration,
) -> IngestOutcome {
    let started = Instant::now();
    let mut outcome = IngestOutcome::default();

    let mut seen: HashSet<&str> = HashSet::with_capacity(texts.len());
    let candidates: Vec<&String> = texts.iter().filter(|t| seen.insert(t.as_str())).collect();

    for text in candidates {
        if started.elapsed() >= time_budget {
            tracing::info!(
                added = outcome.added,
                "ingestion time budget exhausted, stopping batch early"
            );
            outcome.out_of_time = true;
            break;
        }

        let content_hash = match dedup::precheck(text, store) {
            PreCheck::Skip => {
                outcome.skipped += 1;
                continue;
            }
            PreCheck::Proceed { content_hash } => content_hash,
        };

        let mut vector = match provider.embed(text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, skipping item");
                outcome.failed += 1;
                continue;
            }
        };
        l2_normalize(&mut vector);

        let embedding_hash = embedding_hash(&vector);
        if dedup::is_duplicate_embedding(&embedding_hash, store) {
            outcome.skipped += 1;
            continue;
        }

        let record = Record {
            content_hash,
            embedding_hash,
            text: text.clone(),
            vector,
        };

        match store.append(record) {
            Ok(true) => outcome.added += 1,
            // Lost an append race against a concurrent batch.
            Ok(false) => outcome.skipped += 1,
            Err(e) => {
                tracing::error!(error = %e, "store rejected record");
                outcome.failed += 1;
            }
        }
    }

    outcome
}
