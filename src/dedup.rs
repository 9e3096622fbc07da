//! Ingestion deduplication policy.
//!
//! Applied in order:
//! 1. Structural exclusion — boilerplate sections of source documents
//!    ("see also" blocks, trailing markup headings) are rejected outright.
//! 2. Content-hash check — skips exact-duplicate raw text before paying for
//!    an embedding call.
//! 3. Embedding-hash check (after the embedding exists) — catches textual
//!    variants (whitespace, punctuation) that hash differently at the content
//!    level but map to an identical embedding.
//!
//! Stage 2 alone is insufficient: the extra provider call bought by stage 3
//! is the price of catching near-duplicate raw text.

use crate::hash::text_hash;
use crate::store::VectorStore;

/// Section marker opening a "see also" block.
pub const SEE_ALSO_MARKER: &str = "== See also ==\n";

/// Markup heading delimiter; text ending with it is a bare section heading.
pub const HEADING_DELIMITER: &str = "==";

/// Outcome of the pre-embedding checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreCheck {
    /// Structural exclusion or known content hash; do not embed.
    Skip,
    /// Unseen so far; proceed to the embedding call.
    Proceed { content_hash: u64 },
}

/// True for boilerplate text that is never worth indexing.
pub fn is_excluded(text: &str) -> bool {
    text.starts_with(SEE_ALSO_MARKER) || text.ends_with(HEADING_DELIMITER)
}

/// Stages 1 and 2: structural exclusion, then the cheap content-hash check.
pub fn precheck(text: &str, store: &VectorStore) -> PreCheck {
    if is_excluded(text) {
        return PreCheck::Skip;
    }
    let content_hash = text_hash(text);
    if store.contains_content_hash(content_hash) {
        return PreCheck::Skip;
    }
    PreCheck::Proceed { content_hash }
}

/// Stage 3: with the embedding computed, skip if the store already holds an
/// identical one.
pub fn is_duplicate_embedding(embedding_hash: &str, store: &VectorStore) -> bool {
    store.contains_embedding_hash(embedding_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::embedding_hash;
    use crate::store::Record;

    #[test]
    fn test_exclusion_markers() {
        assert!(is_excluded("== See also ==\n* Related article"));
        assert!(is_excluded("== History =="));
        assert!(is_excluded("Trailing heading\n\n== Notes =="));
        assert!(!is_excluded("A normal passage about something."));
        // The marker must open the text, not merely appear in it.
        assert!(!is_excluded("Intro.\n== See also ==\nmore"));
    }

    #[test]
    fn test_precheck_skips_seen_content() {
        let store = VectorStore::new(2);
        let text = "a passage";
        store
            .append(Record {
                content_hash: text_hash(text),
                embedding_hash: embedding_hash(&[1.0, 0.0]),
                text: text.to_string(),
                vector: vec![1.0, 0.0],
            })
            .unwrap();

        assert_eq!(precheck(text, &store), PreCheck::Skip);
        assert!(matches!(
            precheck("a different passage", &store),
            PreCheck::Proceed { .. }
        ));
    }

    #[test]
    fn test_precheck_skips_excluded_before_hashing() {
        let store = VectorStore::new(2);
        assert_eq!(precheck("== See also ==\nlinks", &store), PreCheck::Skip);
    }

    #[test]
    fn test_duplicate_embedding_detection() {
        let store = VectorStore::new(2);
        let vector = vec![0.0, 1.0];
        let hash = embedding_hash(&vector);
        store
            .append(Record {
                content_hash: text_hash("original"),
                embedding_hash: hash.clone(),
                text: "original".to_string(),
                vector,
            })
            .unwrap();

        assert!(is_duplicate_embedding(&hash, &store));
        assert!(!is_duplicate_embedding(&embedding_hash(&[1.0, 0.0]), &store));
    }
}
