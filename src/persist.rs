//! Snapshot persistence and the background housekeeping loop.
//!
//! The store is serialized to three JSON files in the data directory:
//!
//! | File | Contents |
//! |------|----------|
//! | `texts.json` | embedding hash → passage text |
//! | `content_hashes.json` | content hashes, append order |
//! | `embeddings.json` | normalized vectors, append order |
//!
//! Each file is written to a temporary sibling and renamed into place, so a
//! crash mid-write leaves the previous snapshot intact.
//!
//! Loading tolerates partial corruption: each file independently falls back
//! to empty, and the triple is then *reconstructed* row by row — the
//! embedding hash is recomputed from each stored vector and looked up in the
//! text mapping, so a missing or misaligned row is dropped instead of being
//! paired with the wrong text.
//!
//! The housekeeping loop snapshots on a fixed cadence and, when configured,
//! performs the weekly full reset. The reset fires from a precomputed
//! next-fire instant compared monotonically, never from re-matching
//! wall-clock fields, so it runs exactly once per weekly occurrence.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Days, NaiveTime, Utc, Weekday};
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::PersistenceConfig;
use crate::hash::embedding_hash;
use crate::store::{Record, StoreSnapshot, VectorStore};

const TEXTS_FILE: &str = "texts.json";
const CONTENT_HASHES_FILE: &str = "content_hashes.json";
const EMBEDDINGS_FILE: &str = "embeddings.json";

/// Load the store from the data directory, or empty defaults where files are
/// missing or unreadable. Never fails startup.
pub fn load(data_dir: &Path, dims: usize) -> VectorStore {
    let texts: std::collections::HashMap<String, String> =
        load_json_or_default(&data_dir.join(TEXTS_FILE));
    let content_hashes: Vec<u64> = load_json_or_default(&data_dir.join(CONTENT_HASHES_FILE));
    let embeddings: Vec<Vec<f64>> = load_json_or_default(&data_dir.join(EMBEDDINGS_FILE));

    let store = VectorStore::new(dims);

    // Coerce the triple down to the shortest consistent length rather than
    // trusting three independently-loaded files to agree.
    let usable = content_hashes.len().min(embeddings.len());
    if usable < content_hashes.len().max(embeddings.len()) {
        tracing::warn!(
            content_hashes = content_hashes.len(),
            embeddings = embeddings.len(),
            "persisted files disagree on length, truncating to {}",
            usable
        );
    }

    let mut dropped = 0usize;
    for (content_hash, vector) in content_hashes
        .into_iter()
        .zip(embeddings.into_iter())
        .take(usable)
    {
        if vector.len() != dims {
            dropped += 1;
            continue;
        }
        // Re-key the row from the vector itself: a row whose text is missing
        // from the mapping is dropped, never paired with the wrong text.
        let embedding_hash = embedding_hash(&vector);
        let Some(text) = texts.get(&embedding_hash) else {
            dropped += 1;
            continue;
        };
        let record = Record {
            content_hash,
            embedding_hash,
            text: text.clone(),
            vector,
        };
        match store.append(record) {
            Ok(true) => {}
            Ok(false) => dropped += 1,
            Err(e) => {
                tracing::warn!(error = %e, "dropping persisted row the store rejected");
                dropped += 1;
            }
        }
    }

    if dropped > 0 {
        tracing::warn!(dropped, "dropped inconsistent rows while loading snapshot");
    }
    tracing::info!(records = store.len(), path = %data_dir.display(), "store loaded");

    store
}

fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "snapshot file absent, starting empty");
            return T::default();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "snapshot file unreadable, using empty default");
            return T::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "snapshot file unparsable, using empty default");
            T::default()
        }
    }
}

/// Write a snapshot to the data directory.
///
/// Each file goes through write-to-temp-then-rename; a crash between renames
/// can mix one new file with two old ones, which the load-time reconstruction
/// already handles.
pub fn save(snapshot: &StoreSnapshot, data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("create data dir {}", data_dir.display()))?;

    write_atomic(&data_dir.join(TEXTS_FILE), &serde_json::to_vec(&snapshot.texts)?)?;
    write_atomic(
        &data_dir.join(CONTENT_HASHES_FILE),
        &serde_json::to_vec(&snapshot.content_hashes)?,
    )?;
    write_atomic(
        &data_dir.join(EMBEDDINGS_FILE),
        &serde_json::to_vec(&snapshot.embeddings)?,
    )?;

    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path)
        .with_context(|| format!("create temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("write {}", temp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("rename {} into place", temp_path.display()))?;
    Ok(())
}

/// The weekly reset schedule: a weekday plus a UTC time of day.
#[derive(Debug, Clone, Copy)]
pub struct ResetSchedule {
    weekday: Weekday,
    time: NaiveTime,
}

impl ResetSchedule {
    /// Build from config; `None` when no reset weekday is configured.
    /// Config validation has already checked both fields parse.
    pub fn from_config(config: &PersistenceConfig) -> Option<Self> {
        let weekday = config.reset_weekday.as_ref()?.parse::<Weekday>().ok()?;
        let time = NaiveTime::parse_from_str(&config.reset_time, "%H:%M:%S").ok()?;
        Some(Self { weekday, time })
    }

    /// The first scheduled instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        for offset in 0..=7 {
            let date = today + Days::new(offset);
            if date.weekday() == self.weekday {
                let candidate = date.and_time(self.time).and_utc();
                if candidate > now {
                    return candidate;
                }
            }
        }
        // Unreachable: one of the eight dates above matches the weekday with
        // an instant after `now`.
        today.and_time(self.time).and_utc()
    }
}

/// Background housekeeping: snapshot every tick, reset when the precomputed
/// fire instant passes. Runs until the process exits.
///
/// Snapshot failures are logged and retried on the next tick; they never
/// crash the service.
pub async fn run_housekeeping(
    store: Arc<VectorStore>,
    config: PersistenceConfig,
    data_dir: PathBuf,
) {
    let schedule = ResetSchedule::from_config(&config);
    let mut next_reset = schedule.map(|s| s.next_after(Utc::now()));
    if let Some(at) = next_reset {
        tracing::info!(at = %at, "weekly reset scheduled");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(config.snapshot_interval_secs.max(1)));

    loop {
        ticker.tick().await;

        if let (Some(schedule), Some(at)) = (schedule, next_reset) {
            if Utc::now() >= at {
                tracing::info!(records = store.len(), "scheduled weekly reset, clearing store");
                store.reset();
                next_reset = Some(schedule.next_after(Utc::now()));
            }
        }

        if let Err(e) = save(&store.snapshot(), &data_dir) {
            tracing::warn!(error = %e, "snapshot write failed, will retry next tick");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::l2_normalize;
    use crate::hash::text_hash;
    use chrono::TimeZone;

    fn record(text: &str, mut vector: Vec<f64>) -> Record {
        l2_normalize(&mut vector);
        Record {
            content_hash: text_hash(text),
            embedding_hash: embedding_hash(&vector),
            text: text.to_string(),
            vector,
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(2);
        store.append(record("first", vec![1.0, 0.0])).unwrap();
        store.append(record("second", vec![0.0, 1.0])).unwrap();

        save(&store.snapshot(), dir.path()).unwrap();
        let loaded = load(dir.path(), 2);

        assert_eq!(loaded.len(), 2);
        let records = loaded.iterate();
        assert_eq!(records[0].text, "first");
        assert_eq!(records[1].text, "second");
        assert_eq!(records[0].content_hash, text_hash("first"));
    }

    #[test]
    fn test_load_missing_dir_gives_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(&dir.path().join("nonexistent"), 2);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_tolerates_corrupt_embeddings_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(2);
        store.append(record("survivor", vec![1.0, 0.0])).unwrap();
        save(&store.snapshot(), dir.path()).unwrap();

        std::fs::write(dir.path().join(EMBEDDINGS_FILE), b"not json at all").unwrap();

        // The vector file degrades to empty; the store is usable, just empty.
        let loaded = load(dir.path(), 2);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_drops_rows_missing_from_text_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(2);
        store.append(record("kept", vec![1.0, 0.0])).unwrap();
        store.append(record("lost", vec![0.0, 1.0])).unwrap();

        let mut snapshot = store.snapshot();
        snapshot.texts.remove(&embedding_hash(&[0.0, 1.0]));
        save(&snapshot, dir.path()).unwrap();

        let loaded = load(dir.path(), 2);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.iterate()[0].text, "kept");
    }

    #[test]
    fn test_load_coerces_misaligned_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(2);
        store.append(record("aligned", vec![1.0, 0.0])).unwrap();

        let mut snapshot = store.snapshot();
        // An extra orphan hash with no matching vector row.
        snapshot.content_hashes.push(12345);
        save(&snapshot, dir.path()).unwrap();

        let loaded = load(dir.path(), 2);
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_load_skips_wrong_dimensionality() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(3);
        store.append(record("3d", vec![1.0, 0.0, 0.0])).unwrap();
        save(&store.snapshot(), dir.path()).unwrap();

        // Reload expecting 2-dimensional vectors: the row is unusable.
        let loaded = load(dir.path(), 2);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(2);
        store.append(record("x", vec![1.0, 0.0])).unwrap();
        save(&store.snapshot(), dir.path()).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_next_reset_lands_on_configured_weekday() {
        let schedule = ResetSchedule {
            weekday: Weekday::Sun,
            time: NaiveTime::from_hms_opt(4, 30, 0).unwrap(),
        };
        // 2024-01-01 is a Monday.
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = schedule.next_after(now);

        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 7, 4, 30, 0).unwrap());
    }

    #[test]
    fn test_next_reset_fires_once_per_week() {
        let schedule = ResetSchedule {
            weekday: Weekday::Sun,
            time: NaiveTime::from_hms_opt(4, 30, 0).unwrap(),
        };
        let first = Utc.with_ymd_and_hms(2024, 1, 7, 4, 30, 0).unwrap();
        // Recomputing from the fire instant must skip a full week, not
        // re-match within the same window.
        let next = schedule.next_after(first);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 14, 4, 30, 0).unwrap());
    }

    #[test]
    fn test_next_reset_same_day_before_and_after_time() {
        let schedule = ResetSchedule {
            weekday: Weekday::Sun,
            time: NaiveTime::from_hms_opt(4, 30, 0).unwrap(),
        };
        let sunday_early = Utc.with_ymd_and_hms(2024, 1, 7, 3, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(sunday_early),
            Utc.with_ymd_and_hms(2024, 1, 7, 4, 30, 0).unwrap()
        );

        let sunday_late = Utc.with_ymd_and_hms(2024, 1, 7, 5, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(sunday_late),
            Utc.with_ymd_and_hms(2024, 1, 14, 4, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_schedule_from_config() {
        let config = PersistenceConfig {
            snapshot_interval_secs: 300,
            reset_weekday: Some("sun".to_string()),
            reset_time: "04:30:00".to_string(),
        };
        assert!(ResetSchedule::from_config(&config).is_some());

        let disabled = PersistenceConfig::default();
        assert!(ResetSchedule::from_config(&disabled).is_none());
    }
}
