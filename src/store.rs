//! In-memory record of recent analyses, keyed by analysis id.
//!
//! Lets a client accept suggestions by index after an analysis without sending
//! the protocol text back. Entries expire and their number is bounded; nothing
//! survives a restart.

use crate::config::Settings;
use crate::domain::model::{AnalysisReport, Suggestion};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredAnalysis {
    pub original_text: String,
    pub filename: String,
    pub report: AnalysisReport,
}

impl StoredAnalysis {
    pub fn new(original_text: String, filename: String, report: AnalysisReport) -> Self {
        Self {
            original_text,
            filename,
            report,
        }
    }

    /// Suggestions at the given indices, in index order. Out-of-range indices
    /// are skipped and duplicates count once.
    pub fn select(&self, indices: &[usize]) -> Vec<Suggestion> {
        let mut indices: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i < self.report.suggestions.len())
            .collect();
        indices.sort_unstable();
        indices.dedup();

        indices
            .into_iter()
            .map(|i| self.report.suggestions[i].clone())
            .collect()
    }
}

struct Entry {
    analysis: StoredAnalysis,
    inserted_at: Instant,
    // 同一時刻插入時仍能分出先後
    sequence: usize,
}

impl Entry {
    fn is_live(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

#[derive(Clone)]
pub struct SuggestionStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: Duration,
    max_entries: usize,
    analyses: Arc<AtomicUsize>,
}

impl SuggestionStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            max_entries: max_entries.max(1),
            analyses: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.store_ttl(), settings.store_max_entries())
    }

    /// Stores an analysis and returns its new id.
    pub async fn insert(&self, analysis: StoredAnalysis) -> String {
        let id = Uuid::new_v4().to_string();
        let mut entries = self.entries.write().await;

        let ttl = self.ttl;
        entries.retain(|_, entry| entry.is_live(ttl));

        while entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.sequence)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    tracing::debug!("Evicting analysis {} from store", key);
                    entries.remove(&key);
                }
                None => break,
            }
        }

        let sequence = self.analyses.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            id.clone(),
            Entry {
                analysis,
                inserted_at: Instant::now(),
                sequence,
            },
        );
        id
    }

    /// Expired entries are reported as absent.
    pub async fn get(&self, id: &str) -> Option<StoredAnalysis> {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .filter(|entry| entry.is_live(self.ttl))
            .map(|entry| entry.analysis.clone())
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|entry| entry.is_live(self.ttl))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Analyses stored since startup, including evicted ones.
    pub fn total_analyses(&self) -> usize {
        self.analyses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::sample_suggestion;
    use crate::domain::model::{AnalysisMetadata, Priority};

    fn stored(text: &str, suggestions: Vec<Suggestion>) -> StoredAnalysis {
        StoredAnalysis::new(
            text.to_string(),
            "pcr.pdf".to_string(),
            AnalysisReport {
                summary: "ok".to_string(),
                overall_score: None,
                total_issues: suggestions.len(),
                suggestions,
                metadata: AnalysisMetadata {
                    filename: "pcr.pdf".to_string(),
                    model_used: "scripted-model".to_string(),
                    protocol_length: text.chars().count(),
                    tokens_used: 0,
                },
            },
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SuggestionStore::new(Duration::from_secs(60), 10);
        let id = store.insert(stored("1. Mix", vec![])).await;

        let entry = store.get(&id).await.unwrap();
        assert_eq!(entry.original_text, "1. Mix");
        assert!(store.get("missing").await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_oldest_entry_is_evicted() {
        let store = SuggestionStore::new(Duration::from_secs(60), 2);
        let first = store.insert(stored("first", vec![])).await;
        let second = store.insert(stored("second", vec![])).await;
        let third = store.insert(stored("third", vec![])).await;

        assert!(store.get(&first).await.is_none());
        assert!(store.get(&second).await.is_some());
        assert!(store.get(&third).await.is_some());
        assert_eq!(store.total_analyses(), 3);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_absent() {
        let store = SuggestionStore::new(Duration::ZERO, 10);
        let id = store.insert(stored("gone", vec![])).await;

        assert!(store.get(&id).await.is_none());
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_select_ignores_out_of_range_and_duplicates() {
        let entry = stored(
            "text",
            vec![
                sample_suggestion(Priority::High, "Step 1", "a"),
                sample_suggestion(Priority::Medium, "Step 2", "b"),
                sample_suggestion(Priority::Low, "Step 3", "c"),
            ],
        );

        let selected = entry.select(&[2, 0, 2, 7]);
        let locations: Vec<&str> = selected.iter().map(|s| s.location.as_str()).collect();
        assert_eq!(locations, vec!["Step 1", "Step 3"]);
        assert!(entry.select(&[]).is_empty());
    }
}
