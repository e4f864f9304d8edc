//! Undo log for values-store writes made inside a metadata transaction.
//!
//! The values store cannot join the metadata transaction, so every mutation
//! made through the journal first records the prior state of the touched
//! paths. On failure the journal replays those records newest first; on
//! success it is discarded. A journal dropped while still holding records
//! (the operation future was cancelled) schedules the same replay on the
//! current runtime.

use std::collections::BTreeMap;
use std::sync::Arc;

use rtc_client::Value;
use tokio::runtime::Handle;
use tracing::{error, warn};

use crate::defaults::MAX_BATCH_SIZE;
use crate::store::{ValuesResult, ValuesStore, key_of};

type PriorState = Vec<(String, Option<Value>)>;

/// Records prior values so a failed operation can restore the values store.
pub struct ValuesJournal {
    store: Arc<dyn ValuesStore>,
    undo: Vec<PriorState>,
}

impl ValuesJournal {
    /// Start an empty journal over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ValuesStore>) -> Self {
        Self {
            store,
            undo: Vec::new(),
        }
    }

    /// Number of recorded mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.undo.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Write `entries`, recording what they replace.
    ///
    /// # Errors
    ///
    /// Returns the store error; nothing stays recorded when the write fails.
    pub async fn set_values(&mut self, entries: BTreeMap<String, Value>) -> ValuesResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let paths: Vec<String> = entries.keys().cloned().collect();
        let prior = self.capture(&paths).await?;
        // Recorded before the write so a cancelled write is still undone.
        self.undo.push(prior);
        if let Err(err) = self.store.set_values(&entries).await {
            self.undo.pop();
            return Err(err);
        }
        Ok(())
    }

    /// Delete `paths`, recording their values.
    ///
    /// # Errors
    ///
    /// Returns the store error; nothing stays recorded when the delete fails.
    pub async fn delete_values(&mut self, paths: Vec<String>) -> ValuesResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let prior = self.capture(&paths).await?;
        self.undo.push(prior);
        if let Err(err) = self.store.delete_values(&paths).await {
            self.undo.pop();
            return Err(err);
        }
        Ok(())
    }

    /// Delete everything under `prefix`, recording what was there.
    ///
    /// # Errors
    ///
    /// Returns the store error; nothing stays recorded when the delete fails.
    pub async fn delete_values_by_path(&mut self, prefix: &str) -> ValuesResult<()> {
        let existing = self.store.entries_by_path(prefix).await?;
        self.undo.push(
            existing
                .into_iter()
                .map(|(path, value)| (path, Some(value)))
                .collect(),
        );
        if let Err(err) = self.store.delete_values_by_path(prefix).await {
            self.undo.pop();
            return Err(err);
        }
        Ok(())
    }

    /// Discard the journal after a successful commit.
    pub fn commit(mut self) {
        self.undo.clear();
    }

    /// Restore every recorded path to its prior state, newest mutation first.
    ///
    /// Restores are split into store-sized batches. Failures are logged and
    /// the remaining steps still run. A record is dropped only once it has
    /// been replayed, so cancelling this future leaves the rest to `Drop`.
    pub async fn rollback(mut self) {
        while let Some(prior) = self.undo.last() {
            restore(self.store.as_ref(), prior).await;
            self.undo.pop();
        }
    }

    async fn capture(&self, paths: &[String]) -> ValuesResult<PriorState> {
        // Reads decode paths to their final segment, so query one parent at a time.
        let mut by_parent: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for path in paths {
            let parent = path.rsplit_once('/').map_or("", |(parent, _)| parent);
            by_parent.entry(parent).or_default().push(path.clone());
        }

        let mut prior = Vec::with_capacity(paths.len());
        for group in by_parent.into_values() {
            for chunk in group.chunks(MAX_BATCH_SIZE) {
                let found = self.store.values(chunk).await?;
                for path in chunk {
                    let value = found.get(key_of(path)).cloned();
                    prior.push((path.clone(), value));
                }
            }
        }
        Ok(prior)
    }
}

async fn restore(store: &dyn ValuesStore, prior: &PriorState) {
    let mut remove = Vec::new();
    let mut restore = Vec::new();
    for (path, value) in prior {
        match value {
            Some(value) => restore.push((path.clone(), value.clone())),
            None => remove.push(path.clone()),
        }
    }
    for chunk in remove.chunks(MAX_BATCH_SIZE) {
        if let Err(err) = store.delete_values(chunk).await {
            error!(error = %err, paths = chunk.len(), "failed to remove values during rollback");
        }
    }
    for chunk in restore.chunks(MAX_BATCH_SIZE) {
        let entries: BTreeMap<String, Value> = chunk.iter().cloned().collect();
        if let Err(err) = store.set_values(&entries).await {
            error!(error = %err, paths = entries.len(), "failed to restore values during rollback");
        }
    }
}

impl Drop for ValuesJournal {
    fn drop(&mut self) {
        if self.undo.is_empty() {
            return;
        }
        let mut undo = std::mem::take(&mut self.undo);
        let store = Arc::clone(&self.store);
        match Handle::try_current() {
            Ok(handle) => {
                warn!(
                    mutations = undo.len(),
                    "operation cancelled after writing values; restoring"
                );
                handle.spawn(async move {
                    while let Some(prior) = undo.pop() {
                        restore(store.as_ref(), &prior).await;
                    }
                });
            }
            Err(_) => {
                error!(
                    mutations = undo.len(),
                    "values journal dropped outside a runtime; values not restored"
                );
            }
        }
    }
}

impl std::fmt::Debug for ValuesJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValuesJournal")
            .field("recorded", &self.undo.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryValuesStore;
    use crate::store::ValuesStore;

    fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(path, value)| ((*path).to_string(), Value::from(*value)))
            .collect()
    }

    #[tokio::test]
    async fn rollback_restores_overwritten_and_removes_created_values() {
        let store = Arc::new(MemoryValuesStore::new("rtc"));
        store
            .set_values(&entries(&[("p/e/r/a", "1"), ("p/e/r/b", "2")]))
            .await
            .unwrap();

        let mut journal = ValuesJournal::new(store.clone());
        journal
            .set_values(entries(&[("p/e/r/a", "10"), ("p/e/r/c", "30")]))
            .await
            .unwrap();
        journal.delete_values(vec!["p/e/r/b".into()]).await.unwrap();
        assert_eq!(journal.len(), 2);
        journal.rollback().await;

        let restored = store.values_by_path("p/e/r/").await.unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored["a"].string(), "1");
        assert_eq!(restored["b"].string(), "2");
        assert!(!restored.contains_key("c"));
    }

    #[tokio::test]
    async fn rollback_restores_prefix_deletes_across_releases() {
        let store = Arc::new(MemoryValuesStore::new("rtc"));
        store
            .set_values(&entries(&[("p/e/r1/k", "1"), ("p/e/r2/k", "2")]))
            .await
            .unwrap();

        let mut journal = ValuesJournal::new(store.clone());
        journal.delete_values_by_path("p/").await.unwrap();
        assert!(store.entries_by_path("p/").await.unwrap().is_empty());
        journal.rollback().await;

        let restored = store.entries_by_path("p/").await.unwrap();
        assert_eq!(
            restored,
            vec![
                ("p/e/r1/k".to_string(), Value::from("1")),
                ("p/e/r2/k".to_string(), Value::from("2")),
            ]
        );
    }

    #[tokio::test]
    async fn committed_journal_leaves_values_in_place() {
        let store = Arc::new(MemoryValuesStore::new("rtc"));
        let mut journal = ValuesJournal::new(store.clone());
        journal.set_values(entries(&[("p/e/r/a", "1")])).await.unwrap();
        journal.commit();
        tokio::task::yield_now().await;
        assert_eq!(store.values_by_path("p/e/r/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rollback_of_large_prefix_delete_restores_in_batches() {
        let store = Arc::new(MemoryValuesStore::new("rtc"));
        for release in 0..3 {
            let batch: BTreeMap<String, Value> = (0..100)
                .map(|index| (format!("p/e/r{release}/k{index}"), Value::from("v")))
                .collect();
            store.set_values(&batch).await.unwrap();
        }

        let mut journal = ValuesJournal::new(store.clone());
        journal.delete_values_by_path("p/").await.unwrap();
        journal.rollback().await;
        assert_eq!(store.entries_by_path("p/").await.unwrap().len(), 300);
    }

    #[tokio::test]
    async fn dropped_journal_restores_values_in_the_background() {
        let store = Arc::new(MemoryValuesStore::new("rtc"));
        store
            .set_values(&entries(&[("p/e/r/a", "1")]))
            .await
            .unwrap();

        let mut journal = ValuesJournal::new(store.clone());
        journal
            .set_values(entries(&[("p/e/r/a", "2"), ("p/e/r/b", "3")]))
            .await
            .unwrap();
        drop(journal);

        let mut restored = store.values_by_path("p/e/r/").await.unwrap();
        for _ in 0..100 {
            if restored.len() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            restored = store.values_by_path("p/e/r/").await.unwrap();
        }
        assert_eq!(restored.len(), 1);
        assert_eq!(restored["a"].string(), "1");
    }
}
