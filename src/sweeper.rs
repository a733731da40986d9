//! Bulk deletion sweeps.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::config::{DeletionCriteria, RetryPolicy};
use crate::error::SyncResult;
use crate::retry::retry;
use crate::store::{self, ObjectStore};
use crate::types::{KeyFailure, SweepReport};

/// Concurrent deletes within one sweep.
const DELETE_CONCURRENCY: usize = 8;

/// Lists and deletes objects matching a prefix and age cutoff.
pub struct DeletionSweeper {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl DeletionSweeper {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(store: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Deletes every object under the prefix whose last-modified time is
    /// strictly older than the cutoff (no cutoff means everything is
    /// eligible). Per-key failures do not stop the sweep; the report lists
    /// exactly the keys that were removed, with failures collected
    /// separately so callers can still invalidate downstream caches for
    /// the succeeded set.
    pub async fn delete_all(&self, criteria: &DeletionCriteria) -> SyncResult<SweepReport> {
        let entries = store::list_all(self.store.as_ref(), &criteria.prefix).await?;
        let eligible: Vec<String> = entries
            .into_iter()
            .filter(|e| criteria.cutoff.map_or(true, |cutoff| e.last_modified < cutoff))
            .map(|e| e.key)
            .collect();

        debug!(
            "sweeping {} of the objects under prefix {:?}",
            eligible.len(),
            criteria.prefix
        );

        let results = stream::iter(eligible)
            .map(|key| {
                let store = self.store.clone();
                let policy = self.retry.clone();
                async move {
                    let outcome = retry(&policy, "delete", &key, || {
                        let store = store.clone();
                        let key = key.clone();
                        async move { store.delete_object(&key, None).await }
                    })
                    .await;
                    (key, outcome)
                }
            })
            .buffer_unordered(DELETE_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        let mut report = SweepReport::default();
        for (key, outcome) in results {
            match outcome {
                Ok(()) => report.deleted.push(key),
                Err(error) => {
                    warn!("sweep failed to delete {key}: {error}");
                    report.failed.push(KeyFailure { key, error });
                }
            }
        }
        report.deleted.sort_unstable();
        Ok(report)
    }
}
