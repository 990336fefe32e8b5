//! Chunked, retried, cancellable bulk deletes.
//!
//! Internal ids are deleted in atomic batches, so a chunk succeeds or fails
//! as a whole. External ids are deleted one request at a time with their own
//! retry budget and a pause between requests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::app::{PostdeckError, Result};
use crate::domain::{require_elevated, require_user, CurrentUser, DeleteProgress};
use crate::external::ExternalPostStore;
use crate::remote::RemotePostStore;

pub const DEFAULT_INTERNAL_CHUNK: usize = 400;
pub const DEFAULT_EXTERNAL_CHUNK: usize = 20;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Cooperative cancellation flag shared between a job and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_backoff: Duration,
    /// Pause between consecutive external requests.
    pub request_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_millis(200),
            request_delay: Duration::from_millis(150),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_backoff.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkDeleteRequest {
    pub ids: Vec<String>,
    pub is_external: bool,
    pub chunk_size: usize,
    pub concurrency_hint: usize,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub progress: DeleteProgress,
    pub succeeded_ids: Vec<String>,
    /// Ids never attempted because the job was cancelled.
    pub unprocessed: Vec<String>,
    pub cancelled: bool,
}

enum ChunkResult {
    Deleted(Vec<String>),
    Failed(Vec<String>, String),
    Skipped(Vec<String>),
}

pub type ProgressFn<'a> = &'a (dyn Fn(&DeleteProgress) + Send + Sync);

pub struct BulkDeleteCoordinator {
    remote: Arc<RemotePostStore>,
    external: Arc<ExternalPostStore>,
    policy: RetryPolicy,
}

impl BulkDeleteCoordinator {
    pub fn new(
        remote: Arc<RemotePostStore>,
        external: Arc<ExternalPostStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            remote,
            external,
            policy,
        }
    }

    /// Delete `request.ids`, reporting progress after every chunk or item.
    ///
    /// Partial failure is reported through the outcome. The call only fails
    /// when the user may not start the job, or when it was cancelled before
    /// a single id was processed.
    pub async fn delete_in_batches(
        &self,
        user: Option<&CurrentUser>,
        request: BulkDeleteRequest,
        cancel: &CancelSignal,
        on_progress: ProgressFn<'_>,
    ) -> Result<DeleteOutcome> {
        if request.is_external {
            require_elevated(user)?;
        } else {
            require_user(user)?;
        }

        let mut seen = HashSet::new();
        let ids: Vec<String> = request
            .ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let mut outcome = DeleteOutcome {
            progress: DeleteProgress::started(ids.len()),
            ..Default::default()
        };
        on_progress(&outcome.progress);

        if request.is_external {
            self.delete_external(user, ids, &request, cancel, &mut outcome, on_progress)
                .await;
        } else {
            self.delete_internal(ids, &request, cancel, &mut outcome, on_progress)
                .await;
        }

        outcome.progress.finish();
        on_progress(&outcome.progress);

        info!(
            "Bulk delete finished: {} succeeded, {} failed, {} unprocessed",
            outcome.progress.succeeded,
            outcome.progress.failed,
            outcome.unprocessed.len()
        );

        if outcome.cancelled && outcome.progress.processed == 0 {
            return Err(PostdeckError::Cancelled);
        }
        Ok(outcome)
    }

    async fn delete_internal(
        &self,
        ids: Vec<String>,
        request: &BulkDeleteRequest,
        cancel: &CancelSignal,
        outcome: &mut DeleteOutcome,
        on_progress: ProgressFn<'_>,
    ) {
        let chunk_size = request.chunk_size.clamp(1, self.remote.max_batch_size());
        let chunks: Vec<Vec<String>> = ids.chunks(chunk_size).map(|c| c.to_vec()).collect();
        let max_retries = request.max_retries;

        let mut results = stream::iter(chunks)
            .map(|chunk| self.delete_chunk(chunk, max_retries, cancel))
            .buffer_unordered(request.concurrency_hint.max(1));

        while let Some(result) = results.next().await {
            match result {
                ChunkResult::Deleted(chunk) => {
                    outcome.progress.record_success(chunk.len());
                    outcome.succeeded_ids.extend(chunk);
                }
                ChunkResult::Failed(chunk, reason) => {
                    for id in chunk {
                        outcome.progress.record_failure(id, reason.clone());
                    }
                }
                ChunkResult::Skipped(chunk) => {
                    outcome.cancelled = true;
                    outcome.unprocessed.extend(chunk);
                    continue;
                }
            }
            on_progress(&outcome.progress);
        }
    }

    async fn delete_chunk(
        &self,
        chunk: Vec<String>,
        max_retries: u32,
        cancel: &CancelSignal,
    ) -> ChunkResult {
        if cancel.is_cancelled() {
            return ChunkResult::Skipped(chunk);
        }

        let mut attempt = 0;
        loop {
            match self.remote.delete_batch(&chunk).await {
                Ok(()) => return ChunkResult::Deleted(chunk),
                Err(e) if attempt < max_retries => {
                    let wait = self.policy.backoff(attempt);
                    warn!(
                        "Batch of {} failed ({}), retrying in {:?}",
                        chunk.len(),
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "Batch of {} failed after {} attempts: {}",
                        chunk.len(),
                        attempt + 1,
                        e
                    );
                    return ChunkResult::Failed(chunk, e.to_string());
                }
            }
        }
    }

    async fn delete_external(
        &self,
        user: Option<&CurrentUser>,
        ids: Vec<String>,
        request: &BulkDeleteRequest,
        cancel: &CancelSignal,
        outcome: &mut DeleteOutcome,
        on_progress: ProgressFn<'_>,
    ) {
        let chunk_size = request.chunk_size.max(1);
        let mut remaining = ids.as_slice();
        let mut first = true;

        for chunk in ids.chunks(chunk_size) {
            for id in chunk {
                if cancel.is_cancelled() {
                    outcome.cancelled = true;
                    outcome.unprocessed.extend(remaining.iter().cloned());
                    return;
                }
                if !first {
                    tokio::time::sleep(self.policy.request_delay).await;
                }
                first = false;
                remaining = &remaining[1..];

                match self.delete_item(user, id, request.max_retries).await {
                    Ok(()) => {
                        outcome.progress.record_success(1);
                        outcome.succeeded_ids.push(id.clone());
                    }
                    Err(e) => outcome.progress.record_failure(id.clone(), e.to_string()),
                }
                on_progress(&outcome.progress);
            }
            debug!(
                "External chunk done, {}/{} processed",
                outcome.progress.processed, outcome.progress.total
            );
        }
    }

    async fn delete_item(
        &self,
        user: Option<&CurrentUser>,
        id: &str,
        max_retries: u32,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.external.delete_one(user, id).await {
                Ok(()) => return Ok(()),
                Err(e @ PostdeckError::Unauthorized(_)) => return Err(e),
                Err(e) if attempt < max_retries => {
                    let wait = self.policy.backoff(attempt);
                    warn!("Delete of {} failed ({}), retrying in {:?}", id, e, wait);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("Delete of {} failed after {} attempts: {}", id, attempt + 1, e);
                    return Err(e);
                }
            }
        }
    }
}
