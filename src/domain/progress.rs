use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub id: String,
    pub reason: String,
}

/// Running tally of a bulk delete.
///
/// `succeeded + failed == processed <= total` holds after every update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteProgress {
    pub running: bool,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_items: Vec<FailedItem>,
}

impl DeleteProgress {
    pub fn started(total: usize) -> Self {
        Self {
            running: true,
            total,
            ..Default::default()
        }
    }

    pub fn record_success(&mut self, count: usize) {
        self.succeeded += count;
        self.processed += count;
    }

    pub fn record_failure(&mut self, id: impl Into<String>, reason: impl Into<String>) {
        self.failed += 1;
        self.processed += 1;
        self.failed_items.push(FailedItem {
            id: id.into(),
            reason: reason.into(),
        });
    }

    pub fn finish(&mut self) {
        self.running = false;
    }

    /// Fold a finished retry of some of this run's failed ids back in.
    /// Ids the retry deleted leave `failed_items`; ids it failed again take
    /// the new reason; everything else is kept.
    pub fn absorb_retry(&mut self, retry: &DeleteProgress, succeeded_ids: &[String]) {
        let resolved: HashSet<&str> = succeeded_ids
            .iter()
            .map(String::as_str)
            .chain(retry.failed_items.iter().map(|f| f.id.as_str()))
            .collect();
        self.failed_items.retain(|f| !resolved.contains(f.id.as_str()));
        self.failed_items.extend(retry.failed_items.iter().cloned());
        self.succeeded += succeeded_ids.len();
        self.failed = self.failed_items.len();
        self.processed = self.succeeded + self.failed;
        self.running = false;
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.failed_items.iter().map(|f| f.id.clone()).collect()
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.processed * 100) / self.total).min(100) as u8
    }
}
