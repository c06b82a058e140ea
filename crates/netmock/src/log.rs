//! The append-only request log of one interception session.
//!
//! The controller is the only writer; everything else reads snapshots. Records
//! are stored as `Arc<RequestRecord>` so views can share them without copying.

use crate::assertion::AssertionFilterChain;
use crate::filter::FilterView;
use crate::record::RequestRecord;
use crate::wait::WaitConfig;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Append-only, completion-ordered collection of request records.
///
/// This type is cheaply cloneable (Arc) and allows concurrent access from the
/// controller's tasks and test code.
#[derive(Debug, Clone)]
pub struct RequestLog {
    records: Arc<RwLock<Vec<Arc<RequestRecord>>>>,
    wait: WaitConfig,
}

impl RequestLog {
    /// Creates an empty log whose assertion chains wait according to `wait`.
    #[must_use]
    pub fn new(wait: WaitConfig) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            wait,
        }
    }

    /// Appends a finalized record, assigning its sequence index.
    pub(crate) fn append(&self, mut record: RequestRecord) -> Arc<RequestRecord> {
        let mut records = self.records.write();
        record.sequence_index = records.len() as u64;
        debug!(
            sequence = record.sequence_index,
            method = %record.method,
            url = %record.url,
            status = record.response_status,
            mocked = record.mocked,
            "recorded request"
        );
        let record = Arc::new(record);
        records.push(record.clone());
        record
    }

    /// Returns every record in completion order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<RequestRecord>> {
        self.records.read().clone()
    }

    /// Returns a filterable snapshot of the current records.
    #[must_use]
    pub fn view(&self) -> FilterView {
        FilterView::from_records(self.all())
    }

    /// Starts an awaitable assertion chain over the live log.
    ///
    /// The chain re-reads the log while it waits, so records appended after this
    /// call still count.
    #[must_use]
    pub fn filter(&self) -> AssertionFilterChain {
        AssertionFilterChain::new(self.clone(), self.wait)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new(WaitConfig::default())
    }
}
