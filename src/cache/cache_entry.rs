use std::sync::Arc;

use tokio::sync::watch;

use crate::cache::token_record::TokenRecord;
use crate::error::TokenError;

/// Result of one acquisition, shared by every waiter joined to it.
pub type Outcome = Result<Arc<TokenRecord>, TokenError>;

/// Single-slot handle on the acquisition currently running for an identity.
///
/// The task that owns the sender publishes exactly one `Some(outcome)`.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub(crate) id: u64,
    pub(crate) receiver: watch::Receiver<Option<Outcome>>,
}

impl InFlight {
    /// A slot whose task died without publishing cannot be joined.
    pub(crate) fn is_alive(&self) -> bool {
        self.receiver.has_changed().is_ok()
    }
}

/// Per-identity state, guarded by its own lock inside the cache.
#[derive(Debug, Default)]
pub struct CacheEntry {
    pub(crate) record: Option<Arc<TokenRecord>>,
    pub(crate) in_flight: Option<InFlight>,
    /// Bumped whenever `record` is replaced or cleared.
    pub(crate) generation: u64,
}

impl CacheEntry {
    pub fn record(&self) -> Option<&Arc<TokenRecord>> {
        self.record.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_acquiring(&self) -> bool {
        self.in_flight.is_some()
    }

    pub(crate) fn replace(&mut self, record: Arc<TokenRecord>) {
        self.record = Some(record);
        self.generation += 1;
    }

    /// Drops the record and detaches any running acquisition.
    /// Returns the dropped record.
    pub(crate) fn clear(&mut self) -> Option<Arc<TokenRecord>> {
        let previous = self.record.take();
        let detached = self.in_flight.take().is_some();
        if previous.is_some() || detached {
            self.generation += 1;
        }
        previous
    }

    /// Drops the record but leaves the in-flight slot alone.
    pub(crate) fn drop_record(&mut self) {
        if self.record.take().is_some() {
            self.generation += 1;
        }
    }

    /// Releases the in-flight slot if it still belongs to `acquisition_id`.
    pub(crate) fn finish(&mut self, acquisition_id: u64) {
        if self.in_flight.as_ref().map(|f| f.id) == Some(acquisition_id) {
            self.in_flight = None;
        }
    }
}
