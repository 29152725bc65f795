//! Derived lifecycle state of a token record.

use serde::{Deserialize, Serialize};

use super::token::TokenRecord;

/// Lifecycle state, computed from the record's fields.
///
/// State transitions:
/// - Unclaimed -> Leased -> AwaitingFetch (publish committed)
/// - Leased -> Unclaimed (lease expired and reclaimed)
/// - AwaitingFetch -> Fetched | FetchFailed (external fetch worker)
/// - FetchFailed / AwaitingFetch -> same state, `sent_at` re-stamped (resync)
///
/// `need_to_refresh` is orthogonal and not folded into this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// Never claimed in the current generation.
    Unclaimed,

    /// Claimed, publish not yet committed.
    Leased,

    /// Committed, fetch worker has not reported yet.
    AwaitingFetch,

    /// Committed, fetch worker reported an error.
    FetchFailed,

    /// Committed with metadata. Terminal unless a refresh is requested.
    Fetched,
}

impl TokenState {
    pub fn of(record: &TokenRecord) -> Self {
        match (record.sent_at, record.processing_sent_at) {
            (None, None) => TokenState::Unclaimed,
            (None, Some(_)) => TokenState::Leased,
            (Some(_), _) => match (&record.metadata, &record.metadata_fetch_error) {
                (Some(_), _) => TokenState::Fetched,
                (None, Some(_)) => TokenState::FetchFailed,
                (None, None) => TokenState::AwaitingFetch,
            },
        }
    }

    pub fn is_committed(self) -> bool {
        matches!(
            self,
            TokenState::AwaitingFetch | TokenState::FetchFailed | TokenState::Fetched
        )
    }
}
