//! Status - source ごとの状態別件数
//!
//! 詰まり（lease が残ったまま、fetch 失敗が溜まっている等）を一目で見るためのビュー。

use serde::{Deserialize, Serialize};

use crate::domain::{TokenRecord, TokenState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub unclaimed: usize,
    pub leased: usize,
    pub awaiting_fetch: usize,
    pub fetch_failed: usize,
    pub fetched: usize,
    /// Orthogonal to the states above.
    pub refresh_requested: usize,
}

impl TokenCounts {
    pub fn record(&mut self, record: &TokenRecord) {
        match TokenState::of(record) {
            TokenState::Unclaimed => self.unclaimed += 1,
            TokenState::Leased => self.leased += 1,
            TokenState::AwaitingFetch => self.awaiting_fetch += 1,
            TokenState::FetchFailed => self.fetch_failed += 1,
            TokenState::Fetched => self.fetched += 1,
        }
        if record.need_to_refresh {
            self.refresh_requested += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.unclaimed + self.leased + self.awaiting_fetch + self.fetch_failed + self.fetched
    }
}

impl<'a> FromIterator<&'a TokenRecord> for TokenCounts {
    fn from_iter<I: IntoIterator<Item = &'a TokenRecord>>(iter: I) -> Self {
        let mut counts = TokenCounts::default();
        for record in iter {
            counts.record(record);
        }
        counts
    }
}
