//! InMemoryTokenStore - 開発・テスト用の TokenStore
//!
//! - 挿入順がそのままスキャン順（= publish 順）
//! - 1 操作ごとに Mutex を取り、返す前に解放する（await を跨いで保持しない）
//! - 障害注入: store 全体の停止、次回 commit の失敗

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::app::status::TokenCounts;
use crate::domain::{
    FetchResult, InstanceId, LoopKind, StoreError, TokenKey, TokenRecord, Transition,
    lease_expired,
};
use crate::ports::TokenStore;

/// In-memory store state.
#[derive(Default)]
struct InMemoryStoreState {
    /// All records, in insertion order.
    records: Vec<TokenRecord>,

    /// TokenKey -> position in `records`.
    index: HashMap<TokenKey, usize>,

    /// Every operation fails with `Unavailable` while set.
    unavailable: bool,

    /// The next `commit_batch` fails (then resets).
    fail_next_commit: bool,
}

impl InMemoryStoreState {
    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".into()));
        }
        Ok(())
    }

    fn select(&self, kind: LoopKind, source: &str, limit: Option<usize>) -> Vec<TokenRecord> {
        self.records
            .iter()
            .filter(|r| kind.selects(r, source))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Apply `transition` to each key; returns the keys it actually changed.
    fn apply_each(&mut self, keys: &[TokenKey], transition: Transition) -> Vec<TokenKey> {
        let mut changed = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(&pos) = self.index.get(key) else {
                continue;
            };
            if transition.apply(&mut self.records[pos]) {
                changed.push(key.clone());
            }
        }
        changed
    }
}

/// In-memory TokenStore implementation.
#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    state: Arc<Mutex<InMemoryStoreState>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record (ingestion happens outside the loops).
    pub async fn insert(&self, record: TokenRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        if state.index.contains_key(record.key()) {
            return Err(StoreError::Duplicate(record.key().clone()));
        }
        let pos = state.records.len();
        state.index.insert(record.key().clone(), pos);
        state.records.push(record);
        Ok(())
    }

    pub async fn get(&self, key: &TokenKey) -> Option<TokenRecord> {
        let state = self.state.lock().await;
        state.index.get(key).map(|&pos| state.records[pos].clone())
    }

    /// User-facing "hard refresh" request.
    pub async fn request_refresh(&self, key: &TokenKey) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let pos = *state
            .index
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        state.records[pos].need_to_refresh = true;
        Ok(())
    }

    /// All records of `source`, in scan order.
    pub async fn snapshot(&self, source: &str) -> Vec<TokenRecord> {
        let state = self.state.lock().await;
        state
            .records
            .iter()
            .filter(|r| r.source == source)
            .cloned()
            .collect()
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn fail_next_commit(&self) {
        self.state.lock().await.fail_next_commit = true;
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn select_unclaimed(
        &self,
        source: &str,
        limit: usize,
    ) -> Result<Vec<TokenRecord>, StoreError> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.select(LoopKind::Ingestion, source, Some(limit)))
    }

    async fn select_needing_refresh(
        &self,
        source: &str,
        limit: usize,
    ) -> Result<Vec<TokenRecord>, StoreError> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.select(LoopKind::Refresh, source, Some(limit)))
    }

    async fn select_failed_fetch(&self, source: &str) -> Result<Vec<TokenRecord>, StoreError> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.select(LoopKind::Resync, source, None))
    }

    async fn claim_batch(
        &self,
        keys: &[TokenKey],
        owner: InstanceId,
        now: DateTime<Utc>,
    ) -> Result<Vec<TokenKey>, StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.apply_each(keys, Transition::Claim { owner, at: now }))
    }

    /// Single find-and-lease under one lock.
    async fn claim_unclaimed(
        &self,
        source: &str,
        limit: usize,
        owner: InstanceId,
        now: DateTime<Utc>,
    ) -> Result<Vec<TokenRecord>, StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let claim = Transition::Claim { owner, at: now };
        let mut leased = Vec::new();
        for record in state.records.iter_mut() {
            if leased.len() >= limit {
                break;
            }
            if LoopKind::Ingestion.selects(record, source) && claim.apply(record) {
                leased.push(record.clone());
            }
        }
        Ok(leased)
    }

    async fn commit_batch(
        &self,
        keys: &[TokenKey],
        owner: Option<InstanceId>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        if std::mem::take(&mut state.fail_next_commit) {
            return Err(StoreError::Unavailable("commit write failed".into()));
        }
        Ok(state.apply_each(keys, Transition::Commit { at: now, owner }).len())
    }

    async fn clear_refresh_flag(&self, keys: &[TokenKey]) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.apply_each(keys, Transition::ClearRefresh).len())
    }

    async fn reclaim_expired_leases(
        &self,
        source: &str,
        expired_before: DateTime<Utc>,
    ) -> Result<Vec<TokenKey>, StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let mut reclaimed = Vec::new();
        for record in state.records.iter_mut() {
            if lease_expired(record, source, expired_before) && Transition::Reclaim.apply(record) {
                reclaimed.push(record.key().clone());
            }
        }
        Ok(reclaimed)
    }

    async fn upsert_fetch_result(
        &self,
        key: &TokenKey,
        result: FetchResult,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let pos = *state
            .index
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        state.records[pos].apply_fetch_result(result);
        Ok(())
    }

    async fn counts(&self, source: &str) -> Result<TokenCounts, StoreError> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.records.iter().filter(|r| r.source == source).collect())
    }
}
