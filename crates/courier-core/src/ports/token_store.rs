//! TokenStore port - トークンレコードの正本（source of truth）
//!
//! 実際のスキーマやクエリエンジンはこのクレートの外側にあります。
//! ここではループが必要とする読み取り・条件付き更新だけを定義します。
//!
//! # 設計原則
//! - 1 レコード単位の更新は store 側でアトミック
//! - 複数レコードの更新は bulk 操作（全体のアトミック性は要求しない）
//! - 選択と更新の条件はすべて `domain::transition` の述語と一致させる

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::status::TokenCounts;
use crate::domain::{FetchResult, InstanceId, StoreError, TokenKey, TokenRecord, Transition};

/// TokenStore はトークンレコードの読み取りと状態遷移の書き込みを提供
///
/// 選択系は store 定義の順序（挿入順やスキャン順）で返します。
/// その順序がそのまま publish 順になります。
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// `sent_at = ∅ ∧ processing_sent_at = ∅` のレコードを最大 `limit` 件
    async fn select_unclaimed(
        &self,
        source: &str,
        limit: usize,
    ) -> Result<Vec<TokenRecord>, StoreError>;

    /// `need_to_refresh` が立っているレコードを最大 `limit` 件
    async fn select_needing_refresh(
        &self,
        source: &str,
        limit: usize,
    ) -> Result<Vec<TokenRecord>, StoreError>;

    /// `sent_at ≠ ∅ ∧ metadata = ∅`（fetch 失敗・未完了）のレコード
    async fn select_failed_fetch(&self, source: &str) -> Result<Vec<TokenRecord>, StoreError>;

    /// lease を条件付きで取得する
    ///
    /// まだ未 claim のレコードだけに `processing_sent_at = now` と
    /// `lease_owner = owner` を書き込み、実際に取得できた key を返します。
    async fn claim_batch(
        &self,
        keys: &[TokenKey],
        owner: InstanceId,
        now: DateTime<Utc>,
    ) -> Result<Vec<TokenKey>, StoreError>;

    /// 選択と lease 取得をまとめて行い、このインスタンスが取得したレコードだけを返す
    ///
    /// デフォルト実装は `select_unclaimed` → `claim_batch` の 2 段階です。
    /// `claim_batch` がレコード単位で条件付きなので、他インスタンスと競合しても
    /// 同じレコードを二重に返すことはありません。find-and-modify を持つ store は
    /// 1 回の操作で上書き実装できます。
    async fn claim_unclaimed(
        &self,
        source: &str,
        limit: usize,
        owner: InstanceId,
        now: DateTime<Utc>,
    ) -> Result<Vec<TokenRecord>, StoreError> {
        let candidates = self.select_unclaimed(source, limit).await?;
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let keys: Vec<TokenKey> = candidates.iter().map(|r| r.key().clone()).collect();
        let claimed: HashSet<TokenKey> = self
            .claim_batch(&keys, owner, now)
            .await?
            .into_iter()
            .collect();

        let claim = Transition::Claim { owner, at: now };
        Ok(candidates
            .into_iter()
            .filter(|r| claimed.contains(r.key()))
            .map(|mut r| {
                claim.apply(&mut r);
                r
            })
            .collect())
    }

    /// `sent_at = now` を書き込み lease を解放する。更新件数を返す
    ///
    /// `owner` が `Some` のときは、その owner がまだ lease を持っているレコードだけ。
    /// reaper に回収された（あるいは別インスタンスが取り直した）レコードは数えない。
    async fn commit_batch(
        &self,
        keys: &[TokenKey],
        owner: Option<InstanceId>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// `need_to_refresh = false`, `sent_for_media_at = ∅`。更新件数を返す
    async fn clear_refresh_flag(&self, keys: &[TokenKey]) -> Result<usize, StoreError>;

    /// `expired_before` 以前に取得され commit されていない lease を解放する
    async fn reclaim_expired_leases(
        &self,
        source: &str,
        expired_before: DateTime<Utc>,
    ) -> Result<Vec<TokenKey>, StoreError>;

    /// 外部の fetch worker が結果を書き込む（このクレートのループは呼ばない）
    async fn upsert_fetch_result(
        &self,
        key: &TokenKey,
        result: FetchResult,
    ) -> Result<(), StoreError>;

    /// source ごとの状態別件数
    async fn counts(&self, source: &str) -> Result<TokenCounts, StoreError>;
}
