//! IngestionLoop - 未送信トークンの初回配送
//!
//! # フロー
//! 1. `claim_unclaimed` で lease を取得（このインスタンスが取れた分だけ返る）
//! 2. メッセージを組み立てて 1 バッチで publish
//! 3. transport が受理した分だけ `commit_batch`
//!
//! publish に失敗したレコードは lease を持ったまま残り、ReaperLoop が
//! `lease_timeout` 経過後に未 claim へ戻します。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::app::publisher::Publisher;
use crate::app::scheduler::Cycle;
use crate::domain::{CourierError, CycleReport, InstanceId, LoopKind};
use crate::ports::{Clock, IdGenerator, TokenStore};

pub struct IngestionLoop {
    store: Arc<dyn TokenStore>,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    owner: InstanceId,
    source: String,
    limit: usize,
}

impl IngestionLoop {
    pub fn new(
        store: Arc<dyn TokenStore>,
        publisher: Publisher,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        owner: InstanceId,
        source: impl Into<String>,
        limit: usize,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            ids,
            owner,
            source: source.into(),
            limit,
        }
    }

    pub fn owner(&self) -> InstanceId {
        self.owner
    }
}

#[async_trait]
impl Cycle for IngestionLoop {
    fn name(&self) -> &'static str {
        LoopKind::Ingestion.as_str()
    }

    async fn run_once(&self) -> Result<CycleReport, CourierError> {
        let job = self.name();
        let run_id = self.ids.generate_run_id();
        let mut report = CycleReport::new(job, run_id);

        let claimed = self
            .store
            .claim_unclaimed(&self.source, self.limit, self.owner, self.clock.now())
            .await?;
        report.selected = claimed.len();
        if claimed.is_empty() {
            debug!(job, %run_id, source = %self.source, "[ingestion] nothing to send");
            return Ok(report);
        }
        info!(
            job,
            %run_id,
            source = %self.source,
            owner = %self.owner,
            count = claimed.len(),
            "[ingestion] claimed {} unprocessed tokens",
            claimed.len()
        );
        for record in &claimed {
            debug!(job, %run_id, token = %record.key(), "[ingestion] {}", record.key());
        }

        let outcome = self.publisher.publish(job, run_id, &claimed).await?;
        report.published = outcome.delivered.len();
        report.failed = outcome.failed;

        report.committed = match self
            .store
            .commit_batch(&outcome.delivered, Some(self.owner), self.clock.now())
            .await
        {
            Ok(committed) => committed,
            Err(err) => {
                error!(
                    job,
                    %run_id,
                    published = report.published,
                    error = %err,
                    "[ingestion] published but commit failed; leases stay until reclaimed"
                );
                return Err(err.into());
            }
        };
        Ok(report)
    }
}
