//! ReaperLoop - Lease 期限切れの回収
//!
//! publish 途中で落ちた・commit に失敗したインスタンスの lease は誰も解放しないので、
//! `lease_timeout` を過ぎたものを未 claim に戻して IngestionLoop に拾い直させます。
//! 受信側は配送が at-least-once である前提です。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tracing::{debug, warn};

use crate::app::scheduler::Cycle;
use crate::domain::{CourierError, CycleReport};
use crate::ports::{Clock, IdGenerator, TokenStore};

pub const JOB: &str = "reaper";

pub struct ReaperLoop {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    source: String,
    lease_timeout: Duration,
}

impl ReaperLoop {
    pub fn new(
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        source: impl Into<String>,
        lease_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            source: source.into(),
            lease_timeout,
        }
    }
}

#[async_trait]
impl Cycle for ReaperLoop {
    fn name(&self) -> &'static str {
        JOB
    }

    async fn run_once(&self) -> Result<CycleReport, CourierError> {
        let run_id = self.ids.generate_run_id();
        let mut report = CycleReport::new(JOB, run_id);
        // timeout reaches back past the representable range: nothing has expired
        let Some(expired_before) = self.clock.now().checked_sub_signed(self.lease_timeout) else {
            debug!(job = JOB, %run_id, lease_timeout = %self.lease_timeout, "[reaper] no expired leases");
            return Ok(report);
        };

        let reclaimed = self
            .store
            .reclaim_expired_leases(&self.source, expired_before)
            .await?;
        report.selected = reclaimed.len();
        report.committed = reclaimed.len();

        if reclaimed.is_empty() {
            debug!(job = JOB, %run_id, source = %self.source, "[reaper] no expired leases");
        }
        for key in &reclaimed {
            warn!(
                job = JOB,
                %run_id,
                token = %key,
                %expired_before,
                "[reaper] reclaimed expired lease"
            );
        }
        Ok(report)
    }
}
