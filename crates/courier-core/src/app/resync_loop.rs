//! ResyncLoop - metadata が取れていないトークンの再配送
//!
//! 送信済みなのに metadata が無いレコード（fetch 失敗・未完了）を全件送り直し、
//! `sent_at` を打ち直します。metadata が入るまで毎回対象になります。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::app::publisher::Publisher;
use crate::app::scheduler::Cycle;
use crate::domain::{CourierError, CycleReport, LoopKind};
use crate::ports::{Clock, IdGenerator, TokenStore};

pub struct ResyncLoop {
    store: Arc<dyn TokenStore>,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    source: String,
}

impl ResyncLoop {
    pub fn new(
        store: Arc<dyn TokenStore>,
        publisher: Publisher,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            ids,
            source: source.into(),
        }
    }
}

#[async_trait]
impl Cycle for ResyncLoop {
    fn name(&self) -> &'static str {
        LoopKind::Resync.as_str()
    }

    async fn run_once(&self) -> Result<CycleReport, CourierError> {
        let job = self.name();
        let run_id = self.ids.generate_run_id();
        let mut report = CycleReport::new(job, run_id);

        let selected = self.store.select_failed_fetch(&self.source).await?;
        report.selected = selected.len();
        if selected.is_empty() {
            debug!(job, %run_id, source = %self.source, "[resync] nothing to resync");
            return Ok(report);
        }
        info!(
            job,
            %run_id,
            source = %self.source,
            count = selected.len(),
            "[resync] resyncing {} tokens without metadata",
            selected.len()
        );

        let outcome = self.publisher.publish(job, run_id, &selected).await?;
        report.published = outcome.delivered.len();
        report.failed = outcome.failed;

        report.committed = self
            .store
            .commit_batch(&outcome.delivered, None, self.clock.now())
            .await
            .inspect_err(|err| {
                error!(job, %run_id, error = %err, "[resync] published but sent_at was not restamped");
            })?;
        Ok(report)
    }
}
