//! RefreshLoop - 「もう一度取り直して」が付いたトークンの再配送
//!
//! `need_to_refresh` の立ったレコードを送り直し、受理された分のフラグを下ろします。
//! `sent_at` と既存の metadata には触りません（fetch worker が上書きする）。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::app::publisher::Publisher;
use crate::app::scheduler::Cycle;
use crate::domain::{CourierError, CycleReport, LoopKind};
use crate::ports::{IdGenerator, TokenStore};

pub struct RefreshLoop {
    store: Arc<dyn TokenStore>,
    publisher: Publisher,
    ids: Arc<dyn IdGenerator>,
    source: String,
    limit: usize,
}

impl RefreshLoop {
    pub fn new(
        store: Arc<dyn TokenStore>,
        publisher: Publisher,
        ids: Arc<dyn IdGenerator>,
        source: impl Into<String>,
        limit: usize,
    ) -> Self {
        Self {
            store,
            publisher,
            ids,
            source: source.into(),
            limit,
        }
    }
}

#[async_trait]
impl Cycle for RefreshLoop {
    fn name(&self) -> &'static str {
        LoopKind::Refresh.as_str()
    }

    async fn run_once(&self) -> Result<CycleReport, CourierError> {
        let job = self.name();
        let run_id = self.ids.generate_run_id();
        let mut report = CycleReport::new(job, run_id);

        let selected = self
            .store
            .select_needing_refresh(&self.source, self.limit)
            .await?;
        report.selected = selected.len();
        if selected.is_empty() {
            debug!(job, %run_id, source = %self.source, "[refresh] nothing to refresh");
            return Ok(report);
        }
        info!(
            job,
            %run_id,
            source = %self.source,
            count = selected.len(),
            "[refresh] refreshing {} tokens",
            selected.len()
        );

        let outcome = self.publisher.publish(job, run_id, &selected).await?;
        report.published = outcome.delivered.len();
        report.failed = outcome.failed;

        report.committed = self
            .store
            .clear_refresh_flag(&outcome.delivered)
            .await
            .inspect_err(|err| {
                error!(job, %run_id, error = %err, "[refresh] published but flags were not cleared");
            })?;
        Ok(report)
    }
}
