//! Publisher - レコード → メッセージ → transport の共通部分
//!
//! 3 つのループはどれも「選んだレコードを 1 バッチで送って、届いた分だけ
//! commit する」ので、メッセージ構築と結果の突き合わせをここにまとめています。

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{
    KeyScheme, MAX_BODY_BYTES, QueueMessage, RunId, TokenKey, TokenRecord, TransportError,
};
use crate::ports::Transport;

/// 1 バッチ分の結果（TokenKey 単位）
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// transport が受理したレコード（選択順）
    pub delivered: Vec<TokenKey>,
    /// メッセージ構築または送信に失敗したレコード
    pub failed: Vec<TokenKey>,
}

#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    key_scheme: KeyScheme,
    max_body_bytes: usize,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>, key_scheme: KeyScheme) -> Self {
        Self {
            transport,
            key_scheme,
            max_body_bytes: MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn key_scheme(&self) -> KeyScheme {
        self.key_scheme
    }

    /// Build one message per record and send them as a single batch.
    ///
    /// A record whose body cannot be serialized, or exceeds `max_body_bytes`,
    /// is reported as failed and left out of the batch; the rest still go out.
    /// `Err` means the transport rejected the whole batch.
    pub async fn publish(
        &self,
        job: &str,
        run_id: RunId,
        records: &[TokenRecord],
    ) -> Result<PublishOutcome, TransportError> {
        let mut outcome = PublishOutcome::default();
        let mut sent: Vec<(String, TokenKey)> = Vec::with_capacity(records.len());
        let mut messages = Vec::with_capacity(records.len());

        for record in records {
            let built = QueueMessage::for_record(record, self.key_scheme)
                .and_then(|message| message.ensure_body_within(record.key(), self.max_body_bytes));
            match built {
                Ok(message) => {
                    sent.push((message.id.clone(), record.key().clone()));
                    messages.push(message);
                }
                Err(err) => {
                    warn!(job, %run_id, token = %record.key(), error = %err, "[{job}] skipping token");
                    outcome.failed.push(record.key().clone());
                }
            }
        }

        if messages.is_empty() {
            return Ok(outcome);
        }

        let report = self.transport.publish_batch(messages).await?;
        for failure in &report.failed {
            warn!(
                job,
                %run_id,
                message_id = %failure.id,
                reason = %failure.reason,
                "[{job}] failed to send message"
            );
        }

        let delivered: HashSet<&str> = report.delivered.iter().map(String::as_str).collect();
        for (message_id, key) in sent {
            if delivered.contains(message_id.as_str()) {
                debug!(job, %run_id, token = %key, "[{job}] sent message");
                outcome.delivered.push(key);
            } else {
                outcome.failed.push(key);
            }
        }
        Ok(outcome)
    }
}
