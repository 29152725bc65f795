//! InMemoryTransport - 開発・テスト用の FIFO transport
//!
//! - 受理したメッセージを送信順に保持（group 内の順序はそのまま）
//! - `dedup_window` 内に同じ `deduplication_id` が来たら成功扱いで捨てる
//!   （window を過ぎた id は publish_batch のたびに忘れる）
//! - 障害注入: 特定メッセージの失敗、次回バッチ全体の失敗
//!
//! # 使用例
//! ```ignore
//! let transport = InMemoryTransport::new(TransportConfig::new("mem://tokens.fifo", "local"));
//! let report = transport.publish_batch(messages).await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{QueueMessage, TransportError};
use crate::ports::{PublishFailure, PublishReport, Transport, TransportConfig};

#[derive(Default)]
struct InMemoryTransportState {
    /// 受理されたメッセージ（送信順）
    accepted: Vec<QueueMessage>,

    /// deduplication_id -> 最後に受理した時刻
    seen: HashMap<String, Instant>,

    /// この id のメッセージは失敗させる（解除されるまで）
    failing_ids: HashSet<String>,

    /// 次の publish_batch 全体を失敗させる
    fail_next_batch: Option<String>,

    /// publish_batch の呼び出し回数
    batches: usize,
}

/// InMemoryTransport は開発用の配送路
#[derive(Clone)]
pub struct InMemoryTransport {
    config: Arc<TransportConfig>,
    state: Arc<Mutex<InMemoryTransportState>>,
}

impl InMemoryTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(InMemoryTransportState::default())),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// 受理されたメッセージ（送信順）
    pub async fn messages(&self) -> Vec<QueueMessage> {
        self.state.lock().await.accepted.clone()
    }

    /// group 内の配送順
    pub async fn messages_in_group(&self, group_id: &str) -> Vec<QueueMessage> {
        let state = self.state.lock().await;
        state
            .accepted
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect()
    }

    /// dedup 判定のために覚えている deduplication_id の数
    pub async fn dedup_entries(&self) -> usize {
        self.state.lock().await.seen.len()
    }

    pub async fn batch_count(&self) -> usize {
        self.state.lock().await.batches
    }

    pub async fn fail_message(&self, message_id: impl Into<String>) {
        self.state.lock().await.failing_ids.insert(message_id.into());
    }

    pub async fn heal_message(&self, message_id: &str) {
        self.state.lock().await.failing_ids.remove(message_id);
    }

    pub async fn fail_next_batch(&self, reason: impl Into<String>) {
        self.state.lock().await.fail_next_batch = Some(reason.into());
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish_batch(
        &self,
        messages: Vec<QueueMessage>,
    ) -> Result<PublishReport, TransportError> {
        let mut state = self.state.lock().await;
        state.batches += 1;
        if let Some(reason) = state.fail_next_batch.take() {
            return Err(TransportError::Unavailable(reason));
        }

        let now = Instant::now();
        let window = self.config.dedup_window;
        state.seen.retain(|_, at| now.duration_since(*at) < window);
        let mut report = PublishReport::default();

        for message in messages {
            if state.failing_ids.contains(&message.id) {
                report.failed.push(PublishFailure {
                    id: message.id,
                    reason: "injected failure".into(),
                });
                continue;
            }

            let duplicate = state
                .seen
                .get(&message.deduplication_id)
                .is_some_and(|at| now.duration_since(*at) < window);
            report.delivered.push(message.id.clone());
            if duplicate {
                continue;
            }
            state.seen.insert(message.deduplication_id.clone(), now);
            state.accepted.push(message);
        }

        Ok(report)
    }
}
