//! Transport port - 順序保証・重複排除付きのメッセージ配送路（FIFO キュー）
//!
//! 接続やバッチ分割の詳細は実装側の責務です。
//! ループはメッセージ単位の成否だけを見て commit 対象を決めます。

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{QueueMessage, TransportError};

/// Transport はメッセージをバッチで送信する
///
/// # 契約
/// - 同じ `group_id` のメッセージは送信順に配送される
/// - 重複排除ウィンドウ内の同じ `deduplication_id` は黙って捨てられる（成功扱い）
/// - `Ok` はメッセージ単位の成否を返す。`Err` はバッチ全体の失敗
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish_batch(
        &self,
        messages: Vec<QueueMessage>,
    ) -> Result<PublishReport, TransportError>;
}

/// メッセージ単位の送信結果（`QueueMessage::id` で対応付ける）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: Vec<String>,
    pub failed: Vec<PublishFailure>,
}

impl PublishReport {
    pub fn is_delivered(&self, message_id: &str) -> bool {
        self.delivered.iter().any(|id| id == message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFailure {
    pub id: String,
    pub reason: String,
}

/// TransportConfig は構築時に一度だけ渡される不変の設定
///
/// プロセス全体のグローバル設定を書き換えることはしません。
#[derive(Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub queue_url: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub dedup_window: Duration,
}

impl TransportConfig {
    pub fn new(queue_url: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            region: region.into(),
            access_key_id: None,
            secret_access_key: None,
            dedup_window: Duration::from_secs(300),
        }
    }

    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_dedup_window(mut self, dedup_window: Duration) -> Self {
        self.dedup_window = dedup_window;
        self
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("queue_url", &self.queue_url)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("dedup_window", &self.dedup_window)
            .finish()
    }
}
