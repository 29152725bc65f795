//! Errors - エラー型と分類
//!
//! ループ内の失敗はレコード単位で隔離し、ループ単位の失敗は
//! `CourierError` としてスケジューラまで返してログに残します。

use thiserror::Error;

use super::token::TokenKey;

/// ErrorKind は運用上の分類
///
/// - Transient: 次回の起動で自然に回復する（リトライで十分）
/// - Permanent: 同じ入力では何度やっても失敗する
/// - Infrastructure: store / transport の障害
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Record store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token {0} already exists")]
    Duplicate(TokenKey),

    #[error("token {0} not found")]
    NotFound(TokenKey),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Whole-batch transport failures. Per-message failures are reported in
/// [`PublishReport`](crate::ports::PublishReport) instead.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("batch rejected: {0}")]
    Rejected(String),
}

/// Building a message for one record failed; only that record is affected.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("failed to serialize message body for token {key}")]
    Serialize {
        key: TokenKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("message body for token {key} is {size} bytes, over the {limit} byte limit")]
    TooLarge {
        key: TokenKey,
        size: usize,
        limit: usize,
    },
}

/// Loop-level failure: the invocation is abandoned and retried next firing.
#[derive(Debug, Error)]
pub enum CourierError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CourierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CourierError::Store(StoreError::Unavailable(_))
            | CourierError::Transport(TransportError::Unavailable(_)) => ErrorKind::Infrastructure,
            CourierError::Store(StoreError::NotFound(_)) => ErrorKind::Transient,
            CourierError::Store(StoreError::Duplicate(_))
            | CourierError::Transport(TransportError::Rejected(_)) => ErrorKind::Permanent,
        }
    }
}
