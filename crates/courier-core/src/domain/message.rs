//! Transport message construction.
//!
//! One record becomes one [`QueueMessage`]:
//! - `id` / `deduplication_id`: composite key of the token identity
//! - `group_id`: contract address (per-contract ordering)
//! - `body`: JSON `{ contractAddress, tokenId, contractType }`

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::MessageError;
use super::token::{TokenKey, TokenRecord};

/// How the `(contract_address, token_id)` pair is folded into one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScheme {
    /// `contract_address + token_id`. What existing consumers key on, but
    /// `("0xAB", "C1")` and `("0xABC", "1")` collide.
    #[default]
    Concatenated,

    /// `contract_address + ":" + token_id`. Contract addresses never contain `:`,
    /// so distinct pairs always produce distinct keys.
    Delimited,
}

impl KeyScheme {
    pub const DELIMITER: char = ':';

    pub fn compose(self, contract_address: &str, token_id: &str) -> String {
        match self {
            KeyScheme::Concatenated => format!("{contract_address}{token_id}"),
            KeyScheme::Delimited => {
                format!("{contract_address}{}{token_id}", Self::DELIMITER)
            }
        }
    }
}

impl FromStr for KeyScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concatenated" => Ok(KeyScheme::Concatenated),
            "delimited" => Ok(KeyScheme::Delimited),
            other => Err(format!("unknown key scheme '{other}'")),
        }
    }
}

/// Body consumers receive, serialized as a JSON string before send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    pub contract_address: String,
    pub token_id: String,
    pub contract_type: String,
}

impl From<&TokenRecord> for MessageBody {
    fn from(record: &TokenRecord) -> Self {
        Self {
            contract_address: record.contract_address().to_string(),
            token_id: record.token_id().to_string(),
            contract_type: record.token_type.clone(),
        }
    }
}

/// Largest body a FIFO queue accepts in one message (256 KiB).
pub const MAX_BODY_BYTES: usize = 256 * 1024;

/// A message ready for the ordered, deduplicating transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub id: String,
    pub group_id: String,
    pub deduplication_id: String,
    pub body: String,
}

impl QueueMessage {
    pub fn for_record(record: &TokenRecord, scheme: KeyScheme) -> Result<Self, MessageError> {
        let id = scheme.compose(record.contract_address(), record.token_id());
        let body = serde_json::to_string(&MessageBody::from(record)).map_err(|source| {
            MessageError::Serialize {
                key: record.key().clone(),
                source,
            }
        })?;
        Ok(Self {
            deduplication_id: id.clone(),
            id,
            group_id: record.contract_address().to_string(),
            body,
        })
    }

    /// Refuse a body the transport would reject outright.
    pub fn ensure_body_within(self, key: &TokenKey, limit: usize) -> Result<Self, MessageError> {
        let size = self.body.len();
        if size > limit {
            return Err(MessageError::TooLarge {
                key: key.clone(),
                size,
                limit,
            });
        }
        Ok(self)
    }

    pub fn decode_body(&self) -> Result<MessageBody, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}
