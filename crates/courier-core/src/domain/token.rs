//! Token record: the single entity this crate moves through its lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::InstanceId;

/// Composite identity of a token: `(contract_address, token_id)`.
///
/// Immutable once a record is created; two records never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenKey {
    contract_address: String,
    token_id: String,
}

impl TokenKey {
    pub fn new(contract_address: impl Into<String>, token_id: impl Into<String>) -> Self {
        Self {
            contract_address: contract_address.into(),
            token_id: token_id.into(),
        }
    }

    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.contract_address, self.token_id)
    }
}

/// A token awaiting (or done with) an off-chain metadata fetch.
///
/// Design:
/// - The identity lives in `key` and has no setter.
/// - Transition fields (`sent_at`, `processing_sent_at`, `lease_owner`,
///   `need_to_refresh`, `sent_for_media_at`) are only changed through
///   [`Transition`](super::transition::Transition).
/// - Fetch fields are written by the external fetch worker via
///   [`FetchResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    #[serde(flatten)]
    key: TokenKey,

    /// Logical partition / queue-routing key.
    pub source: String,

    /// Payload classifier forwarded to consumers as `contractType`.
    pub token_type: String,

    /// Set once the current generation has been committed to the transport.
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,

    /// Lease marker; set while a claim is outstanding.
    #[serde(default)]
    pub processing_sent_at: Option<DateTime<Utc>>,

    /// Instance holding the lease (None when unleased).
    #[serde(default)]
    pub lease_owner: Option<InstanceId>,

    #[serde(default)]
    pub need_to_refresh: bool,

    /// Downstream marker; cleared on refresh so media gets recomputed.
    #[serde(default)]
    pub sent_for_media_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_fetch_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_domain_view_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_media_files: Option<serde_json::Value>,
}

impl TokenRecord {
    /// A freshly ingested record: every transition field null/false.
    pub fn new(
        key: TokenKey,
        source: impl Into<String>,
        token_type: impl Into<String>,
    ) -> Self {
        Self {
            key,
            source: source.into(),
            token_type: token_type.into(),
            sent_at: None,
            processing_sent_at: None,
            lease_owner: None,
            need_to_refresh: false,
            sent_for_media_at: None,
            metadata: None,
            metadata_fetch_error: None,
            external_domain_view_url: None,
            alternative_media_files: None,
        }
    }

    pub fn key(&self) -> &TokenKey {
        &self.key
    }

    pub fn contract_address(&self) -> &str {
        self.key.contract_address()
    }

    pub fn token_id(&self) -> &str {
        self.key.token_id()
    }

    /// Record the outcome reported by the fetch worker.
    pub fn apply_fetch_result(&mut self, result: FetchResult) {
        match result {
            FetchResult::Fetched {
                metadata,
                external_domain_view_url,
                alternative_media_files,
            } => {
                self.metadata = Some(metadata);
                self.metadata_fetch_error = None;
                if external_domain_view_url.is_some() {
                    self.external_domain_view_url = external_domain_view_url;
                }
                if alternative_media_files.is_some() {
                    self.alternative_media_files = alternative_media_files;
                }
            }
            FetchResult::Failed { error } => {
                self.metadata = None;
                self.metadata_fetch_error = Some(error);
            }
        }
    }
}

/// What the external fetch worker reports back for one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchResult {
    Fetched {
        metadata: serde_json::Value,
        #[serde(default)]
        external_domain_view_url: Option<String>,
        #[serde(default)]
        alternative_media_files: Option<serde_json::Value>,
    },
    Failed { error: String },
}

impl FetchResult {
    pub fn fetched(metadata: serde_json::Value) -> Self {
        Self::Fetched {
            metadata,
            external_domain_view_url: None,
            alternative_media_files: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_record_has_no_transition_state() {
        let record = TokenRecord::new(TokenKey::new("0xABC", "1"), "eth", "ERC721");
        assert_eq!(record.sent_at, None);
        assert_eq!(record.processing_sent_at, None);
        assert_eq!(record.lease_owner, None);
        assert!(!record.need_to_refresh);
        assert_eq!(record.metadata, None);
    }

    #[test]
    fn deserializes_store_document() {
        let doc = json!({
            "contractAddress": "0xe51Aac67b09EaEd6d3D43e794D6bAe679Cbe09D8",
            "tokenId": "0",
            "source": "eth",
            "tokenType": "ERC721",
            "sentAt": null,
            "needToRefresh": true,
            "externalDomainViewUrl": "https://burrows-api.fluf.world/api/token/0",
            "metadata": {}
        });

        let record: TokenRecord = serde_json::from_value(doc).unwrap();
        assert_eq!(record.token_id(), "0");
        assert!(record.need_to_refresh);
        assert_eq!(record.metadata, Some(json!({})));
        assert_eq!(record.processing_sent_at, None);
    }

    #[test]
    fn fetch_failure_clears_metadata_and_keeps_enrichment() {
        let mut record = TokenRecord::new(TokenKey::new("0xABC", "1"), "eth", "ERC721");
        record.apply_fetch_result(FetchResult::Fetched {
            metadata: json!({"name": "x"}),
            external_domain_view_url: Some("https://example.org/1".into()),
            alternative_media_files: None,
        });

        record.apply_fetch_result(FetchResult::failed("timeout"));

        assert_eq!(record.metadata, None);
        assert_eq!(record.metadata_fetch_error.as_deref(), Some("timeout"));
        assert_eq!(
            record.external_domain_view_url.as_deref(),
            Some("https://example.org/1")
        );
    }

    #[test]
    fn key_display_matches_log_format() {
        assert_eq!(TokenKey::new("0xABC", "7").to_string(), "0xABC - 7");
    }
}
