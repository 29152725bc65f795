//! State transition engine.
//!
//! Pure logic: which records each loop may select, and which field mutations
//! represent claim / commit / refresh-clear / reclaim. No I/O happens here;
//! stores evaluate these predicates and apply these mutations under their own
//! per-record atomicity.
//!
//! | Loop      | Selection                                         | Commit                                   |
//! |-----------|---------------------------------------------------|------------------------------------------|
//! | Ingestion | `sent_at = ∅ ∧ processing_sent_at = ∅`            | claim, then `sent_at = now`, lease freed |
//! | Refresh   | `need_to_refresh`                                 | flag false, `sent_for_media_at = ∅`      |
//! | Resync    | `sent_at ≠ ∅ ∧ metadata = ∅`                      | `sent_at = now`                          |
//!
//! Every predicate is additionally scoped to one `source`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::InstanceId;
use super::token::TokenRecord;

/// The three publishing loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    Ingestion,
    Refresh,
    Resync,
}

impl LoopKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopKind::Ingestion => "ingestion",
            LoopKind::Refresh => "refresh",
            LoopKind::Resync => "resync",
        }
    }

    /// Selection predicate for this loop within `source`.
    pub fn selects(self, record: &TokenRecord, source: &str) -> bool {
        if record.source != source {
            return false;
        }
        match self {
            LoopKind::Ingestion => record.sent_at.is_none() && record.processing_sent_at.is_none(),
            LoopKind::Refresh => record.need_to_refresh,
            LoopKind::Resync => record.sent_at.is_some() && record.metadata.is_none(),
        }
    }

    /// The mutation that commits a successful publish for this loop.
    ///
    /// Ingestion commits are guarded by the lease owner; resync re-stamps
    /// unconditionally.
    pub fn commit(self, at: DateTime<Utc>, owner: InstanceId) -> Transition {
        match self {
            LoopKind::Ingestion => Transition::Commit {
                at,
                owner: Some(owner),
            },
            LoopKind::Resync => Transition::Commit { at, owner: None },
            LoopKind::Refresh => Transition::ClearRefresh,
        }
    }
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reclaim predicate: an ingestion lease in `source` taken at or before
/// `expired_before` that never got committed.
pub fn lease_expired(record: &TokenRecord, source: &str, expired_before: DateTime<Utc>) -> bool {
    record.source == source
        && record.sent_at.is_none()
        && record
            .processing_sent_at
            .is_some_and(|leased_at| leased_at <= expired_before)
}

/// A field mutation on one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Take the ingestion lease.
    Claim { owner: InstanceId, at: DateTime<Utc> },

    /// Mark the current generation committed (ingestion) or re-stamp it (resync).
    ///
    /// With `owner`, only a record still leased by that owner is committed.
    Commit {
        at: DateTime<Utc>,
        owner: Option<InstanceId>,
    },

    /// Consume a refresh request. Metadata and enrichment stay in place.
    ClearRefresh,

    /// Drop an abandoned lease, returning the record to unclaimed.
    Reclaim,
}

impl Transition {
    /// Guard evaluated against the record's current fields.
    ///
    /// `Claim` is the conditional half of the compare-and-swap: a record
    /// someone else leased (or committed) in the meantime is refused.
    /// An owned `Commit` is the other half: a lease that was reclaimed (and
    /// possibly re-leased elsewhere) is no longer this owner's to commit.
    pub fn permits(&self, record: &TokenRecord) -> bool {
        match self {
            Transition::Claim { .. } => {
                record.sent_at.is_none() && record.processing_sent_at.is_none()
            }
            Transition::Commit { owner: None, .. } => true,
            Transition::Commit {
                owner: Some(owner), ..
            } => record.sent_at.is_none() && record.lease_owner == Some(*owner),
            Transition::ClearRefresh => record.need_to_refresh,
            Transition::Reclaim => {
                record.sent_at.is_none() && record.processing_sent_at.is_some()
            }
        }
    }

    /// Apply the mutation if permitted. Returns whether the record changed.
    pub fn apply(&self, record: &mut TokenRecord) -> bool {
        if !self.permits(record) {
            return false;
        }
        match *self {
            Transition::Claim { owner, at } => {
                record.processing_sent_at = Some(at);
                record.lease_owner = Some(owner);
            }
            Transition::Commit { at, .. } => {
                record.sent_at = Some(at);
                record.processing_sent_at = None;
                record.lease_owner = None;
            }
            Transition::ClearRefresh => {
                record.need_to_refresh = false;
                record.sent_for_media_at = None;
            }
            Transition::Reclaim => {
                record.processing_sent_at = None;
                record.lease_owner = None;
            }
        }
        true
    }
}
