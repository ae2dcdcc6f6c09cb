//! Submission outcomes and ingest counters.

use crate::domain::{AccountId, ReactionKind, ShardKey};
use crate::store::StoreError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Whether an event is new input or a replay of the persisted log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldMode {
    /// Persist, fold, record history and broadcast.
    Live,
    /// Fold only; the event is already in the log.
    Replay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub shard_key: String,
    pub seq: u64,
    /// Topic shards that received contributions from this event.
    pub topics: usize,
}

#[derive(Debug, Error)]
pub enum Rejected {
    #[error("{0}")]
    Validation(String),
    #[error("unknown shard {0}")]
    UnknownShard(String),
    #[error("sequence {seq} already seen for {shard_key}")]
    Duplicate { shard_key: String, seq: u64 },
    #[error("{actor} already left a {} on post {post_id}", kind.as_str())]
    DuplicateReaction {
        actor: AccountId,
        post_id: String,
        kind: ReactionKind,
    },
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("shard worker unavailable")]
    Unavailable,
}

impl Rejected {
    pub fn unknown(key: &ShardKey) -> Self {
        Rejected::UnknownShard(key.as_key())
    }

    pub fn duplicate(key: &ShardKey, seq: u64) -> Self {
        Rejected::Duplicate {
            shard_key: key.as_key(),
            seq,
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestStats {
    accepted: AtomicU64,
    replayed: AtomicU64,
    duplicates: AtomicU64,
    duplicate_reactions: AtomicU64,
    invalid: AtomicU64,
    unknown_shard: AtomicU64,
    storage_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStatsSnapshot {
    pub accepted: u64,
    pub replayed: u64,
    pub duplicates: u64,
    pub duplicate_reactions: u64,
    pub invalid: u64,
    pub unknown_shard: u64,
    pub storage_failures: u64,
}

impl IngestStats {
    pub fn record_accepted(&self, mode: FoldMode) {
        let counter = match mode {
            FoldMode::Live => &self.accepted,
            FoldMode::Replay => &self.replayed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, rejected: &Rejected) {
        let counter = match rejected {
            Rejected::Validation(_) => &self.invalid,
            Rejected::UnknownShard(_) => &self.unknown_shard,
            Rejected::Duplicate { .. } => &self.duplicates,
            Rejected::DuplicateReaction { .. } => &self.duplicate_reactions,
            Rejected::Storage(_) => &self.storage_failures,
            Rejected::Unavailable => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            duplicate_reactions: self.duplicate_reactions.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            unknown_shard: self.unknown_shard.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
        }
    }
}
