//! Share accounting sink
//!
//! Validated shares and block candidates are handed to a [`ShareSink`]
//! rather than written to storage directly, keeping the payout backend
//! pluggable. The default sink logs and tallies in memory.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// An accepted share with everything a payout backend needs to credit it.
#[derive(Debug, Clone)]
pub struct ShareRecord {
    pub login: String,
    pub worker_name: String,
    pub ip: String,
    /// Difficulty credited to the miner (the job's difficulty, not the
    /// hash's actual difficulty).
    pub difficulty: u64,
    /// Height of the template the share was mined against.
    pub height: u64,
    /// True when the share met the network difficulty as well.
    pub block_candidate: bool,
}

/// A share that met network difficulty and was submitted upstream.
#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub share: ShareRecord,
    /// Hex hash of the candidate block.
    pub block_hash: String,
    /// True once the daemon accepted the submitted block.
    pub accepted: bool,
}

/// Destination for validated shares and unlocked-candidate records.
#[async_trait]
pub trait ShareSink: Send + Sync {
    /// Record one accepted share.
    async fn record_share(&self, share: ShareRecord);

    /// Record a block candidate after the upstream submit resolved.
    async fn record_candidate(&self, candidate: CandidateRecord);
}

/// Sink that logs shares and keeps running totals; the default when no
/// payout backend is wired in.
#[derive(Debug, Default)]
pub struct LogSink {
    shares: AtomicU64,
    blocks: AtomicU64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_shares(&self) -> u64 {
        self.shares.load(Ordering::Relaxed)
    }

    pub fn total_blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ShareSink for LogSink {
    async fn record_share(&self, share: ShareRecord) {
        self.shares.fetch_add(1, Ordering::Relaxed);
        info!(
            login = %share.login,
            worker = %share.worker_name,
            difficulty = share.difficulty,
            height = share.height,
            "share accepted"
        );
    }

    async fn record_candidate(&self, candidate: CandidateRecord) {
        if candidate.accepted {
            self.blocks.fetch_add(1, Ordering::Relaxed);
        }
        info!(
            login = %candidate.share.login,
            height = candidate.share.height,
            hash = %candidate.block_hash,
            accepted = candidate.accepted,
            "block candidate resolved"
        );
    }
}
