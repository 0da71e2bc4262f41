//! Template refresh scheduling
//!
//! A polling state machine re-entered on every timer tick. Cheap chain
//! probes (height, then top-block hash) gate the expensive template fetch,
//! and every Nth tick forces a full fetch regardless so mempool changes are
//! never missed. A fetched template whose previous-block hash matches the
//! installed one is discarded, so broadcasts only happen on real chain
//! movement.

use crate::core::RESERVE_SIZE;
use crate::error::Result;
use crate::rpc::{BlockTemplateRpc, DaemonRpc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One step of the refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshState {
    /// Every Nth tick skips the cheap probes entirely.
    CheckForce,
    /// Probe the chain height.
    CheckCount,
    /// Height unchanged: probe the top-block hash to catch reorgs.
    CheckHash,
    /// Fetch and maybe install a full template.
    GetTemplate,
}

/// Drives template fetches against the daemon. Forced refreshes (after a
/// block submit) and timer polls share one async lock so fetches never
/// overlap and never install templates out of order.
pub struct Refresher {
    daemon: Arc<dyn DaemonRpc>,
    pool_address: String,
    force_every: u64,
    tick: AtomicU64,
    /// Height of the last fetched template (top block + 1).
    last_height: AtomicU64,
    /// Previous-block hash of the last fetched template.
    last_prev_hash: Mutex<String>,
    fetch_lock: tokio::sync::Mutex<()>,
}

impl Refresher {
    pub fn new(daemon: Arc<dyn DaemonRpc>, pool_address: String, force_every: u64) -> Self {
        Self {
            daemon,
            pool_address,
            force_every,
            tick: AtomicU64::new(0),
            last_height: AtomicU64::new(0),
            last_prev_hash: Mutex::new(String::new()),
            fetch_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// One timer cycle. Returns a template only when a fresh one should be
    /// installed and broadcast. Any RPC failure aborts the cycle with no
    /// state change; the next tick retries from the top.
    pub async fn poll(&self) -> Result<Option<BlockTemplateRpc>> {
        let _guard = self.fetch_lock.lock().await;
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);

        let mut state = RefreshState::CheckForce;
        loop {
            state = match state {
                RefreshState::CheckForce => {
                    if self.force_every > 0 && tick % self.force_every == 0 {
                        RefreshState::GetTemplate
                    } else {
                        RefreshState::CheckCount
                    }
                }
                RefreshState::CheckCount => {
                    let height = self.daemon.get_block_count().await?;
                    if height != self.last_height.load(Ordering::Relaxed) {
                        RefreshState::GetTemplate
                    } else {
                        RefreshState::CheckHash
                    }
                }
                RefreshState::CheckHash => {
                    let last_height = self.last_height.load(Ordering::Relaxed);
                    let known = self.last_prev_hash.lock().clone();
                    if last_height == 0 || known.is_empty() {
                        RefreshState::GetTemplate
                    } else {
                        // The template's prev hash is the top block's hash.
                        let top = self.daemon.get_block_hash(last_height - 1).await?;
                        if top != known {
                            debug!(height = last_height, "top block hash changed, reorg");
                            RefreshState::GetTemplate
                        } else {
                            return Ok(None);
                        }
                    }
                }
                RefreshState::GetTemplate => return self.fetch_locked().await,
            };
        }
    }

    /// Unconditional fetch, used at startup and right after a submitted
    /// block is accepted.
    pub async fn force(&self) -> Result<Option<BlockTemplateRpc>> {
        let _guard = self.fetch_lock.lock().await;
        self.fetch_locked().await
    }

    async fn fetch_locked(&self) -> Result<Option<BlockTemplateRpc>> {
        let rpc = self
            .daemon
            .get_block_template(RESERVE_SIZE, &self.pool_address)
            .await?;
        self.last_height.store(rpc.height, Ordering::Relaxed);
        {
            let mut last = self.last_prev_hash.lock();
            if *last == rpc.prev_hash && !last.is_empty() {
                debug!(height = rpc.height, "template unchanged");
                return Ok(None);
            }
            *last = rpc.prev_hash.clone();
        }
        Ok(Some(rpc))
    }
}
