//! Pool server
//!
//! Owns the template store, the session table, the ban list and the share
//! pipeline, and dispatches the four miner-facing methods. Connection
//! plumbing lives in [`crate::net`]; everything protocol-visible that
//! happens after a line is parsed happens here.

pub mod bans;
pub mod refresh;
pub mod session;
pub mod shares;
pub mod stats;
pub mod vardiff;

use crate::config::Config;
use crate::core::target::difficulty_to_target_hex;
use crate::core::{BlockTemplate, TemplateStore};
use crate::error::Result;
use crate::net::protocol::{
    GetJobParams, JobPayload, KeepalivedParams, LoginParams, LoginResult, RpcNotification,
    RpcRequest, RpcResponse, SubmitParams, to_line,
};
use crate::pow::PowHasher;
use crate::pool::bans::{BanCheck, BanList, BanPublisher};
use crate::pool::refresh::Refresher;
use crate::pool::session::{split_login, unix_now, Job, MinerSession, TrustState};
use crate::pool::shares::{claimed_hash, classify, nonce_bytes, normalize_nonce, ShareClass};
use crate::pool::stats::{CandidateRecord, ShareRecord, ShareSink};
use crate::pool::vardiff::VarDiffBounds;
use crate::rpc::{BlockTemplateRpc, DaemonRpc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde_json::Value;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session table entry. The source IP sits outside the mutex so ban
/// eviction can match sessions without taking their locks.
struct SessionEntry {
    ip: IpAddr,
    inner: Arc<Mutex<MinerSession>>,
}

/// Shared pool state behind every connection.
pub struct PoolServer {
    config: Arc<Config>,
    daemon: Arc<dyn DaemonRpc>,
    pow: Arc<dyn PowHasher>,
    sink: Arc<dyn ShareSink>,
    templates: RwLock<TemplateStore>,
    sessions: DashMap<String, SessionEntry>,
    bans: BanList,
    refresher: Refresher,
    vardiff_bounds: VarDiffBounds,
    /// Network prefix of the pool wallet; logins must match it (or the
    /// integrated-address variant, prefix + 1).
    pool_prefix: u64,
}

impl PoolServer {
    pub fn new(
        config: Arc<Config>,
        daemon: Arc<dyn DaemonRpc>,
        pow: Arc<dyn PowHasher>,
        sink: Arc<dyn ShareSink>,
        ban_publisher: Arc<dyn BanPublisher>,
    ) -> Result<Self> {
        let pool_prefix = crate::core::address::address_prefix(&config.pool.pool_address)?;
        let instance_id: [u8; 3] = rand::rng().random();
        let refresher = Refresher::new(
            daemon.clone(),
            config.pool.pool_address.clone(),
            config.pool.force_refresh_every,
        );
        Ok(Self {
            bans: BanList::new(config.pool.banning.clone(), ban_publisher),
            vardiff_bounds: VarDiffBounds::from_config(&config.pool.var_diff),
            templates: RwLock::new(TemplateStore::new(instance_id)),
            sessions: DashMap::new(),
            config,
            daemon,
            pow,
            sink,
            refresher,
            pool_prefix,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.bans.is_banned(ip)
    }

    /// Apply a ban relayed from a sibling process.
    pub fn apply_remote_ban(&self, ip: IpAddr) {
        self.bans.apply_remote(ip);
    }

    /// Fetch the first template; fatal when the daemon is unreachable so a
    /// misconfigured pool never accepts miners it cannot feed.
    pub async fn bootstrap(&self) -> Result<()> {
        let rpc = self.refresher.force().await?.ok_or_else(|| {
            crate::error::Error::invalid_template("daemon returned no initial template")
        })?;
        let height = rpc.height;
        self.install_template(&rpc)?;
        info!(height, "initial block template installed");
        Ok(())
    }

    /// One refresh timer cycle: probe the chain, install and broadcast a new
    /// template when one appears.
    pub async fn refresh_cycle(&self) {
        match self.refresher.poll().await {
            Ok(Some(rpc)) => {
                let height = rpc.height;
                match self.install_template(&rpc) {
                    Ok(()) => {
                        info!(height, difficulty = rpc.difficulty, "new block template");
                        self.broadcast_jobs();
                    }
                    Err(err) => warn!(height, %err, "rejected block template"),
                }
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "template refresh failed"),
        }
    }

    fn install_template(&self, rpc: &BlockTemplateRpc) -> Result<()> {
        let mut templates = self.templates.write();
        let instance_id = *templates.instance_id();
        let template = BlockTemplate::new(rpc, &instance_id)?;
        templates.set_current(template);
        Ok(())
    }

    /// Snapshot the session handles so callers never hold a map shard lock
    /// while taking a session mutex.
    fn session_handles(&self) -> Vec<Arc<Mutex<MinerSession>>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().inner.clone())
            .collect()
    }

    /// Push a fresh job to every connected session.
    fn broadcast_jobs(&self) {
        for handle in self.session_handles() {
            let mut session = handle.lock();
            if let Some(job) = self.issue_job(&mut session) {
                session.push(to_line(&RpcNotification::job(job)));
            }
        }
    }

    /// Cut a job for one session. Returns the blank job when the session is
    /// already mining the current height with no difficulty change staged,
    /// `None` when no template is installed.
    fn issue_job(&self, session: &mut MinerSession) -> Option<JobPayload> {
        let mut templates = self.templates.write();
        let current_height = templates.current()?.height;
        if session.last_height == Some(current_height) && session.pending_difficulty.is_none() {
            return Some(JobPayload::empty());
        }

        session.apply_pending_difficulty();
        let (blob, extra_nonce) = templates.next_blob()?;
        let template = templates.current()?;
        let job = Job {
            id: Uuid::new_v4().simple().to_string(),
            extra_nonce,
            height: template.height,
            difficulty: session.difficulty,
            submissions: Vec::new(),
        };
        let payload = JobPayload {
            blob,
            job_id: job.id.clone(),
            target: difficulty_to_target_hex(session.difficulty),
            algo: "rx/0".to_string(),
            height: template.height,
            seed_hash: template.seed_hash.clone(),
            next_seed_hash: template.next_seed_hash.clone(),
        };
        session.last_height = Some(template.height);
        session.record_job(job);
        Some(payload)
    }

    /// Handle one parsed request line. `None` means no reply goes out,
    /// which is how malformed frames are treated.
    pub fn dispatch(
        self: &Arc<Self>,
        ip: IpAddr,
        port_difficulty: u64,
        request: RpcRequest,
        sender: &mpsc::UnboundedSender<String>,
    ) -> Option<String> {
        let (Some(id), Some(method), Some(params)) =
            (request.id, request.method, request.params)
        else {
            warn!(%ip, "malformed request, missing id, method or params");
            return None;
        };

        if self.bans.is_banned(ip) {
            return Some(to_line(&RpcResponse::err(id, "Your IP is banned")));
        }

        let response = match method.as_str() {
            "login" => self.handle_login(ip, port_difficulty, id, params, sender),
            "getjob" => self.handle_getjob(id, params),
            "submit" => self.handle_submit(ip, id, params),
            "keepalived" => self.handle_keepalived(id, params),
            other => {
                warn!(%ip, method = other, "unknown method");
                RpcResponse::err(id, "Invalid method")
            }
        };
        Some(to_line(&response))
    }

    fn handle_login(
        self: &Arc<Self>,
        ip: IpAddr,
        port_difficulty: u64,
        id: Value,
        params: Value,
        sender: &mpsc::UnboundedSender<String>,
    ) -> RpcResponse {
        let params: LoginParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(_) => return RpcResponse::err(id, "Missing login"),
        };
        if params.login.is_empty() {
            return RpcResponse::err(id, "Missing login");
        }

        let (address, worker_name) = split_login(&params.login);
        match crate::core::address::address_prefix(&address) {
            // Payout prefix, or the integrated-address variant.
            Ok(prefix) if prefix == self.pool_prefix || prefix == self.pool_prefix + 1 => {}
            _ => {
                warn!(%ip, login = %params.login, "invalid address used for login");
                return RpcResponse::err(id, "Invalid address used for login");
            }
        }

        let trust = self
            .config
            .pool
            .share_trust
            .enabled
            .then(|| TrustState::new(&self.config.pool.share_trust));
        let mut session = MinerSession::new(
            address,
            worker_name,
            params.pass,
            ip,
            port_difficulty,
            trust,
            sender.clone(),
        );

        let Some(job) = self.issue_job(&mut session) else {
            return RpcResponse::err(id, "Block template not available");
        };
        let session_id = session.id.clone();
        info!(
            %ip,
            login = %session.login,
            worker = %session.worker_name,
            agent = %params.agent,
            difficulty = session.difficulty,
            "miner connected"
        );
        self.sessions.insert(
            session_id.clone(),
            SessionEntry {
                ip,
                inner: Arc::new(Mutex::new(session)),
            },
        );

        let result = LoginResult {
            id: session_id,
            job,
            status: "OK",
        };
        match serde_json::to_value(result) {
            Ok(value) => RpcResponse::ok(id, value),
            Err(_) => RpcResponse::err(id, "Internal error"),
        }
    }

    fn handle_getjob(&self, id: Value, params: Value) -> RpcResponse {
        let params: GetJobParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(_) => return RpcResponse::err(id, "Unauthenticated"),
        };
        let Some(entry) = self.sessions.get(&params.id) else {
            return RpcResponse::err(id, "Unauthenticated");
        };
        let session_arc = entry.value().inner.clone();
        drop(entry);
        let mut session = session_arc.lock();
        session.heartbeat();
        match self.issue_job(&mut session) {
            Some(job) => match serde_json::to_value(job) {
                Ok(value) => RpcResponse::ok(id, value),
                Err(_) => RpcResponse::err(id, "Internal error"),
            },
            None => RpcResponse::err(id, "Block template not available"),
        }
    }

    fn handle_keepalived(&self, id: Value, params: Value) -> RpcResponse {
        let params: KeepalivedParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(_) => return RpcResponse::err(id, "Unauthenticated"),
        };
        let Some(handle) = self.sessions.get(&params.id).map(|e| e.value().inner.clone()) else {
            return RpcResponse::err(id, "Unauthenticated");
        };
        handle.lock().heartbeat();
        RpcResponse::ok(id, serde_json::json!({ "status": "KEEPALIVED" }))
    }

    fn handle_submit(self: &Arc<Self>, ip: IpAddr, id: Value, params: Value) -> RpcResponse {
        let params: SubmitParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(_) => return RpcResponse::err(id, "Unauthenticated"),
        };
        let Some(entry) = self.sessions.get(&params.id) else {
            return RpcResponse::err(id, "Unauthenticated");
        };
        let session_arc = entry.value().inner.clone();
        drop(entry);
        let mut session = session_arc.lock();
        session.heartbeat();

        let job_difficulty;
        let extra_nonce;
        let job_height;
        let nonce;
        {
            // A stale job id is a protocol race, not abuse: no ban stat.
            let Some(job) = session.find_job_mut(&params.job_id) else {
                return RpcResponse::err(id, "Invalid job id");
            };
            // A malformed nonce is punished exactly like a duplicate.
            let Some(canonical) = normalize_nonce(&params.nonce) else {
                warn!(%ip, login = %session.login, nonce = %params.nonce, "malformed nonce");
                self.bans.poison(ip);
                self.reject_share(&mut session, ip);
                return RpcResponse::err(id, "Duplicate share");
            };
            if job.submissions.contains(&canonical) {
                warn!(%ip, login = %session.login, nonce = %canonical, "duplicate share");
                self.bans.poison(ip);
                self.reject_share(&mut session, ip);
                return RpcResponse::err(id, "Duplicate share");
            }
            job.submissions.push(canonical.clone());
            job_difficulty = job.difficulty;
            extra_nonce = job.extra_nonce;
            job_height = job.height;
            nonce = canonical;
        }

        // Rebuild the block from the stored template; a missing height means
        // the template rotated out of history before the share arrived.
        let (block_blob, template_difficulty, seed_hash) = {
            let templates = self.templates.read();
            let Some(template) = templates.lookup(job_height) else {
                debug!(login = %session.login, height = job_height, "share for expired block");
                return RpcResponse::err(id, "Block expired");
            };
            let Some(nonce_raw) = nonce_bytes(&nonce) else {
                return RpcResponse::err(id, "Duplicate share");
            };
            (
                template.hashing_blob(extra_nonce, &nonce_raw),
                template.difficulty,
                template.seed_hash.clone(),
            )
        };

        let trust_cfg = &self.config.pool.share_trust;
        let trusted = trust_cfg.enabled
            && session
                .trust
                .as_ref()
                .is_some_and(|t| t.eligible() && rand::rng().random::<f64>() > t.probability);

        // Trusted shares skip verification but still walk the difficulty
        // ladder on the claimed hash, so a trusted miner's block still gets
        // submitted.
        let class = if trusted {
            let Some(claimed) = claimed_hash(&params.result.to_lowercase()) else {
                warn!(%ip, login = %session.login, "bad hash from miner");
                self.reject_share(&mut session, ip);
                return RpcResponse::err(id, "Low difficulty share");
            };
            debug!(login = %session.login, "share accepted on trust");
            classify(&claimed, job_difficulty, template_difficulty)
        } else {
            let hash = self.pow.hash(&block_blob, &seed_hash);
            if hex::encode(hash) != params.result.to_lowercase() {
                warn!(%ip, login = %session.login, "bad hash from miner");
                self.reject_share(&mut session, ip);
                return RpcResponse::err(id, "Low difficulty share");
            }
            classify(&hash, job_difficulty, template_difficulty)
        };

        match class {
            ShareClass::TooLow { hash_difficulty } => {
                warn!(
                    login = %session.login,
                    %hash_difficulty,
                    job_difficulty,
                    "low difficulty share"
                );
                self.reject_share(&mut session, ip);
                RpcResponse::err(id, "Low difficulty share")
            }
            ShareClass::Accepted => {
                self.accept_share(&mut session, ip, job_difficulty, job_height, false);
                RpcResponse::ok(id, serde_json::json!({ "status": "OK" }))
            }
            ShareClass::Candidate { hash_difficulty } => {
                info!(
                    login = %session.login,
                    height = job_height,
                    %hash_difficulty,
                    template_difficulty,
                    "block candidate found"
                );
                let record =
                    self.accept_share(&mut session, ip, job_difficulty, job_height, true);
                drop(session);
                self.spawn_block_submit(block_blob, params.result.to_lowercase(), record);
                RpcResponse::ok(id, serde_json::json!({ "status": "OK" }))
            }
        }
    }

    /// Shared bookkeeping for an accepted share; returns the record handed
    /// to the sink.
    fn accept_share(
        self: &Arc<Self>,
        session: &mut MinerSession,
        ip: IpAddr,
        difficulty: u64,
        height: u64,
        block_candidate: bool,
    ) -> ShareRecord {
        let now = unix_now();
        let since_last = now.saturating_sub(session.last_share_time);
        session.share_times.append(since_last);
        session.last_share_time = now;
        session.valid_shares += 1;
        if let Some(trust) = session.trust.as_mut() {
            trust.on_accept(&self.config.pool.share_trust);
        }
        self.bans.record(ip, true);

        let record = ShareRecord {
            login: session.login.clone(),
            worker_name: session.worker_name.clone(),
            ip: ip.to_string(),
            difficulty,
            height,
            block_candidate,
        };
        let sink = self.sink.clone();
        let share = record.clone();
        tokio::spawn(async move { sink.record_share(share).await });
        record
    }

    /// Shared bookkeeping for a rejected share.
    fn reject_share(self: &Arc<Self>, session: &mut MinerSession, ip: IpAddr) {
        session.invalid_shares += 1;
        if let Some(trust) = session.trust.as_mut() {
            trust.on_reject(&self.config.pool.share_trust);
        }
        if self.bans.record(ip, false) == BanCheck::Banned {
            self.drop_sessions_for(ip);
        }
    }

    fn drop_sessions_for(&self, ip: IpAddr) {
        self.sessions.retain(|_, entry| entry.ip != ip);
    }

    /// Submit a candidate block upstream without blocking the reply path.
    /// An accepted block forces a template refresh; a daemon rejection is
    /// recorded but the miner keeps the share credit either way.
    fn spawn_block_submit(self: &Arc<Self>, block_blob: Vec<u8>, hash_hex: String, share: ShareRecord) {
        let pool = self.clone();
        tokio::spawn(async move {
            let blob_hex = hex::encode(&block_blob);
            let accepted = match pool.daemon.submit_block(&blob_hex).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(height = share.height, %err, "block submit rejected by daemon");
                    false
                }
            };
            if accepted {
                info!(height = share.height, hash = %hash_hex, "block accepted by daemon");
            }
            pool.sink
                .record_candidate(CandidateRecord {
                    share,
                    block_hash: hash_hex,
                    accepted,
                })
                .await;
            if accepted {
                pool.refresh_after_block().await;
            }
        });
    }

    async fn refresh_after_block(&self) {
        match self.refresher.force().await {
            Ok(Some(rpc)) => {
                let height = rpc.height;
                match self.install_template(&rpc) {
                    Ok(()) => {
                        info!(height, "template refreshed after block");
                        self.broadcast_jobs();
                    }
                    Err(err) => warn!(height, %err, "rejected block template"),
                }
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "template refresh after block failed"),
        }
    }

    /// Recompute difficulty for every session; run on the retarget timer.
    /// A changed difficulty is staged and a fresh job pushed immediately.
    pub fn retarget_all(self: &Arc<Self>) {
        let cfg = &self.config.pool.var_diff;
        let now = unix_now();
        for handle in self.session_handles() {
            let mut session = handle.lock();
            if session.no_retarget {
                continue;
            }
            let since_last = now.saturating_sub(session.last_share_time);
            let slow = (since_last as f64) > self.vardiff_bounds.t_max;
            let Some(avg) = session.share_times.avg(slow.then_some(since_last)) else {
                continue;
            };
            let Some(new_diff) = vardiff::retarget(cfg, &self.vardiff_bounds, session.difficulty, avg)
            else {
                continue;
            };
            debug!(
                login = %session.login,
                old = session.difficulty,
                new = new_diff,
                avg,
                "retargeting difficulty"
            );
            session.pending_difficulty = Some(new_diff);
            session.share_times.clear();
            if slow {
                session.last_share_time = now;
            }
            if let Some(job) = self.issue_job(&mut session) {
                session.push(to_line(&RpcNotification::job(job)));
            }
        }
    }

    /// Evict timed-out sessions and expired bans; run every 30 seconds.
    pub fn sweep(&self) {
        let timeout = Duration::from_secs(self.config.pool.miner_timeout_secs);
        let keys: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            let Some(handle) = self.sessions.get(&key).map(|e| e.value().inner.clone()) else {
                continue;
            };
            let expired = handle.lock().last_beat.elapsed() > timeout;
            if expired {
                if let Some((_, entry)) = self.sessions.remove(&key) {
                    let session = entry.inner.lock();
                    info!(login = %session.login, worker = %session.worker_name, "miner timed out");
                }
            }
        }
        self.bans.sweep();
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
