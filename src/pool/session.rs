//! Miner sessions and outstanding jobs
//!
//! One `MinerSession` per authenticated connection. Sessions own their
//! outstanding jobs (a short FIFO so late shares against a recently replaced
//! job still resolve), the vardiff timing ring, and the optional trust state
//! used to sample-skip hash verification.

use crate::config::TrustConfig;
use crate::pool::vardiff::{RingBuffer, RING_CAPACITY};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outstanding jobs kept per session.
const JOB_CAPACITY: usize = 4;

/// One unit of work issued to one miner.
#[derive(Debug, Clone)]
pub struct Job {
    /// Opaque job id the miner echoes back on submit
    pub id: String,
    /// Extra-nonce bound to the template this job was cut from
    pub extra_nonce: u32,
    /// Template height
    pub height: u64,
    /// Session difficulty at issuance time
    pub difficulty: u64,
    /// Nonces already submitted against this job
    pub submissions: Vec<String>,
}

/// Trust-sampling state for one session.
#[derive(Debug, Clone)]
pub struct TrustState {
    /// Probability that a share is fully verified
    pub probability: f64,
    /// Outstanding penalty shares after a broken trust
    pub penalty: i64,
    /// Accepted shares still required before sampling starts
    pub threshold: i64,
}

impl TrustState {
    /// Fresh trust state from config: full verification until the threshold
    /// is worked off.
    pub fn new(cfg: &TrustConfig) -> Self {
        Self {
            probability: 1.0,
            penalty: 0,
            threshold: cfg.threshold,
        }
    }

    /// True when the session has earned probabilistic verification.
    pub fn eligible(&self) -> bool {
        self.threshold <= 0 && self.penalty <= 0
    }

    /// Bookkeeping after an accepted share.
    pub fn on_accept(&mut self, cfg: &TrustConfig) {
        self.probability -= cfg.step_down as f64 / 100.0;
        let floor = cfg.min as f64 / 100.0;
        if self.probability < floor {
            self.probability = floor;
        }
        self.penalty -= 1;
        self.threshold -= 1;
    }

    /// Bookkeeping after a rejected share: trust is fully revoked.
    pub fn on_reject(&mut self, cfg: &TrustConfig) {
        self.probability = 1.0;
        self.penalty = cfg.penalty;
    }
}

/// One authenticated mining connection.
#[derive(Debug)]
pub struct MinerSession {
    /// Opaque session id handed back from login
    pub id: String,
    /// Wallet address (worker suffix stripped)
    pub login: String,
    /// Worker name parsed from the login, "unknown" if absent
    pub worker_name: String,
    /// Password field; protocol-required, semantically unused
    pub pass: String,
    /// Source address
    pub ip: IpAddr,
    /// Active difficulty
    pub difficulty: u64,
    /// Staged difficulty applied on the next issued job
    pub pending_difficulty: Option<u64>,
    /// Session opted out of retargeting
    pub no_retarget: bool,
    /// Inter-share intervals for vardiff
    pub share_times: RingBuffer,
    /// Unix seconds of the last accepted share
    pub last_share_time: u64,
    /// Last protocol activity, for timeout eviction
    pub last_beat: Instant,
    /// Outstanding jobs, oldest first
    pub valid_jobs: VecDeque<Job>,
    /// Height of the last job issued to this session
    pub last_height: Option<u64>,
    /// Accepted share count
    pub valid_shares: u64,
    /// Rejected share count
    pub invalid_shares: u64,
    /// Trust sampling state when enabled
    pub trust: Option<TrustState>,
    /// Framed lines pushed to the connection (job notifications)
    sender: mpsc::UnboundedSender<String>,
}

impl MinerSession {
    /// Create a session for a fresh login.
    pub fn new(
        login: String,
        worker_name: String,
        pass: String,
        ip: IpAddr,
        difficulty: u64,
        trust: Option<TrustState>,
        sender: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            login,
            worker_name,
            pass,
            ip,
            difficulty,
            pending_difficulty: None,
            no_retarget: false,
            share_times: RingBuffer::new(RING_CAPACITY),
            last_share_time: unix_now(),
            last_beat: Instant::now(),
            valid_jobs: VecDeque::with_capacity(JOB_CAPACITY),
            last_height: None,
            valid_shares: 0,
            invalid_shares: 0,
            trust,
            sender,
        }
    }

    /// Record protocol activity.
    pub fn heartbeat(&mut self) {
        self.last_beat = Instant::now();
    }

    /// Promote a staged difficulty; true if the active value changed.
    pub fn apply_pending_difficulty(&mut self) -> bool {
        match self.pending_difficulty.take() {
            Some(diff) => {
                self.difficulty = diff;
                true
            }
            None => false,
        }
    }

    /// Track a newly issued job, evicting the oldest past capacity.
    pub fn record_job(&mut self, job: Job) {
        self.valid_jobs.push_back(job);
        while self.valid_jobs.len() > JOB_CAPACITY {
            self.valid_jobs.pop_front();
        }
    }

    /// Find an outstanding job by id.
    pub fn find_job_mut(&mut self, job_id: &str) -> Option<&mut Job> {
        self.valid_jobs.iter_mut().find(|j| j.id == job_id)
    }

    /// Push a framed line to the connection; silently dropped once the
    /// socket is gone (the session itself lives until the timeout sweep).
    pub fn push(&self, line: String) {
        let _ = self.sender.send(line);
    }
}

/// Split a login of the form `address.worker` into its parts.
pub fn split_login(login: &str) -> (String, String) {
    match login.split_once('.') {
        Some((address, worker)) if !worker.is_empty() => {
            (address.to_string(), worker.to_string())
        }
        Some((address, _)) => (address.to_string(), "unknown".to_string()),
        None => (login.to_string(), "unknown".to_string()),
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrustConfig;

    fn session() -> MinerSession {
        let (tx, _rx) = mpsc::unbounded_channel();
        MinerSession::new(
            "addr1".to_string(),
            "rigA".to_string(),
            "x".to_string(),
            "127.0.0.1".parse().unwrap(),
            5_000,
            None,
            tx,
        )
    }

    fn job(id: &str, height: u64) -> Job {
        Job {
            id: id.to_string(),
            extra_nonce: 1,
            height,
            difficulty: 5_000,
            submissions: Vec::new(),
        }
    }

    #[test]
    fn test_split_login() {
        assert_eq!(
            split_login("addr1.rigA"),
            ("addr1".to_string(), "rigA".to_string())
        );
        assert_eq!(
            split_login("addr1"),
            ("addr1".to_string(), "unknown".to_string())
        );
        assert_eq!(
            split_login("addr1."),
            ("addr1".to_string(), "unknown".to_string())
        );
    }

    #[test]
    fn test_pending_difficulty_staging() {
        let mut s = session();
        assert!(!s.apply_pending_difficulty());
        assert_eq!(s.difficulty, 5_000);

        s.pending_difficulty = Some(7_500);
        // Active value untouched until promotion at job issuance.
        assert_eq!(s.difficulty, 5_000);
        assert!(s.apply_pending_difficulty());
        assert_eq!(s.difficulty, 7_500);
        assert!(s.pending_difficulty.is_none());
    }

    #[test]
    fn test_job_fifo_eviction() {
        let mut s = session();
        for i in 0..6 {
            s.record_job(job(&format!("job-{i}"), i));
        }
        assert_eq!(s.valid_jobs.len(), 4);
        assert!(s.find_job_mut("job-0").is_none());
        assert!(s.find_job_mut("job-1").is_none());
        assert!(s.find_job_mut("job-2").is_some());
        assert!(s.find_job_mut("job-5").is_some());
    }

    #[test]
    fn test_trust_earning_and_revocation() {
        let cfg = TrustConfig {
            enabled: true,
            min: 20,
            step_down: 40,
            threshold: 2,
            penalty: 30,
        };
        let mut trust = TrustState::new(&cfg);
        assert!(!trust.eligible());

        trust.on_accept(&cfg);
        trust.on_accept(&cfg);
        assert!(trust.eligible());
        // Probability stepped down 40% twice, floored at 20%.
        assert!((trust.probability - 0.2).abs() < 1e-9);

        trust.on_reject(&cfg);
        assert!(!trust.eligible());
        assert_eq!(trust.penalty, 30);
        assert_eq!(trust.probability, 1.0);

        // A full penalty run must be worked off before eligibility returns.
        for _ in 0..30 {
            trust.on_accept(&cfg);
        }
        assert!(trust.eligible());
    }
}
