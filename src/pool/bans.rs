//! Abuse banning
//!
//! Per-IP valid/invalid share counters feed a ratio check once enough
//! shares accumulate; offenders are banned for a configured window and the
//! ban is published so sibling pool processes drop the IP too. An IP whose
//! sample contains no valid shares at all is banned unconditionally.

use crate::config::BanConfig;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Invalid-share count used to poison an IP after a malformed or duplicate
/// nonce, forcing the next ban check to fire.
const POISON_INVALID: u64 = 999_999;

/// Cross-process ban fan-out boundary. The supervisor that spawns sibling
/// processes relays published bans back into each of them via
/// [`BanList::apply_remote`].
pub trait BanPublisher: Send + Sync {
    /// Announce a freshly issued ban to sibling processes.
    fn publish(&self, ip: IpAddr);
}

/// Publisher for single-process deployments; bans stay local.
#[derive(Debug, Default)]
pub struct LocalBanPublisher;

impl BanPublisher for LocalBanPublisher {
    fn publish(&self, _ip: IpAddr) {}
}

#[derive(Debug, Default, Clone, Copy)]
struct IpStats {
    valid: u64,
    invalid: u64,
}

/// Outcome of recording one share against the ban heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanCheck {
    /// Nothing happened
    Ok,
    /// The IP crossed the ratio and is now banned
    Banned,
}

/// Per-IP ban records and share statistics.
pub struct BanList {
    cfg: BanConfig,
    banned: DashMap<IpAddr, Instant>,
    stats: DashMap<IpAddr, IpStats>,
    publisher: Arc<dyn BanPublisher>,
}

impl BanList {
    /// Create a ban list with the given publisher.
    pub fn new(cfg: BanConfig, publisher: Arc<dyn BanPublisher>) -> Self {
        Self {
            cfg,
            banned: DashMap::new(),
            stats: DashMap::new(),
            publisher,
        }
    }

    fn ban_duration(&self) -> Duration {
        Duration::from_secs(self.cfg.time_secs)
    }

    /// True when the IP has an unexpired ban. Expired records are dropped
    /// lazily here.
    pub fn is_banned(&self, ip: IpAddr) -> bool {
        if !self.cfg.enabled {
            return false;
        }
        let Some(entry) = self.banned.get(&ip) else {
            return false;
        };
        if entry.elapsed() < self.ban_duration() {
            true
        } else {
            drop(entry);
            self.banned.remove(&ip);
            info!(%ip, "ban dropped");
            false
        }
    }

    /// Overwrite the IP's stats so the next check bans: used for malformed
    /// and duplicate nonces, which are abusive regardless of ratio history.
    pub fn poison(&self, ip: IpAddr) {
        if !self.cfg.enabled {
            return;
        }
        self.stats.insert(
            ip,
            IpStats {
                valid: 0,
                invalid: POISON_INVALID,
            },
        );
    }

    /// Record one share outcome and run the threshold check.
    pub fn record(&self, ip: IpAddr, valid: bool) -> BanCheck {
        if !self.cfg.enabled {
            return BanCheck::Ok;
        }

        let mut stats = self.stats.entry(ip).or_default();
        if valid {
            stats.valid += 1;
        } else {
            stats.invalid += 1;
        }

        if stats.valid + stats.invalid < self.cfg.check_threshold {
            return BanCheck::Ok;
        }

        // All-invalid samples ban unconditionally; the ratio is undefined
        // with zero valid shares.
        let over_ratio = stats.valid == 0
            || stats.invalid as f64 / stats.valid as f64
                >= self.cfg.invalid_percent as f64 / 100.0;

        if over_ratio && stats.invalid > 0 {
            drop(stats);
            self.banned.insert(ip, Instant::now());
            self.publisher.publish(ip);
            warn!(%ip, "banned for excessive invalid shares");
            BanCheck::Banned
        } else {
            stats.valid = 0;
            stats.invalid = 0;
            BanCheck::Ok
        }
    }

    /// Apply a ban announced by a sibling process.
    pub fn apply_remote(&self, ip: IpAddr) {
        self.banned.insert(ip, Instant::now());
        info!(%ip, "ban received from sibling process");
    }

    /// Drop expired bans and their statistics; run from the periodic sweep.
    pub fn sweep(&self) {
        if !self.cfg.enabled {
            return;
        }
        let duration = self.ban_duration();
        let expired: Vec<IpAddr> = self
            .banned
            .iter()
            .filter(|entry| entry.value().elapsed() > duration)
            .map(|entry| *entry.key())
            .collect();
        for ip in expired {
            self.banned.remove(&ip);
            self.stats.remove(&ip);
            info!(%ip, "ban dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingPublisher(Mutex<Vec<IpAddr>>);

    impl BanPublisher for RecordingPublisher {
        fn publish(&self, ip: IpAddr) {
            self.0.lock().push(ip);
        }
    }

    fn cfg(threshold: u64, percent: u64) -> BanConfig {
        BanConfig {
            enabled: true,
            time_secs: 600,
            invalid_percent: percent,
            check_threshold: threshold,
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn test_ban_fires_at_ratio() {
        // Threshold 10, 25%: 8 valid + 2 invalid = 2/8 = 25% >= 25%.
        let bans = BanList::new(cfg(10, 25), Arc::new(LocalBanPublisher));
        for _ in 0..8 {
            assert_eq!(bans.record(ip(1), true), BanCheck::Ok);
        }
        assert_eq!(bans.record(ip(1), false), BanCheck::Ok);
        assert_eq!(bans.record(ip(1), false), BanCheck::Banned);
        assert!(bans.is_banned(ip(1)));
    }

    #[test]
    fn test_counters_reset_below_ratio() {
        // 9 valid + 1 invalid = 11% < 25%: counters reset, no ban.
        let bans = BanList::new(cfg(10, 25), Arc::new(LocalBanPublisher));
        for _ in 0..9 {
            assert_eq!(bans.record(ip(2), true), BanCheck::Ok);
        }
        assert_eq!(bans.record(ip(2), false), BanCheck::Ok);
        assert!(!bans.is_banned(ip(2)));

        let stats = *bans.stats.get(&ip(2)).unwrap();
        assert_eq!(stats.valid, 0);
        assert_eq!(stats.invalid, 0);
    }

    #[test]
    fn test_all_invalid_bans_unconditionally() {
        let bans = BanList::new(cfg(5, 25), Arc::new(LocalBanPublisher));
        for _ in 0..4 {
            assert_eq!(bans.record(ip(3), false), BanCheck::Ok);
        }
        assert_eq!(bans.record(ip(3), false), BanCheck::Banned);
    }

    #[test]
    fn test_all_valid_resets_without_ban() {
        let bans = BanList::new(cfg(5, 25), Arc::new(LocalBanPublisher));
        for _ in 0..4 {
            assert_eq!(bans.record(ip(4), true), BanCheck::Ok);
        }
        assert_eq!(bans.record(ip(4), true), BanCheck::Ok);
        assert!(!bans.is_banned(ip(4)));
    }

    #[test]
    fn test_poison_forces_ban_on_next_record() {
        let bans = BanList::new(cfg(30, 25), Arc::new(LocalBanPublisher));
        bans.poison(ip(5));
        assert_eq!(bans.record(ip(5), false), BanCheck::Banned);
    }

    #[test]
    fn test_ban_published() {
        let publisher = Arc::new(RecordingPublisher(Mutex::new(Vec::new())));
        let bans = BanList::new(cfg(2, 25), publisher.clone());
        bans.record(ip(6), false);
        bans.record(ip(6), false);
        assert_eq!(publisher.0.lock().as_slice(), &[ip(6)]);
    }

    #[test]
    fn test_remote_ban_applies() {
        let bans = BanList::new(cfg(10, 25), Arc::new(LocalBanPublisher));
        bans.apply_remote(ip(7));
        assert!(bans.is_banned(ip(7)));
    }

    #[test]
    fn test_expired_ban_lazily_dropped() {
        let mut config = cfg(10, 25);
        config.time_secs = 0;
        let bans = BanList::new(config, Arc::new(LocalBanPublisher));
        bans.apply_remote(ip(8));
        // Zero-length ban expires immediately.
        assert!(!bans.is_banned(ip(8)));
        assert!(bans.banned.get(&ip(8)).is_none());
    }

    #[test]
    fn test_disabled_banning_is_inert() {
        let mut config = cfg(2, 25);
        config.enabled = false;
        let bans = BanList::new(config, Arc::new(LocalBanPublisher));
        for _ in 0..10 {
            assert_eq!(bans.record(ip(9), false), BanCheck::Ok);
        }
        assert!(!bans.is_banned(ip(9)));
    }
}
