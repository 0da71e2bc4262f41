//! Block template store
//!
//! Holds the template currently being mined plus a short history of
//! superseded templates so shares against a just-replaced template stay
//! valid briefly. All work blobs are produced here: each one embeds a fresh
//! extra-nonce and the per-process instance id, so no two jobs ever share a
//! blob even across sibling pool processes.

use crate::error::{Error, Result};
use crate::rpc::BlockTemplateRpc;
use std::collections::VecDeque;

/// Offset of the 4-byte block nonce in a CryptoNote block blob.
pub const NONCE_OFFSET: usize = 39;

/// Byte range of the previous-block hash in a block blob.
pub const PREV_HASH_OFFSET: usize = 7;

/// Reserved bytes requested from the daemon (4 extra-nonce + 3 instance id).
pub const RESERVE_SIZE: u64 = 8;

/// Superseded templates kept around for late shares.
const HISTORY_CAPACITY: usize = 3;

/// One block template fetched from the daemon.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    buffer: Vec<u8>,
    /// Network difficulty of the block being mined
    pub difficulty: u64,
    /// Block height of this template
    pub height: u64,
    /// Offset of the reserved extra-nonce region within the blob
    pub reserve_offset: usize,
    /// Previous-block hash sliced out of the blob
    pub prev_hash: [u8; 32],
    /// Monotonic extra-nonce counter, one increment per issued job
    pub extra_nonce: u32,
    /// Proof-of-work seed hash for the current epoch
    pub seed_hash: String,
    /// Seed hash of the next epoch
    pub next_seed_hash: String,
}

impl BlockTemplate {
    /// Build a template from the daemon response, stamping the instance id
    /// into the reserved region.
    pub fn new(rpc: &BlockTemplateRpc, instance_id: &[u8; 3]) -> Result<Self> {
        let mut buffer = hex::decode(&rpc.blocktemplate_blob)
            .map_err(|e| Error::invalid_template(format!("blob is not hex: {e}")))?;

        let reserve_offset = rpc.reserved_offset as usize;
        if buffer.len() < NONCE_OFFSET + 4 {
            return Err(Error::invalid_template(format!(
                "blob too short: {} bytes",
                buffer.len()
            )));
        }
        if reserve_offset + RESERVE_SIZE as usize > buffer.len() {
            return Err(Error::invalid_template(format!(
                "reserved offset {} out of range for {}-byte blob",
                reserve_offset,
                buffer.len()
            )));
        }

        buffer[reserve_offset + 4..reserve_offset + 7].copy_from_slice(instance_id);

        let mut prev_hash = [0u8; 32];
        prev_hash.copy_from_slice(&buffer[PREV_HASH_OFFSET..PREV_HASH_OFFSET + 32]);

        Ok(Self {
            buffer,
            difficulty: rpc.difficulty,
            height: rpc.height,
            reserve_offset,
            prev_hash,
            extra_nonce: 0,
            seed_hash: rpc.seed_hash.clone(),
            next_seed_hash: rpc.next_seed_hash.clone(),
        })
    }

    /// Reconstruct the exact bytes a miner hashed for a given job: the
    /// template blob with the job's extra-nonce and the submitted nonce
    /// written into place.
    pub fn hashing_blob(&self, extra_nonce: u32, nonce: &[u8; 4]) -> Vec<u8> {
        let mut blob = self.buffer.clone();
        blob[self.reserve_offset..self.reserve_offset + 4]
            .copy_from_slice(&extra_nonce.to_be_bytes());
        blob[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(nonce);
        blob
    }

    fn next_blob(&mut self) -> (String, u32) {
        self.extra_nonce += 1;
        let extra_nonce = self.extra_nonce;
        self.buffer[self.reserve_offset..self.reserve_offset + 4]
            .copy_from_slice(&extra_nonce.to_be_bytes());
        (hex::encode(&self.buffer), extra_nonce)
    }
}

/// The active template plus a bounded history of superseded ones.
#[derive(Debug)]
pub struct TemplateStore {
    current: Option<BlockTemplate>,
    history: VecDeque<BlockTemplate>,
    instance_id: [u8; 3],
}

impl TemplateStore {
    /// Create an empty store with the process instance id.
    pub fn new(instance_id: [u8; 3]) -> Self {
        Self {
            current: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            instance_id,
        }
    }

    /// The per-process instance id stamped into every template.
    pub fn instance_id(&self) -> &[u8; 3] {
        &self.instance_id
    }

    /// Install a new active template, moving the old one into history.
    pub fn set_current(&mut self, template: BlockTemplate) {
        if let Some(old) = self.current.take() {
            self.history.push_back(old);
            while self.history.len() > HISTORY_CAPACITY {
                self.history.pop_front();
            }
        }
        self.current = Some(template);
    }

    /// The template currently being mined, if any.
    pub fn current(&self) -> Option<&BlockTemplate> {
        self.current.as_ref()
    }

    /// Resolve a job height to the active template or one still in history.
    pub fn lookup(&self, height: u64) -> Option<&BlockTemplate> {
        if let Some(current) = &self.current {
            if current.height == height {
                return Some(current);
            }
        }
        self.history.iter().find(|t| t.height == height)
    }

    /// Produce the next unique work blob from the active template.
    ///
    /// Increments the template's extra-nonce counter; callers never build
    /// blobs themselves. Returns `None` when no template is installed yet.
    pub fn next_blob(&mut self) -> Option<(String, u32)> {
        self.current.as_mut().map(|t| t.next_blob())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_rpc(height: u64, fill: u8) -> BlockTemplateRpc {
        // 8 reserved bytes starting at offset 50 in a 76-byte blob.
        let mut blob = vec![fill; 76];
        // Distinct prev-hash bytes per height so installs are detectable.
        blob[PREV_HASH_OFFSET] = height as u8;
        BlockTemplateRpc {
            blocktemplate_blob: hex::encode(&blob),
            difficulty: 100_000,
            height,
            reserved_offset: 50,
            prev_hash: String::new(),
            seed_hash: "ab".repeat(32),
            next_seed_hash: String::new(),
        }
    }

    fn store_with(height: u64) -> TemplateStore {
        let mut store = TemplateStore::new([0xAA, 0xBB, 0xCC]);
        let t = BlockTemplate::new(&template_rpc(height, 0x11), store.instance_id()).unwrap();
        store.set_current(t);
        store
    }

    #[test]
    fn test_instance_id_stamped() {
        let store = store_with(1);
        let t = store.current().unwrap();
        assert_eq!(&t.buffer[54..57], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_next_blob_strictly_increasing_and_unique() {
        let mut store = store_with(1);
        let mut seen_blobs = std::collections::HashSet::new();
        let mut last_nonce = 0u32;

        for _ in 0..50 {
            let (blob, extra_nonce) = store.next_blob().unwrap();
            assert!(extra_nonce > last_nonce);
            last_nonce = extra_nonce;
            assert!(seen_blobs.insert(blob));
        }
    }

    #[test]
    fn test_history_capacity_and_fifo_eviction() {
        let mut store = TemplateStore::new([0; 3]);
        for height in 1..=5 {
            let t =
                BlockTemplate::new(&template_rpc(height, 0x11), store.instance_id()).unwrap();
            store.set_current(t);
        }

        assert_eq!(store.current().unwrap().height, 5);
        assert_eq!(store.history.len(), 3);
        // Heights 1 evicted; 2, 3, 4 retained in order.
        assert!(store.lookup(1).is_none());
        for height in 2..=4 {
            assert_eq!(store.lookup(height).unwrap().height, height);
        }
    }

    #[test]
    fn test_lookup_prefers_current() {
        let mut store = store_with(7);
        assert_eq!(store.lookup(7).unwrap().height, 7);
        assert!(store.lookup(8).is_none());

        let t = BlockTemplate::new(&template_rpc(8, 0x22), store.instance_id()).unwrap();
        store.set_current(t);
        assert_eq!(store.lookup(8).unwrap().height, 8);
        assert_eq!(store.lookup(7).unwrap().height, 7);
    }

    #[test]
    fn test_hashing_blob_round_trip() {
        let mut store = store_with(1);
        let (blob_hex, extra_nonce) = store.next_blob().unwrap();
        let issued = hex::decode(blob_hex).unwrap();

        let template = store.lookup(1).unwrap();
        let rebuilt = template.hashing_blob(extra_nonce, &[0xDE, 0xAD, 0xBE, 0xEF]);

        // Identical except the nonce bytes the miner ground through.
        assert_eq!(rebuilt[..NONCE_OFFSET], issued[..NONCE_OFFSET]);
        assert_eq!(&rebuilt[NONCE_OFFSET..NONCE_OFFSET + 4], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(rebuilt[NONCE_OFFSET + 4..], issued[NONCE_OFFSET + 4..]);
    }

    #[test]
    fn test_rejects_short_blob() {
        let mut rpc = template_rpc(1, 0x11);
        rpc.blocktemplate_blob = "aa".repeat(20);
        assert!(BlockTemplate::new(&rpc, &[0; 3]).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_reserve_offset() {
        let mut rpc = template_rpc(1, 0x11);
        rpc.reserved_offset = 75;
        assert!(BlockTemplate::new(&rpc, &[0; 3]).is_err());
    }
}
