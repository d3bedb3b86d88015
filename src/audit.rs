//! The audit log: WAL + Merkle tree + signed tree heads.
//!
//! Every appended entry is hashed, signed under the WAL domain, written to
//! the WAL (fsync before the commit is acknowledged), and folded into the
//! Merkle tree, whose tiles persist through the tile store. All operations
//! serialize through one mutex; this is the only suspension point in the
//! core. Verification is standalone: `verify_wal_records` rebuilds the tree
//! from raw records without trusting the runtime that wrote them.

use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};

use crate::clock::MonotonicClock;
use crate::codec::{read_u32_be, read_u64_be, CanonicalEncoder};
use crate::crypto::sha256;
use crate::crypto::signatures::{sign_with_domain, verify_with_domain, DOMAIN_WAL_ENTRY};
use crate::merkle::{ConsistencyProof, InclusionProof, MerkleTree, SignedTreeHead};
use crate::storage::TileStore;
use crate::wal::{WalEntry, WalStorage};

/// Receipt for a committed append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppendReceipt {
    pub entry_id: u64,
    pub hash: [u8; 32],
    pub leaf_index: u64,
}

struct AuditInner {
    tree: MerkleTree,
    wal: Box<dyn WalStorage + Send>,
    tiles: Box<dyn TileStore + Send>,
    signing_key: SigningKey,
    next_entry_id: u64,
    log_params_hash: [u8; 32],
    clock: MonotonicClock,
}

/// Serialized audit log actor.
pub struct AuditLog {
    inner: Mutex<AuditInner>,
}

impl AuditLog {
    /// Open the log, replaying any existing WAL records into the tree.
    pub fn open(
        mut wal: Box<dyn WalStorage + Send>,
        tiles: Box<dyn TileStore + Send>,
        signing_key: SigningKey,
        log_params_hash: [u8; 32],
    ) -> Result<Self> {
        let clock = MonotonicClock::get()?;
        let mut tree = MerkleTree::new();
        let mut next_entry_id = 1u64;
        for record in wal.read_all().context("replaying wal")? {
            let entry = WalEntry::decode(&record)?;
            if entry.entry_id != next_entry_id {
                return Err(anyhow!(
                    "wal entry_id not strictly increasing: expected {}, got {}",
                    next_entry_id,
                    entry.entry_id
                ));
            }
            tree.append_hash(&entry.hash);
            next_entry_id += 1;
        }
        Ok(Self {
            inner: Mutex::new(AuditInner {
                tree,
                wal,
                tiles,
                signing_key,
                next_entry_id,
                log_params_hash,
                clock,
            }),
        })
    }

    /// Append entry bytes: sign, write, fsync, then fold into the tree.
    pub fn append(&self, entry_bytes: &[u8]) -> Result<AppendReceipt> {
        let mut inner = self.inner.lock().expect("audit log poisoned");
        let entry_id = inner.next_entry_id;
        let hash = sha256(entry_bytes);
        let signature = sign_with_domain(DOMAIN_WAL_ENTRY, &inner.signing_key, &hash);

        let mut signed = CanonicalEncoder::with_capacity(4 + entry_bytes.len() + 64);
        signed.put_u32_be(entry_bytes.len() as u32);
        signed.put_bytes(entry_bytes);
        signed.put_bytes(&signature);

        let leaf_index = inner.tree.append_hash(&hash);
        let mut merkle_state = CanonicalEncoder::with_capacity(8 + 32);
        merkle_state.put_u64_be(inner.tree.size());
        merkle_state.put_bytes(&inner.tree.root_hash());

        let wal_entry = WalEntry {
            entry_id,
            hash,
            signed_entry_bytes: signed.into_bytes(),
            merkle_state: merkle_state.into_bytes(),
            committed: true,
            timestamp_ns: inner.clock.now_ns()?,
        };
        let record = wal_entry.encode();
        inner.wal.write(&record)?;
        inner.wal.fsync()?;
        let AuditInner { tree, tiles, .. } = &mut *inner;
        tree.persist_tiles(tiles.as_mut())?;
        inner.next_entry_id += 1;
        Ok(AppendReceipt {
            entry_id,
            hash,
            leaf_index,
        })
    }

    /// Sign the current tree head.
    pub fn get_signed_tree_head(&self) -> Result<SignedTreeHead> {
        let inner = self.inner.lock().expect("audit log poisoned");
        let timestamp_ns = inner.clock.now_ns()?;
        Ok(SignedTreeHead::sign(
            inner.tree.size(),
            inner.tree.root_hash(),
            timestamp_ns,
            &inner.signing_key,
            inner.log_params_hash,
        ))
    }

    pub fn size(&self) -> u64 {
        self.inner.lock().expect("audit log poisoned").tree.size()
    }

    pub fn root_hash(&self) -> [u8; 32] {
        self.inner
            .lock()
            .expect("audit log poisoned")
            .tree
            .root_hash()
    }

    pub fn generate_inclusion_proof(&self, leaf_index: u64) -> Result<InclusionProof> {
        self.inner
            .lock()
            .expect("audit log poisoned")
            .tree
            .generate_inclusion_proof(leaf_index)
    }

    pub fn generate_consistency_proof(&self, first_size: u64) -> Result<ConsistencyProof> {
        self.inner
            .lock()
            .expect("audit log poisoned")
            .tree
            .generate_consistency_proof(first_size)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.inner
            .lock()
            .expect("audit log poisoned")
            .signing_key
            .verifying_key()
    }

    /// Flush and close the WAL.
    pub fn close(&self) -> Result<()> {
        self.inner.lock().expect("audit log poisoned").wal.close()
    }
}

/// Outcome of an external WAL verification pass.
#[derive(Clone, Debug)]
pub struct WalVerifyReport {
    pub entry_count: u64,
    pub tree_size: u64,
    pub root_hash: [u8; 32],
}

/// Verify raw WAL records end to end: strictly increasing ids from 1,
/// payload hash match, valid signature, committed flags, and a final Merkle
/// state that matches the rebuilt tree.
pub fn verify_wal_records(
    records: &[Vec<u8>],
    verifying_key: &VerifyingKey,
) -> Result<WalVerifyReport> {
    let mut tree = MerkleTree::new();
    let mut expected_id = 1u64;
    let mut last_state: Option<Vec<u8>> = None;

    for record in records {
        let entry = WalEntry::decode(record)?;
        if entry.entry_id != expected_id {
            return Err(anyhow!(
                "integrity check failed at entry {}: expected id {}",
                entry.entry_id,
                expected_id
            ));
        }
        if !entry.committed {
            return Err(anyhow!(
                "integrity check failed at entry {}: uncommitted record",
                entry.entry_id
            ));
        }

        let (payload, signature) = split_signed_entry(&entry.signed_entry_bytes)
            .with_context(|| format!("entry {}", entry.entry_id))?;
        let computed = sha256(payload);
        if computed != entry.hash {
            return Err(anyhow!(
                "integrity check failed at entry {}: computed_hash={}, stored_hash={}",
                entry.entry_id,
                hex::encode(computed),
                hex::encode(entry.hash)
            ));
        }
        verify_with_domain(DOMAIN_WAL_ENTRY, verifying_key, &entry.hash, &signature)
            .map_err(|e| {
                anyhow!(
                    "integrity check failed at entry {}: {}",
                    entry.entry_id,
                    e
                )
            })?;

        tree.append_hash(&entry.hash);
        last_state = Some(entry.merkle_state.clone());
        expected_id += 1;
    }

    if let Some(state) = &last_state {
        let (size, rest) = read_u64_be(state)?;
        if size != tree.size() || rest != tree.root_hash() {
            return Err(anyhow!(
                "integrity check failed: final merkle state does not match rebuilt tree"
            ));
        }
    }

    Ok(WalVerifyReport {
        entry_count: expected_id - 1,
        tree_size: tree.size(),
        root_hash: tree.root_hash(),
    })
}

/// Split signed entry bytes into (payload, signature).
pub fn split_signed_entry(signed: &[u8]) -> Result<(&[u8], [u8; 64])> {
    let (len, rest) = read_u32_be(signed)?;
    let len = len as usize;
    if rest.len() != len + 64 {
        return Err(anyhow!(
            "malformed signed entry: payload {} + signature 64 != {}",
            len,
            rest.len()
        ));
    }
    let payload = &rest[..len];
    let mut signature = [0u8; 64];
    signature.copy_from_slice(&rest[len..]);
    Ok((payload, signature))
}
