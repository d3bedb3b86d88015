//! RFC 9162 Merkle audit tree with signed tree heads.
//!
//! Leaves and interior nodes hash under distinct domain separators (0x00 and
//! 0x01). The tree is append-only and tile-addressable: leaf hashes persist
//! in 256-entry tiles through a `TileStore` so an external verifier can
//! rebuild the tree without the runtime. Inclusion proofs follow §2.1.1 and
//! verify per §2.1.3; consistency proofs follow §2.1.2 / §2.1.4.

use anyhow::{anyhow, Result};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::storage::TileStore;

/// Leaves per persisted tile.
pub const TILE_SIZE: usize = 256;

/// RFC 9162 leaf hash: SHA-256(0x00 || data).
pub fn hash_leaf(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(data);
    hasher.finalize().into()
}

/// RFC 9162 node hash: SHA-256(0x01 || left || right).
pub fn hash_node(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Largest power of two strictly less than `n`.
fn split_point(n: usize) -> usize {
    debug_assert!(n > 1);
    let mut k = 1usize;
    while k * 2 < n {
        k *= 2;
    }
    k
}

/// Append-only Merkle tree over 32-byte entry hashes.
#[derive(Clone, Debug, Default)]
pub struct MerkleTree {
    /// Leaf hashes, i.e. hash_leaf(entry_hash) per appended entry.
    leaf_hashes: Vec<[u8; 32]>,
}

impl MerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry hash; returns its leaf index.
    pub fn append_hash(&mut self, entry_hash: &[u8; 32]) -> u64 {
        self.leaf_hashes.push(hash_leaf(entry_hash));
        (self.leaf_hashes.len() - 1) as u64
    }

    pub fn size(&self) -> u64 {
        self.leaf_hashes.len() as u64
    }

    /// Root over the current leaves. The empty tree hashes the empty string.
    pub fn root_hash(&self) -> [u8; 32] {
        if self.leaf_hashes.is_empty() {
            return Sha256::digest([]).into();
        }
        self.subtree_root(0, self.leaf_hashes.len())
    }

    fn subtree_root(&self, lo: usize, hi: usize) -> [u8; 32] {
        let n = hi - lo;
        if n == 1 {
            return self.leaf_hashes[lo];
        }
        let k = split_point(n);
        hash_node(
            &self.subtree_root(lo, lo + k),
            &self.subtree_root(lo + k, hi),
        )
    }

    /// Inclusion proof for leaf `index` against the current size.
    pub fn generate_inclusion_proof(&self, index: u64) -> Result<InclusionProof> {
        let n = self.leaf_hashes.len();
        if index as usize >= n {
            return Err(anyhow!(
                "leaf_index out of range: {} >= tree_size {}",
                index,
                n
            ));
        }
        let mut path = Vec::new();
        self.collect_path(index as usize, 0, n, &mut path);
        Ok(InclusionProof {
            tree_size: n as u64,
            leaf_index: index,
            path,
        })
    }

    fn collect_path(&self, m: usize, lo: usize, hi: usize, path: &mut Vec<[u8; 32]>) {
        let n = hi - lo;
        if n == 1 {
            return;
        }
        let k = split_point(n);
        if m < k {
            self.collect_path(m, lo, lo + k, path);
            path.push(self.subtree_root(lo + k, hi));
        } else {
            self.collect_path(m - k, lo + k, hi, path);
            path.push(self.subtree_root(lo, lo + k));
        }
    }

    /// Consistency proof that the tree at `first_size` is a prefix of the
    /// current tree.
    pub fn generate_consistency_proof(&self, first_size: u64) -> Result<ConsistencyProof> {
        let n = self.leaf_hashes.len();
        let m = first_size as usize;
        if m == 0 || m > n {
            return Err(anyhow!(
                "consistency first_size out of range: {} for tree_size {}",
                first_size,
                n
            ));
        }
        let path = if m == n {
            Vec::new()
        } else {
            let mut path = Vec::new();
            self.collect_subproof(m, 0, n, true, &mut path);
            path
        };
        Ok(ConsistencyProof {
            first_size,
            second_size: n as u64,
            path,
        })
    }

    fn collect_subproof(
        &self,
        m: usize,
        lo: usize,
        hi: usize,
        complete: bool,
        path: &mut Vec<[u8; 32]>,
    ) {
        let n = hi - lo;
        if m == n {
            if !complete {
                path.push(self.subtree_root(lo, hi));
            }
            return;
        }
        let k = split_point(n);
        if m <= k {
            self.collect_subproof(m, lo, lo + k, complete, path);
            path.push(self.subtree_root(lo + k, hi));
        } else {
            self.collect_subproof(m - k, lo + k, hi, false, path);
            path.push(self.subtree_root(lo, lo + k));
        }
    }

    /// Persist leaf hashes as 256-entry tiles.
    pub fn persist_tiles(&self, store: &mut dyn TileStore) -> Result<()> {
        for (tile_index, chunk) in self.leaf_hashes.chunks(TILE_SIZE).enumerate() {
            let mut bytes = Vec::with_capacity(chunk.len() * 32);
            for leaf in chunk {
                bytes.extend_from_slice(leaf);
            }
            store.put(tile_index as u64, &bytes)?;
        }
        Ok(())
    }

    /// Rebuild a tree from persisted tiles.
    pub fn load_from_tiles(store: &dyn TileStore) -> Result<Self> {
        let mut leaf_hashes = Vec::new();
        let mut tile_index = 0u64;
        while let Some(bytes) = store.get(tile_index)? {
            if bytes.len() % 32 != 0 {
                return Err(anyhow!(
                    "corrupt merkle tile {}: length {} not a multiple of 32",
                    tile_index,
                    bytes.len()
                ));
            }
            for chunk in bytes.chunks_exact(32) {
                let mut leaf = [0u8; 32];
                leaf.copy_from_slice(chunk);
                leaf_hashes.push(leaf);
            }
            if bytes.len() < TILE_SIZE * 32 {
                break;
            }
            tile_index += 1;
        }
        Ok(Self { leaf_hashes })
    }
}

/// Sibling chain from leaf to root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InclusionProof {
    pub tree_size: u64,
    pub leaf_index: u64,
    pub path: Vec<[u8; 32]>,
}

impl InclusionProof {
    /// RFC 9162 §2.1.3 verification against a leaf hash and expected root.
    pub fn verify(&self, leaf_hash: &[u8; 32], root: &[u8; 32]) -> Result<()> {
        if self.leaf_index >= self.tree_size {
            return Err(anyhow!(
                "leaf_index {} >= tree_size {}",
                self.leaf_index,
                self.tree_size
            ));
        }
        let mut fnode = self.leaf_index;
        let mut snode = self.tree_size - 1;
        let mut r = *leaf_hash;
        for p in &self.path {
            if snode == 0 {
                return Err(anyhow!("inclusion path longer than tree depth"));
            }
            if fnode & 1 == 1 || fnode == snode {
                r = hash_node(p, &r);
                if fnode & 1 == 0 {
                    while fnode & 1 == 0 && fnode != 0 {
                        fnode >>= 1;
                        snode >>= 1;
                    }
                }
            } else {
                r = hash_node(&r, p);
            }
            fnode >>= 1;
            snode >>= 1;
        }
        if snode != 0 {
            return Err(anyhow!("inclusion path shorter than tree depth"));
        }
        if &r != root {
            return Err(anyhow!(
                "inclusion proof root mismatch: computed {}, expected {}",
                hex::encode(r),
                hex::encode(root)
            ));
        }
        Ok(())
    }
}

/// Proof that a smaller tree is a prefix of a larger one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsistencyProof {
    pub first_size: u64,
    pub second_size: u64,
    pub path: Vec<[u8; 32]>,
}

impl ConsistencyProof {
    /// RFC 9162 §2.1.4 verification against both roots.
    pub fn verify(&self, first_root: &[u8; 32], second_root: &[u8; 32]) -> Result<()> {
        if self.first_size == self.second_size {
            if !self.path.is_empty() {
                return Err(anyhow!("consistency path must be empty for equal sizes"));
            }
            if first_root != second_root {
                return Err(anyhow!("equal-size consistency with differing roots"));
            }
            return Ok(());
        }
        if self.first_size == 0 || self.first_size > self.second_size {
            return Err(anyhow!(
                "consistency sizes out of range: {} -> {}",
                self.first_size,
                self.second_size
            ));
        }
        if self.path.is_empty() {
            return Err(anyhow!("consistency path is empty"));
        }

        let mut path = self.path.iter();
        // An exact power-of-two prefix starts from its own root.
        let mut fnode = self.first_size - 1;
        let mut snode = self.second_size - 1;
        while fnode & 1 == 1 {
            fnode >>= 1;
            snode >>= 1;
        }
        let (mut fr, mut sr) = if self.first_size.is_power_of_two() {
            (*first_root, *first_root)
        } else {
            let seed = path
                .next()
                .ok_or_else(|| anyhow!("consistency path is empty"))?;
            (*seed, *seed)
        };

        for c in path {
            if snode == 0 {
                return Err(anyhow!("consistency path longer than tree depth"));
            }
            if fnode & 1 == 1 || fnode == snode {
                fr = hash_node(c, &fr);
                sr = hash_node(c, &sr);
                if fnode & 1 == 0 {
                    while fnode & 1 == 0 && fnode != 0 {
                        fnode >>= 1;
                        snode >>= 1;
                    }
                }
            } else {
                sr = hash_node(&sr, c);
            }
            fnode >>= 1;
            snode >>= 1;
        }

        if snode != 0 {
            return Err(anyhow!("consistency path shorter than tree depth"));
        }
        if &fr != first_root {
            return Err(anyhow!("consistency proof first-root mismatch"));
        }
        if &sr != second_root {
            return Err(anyhow!("consistency proof second-root mismatch"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Signed tree head
// ----------------------------------------------------------------------------

/// Ed25519-signed commitment to a tree size and root at a timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    pub root_hash: [u8; 32],
    pub timestamp_ns: u64,
    pub signature: [u8; 64],
    pub log_id: [u8; 32],
    pub log_params_hash: [u8; 32],
}

/// The exact signed message: BE(tree_size) || BE(timestamp_ns) || root_hash.
pub fn tree_head_message(tree_size: u64, timestamp_ns: u64, root_hash: &[u8; 32]) -> [u8; 48] {
    let mut message = [0u8; 48];
    for (i, shift) in [56u32, 48, 40, 32, 24, 16, 8, 0].iter().enumerate() {
        message[i] = (tree_size >> shift) as u8;
        message[8 + i] = (timestamp_ns >> shift) as u8;
    }
    message[16..].copy_from_slice(root_hash);
    message
}

impl SignedTreeHead {
    pub fn sign(
        tree_size: u64,
        root_hash: [u8; 32],
        timestamp_ns: u64,
        signing_key: &SigningKey,
        log_params_hash: [u8; 32],
    ) -> Self {
        let message = tree_head_message(tree_size, timestamp_ns, &root_hash);
        let signature = signing_key.sign(&message).to_bytes();
        let log_id: [u8; 32] =
            Sha256::digest(signing_key.verifying_key().to_bytes()).into();
        Self {
            tree_size,
            root_hash,
            timestamp_ns,
            signature,
            log_id,
            log_params_hash,
        }
    }

    /// Recompute the message and check the signature and log id.
    pub fn verify(&self, verifying_key: &VerifyingKey) -> Result<()> {
        let expected_log_id: [u8; 32] = Sha256::digest(verifying_key.to_bytes()).into();
        if expected_log_id != self.log_id {
            return Err(anyhow!("tree head log_id does not match public key"));
        }
        let message = tree_head_message(self.tree_size, self.timestamp_ns, &self.root_hash);
        let signature = ed25519_dalek::Signature::from_bytes(&self.signature);
        verifying_key
            .verify(&message, &signature)
            .map_err(|e| anyhow!("tree head signature invalid: {}", e))
    }
}
