//! Domain-separated Ed25519 signing for audit records.
//!
//! Every signed record hashes its domain tag into the signing pre-image so a
//! signature over a WAL entry can never be replayed as a tree-head
//! signature. The signed tree head itself uses the raw
//! `BE(tree_size) || BE(timestamp_ns) || root_hash` message required by its
//! wire format and is handled in the merkle module, not here.

use anyhow::{anyhow, Result};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

pub const DOMAIN_WAL_ENTRY: &str = "eak:wal-entry:v1";
pub const DOMAIN_PROVENANCE_EXPORT: &str = "eak:provenance-export:v1";

/// Sign an entry hash under a domain tag.
pub fn sign_with_domain(domain: &str, signing_key: &SigningKey, entry_hash: &[u8; 32]) -> [u8; 64] {
    let signing_hash = domain_separated_hash(domain, entry_hash);
    signing_key.sign(&signing_hash).to_bytes()
}

/// Verify a domain-separated entry signature.
pub fn verify_with_domain(
    domain: &str,
    verifying_key: &VerifyingKey,
    entry_hash: &[u8; 32],
    signature: &[u8; 64],
) -> Result<()> {
    let signing_hash = domain_separated_hash(domain, entry_hash);
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    verifying_key
        .verify(&signing_hash, &sig)
        .map_err(|e| anyhow!("signature verification failed: {}", e))
}

fn domain_separated_hash(domain: &str, entry_hash: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    let domain_bytes = domain.as_bytes();
    hasher.update((domain_bytes.len() as u32).to_be_bytes());
    hasher.update(domain_bytes);
    hasher.update(entry_hash);
    hasher.finalize().into()
}
