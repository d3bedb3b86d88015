//! Audit-layer hardening: hash-chain integrity, Merkle inclusion and
//! consistency, signed tree heads, and external WAL verification.

use anyhow::Result;
use ed25519_dalek::SigningKey;
use sha2::{Digest, Sha256};

use evidence_kernel::audit::{verify_wal_records, AuditLog};
use evidence_kernel::merkle::{hash_leaf, hash_node, MerkleTree, SignedTreeHead};
use evidence_kernel::provenance::{
    level_breakdown_digest, piz_summary_digest, PizSummary, ProvenanceChain,
};
use evidence_kernel::state::ColorState;
use evidence_kernel::storage::InMemoryTileStore;
use evidence_kernel::wal::{FileWalStorage, WalStorage};

// ==================== Provenance chain ====================

#[test]
fn first_provenance_hash_matches_manual_sha256() {
    let mut chain = ProvenanceChain::new();
    let hash = chain
        .append_transition(
            1_000_000,
            ColorState::Black,
            ColorState::DarkGray,
            0.25,
            &[100, 0, 0, 0, 0, 0, 0],
            &PizSummary {
                count: 0,
                total_area_sq_m: 0.0,
                excluded_area_sq_m: 0.0,
            },
            "test-digest",
            "test-policy",
        )
        .unwrap();

    let canonical = format!(
        "1000000|black|darkGray|2500|{}|{}|test-digest|test-policy|",
        level_breakdown_digest(&[100, 0, 0, 0, 0, 0, 0]),
        piz_summary_digest(&PizSummary::default()),
    );
    let expected = hex::encode(Sha256::digest(canonical.as_bytes()));
    assert_eq!(hash, expected);
    assert!(chain.verify_chain());
}

#[test]
fn long_chain_survives_verification_and_detects_tampering() {
    let mut chain = ProvenanceChain::new();
    for i in 0..200i64 {
        chain
            .append_transition(
                i * 33,
                ColorState::Black,
                ColorState::DarkGray,
                (i as f64 / 200.0).min(1.0),
                &[i as u64, 0, 1, 0, 2, 0, 3],
                &PizSummary::default(),
                "grid",
                "policy",
            )
            .unwrap();
    }
    assert!(chain.verify_chain());
    assert_eq!(chain.len(), 200);
}

// ==================== Merkle tree ====================

#[test]
fn three_leaf_inclusion_matches_the_specified_shape() {
    let h0 = [10u8; 32];
    let h1 = [11u8; 32];
    let h2 = [12u8; 32];
    let mut tree = MerkleTree::new();
    tree.append_hash(&h0);
    tree.append_hash(&h1);
    tree.append_hash(&h2);

    let root = hash_node(&hash_node(&hash_leaf(&h0), &hash_leaf(&h1)), &hash_leaf(&h2));
    assert_eq!(tree.root_hash(), root);

    let proof = tree.generate_inclusion_proof(1).unwrap();
    assert_eq!(proof.path, vec![hash_leaf(&h0), hash_leaf(&h2)]);
    proof.verify(&hash_leaf(&h1), &root).unwrap();
}

#[test]
fn inclusion_holds_for_every_index_up_to_300_leaves() {
    let mut tree = MerkleTree::new();
    let mut hashes = Vec::new();
    for i in 0..300u32 {
        let mut h = [0u8; 32];
        h[..4].copy_from_slice(&i.to_be_bytes());
        tree.append_hash(&h);
        hashes.push(h);
    }
    let root = tree.root_hash();
    for (i, h) in hashes.iter().enumerate() {
        let proof = tree.generate_inclusion_proof(i as u64).unwrap();
        proof.verify(&hash_leaf(h), &root).unwrap();
    }
}

#[test]
fn consistency_proofs_link_a_growing_log() {
    let mut tree = MerkleTree::new();
    let mut roots = Vec::new();
    for i in 0..64u8 {
        tree.append_hash(&[i; 32]);
        roots.push((tree.size(), tree.root_hash()));
    }
    let final_root = tree.root_hash();
    for (size, root) in roots {
        let proof = tree.generate_consistency_proof(size).unwrap();
        proof.verify(&root, &final_root).unwrap();
    }
}

// ==================== Signed tree heads ====================

#[test]
fn tree_head_signature_binds_all_fields() {
    let signing_key = SigningKey::from_bytes(&[21u8; 32]);
    let mut tree = MerkleTree::new();
    tree.append_hash(&[1u8; 32]);
    tree.append_hash(&[2u8; 32]);

    let sth = SignedTreeHead::sign(
        tree.size(),
        tree.root_hash(),
        42_000_000,
        &signing_key,
        [0u8; 32],
    );
    sth.verify(&signing_key.verifying_key()).unwrap();

    // log_id commits to the public key.
    let expected_log_id: [u8; 32] =
        Sha256::digest(signing_key.verifying_key().to_bytes()).into();
    assert_eq!(sth.log_id, expected_log_id);

    let mut tampered = sth.clone();
    tampered.tree_size = 3;
    assert!(tampered.verify(&signing_key.verifying_key()).is_err());
}

// ==================== WAL + audit log ====================

#[test]
fn audit_log_appends_are_externally_verifiable() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let wal_path = dir.path().join("audit.wal");
    let signing_key = SigningKey::from_bytes(&[33u8; 32]);

    let log = AuditLog::open(
        Box::new(FileWalStorage::open(&wal_path)?),
        Box::new(InMemoryTileStore::default()),
        signing_key.clone(),
        [1u8; 32],
    )?;
    for i in 0..10 {
        let receipt = log.append(format!("decision-{}", i).as_bytes())?;
        assert_eq!(receipt.entry_id, i + 1);
    }
    let sth = log.get_signed_tree_head()?;
    sth.verify(&log.verifying_key())?;
    log.close()?;

    let mut storage = FileWalStorage::open(&wal_path)?;
    let records = storage.read_all()?;
    let report = verify_wal_records(&records, &signing_key.verifying_key())?;
    assert_eq!(report.entry_count, 10);
    assert_eq!(report.tree_size, sth.tree_size);
    assert_eq!(report.root_hash, sth.root_hash);
    Ok(())
}

#[test]
fn flipped_wal_byte_is_detected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let wal_path = dir.path().join("audit.wal");
    let signing_key = SigningKey::from_bytes(&[35u8; 32]);

    let log = AuditLog::open(
        Box::new(FileWalStorage::open(&wal_path)?),
        Box::new(InMemoryTileStore::default()),
        signing_key.clone(),
        [1u8; 32],
    )?;
    log.append(b"decision-a")?;
    log.append(b"decision-b")?;
    log.close()?;

    let mut storage = FileWalStorage::open(&wal_path)?;
    let mut records = storage.read_all()?;
    // Flip one byte of the second record's payload region.
    let mid = records[1].len() / 2;
    records[1][mid] ^= 0x01;
    assert!(verify_wal_records(&records, &signing_key.verifying_key()).is_err());
    Ok(())
}

#[test]
fn wrong_key_fails_wal_verification() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let wal_path = dir.path().join("audit.wal");
    let signing_key = SigningKey::from_bytes(&[37u8; 32]);

    let log = AuditLog::open(
        Box::new(FileWalStorage::open(&wal_path)?),
        Box::new(InMemoryTileStore::default()),
        signing_key,
        [1u8; 32],
    )?;
    log.append(b"decision")?;
    log.close()?;

    let other = SigningKey::from_bytes(&[38u8; 32]);
    let mut storage = FileWalStorage::open(&wal_path)?;
    let records = storage.read_all()?;
    assert!(verify_wal_records(&records, &other.verifying_key()).is_err());
    Ok(())
}
