//! Tamper-evident provenance chain over state transitions.
//!
//! Each transition hashes a canonical `|`-separated pre-image that threads
//! the previous entry's hash, so any in-place edit breaks every hash after
//! it. The chain is append-only for the life of a session and verifiable
//! end-to-end without trusting the runtime that wrote it.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::grid::LEVEL_COUNT;
use crate::numeric::canonical::canonicalize_f64;
use crate::state::ColorState;

/// Protected-zone summary feeding the provenance digest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PizSummary {
    pub count: u64,
    pub total_area_sq_m: f64,
    pub excluded_area_sq_m: f64,
}

/// One chained transition record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub timestamp_ms: i64,
    pub from_state: ColorState,
    pub to_state: ColorState,
    /// Coverage in basis points: round(coverage * 10000).
    pub coverage_quantized: i32,
    pub level_breakdown_digest: String,
    pub piz_summary_digest: String,
    pub grid_digest: String,
    pub policy_digest: String,
    pub prev_hash: String,
    pub hash: String,
}

impl ProvenanceEntry {
    /// The canonical pre-image: fixed field order, `|` separator, UTF-8, no
    /// whitespace. `prev_hash` is the empty string for the first entry.
    fn canonical_string(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.timestamp_ms,
            self.from_state.raw(),
            self.to_state.raw(),
            self.coverage_quantized,
            self.level_breakdown_digest,
            self.piz_summary_digest,
            self.grid_digest,
            self.policy_digest,
            self.prev_hash
        )
    }
}

/// Digest of the per-level cell counts, canonicalized as `L0=c0\n...L6=c6`.
pub fn level_breakdown_digest(counts: &[u64; LEVEL_COUNT]) -> String {
    let lines: Vec<String> = counts
        .iter()
        .enumerate()
        .map(|(level, count)| format!("L{}={}", level, count))
        .collect();
    sha256_hex(lines.join("\n").as_bytes())
}

/// Digest of a protected-zone summary. Areas are canonicalized first so
/// -0.0, subnormals, and odd NaN payloads cannot fork the digest.
pub fn piz_summary_digest(summary: &PizSummary) -> String {
    let canonical = format!(
        "count={}\ntotalAreaSqM={}\nexcludedAreaSqM={}",
        summary.count,
        canonicalize_f64(summary.total_area_sq_m),
        canonicalize_f64(summary.excluded_area_sq_m)
    );
    sha256_hex(canonical.as_bytes())
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Append-only hash chain of state transitions.
#[derive(Clone, Debug, Default)]
pub struct ProvenanceChain {
    entries: Vec<ProvenanceEntry>,
    last_hash: String,
}

impl ProvenanceChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one transition; returns the entry's 64-char lowercase hex hash.
    #[allow(clippy::too_many_arguments)]
    pub fn append_transition(
        &mut self,
        timestamp_ms: i64,
        from_state: ColorState,
        to_state: ColorState,
        coverage: f64,
        level_breakdown: &[u64; LEVEL_COUNT],
        piz: &PizSummary,
        grid_digest: &str,
        policy_digest: &str,
    ) -> Result<String> {
        if !coverage.is_finite() {
            return Err(anyhow!(
                "coverage must be finite for provenance, got {}",
                coverage
            ));
        }
        let coverage_quantized = (coverage * 10_000.0).round() as i32;
        let mut entry = ProvenanceEntry {
            timestamp_ms,
            from_state,
            to_state,
            coverage_quantized,
            level_breakdown_digest: level_breakdown_digest(level_breakdown),
            piz_summary_digest: piz_summary_digest(piz),
            grid_digest: grid_digest.to_string(),
            policy_digest: policy_digest.to_string(),
            prev_hash: self.last_hash.clone(),
            hash: String::new(),
        };
        entry.hash = sha256_hex(entry.canonical_string().as_bytes());
        self.last_hash = entry.hash.clone();
        self.entries.push(entry);
        Ok(self.last_hash.clone())
    }

    /// Recompute every hash from entry 0; false on any mismatch.
    pub fn verify_chain(&self) -> bool {
        let mut expected_prev = String::new();
        for entry in &self.entries {
            if entry.prev_hash != expected_prev {
                return false;
            }
            let recomputed = sha256_hex(entry.canonical_string().as_bytes());
            if recomputed != entry.hash {
                return false;
            }
            expected_prev = entry.hash.clone();
        }
        true
    }

    pub fn entries(&self) -> &[ProvenanceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    /// Test-and-tooling access for tamper experiments.
    #[cfg(test)]
    pub(crate) fn entries_mut(&mut self) -> &mut Vec<ProvenanceEntry> {
        &mut self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_sample(chain: &mut ProvenanceChain, t: i64, coverage: f64) -> String {
        chain
            .append_transition(
                t,
                ColorState::Black,
                ColorState::DarkGray,
                coverage,
                &[100, 0, 0, 0, 0, 0, 0],
                &PizSummary::default(),
                "test-digest",
                "test-policy",
            )
            .unwrap()
    }

    #[test]
    fn first_entry_hash_is_reproducible_by_hand() {
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

        // Independent recomputation over the documented pre-image.
        let lbd = level_breakdown_digest(&[100, 0, 0, 0, 0, 0, 0]);
        let pizd = piz_summary_digest(&PizSummary::default());
        let canonical = format!(
            "1000000|black|darkGray|2500|{}|{}|test-digest|test-policy|",
            lbd, pizd
        );
        let expected = hex::encode(Sha256::digest(canonical.as_bytes()));
        assert_eq!(hash, expected);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash.to_lowercase());
    }

    #[test]
    fn chain_verifies_after_many_appends() {
        let mut chain = ProvenanceChain::new();
        for i in 0..50 {
            append_sample(&mut chain, i * 1000, 0.01 * i as f64);
        }
        assert_eq!(chain.len(), 50);
        assert!(chain.verify_chain());
    }

    #[test]
    fn prev_hash_threads_forward() {
        let mut chain = ProvenanceChain::new();
        let first = append_sample(&mut chain, 0, 0.1);
        append_sample(&mut chain, 1000, 0.2);
        assert_eq!(chain.entries()[0].prev_hash, "");
        assert_eq!(chain.entries()[1].prev_hash, first);
    }

    #[test]
    fn flipping_a_stored_hash_breaks_verification() {
        let mut chain = ProvenanceChain::new();
        append_sample(&mut chain, 0, 0.1);
        append_sample(&mut chain, 1000, 0.2);
        assert!(chain.verify_chain());

        let original = chain.entries()[0].hash.clone();
        let mut tampered: Vec<char> = original.chars().collect();
        tampered[0] = if tampered[0] == '0' { '1' } else { '0' };
        chain.entries_mut()[0].hash = tampered.into_iter().collect();
        assert!(!chain.verify_chain());
    }

    #[test]
    fn editing_a_field_breaks_verification() {
        let mut chain = ProvenanceChain::new();
        append_sample(&mut chain, 0, 0.1);
        chain.entries_mut()[0].coverage_quantized += 1;
        assert!(!chain.verify_chain());
    }

    #[test]
    fn coverage_quantizes_to_basis_points() {
        let mut chain = ProvenanceChain::new();
        append_sample(&mut chain, 0, 0.87654);
        assert_eq!(chain.entries()[0].coverage_quantized, 8765);
        assert!(chain
            .append_transition(
                0,
                ColorState::Black,
                ColorState::Black,
                f64::NAN,
                &[0; LEVEL_COUNT],
                &PizSummary::default(),
                "g",
                "p",
            )
            .is_err());
    }

    #[test]
    fn piz_digest_canonicalizes_signed_zero() {
        let plus = PizSummary {
            count: 1,
            total_area_sq_m: 0.0,
            excluded_area_sq_m: 0.0,
        };
        let minus = PizSummary {
            count: 1,
            total_area_sq_m: -0.0,
            excluded_area_sq_m: 0.0,
        };
        assert_eq!(piz_summary_digest(&plus), piz_summary_digest(&minus));
    }

    #[test]
    fn digests_are_stable() {
        let a = level_breakdown_digest(&[1, 2, 3, 4, 5, 6, 7]);
        let b = level_breakdown_digest(&[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(a, b);
        let c = level_breakdown_digest(&[0, 2, 3, 4, 5, 6, 7]);
        assert_ne!(a, c);
    }
}
