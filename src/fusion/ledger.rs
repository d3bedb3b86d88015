//! Split gate/soft evidence ledger.
//!
//! Gate evidence records whether a patch is reachable at all; soft evidence
//! records how well it has been seen. They live in separate ledgers because
//! they decay and merge differently: a soft write is only accepted when the
//! same observation clears the gate-quality floor, and the fused value
//! weights gate-heavy early in a session and soft-heavy late.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Patch ids follow a positive allowlist, same discipline as any other
/// identifier that ends up in a hash pre-image.
///
/// Allowed: "patch:wall_a_3", "patch:floor-12". Disallowed: whitespace,
/// slashes, punctuation outside [_-].
pub fn validate_patch_id(patch_id: &str) -> Result<()> {
    static PATCH_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = PATCH_ID_RE
        .get_or_init(|| regex::Regex::new(r"^patch:[a-z0-9_-]{1,64}$").unwrap());
    if !re.is_match(patch_id) {
        return Err(anyhow!(
            "patch_id must match ^patch:[a-z0-9_-]{{1,64}}$, got {:?}",
            patch_id
        ));
    }
    Ok(())
}

/// Observation verdict; stronger verdicts pull the EMA harder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Fail,
    Marginal,
    Pass,
}

impl Verdict {
    fn alpha(self) -> f64 {
        match self {
            Verdict::Fail => 0.10,
            Verdict::Marginal => 0.25,
            Verdict::Pass => 0.45,
        }
    }
}

/// Error classification carried by a failed observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservationErrorKind {
    Blur,
    Exposure,
    TrackingLoss,
}

/// One per-frame observation of a patch.
#[derive(Clone, Debug)]
pub struct Observation {
    pub patch_id: String,
    pub gate_quality: f64,
    pub soft_quality: f64,
    pub verdict: Verdict,
    pub frame_id: u64,
    pub t_ms: i64,
    pub error: Option<ObservationErrorKind>,
}

/// Ledger row for one patch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatchEntry {
    pub evidence: f64,
    pub last_update_ms: i64,
    pub observation_count: u64,
    pub best_frame_id: u64,
    pub error_count: u64,
    pub error_streak: u32,
    pub last_good_update_ms: i64,
    best_quality: f64,
}

impl PatchEntry {
    fn new(obs_quality: f64, obs: &Observation) -> Self {
        Self {
            evidence: obs_quality.clamp(0.0, 1.0) * obs.verdict.alpha(),
            last_update_ms: obs.t_ms,
            observation_count: 1,
            best_frame_id: obs.frame_id,
            error_count: u64::from(obs.error.is_some()),
            error_streak: u32::from(obs.error.is_some()),
            last_good_update_ms: if obs.error.is_none() { obs.t_ms } else { 0 },
            best_quality: obs_quality,
        }
    }

    fn update(&mut self, obs_quality: f64, obs: &Observation, tau_ms: f64) {
        let quality = obs_quality.clamp(0.0, 1.0);
        // Decay first, then blend the new sample in.
        let dt = (obs.t_ms - self.last_update_ms).max(0) as f64;
        let decay = (-dt / tau_ms).exp();
        let decayed = self.evidence * decay;
        let alpha = obs.verdict.alpha();
        self.evidence = (decayed + alpha * (quality - decayed)).clamp(0.0, 1.0);
        self.last_update_ms = obs.t_ms;
        self.observation_count += 1;
        if quality > self.best_quality {
            self.best_quality = quality;
            self.best_frame_id = obs.frame_id;
        }
        if obs.error.is_some() {
            self.error_count += 1;
            self.error_streak += 1;
        } else {
            self.error_streak = 0;
            self.last_good_update_ms = obs.t_ms;
        }
    }
}

/// Ledger tuning.
#[derive(Clone, Copy, Debug)]
pub struct LedgerConfig {
    /// EMA decay time constant.
    pub tau_ms: f64,
    /// Gate-quality floor below which soft writes are skipped.
    pub soft_write_requires_gate_min: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            tau_ms: 30_000.0,
            soft_write_requires_gate_min: 0.35,
        }
    }
}

/// Survivor-selection strategy for pruning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PruneStrategy {
    /// (descending evidence, ascending last_update_ms, patch_id lexicographic)
    ByEvidence,
    /// (descending last_update_ms, descending evidence, patch_id lexicographic)
    ByRecency,
}

/// The split gate/soft ledger.
#[derive(Clone, Debug, Default)]
pub struct SplitLedger {
    gate: BTreeMap<String, PatchEntry>,
    soft: BTreeMap<String, PatchEntry>,
    config: LedgerConfig,
    skipped_soft_writes: u64,
}

impl SplitLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            gate: BTreeMap::new(),
            soft: BTreeMap::new(),
            config,
            skipped_soft_writes: 0,
        }
    }

    /// Record one observation. Gate updates unconditionally; soft updates
    /// only when the observation's gate quality clears the floor.
    pub fn observe(&mut self, obs: &Observation) -> Result<()> {
        validate_patch_id(&obs.patch_id)?;
        if !obs.gate_quality.is_finite() || !obs.soft_quality.is_finite() {
            return Err(anyhow!(
                "observation quality must be finite: patch_id={} gate={} soft={}",
                obs.patch_id,
                obs.gate_quality,
                obs.soft_quality
            ));
        }

        let tau = self.config.tau_ms;
        self.gate
            .entry(obs.patch_id.clone())
            .and_modify(|e| e.update(obs.gate_quality, obs, tau))
            .or_insert_with(|| PatchEntry::new(obs.gate_quality, obs));

        if obs.gate_quality > self.config.soft_write_requires_gate_min {
            self.soft
                .entry(obs.patch_id.clone())
                .and_modify(|e| e.update(obs.soft_quality, obs, tau))
                .or_insert_with(|| PatchEntry::new(obs.soft_quality, obs));
        } else {
            // Silently skipped by contract; counted for diagnostics.
            self.skipped_soft_writes += 1;
        }
        Ok(())
    }

    pub fn gate_entry(&self, patch_id: &str) -> Option<&PatchEntry> {
        self.gate.get(patch_id)
    }

    pub fn soft_entry(&self, patch_id: &str) -> Option<&PatchEntry> {
        self.soft.get(patch_id)
    }

    pub fn patch_count(&self) -> usize {
        self.gate.len()
    }

    pub fn skipped_soft_writes(&self) -> u64 {
        self.skipped_soft_writes
    }

    /// Progress-dependent merge weights; gate-heavy when progress is low,
    /// soft-heavy when high. Always sums to 1.
    pub fn weights(current_total: f64) -> (f64, f64) {
        let progress = current_total.clamp(0.0, 1.0);
        let w_gate = (0.8 - 0.5 * progress).clamp(0.3, 0.8);
        (w_gate, 1.0 - w_gate)
    }

    /// Fused evidence for one patch under the current progress level.
    pub fn fused_evidence(&self, patch_id: &str, current_total: f64) -> f64 {
        let (w_gate, w_soft) = Self::weights(current_total);
        let gate = self.gate.get(patch_id).map_or(0.0, |e| e.evidence);
        let soft = self.soft.get(patch_id).map_or(0.0, |e| e.evidence);
        w_gate * gate + w_soft * soft
    }

    /// Mean fused evidence across all known patches; the session's soft
    /// progress statistic.
    pub fn mean_fused_evidence(&self, current_total: f64) -> f64 {
        if self.gate.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .gate
            .keys()
            .map(|patch| self.fused_evidence(patch, current_total))
            .sum();
        sum / self.gate.len() as f64
    }

    /// Deterministically drop all but `keep_count` patches.
    pub fn prune_patches(&mut self, keep_count: usize, strategy: PruneStrategy) {
        if self.gate.len() <= keep_count {
            return;
        }
        let mut ranked: Vec<(String, f64, i64)> = self
            .gate
            .iter()
            .map(|(id, e)| (id.clone(), e.evidence, e.last_update_ms))
            .collect();
        match strategy {
            PruneStrategy::ByEvidence => ranked.sort_by(|a, b| {
                b.1.total_cmp(&a.1)
                    .then(a.2.cmp(&b.2))
                    .then(a.0.cmp(&b.0))
            }),
            PruneStrategy::ByRecency => ranked.sort_by(|a, b| {
                b.2.cmp(&a.2).then(b.1.total_cmp(&a.1)).then(a.0.cmp(&b.0))
            }),
        }
        let survivors: std::collections::BTreeSet<String> = ranked
            .into_iter()
            .take(keep_count)
            .map(|(id, _, _)| id)
            .collect();
        self.gate.retain(|id, _| survivors.contains(id));
        self.soft.retain(|id, _| survivors.contains(id));
    }
}
