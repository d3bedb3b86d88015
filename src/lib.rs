//! Evidence Accounting Kernel (EAK)
//!
//! This crate implements the evidence accounting and admission-control core
//! for a 3D scene-capture pipeline.
//!
//! # Architecture
//!
//! The kernel enforces five invariants by construction:
//!
//! 1. **Determinism**: grid iteration, softmax, eviction, pruning, and every
//!    hash pre-image are bit-stable across runs on identical inputs.
//! 2. **Monotonic State**: the color state and visual state never retreat.
//! 3. **Tamper Evidence**: state transitions chain through SHA-256; audit
//!    entries are signed and provable by Merkle inclusion.
//! 4. **Frame Ownership**: sensor samples live inside one frame context on
//!    one thread; cross-frame access is detected and, in strict mode, fatal.
//! 5. **Bit-Exact Decisions**: admission decisions hash one canonical byte
//!    sequence; identical inputs give identical hashes on any platform.
//!
//! # Module Structure
//!
//! - `numeric`: Q16 arithmetic, overflow tiering, LUT transcendentals,
//!   softmax, canonical floats
//! - `grid`: Morton-coded spatial evidence grid
//! - `fusion`: D-S mass combination and the split gate/soft ledger
//! - `smoother`, `state`: anti-boost smoothing and monotonic state machines
//! - `frame`: frame contexts, reentrancy guard, thread verification
//! - `provenance`, `merkle`, `wal`, `audit`: the tamper-evident record
//! - `admission`: canonical decision bytes and the decision hash

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;

pub mod admission;
pub mod audit;
pub mod clock;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod frame;
pub mod fusion;
pub mod grid;
pub mod merkle;
pub mod numeric;
pub mod platform;
pub mod provenance;
pub mod smoother;
pub mod state;
pub mod storage;
pub mod wal;

pub use admission::{
    AdmissionController, AdmissionDecision, AdmissionInputs, AdmissionOutcome, BuildMode,
    CapacityMetrics, Classification, ExtensionResponse, GuidanceSignal, HardFuseTrigger,
    RejectReason, ThrottleStats,
};
pub use audit::{AppendReceipt, AuditLog};
pub use clock::MonotonicClock;
pub use config::KernelConfig;
pub use frame::{
    assert_in_frame, current_frame_id, FrameContext, FrameId, FrameOutputs, FrameSample,
    ReentrancyGuard, ReentrancySet, ThreadVerification,
};
pub use fusion::{DsMass, Observation, SplitLedger, Verdict};
pub use grid::{EvidenceGrid, GridCell, GridLevel, GridOp, SpatialKey};
pub use merkle::{InclusionProof, MerkleTree, SignedTreeHead};
pub use provenance::{PizSummary, ProvenanceChain, ProvenanceEntry};
pub use smoother::AntiBoostSmoother;
pub use state::{ColorState, FpsTier, GateInputs, GateVerdict, VisualState};
pub use storage::{InMemoryTileStore, SqliteTileStore, TileStore};
pub use wal::{FileWalStorage, InMemoryWalStorage, WalEntry, WalStorage};

use frame::frame_leak_logger;
use fusion::ledger::PruneStrategy;
use numeric::overflow::overflow_reporter;
use numeric::q16::{Q16, Q16_MIN, Q16_ONE};
use numeric::softmax::softmax_q16;
use state::{
    evaluate_transition, ColorStateMachine, StabilityWindow, VisualStateMachine,
};

// -------------------- Frame statistics --------------------

/// Per-frame capture statistics feeding the transition gate.
#[derive(Clone, Copy, Debug)]
pub struct FrameStats {
    pub fps_tier: FpsTier,
    pub brightness_confidence: f64,
    pub laplacian_confidence: f64,
}

/// Result of processing one frame.
#[derive(Clone, Debug, Serialize)]
pub struct FrameReport {
    pub frame_id: u64,
    pub coverage: f64,
    pub smoothed_coverage: f64,
    pub soft_evidence: f64,
    pub color_state: ColorState,
    pub visual_state: VisualState,
    /// Hash of the provenance entry appended this frame, if the color state
    /// advanced.
    pub transition_hash: Option<String>,
    /// Audit log entry id for that transition.
    pub audit_entry_id: Option<u64>,
    pub path_trace: Vec<String>,
}

// -------------------- Session kernel --------------------

/// Maps a color state onto the coarse visual machine.
fn visual_for_color(color: ColorState) -> VisualState {
    match color {
        ColorState::Unknown | ColorState::Black => VisualState::Black,
        ColorState::DarkGray | ColorState::LightGray => VisualState::DarkGray,
        ColorState::White | ColorState::Original => VisualState::White,
    }
}

/// Starting evidence/energy budget per session, in Q16.
const SESSION_EEB_Q16: i64 = 1_000 * Q16_ONE;

/// Flat reliability discount applied to incoming sensor masses.
const SENSOR_RELIABILITY: f64 = 0.95;

/// The session actor. Owns the grid, ledgers, state machines, provenance
/// chain, audit log, and admission controller; all mutation happens here,
/// strictly sequentially by frame id.
pub struct EvidenceKernel {
    config: KernelConfig,
    grid: EvidenceGrid,
    ledger: SplitLedger,
    smoother: AntiBoostSmoother,
    color: ColorStateMachine,
    visual: VisualStateMachine,
    stability: StabilityWindow,
    provenance: ProvenanceChain,
    audit: AuditLog,
    admission: AdmissionController,
    clock: MonotonicClock,
    thread_check: ThreadVerification,
    reentrancy: ReentrancySet,
    piz: PizSummary,
    eeb_remaining_q16: i64,
    last_frame_id: u64,
    frames_processed: u64,
}

impl EvidenceKernel {
    /// Open a session. Resets the process-scoped overflow reporter and leak
    /// logger; opens (or replays) the WAL and tile store. Frame ids stay
    /// process-monotonic so concurrent sessions cannot collide; drivers that
    /// want ids from 1 call `frame::reset_frame_counter` at process start.
    pub fn open(config: KernelConfig) -> Result<Self> {
        let clock = MonotonicClock::get()?;
        overflow_reporter().reset_for_session(config.strict_determinism);
        frame_leak_logger().reset_for_session();

        // Persistent sessions anchor their seed beside the WAL so a later
        // audit_verify run can recover the verifying key; ephemeral sessions
        // use the configured seed as-is.
        let (wal, seed): (Box<dyn WalStorage + Send>, String) = match &config.wal_path {
            Some(path) => (
                Box::new(FileWalStorage::open(path)?),
                crypto::resolve_session_seed(
                    crypto::device_key_path_for_wal(path)?,
                    &config.device_key_seed,
                )?,
            ),
            None => (
                Box::new(InMemoryWalStorage::default()),
                config.device_key_seed.clone(),
            ),
        };
        let tiles: Box<dyn TileStore + Send> = match &config.merkle_tile_store_path {
            Some(path) => Box::new(SqliteTileStore::open(path)?),
            None => Box::new(InMemoryTileStore::default()),
        };
        let signing_key = crypto::signing_key_from_seed(&seed)?;
        let audit = AuditLog::open(wal, tiles, signing_key, config.params_hash())?;

        Ok(Self {
            grid: EvidenceGrid::new(config.max_cells)?,
            ledger: SplitLedger::new(config.ledger),
            smoother: AntiBoostSmoother::new(config.smoother),
            color: ColorStateMachine::new(),
            visual: VisualStateMachine::new(),
            stability: StabilityWindow::new(),
            provenance: ProvenanceChain::new(),
            audit,
            admission: AdmissionController::new(),
            clock,
            thread_check: ThreadVerification::new(),
            reentrancy: ReentrancySet::new(),
            piz: PizSummary::default(),
            eeb_remaining_q16: SESSION_EEB_Q16,
            last_frame_id: 0,
            frames_processed: 0,
            config,
        })
    }

    /// Convenience constructor for in-memory sessions.
    pub fn open_ephemeral(device_key_seed: &str, session_stable_id: u64) -> Result<Self> {
        Self::open(KernelConfig::ephemeral(device_key_seed, session_stable_id))
    }

    // -------------------- Frame pipeline --------------------

    /// Process one frame of sensor samples: grid batch, ledger updates,
    /// smoothing, state evaluation, and, on a state transition, a chained
    /// provenance entry mirrored into the audit log.
    pub fn process_frame(
        &mut self,
        samples: Vec<FrameSample>,
        stats: FrameStats,
    ) -> Result<FrameReport> {
        self.thread_check.verify("process_frame")?;
        let _guard = self.reentrancy.enter("process_frame", self.config.strict_determinism)?;

        let now = self.clock.now_ms()?;
        let frame_id = FrameId::next(now);
        if frame_id.id <= self.last_frame_id {
            return Err(anyhow!(
                "frame order violated: frame {} after {}",
                frame_id.id,
                self.last_frame_id
            ));
        }
        self.last_frame_id = frame_id.id;

        let mut ctx = FrameContext::enter(
            frame_id,
            self.config.session_stable_id,
            samples,
            self.config.strict_determinism,
        );

        // Batches inside a frame apply in order; last write per key wins.
        let mut batch = Vec::new();
        let mut observations = Vec::new();
        for sample in ctx.samples("process_frame") {
            batch.extend(sample.grid_ops.iter().cloned());
            observations.push(sample.observation.clone());
        }
        // Every incoming mass gets the flat reliability discount, then fuses
        // with what the grid already believes. A first write to a key fuses
        // against nothing, which is the vacuous identity, so the discounted
        // mass lands as-is.
        let mut total_conflicts = 0u32;
        for op in &mut batch {
            if let GridOp::Insert { key, cell } | GridOp::Update { key, cell } = op {
                let discounted = cell.ds_mass.discount(SENSOR_RELIABILITY);
                cell.ds_mass = match self.grid.get(key) {
                    Some(existing) => {
                        let outcome = existing.ds_mass.combine(&discounted);
                        if outcome.total_conflict {
                            total_conflicts += 1;
                        }
                        outcome.mass
                    }
                    None => discounted,
                };
            }
        }
        if total_conflicts > 0 {
            ctx.trace("mass_total_conflict");
        }
        self.grid.apply(&batch);
        for obs in &observations {
            self.ledger.observe(obs)?;
        }

        let coverage = self.level_blended_coverage(&mut ctx);
        let soft = self.ledger.mean_fused_evidence(coverage);
        let smoothed = self.smoother.smooth(coverage);
        self.stability.push(now, smoothed);

        let prev_color = self.color.current();
        let color = self.color.evaluate(smoothed, soft);

        let visual_candidate = visual_for_color(color);
        let prev_visual = self.visual.current();
        if visual_candidate > prev_visual {
            let verdict = evaluate_transition(&GateInputs {
                from: prev_visual,
                to: visual_candidate,
                fps_tier: stats.fps_tier,
                brightness_confidence: stats.brightness_confidence,
                laplacian_confidence: stats.laplacian_confidence,
                stability_variance: self.stability.variance(),
            });
            ctx.outputs_mut("process_frame").gate_verdict = Some(verdict);
            if verdict == GateVerdict::Allowed {
                self.visual.advance_to(visual_candidate);
            } else {
                ctx.trace("visual_transition_blocked");
            }
        }

        let mut transition_hash = None;
        let mut audit_entry_id = None;
        if color != prev_color {
            let hash = self.provenance.append_transition(
                now,
                prev_color,
                color,
                smoothed,
                &self.grid.level_breakdown(),
                &self.piz,
                &self.grid_digest(),
                &self.config.policy_digest(),
            )?;
            let entry = self
                .provenance
                .entries()
                .last()
                .expect("entry just appended");
            let payload = serde_json::to_vec(entry)?;
            let receipt = self.audit.append(&payload)?;
            transition_hash = Some(hash);
            audit_entry_id = Some(receipt.entry_id);
        }

        {
            let outputs = ctx.outputs_mut("process_frame");
            outputs.fused_coverage = coverage;
            outputs.smoothed_coverage = smoothed;
            outputs.soft_evidence = soft;
            outputs.color_state = Some(color);
        }
        let outputs = ctx.consume();
        self.frames_processed += 1;

        Ok(FrameReport {
            frame_id: frame_id.id,
            coverage,
            smoothed_coverage: smoothed,
            soft_evidence: soft,
            color_state: color,
            visual_state: self.visual.current(),
            transition_hash,
            audit_entry_id,
            path_trace: outputs.path_trace.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Softmax-weighted blend of per-level occupancy. Populated levels carry
    /// count-scaled logits; empty levels are negative infinity. An entirely
    /// empty grid reads as zero coverage without touching the softmax.
    fn level_blended_coverage(&mut self, ctx: &mut FrameContext) -> f64 {
        let breakdown = self.grid.level_breakdown();
        if breakdown.iter().all(|&c| c == 0) {
            return 0.0;
        }

        let mut occupied_per_level = [0.0f64; grid::LEVEL_COUNT];
        for (key, cell) in self.grid.all_active_cells() {
            occupied_per_level[key.level.index() as usize] += cell.ds_mass.occupied;
        }

        let logits: Vec<Q16> = breakdown
            .iter()
            .map(|&count| {
                if count == 0 {
                    Q16_MIN
                } else {
                    (count.min(1 << 20) as i64) * 64
                }
            })
            .collect();
        let weights = softmax_q16(&logits, self.config.softmax_mode, &mut |event| {
            ctx.trace(event)
        });

        let expected = self.config.expected_cells.max(1) as f64;
        let mut coverage = 0.0;
        for (level, weight) in weights.iter().enumerate() {
            let density =
                (occupied_per_level[level] * grid::LEVEL_COUNT as f64 / expected).min(1.0);
            coverage += (*weight as f64 / Q16_ONE as f64) * density;
        }
        coverage.clamp(0.0, 1.0)
    }

    /// Apply a grid batch outside the frame pipeline (bulk import, replay).
    pub fn apply_batch(&mut self, batch: &[GridOp]) -> Result<grid::GridApplyReport> {
        self.thread_check.verify("apply_batch")?;
        let _guard = self.reentrancy.enter("apply_batch", self.config.strict_determinism)?;
        Ok(self.grid.apply(batch))
    }

    /// Append an externally driven transition (session markers).
    pub fn append_transition(
        &mut self,
        from_state: ColorState,
        to_state: ColorState,
        coverage: f64,
    ) -> Result<String> {
        self.thread_check.verify("append_transition")?;
        let _guard =
            self.reentrancy.enter("append_transition", self.config.strict_determinism)?;
        let now = self.clock.now_ms()?;
        let hash = self.provenance.append_transition(
            now,
            from_state,
            to_state,
            coverage,
            &self.grid.level_breakdown(),
            &self.piz,
            &self.grid_digest(),
            &self.config.policy_digest(),
        )?;
        let entry = self
            .provenance
            .entries()
            .last()
            .expect("entry just appended");
        self.audit.append(&serde_json::to_vec(entry)?)?;
        Ok(hash)
    }

    // -------------------- Admission --------------------

    /// Current capacity snapshot for admission inputs.
    pub fn capacity_metrics(&self) -> CapacityMetrics {
        CapacityMetrics {
            patch_count_shadow: self.ledger.patch_count() as u32,
            eeb_remaining_q16: self.eeb_remaining_q16,
        }
    }

    /// Evaluate an admission candidate; the decision pre-image lands in the
    /// audit log and accepted decisions draw down the session budget.
    pub fn evaluate_admission(&mut self, inputs: &AdmissionInputs) -> Result<AdmissionOutcome> {
        self.thread_check.verify("evaluate_admission")?;
        let _guard = self.reentrancy.enter("evaluate_state", self.config.strict_determinism)?;
        let outcome = self.admission.evaluate(inputs)?;
        self.audit.append(&outcome.canonical_bytes)?;
        if outcome.decision.classification == Classification::Accepted {
            self.eeb_remaining_q16 = numeric::overflow::checked_op(
                "eeb_remaining",
                "add",
                self.eeb_remaining_q16,
                outcome.decision.eeb_delta,
                numeric::q16::add,
            );
        }
        Ok(outcome)
    }

    /// Idempotent extension handling; replays do not re-append to the audit
    /// log.
    pub fn request_extension(
        &mut self,
        extension_request_id: u64,
        inputs: &AdmissionInputs,
    ) -> Result<ExtensionResponse> {
        self.thread_check.verify("request_extension")?;
        let _guard = self.reentrancy.enter("evaluate_state", self.config.strict_determinism)?;
        let response = self
            .admission
            .request_extension(extension_request_id, inputs)?;
        if let ExtensionResponse::Processed(snapshot) = &response {
            self.audit.append(&snapshot.outcome.canonical_bytes)?;
        }
        Ok(response)
    }

    // -------------------- Maintenance and export --------------------

    /// Record the protected-zone summary feeding provenance digests.
    pub fn set_piz_summary(&mut self, piz: PizSummary) {
        self.piz = piz;
    }

    /// Deterministically bound the ledger.
    pub fn prune_patches(&mut self, keep_count: usize) {
        self.ledger
            .prune_patches(keep_count, PruneStrategy::ByEvidence);
    }

    pub fn color_state(&self) -> ColorState {
        self.color.current()
    }

    pub fn visual_state(&self) -> VisualState {
        self.visual.current()
    }

    pub fn provenance(&self) -> &ProvenanceChain {
        &self.provenance
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn grid(&self) -> &EvidenceGrid {
        &self.grid
    }

    pub fn ledger(&self) -> &SplitLedger {
        &self.ledger
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Canonical digest of the current grid shape.
    fn grid_digest(&self) -> String {
        let breakdown = self.grid.level_breakdown();
        let levels: Vec<String> = breakdown.iter().map(u64::to_string).collect();
        let canonical = format!(
            "cells={}\nlevels={}",
            self.grid.cell_count(),
            levels.join(",")
        );
        hex::encode(crypto::sha256(canonical.as_bytes()))
    }

    /// Canonical JSON session summary: sorted keys, integers only.
    pub fn session_report(&self) -> Result<String> {
        let sth = self.audit.get_signed_tree_head()?;
        let value = json!({
            "session_stable_id": self.config.session_stable_id,
            "frames_processed": self.frames_processed,
            "color_state": self.color.current().raw(),
            "visual_state": self.visual.current().raw(),
            "coverage_bp": (self.smoother.last_output().unwrap_or(0.0) * 10_000.0).round()
                as i64,
            "patch_count": self.ledger.patch_count() as u64,
            "grid_cells": self.grid.cell_count() as u64,
            "grid_occupancy_bp": (self.grid.coverage_fraction(self.config.expected_cells)
                * 10_000.0)
                .round() as i64,
            "provenance_entries": self.provenance.len() as u64,
            "audit_tree_size": sth.tree_size,
            "audit_root_hash": hex::encode(sth.root_hash),
            "platform": platform::PlatformDescriptor::host().platform_tag,
        });
        codec::canonical_json(&value)
    }

    /// Re-verify the in-memory provenance chain.
    pub fn verify_provenance(&self) -> bool {
        self.provenance.verify_chain()
    }

    /// Flush and close the audit log.
    pub fn close(&self) -> Result<()> {
        self.audit.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion::ledger::ObservationErrorKind;
    use grid::{DimensionalScores, GridCell};

    fn sample(patch: &str, q: (i32, i32, i32), quality: f64, t: i64) -> FrameSample {
        let cell = GridCell::new(
            patch.to_string(),
            q,
            DimensionalScores {
                brightness: quality,
                laplacian: quality,
                parallax: quality,
            },
            DsMass::new(quality, (1.0 - quality) * 0.4, 1.0 - quality - (1.0 - quality) * 0.4),
            GridLevel::L2,
            0,
            t,
        );
        let key = cell.key().unwrap();
        FrameSample {
            observation: Observation {
                patch_id: patch.to_string(),
                gate_quality: quality,
                soft_quality: quality,
                verdict: if quality > 0.5 {
                    Verdict::Pass
                } else {
                    Verdict::Marginal
                },
                frame_id: 0,
                t_ms: t,
                error: None,
            },
            grid_ops: vec![GridOp::Insert { key, cell }],
        }
    }

    fn stats() -> FrameStats {
        FrameStats {
            fps_tier: FpsTier::Full,
            brightness_confidence: 0.9,
            laplacian_confidence: 0.9,
        }
    }

    #[test]
    fn frames_advance_state_and_chain_provenance() -> Result<()> {
        let mut kernel = EvidenceKernel::open_ephemeral("devkey:lib_test", 11)?;
        let mut last_color = ColorState::Unknown;
        for i in 0..40i32 {
            let samples = (0..8)
                .map(|j| sample(&format!("patch:p{}_{}", i, j), (i, j, 0), 0.9, i as i64 * 30))
                .collect();
            let report = kernel.process_frame(samples, stats())?;
            assert!(report.color_state >= last_color);
            last_color = report.color_state;
        }
        assert!(kernel.frames_processed() == 40);
        assert!(kernel.verify_provenance());
        // Every provenance entry is mirrored into the audit log.
        assert_eq!(
            kernel.audit_log().size(),
            kernel.provenance().len() as u64
        );
        Ok(())
    }

    #[test]
    fn first_grid_write_is_discounted_like_every_other() -> Result<()> {
        let mut kernel = EvidenceKernel::open_ephemeral("devkey:lib_disc", 16)?;
        let first = sample("patch:d", (0, 0, 0), 0.9, 0);
        let key = match &first.grid_ops[0] {
            GridOp::Insert { key, .. } => *key,
            _ => unreachable!(),
        };
        kernel.process_frame(vec![first], stats())?;
        let cell = kernel.grid().get(&key).unwrap();
        // The very first observation of a cell carries the same r=0.95
        // discount as every later one.
        assert!((cell.ds_mass.occupied - 0.9 * SENSOR_RELIABILITY).abs() < 1e-9);
        let occupied_after_first = cell.ds_mass.occupied;

        // A repeat observation fuses and strengthens belief.
        kernel.process_frame(vec![sample("patch:d", (0, 0, 0), 0.9, 40)], stats())?;
        let cell = kernel.grid().get(&key).unwrap();
        assert!(cell.ds_mass.occupied > occupied_after_first);
        assert!(cell.ds_mass.is_valid());
        Ok(())
    }

    #[test]
    fn ledger_errors_do_not_break_the_frame() -> Result<()> {
        let mut kernel = EvidenceKernel::open_ephemeral("devkey:lib_err", 12)?;
        let mut bad = sample("patch:ok", (0, 0, 0), 0.7, 0);
        bad.observation.error = Some(ObservationErrorKind::Blur);
        kernel.process_frame(vec![bad], stats())?;
        assert_eq!(
            kernel.ledger().gate_entry("patch:ok").unwrap().error_count,
            1
        );
        Ok(())
    }

    #[test]
    fn admission_draws_down_the_budget() -> Result<()> {
        let mut kernel = EvidenceKernel::open_ephemeral("devkey:lib_adm", 13)?;
        let before = kernel.capacity_metrics().eeb_remaining_q16;
        let inputs = AdmissionInputs {
            candidate_id: uuid::Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000")
                .unwrap(),
            capacity: kernel.capacity_metrics(),
            eeb_delta_q16: -2 * Q16_ONE,
            build_mode: BuildMode::Full,
            reject_reason: None,
            hard_fuse: None,
            policy_hash: 1,
            session_stable_id: 13,
            candidate_stable_id: 2,
            value_score: 10,
            per_flow_counters: vec![0, 0],
            flow_bucket_count: 2,
            throttle: None,
            degradation_level: 0,
            degradation_reason_code: None,
            schema_version: 0x0204,
        };
        let outcome = kernel.evaluate_admission(&inputs)?;
        assert_eq!(outcome.decision.classification, Classification::Accepted);
        assert_eq!(
            kernel.capacity_metrics().eeb_remaining_q16,
            before - 2 * Q16_ONE
        );
        // The decision pre-image landed in the audit log.
        assert_eq!(kernel.audit_log().size(), 1);
        Ok(())
    }

    #[test]
    fn session_report_is_canonical_json() -> Result<()> {
        let mut kernel = EvidenceKernel::open_ephemeral("devkey:lib_report", 14)?;
        kernel.process_frame(vec![sample("patch:a", (0, 0, 0), 0.8, 0)], stats())?;
        let report = kernel.session_report()?;
        assert!(report.starts_with('{'));
        assert!(report.contains("\"session_stable_id\":14"));
        let audit_pos = report.find("audit_root_hash").unwrap();
        let visual_pos = report.find("visual_state").unwrap();
        assert!(audit_pos < visual_pos);
        Ok(())
    }

    #[test]
    fn external_transition_append_is_guarded_and_chained() -> Result<()> {
        let mut kernel = EvidenceKernel::open_ephemeral("devkey:lib_tr", 15)?;
        let hash = kernel.append_transition(ColorState::Black, ColorState::DarkGray, 0.2)?;
        assert_eq!(hash.len(), 64);
        assert!(kernel.verify_provenance());
        assert_eq!(kernel.audit_log().size(), 1);
        Ok(())
    }
}
