//! Overflow tiering and the rate-limited overflow reporter.
//!
//! Every field that feeds a gate decision, soft quality, fused depth, health,
//! or a fusion weight is Tier0: in strict mode an overflow there is fatal,
//! otherwise it saturates, is logged, and computation degrades. Tier1 fields
//! recover by clamping and log rate-limited (first 10, then every 100th).
//! Tier2 fields saturate silently and are counted for diagnostics only.
//!
//! The reporter is process-scoped and reset at session start. Callers must
//! not hold grid or ledger locks while reporting.

use std::sync::{Mutex, OnceLock};

use crate::numeric::q16::Q16;

/// Overflow severity tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowTier {
    /// Gate-critical. Fatal in strict mode.
    Tier0,
    /// Recoverable with clamping; logged rate-limited.
    Tier1,
    /// Diagnostic only; counted, never logged.
    Tier2,
}

/// Tier classification for a named field.
///
/// Unknown fields default to Tier1 so a new call site degrades loudly rather
/// than silently.
pub fn tier_for_field(field: &str) -> OverflowTier {
    match field {
        "gate_quality" | "soft_quality" | "fused_depth" | "health" | "fusion_weight"
        | "softmax_weight" => OverflowTier::Tier0,
        "coverage" | "evidence_decay" | "eeb_remaining" | "eeb_delta" => OverflowTier::Tier1,
        "diagnostic" | "trace" => OverflowTier::Tier2,
        _ => OverflowTier::Tier1,
    }
}

/// One recorded saturation.
#[derive(Clone, Debug)]
pub struct OverflowEvent {
    pub field: &'static str,
    pub operation: &'static str,
    pub operands: (Q16, Q16),
    pub clamped: Q16,
    pub tier: OverflowTier,
    pub frame_id: Option<u64>,
}

#[derive(Debug, Default)]
struct ReporterState {
    strict: bool,
    tier0_count: u64,
    tier1_count: u64,
    tier2_count: u64,
}

/// Process-scoped rate-limited overflow reporter.
pub struct OverflowReporter {
    state: Mutex<ReporterState>,
}

static REPORTER: OnceLock<OverflowReporter> = OnceLock::new();

/// The process-wide reporter. Initialized on first use, reset per session.
pub fn overflow_reporter() -> &'static OverflowReporter {
    REPORTER.get_or_init(|| OverflowReporter {
        state: Mutex::new(ReporterState::default()),
    })
}

impl OverflowReporter {
    /// Reset counters and strictness at session start.
    pub fn reset_for_session(&self, strict: bool) {
        let mut state = self.state.lock().expect("overflow reporter poisoned");
        *state = ReporterState {
            strict,
            ..ReporterState::default()
        };
    }

    /// Record one overflow. Tier0 in strict mode aborts the process.
    pub fn record(&self, event: OverflowEvent) {
        let (strict, should_log) = {
            let mut state = self.state.lock().expect("overflow reporter poisoned");
            match event.tier {
                OverflowTier::Tier0 => {
                    state.tier0_count += 1;
                    (state.strict, true)
                }
                OverflowTier::Tier1 => {
                    state.tier1_count += 1;
                    let n = state.tier1_count;
                    (false, n <= 10 || n % 100 == 0)
                }
                OverflowTier::Tier2 => {
                    state.tier2_count += 1;
                    (false, false)
                }
            }
        };

        if event.tier == OverflowTier::Tier0 && strict {
            panic!(
                "tier0 overflow in strict mode: field={} operation={} operands=({}, {}) frame={:?}",
                event.field, event.operation, event.operands.0, event.operands.1, event.frame_id
            );
        }
        if should_log {
            log::warn!(
                "q16 overflow: field={} operation={} operands=({}, {}) clamped={} tier={:?} frame={:?}",
                event.field,
                event.operation,
                event.operands.0,
                event.operands.1,
                event.clamped,
                event.tier,
                event.frame_id
            );
        }
    }

    /// Counter snapshot (tier0, tier1, tier2) for diagnostics and tests.
    pub fn counts(&self) -> (u64, u64, u64) {
        let state = self.state.lock().expect("overflow reporter poisoned");
        (state.tier0_count, state.tier1_count, state.tier2_count)
    }
}

/// Reporting wrapper: run a saturating Q16 op and record any overflow under
/// the named field's tier.
pub fn checked_op(
    field: &'static str,
    operation: &'static str,
    a: Q16,
    b: Q16,
    op: fn(Q16, Q16) -> (Q16, bool),
) -> Q16 {
    let (result, overflowed) = op(a, b);
    if overflowed {
        overflow_reporter().record(OverflowEvent {
            field,
            operation,
            operands: (a, b),
            clamped: result,
            tier: tier_for_field(field),
            frame_id: crate::frame::current_frame_id(),
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::q16;

    #[test]
    fn tier_mapping_covers_gate_fields() {
        assert_eq!(tier_for_field("gate_quality"), OverflowTier::Tier0);
        assert_eq!(tier_for_field("soft_quality"), OverflowTier::Tier0);
        assert_eq!(tier_for_field("fused_depth"), OverflowTier::Tier0);
        assert_eq!(tier_for_field("health"), OverflowTier::Tier0);
        assert_eq!(tier_for_field("fusion_weight"), OverflowTier::Tier0);
        assert_eq!(tier_for_field("never_heard_of_it"), OverflowTier::Tier1);
    }

    #[test]
    fn checked_op_saturates_counts_and_resets() {
        let reporter = overflow_reporter();
        reporter.reset_for_session(false);
        let v = checked_op("coverage", "add", q16::Q16_MAX, 1, q16::add);
        assert_eq!(v, q16::Q16_MAX);
        let (_, tier1, _) = reporter.counts();
        assert!(tier1 >= 1);

        let _ = checked_op("diagnostic", "mul", q16::Q16_MAX, q16::Q16_MAX, q16::mul);
        let (_, _, tier2) = reporter.counts();
        assert!(tier2 >= 1);

        reporter.reset_for_session(false);
        let (t0, _, _) = reporter.counts();
        assert_eq!(t0, 0);
    }
}
