//! Admission control and the decision hash.
//!
//! An admission decision is only as trustworthy as its pre-image: the
//! canonical byte layout here is the sole input to the decision hash, built
//! as an independent copy of the caller's data (no aliasing). Same inputs
//! yield the same bytes and the same 32-byte hash on every platform and
//! every run. Extension requests are idempotent by request id; a replay
//! returns the original snapshot byte-for-byte.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde_json::json;
use uuid::Uuid;

use crate::codec::{canonical_json, hex_hash, CanonicalEncoder};
use crate::crypto::sha256;

/// Canonical layout version byte.
pub const LAYOUT_VERSION: u8 = 0x01;

/// Capture build mode carried in the decision pre-image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildMode {
    Full,
    Preview,
    Recovery,
}

impl BuildMode {
    pub fn tag(self) -> u8 {
        match self {
            BuildMode::Full => 0,
            BuildMode::Preview => 1,
            BuildMode::Recovery => 2,
        }
    }
}

/// Rejection causes with stable tag bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    CapacityExhausted,
    PolicyVeto,
    DuplicateCandidate,
    StaleCandidate,
}

impl RejectReason {
    pub fn tag(self) -> u8 {
        match self {
            RejectReason::CapacityExhausted => 0,
            RejectReason::PolicyVeto => 1,
            RejectReason::DuplicateCandidate => 2,
            RejectReason::StaleCandidate => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::CapacityExhausted => "capacity_exhausted",
            RejectReason::PolicyVeto => "policy_veto",
            RejectReason::DuplicateCandidate => "duplicate_candidate",
            RejectReason::StaleCandidate => "stale_candidate",
        }
    }
}

/// Hard-fuse triggers that stop admission outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HardFuseTrigger {
    ThermalLimit,
    StorageExhausted,
    ClockViolation,
}

impl HardFuseTrigger {
    pub fn tag(self) -> u8 {
        match self {
            HardFuseTrigger::ThermalLimit => 0,
            HardFuseTrigger::StorageExhausted => 1,
            HardFuseTrigger::ClockViolation => 2,
        }
    }
}

/// UI-facing guidance hint attached to a decision (not hashed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuidanceSignal {
    KeepScanning,
    SlowDown,
    RevisitCoverage,
    Stop,
}

/// Throttle-window statistics, optional in the pre-image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleStats {
    pub window_start_tick: u64,
    pub window_duration_ticks: u32,
    pub attempts_in_window: u32,
}

/// Capacity snapshot feeding a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapacityMetrics {
    pub patch_count_shadow: u32,
    pub eeb_remaining_q16: i64,
}

/// Every input the decision pre-image covers. Explicit by design; the
/// admission layer reads no ambient state.
#[derive(Clone, Debug)]
pub struct AdmissionInputs {
    pub candidate_id: Uuid,
    pub capacity: CapacityMetrics,
    pub eeb_delta_q16: i64,
    pub build_mode: BuildMode,
    pub reject_reason: Option<RejectReason>,
    pub hard_fuse: Option<HardFuseTrigger>,
    pub policy_hash: u64,
    pub session_stable_id: u64,
    pub candidate_stable_id: u64,
    pub value_score: i64,
    pub per_flow_counters: Vec<u16>,
    pub flow_bucket_count: u16,
    pub throttle: Option<ThrottleStats>,
    pub degradation_level: u8,
    pub degradation_reason_code: Option<u8>,
    pub schema_version: u16,
}

/// Bit-exact canonical pre-image. Big-endian, no padding; optionals are a
/// presence byte followed by the value only when present.
pub fn canonical_bytes(inputs: &AdmissionInputs) -> Result<Vec<u8>> {
    if inputs.per_flow_counters.len() != inputs.flow_bucket_count as usize {
        return Err(anyhow!(
            "per_flow_counters length {} does not match flow_bucket_count {}",
            inputs.per_flow_counters.len(),
            inputs.flow_bucket_count
        ));
    }
    if inputs.degradation_level != 0 && inputs.degradation_reason_code.is_none() {
        return Err(anyhow!(
            "degradation_reason_code required when degradation_level is {}",
            inputs.degradation_level
        ));
    }
    if inputs.degradation_level == 0 && inputs.degradation_reason_code.is_some() {
        return Err(anyhow!(
            "degradation_reason_code present without a degradation_level"
        ));
    }

    let mut enc = CanonicalEncoder::with_capacity(96 + inputs.per_flow_counters.len() * 2);
    enc.put_u8(LAYOUT_VERSION);
    enc.put_bytes(inputs.candidate_id.as_bytes());
    enc.put_u32_be(inputs.capacity.patch_count_shadow);
    enc.put_i64_be(inputs.capacity.eeb_remaining_q16);
    enc.put_i64_be(inputs.eeb_delta_q16);
    enc.put_u8(inputs.build_mode.tag());
    enc.put_optional(inputs.reject_reason, |e, r| e.put_u8(r.tag()));
    enc.put_optional(inputs.hard_fuse, |e, f| e.put_u8(f.tag()));
    enc.put_u64_be(inputs.policy_hash);
    enc.put_u64_be(inputs.session_stable_id);
    enc.put_u64_be(inputs.candidate_stable_id);
    enc.put_i64_be(inputs.value_score);
    enc.put_u16_be(inputs.flow_bucket_count);
    for &counter in &inputs.per_flow_counters {
        enc.put_u16_be(counter);
    }
    enc.put_optional(inputs.throttle, |e, t| {
        e.put_u64_be(t.window_start_tick);
        e.put_u32_be(t.window_duration_ticks);
        e.put_u32_be(t.attempts_in_window);
    });
    enc.put_u8(inputs.degradation_level);
    if let Some(code) = inputs.degradation_reason_code {
        enc.put_u8(code);
    }
    enc.put_u16_be(inputs.schema_version);
    Ok(enc.into_bytes())
}

/// Decision classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    Accepted,
    Rejected,
    Degraded,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Accepted => "ACCEPTED",
            Classification::Rejected => "REJECTED",
            Classification::Degraded => "DEGRADED",
        }
    }
}

/// The externally visible decision.
#[derive(Clone, Debug)]
pub struct AdmissionDecision {
    pub candidate_id: Uuid,
    pub classification: Classification,
    pub reason: Option<RejectReason>,
    pub eeb_delta: i64,
    pub build_mode: BuildMode,
    pub guidance_signal: GuidanceSignal,
    pub hard_fuse_trigger: Option<HardFuseTrigger>,
}

/// Decision plus its hashed pre-image.
#[derive(Clone, Debug)]
pub struct AdmissionOutcome {
    pub decision: AdmissionDecision,
    pub canonical_bytes: Vec<u8>,
    pub decision_hash: [u8; 32],
}

impl AdmissionOutcome {
    /// 64-char lowercase hex of the decision hash.
    pub fn decision_hash_hex(&self) -> String {
        hex_hash(&self.decision_hash)
    }

    /// Canonical JSON projection: sorted keys, compact, integers only.
    pub fn to_canonical_json(&self) -> Result<String> {
        let value = json!({
            "candidate_id": self.decision.candidate_id.to_string(),
            "classification": self.decision.classification.as_str(),
            "reason": self.decision.reason.map(|r| r.as_str()),
            "eeb_delta_q16": self.decision.eeb_delta,
            "build_mode": self.decision.build_mode.tag(),
            "decision_hash": self.decision_hash_hex(),
        });
        canonical_json(&value)
    }
}

/// Outcome tag stored for extension idempotency. Encodes only the original
/// result, never "already processed".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtensionResultTag {
    Extended,
    Denied,
}

/// Snapshot retained per extension request id.
#[derive(Clone, Debug)]
pub struct ExtensionSnapshot {
    pub result_tag: ExtensionResultTag,
    pub outcome: AdmissionOutcome,
}

/// Response to an extension request.
#[derive(Clone, Debug)]
pub enum ExtensionResponse {
    Processed(ExtensionSnapshot),
    AlreadyProcessed(ExtensionSnapshot),
}

/// Session-scoped admission controller.
#[derive(Default)]
pub struct AdmissionController {
    processed_extensions: BTreeMap<u64, ExtensionSnapshot>,
}

impl AdmissionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate a candidate and produce the decision with its hash.
    pub fn evaluate(&self, inputs: &AdmissionInputs) -> Result<AdmissionOutcome> {
        let canonical = canonical_bytes(inputs)?;
        let decision_hash = sha256(&canonical);

        let classification = if inputs.hard_fuse.is_some() || inputs.reject_reason.is_some() {
            Classification::Rejected
        } else if inputs.degradation_level > 0 {
            Classification::Degraded
        } else {
            Classification::Accepted
        };
        let guidance_signal = match classification {
            Classification::Rejected => GuidanceSignal::Stop,
            Classification::Degraded => GuidanceSignal::SlowDown,
            Classification::Accepted => {
                if inputs.capacity.eeb_remaining_q16 < inputs.eeb_delta_q16.saturating_abs() {
                    GuidanceSignal::RevisitCoverage
                } else {
                    GuidanceSignal::KeepScanning
                }
            }
        };

        Ok(AdmissionOutcome {
            decision: AdmissionDecision {
                candidate_id: inputs.candidate_id,
                classification,
                reason: inputs.reject_reason,
                eeb_delta: inputs.eeb_delta_q16,
                build_mode: inputs.build_mode,
                guidance_signal,
                hard_fuse_trigger: inputs.hard_fuse,
            },
            canonical_bytes: canonical,
            decision_hash,
        })
    }

    /// Idempotent extension handling: replays return the original snapshot
    /// with canonical bytes equal to the original.
    pub fn request_extension(
        &mut self,
        extension_request_id: u64,
        inputs: &AdmissionInputs,
    ) -> Result<ExtensionResponse> {
        if let Some(snapshot) = self.processed_extensions.get(&extension_request_id) {
            return Ok(ExtensionResponse::AlreadyProcessed(snapshot.clone()));
        }
        let outcome = self.evaluate(inputs)?;
        let result_tag = match outcome.decision.classification {
            Classification::Rejected => ExtensionResultTag::Denied,
            _ => ExtensionResultTag::Extended,
        };
        let snapshot = ExtensionSnapshot {
            result_tag,
            outcome,
        };
        self.processed_extensions
            .insert(extension_request_id, snapshot.clone());
        Ok(ExtensionResponse::Processed(snapshot))
    }

    /// Reset at session start.
    pub fn reset(&mut self) {
        self.processed_extensions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inputs() -> AdmissionInputs {
        AdmissionInputs {
            candidate_id: Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
            capacity: CapacityMetrics {
                patch_count_shadow: 12,
                eeb_remaining_q16: 10 * 65536,
            },
            eeb_delta_q16: -65536,
            build_mode: BuildMode::Full,
            reject_reason: None,
            hard_fuse: None,
            policy_hash: 0x1234_5678_9abc_def0,
            session_stable_id: 0xfedc_ba98_7654_3210,
            candidate_stable_id: 0x0123_4567_89ab_cdef,
            value_score: 1000,
            per_flow_counters: vec![1, 2, 3, 4],
            flow_bucket_count: 4,
            throttle: None,
            degradation_level: 0,
            degradation_reason_code: None,
            schema_version: 0x0204,
        }
    }

    #[test]
    fn canonical_bytes_are_deterministic_across_runs() {
        let inputs = sample_inputs();
        let a = canonical_bytes(&inputs).unwrap();
        let b = canonical_bytes(&inputs).unwrap();
        assert_eq!(a, b);

        let controller = AdmissionController::new();
        let first = controller.evaluate(&inputs).unwrap();
        let second = controller.evaluate(&inputs).unwrap();
        assert_eq!(first.canonical_bytes, second.canonical_bytes);
        assert_eq!(first.decision_hash, second.decision_hash);
    }

    #[test]
    fn canonical_layout_is_bit_exact() {
        let inputs = sample_inputs();
        let bytes = canonical_bytes(&inputs).unwrap();
        // 1 version + 16 uuid + 4 + 8 + 8 + 1 mode + 1 + 1 presence bytes
        // + 8*4 ids/score + 2 bucket count + 8 counters + 1 throttle
        // + 1 degradation + 2 schema = 86.
        assert_eq!(bytes.len(), 86);
        assert_eq!(bytes[0], LAYOUT_VERSION);
        // RFC 4122 byte order for the example uuid starts 55 0e 84 00.
        assert_eq!(&bytes[1..5], &[0x55, 0x0e, 0x84, 0x00]);
        // patch_count_shadow at offset 17.
        assert_eq!(&bytes[17..21], &[0, 0, 0, 12]);
        // build_mode at offset 37, presence bytes at 38 and 39.
        assert_eq!(bytes[37], 0);
        assert_eq!(bytes[38], 0);
        assert_eq!(bytes[39], 0);
        // schema version is the final two bytes.
        assert_eq!(&bytes[84..], &[0x02, 0x04]);
    }

    #[test]
    fn decision_hash_hex_is_64_lowercase() {
        let controller = AdmissionController::new();
        let outcome = controller.evaluate(&sample_inputs()).unwrap();
        let hex = outcome.decision_hash_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex, hex.to_lowercase());
        assert!(!hex.starts_with("0x"));
    }

    #[test]
    fn counter_length_mismatch_fails_fast() {
        let mut inputs = sample_inputs();
        inputs.flow_bucket_count = 5;
        let err = canonical_bytes(&inputs).unwrap_err().to_string();
        assert!(err.contains("per_flow_counters"));
    }

    #[test]
    fn degradation_reason_pairing_is_enforced() {
        let mut inputs = sample_inputs();
        inputs.degradation_level = 2;
        assert!(canonical_bytes(&inputs).is_err());
        inputs.degradation_reason_code = Some(9);
        let bytes = canonical_bytes(&inputs).unwrap();
        // One extra byte for the reason code.
        assert_eq!(bytes.len(), 87);

        inputs.degradation_level = 0;
        assert!(canonical_bytes(&inputs).is_err());
    }

    #[test]
    fn optional_throttle_extends_the_layout() {
        let mut inputs = sample_inputs();
        inputs.throttle = Some(ThrottleStats {
            window_start_tick: 77,
            window_duration_ticks: 300,
            attempts_in_window: 4,
        });
        let bytes = canonical_bytes(&inputs).unwrap();
        assert_eq!(bytes.len(), 86 + 16);
    }

    #[test]
    fn classification_follows_inputs() {
        let controller = AdmissionController::new();
        let mut inputs = sample_inputs();
        assert_eq!(
            controller.evaluate(&inputs).unwrap().decision.classification,
            Classification::Accepted
        );

        inputs.reject_reason = Some(RejectReason::PolicyVeto);
        assert_eq!(
            controller.evaluate(&inputs).unwrap().decision.classification,
            Classification::Rejected
        );

        inputs.reject_reason = None;
        inputs.degradation_level = 1;
        inputs.degradation_reason_code = Some(1);
        assert_eq!(
            controller.evaluate(&inputs).unwrap().decision.classification,
            Classification::Degraded
        );
    }

    #[test]
    fn extension_requests_are_idempotent() {
        let mut controller = AdmissionController::new();
        let inputs = sample_inputs();
        let first = match controller.request_extension(42, &inputs).unwrap() {
            ExtensionResponse::Processed(snapshot) => snapshot,
            ExtensionResponse::AlreadyProcessed(_) => panic!("first call must process"),
        };
        assert_eq!(first.result_tag, ExtensionResultTag::Extended);

        // Replay with different inputs: the original snapshot wins.
        let mut changed = sample_inputs();
        changed.value_score = 9999;
        let replay = match controller.request_extension(42, &changed).unwrap() {
            ExtensionResponse::AlreadyProcessed(snapshot) => snapshot,
            ExtensionResponse::Processed(_) => panic!("replay must not reprocess"),
        };
        assert_eq!(replay.outcome.canonical_bytes, first.outcome.canonical_bytes);
        assert_eq!(replay.outcome.decision_hash, first.outcome.decision_hash);
        assert_eq!(replay.result_tag, ExtensionResultTag::Extended);
    }

    #[test]
    fn denied_extension_keeps_denied_tag_on_replay() {
        let mut controller = AdmissionController::new();
        let mut inputs = sample_inputs();
        inputs.hard_fuse = Some(HardFuseTrigger::StorageExhausted);
        let _ = controller.request_extension(7, &inputs).unwrap();
        match controller.request_extension(7, &inputs).unwrap() {
            ExtensionResponse::AlreadyProcessed(snapshot) => {
                assert_eq!(snapshot.result_tag, ExtensionResultTag::Denied);
            }
            ExtensionResponse::Processed(_) => panic!("replay must not reprocess"),
        }
    }

    #[test]
    fn canonical_bytes_do_not_alias_inputs() {
        let mut inputs = sample_inputs();
        let bytes = canonical_bytes(&inputs).unwrap();
        inputs.per_flow_counters[0] = 0xffff;
        let changed = canonical_bytes(&inputs).unwrap();
        assert_ne!(bytes, changed);
        // The original copy is untouched by the mutation.
        assert_eq!(&bytes[74..76], &[0, 1]);
    }

    #[test]
    fn canonical_json_is_sorted_and_float_free() {
        let controller = AdmissionController::new();
        let outcome = controller.evaluate(&sample_inputs()).unwrap();
        let json = outcome.to_canonical_json().unwrap();
        let build_mode_pos = json.find("build_mode").unwrap();
        let reason_pos = json.find("reason").unwrap();
        assert!(build_mode_pos < reason_pos);
        assert!(!json.contains('\n'));
    }
}
