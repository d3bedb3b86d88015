//! Monotonic coverage state machines and the decision-policy gate.
//!
//! The color state is the user-visible coverage level. It only moves
//! forward: each evaluation computes a candidate from coverage and soft
//! evidence, then takes `max(current, candidate)`. The visual state machine
//! is a coarser mirror with the same discipline. The Gray-to-White gate is
//! the single source of truth for that transition and reads nothing but its
//! explicit inputs.

use serde::{Deserialize, Serialize};

/// User-visible coverage state. `Unknown` is unordered in the UI sense but
/// sorts below `Black` so the monotonic max() treats it as the floor.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ColorState {
    Unknown,
    Black,
    DarkGray,
    LightGray,
    White,
    Original,
}

impl ColorState {
    /// Stable lowercase identifier used in provenance pre-images.
    pub fn raw(self) -> &'static str {
        match self {
            ColorState::Unknown => "unknown",
            ColorState::Black => "black",
            ColorState::DarkGray => "darkGray",
            ColorState::LightGray => "lightGray",
            ColorState::White => "white",
            ColorState::Original => "original",
        }
    }
}

/// Internal coverage band S0..S5.
///
/// S1 and S2 both map to darkGray; the band mapping keeps the distinction
/// even though the threshold table only ever produces S2.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CoverageBand {
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
}

impl CoverageBand {
    pub fn color(self) -> ColorState {
        match self {
            CoverageBand::S0 => ColorState::Black,
            CoverageBand::S1 | CoverageBand::S2 => ColorState::DarkGray,
            CoverageBand::S3 => ColorState::LightGray,
            CoverageBand::S4 => ColorState::White,
            CoverageBand::S5 => ColorState::Original,
        }
    }

    /// Candidate band from the coverage and soft-evidence statistics.
    pub fn candidate(coverage: f64, soft_evidence: f64) -> Self {
        if coverage >= 0.88 && soft_evidence >= 0.75 {
            CoverageBand::S5
        } else if coverage >= 0.75 {
            CoverageBand::S4
        } else if coverage >= 0.50 {
            CoverageBand::S3
        } else if coverage >= 0.10 {
            CoverageBand::S2
        } else {
            CoverageBand::S0
        }
    }
}

/// Monotonic color-state machine.
#[derive(Clone, Copy, Debug)]
pub struct ColorStateMachine {
    current: ColorState,
}

impl Default for ColorStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorStateMachine {
    pub fn new() -> Self {
        Self {
            current: ColorState::Unknown,
        }
    }

    pub fn current(&self) -> ColorState {
        self.current
    }

    /// Evaluate one frame's statistics. Never retreats.
    pub fn evaluate(&mut self, coverage: f64, soft_evidence: f64) -> ColorState {
        let candidate = CoverageBand::candidate(coverage, soft_evidence).color();
        self.current = self.current.max(candidate);
        self.current
    }
}

/// Coarse visual state shown while scanning.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum VisualState {
    Black,
    DarkGray,
    White,
}

impl VisualState {
    pub fn raw(self) -> &'static str {
        match self {
            VisualState::Black => "black",
            VisualState::DarkGray => "darkGray",
            VisualState::White => "white",
        }
    }
}

/// Monotonic visual-state machine; transitions use max().
#[derive(Clone, Copy, Debug)]
pub struct VisualStateMachine {
    current: VisualState,
}

impl Default for VisualStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl VisualStateMachine {
    pub fn new() -> Self {
        Self {
            current: VisualState::Black,
        }
    }

    pub fn current(&self) -> VisualState {
        self.current
    }

    pub fn advance_to(&mut self, candidate: VisualState) -> VisualState {
        self.current = self.current.max(candidate);
        self.current
    }
}

// ----------------------------------------------------------------------------
// Decision policy: the Gray -> White gate
// ----------------------------------------------------------------------------

/// Capture FPS tier. Only `Full` may cross Gray -> White.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FpsTier {
    Low,
    Medium,
    Full,
}

/// Confidence floor both brightness and laplacian must clear at Full tier.
pub const FULL_TIER_CONFIDENCE_MIN: f64 = 0.80;

/// Stability ceiling (variance over the 300 ms monotonic window).
pub const FULL_TIER_STABILITY_MAX: f64 = 0.15;

/// Width of the stability window in monotonic milliseconds.
pub const STABILITY_WINDOW_MS: i64 = 300;

/// Explicit inputs to the transition gate. The gate reads nothing else.
#[derive(Clone, Copy, Debug)]
pub struct GateInputs {
    pub from: VisualState,
    pub to: VisualState,
    pub fps_tier: FpsTier,
    pub brightness_confidence: f64,
    pub laplacian_confidence: f64,
    pub stability_variance: f64,
}

/// Gate outcome with a stable reason string for blocked transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateVerdict {
    Allowed,
    Blocked { reason: &'static str },
}

/// Single source of truth for visual-state transition admission.
pub fn evaluate_transition(inputs: &GateInputs) -> GateVerdict {
    if inputs.to < inputs.from {
        return GateVerdict::Blocked {
            reason: "reverse transitions are forbidden",
        };
    }
    let gray_to_white =
        inputs.from == VisualState::DarkGray && inputs.to == VisualState::White;
    if !gray_to_white {
        return GateVerdict::Allowed;
    }
    if inputs.fps_tier != FpsTier::Full {
        return GateVerdict::Blocked {
            reason: "gray-to-white requires the full fps tier",
        };
    }
    if inputs.brightness_confidence <= FULL_TIER_CONFIDENCE_MIN
        || inputs.laplacian_confidence <= FULL_TIER_CONFIDENCE_MIN
    {
        return GateVerdict::Blocked {
            reason: "confidence below full-tier threshold",
        };
    }
    if inputs.stability_variance > FULL_TIER_STABILITY_MAX {
        return GateVerdict::Blocked {
            reason: "stability variance above full-tier maximum",
        };
    }
    GateVerdict::Allowed
}

/// Sliding window of (t_ms, value) samples for the stability statistic.
#[derive(Clone, Debug, Default)]
pub struct StabilityWindow {
    samples: Vec<(i64, f64)>,
}

impl StabilityWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a sample and drop everything older than the window.
    pub fn push(&mut self, t_ms: i64, value: f64) {
        self.samples.push((t_ms, value));
        let cutoff = t_ms - STABILITY_WINDOW_MS;
        self.samples.retain(|(t, _)| *t >= cutoff);
    }

    /// Population variance of the windowed samples. Zero when fewer than two.
    pub fn variance(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.samples.iter().map(|(_, v)| v).sum::<f64>() / n as f64;
        self.samples
            .iter()
            .map(|(_, v)| (v - mean) * (v - mean))
            .sum::<f64>()
            / n as f64
    }
}
