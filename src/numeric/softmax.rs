//! Range-complete softmax and stable sigmoid over Q16.
//!
//! The softmax post-condition is exact: weights are non-negative and sum to
//! 65536 with no tolerance. `Q16_MIN` logits are treated as negative
//! infinity; a vector of them takes the uniform-fallback path. Trace events
//! (`softmax_uniform`, `softmax_remainder_distributed`) are delivered through
//! a caller-supplied sink so the frame context can own the path trace.

use crate::numeric::lut::exp_q16;
use crate::numeric::q16::{Q16, Q16_MIN, Q16_ONE};

/// Verification level for the softmax post-condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SoftmaxMode {
    /// Re-verify the exact-sum invariant after distribution; a violation is a
    /// kernel bug and aborts.
    Strict,
    /// Trust the construction.
    Fast,
}

/// Trace event name for the uniform fallback path.
pub const TRACE_SOFTMAX_UNIFORM: &str = "softmax_uniform";

/// Trace event name for nonzero remainder distribution.
pub const TRACE_SOFTMAX_REMAINDER: &str = "softmax_remainder_distributed";

/// Softmax over Q16 logits. Output weights sum to exactly 65536.
///
/// Ties on the maximum logit and on the largest weight resolve to the first
/// occurrence, so the result is identical across runs and platforms.
pub fn softmax_q16(
    logits: &[Q16],
    mode: SoftmaxMode,
    trace: &mut dyn FnMut(&'static str),
) -> Vec<Q16> {
    if logits.is_empty() {
        return Vec::new();
    }
    let n = logits.len();

    // Deterministic first-max.
    let mut max = logits[0];
    for &logit in &logits[1..] {
        if logit > max {
            max = logit;
        }
    }

    // Q16_MIN is the negative-infinity sentinel; its exponential is zero
    // regardless of the shift.
    let exps: Vec<i64> = logits
        .iter()
        .map(|&logit| {
            if logit == Q16_MIN {
                0
            } else {
                exp_q16(logit.saturating_sub(max))
            }
        })
        .collect();

    let sum: i128 = exps.iter().map(|&e| e as i128).sum();

    let mut weights: Vec<Q16>;
    if sum <= 0 {
        // Uniform fallback: 65536/n per slot, the division remainder closing
        // the sum in the final slot.
        let base = (Q16_ONE as usize / n) as Q16;
        weights = vec![base; n];
        weights[n - 1] += Q16_ONE - base * n as Q16;
        trace(TRACE_SOFTMAX_UNIFORM);
    } else {
        weights = exps
            .iter()
            .map(|&e| ((((e as i128) << 16) / sum) as Q16).max(0))
            .collect();

        let actual_sum: Q16 = weights.iter().sum();
        let remainder = Q16_ONE - actual_sum;
        if remainder != 0 {
            // First-largest slot absorbs the remainder.
            let mut largest = 0usize;
            for (i, &w) in weights.iter().enumerate() {
                if w > weights[largest] {
                    largest = i;
                }
            }
            weights[largest] += remainder;
            trace(TRACE_SOFTMAX_REMAINDER);
        }
    }

    if mode == SoftmaxMode::Strict {
        let check: Q16 = weights.iter().sum();
        assert!(
            check == Q16_ONE && weights.iter().all(|&w| w >= 0),
            "softmax post-condition violated: sum={} weights={:?}",
            check,
            weights
        );
    }
    weights
}

/// Numerically stable logistic function in Q16. Never NaN.
///
/// Input is clamped to ±80 (in real units) and evaluated through the
/// branch-stable formulation: 1/(1+e^-x) for x >= 0, e^x/(1+e^x) otherwise.
pub fn stable_sigmoid_q16(x: Q16) -> Q16 {
    let x = x.clamp(-80 * Q16_ONE, 80 * Q16_ONE);
    let e = exp_q16(-x.abs());
    let denom = (Q16_ONE + e) as i128;
    if x >= 0 {
        (((Q16_ONE as i128) << 16) / denom) as Q16
    } else {
        (((e as i128) << 16) / denom) as Q16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::q16::Q16_MAX;

    fn run(logits: &[Q16]) -> (Vec<Q16>, Vec<&'static str>) {
        let mut events = Vec::new();
        let weights = softmax_q16(logits, SoftmaxMode::Strict, &mut |e| events.push(e));
        (weights, events)
    }

    #[test]
    fn single_logit_takes_all_mass() {
        let (w, events) = run(&[Q16_ONE]);
        assert_eq!(w, vec![Q16_ONE]);
        assert!(events.is_empty());
    }

    #[test]
    fn all_negative_infinity_falls_back_to_uniform() {
        let (w, events) = run(&[Q16_MIN, Q16_MIN, Q16_MIN]);
        assert_eq!(w, vec![21845, 21845, 21846]);
        assert!(events.contains(&TRACE_SOFTMAX_UNIFORM));
    }

    #[test]
    fn equal_logits_split_evenly_with_exact_sum() {
        let (w, _) = run(&[0, 0, 0, 0]);
        assert_eq!(w.iter().sum::<Q16>(), Q16_ONE);
        assert_eq!(w, vec![16384, 16384, 16384, 16384]);
    }

    #[test]
    fn spread_logits_sum_exactly() {
        let (w, _) = run(&[Q16_ONE, 0, -Q16_ONE]);
        assert_eq!(w.iter().sum::<Q16>(), Q16_ONE);
        assert!(w.iter().all(|&x| x >= 0));
        assert!(w[0] > w[1] && w[1] > w[2]);
        // Determinism across invocations.
        let (w2, _) = run(&[Q16_ONE, 0, -Q16_ONE]);
        assert_eq!(w, w2);
    }

    #[test]
    fn large_magnitude_logits_stay_in_range() {
        let bound = 1 << 26;
        let (w, _) = run(&[bound, -bound, 0]);
        assert_eq!(w.iter().sum::<Q16>(), Q16_ONE);
        assert!(w.iter().all(|&x| x >= 0));
    }

    #[test]
    fn remainder_goes_to_first_largest_on_ties() {
        // Two equal slots: 65536/2 is exact, no remainder. Three equal slots
        // leave remainder 1 on the first slot.
        let (w, events) = run(&[0, 0, 0]);
        assert_eq!(w, vec![21846, 21845, 21845]);
        assert!(events.contains(&TRACE_SOFTMAX_REMAINDER));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let (w, events) = run(&[]);
        assert!(w.is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn sigmoid_is_bounded_and_symmetric() {
        assert_eq!(stable_sigmoid_q16(0), Q16_ONE / 2);
        assert_eq!(stable_sigmoid_q16(200 * Q16_ONE), Q16_ONE);
        assert_eq!(stable_sigmoid_q16(-200 * Q16_ONE), 0);
        let plus = stable_sigmoid_q16(2 * Q16_ONE);
        let minus = stable_sigmoid_q16(-2 * Q16_ONE);
        assert!((plus + minus - Q16_ONE).abs() <= 2);
        assert_eq!(stable_sigmoid_q16(Q16_MAX), Q16_ONE);
    }
}
