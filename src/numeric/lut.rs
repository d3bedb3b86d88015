//! LUT-based transcendentals over Q16.
//!
//! `exp_q16` decomposes e^x into a base-2 exponent and a fractional power
//! looked up from a 257-entry table with linear interpolation. The table is
//! built once per process; every evaluation after that is integer-only, so a
//! given input yields the same output on every call and every run.

use std::sync::OnceLock;

use crate::numeric::q16::{Q16, Q16_MAX, Q16_ONE};

/// log2(e) in Q16.
const LOG2_E_Q16: i64 = 94548;

/// Binary exponent at which e^x no longer fits a Q16 i64.
const SATURATE_EXP: i64 = 46;

/// Binary exponent below which e^x rounds to zero in Q16.
const UNDERFLOW_EXP: i64 = -48;

static EXP2_FRAC_Q32: OnceLock<[u64; 257]> = OnceLock::new();

/// 2^(i/256) in Q32, for i in 0..=256. Entry 0 is exactly 2^32.
fn exp2_frac_table() -> &'static [u64; 257] {
    EXP2_FRAC_Q32.get_or_init(|| {
        let mut table = [0u64; 257];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = ((i as f64 / 256.0).exp2() * 4_294_967_296.0).round() as u64;
        }
        table
    })
}

/// Range-complete e^x in Q16.
///
/// Handles the entire i64 input domain: large positive inputs saturate to
/// `Q16_MAX`, large negative inputs underflow to 0, and `exp_q16(0)` is
/// 65536 within LUT-interpolation tolerance (±1).
pub fn exp_q16(x: Q16) -> Q16 {
    // t = x * log2(e), still in Q16.
    let t = (x as i128 * LOG2_E_Q16 as i128) >> 16;
    let k = t >> 16;
    if k >= SATURATE_EXP as i128 {
        return Q16_MAX;
    }
    if k <= UNDERFLOW_EXP as i128 {
        return 0;
    }
    let k = k as i64;
    let f = (t - ((k as i128) << 16)) as u64; // 0..65536

    let table = exp2_frac_table();
    let idx = (f >> 8) as usize;
    let rem = f & 0xff;
    let lo = table[idx];
    let hi = table[idx + 1];
    let frac_q32 = lo + (((hi - lo) * rem) >> 8);

    // frac_q32 is in [2^32, 2^33); the final value is frac * 2^k in Q16.
    if k <= 16 {
        let shift = 16 - k;
        if shift >= 64 {
            0
        } else {
            (frac_q32 >> shift) as Q16
        }
    } else {
        let wide = (frac_q32 as i128) << (k - 16);
        if wide > Q16_MAX as i128 {
            Q16_MAX
        } else {
            wide as Q16
        }
    }
}
