//! Deterministic order statistics.
//!
//! Median and MAD work on a sorted copy using a stable sort; the even-count
//! median is the integer average of the two middle elements. The f64 variants
//! order by `total_cmp` so NaN handling is explicit at the call site, not
//! inside the sort.

/// Median of an i64 slice. Returns `None` on empty input.
pub fn median_i64(values: &[i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        // Integer average; i128 avoids midpoint overflow at the extremes.
        Some(((sorted[mid - 1] as i128 + sorted[mid] as i128) / 2) as i64)
    }
}

/// Median absolute deviation of an i64 slice.
pub fn mad_i64(values: &[i64]) -> Option<i64> {
    let med = median_i64(values)?;
    let deviations: Vec<i64> = values
        .iter()
        .map(|v| (v - med).saturating_abs())
        .collect();
    median_i64(&deviations)
}

/// Median of finite f64 values, ordered by `total_cmp`.
///
/// Callers are expected to have filtered non-finite inputs already; a NaN
/// reaching this function sorts deterministically but poisons the average.
pub fn median_f64(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}
