use ndarray::{Array1, Array2};

/// A fully reconstructed two-time correlation matrix with its time axis.
#[derive(Debug, Clone)]
pub struct TwoTimeMap {
    pub c2: Array2<f64>,
    pub time: Array1<f64>,
}

/// Time per matrix index: frames are strided and averaged on the detector
/// side, so one index covers `stride * avg` exposure periods.
pub fn time_scale(t0: f64, t1: f64, stride: f64, avg: f64) -> f64 {
    t0.max(t1) * stride * avg
}

/// Reconstruct the full matrix from the stored half: `c2 = half + halfᵀ`.
/// The half stores the diagonal at half weight, so an already-symmetric
/// matrix round-trips exactly through its half representation.
pub fn symmetrize(half: &Array2<f64>) -> Array2<f64> {
    half + &half.t()
}

/// Correct the saturation artifact: entries above `ceiling` are replaced
/// with their left neighbor (first column wraps to the last), matching the
/// one-column translate the original analysis applies.
pub fn translate_correct(c2: &Array2<f64>, ceiling: f64) -> Array2<f64> {
    let (rows, cols) = c2.dim();
    let mut out = c2.clone();
    if cols == 0 {
        return out;
    }
    for i in 0..rows {
        for j in 0..cols {
            if c2[[i, j]] > ceiling {
                let src = if j == 0 { cols - 1 } else { j - 1 };
                out[[i, j]] = c2[[i, src]];
            }
        }
    }
    out
}

/// Replace the noisy main diagonal with the mean of its two side-band
/// neighbors (one neighbor at the corners).
pub fn correct_diagonal(c2: &Array2<f64>) -> Array2<f64> {
    let n = c2.nrows();
    let mut out = c2.clone();
    if n < 2 {
        return out;
    }
    for i in 0..n {
        let mut sum = 0.0;
        let mut norm = 0.0;
        if i > 0 {
            sum += c2[[i - 1, i]];
            norm += 1.0;
        }
        if i + 1 < n {
            sum += c2[[i, i + 1]];
            norm += 1.0;
        }
        out[[i, i]] = sum / norm;
    }
    out
}

/// Build the displayable map: symmetrize the stored half, fix saturated
/// entries, lay out the time axis.
pub fn two_time_map(half: &Array2<f64>, ceiling: f64, time_scale: f64) -> TwoTimeMap {
    let c2 = translate_correct(&symmetrize(half), ceiling);
    let n = c2.nrows();
    let time = Array1::from_shape_fn(n, |i| i as f64 * time_scale);
    TwoTimeMap { c2, time }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    /// Upper-triangular half with the diagonal at half weight, the storage
    /// convention the reconstruction assumes.
    fn half_of(full: &Array2<f64>) -> Array2<f64> {
        let n = full.nrows();
        let mut half = Array2::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                half[[i, j]] = if i == j { full[[i, j]] / 2.0 } else { full[[i, j]] };
            }
        }
        half
    }

    #[test]
    fn symmetric_input_is_a_fixed_point() {
        let full = array![[1.0, 1.1, 1.0], [1.1, 1.2, 1.1], [1.0, 1.1, 1.0]];
        let rebuilt = symmetrize(&half_of(&full));
        assert_eq!(rebuilt, full);

        // all entries below the ceiling: the correction changes nothing
        let corrected = translate_correct(&rebuilt, 1.3);
        assert_eq!(corrected, rebuilt);
    }

    #[test]
    fn saturated_entries_take_the_left_neighbor() {
        let c2 = array![[1.0, 9.0, 1.2], [9.0, 1.1, 1.0]];
        let fixed = translate_correct(&c2, 1.3);
        assert_eq!(fixed, array![[1.0, 1.0, 1.2], [1.0, 1.1, 1.0]]);
    }

    #[test]
    fn diagonal_takes_the_side_band_mean() {
        let c2 = array![[5.0, 1.0, 0.0], [1.0, 5.0, 3.0], [0.0, 3.0, 5.0]];
        let fixed = correct_diagonal(&c2);
        assert_eq!(fixed[[0, 0]], 1.0);
        assert_eq!(fixed[[1, 1]], 2.0);
        assert_eq!(fixed[[2, 2]], 3.0);
        // off-diagonal untouched
        assert_eq!(fixed[[0, 1]], 1.0);
    }

    #[test]
    fn map_carries_a_scaled_time_axis() {
        let half = half_of(&array![[1.0, 1.1], [1.1, 1.0]]);
        let scale = time_scale(1e-4, 2e-4, 10.0, 5.0);
        let map = two_time_map(&half, 1.3, scale);
        assert_eq!(map.c2.dim(), (2, 2));
        assert_eq!(map.time.len(), 2);
        assert_eq!(map.time[1], 2e-4 * 50.0);
    }
}
