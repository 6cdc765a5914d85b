use log::{debug, info};
use ndarray::{s, Array1, Array2, Array3, ArrayView1, Axis};

use super::memo::Memo;
use crate::cache::RecordCache;
use crate::data::model::Field;
use crate::error::{Result, ViewerError};

// ---------------------------------------------------------------------------
// Clustering collaborator
// ---------------------------------------------------------------------------

/// External clustering collaborator: assigns each point (row) one of `k`
/// cluster labels.
pub trait Clusterer {
    fn cluster(&self, points: &Array2<f64>, k: usize) -> Vec<usize>;
}

/// Default clustering collaborator: Lloyd's k-means with farthest-point
/// seeding, so the same points always produce the same mask without an RNG
/// seed threaded through the viewer.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub max_iter: usize,
}

impl Default for KMeans {
    fn default() -> Self {
        KMeans { max_iter: 100 }
    }
}

fn dist2(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl Clusterer for KMeans {
    fn cluster(&self, points: &Array2<f64>, k: usize) -> Vec<usize> {
        let n = points.nrows();
        if n == 0 || k == 0 {
            return vec![0; n];
        }
        let k = k.min(n);

        // seed: first point, then repeatedly the point farthest from all
        // chosen centroids
        let mut centroids: Vec<Array1<f64>> = vec![points.row(0).to_owned()];
        while centroids.len() < k {
            let mut best = (0, f64::NEG_INFINITY);
            for i in 0..n {
                let d = centroids
                    .iter()
                    .map(|c| dist2(points.row(i), c.view()))
                    .fold(f64::INFINITY, f64::min);
                if d > best.1 {
                    best = (i, d);
                }
            }
            centroids.push(points.row(best.0).to_owned());
        }

        let mut labels = vec![0usize; n];
        for _ in 0..self.max_iter {
            let mut changed = false;
            for i in 0..n {
                let mut assigned = (0, f64::INFINITY);
                for (j, c) in centroids.iter().enumerate() {
                    let d = dist2(points.row(i), c.view());
                    if d < assigned.1 {
                        assigned = (j, d);
                    }
                }
                if labels[i] != assigned.0 {
                    labels[i] = assigned.0;
                    changed = true;
                }
            }
            for (j, centroid) in centroids.iter_mut().enumerate() {
                let members: Vec<usize> = (0..n).filter(|&i| labels[i] == j).collect();
                if members.is_empty() {
                    continue;
                }
                let mut mean = Array1::<f64>::zeros(points.ncols());
                for &i in &members {
                    mean += &points.row(i);
                }
                *centroid = mean / members.len() as f64;
            }
            if !changed {
                break;
            }
        }
        labels
    }
}

// ---------------------------------------------------------------------------
// Masks
// ---------------------------------------------------------------------------

/// Fixed-band mask: true (valid) where `lo <= v <= hi`.
pub fn threshold_mask(values: &Array1<f64>, lo: f64, hi: f64) -> Vec<bool> {
    values.iter().map(|&v| v >= lo && v <= hi).collect()
}

/// Cluster the per-file points into `k` groups and keep only the majority
/// cluster; everything else is flagged as an outlier (false).
pub fn cluster_mask(points: &Array2<f64>, k: usize, clusterer: &dyn Clusterer) -> Vec<bool> {
    let labels = clusterer.cluster(points, k);
    let mut counts = vec![0usize; k.max(1)];
    for &l in &labels {
        if l < counts.len() {
            counts[l] += 1;
        }
    }
    let majority = counts
        .iter()
        .enumerate()
        .max_by_key(|(_, &c)| c)
        .map(|(j, _)| j)
        .unwrap_or(0);
    let mask: Vec<bool> = labels.iter().map(|&l| l == majority).collect();
    info!(
        "cluster mask: {}/{} files in the majority cluster",
        mask.iter().filter(|&&m| m).count(),
        mask.len()
    );
    mask
}

// ---------------------------------------------------------------------------
// StabilityView – memoized per-file summary statistics
// ---------------------------------------------------------------------------

/// Low-dimensional per-file summaries feeding the outlier masks. Both
/// summaries are memoized on the target-set identity hash: they are only
/// recomputed when the selection itself changes.
#[derive(Debug, Default)]
pub struct StabilityView {
    trace_memo: Memo<u64, Array2<f64>>,
    g2_memo: Memo<u64, Array3<f64>>,
}

impl StabilityView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.trace_memo.invalidate();
        self.g2_memo.invalidate();
    }

    /// Per-file `(min, max)` of the globally-normalized intensity trace:
    /// an `n x 2` point cloud for the clustering mask.
    pub fn trace_summary(
        &mut self,
        cache: &RecordCache,
        target: &[String],
        identity: u64,
    ) -> Result<Array2<f64>> {
        if let Some(points) = self.trace_memo.lookup(&identity) {
            debug!("trace summary: cache hit");
            return Ok(points.clone());
        }

        let frame = cache.get(&[Field::IntensityTrace], target)?;
        let stack = frame[&Field::IntensityTrace]
            .as_two()
            .ok_or_else(|| ViewerError::RaggedStack {
                field: Field::IntensityTrace,
                detail: "stacked payload has an unexpected rank".into(),
            })?;

        // row 1 holds the frame sums; single-row files fall back to row 0
        let row = if stack.shape()[1] >= 2 { 1 } else { 0 };
        let traces = stack.index_axis(Axis(1), row);
        let peak = traces.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v));

        let n = traces.shape()[0];
        let mut points = Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            let t = traces.row(i);
            let lo = t.iter().fold(f64::INFINITY, |m, &v| m.min(v));
            let hi = t.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v));
            let (lo, hi) = if peak > 0.0 { (lo / peak, hi / peak) } else { (lo, hi) };
            points[[i, 0]] = lo;
            points[[i, 1]] = hi;
        }

        self.trace_memo.store(identity, points.clone());
        Ok(points)
    }

    /// Per-file mean of the last `window` delay points of g2 at `q_index`:
    /// the tail of a well-behaved g2 decays to its baseline, so a file
    /// whose tail sits far from the others is suspect.
    pub fn g2_tail_summary(
        &mut self,
        cache: &RecordCache,
        target: &[String],
        identity: u64,
        q_index: usize,
        window: usize,
    ) -> Result<Array1<f64>> {
        let g2 = match self.g2_memo.lookup(&identity) {
            Some(g2) => {
                debug!("g2 tail summary: cache hit");
                g2.clone()
            }
            None => {
                let frame = cache.get(&[Field::G2], target)?;
                let g2 = frame[&Field::G2]
                    .as_two()
                    .cloned()
                    .ok_or_else(|| ViewerError::RaggedStack {
                        field: Field::G2,
                        detail: "stacked payload has an unexpected rank".into(),
                    })?;
                self.g2_memo.store(identity, g2.clone());
                g2
            }
        };

        let delays = g2.shape()[1];
        let bins = g2.shape()[2];
        if delays == 0 || bins == 0 {
            return Err(ViewerError::RaggedStack {
                field: Field::G2,
                detail: "empty g2 block".into(),
            });
        }
        let w = window.clamp(1, delays);
        let qi = q_index.min(bins - 1);

        let tail = g2.slice(s![.., delays - w.., qi]);
        tail.mean_axis(Axis(1))
            .ok_or_else(|| ViewerError::RaggedStack {
                field: Field::G2,
                detail: "empty tail window".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::FixtureLoader;
    use crate::data::model::FieldData;
    use pretty_assertions::assert_eq;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn kmeans_separates_an_obvious_outlier() {
        // 4 tight points and 1 far away
        let points = ndarray::array![
            [0.10, 0.90],
            [0.11, 0.92],
            [0.09, 0.91],
            [0.10, 0.89],
            [0.60, 0.20],
        ];
        let mask = cluster_mask(&points, 2, &KMeans::default());
        assert_eq!(mask, vec![true, true, true, true, false]);
    }

    #[test]
    fn threshold_band_flags_values_outside() {
        let values = Array1::from(vec![1.00, 1.01, 0.99, 1.02, 1.30]);
        let mask = threshold_mask(&values, 0.95, 1.05);
        assert_eq!(mask, vec![true, true, true, true, false]);
        assert_eq!(mask.iter().filter(|&&m| !m).count(), 1);
    }

    fn trace_cache() -> (RecordCache, Vec<String>) {
        // hand-built records: 2-row intensity traces, row 1 is the frame sum
        let mut loader = FixtureLoader::new();
        let heights = [10.0, 10.5, 9.8, 10.2, 30.0];
        let names: Vec<String> = (0..heights.len()).map(|i| format!("f{i}")).collect();
        for (name, &h) in names.iter().zip(heights.iter()) {
            let mut fields = std::collections::BTreeMap::new();
            let trace = Array2::from_shape_fn((2, 16), |(r, c)| {
                if r == 1 {
                    h + (c % 2) as f64
                } else {
                    0.0
                }
            });
            fields.insert(Field::IntensityTrace, FieldData::Two(trace));
            loader.records.insert(name.clone(), fields);
        }
        let mut cache = RecordCache::with_fields(vec![Field::IntensityTrace]);
        cache.reconcile(&names, &loader, None, None).unwrap();
        (cache, names)
    }

    #[test]
    fn trace_summary_is_memoized_on_identity() {
        let (cache, names) = trace_cache();
        let mut view = StabilityView::new();

        let p1 = view.trace_summary(&cache, &names, 42).unwrap();
        assert_eq!(p1.shape(), &[5, 2]);
        // normalized: the tallest trace tops out at 1.0
        let global_max = p1.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!((global_max - 1.0).abs() < 1e-12);

        // same identity: identical result from the memo
        let p2 = view.trace_summary(&cache, &names, 42).unwrap();
        assert_eq!(p1, p2);

        // the clustering mask flags exactly the tall trace
        let mask = cluster_mask(&p1, 2, &KMeans::default());
        assert_eq!(mask, vec![true, true, true, true, false]);
    }

    #[test]
    fn g2_tail_summary_means_the_last_window() {
        let loader = FixtureLoader::new()
            .with_g2_file("a", 10, 3, 1.00)
            .with_g2_file("b", 10, 3, 1.08);
        let mut cache = RecordCache::with_fields(vec![Field::G2]);
        cache
            .reconcile(&strings(&["a", "b"]), &loader, None, None)
            .unwrap();

        let mut view = StabilityView::new();
        let tail = view
            .g2_tail_summary(&cache, &strings(&["a", "b"]), 7, 1, 4)
            .unwrap();
        assert_eq!(tail.len(), 2);
        assert!((tail[0] - 1.00).abs() < 1e-12);
        assert!((tail[1] - 1.08).abs() < 1e-12);

        let mask = threshold_mask(&tail, 0.95, 1.05);
        assert_eq!(mask, vec![true, false]);
    }

    #[test]
    fn stale_identity_recomputes() {
        let (cache, names) = trace_cache();
        let mut view = StabilityView::new();
        view.trace_summary(&cache, &names, 1).unwrap();

        // shrunk target with a new identity: summary must match the new list
        let shrunk: Vec<String> = names[..4].to_vec();
        let p = view.trace_summary(&cache, &shrunk, 2).unwrap();
        assert_eq!(p.shape(), &[4, 2]);
    }
}
