use std::ops::Range;

use log::debug;
use ndarray::{s, Array1, Array3, ArrayView2, Axis};

use super::memo::Memo;
use crate::cache::RecordCache;
use crate::data::model::Field;
use crate::error::{Result, ViewerError};

// ---------------------------------------------------------------------------
// Range slicing
// ---------------------------------------------------------------------------

/// Minimal contiguous index range of a monotonically increasing axis whose
/// values satisfy `lo <= v < hi` (half-open: a value exactly at `lo` is
/// included, a value exactly at `hi` is excluded).
pub fn create_slice(axis: &[f64], lo: f64, hi: f64) -> Range<usize> {
    let start = axis.partition_point(|&v| v < lo);
    let end = axis.partition_point(|&v| v < hi);
    start..end.max(start)
}

// ---------------------------------------------------------------------------
// Request / result types
// ---------------------------------------------------------------------------

/// Lower/upper bounds for the four g2 decay fit parameters
/// (baseline, contrast, tau, stretching exponent). Opaque to the engine;
/// passed through to the fit collaborator and used as a memo-key component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitBounds {
    pub lower: [f64; 4],
    pub upper: [f64; 4],
}

impl Default for FitBounds {
    fn default() -> Self {
        FitBounds {
            lower: [0.95, 0.0, 1e-8, 0.1],
            upper: [1.35, 1.0, 1.0, 2.0],
        }
    }
}

/// Parameters of one g2 retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct G2Request {
    /// Use at most this many leading target files; `0` means all.
    pub max_points: usize,
    /// Half-open q window applied to the dynamic q axis.
    pub q_range: (f64, f64),
    /// Half-open delay-time window.
    pub t_range: (f64, f64),
    /// Display-only: vertical window handed to the renderer.
    pub y_range: (f64, f64),
    /// Display-only: per-file vertical offset.
    pub offset: f64,
    /// Fit bounds; display/fit-only, part of the memo key.
    pub bounds: FitBounds,
}

impl Default for G2Request {
    fn default() -> Self {
        G2Request {
            max_points: 0,
            q_range: (0.0, f64::INFINITY),
            t_range: (0.0, f64::INFINITY),
            y_range: (0.95, 1.35),
            offset: 0.0,
            bounds: FitBounds::default(),
        }
    }
}

/// Sliced multi-file g2 view: `g2` and `g2_err` are files x delay x q.
#[derive(Debug, Clone, PartialEq)]
pub struct G2Data {
    pub files: Vec<String>,
    pub t_el: Array1<f64>,
    pub q: Array1<f64>,
    pub g2: Array3<f64>,
    pub g2_err: Array3<f64>,
}

/// A g2 retrieval either yields a consistent view or reports why the
/// selected files cannot be displayed together. The latter is an expected
/// user condition (mixing runs with different binning), not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum G2Outcome {
    Consistent(G2Data),
    Mismatched(String),
}

// ---------------------------------------------------------------------------
// Fit collaborator contract
// ---------------------------------------------------------------------------

/// Per-q-bin result of the external g2 decay fit: a synthetic smooth curve
/// for overlay plus the flat 7-parameter vector
/// `[q, tau, baseline, contrast, tau_err, baseline_err, contrast_err]`
/// consumed later by the tau-q view.
#[derive(Debug, Clone)]
pub struct QBinFit {
    pub fit_x: Vec<f64>,
    pub fit_y: Vec<f64>,
    pub params: [f64; 7],
    pub error: Option<String>,
}

/// External curve-fitting collaborator for the g2 decay.
pub trait CorrelationFit {
    fn fit_correlation(
        &self,
        t_el: &[f64],
        q: &[f64],
        g2: ArrayView2<'_, f64>,
        g2_err: ArrayView2<'_, f64>,
        bounds: &FitBounds,
    ) -> Vec<QBinFit>;
}

// ---------------------------------------------------------------------------
// G2View
// ---------------------------------------------------------------------------

/// Memo key: the file tuple actually displayed plus every request
/// parameter, cosmetic ones included.
#[derive(Debug, Clone, PartialEq)]
struct G2Key {
    files: Vec<String>,
    q_range: (f64, f64),
    t_range: (f64, f64),
    y_range: (f64, f64),
    offset: f64,
    bounds: FitBounds,
}

/// The unsliced stack, kept separately so cosmetic parameter changes skip
/// the restacking work.
#[derive(Debug, Clone)]
struct G2Stack {
    t_el: Array1<f64>,
    q: Array1<f64>,
    g2: Array3<f64>,
    g2_err: Array3<f64>,
}

/// Memoized multi-file g2 view.
///
/// Change classification per request, from cheapest to costliest:
/// tier 0, the full request key matches the stored one: return the cached
/// outcome as-is. tier 1, the file tuple matches the loaded stack: reuse
/// it and only reslice (covers cosmetic and range-only changes; the stack
/// itself does not depend on the ranges). tier 2, the file tuple changed:
/// restack from the record cache, then reslice.
#[derive(Debug, Default)]
pub struct G2View {
    load_memo: Memo<Vec<String>, G2Stack>,
    view_memo: Memo<G2Key, G2Outcome>,
    /// Fit parameter vectors per file, in first-fit order; input of tau-q.
    fit_store: Vec<(String, Vec<f64>)>,
    restacks: usize,
}

impl G2View {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the multi-file stack had to be rebuilt; the cache
    /// tests assert on this.
    pub fn restacks(&self) -> usize {
        self.restacks
    }

    pub fn fit_results(&self) -> &[(String, Vec<f64>)] {
        &self.fit_store
    }

    /// Drop all memoized state (working directory changed).
    pub fn invalidate(&mut self) {
        self.load_memo.invalidate();
        self.view_memo.invalidate();
        self.fit_store.clear();
    }

    /// Retrieve the sliced g2 view for the leading `max_points` target
    /// files. A failed recomputation never replaces the stored outcome.
    pub fn view(
        &mut self,
        cache: &RecordCache,
        target: &[String],
        req: &G2Request,
    ) -> Result<G2Outcome> {
        if target.is_empty() {
            return Err(ViewerError::EmptySelection);
        }
        let n = if req.max_points == 0 {
            target.len()
        } else {
            target.len().min(req.max_points)
        };
        let files: Vec<String> = target[..n].to_vec();
        let key = G2Key {
            files: files.clone(),
            q_range: req.q_range,
            t_range: req.t_range,
            y_range: req.y_range,
            offset: req.offset,
            bounds: req.bounds,
        };

        if let Some(outcome) = self.view_memo.lookup(&key) {
            debug!("g2 view: full cache hit");
            return Ok(outcome.clone());
        }

        let stack = match self.load_memo.lookup(&files) {
            Some(stack) => {
                debug!("g2 view: reslicing cached stack");
                stack.clone()
            }
            None => {
                debug!("g2 view: restacking {} files", files.len());
                match self.build_stack(cache, &files)? {
                    Ok(stack) => {
                        self.load_memo.store(files.clone(), stack.clone());
                        stack
                    }
                    Err(reason) => {
                        let outcome = G2Outcome::Mismatched(reason);
                        self.view_memo.store(key, outcome.clone());
                        return Ok(outcome);
                    }
                }
            }
        };

        let ts = create_slice(&stack.t_el.to_vec(), req.t_range.0, req.t_range.1);
        let qs = create_slice(&stack.q.to_vec(), req.q_range.0, req.q_range.1);
        let data = G2Data {
            files,
            t_el: stack.t_el.slice(s![ts.clone()]).to_owned(),
            q: stack.q.slice(s![qs.clone()]).to_owned(),
            g2: stack.g2.slice(s![.., ts.clone(), qs.clone()]).to_owned(),
            g2_err: stack.g2_err.slice(s![.., ts, qs]).to_owned(),
        };
        let outcome = G2Outcome::Consistent(data);
        self.view_memo.store(key, outcome.clone());
        Ok(outcome)
    }

    /// Run the decay-fit collaborator over the current view and store each
    /// file's flat parameter vector for the tau-q view. Returns the fit log
    /// in the order the files were processed; per-bin fit failures are
    /// reported there, never raised.
    pub fn fit(
        &mut self,
        cache: &RecordCache,
        target: &[String],
        req: &G2Request,
        fitter: &dyn CorrelationFit,
    ) -> Result<Vec<String>> {
        let data = match self.view(cache, target, req)? {
            G2Outcome::Consistent(data) => data,
            G2Outcome::Mismatched(reason) => {
                return Ok(vec![format!("selected files are not consistent: {reason}")])
            }
        };

        let t_el = data.t_el.to_vec();
        let q = data.q.to_vec();
        let mut report = Vec::new();
        for (ipt, file) in data.files.iter().enumerate() {
            let bins = fitter.fit_correlation(
                &t_el,
                &q,
                data.g2.index_axis(Axis(0), ipt),
                data.g2_err.index_axis(Axis(0), ipt),
                &req.bounds,
            );
            report.push(file.clone());
            let mut flat = Vec::with_capacity(bins.len() * 7);
            let mut clean = true;
            for bin in &bins {
                flat.extend_from_slice(&bin.params);
                if let Some(msg) = &bin.error {
                    report.push(format!("---- {msg}"));
                    clean = false;
                }
            }
            if clean {
                report.push("---- fit finished without errors".to_string());
            }
            match self.fit_store.iter_mut().find(|(name, _)| name == file) {
                Some(entry) => entry.1 = flat,
                None => self.fit_store.push((file.clone(), flat)),
            }
        }
        Ok(report)
    }

    /// Stack the g2 fields over `files`. Shape disagreement is reported as
    /// `Err(reason)` in the inner result: an expected condition, distinct
    /// from real retrieval errors.
    fn build_stack(
        &mut self,
        cache: &RecordCache,
        files: &[String],
    ) -> Result<std::result::Result<G2Stack, String>> {
        self.restacks += 1;
        let fields = [Field::DelayTime, Field::QDyn, Field::G2, Field::G2Err];
        let frame = match cache.get(&fields, files) {
            Ok(frame) => frame,
            Err(ViewerError::RaggedStack { field, detail }) => {
                return Ok(Err(format!("field '{field}': {detail}")))
            }
            Err(e) => return Err(e),
        };

        // all files passed the per-field stack; take the first file's axes
        let t_el = frame[&Field::DelayTime]
            .as_one()
            .map(|a| a.row(0).to_owned())
            .ok_or_else(|| stack_rank_error(Field::DelayTime))?;
        let q = frame[&Field::QDyn]
            .as_one()
            .map(|a| a.row(0).to_owned())
            .ok_or_else(|| stack_rank_error(Field::QDyn))?;
        let g2 = frame[&Field::G2]
            .as_two()
            .cloned()
            .ok_or_else(|| stack_rank_error(Field::G2))?;
        let g2_err = frame[&Field::G2Err]
            .as_two()
            .cloned()
            .ok_or_else(|| stack_rank_error(Field::G2Err))?;

        // cross-field consistency: g2 must line up with both axes
        if g2.shape()[1] != t_el.len() || g2.shape()[2] != q.len() {
            return Ok(Err(format!(
                "g2 block is {:?} but axes are {} delays x {} q-bins",
                g2.shape(),
                t_el.len(),
                q.len()
            )));
        }
        if g2.shape() != g2_err.shape() {
            return Ok(Err(format!(
                "g2 is {:?} but g2_err is {:?}",
                g2.shape(),
                g2_err.shape()
            )));
        }

        Ok(Ok(G2Stack { t_el, q, g2, g2_err }))
    }
}

fn stack_rank_error(field: Field) -> ViewerError {
    ViewerError::RaggedStack {
        field,
        detail: "stacked payload has an unexpected rank".into(),
    }
}
