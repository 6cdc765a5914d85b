//! Presentation adapters.
//!
//! The engine hands back arrays; a host GUI wants labeled curves and
//! images. The adapters here do the cosmetic work the original viewer did
//! inline in its plot calls (offsets, log scaling, normalization, legends)
//! and emit renderer-neutral bundles. The crate ships no renderer; hosts
//! implement [`Renderer`].

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};

use crate::engine::g2::G2Data;
use crate::engine::tauq::TauQCurve;

const LOG_FLOOR: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisScale {
    Linear,
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorScale {
    Linear,
    Log,
}

/// One labeled line with its own x axis (fit overlays have a denser x grid
/// than the data they overlay).
#[derive(Debug, Clone)]
pub struct Curve {
    pub label: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub y_err: Option<Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct CurveBundle {
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
    pub xscale: AxisScale,
    pub yscale: AxisScale,
    pub curves: Vec<Curve>,
}

/// A stack of same-shaped 2-D frames, one per file.
#[derive(Debug, Clone)]
pub struct ImageBundle {
    pub title: String,
    pub labels: Vec<String>,
    pub frames: Array3<f64>,
    pub scale: ColorScale,
    /// Display value range, usually from [`percentile_range`].
    pub vrange: (f64, f64),
}

/// Display contract; the host GUI implements it, tests use a recorder.
pub trait Renderer {
    fn show_curves(&mut self, bundle: &CurveBundle);
    fn show_image(&mut self, bundle: &ImageBundle);
}

/// Value range covering `[lo_pct, hi_pct]` percent of the data, the usual
/// way to keep hot pixels from washing out a detector image.
pub fn percentile_range(frames: &Array3<f64>, lo_pct: f64, hi_pct: f64) -> (f64, f64) {
    let mut values: Vec<f64> = frames.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return (0.0, 1.0);
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let pick = |pct: f64| {
        let idx = ((pct / 100.0) * (values.len() - 1) as f64).round() as usize;
        values[idx.min(values.len() - 1)]
    };
    (pick(lo_pct), pick(hi_pct))
}

// ---------------------------------------------------------------------------
// SAXS normalization
// ---------------------------------------------------------------------------

/// Intensity normalization modes for the 1-D SAXS curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaxsNorm {
    None,
    /// Kratky-style `I * q^2`.
    Q2,
    /// Porod-style `I * q^4`.
    Q4,
    /// Divide by the first intensity value.
    Baseline,
}

impl SaxsNorm {
    pub fn ylabel(self) -> &'static str {
        match self {
            SaxsNorm::None => "Intensity",
            SaxsNorm::Q2 => "Intensity * q^2",
            SaxsNorm::Q4 => "Intensity * q^4",
            SaxsNorm::Baseline => "Intensity / I_0",
        }
    }

    pub fn apply(self, q: &[f64], y: &mut [f64]) {
        match self {
            SaxsNorm::None => {}
            SaxsNorm::Q2 => {
                for (v, &qv) in y.iter_mut().zip(q) {
                    *v *= qv * qv;
                }
            }
            SaxsNorm::Q4 => {
                for (v, &qv) in y.iter_mut().zip(q) {
                    *v *= qv.powi(4);
                }
            }
            SaxsNorm::Baseline => {
                let i0 = y.first().copied().unwrap_or(1.0);
                if i0 != 0.0 {
                    for v in y.iter_mut() {
                        *v /= i0;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

/// One bundle per q bin; within a bundle, file `n` is shifted down by
/// `offset * (n + 1)` so the curves do not overlap.
pub fn g2_bundles(data: &G2Data, offset: f64) -> Vec<CurveBundle> {
    let t = data.t_el.to_vec();
    (0..data.q.len())
        .map(|qb| {
            let curves = data
                .files
                .iter()
                .enumerate()
                .map(|(n, file)| {
                    let shift = offset * (n + 1) as f64;
                    let y: Vec<f64> = data
                        .g2
                        .slice(ndarray::s![n, .., qb])
                        .iter()
                        .map(|&v| v - shift)
                        .collect();
                    let err: Vec<f64> =
                        data.g2_err.slice(ndarray::s![n, .., qb]).iter().copied().collect();
                    Curve {
                        label: file.clone(),
                        x: t.clone(),
                        y,
                        y_err: Some(err),
                    }
                })
                .collect();
            CurveBundle {
                title: format!("q = {:.5}", data.q[qb]),
                xlabel: "t (s)".into(),
                ylabel: "g2".into(),
                xscale: AxisScale::Log,
                yscale: AxisScale::Linear,
                curves,
            }
        })
        .collect()
}

/// Tau-q curves on a log-log canvas; file `n` is scaled by
/// `10^(offset * n)` and its power-law fit is overlaid.
pub fn tauq_bundle(curves: &[TauQCurve], offset: f64) -> CurveBundle {
    let mut out = Vec::with_capacity(curves.len() * 2);
    for (n, c) in curves.iter().enumerate() {
        let scale = 10f64.powf(offset * n as f64);
        out.push(Curve {
            label: c.file.clone(),
            x: c.q.clone(),
            y: c.tau.iter().map(|&v| v / scale).collect(),
            y_err: Some(c.tau_err.iter().map(|&v| v / scale).collect()),
        });
        out.push(Curve {
            label: format!("{} (fit)", c.file),
            x: c.fit_x.clone(),
            y: c.fit_y.iter().map(|&v| v / scale).collect(),
            y_err: None,
        });
    }
    CurveBundle {
        title: "relaxation time vs q".into(),
        xlabel: "q (1/A)".into(),
        ylabel: "tau (s)".into(),
        xscale: AxisScale::Log,
        yscale: AxisScale::Log,
        curves: out,
    }
}

/// Azimuthally averaged curves: normalize, then plot `log10(I + floor)`
/// with file `n` shifted by the offset decade.
pub fn saxs1d_bundle(
    q: &Array1<f64>,
    intensity: ArrayView2<'_, f64>,
    labels: &[String],
    norm: SaxsNorm,
    offset: f64,
) -> CurveBundle {
    let qs = q.to_vec();
    let curves = intensity
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(n, row)| {
            let mut y = row.to_vec();
            norm.apply(&qs, &mut y);
            let shift = offset * n as f64;
            for v in y.iter_mut() {
                *v = (*v + LOG_FLOOR).log10() - shift;
            }
            Curve {
                label: labels.get(n).cloned().unwrap_or_else(|| format!("file {n}")),
                x: qs.clone(),
                y,
                y_err: None,
            }
        })
        .collect();
    CurveBundle {
        title: "SAXS 1D".into(),
        xlabel: "q (1/A)".into(),
        ylabel: norm.ylabel().into(),
        xscale: AxisScale::Log,
        yscale: AxisScale::Linear,
        curves,
    }
}

/// Detector images; log display takes `log10(I + floor)` per pixel.
pub fn saxs2d_bundle(frames: &Array3<f64>, labels: &[String], scale: ColorScale) -> ImageBundle {
    let frames = match scale {
        ColorScale::Linear => frames.clone(),
        ColorScale::Log => frames.mapv(|v| (v + LOG_FLOOR).log10()),
    };
    let vrange = percentile_range(&frames, 1.0, 99.0);
    ImageBundle {
        title: "SAXS 2D".into(),
        labels: labels.to_vec(),
        frames,
        scale,
        vrange,
    }
}

/// One file's partial SAXS curves, one per azimuthal sector.
pub fn stability_bundle(
    q: &Array1<f64>,
    partials: ArrayView2<'_, f64>,
    file: &str,
    norm: SaxsNorm,
) -> CurveBundle {
    let labels: Vec<String> = (0..partials.nrows()).map(|n| format!("sector {n}")).collect();
    let mut bundle = saxs1d_bundle(q, partials, &labels, norm, 0.0);
    bundle.title = file.to_string();
    bundle
}

/// Frame-sum intensity traces against elapsed time.
pub fn intensity_bundle(
    time: &Array1<f64>,
    traces: ArrayView2<'_, f64>,
    labels: &[String],
) -> CurveBundle {
    let t = time.to_vec();
    let curves = traces
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(n, row)| Curve {
            label: labels.get(n).cloned().unwrap_or_else(|| format!("file {n}")),
            x: t.clone(),
            y: row.to_vec(),
            y_err: None,
        })
        .collect();
    CurveBundle {
        title: "intensity vs time".into(),
        xlabel: "t (s)".into(),
        ylabel: "intensity (cts)".into(),
        xscale: AxisScale::Linear,
        yscale: AxisScale::Linear,
        curves,
    }
}

/// Per-file g2 tail values against the cutoff band; the title counts the
/// files the band keeps.
pub fn outlier_band_bundle(values: &Array1<f64>, lo: f64, hi: f64, mask: &[bool]) -> CurveBundle {
    let n = values.len();
    let index: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let kept = mask.iter().filter(|&&m| m).count();
    let curves = vec![
        Curve {
            label: "data".into(),
            x: index.clone(),
            y: values.to_vec(),
            y_err: None,
        },
        Curve {
            label: "cutoff_min".into(),
            x: index.clone(),
            y: vec![lo; n],
            y_err: None,
        },
        Curve {
            label: "cutoff_max".into(),
            x: index,
            y: vec![hi; n],
            y_err: None,
        },
    ];
    CurveBundle {
        title: format!("{kept} / {n}"),
        xlabel: "index".into(),
        ylabel: "g2 average".into(),
        xscale: AxisScale::Linear,
        yscale: AxisScale::Linear,
        curves,
    }
}

/// Min/max trace scatter split into the kept and flagged groups.
pub fn cluster_bundle(points: &Array2<f64>, mask: &[bool]) -> CurveBundle {
    let mut kept = Curve {
        label: "kept".into(),
        x: Vec::new(),
        y: Vec::new(),
        y_err: None,
    };
    let mut flagged = Curve {
        label: "flagged".into(),
        x: Vec::new(),
        y: Vec::new(),
        y_err: None,
    };
    for (n, row) in points.axis_iter(Axis(0)).enumerate() {
        let bucket = if mask.get(n).copied().unwrap_or(true) {
            &mut kept
        } else {
            &mut flagged
        };
        bucket.x.push(row[0]);
        bucket.y.push(row[1]);
    }
    let total = points.nrows();
    let valid = kept.x.len();
    CurveBundle {
        title: format!("{valid} / {total}"),
        xlabel: "Int-t min".into(),
        ylabel: "Int-t max".into(),
        xscale: AxisScale::Linear,
        yscale: AxisScale::Linear,
        curves: vec![kept, flagged],
    }
}
