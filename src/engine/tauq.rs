use log::debug;

use crate::error::{Result, ViewerError};

// ---------------------------------------------------------------------------
// tau-q view: relaxation time vs scattering vector
// ---------------------------------------------------------------------------

/// Stride layout of the stored per-q-bin fit vectors (see
/// [`crate::engine::g2::QBinFit::params`]).
const PARAM_STRIDE: usize = 7;
const IDX_Q: usize = 0;
const IDX_TAU: usize = 1;
const IDX_TAU_ERR: usize = 4;

/// External collaborator fitting `log(tau)` vs `log(q)`: returns the power
/// law `(slope, intercept)` and a synthetic smooth curve for overlay.
pub trait RelaxationFit {
    fn fit_relaxation(
        &self,
        q: &[f64],
        tau: &[f64],
        tau_err: &[f64],
    ) -> (f64, f64, Vec<f64>, Vec<f64>);
}

/// One file's relaxation curve plus its power-law fit.
#[derive(Debug, Clone)]
pub struct TauQCurve {
    pub file: String,
    pub q: Vec<f64>,
    pub tau: Vec<f64>,
    pub tau_err: Vec<f64>,
    pub slope: f64,
    pub intercept: f64,
    pub fit_x: Vec<f64>,
    pub fit_y: Vec<f64>,
}

/// Build per-file tau-q curves from the stored g2 fit vectors, restricted to
/// `q <= max_q`. Fails with [`ViewerError::FitNotReady`] when g2 fitting has
/// not run yet; tau-q is an ordered dependency, not a standalone view.
pub fn tau_q(
    fit_results: &[(String, Vec<f64>)],
    max_q: f64,
    fitter: &dyn RelaxationFit,
) -> Result<Vec<TauQCurve>> {
    if fit_results.is_empty() {
        return Err(ViewerError::FitNotReady);
    }

    let mut curves = Vec::with_capacity(fit_results.len());
    for (file, params) in fit_results {
        let bins = params.len() / PARAM_STRIDE;
        let mut q = Vec::with_capacity(bins);
        let mut tau = Vec::with_capacity(bins);
        let mut tau_err = Vec::with_capacity(bins);
        for i in 0..bins {
            let p = &params[i * PARAM_STRIDE..(i + 1) * PARAM_STRIDE];
            if p[IDX_Q] <= max_q {
                q.push(p[IDX_Q]);
                tau.push(p[IDX_TAU]);
                tau_err.push(p[IDX_TAU_ERR]);
            }
        }
        debug!("tau-q: '{file}' keeps {}/{bins} bins below q = {max_q}", q.len());

        let (slope, intercept, fit_x, fit_y) = fitter.fit_relaxation(&q, &tau, &tau_err);
        curves.push(TauQCurve {
            file: file.clone(),
            q,
            tau,
            tau_err,
            slope,
            intercept,
            fit_x,
            fit_y,
        });
    }
    Ok(curves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct StubFit;

    impl RelaxationFit for StubFit {
        fn fit_relaxation(
            &self,
            q: &[f64],
            tau: &[f64],
            _tau_err: &[f64],
        ) -> (f64, f64, Vec<f64>, Vec<f64>) {
            (-2.0, 0.5, q.to_vec(), tau.to_vec())
        }
    }

    fn params_for(bins: &[(f64, f64)]) -> Vec<f64> {
        // (q, tau) pairs expanded to the 7-wide stride
        let mut v = Vec::new();
        for &(q, tau) in bins {
            v.extend_from_slice(&[q, tau, 1.0, 0.25, tau / 10.0, 0.0, 0.0]);
        }
        v
    }

    #[test]
    fn empty_store_is_not_ready() {
        let err = tau_q(&[], 0.016, &StubFit).unwrap_err();
        assert!(matches!(err, ViewerError::FitNotReady));
    }

    #[test]
    fn restricts_to_max_q() {
        let store = vec![(
            "a".to_string(),
            params_for(&[(0.004, 1.0), (0.008, 2.0), (0.032, 3.0)]),
        )];
        let curves = tau_q(&store, 0.016, &StubFit).unwrap();
        assert_eq!(curves.len(), 1);
        assert_eq!(curves[0].q, vec![0.004, 0.008]);
        assert_eq!(curves[0].tau, vec![1.0, 2.0]);
        assert_eq!(curves[0].tau_err, vec![0.1, 0.2]);
        assert_eq!(curves[0].slope, -2.0);
    }

    #[test]
    fn one_curve_per_file() {
        let store = vec![
            ("a".to_string(), params_for(&[(0.004, 1.0)])),
            ("b".to_string(), params_for(&[(0.004, 2.0)])),
        ];
        let curves = tau_q(&store, 0.016, &StubFit).unwrap();
        let names: Vec<&str> = curves.iter().map(|c| c.file.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
