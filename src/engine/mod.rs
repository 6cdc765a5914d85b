//! On-demand aggregation over the record cache.
//!
//! Each view pulls stacked fields out of [`crate::cache::RecordCache`],
//! derives what the display needs, and memoizes the result so a redraw with
//! unchanged inputs costs a key comparison. The views never talk to disk.

pub mod average;
pub mod g2;
pub mod memo;
pub mod outlier;
pub mod tauq;
pub mod twotime;

use crate::error::Result;

/// Bundle of the stateful views. The stateless transforms (averaging,
/// tau-q, two-time) live as free functions in their modules.
#[derive(Debug, Default)]
pub struct AggregationEngine {
    pub g2: g2::G2View,
    pub stability: outlier::StabilityView,
}

impl AggregationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every memoized result; called when the working set changes out
    /// from under the views (directory switch, target edits).
    pub fn invalidate(&mut self) {
        self.g2.invalidate();
        self.stability.invalidate();
    }

    /// Tau-q view over whatever g2 fits have been stored so far.
    pub fn tau_q(
        &self,
        max_q: f64,
        fitter: &dyn tauq::RelaxationFit,
    ) -> Result<Vec<tauq::TauQCurve>> {
        tauq::tau_q(self.g2.fit_results(), max_q, fitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ViewerError;

    #[test]
    fn fresh_engine_has_no_fit_results() {
        let engine = AggregationEngine::new();
        struct Never;
        impl tauq::RelaxationFit for Never {
            fn fit_relaxation(
                &self,
                _q: &[f64],
                _tau: &[f64],
                _tau_err: &[f64],
            ) -> (f64, f64, Vec<f64>, Vec<f64>) {
                unreachable!("no fits stored")
            }
        }
        assert!(matches!(
            engine.tau_q(0.016, &Never).unwrap_err(),
            ViewerError::FitNotReady
        ));
    }
}
