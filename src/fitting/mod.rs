//! Robust polynomial fitting of edge positions.
//!
//! Each finalized edge is fit independently: pixel column against the
//! per-row spectral coordinate, in a configurable basis, with iterative
//! sigma-clipped rejection of outlier pixels. The per-edge sample counts
//! and weights produced here feed the extrapolation stage.

mod basis;
mod robust;

pub use basis::{basis_values, eval_basis_fit, normalize, BasisFamily};
pub use robust::{sigma_clip_fit, RobustFit};

use crate::edgemap::{EdgeMap, Side};
use crate::stats::median;
use log::debug;

/// Sigma-clipping threshold for edge fits.
const CLIP_SIGMA: f64 = 3.0;
/// Iteration cap for the clip/refit loop.
const CLIP_MAX_ITER: usize = 10;

/// Fit results for the full left or right edge population.
#[derive(Clone, Debug)]
pub struct EdgeFits {
    pub side: Side,
    pub family: BasisFamily,
    pub order: usize,
    /// Per-edge coefficients; empty for edges the fit could not measure.
    pub coeffs: Vec<Vec<f64>>,
    /// Pixels contributing to each fit after clipping.
    pub counts: Vec<usize>,
    /// Median spatial position of each edge's pixels.
    pub positions: Vec<f64>,
    /// Inverse-RMS weight of each fit.
    pub weights: Vec<f64>,
    /// Whether each edge has a usable fit.
    pub measured: Vec<bool>,
    /// Abscissa domain for basis normalization.
    pub minv: f64,
    pub maxv: f64,
}

impl EdgeFits {
    pub fn n_edges(&self) -> usize {
        self.coeffs.len()
    }

    /// Evaluate edge `k` at spectral coordinate `x`; NaN when unmeasured.
    pub fn evaluate(&self, k: usize, x: f64) -> f64 {
        if !self.measured[k] {
            return f64::NAN;
        }
        eval_basis_fit(self.family, &self.coeffs[k], x, self.minv, self.maxv)
    }
}

/// Fit every resolved edge of one side. `xrow` supplies the per-row
/// spectral coordinate (one value per detector row).
pub fn fit_edges(
    edges: &EdgeMap,
    side: Side,
    xrow: &[f64],
    family: BasisFamily,
    order: usize,
) -> EdgeFits {
    let minv = xrow.first().copied().unwrap_or(0.0);
    let maxv = xrow.last().copied().unwrap_or(1.0);
    let resolved = edges.resolved(side);
    let n = resolved.keys().next_back().map(|k| *k as usize).unwrap_or(0);

    let mut fits = EdgeFits {
        side,
        family,
        order,
        coeffs: vec![Vec::new(); n],
        counts: vec![0; n],
        positions: vec![f64::NAN; n],
        weights: vec![0.0; n],
        measured: vec![false; n],
        minv,
        maxv,
    };

    for (ord, pixels) in resolved {
        let k = ord as usize - 1;
        let xs: Vec<f64> = pixels.iter().map(|(_, y)| xrow[*y]).collect();
        let ys: Vec<f64> = pixels.iter().map(|(x, _)| *x as f64).collect();
        fits.positions[k] = median(&ys);
        match sigma_clip_fit(&xs, &ys, family, order, minv, maxv, CLIP_SIGMA, CLIP_MAX_ITER) {
            Some(fit) => {
                fits.counts[k] = fit.n_used;
                fits.weights[k] = 1.0 / fit.rms.max(1e-6);
                fits.measured[k] = true;
                fits.coeffs[k] = fit.coeffs;
            }
            None => {
                debug!("{} edge {ord}: too few pixels to fit ({})", side, xs.len());
                fits.counts[k] = xs.len();
            }
        }
    }
    fits
}
