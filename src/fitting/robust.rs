//! Sigma-clipped least-squares fitting.

use nalgebra::{DMatrix, DVector};

use super::basis::{basis_values, normalize, BasisFamily};

/// A converged robust fit.
#[derive(Clone, Debug)]
pub struct RobustFit {
    pub coeffs: Vec<f64>,
    /// Points surviving the clipping iterations.
    pub n_used: usize,
    /// RMS residual of the surviving points.
    pub rms: f64,
}

/// Iteratively sigma-clipped polynomial fit of `y` against `x`.
///
/// Points whose residual exceeds `clip` times the RMS are dropped and the
/// fit re-run, until convergence or `max_iter` passes. Returns `None` when
/// fewer than `order + 2` points are available or the solve degenerates.
pub fn sigma_clip_fit(
    x: &[f64],
    y: &[f64],
    family: BasisFamily,
    order: usize,
    minv: f64,
    maxv: f64,
    clip: f64,
    max_iter: usize,
) -> Option<RobustFit> {
    debug_assert_eq!(x.len(), y.len());
    let min_points = order + 2;
    let mut active: Vec<usize> = (0..x.len()).collect();
    if active.len() < min_points {
        return None;
    }

    let mut result: Option<RobustFit> = None;
    for _ in 0..max_iter {
        let coeffs = solve(x, y, &active, family, order, minv, maxv)?;
        let residuals: Vec<f64> = active
            .iter()
            .map(|&i| {
                let t = normalize(x[i], minv, maxv);
                let model: f64 = basis_values(family, order, t)
                    .iter()
                    .zip(&coeffs)
                    .map(|(b, c)| b * c)
                    .sum();
                y[i] - model
            })
            .collect();
        let rms = (residuals.iter().map(|r| r * r).sum::<f64>() / active.len() as f64).sqrt();
        result = Some(RobustFit {
            coeffs,
            n_used: active.len(),
            rms,
        });

        let keep: Vec<usize> = active
            .iter()
            .zip(&residuals)
            .filter(|(_, r)| r.abs() <= clip * rms.max(1e-12))
            .map(|(&i, _)| i)
            .collect();
        if keep.len() == active.len() || keep.len() < min_points {
            break;
        }
        active = keep;
    }
    result
}

fn solve(
    x: &[f64],
    y: &[f64],
    active: &[usize],
    family: BasisFamily,
    order: usize,
    minv: f64,
    maxv: f64,
) -> Option<Vec<f64>> {
    let n = active.len();
    let m = order + 1;
    let design = DMatrix::from_fn(n, m, |r, c| {
        let t = normalize(x[active[r]], minv, maxv);
        basis_values(family, order, t)[c]
    });
    let rhs = DVector::from_fn(n, |r, _| y[active[r]]);
    let svd = design.svd(true, true);
    let sol = svd.solve(&rhs, 1e-12).ok()?;
    Some(sol.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_quadratic_is_recovered() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 + 0.5 * v - 0.01 * v * v).collect();
        let fit =
            sigma_clip_fit(&x, &y, BasisFamily::Legendre, 2, 0.0, 49.0, 3.0, 10).unwrap();
        assert_eq!(fit.n_used, 50);
        assert!(fit.rms < 1e-8);
        for &xv in &[0.0, 12.0, 30.0, 49.0] {
            let t = normalize(xv, 0.0, 49.0);
            let model: f64 = basis_values(BasisFamily::Legendre, 2, t)
                .iter()
                .zip(&fit.coeffs)
                .map(|(b, c)| b * c)
                .sum();
            assert!((model - (3.0 + 0.5 * xv - 0.01 * xv * xv)).abs() < 1e-6);
        }
    }

    #[test]
    fn outliers_are_clipped() {
        let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let mut y: Vec<f64> = x.iter().map(|v| 10.0 + 0.3 * v).collect();
        y[7] += 80.0;
        y[23] -= 120.0;
        let fit = sigma_clip_fit(&x, &y, BasisFamily::Legendre, 1, 0.0, 39.0, 3.0, 10).unwrap();
        assert_eq!(fit.n_used, 38);
        assert!(fit.rms < 1e-6);
    }

    #[test]
    fn too_few_points_refuses_to_fit() {
        let x = [1.0, 2.0, 3.0];
        let y = [1.0, 2.0, 3.0];
        assert!(sigma_clip_fit(&x, &y, BasisFamily::Legendre, 3, 0.0, 3.0, 3.0, 10).is_none());
    }
}
