//! Extrapolation of unreliable slit edges from the well-measured population.
//!
//! The well-measured slits form a low-dimensional family: their center
//! curves vary smoothly across the detector. This module decomposes that
//! family into principal components and fits each component amplitude with
//! a low-order polynomial trend, either across slit index (order-domain
//! mode) or against median spatial position using the dense per-row curves
//! (pixel-domain mode). Unreliable or missing slits are reconstructed from
//! the trend and flagged as extrapolated; with the stage disabled they are
//! dropped instead. Slit width is carried separately by its own polynomial
//! trend.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::fitting::{eval_basis_fit, sigma_clip_fit, BasisFamily, EdgeFits};
use crate::stages::sync::CurveSync;
use crate::stats::median;
use log::{debug, warn};

/// Extrapolation mode selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcaMode {
    /// Drop slits lacking complete left+right measurements.
    Off,
    /// Decompose fit coefficients across slit index.
    Order,
    /// Decompose dense per-row centers against spatial position.
    #[default]
    Pixel,
}

/// Knobs for the extrapolation stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaParams {
    pub mode: PcaMode,
    /// Polynomial trend order per principal component, strongest first.
    pub component_orders: Vec<usize>,
    /// Synthetic slit slots appended past the last measured slit.
    pub extrapolate_pos: usize,
    /// Synthetic slit slots prepended before the first measured slit.
    pub extrapolate_neg: usize,
}

impl Default for PcaParams {
    fn default() -> Self {
        Self {
            mode: PcaMode::Pixel,
            component_orders: vec![3, 2, 1, 0, 0, 0],
            extrapolate_pos: 0,
            extrapolate_neg: 0,
        }
    }
}

/// Final per-row edge curves for every surviving slit.
#[derive(Clone, Debug)]
pub struct Extrapolation {
    /// Left edge positions, rows × slits.
    pub left: DMatrix<f64>,
    /// Right edge positions, rows × slits.
    pub right: DMatrix<f64>,
    /// True for slits recovered by extrapolation rather than measured.
    pub extrapolated: Vec<bool>,
}

/// Run the configured extrapolation over the synchronized curves.
pub fn extrapolate(
    sync: &CurveSync,
    lfits: &EdgeFits,
    rfits: &EdgeFits,
    xrow: &[f64],
    params: &PcaParams,
    diff_order: usize,
) -> Extrapolation {
    match params.mode {
        PcaMode::Off => drop_unmeasured(sync),
        _ if sync.good.len() < 2 => {
            warn!(
                "only {} well-measured slit(s); extrapolation needs at least 2, dropping the rest",
                sync.good.len()
            );
            drop_unmeasured(sync)
        }
        PcaMode::Order => trend_reconstruct(sync, lfits, rfits, xrow, params, diff_order, true),
        PcaMode::Pixel => trend_reconstruct(sync, lfits, rfits, xrow, params, diff_order, false),
    }
}

/// No-PCA path: keep only the well-measured pairs.
fn drop_unmeasured(sync: &CurveSync) -> Extrapolation {
    let rows = sync.lcent.nrows();
    let kept: Vec<usize> = (0..sync.nslits()).filter(|&k| sync.measured[k]).collect();
    let pick = |src: &DMatrix<f64>| DMatrix::from_fn(rows, kept.len(), |y, j| src[(y, kept[j])]);
    Extrapolation {
        left: pick(&sync.lcent),
        right: pick(&sync.rcent),
        extrapolated: vec![false; kept.len()],
    }
}

fn trend_reconstruct(
    sync: &CurveSync,
    lfits: &EdgeFits,
    rfits: &EdgeFits,
    xrow: &[f64],
    params: &PcaParams,
    diff_order: usize,
    order_domain: bool,
) -> Extrapolation {
    let rows = xrow.len();
    let n = sync.nslits();
    let good = &sync.good;
    let ngood = good.len();

    // Trend abscissa: slit index in order-domain mode, median spatial
    // position in pixel-domain mode. Extrapolation slots extend it by the
    // median inter-slit step.
    let measured_pos: Vec<f64> = if order_domain {
        (0..n).map(|k| k as f64).collect()
    } else {
        (0..n)
            .map(|k| slit_position(sync, lfits, rfits, k))
            .collect()
    };
    let steps: Vec<f64> = measured_pos.windows(2).map(|w| w[1] - w[0]).collect();
    let step = if steps.is_empty() { 1.0 } else { median(&steps).max(1e-6) };

    let neg = params.extrapolate_neg;
    let pos = params.extrapolate_pos;
    let mut all_pos = Vec::with_capacity(neg + n + pos);
    for i in (1..=neg).rev() {
        all_pos.push(measured_pos[0] - step * i as f64);
    }
    all_pos.extend_from_slice(&measured_pos);
    for i in 1..=pos {
        all_pos.push(measured_pos[n - 1] + step * i as f64);
    }
    let good_pos: Vec<f64> = good.iter().map(|&k| measured_pos[k]).collect();

    // Population matrix over the good slits: coefficient vectors of the
    // center curve in order-domain mode, dense per-row centers otherwise.
    let data = if order_domain {
        let m = lfits.order + 1;
        DMatrix::from_fn(ngood, m, |g, c| {
            let k = good[g];
            0.5 * (lfits.coeffs[k][c] + rfits.coeffs[k][c])
        })
    } else {
        DMatrix::from_fn(ngood, rows, |g, y| sync.center[(y, good[g])])
    };

    let reconstructed = pca_trend(&data, &good_pos, &all_pos, &params.component_orders);

    // Width rides its own low-order trend across the population.
    let good_widths: Vec<f64> = good
        .iter()
        .map(|&k| {
            let w: Vec<f64> = (0..rows)
                .map(|y| sync.rcent[(y, k)] - sync.lcent[(y, k)])
                .collect();
            median(&w)
        })
        .collect();
    let width_at = fit_trend(&good_pos, &good_widths, diff_order, &all_pos);

    let nall = all_pos.len();
    let mut left = DMatrix::zeros(rows, nall);
    let mut right = DMatrix::zeros(rows, nall);
    let mut extrapolated = vec![true; nall];
    for i in 0..nall {
        let measured_idx = if i >= neg && i < neg + n { Some(i - neg) } else { None };
        if let Some(k) = measured_idx {
            if sync.measured[k] {
                for y in 0..rows {
                    left[(y, i)] = sync.lcent[(y, k)];
                    right[(y, i)] = sync.rcent[(y, k)];
                }
                extrapolated[i] = false;
                continue;
            }
        }
        let half_width = 0.5 * width_at[i].max(1.0);
        let coeffs: Vec<f64> = reconstructed.row(i).iter().copied().collect();
        for y in 0..rows {
            let center = if order_domain {
                eval_basis_fit(lfits.family, &coeffs, xrow[y], lfits.minv, lfits.maxv)
            } else {
                reconstructed[(i, y)]
            };
            left[(y, i)] = center - half_width;
            right[(y, i)] = center + half_width;
        }
    }
    debug!(
        "extrapolation: {} slit(s) reconstructed out of {nall}",
        extrapolated.iter().filter(|f| **f).count()
    );

    Extrapolation {
        left,
        right,
        extrapolated,
    }
}

/// Median spatial position of a slit, preferring the fitted populations.
fn slit_position(sync: &CurveSync, lfits: &EdgeFits, rfits: &EdgeFits, k: usize) -> f64 {
    let lp = lfits.positions.get(k).copied().unwrap_or(f64::NAN);
    let rp = rfits.positions.get(k).copied().unwrap_or(f64::NAN);
    if lp.is_finite() && rp.is_finite() {
        0.5 * (lp + rp)
    } else if lp.is_finite() {
        lp
    } else if rp.is_finite() {
        rp
    } else {
        let rows = sync.center.nrows();
        let vals: Vec<f64> = (0..rows)
            .map(|y| sync.center[(y, k)])
            .filter(|v| v.is_finite())
            .collect();
        median(&vals)
    }
}

/// Principal-component trend reconstruction.
///
/// Decomposes the centered population matrix by SVD, fits each component
/// amplitude against the population abscissa, and rebuilds a row for every
/// requested position.
fn pca_trend(
    data: &DMatrix<f64>,
    good_pos: &[f64],
    all_pos: &[f64],
    component_orders: &[usize],
) -> DMatrix<f64> {
    let ngood = data.nrows();
    let m = data.ncols();
    let mean: Vec<f64> = (0..m)
        .map(|c| (0..ngood).map(|g| data[(g, c)]).sum::<f64>() / ngood as f64)
        .collect();
    let centered = DMatrix::from_fn(ngood, m, |g, c| data[(g, c)] - mean[c]);

    let svd = centered.svd(true, true);
    let mut out = DMatrix::from_fn(all_pos.len(), m, |_, c| mean[c]);
    let (Some(u), Some(v_t)) = (svd.u.as_ref(), svd.v_t.as_ref()) else {
        return out;
    };
    let rank = svd.singular_values.len();
    let npc = component_orders.len().min(rank);
    for j in 0..npc {
        if svd.singular_values[j] < 1e-10 {
            break;
        }
        let scores: Vec<f64> = (0..ngood)
            .map(|g| u[(g, j)] * svd.singular_values[j])
            .collect();
        let amp_at = fit_trend(good_pos, &scores, component_orders[j], all_pos);
        for (i, amp) in amp_at.iter().enumerate() {
            for c in 0..m {
                out[(i, c)] += amp * v_t[(j, c)];
            }
        }
    }
    out
}

/// Fit `values` against `pos` with a Legendre polynomial (order clamped to
/// the sample count) and evaluate at `at`. Falls back to the mean when the
/// solve degenerates.
fn fit_trend(pos: &[f64], values: &[f64], order: usize, at: &[f64]) -> Vec<f64> {
    let minv = at.iter().copied().fold(f64::INFINITY, f64::min);
    let maxv = at.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let eff_order = order.min(pos.len().saturating_sub(2));
    let fit = sigma_clip_fit(pos, values, BasisFamily::Legendre, eff_order, minv, maxv, 3.0, 5);
    match fit {
        Some(f) => at
            .iter()
            .map(|&p| eval_basis_fit(BasisFamily::Legendre, &f.coeffs, p, minv, maxv))
            .collect(),
        None => {
            let mean = if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            };
            vec![mean; at.len()]
        }
    }
}
