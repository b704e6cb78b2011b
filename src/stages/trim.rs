//! Trimming: dropping orders and slits that cannot be used downstream.
//!
//! Two flavors. Before fitting, echelle reductions drop edge groups hugging
//! the detector boundary (orders running off the detector). After the final
//! curves exist, slits entirely off the detector are always removed, and
//! slits narrower than a configured fraction of the detector width are
//! removed when the width test is enabled. Retained slits keep their
//! left-to-right ordering.

use nalgebra::DMatrix;

use crate::edgemap::{EdgeMap, Side};
use crate::stats::median;
use log::info;

/// Drop edge groups whose median column lies within `frac_ignore` of the
/// detector width from either spatial boundary. Returns the drop count.
pub fn ignore_off_detector_orders(edges: &mut EdgeMap, frac_ignore: f64) -> usize {
    let margin = frac_ignore * edges.w as f64;
    let mut dropped = 0usize;
    for side in Side::BOTH {
        for (id, pixels) in edges.groups(side) {
            let cols: Vec<f64> = pixels.iter().map(|(x, _)| *x as f64).collect();
            let med = median(&cols);
            if med < margin || med > edges.w as f64 - 1.0 - margin {
                info!("{} edge {id} at column {med:.0} runs off the detector; ignoring", side);
                edges.clear_group(side, id);
                dropped += 1;
            }
        }
    }
    dropped
}

/// Final slit trimming over the dense left/right curves.
///
/// A slit goes when its left edge never enters the detector, its right
/// edge never reaches positive columns, or its median width is below
/// `frac_ignore` of the detector width. Slits marked in `width_exempt`
/// (explicitly configured geometry) skip the width test.
pub fn trim_slits(
    left: &DMatrix<f64>,
    right: &DMatrix<f64>,
    flags: &[bool],
    det_width: usize,
    frac_ignore: f64,
    width_exempt: &[bool],
) -> (DMatrix<f64>, DMatrix<f64>, Vec<bool>) {
    let rows = left.nrows();
    let nslit = left.ncols();
    let min_width = (frac_ignore * det_width as f64).floor();

    let mut kept = Vec::new();
    for k in 0..nslit {
        let lmin = (0..rows).map(|y| left[(y, k)]).fold(f64::INFINITY, f64::min);
        let rmax = (0..rows)
            .map(|y| right[(y, k)])
            .fold(f64::NEG_INFINITY, f64::max);
        if lmin > det_width as f64 {
            info!("slit {} is off the detector; ignoring this slit", k + 1);
            continue;
        }
        if rmax < 0.0 {
            info!("slit {} is off the detector; ignoring this slit", k + 1);
            continue;
        }
        if !width_exempt.get(k).copied().unwrap_or(false) {
            let widths: Vec<f64> = (0..rows).map(|y| right[(y, k)] - left[(y, k)]).collect();
            if median(&widths) < min_width {
                info!(
                    "slit {} is narrower than the width threshold; ignoring this slit",
                    k + 1
                );
                continue;
            }
        }
        kept.push(k);
    }

    let pick = |src: &DMatrix<f64>| {
        DMatrix::from_fn(rows, kept.len(), |y, j| src[(y, kept[j])])
    };
    let flags_out = kept.iter().map(|&k| flags[k]).collect();
    (pick(left), pick(right), flags_out)
}
