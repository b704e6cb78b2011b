//! Legacy close-slits path, only active when `max_gap` is configured.
//!
//! Slits separated by less than the gap tolerance are joined by deleting
//! the right/left edge pair between them, comparing group positions by
//! magnitude irrespective of side. Kept for single/long-slit legacy data;
//! not recommended for multi-slit frames and off by default.

use crate::edgemap::{EdgeMap, Side};
use crate::stats::median;
use log::{debug, warn};

/// Join adjacent slits whose separation is below `max_gap` pixels.
/// Returns the number of removed edge pairs.
pub fn close_gaps(edges: &mut EdgeMap, max_gap: f64) -> usize {
    warn!("close_gaps (max_gap={max_gap}) is a legacy path; not recommended for multi-slit data");

    // Flatten both sides into one column-ordered sequence.
    let mut ordered: Vec<(f64, Side, u32)> = Vec::new();
    for side in Side::BOTH {
        for (id, pixels) in edges.groups(side) {
            let cols: Vec<f64> = pixels.iter().map(|(x, _)| *x as f64).collect();
            ordered.push((median(&cols), side, id));
        }
    }
    ordered.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.2.cmp(&b.2)));

    let mut removed = 0usize;
    let mut i = 0usize;
    while i + 1 < ordered.len() {
        let (col_a, side_a, id_a) = ordered[i];
        let (col_b, side_b, id_b) = ordered[i + 1];
        if side_a == Side::Right && side_b == Side::Left && col_b - col_a < max_gap {
            debug!("closing gap of {:.1} px between right {id_a} and left {id_b}", col_b - col_a);
            edges.clear_group(Side::Right, id_a);
            edges.clear_group(Side::Left, id_b);
            removed += 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    removed
}
