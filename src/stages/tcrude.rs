//! Crude tracing: greedy row-to-row re-centering of each edge group.
//!
//! Starting from its highest-confidence row, every group is walked up and
//! down the detector following the local maximum of the signal map inside a
//! bounded search window. Pixels the detection missed are relabeled to
//! extend the group through noise, partial occlusion, or weak signal; rows
//! with no acceptable signal carry the previous column through the gap.
//! The result is a chain per group, keyed by its approximate column at the
//! reference row, which later reconciliation of split or duplicated traces
//! relies on.

use std::collections::BTreeMap;

use crate::edgemap::{EdgeLabel, EdgeMap, Side};
use crate::image::ImageF32;
use log::debug;

/// Half-width of the per-row search window in columns.
const SEARCH_WINDOW: isize = 3;

/// One traced edge: per-row columns spanning the full detector height.
#[derive(Clone, Debug)]
pub struct EdgeChain {
    pub side: Side,
    pub id: u32,
    /// Column at the reference row.
    pub ref_col: f64,
    /// One column per row; gap rows carry the neighboring value.
    pub cols: Vec<f64>,
    /// Whether the signal map supported the column at each row.
    pub measured: Vec<bool>,
    /// Peak polarity-aligned signal along the chain.
    pub strength: f64,
}

/// Chains keyed by (side, rounded reference column, group id); the key
/// order makes iteration deterministic and column-sorted per side.
#[derive(Clone, Debug, Default)]
pub struct EdgeChainMap {
    ref_row: usize,
    chains: BTreeMap<(Side, i64, u32), EdgeChain>,
}

impl EdgeChainMap {
    pub fn new(ref_row: usize) -> Self {
        Self {
            ref_row,
            chains: BTreeMap::new(),
        }
    }

    pub fn ref_row(&self) -> usize {
        self.ref_row
    }

    pub fn insert(&mut self, chain: EdgeChain) {
        self.chains
            .insert((chain.side, chain.ref_col.round() as i64, chain.id), chain);
    }

    pub fn remove(&mut self, side: Side, ref_col: f64, id: u32) -> Option<EdgeChain> {
        self.chains.remove(&(side, ref_col.round() as i64, id))
    }

    /// Chains of one side in increasing reference-column order.
    pub fn side(&self, side: Side) -> Vec<&EdgeChain> {
        self.chains
            .iter()
            .filter(|((s, _, _), _)| *s == side)
            .map(|(_, c)| c)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Consume the map in key order.
    pub fn into_vec(self) -> Vec<EdgeChain> {
        self.chains.into_values().collect()
    }
}

/// Trace every group through the signal map, relabeling recovered pixels
/// in place. `floor` is the minimum polarity-aligned signal to accept a
/// re-centered column.
pub fn trace_crude(edges: &mut EdgeMap, signal: &ImageF32, floor: f64) -> EdgeChainMap {
    let h = edges.h;
    let ref_row = h / 2;
    let mut out = EdgeChainMap::new(ref_row);

    for side in Side::BOTH {
        for (id, pixels) in edges.groups(side) {
            let chain = trace_group(edges, signal, side, id, &pixels, floor);
            debug!(
                "crude trace {} {id}: ref_col={:.1} strength={:.1}",
                side, chain.ref_col, chain.strength
            );
            out.insert(chain);
        }
    }
    out
}

fn polarity(signal: &ImageF32, side: Side, x: usize, y: usize) -> f64 {
    let v = signal.get(x, y) as f64;
    match side {
        Side::Left => v,
        Side::Right => -v,
    }
}

fn trace_group(
    edges: &mut EdgeMap,
    signal: &ImageF32,
    side: Side,
    id: u32,
    pixels: &[(usize, usize)],
    floor: f64,
) -> EdgeChain {
    let h = edges.h;
    // Seed at the strongest polarity-aligned pixel; row-major scan keeps
    // ties at the lowest row, then the lowest column.
    let mut seed = pixels[0];
    let mut best = f64::NEG_INFINITY;
    for &(x, y) in pixels {
        let v = polarity(signal, side, x, y);
        if v > best {
            best = v;
            seed = (x, y);
        }
    }

    let mut cols = vec![f64::NAN; h];
    let mut measured = vec![false; h];
    cols[seed.1] = seed.0 as f64;
    measured[seed.1] = true;

    for (range, _upward) in [(seed.1 + 1..h, false), (0..seed.1, true)] {
        let rows: Vec<usize> = if _upward {
            range.rev().collect()
        } else {
            range.collect()
        };
        let mut pred = seed.0 as f64;
        for y in rows {
            match recenter(signal, side, pred, y, floor) {
                Some(x) => {
                    cols[y] = x as f64;
                    measured[y] = true;
                    pred = x as f64;
                    match edges.get(x, y) {
                        EdgeLabel::Unassigned => edges.set(x, y, EdgeLabel::Grouped(side, id)),
                        EdgeLabel::Candidate(s) if s == side => {
                            edges.set(x, y, EdgeLabel::Grouped(side, id))
                        }
                        _ => {}
                    }
                }
                None => {
                    cols[y] = pred;
                }
            }
        }
    }

    let ref_row = h / 2;
    EdgeChain {
        side,
        id,
        ref_col: cols[ref_row],
        cols,
        measured,
        strength: best,
    }
}

/// Strongest polarity-aligned column within the search window around the
/// predicted position; ties go to the column nearest the prediction, then
/// the lower column.
fn recenter(signal: &ImageF32, side: Side, pred: f64, y: usize, floor: f64) -> Option<usize> {
    let center = pred.round() as isize;
    let mut best: Option<(usize, f64)> = None;
    for dx in -SEARCH_WINDOW..=SEARCH_WINDOW {
        let xi = center + dx;
        if xi < 0 || xi >= signal.w as isize {
            continue;
        }
        let x = xi as usize;
        let v = polarity(signal, side, x, y);
        if v < floor {
            continue;
        }
        let better = match best {
            None => true,
            Some((bx, bv)) => {
                v > bv
                    || (v == bv
                        && ((x as f64 - pred).abs() < (bx as f64 - pred).abs()
                            || ((x as f64 - pred).abs() == (bx as f64 - pred).abs() && x < bx)))
            }
        };
        if better {
            best = Some((x, v));
        }
    }
    best.map(|(x, _)| x)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Signal map with one tilted left edge, blanked over `blank` rows.
    fn tilted_signal(w: usize, h: usize, blank: std::ops::Range<usize>) -> (ImageF32, EdgeMap) {
        let mut signal = ImageF32::new(w, h);
        let mut edges = EdgeMap::new(w, h);
        for y in 0..h {
            let x = (8.0 + 0.3 * y as f64).round() as usize;
            if blank.contains(&y) {
                continue;
            }
            signal.set(x, y, 40.0);
            edges.set(x, y, EdgeLabel::Grouped(Side::Left, 1));
        }
        (signal, edges)
    }

    #[test]
    fn chain_spans_full_height_through_blank_rows() {
        let (signal, mut edges) = tilted_signal(48, 30, 12..18);
        let chains = trace_crude(&mut edges, &signal, 5.0);
        assert_eq!(chains.len(), 1);
        let chain = chains.side(Side::Left)[0];
        assert_eq!(chain.cols.len(), 30);
        assert!(chain.cols.iter().all(|c| c.is_finite()));
        // Blank rows carry the prediction instead of being measured.
        assert!(!chain.measured[14]);
        assert!(chain.measured[5]);
    }

    #[test]
    fn recovered_pixels_are_relabeled() {
        let w = 48;
        let h = 20;
        let mut signal = ImageF32::new(w, h);
        let mut edges = EdgeMap::new(w, h);
        for y in 0..h {
            signal.set(10, y, 40.0);
            // Detection only caught the lower half.
            if y < 10 {
                edges.set(10, y, EdgeLabel::Grouped(Side::Left, 1));
            }
        }
        let _ = trace_crude(&mut edges, &signal, 5.0);
        for y in 10..h {
            assert_eq!(edges.get(10, y), EdgeLabel::Grouped(Side::Left, 1));
        }
    }

    #[test]
    fn reference_key_orders_chains_left_to_right() {
        let w = 64;
        let h = 10;
        let mut signal = ImageF32::new(w, h);
        let mut edges = EdgeMap::new(w, h);
        for (id, x) in [(7u32, 40usize), (9, 12)] {
            for y in 0..h {
                signal.set(x, y, 30.0);
                edges.set(x, y, EdgeLabel::Grouped(Side::Left, id));
            }
        }
        let chains = trace_crude(&mut edges, &signal, 5.0);
        let ordered: Vec<f64> = chains.side(Side::Left).iter().map(|c| c.ref_col).collect();
        assert_eq!(ordered, vec![12.0, 40.0]);
    }
}
