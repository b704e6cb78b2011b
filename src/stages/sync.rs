//! Slit synchronization: pairing left and right edges into slits.
//!
//! Before fitting, [`sync_slits`] reconciles the crude-trace chains:
//! duplicated chains of one side are merged, left chains are paired with
//! the nearest right chain at larger column, and an edge whose partner was
//! never detected gets a synthetic partner offset by the median slit width
//! so both populations stay aligned. After fitting, [`synchronize_fits`]
//! evaluates every fit densely, pairs the k-th left with the k-th right
//! curve, and selects the well-measured pairs the extrapolation stage may
//! trust.

use nalgebra::DMatrix;

use crate::edgemap::{EdgeLabel, EdgeMap, Side};
use crate::fitting::EdgeFits;
use crate::stages::tcrude::{EdgeChain, EdgeChainMap};
use crate::stats::median;
use log::{debug, info, warn};

/// Merge duplicate chains and pair the survivors, synthesizing partners
/// for unpaired edges. `dup_tol` is the reference-column distance below
/// which two same-side chains are the same physical edge.
pub fn sync_slits(edges: &mut EdgeMap, chains: EdgeChainMap, dup_tol: f64) -> EdgeChainMap {
    let ref_row = chains.ref_row();
    let mut all = chains.into_vec();

    // Merge duplicates: keep the stronger chain, relabel the weaker group.
    for side in Side::BOTH {
        loop {
            let of_side: Vec<(usize, f64, f64, u32)> = all
                .iter()
                .enumerate()
                .filter(|(_, c)| c.side == side)
                .map(|(i, c)| (i, c.ref_col, c.strength, c.id))
                .collect();
            let mut merged = None;
            for w in of_side.windows(2) {
                let (ia, ca, sa, ida) = w[0];
                let (ib, cb, sb, idb) = w[1];
                if (cb - ca).abs() <= dup_tol {
                    // Stronger chain wins; ties keep the lower id.
                    let (keep, drop, drop_idx) = if sb > sa {
                        (idb, ida, ia)
                    } else {
                        (ida, idb, ib)
                    };
                    merged = Some((keep, drop, drop_idx));
                    break;
                }
            }
            match merged {
                Some((keep, drop, drop_idx)) => {
                    debug!("merging duplicate {} chain {drop} into {keep}", side);
                    edges.relabel_group(side, drop, keep);
                    all.remove(drop_idx);
                }
                None => break,
            }
        }
    }

    // Pair left chains with the nearest right chain at larger column.
    let lefts: Vec<usize> = indices_of(&all, Side::Left);
    let rights: Vec<usize> = indices_of(&all, Side::Right);
    let mut right_used = vec![false; all.len()];
    let mut widths = Vec::new();
    let mut unpaired_left = Vec::new();
    for &li in &lefts {
        let lcol = all[li].ref_col;
        let partner = rights
            .iter()
            .find(|&&ri| !right_used[ri] && all[ri].ref_col > lcol);
        match partner {
            Some(&ri) => {
                right_used[ri] = true;
                widths.push(all[ri].ref_col - lcol);
            }
            None => unpaired_left.push(li),
        }
    }
    let unpaired_right: Vec<usize> = rights
        .iter()
        .copied()
        .filter(|&ri| !right_used[ri])
        .collect();

    let median_width = if widths.is_empty() {
        (edges.w as f64 / 2.0).max(1.0)
    } else {
        median(&widths)
    };

    // Synthesize the missing partner of every unpaired edge.
    let mut synthesized = Vec::new();
    for &li in &unpaired_left {
        info!(
            "left edge at column {:.0} has no right partner; adding one at width {:.1}",
            all[li].ref_col, median_width
        );
        synthesized.push(offset_chain(edges, &all[li], median_width, Side::Right));
    }
    for &ri in &unpaired_right {
        info!(
            "right edge at column {:.0} has no left partner; adding one at width {:.1}",
            all[ri].ref_col, median_width
        );
        synthesized.push(offset_chain(edges, &all[ri], -median_width, Side::Left));
    }
    all.extend(synthesized);

    let mut out = EdgeChainMap::new(ref_row);
    for chain in all {
        out.insert(chain);
    }
    out
}

fn indices_of(all: &[EdgeChain], side: Side) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..all.len()).filter(|&i| all[i].side == side).collect();
    idx.sort_by(|&a, &b| {
        all[a]
            .ref_col
            .total_cmp(&all[b].ref_col)
            .then(all[a].id.cmp(&all[b].id))
    });
    idx
}

/// Build a partner chain shifted by `offset` columns and paint it into the
/// edge map where the detector allows and nothing else claims the pixel.
fn offset_chain(edges: &mut EdgeMap, source: &EdgeChain, offset: f64, side: Side) -> EdgeChain {
    let id = edges.max_group_id(side) + 1;
    let w = edges.w;
    let cols: Vec<f64> = source
        .cols
        .iter()
        .map(|c| (c + offset).clamp(0.0, (w - 1) as f64))
        .collect();
    for (y, col) in cols.iter().enumerate() {
        let x = col.round() as usize;
        if edges.get(x, y) == EdgeLabel::Unassigned {
            edges.set(x, y, EdgeLabel::Grouped(side, id));
        }
    }
    let ref_row = source.cols.len() / 2;
    EdgeChain {
        side,
        id,
        ref_col: cols[ref_row],
        cols,
        measured: vec![false; source.cols.len()],
        strength: 0.0,
    }
}

/// Densely evaluated left/right curves with the well-measured pair set.
#[derive(Clone, Debug)]
pub struct CurveSync {
    /// Left edge positions, rows × slits; NaN where unmeasured.
    pub lcent: DMatrix<f64>,
    /// Right edge positions, rows × slits.
    pub rcent: DMatrix<f64>,
    /// Midpoint of each pair.
    pub center: DMatrix<f64>,
    /// Pairs with both sides reliably measured.
    pub good: Vec<usize>,
    /// Per-pair measurement state (false = needs extrapolation or drop).
    pub measured: Vec<bool>,
}

impl CurveSync {
    pub fn nslits(&self) -> usize {
        self.lcent.ncols()
    }
}

/// Evaluate each fitted edge at every row and pair the k-th left with the
/// k-th right curve. A pair is good when both fits exist, each used at
/// least `min_frac` of the detector rows, and the implied width is
/// positive with a sane median.
pub fn synchronize_fits(
    lfits: &EdgeFits,
    rfits: &EdgeFits,
    xrow: &[f64],
    min_frac: f64,
) -> CurveSync {
    let rows = xrow.len();
    if lfits.n_edges() != rfits.n_edges() {
        warn!(
            "unbalanced edge populations: {} left vs {} right; pairing the overlap",
            lfits.n_edges(),
            rfits.n_edges()
        );
    }
    let n = lfits.n_edges().min(rfits.n_edges());

    let lcent = DMatrix::from_fn(rows, n, |y, k| lfits.evaluate(k, xrow[y]));
    let rcent = DMatrix::from_fn(rows, n, |y, k| rfits.evaluate(k, xrow[y]));
    let center = DMatrix::from_fn(rows, n, |y, k| 0.5 * (lcent[(y, k)] + rcent[(y, k)]));

    let floor = ((min_frac * rows as f64) as usize).max(2);
    let mut good = Vec::new();
    let mut measured = vec![false; n];
    for k in 0..n {
        if !lfits.measured[k] || !rfits.measured[k] {
            continue;
        }
        if lfits.counts[k] < floor || rfits.counts[k] < floor {
            continue;
        }
        let widths: Vec<f64> = (0..rows).map(|y| rcent[(y, k)] - lcent[(y, k)]).collect();
        if widths.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            continue;
        }
        if median(&widths) < 1.0 {
            continue;
        }
        measured[k] = true;
        good.push(k);
    }
    debug!("fit sync: {} of {n} slit pairs well measured", good.len());

    CurveSync {
        lcent,
        rcent,
        center,
        good,
        measured,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edgemap::EdgeMap;

    fn chain(side: Side, id: u32, col: f64, h: usize, strength: f64) -> EdgeChain {
        EdgeChain {
            side,
            id,
            ref_col: col,
            cols: vec![col; h],
            measured: vec![true; h],
            strength,
        }
    }

    #[test]
    fn duplicate_chains_merge_to_the_stronger() {
        let h = 10;
        let mut edges = EdgeMap::new(64, h);
        for y in 0..h {
            edges.set(10, y, EdgeLabel::Grouped(Side::Left, 1));
            edges.set(11, y, EdgeLabel::Grouped(Side::Left, 2));
            edges.set(30, y, EdgeLabel::Grouped(Side::Right, 1));
        }
        let mut chains = EdgeChainMap::new(h / 2);
        chains.insert(chain(Side::Left, 1, 10.0, h, 50.0));
        chains.insert(chain(Side::Left, 2, 11.0, h, 20.0));
        chains.insert(chain(Side::Right, 1, 30.0, h, 50.0));

        let out = sync_slits(&mut edges, chains, 2.0);
        assert_eq!(out.side(Side::Left).len(), 1);
        assert_eq!(out.side(Side::Left)[0].id, 1);
        assert_eq!(edges.distinct_groups(Side::Left), 1);
    }

    #[test]
    fn unpaired_left_gets_synthetic_right_partner() {
        let h = 10;
        let mut edges = EdgeMap::new(64, h);
        let mut chains = EdgeChainMap::new(h / 2);
        chains.insert(chain(Side::Left, 1, 10.0, h, 50.0));
        chains.insert(chain(Side::Right, 1, 22.0, h, 50.0));
        chains.insert(chain(Side::Left, 2, 40.0, h, 50.0));

        let out = sync_slits(&mut edges, chains, 2.0);
        let rights = out.side(Side::Right);
        assert_eq!(rights.len(), 2);
        // Synthetic partner sits one median width (12) right of column 40.
        assert!((rights[1].ref_col - 52.0).abs() < 1.0);
    }

    #[test]
    fn good_set_excludes_undermeasured_pairs() {
        use crate::fitting::BasisFamily;
        let rows = 20;
        let xrow: Vec<f64> = (0..rows).map(|y| y as f64).collect();
        let mk = |side, cols: &[f64], counts: &[usize]| EdgeFits {
            side,
            family: BasisFamily::Legendre,
            order: 0,
            coeffs: cols.iter().map(|c| vec![*c]).collect(),
            counts: counts.to_vec(),
            positions: cols.to_vec(),
            weights: vec![1.0; cols.len()],
            measured: vec![true; cols.len()],
            minv: 0.0,
            maxv: (rows - 1) as f64,
        };
        let lfits = mk(Side::Left, &[10.0, 40.0], &[20, 4]);
        let rfits = mk(Side::Right, &[20.0, 50.0], &[20, 20]);
        let sync = synchronize_fits(&lfits, &rfits, &xrow, 0.5);
        assert_eq!(sync.good, vec![0]);
        assert!(!sync.measured[1]);
        assert_eq!(sync.nslits(), 2);
        assert!((sync.center[(0, 0)] - 15.0).abs() < 1e-9);
    }
}
