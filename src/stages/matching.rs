//! Edge matching: candidate pixels become per-edge group identities.
//!
//! Proceeds row by row in increasing spectral order. A candidate inherits
//! the group of the nearest same-side grouped pixel in the previous row
//! within a small column tolerance; otherwise it opens a fresh group.
//! Pixels that already carry a group are left untouched, so running the
//! stage again over a fully labeled map is a no-op.

use crate::edgemap::{EdgeLabel, EdgeMap, Side};
use crate::error::Error;
use crate::stats::median;
use log::debug;
use serde::Serialize;

/// Column tolerance for inheriting a group from the previous row.
const MATCH_TOL: usize = 2;

/// Distinct group counts per side after matching or finalization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MatchCounts {
    pub left: u32,
    pub right: u32,
}

impl MatchCounts {
    pub fn of(&self, side: Side) -> u32 {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

/// Group every candidate pixel, returning the distinct left/right counts.
///
/// Fails with [`Error::EdgeIdSpaceExhausted`] when either side needs more
/// ids than `id_limit` allows; that is a configuration error, not a data
/// error.
pub fn match_edges(edges: &mut EdgeMap, id_limit: u32) -> Result<MatchCounts, Error> {
    let mut next_id = [
        edges.max_group_id(Side::Left) + 1,
        edges.max_group_id(Side::Right) + 1,
    ];
    let mut prev: Vec<(usize, Side, u32)> = Vec::new();

    for y in 0..edges.h {
        let mut cur: Vec<(usize, Side, u32)> = Vec::new();
        let mut pending: Vec<(usize, Side)> = Vec::new();
        for (x, label) in edges.row(y).iter().enumerate() {
            match *label {
                EdgeLabel::Grouped(side, id) => cur.push((x, side, id)),
                EdgeLabel::Candidate(side) => pending.push((x, side)),
                _ => {}
            }
        }

        for (x, side) in pending {
            let inherited = prev
                .iter()
                .filter(|(px, ps, _)| *ps == side && px.abs_diff(x) <= MATCH_TOL)
                .min_by(|a, b| {
                    let da = a.0.abs_diff(x);
                    let db = b.0.abs_diff(x);
                    da.cmp(&db).then(a.2.cmp(&b.2))
                })
                .map(|(_, _, id)| *id);

            let id = match inherited {
                Some(id) => id,
                None => {
                    let slot = side as usize;
                    let id = next_id[slot];
                    if id >= id_limit {
                        return Err(Error::EdgeIdSpaceExhausted {
                            side,
                            count: id,
                            limit: id_limit,
                        });
                    }
                    next_id[slot] += 1;
                    id
                }
            };
            edges.set(x, y, EdgeLabel::Grouped(side, id));
            cur.push((x, side, id));
        }
        prev = cur;
    }

    let counts = MatchCounts {
        left: edges.distinct_groups(Side::Left) as u32,
        right: edges.distinct_groups(Side::Right) as u32,
    };
    for side in Side::BOTH {
        if counts.of(side) >= id_limit {
            return Err(Error::EdgeIdSpaceExhausted {
                side,
                count: counts.of(side),
                limit: id_limit,
            });
        }
    }
    debug!(
        "edge matching: {} left / {} right groups",
        counts.left, counts.right
    );
    Ok(counts)
}

/// Compact surviving groups into final per-side ordinals numbered
/// left-to-right by median column. Groups smaller than `min_pixels` are
/// noise and get erased; stray candidates are cleared as well.
pub fn finalize_left_right(edges: &mut EdgeMap, min_pixels: usize) -> MatchCounts {
    for y in 0..edges.h {
        for x in 0..edges.w {
            if matches!(edges.get(x, y), EdgeLabel::Candidate(_)) {
                edges.set(x, y, EdgeLabel::Unassigned);
            }
        }
    }

    for side in Side::BOTH {
        let groups = edges.groups(side);
        let mut ordered: Vec<(f64, u32, Vec<(usize, usize)>)> = Vec::new();
        for (id, pixels) in groups {
            if pixels.len() < min_pixels {
                debug!(
                    "dropping {} group {id}: only {} pixel(s)",
                    side,
                    pixels.len()
                );
                edges.clear_group(side, id);
                continue;
            }
            let cols: Vec<f64> = pixels.iter().map(|(x, _)| *x as f64).collect();
            ordered.push((median(&cols), id, pixels));
        }
        ordered.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        for (ord, (_, _, pixels)) in ordered.into_iter().enumerate() {
            for (x, y) in pixels {
                edges.set(x, y, EdgeLabel::Resolved(side, ord as u32 + 1));
            }
        }
    }

    MatchCounts {
        left: edges.resolved(Side::Left).len() as u32,
        right: edges.resolved(Side::Right).len() as u32,
    }
}
