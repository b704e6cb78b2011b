//! The working edge-label array tracking candidate and resolved edge
//! identities.
//!
//! Every pixel carries an explicit [`EdgeLabel`] instead of the classic
//! signed-integer sentinel encoding: detection marks [`EdgeLabel::Candidate`]
//! pixels, matching promotes them to [`EdgeLabel::Grouped`] with a per-side
//! group id, and the finalization pass compacts surviving groups into
//! [`EdgeLabel::Resolved`] ordinals numbered left-to-right. Later stages
//! mutate the map in place; one pipeline run owns it exclusively.

use std::collections::BTreeMap;

use serde::Serialize;

/// Which side of a slit an edge bounds. Left edges are rising flux along the
/// spatial axis, right edges falling flux.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn name(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-pixel label state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EdgeLabel {
    /// No edge at this pixel.
    #[default]
    Unassigned,
    /// Thresholded detection not yet grouped.
    Candidate(Side),
    /// Member of a provisional edge group.
    Grouped(Side, u32),
    /// Member of a finalized edge, ordinal numbered left-to-right per side.
    Resolved(Side, u32),
}

impl EdgeLabel {
    pub fn side(self) -> Option<Side> {
        match self {
            EdgeLabel::Unassigned => None,
            EdgeLabel::Candidate(s) | EdgeLabel::Grouped(s, _) | EdgeLabel::Resolved(s, _) => {
                Some(s)
            }
        }
    }

    /// Group id for grouped pixels, resolved ordinal for resolved ones.
    pub fn group(self) -> Option<(Side, u32)> {
        match self {
            EdgeLabel::Grouped(s, id) | EdgeLabel::Resolved(s, id) => Some((s, id)),
            _ => None,
        }
    }
}

/// Mutable 2D label array, same shape as the trace image.
#[derive(Clone, Debug)]
pub struct EdgeMap {
    pub w: usize,
    pub h: usize,
    labels: Vec<EdgeLabel>,
}

impl EdgeMap {
    pub fn new(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            labels: vec![EdgeLabel::Unassigned; w * h],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> EdgeLabel {
        self.labels[y * self.w + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, label: EdgeLabel) {
        self.labels[y * self.w + x] = label;
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[EdgeLabel] {
        let start = y * self.w;
        &self.labels[start..start + self.w]
    }

    /// Grouped pixels of one side, keyed by group id, each pixel as (x, y)
    /// in row-major order.
    pub fn groups(&self, side: Side) -> BTreeMap<u32, Vec<(usize, usize)>> {
        let mut out: BTreeMap<u32, Vec<(usize, usize)>> = BTreeMap::new();
        for y in 0..self.h {
            for (x, label) in self.row(y).iter().enumerate() {
                if let EdgeLabel::Grouped(s, id) = *label {
                    if s == side {
                        out.entry(id).or_default().push((x, y));
                    }
                }
            }
        }
        out
    }

    /// Resolved pixels of one side, keyed by ordinal.
    pub fn resolved(&self, side: Side) -> BTreeMap<u32, Vec<(usize, usize)>> {
        let mut out: BTreeMap<u32, Vec<(usize, usize)>> = BTreeMap::new();
        for y in 0..self.h {
            for (x, label) in self.row(y).iter().enumerate() {
                if let EdgeLabel::Resolved(s, ord) = *label {
                    if s == side {
                        out.entry(ord).or_default().push((x, y));
                    }
                }
            }
        }
        out
    }

    /// Number of distinct grouped ids on one side.
    pub fn distinct_groups(&self, side: Side) -> usize {
        self.groups(side).len()
    }

    /// Highest grouped id on one side, 0 when the side is empty.
    pub fn max_group_id(&self, side: Side) -> u32 {
        self.groups(side).keys().next_back().copied().unwrap_or(0)
    }

    /// Relabel every pixel of group `from` to group `to` on one side.
    pub fn relabel_group(&mut self, side: Side, from: u32, to: u32) {
        if from == to {
            return;
        }
        for label in &mut self.labels {
            if *label == EdgeLabel::Grouped(side, from) {
                *label = EdgeLabel::Grouped(side, to);
            }
        }
    }

    /// Erase every pixel of one grouped id.
    pub fn clear_group(&mut self, side: Side, id: u32) {
        for label in &mut self.labels {
            if *label == EdgeLabel::Grouped(side, id) {
                *label = EdgeLabel::Unassigned;
            }
        }
    }

    /// Paint a full-height straight edge at column `x` as a new group.
    pub fn paint_column(&mut self, side: Side, id: u32, x: usize) {
        for y in 0..self.h {
            self.set(x, y, EdgeLabel::Grouped(side, id));
        }
    }
}
