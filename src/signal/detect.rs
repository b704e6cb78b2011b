//! Derivative filter, robust thresholding, and candidate marking.

use crate::edgemap::{EdgeLabel, EdgeMap, Side};
use crate::image::{BadPixelMask, ImageF32};
use crate::stats::mad_sigma;
use log::debug;
use serde::{Deserialize, Serialize};

use super::smooth::{spectral_median_filter, spectral_uniform_filter};

/// Knobs for the detection stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectParams {
    /// Spectral-axis window of the local-mean prefilter (odd, >= 1).
    pub smooth_window: usize,
    /// Repetitions of the 3-tap spectral median prefilter (0 disables).
    pub median_reps: usize,
    /// Detection threshold in units of the per-row robust noise sigma.
    pub sigdetect: f64,
    /// Keep only the N strongest candidates per side per row. `None` keeps
    /// everything; set it when the number of slits is known up front.
    pub max_per_row: Option<usize>,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            smooth_window: 3,
            median_reps: 0,
            sigdetect: 20.0,
            max_per_row: None,
        }
    }
}

/// Buffers produced by the detection stage.
#[derive(Clone, Debug)]
pub struct SignalExtraction {
    /// Spectral-axis smoothed copy of the trace image.
    pub smoothed: ImageF32,
    /// Noise-normalized edge-strength map; positive = left, negative = right.
    pub signal: ImageF32,
    /// Candidate edge pixels, one per edge crossing per row.
    pub edges: EdgeMap,
}

/// Run smoothing, the derivative filter, and thresholding over a trace
/// image, marking candidate edge pixels into a fresh edge map.
pub fn extract_edge_signal(
    trace: &ImageF32,
    mask: Option<&BadPixelMask>,
    params: &DetectParams,
) -> SignalExtraction {
    let prefiltered = spectral_median_filter(trace, params.median_reps);
    let smoothed = spectral_uniform_filter(&prefiltered, params.smooth_window);
    let signal = edge_strength(&smoothed, mask);
    let mut edges = EdgeMap::new(trace.w, trace.h);
    mark_candidates(&signal, &mut edges, params);
    SignalExtraction {
        smoothed,
        signal,
        edges,
    }
}

/// Spatial Sobel derivative of the smoothed image, cube-root compressed and
/// normalized by a per-row MAD noise estimate. Bad pixels read as zero.
fn edge_strength(smoothed: &ImageF32, mask: Option<&BadPixelMask>) -> ImageF32 {
    let w = smoothed.w;
    let h = smoothed.h;
    let mut compressed = ImageF32::new(w, h);
    if w < 3 || h == 0 {
        return compressed;
    }

    for y in 0..h {
        let rows = [
            smoothed.row(y.saturating_sub(1)),
            smoothed.row(y),
            smoothed.row((y + 1).min(h - 1)),
        ];
        let out = compressed.row_mut(y);
        for (x, o) in out.iter_mut().enumerate() {
            let xm = x.saturating_sub(1);
            let xp = (x + 1).min(w - 1);
            // Horizontal Sobel: [-1 0 1] weighted 1-2-1 across rows.
            let d = (rows[0][xp] - rows[0][xm])
                + 2.0 * (rows[1][xp] - rows[1][xm])
                + (rows[2][xp] - rows[2][xm]);
            // Cube root keeps the sign and tames bright-slit dominance.
            *o = d.signum() * d.abs().cbrt();
        }
    }

    // Per-row robust noise, floored by half the frame-wide estimate so a
    // pathologically quiet row cannot blow the normalization up.
    let all: Vec<f64> = compressed.data.iter().map(|v| *v as f64).collect();
    let global_sigma = mad_sigma(&all);
    let mut signal = ImageF32::new(w, h);
    for y in 0..h {
        let row: Vec<f64> = compressed.row(y).iter().map(|v| *v as f64).collect();
        let sigma = mad_sigma(&row).max(0.5 * global_sigma).max(1e-10);
        let out = signal.row_mut(y);
        for (x, o) in out.iter_mut().enumerate() {
            let bad = mask.map(|m| m.is_bad(x, y)).unwrap_or(false);
            *o = if bad {
                0.0
            } else {
                (compressed.get(x, y) as f64 / sigma) as f32
            };
        }
    }
    signal
}

/// Threshold the signal map and thin each contiguous run of same-polarity
/// columns to its strongest pixel.
fn mark_candidates(signal: &ImageF32, edges: &mut EdgeMap, params: &DetectParams) {
    let thr = params.sigdetect as f32;
    let mut n_left = 0usize;
    let mut n_right = 0usize;
    for y in 0..signal.h {
        let row = signal.row(y);
        let mut kept: Vec<(usize, Side, f32)> = Vec::new();
        let mut run: Option<(Side, usize, f32)> = None; // (side, best_x, best_mag)
        for x in 0..=signal.w {
            let class = if x < signal.w {
                let v = row[x];
                if v >= thr {
                    Some((Side::Left, v))
                } else if v <= -thr {
                    Some((Side::Right, -v))
                } else {
                    None
                }
            } else {
                None
            };
            match (run, class) {
                (Some((side, bx, bm)), Some((s, mag))) if s == side => {
                    if mag > bm {
                        run = Some((side, x, mag));
                    } else {
                        run = Some((side, bx, bm));
                    }
                }
                (Some((side, bx, bm)), other) => {
                    kept.push((bx, side, bm));
                    run = other.map(|(s, mag)| (s, x, mag));
                }
                (None, Some((s, mag))) => run = Some((s, x, mag)),
                (None, None) => {}
            }
        }

        if let Some(n) = params.max_per_row {
            keep_strongest(&mut kept, Side::Left, n);
            keep_strongest(&mut kept, Side::Right, n);
        }
        for (x, side, _) in kept {
            edges.set(x, y, EdgeLabel::Candidate(side));
            match side {
                Side::Left => n_left += 1,
                Side::Right => n_right += 1,
            }
        }
    }
    debug!(
        "edge detection: {n_left} left / {n_right} right candidate pixels at sigdetect={}",
        params.sigdetect
    );
}

fn keep_strongest(kept: &mut Vec<(usize, Side, f32)>, side: Side, n: usize) {
    let mut of_side: Vec<(usize, Side, f32)> =
        kept.iter().copied().filter(|(_, s, _)| *s == side).collect();
    if of_side.len() <= n {
        return;
    }
    // Strongest first; equal strengths resolve to the lower column.
    of_side.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
    let cut: Vec<usize> = of_side[n..].iter().map(|(x, _, _)| *x).collect();
    kept.retain(|(x, s, _)| *s != side || !cut.contains(x));
}

/// Build the edge map directly from a literal `[left, right]` pixel pair,
/// skipping detection. The signal map is identically zero in this path.
pub fn edges_from_literal(w: usize, h: usize, left: f64, right: f64) -> (EdgeMap, ImageF32) {
    let mut edges = EdgeMap::new(w, h);
    let lx = (left.round().max(0.0) as usize).min(w.saturating_sub(1));
    let rx = (right.round().max(0.0) as usize).min(w.saturating_sub(1));
    edges.paint_column(Side::Left, 1, lx);
    edges.paint_column(Side::Right, 1, rx);
    debug!("literal slit edges at columns {lx}/{rx}");
    (edges, ImageF32::new(w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_frame(w: usize, h: usize, lo: usize, hi: usize) -> ImageF32 {
        let mut img = ImageF32::new(w, h);
        for y in 0..h {
            for x in lo..hi {
                img.set(x, y, 100.0);
            }
        }
        img
    }

    #[test]
    fn detects_one_left_and_one_right_candidate_per_row() {
        let img = step_frame(32, 16, 10, 20);
        let out = extract_edge_signal(&img, None, &DetectParams::default());
        for y in 0..16 {
            let row = out.edges.row(y);
            let lefts: Vec<usize> = (0..32)
                .filter(|&x| row[x] == EdgeLabel::Candidate(Side::Left))
                .collect();
            let rights: Vec<usize> = (0..32)
                .filter(|&x| row[x] == EdgeLabel::Candidate(Side::Right))
                .collect();
            assert_eq!(lefts.len(), 1, "row {y}: {lefts:?}");
            assert_eq!(rights.len(), 1, "row {y}: {rights:?}");
            assert!(lefts[0].abs_diff(10) <= 1);
            assert!(rights[0].abs_diff(19) <= 1);
        }
    }

    #[test]
    fn signal_polarity_separates_sides() {
        let img = step_frame(32, 8, 10, 20);
        let out = extract_edge_signal(&img, None, &DetectParams::default());
        assert!(out.signal.get(10, 4) > 0.0);
        assert!(out.signal.get(19, 4) < 0.0);
    }

    #[test]
    fn bad_pixels_produce_no_signal() {
        let img = step_frame(32, 8, 10, 20);
        let mut mask = BadPixelMask::new(32, 8);
        for x in 0..32 {
            mask.mark_bad(x, 3);
        }
        let out = extract_edge_signal(&img, Some(&mask), &DetectParams::default());
        for x in 0..32 {
            assert_eq!(out.signal.get(x, 3), 0.0);
            assert_eq!(out.edges.get(x, 3), EdgeLabel::Unassigned);
        }
    }

    #[test]
    fn max_per_row_keeps_strongest_slits() {
        // Two slits, the second brighter. max_per_row = 1 must keep it.
        let mut img = ImageF32::new(64, 8);
        for y in 0..8 {
            for x in 8..16 {
                img.set(x, y, 20.0);
            }
            for x in 40..48 {
                img.set(x, y, 200.0);
            }
        }
        let params = DetectParams {
            max_per_row: Some(1),
            ..Default::default()
        };
        let out = extract_edge_signal(&img, None, &params);
        for y in 0..8 {
            let row = out.edges.row(y);
            let lefts: Vec<usize> = (0..64)
                .filter(|&x| row[x] == EdgeLabel::Candidate(Side::Left))
                .collect();
            assert_eq!(lefts.len(), 1);
            assert!(lefts[0] >= 38, "kept the faint slit: {lefts:?}");
        }
    }

    #[test]
    fn literal_edges_paint_full_columns() {
        let (edges, signal) = edges_from_literal(16, 4, 3.2, 12.7);
        for y in 0..4 {
            assert_eq!(edges.get(3, y), EdgeLabel::Grouped(Side::Left, 1));
            assert_eq!(edges.get(13, y), EdgeLabel::Grouped(Side::Right, 1));
        }
        assert!(signal.data.iter().all(|v| *v == 0.0));
    }
}
