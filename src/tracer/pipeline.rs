//! Stage orchestration.
//!
//! The pipeline is a flat, ordered list of stages, each with a gate
//! predicate deciding from the current state whether it runs. Control flow
//! that used to live in nested conditionals (the literal-edge bypass, the
//! longslit short-circuit, mode-specific stages) is expressed purely
//! through gates, and the executed stages are recorded in the result so a
//! run can be audited after the fact.

use nalgebra::DMatrix;

use crate::edgemap::{EdgeMap, Side};
use crate::error::Error;
use crate::fitting::{fit_edges, EdgeFits};
use crate::image::{BadPixelMask, ImageF32};
use crate::pca::extrapolate;
use crate::signal::{edges_from_literal, extract_edge_signal};
use crate::stages::assign::{add_boundary_edges, assign_groups};
use crate::stages::gapclose::close_gaps;
use crate::stages::matching::{finalize_left_right, match_edges, MatchCounts};
use crate::stages::sync::{sync_slits, synchronize_fits, CurveSync};
use crate::stages::tcrude::{trace_crude, EdgeChainMap};
use crate::stages::trim::{ignore_off_detector_orders, trim_slits};
use log::{debug, info};

use super::params::{ReduceMode, TraceParams};
use super::result::{Stage, TraceResult};

/// Reference-column distance below which two same-side crude traces are
/// duplicates of one physical edge.
const DUP_TOL: f64 = 2.0;
/// Fraction of detector rows an edge fit must use for its slit to count as
/// well measured.
const MIN_MEASURED_FRAC: f64 = 0.5;

/// One detector frame of input.
#[derive(Clone, Debug)]
pub struct TraceFrame {
    /// The trace (flat-field) image; rows spectral, columns spatial.
    pub trace: ImageF32,
    /// Pixels to exclude from edge detection.
    pub bad_pixel_mask: Option<BadPixelMask>,
    /// Physical spectral coordinate per pixel, same shape as `trace`.
    /// Column 0 supplies the fit abscissa; absent means pixel row index.
    pub pixel_positions: Option<ImageF32>,
    /// 1-based detector number, selecting per-detector configuration.
    pub detector: usize,
}

impl TraceFrame {
    pub fn new(trace: ImageF32) -> Self {
        Self {
            trace,
            bad_pixel_mask: None,
            pixel_positions: None,
            detector: 1,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if let Some(mask) = &self.bad_pixel_mask {
            if mask.w != self.trace.w || mask.h != self.trace.h {
                return Err(Error::ShapeMismatch {
                    what: "bad pixel mask",
                    expected_w: self.trace.w,
                    expected_h: self.trace.h,
                    actual_w: mask.w,
                    actual_h: mask.h,
                });
            }
        }
        if let Some(pos) = &self.pixel_positions {
            if pos.w != self.trace.w || pos.h != self.trace.h {
                return Err(Error::ShapeMismatch {
                    what: "pixel positions",
                    expected_w: self.trace.w,
                    expected_h: self.trace.h,
                    actual_w: pos.w,
                    actual_h: pos.h,
                });
            }
        }
        Ok(())
    }

    /// Per-row spectral coordinate for the edge fits.
    fn row_coords(&self) -> Vec<f64> {
        match &self.pixel_positions {
            Some(pos) => (0..pos.h).map(|y| pos.get(0, y) as f64).collect(),
            None => (0..self.trace.h).map(|y| y as f64).collect(),
        }
    }
}

/// Slit edge tracer over single detector frames.
pub struct EdgeTracer {
    params: TraceParams,
}

impl EdgeTracer {
    pub fn new(params: TraceParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TraceParams {
        &self.params
    }

    /// Trace the slit edges of one frame.
    pub fn trace(&self, frame: &TraceFrame) -> Result<TraceResult, Error> {
        frame.validate()?;
        let literal = self.params.literal_edges(frame.detector);
        if !self.params.single.is_empty() && literal.is_none() {
            return Err(Error::MissingLiteralEdges {
                det: frame.detector,
            });
        }

        let mut state = PipelineState {
            params: &self.params,
            frame,
            xrow: frame.row_coords(),
            literal,
            smoothed: ImageF32::new(0, 0),
            signal: ImageF32::new(0, 0),
            edges: EdgeMap::new(frame.trace.w, frame.trace.h),
            counts: MatchCounts::default(),
            chains: None,
            lfits: None,
            rfits: None,
            sync: None,
            curves: None,
            finished: false,
        };

        let mut steps = Vec::new();
        for entry in STAGE_PLAN {
            if !(entry.gate)(&state) {
                continue;
            }
            debug!("running stage {}", entry.stage);
            (entry.run)(&mut state)?;
            steps.push(entry.stage);
        }

        let curves = state.curves.unwrap_or(Curves {
            left: DMatrix::zeros(state.xrow.len(), 0),
            right: DMatrix::zeros(state.xrow.len(), 0),
            flags: Vec::new(),
        });
        info!(
            "traced {} slit(s) over {} rows in {} stage(s)",
            curves.flags.len(),
            state.xrow.len(),
            steps.len()
        );
        Ok(TraceResult {
            left: curves.left,
            right: curves.right,
            extrapolated: curves.flags,
            steps,
        })
    }
}

/// Dense edge curves plus per-slit extrapolation flags.
struct Curves {
    left: DMatrix<f64>,
    right: DMatrix<f64>,
    flags: Vec<bool>,
}

struct PipelineState<'a> {
    params: &'a TraceParams,
    frame: &'a TraceFrame,
    xrow: Vec<f64>,
    literal: Option<[f64; 2]>,
    smoothed: ImageF32,
    signal: ImageF32,
    edges: EdgeMap,
    counts: MatchCounts,
    chains: Option<EdgeChainMap>,
    lfits: Option<EdgeFits>,
    rfits: Option<EdgeFits>,
    sync: Option<CurveSync>,
    curves: Option<Curves>,
    finished: bool,
}

impl PipelineState<'_> {
    fn refresh_counts(&mut self) {
        self.counts = MatchCounts {
            left: self.edges.distinct_groups(Side::Left) as u32,
            right: self.edges.distinct_groups(Side::Right) as u32,
        };
    }
}

struct StageSpec {
    stage: Stage,
    gate: fn(&PipelineState) -> bool,
    run: fn(&mut PipelineState) -> Result<(), Error>,
}

/// The full stage order; gates cut the literal-edge, legacy, mode-specific,
/// and short-circuit paths out of it.
const STAGE_PLAN: &[StageSpec] = &[
    StageSpec {
        stage: Stage::DetectEdges,
        gate: |s| s.literal.is_none(),
        run: run_detect,
    },
    StageSpec {
        stage: Stage::LiteralEdges,
        gate: |s| s.literal.is_some(),
        run: run_literal,
    },
    StageSpec {
        stage: Stage::MatchEdges,
        gate: |s| s.literal.is_none(),
        run: run_match,
    },
    StageSpec {
        stage: Stage::AddBoundaryEdges,
        gate: |_| true,
        run: run_boundary,
    },
    StageSpec {
        stage: Stage::GapClose,
        gate: |s| s.literal.is_none() && s.params.max_gap.is_some(),
        run: run_gapclose,
    },
    StageSpec {
        stage: Stage::AssignGroups,
        gate: |s| s.literal.is_none(),
        run: run_assign,
    },
    StageSpec {
        stage: Stage::TraceCrude,
        gate: |s| s.literal.is_none(),
        run: run_tcrude,
    },
    StageSpec {
        stage: Stage::MultiSlitSync,
        gate: |s| s.chains.is_some(),
        run: run_sync_slits,
    },
    StageSpec {
        stage: Stage::ApplyUserSlits,
        gate: |s| !s.params.user_slits.is_empty(),
        run: run_user_slits,
    },
    StageSpec {
        stage: Stage::IgnoreOffDetectorOrders,
        gate: |s| s.params.mode == ReduceMode::Echelle,
        run: run_ignore_orders,
    },
    StageSpec {
        stage: Stage::FinalizeLeftRight,
        gate: |_| true,
        run: run_finalize,
    },
    StageSpec {
        stage: Stage::FitEdgesLeft,
        gate: |_| true,
        run: run_fit_left,
    },
    StageSpec {
        stage: Stage::FitEdgesRight,
        gate: |_| true,
        run: run_fit_right,
    },
    StageSpec {
        stage: Stage::LongslitFinish,
        gate: |s| {
            s.params.mode == ReduceMode::MultiSlit && s.counts.left == 1 && s.counts.right == 1
        },
        run: run_longslit,
    },
    StageSpec {
        stage: Stage::SynchronizeFits,
        gate: |s| !s.finished,
        run: run_sync_fits,
    },
    StageSpec {
        stage: Stage::PcaExtrapolate,
        gate: |s| !s.finished,
        run: run_pca,
    },
    StageSpec {
        stage: Stage::Trim,
        gate: |_| true,
        run: run_trim,
    },
];

fn run_detect(s: &mut PipelineState) -> Result<(), Error> {
    let out = extract_edge_signal(
        &s.frame.trace,
        s.frame.bad_pixel_mask.as_ref(),
        &s.params.effective_detect(),
    );
    s.smoothed = out.smoothed;
    s.signal = out.signal;
    s.edges = out.edges;
    Ok(())
}

fn run_literal(s: &mut PipelineState) -> Result<(), Error> {
    let Some([left, right]) = s.literal else {
        return Ok(());
    };
    let (edges, signal) = edges_from_literal(s.frame.trace.w, s.frame.trace.h, left, right);
    s.smoothed = s.frame.trace.clone();
    s.signal = signal;
    s.edges = edges;
    s.counts = MatchCounts { left: 1, right: 1 };
    Ok(())
}

fn run_match(s: &mut PipelineState) -> Result<(), Error> {
    s.counts = match_edges(&mut s.edges, s.params.edge_id_limit)?;
    Ok(())
}

fn run_boundary(s: &mut PipelineState) -> Result<(), Error> {
    add_boundary_edges(&mut s.edges, &mut s.counts);
    Ok(())
}

fn run_gapclose(s: &mut PipelineState) -> Result<(), Error> {
    let Some(max_gap) = s.params.max_gap else {
        return Ok(());
    };
    close_gaps(&mut s.edges, max_gap);
    s.refresh_counts();
    Ok(())
}

fn run_assign(s: &mut PipelineState) -> Result<(), Error> {
    for side in Side::BOTH {
        assign_groups(&mut s.edges, &s.smoothed, side);
    }
    s.refresh_counts();
    Ok(())
}

fn run_tcrude(s: &mut PipelineState) -> Result<(), Error> {
    let floor = s.params.detect.sigdetect * 0.5;
    s.chains = Some(trace_crude(&mut s.edges, &s.signal, floor));
    Ok(())
}

fn run_sync_slits(s: &mut PipelineState) -> Result<(), Error> {
    let Some(chains) = s.chains.take() else {
        return Ok(());
    };
    s.chains = Some(sync_slits(&mut s.edges, chains, DUP_TOL));
    s.refresh_counts();
    Ok(())
}

fn run_ignore_orders(s: &mut PipelineState) -> Result<(), Error> {
    ignore_off_detector_orders(&mut s.edges, s.params.frac_ignore);
    s.refresh_counts();
    Ok(())
}

fn run_finalize(s: &mut PipelineState) -> Result<(), Error> {
    let min_pixels = ((s.params.frac_ignore * s.edges.h as f64).round() as usize).max(2);
    s.counts = finalize_left_right(&mut s.edges, min_pixels);
    if s.params.mode == ReduceMode::Echelle {
        let found = s.counts.left.min(s.counts.right) as usize;
        if found < 2 {
            return Err(Error::TooFewOrders { found });
        }
    }
    Ok(())
}

fn run_fit_left(s: &mut PipelineState) -> Result<(), Error> {
    s.lfits = Some(fit_edges(
        &s.edges,
        Side::Left,
        &s.xrow,
        s.params.function,
        s.params.poly_order,
    ));
    Ok(())
}

fn run_fit_right(s: &mut PipelineState) -> Result<(), Error> {
    s.rfits = Some(fit_edges(
        &s.edges,
        Side::Right,
        &s.xrow,
        s.params.function,
        s.params.poly_order,
    ));
    Ok(())
}

/// Single left/right pair: the two fits are the answer, no population
/// reconciliation needed.
fn run_longslit(s: &mut PipelineState) -> Result<(), Error> {
    let (Some(lfits), Some(rfits)) = (s.lfits.as_ref(), s.rfits.as_ref()) else {
        return Ok(());
    };
    let rows = s.xrow.len();
    let col = |fits: &EdgeFits, y: usize| {
        let v = fits.evaluate(0, s.xrow[y]);
        if v.is_finite() {
            v
        } else {
            fits.positions[0]
        }
    };
    let left = DMatrix::from_fn(rows, 1, |y, _| col(lfits, y));
    let right = DMatrix::from_fn(rows, 1, |y, _| col(rfits, y));
    info!("single slit pair found; finishing as longslit");
    s.curves = Some(Curves {
        left,
        right,
        flags: vec![false],
    });
    s.finished = true;
    Ok(())
}

fn run_sync_fits(s: &mut PipelineState) -> Result<(), Error> {
    let (Some(lfits), Some(rfits)) = (s.lfits.as_ref(), s.rfits.as_ref()) else {
        return Ok(());
    };
    s.sync = Some(synchronize_fits(lfits, rfits, &s.xrow, MIN_MEASURED_FRAC));
    Ok(())
}

fn run_pca(s: &mut PipelineState) -> Result<(), Error> {
    let (Some(sync), Some(lfits), Some(rfits)) =
        (s.sync.as_ref(), s.lfits.as_ref(), s.rfits.as_ref())
    else {
        return Ok(());
    };
    let out = extrapolate(sync, lfits, rfits, &s.xrow, &s.params.pca, s.params.diff_order);
    s.curves = Some(Curves {
        left: out.left,
        right: out.right,
        flags: out.extrapolated,
    });
    Ok(())
}

/// Paint the configured slits into the edge map as full-height straight
/// edges so they flow through finalization and fitting like detected ones.
fn run_user_slits(s: &mut PipelineState) -> Result<(), Error> {
    let w = s.edges.w;
    for &[l, r] in &s.params.user_slits {
        info!("adding user-defined slit at columns [{l:.1}, {r:.1}]");
        let lx = (l.round().max(0.0) as usize).min(w.saturating_sub(1));
        let rx = (r.round().max(0.0) as usize).min(w.saturating_sub(1));
        let lid = s.edges.max_group_id(Side::Left) + 1;
        s.edges.paint_column(Side::Left, lid, lx);
        let rid = s.edges.max_group_id(Side::Right) + 1;
        s.edges.paint_column(Side::Right, rid, rx);
    }
    s.refresh_counts();
    Ok(())
}

fn run_trim(s: &mut PipelineState) -> Result<(), Error> {
    let Some(curves) = s.curves.take() else {
        return Ok(());
    };
    // The width test only applies to detected geometry; literal and
    // user-configured slits are kept at their requested widths.
    let rows = curves.left.nrows();
    let mid = rows / 2;
    let width_exempt: Vec<bool> = (0..curves.left.ncols())
        .map(|k| {
            s.literal.is_some()
                || s.params.user_slits.iter().any(|&[l, r]| {
                    (curves.left[(mid, k)] - l).abs() <= 1.0
                        && (curves.right[(mid, k)] - r).abs() <= 1.0
                })
        })
        .collect();
    let (left, right, flags) = trim_slits(
        &curves.left,
        &curves.right,
        &curves.flags,
        s.frame.trace.w,
        s.params.frac_ignore,
        &width_exempt,
    );
    s.curves = Some(Curves { left, right, flags });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edgemap::Side;

    fn flat_frame(w: usize, h: usize, slits: &[(usize, usize)]) -> TraceFrame {
        let mut img = ImageF32::new(w, h);
        for y in 0..h {
            for &(lo, hi) in slits {
                for x in lo..hi {
                    img.set(x, y, 1000.0);
                }
            }
        }
        TraceFrame::new(img)
    }

    #[test]
    fn longslit_frame_short_circuits() {
        let frame = flat_frame(100, 60, &[(20, 70)]);
        let tracer = EdgeTracer::new(TraceParams::default());
        let out = tracer.trace(&frame).unwrap();
        assert_eq!(out.nslits(), 1);
        assert_eq!(out.rows(), 60);
        assert!(out.ran(Stage::LongslitFinish));
        assert!(!out.ran(Stage::SynchronizeFits));
        assert!(!out.ran(Stage::PcaExtrapolate));
        assert!((out.left[(30, 0)] - 20.0).abs() < 2.0);
        assert!((out.right[(30, 0)] - 69.0).abs() < 2.0);
    }

    #[test]
    fn literal_edges_bypass_detection() {
        let frame = flat_frame(100, 40, &[]);
        let params = TraceParams {
            single: vec![Some([12.0, 80.0])],
            ..Default::default()
        };
        let out = EdgeTracer::new(params).trace(&frame).unwrap();
        assert!(out.ran(Stage::LiteralEdges));
        assert!(!out.ran(Stage::DetectEdges));
        assert_eq!(out.nslits(), 1);
        assert!((out.left[(20, 0)] - 12.0).abs() < 1.0);
        assert!((out.right[(20, 0)] - 80.0).abs() < 1.0);
    }

    #[test]
    fn missing_literal_entry_is_an_error() {
        let mut frame = flat_frame(50, 20, &[]);
        frame.detector = 2;
        let params = TraceParams {
            single: vec![Some([5.0, 40.0])],
            ..Default::default()
        };
        let err = EdgeTracer::new(params).trace(&frame).unwrap_err();
        assert!(matches!(err, Error::MissingLiteralEdges { det: 2 }));
    }

    #[test]
    fn echelle_mode_requires_two_orders() {
        let frame = flat_frame(100, 60, &[(20, 70)]);
        let params = TraceParams {
            mode: ReduceMode::Echelle,
            ..Default::default()
        };
        let err = EdgeTracer::new(params).trace(&frame).unwrap_err();
        assert!(matches!(err, Error::TooFewOrders { found: 1 }));
    }

    #[test]
    fn mask_shape_mismatch_is_rejected() {
        let mut frame = flat_frame(50, 20, &[(10, 30)]);
        frame.bad_pixel_mask = Some(BadPixelMask::new(50, 21));
        let err = EdgeTracer::new(TraceParams::default()).trace(&frame).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn user_slits_are_traced_and_fit() {
        let frame = flat_frame(120, 60, &[(20, 50)]);
        let params = TraceParams {
            user_slits: vec![[70.0, 100.0]],
            ..Default::default()
        };
        let out = EdgeTracer::new(params).trace(&frame).unwrap();
        assert!(out.ran(Stage::ApplyUserSlits));
        // User edges enter the edge map before fitting, not as raw output.
        let pos = |stage| out.steps.iter().position(|s| *s == stage);
        assert!(pos(Stage::ApplyUserSlits) < pos(Stage::FitEdgesLeft));
        assert_eq!(out.nslits(), 2);
        assert!(out.left[(30, 0)] < out.left[(30, 1)]);
        assert!((out.left[(30, 1)] - 70.0).abs() < 1e-6);
        assert!((out.right[(30, 1)] - 100.0).abs() < 1e-6);
        assert!(!out.extrapolated[1]);
    }

    #[test]
    fn width_test_survives_user_slit_configuration() {
        // Detected slits: one wide, one 12 px. The narrow detected slit
        // must still be trimmed; the narrow user slit is kept as asked.
        let frame = flat_frame(200, 80, &[(30, 70), (100, 112)]);
        let params = TraceParams {
            frac_ignore: 0.1, // width floor = 20 px
            user_slits: vec![[150.0, 160.0]],
            ..Default::default()
        };
        let out = EdgeTracer::new(params).trace(&frame).unwrap();
        assert_eq!(out.nslits(), 2);
        assert!((out.left[(40, 0)] - 30.0).abs() < 2.0);
        assert!((out.left[(40, 1)] - 150.0).abs() < 1e-6);
    }

    #[test]
    fn single_row_frame_completes() {
        let frame = flat_frame(32, 1, &[(10, 20)]);
        let out = EdgeTracer::new(TraceParams::default()).trace(&frame).unwrap();
        assert_eq!(out.rows(), 1);
        assert_eq!(out.nslits(), 0);
    }

    #[test]
    fn boundary_edge_recovers_half_slit() {
        // Flux runs into the right detector edge: only a left edge exists.
        let frame = flat_frame(80, 40, &[(30, 80)]);
        let out = EdgeTracer::new(TraceParams::default()).trace(&frame).unwrap();
        assert!(out.ran(Stage::AddBoundaryEdges));
        assert_eq!(out.nslits(), 1);
        assert!((out.left[(20, 0)] - 30.0).abs() < 2.0);
        assert!(out.right[(20, 0)] > 75.0);
    }

    #[test]
    fn empty_frame_yields_no_slits() {
        let frame = flat_frame(64, 32, &[]);
        let out = EdgeTracer::new(TraceParams::default()).trace(&frame).unwrap();
        assert_eq!(out.nslits(), 0);
        assert_eq!(out.rows(), 32);
        assert!(out.ran(Stage::Trim));
    }

    #[test]
    fn row_coords_follow_pixel_positions() {
        let mut frame = flat_frame(50, 8, &[]);
        let mut pos = ImageF32::new(50, 8);
        for y in 0..8 {
            for x in 0..50 {
                pos.set(x, y, 100.0 + 10.0 * y as f32);
            }
        }
        frame.pixel_positions = Some(pos);
        assert_eq!(frame.row_coords()[3], 130.0);
        let plain = flat_frame(10, 4, &[]);
        assert_eq!(plain.row_coords(), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn boundary_synthesis_skips_empty_maps() {
        let mut edges = EdgeMap::new(16, 4);
        let mut counts = MatchCounts::default();
        add_boundary_edges(&mut edges, &mut counts);
        assert_eq!(counts, MatchCounts::default());
        assert_eq!(edges.distinct_groups(Side::Left), 0);
    }
}
