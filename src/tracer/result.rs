//! Final trace output and the execution log.

use nalgebra::DMatrix;
use serde::Serialize;

/// One pipeline stage, recorded in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DetectEdges,
    LiteralEdges,
    MatchEdges,
    AddBoundaryEdges,
    GapClose,
    AssignGroups,
    TraceCrude,
    MultiSlitSync,
    IgnoreOffDetectorOrders,
    FinalizeLeftRight,
    FitEdgesLeft,
    FitEdgesRight,
    LongslitFinish,
    SynchronizeFits,
    PcaExtrapolate,
    ApplyUserSlits,
    Trim,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::DetectEdges => "detect_edges",
            Stage::LiteralEdges => "literal_edges",
            Stage::MatchEdges => "match_edges",
            Stage::AddBoundaryEdges => "add_boundary_edges",
            Stage::GapClose => "gap_close",
            Stage::AssignGroups => "assign_groups",
            Stage::TraceCrude => "trace_crude",
            Stage::MultiSlitSync => "multi_slit_sync",
            Stage::IgnoreOffDetectorOrders => "ignore_off_detector_orders",
            Stage::FinalizeLeftRight => "finalize_left_right",
            Stage::FitEdgesLeft => "fit_edges_left",
            Stage::FitEdgesRight => "fit_edges_right",
            Stage::LongslitFinish => "longslit_finish",
            Stage::SynchronizeFits => "synchronize_fits",
            Stage::PcaExtrapolate => "pca_extrapolate",
            Stage::ApplyUserSlits => "apply_user_slits",
            Stage::Trim => "trim",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Traced slit boundaries for one detector frame.
///
/// Both matrices are detector rows by slits, columns ordered left to right
/// across the spatial axis. Positions are fractional pixel columns and may
/// run slightly off the detector for slits cut by its boundary.
#[derive(Clone, Debug)]
pub struct TraceResult {
    /// Left edge position per row per slit.
    pub left: DMatrix<f64>,
    /// Right edge position per row per slit.
    pub right: DMatrix<f64>,
    /// True for slits recovered by extrapolation rather than measured.
    pub extrapolated: Vec<bool>,
    /// Stages that actually ran, in order.
    pub steps: Vec<Stage>,
}

impl TraceResult {
    pub fn rows(&self) -> usize {
        self.left.nrows()
    }

    pub fn nslits(&self) -> usize {
        self.left.ncols()
    }

    pub fn ran(&self, stage: Stage) -> bool {
        self.steps.contains(&stage)
    }
}
