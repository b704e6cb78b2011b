//! Error taxonomy for the tracing core.
//!
//! The pipeline is a deterministic numeric computation: failures are either
//! configuration errors caught up front or silent degradation of output
//! completeness (dropped slits, observable through the slit count and the
//! extrapolation flags). Only the former surface as [`Error`] values.

use crate::edgemap::Side;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// More distinct edge groups were found than the configured id space
    /// allows. Raise `edge_id_limit`; retrying cannot help.
    #[error("edge id space exhausted: {count} {side} groups at limit {limit}")]
    EdgeIdSpaceExhausted { side: Side, count: u32, limit: u32 },

    /// Echelle processing was requested but fewer than two orders survived
    /// edge matching. Almost always a misclassified instrument mode.
    #[error("echelle reduction requested but only {found} order(s) found")]
    TooFewOrders { found: usize },

    /// An auxiliary input array does not match the trace image shape.
    #[error("{what}: expected {expected_w}x{expected_h}, got {actual_w}x{actual_h}")]
    ShapeMismatch {
        what: &'static str,
        expected_w: usize,
        expected_h: usize,
        actual_w: usize,
        actual_h: usize,
    },

    /// A literal single-slit configuration was requested but no edge pair is
    /// defined for the given detector.
    #[error("no literal slit edges configured for detector {det}")]
    MissingLiteralEdges { det: usize },
}
