#![doc = include_str!("../README.md")]

pub mod edgemap;
pub mod error;
pub mod fitting;
pub mod image;
pub mod pca;
pub mod signal;
pub mod stages;
mod stats;
pub mod tracer;

pub use error::Error;
pub use tracer::{EdgeTracer, TraceFrame, TraceParams, TraceResult};

/// Everything a typical caller needs.
pub mod prelude {
    pub use crate::edgemap::{EdgeLabel, EdgeMap, Side};
    pub use crate::fitting::BasisFamily;
    pub use crate::image::{BadPixelMask, ImageF32};
    pub use crate::pca::{PcaMode, PcaParams};
    pub use crate::signal::DetectParams;
    pub use crate::tracer::{
        EdgeTracer, ReduceMode, Stage, TraceFrame, TraceParams, TraceResult,
    };
}
