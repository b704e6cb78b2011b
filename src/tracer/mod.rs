//! Pipeline orchestration: configuration, the stage plan, and the result.

mod params;
mod pipeline;
mod result;

pub use params::{ReduceMode, TraceParams};
pub use pipeline::{EdgeTracer, TraceFrame};
pub use result::{Stage, TraceResult};
