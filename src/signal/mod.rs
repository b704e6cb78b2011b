//! Signal extraction: smoothing, directional derivative, and thresholding.
//!
//! This stage turns the raw trace image into the two derived buffers the
//! rest of the pipeline consumes:
//!
//! - a smoothed image, filtered along the spectral axis only so that sharp
//!   transitions across the spatial axis survive;
//! - a signal map from a spatial derivative filter, sign-compressed and
//!   normalized by a robust per-row noise estimate, whose magnitude encodes
//!   edge confidence and whose sign separates left from right edges.
//!
//! Thresholding the signal map seeds the [`EdgeMap`](crate::edgemap::EdgeMap)
//! with candidate pixels, thinned to one pixel per edge crossing per row.
//! A literal single-slit configuration bypasses detection entirely and
//! paints the map from the user-supplied edge pair.

mod detect;
mod smooth;

pub use detect::{edges_from_literal, extract_edge_signal, DetectParams, SignalExtraction};
pub use smooth::{spectral_median_filter, spectral_uniform_filter};
