//! Owned single-channel buffers used throughout the tracing core.
//!
//! Row-major layout with `stride == width`; rows are the spectral axis and
//! columns the spatial axis everywhere in this crate. The trace image is
//! never mutated; each stage derives new buffers from it.

use crate::error::Error;

/// Owned single-channel f32 image in row-major layout.
#[derive(Clone, Debug)]
pub struct ImageF32 {
    /// Image width (spatial axis) in pixels
    pub w: usize,
    /// Image height (spectral axis) in pixels
    pub h: usize,
    /// Backing storage in row-major order
    pub data: Vec<f32>,
}

impl ImageF32 {
    /// Construct a zero-initialized buffer of size `w × h`.
    pub fn new(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            data: vec![0.0; w * h],
        }
    }

    /// Wrap an existing row-major buffer, validating its length.
    pub fn from_vec(w: usize, h: usize, data: Vec<f32>) -> Result<Self, Error> {
        if data.len() != w * h {
            return Err(Error::ShapeMismatch {
                what: "image buffer",
                expected_w: w,
                expected_h: h,
                actual_w: data.len(),
                actual_h: 1,
            });
        }
        Ok(Self { w, h, data })
    }

    #[inline]
    /// Convert (x, y) to a linear index into `data`.
    pub fn idx(&self, x: usize, y: usize) -> usize {
        y * self.w + x
    }

    #[inline]
    /// Get the pixel value at (x, y).
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[self.idx(x, y)]
    }

    #[inline]
    /// Set the pixel value at (x, y).
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        let i = self.idx(x, y);
        self.data[i] = v;
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[f32] {
        let start = y * self.w;
        &self.data[start..start + self.w]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [f32] {
        let start = y * self.w;
        let end = start + self.w;
        &mut self.data[start..end]
    }
}

/// Bad-pixel mask sharing the trace image shape. Nonzero marks a bad pixel.
#[derive(Clone, Debug)]
pub struct BadPixelMask {
    pub w: usize,
    pub h: usize,
    pub data: Vec<u8>,
}

impl BadPixelMask {
    /// All-good mask of size `w × h`.
    pub fn new(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            data: vec![0; w * h],
        }
    }

    pub fn from_vec(w: usize, h: usize, data: Vec<u8>) -> Result<Self, Error> {
        if data.len() != w * h {
            return Err(Error::ShapeMismatch {
                what: "bad pixel mask",
                expected_w: w,
                expected_h: h,
                actual_w: data.len(),
                actual_h: 1,
            });
        }
        Ok(Self { w, h, data })
    }

    #[inline]
    pub fn is_bad(&self, x: usize, y: usize) -> bool {
        self.data[y * self.w + x] != 0
    }

    #[inline]
    pub fn mark_bad(&mut self, x: usize, y: usize) {
        self.data[y * self.w + x] = 1;
    }
}

/// Mirror-reflect an out-of-range index into `0..len` without repeating the
/// boundary sample (`-1 → 1`, `len → len - 2`).
#[inline]
pub(crate) fn mirror_index(i: isize, len: usize) -> usize {
    debug_assert!(len > 0);
    // A single-sample axis has nothing to reflect against.
    if len == 1 {
        return 0;
    }
    let n = len as isize;
    let mut i = i;
    // Converges in one pass for any offset smaller than the axis length.
    while i < 0 || i >= n {
        if i < 0 {
            i = -i;
        }
        if i >= n {
            i = 2 * n - 2 - i;
        }
    }
    i as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_reflects_without_repeating_edges() {
        assert_eq!(mirror_index(-1, 5), 1);
        assert_eq!(mirror_index(-2, 5), 2);
        assert_eq!(mirror_index(5, 5), 3);
        assert_eq!(mirror_index(6, 5), 2);
        assert_eq!(mirror_index(2, 5), 2);
    }

    #[test]
    fn mirror_collapses_single_sample_axis() {
        assert_eq!(mirror_index(-1, 1), 0);
        assert_eq!(mirror_index(0, 1), 0);
        assert_eq!(mirror_index(3, 1), 0);
        assert_eq!(mirror_index(-1, 2), 1);
        assert_eq!(mirror_index(2, 2), 0);
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(ImageF32::from_vec(4, 4, vec![0.0; 15]).is_err());
        assert!(BadPixelMask::from_vec(4, 4, vec![0; 16]).is_ok());
    }
}
