//! Directional (spectral-axis-only) smoothing filters.
//!
//! Both filters operate on one column at a time with mirrored boundaries and
//! never mix neighboring columns, so spatial edge transitions stay sharp.

use crate::image::{mirror_index, ImageF32};

/// Local-mean filter of size `window × 1` along the spectral axis.
///
/// `window` is clamped to an odd value of at least 1. Boundary rows are
/// mirrored without repeating the edge sample.
pub fn spectral_uniform_filter(img: &ImageF32, window: usize) -> ImageF32 {
    let half = (window.max(1) / 2) as isize;
    let mut out = ImageF32::new(img.w, img.h);
    if img.w == 0 || img.h == 0 {
        return out;
    }
    let norm = 1.0 / (2 * half + 1) as f32;
    for y in 0..img.h {
        let rows: Vec<&[f32]> = (-half..=half)
            .map(|dy| img.row(mirror_index(y as isize + dy, img.h)))
            .collect();
        let out_row = out.row_mut(y);
        for (x, o) in out_row.iter_mut().enumerate() {
            let mut sum = 0.0;
            for row in &rows {
                sum += row[x];
            }
            *o = sum * norm;
        }
    }
    out
}

/// 3-tap median filter along the spectral axis, applied `reps` times.
///
/// Used as an optional prefilter to knock down isolated hot rows before the
/// mean smoothing; `reps == 0` returns a plain copy.
pub fn spectral_median_filter(img: &ImageF32, reps: usize) -> ImageF32 {
    let mut cur = img.clone();
    if img.h < 2 {
        return cur;
    }
    for _ in 0..reps {
        let mut next = ImageF32::new(cur.w, cur.h);
        for y in 0..cur.h {
            let above = cur.row(mirror_index(y as isize - 1, cur.h));
            let here = cur.row(y);
            let below = cur.row(mirror_index(y as isize + 1, cur.h));
            let out_row = next.row_mut(y);
            for (x, o) in out_row.iter_mut().enumerate() {
                *o = median3(above[x], here[x], below[x]);
            }
        }
        cur = next;
    }
    cur
}

#[inline]
fn median3(a: f32, b: f32, c: f32) -> f32 {
    a.max(b).min(a.min(b).max(c))
}
