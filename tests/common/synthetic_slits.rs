//! Synthetic calibration frames with known slit geometry.

use edge_tracer::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Uniform in-slit flux level.
pub const SLIT_FLUX: f32 = 40_000.0;

/// One tilted slit with known edge positions.
#[derive(Clone, Debug)]
pub struct SyntheticSlit {
    pub left: f64,
    pub width: f64,
    /// Spatial drift in pixels per row.
    pub tilt: f64,
    /// Row range `[lo, hi)` where the slit is illuminated; `None` = all.
    pub visible_rows: Option<(usize, usize)>,
}

impl SyntheticSlit {
    pub fn new(left: f64, width: f64, tilt: f64) -> Self {
        Self {
            left,
            width,
            tilt,
            visible_rows: None,
        }
    }

    /// Restrict illumination to rows `lo..hi`.
    pub fn visible(mut self, lo: usize, hi: usize) -> Self {
        self.visible_rows = Some((lo, hi));
        self
    }

    pub fn left_at(&self, y: usize) -> f64 {
        self.left + self.tilt * y as f64
    }

    pub fn right_at(&self, y: usize) -> f64 {
        self.left_at(y) + self.width
    }

    pub fn center_at(&self, y: usize) -> f64 {
        self.left_at(y) + 0.5 * self.width
    }

    fn lit(&self, x: usize, y: usize) -> bool {
        if let Some((lo, hi)) = self.visible_rows {
            if y < lo || y >= hi {
                return false;
            }
        }
        let xf = x as f64;
        xf >= self.left_at(y) && xf < self.right_at(y)
    }
}

/// Render a frame of the given slits over Gaussian read noise.
pub fn slit_frame(w: usize, h: usize, slits: &[SyntheticSlit], noise: f64, seed: u64) -> TraceFrame {
    let mut img = ImageF32::new(w, h);
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, noise.max(1e-9)).unwrap();
    for y in 0..h {
        for x in 0..w {
            let mut v = if noise > 0.0 {
                normal.sample(&mut rng) as f32
            } else {
                0.0
            };
            for slit in slits {
                if slit.lit(x, y) {
                    v += SLIT_FLUX;
                }
            }
            img.set(x, y, v);
        }
    }
    TraceFrame::new(img)
}
