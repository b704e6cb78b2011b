//! Pipeline configuration.

use serde::{Deserialize, Serialize};

use crate::fitting::BasisFamily;
use crate::pca::PcaParams;
use crate::signal::DetectParams;

/// Reduction mode of the instrument data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceMode {
    /// Longslit or multi-slit masks; one to many independent slits.
    #[default]
    MultiSlit,
    /// Cross-dispersed echelle; at least two orders are required.
    Echelle,
}

/// Full configuration of one tracing run.
///
/// The defaults reproduce the standard multi-slit reduction; instrument
/// settings files deserialize straight into this via serde.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceParams {
    pub mode: ReduceMode,
    /// Basis for the per-edge position fits.
    pub function: BasisFamily,
    /// Order of the per-edge position fits.
    pub poly_order: usize,
    /// Order of the slit-width trend used by extrapolation.
    pub diff_order: usize,
    /// Fraction of the detector width below which a slit is too narrow to
    /// keep, and the boundary margin for off-detector echelle orders.
    pub frac_ignore: f64,
    /// Legacy gap-closing tolerance in pixels; `None` disables the stage.
    pub max_gap: Option<f64>,
    /// Hard cap on distinct edge group ids per side.
    pub edge_id_limit: u32,
    /// Expected slit count, when known. Restricts detection to the N
    /// strongest candidates per side per row.
    pub number: Option<usize>,
    /// Literal `[left, right]` edge columns per detector (1-based index),
    /// bypassing detection entirely. Empty means detect.
    pub single: Vec<Option<[f64; 2]>>,
    /// Extra `[left, right]` slits appended to the traced set as-is.
    pub user_slits: Vec<[f64; 2]>,
    pub detect: DetectParams,
    pub pca: PcaParams,
}

impl Default for TraceParams {
    fn default() -> Self {
        Self {
            mode: ReduceMode::MultiSlit,
            function: BasisFamily::Legendre,
            poly_order: 3,
            diff_order: 2,
            frac_ignore: 0.01,
            max_gap: None,
            edge_id_limit: 100_000,
            number: None,
            single: Vec::new(),
            user_slits: Vec::new(),
            detect: DetectParams::default(),
            pca: PcaParams::default(),
        }
    }
}

impl TraceParams {
    /// Literal edge pair configured for a 1-based detector index, if any.
    pub fn literal_edges(&self, det: usize) -> Option<[f64; 2]> {
        self.single.get(det.wrapping_sub(1)).copied().flatten()
    }

    /// Detection knobs with `number` folded into the per-row cap.
    pub(crate) fn effective_detect(&self) -> DetectParams {
        let mut detect = self.detect.clone();
        if detect.max_per_row.is_none() {
            detect.max_per_row = self.number;
        }
        detect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize_from_empty_config() {
        let p: TraceParams = serde_json::from_str("{}").unwrap();
        assert_eq!(p.mode, ReduceMode::MultiSlit);
        assert_eq!(p.poly_order, 3);
        assert_eq!(p.diff_order, 2);
        assert!((p.frac_ignore - 0.01).abs() < 1e-12);
        assert_eq!(p.max_gap, None);
        assert_eq!(p.edge_id_limit, 100_000);
        assert_eq!(p.function, BasisFamily::Legendre);
    }

    #[test]
    fn literal_edges_index_per_detector() {
        let p = TraceParams {
            single: vec![None, Some([7.0, 50.0])],
            ..Default::default()
        };
        assert_eq!(p.literal_edges(1), None);
        assert_eq!(p.literal_edges(2), Some([7.0, 50.0]));
        assert_eq!(p.literal_edges(3), None);
    }

    #[test]
    fn number_caps_detection_per_row() {
        let p = TraceParams {
            number: Some(4),
            ..Default::default()
        };
        assert_eq!(p.effective_detect().max_per_row, Some(4));
        let explicit = TraceParams {
            number: Some(4),
            detect: DetectParams {
                max_per_row: Some(2),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(explicit.effective_detect().max_per_row, Some(2));
    }
}
