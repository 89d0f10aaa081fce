use image::Luma;
use imageproc::edges::canny;
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::{Deserialize, Serialize};

use crate::color::{flow_to_rgb, to_luma};
use crate::data::model::{ClMap, FlowField};
use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Hysteresis thresholds of the edge detector run on the rendered flow.
const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;

/// Per-pixel validity thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// A CL pixel counts as plume when strictly above this (ppm·m).
    pub min_cl: f32,
    /// A flow pixel counts as moving when its magnitude is strictly above this (px).
    pub min_flow_magnitude: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_cl: 10.0,
            min_flow_magnitude: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Fragmentation
// ---------------------------------------------------------------------------

/// How broken up the flow field looks.
///
/// The field is rendered to its colour coding, edge-detected, and the edge
/// pixels grouped into 8-connected components. With `n` components and the
/// largest holding fraction `f` of all edge pixels the score is
/// `(n - 1) · (1 - f)`: a single coherent structure scores 0, many similar
/// sized fragments score high.
///
/// `imageproc`'s Canny smooths with a σ = 1.4 Gaussian before taking
/// gradients, which OpenCV's does not. Scores run lower than OpenCV-based
/// ones on noisy fields, so a threshold tuned there may need lowering.
pub fn fragmentation(flow: &FlowField) -> f64 {
    let gray = to_luma(&flow_to_rgb(flow));
    let edges = canny(&gray, CANNY_LOW, CANNY_HIGH);
    let labels = connected_components(&edges, Connectivity::Eight, Luma([0u8]));

    let mut areas: Vec<u64> = Vec::new();
    for pixel in labels.pixels() {
        let label = pixel.0[0] as usize;
        if label == 0 {
            continue;
        }
        if areas.len() < label {
            areas.resize(label, 0);
        }
        areas[label - 1] += 1;
    }
    fragmentation_score(&areas)
}

/// `(n - 1) · (1 - largest / total)` over component areas.
pub fn fragmentation_score(areas: &[u64]) -> f64 {
    let total: u64 = areas.iter().sum();
    if areas.len() <= 1 || total == 0 {
        return 0.0;
    }
    let largest = areas.iter().copied().max().unwrap_or(0);
    (areas.len() - 1) as f64 * (1.0 - largest as f64 / total as f64)
}

// ---------------------------------------------------------------------------
// Frame metrics
// ---------------------------------------------------------------------------

/// Agreement between the plume seen in the CL map and the motion in the flow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameQualityMetrics {
    pub fragmentation: f64,
    /// Fraction of CL pixels above `min_cl`.
    pub cl_valid_ratio: f64,
    /// Fraction of flow pixels with magnitude above `min_flow_magnitude`.
    pub flow_valid_ratio: f64,
    /// Intersection over union of the two validity masks.
    pub iou: f64,
}

impl FrameQualityMetrics {
    /// Evaluate all metrics for one CL map / flow field pair.
    pub fn measure(cl: &ClMap, flow: &FlowField, thresholds: &QualityThresholds) -> Result<Self> {
        let mut metrics = Self::coverage(cl, flow, thresholds)?;
        metrics.fragmentation = fragmentation(flow);
        Ok(metrics)
    }

    /// Metrics of a frame whose CL map is unavailable: only the flow
    /// coverage is known, the CL ratio and IoU are 0.
    pub fn flow_only(flow: &FlowField, thresholds: &QualityThresholds) -> Self {
        let moving = flow
            .vectors()
            .filter(|&(u, v)| u.hypot(v) > thresholds.min_flow_magnitude)
            .count();
        let total = flow.width() * flow.height();
        Self {
            fragmentation: 0.0,
            cl_valid_ratio: 0.0,
            flow_valid_ratio: if total > 0 {
                moving as f64 / total as f64
            } else {
                0.0
            },
            iou: 0.0,
        }
    }

    /// Validity ratios and IoU, leaving `fragmentation` at 0.
    pub fn coverage(cl: &ClMap, flow: &FlowField, thresholds: &QualityThresholds) -> Result<Self> {
        if !flow.matches_shape(cl) {
            return Err(EngineError::InvalidInput(format!(
                "CL map is {}x{} but flow field is {}x{}",
                cl.width(),
                cl.height(),
                flow.width(),
                flow.height()
            )));
        }

        let (mut cl_valid, mut flow_valid, mut both, mut either) = (0usize, 0usize, 0usize, 0usize);
        for (&c, (u, v)) in cl.data().iter().zip(flow.vectors()) {
            let plume = c > thresholds.min_cl;
            let moving = u.hypot(v) > thresholds.min_flow_magnitude;
            cl_valid += plume as usize;
            flow_valid += moving as usize;
            both += (plume && moving) as usize;
            either += (plume || moving) as usize;
        }

        let total = cl.data().len() as f64;
        Ok(Self {
            fragmentation: 0.0,
            cl_valid_ratio: cl_valid as f64 / total,
            flow_valid_ratio: flow_valid as f64 / total,
            iou: if either > 0 {
                both as f64 / either as f64
            } else {
                0.0
            },
        })
    }
}
