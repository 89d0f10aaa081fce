use serde::{Deserialize, Serialize};

use crate::data::model::{ClMap, FlowField};
use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Control boxes
// ---------------------------------------------------------------------------

/// Square control window centred on `(row, col)` spanning `half_width`
/// pixels to each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluxBox {
    pub row: i64,
    pub col: i64,
    pub half_width: i64,
}

impl FluxBox {
    pub const fn new(row: i64, col: i64, half_width: i64) -> Self {
        Self {
            row,
            col,
            half_width,
        }
    }

    /// `(top, bottom, left, right)` clipped to a `width`×`height` image.
    /// Rows/columns `top..bottom` and `left..right` are the edge spans.
    fn bounds(&self, width: usize, height: usize) -> (usize, usize, usize, usize) {
        let clip = |v: i64, len: usize| v.clamp(0, len as i64 - 1) as usize;
        let top = clip(self.row - self.half_width, height);
        let bottom = clip(self.row + self.half_width, height);
        let left = clip(self.col - self.half_width, width);
        let right = clip(self.col + self.half_width, width);
        (top, bottom, left, right)
    }
}

/// Three nested boxes around the release point; averaging them damps the
/// sensitivity to where exactly the boundary falls.
pub fn default_boxes() -> Vec<FluxBox> {
    vec![
        FluxBox::new(50, 45, 31),
        FluxBox::new(50, 45, 32),
        FluxBox::new(50, 45, 33),
    ]
}

// ---------------------------------------------------------------------------
// Flux estimation
// ---------------------------------------------------------------------------

/// Physical scale of one frame pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FluxGeometry {
    /// Edge length of one pixel on the plume plane (m).
    pub pixel_size_m: f64,
    /// Time between the two frames of a flow pair (s).
    pub frame_interval_s: f64,
    /// Areal mass density per unit column density (kg·m⁻² per ppm·m).
    pub ppm_to_kg_m2: f64,
}

impl Default for FluxGeometry {
    fn default() -> Self {
        Self {
            pixel_size_m: 0.002,
            frame_interval_s: 0.04,
            ppm_to_kg_m2: 0.7142857e-6,
        }
    }
}

/// Net mass flux (kg/h) leaving the control boxes.
///
/// Per pixel, `ρ = CL · ppm_to_kg_m2` and the displacement is turned into
/// velocity, giving `flux = ρ · v · pixel_size` along each axis. Each box
/// sums the outward flux over its four edges; the frame value is the
/// absolute mean over boxes, in kg/h.
///
/// Returns `Ok(None)` when `boxes` is empty.
pub fn frame_flux(
    cl: &ClMap,
    flow: &FlowField,
    geometry: &FluxGeometry,
    boxes: &[FluxBox],
) -> Result<Option<f64>> {
    if !flow.matches_shape(cl) {
        return Err(EngineError::InvalidInput(format!(
            "CL map is {}x{} but flow field is {}x{}",
            cl.width(),
            cl.height(),
            flow.width(),
            flow.height()
        )));
    }
    if boxes.is_empty() {
        return Ok(None);
    }

    let velocity_scale = geometry.pixel_size_m / geometry.frame_interval_s;
    let flux_at = |row: usize, col: usize| -> (f64, f64) {
        let rho = cl.get(row, col) as f64 * geometry.ppm_to_kg_m2;
        let (u, v) = flow.vector(row, col);
        (
            rho * u as f64 * velocity_scale * geometry.pixel_size_m,
            rho * v as f64 * velocity_scale * geometry.pixel_size_m,
        )
    };

    let (width, height) = (cl.width(), cl.height());
    let box_totals: Vec<f64> = boxes
        .iter()
        .map(|b| {
            let (top, bottom, left, right) = b.bounds(width, height);
            let right_edge: f64 = (top..bottom).map(|r| flux_at(r, right).0).sum();
            let left_edge: f64 = (top..bottom).map(|r| -flux_at(r, left).0).sum();
            let top_edge: f64 = (left..right).map(|c| -flux_at(top, c).1).sum();
            let bottom_edge: f64 = (left..right).map(|c| flux_at(bottom, c).1).sum();
            right_edge + left_edge + top_edge + bottom_edge
        })
        .collect();

    let mean = box_totals.iter().sum::<f64>() / box_totals.len() as f64;
    Ok(Some(mean.abs() * 3600.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn geometry() -> FluxGeometry {
        FluxGeometry {
            pixel_size_m: 0.01,
            frame_interval_s: 0.1,
            ppm_to_kg_m2: 1e-3,
        }
    }

    #[test]
    fn zero_flow_gives_zero_flux() {
        let cl = ClMap::filled(100, 100, 5000.0).unwrap();
        let flow = FlowField::uniform(100, 100, 0.0, 0.0).unwrap();
        let q = frame_flux(&cl, &flow, &FluxGeometry::default(), &default_boxes()).unwrap();
        assert_eq!(q, Some(0.0));
    }

    #[test]
    fn uniform_field_through_uniform_plume_cancels() {
        // Whatever enters on the left leaves on the right.
        let cl = ClMap::filled(20, 20, 100.0).unwrap();
        let flow = FlowField::uniform(20, 20, 1.5, -0.5).unwrap();
        let q = frame_flux(&cl, &flow, &geometry(), &[FluxBox::new(10, 10, 4)])
            .unwrap()
            .unwrap();
        assert!(q.abs() < 1e-12);
    }

    #[test]
    fn plume_leaving_through_right_edge() {
        // Gas only on and beyond the right edge (col >= 14), moving +x.
        let width = 20;
        let data: Vec<f32> = (0..20 * width)
            .map(|i| if i % width >= 14 { 100.0 } else { 0.0 })
            .collect();
        let cl = ClMap::new(width, 20, data).unwrap();
        let flow = FlowField::uniform(width, 20, 2.0, 0.0).unwrap();
        let b = FluxBox::new(10, 10, 4);

        let q = frame_flux(&cl, &flow, &geometry(), &[b]).unwrap().unwrap();
        // Right edge spans rows 6..14 (8 pixels).
        let per_pixel = 100.0 * 1e-3 * (2.0 * 0.01 / 0.1) * 0.01;
        assert_relative_eq!(q, 8.0 * per_pixel * 3600.0, max_relative = 1e-9);
    }

    #[test]
    fn boxes_are_clipped_to_the_image() {
        let cl = ClMap::filled(10, 10, 1.0).unwrap();
        let flow = FlowField::uniform(10, 10, 1.0, 1.0).unwrap();
        let q = frame_flux(&cl, &flow, &geometry(), &[FluxBox::new(0, 0, 50)]).unwrap();
        assert!(q.is_some());
    }

    #[test]
    fn no_boxes_no_flux() {
        let cl = ClMap::filled(4, 4, 1.0).unwrap();
        let flow = FlowField::uniform(4, 4, 1.0, 0.0).unwrap();
        assert_eq!(frame_flux(&cl, &flow, &geometry(), &[]).unwrap(), None);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let cl = ClMap::filled(4, 4, 1.0).unwrap();
        let flow = FlowField::uniform(5, 4, 1.0, 0.0).unwrap();
        assert!(frame_flux(&cl, &flow, &geometry(), &default_boxes()).is_err());
    }
}
