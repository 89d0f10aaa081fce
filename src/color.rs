use std::path::Path;

use image::{GrayImage, Luma, Rgb, RgbImage};
use palette::{Hsv, IntoColor, Srgb};

use crate::data::model::FlowField;
use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Flow field → colour image
// ---------------------------------------------------------------------------

/// Render a flow field with the usual HSV coding: hue follows the vector
/// angle, value the magnitude min-max normalised over the frame, full
/// saturation.
///
/// Hue and value are quantised to 8 bits (hue in 2° steps) before the
/// conversion, matching an 8-bit HSV image.
pub fn flow_to_rgb(flow: &FlowField) -> RgbImage {
    let magnitudes = flow.magnitudes();
    let (min, max) = magnitudes
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &m| {
            (lo.min(m), hi.max(m))
        });
    let range = max - min;
    let scale = if range > f32::EPSILON { 255.0 / range } else { 0.0 };

    let mut img = RgbImage::new(flow.width() as u32, flow.height() as u32);
    for (i, ((u, v), &mag)) in flow.vectors().zip(&magnitudes).enumerate() {
        let mut angle = v.atan2(u).to_degrees();
        if angle < 0.0 {
            angle += 360.0;
        }
        let hue_code = (angle / 2.0).floor().min(179.0);
        let value_code = ((mag - min) * scale).round().clamp(0.0, 255.0);

        let hsv = Hsv::new(hue_code * 2.0, 1.0, value_code / 255.0);
        let rgb: Srgb = hsv.into_color();
        let x = (i % flow.width()) as u32;
        let y = (i / flow.width()) as u32;
        img.put_pixel(
            x,
            y,
            Rgb([
                (rgb.red * 255.0).round() as u8,
                (rgb.green * 255.0).round() as u8,
                (rgb.blue * 255.0).round() as u8,
            ]),
        );
    }
    img
}

/// ITU-R 601 luma of an RGB image.
pub fn to_luma(img: &RgbImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let Rgb([r, g, b]) = *img.get_pixel(x, y);
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// Save the colour coding of `flow` as a PNG for inspection.
pub fn save_flow_png(flow: &FlowField, path: &Path) -> Result<()> {
    flow_to_rgb(flow)
        .save(path)
        .map_err(|e| EngineError::unreadable(path, e))
}
