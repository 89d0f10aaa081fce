//! Single-channel TIFF rasters: foreground frames in, CL maps out.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::ColorType;

use crate::data::model::ScalarMap;
use crate::error::{EngineError, Result};

pub const TIFF_EXTENSIONS: [&str; 2] = ["tif", "tiff"];

/// Whether `path` carries a `.tif`/`.tiff` extension (case-insensitive).
pub fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TIFF_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Read a grayscale TIFF as `f32` samples.
///
/// Unsigned integer and float sample formats are widened to `f32`.
/// Multi-channel or signed rasters are rejected rather than coerced.
pub fn read_scalar_tiff(path: &Path) -> Result<ScalarMap> {
    let file = File::open(path).map_err(|e| EngineError::unreadable(path, e))?;
    let mut decoder =
        Decoder::new(BufReader::new(file)).map_err(|e| EngineError::unreadable(path, e))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| EngineError::unreadable(path, e))?;
    let color_type = decoder
        .colortype()
        .map_err(|e| EngineError::unreadable(path, e))?;
    if !matches!(color_type, ColorType::Gray(_)) {
        return Err(EngineError::unreadable(
            path,
            format!("expected a single-channel raster, found {color_type:?}"),
        ));
    }

    let data: Vec<f32> = match decoder
        .read_image()
        .map_err(|e| EngineError::unreadable(path, e))?
    {
        DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        _ => {
            return Err(EngineError::unreadable(
                path,
                "unsupported sample format (signed or 64-bit integer)",
            ))
        }
    };

    ScalarMap::new(width as usize, height as usize, data)
        .map_err(|e| EngineError::unreadable(path, e))
}

/// Write a raster as a 32-bit float grayscale TIFF. Overwrites `path`.
pub fn write_scalar_tiff(path: &Path, map: &ScalarMap) -> Result<()> {
    let file = File::create(path).map_err(|e| EngineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    TiffEncoder::new(&mut writer)
        .and_then(|mut encoder| {
            encoder.write_image::<colortype::Gray32Float>(
                map.width() as u32,
                map.height() as u32,
                map.data(),
            )
        })
        .map_err(|e| EngineError::unreadable(path, e))?;
    writer.flush().map_err(|e| EngineError::io(path, e))
}
