//! Middlebury `.flo` optical-flow files.
//!
//! Layout (little-endian): `f32` magic `202021.25`, `i32` width, `i32`
//! height, then `width * height * 2` `f32` values, `(u, v)` per pixel in
//! row-major order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::data::model::FlowField;
use crate::error::{EngineError, Result};

pub const FLO_MAGIC: f32 = 202021.25;
pub const FLO_EXTENSION: &str = "flo";

/// Largest side accepted when decoding, guards against corrupt headers.
const MAX_SIDE: i32 = 1 << 15;

pub fn read_flo(path: &Path) -> Result<FlowField> {
    let file = File::open(path).map_err(|e| EngineError::unreadable(path, e))?;
    decode_flo(BufReader::new(file)).map_err(|err| match err {
        FloError::Format(reason) => EngineError::InvalidFlowFormat {
            path: path.to_path_buf(),
            reason,
        },
        FloError::Io(e) => EngineError::unreadable(path, e),
    })
}

pub fn write_flo(path: &Path, flow: &FlowField) -> Result<()> {
    let file = File::create(path).map_err(|e| EngineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    encode_flo(&mut writer, flow).map_err(|e| EngineError::io(path, e))?;
    writer.flush().map_err(|e| EngineError::io(path, e))
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum FloError {
    Format(String),
    Io(std::io::Error),
}

impl From<std::io::Error> for FloError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FloError::Format("file is truncated".into())
        } else {
            FloError::Io(e)
        }
    }
}

fn read_4<R: Read>(reader: &mut R) -> std::result::Result<[u8; 4], FloError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn decode_flo<R: Read>(mut reader: R) -> std::result::Result<FlowField, FloError> {
    let magic = f32::from_le_bytes(read_4(&mut reader)?);
    if magic != FLO_MAGIC {
        return Err(FloError::Format(format!("bad magic {magic}")));
    }
    let width = i32::from_le_bytes(read_4(&mut reader)?);
    let height = i32::from_le_bytes(read_4(&mut reader)?);
    if width <= 0 || height <= 0 || width > MAX_SIDE || height > MAX_SIDE {
        return Err(FloError::Format(format!("bad dimensions {width}x{height}")));
    }

    let (width, height) = (width as usize, height as usize);
    let mut bytes = vec![0u8; width * height * 2 * 4];
    reader.read_exact(&mut bytes)?;
    let data = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    FlowField::new(width, height, data).map_err(|e| FloError::Format(e.to_string()))
}

fn encode_flo<W: Write>(writer: &mut W, flow: &FlowField) -> std::io::Result<()> {
    writer.write_all(&FLO_MAGIC.to_le_bytes())?;
    writer.write_all(&(flow.width() as i32).to_le_bytes())?;
    writer.write_all(&(flow.height() as i32).to_le_bytes())?;
    for value in flow.data() {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}
