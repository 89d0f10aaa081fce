use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, Float32Array, Float64Array, LargeListArray, ListArray};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::AbsorptionSpectrum;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a gas absorption spectrum from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – `x` (wavenumber) and `y` (coefficient) list columns, first row
/// * `.json`    – `{ "wavenumber": [...], "coef": [...] }` or `[{ "x": [...], "y": [...] }]`
/// * `.csv`     – one sample per row with `wavenumber`,`coef` columns, or
///                `x`,`y` columns holding semicolon-separated floats
pub fn load_spectrum(path: &Path) -> Result<AbsorptionSpectrum> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let (wavenumber, coefficient) = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path)?,
        "json" => load_json(path)?,
        "csv" => load_csv(path)?,
        other => bail!("Unsupported spectrum file extension: .{other}"),
    };

    let spectrum = AbsorptionSpectrum::new(wavenumber, coefficient)
        .with_context(|| format!("validating spectrum from {}", path.display()))?;
    log::debug!(
        "loaded {} spectral samples from {}",
        spectrum.len(),
        path.display()
    );
    Ok(spectrum)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Accepted JSON layouts:
///
/// ```json
/// { "wavenumber": [2900.0, 2901.0, ...], "coef": [0.12, 0.14, ...] }
/// ```
///
/// or the records-oriented export also used for spectral datasets, where the
/// first record supplies the spectrum:
///
/// ```json
/// [ { "x": [2900.0, ...], "y": [0.12, ...], "gas": "CH4" } ]
/// ```
fn load_json(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let obj = match &root {
        JsonValue::Object(obj) => obj,
        JsonValue::Array(records) => records
            .first()
            .and_then(|r| r.as_object())
            .context("Expected a non-empty array of JSON objects")?,
        _ => bail!("Expected a JSON object or array"),
    };

    let (x_key, y_key) = if obj.contains_key("wavenumber") {
        ("wavenumber", "coef")
    } else {
        ("x", "y")
    };
    let x = json_array_to_f64(obj.get(x_key), x_key)?;
    let y = json_array_to_f64(obj.get(y_key), y_key)?;

    if x.len() != y.len() {
        bail!("{x_key} has {} values but {y_key} has {}", x.len(), y.len());
    }
    Ok((x, y))
}

fn json_array_to_f64(val: Option<&JsonValue>, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("{col}[{j}]: not a number"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// Two layouts are recognised from the header row:
/// * `wavenumber`,`coef` – one spectral sample per row
/// * `x`,`y` – the first data row holds semicolon-separated floats,
///   `"2900.0;2901.0"`, `"0.12;0.14"`
fn load_csv(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    let position = |name: &str| headers.iter().position(|h| h == name);

    if let (Some(nu_idx), Some(coef_idx)) = (position("wavenumber"), position("coef")) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for (row_no, result) in reader.records().enumerate() {
            let record = result.with_context(|| format!("CSV row {row_no}"))?;
            x.push(parse_cell(record.get(nu_idx), row_no, "wavenumber")?);
            y.push(parse_cell(record.get(coef_idx), row_no, "coef")?);
        }
        return Ok((x, y));
    }

    let x_idx = position("x").context("CSV needs 'wavenumber'/'coef' or 'x'/'y' columns")?;
    let y_idx = position("y").context("CSV missing 'y' column")?;

    let record = reader
        .records()
        .next()
        .context("CSV has no data row")?
        .context("CSV row 0")?;
    let x = parse_semicolon_floats(record.get(x_idx).unwrap_or(""), 0, "x")?;
    let y = parse_semicolon_floats(record.get(y_idx).unwrap_or(""), 0, "y")?;

    if x.len() != y.len() {
        bail!("CSV row 0: x has {} values but y has {}", x.len(), y.len());
    }
    Ok((x, y))
}

fn parse_cell(cell: Option<&str>, row: usize, col: &str) -> Result<f64> {
    let text = cell.unwrap_or("").trim();
    text.parse::<f64>()
        .with_context(|| format!("Row {row}, {col}: '{text}' is not a number"))
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load the first row of a Parquet file with `x`/`y` list columns.
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`), and with `generate_sample`.
fn load_parquet(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        if batch.num_rows() == 0 {
            continue;
        }
        let schema = batch.schema();

        let x_idx = schema
            .index_of("x")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'x' column"))?;
        let y_idx = schema
            .index_of("y")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'y' column"))?;

        let x = extract_f64_list(batch.column(x_idx), 0).context("Row 0: failed to read 'x'")?;
        let y = extract_f64_list(batch.column(y_idx), 0).context("Row 0: failed to read 'y'")?;

        if x.len() != y.len() {
            bail!("Row 0: x has {} values but y has {}", x.len(), y.len());
        }
        return Ok((x, y));
    }

    bail!("Parquet file contains no rows")
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            list_arr.value(row)
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            list_arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    // Nulls inside a spectrum are not interpolated over; reject them.
    if values_array.null_count() > 0 {
        bail!("list contains {} null values", values_array.null_count());
    }

    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.values().to_vec())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.values().iter().map(|&v| v as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("leak-quant-loader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn csv_columnar_layout() {
        let path = scratch_file("columnar.csv", "wavenumber,coef\n2900,0.5\n3000,0.25\n");
        let spectrum = load_spectrum(&path).unwrap();
        assert_eq!(spectrum.wavenumber, vec![2900.0, 3000.0]);
        assert_eq!(spectrum.coefficient, vec![0.5, 0.25]);
    }

    #[test]
    fn csv_semicolon_layout() {
        let path = scratch_file("lists.csv", "x,y,gas\n\"2900;3000\",\"0.5;0.25\",CH4\n");
        let spectrum = load_spectrum(&path).unwrap();
        assert_eq!(spectrum.len(), 2);
        assert_eq!(spectrum.coefficient[1], 0.25);
    }

    #[test]
    fn json_object_and_records_layouts() {
        let object = scratch_file("object.json", r#"{"wavenumber":[2900,3000],"coef":[1,2]}"#);
        assert_eq!(load_spectrum(&object).unwrap().coefficient, vec![1.0, 2.0]);

        let records = scratch_file("records.json", r#"[{"x":[2900],"y":[3.5],"gas":"CH4"}]"#);
        assert_eq!(load_spectrum(&records).unwrap().coefficient, vec![3.5]);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let path = scratch_file("bad.json", r#"{"wavenumber":[2900,3000],"coef":[1]}"#);
        assert!(load_spectrum(&path).is_err());
    }

    #[test]
    fn parquet_first_row_lists() {
        use arrow::array::{Float64Builder, ListBuilder};
        use arrow::datatypes::{Field, Schema};
        use arrow::record_batch::RecordBatch;
        use parquet::arrow::ArrowWriter;

        let mut x = ListBuilder::new(Float64Builder::new());
        x.values().append_slice(&[3100.0, 3000.0, 2900.0]);
        x.append(true);
        let mut y = ListBuilder::new(Float64Builder::new());
        y.values().append_slice(&[0.1, 0.2, 0.3]);
        y.append(true);

        let item = Arc::new(Field::new("item", DataType::Float64, true));
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::List(item.clone()), false),
            Field::new("y", DataType::List(item), false),
        ]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(x.finish()), Arc::new(y.finish())])
                .unwrap();
        let path = scratch_file("spectrum.parquet", "");
        let mut writer = ArrowWriter::try_new(std::fs::File::create(&path).unwrap(), schema, None)
            .unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let spectrum = load_spectrum(&path).unwrap();
        assert_eq!(spectrum.wavenumber, vec![3100.0, 3000.0, 2900.0]);
        assert_eq!(spectrum.coefficient, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let path = scratch_file("spectrum.npz", "");
        assert!(load_spectrum(&path).is_err());
    }
}
