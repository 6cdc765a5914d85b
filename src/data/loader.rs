use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::debug;
use ndarray::{Array1, Array2};
use serde_json::{Map, Value as JsonValue};

use super::model::{AnalysisType, Field, FieldData, FileRecord, Rank};
use crate::error::{Result, ViewerError};

// ---------------------------------------------------------------------------
// Loader / writer contracts
// ---------------------------------------------------------------------------

/// Read side of the measurement store: maps `(fields, file_name)` to a
/// loaded [`FileRecord`]. The cache and the aggregation engine only ever see
/// this trait, so the on-disk container format stays swappable.
pub trait RecordLoader {
    /// Load the requested fields of one file. Fails with a distinguishable
    /// error when the file cannot be opened, a field is absent, or a field's
    /// rank contradicts the schema.
    fn load(&self, fields: &[Field], file: &str) -> Result<FileRecord>;

    /// Read only the analysis-type tag of one file.
    fn analysis_type(&self, file: &str) -> Result<AnalysisType>;
}

/// Write side, used by averaging: the non-data structure of `origin` is
/// copied verbatim to `dest`, then the given fields are overwritten.
pub trait RecordWriter {
    fn write_fields(
        &self,
        origin: &Path,
        dest: &Path,
        values: &BTreeMap<Field, FieldData>,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// JSON-backed store
// ---------------------------------------------------------------------------

/// Measurement store reading one JSON document per file, rooted at a working
/// directory.
///
/// Expected document schema:
///
/// ```json
/// {
///   "analysis_type": "Multitau",
///   "fields": {
///     "t0":     0.001,
///     "tau":    [1.0, 2.0, 4.0],
///     "ql_dyn": [0.002, 0.004, 0.006],
///     "g2":     [[1.3, 1.29, 1.28], ...]
///   }
/// }
/// ```
///
/// `t_el` (the delay-time axis in seconds) is synthesized as `t0 * tau` when
/// the document does not carry it explicitly; averaged result files do carry
/// it.
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        JsonStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_document(&self, file: &str) -> Result<Map<String, JsonValue>> {
        let path = self.root.join(file);
        read_document_at(&path).map_err(|e| ViewerError::Unreadable {
            file: file.to_string(),
            reason: format!("{e:#}"),
        })
    }
}

fn read_document_at(path: &Path) -> anyhow::Result<Map<String, JsonValue>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;
    match root {
        JsonValue::Object(map) => Ok(map),
        _ => anyhow::bail!("expected top-level JSON object"),
    }
}

fn field_table<'a>(
    doc: &'a Map<String, JsonValue>,
    file: &str,
) -> Result<&'a Map<String, JsonValue>> {
    doc.get("fields")
        .and_then(|v| v.as_object())
        .ok_or_else(|| ViewerError::Unreadable {
            file: file.to_string(),
            reason: "missing 'fields' object".into(),
        })
}

impl RecordLoader for JsonStore {
    fn load(&self, fields: &[Field], file: &str) -> Result<FileRecord> {
        let doc = self.read_document(file)?;
        let analysis_type = parse_analysis_type(&doc, file)?;
        let table = field_table(&doc, file)?;

        let mut out = BTreeMap::new();
        for &field in fields {
            let data = match table.get(field.key()) {
                Some(value) => decode_field(field, value, file)?,
                // t_el is usually absent from raw measurement files.
                None if field == Field::DelayTime => derive_delay_time(table, file)?,
                None => {
                    return Err(ViewerError::MissingField {
                        field,
                        file: file.to_string(),
                    })
                }
            };
            out.insert(field, data);
        }
        debug!("loaded {} fields from '{}'", out.len(), file);
        Ok(FileRecord::new(file, analysis_type, out))
    }

    fn analysis_type(&self, file: &str) -> Result<AnalysisType> {
        let doc = self.read_document(file)?;
        parse_analysis_type(&doc, file)
    }
}

impl RecordWriter for JsonStore {
    fn write_fields(
        &self,
        origin: &Path,
        dest: &Path,
        values: &BTreeMap<Field, FieldData>,
    ) -> Result<()> {
        std::fs::copy(origin, dest).map_err(|e| ViewerError::Unreadable {
            file: origin.display().to_string(),
            reason: format!("copying template: {e}"),
        })?;

        let mut doc = read_document_at(dest).map_err(|e| ViewerError::Unreadable {
            file: dest.display().to_string(),
            reason: format!("{e:#}"),
        })?;

        let table = doc
            .entry("fields".to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        let table = table.as_object_mut().ok_or_else(|| ViewerError::Unreadable {
            file: dest.display().to_string(),
            reason: "'fields' is not an object".into(),
        })?;
        for (field, data) in values {
            table.insert(field.key().to_string(), encode_field(data));
        }

        let text = serde_json::to_string_pretty(&JsonValue::Object(doc))
            .context("serializing averaged document")?;
        std::fs::write(dest, text).map_err(|e| ViewerError::Unreadable {
            file: dest.display().to_string(),
            reason: format!("writing: {e}"),
        })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Field decoding / encoding
// ---------------------------------------------------------------------------

fn parse_analysis_type(doc: &Map<String, JsonValue>, file: &str) -> Result<AnalysisType> {
    let value = doc
        .get("analysis_type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ViewerError::Unreadable {
            file: file.to_string(),
            reason: "missing 'analysis_type' string".into(),
        })?;
    AnalysisType::parse(value).ok_or_else(|| ViewerError::UnknownAnalysisType {
        file: file.to_string(),
        value: value.to_string(),
    })
}

fn decode_field(field: Field, value: &JsonValue, file: &str) -> Result<FieldData> {
    let mismatch = |detail: String| ViewerError::RankMismatch {
        field,
        file: file.to_string(),
        detail,
    };

    match field.rank() {
        Rank::Scalar => value
            .as_f64()
            .map(FieldData::Scalar)
            .ok_or_else(|| mismatch("expected a number".into())),
        Rank::One => {
            let v = decode_f64_row(value).map_err(|e| mismatch(e))?;
            Ok(FieldData::One(Array1::from(v)))
        }
        Rank::Two => {
            let rows = value
                .as_array()
                .ok_or_else(|| mismatch("expected an array of rows".into()))?;
            let mut flat = Vec::new();
            let mut width = None;
            for (i, row) in rows.iter().enumerate() {
                let row = decode_f64_row(row).map_err(|e| mismatch(format!("row {i}: {e}")))?;
                match width {
                    None => width = Some(row.len()),
                    Some(w) if w != row.len() => {
                        return Err(mismatch(format!(
                            "row {i} has {} values, expected {w}",
                            row.len()
                        )))
                    }
                    _ => {}
                }
                flat.extend(row);
            }
            let shape = (rows.len(), width.unwrap_or(0));
            let arr = Array2::from_shape_vec(shape, flat)
                .map_err(|e| mismatch(e.to_string()))?;
            Ok(FieldData::Two(arr))
        }
    }
}

fn decode_f64_row(value: &JsonValue) -> std::result::Result<Vec<f64>, String> {
    let arr = value.as_array().ok_or("expected an array of numbers")?;
    arr.iter()
        .enumerate()
        .map(|(j, v)| v.as_f64().ok_or_else(|| format!("element {j} is not a number")))
        .collect()
}

/// `t_el = t0 * tau`, mirroring how the measurement pipeline stores delay
/// levels in frame units.
fn derive_delay_time(table: &Map<String, JsonValue>, file: &str) -> Result<FieldData> {
    let t0 = match table.get(Field::ExposurePeriod.key()) {
        Some(v) => match decode_field(Field::ExposurePeriod, v, file)? {
            FieldData::Scalar(x) => x,
            _ => unreachable!("t0 decodes as scalar"),
        },
        None => {
            return Err(ViewerError::MissingField {
                field: Field::ExposurePeriod,
                file: file.to_string(),
            })
        }
    };
    let tau = match table.get(Field::Tau.key()) {
        Some(v) => match decode_field(Field::Tau, v, file)? {
            FieldData::One(a) => a,
            _ => unreachable!("tau decodes as rank one"),
        },
        None => {
            return Err(ViewerError::MissingField {
                field: Field::Tau,
                file: file.to_string(),
            })
        }
    };
    Ok(FieldData::One(tau * t0))
}

fn encode_field(data: &FieldData) -> JsonValue {
    match data {
        FieldData::Scalar(x) => JsonValue::from(*x),
        FieldData::One(a) => JsonValue::from(a.to_vec()),
        FieldData::Two(a) => JsonValue::from(
            a.rows()
                .into_iter()
                .map(|r| r.to_vec())
                .collect::<Vec<Vec<f64>>>(),
        ),
    }
}
