use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array1, Array2, Array3};

// ---------------------------------------------------------------------------
// Field – closed schema of per-measurement quantities
// ---------------------------------------------------------------------------

/// Logical field names of an XPCS measurement file.
///
/// This is a closed enumeration rather than a string-keyed path dictionary:
/// every field declares the array rank it must carry, so a malformed file
/// turns into a typed load error instead of a silent shape mismatch further
/// down the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    /// 2-D detector intensity (pixel sum over all frames).
    Saxs2d,
    /// Azimuthally-averaged scattering intensity per static q-bin.
    Saxs1d,
    /// Partial (per-segment) scattering intensity, segments x q-bins.
    SaxsPartial,
    /// Static q-bin values.
    QSta,
    /// Dynamic q-bin values (the g2 q axis).
    QDyn,
    /// Multitau delay levels in frame units.
    Tau,
    /// Exposure period per frame, seconds.
    ExposurePeriod,
    /// Delay time axis in seconds; derived at load time as
    /// `ExposurePeriod * Tau`.
    DelayTime,
    /// Frame-sum intensity trace, rows x frames.
    IntensityTrace,
    /// Intensity auto-correlation, delay-times x q-bins.
    G2,
    /// Standard error of g2, same shape as [`Field::G2`].
    G2Err,
}

/// Expected array rank of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    Scalar,
    One,
    Two,
}

impl Field {
    /// Every schema field, in a stable order.
    pub const ALL: [Field; 11] = [
        Field::Saxs2d,
        Field::Saxs1d,
        Field::SaxsPartial,
        Field::QSta,
        Field::QDyn,
        Field::Tau,
        Field::ExposurePeriod,
        Field::DelayTime,
        Field::IntensityTrace,
        Field::G2,
        Field::G2Err,
    ];

    /// The key under which the field is stored in a measurement document.
    pub fn key(self) -> &'static str {
        match self {
            Field::Saxs2d => "saxs_2d",
            Field::Saxs1d => "saxs_1d",
            Field::SaxsPartial => "saxs_partial",
            Field::QSta => "ql_sta",
            Field::QDyn => "ql_dyn",
            Field::Tau => "tau",
            Field::ExposurePeriod => "t0",
            Field::DelayTime => "t_el",
            Field::IntensityTrace => "int_t",
            Field::G2 => "g2",
            Field::G2Err => "g2_err",
        }
    }

    /// Declared rank; checked at load time.
    pub fn rank(self) -> Rank {
        match self {
            Field::ExposurePeriod => Rank::Scalar,
            Field::Saxs1d | Field::QSta | Field::QDyn | Field::Tau | Field::DelayTime => Rank::One,
            Field::Saxs2d | Field::SaxsPartial | Field::IntensityTrace | Field::G2 | Field::G2Err => {
                Rank::Two
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// FieldData – one field's numeric payload
// ---------------------------------------------------------------------------

/// Numeric payload of a single field inside one file.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldData {
    Scalar(f64),
    One(Array1<f64>),
    Two(Array2<f64>),
}

impl FieldData {
    pub fn rank(&self) -> Rank {
        match self {
            FieldData::Scalar(_) => Rank::Scalar,
            FieldData::One(_) => Rank::One,
            FieldData::Two(_) => Rank::Two,
        }
    }

    /// Shape as a plain vector (empty for scalars); used in error messages.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            FieldData::Scalar(_) => Vec::new(),
            FieldData::One(a) => a.shape().to_vec(),
            FieldData::Two(a) => a.shape().to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// AnalysisType – classification tag of a measurement file
// ---------------------------------------------------------------------------

/// Analysis type recorded in a measurement file. All files of a target set
/// are expected to share one type; a mixed set is reported, not fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisType {
    Multitau,
    Twotime,
}

impl AnalysisType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Multitau" => Some(AnalysisType::Multitau),
            "Twotime" => Some(AnalysisType::Twotime),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AnalysisType::Multitau => "Multitau",
            AnalysisType::Twotime => "Twotime",
        }
    }
}

// ---------------------------------------------------------------------------
// FileRecord – one loaded measurement file
// ---------------------------------------------------------------------------

/// The loaded contents of one measurement file. Immutable once built; the
/// record cache owns it until the file leaves the target set.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub name: String,
    pub analysis_type: AnalysisType,
    fields: BTreeMap<Field, FieldData>,
}

impl FileRecord {
    pub fn new(
        name: impl Into<String>,
        analysis_type: AnalysisType,
        fields: BTreeMap<Field, FieldData>,
    ) -> Self {
        FileRecord {
            name: name.into(),
            analysis_type,
            fields,
        }
    }

    pub fn get(&self, field: Field) -> Option<&FieldData> {
        self.fields.get(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (Field, &FieldData)> {
        self.fields.iter().map(|(f, d)| (*f, d))
    }
}

// ---------------------------------------------------------------------------
// StackedField – one field stacked across an ordered file list
// ---------------------------------------------------------------------------

/// A field stacked along a new leading file axis, in target-list order.
#[derive(Debug, Clone, PartialEq)]
pub enum StackedField {
    /// One scalar per file.
    Scalar(Array1<f64>),
    /// files x n.
    One(Array2<f64>),
    /// files x rows x cols.
    Two(Array3<f64>),
}

impl StackedField {
    pub fn as_scalar(&self) -> Option<&Array1<f64>> {
        match self {
            StackedField::Scalar(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_one(&self) -> Option<&Array2<f64>> {
        match self {
            StackedField::One(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_two(&self) -> Option<&Array3<f64>> {
        match self {
            StackedField::Two(a) => Some(a),
            _ => None,
        }
    }
}

/// Per-field stacked arrays for one retrieval request.
pub type FieldFrame = BTreeMap<Field, StackedField>;
