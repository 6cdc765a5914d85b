use std::path::PathBuf;

use thiserror::Error;

use crate::data::model::Field;

// ---------------------------------------------------------------------------
// Crate-wide error taxonomy
// ---------------------------------------------------------------------------

/// All failure modes surfaced by the viewer core.
///
/// Mixing measurement files with incompatible shapes is a normal user
/// action, so the g2 view catches [`ViewerError::RaggedStack`] and reports
/// it through its outcome flag instead of raising it.
#[derive(Debug, Error)]
pub enum ViewerError {
    /// The working directory could not be listed.
    #[error("cannot read directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A measurement file could not be opened or parsed.
    #[error("cannot open measurement file '{file}': {reason}")]
    Unreadable { file: String, reason: String },

    /// A requested field is absent from a measurement file.
    #[error("field '{field}' missing in '{file}'")]
    MissingField { field: Field, file: String },

    /// A field's array rank does not match the schema declaration.
    #[error("field '{field}' in '{file}' does not have the declared rank ({detail})")]
    RankMismatch {
        field: Field,
        file: String,
        detail: String,
    },

    /// The file's analysis-type tag is not a known value.
    #[error("unknown analysis type '{value}' in '{file}'")]
    UnknownAnalysisType { file: String, value: String },

    /// Aggregation was requested for a file that was never reconciled into
    /// the record cache. Programmer error, not a data condition.
    #[error("file '{file}' is not cached; run reconcile first")]
    NotCached { file: String },

    /// Per-file shapes disagree while stacking a field across files.
    #[error("cannot stack field '{field}' across files: {detail}")]
    RaggedStack { field: Field, detail: String },

    /// An averaging mask does not cover the whole target list, usually a
    /// stale mask kept across a target-set change.
    #[error("mask has {mask} entries but the target list has {files} files")]
    MaskMismatch { mask: usize, files: usize },

    /// Search query shorter than the configured minimum.
    #[error("search query must be at least {min} characters")]
    QueryTooShort { min: usize },

    /// tau-q was requested before any g2 fit results were stored.
    #[error("g2 fitting not ready")]
    FitNotReady,

    /// An operation was asked to run over zero files.
    #[error("no target files selected")]
    EmptySelection,

    /// A long-running operation observed its cancel token.
    #[error("operation cancelled")]
    Cancelled,

    /// Low-level loader failure with file-format context attached.
    #[error(transparent)]
    Load(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ViewerError>;
