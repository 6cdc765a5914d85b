//! Data layer: the field schema, per-file records, and the loader contract.
//!
//! Architecture:
//! ```text
//!  measurement files (one JSON document each)
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  loader   │  (fields, file) → FileRecord, rank-checked
//!   └──────────┘
//!        │
//!        ▼
//!   ┌──────────────┐
//!   │  FileRecord   │  Field → FieldData, immutable
//!   └──────────────┘
//!        │
//!        ▼
//!   ┌──────────────┐
//!   │  RecordCache  │  stack per-field across the target set
//!   └──────────────┘
//! ```

pub mod loader;
pub mod model;
