use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info};
use ndarray::Axis;

use crate::cache::RecordCache;
use crate::data::loader::RecordWriter;
use crate::data::model::{Field, FieldData, StackedField};
use crate::error::{Result, ViewerError};

/// Chunk size used when the caller has no preference.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

// ---------------------------------------------------------------------------
// AverageAccumulator
// ---------------------------------------------------------------------------

/// Running per-field sums plus the count of contributing files.
///
/// Invariant: `finish()` equals the arithmetic mean over every contributing
/// file no matter how the inputs were chunked; chunking only changes the
/// floating-point summation order.
#[derive(Debug, Default)]
pub struct AverageAccumulator {
    sums: BTreeMap<Field, FieldData>,
    count: usize,
}

impl AverageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one stacked chunk in; `contributing` is the number of files that
    /// made it into the stack (mask-true files of this chunk).
    pub fn push_chunk(
        &mut self,
        frame: &BTreeMap<Field, StackedField>,
        contributing: usize,
    ) -> Result<()> {
        for (&field, stacked) in frame {
            let partial = match stacked {
                StackedField::Scalar(a) => FieldData::Scalar(a.sum()),
                StackedField::One(a) => FieldData::One(a.sum_axis(Axis(0))),
                StackedField::Two(a) => FieldData::Two(a.sum_axis(Axis(0))),
            };
            match self.sums.get_mut(&field) {
                None => {
                    self.sums.insert(field, partial);
                }
                Some(sum) => add_in_place(sum, &partial, field)?,
            }
        }
        self.count += contributing;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Divide the sums by the contributing count.
    pub fn finish(mut self) -> Result<BTreeMap<Field, FieldData>> {
        if self.count == 0 {
            return Err(ViewerError::EmptySelection);
        }
        let inv = 1.0 / self.count as f64;
        for data in self.sums.values_mut() {
            scale_in_place(data, inv);
        }
        Ok(self.sums)
    }
}

fn add_in_place(sum: &mut FieldData, inc: &FieldData, field: Field) -> Result<()> {
    let (sum_shape, inc_shape) = (sum.shape(), inc.shape());
    match (sum, inc) {
        (FieldData::Scalar(s), FieldData::Scalar(x)) => {
            *s += x;
            Ok(())
        }
        (FieldData::One(s), FieldData::One(x)) if s.shape() == x.shape() => {
            *s += x;
            Ok(())
        }
        (FieldData::Two(s), FieldData::Two(x)) if s.shape() == x.shape() => {
            *s += x;
            Ok(())
        }
        _ => Err(ViewerError::RaggedStack {
            field,
            detail: format!(
                "chunk shape {inc_shape:?} disagrees with running sum {sum_shape:?}"
            ),
        }),
    }
}

fn scale_in_place(data: &mut FieldData, factor: f64) {
    match data {
        FieldData::Scalar(x) => *x *= factor,
        FieldData::One(a) => *a *= factor,
        FieldData::Two(a) => *a *= factor,
    }
}

// ---------------------------------------------------------------------------
// Chunked averaging
// ---------------------------------------------------------------------------

/// Mean of each requested field over the target list, streamed in
/// `chunk_size`-file chunks so memory stays constant in the number of
/// files. `mask`, when given, excludes files from both the sums and the
/// divisor and must have one entry per target file; a stale mask from an
/// older target set is rejected with [`ViewerError::MaskMismatch`].
pub fn average(
    cache: &RecordCache,
    target: &[String],
    fields: &[Field],
    chunk_size: usize,
    mask: Option<&[bool]>,
) -> Result<BTreeMap<Field, FieldData>> {
    if target.is_empty() {
        return Err(ViewerError::EmptySelection);
    }
    if let Some(m) = mask {
        if m.len() != target.len() {
            return Err(ViewerError::MaskMismatch {
                mask: m.len(),
                files: target.len(),
            });
        }
    }
    let chunk = chunk_size.max(1);
    let mut acc = AverageAccumulator::new();

    let mut beg = 0;
    while beg < target.len() {
        let end = (beg + chunk).min(target.len());
        let chunk_mask = mask.map(|m| &m[beg..end]);
        let contributing =
            chunk_mask.map_or(end - beg, |m| m.iter().filter(|&&keep| keep).count());
        if contributing > 0 {
            let frame = cache.get_masked(fields, &target[beg..end], chunk_mask)?;
            acc.push_chunk(&frame, contributing)?;
        }
        debug!("average: chunk {beg}..{end}, {contributing} contributing");
        beg = end;
    }

    info!("average: {} files contributed", acc.count());
    acc.finish()
}

/// Persist an averaged result next to its inputs: the writer copies the
/// origin file's structure verbatim, then overwrites the averaged fields.
pub fn save_average<W: RecordWriter + ?Sized>(
    writer: &W,
    origin: &Path,
    dest: &Path,
    result: &BTreeMap<Field, FieldData>,
) -> Result<()> {
    info!("writing averaged result to {}", dest.display());
    writer.write_fields(origin, dest, result)
}
