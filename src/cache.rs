use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use ndarray::{Array1, Axis};

use crate::data::loader::RecordLoader;
use crate::data::model::{Field, FieldData, FieldFrame, FileRecord, StackedField};
use crate::error::{Result, ViewerError};

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Shared non-blocking cancellation flag for the one long-running operation
/// ([`RecordCache::reconcile`]). Clone it into the host's interactive thread
/// and call [`CancelToken::cancel`] to abort between files.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// RecordCache
// ---------------------------------------------------------------------------

/// In-memory map from file name to its loaded record.
///
/// `reconcile` converges the map onto a given target list: missing files are
/// loaded, files no longer targeted are evicted. The operation is idempotent
/// over its argument, so re-running it with a newer target list always wins
/// regardless of what an earlier, interrupted run left behind; entries are
/// only ever whole files.
#[derive(Debug, Default)]
pub struct RecordCache {
    records: HashMap<String, FileRecord>,
    fields: Vec<Field>,
}

impl RecordCache {
    /// Cache maintaining the full field schema per file.
    pub fn new() -> Self {
        RecordCache {
            records: HashMap::new(),
            fields: Field::ALL.to_vec(),
        }
    }

    /// Cache maintaining only the given fields per file (e.g. when the
    /// working set is known to never need detector images).
    pub fn with_fields(fields: Vec<Field>) -> Self {
        RecordCache {
            records: HashMap::new(),
            fields,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, file: &str) -> bool {
        self.records.contains_key(file)
    }

    pub fn record(&self, file: &str) -> Option<&FileRecord> {
        self.records.get(file)
    }

    /// Drop every entry (e.g. when the working directory changes).
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// Converge the cache onto `target`: load what is missing, evict what is
    /// no longer wanted. `progress` receives a monotone completion
    /// percentage (ending at 100) after each file; `cancel` is checked
    /// between files and aborts with [`ViewerError::Cancelled`], leaving the
    /// already-loaded whole-file entries in place.
    pub fn reconcile(
        &mut self,
        target: &[String],
        loader: &dyn RecordLoader,
        mut progress: Option<&mut dyn FnMut(u8)>,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let total = target.len();
        let mut loaded = 0usize;
        for (n, name) in target.iter().enumerate() {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    info!("reconcile cancelled after {n}/{total} files");
                    return Err(ViewerError::Cancelled);
                }
            }
            if !self.records.contains_key(name) {
                let record = loader.load(&self.fields, name)?;
                self.records.insert(name.clone(), record);
                loaded += 1;
            }
            if let Some(cb) = progress.as_deref_mut() {
                cb((((n + 1) * 100) / total.max(1)) as u8);
            }
        }

        let wanted: HashSet<&str> = target.iter().map(String::as_str).collect();
        let before = self.records.len();
        self.records.retain(|name, _| wanted.contains(name.as_str()));
        info!(
            "reconcile: {loaded} loaded, {} evicted, {} cached",
            before - self.records.len(),
            self.records.len()
        );
        Ok(())
    }

    /// Stack each requested field across `files`, in the order given.
    pub fn get(&self, fields: &[Field], files: &[String]) -> Result<FieldFrame> {
        self.get_masked(fields, files, None)
    }

    /// Like [`RecordCache::get`], restricted to files whose mask entry is
    /// true. A missing mask entry counts as included.
    pub fn get_masked(
        &self,
        fields: &[Field],
        files: &[String],
        mask: Option<&[bool]>,
    ) -> Result<FieldFrame> {
        let mut selected: Vec<&FileRecord> = Vec::with_capacity(files.len());
        for (n, file) in files.iter().enumerate() {
            let included = mask.map_or(true, |m| m.get(n).copied().unwrap_or(true));
            if !included {
                continue;
            }
            let record = self
                .records
                .get(file)
                .ok_or_else(|| ViewerError::NotCached { file: file.clone() })?;
            selected.push(record);
        }
        if selected.is_empty() {
            return Err(ViewerError::EmptySelection);
        }

        let mut frame = FieldFrame::new();
        for &field in fields {
            frame.insert(field, stack_field(field, &selected)?);
        }
        debug!("stacked {} fields over {} files", fields.len(), selected.len());
        Ok(frame)
    }
}

fn stack_field(field: Field, records: &[&FileRecord]) -> Result<StackedField> {
    let ragged = |detail: String| ViewerError::RaggedStack { field, detail };

    // Collect each file's payload, insisting the rank matches the schema.
    let mut payloads = Vec::with_capacity(records.len());
    for record in records {
        let data = record.get(field).ok_or_else(|| ViewerError::MissingField {
            field,
            file: record.name.clone(),
        })?;
        payloads.push((record.name.as_str(), data));
    }

    match payloads[0].1 {
        FieldData::Scalar(_) => {
            let mut values = Vec::with_capacity(payloads.len());
            for (name, data) in &payloads {
                match data {
                    FieldData::Scalar(x) => values.push(*x),
                    other => {
                        return Err(ragged(format!(
                            "'{name}' holds rank {:?}, expected scalar",
                            other.rank()
                        )))
                    }
                }
            }
            Ok(StackedField::Scalar(Array1::from(values)))
        }
        FieldData::One(_) => {
            let mut views = Vec::with_capacity(payloads.len());
            for (name, data) in &payloads {
                match data {
                    FieldData::One(a) => views.push(a.view()),
                    other => {
                        return Err(ragged(format!(
                            "'{name}' holds rank {:?}, expected rank one",
                            other.rank()
                        )))
                    }
                }
            }
            ndarray::stack(Axis(0), &views)
                .map(StackedField::One)
                .map_err(|e| ragged(e.to_string()))
        }
        FieldData::Two(_) => {
            let mut views = Vec::with_capacity(payloads.len());
            for (name, data) in &payloads {
                match data {
                    FieldData::Two(a) => views.push(a.view()),
                    other => {
                        return Err(ragged(format!(
                            "'{name}' holds rank {:?}, expected rank two",
                            other.rank()
                        )))
                    }
                }
            }
            ndarray::stack(Axis(0), &views)
                .map(StackedField::Two)
                .map_err(|e| ragged(e.to_string()))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::model::AnalysisType;
    use ndarray::{Array1, Array2};
    use pretty_assertions::assert_eq;
    use std::cell::Cell;
    use std::collections::BTreeMap;

    /// In-memory loader fixture with a load-call counter.
    pub(crate) struct FixtureLoader {
        pub records: BTreeMap<String, BTreeMap<Field, FieldData>>,
        pub calls: Cell<usize>,
    }

    impl FixtureLoader {
        pub fn new() -> Self {
            FixtureLoader {
                records: BTreeMap::new(),
                calls: Cell::new(0),
            }
        }

        /// A file whose g2 block is `rows x cols`, filled with `fill`.
        pub fn with_g2_file(mut self, name: &str, rows: usize, cols: usize, fill: f64) -> Self {
            let mut fields = BTreeMap::new();
            // exactly representable axis values so range boundaries in tests
            // compare bit-for-bit
            fields.insert(
                Field::DelayTime,
                FieldData::One((1..=rows).map(|i| i as f64 * 0.5).collect()),
            );
            fields.insert(
                Field::QDyn,
                FieldData::One((1..=cols).map(|i| i as f64 * 0.125).collect()),
            );
            fields.insert(Field::G2, FieldData::Two(Array2::from_elem((rows, cols), fill)));
            fields.insert(
                Field::G2Err,
                FieldData::Two(Array2::from_elem((rows, cols), fill / 100.0)),
            );
            fields.insert(Field::ExposurePeriod, FieldData::Scalar(1e-5));
            self.records.insert(name.to_string(), fields);
            self
        }
    }

    impl RecordLoader for FixtureLoader {
        fn load(&self, fields: &[Field], file: &str) -> Result<FileRecord> {
            self.calls.set(self.calls.get() + 1);
            let available = self
                .records
                .get(file)
                .ok_or_else(|| ViewerError::Unreadable {
                    file: file.to_string(),
                    reason: "not in fixture".into(),
                })?;
            let mut out = BTreeMap::new();
            for &field in fields {
                let data = available.get(&field).ok_or(ViewerError::MissingField {
                    field,
                    file: file.to_string(),
                })?;
                out.insert(field, data.clone());
            }
            Ok(FileRecord::new(file, AnalysisType::Multitau, out))
        }

        fn analysis_type(&self, _file: &str) -> Result<AnalysisType> {
            Ok(AnalysisType::Multitau)
        }
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn g2_fields() -> Vec<Field> {
        vec![
            Field::DelayTime,
            Field::QDyn,
            Field::G2,
            Field::G2Err,
            Field::ExposurePeriod,
        ]
    }

    #[test]
    fn reconcile_loads_then_evicts() {
        let loader = FixtureLoader::new()
            .with_g2_file("a", 4, 2, 1.0)
            .with_g2_file("b", 4, 2, 2.0);
        let mut cache = RecordCache::with_fields(g2_fields());

        cache
            .reconcile(&strings(&["a", "b"]), &loader, None, None)
            .unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(loader.calls.get(), 2);

        // already cached: no further loader calls
        cache
            .reconcile(&strings(&["a", "b"]), &loader, None, None)
            .unwrap();
        assert_eq!(loader.calls.get(), 2);

        // narrowing the target evicts
        cache.reconcile(&strings(&["a"]), &loader, None, None).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn reconcile_progress_is_monotone_to_100() {
        let loader = FixtureLoader::new()
            .with_g2_file("a", 4, 2, 1.0)
            .with_g2_file("b", 4, 2, 2.0)
            .with_g2_file("c", 4, 2, 3.0);
        let mut cache = RecordCache::with_fields(g2_fields());

        let mut seen: Vec<u8> = Vec::new();
        let mut cb = |p: u8| seen.push(p);
        cache
            .reconcile(&strings(&["a", "b", "c"]), &loader, Some(&mut cb), None)
            .unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last(), Some(&100));
    }

    #[test]
    fn cancelled_reconcile_leaves_whole_entries_only() {
        let loader = FixtureLoader::new()
            .with_g2_file("a", 4, 2, 1.0)
            .with_g2_file("b", 4, 2, 2.0);
        let mut cache = RecordCache::with_fields(g2_fields());

        let token = CancelToken::new();
        token.cancel();
        let err = cache
            .reconcile(&strings(&["a", "b"]), &loader, None, Some(&token))
            .unwrap_err();
        assert!(matches!(err, ViewerError::Cancelled));
        assert_eq!(cache.len(), 0);

        // a later run with the latest target list converges the cache
        cache
            .reconcile(&strings(&["a", "b"]), &loader, None, None)
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn get_before_reconcile_is_a_hard_error() {
        let cache = RecordCache::new();
        let err = cache.get(&[Field::G2], &strings(&["a"])).unwrap_err();
        assert!(matches!(err, ViewerError::NotCached { .. }));
    }

    #[test]
    fn get_stacks_in_request_order() {
        let loader = FixtureLoader::new()
            .with_g2_file("a", 4, 2, 1.0)
            .with_g2_file("b", 4, 2, 2.0);
        let mut cache = RecordCache::with_fields(g2_fields());
        cache
            .reconcile(&strings(&["a", "b"]), &loader, None, None)
            .unwrap();

        let frame = cache
            .get(&[Field::G2], &strings(&["b", "a"]))
            .unwrap();
        let g2 = frame[&Field::G2].as_two().unwrap();
        assert_eq!(g2.shape(), &[2, 4, 2]);
        assert_eq!(g2[[0, 0, 0]], 2.0);
        assert_eq!(g2[[1, 0, 0]], 1.0);
    }

    #[test]
    fn ragged_shapes_are_detected() {
        let loader = FixtureLoader::new()
            .with_g2_file("a", 4, 2, 1.0)
            .with_g2_file("b", 4, 3, 2.0); // wider q axis
        let mut cache = RecordCache::with_fields(g2_fields());
        cache
            .reconcile(&strings(&["a", "b"]), &loader, None, None)
            .unwrap();

        let err = cache.get(&[Field::G2], &strings(&["a", "b"])).unwrap_err();
        assert!(matches!(err, ViewerError::RaggedStack { field: Field::G2, .. }));
    }

    #[test]
    fn mask_excludes_files() {
        let loader = FixtureLoader::new()
            .with_g2_file("a", 4, 2, 1.0)
            .with_g2_file("b", 4, 2, 2.0);
        let mut cache = RecordCache::with_fields(g2_fields());
        cache
            .reconcile(&strings(&["a", "b"]), &loader, None, None)
            .unwrap();

        let frame = cache
            .get_masked(&[Field::G2], &strings(&["a", "b"]), Some(&[false, true]))
            .unwrap();
        let g2 = frame[&Field::G2].as_two().unwrap();
        assert_eq!(g2.shape(), &[1, 4, 2]);
        assert_eq!(g2[[0, 0, 0]], 2.0);

        let err = cache
            .get_masked(&[Field::G2], &strings(&["a", "b"]), Some(&[false, false]))
            .unwrap_err();
        assert!(matches!(err, ViewerError::EmptySelection));
    }
}
