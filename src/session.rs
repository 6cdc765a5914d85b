//! The session ties the pieces together: one catalog, one record cache,
//! one aggregation engine, one loader. A host GUI owns a session and calls
//! these methods from its event handlers; everything below stays free of
//! display concerns.

use std::path::Path;

use log::info;
use ndarray::{Array1, Array2, Array3, Axis};

use crate::cache::{CancelToken, RecordCache};
use crate::catalog::{FileCatalog, SearchMode};
use crate::data::loader::{JsonStore, RecordLoader, RecordWriter};
use crate::data::model::{AnalysisType, Field, FieldData};
use crate::engine::g2::{CorrelationFit, G2Outcome, G2Request};
use crate::engine::outlier::Clusterer;
use crate::engine::tauq::{RelaxationFit, TauQCurve};
use crate::engine::twotime::{time_scale, two_time_map, TwoTimeMap};
use crate::engine::{average, AggregationEngine};
use crate::error::{Result, ViewerError};

pub struct ViewerSession<L: RecordLoader> {
    catalog: FileCatalog,
    cache: RecordCache,
    engine: AggregationEngine,
    loader: L,
}

impl ViewerSession<JsonStore> {
    /// Session over a directory of JSON measurement documents.
    pub fn open(working_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = working_dir.as_ref();
        Self::with_loader(dir, JsonStore::new(dir))
    }
}

impl<L: RecordLoader> ViewerSession<L> {
    pub fn with_loader(working_dir: impl AsRef<Path>, loader: L) -> Result<Self> {
        Ok(ViewerSession {
            catalog: FileCatalog::new(working_dir.as_ref())?,
            cache: RecordCache::new(),
            engine: AggregationEngine::new(),
            loader,
        })
    }

    /// Restrict the per-file field schema the cache maintains; files only
    /// need to carry the listed fields.
    pub fn with_schema(mut self, fields: Vec<Field>) -> Self {
        self.cache = RecordCache::with_fields(fields);
        self
    }

    pub fn catalog(&self) -> &FileCatalog {
        &self.catalog
    }

    pub fn target(&self) -> &[String] {
        self.catalog.target()
    }

    pub fn analysis_type(&self) -> Option<AnalysisType> {
        self.catalog.analysis_type()
    }

    // -- catalog operations -------------------------------------------------

    /// Re-list the working directory; memoized views are dropped because
    /// the target list may have lost entries.
    pub fn refresh(&mut self) -> Result<()> {
        self.catalog.refresh()?;
        self.engine.invalidate();
        Ok(())
    }

    pub fn add_target(&mut self, names: &[String]) -> bool {
        let consistent = self.catalog.add_target(names, &self.loader);
        self.engine.invalidate();
        consistent
    }

    pub fn remove_target(&mut self, names: &[String]) {
        self.catalog.remove_target(names);
        self.engine.invalidate();
    }

    pub fn reorder_target(&mut self, new_order: &[String]) -> bool {
        let applied = self.catalog.reorder_target(new_order);
        if applied {
            self.engine.invalidate();
        }
        applied
    }

    pub fn clear_target(&mut self) {
        self.catalog.clear_target();
        self.engine.invalidate();
    }

    pub fn search(&self, query: &str, mode: SearchMode) -> Result<Vec<String>> {
        self.catalog.search(query, mode)
    }

    /// Drop everything derived from disk: cache entries and memoized views.
    pub fn reset(&mut self) {
        info!("session reset");
        self.cache.reset();
        self.engine.invalidate();
    }

    // -- loading ------------------------------------------------------------

    /// Converge the record cache onto the current target list. Long
    /// running; the host runs it off-thread with the progress callback and
    /// cancel token. An aborted run leaves whole-file entries only, and the
    /// next call converges onto the latest list.
    pub fn load_targets(
        &mut self,
        progress: Option<&mut dyn FnMut(u8)>,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let target = self.catalog.target().to_vec();
        self.cache.reconcile(&target, &self.loader, progress, cancel)
    }

    // -- g2 / tau-q ---------------------------------------------------------

    pub fn g2(&mut self, req: &G2Request) -> Result<G2Outcome> {
        self.engine.g2.view(&self.cache, self.catalog.target(), req)
    }

    pub fn fit_g2(&mut self, req: &G2Request, fitter: &dyn CorrelationFit) -> Result<Vec<String>> {
        self.engine
            .g2
            .fit(&self.cache, self.catalog.target(), req, fitter)
    }

    pub fn tau_q(&self, max_q: f64, fitter: &dyn RelaxationFit) -> Result<Vec<TauQCurve>> {
        self.engine.tau_q(max_q, fitter)
    }

    // -- SAXS / intensity ---------------------------------------------------

    fn head(&self, max_points: usize) -> Result<Vec<String>> {
        let target = self.catalog.target();
        if target.is_empty() {
            return Err(ViewerError::EmptySelection);
        }
        let n = if max_points == 0 {
            target.len()
        } else {
            target.len().min(max_points)
        };
        Ok(target[..n].to_vec())
    }

    /// Azimuthally averaged curves for the leading `max_points` files:
    /// the shared q axis, one intensity row per file, and the file names.
    pub fn saxs_1d(&self, max_points: usize) -> Result<(Array1<f64>, Array2<f64>, Vec<String>)> {
        let files = self.head(max_points)?;
        let frame = self.cache.get(&[Field::QSta, Field::Saxs1d], &files)?;
        let q = frame[&Field::QSta]
            .as_one()
            .map(|a| a.row(0).to_owned())
            .ok_or_else(|| rank_error(Field::QSta))?;
        let intensity = frame[&Field::Saxs1d]
            .as_one()
            .cloned()
            .ok_or_else(|| rank_error(Field::Saxs1d))?;
        Ok((q, intensity, files))
    }

    /// Stacked detector images for the leading `max_points` files.
    pub fn saxs_2d(&self, max_points: usize) -> Result<(Array3<f64>, Vec<String>)> {
        let files = self.head(max_points)?;
        let frame = self.cache.get(&[Field::Saxs2d], &files)?;
        let frames = frame[&Field::Saxs2d]
            .as_two()
            .cloned()
            .ok_or_else(|| rank_error(Field::Saxs2d))?;
        Ok((frames, files))
    }

    /// One file's partial SAXS curves (sector x q) for the stability view.
    pub fn stability(&self, plot_id: usize) -> Result<(Array1<f64>, Array2<f64>, String)> {
        let target = self.catalog.target();
        let file = target
            .get(plot_id)
            .cloned()
            .ok_or(ViewerError::EmptySelection)?;
        let files = vec![file.clone()];
        let frame = self.cache.get(&[Field::QSta, Field::SaxsPartial], &files)?;
        let q = frame[&Field::QSta]
            .as_one()
            .map(|a| a.row(0).to_owned())
            .ok_or_else(|| rank_error(Field::QSta))?;
        let partials = frame[&Field::SaxsPartial]
            .as_two()
            .map(|a| a.index_axis(Axis(0), 0).to_owned())
            .ok_or_else(|| rank_error(Field::SaxsPartial))?;
        Ok((q, partials, file))
    }

    /// Frame-sum traces, resampled every `sampling` frames, with the time
    /// axis scaled by the exposure period.
    pub fn intensity_trace(
        &self,
        max_points: usize,
        sampling: usize,
    ) -> Result<(Array1<f64>, Array2<f64>, Vec<String>)> {
        let files = self.head(max_points)?;
        let frame = self
            .cache
            .get(&[Field::IntensityTrace, Field::ExposurePeriod], &files)?;
        let stack = frame[&Field::IntensityTrace]
            .as_two()
            .ok_or_else(|| rank_error(Field::IntensityTrace))?;
        let t0 = frame[&Field::ExposurePeriod]
            .as_scalar()
            .map(|a| a[0])
            .ok_or_else(|| rank_error(Field::ExposurePeriod))?;

        let row = if stack.shape()[1] >= 2 { 1 } else { 0 };
        let step = sampling.max(1);
        let traces = stack
            .index_axis(Axis(1), row)
            .slice(ndarray::s![.., ..;step as isize])
            .to_owned();
        let time = Array1::from_shape_fn(traces.shape()[1], |i| (i * step) as f64 * t0);
        Ok((time, traces, files))
    }

    // -- outlier detection --------------------------------------------------

    /// Per-file `(min, max)` of the normalized intensity traces.
    pub fn outlier_trace_points(&mut self) -> Result<Array2<f64>> {
        let identity = self.catalog.identity(0);
        self.engine
            .stability
            .trace_summary(&self.cache, self.catalog.target(), identity)
    }

    /// Cluster the trace points and keep the majority cluster.
    pub fn outlier_cluster_mask(
        &mut self,
        k: usize,
        clusterer: &dyn Clusterer,
    ) -> Result<(Array2<f64>, Vec<bool>)> {
        let points = self.outlier_trace_points()?;
        let mask = crate::engine::outlier::cluster_mask(&points, k, clusterer);
        Ok((points, mask))
    }

    /// Per-file g2 tail mean at `q_index` over the last `window` delays.
    pub fn outlier_g2_tail(&mut self, q_index: usize, window: usize) -> Result<Array1<f64>> {
        let identity = self.catalog.identity(0);
        self.engine.stability.g2_tail_summary(
            &self.cache,
            self.catalog.target(),
            identity,
            q_index,
            window,
        )
    }

    /// Band mask over the g2 tail summary.
    pub fn outlier_threshold_mask(
        &mut self,
        q_index: usize,
        window: usize,
        lo: f64,
        hi: f64,
    ) -> Result<(Array1<f64>, Vec<bool>)> {
        let tail = self.outlier_g2_tail(q_index, window)?;
        let mask = crate::engine::outlier::threshold_mask(&tail, lo, hi);
        Ok((tail, mask))
    }

    // -- averaging ----------------------------------------------------------

    /// Mean of `fields` over the target list, mask-excluded files left out
    /// of both the sums and the divisor.
    pub fn average(
        &self,
        fields: &[Field],
        chunk_size: usize,
        mask: Option<&[bool]>,
    ) -> Result<std::collections::BTreeMap<Field, FieldData>> {
        average::average(&self.cache, self.catalog.target(), fields, chunk_size, mask)
    }

    pub fn save_average(
        &self,
        origin: &Path,
        dest: &Path,
        result: &std::collections::BTreeMap<Field, FieldData>,
    ) -> Result<()>
    where
        L: RecordWriter,
    {
        average::save_average(&self.loader, origin, dest, result)
    }

    // -- two-time -----------------------------------------------------------

    /// Reconstruct a two-time map from a stored half matrix. The half
    /// matrix is caller-supplied (the closed field schema keeps the
    /// detector-sized two-time blocks out of the record cache); the time
    /// axis comes from the named file's exposure period.
    pub fn two_time(
        &self,
        file_index: usize,
        half: &Array2<f64>,
        ceiling: f64,
        stride: f64,
        avg: f64,
    ) -> Result<TwoTimeMap> {
        let target = self.catalog.target();
        let file = target.get(file_index).ok_or(ViewerError::EmptySelection)?;
        let record = self
            .cache
            .record(file)
            .ok_or_else(|| ViewerError::NotCached { file: file.clone() })?;
        let t0 = match record.get(Field::ExposurePeriod) {
            Some(FieldData::Scalar(t0)) => *t0,
            _ => {
                return Err(ViewerError::MissingField {
                    field: Field::ExposurePeriod,
                    file: file.clone(),
                })
            }
        };
        Ok(two_time_map(half, ceiling, time_scale(t0, t0, stride, avg)))
    }
}

fn rank_error(field: Field) -> ViewerError {
    ViewerError::RaggedStack {
        field,
        detail: "stacked payload has an unexpected rank".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::FixtureLoader;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Working directory with empty placeholder files so the catalog lists
    /// them; the fixture loader serves the actual payloads by name.
    fn session_with(
        loader: FixtureLoader,
        names: &[&str],
        schema: Vec<Field>,
    ) -> (tempfile::TempDir, ViewerSession<FixtureLoader>) {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::File::create(dir.path().join(name)).unwrap();
        }
        let session = ViewerSession::with_loader(dir.path(), loader)
            .unwrap()
            .with_schema(schema);
        (dir, session)
    }

    fn g2_schema() -> Vec<Field> {
        vec![
            Field::DelayTime,
            Field::QDyn,
            Field::G2,
            Field::G2Err,
            Field::ExposurePeriod,
        ]
    }

    #[test]
    fn add_load_view_round_trip() {
        let loader = FixtureLoader::new()
            .with_g2_file("a.json", 8, 3, 1.2)
            .with_g2_file("b.json", 8, 3, 1.3);
        let (_dir, mut session) = session_with(loader, &["a.json", "b.json"], g2_schema());

        assert!(session.add_target(&strings(&["a.json", "b.json"])));
        session.load_targets(None, None).unwrap();

        let outcome = session.g2(&G2Request::default()).unwrap();
        let data = match outcome {
            G2Outcome::Consistent(d) => d,
            other => panic!("expected consistent view, got {other:?}"),
        };
        assert_eq!(data.g2.shape(), &[2, 8, 3]);
    }

    #[test]
    fn remove_target_invalidates_the_view() {
        let loader = FixtureLoader::new()
            .with_g2_file("a.json", 8, 3, 1.2)
            .with_g2_file("b.json", 8, 3, 1.3);
        let (_dir, mut session) = session_with(loader, &["a.json", "b.json"], g2_schema());
        session.add_target(&strings(&["a.json", "b.json"]));
        session.load_targets(None, None).unwrap();
        session.g2(&G2Request::default()).unwrap();

        session.remove_target(&strings(&["b.json"]));
        session.load_targets(None, None).unwrap();
        let outcome = session.g2(&G2Request::default()).unwrap();
        let data = match outcome {
            G2Outcome::Consistent(d) => d,
            other => panic!("expected consistent view, got {other:?}"),
        };
        assert_eq!(data.files, strings(&["a.json"]));
    }

    #[test]
    fn intensity_trace_scales_time_by_exposure() {
        let mut loader = FixtureLoader::new();
        let mut fields = BTreeMap::new();
        fields.insert(
            Field::IntensityTrace,
            FieldData::Two(Array2::from_shape_fn((2, 8), |(r, c)| {
                if r == 1 {
                    c as f64
                } else {
                    0.0
                }
            })),
        );
        fields.insert(Field::ExposurePeriod, FieldData::Scalar(0.5));
        loader.records.insert("a.json".to_string(), fields);
        let schema = vec![Field::IntensityTrace, Field::ExposurePeriod];
        let (_dir, mut session) = session_with(loader, &["a.json"], schema);
        session.add_target(&strings(&["a.json"]));
        session.load_targets(None, None).unwrap();

        let (time, traces, files) = session.intensity_trace(0, 2).unwrap();
        assert_eq!(files, strings(&["a.json"]));
        assert_eq!(traces.shape(), &[1, 4]);
        // every 2nd frame at 0.5 s per frame
        assert_eq!(time.to_vec(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(traces.row(0).to_vec(), vec![0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn two_time_needs_a_cached_file() {
        let loader = FixtureLoader::new().with_g2_file("a.json", 4, 2, 1.2);
        let (_dir, mut session) = session_with(loader, &["a.json"], g2_schema());
        session.add_target(&strings(&["a.json"]));

        let half = Array2::from_elem((2, 2), 0.5);
        let err = session.two_time(0, &half, 1.3, 1.0, 1.0).unwrap_err();
        assert!(matches!(err, ViewerError::NotCached { .. }));

        session.load_targets(None, None).unwrap();
        let map = session.two_time(0, &half, 1.3, 1.0, 1.0).unwrap();
        assert_eq!(map.c2.dim(), (2, 2));
        // fixture exposure period is 1e-5
        assert!((map.time[1] - 1e-5).abs() < 1e-18);
    }

    #[test]
    fn empty_target_is_an_empty_selection() {
        let loader = FixtureLoader::new();
        let (_dir, session) = session_with(loader, &[], g2_schema());
        assert!(matches!(
            session.saxs_1d(0).unwrap_err(),
            ViewerError::EmptySelection
        ));
    }
}
