use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use log::warn;

use crate::data::loader::RecordLoader;
use crate::data::model::AnalysisType;
use crate::error::{Result, ViewerError};

// ---------------------------------------------------------------------------
// Search mode
// ---------------------------------------------------------------------------

/// How [`FileCatalog::search`] matches the query against file names.
/// Matching is case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Prefix,
    Substring,
}

// ---------------------------------------------------------------------------
// FileCatalog
// ---------------------------------------------------------------------------

/// Enumerates candidate measurement files in a working directory and keeps
/// the user-curated target list: an ordered, duplicate-free selection out of
/// the source listing.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    working_dir: PathBuf,
    source: Vec<String>,
    target: Vec<String>,
    /// Type of the first targeted file; cleared when the target set empties.
    analysis_type: Option<AnalysisType>,
    min_query_len: usize,
}

/// File extensions the source listing accepts.
const ELIGIBLE_EXTENSIONS: [&str; 2] = ["json", "hdf"];

impl FileCatalog {
    /// List the working directory (no recursion) and start with an empty
    /// target set.
    pub fn new(working_dir: impl Into<PathBuf>) -> Result<Self> {
        let working_dir = working_dir.into();
        let source = list_sources(&working_dir)?;
        Ok(FileCatalog {
            working_dir,
            source,
            target: Vec::new(),
            analysis_type: None,
            min_query_len: 2,
        })
    }

    /// Override the minimum accepted search-query length (default 2).
    pub fn with_min_query_len(mut self, min: usize) -> Self {
        self.min_query_len = min;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn source_list(&self) -> &[String] {
        &self.source
    }

    pub fn target(&self) -> &[String] {
        &self.target
    }

    pub fn analysis_type(&self) -> Option<AnalysisType> {
        self.analysis_type
    }

    /// Re-list the working directory, dropping target entries whose files
    /// have disappeared.
    pub fn refresh(&mut self) -> Result<()> {
        self.source = list_sources(&self.working_dir)?;
        let source = &self.source;
        self.target.retain(|t| source.contains(t));
        if self.target.is_empty() {
            self.analysis_type = None;
        }
        Ok(())
    }

    /// Append files to the target set, skipping names already present and
    /// names absent from the source listing. Each newly added file's
    /// analysis type is probed through the loader; the return value is
    /// `false` when the target set ends up mixing types (the files are kept
    /// regardless; the caller decides how to warn).
    pub fn add_target<L: RecordLoader + ?Sized>(&mut self, names: &[String], loader: &L) -> bool {
        let mut uniform = true;
        for name in names {
            if self.target.iter().any(|t| t == name) {
                continue;
            }
            if !self.source.iter().any(|s| s == name) {
                warn!("'{name}' is not in the source listing; skipped");
                continue;
            }
            self.target.push(name.clone());
            match loader.analysis_type(name) {
                Ok(t) => match self.analysis_type {
                    None => self.analysis_type = Some(t),
                    Some(current) if current != t => uniform = false,
                    Some(_) => {}
                },
                Err(e) => {
                    warn!("cannot probe analysis type of '{name}': {e}");
                    uniform = false;
                }
            }
        }
        uniform
    }

    /// Remove files by exact name; absent names are ignored.
    pub fn remove_target(&mut self, names: &[String]) {
        self.target.retain(|t| !names.iter().any(|n| n == t));
        if self.target.is_empty() {
            self.analysis_type = None;
        }
    }

    pub fn clear_target(&mut self) {
        self.target.clear();
        self.analysis_type = None;
    }

    /// Replace the target sequence wholesale. A no-op (returning `false`)
    /// unless `new_order` is a permutation of the current contents.
    pub fn reorder_target(&mut self, new_order: &[String]) -> bool {
        let mut a = self.target.clone();
        let mut b = new_order.to_vec();
        a.sort();
        b.sort();
        if a != b {
            warn!("reorder ignored: not a permutation of the current target set");
            return false;
        }
        self.target = new_order.to_vec();
        true
    }

    /// Return the subsequence of the source list matching `query`.
    /// Queries shorter than the configured minimum are rejected rather than
    /// searched.
    pub fn search(&self, query: &str, mode: SearchMode) -> Result<Vec<String>> {
        if query.len() < self.min_query_len {
            return Err(ViewerError::QueryTooShort {
                min: self.min_query_len,
            });
        }
        let hits = self
            .source
            .iter()
            .filter(|name| match mode {
                SearchMode::Prefix => name.starts_with(query),
                SearchMode::Substring => name.contains(query),
            })
            .cloned()
            .collect();
        Ok(hits)
    }

    /// Identity hash of the target set, used for cheap change detection by
    /// the memoized views. `max_points == 0` hashes the full ordered list;
    /// a positive bound hashes only the leading entries; changes past the
    /// bound go unnoticed.
    pub fn identity(&self, max_points: usize) -> u64 {
        let items = if max_points == 0 {
            &self.target[..]
        } else {
            &self.target[..self.target.len().min(max_points)]
        };
        let mut hasher = DefaultHasher::new();
        items.hash(&mut hasher);
        hasher.finish()
    }
}

fn list_sources(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| ViewerError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ViewerError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let eligible = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| ELIGIBLE_EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        if !eligible {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            names.push(name.to_string());
        }
    }
    // read_dir order is platform-dependent; keep the listing deterministic
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{FieldData, FileRecord};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    /// Probe-only loader with per-file analysis types.
    struct TypedLoader {
        types: BTreeMap<String, AnalysisType>,
        probes: RefCell<usize>,
    }

    impl TypedLoader {
        fn uniform(names: &[&str]) -> Self {
            let types = names
                .iter()
                .map(|n| (n.to_string(), AnalysisType::Multitau))
                .collect();
            TypedLoader {
                types,
                probes: RefCell::new(0),
            }
        }
    }

    impl RecordLoader for TypedLoader {
        fn load(&self, _fields: &[crate::data::model::Field], file: &str) -> Result<FileRecord> {
            Ok(FileRecord::new(
                file,
                self.analysis_type(file)?,
                BTreeMap::<crate::data::model::Field, FieldData>::new(),
            ))
        }

        fn analysis_type(&self, file: &str) -> Result<AnalysisType> {
            *self.probes.borrow_mut() += 1;
            self.types
                .get(file)
                .copied()
                .ok_or_else(|| ViewerError::Unreadable {
                    file: file.to_string(),
                    reason: "not in fixture".into(),
                })
        }
    }

    fn catalog_with(names: &[&str]) -> FileCatalog {
        let dir = tempfile::tempdir().unwrap();
        for n in names {
            std::fs::write(dir.path().join(n), "{}").unwrap();
        }
        // the catalog only touches the directory again on refresh(), which
        // these tests do not exercise
        FileCatalog::new(dir.path()).unwrap()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn source_listing_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let cat = FileCatalog::new(dir.path()).unwrap();
        assert_eq!(cat.source_list(), &strings(&["a.json", "b.json"]));
    }

    #[test]
    fn unreadable_directory_is_io_error() {
        let err = FileCatalog::new("/definitely/not/a/dir").unwrap_err();
        assert!(matches!(err, ViewerError::Io { .. }));
    }

    #[test]
    fn add_target_is_idempotent() {
        let mut cat = catalog_with(&["a.json", "b.json"]);
        let loader = TypedLoader::uniform(&["a.json", "b.json"]);
        assert!(cat.add_target(&strings(&["a.json"]), &loader));
        assert!(cat.add_target(&strings(&["a.json"]), &loader));
        assert_eq!(cat.target(), &strings(&["a.json"]));
    }

    #[test]
    fn add_target_flags_mixed_types() {
        let mut cat = catalog_with(&["a.json", "b.json"]);
        let mut types = BTreeMap::new();
        types.insert("a.json".to_string(), AnalysisType::Multitau);
        types.insert("b.json".to_string(), AnalysisType::Twotime);
        let loader = TypedLoader {
            types,
            probes: RefCell::new(0),
        };
        assert!(cat.add_target(&strings(&["a.json"]), &loader));
        // mixed set: flagged but still added
        assert!(!cat.add_target(&strings(&["b.json"]), &loader));
        assert_eq!(cat.target().len(), 2);
    }

    #[test]
    fn reorder_rejects_non_permutations() {
        let mut cat = catalog_with(&["a.json", "b.json", "c.json"]);
        let loader = TypedLoader::uniform(&["a.json", "b.json", "c.json"]);
        cat.add_target(&strings(&["a.json", "b.json"]), &loader);

        assert!(!cat.reorder_target(&strings(&["b.json", "a.json", "c.json"])));
        assert_eq!(cat.target(), &strings(&["a.json", "b.json"]));

        assert!(cat.reorder_target(&strings(&["b.json", "a.json"])));
        assert_eq!(cat.target(), &strings(&["b.json", "a.json"]));
    }

    #[test]
    fn remove_target_ignores_absent_names() {
        let mut cat = catalog_with(&["a.json", "b.json"]);
        let loader = TypedLoader::uniform(&["a.json", "b.json"]);
        cat.add_target(&strings(&["a.json", "b.json"]), &loader);
        cat.remove_target(&strings(&["b.json", "zz.json"]));
        assert_eq!(cat.target(), &strings(&["a.json"]));
        cat.remove_target(&strings(&["a.json"]));
        assert!(cat.target().is_empty());
        assert_eq!(cat.analysis_type(), None);
    }

    #[test]
    fn search_modes() {
        let cat = catalog_with(&["run_001.json", "run_002.json", "calib_run.json"]);
        assert_eq!(
            cat.search("run", SearchMode::Prefix).unwrap(),
            strings(&["run_001.json", "run_002.json"])
        );
        assert_eq!(
            cat.search("run", SearchMode::Substring).unwrap(),
            strings(&["calib_run.json", "run_001.json", "run_002.json"])
        );
        assert!(cat.search("zzz", SearchMode::Substring).unwrap().is_empty());
        assert!(matches!(
            cat.search("r", SearchMode::Prefix),
            Err(ViewerError::QueryTooShort { min: 2 })
        ));
    }

    #[test]
    fn refresh_drops_vanished_targets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        let mut cat = FileCatalog::new(dir.path()).unwrap();
        let loader = TypedLoader::uniform(&["a.json", "b.json"]);
        cat.add_target(&strings(&["a.json", "b.json"]), &loader);

        std::fs::remove_file(dir.path().join("b.json")).unwrap();
        cat.refresh().unwrap();
        assert_eq!(cat.target(), &strings(&["a.json"]));
    }

    #[test]
    fn identity_tracks_target_changes_within_bound() {
        let mut cat = catalog_with(&["a.json", "b.json", "c.json"]);
        let loader = TypedLoader::uniform(&["a.json", "b.json", "c.json"]);
        cat.add_target(&strings(&["a.json", "b.json"]), &loader);
        let before = cat.identity(10);
        cat.remove_target(&strings(&["b.json"]));
        assert_ne!(before, cat.identity(10));

        // a change beyond the truncation bound goes unnoticed, by contract
        cat.clear_target();
        cat.add_target(&strings(&["a.json", "b.json", "c.json"]), &loader);
        let h1 = cat.identity(2);
        cat.remove_target(&strings(&["c.json"]));
        assert_eq!(h1, cat.identity(2));
        // full-list hashing does notice it
        cat.add_target(&strings(&["c.json"]), &loader);
        let full = cat.identity(0);
        cat.remove_target(&strings(&["c.json"]));
        assert_ne!(full, cat.identity(0));
    }
}
