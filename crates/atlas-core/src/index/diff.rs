//! Incremental diff against persisted state.
//!
//! Compares discovered content hashes with the store and classifies every
//! file as new, modified, unchanged, or deleted. Only new and modified
//! files run the pipeline; deleted files have their rows cascaded away
//! before re-insertion begins. A file is never both unchanged and deleted.

use std::collections::HashSet;

use crate::error::AtlasResult;
use crate::store::Store;
use crate::types::DiscoveredFile;

/// What an indexing pass must do.
#[derive(Debug, Default)]
pub struct IncrementalPlan {
    /// Files to run through the pipeline (new and modified).
    pub to_process: Vec<DiscoveredFile>,
    /// Paths of previously indexed files that are no longer on disk.
    pub to_delete: Vec<String>,
    /// Paths that are new to the store.
    pub new_paths: HashSet<String>,
    /// Count of unchanged files, skipped entirely.
    pub unchanged: usize,
}

/// Per-bucket counters for one diff.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DiffStats {
    /// Files absent from the store.
    pub new: usize,
    /// Files whose hash changed.
    pub modified: usize,
    /// Files whose hash is identical.
    pub unchanged: usize,
    /// Stored files no longer discovered.
    pub deleted: usize,
    /// `unchanged / discovered`, as a percentage.
    pub skip_rate: f64,
}

/// Classify discovered files against the store's hashes.
pub fn classify(
    store: &dyn Store,
    repo_path: &str,
    discovered: Vec<DiscoveredFile>,
) -> AtlasResult<(IncrementalPlan, DiffStats)> {
    let known = store.lookup_hashes(repo_path)?;
    let discovered_paths: HashSet<String> =
        discovered.iter().map(|f| f.relative_path.clone()).collect();

    let mut plan = IncrementalPlan::default();
    let mut stats = DiffStats::default();
    let total = discovered.len();

    for file in discovered {
        match known.get(&file.relative_path) {
            None => {
                stats.new += 1;
                plan.new_paths.insert(file.relative_path.clone());
                plan.to_process.push(file);
            }
            Some(hash) if *hash == file.file_hash => {
                stats.unchanged += 1;
                plan.unchanged += 1;
            }
            Some(_) => {
                stats.modified += 1;
                plan.to_process.push(file);
            }
        }
    }

    for path in known.keys() {
        if !discovered_paths.contains(path.as_str()) {
            stats.deleted += 1;
            plan.to_delete.push(path.clone());
        }
    }
    plan.to_delete.sort();

    if total > 0 {
        #[expect(clippy::cast_precision_loss)]
        let rate = stats.unchanged as f64 / total as f64 * 100.0;
        stats.skip_rate = rate;
    }

    Ok((plan, stats))
}

/// Apply the deletion half of a plan. Rows of modified files are replaced
/// inside their per-file persist transaction instead.
pub fn apply_deletions(
    store: &dyn Store,
    repo_path: &str,
    plan: &IncrementalPlan,
) -> AtlasResult<usize> {
    let mut deleted = 0usize;
    for path in &plan.to_delete {
        store.delete_file_cascade(repo_path, path)?;
        deleted += 1;
        tracing::debug!(repo = repo_path, path = %path, "removed vanished file");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;
    use crate::types::{CodeFile, Language, ProjectRefs};
    use std::time::SystemTime;

    fn discovered(path: &str, hash: &str) -> DiscoveredFile {
        DiscoveredFile {
            absolute_path: path.into(),
            relative_path: path.to_string(),
            file_hash: hash.to_string(),
            language: Language::TypeScript,
            line_count: 1,
            size_bytes: 10,
            modified_time: SystemTime::UNIX_EPOCH,
            encoding: "utf-8",
        }
    }

    fn stored_file(path: &str, hash: &str) -> CodeFile {
        CodeFile {
            repo_path: "/repo".into(),
            file_path: path.into(),
            summary: String::new(),
            summary_embedding: Vec::new(),
            language: Language::TypeScript,
            total_lines: 1,
            imports: Vec::new(),
            exports: Vec::new(),
            file_hash: hash.into(),
            last_modified: 0,
            refs: ProjectRefs::default(),
        }
    }

    #[test]
    fn classifies_all_four_buckets() {
        let store = SqliteStore::open_in_memory().expect("open");
        store.persist_file(&stored_file("a.ts", "hash-a"), &[], &[]).expect("a");
        store.persist_file(&stored_file("b.ts", "hash-b"), &[], &[]).expect("b");
        store.persist_file(&stored_file("gone.ts", "hash-g"), &[], &[]).expect("gone");

        let discovered = vec![
            discovered("a.ts", "hash-a"),      // unchanged
            discovered("b.ts", "hash-b2"),     // modified
            discovered("c.ts", "hash-c"),      // new
        ];
        let (plan, stats) = classify(&store, "/repo", discovered).expect("classify");

        assert_eq!(stats.new, 1);
        assert_eq!(stats.modified, 1);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.deleted, 1);
        assert!((stats.skip_rate - 100.0 / 3.0).abs() < 0.1);

        let to_process: Vec<&str> =
            plan.to_process.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(to_process, vec!["b.ts", "c.ts"]);
        assert_eq!(plan.to_delete, vec!["gone.ts"]);
        assert!(plan.new_paths.contains("c.ts"));
        assert!(!plan.new_paths.contains("b.ts"));
    }

    #[test]
    fn unchanged_and_deleted_are_disjoint() {
        let store = SqliteStore::open_in_memory().expect("open");
        store.persist_file(&stored_file("a.ts", "hash-a"), &[], &[]).expect("a");

        let (plan, stats) =
            classify(&store, "/repo", vec![discovered("a.ts", "hash-a")]).expect("classify");
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.deleted, 0);
        assert!(plan.to_delete.is_empty());
        assert!(plan.to_process.is_empty());
    }

    #[test]
    fn apply_removes_vanished_rows() {
        let store = SqliteStore::open_in_memory().expect("open");
        store.persist_file(&stored_file("gone.ts", "h"), &[], &[]).expect("persist");

        let (plan, _) = classify(&store, "/repo", Vec::new()).expect("classify");
        let deleted = apply_deletions(&store, "/repo", &plan).expect("apply");
        assert_eq!(deleted, 1);
        assert!(store.lookup_hashes("/repo").expect("hashes").is_empty());
    }
}
