//! Extraction pipeline (C5): for each candidate file, decides whether
//! processing is required, dispatches to the worker pool when it is, and
//! folds replies back into the file/module/mock tables (§4.5).

use std::sync::Arc;

use haste_paths::{AbsoluteSystemPathBuf, RelativeSystemPathBuf};

use crate::{
    config::HasteMapConfig,
    duplicates,
    error::{Error, Result},
    mocks,
    plugin::{DependencyExtractor, HasteImpl},
    snapshot::{detect_platform, DuplicateTable, FileEntry, FileTable, ModuleTable, MockTable, GENERIC_PLATFORM},
    worker::{self, ExtractJob, WorkerError, WorkerErrorCode, WorkerPool},
};

pub struct ExtractionContext<'a> {
    pub root_dir: &'a AbsoluteSystemPathBuf,
    pub platforms: &'a [String],
    pub skip_package_json: bool,
    pub retain_all_files: bool,
    pub compute_dependencies: bool,
    pub compute_sha1: bool,
    pub throw_on_module_collision: bool,
    pub mocks_pattern: Option<&'a regex::Regex>,
    pub haste_impl: Arc<dyn HasteImpl>,
    pub dependency_extractor: Arc<dyn DependencyExtractor>,
}

impl<'a> ExtractionContext<'a> {
    pub fn for_config(config: &'a HasteMapConfig) -> Self {
        ExtractionContext {
            root_dir: &config.root_dir,
            platforms: &config.platforms,
            skip_package_json: config.skip_package_json,
            retain_all_files: config.retain_all_files,
            compute_dependencies: config.compute_dependencies,
            compute_sha1: config.compute_sha1,
            throw_on_module_collision: config.throw_on_module_collision,
            mocks_pattern: config.mocks_pattern.as_ref(),
            haste_impl: config.haste_impl.clone(),
            dependency_extractor: config.dependency_extractor.clone(),
        }
    }

    fn job_for(&self, path: &RelativeSystemPathBuf) -> ExtractJob {
        ExtractJob {
            file_path: path.clone(),
            absolute_path: self.root_dir.as_absolute_path().join_relative(path),
            compute_dependencies: self.compute_dependencies,
            compute_sha1: self.compute_sha1,
            haste_impl: self.haste_impl.clone(),
            dependency_extractor: self.dependency_extractor.clone(),
        }
    }

    fn is_package_json(&self, path: &RelativeSystemPathBuf) -> bool {
        path.as_str().rsplit('/').next() == Some("package.json")
    }

    fn is_under_node_modules(&self, path: &RelativeSystemPathBuf) -> bool {
        path.as_str().split('/').any(|seg| seg == "node_modules")
    }

    fn matches_mocks_pattern(&self, path: &RelativeSystemPathBuf) -> bool {
        self.mocks_pattern.map(|re| re.is_match(path.as_str())).unwrap_or(false)
    }
}

enum Decision {
    Skip,
    Sha1Only,
    Extract,
    /// The file was already visited and its haste id is already present in
    /// the module table being rebuilt — §9's open-question decision leaves
    /// this effectively dead in the common case (the rebuilt table starts
    /// empty each build) but it's still checked, literally, per spec.
    AlreadyRegistered,
}

/// Steps 2-3 of §4.5: `skip_package_json` and the `retain_all_files`/
/// `node_modules` branch. Both short-circuit *before* mock registration
/// (step 4), so this is checked first and, if it fires, the caller must
/// skip the mocks-pattern check entirely.
fn decide_before_mocks(ctx: &ExtractionContext, path: &RelativeSystemPathBuf, entry: &FileEntry) -> Option<Decision> {
    if ctx.skip_package_json && ctx.is_package_json(path) {
        return Some(Decision::Skip);
    }

    if ctx.retain_all_files && ctx.is_under_node_modules(path) {
        return Some(if ctx.compute_sha1 && entry.sha1.is_none() {
            Decision::Sha1Only
        } else {
            Decision::Skip
        });
    }

    None
}

/// Steps 5-6 of §4.5, run only for paths that survived steps 2-3 (and had
/// mock registration, step 4, already applied).
fn decide_after_mocks(ctx: &ExtractionContext, path: &RelativeSystemPathBuf, entry: &FileEntry, modules: &ModuleTable) -> Decision {
    if entry.visited {
        if let Some(id) = &entry.haste_id {
            let platform = detect_platform(path, ctx.platforms).unwrap_or(GENERIC_PLATFORM);
            if let Some(existing) = modules.get(id).and_then(|by_platform| by_platform.get(platform)) {
                if &existing.path == path {
                    return Decision::AlreadyRegistered;
                }
            }
        }
    }

    Decision::Extract
}

/// Full §4.5 decision for one candidate, including mock registration (step
/// 4) in its proper place between steps 2-3 and steps 5-6. Returns the
/// final `Decision`; mock registration is a side effect on `mock_table`.
fn decide(
    ctx: &ExtractionContext,
    path: &RelativeSystemPathBuf,
    entry: &FileEntry,
    modules: &ModuleTable,
    mock_table: &mut MockTable,
) -> Result<Decision> {
    if let Some(decision) = decide_before_mocks(ctx, path, entry) {
        return Ok(decision);
    }

    if ctx.matches_mocks_pattern(path) {
        mocks::register(mock_table, path.clone(), ctx.throw_on_module_collision)?;
    }

    Ok(decide_after_mocks(ctx, path, entry, modules))
}

/// Applies a worker reply (success or recoverable failure) to the tables,
/// following §4.5 "Reply handling". Returns `Ok(false)` when the file was
/// dropped from `files` (vanished ENOENT/EACCES) so callers can track that.
fn apply_reply(
    ctx: &ExtractionContext,
    path: &RelativeSystemPathBuf,
    result: std::result::Result<worker::WorkerReply, WorkerError>,
    files: &mut FileTable,
    modules: &mut ModuleTable,
    duplicates_table: &mut DuplicateTable,
) -> Result<bool> {
    match result {
        Ok(reply) => {
            let entry = files.get_mut(path).expect("path came from the file table being processed");
            entry.visited = true;
            if let (Some(id), Some(module)) = (reply.id.clone(), reply.module.clone()) {
                entry.haste_id = Some(id.clone());
                duplicates::set_module(&id, module, ctx.platforms, modules, duplicates_table, ctx.throw_on_module_collision)?;
            }
            entry.deps = reply.deps;
            if ctx.compute_sha1 {
                entry.sha1 = reply.sha1;
            }
            Ok(true)
        }
        Err(err) => match err.code {
            WorkerErrorCode::Enoent | WorkerErrorCode::Eacces => {
                tracing::debug!(path = %path, "file vanished between crawl and extract, dropping");
                files.remove(path);
                Ok(false)
            }
            WorkerErrorCode::Other => Err(Error::WorkerJob {
                path: path.clone(),
                message: err.message,
            }),
        },
    }
}

fn apply_sha1_reply(path: &RelativeSystemPathBuf, result: std::result::Result<worker::WorkerReply, WorkerError>, files: &mut FileTable) -> Result<()> {
    match result {
        Ok(reply) => {
            if let Some(entry) = files.get_mut(path) {
                entry.sha1 = reply.sha1;
            }
            Ok(())
        }
        Err(err) => match err.code {
            WorkerErrorCode::Enoent | WorkerErrorCode::Eacces => {
                files.remove(path);
                Ok(())
            }
            WorkerErrorCode::Other => Err(Error::WorkerJob {
                path: path.clone(),
                message: err.message,
            }),
        },
    }
}

/// Runs the full pipeline over every path currently in `files` (§4.5). Used
/// by the `Builder` for a build's bulk extraction pass.
pub fn run(
    ctx: &ExtractionContext,
    worker_pool: &WorkerPool,
    files: &mut FileTable,
    modules: &mut ModuleTable,
    duplicates_table: &mut DuplicateTable,
    mock_table: &mut MockTable,
) -> Result<()> {
    let candidates: Vec<RelativeSystemPathBuf> = files.keys().cloned().collect();

    let mut extract_jobs = Vec::new();
    let mut sha1_jobs = Vec::new();

    for path in &candidates {
        let entry = files.get(path).expect("path was just read from this same table");

        match decide(ctx, path, entry, modules, mock_table)? {
            Decision::Skip | Decision::AlreadyRegistered => continue,
            Decision::Sha1Only => sha1_jobs.push(ctx.job_for(path)),
            Decision::Extract => extract_jobs.push(ctx.job_for(path)),
        }
    }

    let extract_results = worker_pool.dispatch(extract_jobs, worker::extract);
    for (path, result) in extract_results {
        apply_reply(ctx, &path, result, files, modules, duplicates_table)?;
    }

    let sha1_results = worker_pool.dispatch(sha1_jobs, worker::sha1_only);
    for (path, result) in sha1_results {
        apply_sha1_reply(&path, result, files)?;
    }

    Ok(())
}

/// Runs the pipeline for exactly one path, in-band (§4.9 step 7, watch
/// mode). Mock registration still happens, but there is no batching: a
/// single job is dispatched directly.
pub fn run_single(
    ctx: &ExtractionContext,
    worker_pool: &WorkerPool,
    path: &RelativeSystemPathBuf,
    files: &mut FileTable,
    modules: &mut ModuleTable,
    duplicates_table: &mut DuplicateTable,
    mock_table: &mut MockTable,
) -> Result<()> {
    let entry = files.get(path).expect("caller inserted a placeholder entry before calling run_single");
    match decide(ctx, path, entry, modules, mock_table)? {
        Decision::Skip | Decision::AlreadyRegistered => return Ok(()),
        Decision::Sha1Only => {
            let job = ctx.job_for(path);
            let result = worker_pool.dispatch_one_in_band(&job, worker::sha1_only);
            apply_sha1_reply(path, result, files)?;
            return Ok(());
        }
        Decision::Extract => {
            let job = ctx.job_for(path);
            let result = worker_pool.dispatch_one_in_band(&job, worker::extract);
            apply_reply(ctx, path, result, files, modules, duplicates_table)?;
        }
    }
    Ok(())
}

/// Removes every `(haste_id, platform)` slot this file owned in `modules`,
/// recovering duplicates, and its mock entry if present — used when the
/// watcher learns a previously-known file has been removed or changed
/// (§4.9 step 6).
pub fn forget_file(
    path: &RelativeSystemPathBuf,
    removed_entry: &FileEntry,
    platforms: &[String],
    modules: &mut ModuleTable,
    duplicates_table: &mut DuplicateTable,
    mock_table: &mut MockTable,
) {
    if let Some(id) = &removed_entry.haste_id {
        let platform = detect_platform(path, platforms).unwrap_or(GENERIC_PLATFORM).to_string();
        if let Some(by_platform) = modules.get_mut(id) {
            by_platform.remove(&platform);
            if by_platform.is_empty() {
                modules.remove(id);
            }
        }
        duplicates::recover_duplicates(path, id, platforms, modules, duplicates_table);
    }

    let mock_name = mocks::mock_name_for(path);
    if mock_table.get(&mock_name) == Some(path) {
        mock_table.remove(&mock_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{DefaultDependencyExtractor, DefaultHasteImpl};

    fn ctx<'a>(root_dir: &'a AbsoluteSystemPathBuf, platforms: &'a [String], mocks_pattern: Option<&'a regex::Regex>) -> ExtractionContext<'a> {
        ExtractionContext {
            root_dir,
            platforms,
            skip_package_json: false,
            retain_all_files: false,
            compute_dependencies: true,
            compute_sha1: false,
            throw_on_module_collision: false,
            mocks_pattern,
            haste_impl: Arc::new(DefaultHasteImpl),
            dependency_extractor: Arc::new(DefaultDependencyExtractor),
        }
    }

    #[test]
    fn extraction_populates_modules_and_marks_visited() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Foo.js"), "/** @providesModule Foo */").unwrap();
        let root = AbsoluteSystemPathBuf::new(dir.path().to_path_buf()).unwrap();
        let platforms: Vec<String> = vec![];
        let context = ctx(&root, &platforms, None);
        let pool = WorkerPool::new(1, true);

        let mut files = FileTable::new();
        let path = RelativeSystemPathBuf::new("Foo.js").unwrap();
        files.insert(
            path.clone(),
            FileEntry {
                haste_id: None,
                mtime_ms: 1,
                size: 1,
                visited: false,
                deps: Vec::new(),
                sha1: None,
            },
        );
        let mut modules = ModuleTable::new();
        let mut duplicates_table = DuplicateTable::new();
        let mut mock_table = MockTable::new();

        run(&context, &pool, &mut files, &mut modules, &mut duplicates_table, &mut mock_table).unwrap();

        assert!(files.get(&path).unwrap().visited);
        assert_eq!(modules.get("Foo").unwrap().get("g").unwrap().path, path);
    }

    #[test]
    fn vanished_file_drops_entry_without_failing_the_build() {
        let root = AbsoluteSystemPathBuf::cwd().unwrap();
        let platforms: Vec<String> = vec![];
        let context = ctx(&root, &platforms, None);
        let pool = WorkerPool::new(1, true);

        let mut files = FileTable::new();
        let path = RelativeSystemPathBuf::new("Gone.js").unwrap();
        files.insert(
            path.clone(),
            FileEntry {
                haste_id: None,
                mtime_ms: 1,
                size: 1,
                visited: false,
                deps: Vec::new(),
                sha1: None,
            },
        );
        let mut modules = ModuleTable::new();
        let mut duplicates_table = DuplicateTable::new();
        let mut mock_table = MockTable::new();

        run(&context, &pool, &mut files, &mut modules, &mut duplicates_table, &mut mock_table).unwrap();
        assert!(files.get(&path).is_none());
    }

    #[test]
    fn mocks_pattern_registers_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("__mocks__")).unwrap();
        std::fs::write(dir.path().join("__mocks__/foo.js"), "module.exports = {};").unwrap();
        let root = AbsoluteSystemPathBuf::new(dir.path().to_path_buf()).unwrap();
        let pattern = regex::Regex::new(r"__mocks__/").unwrap();
        let platforms: Vec<String> = vec![];
        let context = ctx(&root, &platforms, Some(&pattern));
        let pool = WorkerPool::new(1, true);

        let mut files = FileTable::new();
        let path = RelativeSystemPathBuf::new("__mocks__/foo.js").unwrap();
        files.insert(
            path.clone(),
            FileEntry {
                haste_id: None,
                mtime_ms: 1,
                size: 1,
                visited: false,
                deps: Vec::new(),
                sha1: None,
            },
        );
        let mut modules = ModuleTable::new();
        let mut duplicates_table = DuplicateTable::new();
        let mut mock_table = MockTable::new();

        run(&context, &pool, &mut files, &mut modules, &mut duplicates_table, &mut mock_table).unwrap();
        assert_eq!(mock_table.get("foo"), Some(&path));
    }

    #[test]
    fn retain_all_files_skips_node_modules_without_sha1_request() {
        let root = AbsoluteSystemPathBuf::cwd().unwrap();
        let platforms: Vec<String> = vec![];
        let mut context = ctx(&root, &platforms, None);
        context.retain_all_files = true;
        let pool = WorkerPool::new(1, true);

        let mut files = FileTable::new();
        let path = RelativeSystemPathBuf::new("node_modules/x/index.js").unwrap();
        files.insert(
            path.clone(),
            FileEntry {
                haste_id: None,
                mtime_ms: 1,
                size: 1,
                visited: false,
                deps: Vec::new(),
                sha1: None,
            },
        );
        let mut modules = ModuleTable::new();
        let mut duplicates_table = DuplicateTable::new();
        let mut mock_table = MockTable::new();

        run(&context, &pool, &mut files, &mut modules, &mut duplicates_table, &mut mock_table).unwrap();
        // Entry remains, untouched (not visited, no extraction attempted).
        assert!(files.contains_key(&path));
        assert!(!files.get(&path).unwrap().visited);
    }

    #[test]
    fn skipped_package_json_never_reaches_mock_registration() {
        let root = AbsoluteSystemPathBuf::cwd().unwrap();
        let pattern = regex::Regex::new(r"package\.json$").unwrap();
        let platforms: Vec<String> = vec![];
        let mut context = ctx(&root, &platforms, Some(&pattern));
        context.skip_package_json = true;
        let pool = WorkerPool::new(1, true);

        let mut files = FileTable::new();
        let path = RelativeSystemPathBuf::new("package.json").unwrap();
        files.insert(
            path.clone(),
            FileEntry {
                haste_id: None,
                mtime_ms: 1,
                size: 1,
                visited: false,
                deps: Vec::new(),
                sha1: None,
            },
        );
        let mut modules = ModuleTable::new();
        let mut duplicates_table = DuplicateTable::new();
        let mut mock_table = MockTable::new();

        run(&context, &pool, &mut files, &mut modules, &mut duplicates_table, &mut mock_table).unwrap();
        assert!(mock_table.is_empty());
    }

    #[test]
    fn retained_node_modules_file_never_reaches_mock_registration() {
        let root = AbsoluteSystemPathBuf::cwd().unwrap();
        let pattern = regex::Regex::new(r"__mocks__/").unwrap();
        let platforms: Vec<String> = vec![];
        let mut context = ctx(&root, &platforms, Some(&pattern));
        context.retain_all_files = true;
        let pool = WorkerPool::new(1, true);

        let mut files = FileTable::new();
        let path = RelativeSystemPathBuf::new("node_modules/x/__mocks__/foo.js").unwrap();
        files.insert(
            path.clone(),
            FileEntry {
                haste_id: None,
                mtime_ms: 1,
                size: 1,
                visited: false,
                deps: Vec::new(),
                sha1: None,
            },
        );
        let mut modules = ModuleTable::new();
        let mut duplicates_table = DuplicateTable::new();
        let mut mock_table = MockTable::new();

        run(&context, &pool, &mut files, &mut modules, &mut duplicates_table, &mut mock_table).unwrap();
        assert!(mock_table.is_empty());
    }

    #[test]
    fn forget_file_clears_module_mock_and_duplicate_state() {
        let platforms: Vec<String> = vec![];
        let mut modules = ModuleTable::new();
        let mut duplicates_table = DuplicateTable::new();
        let mut mock_table = MockTable::new();

        let path = RelativeSystemPathBuf::new("a/Foo.js").unwrap();
        duplicates::set_module(
            "Foo",
            crate::snapshot::ModuleEntry {
                path: path.clone(),
                kind: crate::snapshot::ModuleKind::Module,
            },
            &platforms,
            &mut modules,
            &mut duplicates_table,
            false,
        )
        .unwrap();

        let entry = FileEntry {
            haste_id: Some("Foo".to_string()),
            mtime_ms: 1,
            size: 1,
            visited: true,
            deps: Vec::new(),
            sha1: None,
        };
        forget_file(&path, &entry, &platforms, &mut modules, &mut duplicates_table, &mut mock_table);
        assert!(modules.get("Foo").is_none());
    }
}
