//! Worker pool (C4). The original dispatches per-file jobs to a process
//! pool; this crate substitutes a `rayon::ThreadPool` sized to `max_workers`
//! (§4.4 "(ambient/REDESIGN) Process isolation" — recorded in DESIGN.md).
//! Each job still receives only an immutable [`ExtractJob`] and returns an
//! owned [`WorkerReply`]/[`WorkerError`], so no shared mutable state crosses
//! the dispatch boundary even though isolation is now threads, not processes.

use std::sync::Arc;

use haste_paths::{AbsoluteSystemPathBuf, RelativeSystemPathBuf};
use parking_lot::Mutex;
use rayon::prelude::*;
use sha1::{Digest, Sha1};

use crate::{
    plugin::{DependencyExtractor, HasteImpl},
    snapshot::{ModuleEntry, ModuleKind},
};

#[derive(Clone)]
pub struct ExtractJob {
    pub file_path: RelativeSystemPathBuf,
    pub absolute_path: AbsoluteSystemPathBuf,
    pub compute_dependencies: bool,
    pub compute_sha1: bool,
    pub haste_impl: Arc<dyn HasteImpl>,
    pub dependency_extractor: Arc<dyn DependencyExtractor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerErrorCode {
    Enoent,
    Eacces,
    Other,
}

#[derive(Debug, Clone)]
pub struct WorkerError {
    pub code: WorkerErrorCode,
    pub message: String,
}

impl WorkerError {
    fn from_io(err: &std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => WorkerErrorCode::Enoent,
            std::io::ErrorKind::PermissionDenied => WorkerErrorCode::Eacces,
            _ => WorkerErrorCode::Other,
        };
        WorkerError {
            code,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkerReply {
    pub id: Option<String>,
    pub module: Option<ModuleEntry>,
    pub deps: Vec<String>,
    pub sha1: Option<String>,
}

/// Reads `job.absolute_path` and runs the configured `HasteImpl`/
/// `DependencyExtractor` over its contents (§4.4, §9 "default extractor
/// plugin").
pub fn extract(job: &ExtractJob) -> Result<WorkerReply, WorkerError> {
    let contents = std::fs::read_to_string(job.absolute_path.as_path()).map_err(|e| WorkerError::from_io(&e))?;

    let id = job.haste_impl.get_haste_name(job.file_path.as_str(), &contents);
    let module = id.as_ref().map(|_| ModuleEntry {
        path: job.file_path.clone(),
        kind: module_kind(job.file_path.as_str()),
    });

    let deps = if job.compute_dependencies {
        job.dependency_extractor
            .extract(&contents, job.file_path.as_str(), job.dependency_extractor.as_ref())
            .into_iter()
            .collect()
    } else {
        Vec::new()
    };

    let sha1 = if job.compute_sha1 {
        Some(sha1_hex(contents.as_bytes()))
    } else {
        None
    };

    Ok(WorkerReply { id, module, deps, sha1 })
}

/// Computes only the content hash, used for `retain_all_files` entries under
/// `node_modules` that don't otherwise need extraction (§4.5 step 3).
pub fn sha1_only(job: &ExtractJob) -> Result<WorkerReply, WorkerError> {
    let bytes = std::fs::read(job.absolute_path.as_path()).map_err(|e| WorkerError::from_io(&e))?;
    Ok(WorkerReply {
        sha1: Some(sha1_hex(&bytes)),
        ..Default::default()
    })
}

fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// A `package.json` is registered as a package root; everything else is an
/// ordinary module.
fn module_kind(file_path: &str) -> ModuleKind {
    if file_path.rsplit('/').next() == Some("package.json") {
        ModuleKind::Package
    } else {
        ModuleKind::Module
    }
}

const MAX_RETRIES: usize = 3;

fn run_with_retries(job: &ExtractJob, op: fn(&ExtractJob) -> Result<WorkerReply, WorkerError>) -> Result<WorkerReply, WorkerError> {
    let mut last_err = None;
    for attempt in 0..MAX_RETRIES {
        match op(job) {
            Ok(reply) => return Ok(reply),
            Err(err) => {
                // ENOENT/EACCES are terminal states, not transient failures:
                // retrying a file that doesn't exist wastes the retry budget.
                if matches!(err.code, WorkerErrorCode::Enoent | WorkerErrorCode::Eacces) {
                    return Err(err);
                }
                tracing::warn!(path = %job.file_path, attempt, error = %err.message, "worker job failed, retrying");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

pub type WorkerOp = fn(&ExtractJob) -> Result<WorkerReply, WorkerError>;

/// Routes a batch of jobs to a `rayon::ThreadPool` lazily created on first
/// use, or runs them synchronously on the caller's thread when
/// `max_workers <= 1` or `force_in_band` is set (§4.4 dispatch policy).
pub struct WorkerPool {
    max_workers: usize,
    force_in_band: bool,
    pool: Mutex<Option<Arc<rayon::ThreadPool>>>,
}

impl WorkerPool {
    pub fn new(max_workers: usize, force_in_band: bool) -> Self {
        Self {
            max_workers,
            force_in_band,
            pool: Mutex::new(None),
        }
    }

    fn pool(&self) -> Arc<rayon::ThreadPool> {
        let mut guard = self.pool.lock();
        if guard.is_none() {
            let built = rayon::ThreadPoolBuilder::new()
                .num_threads(self.max_workers.max(1))
                .thread_name(|i| format!("haste-map-worker-{i}"))
                .build()
                .expect("failed to build haste-map worker pool");
            *guard = Some(Arc::new(built));
        }
        guard.as_ref().unwrap().clone()
    }

    /// Dispatches `jobs` through `op`, preserving input order in the result
    /// vector (the coordinating side merges replies strictly in that order,
    /// §5 "ordering guarantees").
    pub fn dispatch(&self, jobs: Vec<ExtractJob>, op: WorkerOp) -> Vec<(RelativeSystemPathBuf, Result<WorkerReply, WorkerError>)> {
        if jobs.is_empty() {
            return Vec::new();
        }
        if self.max_workers <= 1 || self.force_in_band {
            return jobs
                .iter()
                .map(|job| (job.file_path.clone(), run_with_retries(job, op)))
                .collect();
        }

        let pool = self.pool();
        pool.install(|| {
            jobs.par_iter()
                .map(|job| (job.file_path.clone(), run_with_retries(job, op)))
                .collect()
        })
    }

    /// Runs a single job in-band, used by watch mode (§4.9 step 7: "dispatch
    /// extraction in-band, then tear down the worker pool immediately
    /// afterwards").
    pub fn dispatch_one_in_band(&self, job: &ExtractJob, op: WorkerOp) -> Result<WorkerReply, WorkerError> {
        run_with_retries(job, op)
    }

    /// Tears down the lazily created thread pool (`_cleanup`, §4.4/§5).
    pub fn cleanup(&self) {
        *self.pool.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{DefaultDependencyExtractor, DefaultHasteImpl};

    fn job(path: &std::path::Path, relative: &str) -> ExtractJob {
        ExtractJob {
            file_path: RelativeSystemPathBuf::new(relative).unwrap(),
            absolute_path: AbsoluteSystemPathBuf::new(path.to_path_buf()).unwrap(),
            compute_dependencies: true,
            compute_sha1: true,
            haste_impl: Arc::new(DefaultHasteImpl),
            dependency_extractor: Arc::new(DefaultDependencyExtractor),
        }
    }

    #[test]
    fn extract_reads_haste_id_deps_and_sha1() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("Foo.js");
        std::fs::write(&file_path, "/** @providesModule Foo */\nrequire('./bar');").unwrap();

        let job = job(&file_path, "Foo.js");
        let reply = extract(&job).unwrap();
        assert_eq!(reply.id, Some("Foo".to_string()));
        assert_eq!(reply.deps, vec!["./bar".to_string()]);
        assert!(reply.sha1.is_some());
    }

    #[test]
    fn extract_missing_file_is_enoent() {
        let job = job(std::path::Path::new("/definitely/does/not/exist.js"), "exist.js");
        let err = extract(&job).unwrap_err();
        assert_eq!(err.code, WorkerErrorCode::Enoent);
    }

    #[test]
    fn package_json_is_classified_as_package_kind() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("package.json");
        std::fs::write(&file_path, "/** @providesModule MyPkg */").unwrap();
        let job = job(&file_path, "package.json");
        let reply = extract(&job).unwrap();
        assert_eq!(reply.module.unwrap().kind, ModuleKind::Package);
    }

    #[test]
    fn sha1_only_does_not_populate_id_or_deps() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("x.js");
        std::fs::write(&file_path, "hello").unwrap();
        let job = job(&file_path, "x.js");
        let reply = sha1_only(&job).unwrap();
        assert!(reply.id.is_none());
        assert!(reply.deps.is_empty());
        assert!(reply.sha1.is_some());
    }

    #[test]
    fn worker_pool_dispatches_in_band_when_max_workers_is_one() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.js");
        std::fs::write(&file_path, "require('./b');").unwrap();
        let pool = WorkerPool::new(1, false);
        let jobs = vec![job(&file_path, "a.js")];
        let results = pool.dispatch(jobs, extract);
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_ok());
    }

    #[test]
    fn worker_pool_dispatches_across_threads_when_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let mut jobs = Vec::new();
        for i in 0..8 {
            let file_path = dir.path().join(format!("f{i}.js"));
            std::fs::write(&file_path, format!("/** @providesModule F{i} */")).unwrap();
            jobs.push(job(&file_path, &format!("f{i}.js")));
        }
        let pool = WorkerPool::new(4, false);
        let results = pool.dispatch(jobs, extract);
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        pool.cleanup();
    }
}
