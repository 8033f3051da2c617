//! Builder (C8): top-level orchestration of phases 1-4 (read -> crawl ->
//! extract -> persist), modeled as the linear state machine in §4.8.

use std::collections::BTreeSet;
use std::sync::Arc;

use haste_paths::AbsoluteSystemPathBuf;

use crate::{
    cache::{self, CacheKeyParts},
    config::HasteMapConfig,
    crawler::{self, CrawlRequest, Crawler, DaemonCrawler, DaemonProbe, DefaultDaemonProbe, MemoizedDaemonProbe, NativeCrawler},
    error::{Error, Result},
    extract::{self, ExtractionContext},
    snapshot::{DuplicateTable, ModuleTable, MockTable, Snapshot},
    view::HasteMapView,
    worker::WorkerPool,
};

/// `Idle -> Reading -> Crawling -> Extracting -> Persisting -> Done`. Only
/// `Done` is externally observable (as the `build()` return value); the
/// intermediate states exist to document the pipeline's ordering, not to be
/// queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Reading,
    Crawling,
    Extracting,
    Persisting,
    Done,
}

/// The crate's own cargo version, folded into the cache key so an upgrade
/// invalidates every existing snapshot blob (§4.1).
const HASTE_MAP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Builder {
    config: HasteMapConfig,
    worker_pool: WorkerPool,
    daemon_probe: Arc<dyn DaemonProbe>,
    cache_path: AbsoluteSystemPathBuf,
    /// `build()`'s idempotent/memoized contract (§4.8): concurrent callers
    /// await the same in-flight future rather than racing a second build.
    result: tokio::sync::OnceCell<std::result::Result<HasteMapView, Arc<Error>>>,
    /// `(changed, removed)` counts from the crawl that produced `result`,
    /// for callers (the CLI summary line) that want them without re-deriving
    /// from a view.
    counts: tokio::sync::OnceCell<(usize, usize)>,
}

impl Builder {
    pub fn new(config: HasteMapConfig) -> Self {
        let probe = Arc::new(MemoizedDaemonProbe::new(DefaultDaemonProbe::new(config.roots.clone())));
        Self::with_daemon_probe(config, probe)
    }

    pub fn with_daemon_probe(config: HasteMapConfig, daemon_probe: Arc<dyn DaemonProbe>) -> Self {
        let cache_path = Self::compute_cache_path(&config);
        let worker_pool = WorkerPool::new(config.max_workers, false);
        Self {
            config,
            worker_pool,
            daemon_probe,
            cache_path,
            result: tokio::sync::OnceCell::new(),
            counts: tokio::sync::OnceCell::new(),
        }
    }

    fn compute_cache_path(config: &HasteMapConfig) -> AbsoluteSystemPathBuf {
        let haste_impl_key = config.haste_impl.get_cache_key();
        let dependency_extractor_key = config.dependency_extractor.get_cache_key();
        let mut parts = CacheKeyParts::from_config(config, HASTE_MAP_VERSION);
        parts.haste_impl_cache_key = &haste_impl_key;
        parts.dependency_extractor_cache_key = &dependency_extractor_key;
        cache::snapshot_path(&config.cache_directory, &config.name, &parts)
    }

    pub fn config(&self) -> &HasteMapConfig {
        &self.config
    }

    pub fn cache_path(&self) -> &AbsoluteSystemPathBuf {
        &self.cache_path
    }

    /// Runs (or awaits an already-running) build. Idempotent: a second call
    /// with no intervening mutation returns the same `Ok`/`Err` (§8
    /// "idempotent build").
    pub async fn build(&self) -> std::result::Result<HasteMapView, Arc<Error>> {
        self.result
            .get_or_init(|| async { self.build_once().await.map_err(Arc::new) })
            .await
            .clone()
    }

    async fn build_once(&self) -> Result<HasteMapView> {
        // Reading
        let prior = if self.config.reset_cache {
            Snapshot::empty()
        } else {
            cache::read(&self.cache_path)
        };

        // Crawling
        let use_daemon = crawler::daemon_available(self.config.use_watchman, self.config.enable_symlinks, self.daemon_probe.as_ref());
        let native = NativeCrawler;
        let daemon = DaemonCrawler::new(self.daemon_socket_path());
        let req = CrawlRequest {
            roots: &self.config.roots,
            extensions: &self.config.extensions,
            ignore: &self.config.ignore_pattern,
            retain_all_files: self.config.retain_all_files,
            compute_sha1: self.config.compute_sha1,
            enable_symlinks: self.config.enable_symlinks,
            force_node_filesystem_api: self.config.force_node_filesystem_api,
            prior: &prior,
        };
        let crawl_result = crawler::crawl(use_daemon, &daemon, &native, req)?;
        let counts = changed_and_removed_counts(&crawl_result.changed, &crawl_result.removed);
        let _ = self.counts.set(counts);

        // Extracting
        let mut files = crawl_result.files;
        let mut modules = ModuleTable::new();
        let mut duplicates = DuplicateTable::new();
        let mut mocks = MockTable::new();

        let extraction_ctx = ExtractionContext::for_config(&self.config);
        extract::run(&extraction_ctx, &self.worker_pool, &mut files, &mut modules, &mut duplicates, &mut mocks)?;

        let snapshot = Snapshot {
            clocks: crawl_result.clocks,
            files,
            modules,
            mocks,
            duplicates,
        };

        // Persisting: iff `changed` is unknown, or either delta is non-empty
        // (§4.8 persistence rule, §8 "empty-delta no-write").
        let should_persist = crawl_result.changed.is_none()
            || crawl_result.changed.as_ref().map(|c| !c.is_empty()).unwrap_or(false)
            || !crawl_result.removed.is_empty();

        if should_persist {
            cache::write(&self.cache_path, &snapshot)?;
        }

        self.worker_pool.cleanup();

        Ok(HasteMapView::from_snapshot(&snapshot, self.config.root_dir.clone(), Arc::new(self.config.platforms.clone())))
    }

    fn daemon_socket_path(&self) -> AbsoluteSystemPathBuf {
        self.cache_path
            .as_absolute_path()
            .parent()
            .map(|p| p.join_relative(&haste_paths::RelativeSystemPathBuf::new("haste-map.sock").unwrap()))
            .unwrap_or_else(|| self.cache_path.clone())
    }

    /// Snapshot currently on disk for this cache key, if any. Used by the
    /// watcher to seed its in-memory copy without re-running `build()`.
    pub fn read_persisted(&self) -> Snapshot {
        cache::read(&self.cache_path)
    }

    pub fn worker_pool(&self) -> &WorkerPool {
        &self.worker_pool
    }

    /// `(changed, removed)` counts from the crawl behind the most recent
    /// `build()`, if one has completed. `None` before the first build.
    pub fn last_counts(&self) -> Option<(usize, usize)> {
        self.counts.get().copied()
    }
}

/// `(|changed|, |removed|)`, with `changed: None` (delta-unknown) counted as
/// zero since it isn't a concrete set of paths to report.
fn changed_and_removed_counts(changed: &Option<BTreeSet<haste_paths::RelativeSystemPathBuf>>, removed: &BTreeSet<haste_paths::RelativeSystemPathBuf>) -> (usize, usize) {
    (changed.as_ref().map(|c| c.len()).unwrap_or(0), removed.len())
}
