use std::sync::Arc;

use haste_paths::RelativeSystemPathBuf;

/// Every failure kind a caller can observe, matching the policy table in
/// the design document: most of these are swallowed or retried internally
/// and only ever surface if the documented recovery itself fails.
#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to persist cache at {path}: {source}")]
    CacheWrite {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("daemon crawl failed ({daemon_error}) and native crawl fallback also failed: {native_error}")]
    CrawlFailed {
        daemon_error: String,
        native_error: String,
    },

    #[error("crawl failed: {0}")]
    Crawl(String),

    #[error(
        "root {root} enables symlinks but a watchman config file is present; the daemon cannot \
         honor symlink semantics. Refusing to start."
    )]
    SymlinksDaemonConflict { root: String },

    #[error("module collision for haste id {id:?} ({platform}): {path_a} vs {path_b}")]
    DuplicateModule {
        id: String,
        platform: String,
        path_a: RelativeSystemPathBuf,
        path_b: RelativeSystemPathBuf,
    },

    #[error("mock name collision for {mock_name:?}: {path_a} vs {path_b}")]
    DuplicateMock {
        mock_name: String,
        path_a: RelativeSystemPathBuf,
        path_b: RelativeSystemPathBuf,
    },

    #[error("worker job failed for {path}: {message}")]
    WorkerJob {
        path: RelativeSystemPathBuf,
        message: String,
    },

    #[error("timed out waiting for watcher on root {root} to become ready after {elapsed_ms}ms")]
    WatcherReadyTimeout { root: String, elapsed_ms: u64 },

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Io(Arc<std::io::Error>),

    #[error(transparent)]
    Serde(Arc<serde_json::Error>),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serde(Arc::new(e))
    }
}

impl From<haste_paths::PathError> for Error {
    fn from(e: haste_paths::PathError) -> Self {
        Error::Config(e.to_string())
    }
}

/// `notify::Error` is not `Clone`; wrap it the way `turborepo-filewatch` wraps
/// its watcher errors so it can be cloned into broadcast payloads.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct NotifyError(pub Arc<notify::Error>);

impl From<notify::Error> for NotifyError {
    fn from(e: notify::Error) -> Self {
        NotifyError(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
