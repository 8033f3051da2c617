//! Crawler facade (C3): obtains the observed file set either from a full
//! native walk or from a daemon-backed delta crawl, and falls back from one
//! to the other per the failure policy in §4.3.

use std::collections::BTreeSet;
use std::sync::Arc;

use haste_paths::{AbsoluteSystemPathBuf, RelativeSystemPathBuf};
use once_cell::sync::OnceCell;

use crate::{
    error::{Error, Result},
    ignore::{is_ignored, IgnorePattern},
    snapshot::{ClockTable, FileEntry, FileTable, Snapshot},
};

/// Everything a `Crawler` needs to produce an observed file set. All fields
/// are references/`Copy` so the request can be cheaply re-issued against the
/// native crawler after a daemon failure (§4.3 "retry once").
#[derive(Clone)]
pub struct CrawlRequest<'a> {
    pub roots: &'a [AbsoluteSystemPathBuf],
    pub extensions: &'a [String],
    pub ignore: &'a IgnorePattern,
    pub retain_all_files: bool,
    pub compute_sha1: bool,
    pub enable_symlinks: bool,
    pub force_node_filesystem_api: bool,
    pub prior: &'a Snapshot,
}

pub struct CrawlResult {
    /// The full observed set, each entry merged with its prior `FileEntry`
    /// when content is unchanged (preserving `visited`/`haste_id`/`deps`/
    /// `sha1`), or reset to an unvisited placeholder when new or modified.
    pub files: FileTable,
    /// `None` if the crawler cannot identify deltas (forces full
    /// re-extraction); otherwise the set of added/modified paths.
    pub changed: Option<BTreeSet<RelativeSystemPathBuf>>,
    pub removed: BTreeSet<RelativeSystemPathBuf>,
    pub clocks: ClockTable,
}

/// Tagged-alternative crawler contract (§9 "model as tagged alternatives
/// behind a narrow trait"): exactly two implementors, `NativeCrawler` and
/// `DaemonCrawler`.
pub trait Crawler {
    fn crawl(&self, req: CrawlRequest) -> Result<CrawlResult>;
}

/// Probes for a reachable filesystem-indexing daemon. Modeled as an
/// injectable capability (§9 "singleton state") rather than a bare free
/// function so tests can substitute a fake probe.
pub trait DaemonProbe: Send + Sync {
    fn probe(&self) -> bool;
}

/// Default probe: looks for a `.watchmanconfig` marker file under any root,
/// then for a `watchman` binary on `PATH` — the same two-step
/// marker-file-then-binary check `turborepo-lib`'s daemon connector uses
/// before dialing a socket.
pub struct DefaultDaemonProbe {
    roots: Vec<AbsoluteSystemPathBuf>,
}

impl DefaultDaemonProbe {
    pub fn new(roots: Vec<AbsoluteSystemPathBuf>) -> Self {
        Self { roots }
    }
}

impl DaemonProbe for DefaultDaemonProbe {
    fn probe(&self) -> bool {
        let has_config = self.roots.iter().any(|root| {
            let marker = root
                .as_absolute_path()
                .join_relative(&RelativeSystemPathBuf::new(".watchmanconfig").unwrap());
            marker.as_path().exists()
        });
        if !has_config {
            return false;
        }
        which_watchman()
    }
}

fn which_watchman() -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| {
                let candidate = dir.join("watchman");
                candidate.is_file()
            })
        })
        .unwrap_or(false)
}

/// Process-wide memoization of the daemon probe result, matching §9's
/// "evaluated once" singleton-state guidance.
pub struct MemoizedDaemonProbe<P> {
    inner: P,
    cached: OnceCell<bool>,
}

impl<P: DaemonProbe> MemoizedDaemonProbe<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cached: OnceCell::new(),
        }
    }
}

impl<P: DaemonProbe> DaemonProbe for MemoizedDaemonProbe<P> {
    fn probe(&self) -> bool {
        *self.cached.get_or_init(|| self.inner.probe())
    }
}

/// Walks the configured roots with `walkdir::WalkDir`, the same crate
/// `turborepo-filewatch`/`turborepo-scm` use for recursive directory walks.
pub struct NativeCrawler;

impl Crawler for NativeCrawler {
    fn crawl(&self, req: CrawlRequest) -> Result<CrawlResult> {
        let mut observed: FileTable = FileTable::new();

        for root in req.roots {
            let mut walker = walkdir::WalkDir::new(root.as_path());
            if !req.enable_symlinks {
                walker = walker.follow_links(false);
            } else {
                walker = walker.follow_links(true);
            }

            for entry in walker.into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_dir() {
                    continue;
                }
                let absolute = match AbsoluteSystemPathBuf::new(entry.path().to_path_buf()) {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                let Some(relative) = root.as_absolute_path().anchor(absolute.as_absolute_path()) else {
                    continue;
                };

                if !req
                    .extensions
                    .iter()
                    .any(|ext| relative.extension() == Some(ext.as_str()))
                {
                    continue;
                }
                if is_ignored(
                    req.ignore,
                    relative.as_str(),
                    absolute.to_string().as_str(),
                    req.retain_all_files,
                ) {
                    continue;
                }

                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                let mtime_ms = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or_default();
                let size = metadata.len();

                observed.insert(relative, (mtime_ms, size));
            }
        }

        Ok(merge_observed(observed, req.prior))
    }
}

/// Merges a freshly observed `(mtime, size)` listing with the prior
/// snapshot: unchanged files keep their prior `FileEntry` (and are excluded
/// from `changed`); new or modified files get a blank, unvisited entry and
/// are added to `changed`; files present in the prior snapshot but absent
/// from the new listing populate `removed`.
fn merge_observed(observed: std::collections::BTreeMap<RelativeSystemPathBuf, (i64, u64)>, prior: &Snapshot) -> CrawlResult {
    let mut files = FileTable::new();
    let mut changed = BTreeSet::new();

    for (path, (mtime_ms, size)) in observed {
        match prior.files.get(&path) {
            Some(existing) if existing.mtime_ms == mtime_ms && existing.size == size => {
                files.insert(path, existing.clone());
            }
            _ => {
                files.insert(
                    path.clone(),
                    FileEntry {
                        haste_id: None,
                        mtime_ms,
                        size,
                        visited: false,
                        deps: Vec::new(),
                        sha1: None,
                    },
                );
                changed.insert(path);
            }
        }
    }

    let removed: BTreeSet<RelativeSystemPathBuf> = prior
        .files
        .keys()
        .filter(|p| !files.contains_key(*p))
        .cloned()
        .collect();

    CrawlResult {
        files,
        changed: Some(changed),
        removed,
        clocks: prior.clocks.clone(),
    }
}

/// Thin client over a line-delimited `serde_json` protocol on a Unix domain
/// socket (§6 "ambient daemon protocol"). Connection failure, a stale or
/// missing socket, or a malformed line are all "daemon unavailable" and fold
/// into the native-crawler fallback — never fatal by themselves.
pub struct DaemonCrawler {
    socket_path: AbsoluteSystemPathBuf,
}

#[derive(serde::Serialize)]
#[serde(tag = "type")]
enum DaemonRequest {
    Crawl {
        roots: Vec<String>,
        since_clock: ClockTable,
    },
}

#[derive(serde::Deserialize)]
#[serde(tag = "type")]
enum DaemonMessage {
    Snapshot {
        files: Vec<(String, i64, u64)>,
        removed: Vec<String>,
        clocks: ClockTable,
    },
}

impl DaemonCrawler {
    pub fn new(socket_path: AbsoluteSystemPathBuf) -> Self {
        Self { socket_path }
    }

    fn dial(&self, req: &CrawlRequest) -> Result<DaemonMessage> {
        #[cfg(unix)]
        {
            use std::io::{BufRead, BufReader, Write};
            use std::os::unix::net::UnixStream;

            let mut stream = UnixStream::connect(self.socket_path.as_path())
                .map_err(|e| Error::Crawl(format!("connecting to daemon socket: {e}")))?;
            let request = DaemonRequest::Crawl {
                roots: req
                    .roots
                    .iter()
                    .map(|r| r.to_string())
                    .collect(),
                since_clock: req.prior.clocks.clone(),
            };
            let mut line = serde_json::to_string(&request).map_err(|e| Error::Crawl(e.to_string()))?;
            line.push('\n');
            stream
                .write_all(line.as_bytes())
                .map_err(|e| Error::Crawl(format!("writing daemon request: {e}")))?;

            let mut reader = BufReader::new(stream);
            let mut reply = String::new();
            reader
                .read_line(&mut reply)
                .map_err(|e| Error::Crawl(format!("reading daemon reply: {e}")))?;
            if reply.trim().is_empty() {
                return Err(Error::Crawl("daemon closed connection without a reply".into()));
            }
            serde_json::from_str(&reply).map_err(|e| Error::Crawl(format!("malformed daemon reply: {e}")))
        }
        #[cfg(not(unix))]
        {
            let _ = req;
            Err(Error::Crawl("daemon crawler is only available on unix".into()))
        }
    }
}

impl Crawler for DaemonCrawler {
    fn crawl(&self, req: CrawlRequest) -> Result<CrawlResult> {
        let DaemonMessage::Snapshot { files, removed, clocks } = self.dial(&req)?;

        let mut file_table = FileTable::new();
        for (path, mtime_ms, size) in files {
            let Ok(path) = RelativeSystemPathBuf::new(path) else {
                continue;
            };
            match req.prior.files.get(&path) {
                Some(existing) if existing.mtime_ms == mtime_ms && existing.size == size => {
                    file_table.insert(path, existing.clone());
                }
                _ => {
                    file_table.insert(
                        path,
                        FileEntry {
                            haste_id: None,
                            mtime_ms,
                            size,
                            visited: false,
                            deps: Vec::new(),
                            sha1: None,
                        },
                    );
                }
            }
        }

        let removed: BTreeSet<RelativeSystemPathBuf> = removed
            .into_iter()
            .filter_map(|p| RelativeSystemPathBuf::new(p).ok())
            .collect();

        // A daemon listing is always a full listing of what's currently
        // live; since it doesn't distinguish unchanged-but-reported entries
        // from genuinely new ones in this minimal protocol, treat every
        // build with a daemon crawl as requiring a full re-extract pass —
        // `changed: None` forces that in the extraction pipeline.
        Ok(CrawlResult {
            files: file_table,
            changed: None,
            removed,
            clocks,
        })
    }
}

/// Runs the crawler facade's retry policy (§4.3, §7): when `use_daemon` is
/// set, a daemon failure logs a warning and retries once on the native
/// crawler; a second failure is fatal with a wrapped error citing both.
pub fn crawl(use_daemon: bool, daemon: &dyn Crawler, native: &dyn Crawler, req: CrawlRequest) -> Result<CrawlResult> {
    if use_daemon {
        match daemon.crawl(req.clone()) {
            Ok(result) => return Ok(result),
            Err(daemon_err) => {
                tracing::warn!(error = %daemon_err, "daemon crawl failed, retrying with native crawler");
                return native.crawl(req).map_err(|native_err| Error::CrawlFailed {
                    daemon_error: daemon_err.to_string(),
                    native_error: native_err.to_string(),
                });
            }
        }
    }
    native.crawl(req)
}

pub fn daemon_available(use_watchman: bool, enable_symlinks: bool, probe: &dyn DaemonProbe) -> bool {
    use_watchman && !enable_symlinks && probe.probe()
}

/// Shared `OnceCell`-backed probe handle so `Builder` and `Watcher`
/// construction sites don't each re-run the filesystem probe.
pub type SharedDaemonProbe = Arc<dyn DaemonProbe>;
