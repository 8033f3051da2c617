//! Watcher (C9): attaches one event source per root, coalesces filesystem
//! events into timed emission frames, and feeds each relevant change back
//! through the extraction pipeline in-band (§4.9).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use haste_paths::{AbsoluteSystemPathBuf, RelativeSystemPathBuf};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    config::HasteMapConfig,
    crawler,
    crawler::DaemonProbe,
    error::{Error, Result},
    extract::{self, ExtractionContext},
    ignore::is_ignored,
    snapshot::{FileEntry, Snapshot},
    view::HasteMapView,
    worker::WorkerPool,
};

const MAX_WAIT_TIME_MS: u64 = 240_000;
const CHANGE_INTERVAL_MS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Add,
    Change,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    pub kind: WatchEventKind,
    pub path: RelativeSystemPathBuf,
}

/// A single emission frame: a consistent view of the Snapshot as it stood
/// when the accumulated events were flushed (§4.9 "Emission").
#[derive(Clone)]
pub struct ChangeEvent {
    pub view: HasteMapView,
    pub events: Vec<QueuedEvent>,
}

/// One notify-compatible backend behind a narrow trait, so daemon-backed,
/// OS-native, and polling sources are interchangeable at the call site
/// (§4.9 "Selects event source in priority order").
pub trait EventSource: Send + Sync {
    fn start(
        &self,
        root: &AbsoluteSystemPathBuf,
        sender: mpsc::Sender<notify::Result<notify::Event>>,
    ) -> Result<Box<dyn std::any::Any + Send>>;
}

/// OS-native watcher, falling back to polling when the recommended backend
/// can't be constructed — the same two-tier fallback `turborepo-filewatch`
/// encodes as a `cfg`-gated `Backend` type alias, done here at runtime
/// instead since `notify::PollWatcher` is always available as a fallback.
pub struct NotifyEventSource {
    pub force_poll: bool,
}

impl EventSource for NotifyEventSource {
    fn start(
        &self,
        root: &AbsoluteSystemPathBuf,
        sender: mpsc::Sender<notify::Result<notify::Event>>,
    ) -> Result<Box<dyn std::any::Any + Send>> {
        use notify::Watcher;

        let recommended_tx = sender.clone();
        let recommended_handler = move |res: notify::Result<notify::Event>| {
            let _ = recommended_tx.blocking_send(res);
        };

        let mut watcher: Box<dyn notify::Watcher + Send> = if self.force_poll {
            Box::new(
                notify::PollWatcher::new(recommended_handler, notify::Config::default())
                    .map_err(|e| Error::Notify(e.into()))?,
            )
        } else {
            match notify::RecommendedWatcher::new(recommended_handler, notify::Config::default()) {
                Ok(w) => Box::new(w),
                Err(_) => {
                    let poll_tx = sender.clone();
                    let poll_handler = move |res: notify::Result<notify::Event>| {
                        let _ = poll_tx.blocking_send(res);
                    };
                    Box::new(
                        notify::PollWatcher::new(poll_handler, notify::Config::default())
                            .map_err(|e| Error::Notify(e.into()))?,
                    )
                }
            }
        };

        watcher
            .watch(root.as_path(), notify::RecursiveMode::Recursive)
            .map_err(|e| Error::Notify(e.into()))?;

        Ok(Box::new(watcher))
    }
}

#[derive(serde::Deserialize)]
#[serde(tag = "type")]
enum DaemonEventMessage {
    Changed { path: String, kind: String },
}

/// Thin client over the same line-delimited `serde_json` protocol the
/// crawler's daemon client speaks, forwarding each reported change as a
/// synthetic `notify::Event` so it can share the rest of the pipeline
/// unmodified.
pub struct DaemonEventSource {
    socket_path: AbsoluteSystemPathBuf,
}

impl DaemonEventSource {
    pub fn new(socket_path: AbsoluteSystemPathBuf) -> Self {
        Self { socket_path }
    }
}

impl EventSource for DaemonEventSource {
    fn start(
        &self,
        root: &AbsoluteSystemPathBuf,
        sender: mpsc::Sender<notify::Result<notify::Event>>,
    ) -> Result<Box<dyn std::any::Any + Send>> {
        #[cfg(unix)]
        {
            use std::io::{BufRead, BufReader};
            use std::os::unix::net::UnixStream;

            let stream = UnixStream::connect(self.socket_path.as_path())
                .map_err(|e| Error::Crawl(format!("connecting to daemon event socket: {e}")))?;
            let root_path = root.as_path().to_path_buf();

            let handle = std::thread::spawn(move || {
                let reader = BufReader::new(stream);
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let Ok(DaemonEventMessage::Changed { path, kind }) = serde_json::from_str::<DaemonEventMessage>(&line) else {
                        continue;
                    };
                    let event_kind = match kind.as_str() {
                        "add" => notify::EventKind::Create(notify::event::CreateKind::File),
                        "change" => notify::EventKind::Modify(notify::event::ModifyKind::Any),
                        "delete" => notify::EventKind::Remove(notify::event::RemoveKind::File),
                        _ => continue,
                    };
                    let event = notify::Event {
                        paths: vec![root_path.join(&path)],
                        kind: event_kind,
                        attrs: notify::event::EventAttributes::default(),
                    };
                    if sender.blocking_send(Ok(event)).is_err() {
                        break;
                    }
                }
            });

            Ok(Box::new(handle))
        }
        #[cfg(not(unix))]
        {
            let _ = (root, sender);
            Err(Error::Crawl("daemon event source is only available on unix".into()))
        }
    }
}

fn classify(kind: &notify::EventKind) -> Option<WatchEventKind> {
    match kind {
        notify::EventKind::Create(_) => Some(WatchEventKind::Add),
        notify::EventKind::Modify(_) => Some(WatchEventKind::Change),
        notify::EventKind::Remove(_) => Some(WatchEventKind::Delete),
        _ => None,
    }
}

/// Writes a cookie file under `root` and blocks (up to `MAX_WAIT_TIME_MS`)
/// until the same raw-event stream reports it, mirroring
/// `turborepo-filewatch::wait_for_cookie`'s round trip. Any event observed
/// before the cookie arrives is discarded; it predates "ready".
async fn wait_for_ready(root: &AbsoluteSystemPathBuf, raw_rx: &mut mpsc::Receiver<notify::Result<notify::Event>>) -> Result<()> {
    let cookie_path = root
        .as_absolute_path()
        .join_relative(&RelativeSystemPathBuf::new(".haste-map-cookie").unwrap());
    std::fs::write(cookie_path.as_path(), b"cookie")?;

    let wait = async {
        loop {
            match raw_rx.recv().await {
                Some(Ok(event)) if event.paths.iter().any(|p| p == cookie_path.as_path()) => return,
                Some(_) => continue,
                None => return,
            }
        }
    };

    tokio::time::timeout(Duration::from_millis(MAX_WAIT_TIME_MS), wait)
        .await
        .map_err(|_| Error::WatcherReadyTimeout {
            root: root.to_string(),
            elapsed_ms: MAX_WAIT_TIME_MS,
        })?;

    let _ = std::fs::remove_file(cookie_path.as_path());
    Ok(())
}

/// The single coordinating task's private state: the copy-on-write
/// Snapshot, the watch-mode-overridden config, and the pending emission
/// frame (§4.9 steps 1-8).
struct WatchState {
    current: Arc<Snapshot>,
    config: HasteMapConfig,
    worker_pool: WorkerPool,
    events_queue: Vec<QueuedEvent>,
    queued_keys: HashSet<(WatchEventKind, RelativeSystemPathBuf, Option<i64>)>,
}

impl WatchState {
    fn new(config: &HasteMapConfig, initial: Snapshot) -> Self {
        let mut watch_config = config.clone();
        // Watch-mode side effects on config (§4.9): the index must never
        // crash from collision races, and node_modules churn must stay
        // observable.
        watch_config.throw_on_module_collision = false;
        watch_config.retain_all_files = true;

        Self {
            current: Arc::new(initial),
            config: watch_config,
            worker_pool: WorkerPool::new(1, true),
            events_queue: Vec::new(),
            queued_keys: HashSet::new(),
        }
    }

    fn anchor(&self, absolute: &AbsoluteSystemPathBuf) -> Option<RelativeSystemPathBuf> {
        self.config
            .roots
            .iter()
            .find_map(|root| root.as_absolute_path().anchor(absolute.as_absolute_path()))
    }

    fn handle_raw(&mut self, event: notify::Result<notify::Event>) {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "watcher backend reported an error");
                return;
            }
        };
        let Some(kind) = classify(&event.kind) else {
            return;
        };
        for path in &event.paths {
            self.handle_one(kind, path);
        }
    }

    fn handle_one(&mut self, kind: WatchEventKind, abs_path: &Path) {
        let Ok(absolute) = AbsoluteSystemPathBuf::new(abs_path.to_path_buf()) else {
            return;
        };
        let Some(relative) = self.anchor(&absolute) else {
            return;
        };

        // Step 1: extension filter (also drops directory events, which
        // never carry a configured extension).
        if !self
            .config
            .extensions
            .iter()
            .any(|ext| relative.extension() == Some(ext.as_str()))
        {
            return;
        }

        // Step 2: ignore filter.
        if is_ignored(
            &self.config.ignore_pattern,
            relative.as_str(),
            absolute.to_string().as_str(),
            self.config.retain_all_files,
        ) {
            return;
        }

        let stat = if kind == WatchEventKind::Delete {
            None
        } else {
            match std::fs::metadata(abs_path) {
                Ok(meta) if meta.is_file() => Some((
                    meta.modified()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_millis() as i64)
                        .unwrap_or_default(),
                    meta.len(),
                )),
                _ => return,
            }
        };

        // Step 3: access-only modify events are dropped.
        if kind == WatchEventKind::Change {
            if let Some((mtime_ms, _)) = stat {
                if let Some(existing) = self.current.files.get(&relative) {
                    if existing.mtime_ms == mtime_ms {
                        return;
                    }
                }
            }
        }

        // Step 4: drop if an equivalent event is already queued for emission.
        let key = (kind, relative.clone(), stat.map(|(m, _)| m));
        if self.queued_keys.contains(&key) {
            return;
        }

        // Step 5: copy-on-write the current frame.
        let snapshot = Arc::make_mut(&mut self.current);

        // Step 6: forget whatever this path previously owned, regardless of
        // event kind.
        if let Some(existing_entry) = snapshot.files.remove(&relative) {
            extract::forget_file(
                &relative,
                &existing_entry,
                &self.config.platforms,
                &mut snapshot.modules,
                &mut snapshot.duplicates,
                &mut snapshot.mocks,
            );
        }

        // Step 7: re-index add/change in-band.
        if let WatchEventKind::Add | WatchEventKind::Change = kind {
            let (mtime_ms, size) = stat.expect("add/change always carries a stat");
            snapshot.files.insert(
                relative.clone(),
                FileEntry {
                    haste_id: None,
                    mtime_ms,
                    size,
                    visited: false,
                    deps: Vec::new(),
                    sha1: None,
                },
            );

            let ctx = ExtractionContext::for_config(&self.config);
            if let Err(err) = extract::run_single(
                &ctx,
                &self.worker_pool,
                &relative,
                &mut snapshot.files,
                &mut snapshot.modules,
                &mut snapshot.duplicates,
                &mut snapshot.mocks,
            ) {
                tracing::warn!(path = %relative, error = %err, "in-band extraction failed during watch event");
            }
            self.worker_pool.cleanup();
        }

        // Step 8.
        self.events_queue.push(QueuedEvent { kind, path: relative });
        self.queued_keys.insert(key);
    }

    fn flush(&mut self, change_tx: &broadcast::Sender<ChangeEvent>) {
        if self.events_queue.is_empty() {
            return;
        }
        let view = HasteMapView::from_snapshot(
            &self.current,
            self.config.root_dir.clone(),
            Arc::new(self.config.platforms.clone()),
        );
        let events = std::mem::take(&mut self.events_queue);
        self.queued_keys.clear();
        let _ = change_tx.send(ChangeEvent { view, events });
    }
}

/// Owns every watch-mode resource: the event-source handles (kept alive so
/// their destructors unwatch on drop), the emission broadcast, and the
/// idempotent shutdown channel.
pub struct Watcher {
    change_tx: broadcast::Sender<ChangeEvent>,
    exit_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    _event_source_handles: Vec<Box<dyn std::any::Any + Send>>,
}

impl Watcher {
    pub async fn start(config: &HasteMapConfig, initial: Snapshot, daemon_probe: Arc<dyn DaemonProbe>) -> Result<(Self, HasteMapView)> {
        let (raw_tx, mut raw_rx) = mpsc::channel(1024);

        let use_daemon = crawler::daemon_available(config.use_watchman, config.enable_symlinks, daemon_probe.as_ref());
        let daemon_socket = config
            .cache_directory
            .as_absolute_path()
            .join_relative(&RelativeSystemPathBuf::new("haste-map.sock").unwrap());

        let mut handles: Vec<Box<dyn std::any::Any + Send>> = Vec::new();
        for root in &config.roots {
            let source: Box<dyn EventSource> = if use_daemon {
                Box::new(DaemonEventSource::new(daemon_socket.clone()))
            } else {
                Box::new(NotifyEventSource { force_poll: false })
            };
            let handle = source.start(root, raw_tx.clone())?;
            handles.push(handle);
            wait_for_ready(root, &mut raw_rx).await?;
        }

        let initial_view = HasteMapView::from_snapshot(&initial, config.root_dir.clone(), Arc::new(config.platforms.clone()));

        let mut state = WatchState::new(config, initial);
        let (exit_tx, mut exit_rx) = oneshot::channel();
        let (change_tx, _initial_receiver) = broadcast::channel(1024);
        let change_tx_task = change_tx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(CHANGE_INTERVAL_MS));
            loop {
                tokio::select! {
                    _ = &mut exit_rx => break,
                    maybe_event = raw_rx.recv() => {
                        match maybe_event {
                            Some(event) => state.handle_raw(event),
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        state.flush(&change_tx_task);
                    }
                }
            }
        });

        Ok((
            Watcher {
                change_tx,
                exit_tx: std::sync::Mutex::new(Some(exit_tx)),
                _event_source_handles: handles,
            },
            initial_view,
        ))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.change_tx.subscribe()
    }

    /// Idempotent shutdown: the second and subsequent calls are no-ops
    /// because the oneshot sender is already taken.
    pub async fn end(&self) {
        let sender = self.exit_tx.lock().expect("exit_tx mutex is never poisoned").take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}
