use std::sync::Arc;

use clap::Parser;
use haste_map::{builder::Builder, config::HasteMapConfigBuilder, error::Error, watcher::Watcher};
use haste_paths::AbsoluteSystemPathBuf;

#[derive(Parser, Debug)]
#[command(name = "haste-map", about = "Builds (and optionally watches) a haste module index over a source tree")]
struct Args {
    /// Name used to derive the on-disk cache filename.
    #[arg(long)]
    name: String,

    /// Directory the build is rooted at; relative paths in output are
    /// reported against it.
    #[arg(long)]
    root_dir: AbsoluteSystemPathBuf,

    /// One or more directories to crawl. Defaults to `root_dir`.
    #[arg(long)]
    roots: Vec<AbsoluteSystemPathBuf>,

    /// File extensions to index, without a leading dot.
    #[arg(long, required = true)]
    extensions: Vec<String>,

    /// Platform suffixes to recognize, e.g. `ios`, `android`.
    #[arg(long)]
    platforms: Vec<String>,

    #[arg(long, default_value_t = num_cpus())]
    max_workers: usize,

    #[arg(long)]
    compute_sha1: bool,

    #[arg(long)]
    reset_cache: bool,

    #[arg(long)]
    throw_on_module_collision: bool,

    #[arg(long)]
    retain_all_files: bool,

    #[arg(long)]
    enable_symlinks: bool,

    /// Stay resident and print a line per emitted change frame instead of
    /// exiting after the initial build.
    #[arg(long)]
    watch: bool,
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let roots = if args.roots.is_empty() {
        vec![args.root_dir.clone()]
    } else {
        args.roots.clone()
    };

    let config = HasteMapConfigBuilder::new()
        .name(args.name)
        .root_dir(args.root_dir)
        .roots(roots)
        .extensions(args.extensions)
        .platforms(args.platforms)
        .max_workers(args.max_workers)
        .compute_sha1(args.compute_sha1)
        .reset_cache(args.reset_cache)
        .throw_on_module_collision(args.throw_on_module_collision)
        .retain_all_files(args.retain_all_files)
        .enable_symlinks(args.enable_symlinks)
        .watch(args.watch)
        .build();

    let config = match config {
        Ok(config) => config,
        // The symlinks/daemon conflict is the one configuration error this
        // binary treats as a hard exit rather than a propagated `Result`,
        // since it can only be resolved by the caller changing flags.
        Err(err @ Error::SymlinksDaemonConflict { .. }) => {
            tracing::error!(error = %err, "refusing to start");
            return std::process::ExitCode::from(1);
        }
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return std::process::ExitCode::from(1);
        }
    };

    let builder = Builder::new(config.clone());
    let view = match builder.build().await {
        Ok(view) => view,
        Err(err) => {
            tracing::error!(error = %err, "build failed");
            return std::process::ExitCode::from(1);
        }
    };

    let (changed, removed) = builder.last_counts().unwrap_or((0, 0));
    tracing::info!(
        files = view.haste_fs.len(),
        changed,
        removed,
        "build complete",
    );

    if !args.watch {
        return std::process::ExitCode::SUCCESS;
    }

    let snapshot = builder.read_persisted();
    let daemon_probe: Arc<dyn haste_map::crawler::DaemonProbe> = Arc::new(haste_map::crawler::DefaultDaemonProbe::new(config.roots.clone()));
    let (watcher, _initial_view) = match Watcher::start(&config, snapshot, daemon_probe).await {
        Ok(pair) => pair,
        Err(err) => {
            tracing::error!(error = %err, "failed to start watcher");
            return std::process::ExitCode::from(1);
        }
    };

    let mut changes = watcher.subscribe();
    loop {
        match changes.recv().await {
            Ok(frame) => {
                tracing::info!(changed = frame.events.len(), files = frame.view.haste_fs.len(), "index updated");
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "watch consumer lagged behind emission frames");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    watcher.end().await;
    std::process::ExitCode::SUCCESS
}
