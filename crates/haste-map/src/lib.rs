//! Incremental, persistent index over a source tree answering two
//! questions: which files exist (with their content fingerprints), and
//! which file provides a given haste module identifier for a given
//! platform variant.
//!
//! The pipeline is `cache (C1) -> crawler (C3) -> extract (C5) -> duplicates
//! (C6) / mocks (C7) -> view (C10)`, orchestrated by [`Builder`] for a
//! one-shot build and handed to [`Watcher`] for incremental re-indexing.

pub mod builder;
pub mod cache;
pub mod config;
pub mod crawler;
pub mod duplicates;
pub mod error;
pub mod extract;
pub mod ignore;
pub mod mocks;
pub mod plugin;
pub mod snapshot;
pub mod view;
pub mod watcher;
pub mod worker;

pub use builder::{BuildState, Builder};
pub use config::{HasteMapConfig, HasteMapConfigBuilder};
pub use error::{Error, NotifyError, Result};
pub use ignore::IgnorePattern;
pub use plugin::{DefaultDependencyExtractor, DefaultHasteImpl, DependencyExtractor, HasteImpl};
pub use snapshot::{DuplicateTable, FileEntry, FileTable, ModuleEntry, ModuleKind, ModuleTable, MockTable, Snapshot, GENERIC_PLATFORM};
pub use view::{HasteFs, HasteMapView, ModuleMap, ModuleResolution};
pub use watcher::{ChangeEvent, QueuedEvent, WatchEventKind, Watcher};
