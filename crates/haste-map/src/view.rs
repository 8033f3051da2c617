//! Public view (C10): immutable read-only projections of a `Snapshot`
//! handed to consumers. Neither view observes later mutations — each holds
//! its own `Arc`-shared clone of the tables as they stood at emission time
//! (§4.10).

use std::sync::Arc;

use haste_paths::{AbsoluteSystemPathBuf, RelativeSystemPathBuf};

use crate::snapshot::{detect_platform, DuplicateTable, FileEntry, FileTable, ModuleKind, ModuleTable, MockTable, Snapshot, GENERIC_PLATFORM};

/// Answers "does this path exist?" and supports iteration over the indexed
/// file set.
#[derive(Clone)]
pub struct HasteFs {
    files: Arc<FileTable>,
    root_dir: AbsoluteSystemPathBuf,
}

impl HasteFs {
    pub fn new(files: Arc<FileTable>, root_dir: AbsoluteSystemPathBuf) -> Self {
        Self { files, root_dir }
    }

    pub fn exists(&self, path: &RelativeSystemPathBuf) -> bool {
        self.files.contains_key(path)
    }

    pub fn get(&self, path: &RelativeSystemPathBuf) -> Option<&FileEntry> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RelativeSystemPathBuf, &FileEntry)> {
        self.files.iter()
    }

    pub fn root_dir(&self) -> &AbsoluteSystemPathBuf {
        &self.root_dir
    }
}

/// The outcome of resolving a `(haste_id, platform)` pair: a query landing
/// in `DuplicateTable` must surface as `Ambiguous`, never a silent pick
/// (§4.10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleResolution {
    Found { path: RelativeSystemPathBuf, kind: ModuleKind },
    Ambiguous { candidates: Vec<RelativeSystemPathBuf> },
    NotFound,
}

/// Answers "locate `(haste_id, platform) -> path`" and mock-name lookups.
#[derive(Clone)]
pub struct ModuleMap {
    modules: Arc<ModuleTable>,
    mocks: Arc<MockTable>,
    duplicates: Arc<DuplicateTable>,
    root_dir: AbsoluteSystemPathBuf,
    platforms: Arc<Vec<String>>,
}

impl ModuleMap {
    pub fn new(
        modules: Arc<ModuleTable>,
        mocks: Arc<MockTable>,
        duplicates: Arc<DuplicateTable>,
        root_dir: AbsoluteSystemPathBuf,
        platforms: Arc<Vec<String>>,
    ) -> Self {
        Self {
            modules,
            mocks,
            duplicates,
            root_dir,
            platforms,
        }
    }

    /// Resolves `id` for `platform`, falling back to the generic platform
    /// when no platform-specific binding exists.
    pub fn resolve(&self, id: &str, platform: &str) -> ModuleResolution {
        if let Some(contested) = self.duplicates.get(id).and_then(|by_platform| by_platform.get(platform)) {
            return ModuleResolution::Ambiguous {
                candidates: contested.keys().cloned().collect(),
            };
        }
        if platform != GENERIC_PLATFORM {
            if let Some(contested) = self.duplicates.get(id).and_then(|by_platform| by_platform.get(GENERIC_PLATFORM)) {
                return ModuleResolution::Ambiguous {
                    candidates: contested.keys().cloned().collect(),
                };
            }
        }

        let by_platform = self.modules.get(id);
        if let Some(entry) = by_platform.and_then(|m| m.get(platform)) {
            return ModuleResolution::Found {
                path: entry.path.clone(),
                kind: entry.kind,
            };
        }
        if let Some(entry) = by_platform.and_then(|m| m.get(GENERIC_PLATFORM)) {
            return ModuleResolution::Found {
                path: entry.path.clone(),
                kind: entry.kind,
            };
        }
        ModuleResolution::NotFound
    }

    /// Resolves `id` using the platform suffix detected from `path`, or
    /// `GENERIC` when `path` carries none.
    pub fn resolve_for_path(&self, id: &str, path: &RelativeSystemPathBuf) -> ModuleResolution {
        let platform = detect_platform(path, &self.platforms).unwrap_or(GENERIC_PLATFORM);
        self.resolve(id, platform)
    }

    pub fn resolve_mock(&self, mock_name: &str) -> Option<&RelativeSystemPathBuf> {
        self.mocks.get(mock_name)
    }

    pub fn root_dir(&self) -> &AbsoluteSystemPathBuf {
        &self.root_dir
    }
}

/// Bundles a `HasteFs` and `ModuleMap` built from the same `Snapshot`
/// version, per the "watch frame consistency" invariant (§8).
#[derive(Clone)]
pub struct HasteMapView {
    pub haste_fs: HasteFs,
    pub module_map: ModuleMap,
}

impl HasteMapView {
    pub fn from_snapshot(snapshot: &Snapshot, root_dir: AbsoluteSystemPathBuf, platforms: Arc<Vec<String>>) -> Self {
        let haste_fs = HasteFs::new(Arc::new(snapshot.files.clone()), root_dir.clone());
        let module_map = ModuleMap::new(
            Arc::new(snapshot.modules.clone()),
            Arc::new(snapshot.mocks.clone()),
            Arc::new(snapshot.duplicates.clone()),
            root_dir,
            platforms,
        );
        Self { haste_fs, module_map }
    }
}
