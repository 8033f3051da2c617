//! The core data model: `FileEntry`, `ModuleTable`, `DuplicateTable`,
//! `MockTable`, `ClockTable`, and the `Snapshot` that bundles them.
//!
//! `Snapshot` is always handled behind an `Arc` so that copy-on-write clones
//! (required by the watcher, see `crate::watcher`) are cheap until the first
//! mutation of a frame.

use std::collections::BTreeMap;

use haste_paths::RelativeSystemPathBuf;
use serde::{Deserialize, Serialize};

/// The sentinel platform used when a file has no platform suffix.
pub const GENERIC_PLATFORM: &str = "g";

/// Whether a `ModuleEntry` names a package root (`package.json`-adjacent
/// directory marker) or an ordinary module file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleKind {
    Module,
    Package,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub path: RelativeSystemPathBuf,
    pub kind: ModuleKind,
}

/// One indexed file. Stored positionally on disk (see `Serialize` impl
/// below) to keep the cache blob small and fast to parse; the in-memory type
/// stays an ordinary named-field struct.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileEntry {
    pub haste_id: Option<String>,
    pub mtime_ms: i64,
    pub size: u64,
    pub visited: bool,
    /// Dependency strings in declaration order. Stored joined by `\x01` on
    /// disk to avoid a nested array per file, mirroring the original's
    /// "deps delimited" positional encoding.
    pub deps: Vec<String>,
    pub sha1: Option<String>,
}

const DEP_DELIMITER: char = '\u{1}';

impl Serialize for FileEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeTuple;
        let joined_deps = self.deps.join(&DEP_DELIMITER.to_string());
        let mut tup = serializer.serialize_tuple(6)?;
        tup.serialize_element(&self.haste_id)?;
        tup.serialize_element(&self.mtime_ms)?;
        tup.serialize_element(&self.size)?;
        tup.serialize_element(&self.visited)?;
        tup.serialize_element(&joined_deps)?;
        tup.serialize_element(&self.sha1)?;
        tup.end()
    }
}

impl<'de> Deserialize<'de> for FileEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (haste_id, mtime_ms, size, visited, joined_deps, sha1): (
            Option<String>,
            i64,
            u64,
            bool,
            String,
            Option<String>,
        ) = Deserialize::deserialize(deserializer)?;
        let deps = if joined_deps.is_empty() {
            Vec::new()
        } else {
            joined_deps.split(DEP_DELIMITER).map(str::to_owned).collect()
        };
        Ok(FileEntry {
            haste_id,
            mtime_ms,
            size,
            visited,
            deps,
            sha1,
        })
    }
}

pub type FileTable = BTreeMap<RelativeSystemPathBuf, FileEntry>;

/// `haste_id -> (platform -> ModuleEntry)`. Disjoint with `DuplicateTable` on
/// every `(id, platform)` key — see `crate::duplicates`.
pub type ModuleTable = BTreeMap<String, BTreeMap<String, ModuleEntry>>;

/// `haste_id -> (platform -> (path -> kind))` for contested keys. Every
/// inner `path -> kind` map has at least two entries.
pub type DuplicateTable = BTreeMap<String, BTreeMap<String, BTreeMap<RelativeSystemPathBuf, ModuleKind>>>;

/// `mock_name -> relative path`.
pub type MockTable = BTreeMap<String, RelativeSystemPathBuf>;

/// `root -> opaque clock token` returned by the indexing daemon.
pub type ClockTable = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub clocks: ClockTable,
    pub files: FileTable,
    pub modules: ModuleTable,
    pub mocks: MockTable,
    pub duplicates: DuplicateTable,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Returns the platform suffix of a relative path, e.g. `Widget.ios.js` ->
/// `Some("ios")`, or `None` if no configured platform suffix matches
/// (in which case the caller substitutes `GENERIC_PLATFORM`).
pub fn detect_platform<'a>(path: &RelativeSystemPathBuf, platforms: &'a [String]) -> Option<&'a str> {
    let stem = path.file_stem();
    platforms
        .iter()
        .find(|p| stem.ends_with(&format!(".{p}")))
        .map(|p| p.as_str())
}
