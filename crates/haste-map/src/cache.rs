//! Cache store (C1): derives a stable on-disk path for a snapshot from its
//! configuration key parts, and reads/writes the blob atomically.

use std::io::Write;

use haste_paths::AbsoluteSystemPathBuf;
use twox_hash::XxHash64;

use crate::{
    config::HasteMapConfig,
    error::{Error, Result},
    snapshot::Snapshot,
};
use std::hash::Hasher;

/// Every configuration component that must invalidate the cache if it
/// changes. Order matters: the digest is computed over the parts joined in
/// this fixed order, so any change to any part changes the digest (§4.1,
/// §8 "cache-key stability").
pub struct CacheKeyParts<'a> {
    pub version: &'a str,
    pub name: &'a str,
    pub root_dir: &'a str,
    pub roots: &'a [AbsoluteSystemPathBuf],
    pub extensions: &'a [String],
    pub platforms: &'a [String],
    pub compute_sha1: bool,
    pub mocks_pattern: Option<&'a str>,
    pub ignore_pattern_source: Option<&'a str>,
    pub haste_impl_cache_key: &'a str,
    pub dependency_extractor_cache_key: &'a str,
}

impl<'a> CacheKeyParts<'a> {
    pub fn from_config(config: &'a HasteMapConfig, version: &'a str) -> Self {
        CacheKeyParts {
            version,
            name: &config.name,
            root_dir: config.root_dir.as_path().to_str().unwrap_or_default(),
            roots: &config.roots,
            extensions: &config.extensions,
            platforms: &config.platforms,
            compute_sha1: config.compute_sha1,
            mocks_pattern: config.mocks_pattern.as_ref().map(|r| r.as_str()),
            ignore_pattern_source: config.ignore_pattern.source(),
            haste_impl_cache_key: "",
            dependency_extractor_cache_key: "",
        }
    }

    fn digest_input(&self) -> String {
        let mut roots: Vec<&str> = self
            .roots
            .iter()
            .filter_map(|r| r.as_path().to_str())
            .collect();
        roots.sort_unstable();
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}",
            self.version,
            self.name,
            self.root_dir,
            roots.join(","),
            self.extensions.join(","),
            self.platforms.join(","),
            self.compute_sha1,
            self.mocks_pattern.unwrap_or_default(),
            self.ignore_pattern_source.unwrap_or_default(),
            format!("{}{}", self.haste_impl_cache_key, self.dependency_extractor_cache_key),
        )
    }
}

/// Hashes `parts` with a non-cryptographic but stable digest (`xxhash64`, the
/// family `turbo-tasks-hash` also draws from for cache-key-style digests)
/// and joins it with a sanitized prefix.
pub fn snapshot_path(cache_dir: &AbsoluteSystemPathBuf, name_prefix: &str, parts: &CacheKeyParts) -> AbsoluteSystemPathBuf {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(parts.digest_input().as_bytes());
    let digest = hasher.finish();

    let sanitized_prefix: String = name_prefix
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();

    let filename = format!("haste-map-{sanitized_prefix}-{digest:016x}.json");
    cache_dir
        .as_absolute_path()
        .join_relative(&haste_paths::RelativeSystemPathBuf::new(filename).expect("sanitized filename is relative"))
}

/// Reads and deserializes a `Snapshot` from `path`. Any failure (missing
/// file, corrupt JSON) yields an empty snapshot and is never fatal — the
/// caller simply re-crawls and re-extracts everything.
pub fn read(path: &AbsoluteSystemPathBuf) -> Snapshot {
    match std::fs::read(path.as_path()) {
        Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "cache file is corrupt, starting from an empty snapshot");
                Snapshot::empty()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Snapshot::empty(),
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "failed to read cache file, starting from an empty snapshot");
            Snapshot::empty()
        }
    }
}

/// Writes `snapshot` to `path` atomically: serialize to a temp file in the
/// same directory, then rename over the destination.
pub fn write(path: &AbsoluteSystemPathBuf, snapshot: &Snapshot) -> Result<()> {
    let parent = path
        .as_absolute_path()
        .parent()
        .ok_or_else(|| Error::Config(format!("cache path {path} has no parent directory")))?;
    std::fs::create_dir_all(parent.as_path())?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent.as_path())?;
    let bytes = serde_json::to_vec(snapshot)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    tmp.persist(path.as_path()).map_err(|e| Error::CacheWrite {
        path: path.to_string(),
        source: std::sync::Arc::new(e.error),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_parts<'a>(roots: &'a [AbsoluteSystemPathBuf], extensions: &'a [String], platforms: &'a [String]) -> CacheKeyParts<'a> {
        CacheKeyParts {
            version: "1",
            name: "proj",
            root_dir: "/proj",
            roots,
            extensions,
            platforms,
            compute_sha1: false,
            mocks_pattern: None,
            ignore_pattern_source: None,
            haste_impl_cache_key: "",
            dependency_extractor_cache_key: "",
        }
    }

    #[test]
    fn snapshot_path_is_deterministic() {
        let dir = AbsoluteSystemPathBuf::cwd().unwrap();
        let roots = vec![dir.clone()];
        let extensions = vec!["js".to_string()];
        let platforms = vec!["ios".to_string()];
        let parts = cfg_parts(&roots, &extensions, &platforms);

        let a = snapshot_path(&dir, "proj", &parts);
        let b = snapshot_path(&dir, "proj", &parts);
        assert_eq!(a, b);
    }

    #[test]
    fn snapshot_path_changes_when_a_key_part_changes() {
        let dir = AbsoluteSystemPathBuf::cwd().unwrap();
        let roots = vec![dir.clone()];
        let extensions = vec!["js".to_string()];
        let platforms = vec!["ios".to_string()];
        let parts = cfg_parts(&roots, &extensions, &platforms);
        let a = snapshot_path(&dir, "proj", &parts);

        let mut changed = cfg_parts(&roots, &extensions, &platforms);
        changed.compute_sha1 = true;
        let b = snapshot_path(&dir, "proj", &changed);
        assert_ne!(a, b);
    }

    #[test]
    fn ignore_pattern_source_changes_the_cache_key() {
        let dir = AbsoluteSystemPathBuf::cwd().unwrap();
        let roots = vec![dir.clone()];
        let extensions = vec!["js".to_string()];
        let platforms = vec!["ios".to_string()];

        let mut without = cfg_parts(&roots, &extensions, &platforms);
        without.ignore_pattern_source = None;
        let a = snapshot_path(&dir, "proj", &without);

        let mut with = cfg_parts(&roots, &extensions, &platforms);
        with.ignore_pattern_source = Some(r"\.snap$");
        let b = snapshot_path(&dir, "proj", &with);

        assert_ne!(a, b);
    }

    #[test]
    fn from_config_wires_up_the_ignore_pattern_regex_source() {
        use crate::config::HasteMapConfigBuilder;

        let root = AbsoluteSystemPathBuf::cwd().unwrap();
        let config = HasteMapConfigBuilder::new()
            .name("proj")
            .root_dir(root.clone())
            .roots(vec![root])
            .extensions(vec!["js".to_string()])
            .platforms(vec!["ios".to_string()])
            .max_workers(1)
            .ignore_pattern(crate::ignore::IgnorePattern::Regex(regex::Regex::new(r"\.snap$").unwrap()))
            .build()
            .unwrap();

        let parts = CacheKeyParts::from_config(&config, "1");
        assert_eq!(parts.ignore_pattern_source, Some(r"\.snap$"));
    }

    #[test]
    fn read_of_missing_file_is_empty_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = AbsoluteSystemPathBuf::new(dir.path().join("missing.json")).unwrap();
        let snapshot = read(&path);
        assert!(snapshot.files.is_empty());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = AbsoluteSystemPathBuf::new(dir.path().join("snap.json")).unwrap();
        let mut snapshot = Snapshot::empty();
        snapshot.clocks.insert("root".to_string(), "c:123".to_string());
        write(&path, &snapshot).unwrap();
        let back = read(&path);
        assert_eq!(back.clocks.get("root"), Some(&"c:123".to_string()));
    }
}
