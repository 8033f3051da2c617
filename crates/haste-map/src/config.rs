//! Configuration surface (§6). Built with a typed builder, in the spirit of
//! the builder-style constructors used throughout the pack
//! (`FileSystemWatcher::new_with_default_cookie_dir` and friends) — invalid
//! combinations are rejected eagerly, before any crawling or extraction
//! begins.

use std::sync::Arc;

use haste_paths::AbsoluteSystemPathBuf;

use crate::{
    error::{Error, Result},
    ignore::IgnorePattern,
    plugin::{DefaultDependencyExtractor, DefaultHasteImpl, DependencyExtractor, HasteImpl},
};

#[derive(Clone)]
pub struct HasteMapConfig {
    pub name: String,
    pub root_dir: AbsoluteSystemPathBuf,
    pub roots: Vec<AbsoluteSystemPathBuf>,
    pub extensions: Vec<String>,
    pub platforms: Vec<String>,
    pub ignore_pattern: IgnorePattern,
    pub mocks_pattern: Option<regex::Regex>,
    pub cache_directory: AbsoluteSystemPathBuf,
    pub compute_dependencies: bool,
    pub compute_sha1: bool,
    pub dependency_extractor: Arc<dyn DependencyExtractor>,
    pub haste_impl: Arc<dyn HasteImpl>,
    pub enable_symlinks: bool,
    pub force_node_filesystem_api: bool,
    pub max_workers: usize,
    pub reset_cache: bool,
    pub retain_all_files: bool,
    pub skip_package_json: bool,
    pub throw_on_module_collision: bool,
    pub use_watchman: bool,
    pub watch: bool,
}

pub struct HasteMapConfigBuilder {
    name: Option<String>,
    root_dir: Option<AbsoluteSystemPathBuf>,
    roots: Vec<AbsoluteSystemPathBuf>,
    extensions: Vec<String>,
    platforms: Vec<String>,
    ignore_pattern: Option<IgnorePattern>,
    mocks_pattern: Option<regex::Regex>,
    cache_directory: Option<AbsoluteSystemPathBuf>,
    compute_dependencies: bool,
    compute_sha1: bool,
    dependency_extractor: Option<Arc<dyn DependencyExtractor>>,
    haste_impl: Option<Arc<dyn HasteImpl>>,
    enable_symlinks: bool,
    force_node_filesystem_api: bool,
    max_workers: Option<usize>,
    reset_cache: bool,
    retain_all_files: bool,
    skip_package_json: bool,
    throw_on_module_collision: bool,
    use_watchman: bool,
    watch: bool,
}

impl Default for HasteMapConfigBuilder {
    fn default() -> Self {
        Self {
            name: None,
            root_dir: None,
            roots: Vec::new(),
            extensions: Vec::new(),
            platforms: Vec::new(),
            ignore_pattern: None,
            mocks_pattern: None,
            cache_directory: None,
            compute_dependencies: true,
            compute_sha1: false,
            dependency_extractor: None,
            haste_impl: None,
            enable_symlinks: false,
            force_node_filesystem_api: false,
            max_workers: None,
            reset_cache: false,
            retain_all_files: false,
            skip_package_json: false,
            throw_on_module_collision: false,
            use_watchman: true,
            watch: false,
        }
    }
}

macro_rules! setter {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.$name = value;
            self
        }
    };
}

impl HasteMapConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn root_dir(mut self, root_dir: AbsoluteSystemPathBuf) -> Self {
        self.root_dir = Some(root_dir);
        self
    }

    pub fn roots(mut self, roots: Vec<AbsoluteSystemPathBuf>) -> Self {
        self.roots = roots;
        self
    }

    pub fn extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn platforms(mut self, platforms: Vec<String>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn ignore_pattern(mut self, pattern: IgnorePattern) -> Self {
        self.ignore_pattern = Some(pattern);
        self
    }

    pub fn mocks_pattern(mut self, pattern: regex::Regex) -> Self {
        self.mocks_pattern = Some(pattern);
        self
    }

    pub fn cache_directory(mut self, dir: AbsoluteSystemPathBuf) -> Self {
        self.cache_directory = Some(dir);
        self
    }

    pub fn dependency_extractor(mut self, extractor: Arc<dyn DependencyExtractor>) -> Self {
        self.dependency_extractor = Some(extractor);
        self
    }

    pub fn haste_impl(mut self, haste_impl: Arc<dyn HasteImpl>) -> Self {
        self.haste_impl = Some(haste_impl);
        self
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    setter!(compute_dependencies, bool);
    setter!(compute_sha1, bool);
    setter!(enable_symlinks, bool);
    setter!(force_node_filesystem_api, bool);
    setter!(reset_cache, bool);
    setter!(retain_all_files, bool);
    setter!(skip_package_json, bool);
    setter!(throw_on_module_collision, bool);
    setter!(use_watchman, bool);
    setter!(watch, bool);

    pub fn build(self) -> Result<HasteMapConfig> {
        let name = self.name.ok_or_else(|| Error::Config("`name` is required".into()))?;
        let root_dir = self
            .root_dir
            .ok_or_else(|| Error::Config("`root_dir` is required".into()))?;
        if self.roots.is_empty() {
            return Err(Error::Config("`roots` must be non-empty".into()));
        }
        if self.extensions.is_empty() {
            return Err(Error::Config("`extensions` must be non-empty".into()));
        }
        if self.platforms.is_empty() {
            return Err(Error::Config("`platforms` must be non-empty".into()));
        }
        let max_workers = self
            .max_workers
            .ok_or_else(|| Error::Config("`max_workers` is required".into()))?;

        // de-duplicate roots, preserving first-seen order (spec: "required
        // ordered set, de-duplicated").
        let mut seen = std::collections::HashSet::new();
        let roots: Vec<_> = self
            .roots
            .into_iter()
            .filter(|r| seen.insert(r.as_path().to_path_buf()))
            .collect();

        if self.enable_symlinks {
            for root in &roots {
                let watchman_config = root.as_absolute_path().join_relative(
                    &haste_paths::RelativeSystemPathBuf::new(".watchmanconfig").unwrap(),
                );
                if watchman_config.as_path().exists() {
                    return Err(Error::SymlinksDaemonConflict {
                        root: root.to_string(),
                    });
                }
            }
        }

        let cache_directory = match self.cache_directory {
            Some(dir) => dir,
            None => AbsoluteSystemPathBuf::new(std::env::temp_dir())?,
        };

        Ok(HasteMapConfig {
            name,
            root_dir,
            roots,
            extensions: self.extensions,
            platforms: self.platforms,
            ignore_pattern: self.ignore_pattern.unwrap_or_default(),
            mocks_pattern: self.mocks_pattern,
            cache_directory,
            compute_dependencies: self.compute_dependencies,
            compute_sha1: self.compute_sha1,
            dependency_extractor: self
                .dependency_extractor
                .unwrap_or_else(|| Arc::new(DefaultDependencyExtractor)),
            haste_impl: self.haste_impl.unwrap_or_else(|| Arc::new(DefaultHasteImpl)),
            enable_symlinks: self.enable_symlinks,
            force_node_filesystem_api: self.force_node_filesystem_api,
            max_workers,
            reset_cache: self.reset_cache,
            retain_all_files: self.retain_all_files,
            skip_package_json: self.skip_package_json,
            throw_on_module_collision: self.throw_on_module_collision,
            use_watchman: self.use_watchman,
            watch: self.watch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_required_fields() {
        let err = HasteMapConfigBuilder::new().name("x").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn deduplicates_roots_preserving_order() {
        let root = AbsoluteSystemPathBuf::cwd().unwrap();
        let cfg = HasteMapConfigBuilder::new()
            .name("x")
            .root_dir(root.clone())
            .roots(vec![root.clone(), root.clone()])
            .extensions(vec!["js".into()])
            .platforms(vec!["ios".into()])
            .max_workers(1)
            .build()
            .unwrap();
        assert_eq!(cfg.roots.len(), 1);
    }
}
