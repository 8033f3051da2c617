//! Plugin contracts (§6, §9 "dynamic hooks"). The original loads these by
//! path into a separate worker address space; since there is no such
//! boundary in-process, they are resolved once into `Arc<dyn Trait>` objects
//! at configuration time and shared read-only across worker-pool jobs.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// `getCacheKey() -> String` contributes to the snapshot cache key (§4.1);
/// `get_haste_name` is invoked per candidate file during extraction (§4.5).
pub trait HasteImpl: Send + Sync {
    fn get_cache_key(&self) -> String;
    fn get_haste_name(&self, file_path: &str, contents: &str) -> Option<String>;
}

/// `extract` receives the file's source, its path, and a reference to the
/// crate's own default extractor so a custom implementation can delegate to
/// it for the common case and only special-case what it needs to.
pub trait DependencyExtractor: Send + Sync {
    fn get_cache_key(&self) -> String;
    fn extract(&self, code: &str, file_path: &str, default_extractor: &dyn DependencyExtractor) -> BTreeSet<String>;
}

static PROVIDES_MODULE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@providesModule\s+(\S+)").expect("static providesModule pattern is valid")
});

static REQUIRE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).expect("static require pattern is valid"));

/// Reference implementation of the historical Haste convention: a
/// `@providesModule <name>` doc-comment declares the module's id. Shipped so
/// the crate is runnable without a caller-supplied plugin; any caller may
/// still substitute their own `HasteImpl` per the plugin contract.
#[derive(Debug, Default)]
pub struct DefaultHasteImpl;

impl HasteImpl for DefaultHasteImpl {
    fn get_cache_key(&self) -> String {
        "default-haste-impl@1".to_string()
    }

    fn get_haste_name(&self, _file_path: &str, contents: &str) -> Option<String> {
        PROVIDES_MODULE_PATTERN
            .captures(contents)
            .map(|c| c[1].to_string())
    }
}

/// Reference dependency extractor: scans for CommonJS-style
/// `require('module')` calls.
#[derive(Debug, Default)]
pub struct DefaultDependencyExtractor;

impl DependencyExtractor for DefaultDependencyExtractor {
    fn get_cache_key(&self) -> String {
        "default-dependency-extractor@1".to_string()
    }

    fn extract(&self, code: &str, _file_path: &str, _default_extractor: &dyn DependencyExtractor) -> BTreeSet<String> {
        REQUIRE_PATTERN
            .captures_iter(code)
            .map(|c| c[1].to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_haste_impl_extracts_provides_module() {
        let impl_ = DefaultHasteImpl;
        let contents = "/**\n * @providesModule Foo\n */\nmodule.exports = {};";
        assert_eq!(impl_.get_haste_name("a/Foo.js", contents), Some("Foo".to_string()));
    }

    #[test]
    fn default_haste_impl_returns_none_without_annotation() {
        let impl_ = DefaultHasteImpl;
        assert_eq!(impl_.get_haste_name("a/Foo.js", "module.exports = {};"), None);
    }

    #[test]
    fn default_dependency_extractor_finds_requires() {
        let extractor = DefaultDependencyExtractor;
        let code = "const a = require('./a');\nconst b = require(\"b-package\");";
        let deps = extractor.extract(code, "x.js", &extractor);
        assert_eq!(deps.len(), 2);
        assert!(deps.contains("./a"));
        assert!(deps.contains("b-package"));
    }
}
