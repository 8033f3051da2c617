//! Ignore filter (C2). Configured as either a regex or a predicate — a
//! tagged alternative, not a trait object, since there are exactly two
//! variants and no caller needs to add a third (§9 "model as tagged
//! alternatives behind a narrow interface").

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

static VCS_DIR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|/)(\.git|\.hg)(/|$)").expect("static VCS pattern is valid"));

#[derive(Clone)]
pub enum IgnorePattern {
    Regex(Regex),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Default for IgnorePattern {
    fn default() -> Self {
        // An unsatisfiable pattern: the built-in VCS/node_modules rules in
        // `is_ignored` still apply even with no caller-supplied pattern.
        IgnorePattern::Predicate(Arc::new(|_| false))
    }
}

impl IgnorePattern {
    fn matches(&self, relative_path: &str) -> bool {
        match self {
            IgnorePattern::Regex(re) => re.is_match(relative_path),
            IgnorePattern::Predicate(f) => f(relative_path),
        }
    }

    /// The regex source, when there is one. A `Predicate` has no stable
    /// textual source, so it contributes nothing to the cache key (§4.1) —
    /// callers relying on cache-key stability for a predicate-configured
    /// ignore pattern must invalidate the cache themselves.
    pub fn source(&self) -> Option<&str> {
        match self {
            IgnorePattern::Regex(re) => Some(re.as_str()),
            IgnorePattern::Predicate(_) => None,
        }
    }
}

/// `absolute_path` is used only for the `/node_modules/` check, which the
/// original performs against the absolute form; `relative_path` (forward
/// slash) is what the caller-supplied pattern and the VCS regex match
/// against.
pub fn is_ignored(
    pattern: &IgnorePattern,
    relative_path: &str,
    absolute_path: &str,
    retain_all_files: bool,
) -> bool {
    if pattern.matches(relative_path) {
        return true;
    }
    if VCS_DIR_PATTERN.is_match(relative_path) {
        return true;
    }
    if !retain_all_files && absolute_path.contains("/node_modules/") {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vcs_directories_are_always_ignored() {
        let pattern = IgnorePattern::default();
        assert!(is_ignored(&pattern, ".git/HEAD", "/repo/.git/HEAD", false));
        assert!(is_ignored(&pattern, "a/.hg/store", "/repo/a/.hg/store", false));
    }

    #[test]
    fn node_modules_ignored_unless_retained() {
        let pattern = IgnorePattern::default();
        assert!(is_ignored(
            &pattern,
            "node_modules/x/index.js",
            "/repo/node_modules/x/index.js",
            false
        ));
        assert!(!is_ignored(
            &pattern,
            "node_modules/x/index.js",
            "/repo/node_modules/x/index.js",
            true
        ));
    }

    #[test]
    fn custom_regex_pattern_is_honored() {
        let pattern = IgnorePattern::Regex(Regex::new(r"\.snap$").unwrap());
        assert!(is_ignored(&pattern, "a/b.snap", "/repo/a/b.snap", false));
        assert!(!is_ignored(&pattern, "a/b.js", "/repo/a/b.js", false));
    }

    #[test]
    fn custom_predicate_pattern_is_honored() {
        let pattern = IgnorePattern::Predicate(Arc::new(|p: &str| p.ends_with(".generated.js")));
        assert!(is_ignored(&pattern, "a/b.generated.js", "/repo/a/b.generated.js", false));
        assert!(!is_ignored(&pattern, "a/b.js", "/repo/a/b.js", false));
    }
}
