use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PathError;

/// A root-relative path, always forward-slash delimited regardless of host OS.
///
/// This is the key type for `FileEntry`: haste ids and module paths are
/// platform-independent, so the on-disk representation and the in-memory map
/// keys must agree on separator regardless of whether the crawl ran on Windows
/// or Unix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelativeSystemPathBuf(pub(crate) String);

impl RelativeSystemPathBuf {
    pub fn new(value: impl Into<String>) -> Result<Self, PathError> {
        let value = value.into();
        if value.contains('\\') {
            return Err(PathError::NotUnix(value));
        }
        if value.starts_with('/') {
            return Err(PathError::NotRelative(value.into()));
        }
        Ok(Self(value))
    }

    /// Builds a `RelativeSystemPathBuf` from a native path by swapping
    /// `std::path::MAIN_SEPARATOR` for `/`. Used when a crawler hands back a
    /// native path that is already known to be root-relative.
    pub fn from_native(value: &str) -> Self {
        if std::path::MAIN_SEPARATOR == '/' {
            Self(value.to_string())
        } else {
            Self(value.replace(std::path::MAIN_SEPARATOR, "/"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The filename with its final extension stripped, used for mock names
    /// and for platform-suffix detection.
    pub fn file_stem(&self) -> &str {
        let base = self.0.rsplit('/').next().unwrap_or(&self.0);
        match base.rfind('.') {
            Some(0) | None => base,
            Some(idx) => &base[..idx],
        }
    }

    pub fn extension(&self) -> Option<&str> {
        let base = self.0.rsplit('/').next().unwrap_or(&self.0);
        match base.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&base[idx + 1..]),
        }
    }
}

impl fmt::Display for RelativeSystemPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelativeSystemPathBuf {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for RelativeSystemPathBuf {
    type Target = RelativeSystemPath;

    fn deref(&self) -> &Self::Target {
        unsafe { &*(self.0.as_str() as *const str as *const RelativeSystemPath) }
    }
}

/// Borrowed counterpart of [`RelativeSystemPathBuf`].
#[derive(Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RelativeSystemPath(str);

impl RelativeSystemPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelativeSystemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_backslash() {
        assert!(RelativeSystemPathBuf::new("a\\b").is_err());
    }

    #[test]
    fn rejects_leading_slash() {
        assert!(RelativeSystemPathBuf::new("/a/b").is_err());
    }

    #[test]
    fn file_stem_strips_single_extension() {
        let p = RelativeSystemPathBuf::new("a/b/Foo.ios.js").unwrap();
        assert_eq!(p.file_stem(), "Foo.ios");
        assert_eq!(p.extension(), Some("js"));
    }

    #[test]
    fn file_stem_of_dotfile_is_whole_name() {
        let p = RelativeSystemPathBuf::new(".gitignore").unwrap();
        assert_eq!(p.file_stem(), ".gitignore");
        assert_eq!(p.extension(), None);
    }
}
