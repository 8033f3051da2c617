use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use path_clean::PathClean;

use crate::{error::PathError, RelativeSystemPath};

/// A path known to be absolute, borrowed form.
///
/// Relies on the same `repr(transparent)`-over-`Path` trick as `std::path::Path`
/// itself: an `&AbsoluteSystemPath` and an `&Path` share a representation, so the
/// unsafe casts here only ever change the type the compiler treats the bytes as.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct AbsoluteSystemPath(Path);

impl AbsoluteSystemPath {
    pub fn new<P: AsRef<Path> + ?Sized>(value: &P) -> Result<&Self, PathError> {
        let path = value.as_ref();
        if path.is_relative() {
            return Err(PathError::NotAbsolute(path.to_owned()));
        }
        Ok(unsafe { Self::new_unchecked(path) })
    }

    unsafe fn new_unchecked(path: &Path) -> &Self {
        &*(path as *const Path as *const Self)
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn join_relative(&self, rel: &RelativeSystemPath) -> AbsoluteSystemPathBuf {
        AbsoluteSystemPathBuf(self.0.join(rel.as_str()).clean())
    }

    pub fn parent(&self) -> Option<&AbsoluteSystemPath> {
        self.0.parent().map(|p| unsafe { Self::new_unchecked(p) })
    }

    /// Computes the root-relative, forward-slash path of `target` with respect to
    /// `self`. Returns `None` if `target` does not live under `self`.
    pub fn anchor(&self, target: &AbsoluteSystemPath) -> Option<RelativeSystemPathBuf> {
        let rel = target.0.strip_prefix(&self.0).ok()?;
        let mut s = String::new();
        for (i, component) in rel.components().enumerate() {
            if i > 0 {
                s.push('/');
            }
            s.push_str(&component.as_os_str().to_string_lossy());
        }
        Some(RelativeSystemPathBuf(s))
    }
}

impl fmt::Display for AbsoluteSystemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

impl AsRef<Path> for AbsoluteSystemPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl ToOwned for AbsoluteSystemPath {
    type Owned = AbsoluteSystemPathBuf;

    fn to_owned(&self) -> Self::Owned {
        AbsoluteSystemPathBuf(self.0.to_owned())
    }
}

/// Owned counterpart of [`AbsoluteSystemPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbsoluteSystemPathBuf(PathBuf);

impl AbsoluteSystemPathBuf {
    pub fn new(value: impl Into<PathBuf>) -> Result<Self, PathError> {
        let path = value.into();
        if path.is_relative() {
            return Err(PathError::NotAbsolute(path));
        }
        Ok(Self(path.clean()))
    }

    pub fn cwd() -> Result<Self, PathError> {
        Ok(Self(std::env::current_dir()?))
    }

    pub fn as_absolute_path(&self) -> &AbsoluteSystemPath {
        unsafe { AbsoluteSystemPath::new_unchecked(&self.0) }
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

/// Parses a CLI-supplied path, resolving it against the current working
/// directory first if it's given as relative (`clap`'s derive macro picks
/// this up automatically since there's no explicit `value_parser` on the
/// `AbsoluteSystemPathBuf`-typed flags in the `haste-map` binary).
impl FromStr for AbsoluteSystemPathBuf {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = PathBuf::from(s);
        if path.is_absolute() {
            Self::new(path)
        } else {
            Self::new(std::env::current_dir()?.join(path))
        }
    }
}

impl fmt::Display for AbsoluteSystemPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

impl AsRef<Path> for AbsoluteSystemPathBuf {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl std::ops::Deref for AbsoluteSystemPathBuf {
    type Target = AbsoluteSystemPath;

    fn deref(&self) -> &Self::Target {
        self.as_absolute_path()
    }
}

use crate::relative::RelativeSystemPathBuf;
