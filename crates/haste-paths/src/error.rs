use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("path is not absolute: {0}")]
    NotAbsolute(PathBuf),
    #[error("path is not relative: {0}")]
    NotRelative(PathBuf),
    #[error("path contains a backslash and cannot be a relative unix path: {0}")]
    NotUnix(String),
    #[error("path is not valid unicode: {0}")]
    InvalidUnicode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
