//! Path newtypes distinguishing "absolute, native-separator" paths from
//! "root-relative, forward-slash" paths, so that distinction is enforced by
//! the type checker rather than by convention.

mod absolute;
mod error;
mod relative;

pub use absolute::{AbsoluteSystemPath, AbsoluteSystemPathBuf};
pub use error::PathError;
pub use relative::{RelativeSystemPath, RelativeSystemPathBuf};
