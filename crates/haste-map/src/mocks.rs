//! Mock registry (C7): tracks `mock_name -> relative path` and flags manual
//! mock collisions the same way module collisions are flagged (§4.7).

use haste_paths::RelativeSystemPathBuf;

use crate::{
    error::{Error, Result},
    snapshot::MockTable,
};

/// `mockName = basename-without-extension(path)` (§4.7).
pub fn mock_name_for(path: &RelativeSystemPathBuf) -> String {
    path.file_stem().to_string()
}

/// Registers `relative_path` under its mock name. A second binding under a
/// *different* path is a collision; always ends with `mock_table[name]`
/// pointing at `relative_path` regardless of the collision outcome (§4.7:
/// "Always set MockTable[mockName] = relativePath").
pub fn register(
    mock_table: &mut MockTable,
    relative_path: RelativeSystemPathBuf,
    throw_on_collision: bool,
) -> Result<()> {
    let mock_name = mock_name_for(&relative_path);

    if let Some(existing) = mock_table.get(&mock_name) {
        if existing != &relative_path {
            if throw_on_collision {
                tracing::error!(
                    mock_name = %mock_name,
                    path_a = %existing,
                    path_b = %relative_path,
                    "manual mock naming collision"
                );
                let err = Error::DuplicateMock {
                    mock_name,
                    path_a: existing.clone(),
                    path_b: relative_path,
                };
                return Err(err);
            }
            tracing::warn!(
                mock_name = %mock_name,
                path_a = %existing,
                path_b = %relative_path,
                "manual mock naming collision"
            );
        }
    }

    mock_table.insert(mock_name, relative_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_name_strips_extension_and_directory() {
        let path = RelativeSystemPathBuf::new("__mocks__/foo.js").unwrap();
        assert_eq!(mock_name_for(&path), "foo");
    }

    #[test]
    fn first_registration_is_silent() {
        let mut mocks = MockTable::new();
        let path = RelativeSystemPathBuf::new("__mocks__/foo.js").unwrap();
        register(&mut mocks, path.clone(), false).unwrap();
        assert_eq!(mocks.get("foo"), Some(&path));
    }

    #[test]
    fn second_binding_under_different_path_warns_but_overwrites() {
        let mut mocks = MockTable::new();
        let a = RelativeSystemPathBuf::new("root-a/__mocks__/foo.js").unwrap();
        let b = RelativeSystemPathBuf::new("root-b/__mocks__/foo.js").unwrap();
        register(&mut mocks, a, false).unwrap();
        register(&mut mocks, b.clone(), false).unwrap();
        assert_eq!(mocks.get("foo"), Some(&b));
    }

    #[test]
    fn second_binding_with_throw_on_collision_raises_duplicate_error() {
        let mut mocks = MockTable::new();
        let a = RelativeSystemPathBuf::new("root-a/__mocks__/foo.js").unwrap();
        let b = RelativeSystemPathBuf::new("root-b/__mocks__/foo.js").unwrap();
        register(&mut mocks, a, true).unwrap();
        let err = register(&mut mocks, b, true).unwrap_err();
        assert!(matches!(err, Error::DuplicateMock { .. }));
    }

    #[test]
    fn rebinding_the_same_path_is_not_a_collision() {
        let mut mocks = MockTable::new();
        let path = RelativeSystemPathBuf::new("__mocks__/foo.js").unwrap();
        register(&mut mocks, path.clone(), true).unwrap();
        register(&mut mocks, path, true).unwrap();
    }
}
