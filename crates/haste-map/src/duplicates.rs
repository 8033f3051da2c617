//! Duplicate registry (C6): enforces "at most one winner per `(haste_id,
//! platform)`, otherwise the key is ambiguous" and supports recovery when a
//! colliding path disappears (§4.6).

use std::collections::BTreeMap;

use haste_paths::RelativeSystemPathBuf;

use crate::{
    error::{Error, Result},
    snapshot::{detect_platform, DuplicateTable, ModuleEntry, ModuleTable, GENERIC_PLATFORM},
};

fn platform_of<'a>(path: &RelativeSystemPathBuf, platforms: &'a [String]) -> String {
    detect_platform(path, platforms).unwrap_or(GENERIC_PLATFORM).to_string()
}

/// `set_module(id, new_entry)` over `(ModuleTable, DuplicateTable)`, §4.6.
pub fn set_module(
    id: &str,
    new_entry: ModuleEntry,
    platforms: &[String],
    modules: &mut ModuleTable,
    duplicates: &mut DuplicateTable,
    throw_on_collision: bool,
) -> Result<()> {
    let platform = platform_of(&new_entry.path, platforms);

    if let Some(already_contested) = duplicates.get_mut(id).and_then(|by_platform| by_platform.get_mut(&platform)) {
        already_contested.insert(new_entry.path.clone(), new_entry.kind);
        return Ok(());
    }

    if let Some(winner) = modules.get(id).and_then(|by_platform| by_platform.get(&platform)).cloned() {
        if winner.path == new_entry.path {
            return Ok(());
        }

        if throw_on_collision {
            tracing::error!(
                haste_id = id,
                platform = %platform,
                path_a = %winner.path,
                path_b = %new_entry.path,
                "haste module naming collision"
            );
            return Err(Error::DuplicateModule {
                id: id.to_string(),
                platform,
                path_a: winner.path,
                path_b: new_entry.path,
            });
        }

        tracing::warn!(
            haste_id = id,
            platform = %platform,
            path_a = %winner.path,
            path_b = %new_entry.path,
            "haste module naming collision"
        );

        if let Some(by_platform) = modules.get_mut(id) {
            by_platform.remove(&platform);
            if by_platform.is_empty() {
                modules.remove(id);
            }
        }

        let mut contested = BTreeMap::new();
        contested.insert(winner.path.clone(), winner.kind);
        contested.insert(new_entry.path.clone(), new_entry.kind);
        duplicates.entry(id.to_string()).or_default().insert(platform, contested);
        return Ok(());
    }

    modules.entry(id.to_string()).or_default().insert(platform, new_entry);
    Ok(())
}

/// `recover_duplicates(relative_path, id)`, §4.6: invoked when the file
/// behind a possibly-duplicated id is removed or re-processed. Promotes the
/// sole survivor back into `ModuleTable` if contest drops to one entry.
pub fn recover_duplicates(
    relative_path: &RelativeSystemPathBuf,
    id: &str,
    platforms: &[String],
    modules: &mut ModuleTable,
    duplicates: &mut DuplicateTable,
) {
    let platform = platform_of(relative_path, platforms);

    let Some(by_platform) = duplicates.get_mut(id) else {
        return;
    };
    let Some(contested) = by_platform.get_mut(&platform) else {
        return;
    };

    contested.remove(relative_path);

    if contested.len() == 1 {
        let (sole_path, sole_kind) = contested
            .iter()
            .next()
            .map(|(p, k)| (p.clone(), *k))
            .expect("checked len == 1 above");
        by_platform.remove(&platform);
        modules.entry(id.to_string()).or_default().insert(
            platform,
            ModuleEntry {
                path: sole_path,
                kind: sole_kind,
            },
        );
    }

    if by_platform.is_empty() {
        duplicates.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ModuleKind;

    fn entry(path: &str) -> ModuleEntry {
        ModuleEntry {
            path: RelativeSystemPathBuf::new(path).unwrap(),
            kind: ModuleKind::Module,
        }
    }

    #[test]
    fn first_registration_wins_outright() {
        let mut modules = ModuleTable::new();
        let mut duplicates = DuplicateTable::new();
        set_module("Foo", entry("a/Foo.js"), &[], &mut modules, &mut duplicates, false).unwrap();
        assert_eq!(modules.get("Foo").unwrap().get("g").unwrap().path.as_str(), "a/Foo.js");
        assert!(duplicates.is_empty());
    }

    #[test]
    fn collision_moves_both_into_duplicate_table() {
        let mut modules = ModuleTable::new();
        let mut duplicates = DuplicateTable::new();
        set_module("Foo", entry("a/Foo.js"), &[], &mut modules, &mut duplicates, false).unwrap();
        set_module("Foo", entry("b/Foo.js"), &[], &mut modules, &mut duplicates, false).unwrap();

        assert!(modules.get("Foo").is_none());
        let contested = duplicates.get("Foo").unwrap().get("g").unwrap();
        assert_eq!(contested.len(), 2);
    }

    #[test]
    fn collision_with_throw_on_collision_raises_duplicate_error() {
        let mut modules = ModuleTable::new();
        let mut duplicates = DuplicateTable::new();
        set_module("Foo", entry("a/Foo.js"), &[], &mut modules, &mut duplicates, true).unwrap();
        let err = set_module("Foo", entry("b/Foo.js"), &[], &mut modules, &mut duplicates, true).unwrap_err();
        assert!(matches!(err, Error::DuplicateModule { .. }));
    }

    #[test]
    fn platform_variants_coexist_without_collision() {
        let mut modules = ModuleTable::new();
        let mut duplicates = DuplicateTable::new();
        let platforms = vec!["ios".to_string(), "android".to_string()];
        set_module(
            "Widget",
            entry("Widget.ios.js"),
            &platforms,
            &mut modules,
            &mut duplicates,
            false,
        )
        .unwrap();
        set_module(
            "Widget",
            entry("Widget.android.js"),
            &platforms,
            &mut modules,
            &mut duplicates,
            false,
        )
        .unwrap();

        assert!(duplicates.is_empty());
        let by_platform = modules.get("Widget").unwrap();
        assert_eq!(by_platform.len(), 2);
        assert!(by_platform.contains_key("ios"));
        assert!(by_platform.contains_key("android"));
    }

    #[test]
    fn recovery_promotes_sole_survivor_back_to_module_table() {
        let mut modules = ModuleTable::new();
        let mut duplicates = DuplicateTable::new();
        set_module("Foo", entry("a/Foo.js"), &[], &mut modules, &mut duplicates, false).unwrap();
        set_module("Foo", entry("b/Foo.js"), &[], &mut modules, &mut duplicates, false).unwrap();

        let removed_path = RelativeSystemPathBuf::new("b/Foo.js").unwrap();
        recover_duplicates(&removed_path, "Foo", &[], &mut modules, &mut duplicates);

        assert!(duplicates.get("Foo").is_none());
        assert_eq!(modules.get("Foo").unwrap().get("g").unwrap().path.as_str(), "a/Foo.js");
    }

    #[test]
    fn out_of_order_arrival_yields_identical_final_state() {
        // §9 open question: the transition must be correct regardless of
        // which colliding path arrives first.
        let mut forward_modules = ModuleTable::new();
        let mut forward_duplicates = DuplicateTable::new();
        set_module("Foo", entry("a/Foo.js"), &[], &mut forward_modules, &mut forward_duplicates, false).unwrap();
        set_module("Foo", entry("b/Foo.js"), &[], &mut forward_modules, &mut forward_duplicates, false).unwrap();

        let mut reverse_modules = ModuleTable::new();
        let mut reverse_duplicates = DuplicateTable::new();
        set_module("Foo", entry("b/Foo.js"), &[], &mut reverse_modules, &mut reverse_duplicates, false).unwrap();
        set_module("Foo", entry("a/Foo.js"), &[], &mut reverse_modules, &mut reverse_duplicates, false).unwrap();

        assert_eq!(forward_modules, reverse_modules);
        assert_eq!(forward_duplicates, reverse_duplicates);
    }
}
