//! Property-based tests for protection-set invariants.
//!
//! Arbitrary subsets must always end up in the merged set, building is a pure
//! function of its inputs, a protected directory covers its descendants, and
//! selection never yields a protected path.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::SystemTime;

use proptest::prelude::*;

use super::{ProtectionOrigin, ProtectionSet};
use crate::cleanup::selector::select;
use crate::scanner::glob::PatternSet;
use crate::scanner::walker::FileNode;

// ──────────────────── strategies ────────────────────

fn arb_component() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("app".to_string()),
        Just("static".to_string()),
        Just("templates".to_string()),
        Just("__pycache__".to_string()),
        "[a-z]{1,6}",
        "[a-z]{1,4}\\.(py|html|pyc|js)",
    ]
}

fn arb_path() -> impl Strategy<Value = PathBuf> {
    prop::collection::vec(arb_component(), 1..4).prop_map(|parts| parts.iter().collect())
}

fn arb_subset() -> impl Strategy<Value = BTreeSet<PathBuf>> {
    prop::collection::btree_set(arb_path(), 0..12)
}

// ──────────────────── properties ────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn merged_set_contains_every_subset(
        tracked in arb_subset(),
        referenced in arb_subset(),
        allowlisted in arb_subset(),
    ) {
        let ps = ProtectionSet::build(tracked.clone(), referenced.clone(), allowlisted.clone());
        for path in tracked.iter().chain(&referenced).chain(&allowlisted) {
            prop_assert!(ps.contains(path), "{} missing from protection set", path.display());
        }
        let union: BTreeSet<_> = tracked.union(&referenced).cloned().collect();
        let union: BTreeSet<_> = union.union(&allowlisted).cloned().collect();
        prop_assert_eq!(ps.len(), union.len());
    }

    #[test]
    fn build_is_idempotent(
        tracked in arb_subset(),
        referenced in arb_subset(),
        allowlisted in arb_subset(),
    ) {
        let first = ProtectionSet::build(tracked.clone(), referenced.clone(), allowlisted.clone());
        let second = ProtectionSet::build(tracked, referenced, allowlisted);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn adding_a_subset_never_unprotects(
        tracked in arb_subset(),
        referenced in arb_subset(),
        extra in arb_subset(),
        probe in arb_path(),
    ) {
        let before = ProtectionSet::build(tracked.clone(), referenced.clone(), BTreeSet::new());
        let after = ProtectionSet::build(tracked, referenced, extra);
        if before.contains(&probe) {
            prop_assert!(after.contains(&probe));
        }
    }

    #[test]
    fn protected_directory_covers_descendants(dir in arb_path(), child in arb_component()) {
        let ps = ProtectionSet::build(BTreeSet::new(), BTreeSet::from([dir.clone()]), BTreeSet::new());
        let nested = dir.join(child);
        prop_assert!(ps.contains(&nested));
        prop_assert_eq!(ps.origins(&nested), vec![ProtectionOrigin::Referenced]);
    }

    #[test]
    fn selected_candidates_are_never_protected(
        files in prop::collection::btree_set(arb_path(), 0..24),
        tracked in arb_subset(),
        referenced in arb_subset(),
    ) {
        let nodes: Vec<FileNode> = files
            .iter()
            .map(|path| FileNode {
                path: path.clone(),
                is_dir: false,
                size_bytes: 1,
                modified: SystemTime::UNIX_EPOCH,
            })
            .collect();
        let ps = ProtectionSet::build(tracked, referenced, BTreeSet::new());
        let include = PatternSet::new(&["**"]).unwrap();
        let candidates = select(&nodes, &ps, &include, &PatternSet::default()).unwrap();
        for candidate in &candidates {
            prop_assert!(!ps.contains(&candidate.path));
        }
        let unprotected = nodes.iter().filter(|n| !ps.contains(&n.path)).count();
        prop_assert_eq!(candidates.len(), unprotected);
    }
}
