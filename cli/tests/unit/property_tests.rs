//! Property-based tests for coalescing and rule matching.
//!
//! Uses `proptest` to verify invariants across many random inputs.

#![allow(clippy::expect_used)]

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use proptest::prelude::*;
use tether_cli::domain::{Coalescer, RuleTable};
use tether_common::{ChangeEvent, ChangeKind, EventId};

use crate::helpers::agent_config;

fn kind() -> impl Strategy<Value = ChangeKind> {
    prop_oneof![
        Just(ChangeKind::Created),
        Just(ChangeKind::Modified),
        Just(ChangeKind::Deleted),
    ]
}

// ============================================================================
// Coalescer property tests
// ============================================================================

proptest! {
    /// Every event lands in exactly one task; deletes close their window early.
    #[test]
    fn prop_coalescer_conserves_events(
        events in prop::collection::vec((0usize..5, kind()), 1..60),
    ) {
        let mut coalescer = Coalescer::new(Duration::from_secs(60));
        let now = Instant::now();
        let mut tasks = Vec::new();
        for (n, (slot, kind)) in (1..).zip(&events) {
            let path = format!("/srv/inbox/f{slot}.md");
            tasks.extend(coalescer.observe(&ChangeEvent::new(EventId(n), path, *kind), now));
        }
        tasks.extend(coalescer.drain());

        let deletes = events.iter().filter(|(_, k)| *k == ChangeKind::Deleted).count();
        prop_assert!(tasks.len() >= deletes);
        let merged: u32 = tasks.iter().map(|t| t.merge_count).sum();
        prop_assert_eq!(merged as usize, events.len());
        prop_assert_eq!(coalescer.open_windows(), 0);
    }

    /// Task ids are never reused.
    #[test]
    fn prop_coalescer_task_ids_are_unique(
        events in prop::collection::vec((0usize..8, kind()), 1..40),
    ) {
        let mut coalescer = Coalescer::new(Duration::from_secs(60));
        let now = Instant::now();
        let mut ids = Vec::new();
        for (n, (slot, kind)) in (1..).zip(&events) {
            let event = ChangeEvent::new(EventId(n), format!("/w/{slot}"), *kind);
            ids.extend(coalescer.observe(&event, now).iter().map(|t| t.id.0));
        }
        ids.extend(coalescer.drain().iter().map(|t| t.id.0));
        let distinct: HashSet<u64> = ids.iter().copied().collect();
        prop_assert_eq!(distinct.len(), ids.len());
    }
}

// ============================================================================
// RuleTable property tests
// ============================================================================

proptest! {
    /// Paths under the root are matched on their root-relative form.
    #[test]
    fn prop_relative_path_strips_root(
        parts in prop::collection::vec("[a-zA-Z0-9_-]{1,12}", 1..5),
    ) {
        let table = RuleTable::compile(&agent_config(Path::new("/srv/inbox")))
            .expect("rules compile");
        let mut path = Path::new("/srv/inbox").to_path_buf();
        for part in &parts {
            path.push(part);
        }
        prop_assert_eq!(table.relative_path(&path), parts.join("/"));
    }

    /// Dry runs never fail and only report a rule for markdown or drafts.
    #[test]
    fn prop_dry_run_matches_only_configured_patterns(
        name in "[a-z]{1,10}\\.(md|txt|rs)",
        kind in kind(),
    ) {
        let table = RuleTable::compile(&agent_config(Path::new("/srv/inbox")))
            .expect("rules compile");
        let report = table.dry_run(&Path::new("/srv/inbox").join(&name), kind, Utc::now());
        let expect_match = name.ends_with(".md") && kind != ChangeKind::Deleted;
        prop_assert_eq!(report.is_match(), expect_match);
        prop_assert_eq!(report.relative_path, name);
    }
}
