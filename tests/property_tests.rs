//! Property-based tests for livedoc
//!
//! These tests verify invariants that must hold for all inputs:
//! - Normalization keeps every record and never panics
//! - Server-side ordering is a total order
//! - Walking pages by cursor visits every ordered record exactly once
//! - Cursor tokens and keys are stable identities
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

use livedoc::normalize::{normalize, SortSpec};
use livedoc::{Cursor, Document, Key, KeyPart};

fn record(id: usize, t: Option<i64>) -> Document {
    let doc = Document::new(format!("r{}", id));
    match t {
        Some(t) => doc.with_field("timestampCreate", t),
        None => doc,
    }
}

fn records(max: usize) -> impl Strategy<Value = Vec<Document>> {
    prop::collection::vec(prop::option::of(0i64..1_000), 0..max).prop_map(|ts| {
        ts.into_iter()
            .enumerate()
            .map(|(i, t)| record(i, t))
            .collect()
    })
}

// ============================================================================
// NORMALIZATION
// ============================================================================

mod normalize_tests {
    use super::*;

    proptest! {
        /// Invariant: normalize never drops or duplicates records
        #[test]
        fn preserves_records(docs in records(64)) {
            let len = docs.len();
            match normalize(docs.clone(), &SortSpec::default()) {
                None => prop_assert_eq!(len, 0),
                Some(sorted) => {
                    prop_assert_eq!(sorted.len(), len);
                    let mut before: Vec<_> = docs.iter().map(|d| d.id.clone()).collect();
                    let mut after: Vec<_> = sorted.iter().map(|d| d.id.clone()).collect();
                    before.sort();
                    after.sort();
                    prop_assert_eq!(before, after);
                }
            }
        }

        /// Invariant: the same input always yields the same order
        #[test]
        fn deterministic(docs in records(64)) {
            let spec = SortSpec::default();
            prop_assert_eq!(normalize(docs.clone(), &spec), normalize(docs, &spec));
        }

        /// Invariant: with every record timestamped, output is newest first
        /// and equal timestamps keep their input order
        #[test]
        fn fully_timestamped_is_sorted_and_stable(ts in prop::collection::vec(0i64..20, 1..64)) {
            let docs: Vec<Document> = ts.iter().enumerate().map(|(i, t)| record(i, Some(*t))).collect();
            let sorted = normalize(docs, &SortSpec::default()).unwrap();
            for pair in sorted.windows(2) {
                let a = pair[0].get("timestampCreate").and_then(|v| v.as_i64()).unwrap();
                let b = pair[1].get("timestampCreate").and_then(|v| v.as_i64()).unwrap();
                prop_assert!(a >= b);
                if a == b {
                    let ia: usize = pair[0].id[1..].parse().unwrap();
                    let ib: usize = pair[1].id[1..].parse().unwrap();
                    prop_assert!(ia < ib);
                }
            }
        }

        /// Invariant: arbitrary field values never panic the sort
        #[test]
        fn never_panics(values in prop::collection::vec(".*", 0..32)) {
            let docs: Vec<Document> = values
                .into_iter()
                .enumerate()
                .map(|(i, v)| Document::new(format!("r{}", i)).with_field("timestampCreate", v))
                .collect();
            let _ = normalize(docs, &SortSpec::default());
        }
    }
}

// ============================================================================
// SERVER-SIDE ORDERING
// ============================================================================

mod ordering_tests {
    use super::*;
    use livedoc::query::compare_values;
    use serde_json::{json, Value};
    use std::cmp::Ordering;

    fn any_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            (-1_000i64..1_000).prop_map(Value::from),
            (-1_000.0f64..1_000.0).prop_map(Value::from),
            "[a-z0-9:-]{0,12}".prop_map(Value::from),
            (0i64..2_000_000_000, 0u32..1_000_000_000)
                .prop_map(|(s, n)| json!({"seconds": s, "nanoseconds": n})),
            prop::collection::vec(0i64..5, 0..3).prop_map(|v| json!(v)),
        ]
    }

    proptest! {
        /// Invariant: antisymmetric
        #[test]
        fn antisymmetric(a in any_value(), b in any_value()) {
            prop_assert_eq!(compare_values(&a, &b), compare_values(&b, &a).reverse());
        }

        /// Invariant: transitive
        #[test]
        fn transitive(a in any_value(), b in any_value(), c in any_value()) {
            let ab = compare_values(&a, &b);
            let bc = compare_values(&b, &c);
            if ab != Ordering::Greater && bc != Ordering::Greater {
                prop_assert_ne!(compare_values(&a, &c), Ordering::Greater);
            }
        }

        /// Invariant: every value equals itself
        #[test]
        fn reflexive(a in any_value()) {
            prop_assert_eq!(compare_values(&a, &a), Ordering::Equal);
        }
    }
}

// ============================================================================
// PAGINATION
// ============================================================================

mod pager_tests {
    use super::*;
    use livedoc::pager::Pager;
    use livedoc::query::QueryDescriptor;
    use livedoc::MemoryBackend;
    use std::collections::HashSet;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Invariant: following cursors visits every timestamped record
        /// exactly once, in the same order as one unbounded query
        #[test]
        fn pages_cover_ordered_records(
            ts in prop::collection::vec(prop::option::of(0i64..50), 0..40),
            size in 1usize..7,
        ) {
            let backend = MemoryBackend::new();
            backend.put_many("items", ts.iter().enumerate().map(|(i, t)| record(i, *t)));
            let pager = Pager::default();
            let base = QueryDescriptor::collection("items");

            let walked = tokio_test::block_on(async {
                let mut walked = Vec::new();
                let mut cursor: Option<Cursor> = None;
                loop {
                    let page = pager.fetch(&backend, base.clone(), Some(size), cursor.as_ref()).await.unwrap();
                    match page.items {
                        None => break,
                        Some(items) => {
                            assert!(items.len() <= size);
                            walked.extend(items.into_iter().map(|d| d.id));
                            cursor = page.next_cursor;
                        }
                    }
                }
                walked
            });

            let everything = tokio_test::block_on(
                pager.fetch(&backend, base, Some(ts.len().max(1)), None),
            ).unwrap();
            let expected: Vec<String> = everything
                .items
                .unwrap_or_default()
                .into_iter()
                .map(|d| d.id)
                .collect();

            let unique: HashSet<&String> = walked.iter().collect();
            prop_assert_eq!(unique.len(), walked.len());
            prop_assert_eq!(walked.len(), ts.iter().filter(|t| t.is_some()).count());
            prop_assert_eq!(walked, expected);
        }
    }
}

// ============================================================================
// CURSORS AND KEYS
// ============================================================================

mod identity_tests {
    use super::*;

    proptest! {
        /// Invariant: a cursor survives its token form
        #[test]
        fn cursor_token_roundtrip(id in "\\PC{1,40}", t in prop::option::of(any::<i64>())) {
            let doc = match t {
                Some(t) => Document::new(id).with_field("timestampCreate", t),
                None => Document::new(id),
            };
            let cursor = Cursor::at(&doc, "timestampCreate");
            let parsed = Cursor::from_token(&cursor.to_token()).unwrap();
            prop_assert_eq!(parsed, cursor);
        }

        /// Invariant: garbage tokens are rejected, not panicked on
        #[test]
        fn cursor_garbage_never_panics(token in ".*") {
            let _ = Cursor::from_token(&token);
        }

        /// Invariant: keys are equal exactly when their parts are
        #[test]
        fn key_equality_is_structural(
            a in prop::collection::vec("[a-z]{0,4}", 0..4),
            b in prop::collection::vec("[a-z]{0,4}", 0..4),
        ) {
            let ka = Key::new(a.iter().map(KeyPart::from).collect());
            let kb = Key::new(b.iter().map(KeyPart::from).collect());
            prop_assert_eq!(ka == kb, a == b);
        }
    }
}
