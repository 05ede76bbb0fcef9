//! Property tests for the global referential invariants.

use proptest::prelude::*;

use ember_core::{ColumnType, Group, LinkType, Mixed, ObjKey, TableKey};

#[derive(Debug, Clone)]
enum Op {
    CreateA,
    CreateB,
    /// Set A[i % live].link = B[j % live] (or null when no B rows).
    SetLink(usize, usize),
    ClearLink(usize),
    RemoveA(usize),
    RemoveB(usize),
    InvalidateB(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::CreateA),
        Just(Op::CreateB),
        (any::<usize>(), any::<usize>()).prop_map(|(i, j)| Op::SetLink(i, j)),
        any::<usize>().prop_map(Op::ClearLink),
        any::<usize>().prop_map(Op::RemoveA),
        any::<usize>().prop_map(Op::RemoveB),
        any::<usize>().prop_map(Op::InvalidateB),
    ]
}

struct Fixture {
    g: Group,
    a: TableKey,
    b: TableKey,
    link: ember_core::ColKey,
}

fn fixture() -> Fixture {
    let mut g = Group::new();
    let b = g.add_table("B").unwrap();
    let a = g.add_table("A").unwrap();
    let link = g.add_column_link(a, "link", LinkType::Single, b).unwrap();
    Fixture { g, a, b, link }
}

fn pick(keys: &[ObjKey], raw: usize) -> Option<ObjKey> {
    if keys.is_empty() {
        None
    } else {
        Some(keys[raw % keys.len()])
    }
}

/// Scan the whole group and check that every stored link has exactly one
/// backlink entry and vice versa, and that tombstones exist only while
/// referenced.
fn check_invariants(f: &Fixture) {
    let g = &f.g;
    let a_keys = g.get_table(f.a).unwrap().object_keys(g.alloc());
    let b_table = g.get_table(f.b).unwrap();

    // Forward direction: each link implies one backlink entry.
    let mut expected: std::collections::HashMap<ObjKey, Vec<ObjKey>> =
        std::collections::HashMap::new();
    for &a_key in &a_keys {
        let a_obj = g.get_object(ember_core::ObjLink::new(f.a, a_key)).unwrap();
        let stored = a_obj.get_unfiltered_link(g, f.link).unwrap();
        if !stored.is_null() {
            expected.entry(stored).or_default().push(a_key);
        }
    }

    // Reverse direction: backlink sets match exactly, for live rows and
    // tombstones alike.
    let mut b_keys = b_table.object_keys(g.alloc());
    let tombstones: Vec<ObjKey> = expected
        .keys()
        .filter(|k| k.is_unresolved())
        .copied()
        .collect();
    b_keys.extend(&tombstones);
    for b_key in b_keys {
        let b_obj = g.get_object(ember_core::ObjLink::new(f.b, b_key)).unwrap();
        let mut actual: Vec<ObjKey> = Vec::new();
        let n = b_obj.get_backlink_count(g, f.a, f.link).unwrap();
        for i in 0..n {
            actual.push(b_obj.get_backlink(g, f.a, f.link, i).unwrap());
        }
        actual.sort();
        let mut want = expected.remove(&b_key).unwrap_or_default();
        want.sort();
        assert_eq!(actual, want, "backlink set mismatch for {b_key}");
    }
    // Every expected target existed.
    assert!(expected.is_empty(), "dangling links: {expected:?}");

    // Tombstone liveness: a tombstone only exists while referenced.
    let tombstone_count = b_table.tombstone_count(g.alloc());
    assert_eq!(tombstone_count, tombstones.len(), "orphaned tombstones");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_backlink_symmetry_under_random_edits(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut f = fixture();
        for op in ops {
            let a_keys = f.g.get_table(f.a).unwrap().object_keys(f.g.alloc());
            let b_keys = f.g.get_table(f.b).unwrap().object_keys(f.g.alloc());
            match op {
                Op::CreateA => {
                    f.g.create_object(f.a).unwrap();
                }
                Op::CreateB => {
                    f.g.create_object(f.b).unwrap();
                }
                Op::SetLink(i, j) => {
                    if let (Some(a_key), Some(b_key)) = (pick(&a_keys, i), pick(&b_keys, j)) {
                        let a_obj = f.g.get_object(ember_core::ObjLink::new(f.a, a_key)).unwrap();
                        a_obj.set(&mut f.g, f.link, b_key).unwrap();
                    }
                }
                Op::ClearLink(i) => {
                    if let Some(a_key) = pick(&a_keys, i) {
                        let a_obj = f.g.get_object(ember_core::ObjLink::new(f.a, a_key)).unwrap();
                        a_obj.set_null(&mut f.g, f.link).unwrap();
                    }
                }
                Op::RemoveA(i) => {
                    if let Some(a_key) = pick(&a_keys, i) {
                        f.g.remove_object(f.a, a_key).unwrap();
                    }
                }
                Op::RemoveB(j) => {
                    if let Some(b_key) = pick(&b_keys, j) {
                        f.g.remove_object(f.b, b_key).unwrap();
                    }
                }
                Op::InvalidateB(j) => {
                    if let Some(b_key) = pick(&b_keys, j) {
                        f.g.invalidate_object(f.b, b_key).unwrap();
                    }
                }
            }
            check_invariants(&f);
        }
    }

    #[test]
    fn prop_primary_keys_stay_unique(pks in prop::collection::vec(0i64..40, 1..60)) {
        let mut g = Group::new();
        let t = g.add_table("T").unwrap();
        let pk_col = g.add_primary_key_column(t, "id", ColumnType::Int).unwrap();
        let mut seen = std::collections::HashSet::new();
        for pk in pks {
            let result = g.create_object_with_primary_key(t, Mixed::Int(pk));
            prop_assert_eq!(result.is_ok(), seen.insert(pk));
        }
        // Scan: all live pk values distinct.
        let mut values = Vec::new();
        for key in g.get_table(t).unwrap().object_keys(g.alloc()) {
            let obj = g.get_object(ember_core::ObjLink::new(t, key)).unwrap();
            values.push(obj.get::<i64>(&g, pk_col).unwrap());
        }
        let unique: std::collections::HashSet<_> = values.iter().collect();
        prop_assert_eq!(unique.len(), values.len());
        prop_assert_eq!(values.len(), seen.len());
    }
}

#[test]
fn test_cascade_terminates_on_deep_embedded_chain() {
    let mut g = Group::new();
    let node_t = g.add_embedded_table("Node").unwrap();
    let root_t = g.add_table("Root").unwrap();
    let root_child = g
        .add_column_link(root_t, "child", LinkType::Single, node_t)
        .unwrap();
    let next = g
        .add_column_link(node_t, "next", LinkType::Single, node_t)
        .unwrap();

    let root = g.create_object(root_t).unwrap();
    let mut cur = root.create_and_set_linked_object(&mut g, root_child).unwrap();
    for _ in 0..50 {
        cur = cur.create_and_set_linked_object(&mut g, next).unwrap();
    }
    assert_eq!(g.get_table(node_t).unwrap().size(g.alloc()), 51);

    root.remove(&mut g).unwrap();
    assert_eq!(g.get_table(node_t).unwrap().size(g.alloc()), 0);
    assert_eq!(g.get_table(node_t).unwrap().tombstone_count(g.alloc()), 0);
}
