//! Cluster leaves, the row-store B+-tree and cascade bookkeeping.
//!
//! A [`Cluster`] bundles up to [`ember_types::limits::CLUSTER_NODE_SIZE`]
//! rows: one key array plus one leaf per column. The [`ClusterTree`]
//! indexes clusters by object key and keeps them balanced as rows come
//! and go. [`CascadeState`] carries the deletion/nullification queues
//! that link maintenance accumulates while mutating.

pub mod cascade;
pub mod cluster;
pub mod tree;

pub use cascade::{CascadeMode, CascadeState, NullifyEntry};
pub use cluster::{leaf_kind, Cluster, ColumnLeafKind};
pub use tree::{ClusterIter, ClusterState, ClusterTree};

#[cfg(test)]
mod proptests {
    use super::*;
    use ember_alloc::SlabAlloc;
    use ember_types::{ColKey, ColKeyIdx, ColumnAttrMask, ColumnType, ObjKey};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn cols() -> Vec<ColKey> {
        vec![ColKey::new(
            ColKeyIdx(0),
            ColumnType::Int,
            ColumnAttrMask::EMPTY,
            0,
        )]
    }

    proptest! {
        // Random interleavings of inserts and erases leave the tree
        // agreeing with a model set, in both membership and order.
        #[test]
        fn prop_tree_matches_model(ops in prop::collection::vec((any::<bool>(), 0i64..500), 1..400)) {
            let mut alloc = SlabAlloc::new_memory();
            let mut tree = ClusterTree::create(&mut alloc, cols()).unwrap();
            let mut model = BTreeSet::new();
            for (insert, k) in ops {
                let key = ObjKey::new(k);
                if insert {
                    let res = tree.insert(&mut alloc, key, &[]);
                    prop_assert_eq!(res.is_ok(), model.insert(k));
                } else {
                    let res = tree.erase(&mut alloc, key);
                    prop_assert_eq!(res.is_ok(), model.remove(&k));
                }
            }
            prop_assert_eq!(tree.size(&alloc), model.len());
            let got: Vec<i64> = tree.keys(&alloc).into_iter().map(|k| k.value()).collect();
            let want: Vec<i64> = model.into_iter().collect();
            prop_assert_eq!(got, want);
            // Occupancy bounds hold whenever more than one cluster remains.
            let sizes = crate::tree::leaf_sizes(&alloc, &tree);
            for &size in &sizes {
                prop_assert!(size <= ember_types::limits::CLUSTER_NODE_SIZE);
                if sizes.len() > 1 {
                    prop_assert!(size >= ember_types::limits::CLUSTER_MIN_OCCUPANCY);
                }
            }
        }
    }
}
