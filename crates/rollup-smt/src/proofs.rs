use crate::NodeHash;

/// A full Merkle proof: `height - 1` sibling hashes ordered leaf-adjacent
/// sibling first, as the on-chain verifier consumes them.
pub type MerkleProof = Vec<NodeHash>;

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use proptest::prelude::*;
    use rollup_db::namespaces::AGGREGATOR_TREE;
    use rollup_db::MemoryDb;

    use crate::{Keccak256Hasher, SparseMerkleTree};

    fn tree_root_after(updates: &[(u8, Vec<u8>)]) -> [u8; 32] {
        let db = Arc::new(MemoryDb::new());
        let mut tree: SparseMerkleTree<Keccak256Hasher, _> =
            SparseMerkleTree::new(db, AGGREGATOR_TREE, 64, false, None).unwrap();
        for (key, value) in updates {
            tree.update(&[*key], value).unwrap();
        }
        tree.root()
    }

    proptest! {
        /// The root is a function of the terminal key → value map alone.
        #[test]
        fn root_depends_only_on_terminal_state(
            updates in proptest::collection::vec((any::<u8>(), proptest::collection::vec(any::<u8>(), 1..48)), 1..40)
        ) {
            let replayed = tree_root_after(&updates);

            // Collapse to the terminal state and apply in key order instead
            // of arrival order.
            let terminal: BTreeMap<u8, Vec<u8>> =
                updates.iter().cloned().collect();
            let collapsed: Vec<(u8, Vec<u8>)> = terminal.into_iter().collect();
            let direct = tree_root_after(&collapsed);

            prop_assert_eq!(replayed, direct);
        }

        /// Every write is provable against the root it produced.
        #[test]
        fn updates_always_prove(
            entries in proptest::collection::btree_map(any::<u8>(), proptest::collection::vec(any::<u8>(), 1..32), 1..20)
        ) {
            let db = Arc::new(MemoryDb::new());
            let mut tree: SparseMerkleTree<Keccak256Hasher, _> =
                SparseMerkleTree::new(db, AGGREGATOR_TREE, 64, false, None).unwrap();
            for (key, value) in &entries {
                tree.update(&[*key], value).unwrap();
            }
            let root = tree.root();
            for (key, value) in &entries {
                let proof = tree.prove(&[*key]).unwrap();
                prop_assert!(tree.verify_proof(&proof, root, &[*key], value));
                let compact = tree.compact_proof(&proof).unwrap();
                prop_assert_eq!(tree.decompact_proof(&compact).unwrap(), proof);
            }
        }
    }
}
