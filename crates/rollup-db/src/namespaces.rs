//! The namespaces used across the node.
//!
//! Aggregator and validator state trees are disjoint on purpose: the two
//! roles never read each other's nodes even when they share one physical
//! store inside a single process.

use crate::Namespace;

/// Aggregator state-tree nodes.
pub const AGGREGATOR_TREE: Namespace = Namespace::new(b"at");
/// Validator state-tree nodes.
pub const VALIDATOR_TREE: Namespace = Namespace::new(b"vt");
/// Per-block transition-tree nodes (ephemeral, in-memory stores only).
pub const ROLLUP_BLOCK_TREE: Namespace = Namespace::new(b"rbt");
/// Token address → token index.
pub const TOKEN_ADDRESS_TO_INDEX: Namespace = Namespace::new(b"tatti");
/// Token index → token address.
pub const TOKEN_INDEX_TO_ADDRESS: Namespace = Namespace::new(b"titta");
/// Mainchain token address → sidechain token address.
pub const MAINCHAIN_TO_SIDECHAIN_TOKEN: Namespace = Namespace::new(b"mtatst");
/// Account address → slot index.
pub const ACCOUNT_TO_SLOT: Namespace = Namespace::new(b"aatk");
/// Slot index → serialized account info.
pub const SLOT_TO_ACCOUNT_INFO: Namespace = Namespace::new(b"ktai");
/// Last assigned slot index.
pub const LAST_SLOT: Namespace = Namespace::new(b"lk");
/// Rollup block number → encoded block (validator replay archive).
pub const ROLLUP_BLOCK_NUMBER: Namespace = Namespace::new(b"rbn");
