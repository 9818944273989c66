use std::marker::PhantomData;

use rollup_db::{KeyValueStore, Namespace, WriteBatch};

use crate::proofs::MerkleProof;
use crate::{NodeHash, SmtError, TreeHasher};

/// The value an untouched leaf holds: 32 zero bytes.
pub const DEFAULT_LEAF: [u8; 32] = [0u8; 32];

/// Meta key guarding one-time persistence of the default-node ladder.
const INIT_MARKER: &[u8] = b"init";
/// Meta key holding the current root across restarts.
const ROOT_KEY: &[u8] = b"root";

const PATH_BYTES: usize = 32;

/// A fixed-height sparse Merkle tree.
///
/// Interior nodes map `node_hash → left_hash || right_hash`, leaves map
/// `value_hash → value_bytes`; everything lives under one [`Namespace`] of
/// the backing store, so several trees can share a physical database.
///
/// With `hash_key` set, paths are derived by hashing the key; without it,
/// keys are zero-left-padded to the path width and used directly, which is
/// what dense numeric slot indices need.
pub struct SparseMerkleTree<H, S> {
    store: S,
    namespace: Namespace,
    height: usize,
    hash_key: bool,
    root: NodeHash,
    /// `default_nodes[j]` is the all-empty subtree hash at level `j`; level
    /// 0 is the root, level `height - 1` the leaves.
    default_nodes: Vec<NodeHash>,
    _hasher: PhantomData<H>,
}

impl<H: TreeHasher, S: KeyValueStore> SparseMerkleTree<H, S> {
    /// Creates or reopens a tree.
    ///
    /// On first use the default-node ladder is persisted under the tree's
    /// namespace; afterwards it is recomputed and trusted to match. When
    /// `root` is `None` the tree resumes from the persisted current root,
    /// falling back to the empty-tree root.
    pub fn new(
        store: S,
        namespace: Namespace,
        height: usize,
        hash_key: bool,
        root: Option<NodeHash>,
    ) -> Result<Self, SmtError> {
        if height == 0 || height > PATH_BYTES * 8 {
            return Err(SmtError::InvalidHeight(height));
        }

        let default_nodes = build_default_nodes::<H>(height);

        if !store.exists(namespace, INIT_MARKER)? {
            let mut batch = WriteBatch::default();
            for j in 0..height - 1 {
                let mut children = Vec::with_capacity(64);
                children.extend_from_slice(&default_nodes[j + 1]);
                children.extend_from_slice(&default_nodes[j + 1]);
                batch.put(namespace, &default_nodes[j], &children);
            }
            batch.put(namespace, &default_nodes[height - 1], &DEFAULT_LEAF);
            batch.put(namespace, INIT_MARKER, &[]);
            store.write(batch)?;
        }

        let root = match root {
            Some(root) => root,
            None => match store.get(namespace, ROOT_KEY)? {
                Some(stored) => as_node_hash(&stored)?,
                None => default_nodes[0],
            },
        };

        Ok(Self {
            store,
            namespace,
            height,
            hash_key,
            root,
            default_nodes,
            _hasher: PhantomData,
        })
    }

    /// The current root.
    pub fn root(&self) -> NodeHash {
        self.root
    }

    /// Overrides the current root, e.g. to read a historical version.
    pub fn set_root(&mut self, root: NodeHash) {
        self.root = root;
    }

    /// The tree height in bits.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Reads the value stored for `key`, or [`DEFAULT_LEAF`] if the key was
    /// never written.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, SmtError> {
        self.get_for_root(key, self.root)
    }

    /// Reads the value stored for `key` under a historical `root`.
    pub fn get_for_root(&self, key: &[u8], root: NodeHash) -> Result<Vec<u8>, SmtError> {
        let path = self.path_of(key)?;
        let mut current = root;
        for depth in 0..self.height - 1 {
            // An all-default branch can only hold the default leaf.
            if current == self.default_nodes[depth] {
                return Ok(DEFAULT_LEAF.to_vec());
            }
            let children = self.read_node(&current)?;
            current = pick_child(&children, &path, depth, self.height)?;
        }
        if current == self.default_nodes[self.height - 1] {
            return Ok(DEFAULT_LEAF.to_vec());
        }
        self.read_leaf(&current)
    }

    /// Writes `value` at `key`, persists every new node atomically, and
    /// returns the new root.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<NodeHash, SmtError> {
        let mut batch = WriteBatch::default();
        let new_root = self.update_in_batch(&mut batch, key, value)?;
        self.store.write(batch)?;
        Ok(new_root)
    }

    /// Stages the update into `batch` instead of committing it.
    ///
    /// Reads go through the staged batch, so several updates can share one
    /// atomic write. The in-memory root advances immediately; the caller
    /// must commit the batch (dropping it leaves the tree pointing at
    /// uncommitted state).
    pub fn update_in_batch(
        &mut self,
        batch: &mut WriteBatch,
        key: &[u8],
        value: &[u8],
    ) -> Result<NodeHash, SmtError> {
        let path = self.path_of(key)?;
        let side_nodes = self.side_nodes_for_root(&path, self.root, Some(batch))?;

        let new_root = self.stage_path(batch, &path, value, &side_nodes);
        batch.put(self.namespace, ROOT_KEY, &new_root);
        self.root = new_root;
        Ok(new_root)
    }

    /// Folds a leaf value up against per-depth side nodes, staging the leaf
    /// and every rebuilt interior node; returns the resulting root.
    fn stage_path(
        &self,
        batch: &mut WriteBatch,
        path: &[u8; PATH_BYTES],
        value: &[u8],
        side_nodes: &[NodeHash],
    ) -> NodeHash {
        let mut current_hash = H::digest(value);
        batch.put(self.namespace, &current_hash, value);

        for depth in (0..self.height - 1).rev() {
            let sibling = side_nodes[depth];
            let mut concat = Vec::with_capacity(64);
            if is_left(path, depth, self.height) {
                concat.extend_from_slice(&current_hash);
                concat.extend_from_slice(&sibling);
            } else {
                concat.extend_from_slice(&sibling);
                concat.extend_from_slice(&current_hash);
            }
            current_hash = H::digest(&concat);
            batch.put(self.namespace, &current_hash, &concat);
        }
        current_hash
    }

    /// Grafts a proven branch into the tree: rebuilds and persists every
    /// node on `key`'s path from the proof's siblings plus the leaf value.
    ///
    /// This is how a deep subtree is grown over an empty store to work on
    /// just a few leaves of a much larger tree. The proof must have been
    /// verified against the root of the full tree first. With
    /// `update_root` set the tree adopts the branch's root as current.
    pub fn add_branch(
        &mut self,
        proof: &[NodeHash],
        key: &[u8],
        value: &[u8],
        update_root: bool,
    ) -> Result<NodeHash, SmtError> {
        if proof.len() != self.height - 1 {
            return Err(SmtError::BadProof);
        }
        let path = self.path_of(key)?;
        let mut side_nodes = proof.to_vec();
        side_nodes.reverse();

        let mut batch = WriteBatch::default();
        let new_root = self.stage_path(&mut batch, &path, value, &side_nodes);
        self.store.write(batch)?;
        if update_root {
            self.root = new_root;
        }
        Ok(new_root)
    }

    /// Produces the Merkle proof for `key` against the current root:
    /// `height - 1` sibling hashes, leaf-adjacent sibling first. This is
    /// the order the on-chain verifier consumes.
    pub fn prove(&self, key: &[u8]) -> Result<MerkleProof, SmtError> {
        self.prove_for_root(key, self.root)
    }

    /// Produces the Merkle proof for `key` against a historical `root`.
    pub fn prove_for_root(&self, key: &[u8], root: NodeHash) -> Result<MerkleProof, SmtError> {
        let path = self.path_of(key)?;
        let mut side_nodes = self.side_nodes_for_root(&path, root, None)?;
        side_nodes.reverse();
        Ok(side_nodes)
    }

    /// Checks `proof` against `root` for `(key, value)`. Malformed proofs
    /// return `false`, never an error.
    pub fn verify_proof(
        &self,
        proof: &[NodeHash],
        root: NodeHash,
        key: &[u8],
        value: &[u8],
    ) -> bool {
        let Ok(path) = self.path_of(key) else {
            return false;
        };
        if proof.len() != self.height - 1 {
            return false;
        }

        let mut current = H::digest(value);
        for depth in (0..self.height - 1).rev() {
            let sibling = proof[self.height - 2 - depth];
            let mut concat = Vec::with_capacity(64);
            if is_left(&path, depth, self.height) {
                concat.extend_from_slice(&current);
                concat.extend_from_slice(&sibling);
            } else {
                concat.extend_from_slice(&sibling);
                concat.extend_from_slice(&current);
            }
            current = H::digest(&concat);
        }
        current == root
    }

    /// Replaces default siblings in `proof` with bits in a leading 32-byte
    /// bitmap; bit `i` set means sibling `i` was the default node of its
    /// level.
    pub fn compact_proof(&self, proof: &[NodeHash]) -> Result<Vec<Vec<u8>>, SmtError> {
        if proof.len() != self.height - 1 {
            return Err(SmtError::BadProof);
        }
        let mut bitmap = [0u8; PATH_BYTES];
        let mut compacted: Vec<Vec<u8>> = Vec::new();
        for (i, sibling) in proof.iter().enumerate() {
            // proof[i] sits at level height - 1 - i.
            if *sibling == self.default_nodes[self.height - 1 - i] {
                bitmap[i / 8] |= 1 << (i % 8);
            } else {
                compacted.push(sibling.to_vec());
            }
        }
        let mut result = Vec::with_capacity(compacted.len() + 1);
        result.push(bitmap.to_vec());
        result.extend(compacted);
        Ok(result)
    }

    /// Inverts [`Self::compact_proof`].
    pub fn decompact_proof(&self, proof: &[Vec<u8>]) -> Result<MerkleProof, SmtError> {
        let Some((bitmap, rest)) = proof.split_first() else {
            return Err(SmtError::BadProof);
        };
        if bitmap.len() != PATH_BYTES {
            return Err(SmtError::BadProof);
        }
        let defaults_omitted = bitmap.iter().map(|b| b.count_ones() as usize).sum::<usize>();
        if rest.len() != (self.height - 1).checked_sub(defaults_omitted).ok_or(SmtError::BadProof)? {
            return Err(SmtError::BadProof);
        }

        let mut decompacted = Vec::with_capacity(self.height - 1);
        let mut position = 0;
        for i in 0..self.height - 1 {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                decompacted.push(self.default_nodes[self.height - 1 - i]);
            } else {
                decompacted.push(as_node_hash(&rest[position])?);
                position += 1;
            }
        }
        Ok(decompacted)
    }

    /// Checks a compacted proof; see [`Self::verify_proof`].
    pub fn verify_compact_proof(
        &self,
        proof: &[Vec<u8>],
        root: NodeHash,
        key: &[u8],
        value: &[u8],
    ) -> bool {
        match self.decompact_proof(proof) {
            Ok(decompacted) => self.verify_proof(&decompacted, root, key, value),
            Err(_) => false,
        }
    }

    /// The default (all-empty) root for this tree's parameters.
    pub fn default_root(&self) -> NodeHash {
        self.default_nodes[0]
    }

    fn path_of(&self, key: &[u8]) -> Result<[u8; PATH_BYTES], SmtError> {
        if self.hash_key {
            return Ok(H::digest(key));
        }
        if key.len() > PATH_BYTES {
            return Err(SmtError::KeyTooLong {
                got: key.len(),
                max: PATH_BYTES,
            });
        }
        let mut padded = [0u8; PATH_BYTES];
        padded[PATH_BYTES - key.len()..].copy_from_slice(key);
        Ok(padded)
    }

    /// Collects the sibling of every step of the walk from `root` towards
    /// the leaf selected by `path`; index = depth below the root.
    fn side_nodes_for_root(
        &self,
        path: &[u8; PATH_BYTES],
        root: NodeHash,
        batch: Option<&WriteBatch>,
    ) -> Result<Vec<NodeHash>, SmtError> {
        let mut side_nodes = Vec::with_capacity(self.height - 1);
        let mut current = self.read_children(&root, batch)?;
        for depth in 0..self.height - 1 {
            let (left, right) = split_children(&current)?;
            let (next, sibling) = if is_left(path, depth, self.height) {
                (left, right)
            } else {
                (right, left)
            };
            side_nodes.push(sibling);
            if depth < self.height - 2 {
                current = self.read_children(&next, batch)?;
            }
        }
        Ok(side_nodes)
    }

    fn read_children(
        &self,
        node: &NodeHash,
        batch: Option<&WriteBatch>,
    ) -> Result<Vec<u8>, SmtError> {
        let value = match batch {
            Some(batch) => batch.read_through(&self.store).get(self.namespace, node),
            None => self.store.get(self.namespace, node),
        }?;
        value.ok_or_else(|| SmtError::CorruptStore(hex::encode(node)))
    }

    fn read_node(&self, node: &NodeHash) -> Result<Vec<u8>, SmtError> {
        self.store
            .get(self.namespace, node)?
            .ok_or_else(|| SmtError::CorruptStore(hex::encode(node)))
    }

    fn read_leaf(&self, value_hash: &NodeHash) -> Result<Vec<u8>, SmtError> {
        self.store
            .get(self.namespace, value_hash)?
            .ok_or_else(|| SmtError::CorruptStore(hex::encode(value_hash)))
    }
}

fn build_default_nodes<H: TreeHasher>(height: usize) -> Vec<NodeHash> {
    let mut nodes = vec![[0u8; 32]; height];
    nodes[height - 1] = H::digest(&DEFAULT_LEAF);
    for j in (0..height.saturating_sub(1)).rev() {
        let mut concat = Vec::with_capacity(64);
        concat.extend_from_slice(&nodes[j + 1]);
        concat.extend_from_slice(&nodes[j + 1]);
        nodes[j] = H::digest(&concat);
    }
    nodes
}

/// The branch bit at `depth` below the root: bit `height - 2 - depth` of the
/// path taken as a big-endian integer; zero selects the left child.
fn is_left(path: &[u8; PATH_BYTES], depth: usize, height: usize) -> bool {
    let bit_index = height - 2 - depth;
    let byte = path[PATH_BYTES - 1 - bit_index / 8];
    (byte >> (bit_index % 8)) & 1 == 0
}

fn split_children(value: &[u8]) -> Result<(NodeHash, NodeHash), SmtError> {
    if value.len() != 64 {
        return Err(SmtError::MalformedNode(value.len()));
    }
    let mut left = [0u8; 32];
    let mut right = [0u8; 32];
    left.copy_from_slice(&value[..32]);
    right.copy_from_slice(&value[32..]);
    Ok((left, right))
}

fn pick_child(value: &[u8], path: &[u8; PATH_BYTES], depth: usize, height: usize) -> Result<NodeHash, SmtError> {
    let (left, right) = split_children(value)?;
    Ok(if is_left(path, depth, height) { left } else { right })
}

fn as_node_hash(bytes: &[u8]) -> Result<NodeHash, SmtError> {
    if bytes.len() != 32 {
        return Err(SmtError::MalformedNode(bytes.len()));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(bytes);
    Ok(hash)
}
