use ethers_core::types::{Address, H256, U256};
use rollup_abi::{decode_account_info, encode_account_info};
use rollup_db::namespaces::{ACCOUNT_TO_SLOT, LAST_SLOT, SLOT_TO_ACCOUNT_INFO};
use rollup_db::{KeyValueStore, Namespace, WriteBatch};
use rollup_interface::{AccountInfo, StateSnapshot, Transaction};
use rollup_smt::{Keccak256Hasher, SparseMerkleTree, DEFAULT_LEAF};

use crate::keys::{u256_from_bytes, u256_key, u256_value};
use crate::{StateError, TokenRegistry};

/// Height of the account state tree: one leaf per 160-bit address space
/// slot, paths derived from dense slot indices without hashing.
pub const STATE_TREE_HEIGHT: usize = 160;

/// One account touched by a transaction: its slot, its post-update record,
/// whether the slot was created by this transaction, and an inclusion proof
/// of the record against the post-state root.
#[derive(Debug, Clone)]
pub struct StateUpdateEntry {
    /// Slot of the touched account.
    pub slot_index: U256,
    /// The account record after the update.
    pub account_info: AccountInfo,
    /// True if this transaction created the slot.
    pub new_account: bool,
    /// Merkle proof of the record under [`StateUpdate::state_root`],
    /// leaf-adjacent sibling first.
    pub inclusion_proof: Vec<H256>,
}

/// The witness a successful [`StateMachine::apply_transaction`] emits: the
/// post-state root and one entry per touched account, sender first for
/// transfers.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    /// Root of the state tree after the transaction.
    pub state_root: H256,
    /// Touched accounts in operation order.
    pub entries: Vec<StateUpdateEntry>,
}

/// Applies transactions against the slot registry and the authenticated
/// state tree.
///
/// Every application commits exactly one batch: the updated account
/// records, the registry writes when a slot is created, and all new tree
/// nodes. A failed validation commits nothing.
pub struct StateMachine<S> {
    store: S,
    tree: SparseMerkleTree<Keccak256Hasher, S>,
    tokens: TokenRegistry<S>,
}

impl<S: KeyValueStore + Clone> StateMachine<S> {
    /// Opens the state machine over `store`, rooting its tree in
    /// `tree_namespace`. Reopening resumes from the persisted root.
    pub fn new(store: S, tree_namespace: Namespace) -> Result<Self, StateError> {
        let tree = SparseMerkleTree::new(
            store.clone(),
            tree_namespace,
            STATE_TREE_HEIGHT,
            false,
            None,
        )?;
        Ok(Self {
            tokens: TokenRegistry::new(store.clone()),
            store,
            tree,
        })
    }

    /// The token registry this machine resolves against.
    pub fn tokens(&self) -> &TokenRegistry<S> {
        &self.tokens
    }

    /// The current state root.
    pub fn state_root(&self) -> H256 {
        H256::from(self.tree.root())
    }

    /// The slot assigned to `account`, if it exists.
    pub fn slot_of(&self, account: Address) -> Result<Option<U256>, StateError> {
        Ok(self
            .store
            .get(ACCOUNT_TO_SLOT, account.as_bytes())?
            .map(|bytes| u256_from_bytes(&bytes)))
    }

    /// The account record stored at `slot_index`, if the slot is live.
    pub fn account_info_at(&self, slot_index: U256) -> Result<Option<AccountInfo>, StateError> {
        match self
            .store
            .get(SLOT_TO_ACCOUNT_INFO, &u256_key(slot_index))?
        {
            Some(bytes) => Ok(Some(decode_account_info(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Applies one transaction, committing all effects atomically, and
    /// returns the post-state witness.
    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<StateUpdate, StateError> {
        tracing::debug!(kind = %tx.kind(), "Applying transaction");
        let staged = match tx {
            Transaction::Deposit {
                account,
                token,
                amount,
                ..
            } => self.apply_deposit(*account, *token, *amount)?,
            Transaction::Withdraw {
                account,
                token,
                amount,
                nonce,
                ..
            } => self.apply_withdraw(*account, *token, *amount, *nonce)?,
            Transaction::Transfer {
                sender,
                recipient,
                token,
                amount,
                nonce,
                ..
            } => self.apply_transfer(*sender, *recipient, *token, *amount, *nonce)?,
        };

        let (batch, touched) = staged;
        self.store.write(batch)?;

        let state_root = self.state_root();
        let mut entries = Vec::with_capacity(touched.len());
        for (slot_index, account_info, new_account) in touched {
            let proof = self.tree.prove(&u256_key(slot_index))?;
            entries.push(StateUpdateEntry {
                slot_index,
                account_info,
                new_account,
                inclusion_proof: proof.into_iter().map(H256::from).collect(),
            });
        }
        tracing::debug!(root = %hex::encode(state_root), "Transaction applied");
        Ok(StateUpdate {
            state_root,
            entries,
        })
    }

    /// A pre-state witness of one slot: its record and an inclusion proof
    /// against the current root.
    pub fn state_snapshot(&self, slot_index: U256) -> Result<StateSnapshot, StateError> {
        let key = u256_key(slot_index);
        let leaf = self.tree.get(&key)?;
        let account_info = decode_account_info(&leaf)?;
        let proof = self.tree.prove(&key)?;
        Ok(StateSnapshot {
            slot_index,
            account_info,
            inclusion_proof: proof.into_iter().map(H256::from).collect(),
        })
    }

    fn apply_deposit(
        &mut self,
        account: Address,
        token: Address,
        amount: U256,
    ) -> Result<Staged, StateError> {
        let token_index = self.resolve_token(token)?;
        let idx = dense(token_index);

        let mut batch = WriteBatch::default();
        let (slot_index, mut info, new_account) = match self.slot_of(account)? {
            Some(slot_index) => {
                let info = self.load_account(slot_index, account)?;
                (slot_index, info, false)
            }
            None => {
                let slot_index = self.next_slot()?;
                batch.put(ACCOUNT_TO_SLOT, account.as_bytes(), &u256_value(slot_index));
                batch.put(LAST_SLOT, b"", &u256_value(slot_index));
                (slot_index, AccountInfo::empty(account, idx), true)
            }
        };

        info.ensure_token_index(idx);
        info.balances[idx] = info.balances[idx]
            .checked_add(amount)
            .ok_or(StateError::InvalidAmount)?;

        self.stage_account(&mut batch, slot_index, &info)?;
        tracing::debug!(
            account = ?account,
            slot = %slot_index,
            token_index = %token_index,
            amount = %amount,
            new_account,
            "Deposit staged"
        );
        Ok((batch, vec![(slot_index, info, new_account)]))
    }

    fn apply_withdraw(
        &mut self,
        account: Address,
        token: Address,
        amount: U256,
        nonce: U256,
    ) -> Result<Staged, StateError> {
        let token_index = self.resolve_token(token)?;
        let idx = dense(token_index);

        let slot_index = self
            .slot_of(account)?
            .ok_or(StateError::AccountNotFound(account))?;
        let mut info = self.load_account(slot_index, account)?;
        info.ensure_token_index(idx);

        let balance = info.balances[idx];
        if balance < amount {
            return Err(StateError::InsufficientBalance { balance, amount });
        }
        let required = info.withdraw_nonces[idx];
        if required != nonce {
            return Err(StateError::InvalidNonce {
                required,
                got: nonce,
            });
        }

        info.balances[idx] = balance - amount;
        info.withdraw_nonces[idx] = required + U256::one();

        let mut batch = WriteBatch::default();
        self.stage_account(&mut batch, slot_index, &info)?;
        tracing::debug!(
            account = ?account,
            slot = %slot_index,
            token_index = %token_index,
            amount = %amount,
            nonce = %nonce,
            "Withdraw staged"
        );
        Ok((batch, vec![(slot_index, info, false)]))
    }

    fn apply_transfer(
        &mut self,
        sender: Address,
        recipient: Address,
        token: Address,
        amount: U256,
        nonce: U256,
    ) -> Result<Staged, StateError> {
        if sender == recipient {
            return Err(StateError::SelfTransfer);
        }
        let token_index = self.resolve_token(token)?;
        let idx = dense(token_index);

        let sender_slot = self
            .slot_of(sender)?
            .ok_or(StateError::AccountNotFound(sender))?;
        let mut sender_info = self.load_account(sender_slot, sender)?;
        sender_info.ensure_token_index(idx);

        let balance = sender_info.balances[idx];
        if balance < amount {
            return Err(StateError::InsufficientBalance { balance, amount });
        }
        let required = sender_info.transfer_nonces[idx];
        if required != nonce {
            return Err(StateError::InvalidNonce {
                required,
                got: nonce,
            });
        }

        let mut batch = WriteBatch::default();
        let (recipient_slot, mut recipient_info, new_account) = match self.slot_of(recipient)? {
            Some(slot) => (slot, self.load_account(slot, recipient)?, false),
            None => {
                let slot = self.next_slot()?;
                batch.put(ACCOUNT_TO_SLOT, recipient.as_bytes(), &u256_value(slot));
                batch.put(LAST_SLOT, b"", &u256_value(slot));
                (slot, AccountInfo::empty(recipient, idx), true)
            }
        };
        recipient_info.ensure_token_index(idx);
        let credited = recipient_info.balances[idx]
            .checked_add(amount)
            .ok_or(StateError::InvalidAmount)?;

        sender_info.balances[idx] = balance - amount;
        sender_info.transfer_nonces[idx] = required + U256::one();
        recipient_info.balances[idx] = credited;

        self.stage_account(&mut batch, sender_slot, &sender_info)?;
        self.stage_account(&mut batch, recipient_slot, &recipient_info)?;
        tracing::debug!(
            sender = ?sender,
            recipient = ?recipient,
            sender_slot = %sender_slot,
            recipient_slot = %recipient_slot,
            token_index = %token_index,
            amount = %amount,
            nonce = %nonce,
            recipient_created = new_account,
            "Transfer staged"
        );
        Ok((
            batch,
            vec![
                (sender_slot, sender_info, false),
                (recipient_slot, recipient_info, new_account),
            ],
        ))
    }

    fn resolve_token(&self, token: Address) -> Result<U256, StateError> {
        self.tokens
            .token_index(token)?
            .ok_or(StateError::UnknownToken(token))
    }

    fn next_slot(&self) -> Result<U256, StateError> {
        Ok(match self.store.get(LAST_SLOT, b"")? {
            Some(bytes) => u256_from_bytes(&bytes) + U256::one(),
            None => U256::zero(),
        })
    }

    fn load_account(&self, slot_index: U256, account: Address) -> Result<AccountInfo, StateError> {
        let bytes = self
            .store
            .get(SLOT_TO_ACCOUNT_INFO, &u256_key(slot_index))?
            .ok_or(StateError::AccountNotFound(account))?;
        Ok(decode_account_info(&bytes)?)
    }

    fn stage_account(
        &mut self,
        batch: &mut WriteBatch,
        slot_index: U256,
        info: &AccountInfo,
    ) -> Result<(), StateError> {
        let encoded = encode_account_info(info);
        let key = u256_key(slot_index);
        batch.put(SLOT_TO_ACCOUNT_INFO, &key, &encoded);
        self.tree.update_in_batch(batch, &key, &encoded)?;
        Ok(())
    }

    /// Verifies a slot inclusion proof against a root of this machine's
    /// tree.
    pub fn verify_slot_proof(
        &self,
        proof: &[H256],
        root: H256,
        slot_index: U256,
        info: &AccountInfo,
    ) -> bool {
        let siblings: Vec<[u8; 32]> = proof.iter().map(|h| h.0).collect();
        let encoded = encode_account_info(info);
        self.tree
            .verify_proof(&siblings, root.0, &u256_key(slot_index), &encoded)
    }

    /// True if `slot_index` holds no record yet.
    pub fn slot_is_empty(&self, slot_index: U256) -> Result<bool, StateError> {
        Ok(self.tree.get(&u256_key(slot_index))? == DEFAULT_LEAF.to_vec())
    }
}

type Staged = (WriteBatch, Vec<(U256, AccountInfo, bool)>);

fn dense(token_index: U256) -> usize {
    token_index.low_u64() as usize
}
