//! Independent re-execution of committed blocks and fraud-proof
//! construction.
//!
//! The validator owns its own state machine over a disjoint tree namespace;
//! it never reads the aggregator's nodes. For every committed transition it
//! first captures the pre-state witnesses of the slots the transition
//! reads, reconstructs the logical transaction, re-executes it, and
//! compares the resulting root against the claim. The first divergence in a
//! block is challenged on-chain and ends processing of that block.

use std::sync::Arc;

use ethers_core::types::{Address, H256, U256};
use futures::StreamExt;
use rollup_abi::decode_transition;
use rollup_interface::events::BlockCommittedEvent;
use rollup_interface::services::SettlementService;
use rollup_interface::{
    FraudProof, IncludedStorageSlot, IncludedTransition, StateSnapshot, StorageSlot, Transaction,
    Transition,
};
use rollup_state::{RollupBlockInfo, StateError, StateMachine};

use crate::archive::BlockArchive;
use crate::SharedStore;

/// Why a committed transition failed local re-execution. Either way it is
/// fraud.
enum Divergence {
    /// Re-execution produced a different post-state root.
    RootMismatch {
        /// Root this validator computed.
        local: H256,
        /// Root the transition claimed.
        claimed: H256,
    },
    /// Re-execution rejected the reconstructed transaction outright.
    Rejected(StateError),
}

fn log_divergence(block_number: u64, transition_index: usize, divergence: &Divergence) {
    match divergence {
        Divergence::RootMismatch { local, claimed } => tracing::warn!(
            block_number,
            transition_index,
            local_root = %hex::encode(local),
            claimed_root = %hex::encode(claimed),
            "Detected invalid transition: post-state root mismatch"
        ),
        Divergence::Rejected(error) => tracing::warn!(
            block_number,
            transition_index,
            %error,
            "Detected invalid transition: re-execution rejected it"
        ),
    }
}

/// Re-executes committed blocks against an independent state machine and
/// submits `proveTransitionInvalid` on divergence.
pub struct Validator<S> {
    settlement: Arc<S>,
    state_machine: StateMachine<SharedStore>,
    archive: BlockArchive,
    /// Settlement-chain identity; compared against the committer to refuse
    /// challenging this node's own blocks.
    mainchain_address: Address,
}

impl<S: SettlementService> Validator<S> {
    /// Creates the validator over its own state machine and block archive.
    pub fn new(
        settlement: Arc<S>,
        state_machine: StateMachine<SharedStore>,
        archive: BlockArchive,
        mainchain_address: Address,
    ) -> Self {
        Self {
            settlement,
            state_machine,
            archive,
            mainchain_address,
        }
    }

    /// Watches `BlockCommitted` events until the subscription ends.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut committed = self.settlement.subscribe_block_committed().await?;
        tracing::info!("Watching committed blocks");
        while let Some(event) = committed.next().await {
            if let Err(error) = self.process_block(event).await {
                tracing::error!(%error, "Block validation failed");
                return Err(error);
            }
        }
        anyhow::bail!("block-committed subscription ended")
    }

    /// Validates one committed block: persist it, re-execute each
    /// transition in order, and challenge the first divergence.
    pub async fn process_block(&mut self, event: BlockCommittedEvent) -> anyhow::Result<()> {
        let block_number = event.block_number;

        // Replays after a restart must neither re-apply state nor re-emit
        // fraud proofs.
        if let Some(last) = self.archive.last_validated()? {
            if block_number <= last {
                tracing::info!(block_number, last_validated = last, "Skipping replayed block");
                return Ok(());
            }
        }

        self.archive.save_block(block_number, &event.transitions)?;
        let transitions = event
            .transitions
            .iter()
            .map(|bytes| decode_transition(bytes))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(
            block_number,
            num_transitions = transitions.len(),
            "Validating block"
        );

        for (index, transition) in transitions.iter().enumerate() {
            let snapshots = self.input_snapshots(transition)?;
            let divergence = self.reexecute(transition, &snapshots)?;
            let Some(divergence) = divergence else {
                continue;
            };

            log_divergence(block_number, index, &divergence);
            self.challenge(&event, index, snapshots).await?;
            break;
        }

        self.archive.set_last_validated(block_number)?;
        Ok(())
    }

    /// Re-executes one transition; `Ok(None)` means it checks out.
    fn reexecute(
        &mut self,
        transition: &Transition,
        snapshots: &[StateSnapshot],
    ) -> anyhow::Result<Option<Divergence>> {
        let tx = self.reconstruct_transaction(transition, snapshots)?;
        match self.state_machine.apply_transaction(&tx) {
            Ok(update) => {
                let claimed = transition.state_root();
                if update.state_root == claimed {
                    Ok(None)
                } else {
                    Ok(Some(Divergence::RootMismatch {
                        local: update.state_root,
                        claimed,
                    }))
                }
            }
            Err(error) if error.is_transaction_rejection() => {
                Ok(Some(Divergence::Rejected(error)))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Pre-state witnesses of every slot the transition reads: none for an
    /// account-creating deposit, the sender only when the transfer creates
    /// its recipient, both ends otherwise.
    fn input_snapshots(&self, transition: &Transition) -> anyhow::Result<Vec<StateSnapshot>> {
        let slots: Vec<U256> = match transition {
            Transition::CreateAndDeposit { .. } => vec![],
            Transition::Deposit { slot_index, .. } | Transition::Withdraw { slot_index, .. } => {
                vec![*slot_index]
            }
            Transition::CreateAndTransfer { sender_slot, .. } => vec![*sender_slot],
            Transition::Transfer {
                sender_slot,
                recipient_slot,
                ..
            } => vec![*sender_slot, *recipient_slot],
        };
        slots
            .into_iter()
            .map(|slot| Ok(self.state_machine.state_snapshot(slot)?))
            .collect()
    }

    /// Rebuilds the logical transaction a transition encodes, resolving
    /// accounts through the pre-state snapshots and tokens through the
    /// registry.
    fn reconstruct_transaction(
        &self,
        transition: &Transition,
        snapshots: &[StateSnapshot],
    ) -> anyhow::Result<Transaction> {
        let tx = match transition {
            Transition::CreateAndDeposit {
                account,
                token_index,
                amount,
                signature,
                ..
            } => Transaction::Deposit {
                account: *account,
                token: self.resolve_token(*token_index)?,
                amount: *amount,
                signature: signature.clone(),
            },
            Transition::Deposit {
                token_index,
                amount,
                signature,
                ..
            } => Transaction::Deposit {
                account: snapshot_account(snapshots, 0)?,
                token: self.resolve_token(*token_index)?,
                amount: *amount,
                signature: signature.clone(),
            },
            Transition::Withdraw {
                token_index,
                amount,
                nonce,
                signature,
                ..
            } => Transaction::Withdraw {
                account: snapshot_account(snapshots, 0)?,
                token: self.resolve_token(*token_index)?,
                amount: *amount,
                nonce: *nonce,
                signature: signature.clone(),
            },
            Transition::CreateAndTransfer {
                recipient,
                token_index,
                amount,
                nonce,
                signature,
                ..
            } => Transaction::Transfer {
                sender: snapshot_account(snapshots, 0)?,
                recipient: *recipient,
                token: self.resolve_token(*token_index)?,
                amount: *amount,
                nonce: *nonce,
                signature: signature.clone(),
            },
            Transition::Transfer {
                token_index,
                amount,
                nonce,
                signature,
                ..
            } => Transaction::Transfer {
                sender: snapshot_account(snapshots, 0)?,
                recipient: snapshot_account(snapshots, 1)?,
                token: self.resolve_token(*token_index)?,
                amount: *amount,
                nonce: *nonce,
                signature: signature.clone(),
            },
        };
        Ok(tx)
    }

    fn resolve_token(&self, token_index: U256) -> anyhow::Result<Address> {
        self.state_machine
            .tokens()
            .token_address(token_index)?
            .ok_or_else(|| anyhow::anyhow!("no token registered at index {token_index}"))
    }

    /// Builds and submits the contract-ready fraud proof for transition
    /// `index` of the committed block in `event`.
    async fn challenge(
        &self,
        event: &BlockCommittedEvent,
        index: usize,
        snapshots: Vec<StateSnapshot>,
    ) -> anyhow::Result<()> {
        let block_number = event.block_number;
        let info = RollupBlockInfo::from_encoded(block_number, event.transitions.clone())?;
        let invalid_transition = info
            .included_transition(index)?
            .ok_or_else(|| anyhow::anyhow!("transition {index} vanished from block"))?;

        let pre_state_transition = match self.pre_state_transition(&info, block_number, index)? {
            Some(included) => included,
            None => {
                tracing::error!(
                    block_number,
                    transition_index = index,
                    "No pre-state transition available, cannot challenge"
                );
                return Ok(());
            }
        };

        let storage_slots = snapshots
            .into_iter()
            .map(|snapshot| IncludedStorageSlot {
                storage_slot: StorageSlot {
                    slot_index: snapshot.slot_index,
                    account_info: snapshot.account_info,
                },
                siblings: snapshot.inclusion_proof,
            })
            .collect();

        let proof = FraudProof {
            pre_state_transition,
            invalid_transition,
            storage_slots,
        };

        let committer = self.settlement.committer_address().await?;
        if committer == self.mainchain_address {
            tracing::warn!(
                block_number,
                transition_index = index,
                "Validator is the committer; refusing to challenge own block"
            );
            return Ok(());
        }

        let outcome = self.settlement.prove_transition_invalid(proof).await?;
        if outcome.is_success() {
            tracing::info!(
                block_number,
                transition_index = index,
                tx_hash = ?outcome.tx_hash,
                "Fraud proof accepted"
            );
        } else {
            tracing::error!(
                block_number,
                transition_index = index,
                tx_hash = ?outcome.tx_hash,
                "Fraud proof rejected on-chain"
            );
        }
        Ok(())
    }

    /// The included transition fixing the pre-state root: `index - 1` of
    /// the same block, or the last transition of the previous block for the
    /// block's first transition. `None` when no transition precedes this
    /// one at all, e.g. right after an empty genesis block.
    fn pre_state_transition(
        &self,
        info: &RollupBlockInfo,
        block_number: u64,
        index: usize,
    ) -> anyhow::Result<Option<IncludedTransition>> {
        if index > 0 {
            return Ok(info.included_transition(index - 1)?);
        }
        if block_number == 0 {
            return Ok(None);
        }
        let Some(previous) = self.archive.load_block(block_number - 1)? else {
            anyhow::bail!("previous block {} missing from archive", block_number - 1);
        };
        if previous.transitions.is_empty() {
            return Ok(None);
        }
        let previous_info =
            RollupBlockInfo::from_encoded(previous.block_number, previous.transitions)?;
        let last = previous_info.num_transitions() - 1;
        Ok(previous_info.included_transition(last)?)
    }
}

fn snapshot_account(snapshots: &[StateSnapshot], index: usize) -> anyhow::Result<Address> {
    snapshots
        .get(index)
        .map(|snapshot| snapshot.account_info.account)
        .ok_or_else(|| anyhow::anyhow!("missing input snapshot {index}"))
}
