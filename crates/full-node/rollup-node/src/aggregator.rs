//! The single consumer of the ingestor's queue: applies transactions,
//! assembles pending blocks, and hands full blocks to the submitter.

use std::sync::Arc;

use ethers_core::types::{H256, U256};
use rollup_interface::services::{CommitteeService, SettlementService};
use rollup_interface::{RollupBlock, Transaction, Transition};
use rollup_state::{StateError, StateMachine, StateUpdate};
use tokio::sync::mpsc;

use crate::submitter::BlockSubmitter;
use crate::SharedStore;

/// Drives the state machine and block assembly in aggregator mode.
pub struct Aggregator<S, C> {
    state_machine: StateMachine<SharedStore>,
    transactions: mpsc::Receiver<Transaction>,
    submitter: Arc<BlockSubmitter<S, C>>,
    pending_block: RollupBlock,
    num_transitions_in_block: usize,
    fraud_transfer: bool,
}

impl<S: SettlementService, C: CommitteeService> Aggregator<S, C> {
    /// Creates the aggregator; the pending block starts at block 0.
    pub fn new(
        state_machine: StateMachine<SharedStore>,
        transactions: mpsc::Receiver<Transaction>,
        submitter: Arc<BlockSubmitter<S, C>>,
        num_transitions_in_block: usize,
        fraud_transfer: bool,
    ) -> Self {
        Self {
            state_machine,
            transactions,
            submitter,
            pending_block: RollupBlock::new(0),
            num_transitions_in_block,
            fraud_transfer,
        }
    }

    /// Consumes the queue until it closes. Transaction rejections are
    /// logged and skipped; store or tree failures abort the node.
    pub async fn run(mut self) -> anyhow::Result<()> {
        while let Some(tx) = self.transactions.recv().await {
            match self.process_transaction(&tx).await {
                Ok(()) => {}
                Err(error) if error.is_transaction_rejection() => {
                    tracing::warn!(kind = %tx.kind(), %error, "Rejected transaction");
                }
                Err(error) => {
                    tracing::error!(%error, "Fatal state machine failure");
                    return Err(error.into());
                }
            }
        }
        tracing::info!("Transaction queue closed, aggregator stopping");
        Ok(())
    }

    async fn process_transaction(&mut self, tx: &Transaction) -> Result<(), StateError> {
        let update = self.state_machine.apply_transaction(tx)?;
        let token_index = self
            .state_machine
            .tokens()
            .token_index(tx.token())?
            .ok_or(StateError::UnknownToken(tx.token()))?;

        let transition = build_transition(tx, &update, token_index, self.fraud_transfer);
        tracing::info!(
            block_number = self.pending_block.block_number,
            transition_index = self.pending_block.len(),
            kind = %transition.kind(),
            root = %hex::encode(transition.state_root()),
            "Adding transition to pending block"
        );
        self.pending_block.transitions.push(transition);

        if self.pending_block.len() >= self.num_transitions_in_block {
            let next_number = self.pending_block.block_number + 1;
            let block = std::mem::replace(&mut self.pending_block, RollupBlock::new(next_number));
            // Propose failures are surfaced to the operator but do not stop
            // the aggregator; the pending block advances regardless.
            if let Err(error) = self.submitter.propose(&block).await {
                tracing::error!(
                    block_number = block.block_number,
                    %error,
                    "Block proposal failed"
                );
            }
        }
        Ok(())
    }

    /// The block currently being filled.
    pub fn pending_block(&self) -> &RollupBlock {
        &self.pending_block
    }
}

/// Maps a successful state update onto the transition variant the block
/// carries; the new-account flag selects the `CreateAnd…` forms.
///
/// With `fraud_transfer` set, emitted transfer transitions claim a zeroed
/// post-state root, a test-only switch to exercise the validator.
pub fn build_transition(
    tx: &Transaction,
    update: &StateUpdate,
    token_index: U256,
    fraud_transfer: bool,
) -> Transition {
    match tx {
        Transaction::Deposit {
            amount, signature, ..
        } => {
            let entry = &update.entries[0];
            if entry.new_account {
                Transition::CreateAndDeposit {
                    state_root: update.state_root,
                    slot_index: entry.slot_index,
                    account: entry.account_info.account,
                    token_index,
                    amount: *amount,
                    signature: signature.clone(),
                }
            } else {
                Transition::Deposit {
                    state_root: update.state_root,
                    slot_index: entry.slot_index,
                    token_index,
                    amount: *amount,
                    signature: signature.clone(),
                }
            }
        }
        Transaction::Withdraw {
            amount,
            nonce,
            signature,
            ..
        } => {
            let entry = &update.entries[0];
            Transition::Withdraw {
                state_root: update.state_root,
                slot_index: entry.slot_index,
                token_index,
                amount: *amount,
                nonce: *nonce,
                signature: signature.clone(),
            }
        }
        Transaction::Transfer {
            amount,
            nonce,
            signature,
            ..
        } => {
            let state_root = if fraud_transfer {
                H256::zero()
            } else {
                update.state_root
            };
            let sender = &update.entries[0];
            let recipient = &update.entries[1];
            if recipient.new_account {
                Transition::CreateAndTransfer {
                    state_root,
                    sender_slot: sender.slot_index,
                    recipient_slot: recipient.slot_index,
                    recipient: recipient.account_info.account,
                    token_index,
                    amount: *amount,
                    nonce: *nonce,
                    signature: signature.clone(),
                }
            } else {
                Transition::Transfer {
                    state_root,
                    sender_slot: sender.slot_index,
                    recipient_slot: recipient.slot_index,
                    token_index,
                    amount: *amount,
                    nonce: *nonce,
                    signature: signature.clone(),
                }
            }
        }
    }
}
