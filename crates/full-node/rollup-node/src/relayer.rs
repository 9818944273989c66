//! Mainchain withdrawal submission.
//!
//! After a Withdraw transition is committed, the user (or a relayer acting
//! for them) presents it to the `DepositWithdrawManager` with an inclusion
//! witness to release the funds on the settlement chain. Given only the
//! account and token, the relayer locates the latest committed withdrawal
//! itself by scanning the block archive from newest to oldest. The gRPC
//! surface that fronts this in production is out of scope; these are the
//! library entry points it would call.

use std::sync::Arc;

use ethers_core::types::{Address, H256};
use rollup_abi::decode_transition;
use rollup_interface::services::{ChainError, SettlementService};
use rollup_interface::{Transition, TransitionKind};
use rollup_state::{RollupBlockInfo, StateError, StateMachine};

use crate::archive::{ArchiveError, BlockArchive};
use crate::SharedStore;

/// Errors assembling or submitting a withdrawal.
#[derive(Debug, thiserror::Error)]
pub enum RelayerError {
    /// The token was never registered.
    #[error("unknown token {0:?}")]
    UnknownToken(Address),
    /// No committed block holds a withdrawal for this account and token.
    #[error("no committed withdraw for {account:?} and token {token:?}")]
    NoWithdrawFound {
        /// Account scanned for.
        account: Address,
        /// Token scanned for.
        token: Address,
    },
    /// The referenced block is not in the archive.
    #[error("block {0} not found")]
    BlockNotFound(u64),
    /// The referenced transition index does not exist in the block.
    #[error("no transition {transition_index} in block {block_number}")]
    TransitionNotFound {
        /// Referenced block.
        block_number: u64,
        /// Referenced index.
        transition_index: usize,
    },
    /// The referenced transition is not a withdrawal.
    #[error("transition {transition_index} in block {block_number} is a {kind}, not a withdraw")]
    NotAWithdraw {
        /// Referenced block.
        block_number: u64,
        /// Referenced index.
        transition_index: usize,
        /// What the transition actually is.
        kind: TransitionKind,
    },
    /// The manager contract rejected the withdrawal.
    #[error("withdraw transaction {tx_hash:?} failed")]
    WithdrawFailed {
        /// The failed transaction.
        tx_hash: H256,
    },
    /// Archive access failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    /// Registry or slot lookup failed.
    #[error(transparent)]
    State(#[from] StateError),
    /// Tree construction failed.
    #[error(transparent)]
    Tree(#[from] rollup_smt::SmtError),
    /// Decoding a stored transition failed.
    #[error(transparent)]
    Codec(#[from] rollup_abi::CodecError),
    /// The chain call failed.
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Assembles inclusion witnesses for committed withdrawals and submits them
/// to the settlement chain.
pub struct WithdrawRelayer<S> {
    settlement: Arc<S>,
    archive: BlockArchive,
    /// Read-only view of the validating state: resolves the token's dense
    /// index and the account's slot, which is what withdraw transitions
    /// are keyed by.
    state: StateMachine<SharedStore>,
}

impl<S: SettlementService> WithdrawRelayer<S> {
    /// Creates the relayer over the archive that holds committed blocks
    /// and the state it was built against.
    pub fn new(settlement: Arc<S>, archive: BlockArchive, state: StateMachine<SharedStore>) -> Self {
        Self {
            settlement,
            archive,
            state,
        }
    }

    /// Locates the account's most recent committed withdrawal of `token`:
    /// walks the archive from the newest block to the oldest, and within a
    /// block from the last transition backwards.
    pub fn find_latest_withdraw(
        &self,
        account: Address,
        token: Address,
    ) -> Result<(u64, usize), RelayerError> {
        let token_index = self
            .state
            .tokens()
            .token_index(token)
            .map_err(StateError::from)?
            .ok_or(RelayerError::UnknownToken(token))?;
        let Some(slot_index) = self.state.slot_of(account)? else {
            return Err(RelayerError::NoWithdrawFound { account, token });
        };

        for block in self.archive.blocks_newest_first()? {
            for (index, encoded) in block.transitions.iter().enumerate().rev() {
                let transition = decode_transition(encoded)?;
                if let Transition::Withdraw {
                    slot_index: withdraw_slot,
                    token_index: withdraw_token,
                    ..
                } = transition
                {
                    if withdraw_slot == slot_index && withdraw_token == token_index {
                        return Ok((block.block_number, index));
                    }
                }
            }
        }
        Err(RelayerError::NoWithdrawFound { account, token })
    }

    /// Submits the account's latest committed withdrawal of `token`. The
    /// signature is the user's packed authorization, passed through to the
    /// contract.
    pub async fn withdraw(
        &self,
        account: Address,
        token: Address,
        signature: Vec<u8>,
    ) -> Result<H256, RelayerError> {
        let (block_number, transition_index) = self.find_latest_withdraw(account, token)?;
        self.withdraw_at(account, block_number, transition_index, signature)
            .await
    }

    /// Submits the withdrawal recorded at an explicit `(block_number,
    /// transition_index)`, for callers that already hold a position.
    pub async fn withdraw_at(
        &self,
        account: Address,
        block_number: u64,
        transition_index: usize,
        signature: Vec<u8>,
    ) -> Result<H256, RelayerError> {
        let stored = self
            .archive
            .load_block(block_number)?
            .ok_or(RelayerError::BlockNotFound(block_number))?;

        let encoded = stored.transitions.get(transition_index).ok_or(
            RelayerError::TransitionNotFound {
                block_number,
                transition_index,
            },
        )?;
        let transition = decode_transition(encoded)?;
        if !matches!(transition, Transition::Withdraw { .. }) {
            return Err(RelayerError::NotAWithdraw {
                block_number,
                transition_index,
                kind: transition.kind(),
            });
        }

        let info = RollupBlockInfo::from_encoded(block_number, stored.transitions)?;
        let included = info
            .included_transition(transition_index)?
            .ok_or(RelayerError::TransitionNotFound {
                block_number,
                transition_index,
            })?;

        tracing::info!(
            account = ?account,
            block_number,
            transition_index,
            "Submitting mainchain withdraw"
        );
        let outcome = self
            .settlement
            .withdraw(account, included, signature)
            .await?;
        if !outcome.is_success() {
            return Err(RelayerError::WithdrawFailed {
                tx_hash: outcome.tx_hash,
            });
        }
        Ok(outcome.tx_hash)
    }
}
