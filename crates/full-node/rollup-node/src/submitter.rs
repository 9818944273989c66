//! The two-chain commit protocol.
//!
//! A block moves `Building → Proposed → ConsensusReached → Committed`.
//! Role membership is never assumed: the proposer, signer, and committer
//! checks all compare this node's configured addresses against what the
//! contracts report at that moment. Every on-chain submission, including
//! its receipt wait, happens under one mutex, because nonce and gas
//! management on two chains are not built to tolerate parallel submission
//! from a single identity.

use std::collections::HashMap;
use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use futures::StreamExt;
use rollup_abi::{encode_block, encode_transitions, BlockSigner};
use rollup_interface::events::{BlockConsensusReachedEvent, BlockProposedEvent};
use rollup_interface::services::{ChainError, CommitteeService, SettlementService};
use rollup_interface::RollupBlock;
use rollup_state::RollupBlockInfo;
use tokio::sync::Mutex;

use crate::SubmitError;

/// Where a block stands in the commit protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStage {
    /// Still being filled, or handed off but not yet proposed by us.
    Building,
    /// Proposed on the proposal chain.
    Proposed,
    /// The committee signature threshold was met.
    ConsensusReached,
    /// Durable on the settlement chain. Terminal.
    Committed,
}

/// Drives proposals, committee signatures, and settlement commits.
pub struct BlockSubmitter<S, C> {
    settlement: Arc<S>,
    committee: Arc<C>,
    mainchain_signer: BlockSigner,
    sidechain_signer: BlockSigner,
    /// Serializes every on-chain submission and its receipt wait.
    submission_lock: Mutex<()>,
    stages: Mutex<HashMap<u64, BlockStage>>,
}

impl<S: SettlementService, C: CommitteeService> BlockSubmitter<S, C> {
    /// Creates the submitter with this node's two chain identities.
    pub fn new(
        settlement: Arc<S>,
        committee: Arc<C>,
        mainchain_signer: BlockSigner,
        sidechain_signer: BlockSigner,
    ) -> Self {
        Self {
            settlement,
            committee,
            mainchain_signer,
            sidechain_signer,
            submission_lock: Mutex::new(()),
            stages: Mutex::new(HashMap::new()),
        }
    }

    /// The stage a block has reached locally.
    pub async fn stage_of(&self, block_number: u64) -> BlockStage {
        self.stages
            .lock()
            .await
            .get(&block_number)
            .copied()
            .unwrap_or(BlockStage::Building)
    }

    async fn set_stage(&self, block_number: u64, stage: BlockStage) {
        self.stages.lock().await.insert(block_number, stage);
    }

    /// Entry point for a full block handed off by the aggregator.
    ///
    /// A node that is not the current proposer does nothing here; the
    /// proposal will arrive as a `BlockProposed` event like for any other
    /// committee member.
    pub async fn propose(&self, block: &RollupBlock) -> Result<(), SubmitError> {
        let _guard = self.submission_lock.lock().await;

        let proposer = retry_transient(|| self.committee.current_proposer()).await?;
        if proposer != self.sidechain_signer.address() {
            tracing::debug!(
                block_number = block.block_number,
                proposer = ?proposer,
                "Not the proposer, skipping proposal"
            );
            return Ok(());
        }

        let encoded_transitions = encode_transitions(block);
        let encoded_block = encode_block(block.block_number, &encoded_transitions);
        let signature = self.sidechain_signer.sign(&encoded_block)?;

        tracing::info!(
            block_number = block.block_number,
            num_transitions = encoded_transitions.len(),
            "Proposing block"
        );
        let outcome = retry_transient(|| {
            self.committee
                .propose_block(block.block_number, encoded_transitions.clone(), signature.clone())
        })
        .await?;
        if !outcome.is_success() {
            return Err(SubmitError::ProposeFailed {
                tx_hash: outcome.tx_hash,
            });
        }
        self.set_stage(block.block_number, BlockStage::Proposed).await;
        Ok(())
    }

    /// Watches the proposal chain and advances remote-driven transitions.
    /// Runs until both subscriptions end.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let mut proposed = self.committee.subscribe_block_proposed().await?;
        let mut consensus = self.committee.subscribe_consensus_reached().await?;
        tracing::info!("Watching block committee");

        loop {
            tokio::select! {
                event = proposed.next() => {
                    let Some(event) = event else {
                        anyhow::bail!("block-proposed subscription ended");
                    };
                    if let Err(error) = self.handle_block_proposed(event).await {
                        tracing::error!(%error, "Failed to countersign proposal");
                    }
                }
                event = consensus.next() => {
                    let Some(event) = event else {
                        anyhow::bail!("consensus subscription ended");
                    };
                    if let Err(error) = self.handle_consensus_reached(event).await {
                        tracing::error!(%error, "Failed to commit block");
                    }
                }
            }
        }
    }

    /// Every committee member except the proposer countersigns, over bytes
    /// reconstructed from the event payload, which must reproduce the
    /// proposer's encoding exactly.
    async fn handle_block_proposed(&self, event: BlockProposedEvent) -> Result<(), SubmitError> {
        let _guard = self.submission_lock.lock().await;

        let proposer = retry_transient(|| self.committee.current_proposer()).await?;
        if proposer == self.sidechain_signer.address() {
            return Ok(());
        }

        let encoded_block = encode_block(event.block_number, &event.transitions);
        let signature = self.sidechain_signer.sign(&encoded_block)?;
        tracing::info!(block_number = event.block_number, "Countersigning proposed block");
        let outcome = retry_transient(|| {
            self.committee
                .sign_block(self.sidechain_signer.address(), signature.clone())
        })
        .await?;
        if !outcome.is_success() {
            tracing::warn!(
                block_number = event.block_number,
                tx_hash = ?outcome.tx_hash,
                "Countersignature rejected"
            );
            return Ok(());
        }
        self.set_stage(event.block_number, BlockStage::Proposed).await;
        Ok(())
    }

    /// Only the committer posts the finalized block to the settlement
    /// chain.
    async fn handle_consensus_reached(
        &self,
        event: BlockConsensusReachedEvent,
    ) -> Result<(), SubmitError> {
        let _guard = self.submission_lock.lock().await;
        self.set_stage(event.block_number, BlockStage::ConsensusReached)
            .await;

        let committer = retry_transient(|| self.settlement.committer_address()).await?;
        if committer != self.mainchain_signer.address() {
            tracing::debug!(
                block_number = event.block_number,
                committer = ?committer,
                "Not the committer, skipping commit"
            );
            return Ok(());
        }

        tracing::info!(
            block_number = event.block_number,
            num_signatures = event.signatures.len(),
            "Committing block"
        );
        let outcome = retry_transient(|| {
            self.settlement.commit_block(
                event.block_number,
                event.transitions.clone(),
                event.signatures.clone(),
            )
        })
        .await?;
        if !outcome.is_success() {
            // A failed commit in the optimistic-rollup setting means a
            // protocol violation or misconfiguration; the stage is left for
            // the operator to investigate.
            return Err(SubmitError::CommitFailed {
                tx_hash: outcome.tx_hash,
            });
        }
        self.set_stage(event.block_number, BlockStage::Committed).await;
        self.cross_check_committed_root(&event).await;
        Ok(())
    }

    /// Rebuilds the per-block transition tree locally and compares its root
    /// against what the settlement contract recorded.
    async fn cross_check_committed_root(&self, event: &BlockConsensusReachedEvent) {
        let local_root = match RollupBlockInfo::from_encoded(
            event.block_number,
            event.transitions.clone(),
        ) {
            Ok(info) => info.root(),
            Err(error) => {
                tracing::warn!(block_number = event.block_number, %error, "Could not rebuild block tree");
                return;
            }
        };
        match self.settlement.block_info(event.block_number).await {
            Ok(Some(info)) if info.root_hash == local_root => {
                tracing::info!(
                    block_number = event.block_number,
                    root = %hex::encode(local_root),
                    "Committed block root cross-checked"
                );
            }
            Ok(Some(info)) => {
                tracing::warn!(
                    block_number = event.block_number,
                    local_root = %hex::encode(local_root),
                    chain_root = %hex::encode(info.root_hash),
                    "Committed block root mismatch"
                );
            }
            Ok(None) => {
                tracing::warn!(block_number = event.block_number, "Committed block not yet visible");
            }
            Err(error) => {
                tracing::warn!(block_number = event.block_number, %error, "Block info query failed");
            }
        }
    }
}

/// Retries transient chain failures with exponential backoff; permanent
/// failures surface immediately.
async fn retry_transient<T, F, Fut>(operation: F) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ChainError>>,
{
    operation
        .retry(&ExponentialBuilder::default())
        .when(ChainError::is_transient)
        .await
}
