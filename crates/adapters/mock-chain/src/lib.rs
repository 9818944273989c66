//! An in-process stand-in for both chains the node talks to.
//!
//! One [`MockChain`] is a shared hub: the settlement side serves the token
//! registry feed, records committed blocks (with real per-block transition
//! trees so the `blocks(i)` cross-check and fraud-proof inclusion checks
//! behave like the contracts), and the proposal side runs a
//! fixed-proposer committee that reaches consensus at a configurable
//! signature threshold. Multiple node instances sharing one hub see each
//! other's proposals, signatures, and commits, which is exactly what the
//! integration tests need.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::{Address, H256, U256};
use futures::stream::BoxStream;
use futures::StreamExt;
use rollup_interface::events::{
    BlockCommittedEvent, BlockConsensusReachedEvent, BlockProposedEvent, TokenEvent,
    TokenMappedEvent, TokenRegisteredEvent,
};
use rollup_interface::services::{
    BlockInfo, ChainError, CommitteeService, SettlementService, TxOutcome,
};
use rollup_interface::{FraudProof, IncludedTransition};
use rollup_state::RollupBlockInfo;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Committee and role configuration of a [`MockChain`].
#[derive(Debug, Clone)]
pub struct MockChainConfig {
    /// Committee member addresses on the proposal chain.
    pub committee: Vec<Address>,
    /// Signatures required for `BlockConsensusReached`.
    pub signature_threshold: usize,
    /// The fixed proposer the committee contract reports.
    pub proposer: Address,
    /// The address allowed to commit blocks on the settlement chain.
    pub committer: Address,
}

#[derive(Debug, Clone)]
struct Proposal {
    block_number: u64,
    transitions: Vec<Vec<u8>>,
    signatures: Vec<Vec<u8>>,
    consensus_reached: bool,
}

#[derive(Debug, Clone)]
struct CommittedBlock {
    transitions: Vec<Vec<u8>>,
    signatures: Vec<Vec<u8>>,
    root: H256,
}

#[derive(Default)]
struct HubState {
    token_event_feeds: HashMap<Address, broadcast::Sender<TokenEvent>>,
    proposals: Vec<Proposal>,
    committed: HashMap<u64, CommittedBlock>,
    fraud_proofs: Vec<FraudProof>,
    withdrawals: Vec<(Address, IncludedTransition, Vec<u8>)>,
    deposit_nonces: HashMap<(Address, Address), U256>,
    withdraw_nonces: HashMap<(Address, Address), U256>,
    fail_commits: bool,
    fail_proposals: bool,
    tx_counter: u64,
}

impl HubState {
    fn next_outcome(&mut self, status: u64) -> TxOutcome {
        self.tx_counter += 1;
        TxOutcome {
            tx_hash: H256::from_low_u64_be(self.tx_counter),
            status,
        }
    }
}

/// The shared in-memory chain hub. Cheap to clone; clones see one chain.
#[derive(Clone)]
pub struct MockChain {
    config: Arc<Mutex<MockChainConfig>>,
    state: Arc<Mutex<HubState>>,
    token_registered: broadcast::Sender<TokenRegisteredEvent>,
    token_mapped: broadcast::Sender<TokenMappedEvent>,
    block_proposed: broadcast::Sender<BlockProposedEvent>,
    consensus_reached: broadcast::Sender<BlockConsensusReachedEvent>,
    block_committed: broadcast::Sender<BlockCommittedEvent>,
}

impl MockChain {
    /// Creates a hub with the given committee configuration.
    pub fn new(config: MockChainConfig) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
            state: Arc::new(Mutex::new(HubState::default())),
            token_registered: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            token_mapped: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            block_proposed: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            consensus_reached: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            block_committed: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
        }
    }

    /// A hub where `node` plays every role and consensus needs one
    /// signature.
    pub fn single_node(node: Address) -> Self {
        Self::new(MockChainConfig {
            committee: vec![node],
            signature_threshold: 1,
            proposer: node,
            committer: node,
        })
    }

    /// Emits `TokenRegistered` and opens the token's event feed.
    pub async fn register_token(&self, token_address: Address, token_index: U256) {
        let _ = self.token_registered.send(TokenRegisteredEvent {
            token_address,
            token_index,
        });
    }

    /// Emits `TokenMapped` for a sidechain counterpart contract.
    pub async fn map_token(&self, mainchain_token: Address, sidechain_token: Address) {
        let mut state = self.state.lock().await;
        state
            .token_event_feeds
            .entry(sidechain_token)
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0);
        drop(state);
        let _ = self.token_mapped.send(TokenMappedEvent {
            mainchain_token,
            sidechain_token,
        });
    }

    /// Emits a user operation event on a mapped token's feed.
    pub async fn push_token_event(&self, sidechain_token: Address, event: TokenEvent) {
        let state = self.state.lock().await;
        if let Some(feed) = state.token_event_feeds.get(&sidechain_token) {
            let _ = feed.send(event);
        } else {
            tracing::warn!(token = ?sidechain_token, "Dropping event for unmapped token");
        }
    }

    /// Reassigns the proposer the committee contract reports.
    pub async fn set_proposer(&self, proposer: Address) {
        self.config.lock().await.proposer = proposer;
    }

    /// Makes subsequent `commitBlock` submissions mine with status 0.
    pub async fn fail_commits(&self, fail: bool) {
        self.state.lock().await.fail_commits = fail;
    }

    /// Makes subsequent `proposeBlock` submissions mine with status 0.
    pub async fn fail_proposals(&self, fail: bool) {
        self.state.lock().await.fail_proposals = fail;
    }

    /// Block numbers committed so far, unordered.
    pub async fn committed_block_numbers(&self) -> Vec<u64> {
        self.state.lock().await.committed.keys().copied().collect()
    }

    /// The signatures a committed block carried.
    pub async fn committed_signatures(&self, block_number: u64) -> Option<Vec<Vec<u8>>> {
        let state = self.state.lock().await;
        state
            .committed
            .get(&block_number)
            .map(|block| block.signatures.clone())
    }

    /// Fraud proofs accepted so far.
    pub async fn fraud_proofs(&self) -> Vec<FraudProof> {
        self.state.lock().await.fraud_proofs.clone()
    }

    /// Withdrawals submitted through the deposit/withdraw manager.
    pub async fn withdrawals(&self) -> Vec<(Address, IncludedTransition, Vec<u8>)> {
        self.state.lock().await.withdrawals.clone()
    }

    /// Proposals observed on the committee contract.
    pub async fn proposal_count(&self) -> usize {
        self.state.lock().await.proposals.len()
    }

    fn verify_inclusion(
        state: &HubState,
        included: &IncludedTransition,
    ) -> Result<bool, ChainError> {
        let block_number = included.inclusion_proof.block_number;
        if block_number > U256::from(u64::MAX) {
            return Ok(false);
        }
        let Some(block) = state.committed.get(&block_number.low_u64()) else {
            return Ok(false);
        };
        let info = RollupBlockInfo::from_encoded(block_number.low_u64(), block.transitions.clone())
            .map_err(|e| ChainError::Permanent(e.to_string()))?;
        Ok(info.root() == block.root && info.verify_included_transition(included))
    }

    fn subscribe<T: Clone + Send + 'static>(
        sender: &broadcast::Sender<T>,
    ) -> BoxStream<'static, T> {
        BroadcastStream::new(sender.subscribe())
            .filter_map(|item| async move { item.ok() })
            .boxed()
    }
}

#[async_trait]
impl SettlementService for MockChain {
    async fn committer_address(&self) -> Result<Address, ChainError> {
        Ok(self.config.lock().await.committer)
    }

    async fn block_info(&self, block_number: u64) -> Result<Option<BlockInfo>, ChainError> {
        let state = self.state.lock().await;
        Ok(state.committed.get(&block_number).map(|block| BlockInfo {
            root_hash: block.root,
            block_size: U256::from(block.transitions.len()),
        }))
    }

    async fn deposit_nonce(&self, account: Address, token: Address) -> Result<U256, ChainError> {
        let state = self.state.lock().await;
        Ok(state
            .deposit_nonces
            .get(&(account, token))
            .copied()
            .unwrap_or_default())
    }

    async fn withdraw_nonce(&self, account: Address, token: Address) -> Result<U256, ChainError> {
        let state = self.state.lock().await;
        Ok(state
            .withdraw_nonces
            .get(&(account, token))
            .copied()
            .unwrap_or_default())
    }

    async fn commit_block(
        &self,
        block_number: u64,
        transitions: Vec<Vec<u8>>,
        signatures: Vec<Vec<u8>>,
    ) -> Result<TxOutcome, ChainError> {
        let mut state = self.state.lock().await;
        if state.fail_commits {
            return Ok(state.next_outcome(0));
        }
        if state.committed.contains_key(&block_number) {
            tracing::warn!(block_number, "Rejecting duplicate block commit");
            return Ok(state.next_outcome(0));
        }

        let root = if transitions.is_empty() {
            H256::zero()
        } else {
            RollupBlockInfo::from_encoded(block_number, transitions.clone())
                .map_err(|e| ChainError::Permanent(e.to_string()))?
                .root()
        };
        state.committed.insert(
            block_number,
            CommittedBlock {
                transitions: transitions.clone(),
                signatures,
                root,
            },
        );
        let outcome = state.next_outcome(1);
        drop(state);

        let _ = self.block_committed.send(BlockCommittedEvent {
            block_number,
            transitions,
        });
        Ok(outcome)
    }

    async fn prove_transition_invalid(&self, proof: FraudProof) -> Result<TxOutcome, ChainError> {
        let mut state = self.state.lock().await;
        let pre_ok = Self::verify_inclusion(&state, &proof.pre_state_transition)?;
        let invalid_ok = Self::verify_inclusion(&state, &proof.invalid_transition)?;
        if !pre_ok || !invalid_ok {
            tracing::warn!(pre_ok, invalid_ok, "Rejecting fraud proof with bad inclusion");
            return Ok(state.next_outcome(0));
        }
        state.fraud_proofs.push(proof);
        Ok(state.next_outcome(1))
    }

    async fn withdraw(
        &self,
        account: Address,
        transition: IncludedTransition,
        signature: Vec<u8>,
    ) -> Result<TxOutcome, ChainError> {
        let mut state = self.state.lock().await;
        let included_ok = Self::verify_inclusion(&state, &transition)?;
        if !included_ok {
            return Ok(state.next_outcome(0));
        }
        state.withdrawals.push((account, transition, signature));
        Ok(state.next_outcome(1))
    }

    async fn subscribe_token_registered(
        &self,
    ) -> Result<BoxStream<'static, TokenRegisteredEvent>, ChainError> {
        Ok(Self::subscribe(&self.token_registered))
    }

    async fn subscribe_token_mapped(
        &self,
    ) -> Result<BoxStream<'static, TokenMappedEvent>, ChainError> {
        Ok(Self::subscribe(&self.token_mapped))
    }

    async fn subscribe_token_events(
        &self,
        sidechain_token: Address,
    ) -> Result<BoxStream<'static, TokenEvent>, ChainError> {
        let mut state = self.state.lock().await;
        let feed = state
            .token_event_feeds
            .entry(sidechain_token)
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0);
        Ok(Self::subscribe(feed))
    }

    async fn subscribe_block_committed(
        &self,
    ) -> Result<BoxStream<'static, BlockCommittedEvent>, ChainError> {
        Ok(Self::subscribe(&self.block_committed))
    }
}

#[async_trait]
impl CommitteeService for MockChain {
    async fn current_proposer(&self) -> Result<Address, ChainError> {
        Ok(self.config.lock().await.proposer)
    }

    async fn propose_block(
        &self,
        block_number: u64,
        transitions: Vec<Vec<u8>>,
        signature: Vec<u8>,
    ) -> Result<TxOutcome, ChainError> {
        let threshold = self.config.lock().await.signature_threshold;
        let mut state = self.state.lock().await;
        if state.fail_proposals {
            return Ok(state.next_outcome(0));
        }
        state.proposals.push(Proposal {
            block_number,
            transitions: transitions.clone(),
            signatures: vec![signature],
            consensus_reached: false,
        });
        let outcome = state.next_outcome(1);
        let consensus = self.check_consensus(&mut state, threshold);
        drop(state);

        let _ = self.block_proposed.send(BlockProposedEvent {
            block_number,
            transitions,
        });
        if let Some(event) = consensus {
            let _ = self.consensus_reached.send(event);
        }
        Ok(outcome)
    }

    async fn sign_block(&self, from: Address, signature: Vec<u8>) -> Result<TxOutcome, ChainError> {
        let config = self.config.lock().await;
        let is_member = config.committee.contains(&from);
        let threshold = config.signature_threshold;
        drop(config);

        let mut state = self.state.lock().await;
        if !is_member {
            tracing::warn!(from = ?from, "Rejecting signature from non-member");
            return Ok(state.next_outcome(0));
        }
        let Some(proposal) = state.proposals.iter_mut().rev().find(|p| !p.consensus_reached)
        else {
            return Ok(state.next_outcome(0));
        };
        proposal.signatures.push(signature);
        let outcome = state.next_outcome(1);
        let consensus = self.check_consensus(&mut state, threshold);
        drop(state);

        if let Some(event) = consensus {
            let _ = self.consensus_reached.send(event);
        }
        Ok(outcome)
    }

    async fn subscribe_block_proposed(
        &self,
    ) -> Result<BoxStream<'static, BlockProposedEvent>, ChainError> {
        Ok(Self::subscribe(&self.block_proposed))
    }

    async fn subscribe_consensus_reached(
        &self,
    ) -> Result<BoxStream<'static, BlockConsensusReachedEvent>, ChainError> {
        Ok(Self::subscribe(&self.consensus_reached))
    }
}

impl MockChain {
    fn check_consensus(
        &self,
        state: &mut HubState,
        threshold: usize,
    ) -> Option<BlockConsensusReachedEvent> {
        let proposal = state
            .proposals
            .iter_mut()
            .rev()
            .find(|p| !p.consensus_reached && p.signatures.len() >= threshold)?;
        proposal.consensus_reached = true;
        Some(BlockConsensusReachedEvent {
            block_number: proposal.block_number,
            transitions: proposal.transitions.clone(),
            signatures: proposal.signatures.clone(),
        })
    }
}
