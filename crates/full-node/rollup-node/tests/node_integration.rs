//! End-to-end pipeline tests: settlement events in, committed blocks out,
//! with an independent validator watching for fraud.

use std::sync::Arc;
use std::time::Duration;

use ethers_core::types::{Address, U256};
use futures::StreamExt;
use rollup_abi::{decode_transition, BlockSigner};
use rollup_db::namespaces::{AGGREGATOR_TREE, VALIDATOR_TREE};
use rollup_db::MemoryDb;
use rollup_interface::events::{BlockCommittedEvent, TokenEvent};
use rollup_interface::services::SettlementService;
use rollup_interface::{Transition, TransitionKind};
use rollup_mock_chain::{MockChain, MockChainConfig};
use rollup_node::aggregator::Aggregator;
use rollup_node::archive::BlockArchive;
use rollup_node::ingestor::EventIngestor;
use rollup_node::relayer::WithdrawRelayer;
use rollup_node::submitter::{BlockStage, BlockSubmitter};
use rollup_node::validator::Validator;
use rollup_node::SharedStore;
use rollup_state::{RollupBlockInfo, StateMachine, TokenRegistry};
use tokio::sync::Mutex;
use tokio::time::sleep;

const SETTLE: Duration = Duration::from_millis(100);
const DEADLINE: Duration = Duration::from_secs(5);

fn token_one() -> Address {
    Address::repeat_byte(0x71)
}

fn side_token_one() -> Address {
    Address::repeat_byte(0x72)
}

fn alice() -> Address {
    Address::repeat_byte(0xaa)
}

fn bob() -> Address {
    Address::repeat_byte(0xbb)
}

struct Pipeline {
    chain: MockChain,
    validator_store: SharedStore,
    submitter: Arc<BlockSubmitter<MockChain, MockChain>>,
    committed: Arc<Mutex<Vec<BlockCommittedEvent>>>,
    validator_address: Address,
}

impl Pipeline {
    /// Wires an aggregator node (proposer + committer) and an independent
    /// validator over one mock chain hub.
    async fn start(num_transitions_in_block: usize, fraud_transfer: bool) -> Self {
        Self::start_with(num_transitions_in_block, fraud_transfer, None).await
    }

    /// Like [`Pipeline::start`], with an override for the chain-side role
    /// configuration.
    async fn start_with(
        num_transitions_in_block: usize,
        fraud_transfer: bool,
        roles: Option<MockChainConfig>,
    ) -> Self {
        let mainchain_signer = BlockSigner::random();
        let sidechain_signer = BlockSigner::random();
        let validator_signer = BlockSigner::random();

        let chain = MockChain::new(roles.unwrap_or(MockChainConfig {
            committee: vec![sidechain_signer.address()],
            signature_threshold: 1,
            proposer: sidechain_signer.address(),
            committer: mainchain_signer.address(),
        }));
        let settlement = Arc::new(chain.clone());
        let committee = Arc::new(chain.clone());

        let aggregator_store: SharedStore = Arc::new(MemoryDb::new());
        let validator_store: SharedStore = Arc::new(MemoryDb::new());

        // Capture commits for assertions before anything can commit.
        let committed = Arc::new(Mutex::new(Vec::new()));
        let mut commit_stream = chain.subscribe_block_committed().await.unwrap();
        let captured = committed.clone();
        tokio::spawn(async move {
            while let Some(event) = commit_stream.next().await {
                captured.lock().await.push(event);
            }
        });

        let registries = vec![
            TokenRegistry::new(aggregator_store.clone()),
            TokenRegistry::new(validator_store.clone()),
        ];
        let (ingestor, transactions) = EventIngestor::new(settlement.clone(), registries);
        tokio::spawn(async move {
            if let Err(error) = ingestor.run().await {
                tracing::error!(%error, "test ingestor stopped");
            }
        });

        let submitter = Arc::new(BlockSubmitter::new(
            settlement.clone(),
            committee,
            mainchain_signer,
            sidechain_signer,
        ));
        tokio::spawn(submitter.clone().run());

        let aggregator = Aggregator::new(
            StateMachine::new(aggregator_store.clone(), AGGREGATOR_TREE).unwrap(),
            transactions,
            submitter.clone(),
            num_transitions_in_block,
            fraud_transfer,
        );
        tokio::spawn(aggregator.run());

        let validator = Validator::new(
            settlement,
            StateMachine::new(validator_store.clone(), VALIDATOR_TREE).unwrap(),
            BlockArchive::new(validator_store.clone()),
            validator_signer.address(),
        );
        tokio::spawn(validator.run());

        // Let every component finish subscribing before events flow.
        sleep(SETTLE).await;

        Self {
            chain,
            validator_store,
            submitter,
            committed,
            validator_address: validator_signer.address(),
        }
    }

    async fn setup_token(&self) {
        self.chain.register_token(token_one(), U256::zero()).await;
        self.chain.map_token(token_one(), side_token_one()).await;
        sleep(SETTLE).await;
    }

    async fn push_deposit(&self, account: Address, amount: u64) {
        self.chain
            .push_token_event(
                side_token_one(),
                TokenEvent::Deposit {
                    account,
                    mainchain_token: token_one(),
                    amount: U256::from(amount),
                    signature: vec![0xd0],
                },
            )
            .await;
    }

    async fn push_transfer(&self, sender: Address, recipient: Address, amount: u64, nonce: u64) {
        self.chain
            .push_token_event(
                side_token_one(),
                TokenEvent::Transfer {
                    sender,
                    recipient,
                    mainchain_token: token_one(),
                    amount: U256::from(amount),
                    nonce: U256::from(nonce),
                    signature: vec![0x7f],
                },
            )
            .await;
    }

    async fn push_withdraw(&self, account: Address, amount: u64, nonce: u64) {
        self.chain
            .push_token_event(
                side_token_one(),
                TokenEvent::Withdraw {
                    account,
                    mainchain_token: token_one(),
                    amount: U256::from(amount),
                    nonce: U256::from(nonce),
                    signature: vec![0xdd],
                },
            )
            .await;
    }

    async fn wait_for_commits(&self, count: usize) -> Vec<BlockCommittedEvent> {
        let start = tokio::time::Instant::now();
        loop {
            let committed = self.committed.lock().await;
            if committed.len() >= count {
                return committed.clone();
            }
            drop(committed);
            assert!(
                start.elapsed() < DEADLINE,
                "timed out waiting for {count} committed blocks"
            );
            sleep(Duration::from_millis(20)).await;
        }
    }

    fn decode_block(event: &BlockCommittedEvent) -> Vec<Transition> {
        event
            .transitions
            .iter()
            .map(|bytes| decode_transition(bytes).unwrap())
            .collect()
    }
}

#[tokio::test]
async fn single_deposit_produces_a_create_and_deposit_block() {
    let pipeline = Pipeline::start(1, false).await;
    pipeline.setup_token().await;
    pipeline.push_deposit(alice(), 100).await;

    let commits = pipeline.wait_for_commits(1).await;
    assert_eq!(commits[0].block_number, 0);
    let transitions = Pipeline::decode_block(&commits[0]);
    assert_eq!(transitions.len(), 1);
    match &transitions[0] {
        Transition::CreateAndDeposit {
            slot_index,
            account,
            token_index,
            amount,
            ..
        } => {
            assert_eq!(*slot_index, U256::zero());
            assert_eq!(*account, alice());
            assert_eq!(*token_index, U256::zero());
            assert_eq!(*amount, U256::from(100));
        }
        other => panic!("expected CreateAndDeposit, got {other:?}"),
    }

    // The on-chain root matches an independent rebuild of the block tree.
    let info = pipeline.chain.block_info(0).await.unwrap().unwrap();
    let local = RollupBlockInfo::from_encoded(0, commits[0].transitions.clone()).unwrap();
    assert_eq!(info.root_hash, local.root());
    assert_eq!(info.block_size, U256::one());

    // The stage flips to Committed right after the commit receipt; give the
    // handler a beat to finish.
    sleep(SETTLE).await;
    assert_eq!(pipeline.submitter.stage_of(0).await, BlockStage::Committed);

    // The validator agreed: no fraud proofs.
    assert!(pipeline.chain.fraud_proofs().await.is_empty());
}

#[tokio::test]
async fn nonce_gap_is_rejected_and_never_fills_a_block() {
    let pipeline = Pipeline::start(2, false).await;
    pipeline.setup_token().await;

    pipeline.push_deposit(alice(), 100).await;
    // Required transfer nonce is 0; this one must be rejected.
    pipeline.push_transfer(alice(), bob(), 10, 5).await;
    sleep(SETTLE * 3).await;

    assert_eq!(pipeline.chain.proposal_count().await, 0);
    assert!(pipeline.committed.lock().await.is_empty());

    // A valid transfer fills the two-transition block.
    pipeline.push_transfer(alice(), bob(), 30, 0).await;
    let commits = pipeline.wait_for_commits(1).await;
    let transitions = Pipeline::decode_block(&commits[0]);
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[0].kind(), TransitionKind::CreateAndDeposit);
    match &transitions[1] {
        Transition::CreateAndTransfer {
            sender_slot,
            recipient_slot,
            recipient,
            amount,
            nonce,
            ..
        } => {
            assert_eq!(*sender_slot, U256::zero());
            assert_eq!(*recipient_slot, U256::one());
            assert_eq!(*recipient, bob());
            assert_eq!(*amount, U256::from(30));
            assert_eq!(*nonce, U256::zero());
        }
        other => panic!("expected CreateAndTransfer, got {other:?}"),
    }

    // Both transitions claim roots the validator reproduces.
    sleep(SETTLE).await;
    assert!(pipeline.chain.fraud_proofs().await.is_empty());
}

#[tokio::test]
async fn consecutive_blocks_number_sequentially() {
    let pipeline = Pipeline::start(1, false).await;
    pipeline.setup_token().await;

    pipeline.push_deposit(alice(), 100).await;
    pipeline.push_deposit(alice(), 50).await;

    let commits = pipeline.wait_for_commits(2).await;
    assert_eq!(commits[0].block_number, 0);
    assert_eq!(commits[1].block_number, 1);

    // Second deposit reuses the slot: a plain Deposit transition.
    let transitions = Pipeline::decode_block(&commits[1]);
    assert_eq!(transitions[0].kind(), TransitionKind::Deposit);
}

#[tokio::test]
async fn fraudulent_transfer_root_is_challenged() {
    let pipeline = Pipeline::start(2, true).await;
    pipeline.setup_token().await;

    pipeline.push_deposit(alice(), 100).await;
    pipeline.push_transfer(alice(), bob(), 30, 0).await;
    pipeline.wait_for_commits(1).await;

    let start = tokio::time::Instant::now();
    let proof = loop {
        let proofs = pipeline.chain.fraud_proofs().await;
        if let Some(proof) = proofs.first() {
            break proof.clone();
        }
        assert!(start.elapsed() < DEADLINE, "timed out waiting for fraud proof");
        sleep(Duration::from_millis(20)).await;
    };

    // The challenged transition is the zero-rooted transfer at index 1.
    assert_eq!(
        proof.invalid_transition.inclusion_proof.transition_index,
        U256::one()
    );
    let invalid = decode_transition(&proof.invalid_transition.transition).unwrap();
    assert_eq!(invalid.kind(), TransitionKind::CreateAndTransfer);
    assert_eq!(invalid.state_root(), ethers_core::types::H256::zero());

    // Its pre-state is the deposit that created the sender.
    let pre = decode_transition(&proof.pre_state_transition.transition).unwrap();
    assert_eq!(pre.kind(), TransitionKind::CreateAndDeposit);

    // One storage slot is read by a recipient-creating transfer: the
    // sender's.
    assert_eq!(proof.storage_slots.len(), 1);
    assert_eq!(proof.storage_slots[0].storage_slot.account_info.account, alice());
}

#[tokio::test]
async fn second_committee_member_countersigns_to_reach_consensus() {
    // Node A aggregates, proposes, and commits; node B only countersigns.
    // With a threshold of two, no block commits without B's signature.
    let a_mainchain = BlockSigner::random();
    let a_sidechain = BlockSigner::random();
    let b_mainchain = BlockSigner::random();
    let b_sidechain = BlockSigner::random();

    let chain = MockChain::new(MockChainConfig {
        committee: vec![a_sidechain.address(), b_sidechain.address()],
        signature_threshold: 2,
        proposer: a_sidechain.address(),
        committer: a_mainchain.address(),
    });
    let settlement = Arc::new(chain.clone());
    let committee = Arc::new(chain.clone());

    let committed = Arc::new(Mutex::new(Vec::new()));
    let mut commit_stream = chain.subscribe_block_committed().await.unwrap();
    let captured = committed.clone();
    tokio::spawn(async move {
        while let Some(event) = commit_stream.next().await {
            captured.lock().await.push(event);
        }
    });

    // Node A's full aggregation pipeline.
    let store_a: SharedStore = Arc::new(MemoryDb::new());
    let (ingestor, transactions) =
        EventIngestor::new(settlement.clone(), vec![TokenRegistry::new(store_a.clone())]);
    tokio::spawn(async move {
        let _ = ingestor.run().await;
    });
    let submitter_a = Arc::new(BlockSubmitter::new(
        settlement.clone(),
        committee.clone(),
        a_mainchain,
        a_sidechain,
    ));
    tokio::spawn(submitter_a.clone().run());
    let aggregator = Aggregator::new(
        StateMachine::new(store_a, AGGREGATOR_TREE).unwrap(),
        transactions,
        submitter_a,
        1,
        false,
    );
    tokio::spawn(aggregator.run());

    // Node B runs only a submitter watcher; it holds no chain role beyond
    // committee membership.
    let submitter_b = Arc::new(BlockSubmitter::new(
        settlement.clone(),
        committee,
        b_mainchain,
        b_sidechain,
    ));
    tokio::spawn(submitter_b.clone().run());

    sleep(SETTLE).await;
    chain.register_token(token_one(), U256::zero()).await;
    chain.map_token(token_one(), side_token_one()).await;
    sleep(SETTLE).await;
    chain
        .push_token_event(
            side_token_one(),
            TokenEvent::Deposit {
                account: alice(),
                mainchain_token: token_one(),
                amount: U256::from(100),
                signature: vec![0xd0],
            },
        )
        .await;

    let start = tokio::time::Instant::now();
    loop {
        if !committed.lock().await.is_empty() {
            break;
        }
        assert!(start.elapsed() < DEADLINE, "timed out waiting for the commit");
        sleep(Duration::from_millis(20)).await;
    }

    // Both committee signatures made it into the committed block. Node B
    // observed consensus but, not being the committer, went no further.
    let signatures = chain.committed_signatures(0).await.unwrap();
    assert_eq!(signatures.len(), 2);
    sleep(SETTLE).await;
    assert_eq!(
        submitter_b.stage_of(0).await,
        BlockStage::ConsensusReached
    );
}

#[tokio::test]
async fn failed_proposal_surfaces_but_does_not_stop_the_aggregator() {
    let pipeline = Pipeline::start(1, false).await;
    pipeline.setup_token().await;
    pipeline.chain.fail_proposals(true).await;

    pipeline.push_deposit(alice(), 100).await;
    sleep(SETTLE * 3).await;
    assert!(pipeline.committed.lock().await.is_empty());
    assert_eq!(pipeline.submitter.stage_of(0).await, BlockStage::Building);

    // The pending block advanced anyway; once proposals mine again, the
    // next block goes through under its own number.
    pipeline.chain.fail_proposals(false).await;
    pipeline.push_deposit(alice(), 50).await;
    let commits = pipeline.wait_for_commits(1).await;
    assert_eq!(commits[0].block_number, 1);
}

#[tokio::test]
async fn node_without_roles_performs_no_submissions() {
    let outsider_roles = MockChainConfig {
        committee: vec![Address::repeat_byte(0x01)],
        signature_threshold: 1,
        proposer: Address::repeat_byte(0x01),
        committer: Address::repeat_byte(0x02),
    };
    let pipeline = Pipeline::start_with(1, false, Some(outsider_roles)).await;
    pipeline.setup_token().await;
    pipeline.push_deposit(alice(), 100).await;
    sleep(SETTLE * 3).await;

    // The aggregator applied the transaction but, being neither proposer
    // nor committer, submitted nothing.
    assert_eq!(pipeline.chain.proposal_count().await, 0);
    assert!(pipeline.committed.lock().await.is_empty());
    assert_eq!(pipeline.submitter.stage_of(0).await, BlockStage::Building);
}

#[tokio::test]
async fn committed_withdraw_can_be_relayed_to_the_mainchain() {
    let pipeline = Pipeline::start(1, false).await;
    pipeline.setup_token().await;

    pipeline.push_deposit(alice(), 100).await;
    pipeline.push_withdraw(alice(), 40, 0).await;
    let commits = pipeline.wait_for_commits(2).await;
    let transitions = Pipeline::decode_block(&commits[1]);
    assert_eq!(transitions[0].kind(), TransitionKind::Withdraw);

    // Give the validator time to archive block 1.
    sleep(SETTLE).await;

    let relayer = WithdrawRelayer::new(
        Arc::new(pipeline.chain.clone()),
        BlockArchive::new(pipeline.validator_store.clone()),
        StateMachine::new(pipeline.validator_store.clone(), VALIDATOR_TREE).unwrap(),
    );

    // The relayer locates the withdrawal itself: newest block first, last
    // transition first.
    assert_eq!(relayer.find_latest_withdraw(alice(), token_one()).unwrap(), (1, 0));
    relayer
        .withdraw(alice(), token_one(), vec![0xdd])
        .await
        .expect("withdraw relay should succeed");
    let withdrawals = pipeline.chain.withdrawals().await;
    assert_eq!(withdrawals.len(), 1);
    assert_eq!(withdrawals[0].0, alice());

    // No committed withdrawal exists for an account that never withdrew.
    let err = relayer.withdraw(bob(), token_one(), vec![0xdd]).await.unwrap_err();
    assert!(matches!(
        err,
        rollup_node::relayer::RelayerError::NoWithdrawFound { .. }
    ));

    // Block 0 position 0 holds a deposit, not a withdraw.
    let err = relayer
        .withdraw_at(alice(), 0, 0, vec![0xdd])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        rollup_node::relayer::RelayerError::NotAWithdraw { .. }
    ));

    // A newer committed withdrawal supersedes the old one in the scan.
    pipeline.push_withdraw(alice(), 10, 1).await;
    pipeline.wait_for_commits(3).await;
    sleep(SETTLE).await;
    assert_eq!(relayer.find_latest_withdraw(alice(), token_one()).unwrap(), (2, 0));
}

#[tokio::test]
async fn empty_genesis_block_does_not_stop_the_validator() {
    // The node holds no chain roles, so the chain is driven by hand: an
    // empty genesis block, then a block whose first transition claims a
    // bogus root. The challenged transition has no pre-state witness (the
    // only earlier block is empty), so the validator logs and moves on
    // instead of dying.
    let outsider_roles = MockChainConfig {
        committee: vec![Address::repeat_byte(0x01)],
        signature_threshold: 1,
        proposer: Address::repeat_byte(0x01),
        committer: Address::repeat_byte(0x02),
    };
    let pipeline = Pipeline::start_with(1, false, Some(outsider_roles)).await;
    pipeline.setup_token().await;

    let genesis = pipeline.chain.commit_block(0, vec![], vec![]).await.unwrap();
    assert!(genesis.is_success());

    let bogus = rollup_abi::encode_transition(&Transition::CreateAndDeposit {
        state_root: ethers_core::types::H256::zero(),
        slot_index: U256::zero(),
        account: alice(),
        token_index: U256::zero(),
        amount: U256::from(5),
        signature: vec![],
    });
    pipeline.chain.commit_block(1, vec![bogus], vec![]).await.unwrap();
    sleep(SETTLE * 3).await;

    // No pre-state witness means no challenge, and the validator finished
    // both blocks: the high-water mark advanced past them.
    assert!(pipeline.chain.fraud_proofs().await.is_empty());
    let archive = BlockArchive::new(pipeline.validator_store.clone());
    assert_eq!(archive.last_validated().unwrap(), Some(1));
    assert!(archive.load_block(0).unwrap().unwrap().transitions.is_empty());
}

#[tokio::test]
async fn validator_replay_after_restart_is_idempotent() {
    let pipeline = Pipeline::start(1, false).await;
    pipeline.setup_token().await;
    pipeline.push_deposit(alice(), 100).await;
    let commits = pipeline.wait_for_commits(1).await;
    sleep(SETTLE).await;

    // A fresh validator instance over the same durable store replays the
    // commit without re-applying it or emitting anything.
    let machine = StateMachine::new(pipeline.validator_store.clone(), VALIDATOR_TREE).unwrap();
    let root_before = machine.state_root();
    let mut restarted = Validator::new(
        Arc::new(pipeline.chain.clone()),
        machine,
        BlockArchive::new(pipeline.validator_store.clone()),
        pipeline.validator_address,
    );
    restarted.process_block(commits[0].clone()).await.unwrap();

    let machine = StateMachine::new(pipeline.validator_store.clone(), VALIDATOR_TREE).unwrap();
    assert_eq!(machine.state_root(), root_before);
    assert!(pipeline.chain.fraud_proofs().await.is_empty());
}

#[tokio::test]
async fn failed_commit_leaves_the_block_uncommitted() {
    let pipeline = Pipeline::start(1, false).await;
    pipeline.setup_token().await;
    pipeline.chain.fail_commits(true).await;

    pipeline.push_deposit(alice(), 100).await;
    sleep(SETTLE * 3).await;

    // The proposal went through, consensus was reached, but the commit
    // receipt failed; the per-block state machine is not auto-advanced.
    assert_eq!(pipeline.chain.proposal_count().await, 1);
    assert!(pipeline.committed.lock().await.is_empty());
    assert_eq!(
        pipeline.submitter.stage_of(0).await,
        BlockStage::ConsensusReached
    );
}
