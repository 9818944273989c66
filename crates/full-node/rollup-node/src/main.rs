use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use rollup_abi::BlockSigner;
use rollup_db::namespaces::{AGGREGATOR_TREE, VALIDATOR_TREE};
use rollup_db::MemoryDb;
use rollup_mock_chain::{MockChain, MockChainConfig};
use rollup_node::aggregator::Aggregator;
use rollup_node::archive::BlockArchive;
use rollup_node::config::{from_toml_path, NodeConfig};
use rollup_node::ingestor::EventIngestor;
use rollup_node::submitter::BlockSubmitter;
use rollup_node::validator::Validator;
use rollup_node::SharedStore;
use rollup_state::{StateMachine, TokenRegistry};
use tracing_subscriber::EnvFilter;

/// Off-chain rollup node. Runs as the aggregator that produces and commits
/// blocks, or (with `--validatormode`) as the validator that re-executes
/// them and challenges fraud.
///
/// Chain RPC adapters are provisioned externally; without them the node
/// wires an in-process mock chain, which is enough to exercise the full
/// pipeline locally.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory containing `config.toml`.
    #[arg(long, default_value = "config")]
    config: PathBuf,

    /// Aggregator database path.
    #[arg(long = "aggregatordb", default_value = "aggregator-db")]
    aggregator_db: PathBuf,

    /// Validator database path.
    #[arg(long = "validatordb", default_value = "validator-db")]
    validator_db: PathBuf,

    /// Settlement-chain JSON keystore; a throwaway key is generated when
    /// omitted.
    #[arg(long = "mainchainkeystore")]
    mainchain_keystore: Option<PathBuf>,

    /// Proposal-chain JSON keystore; a throwaway key is generated when
    /// omitted.
    #[arg(long = "sidechainkeystore")]
    sidechain_keystore: Option<PathBuf>,

    /// Test-only: emit transfer transitions with a zeroed post-state root.
    #[arg(long = "fraudtransfer")]
    fraud_transfer: bool,

    /// Run as validator instead of aggregator.
    #[arg(long = "validatormode")]
    validator_mode: bool,
}

fn initialize_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn load_signer(keystore: Option<&PathBuf>, chain: &str) -> anyhow::Result<BlockSigner> {
    match keystore {
        Some(path) => {
            let signer = BlockSigner::from_keystore(path, "")
                .with_context(|| format!("failed to open {chain} keystore"))?;
            tracing::info!(chain, address = ?signer.address(), "Loaded keystore");
            Ok(signer)
        }
        None => {
            let signer = BlockSigner::random();
            tracing::warn!(chain, address = ?signer.address(), "No keystore given, generated a throwaway key");
            Ok(signer)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    initialize_logging();
    let args = Args::parse();

    let config: NodeConfig = from_toml_path(args.config.join("config.toml"))
        .context("failed to read node configuration")?;
    tracing::info!(
        mainchain = %config.chain.mainchain_endpoint,
        sidechain = %config.chain.sidechain_endpoint,
        num_transitions_in_block = config.num_transitions_in_block,
        validator_mode = args.validator_mode,
        "Starting rollup node"
    );

    let mainchain_signer = load_signer(args.mainchain_keystore.as_ref(), "mainchain")?;
    let sidechain_signer = load_signer(args.sidechain_keystore.as_ref(), "sidechain")?;

    // The abstract KV engine is provisioned externally; the in-tree backend
    // is in-memory. The configured paths identify the stores to a real
    // engine adapter.
    tracing::info!(
        aggregator_db = %args.aggregator_db.display(),
        validator_db = %args.validator_db.display(),
        "Opening stores"
    );
    let aggregator_store: SharedStore = Arc::new(MemoryDb::new());
    let validator_store: SharedStore = Arc::new(MemoryDb::new());

    let chain = MockChain::new(MockChainConfig {
        committee: vec![sidechain_signer.address()],
        signature_threshold: config.signature_threshold,
        proposer: sidechain_signer.address(),
        committer: mainchain_signer.address(),
    });
    let settlement = Arc::new(chain.clone());
    let committee = Arc::new(chain);

    if args.validator_mode {
        let registries = vec![TokenRegistry::new(validator_store.clone())];
        let (ingestor, mut transactions) = EventIngestor::new(settlement.clone(), registries);
        // Validator mode consumes no transactions; drain the queue so the
        // token watchers never stall on a full channel.
        tokio::spawn(async move { while transactions.recv().await.is_some() {} });

        let state_machine = StateMachine::new(validator_store.clone(), VALIDATOR_TREE)?;
        let archive = BlockArchive::new(validator_store);
        let validator = Validator::new(
            settlement,
            state_machine,
            archive,
            mainchain_signer.address(),
        );

        tokio::select! {
            result = ingestor.run() => result.context("ingestor stopped"),
            result = validator.run() => result.context("validator stopped"),
        }
    } else {
        let registries = vec![
            TokenRegistry::new(aggregator_store.clone()),
            TokenRegistry::new(validator_store.clone()),
        ];
        let (ingestor, transactions) = EventIngestor::new(settlement.clone(), registries);

        let state_machine = StateMachine::new(aggregator_store, AGGREGATOR_TREE)?;
        let submitter = Arc::new(BlockSubmitter::new(
            settlement,
            committee,
            mainchain_signer,
            sidechain_signer,
        ));
        let aggregator = Aggregator::new(
            state_machine,
            transactions,
            submitter.clone(),
            config.num_transitions_in_block,
            args.fraud_transfer,
        );

        tokio::select! {
            result = ingestor.run() => result.context("ingestor stopped"),
            result = aggregator.run() => result.context("aggregator stopped"),
            result = submitter.run() => result.context("submitter stopped"),
        }
    }
}
