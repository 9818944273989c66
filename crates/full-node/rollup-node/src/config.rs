//! Node configuration, loaded from a TOML file and overridden by CLI flags.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Addresses and endpoints of the external contracts the node talks to.
/// Consumed by the RPC adapters; the core only logs them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// Settlement-chain RPC endpoint.
    pub mainchain_endpoint: String,
    /// Proposal-chain RPC endpoint.
    pub sidechain_endpoint: String,
    /// `RollupChain` contract address.
    pub rollup_chain: String,
    /// `TokenRegistry` contract address.
    pub rollup_token_registry: String,
    /// `TokenMapper` contract address on the sidechain.
    pub token_mapper: String,
    /// `DepositWithdrawManager` contract address.
    pub deposit_withdraw_manager: String,
    /// `BlockCommittee` contract address on the proposal chain.
    pub block_committee: String,
}

/// Top-level node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Contract addresses and endpoints.
    pub chain: ChainConfig,
    /// Transitions per block before the aggregator hands off a proposal.
    pub num_transitions_in_block: usize,
    /// Committee signatures required for consensus.
    #[serde(default = "default_signature_threshold")]
    pub signature_threshold: usize,
}

const fn default_signature_threshold() -> usize {
    1
}

/// Reads a TOML file as a specific type.
pub fn from_toml_path<P: AsRef<Path>, R: DeserializeOwned>(path: P) -> anyhow::Result<R> {
    let mut contents = String::new();
    {
        let mut file = File::open(path)?;
        file.read_to_string(&mut contents)?;
    }
    tracing::debug!(size_in_bytes = contents.len(), "Parsing config file");
    let result: R = toml::from_str(&contents)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn config_parses_from_toml() {
        let toml = r#"
            numTransitionsInBlock = 2

            [chain]
            mainchainEndpoint = "ws://localhost:8546"
            sidechainEndpoint = "ws://localhost:8548"
            rollupChain = "0x0000000000000000000000000000000000000001"
            rollupTokenRegistry = "0x0000000000000000000000000000000000000002"
            tokenMapper = "0x0000000000000000000000000000000000000003"
            depositWithdrawManager = "0x0000000000000000000000000000000000000004"
            blockCommittee = "0x0000000000000000000000000000000000000005"
        "#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml.as_bytes()).unwrap();

        let config: NodeConfig = from_toml_path(file.path()).unwrap();
        assert_eq!(config.num_transitions_in_block, 2);
        assert_eq!(config.signature_threshold, 1);
        assert_eq!(config.chain.mainchain_endpoint, "ws://localhost:8546");
        assert_eq!(
            config.chain.block_committee,
            "0x0000000000000000000000000000000000000005"
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let result: anyhow::Result<NodeConfig> = from_toml_path("definitely/not/here.toml");
        assert!(result.is_err());
    }
}
