use crate::contracts::ENTRY_POINT_V08;
use crate::packing::pack_u128_pair;
use crate::sponsor::DEFAULT_PAYMASTER_NAME;
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

/// Deployment artifact written by the contract deployment tooling.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRaw {
    pub chain_id: u64,
    pub rpc: String,
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    #[serde(default)]
    pub entry_point: Option<String>,
    pub account_factory: String,
    #[serde(default)]
    pub paymaster: Option<String>,
    #[serde(default)]
    pub paymaster_name: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub vault: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub chain_id: u64,
    pub rpc_url: String,
    pub entry_point: Address,
    pub account_factory: Address,
    pub paymaster: Option<Address>,
    pub paymaster_name: String,
    pub token: Option<Address>,
    pub vault: Option<Address>,
}

pub fn load_deployment(path: &Path, rpc_override: Option<String>) -> Result<Deployment> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read deployment json at {}", path.display()))?;
    let raw: DeploymentRaw = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse deployment json at {}", path.display()))?;
    resolve(raw, rpc_override)
}

fn resolve(raw: DeploymentRaw, rpc_override: Option<String>) -> Result<Deployment> {
    let rpc_url = if let Some(rpc) = rpc_override {
        rpc
    } else if let Some(env_var) = raw.rpc_env_var.clone() {
        env::var(&env_var).unwrap_or(raw.rpc.clone())
    } else {
        raw.rpc.clone()
    };

    let entry_point = parse_addr(raw.entry_point.as_deref().unwrap_or(ENTRY_POINT_V08))
        .context("invalid entryPoint address")?;
    let account_factory =
        parse_addr(&raw.account_factory).context("invalid accountFactory address")?;
    let paymaster = parse_opt_addr(raw.paymaster.as_deref()).context("invalid paymaster address")?;
    let token = parse_opt_addr(raw.token.as_deref()).context("invalid token address")?;
    let vault = parse_opt_addr(raw.vault.as_deref()).context("invalid vault address")?;

    Ok(Deployment {
        chain_id: raw.chain_id,
        rpc_url,
        entry_point,
        account_factory,
        paymaster,
        paymaster_name: raw
            .paymaster_name
            .unwrap_or_else(|| DEFAULT_PAYMASTER_NAME.to_string()),
        token,
        vault,
    })
}

fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}

fn parse_opt_addr(s: Option<&str>) -> Result<Option<Address>> {
    s.map(parse_addr).transpose()
}

/// Caller-supplied gas limits and fees. There are no defaults; quantities
/// are JSON-RPC style hex strings when read from JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasConfig {
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
}

impl GasConfig {
    /// `verificationGasLimit ++ callGasLimit`.
    pub fn account_gas_limits(&self) -> crate::Result<[u8; 32]> {
        pack_u128_pair(self.verification_gas_limit, self.call_gas_limit)
    }

    /// `maxPriorityFeePerGas ++ maxFeePerGas`.
    pub fn gas_fees(&self) -> crate::Result<[u8; 32]> {
        pack_u128_pair(self.max_priority_fee_per_gas, self.max_fee_per_gas)
    }
}
