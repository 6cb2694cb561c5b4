use crate::error::{Error, Result};
use crate::types::PackedUserOperation;
use async_trait::async_trait;
use ethers::abi::{self, Abi, ParamType, Token};
use ethers::contract::{Contract, ContractError};
use ethers::providers::Middleware;
use ethers::types::{Address, H256, U256};
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

/// Canonical EntryPoint v0.8 deployment.
pub const ENTRY_POINT_V08: &str = "0x4337084D9E255Ff0702461CF8895CE9E3b5Ff108";

/// Coordinator surface consumed by the pipeline.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EntryPointLike: Send + Sync {
    fn address(&self) -> Address;

    async fn get_nonce(&self, sender: Address, key: U256) -> Result<U256>;

    /// The coordinator's hash of the exact record; never computed locally.
    async fn get_user_op_hash(&self, op: &PackedUserOperation) -> Result<H256>;

    /// Sends `handleOps` and returns the transaction hash without waiting.
    async fn handle_ops(
        &self,
        ops: Vec<PackedUserOperation>,
        beneficiary: Address,
    ) -> Result<H256>;

    /// Deposit held by the entry point on behalf of `account`.
    async fn balance_of(&self, account: Address) -> Result<U256>;
}

fn packed_user_op_components() -> serde_json::Value {
    let field =
        |name: &str, ty: &str| serde_json::json!({ "name": name, "type": ty, "internalType": ty });
    serde_json::json!([
        field("sender", "address"),
        field("nonce", "uint256"),
        field("initCode", "bytes"),
        field("callData", "bytes"),
        field("accountGasLimits", "bytes32"),
        field("preVerificationGas", "uint256"),
        field("gasFees", "bytes32"),
        field("paymasterAndData", "bytes"),
        field("signature", "bytes"),
    ])
}

fn entry_point_abi() -> Result<Abi> {
    let components = packed_user_op_components();
    let abi = serde_json::json!([
        {
            "type": "function",
            "name": "getUserOpHash",
            "stateMutability": "view",
            "inputs": [{
                "name": "userOp",
                "type": "tuple",
                "internalType": "struct PackedUserOperation",
                "components": components.clone(),
            }],
            "outputs": [{ "name": "", "type": "bytes32", "internalType": "bytes32" }],
        },
        {
            "type": "function",
            "name": "handleOps",
            "stateMutability": "nonpayable",
            "inputs": [
                {
                    "name": "ops",
                    "type": "tuple[]",
                    "internalType": "struct PackedUserOperation[]",
                    "components": components,
                },
                { "name": "beneficiary", "type": "address", "internalType": "address payable" },
            ],
            "outputs": [],
        },
        {
            "type": "function",
            "name": "getNonce",
            "stateMutability": "view",
            "inputs": [
                { "name": "sender", "type": "address", "internalType": "address" },
                { "name": "key", "type": "uint192", "internalType": "uint192" },
            ],
            "outputs": [{ "name": "nonce", "type": "uint256", "internalType": "uint256" }],
        },
        {
            "type": "function",
            "name": "balanceOf",
            "stateMutability": "view",
            "inputs": [{ "name": "account", "type": "address", "internalType": "address" }],
            "outputs": [{ "name": "", "type": "uint256", "internalType": "uint256" }],
        },
    ]);
    serde_json::from_value(abi)
        .map_err(|e| Error::InvalidEncoding(format!("EntryPoint ABI: {e}")))
}

pub struct EntryPoint<M> {
    contract: Contract<M>,
}

impl<M: Middleware + 'static> EntryPoint<M> {
    pub fn new(address: Address, client: Arc<M>) -> Result<Self> {
        Ok(Self {
            contract: Contract::new(address, entry_point_abi()?, client),
        })
    }
}

#[async_trait]
impl<M: Middleware + 'static> EntryPointLike for EntryPoint<M> {
    fn address(&self) -> Address {
        self.contract.address()
    }

    async fn get_nonce(&self, sender: Address, key: U256) -> Result<U256> {
        self.contract
            .method::<_, U256>("getNonce", (sender, key))
            .map_err(|e| Error::InvalidEncoding(e.to_string()))?
            .call()
            .await
            .map_err(Error::network)
    }

    async fn get_user_op_hash(&self, op: &PackedUserOperation) -> Result<H256> {
        self.contract
            .method::<_, H256>("getUserOpHash", (op.as_abi_token(),))
            .map_err(|e| Error::InvalidEncoding(e.to_string()))?
            .call()
            .await
            .map_err(Error::network)
    }

    async fn handle_ops(
        &self,
        ops: Vec<PackedUserOperation>,
        beneficiary: Address,
    ) -> Result<H256> {
        let ops = Token::Array(ops.iter().map(PackedUserOperation::as_abi_token).collect());
        let call = self
            .contract
            .method::<_, ()>("handleOps", (ops, beneficiary))
            .map_err(|e| Error::InvalidEncoding(e.to_string()))?;

        // Without an explicit gas limit the send estimates first, so a failing
        // op surfaces here as a FailedOp revert.
        let sent = call.send().await;
        match sent {
            Ok(pending) => Ok(pending.tx_hash()),
            Err(ContractError::Revert(data)) => Err(revert_to_error(&data)),
            Err(err) => Err(Error::network(err)),
        }
    }

    async fn balance_of(&self, account: Address) -> Result<U256> {
        self.contract
            .method::<_, U256>("balanceOf", account)
            .map_err(|e| Error::InvalidEncoding(e.to_string()))?
            .call()
            .await
            .map_err(Error::network)
    }
}

/// Decodes `FailedOp(uint256,string)` / `FailedOpWithRevert(uint256,string,bytes)`.
pub fn decode_failed_op(data: &[u8]) -> Option<(usize, String)> {
    if data.len() < 4 {
        return None;
    }
    let (selector, args) = data.split_at(4);
    let params = if selector == &ethers::utils::id("FailedOp(uint256,string)")[..] {
        vec![ParamType::Uint(256), ParamType::String]
    } else if selector == &ethers::utils::id("FailedOpWithRevert(uint256,string,bytes)")[..] {
        vec![ParamType::Uint(256), ParamType::String, ParamType::Bytes]
    } else {
        return None;
    };
    let tokens = abi::decode(&params, args).ok()?;
    match tokens.as_slice() {
        [Token::Uint(index), Token::String(reason), ..] => {
            Some((index.low_u64() as usize, reason.clone()))
        }
        _ => None,
    }
}

/// Maps entry point `AAxx` failure codes onto the error taxonomy. Reasons are
/// kept verbatim.
pub fn classify_failed_op(index: usize, reason: String) -> Error {
    if reason.starts_with("AA32") {
        Error::SponsorshipWindowRejected(format!("op {index}: {reason}"))
    } else if reason.starts_with("AA34") {
        Error::SponsorshipSignatureRejected(format!("op {index}: {reason}"))
    } else if reason.starts_with("AA25") {
        Error::NonceStale(format!("op {index}: {reason}"))
    } else {
        Error::SubmissionReverted {
            index: Some(index),
            reason,
        }
    }
}

pub fn revert_to_error(data: &[u8]) -> Error {
    match decode_failed_op(data) {
        Some((index, reason)) => classify_failed_op(index, reason),
        None => Error::SubmissionReverted {
            index: None,
            reason: format!("0x{}", hex::encode(data)),
        },
    }
}
