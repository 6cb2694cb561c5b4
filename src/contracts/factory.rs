use crate::error::{Error, Result};
use async_trait::async_trait;
use ethers::abi::AbiParser;
use ethers::contract::{Contract, ContractError};
use ethers::providers::{Middleware, MiddlewareError, RpcError};
use ethers::types::{Address, Bytes, H256};
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

/// Clone factory for modular accounts.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccountFactoryLike: Send + Sync {
    fn address(&self) -> Address;

    /// Read-only, deterministic prediction of the account deployed by
    /// `cloneAndInitialize(salt, init_payload)`.
    async fn predict_address(&self, salt: H256, init_payload: Bytes) -> Result<Address>;
}

pub struct AccountFactory<M> {
    contract: Contract<M>,
}

impl<M: Middleware + 'static> AccountFactory<M> {
    pub fn new(address: Address, client: Arc<M>) -> Result<Self> {
        let abi = AbiParser::default()
            .parse(&[
                "function predictAddress(bytes32 salt, bytes callData) view returns (address, bytes32)",
            ])
            .map_err(|e| Error::InvalidEncoding(format!("factory ABI: {e}")))?;
        Ok(Self {
            contract: Contract::new(address, abi, client),
        })
    }
}

#[async_trait]
impl<M: Middleware + 'static> AccountFactoryLike for AccountFactory<M> {
    fn address(&self) -> Address {
        self.contract.address()
    }

    async fn predict_address(&self, salt: H256, init_payload: Bytes) -> Result<Address> {
        let result = self
            .contract
            .method::<_, (Address, H256)>("predictAddress", (salt, init_payload))
            .map_err(|e| Error::FactoryQueryFailed(e.to_string()))?
            .call()
            .await;

        match result {
            Ok((account, _salted)) => Ok(account),
            Err(err) => Err(factory_error(self.contract.address(), err)),
        }
    }
}

/// Only transport failures are retryable. Reverts, JSON-RPC error responses
/// (a revert without data arrives as one) and empty return data from a
/// factory without code all mean the query itself failed.
fn factory_error<M: Middleware>(factory: Address, err: ContractError<M>) -> Error {
    let transport = match &err {
        ContractError::MiddlewareError { e } => MiddlewareError::as_error_response(e).is_none(),
        ContractError::ProviderError { e } => RpcError::as_error_response(e).is_none(),
        _ => false,
    };
    if transport {
        Error::network(err)
    } else {
        Error::FactoryQueryFailed(format!("factory {factory:?}: {err}"))
    }
}
