use super::{EntryPoint, EntryPointLike};
use crate::error::{Error, Result};
use async_trait::async_trait;
use ethers::abi::AbiParser;
use ethers::contract::Contract;
use ethers::providers::Middleware;
use ethers::types::{Address, H256, U256};
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

/// A paymaster that sponsors gas from its entry point deposit.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SponsorLike: Send + Sync {
    fn address(&self) -> Address;

    /// The sponsor's deposit held by the entry point.
    async fn deposit_balance(&self) -> Result<U256>;

    /// Calls the payable `deposit()` with `amount` wei; returns the tx hash.
    async fn deposit(&self, amount: U256) -> Result<H256>;
}

pub struct Paymaster<M> {
    contract: Contract<M>,
    entry_point: EntryPoint<M>,
}

impl<M: Middleware + 'static> Paymaster<M> {
    pub fn new(address: Address, entry_point: Address, client: Arc<M>) -> Result<Self> {
        let abi = AbiParser::default()
            .parse(&["function deposit() payable"])
            .map_err(|e| Error::InvalidEncoding(format!("paymaster ABI: {e}")))?;
        Ok(Self {
            contract: Contract::new(address, abi, client.clone()),
            entry_point: EntryPoint::new(entry_point, client)?,
        })
    }
}

#[async_trait]
impl<M: Middleware + 'static> SponsorLike for Paymaster<M> {
    fn address(&self) -> Address {
        self.contract.address()
    }

    async fn deposit_balance(&self) -> Result<U256> {
        self.entry_point.balance_of(self.contract.address()).await
    }

    async fn deposit(&self, amount: U256) -> Result<H256> {
        let call = self
            .contract
            .method::<_, ()>("deposit", ())
            .map_err(|e| Error::InvalidEncoding(e.to_string()))?
            .value(amount);
        let pending = call.send().await.map_err(Error::network)?;
        Ok(pending.tx_hash())
    }
}
