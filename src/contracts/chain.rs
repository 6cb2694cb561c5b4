use crate::error::{Error, Result};
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, TransactionReceipt, TransactionRequest, H256, U256, U64};
#[cfg(test)]
use mockall::automock;
use std::time::Duration;

/// Plain node reads plus native value transfers from the funding key.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainLike: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    async fn balance_of(&self, address: Address) -> Result<U256>;

    async fn code_at(&self, address: Address) -> Result<Bytes>;

    /// Sends `amount` wei to `to` and returns the transaction hash.
    async fn send_value(&self, to: Address, amount: U256) -> Result<H256>;

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>>;
}

#[async_trait]
impl<M> ChainLike for M
where
    M: Middleware + 'static,
    M::Error: 'static,
{
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.get_chainid().await.map_err(Error::network)?.as_u64())
    }

    async fn balance_of(&self, address: Address) -> Result<U256> {
        self.get_balance(address, None).await.map_err(Error::network)
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        self.get_code(address, None).await.map_err(Error::network)
    }

    async fn send_value(&self, to: Address, amount: U256) -> Result<H256> {
        let tx = TransactionRequest::new().to(to).value(amount);
        let pending = self.send_transaction(tx, None).await.map_err(Error::network)?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        self.get_transaction_receipt(tx_hash).await.map_err(Error::network)
    }
}

pub fn receipt_succeeded(receipt: &TransactionReceipt) -> bool {
    receipt.status == Some(U64::from(1))
}

/// Polls for a receipt until `timeout`. Transient poll errors are logged and
/// polling continues; running out of time yields `ConfirmationTimeout`.
pub async fn wait_for_receipt<C: ChainLike + ?Sized>(
    chain: &C,
    tx_hash: H256,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<TransactionReceipt> {
    let poll = async {
        loop {
            match chain.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return receipt,
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(tx = ?tx_hash, error = %err, "receipt poll error");
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| Error::ConfirmationTimeout {
            tx_hash,
            waited: timeout,
        })
}
