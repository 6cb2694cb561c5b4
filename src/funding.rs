use crate::contracts::{receipt_succeeded, wait_for_receipt, ChainLike, SponsorLike};
use crate::error::{Error, Result};
use crate::retry::{with_retries, RetryOpts};
use ethers::types::{Address, H256, U256};
use ethers::utils::parse_ether;
use std::time::Duration;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Native balance bootstrap for a counterfactual account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FundingPolicy {
    /// Sent once, and only while the account holds nothing.
    pub funding_amount: U256,
    pub confirmation_timeout: Duration,
}

impl FundingPolicy {
    /// Fund with 0.0005 ETH when the account holds nothing.
    pub fn bootstrap(confirmation_timeout: Duration) -> Result<Self> {
        Ok(Self {
            funding_amount: ether("0.0005")?,
            confirmation_timeout,
        })
    }
}

fn ether(amount: &str) -> Result<U256> {
    parse_ether(amount).map_err(|e| Error::InvalidEncoding(format!("ether amount {amount}: {e}")))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FundingOutcome {
    AlreadyFunded { balance: U256 },
    Funded { tx_hash: H256, balance: U256 },
}

/// Funds `account` from the chain client's funding key when its balance is
/// zero, waiting for the transfer to land. Any nonzero balance is left alone,
/// so repeated calls never double-fund.
pub async fn ensure_funded<C: ChainLike + ?Sized>(
    chain: &C,
    account: Address,
    policy: &FundingPolicy,
) -> Result<FundingOutcome> {
    let balance = read_balance(chain, account).await?;
    if !balance.is_zero() {
        tracing::debug!(account = ?account, balance = %balance, "account already funded");
        return Ok(FundingOutcome::AlreadyFunded { balance });
    }
    if policy.funding_amount.is_zero() {
        return Err(Error::InsufficientPrefund {
            account,
            reason: "account is empty and funding amount is zero".to_string(),
        });
    }

    tracing::info!(account = ?account, amount = %policy.funding_amount, "funding account");
    let tx_hash = chain
        .send_value(account, policy.funding_amount)
        .await
        .map_err(|e| Error::InsufficientPrefund {
            account,
            reason: format!("funding transfer failed: {e}"),
        })?;
    let receipt = wait_for_receipt(
        chain,
        tx_hash,
        policy.confirmation_timeout,
        RECEIPT_POLL_INTERVAL,
    )
    .await?;
    if !receipt_succeeded(&receipt) {
        return Err(Error::InsufficientPrefund {
            account,
            reason: format!("funding transfer {tx_hash:?} reverted"),
        });
    }

    let balance = read_balance(chain, account).await?;
    if balance.is_zero() {
        return Err(Error::InsufficientPrefund {
            account,
            reason: format!("balance still zero after funding transfer {tx_hash:?}"),
        });
    }
    tracing::info!(account = ?account, tx = ?tx_hash, balance = %balance, "account funded");
    Ok(FundingOutcome::Funded { tx_hash, balance })
}

async fn read_balance<C: ChainLike + ?Sized>(chain: &C, account: Address) -> Result<U256> {
    with_retries("read account balance", RetryOpts::default(), || {
        chain.balance_of(account)
    })
    .await
}

/// Default sponsor deposit placed with the entry point.
pub fn default_sponsor_deposit() -> Result<U256> {
    ether("0.01")
}

/// Deposits `amount` for the sponsor when its entry point deposit is empty.
/// Returns the deposit transaction hash, or `None` if nothing was needed.
pub async fn ensure_sponsor_deposit<S, C>(
    sponsor: &S,
    chain: &C,
    amount: U256,
    timeout: Duration,
) -> Result<Option<H256>>
where
    S: SponsorLike + ?Sized,
    C: ChainLike + ?Sized,
{
    let deposit = with_retries("read sponsor deposit", RetryOpts::default(), || {
        sponsor.deposit_balance()
    })
    .await?;
    if !deposit.is_zero() {
        tracing::debug!(
            paymaster = ?sponsor.address(),
            deposit = %deposit,
            "sponsor deposit present"
        );
        return Ok(None);
    }

    tracing::info!(paymaster = ?sponsor.address(), amount = %amount, "depositing for sponsor");
    let tx_hash = sponsor.deposit(amount).await?;
    let receipt = wait_for_receipt(chain, tx_hash, timeout, RECEIPT_POLL_INTERVAL).await?;
    if !receipt_succeeded(&receipt) {
        return Err(Error::SubmissionReverted {
            index: None,
            reason: format!("sponsor deposit {tx_hash:?} reverted"),
        });
    }
    Ok(Some(tx_hash))
}
