//! Forward-only construction of a signed user operation.
//!
//! ```text
//! Draft -> AddressResolved -> Funded -> CallDataSet -> NonceResolved
//!       -> InitCodeResolved -> [SponsorshipResolved] -> Hashed -> Signed
//! ```
//!
//! Each step consumes the builder and returns the next state, so a step that
//! fails drops the partial record with it. Hashing is only available once the
//! nonce and initCode are resolved, and the signed record is read-only.

use crate::account::CounterfactualAccount;
use crate::batch::{execute_call_data, Call};
use crate::config::GasConfig;
use crate::contracts::{AccountFactoryLike, ChainLike, EntryPointLike};
use crate::error::Result;
use crate::funding::{ensure_funded, FundingOutcome, FundingPolicy};
use crate::nonce::current_nonce;
use crate::packing::ExecutionMode;
use crate::retry::{with_retries, RetryOpts};
use crate::signer::{sign_checked, HashSigner};
use crate::sponsor::{PaymasterGasConfig, SponsorshipAuthorizer, ValidityWindow};
use crate::types::PackedUserOperation;
use ethers::types::{Address, Bytes, H256, U256};

pub struct Draft;
pub struct AddressResolved;
pub struct Funded;
pub struct CallDataSet;
pub struct NonceResolved;
pub struct InitCodeResolved;
pub struct SponsorshipResolved;

/// States whose record is fully shaped and may be hashed.
pub trait ReadyToHash {}
impl ReadyToHash for InitCodeResolved {}
impl ReadyToHash for SponsorshipResolved {}

pub struct OperationBuilder<S> {
    account: CounterfactualAccount,
    op: PackedUserOperation,
    _state: S,
}

impl<S> OperationBuilder<S> {
    pub fn op(&self) -> &PackedUserOperation {
        &self.op
    }

    pub fn account(&self) -> &CounterfactualAccount {
        &self.account
    }

    fn into_state<T>(self, state: T) -> OperationBuilder<T> {
        OperationBuilder {
            account: self.account,
            op: self.op,
            _state: state,
        }
    }
}

impl OperationBuilder<Draft> {
    /// Starts a record for `account` with packed gas fields.
    pub fn new(account: CounterfactualAccount, gas: &GasConfig) -> Result<Self> {
        let op = PackedUserOperation {
            account_gas_limits: gas.account_gas_limits()?,
            pre_verification_gas: gas.pre_verification_gas,
            gas_fees: gas.gas_fees()?,
            ..Default::default()
        };
        Ok(Self {
            account,
            op,
            _state: Draft,
        })
    }

    pub async fn resolve_address<F: AccountFactoryLike + ?Sized>(
        mut self,
        factory: &F,
    ) -> Result<OperationBuilder<AddressResolved>> {
        self.op.sender = self.account.predict(factory).await?;
        tracing::info!(sender = ?self.op.sender, "sender resolved");
        Ok(self.into_state(AddressResolved))
    }
}

impl OperationBuilder<AddressResolved> {
    pub fn sender(&self) -> Address {
        self.op.sender
    }

    /// Self-funded flow: the sender pays its own prefund.
    pub async fn fund<C: ChainLike + ?Sized>(
        self,
        chain: &C,
        policy: &FundingPolicy,
    ) -> Result<(OperationBuilder<Funded>, FundingOutcome)> {
        let outcome = ensure_funded(chain, self.op.sender, policy).await?;
        Ok((self.into_state(Funded), outcome))
    }

    /// Sponsored flow: the paymaster pays, no native balance is needed.
    pub fn skip_funding(self) -> OperationBuilder<Funded> {
        self.into_state(Funded)
    }
}

impl OperationBuilder<Funded> {
    /// Sets callData to the account's `execute(mode, calls)`.
    pub fn call_data(self, mode: &ExecutionMode, calls: &[Call]) -> OperationBuilder<CallDataSet> {
        self.raw_call_data(execute_call_data(mode, calls))
    }

    pub fn raw_call_data(mut self, call_data: Bytes) -> OperationBuilder<CallDataSet> {
        self.op.call_data = call_data;
        self.into_state(CallDataSet)
    }
}

impl OperationBuilder<CallDataSet> {
    pub async fn resolve_nonce<E: EntryPointLike + ?Sized>(
        mut self,
        entry_point: &E,
        key: U256,
    ) -> Result<OperationBuilder<NonceResolved>> {
        self.op.nonce = current_nonce(entry_point, self.op.sender, key).await?;
        tracing::info!(sender = ?self.op.sender, nonce = %self.op.nonce, "nonce resolved");
        Ok(self.into_state(NonceResolved))
    }

    /// Nonce read and deployment probe issued concurrently.
    pub async fn resolve_nonce_and_init_code<E, C>(
        mut self,
        entry_point: &E,
        chain: &C,
        key: U256,
    ) -> Result<OperationBuilder<InitCodeResolved>>
    where
        E: EntryPointLike + ?Sized,
        C: ChainLike + ?Sized,
    {
        let (nonce, deployed) = tokio::try_join!(
            current_nonce(entry_point, self.op.sender, key),
            is_deployed(chain, self.op.sender),
        )?;
        self.op.nonce = nonce;
        self.op.init_code = init_code_for(&self.account, deployed)?;
        tracing::info!(
            sender = ?self.op.sender,
            nonce = %self.op.nonce,
            deployed,
            "nonce and initCode resolved"
        );
        Ok(self.into_state(InitCodeResolved))
    }
}

impl OperationBuilder<NonceResolved> {
    /// Sets initCode when the sender has no code; forces it empty otherwise.
    pub async fn resolve_init_code<C: ChainLike + ?Sized>(
        mut self,
        chain: &C,
    ) -> Result<OperationBuilder<InitCodeResolved>> {
        let deployed = is_deployed(chain, self.op.sender).await?;
        self.op.init_code = init_code_for(&self.account, deployed)?;
        tracing::info!(sender = ?self.op.sender, deployed, "initCode resolved");
        Ok(self.into_state(InitCodeResolved))
    }
}

async fn is_deployed<C: ChainLike + ?Sized>(chain: &C, account: Address) -> Result<bool> {
    let code = with_retries("probe account code", RetryOpts::default(), || {
        chain.code_at(account)
    })
    .await?;
    Ok(!code.is_empty())
}

fn init_code_for(account: &CounterfactualAccount, deployed: bool) -> Result<Bytes> {
    if deployed {
        Ok(Bytes::new())
    } else {
        account.init_code()
    }
}

impl OperationBuilder<InitCodeResolved> {
    /// Attaches the sponsor's authorization. Must come after every field the
    /// sponsor signs over is final.
    pub async fn sponsor<S: HashSigner + ?Sized>(
        mut self,
        authorizer: &SponsorshipAuthorizer<'_, S>,
        gas: PaymasterGasConfig,
        window: ValidityWindow,
        now: u64,
    ) -> Result<OperationBuilder<SponsorshipResolved>> {
        let subfield = authorizer.authorize(&self.op, gas, window, now).await?;
        self.op.paymaster_and_data = subfield.encode()?;
        Ok(self.into_state(SponsorshipResolved))
    }
}

impl<S: ReadyToHash> OperationBuilder<S> {
    /// Asks the entry point for the hash of the record as it stands. Not
    /// retried: a new attempt has to go through the builder again.
    pub async fn hash<E: EntryPointLike + ?Sized>(
        self,
        entry_point: &E,
    ) -> Result<HashedOperation> {
        let user_op_hash = entry_point.get_user_op_hash(&self.op).await?;
        tracing::info!(sender = ?self.op.sender, user_op_hash = ?user_op_hash, "record hashed");
        Ok(HashedOperation {
            op: self.op,
            user_op_hash,
        })
    }
}

/// A fully shaped record and the entry point's hash of it.
#[derive(Clone, Debug)]
pub struct HashedOperation {
    op: PackedUserOperation,
    user_op_hash: H256,
}

impl HashedOperation {
    pub fn op(&self) -> &PackedUserOperation {
        &self.op
    }

    pub fn user_op_hash(&self) -> H256 {
        self.user_op_hash
    }

    /// Signs the raw userOpHash with the account owner's key.
    pub async fn sign<S: HashSigner + ?Sized>(mut self, owner: &S) -> Result<SignedOperation> {
        let signature = sign_checked(owner, self.user_op_hash).await?;
        self.op.signature = signature.to_vec().into();
        Ok(SignedOperation {
            op: self.op,
            user_op_hash: self.user_op_hash,
        })
    }
}

/// Terminal, immutable record ready for `handleOps`.
#[derive(Clone, Debug)]
pub struct SignedOperation {
    op: PackedUserOperation,
    user_op_hash: H256,
}

impl SignedOperation {
    pub fn op(&self) -> &PackedUserOperation {
        &self.op
    }

    pub fn user_op_hash(&self) -> H256 {
        self.user_op_hash
    }

    pub fn into_inner(self) -> PackedUserOperation {
        self.op
    }
}
