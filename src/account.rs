//! Counterfactual modular accounts: deterministic address prediction and the
//! `initCode` that deploys them.

use crate::contracts::AccountFactoryLike;
use crate::encoding::function_call;
use crate::error::{Error, Result};
use crate::retry::{with_retries, RetryOpts};
use ethers::abi::Token;
use ethers::types::{Address, Bytes, H256};
use ethers::utils::keccak256;

pub const CLONE_AND_INITIALIZE: &str =
    "function cloneAndInitialize(bytes32 salt, bytes callData) returns (address)";
pub const INITIALIZE_ECDSA: &str = "function initializeECDSA(address signer)";

pub fn salt_from_text(text: &str) -> H256 {
    H256::from(keccak256(text.as_bytes()))
}

/// Initializer run by the factory on the fresh clone for an ECDSA-owned account.
pub fn ecdsa_initializer(owner: Address) -> Result<Bytes> {
    function_call(INITIALIZE_ECDSA, &[Token::Address(owner)])
}

pub fn clone_and_initialize_call(salt: H256, init_payload: &Bytes) -> Result<Bytes> {
    function_call(
        CLONE_AND_INITIALIZE,
        &[
            Token::FixedBytes(salt.as_bytes().to_vec()),
            Token::Bytes(init_payload.to_vec()),
        ],
    )
}

/// The inputs that pin down an account address before it exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterfactualAccount {
    pub factory: Address,
    pub salt: H256,
    pub init_payload: Bytes,
}

impl CounterfactualAccount {
    pub fn new(factory: Address, salt: H256, init_payload: Bytes) -> Self {
        Self {
            factory,
            salt,
            init_payload,
        }
    }

    pub fn ecdsa(factory: Address, salt: H256, owner: Address) -> Result<Self> {
        Ok(Self::new(factory, salt, ecdsa_initializer(owner)?))
    }

    /// `factory ++ cloneAndInitialize(salt, initPayload)`.
    pub fn init_code(&self) -> Result<Bytes> {
        let call = clone_and_initialize_call(self.salt, &self.init_payload)?;
        let mut out = Vec::with_capacity(20 + call.len());
        out.extend_from_slice(self.factory.as_bytes());
        out.extend_from_slice(&call);
        Ok(out.into())
    }

    /// Asks the factory for the deployment address. Read-only, so transient
    /// transport failures are retried.
    pub async fn predict<F: AccountFactoryLike + ?Sized>(&self, factory: &F) -> Result<Address> {
        if factory.address() != self.factory {
            return Err(Error::FactoryQueryFailed(format!(
                "factory handle {:?} does not match account factory {:?}",
                factory.address(),
                self.factory
            )));
        }
        let account = with_retries("predict account address", RetryOpts::default(), || {
            factory.predict_address(self.salt, self.init_payload.clone())
        })
        .await?;
        tracing::debug!(
            factory = ?self.factory,
            salt = ?self.salt,
            account = ?account,
            "predicted account address"
        );
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::MockAccountFactoryLike;
    use crate::testing::Sim;

    fn account() -> CounterfactualAccount {
        CounterfactualAccount::ecdsa(
            Address::repeat_byte(0xfa),
            salt_from_text("salt"),
            Address::repeat_byte(0x0e),
        )
        .unwrap()
    }

    #[test]
    fn init_code_is_factory_then_clone_call() {
        let acct = account();
        let init_code = acct.init_code().unwrap();
        assert_eq!(&init_code[..20], acct.factory.as_bytes());
        assert_eq!(
            &init_code[20..24],
            &ethers::utils::id("cloneAndInitialize(bytes32,bytes)")[..]
        );
        assert_eq!(&init_code[24..56], acct.salt.as_bytes());
    }

    #[test]
    fn ecdsa_initializer_embeds_owner() {
        let payload = ecdsa_initializer(Address::repeat_byte(0x0e)).unwrap();
        assert_eq!(&payload[..4], &ethers::utils::id("initializeECDSA(address)")[..]);
        assert_eq!(&payload[16..36], Address::repeat_byte(0x0e).as_bytes());
    }

    #[tokio::test]
    async fn prediction_is_deterministic() {
        let sim = Sim::new();
        let factory = sim.factory();
        let acct = CounterfactualAccount::ecdsa(
            crate::contracts::AccountFactoryLike::address(&factory),
            salt_from_text("salt"),
            Address::repeat_byte(0x0e),
        )
        .unwrap();

        let first = acct.predict(&factory).await.unwrap();
        for _ in 0..5 {
            assert_eq!(acct.predict(&factory).await.unwrap(), first);
        }

        let other_owner = CounterfactualAccount::ecdsa(
            acct.factory,
            acct.salt,
            Address::repeat_byte(0x0f),
        )
        .unwrap();
        assert_ne!(other_owner.predict(&factory).await.unwrap(), first);
    }

    #[tokio::test]
    async fn factory_failure_is_not_retried() {
        let mut factory = MockAccountFactoryLike::new();
        factory.expect_address().return_const(Address::repeat_byte(0xfa));
        factory
            .expect_predict_address()
            .times(1)
            .returning(|_, _| Err(Error::FactoryQueryFailed("no code at factory".into())));

        assert!(matches!(
            account().predict(&factory).await,
            Err(Error::FactoryQueryFailed(_))
        ));
    }

    #[tokio::test]
    async fn mismatched_factory_handle_is_rejected() {
        let mut factory = MockAccountFactoryLike::new();
        factory.expect_address().return_const(Address::repeat_byte(0x01));
        factory.expect_predict_address().never();

        assert!(matches!(
            account().predict(&factory).await,
            Err(Error::FactoryQueryFailed(_))
        ));
    }
}
