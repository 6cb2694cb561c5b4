use crate::contracts::EntryPointLike;
use crate::error::{Error, Result};
use crate::retry::{with_retries, RetryOpts};
use ethers::types::{Address, U256};

/// Width of the entry point's nonce key (`uint192`).
const NONCE_KEY_BITS: usize = 192;

/// Reads `getNonce(account, key)`. The low 64 bits are the sequence for `key`.
pub async fn current_nonce<E: EntryPointLike + ?Sized>(
    entry_point: &E,
    account: Address,
    key: U256,
) -> Result<U256> {
    if key.bits() > NONCE_KEY_BITS {
        return Err(Error::ValueOutOfRange {
            value: key,
            width: NONCE_KEY_BITS / 8,
        });
    }
    let nonce = with_retries("read entry point nonce", RetryOpts::default(), || {
        entry_point.get_nonce(account, key)
    })
    .await?;
    tracing::debug!(account = ?account, key = %key, nonce = %nonce, "resolved nonce");
    Ok(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::MockEntryPointLike;

    #[tokio::test]
    async fn reads_nonce_for_key() {
        let mut entry_point = MockEntryPointLike::new();
        entry_point
            .expect_get_nonce()
            .withf(|sender, key| *sender == Address::repeat_byte(1) && key.is_zero())
            .returning(|_, _| Ok(U256::from(4u64)));

        let nonce = current_nonce(&entry_point, Address::repeat_byte(1), U256::zero())
            .await
            .unwrap();
        assert_eq!(nonce, U256::from(4u64));
    }

    #[tokio::test]
    async fn rejects_keys_wider_than_uint192() {
        let mut entry_point = MockEntryPointLike::new();
        entry_point.expect_get_nonce().never();

        let key = U256::one() << 192;
        assert!(matches!(
            current_nonce(&entry_point, Address::zero(), key).await,
            Err(Error::ValueOutOfRange { width: 24, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transport_errors() {
        let mut entry_point = MockEntryPointLike::new();
        let mut seq = mockall::Sequence::new();
        entry_point
            .expect_get_nonce()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(Error::NetworkUnavailable("timeout".into())));
        entry_point
            .expect_get_nonce()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(U256::from(9u64)));

        let nonce = current_nonce(&entry_point, Address::zero(), U256::zero())
            .await
            .unwrap();
        assert_eq!(nonce, U256::from(9u64));
    }
}
