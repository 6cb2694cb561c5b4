//! Raw-digest signing.
//!
//! Both the account owner and the sponsor sign 32-byte digests without the
//! EIP-191 prefix: the account validates the entry point's userOpHash directly
//! and the sponsor validates an EIP-712 digest.

use crate::error::{Error, Result};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature, H256};

/// A signing identity threaded explicitly through the pipeline.
#[async_trait]
pub trait HashSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_digest(&self, digest: H256) -> Result<Signature>;
}

#[async_trait]
impl HashSigner for LocalWallet {
    fn address(&self) -> Address {
        Signer::address(self)
    }

    async fn sign_digest(&self, digest: H256) -> Result<Signature> {
        self.sign_hash(digest).map_err(|e| Error::Signing(e.to_string()))
    }
}

pub fn recover_signer(digest: H256, signature: &[u8]) -> Result<Address> {
    let signature = Signature::try_from(signature)
        .map_err(|e| Error::InvalidEncoding(format!("signature: {e}")))?;
    signature
        .recover(digest)
        .map_err(|e| Error::InvalidEncoding(format!("signature recovery: {e}")))
}

/// Signs `digest` and recovers the signer locally before handing the
/// signature out, so a misconfigured key fails before submission.
pub async fn sign_checked<S: HashSigner + ?Sized>(signer: &S, digest: H256) -> Result<Signature> {
    let signature = signer.sign_digest(digest).await?;
    let recovered = recover_signer(digest, &signature.to_vec())?;
    if recovered != signer.address() {
        return Err(Error::SignatureMismatch {
            expected: signer.address(),
            recovered,
        });
    }
    Ok(signature)
}
