//! Time-windowed sponsorship from an ECDSA-signing paymaster.
//!
//! The sponsor signs an EIP-712 `UserOperationRequest` covering every field
//! of the operation that affects what it pays for, bound to a validity window.
//! The resulting `paymasterAndData` is
//!
//! ```text
//! | paymaster (20) | pmVerificationGas (16) | pmPostOpGas (16) | validAfter (6) | validUntil (6) | signature |
//! ```
//!
//! and is itself covered by the entry point's userOpHash, so authorization
//! has to happen before the owner signs.

use crate::error::{Error, Result};
use crate::packing::{pack_uint, UINT128_BYTES, UINT48_BYTES};
use crate::signer::{recover_signer, sign_checked, HashSigner};
use crate::types::PackedUserOperation;
use ethers::abi::{self, Token};
use ethers::types::transaction::eip712::{EIP712Domain, Eip712};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_PAYMASTER_NAME: &str = "MyPaymasterECDSASigner";
pub const SPONSORSHIP_DOMAIN_VERSION: &str = "1";

const USER_OPERATION_REQUEST_TYPE: &str = "UserOperationRequest(address sender,uint256 nonce,bytes initCode,bytes callData,bytes32 accountGasLimits,uint256 preVerificationGas,bytes32 gasFees,uint256 paymasterVerificationGasLimit,uint256 paymasterPostOpGasLimit,uint48 validAfter,uint48 validUntil)";

const UINT48_MAX: u64 = (1 << 48) - 1;

/// Fixed-size prefix of the subfield, before the signature.
const SUBFIELD_HEADER_BYTES: usize = 20 + 2 * UINT128_BYTES + 2 * UINT48_BYTES;

pub const DEFAULT_VALID_BEFORE: Duration = Duration::from_secs(60);
pub const DEFAULT_VALID_FOR: Duration = Duration::from_secs(3600);

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Inclusive `[valid_after, valid_until]` range of unix seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidityWindow {
    pub valid_after: u64,
    pub valid_until: u64,
}

impl ValidityWindow {
    pub fn new(valid_after: u64, valid_until: u64) -> Result<Self> {
        for bound in [valid_after, valid_until] {
            if bound > UINT48_MAX {
                return Err(Error::ValueOutOfRange {
                    value: bound.into(),
                    width: UINT48_BYTES,
                });
            }
        }
        if valid_after > valid_until {
            return Err(Error::SponsorshipWindowRejected(format!(
                "validAfter {valid_after} is later than validUntil {valid_until}"
            )));
        }
        Ok(Self {
            valid_after,
            valid_until,
        })
    }

    /// `[now - before, now + after]`.
    pub fn around(now: u64, before: Duration, after: Duration) -> Result<Self> {
        Self::new(
            now.saturating_sub(before.as_secs()),
            now.saturating_add(after.as_secs()),
        )
    }

    pub fn contains(&self, now: u64) -> bool {
        self.valid_after <= now && now <= self.valid_until
    }

    pub fn check(&self, now: u64) -> Result<()> {
        if self.contains(now) {
            Ok(())
        } else {
            Err(Error::SponsorshipWindowRejected(format!(
                "now {now} outside [{}, {}]",
                self.valid_after, self.valid_until
            )))
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterGasConfig {
    pub verification_gas_limit: U256,
    pub post_op_gas_limit: U256,
}

/// EIP-712 domain of the sponsor contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SponsorshipDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl SponsorshipDomain {
    pub fn new(name: impl Into<String>, chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            name: name.into(),
            version: SPONSORSHIP_DOMAIN_VERSION.to_string(),
            chain_id,
            verifying_contract,
        }
    }

    fn eip712(&self) -> EIP712Domain {
        EIP712Domain {
            name: Some(self.name.clone()),
            version: Some(self.version.clone()),
            chain_id: Some(self.chain_id.into()),
            verifying_contract: Some(self.verifying_contract),
            salt: None,
        }
    }
}

/// The typed message the sponsor signs.
#[derive(Clone, Debug)]
pub struct SponsorshipRequest {
    domain: SponsorshipDomain,
    sender: Address,
    nonce: U256,
    init_code: Bytes,
    call_data: Bytes,
    account_gas_limits: [u8; 32],
    pre_verification_gas: U256,
    gas_fees: [u8; 32],
    gas: PaymasterGasConfig,
    window: ValidityWindow,
}

impl SponsorshipRequest {
    pub fn new(
        domain: &SponsorshipDomain,
        op: &PackedUserOperation,
        gas: PaymasterGasConfig,
        window: ValidityWindow,
    ) -> Self {
        Self {
            domain: domain.clone(),
            sender: op.sender,
            nonce: op.nonce,
            init_code: op.init_code.clone(),
            call_data: op.call_data.clone(),
            account_gas_limits: op.account_gas_limits,
            pre_verification_gas: op.pre_verification_gas,
            gas_fees: op.gas_fees,
            gas,
            window,
        }
    }

    pub fn digest(&self) -> Result<H256> {
        self.encode_eip712().map(H256::from)
    }
}

impl Eip712 for SponsorshipRequest {
    type Error = Error;

    fn domain(&self) -> Result<EIP712Domain> {
        Ok(self.domain.eip712())
    }

    fn type_hash() -> Result<[u8; 32]> {
        Ok(keccak256(USER_OPERATION_REQUEST_TYPE))
    }

    fn struct_hash(&self) -> Result<[u8; 32]> {
        // Dynamic `bytes` members are encoded as their keccak256.
        let encoded = abi::encode(&[
            Token::FixedBytes(Self::type_hash()?.to_vec()),
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::FixedBytes(self.account_gas_limits.to_vec()),
            Token::Uint(self.pre_verification_gas),
            Token::FixedBytes(self.gas_fees.to_vec()),
            Token::Uint(self.gas.verification_gas_limit),
            Token::Uint(self.gas.post_op_gas_limit),
            Token::Uint(self.window.valid_after.into()),
            Token::Uint(self.window.valid_until.into()),
        ]);
        Ok(keccak256(encoded))
    }
}

/// Decoded `paymasterAndData`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SponsorshipSubfield {
    pub paymaster: Address,
    pub gas: PaymasterGasConfig,
    pub window: ValidityWindow,
    pub signature: Bytes,
}

impl SponsorshipSubfield {
    pub fn encode(&self) -> Result<Bytes> {
        let mut out = Vec::with_capacity(SUBFIELD_HEADER_BYTES + self.signature.len());
        out.extend_from_slice(self.paymaster.as_bytes());
        out.extend(pack_uint(self.gas.verification_gas_limit, UINT128_BYTES)?);
        out.extend(pack_uint(self.gas.post_op_gas_limit, UINT128_BYTES)?);
        out.extend(pack_uint(self.window.valid_after.into(), UINT48_BYTES)?);
        out.extend(pack_uint(self.window.valid_until.into(), UINT48_BYTES)?);
        out.extend_from_slice(&self.signature);
        Ok(out.into())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < SUBFIELD_HEADER_BYTES {
            return Err(Error::InvalidEncoding(format!(
                "paymasterAndData is {} bytes, need at least {SUBFIELD_HEADER_BYTES}",
                data.len()
            )));
        }
        let (paymaster, rest) = data.split_at(20);
        let (pm_verification, rest) = rest.split_at(UINT128_BYTES);
        let (pm_post_op, rest) = rest.split_at(UINT128_BYTES);
        let (valid_after, rest) = rest.split_at(UINT48_BYTES);
        let (valid_until, signature) = rest.split_at(UINT48_BYTES);

        let window = ValidityWindow {
            valid_after: U256::from_big_endian(valid_after).as_u64(),
            valid_until: U256::from_big_endian(valid_until).as_u64(),
        };
        Ok(Self {
            paymaster: Address::from_slice(paymaster),
            gas: PaymasterGasConfig {
                verification_gas_limit: U256::from_big_endian(pm_verification),
                post_op_gas_limit: U256::from_big_endian(pm_post_op),
            },
            window,
            signature: signature.to_vec().into(),
        })
    }
}

/// Re-derives the sponsorship digest from a finished record and checks the
/// window and the sponsor's signature, the way the paymaster contract does.
pub fn verify_sponsorship(
    domain: &SponsorshipDomain,
    op: &PackedUserOperation,
    expected_signer: Address,
    now: u64,
) -> Result<SponsorshipSubfield> {
    let subfield = SponsorshipSubfield::decode(&op.paymaster_and_data)?;
    if subfield.paymaster != domain.verifying_contract {
        return Err(Error::SponsorshipSignatureRejected(format!(
            "paymasterAndData names {:?}, expected {:?}",
            subfield.paymaster, domain.verifying_contract
        )));
    }
    subfield.window.check(now)?;

    let digest = SponsorshipRequest::new(domain, op, subfield.gas, subfield.window).digest()?;
    let recovered = recover_signer(digest, &subfield.signature)
        .map_err(|e| Error::SponsorshipSignatureRejected(e.to_string()))?;
    if recovered != expected_signer {
        return Err(Error::SponsorshipSignatureRejected(format!(
            "recovered {recovered:?}, expected {expected_signer:?}"
        )));
    }
    Ok(subfield)
}

/// Produces sponsorship subfields with the sponsor's own key.
pub struct SponsorshipAuthorizer<'a, S: ?Sized> {
    domain: SponsorshipDomain,
    signer: &'a S,
}

impl<'a, S: HashSigner + ?Sized> SponsorshipAuthorizer<'a, S> {
    pub fn new(domain: SponsorshipDomain, signer: &'a S) -> Self {
        Self { domain, signer }
    }

    pub fn domain(&self) -> &SponsorshipDomain {
        &self.domain
    }

    /// Signs the typed request for `op` as currently shaped. Every field the
    /// digest covers must be final; `paymasterAndData` and `signature` are not
    /// covered.
    pub async fn authorize(
        &self,
        op: &PackedUserOperation,
        gas: PaymasterGasConfig,
        window: ValidityWindow,
        now: u64,
    ) -> Result<SponsorshipSubfield> {
        window.check(now)?;
        let digest = SponsorshipRequest::new(&self.domain, op, gas, window).digest()?;
        let signature = sign_checked(self.signer, digest).await?;
        tracing::info!(
            sender = ?op.sender,
            nonce = %op.nonce,
            paymaster = ?self.domain.verifying_contract,
            valid_after = window.valid_after,
            valid_until = window.valid_until,
            "sponsorship authorized"
        );
        Ok(SponsorshipSubfield {
            paymaster: self.domain.verifying_contract,
            gas,
            window,
            signature: signature.to_vec().into(),
        })
    }

    pub fn verify(&self, op: &PackedUserOperation, now: u64) -> Result<SponsorshipSubfield> {
        verify_sponsorship(&self.domain, op, self.signer.address(), now)
    }
}
