use crate::packing::unpack_u128_pair;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};

/// ERC-4337 PackedUserOperation (EntryPoint v0.7 / v0.8 layout).
///
/// `account_gas_limits` is `verificationGasLimit ++ callGasLimit` and `gas_fees`
/// is `maxPriorityFeePerGas ++ maxFeePerGas`, each half a big-endian uint128.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackedUserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub account_gas_limits: [u8; 32],
    pub pre_verification_gas: U256,
    pub gas_fees: [u8; 32],
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl PackedUserOperation {
    /// Token matching the Solidity struct, suitable for `getUserOpHash` and
    /// `handleOps`.
    pub fn as_abi_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::Bytes(self.init_code.to_vec()),
            Token::Bytes(self.call_data.to_vec()),
            Token::FixedBytes(self.account_gas_limits.to_vec()),
            Token::Uint(self.pre_verification_gas),
            Token::FixedBytes(self.gas_fees.to_vec()),
            Token::Bytes(self.paymaster_and_data.to_vec()),
            Token::Bytes(self.signature.to_vec()),
        ])
    }

    pub fn verification_gas_limit(&self) -> U256 {
        unpack_u128_pair(&self.account_gas_limits).0
    }

    pub fn call_gas_limit(&self) -> U256 {
        unpack_u128_pair(&self.account_gas_limits).1
    }

    pub fn max_priority_fee_per_gas(&self) -> U256 {
        unpack_u128_pair(&self.gas_fees).0
    }

    pub fn max_fee_per_gas(&self) -> U256 {
        unpack_u128_pair(&self.gas_fees).1
    }

    /// Factory address from `initCode`, if the op deploys its sender.
    pub fn factory(&self) -> Option<Address> {
        address_prefix(&self.init_code)
    }

    /// Sponsor address from `paymasterAndData`, if the op is sponsored.
    pub fn paymaster(&self) -> Option<Address> {
        address_prefix(&self.paymaster_and_data)
    }
}

fn address_prefix(data: &Bytes) -> Option<Address> {
    if data.len() < 20 {
        None
    } else {
        Some(Address::from_slice(&data[..20]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packing::pack_u128_pair;

    #[test]
    fn gas_accessors_unpack_fields() {
        let op = PackedUserOperation {
            account_gas_limits: pack_u128_pair(100_000u64.into(), 300_000u64.into()).unwrap(),
            gas_fees: pack_u128_pair(1u64.into(), 2u64.into()).unwrap(),
            ..Default::default()
        };
        assert_eq!(op.verification_gas_limit(), U256::from(100_000u64));
        assert_eq!(op.call_gas_limit(), U256::from(300_000u64));
        assert_eq!(op.max_priority_fee_per_gas(), U256::one());
        assert_eq!(op.max_fee_per_gas(), U256::from(2u64));
    }

    #[test]
    fn factory_and_paymaster_prefixes() {
        let mut op = PackedUserOperation::default();
        assert_eq!(op.factory(), None);
        assert_eq!(op.paymaster(), None);

        let factory = Address::repeat_byte(0xfa);
        let mut init_code = factory.as_bytes().to_vec();
        init_code.extend([1, 2, 3]);
        op.init_code = init_code.into();
        op.paymaster_and_data = Address::repeat_byte(0xbb).as_bytes().to_vec().into();

        assert_eq!(op.factory(), Some(factory));
        assert_eq!(op.paymaster(), Some(Address::repeat_byte(0xbb)));
    }

    #[test]
    fn abi_token_has_nine_fields() {
        let Token::Tuple(fields) = PackedUserOperation::default().as_abi_token() else {
            panic!("expected tuple");
        };
        assert_eq!(fields.len(), 9);
        assert!(matches!(&fields[4], Token::FixedBytes(b) if b.len() == 32));
    }
}
