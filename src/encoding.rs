use crate::error::{Error, Result};
use crate::types::PackedUserOperation;
use ethers::abi::{AbiParser, Token};
use ethers::types::{Address, Bytes, H256, U256};

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &[u8]) -> String {
    format!("0x{}", hex::encode(b))
}

/// Renders the packed struct as submitted to `handleOps`, plus the unpacked
/// gas values for readability.
pub fn user_op_to_json(op: &PackedUserOperation) -> serde_json::Value {
    serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "initCode": fmt_bytes(&op.init_code),
        "callData": fmt_bytes(&op.call_data),
        "accountGasLimits": fmt_bytes(&op.account_gas_limits),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "gasFees": fmt_bytes(&op.gas_fees),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
        "unpacked": {
            "verificationGasLimit": fmt_u256(op.verification_gas_limit()),
            "callGasLimit": fmt_u256(op.call_gas_limit()),
            "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas()),
            "maxFeePerGas": fmt_u256(op.max_fee_per_gas()),
        },
    })
}

/// Calldata for a human-readable function signature, e.g.
/// `"function approve(address spender, uint256 amount)"`.
pub fn function_call(signature: &str, args: &[Token]) -> Result<Bytes> {
    let function = AbiParser::default()
        .parse_function(signature)
        .map_err(|e| Error::InvalidEncoding(format!("{signature}: {e}")))?;
    function
        .encode_input(args)
        .map(Bytes::from)
        .map_err(|e| Error::InvalidEncoding(format!("{}: {e}", function.name)))
}
