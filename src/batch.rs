//! ERC-7579 batch execution payloads.
//!
//! The execution calldata for a batch is `abi.encode((address,uint256,bytes)[])`.
//! The account receives it through `execute(bytes32 mode, bytes executionCalldata)`.

use crate::error::{Error, Result};
use crate::packing::{ExecutionMode, MODE_BYTES};
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, U256};

pub const EXECUTE_SIGNATURE: &str = "execute(bytes32,bytes)";

/// One contract invocation inside a batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Call {
    pub target: Address,
    pub value: U256,
    pub data: Bytes,
}

impl Call {
    pub fn new(target: Address) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    fn into_token(self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.target),
            Token::Uint(self.value),
            Token::Bytes(self.data.to_vec()),
        ])
    }

    fn from_token(token: Token) -> Option<Self> {
        let Token::Tuple(fields) = token else {
            return None;
        };
        match <[Token; 3]>::try_from(fields).ok()? {
            [Token::Address(target), Token::Uint(value), Token::Bytes(data)] => Some(Self {
                target,
                value,
                data: data.into(),
            }),
            _ => None,
        }
    }
}

fn calls_param() -> ParamType {
    ParamType::Array(Box::new(ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Uint(256),
        ParamType::Bytes,
    ])))
}

/// `abi.encode((address,uint256,bytes)[])`, preserving call order.
pub fn encode_calls(calls: &[Call]) -> Bytes {
    let tokens = calls.iter().cloned().map(Call::into_token).collect();
    abi::encode(&[Token::Array(tokens)]).into()
}

pub fn decode_calls(data: &[u8]) -> Result<Vec<Call>> {
    let mut tokens = abi::decode(&[calls_param()], data)
        .map_err(|e| Error::InvalidEncoding(format!("batch call array: {e}")))?;
    let Some(Token::Array(entries)) = tokens.pop() else {
        return Err(Error::InvalidEncoding("batch call array missing".to_string()));
    };
    entries
        .into_iter()
        .map(|entry| {
            Call::from_token(entry)
                .ok_or_else(|| Error::InvalidEncoding("malformed batch call entry".to_string()))
        })
        .collect()
}

/// The batch payload: 32-byte mode followed by the encoded call array.
pub fn encode_batch(mode: &ExecutionMode, calls: &[Call]) -> Bytes {
    let mut out = mode.encode().to_vec();
    out.extend_from_slice(&encode_calls(calls));
    out.into()
}

pub fn decode_batch(payload: &[u8]) -> Result<(ExecutionMode, Vec<Call>)> {
    if payload.len() < MODE_BYTES {
        return Err(Error::InvalidEncoding(format!(
            "batch payload shorter than the {MODE_BYTES}-byte mode"
        )));
    }
    let mode = ExecutionMode::decode(&payload[..MODE_BYTES])?;
    let calls = decode_calls(&payload[MODE_BYTES..])?;
    Ok((mode, calls))
}

/// Account calldata for `execute(bytes32 mode, bytes executionCalldata)`.
pub fn execute_call_data(mode: &ExecutionMode, calls: &[Call]) -> Bytes {
    let selector = ethers::utils::id(EXECUTE_SIGNATURE);
    let args = abi::encode(&[
        Token::FixedBytes(mode.encode().to_vec()),
        Token::Bytes(encode_calls(calls).to_vec()),
    ]);
    let mut out = selector.to_vec();
    out.extend(args);
    out.into()
}

/// Inverse of [`execute_call_data`].
pub fn decode_execute_call_data(data: &[u8]) -> Result<(ExecutionMode, Vec<Call>)> {
    let selector = ethers::utils::id(EXECUTE_SIGNATURE);
    if data.len() < 4 || data[..4] != selector {
        return Err(Error::InvalidEncoding(
            "call data is not an execute(bytes32,bytes) call".to_string(),
        ));
    }
    let tokens = abi::decode(&[ParamType::FixedBytes(32), ParamType::Bytes], &data[4..])
        .map_err(|e| Error::InvalidEncoding(format!("execute arguments: {e}")))?;
    match tokens.as_slice() {
        [Token::FixedBytes(mode), Token::Bytes(calls)] => {
            Ok((ExecutionMode::decode(mode)?, decode_calls(calls)?))
        }
        _ => Err(Error::InvalidEncoding("execute arguments".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packing::{CallType, ExecType};

    fn sample_calls() -> Vec<Call> {
        vec![
            Call::new(Address::repeat_byte(0x11)).with_data(vec![0xa9, 0x05, 0x9c, 0xbb]),
            Call::new(Address::repeat_byte(0x22)).with_value(U256::from(7u64)),
            Call::new(Address::repeat_byte(0x33))
                .with_value(U256::MAX)
                .with_data(vec![0xff; 97]),
        ]
    }

    #[test]
    fn call_defaults() {
        let call = Call::new(Address::repeat_byte(1));
        assert_eq!(call.value, U256::zero());
        assert!(call.data.is_empty());
    }

    #[test]
    fn batch_round_trip_preserves_order() {
        let mode = ExecutionMode::batch();
        for n in 0..=3 {
            let calls = sample_calls()[..n].to_vec();
            let payload = encode_batch(&mode, &calls);
            assert_eq!(&payload[..32], &mode.encode());
            let (decoded_mode, decoded) = decode_batch(&payload).unwrap();
            assert_eq!(decoded_mode, mode);
            assert_eq!(decoded, calls);
        }
    }

    #[test]
    fn reversed_input_decodes_reversed() {
        let mut calls = sample_calls();
        calls.reverse();
        let (_, decoded) = decode_batch(&encode_batch(&ExecutionMode::batch(), &calls)).unwrap();
        assert_eq!(decoded[0].target, Address::repeat_byte(0x33));
        assert_eq!(decoded[2].target, Address::repeat_byte(0x11));
    }

    #[test]
    fn empty_batch_is_valid() {
        let payload = encode_batch(&ExecutionMode::batch(), &[]);
        // mode + offset word + zero length word
        assert_eq!(payload.len(), 32 + 64);
        assert!(decode_batch(&payload).unwrap().1.is_empty());
    }

    #[test]
    fn custom_mode_is_carried() {
        let mode = ExecutionMode {
            call_type: CallType::BATCH,
            exec_type: ExecType::TRY,
            selector: [1, 2, 3, 4],
            payload: [9u8; 22],
        };
        let (decoded, _) = decode_batch(&encode_batch(&mode, &sample_calls())).unwrap();
        assert_eq!(decoded, mode);
    }

    #[test]
    fn execute_call_data_round_trip() {
        let calls = sample_calls();
        let data = execute_call_data(&ExecutionMode::batch(), &calls);
        assert_eq!(&data[..4], &ethers::utils::id("execute(bytes32,bytes)"));
        let (mode, decoded) = decode_execute_call_data(&data).unwrap();
        assert_eq!(mode, ExecutionMode::batch());
        assert_eq!(decoded, calls);
    }

    #[test]
    fn truncated_payloads_are_rejected() {
        assert!(decode_batch(&[0u8; 16]).is_err());
        let payload = encode_batch(&ExecutionMode::batch(), &sample_calls());
        assert!(decode_batch(&payload[..payload.len() - 40]).is_err());
        assert!(decode_execute_call_data(&[0u8; 3]).is_err());
    }
}
