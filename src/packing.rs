//! Bit-exact packed fields of a v0.7+ user operation.
//!
//! `accountGasLimits` and `gasFees` are two big-endian uint128 values in one
//! bytes32; ERC-7579 execution modes are a fixed 32-byte layout:
//!
//! ```text
//! | callType (1) | execType (1) | reserved (4) | selector (4) | payload (22) |
//! ```

use crate::error::{Error, Result};
use ethers::types::U256;

/// Width of each half of `accountGasLimits` / `gasFees`.
pub const UINT128_BYTES: usize = 16;

/// Width of the `validAfter` / `validUntil` timestamps in `paymasterAndData`.
pub const UINT48_BYTES: usize = 6;

pub const MODE_BYTES: usize = 32;

fn check_width(width: usize) -> Result<()> {
    if width == 0 || width > 32 {
        return Err(Error::InvalidEncoding(format!(
            "packed width must be within 1..=32 bytes, got {width}"
        )));
    }
    Ok(())
}

/// Left-pads `value` to `width` big-endian bytes.
pub fn pack_uint(value: U256, width: usize) -> Result<Vec<u8>> {
    check_width(width)?;
    if value.bits() > width * 8 {
        return Err(Error::ValueOutOfRange { value, width });
    }
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    Ok(word[32 - width..].to_vec())
}

pub fn pack_pair(a: U256, b: U256, width: usize) -> Result<Vec<u8>> {
    let mut out = pack_uint(a, width)?;
    out.extend(pack_uint(b, width)?);
    Ok(out)
}

pub fn unpack_pair(packed: &[u8], width: usize) -> Result<(U256, U256)> {
    check_width(width)?;
    if packed.len() != width * 2 {
        return Err(Error::InvalidEncoding(format!(
            "packed pair of width {width} must be {} bytes, got {}",
            width * 2,
            packed.len()
        )));
    }
    Ok((
        U256::from_big_endian(&packed[..width]),
        U256::from_big_endian(&packed[width..]),
    ))
}

/// Packs two uint128 values into the bytes32 layout used by
/// `accountGasLimits` and `gasFees`.
pub fn pack_u128_pair(high: U256, low: U256) -> Result<[u8; 32]> {
    let packed = pack_pair(high, low, UINT128_BYTES)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&packed);
    Ok(out)
}

pub fn unpack_u128_pair(packed: &[u8; 32]) -> (U256, U256) {
    (
        U256::from_big_endian(&packed[..UINT128_BYTES]),
        U256::from_big_endian(&packed[UINT128_BYTES..]),
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallType(pub u8);

impl CallType {
    pub const SINGLE: CallType = CallType(0x00);
    pub const BATCH: CallType = CallType(0x01);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExecType(pub u8);

impl ExecType {
    pub const DEFAULT: ExecType = ExecType(0x00);
    /// Continue with the remaining calls when one of them reverts.
    pub const TRY: ExecType = ExecType(0x01);
}

/// ERC-7579 execution mode descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExecutionMode {
    pub call_type: CallType,
    pub exec_type: ExecType,
    pub selector: [u8; 4],
    pub payload: [u8; 22],
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::batch()
    }
}

impl ExecutionMode {
    /// Batch call, revert on first failure, no selector and no payload.
    pub fn batch() -> Self {
        Self {
            call_type: CallType::BATCH,
            exec_type: ExecType::DEFAULT,
            selector: [0u8; 4],
            payload: [0u8; 22],
        }
    }

    /// Builds a mode from loosely sized parts, rejecting anything that is not
    /// exactly 1, 1, 4 and 22 bytes long.
    pub fn from_parts(
        call_type: &[u8],
        exec_type: &[u8],
        selector: &[u8],
        payload: &[u8],
    ) -> Result<Self> {
        fn exact<const N: usize>(field: &str, bytes: &[u8]) -> Result<[u8; N]> {
            bytes.try_into().map_err(|_| {
                Error::InvalidModeLayout(format!(
                    "{field} must be {N} bytes, got {}",
                    bytes.len()
                ))
            })
        }

        let [call_type] = exact::<1>("callType", call_type)?;
        let [exec_type] = exact::<1>("execType", exec_type)?;
        Ok(Self {
            call_type: CallType(call_type),
            exec_type: ExecType(exec_type),
            selector: exact::<4>("selector", selector)?,
            payload: exact::<22>("payload", payload)?,
        })
    }

    pub fn encode(&self) -> [u8; MODE_BYTES] {
        let mut out = [0u8; MODE_BYTES];
        out[0] = self.call_type.0;
        out[1] = self.exec_type.0;
        // out[2..6] stays zero (reserved)
        out[6..10].copy_from_slice(&self.selector);
        out[10..].copy_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != MODE_BYTES {
            return Err(Error::InvalidModeLayout(format!(
                "mode must be {MODE_BYTES} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[2..6] != [0u8; 4] {
            return Err(Error::InvalidModeLayout(
                "reserved bytes 2..6 must be zero".to_string(),
            ));
        }
        Self::from_parts(&bytes[0..1], &bytes[1..2], &bytes[6..10], &bytes[10..])
    }
}
