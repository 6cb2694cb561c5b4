use crate::builder::SignedOperation;
use crate::contracts::{receipt_succeeded, wait_for_receipt, ChainLike, EntryPointLike};
use crate::error::{Error, Result};
use crate::nonce::current_nonce;
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256};
use std::collections::HashMap;
use std::time::Duration;

pub const USER_OPERATION_EVENT: &str =
    "UserOperationEvent(bytes32,address,address,uint256,bool,uint256,uint256)";
pub const USER_OPERATION_REVERT_REASON: &str =
    "UserOperationRevertReason(bytes32,address,uint256,bytes)";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Per-record result reported by the entry point in the bundle receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationOutcome {
    pub user_op_hash: H256,
    pub sender: Address,
    pub paymaster: Address,
    pub nonce: U256,
    pub success: bool,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    /// Raw revert data of the account call, when it reverted.
    pub revert_reason: Option<Bytes>,
}

#[derive(Clone, Debug)]
pub struct SubmissionReceipt {
    pub tx_hash: H256,
    pub receipt: TransactionReceipt,
    pub outcomes: Vec<OperationOutcome>,
}

impl SubmissionReceipt {
    pub fn outcome(&self, user_op_hash: H256) -> Option<&OperationOutcome> {
        self.outcomes.iter().find(|o| o.user_op_hash == user_op_hash)
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }
}

fn topic(signature: &str) -> H256 {
    H256::from(ethers::utils::keccak256(signature))
}

/// Extracts `UserOperationEvent`s emitted by `entry_point`, joined with any
/// `UserOperationRevertReason` for the same op.
pub fn parse_outcomes(entry_point: Address, logs: &[Log]) -> Vec<OperationOutcome> {
    let event_topic = topic(USER_OPERATION_EVENT);
    let revert_topic = topic(USER_OPERATION_REVERT_REASON);

    let mut reasons: HashMap<H256, Bytes> = HashMap::new();
    for log in logs.iter().filter(|l| l.address == entry_point) {
        if log.topics.len() == 3 && log.topics[0] == revert_topic {
            let decoded = abi::decode(&[ParamType::Uint(256), ParamType::Bytes], &log.data);
            if let Ok([_, Token::Bytes(reason)]) = decoded.as_deref() {
                reasons.insert(log.topics[1], reason.clone().into());
            }
        }
    }

    logs.iter()
        .filter(|l| l.address == entry_point)
        .filter(|l| l.topics.len() == 4 && l.topics[0] == event_topic)
        .filter_map(|log| {
            let decoded = abi::decode(
                &[
                    ParamType::Uint(256),
                    ParamType::Bool,
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                ],
                &log.data,
            )
            .ok()?;
            let [Token::Uint(nonce), Token::Bool(success), Token::Uint(cost), Token::Uint(used)] =
                decoded.as_slice()
            else {
                return None;
            };
            let user_op_hash = log.topics[1];
            Some(OperationOutcome {
                user_op_hash,
                sender: Address::from(log.topics[2]),
                paymaster: Address::from(log.topics[3]),
                nonce: *nonce,
                success: *success,
                actual_gas_cost: *cost,
                actual_gas_used: *used,
                revert_reason: reasons.get(&user_op_hash).cloned(),
            })
        })
        .collect()
}

/// Sends signed records through `handleOps` and waits for the bundle to land.
pub struct Submitter<'a, E: ?Sized, C: ?Sized> {
    entry_point: &'a E,
    chain: &'a C,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl<'a, E, C> Submitter<'a, E, C>
where
    E: EntryPointLike + ?Sized,
    C: ChainLike + ?Sized,
{
    pub fn new(entry_point: &'a E, chain: &'a C, confirmation_timeout: Duration) -> Self {
        Self {
            entry_point,
            chain,
            confirmation_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Checks every record's nonce is still current, then submits them in
    /// one `handleOps`. A per-record execution revert is reported in the
    /// outcomes and does not fail the submission.
    pub async fn submit(
        &self,
        ops: &[SignedOperation],
        beneficiary: Address,
    ) -> Result<SubmissionReceipt> {
        if ops.is_empty() {
            return Err(Error::InvalidEncoding("no operations to submit".to_string()));
        }
        self.check_nonces(ops).await?;

        let records = ops.iter().map(|op| op.op().clone()).collect();
        let tx_hash = self.entry_point.handle_ops(records, beneficiary).await?;
        tracing::info!(
            tx = ?tx_hash,
            ops = ops.len(),
            beneficiary = ?beneficiary,
            "handleOps sent"
        );

        let receipt = wait_for_receipt(
            self.chain,
            tx_hash,
            self.confirmation_timeout,
            self.poll_interval,
        )
        .await?;
        if !receipt_succeeded(&receipt) {
            return Err(Error::SubmissionReverted {
                index: None,
                reason: format!("handleOps transaction {tx_hash:?} reverted"),
            });
        }

        let outcomes = parse_outcomes(self.entry_point.address(), &receipt.logs);
        for outcome in &outcomes {
            if outcome.success {
                tracing::info!(
                    user_op_hash = ?outcome.user_op_hash,
                    sender = ?outcome.sender,
                    nonce = %outcome.nonce,
                    "user operation executed"
                );
            } else {
                tracing::warn!(
                    user_op_hash = ?outcome.user_op_hash,
                    sender = ?outcome.sender,
                    nonce = %outcome.nonce,
                    reason = %outcome
                        .revert_reason
                        .as_ref()
                        .map(|r| format!("0x{}", hex::encode(r)))
                        .unwrap_or_default(),
                    "user operation reverted"
                );
            }
        }
        Ok(SubmissionReceipt {
            tx_hash,
            receipt,
            outcomes,
        })
    }

    /// Records from the same sender and key must carry consecutive nonces
    /// starting at the entry point's current value.
    async fn check_nonces(&self, ops: &[SignedOperation]) -> Result<()> {
        let mut expected: HashMap<(Address, U256), U256> = HashMap::new();
        for (index, signed) in ops.iter().enumerate() {
            let op = signed.op();
            let key = op.nonce >> 64;
            let want = match expected.get(&(op.sender, key)) {
                Some(next) => *next,
                None => current_nonce(self.entry_point, op.sender, key).await?,
            };
            if op.nonce != want {
                return Err(Error::NonceStale(format!(
                    "op {index} from {:?} signed with nonce {}, entry point expects {want}",
                    op.sender, op.nonce
                )));
            }
            expected.insert((op.sender, key), want + 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_log(ep: Address, hash: H256, sender: Address, nonce: u64, success: bool) -> Log {
        Log {
            address: ep,
            topics: vec![
                topic(USER_OPERATION_EVENT),
                hash,
                H256::from(sender),
                H256::zero(),
            ],
            data: abi::encode(&[
                Token::Uint(nonce.into()),
                Token::Bool(success),
                Token::Uint(21_000u64.into()),
                Token::Uint(7u64.into()),
            ])
            .into(),
            ..Default::default()
        }
    }

    fn revert_log(ep: Address, hash: H256, sender: Address, reason: &[u8]) -> Log {
        Log {
            address: ep,
            topics: vec![topic(USER_OPERATION_REVERT_REASON), hash, H256::from(sender)],
            data: abi::encode(&[Token::Uint(0u64.into()), Token::Bytes(reason.to_vec())]).into(),
            ..Default::default()
        }
    }

    #[test]
    fn parses_mixed_outcomes() {
        let ep = Address::repeat_byte(0xe9);
        let ok_hash = H256::repeat_byte(1);
        let bad_hash = H256::repeat_byte(2);
        let logs = vec![
            event_log(ep, ok_hash, Address::repeat_byte(0xa1), 0, true),
            revert_log(ep, bad_hash, Address::repeat_byte(0xa2), &[0x08, 0xc3, 0x79, 0xa0]),
            event_log(ep, bad_hash, Address::repeat_byte(0xa2), 5, false),
            // Same event from another contract is ignored.
            event_log(Address::repeat_byte(0x01), H256::repeat_byte(3), Address::zero(), 0, true),
        ];

        let outcomes = parse_outcomes(ep, &logs);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].sender, Address::repeat_byte(0xa1));
        assert_eq!(outcomes[0].actual_gas_cost, U256::from(21_000u64));
        assert_eq!(outcomes[0].revert_reason, None);

        assert!(!outcomes[1].success);
        assert_eq!(outcomes[1].nonce, U256::from(5u64));
        assert_eq!(
            outcomes[1].revert_reason.as_ref().map(|r| r.to_vec()),
            Some(vec![0x08, 0xc3, 0x79, 0xa0])
        );
    }
}
