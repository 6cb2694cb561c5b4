//! In-memory chain for pipeline tests: an entry point with per-key nonces and
//! FailedOp validation, a CREATE2 clone factory, balances and receipts.

use crate::contracts::{classify_failed_op, AccountFactoryLike, ChainLike, EntryPointLike};
use crate::error::{Error, Result};
use crate::signer::recover_signer;
use crate::sponsor::{verify_sponsorship, SponsorshipDomain};
use crate::submit::{USER_OPERATION_EVENT, USER_OPERATION_REVERT_REASON};
use crate::types::PackedUserOperation;
use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H160, H256, U256, U64};
use ethers::utils::{get_create2_address_from_hash, keccak256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub const SIM_NOW: u64 = 1_700_000_000;
const SIM_CHAIN_ID: u64 = 31337;
const CLONE_CODE_HASH: [u8; 32] = [0xc1; 32];
const ACCOUNT_CODE: [u8; 2] = [0xef, 0x01];

#[derive(Clone, Default)]
struct SimState {
    now: u64,
    balances: HashMap<Address, U256>,
    code: HashMap<Address, Bytes>,
    owners: HashMap<Address, Address>,
    sequences: HashMap<(Address, U256), u64>,
    receipts: HashMap<H256, TransactionReceipt>,
    sponsor: Option<(SponsorshipDomain, Address)>,
    failing: HashSet<Address>,
    withhold_receipts: bool,
    transfers: usize,
    tx_count: u64,
}

impl SimState {
    fn next_tx(&mut self, logs: Vec<Log>) -> H256 {
        self.tx_count += 1;
        let tx_hash = H256::from_low_u64_be(0x7000 + self.tx_count);
        let receipt = TransactionReceipt {
            transaction_hash: tx_hash,
            status: Some(U64::from(1)),
            logs,
            ..Default::default()
        };
        self.receipts.insert(tx_hash, receipt);
        tx_hash
    }
}

#[derive(Clone)]
pub struct Sim {
    state: Arc<Mutex<SimState>>,
}

pub struct SimChain(Sim);
pub struct SimEntryPoint(Sim);
pub struct SimFactory(Sim);

impl Sim {
    pub const FACTORY: Address = H160([0xfa; 20]);
    pub const PAYMASTER: Address = H160([0x9a; 20]);

    pub fn new() -> Self {
        let state = SimState {
            now: SIM_NOW,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn chain(&self) -> SimChain {
        SimChain(self.clone())
    }

    pub fn entry_point(&self) -> SimEntryPoint {
        SimEntryPoint(self.clone())
    }

    pub fn factory(&self) -> SimFactory {
        SimFactory(self.clone())
    }

    pub fn chain_id(&self) -> u64 {
        SIM_CHAIN_ID
    }

    pub fn entry_point_address() -> Address {
        H160([0xe9; 20])
    }

    pub fn advance(&self, seconds: u64) {
        self.state.lock().unwrap().now += seconds;
    }

    pub fn register_sponsor(&self, domain: SponsorshipDomain, signer: Address) {
        self.state.lock().unwrap().sponsor = Some((domain, signer));
    }

    /// Makes the account call of every op from `sender` revert.
    pub fn fail_execution(&self, sender: Address) {
        self.state.lock().unwrap().failing.insert(sender);
    }

    pub fn withhold_receipts(&self) {
        self.state.lock().unwrap().withhold_receipts = true;
    }

    pub fn is_deployed(&self, account: Address) -> bool {
        self.state.lock().unwrap().code.contains_key(&account)
    }

    pub fn transfers(&self) -> usize {
        self.state.lock().unwrap().transfers
    }
}

fn predict(salt: H256, init_payload: &[u8]) -> Address {
    let mut salted = salt.as_bytes().to_vec();
    salted.extend_from_slice(&keccak256(init_payload));
    get_create2_address_from_hash(Sim::FACTORY, keccak256(salted), CLONE_CODE_HASH)
}

fn user_op_hash(op: &PackedUserOperation) -> H256 {
    let unsigned = PackedUserOperation {
        signature: Bytes::new(),
        ..op.clone()
    };
    let inner = keccak256(abi::encode(&[unsigned.as_abi_token()]));
    H256::from(keccak256(abi::encode(&[
        Token::FixedBytes(inner.to_vec()),
        Token::Address(Sim::entry_point_address()),
        Token::Uint(SIM_CHAIN_ID.into()),
    ])))
}

/// Runs the deployment from `initCode` and returns the owner it installs.
fn deploy(state: &mut SimState, op: &PackedUserOperation) -> std::result::Result<Address, String> {
    let init_code = &op.init_code;
    if init_code.len() < 24 || Address::from_slice(&init_code[..20]) != Sim::FACTORY {
        return Err("AA13 initCode failed or OOG".to_string());
    }
    let args = abi::decode(&[ParamType::FixedBytes(32), ParamType::Bytes], &init_code[24..])
        .map_err(|_| "AA13 initCode failed or OOG".to_string())?;
    let [Token::FixedBytes(salt), Token::Bytes(payload)] = args.as_slice() else {
        return Err("AA13 initCode failed or OOG".to_string());
    };
    if predict(H256::from_slice(salt), payload) != op.sender {
        return Err("AA14 initCode must return sender".to_string());
    }
    let initializer = ethers::utils::id("initializeECDSA(address)");
    if payload.len() != 36 || payload[..4] != initializer {
        return Err("AA13 initCode failed or OOG".to_string());
    }
    let owner = Address::from_slice(&payload[16..36]);
    state.code.insert(op.sender, ACCOUNT_CODE.to_vec().into());
    state.owners.insert(op.sender, owner);
    Ok(owner)
}

fn validate(state: &mut SimState, op: &PackedUserOperation) -> std::result::Result<(), String> {
    let key = op.nonce >> 64;
    let sequence = state.sequences.entry((op.sender, key)).or_default();
    if U256::from(*sequence) != op.nonce & U256::from(u64::MAX) {
        return Err("AA25 invalid account nonce".to_string());
    }
    *sequence += 1;

    let owner = match (state.code.contains_key(&op.sender), op.init_code.is_empty()) {
        (true, true) => state.owners.get(&op.sender).copied().unwrap_or_default(),
        (true, false) => return Err("AA10 sender already constructed".to_string()),
        (false, true) => return Err("AA20 account not deployed".to_string()),
        (false, false) => deploy(state, op)?,
    };

    let signer = recover_signer(user_op_hash(op), &op.signature).ok();
    if signer != Some(owner) {
        return Err("AA24 signature error".to_string());
    }

    if op.paymaster_and_data.is_empty() {
        if state.balances.get(&op.sender).copied().unwrap_or_default().is_zero() {
            return Err("AA21 didn't pay prefund".to_string());
        }
        return Ok(());
    }
    let Some((domain, sponsor)) = state.sponsor.clone() else {
        return Err("AA30 paymaster not deployed".to_string());
    };
    match verify_sponsorship(&domain, op, sponsor, state.now) {
        Ok(_) => Ok(()),
        Err(Error::SponsorshipWindowRejected(_)) => {
            Err("AA32 paymaster expired or not due".to_string())
        }
        Err(_) => Err("AA34 signature error".to_string()),
    }
}

fn event_logs(op: &PackedUserOperation, success: bool) -> Vec<Log> {
    let hash = user_op_hash(op);
    let paymaster = op.paymaster().unwrap_or_default();
    let mut logs = Vec::new();
    if !success {
        logs.push(Log {
            address: Sim::entry_point_address(),
            topics: vec![
                H256::from(keccak256(USER_OPERATION_REVERT_REASON)),
                hash,
                H256::from(op.sender),
            ],
            data: abi::encode(&[
                Token::Uint(op.nonce),
                Token::Bytes(b"execution reverted".to_vec()),
            ])
            .into(),
            ..Default::default()
        });
    }
    logs.push(Log {
        address: Sim::entry_point_address(),
        topics: vec![
            H256::from(keccak256(USER_OPERATION_EVENT)),
            hash,
            H256::from(op.sender),
            H256::from(paymaster),
        ],
        data: abi::encode(&[
            Token::Uint(op.nonce),
            Token::Bool(success),
            Token::Uint(42_000u64.into()),
            Token::Uint(21_000u64.into()),
        ])
        .into(),
        ..Default::default()
    });
    logs
}

#[async_trait]
impl ChainLike for SimChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(SIM_CHAIN_ID)
    }

    async fn balance_of(&self, address: Address) -> Result<U256> {
        let state = self.0.state.lock().unwrap();
        Ok(state.balances.get(&address).copied().unwrap_or_default())
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        let state = self.0.state.lock().unwrap();
        Ok(state.code.get(&address).cloned().unwrap_or_default())
    }

    async fn send_value(&self, to: Address, amount: U256) -> Result<H256> {
        let mut state = self.0.state.lock().unwrap();
        *state.balances.entry(to).or_default() += amount;
        state.transfers += 1;
        Ok(state.next_tx(Vec::new()))
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        let state = self.0.state.lock().unwrap();
        if state.withhold_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }
}

#[async_trait]
impl EntryPointLike for SimEntryPoint {
    fn address(&self) -> Address {
        Sim::entry_point_address()
    }

    async fn get_nonce(&self, sender: Address, key: U256) -> Result<U256> {
        let state = self.0.state.lock().unwrap();
        let sequence = state.sequences.get(&(sender, key)).copied().unwrap_or_default();
        Ok((key << 64) | U256::from(sequence))
    }

    async fn get_user_op_hash(&self, op: &PackedUserOperation) -> Result<H256> {
        Ok(user_op_hash(op))
    }

    /// All records validate before any executes; one FailedOp reverts the
    /// whole call.
    async fn handle_ops(
        &self,
        ops: Vec<PackedUserOperation>,
        _beneficiary: Address,
    ) -> Result<H256> {
        let mut state = self.0.state.lock().unwrap();
        let mut next = state.clone();
        for (index, op) in ops.iter().enumerate() {
            validate(&mut next, op).map_err(|reason| classify_failed_op(index, reason))?;
        }
        let logs = ops
            .iter()
            .flat_map(|op| event_logs(op, !next.failing.contains(&op.sender)))
            .collect();
        let tx_hash = next.next_tx(logs);
        *state = next;
        Ok(tx_hash)
    }

    async fn balance_of(&self, account: Address) -> Result<U256> {
        let state = self.0.state.lock().unwrap();
        Ok(state.balances.get(&account).copied().unwrap_or_default())
    }
}

#[async_trait]
impl AccountFactoryLike for SimFactory {
    fn address(&self) -> Address {
        Sim::FACTORY
    }

    async fn predict_address(&self, salt: H256, init_payload: Bytes) -> Result<Address> {
        Ok(predict(salt, &init_payload))
    }
}
