//! Token vault deposit flow: mint test tokens to the account, approve the
//! vault and deposit, as one batch.

use crate::batch::Call;
use crate::encoding::function_call;
use crate::error::Result;
use ethers::abi::Token;
use ethers::types::{Address, U256};

pub const MINT: &str = "function mint(address to, uint256 amount)";
pub const APPROVE: &str = "function approve(address spender, uint256 amount) returns (bool)";
pub const DEPOSIT: &str = "function deposit(uint256 assets, address receiver) returns (uint256)";

/// Amount used by the deposit demo.
pub const DEMO_AMOUNT: u64 = 100_000;

/// `mint(account, amount)`, `approve(vault, amount)`, `deposit(amount, account)`,
/// in that order. `mint` only exists on the demo token.
pub fn mint_approve_deposit(
    account: Address,
    token: Address,
    vault: Address,
    amount: U256,
) -> Result<Vec<Call>> {
    Ok(vec![
        Call::new(token).with_data(function_call(
            MINT,
            &[Token::Address(account), Token::Uint(amount)],
        )?),
        Call::new(token).with_data(function_call(
            APPROVE,
            &[Token::Address(vault), Token::Uint(amount)],
        )?),
        Call::new(vault).with_data(function_call(
            DEPOSIT,
            &[Token::Uint(amount), Token::Address(account)],
        )?),
    ])
}
