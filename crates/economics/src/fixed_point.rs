//! Fixed-point helpers for reward-per-share accounting.
//!
//! Every division truncates toward zero, so rounding error always stays with
//! the ledger and is never paid out. All operations are checked: an overflow
//! is reported as [`EconomicsError::CalculationOverflow`] instead of wrapping.

use crate::errors::EconomicsError;
use farm_types::{Amount, PRECISION};

/// `a * b / d`, rounded down.
pub fn mul_div(a: u128, b: u128, d: u128) -> Result<u128, EconomicsError> {
    if d == 0 {
        return Err(EconomicsError::InvalidParameter("division by zero"));
    }
    a.checked_mul(b)
        .map(|product| product / d)
        .ok_or(EconomicsError::CalculationOverflow("mul_div product"))
}

/// Add `reward` spread over `supply` staked units to the accumulator.
///
/// A zero supply leaves the accumulator untouched.
pub fn accumulate(acc: u128, reward: Amount, supply: Amount) -> Result<u128, EconomicsError> {
    if supply == 0 || reward == 0 {
        return Ok(acc);
    }
    let increment = mul_div(reward, PRECISION, supply)?;
    acc.checked_add(increment)
        .ok_or(EconomicsError::CalculationOverflow("acc_reward_per_share"))
}

/// Reward owed to `amount` staked units at accumulator value `acc`.
pub fn share_of(amount: Amount, acc: u128) -> Result<Amount, EconomicsError> {
    mul_div(amount, acc, PRECISION)
}

/// Reward accrued since the checkpoint that produced `reward_debt`.
pub fn pending(amount: Amount, acc: u128, reward_debt: Amount) -> Result<Amount, EconomicsError> {
    share_of(amount, acc)?
        .checked_sub(reward_debt)
        .ok_or(EconomicsError::CalculationOverflow("reward debt exceeds accrued share"))
}

/// `total * weight / total_weight`; nothing is allocated when no weight exists.
pub fn weighted_share(total: Amount, weight: u64, total_weight: u64) -> Result<Amount, EconomicsError> {
    if total_weight == 0 || weight == 0 {
        return Ok(0);
    }
    if weight > total_weight {
        return Err(EconomicsError::InvalidParameter("pool weight exceeds total weight"));
    }
    mul_div(total, weight as u128, total_weight as u128)
}
