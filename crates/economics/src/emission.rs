//! Emission scheduling.
//!
//! The schedule emits `reward_per_block` for every block in
//! `[start_block, end_block)`. Emitted reward moves into `reserved` as the
//! checkpoint advances; only `total_funded - reserved` may be promised again
//! when the rate is re-derived, so the schedule can never owe more than the
//! custody balance holds.

use crate::errors::EconomicsError;
use farm_types::{Amount, BlockNumber, EmissionState, FundingPolicy};
use tracing::{debug, info};

/// Rate bookkeeping over the singleton [`EmissionState`].
///
/// Callers that settle pools against [`reward_emitted_between`] must settle
/// every pool before any method here that changes `reward_per_block`.
///
/// [`reward_emitted_between`]: EmissionScheduler::reward_emitted_between
pub trait EmissionScheduler {
    /// `reward_per_block` inside the horizon, zero outside. Pure.
    fn effective_rate_per_block(&self, at: BlockNumber) -> Amount;

    /// Reward emitted over `[from, to)` clamped to the horizon. Pure.
    fn reward_emitted_between(
        &self,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Amount, EconomicsError>;

    /// Balance not yet emitted, the only part a re-derivation may promise.
    fn unallocated(&self) -> Result<Amount, EconomicsError>;

    /// Move reward emitted since the last checkpoint into `reserved`.
    fn advance_checkpoint(&mut self, now: BlockNumber) -> Result<Amount, EconomicsError>;

    /// Add `amount` to the reward balance and re-derive per the funding policy.
    fn fund(&mut self, amount: Amount, now: BlockNumber) -> Result<(), EconomicsError>;

    /// Set `end_block = now + blocks_from_now` and spread the remaining balance over it.
    fn extend_horizon(
        &mut self,
        blocks_from_now: BlockNumber,
        now: BlockNumber,
    ) -> Result<(), EconomicsError>;

    /// Spread the unallocated balance evenly up to `end_block`.
    fn rederive_rate(&mut self, now: BlockNumber) -> Result<(), EconomicsError>;

    /// Account for reward leaving custody.
    fn record_payout(&mut self, amount: Amount) -> Result<(), EconomicsError>;

    /// Check the solvency relations between the counters.
    fn check_invariants(&self) -> Result<(), EconomicsError>;
}

impl EmissionScheduler for EmissionState {
    fn effective_rate_per_block(&self, at: BlockNumber) -> Amount {
        if self.start_block <= at && at < self.end_block {
            self.reward_per_block
        } else {
            0
        }
    }

    fn reward_emitted_between(
        &self,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Amount, EconomicsError> {
        let lo = from.max(self.start_block);
        let hi = to.min(self.end_block);
        if hi <= lo {
            return Ok(0);
        }
        self.reward_per_block
            .checked_mul((hi - lo) as u128)
            .ok_or(EconomicsError::CalculationOverflow("reward emitted over span"))
    }

    fn unallocated(&self) -> Result<Amount, EconomicsError> {
        self.total_funded
            .checked_sub(self.reserved)
            .ok_or(EconomicsError::CalculationOverflow("reserved exceeds funded balance"))
    }

    fn advance_checkpoint(&mut self, now: BlockNumber) -> Result<Amount, EconomicsError> {
        if now <= self.emission_checkpoint {
            return Ok(0);
        }
        let emitted = self.reward_emitted_between(self.emission_checkpoint, now)?;
        self.reserved = self
            .reserved
            .checked_add(emitted)
            .ok_or(EconomicsError::CalculationOverflow("reserved"))?;
        self.emission_checkpoint = now;
        if self.reserved > self.total_funded {
            return Err(EconomicsError::CalculationOverflow(
                "emission outran funded balance",
            ));
        }
        Ok(emitted)
    }

    fn fund(&mut self, amount: Amount, now: BlockNumber) -> Result<(), EconomicsError> {
        self.advance_checkpoint(now)?;

        self.total_funded = self
            .total_funded
            .checked_add(amount)
            .ok_or(EconomicsError::CalculationOverflow("total_funded"))?;
        self.cumulative_funded = self
            .cumulative_funded
            .checked_add(amount)
            .ok_or(EconomicsError::CalculationOverflow("cumulative_funded"))?;

        match self.policy {
            FundingPolicy::Extend if now < self.end_block && self.reward_per_block > 0 => {
                let from = now.max(self.start_block);
                let blocks = self.unallocated()? / self.reward_per_block;
                let blocks = BlockNumber::try_from(blocks)
                    .map_err(|_| EconomicsError::CalculationOverflow("extended horizon"))?;
                self.end_block = from
                    .checked_add(blocks)
                    .ok_or(EconomicsError::CalculationOverflow("end_block"))?;
                info!(
                    target: "emission",
                    "Funded {} at block {}: rate stays {}, horizon now ends at {}",
                    amount, now, self.reward_per_block, self.end_block
                );
                Ok(())
            }
            _ => {
                self.rederive_rate(now)?;
                info!(
                    target: "emission",
                    "Funded {} at block {}: rate {} until block {}",
                    amount, now, self.reward_per_block, self.end_block
                );
                Ok(())
            }
        }
    }

    fn extend_horizon(
        &mut self,
        blocks_from_now: BlockNumber,
        now: BlockNumber,
    ) -> Result<(), EconomicsError> {
        if blocks_from_now == 0 {
            return Err(EconomicsError::InvalidHorizon(blocks_from_now));
        }
        let new_end = now
            .checked_add(blocks_from_now)
            .ok_or(EconomicsError::CalculationOverflow("end_block"))?;
        if new_end <= self.start_block {
            return Err(EconomicsError::InvalidHorizon(blocks_from_now));
        }

        self.advance_checkpoint(now)?;
        self.end_block = new_end;
        self.rederive_rate(now)?;

        info!(
            target: "emission",
            "Horizon moved to block {}: rate {}",
            self.end_block, self.reward_per_block
        );
        Ok(())
    }

    fn rederive_rate(&mut self, now: BlockNumber) -> Result<(), EconomicsError> {
        if now >= self.end_block {
            // Past the horizon the rate is inert until the horizon moves.
            debug!(
                target: "emission",
                "Horizon ended at {}; leaving rate {} inert",
                self.end_block, self.reward_per_block
            );
            return Ok(());
        }
        let from = now.max(self.start_block);
        let window = (self.end_block - from) as u128;
        self.reward_per_block = self.unallocated()? / window;
        debug!(
            target: "emission",
            "Re-derived rate {} over {} blocks (unallocated {})",
            self.reward_per_block,
            window,
            self.unallocated()?
        );
        Ok(())
    }

    fn record_payout(&mut self, amount: Amount) -> Result<(), EconomicsError> {
        if amount == 0 {
            return Ok(());
        }
        self.reserved = self
            .reserved
            .checked_sub(amount)
            .ok_or(EconomicsError::CalculationOverflow("payout exceeds reserved reward"))?;
        self.total_funded = self
            .total_funded
            .checked_sub(amount)
            .ok_or(EconomicsError::CalculationOverflow("payout exceeds funded balance"))?;
        self.total_paid = self
            .total_paid
            .checked_add(amount)
            .ok_or(EconomicsError::CalculationOverflow("total_paid"))?;
        Ok(())
    }

    fn check_invariants(&self) -> Result<(), EconomicsError> {
        if self.reserved > self.total_funded {
            return Err(EconomicsError::CalculationOverflow(
                "reserved exceeds funded balance",
            ));
        }
        if self.total_paid > self.cumulative_funded {
            return Err(EconomicsError::CalculationOverflow("paid exceeds funded"));
        }
        if self.total_funded.checked_add(self.total_paid) != Some(self.cumulative_funded) {
            return Err(EconomicsError::CalculationOverflow(
                "funded balance does not reconcile",
            ));
        }
        Ok(())
    }
}
