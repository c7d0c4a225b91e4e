//! Multiplicative search over trade sizes.
//!
//! The iterator proposes an amount, the caller runs a trial and records the
//! output, and the next proposal grows the amount while output improves and
//! shrinks it once output regresses. Every change of direction narrows the
//! step after a short warmup.

use std::time::Instant;

use alloy::primitives::U256;

/// Fixed-point scale applied to `alpha` when multiplying amounts
const ALPHA_SCALE: u128 = 1_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IteratorSettings {
    pub max_count: usize,
    /// Give up after this many trials if nothing has been profitable yet
    pub break_count_if_zero: usize,
    /// Stop as soon as a trial returns nothing after a profitable one
    pub stop_when_output_drops_to_zero: bool,
    pub gamma: f64,
}

impl IteratorSettings {
    pub const ARBITRAGE: Self = Self {
        max_count: 30,
        break_count_if_zero: 20,
        stop_when_output_drops_to_zero: true,
        gamma: 0.05,
    };

    pub const SANDWICH: Self = Self {
        max_count: 100,
        break_count_if_zero: 20,
        stop_when_output_drops_to_zero: false,
        gamma: 0.05,
    };
}

/// Best trial seen so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trial {
    pub amount: U256,
    pub output: U256,
    pub gas_used: u64,
}

#[derive(Debug, Clone)]
pub struct SimulationIterator {
    settings: IteratorSettings,
    amount: U256,
    max_amount: U256,
    count: usize,
    to_right: bool,
    alpha: f64,
    gamma: f64,
    warmup: u32,
    best: Trial,
    last_output: U256,
    previous_output: U256,
    previous_amount: U256,
    started: bool,
    deadline: Option<Instant>,
}

impl SimulationIterator {
    pub fn new(amount: U256, max_amount: U256, settings: IteratorSettings) -> Self {
        Self {
            settings,
            amount,
            max_amount,
            count: 0,
            to_right: true,
            alpha: 1.0,
            gamma: settings.gamma,
            warmup: 0,
            best: Trial::default(),
            last_output: U256::ZERO,
            previous_output: U256::ZERO,
            previous_amount: U256::ZERO,
            started: false,
            deadline: None,
        }
    }

    /// Arbitrage search from `amount`, capped at fifty times the start
    pub fn arbitrage(amount: U256) -> Self {
        Self::new(amount, amount.saturating_mul(U256::from(50u64)), IteratorSettings::ARBITRAGE)
    }

    /// Sandwich search from `amount`, capped at the attacker's balance
    pub fn sandwich(amount: U256, max_amount: U256) -> Self {
        Self::new(amount, max_amount, IteratorSettings::SANDWICH)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Records the outcome of the trial at the last proposed amount
    pub fn record(&mut self, output: U256, gas_used: u64) {
        self.last_output = output;
        if output > self.best.output {
            self.best = Trial { amount: self.amount, output, gas_used };
        }
    }

    /// Next amount to try, or `None` once the search is over
    pub fn next_amount(&mut self) -> Option<U256> {
        if !self.started {
            self.started = true;
            self.count += 1;
            return Some(self.amount);
        }

        let nothing_found = self.best.output.is_zero() && self.count >= self.settings.break_count_if_zero;
        if nothing_found || self.count >= self.settings.max_count {
            return None;
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return None;
        }
        self.count += 1;

        if self.previous_output < self.last_output {
            self.step(true);
        } else {
            self.step(false);
        }
        self.previous_output = self.last_output;

        // the cap was hit twice in a row or the step no longer moves the amount
        if self.previous_amount == self.amount {
            return None;
        }
        if self.settings.stop_when_output_drops_to_zero && !self.best.output.is_zero() && self.last_output.is_zero() {
            return None;
        }

        self.previous_amount = self.amount;
        self.amount = scale(self.amount, self.alpha).min(self.max_amount);
        Some(self.amount)
    }

    fn step(&mut self, rightward: bool) {
        let factor = if rightward { 1.0 + self.gamma } else { 1.0 - self.gamma };
        if self.to_right == rightward {
            self.alpha *= factor;
            return;
        }
        self.to_right = rightward;
        self.alpha = factor;
        if self.warmup > 3 {
            self.gamma *= 0.5;
        } else {
            self.warmup += 1;
        }
    }

    /// Best trial, or `None` when nothing was profitable
    pub fn finish(&self) -> Option<Trial> {
        (!self.best.output.is_zero()).then_some(self.best)
    }
}

/// `floor(amount * alpha)`
fn scale(amount: U256, alpha: f64) -> U256 {
    let factor = (alpha.max(0.0) * ALPHA_SCALE as f64) as u128;
    amount.saturating_mul(U256::from(factor)) / U256::from(ALPHA_SCALE)
}
