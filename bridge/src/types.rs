//! Types for the lottery contract state and service statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cell::TonAddress;
use crate::error::ValidationError;

/// `for_every` purchased tickets earn `get` free ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiscountFactor {
    pub for_every: u32,
    pub get: u32,
}

impl DiscountFactor {
    pub fn is_active(&self) -> bool {
        self.get > 0
    }

    /// Free tickets granted for a purchase of `purchased` tickets
    pub fn free_tickets(&self, purchased: u32) -> u32 {
        if !self.is_active() || self.for_every == 0 {
            return 0;
        }
        (purchased / self.for_every).saturating_mul(self.get)
    }
}

/// Contract configuration, fixed for a given contract version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Contract owner
    pub owner: TonAddress,

    /// Contract version string
    pub version: String,

    /// Numbers a ticket must pick, excluding the jackpot ball
    pub required_numbers_count: u32,

    /// Highest main number
    pub max_number_range: u32,

    /// Highest jackpot ball
    pub max_jackpot_range: u32,

    pub max_repeats_per_draw: u32,
    pub default_repeat_selection: u32,
    pub days_per_draw: u32,
    pub discount: DiscountFactor,
}

impl ContractConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.discount.is_active() && self.discount.for_every == 0 {
            return Err(ValidationError::InvalidState(
                "active discount requires for_every > 0".into(),
            ));
        }
        if self.days_per_draw == 0 {
            return Err(ValidationError::InvalidState("days_per_draw must be > 0".into()));
        }
        Ok(())
    }

    /// Expected length of a draw: every main number plus the jackpot ball
    pub fn draw_len(&self) -> usize {
        self.required_numbers_count as usize + 1
    }
}

/// Numbers produced by the most recent on-chain draw
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Draw {
    /// Main numbers in draw order, jackpot ball last
    pub numbers: Vec<u32>,

    /// When the draw happened; `None` before the first draw
    pub drawn_at: Option<DateTime<Utc>>,
}

impl Draw {
    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    pub fn jackpot_ball(&self) -> Option<u32> {
        self.numbers.last().copied()
    }

    pub fn main_numbers(&self) -> &[u32] {
        match self.numbers.split_last() {
            Some((_, main)) => main,
            None => &[],
        }
    }
}

/// Mutable contract state; the chain copy is authoritative
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContractState {
    /// Jackpot carried over from periods without a winner
    pub jackpot_rollover_balance: u64,

    /// Balance from repeated purchases made in past periods
    pub past_repeated_purchases_balance: u64,

    /// Entries collected in the current period
    pub current_period_balance: u64,

    pub latest_draw: Draw,
}

impl ContractState {
    /// Total jackpot, recomputed from its parts on every call
    pub fn jackpot_absolute_balance(&self) -> u128 {
        self.jackpot_rollover_balance as u128
            + self.past_repeated_purchases_balance as u128
            + self.current_period_balance as u128
    }

    /// Check the latest draw against the contract configuration
    pub fn validate(&self, config: &ContractConfig) -> Result<(), ValidationError> {
        let draw = &self.latest_draw;
        if draw.is_empty() {
            return Ok(());
        }
        if draw.numbers.len() != config.draw_len() {
            return Err(ValidationError::InvalidState(format!(
                "latest draw has {} numbers, expected {}",
                draw.numbers.len(),
                config.draw_len()
            )));
        }
        if let Some(n) = draw.main_numbers().iter().find(|n| **n > config.max_number_range) {
            return Err(ValidationError::InvalidState(format!(
                "draw number {} exceeds max_number_range {}",
                n, config.max_number_range
            )));
        }
        if let Some(ball) = draw.jackpot_ball().filter(|b| *b > config.max_jackpot_range) {
            return Err(ValidationError::InvalidState(format!(
                "jackpot ball {} exceeds max_jackpot_range {}",
                ball, config.max_jackpot_range
            )));
        }
        Ok(())
    }
}

/// Configuration and state read together in one getter call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeState {
    pub config: ContractConfig,
    pub state: ContractState,
}

impl CompositeState {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.config.validate()?;
        self.state.validate(&self.config)
    }
}

/// Bridge service statistics
#[derive(Debug, Clone, Default)]
pub struct BridgeStats {
    pub draws_initiated: u64,
    pub draws_confirmed: u64,
    /// Draw attempts skipped because the period was already claimed
    pub draws_skipped_duplicate: u64,
    /// Failed initiations that turned out to have reached the chain
    pub draws_reconciled: u64,
    pub draw_failures: u64,
    pub last_draw_time: Option<DateTime<Utc>>,
    pub last_period_key: Option<u64>,
    pub payouts_completed: u64,
    pub payouts_failed: u64,
    pub payouts_timed_out: u64,
    /// Consecutive failures (resets on success)
    pub consecutive_failures: u64,
    pub contract_call_failures: u64,
    pub gateway_failures: u64,
    /// Last successful contract getter call
    pub last_chain_healthy: Option<DateTime<Utc>>,
    pub service_started: Option<DateTime<Utc>>,
    pub total_cycles: u64,
    pub circuit_breaker_state: CircuitBreakerState,
    /// Cycles skipped due to open circuit breaker
    pub circuit_breaker_open_skips: u64,
}

impl BridgeStats {
    /// Record a draw observed on-chain after initiation
    pub fn record_draw_confirmed(&mut self, period_key: u64) {
        self.draws_confirmed += 1;
        self.consecutive_failures = 0;
        self.last_draw_time = Some(Utc::now());
        self.last_period_key = Some(period_key);
    }

    /// Record a cycle that did not need a draw
    pub fn record_idle_cycle(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_duplicate_skip(&mut self) {
        self.draws_skipped_duplicate += 1;
    }

    pub fn record_failure(&mut self, error_type: ErrorType) {
        self.draw_failures += 1;
        self.consecutive_failures += 1;

        match error_type {
            ErrorType::ContractCall => self.contract_call_failures += 1,
            ErrorType::Gateway => self.gateway_failures += 1,
            ErrorType::Ledger | ErrorType::Other => {}
        }
    }

    pub fn mark_chain_healthy(&mut self) {
        self.last_chain_healthy = Some(Utc::now());
    }

    /// Percentage of cycles that completed without failure
    pub fn success_percent(&self) -> f64 {
        if self.total_cycles == 0 {
            return 100.0;
        }
        let failed = self.draw_failures.min(self.total_cycles);
        ((self.total_cycles - failed) as f64 / self.total_cycles as f64) * 100.0
    }
}

/// Type of error for categorization
#[derive(Debug, Clone, Copy)]
pub enum ErrorType {
    ContractCall,
    Gateway,
    Ledger,
    Other,
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitBreakerState {
    /// Normal operation
    #[default]
    Closed,
    /// Testing if the chain endpoint has recovered
    HalfOpen,
    /// Blocking draw cycles
    Open,
}

impl CircuitBreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitBreakerState::Closed => "closed",
            CircuitBreakerState::HalfOpen => "half-open",
            CircuitBreakerState::Open => "open",
        }
    }

    /// Metric representation (0=closed, 1=half-open, 2=open)
    pub fn as_metric(&self) -> u64 {
        match self {
            CircuitBreakerState::Closed => 0,
            CircuitBreakerState::HalfOpen => 1,
            CircuitBreakerState::Open => 2,
        }
    }
}

/// Circuit breaker guarding the draw loop against a failing chain endpoint
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub state: CircuitBreakerState,
    pub failure_threshold: u64,
    pub reset_timeout_secs: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub half_open_success_count: u64,
    pub half_open_success_threshold: u64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            failure_threshold: 5,
            reset_timeout_secs: 60,
            last_failure_time: None,
            half_open_success_count: 0,
            half_open_success_threshold: 1,
        }
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u64, reset_timeout_secs: u64) -> Self {
        Self {
            failure_threshold,
            reset_timeout_secs,
            ..Default::default()
        }
    }

    /// Check if a cycle may run; moves Open to HalfOpen once the reset timeout elapses
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let elapsed = self
                    .last_failure_time
                    .map(|t| Utc::now().signed_duration_since(t).num_seconds())
                    .unwrap_or(i64::MAX);
                if elapsed >= self.reset_timeout_secs as i64 {
                    self.state = CircuitBreakerState::HalfOpen;
                    self.half_open_success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitBreakerState::HalfOpen => {
                self.half_open_success_count += 1;
                if self.half_open_success_count >= self.half_open_success_threshold {
                    self.state = CircuitBreakerState::Closed;
                    self.half_open_success_count = 0;
                }
            }
            CircuitBreakerState::Closed => {}
            CircuitBreakerState::Open => self.state = CircuitBreakerState::Closed,
        }
    }

    pub fn record_failure(&mut self, consecutive_failures: u64) {
        self.last_failure_time = Some(Utc::now());

        match self.state {
            CircuitBreakerState::Closed if consecutive_failures >= self.failure_threshold => {
                self.state = CircuitBreakerState::Open;
            }
            CircuitBreakerState::HalfOpen => {
                self.state = CircuitBreakerState::Open;
                self.half_open_success_count = 0;
            }
            _ => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, CircuitBreakerState::Open)
    }
}
