//! Lottery Bridge
//!
//! Keeps the lottery smart contract on TON in sync with the off-chain
//! platform: reads and writes contract state, triggers the periodic draw
//! exactly once per period, and drives Fireblocks payouts to a terminal
//! outcome.

pub mod abi;
pub mod cell;
pub mod config;
pub mod error;
pub mod fireblocks;
pub mod health;
pub mod ledger;
pub mod payments;
pub mod payout;
pub mod retry;
pub mod service;
pub mod stack;
pub mod ton;
pub mod types;
pub mod wallet;


pub use config::{BridgeConfig, FireblocksApiConfig, PayoutPolicyConfig, TonApiConfig};
pub use error::{BridgeError, BridgeResult};
pub use fireblocks::{FireblocksGateway, PaymentGateway, WalletGateway};
pub use health::{HealthServer, HealthState};
pub use ledger::{DrawLedger, FileDrawLedger, InMemoryDrawLedger, PeriodKey};
pub use payout::PayoutOrchestrator;
pub use retry::ResiliencePolicy;
pub use service::{CycleOutcome, DrawService};
pub use ton::{ContractGateway, TonCenterGateway};
pub use types::*;
