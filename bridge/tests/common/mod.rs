//! Common test utilities for integration tests

#![allow(dead_code)]

pub mod mock_fireblocks;
pub mod mock_toncenter;

pub use mock_fireblocks::MockFireblocks;
pub use mock_toncenter::MockTonCenter;
