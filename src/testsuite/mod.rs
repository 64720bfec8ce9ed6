//! End to end scenarios, run against in-memory chains from `tests/mock_mock.rs`.

pub mod mock;
pub mod setup;
pub mod tests;
