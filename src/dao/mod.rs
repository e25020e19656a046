/// List, key/value and publish/subscribe broker shared by every process.
pub mod broker;
/// Durable store for games, participants and balances.
pub mod durable_store;
/// Database model definitions.
pub mod models;
/// Storage error types shared by the durable store backends.
pub mod storage;
