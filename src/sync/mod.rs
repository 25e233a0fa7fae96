//! Asynchronous sync scheduling.

pub mod worker;

pub use worker::SyncStatus;
