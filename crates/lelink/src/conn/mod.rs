//! Connection management
//!
//! This module owns the connection pool and everything that happens on a
//! live link:
//! - Establishment from both roles, with the pool as the handle space
//! - Control procedures, one at a time per connection, instant-scheduled
//! - Link encryption state and the authenticated-payload watchdog
//! - Supervision, response timeouts, and orderly teardown
//!
//! The [`manager::ConnectionManager`] is the single entry point; the RF
//! engine and the host both talk to it and never to each other.

pub mod constants;
pub mod events;
pub mod manager;
pub mod types;
#[cfg(test)]
mod tests;

pub use self::constants::MAX_CONNECTIONS;
pub use self::events::{LinkEvent, LinkEventHandler};
pub use self::manager::{ConnUpdateParams, ConnectionManager, CreateConnParams};
pub use self::types::{
    ConnParams, ConnState, ConnectionRecord, DataLength, EncryptionState, FeatureSet,
    PendingProcedure, PhyMask, Role, SleepClockAccuracy, VersionInfo,
};
