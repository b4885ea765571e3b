//! LeLink - A Rust library for BLE link layer connection management
//!
//! This library implements the connection-oriented core of a Bluetooth Low
//! Energy link layer controller: the connection pool and its control
//! procedures, link encryption state, address privacy with resolvable
//! private addresses, and the device filter (white) list. The RF engine and
//! the asymmetric-crypto offload are injected behind traits, so the core
//! runs the same on hardware, in simulation, and under test.

pub mod address;
pub mod conn;
pub mod error;
pub mod filter;
pub mod privacy;
pub mod radio;
pub mod timing;

// Re-export common types for convenience
pub use address::{AddressType, BdAddr, RandomAddressKind};
pub use conn::{
    ConnParams, ConnState, ConnUpdateParams, ConnectionManager, ConnectionRecord,
    CreateConnParams, EncryptionState, FeatureSet, LinkEvent, LinkEventHandler, PhyMask, Role,
    SleepClockAccuracy, VersionInfo,
};
pub use error::{ErrorKind, LlError, LlResult};
pub use filter::{InitiatorFilterPolicy, ScanFilterPolicy, WhiteList};
pub use privacy::{PrivacyEngine, ResolvingListEntry, RotatedAddress};
pub use radio::{
    ConnEventOutcome, ControlExchange, InitiateRequest, KeyGenEngine, PeerMessage, RadioHal,
    TimerKind,
};
