//! Address privacy
//!
//! This module owns everything private-address related:
//! - The AES-128 address hash and the RPA/NRPA/static-random generators
//! - The bounded resolving list, with a reserved slot for the local device
//! - Address resolution, classification, and timed rotation

pub mod constants;
pub mod crypto;
pub mod engine;
#[cfg(test)]
mod tests;

pub use self::constants::{
    LOCAL_RL_INDEX, RESOLVING_LIST_SIZE, RPA_TIMEOUT_DEFAULT_S, RPA_TIMEOUT_MAX_S,
    RPA_TIMEOUT_MIN_S,
};
pub use self::engine::{
    is_identity_address, is_nrpa, is_rpa, PrivacyEngine, ResolvingListEntry, RotatedAddress,
};
