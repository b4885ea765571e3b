//! Constants for the privacy engine

/// Resolving list capacity, including the reserved local slot.
pub const RESOLVING_LIST_SIZE: usize = 16;

/// Slot holding this device's own identity and IRK.
pub const LOCAL_RL_INDEX: usize = 0;

// Private-address rotation timeout, in seconds
pub const RPA_TIMEOUT_DEFAULT_S: u16 = 0x0384;
pub const RPA_TIMEOUT_MIN_S: u16 = 0x0001;
pub const RPA_TIMEOUT_MAX_S: u16 = 0xA1B8;

/// Octets of the random part (prand) and of the hash part of an RPA.
pub const PRAND_LEN: usize = 3;
pub const ADDR_HASH_LEN: usize = 3;
