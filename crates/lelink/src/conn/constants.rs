//! Connection management constants

use crate::conn::types::{FeatureSet, PhyMask};

/// Connection records available in the pool.
pub const MAX_CONNECTIONS: usize = 8;

/// Minimum distance, in connection events, between scheduling a control
/// procedure and its instant. Gives the peer time to acknowledge before
/// the switch.
pub const MIN_INSTANT_OFFSET: u16 = 6;

/// Half the event-counter range; instants further away than this are in
/// the past once wrapping is accounted for.
pub const EVENT_COUNTER_HALF_RANGE: u16 = 0x8000;

/// Authenticated payload timeout default, in 10 ms units (30 s).
pub const APTO_DEFAULT: u16 = 0x0BB8;

/// Control procedures abandoned after this long without a peer response.
pub const LLCP_RESPONSE_TIMEOUT_MS: u32 = 40_000;

/// Link layer version reported in version exchanges (5.0).
pub const LOCAL_VERSION: u8 = 0x09;
pub const LOCAL_COMPANY_ID: u16 = 0x05F1;
pub const LOCAL_SUBVERSION: u16 = 0x0100;

/// Feature bits this controller asserts in feature exchanges.
pub const LOCAL_FEATURES: FeatureSet = FeatureSet::ENCRYPTION
    .union(FeatureSet::CONN_PARAM_REQUEST)
    .union(FeatureSet::EXTENDED_REJECT)
    .union(FeatureSet::PERIPHERAL_FEATURE_EXCHANGE)
    .union(FeatureSet::PING)
    .union(FeatureSet::DATA_LENGTH_EXTENSION)
    .union(FeatureSet::LL_PRIVACY)
    .union(FeatureSet::PHY_2M);

/// PHYs this controller can actually run.
pub const SUPPORTED_PHYS: PhyMask = PhyMask::PHY_1M.union(PhyMask::PHY_2M);

/// Data-channel PDU payload limits carried by the unnegotiated link.
pub const DATA_LEN_OCTETS_DEFAULT: u16 = 0x001B;
pub const DATA_LEN_TIME_DEFAULT: u16 = 0x0148;

/// Scan timing used until the host sets its own, 0.625 ms units.
pub const SCAN_INTERVAL_DEFAULT: u16 = 0x0010;
pub const SCAN_WINDOW_DEFAULT: u16 = 0x0010;

/// What this controller can be negotiated up to.
pub const DATA_LEN_OCTETS_MAX: u16 = 0x00FB;
pub const DATA_LEN_TIME_MAX: u16 = 0x4290;

/// All 37 data channels enabled.
pub const CHANNEL_MAP_DEFAULT: [u8; 5] = [0xFF, 0xFF, 0xFF, 0xFF, 0x1F];

// Termination reasons a host may pass to a disconnect request.
pub const REASON_AUTH_FAILURE: u8 = 0x05;
pub const REASON_REMOTE_USER_TERM: u8 = 0x13;
pub const REASON_REMOTE_LOW_RESOURCES: u8 = 0x14;
pub const REASON_REMOTE_POWER_OFF: u8 = 0x15;
pub const REASON_LOCAL_HOST_TERM: u8 = 0x16;
pub const REASON_UNSUPPORTED_REMOTE_FEATURE: u8 = 0x1A;
pub const REASON_KEY_LENGTH_UNSUPPORTED: u8 = 0x29;
pub const REASON_UNACCEPTABLE_CONN_PARAMS: u8 = 0x3B;

// Termination reasons raised by the controller itself.
pub const REASON_SUPERVISION_TIMEOUT: u8 = 0x08;
pub const REASON_KEY_MISSING: u8 = 0x06;
pub const REASON_LLCP_TIMEOUT: u8 = 0x22;
pub const REASON_INSTANT_PASSED: u8 = 0x28;
pub const REASON_FAILED_TO_ESTABLISH: u8 = 0x3E;

// Status carried in a reject when a peer request collides with a
// procedure already in flight.
pub const REASON_LL_TRANSACTION_COLLISION: u8 = 0x2A;

/// Reasons `disconnect` accepts from the host.
pub const HOST_TERM_REASONS: [u8; 8] = [
    REASON_AUTH_FAILURE,
    REASON_REMOTE_USER_TERM,
    REASON_REMOTE_LOW_RESOURCES,
    REASON_REMOTE_POWER_OFF,
    REASON_LOCAL_HOST_TERM,
    REASON_UNSUPPORTED_REMOTE_FEATURE,
    REASON_KEY_LENGTH_UNSUPPORTED,
    REASON_UNACCEPTABLE_CONN_PARAMS,
];
