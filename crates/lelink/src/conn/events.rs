//! Events the connection manager raises toward the host
//!
//! Every asynchronous outcome arrives here, successes and failures alike.
//! Events that can fail carry a status code from
//! [`crate::error`]; payload fields are meaningful when the status is
//! [`STATUS_SUCCESS`](crate::error::STATUS_SUCCESS).

use crate::address::{AddressType, BdAddr};
use crate::conn::types::{FeatureSet, PhyMask, Role, SleepClockAccuracy, VersionInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A connection attempt finished, successfully or not. On a cancel
    /// or establish failure only `status` and `handle` are meaningful.
    ConnectionEstablished {
        status: u8,
        handle: u16,
        role: Role,
        peer_type: AddressType,
        peer_addr: BdAddr,
        /// Private address this device used, when privacy was active.
        local_rpa: Option<BdAddr>,
        /// Private address the peer used, when it resolved to an identity.
        peer_rpa: Option<BdAddr>,
        interval: u16,
        latency: u16,
        timeout: u16,
        sca: SleepClockAccuracy,
    },
    Disconnected {
        handle: u16,
        reason: u8,
    },
    /// A parameter update completed or was rejected by the peer.
    ConnParamsUpdated {
        status: u8,
        handle: u16,
        interval: u16,
        latency: u16,
        timeout: u16,
    },
    /// The peer asked for new parameters; answer with
    /// `remote_conn_param_reply` or `remote_conn_param_neg_reply`.
    RemoteConnParamsRequested {
        handle: u16,
        interval_min: u16,
        interval_max: u16,
        latency: u16,
        timeout: u16,
    },
    /// The peer wants to encrypt; answer with `ltk_reply` or
    /// `ltk_negative_reply`.
    LtkRequested {
        handle: u16,
        rand: [u8; 8],
        ediv: u16,
    },
    /// Encryption turned on or off, or the handshake failed.
    EncryptionChange {
        status: u8,
        handle: u16,
        enabled: bool,
    },
    /// A re-key round trip finished; the link stayed encrypted throughout.
    EncryptionKeyRefreshed {
        status: u8,
        handle: u16,
    },
    RemoteVersion {
        status: u8,
        handle: u16,
        version: VersionInfo,
    },
    RemoteFeatures {
        status: u8,
        handle: u16,
        features: FeatureSet,
    },
    /// Negotiated PDU limits changed in at least one direction.
    DataLengthChanged {
        handle: u16,
        tx_octets: u16,
        tx_time: u16,
        rx_octets: u16,
        rx_time: u16,
    },
    PhyUpdated {
        status: u8,
        handle: u16,
        tx_phy: PhyMask,
        rx_phy: PhyMask,
    },
    /// No authenticated PDU arrived within the APTO window.
    AptoExpired {
        handle: u16,
    },
    P256PublicKeyReady {
        status: u8,
        public_key: [u8; 64],
    },
    DhKeyReady {
        status: u8,
        dh_key: [u8; 32],
    },
    /// A scan report, with the address rewritten to the peer identity
    /// when resolution matched a resolving-list entry.
    AdvertisingReport {
        addr_type: AddressType,
        addr: BdAddr,
        rssi: i8,
        data: Vec<u8>,
    },
}

/// Host callback. The manager is single-context, so the handler runs
/// inline on whichever entry point produced the event.
pub type LinkEventHandler = Box<dyn FnMut(LinkEvent)>;
