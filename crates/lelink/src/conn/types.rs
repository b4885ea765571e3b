//! Connection record and the state carried per link
//!
//! A pool slot holding `None` is the idle state; every other state lives
//! on the record itself. Control procedures that wait on the peer or on
//! an instant occupy the record's single `pending` slot, which is what
//! enforces the one-procedure-at-a-time rule.

use bitflags::bitflags;

use crate::address::{AddressType, BdAddr};
use crate::conn::constants::{
    APTO_DEFAULT, CHANNEL_MAP_DEFAULT, DATA_LEN_OCTETS_DEFAULT, DATA_LEN_TIME_DEFAULT,
    EVENT_COUNTER_HALF_RANGE, MIN_INSTANT_OFFSET,
};

bitflags! {
    /// Link layer feature bits exchanged during a feature request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureSet: u64 {
        const ENCRYPTION = 1 << 0;
        const CONN_PARAM_REQUEST = 1 << 1;
        const EXTENDED_REJECT = 1 << 2;
        const PERIPHERAL_FEATURE_EXCHANGE = 1 << 3;
        const PING = 1 << 4;
        const DATA_LENGTH_EXTENSION = 1 << 5;
        const LL_PRIVACY = 1 << 6;
        const EXT_SCANNER_FILTER = 1 << 7;
        const PHY_2M = 1 << 8;
        const PHY_CODED = 1 << 11;
    }
}

bitflags! {
    /// Selectable PHYs, one bit per rate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PhyMask: u8 {
        const PHY_1M = 0x01;
        const PHY_2M = 0x02;
        const PHY_CODED = 0x04;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Central,
    Peripheral,
}

/// Lifecycle of one record. Idle is the absence of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Initiator airtime scheduled, waiting for the connection to form.
    Initiating,
    /// Advertising as connectable, waiting for an initiator.
    AdvertisingPending,
    Connected,
    /// Terminate exchange in flight, record freed on ack or timeout.
    Terminating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionState {
    Off,
    /// Handshake in flight; data traffic is paused.
    Pending,
    On,
}

/// Worst-case sleep clock accuracy the peer advertised at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepClockAccuracy {
    Ppm500,
    Ppm250,
    Ppm150,
    Ppm100,
    Ppm75,
    Ppm50,
    Ppm30,
    Ppm20,
}

impl From<u8> for SleepClockAccuracy {
    fn from(value: u8) -> SleepClockAccuracy {
        match value {
            0x01 => SleepClockAccuracy::Ppm250,
            0x02 => SleepClockAccuracy::Ppm150,
            0x03 => SleepClockAccuracy::Ppm100,
            0x04 => SleepClockAccuracy::Ppm75,
            0x05 => SleepClockAccuracy::Ppm50,
            0x06 => SleepClockAccuracy::Ppm30,
            0x07 => SleepClockAccuracy::Ppm20,
            _ => SleepClockAccuracy::Ppm500,
        }
    }
}

/// Timing actually in force on a live connection. Interval in 1.25 ms
/// units, timeout in 10 ms units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnParams {
    pub interval: u16,
    pub latency: u16,
    pub timeout: u16,
}

/// Negotiated data-channel PDU limits, per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLength {
    pub tx_octets: u16,
    pub tx_time: u16,
    pub rx_octets: u16,
    pub rx_time: u16,
}

impl Default for DataLength {
    fn default() -> DataLength {
        DataLength {
            tx_octets: DATA_LEN_OCTETS_DEFAULT,
            tx_time: DATA_LEN_TIME_DEFAULT,
            rx_octets: DATA_LEN_OCTETS_DEFAULT,
            rx_time: DATA_LEN_TIME_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: u8,
    pub company: u16,
    pub subversion: u16,
}

/// The control procedure currently occupying a connection. At most one
/// runs at a time; instant-bearing variants complete when the event
/// counter reaches their instant, the rest when the peer answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingProcedure {
    /// Central imposed new parameters, switching at `instant`.
    ParamUpdate {
        interval: u16,
        latency: u16,
        timeout: u16,
        instant: u16,
    },
    /// Peripheral asked for new parameters, waiting on the central.
    ParamRequest {
        interval_min: u16,
        interval_max: u16,
        latency: u16,
        timeout: u16,
    },
    /// Peer asked for new parameters, waiting on the host's decision.
    RemoteParamDecision {
        interval_min: u16,
        interval_max: u16,
        latency: u16,
        timeout: u16,
    },
    ChannelMapUpdate {
        map: [u8; 5],
        instant: u16,
    },
    /// PHY switch with a known instant.
    PhyUpdate {
        tx_phy: PhyMask,
        rx_phy: PhyMask,
        instant: u16,
    },
    /// Peripheral asked for a PHY change, waiting on the central.
    PhyRequest {
        tx_phy: PhyMask,
        rx_phy: PhyMask,
    },
    DataLengthUpdate {
        tx_octets: u16,
        tx_time: u16,
    },
    VersionExchange,
    FeatureExchange,
    Encryption,
}

impl PendingProcedure {
    /// Event-counter value at which the procedure takes effect, for the
    /// variants that switch at an instant.
    pub fn instant(&self) -> Option<u16> {
        match self {
            PendingProcedure::ParamUpdate { instant, .. }
            | PendingProcedure::ChannelMapUpdate { instant, .. }
            | PendingProcedure::PhyUpdate { instant, .. } => Some(*instant),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PendingProcedure::ParamUpdate { .. } => "param update",
            PendingProcedure::ParamRequest { .. } => "param request",
            PendingProcedure::RemoteParamDecision { .. } => "remote param decision",
            PendingProcedure::ChannelMapUpdate { .. } => "channel map update",
            PendingProcedure::PhyUpdate { .. } => "phy update",
            PendingProcedure::PhyRequest { .. } => "phy request",
            PendingProcedure::DataLengthUpdate { .. } => "data length update",
            PendingProcedure::VersionExchange => "version exchange",
            PendingProcedure::FeatureExchange => "feature exchange",
            PendingProcedure::Encryption => "encryption",
        }
    }
}

/// Everything the link layer tracks for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub handle: u16,
    pub state: ConnState,
    pub role: Role,
    /// Peer identity after resolution; the air address when unresolved.
    pub peer_type: AddressType,
    pub peer_addr: BdAddr,
    /// Air address the peer actually used, when it was a resolved RPA.
    pub peer_rpa: Option<BdAddr>,
    /// Private address this device used for the connection, if any.
    pub local_rpa: Option<BdAddr>,
    pub params: ConnParams,
    pub channel_map: [u8; 5],
    pub sca: SleepClockAccuracy,
    pub encryption: EncryptionState,
    /// The pending encryption handshake refreshes an existing key.
    pub re_key: bool,
    pub tx_phy: PhyMask,
    pub rx_phy: PhyMask,
    pub data_len: DataLength,
    pub pending: Option<PendingProcedure>,
    /// Counter of the most recently completed connection event.
    pub event_counter: u16,
    /// Authenticated payload timeout, 10 ms units.
    pub apto: u16,
    pub peer_version: Option<VersionInfo>,
    pub peer_features: Option<FeatureSet>,
    pub rssi: i8,
    /// Reason to report once an in-flight teardown completes.
    pub term_reason: u8,
}

impl ConnectionRecord {
    pub fn new(
        handle: u16,
        role: Role,
        state: ConnState,
        peer_type: AddressType,
        peer_addr: BdAddr,
    ) -> ConnectionRecord {
        ConnectionRecord {
            handle,
            state,
            role,
            peer_type,
            peer_addr,
            peer_rpa: None,
            local_rpa: None,
            params: ConnParams {
                interval: 0,
                latency: 0,
                timeout: 0,
            },
            channel_map: CHANNEL_MAP_DEFAULT,
            sca: SleepClockAccuracy::Ppm500,
            encryption: EncryptionState::Off,
            re_key: false,
            tx_phy: PhyMask::PHY_1M,
            rx_phy: PhyMask::PHY_1M,
            data_len: DataLength::default(),
            pending: None,
            event_counter: 0,
            apto: APTO_DEFAULT,
            peer_version: None,
            peer_features: None,
            rssi: 0,
            term_reason: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    /// Connected with a control procedure in flight.
    pub fn is_updating(&self) -> bool {
        self.state == ConnState::Connected && self.pending.is_some()
    }
}

/// True once `counter` has reached `instant`, with wrapping accounted
/// for: anything up to half the counter range ahead counts as reached.
pub fn instant_reached(counter: u16, instant: u16) -> bool {
    counter.wrapping_sub(instant) < EVENT_COUNTER_HALF_RANGE
}

/// Pick the instant for a procedure scheduled now: far enough out that
/// a latency-sleeping peripheral still hears the request in time.
pub fn plan_instant(counter: u16, latency: u16) -> u16 {
    counter.wrapping_add(MIN_INSTANT_OFFSET).wrapping_add(latency)
}
