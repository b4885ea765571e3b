//! Collaborator seams toward the RF engine and the crypto offload unit
//!
//! The core never programs the radio; it hands the RF engine explicit
//! scheduling intents and logical control exchanges, and the RF engine
//! calls back into the connection manager with completions. Everything
//! here is logical state, no over-the-air framing.

use crate::address::{AddressType, BdAddr};
use crate::conn::types::{FeatureSet, PhyMask};
use crate::error::LlResult;
use crate::filter::ScanFilterPolicy;

/// Airtime request for connection establishment as initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateRequest {
    pub handle: u16,
    pub scan_interval: u16,
    pub scan_window: u16,
    pub peer: BdAddr,
    pub peer_type: AddressType,
    /// Address the initiator puts on air, after privacy selection.
    pub own_addr: BdAddr,
    pub own_type: AddressType,
    pub interval: u16,
    pub latency: u16,
    pub timeout: u16,
    /// Initiate toward any allow-listed peer instead of `peer`.
    pub use_filter_list: bool,
}

/// Logical control exchange to run toward the peer on a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlExchange {
    ConnParamUpdate {
        interval: u16,
        latency: u16,
        timeout: u16,
        instant: u16,
    },
    ConnParamRequest {
        interval_min: u16,
        interval_max: u16,
        latency: u16,
        timeout: u16,
    },
    /// Peripheral answer to the peer's parameter request; the central
    /// still decides and imposes the instant.
    ConnParamResponse {
        interval_min: u16,
        interval_max: u16,
        latency: u16,
        timeout: u16,
    },
    ChannelMapUpdate {
        map: [u8; 5],
        instant: u16,
    },
    PhyUpdate {
        tx_phy: PhyMask,
        rx_phy: PhyMask,
        instant: u16,
    },
    /// Peripheral asks for a PHY change; the central imposes the instant.
    PhyRequest {
        tx_phy: PhyMask,
        rx_phy: PhyMask,
    },
    DataLengthRequest {
        tx_octets: u16,
        tx_time: u16,
    },
    VersionRequest,
    FeatureRequest,
    /// Central starts or refreshes encryption with the given key material.
    EncryptionStart {
        rand: [u8; 8],
        ediv: u16,
        ltk: [u8; 16],
    },
    /// Peripheral accepts the peer's encryption request with this key.
    LtkAccept {
        ltk: [u8; 16],
    },
    /// Peripheral refuses the peer's encryption request: key missing.
    LtkReject,
    /// Reject the peer's pending request with a status code.
    Reject {
        status: u8,
    },
    Terminate {
        reason: u8,
    },
}

/// Timers the core schedules through the RF engine's time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Supervision timeout for one connection, restarted on any valid RX.
    Supervision(u16),
    /// Authenticated-payload watchdog for one connection.
    AuthPayload(u16),
    /// Control-procedure response timeout for one connection.
    LlcpResponse(u16),
    /// Private-address rotation, device wide.
    RpaRotation,
}

/// RF engine seam. Implementations own the radio and the time base; every
/// method is a request, never a blocking wait. A busy radio surfaces as
/// `LlError::RadioBusy` and the core decides whether to fail or retry.
pub trait RadioHal {
    fn schedule_initiate(&mut self, request: &InitiateRequest) -> LlResult<()>;

    fn schedule_advertising(
        &mut self,
        own_addr: BdAddr,
        own_type: AddressType,
        use_filter_list: bool,
    ) -> LlResult<()>;

    fn schedule_scan(
        &mut self,
        scan_interval: u16,
        scan_window: u16,
        policy: ScanFilterPolicy,
    ) -> LlResult<()>;

    /// Keep connection events coming for a live connection.
    fn schedule_connection_event(&mut self, handle: u16) -> LlResult<()>;

    /// Drop scheduled airtime for a connection or a pending initiation.
    /// Cancelling something that no longer runs is a no-op.
    fn cancel(&mut self, handle: u16);

    /// Stop a running scan. No-op when none runs.
    fn cancel_scan(&mut self);

    /// Run a logical control exchange toward the peer.
    fn send_control(&mut self, handle: u16, exchange: ControlExchange) -> LlResult<()>;

    /// Arm a timer; re-arming restarts it.
    fn start_timer(&mut self, timer: TimerKind, duration_ms: u32);

    /// Disarm a timer. Idempotent: a fired or never-armed timer is a no-op.
    fn cancel_timer(&mut self, timer: TimerKind);
}

/// Offload unit for long-running asymmetric crypto. Jobs complete on the
/// order of 100 ms and report back through the manager's completion entry
/// points; the core never blocks on them.
pub trait KeyGenEngine {
    fn generate_p256_keypair(&mut self) -> LlResult<()>;

    fn generate_dh_key(&mut self, peer_public: [u8; 64]) -> LlResult<()>;
}

/// Outcome of one completed connection event, reported by the RF engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnEventOutcome {
    /// Event counter value of the completed event.
    pub counter: u16,
    /// At least one packet with a valid CRC was received.
    pub received_ok: bool,
    /// At least one PDU carried a valid MIC (restarts the APTO watchdog).
    pub authenticated: bool,
    pub rssi: i8,
}

/// Peer-initiated control traffic and procedure responses, delivered by
/// the RF engine after reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    VersionResponse {
        version: u8,
        company: u16,
        subversion: u16,
    },
    FeatureResponse {
        features: FeatureSet,
    },
    DataLengthResponse {
        tx_octets: u16,
        tx_time: u16,
        rx_octets: u16,
        rx_time: u16,
    },
    /// Peer asks for new connection parameters (request/reply procedure).
    ConnParamRequest {
        interval_min: u16,
        interval_max: u16,
        latency: u16,
        timeout: u16,
    },
    /// Central imposed new parameters; applies at `instant`.
    ConnParamUpdateInd {
        interval: u16,
        latency: u16,
        timeout: u16,
        instant: u16,
    },
    ChannelMapUpdateInd {
        map: [u8; 5],
        instant: u16,
    },
    PhyUpdateInd {
        tx_phy: PhyMask,
        rx_phy: PhyMask,
        instant: u16,
    },
    /// Peer (as peripheral) asks for a PHY change; this side decides.
    PhyRequest {
        tx_phy: PhyMask,
        rx_phy: PhyMask,
    },
    /// Peer (as central) wants to start or refresh encryption; the host
    /// supplies the LTK through `ltk_reply`.
    EncryptionRequest {
        rand: [u8; 8],
        ediv: u16,
    },
    /// Peer rejected our pending procedure.
    RejectInd {
        status: u8,
    },
    TerminateInd {
        reason: u8,
    },
    /// Peer acknowledged our terminate exchange.
    TerminateAck,
}
