//! Connection manager, the serialized core of the link layer
//!
//! Owns the connection pool, the privacy engine, and the allow list, and
//! drives them from two sides: host commands validate and then push work
//! to the RF engine; RF callbacks report what actually happened on air.
//! Every entry point runs to completion on the caller's context, so no
//! state here needs interior locking.
//!
//! A connection's single pending procedure and its response timer move
//! together: the timer is armed whenever a procedure is set and disarmed
//! when it clears, so an unanswered exchange always resolves one way or
//! the other.

use log::{debug, info, warn};

use crate::address::{AddressType, BdAddr};
use crate::conn::constants::*;
use crate::conn::events::{LinkEvent, LinkEventHandler};
use crate::conn::types::{
    instant_reached, plan_instant, ConnParams, ConnState, ConnectionRecord, DataLength,
    EncryptionState, FeatureSet, PendingProcedure, PhyMask, Role, SleepClockAccuracy, VersionInfo,
};
use crate::error::{LlError, LlResult, STATUS_OPERATION_CANCELLED, STATUS_SUCCESS};
use crate::filter::{InitiatorFilterPolicy, ScanFilterPolicy, WhiteList};
use crate::privacy::PrivacyEngine;
use crate::radio::{
    ConnEventOutcome, ControlExchange, InitiateRequest, KeyGenEngine, PeerMessage, RadioHal,
    TimerKind,
};
use crate::timing;

/// Parameters for an outgoing connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateConnParams {
    /// How often to listen for the peer, 0.625 ms units.
    pub scan_interval: u16,
    pub scan_window: u16,
    pub filter_policy: InitiatorFilterPolicy,
    pub peer_type: AddressType,
    pub peer_addr: BdAddr,
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub timeout: u16,
}

/// Requested parameter change on a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnUpdateParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub timeout: u16,
}

/// Addresses this device owns outright.
struct DeviceIdentity {
    public_addr: BdAddr,
    random_addr: Option<BdAddr>,
}

pub struct ConnectionManager {
    identity: DeviceIdentity,
    records: [Option<ConnectionRecord>; MAX_CONNECTIONS],
    privacy: PrivacyEngine,
    filter: WhiteList,
    radio: Box<dyn RadioHal>,
    keygen: Box<dyn KeyGenEngine>,
    handler: Option<LinkEventHandler>,
    scan_interval: u16,
    scan_window: u16,
    scan_policy: ScanFilterPolicy,
    scanning: bool,
    adv_use_filter: bool,
    suggested_data_len: (u16, u16),
    default_tx_phy: PhyMask,
    default_rx_phy: PhyMask,
    default_channel_map: [u8; 5],
    p256_pending: bool,
    dh_pending: bool,
}

impl ConnectionManager {
    pub fn new(
        public_addr: BdAddr,
        radio: Box<dyn RadioHal>,
        keygen: Box<dyn KeyGenEngine>,
    ) -> Self {
        Self {
            identity: DeviceIdentity {
                public_addr,
                random_addr: None,
            },
            records: std::array::from_fn(|_| None),
            privacy: PrivacyEngine::new(),
            filter: WhiteList::new(),
            radio,
            keygen,
            handler: None,
            scan_interval: SCAN_INTERVAL_DEFAULT,
            scan_window: SCAN_WINDOW_DEFAULT,
            scan_policy: ScanFilterPolicy::AcceptAll,
            scanning: false,
            adv_use_filter: false,
            suggested_data_len: (DATA_LEN_OCTETS_DEFAULT, DATA_LEN_TIME_DEFAULT),
            default_tx_phy: PhyMask::PHY_1M,
            default_rx_phy: PhyMask::PHY_1M,
            default_channel_map: CHANNEL_MAP_DEFAULT,
            p256_pending: false,
            dh_pending: false,
        }
    }

    /// Install the host event callback. Events fire inline from whichever
    /// command or RF callback produced them.
    pub fn set_event_handler<F>(&mut self, handler: F)
    where
        F: FnMut(LinkEvent) + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    /// Drop every connection and air operation and return configuration
    /// to defaults. Identity, the resolving list, and the allow list
    /// survive; address resolution restarts disabled.
    pub fn reset(&mut self) {
        for handle in 0..MAX_CONNECTIONS as u16 {
            self.free_record(handle);
        }
        if self.scanning {
            self.radio.cancel_scan();
            self.scanning = false;
        }
        self.radio.cancel_timer(TimerKind::RpaRotation);
        self.privacy.set_resolution_enabled(false);
        self.filter.teardown_privacy();
        self.filter.clear_ignore_list();
        self.scan_interval = SCAN_INTERVAL_DEFAULT;
        self.scan_window = SCAN_WINDOW_DEFAULT;
        self.scan_policy = ScanFilterPolicy::AcceptAll;
        self.adv_use_filter = false;
        self.suggested_data_len = (DATA_LEN_OCTETS_DEFAULT, DATA_LEN_TIME_DEFAULT);
        self.default_tx_phy = PhyMask::PHY_1M;
        self.default_rx_phy = PhyMask::PHY_1M;
        self.default_channel_map = CHANNEL_MAP_DEFAULT;
        self.p256_pending = false;
        self.dh_pending = false;
        info!("link layer reset; identity and filter tables kept");
    }

    pub fn read_bd_addr(&self) -> BdAddr {
        self.identity.public_addr
    }

    /// Set the static random address used when no privacy is active.
    pub fn set_random_address(&mut self, addr: BdAddr) -> LlResult<()> {
        if !addr.is_valid_static_random() {
            return Err(LlError::InvalidParameter(format!(
                "{} is not a static random address",
                addr
            )));
        }
        if self.air_ops_active() {
            return Err(LlError::CommandDisallowed(
                "own address in use by an air operation".into(),
            ));
        }
        self.identity.random_addr = Some(addr);
        Ok(())
    }

    pub fn local_version(&self) -> VersionInfo {
        VersionInfo {
            version: LOCAL_VERSION,
            company: LOCAL_COMPANY_ID,
            subversion: LOCAL_SUBVERSION,
        }
    }

    pub fn local_features(&self) -> FeatureSet {
        LOCAL_FEATURES
    }

    pub fn connection(&self, handle: u16) -> Option<&ConnectionRecord> {
        self.records.get(handle as usize).and_then(Option::as_ref)
    }

    /// Pool slots currently occupied, in any state.
    pub fn active_connections(&self) -> usize {
        self.records.iter().flatten().count()
    }

    pub fn privacy(&self) -> &PrivacyEngine {
        &self.privacy
    }

    pub fn white_list(&self) -> &WhiteList {
        &self.filter
    }

    // ------------------------------------------------------------------
    // Privacy and filter configuration
    // ------------------------------------------------------------------

    pub fn set_local_identity(&mut self, id_type: AddressType, id_addr: BdAddr, irk: [u8; 16]) {
        self.privacy.set_local_identity(id_type, id_addr, irk);
    }

    /// Add a peer identity and IRK, keeping the allow-list shadow row for
    /// its private address in step.
    pub fn add_resolving_entry(
        &mut self,
        id_type: AddressType,
        id_addr: BdAddr,
        irk: [u8; 16],
    ) -> LlResult<()> {
        let previous = self
            .privacy
            .find_peer(id_type, id_addr)
            .and_then(|index| self.privacy.entry(index))
            .map(|entry| entry.rpa)
            .unwrap_or(BdAddr::ZERO);
        let index = self.privacy.add_peer(id_type, id_addr, irk)?;
        if self.privacy.resolution_enabled() {
            if let Some(entry) = self.privacy.entry(index) {
                if !entry.rpa.is_zero() {
                    if let Err(err) = self.filter.update_entry(index, previous, entry.rpa) {
                        warn!("shadow row for resolving entry {} not set: {}", index, err);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn remove_resolving_entry(
        &mut self,
        id_type: AddressType,
        id_addr: BdAddr,
    ) -> LlResult<()> {
        let (index, _) = self.privacy.remove_peer(id_type, id_addr)?;
        self.filter.drop_shadow(index);
        Ok(())
    }

    pub fn clear_resolving_list(&mut self) {
        self.privacy.clear_peers();
        self.filter.teardown_privacy();
        if self.privacy.resolution_enabled() {
            self.filter.setup_privacy(self.privacy.active_entries());
        }
    }

    pub fn resolving_list_size(&self) -> usize {
        self.privacy.capacity()
    }

    pub fn read_local_rpa(&self) -> LlResult<BdAddr> {
        self.privacy.read_local_rpa()
    }

    pub fn read_peer_rpa(&self, id_type: AddressType, id_addr: BdAddr) -> LlResult<BdAddr> {
        self.privacy.read_peer_rpa(id_type, id_addr)
    }

    /// Turn address resolution on or off. Refused while the radio is
    /// putting addresses on air; live connections are unaffected.
    pub fn set_address_resolution(&mut self, enable: bool) -> LlResult<()> {
        if self.air_ops_active() {
            return Err(LlError::CommandDisallowed(
                "resolution toggled while the radio is using addresses".into(),
            ));
        }
        if enable == self.privacy.resolution_enabled() {
            return Ok(());
        }
        self.privacy.set_resolution_enabled(enable);
        if enable {
            self.privacy.rotate();
            self.filter.setup_privacy(self.privacy.active_entries());
            self.radio.start_timer(
                TimerKind::RpaRotation,
                self.privacy.rpa_timeout() as u32 * 1000,
            );
            info!("address resolution enabled");
        } else {
            self.filter.teardown_privacy();
            self.radio.cancel_timer(TimerKind::RpaRotation);
            info!("address resolution disabled");
        }
        Ok(())
    }

    /// Set the rotation period. Takes effect immediately when rotation
    /// is running.
    pub fn set_rpa_timeout(&mut self, seconds: u16) -> LlResult<()> {
        self.privacy.set_rpa_timeout(seconds)?;
        if self.privacy.resolution_enabled() {
            self.radio
                .start_timer(TimerKind::RpaRotation, seconds as u32 * 1000);
        }
        Ok(())
    }

    pub fn add_white_list_entry(&mut self, addr_type: AddressType, addr: BdAddr) -> LlResult<()> {
        self.filter.add(addr_type, addr).map(|_| ())
    }

    pub fn remove_white_list_entry(
        &mut self,
        addr_type: AddressType,
        addr: BdAddr,
    ) -> LlResult<()> {
        self.filter.remove(addr_type, addr)
    }

    /// Clear the allow list. Shadow rows derive from the resolving list,
    /// so they are rebuilt rather than lost.
    pub fn clear_white_list(&mut self) {
        self.filter.clear();
        if self.privacy.resolution_enabled() {
            self.filter.setup_privacy(self.privacy.active_entries());
        }
    }

    pub fn white_list_size(&self) -> usize {
        self.filter.capacity()
    }

    pub fn white_list_free(&self) -> usize {
        self.filter.free_count()
    }

    // ------------------------------------------------------------------
    // Scanning and advertising
    // ------------------------------------------------------------------

    pub fn set_scan_parameters(
        &mut self,
        interval: u16,
        window: u16,
        policy: ScanFilterPolicy,
    ) -> LlResult<()> {
        timing::check_scan_timing(interval, window)?;
        if self.scanning {
            return Err(LlError::CommandDisallowed(
                "scan parameters locked while scanning".into(),
            ));
        }
        self.scan_interval = interval;
        self.scan_window = window;
        self.scan_policy = policy;
        Ok(())
    }

    pub fn start_scan(&mut self) -> LlResult<()> {
        if self.scanning {
            return Err(LlError::CommandDisallowed("scan already running".into()));
        }
        self.radio
            .schedule_scan(self.scan_interval, self.scan_window, self.scan_policy)?;
        self.scanning = true;
        Ok(())
    }

    pub fn stop_scan(&mut self) -> LlResult<()> {
        if !self.scanning {
            return Err(LlError::CommandDisallowed("no scan running".into()));
        }
        self.radio.cancel_scan();
        self.scanning = false;
        Ok(())
    }

    /// Advertise as connectable, reserving a pool slot for the connection
    /// an initiator may form.
    pub fn start_advertising(&mut self, use_filter: bool) -> LlResult<u16> {
        if self.find_state(ConnState::AdvertisingPending).is_some() {
            return Err(LlError::CommandDisallowed("already advertising".into()));
        }
        let Some(slot) = self.free_slot() else {
            return Err(LlError::ConnectionLimit);
        };
        let handle = slot as u16;
        let (own_type, own_addr, local_rpa) = self.own_air_address();
        self.radio
            .schedule_advertising(own_addr, own_type, use_filter)?;
        let mut record = ConnectionRecord::new(
            handle,
            Role::Peripheral,
            ConnState::AdvertisingPending,
            AddressType::Public,
            BdAddr::ZERO,
        );
        record.local_rpa = local_rpa;
        record.channel_map = self.default_channel_map;
        self.records[slot] = Some(record);
        self.adv_use_filter = use_filter;
        info!("advertising as {} ({:?})", own_addr, own_type);
        Ok(handle)
    }

    pub fn stop_advertising(&mut self) -> LlResult<()> {
        let Some(slot) = self.find_state(ConnState::AdvertisingPending) else {
            return Err(LlError::CommandDisallowed("not advertising".into()));
        };
        if let Some(record) = self.records[slot].take() {
            self.radio.cancel(record.handle);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Connection establishment
    // ------------------------------------------------------------------

    /// Start initiating toward a peer. Nothing is committed if the radio
    /// refuses the request.
    pub fn create_connection(&mut self, params: &CreateConnParams) -> LlResult<u16> {
        timing::check_scan_timing(params.scan_interval, params.scan_window)?;
        timing::check_conn_params(
            params.interval_min,
            params.interval_max,
            params.latency,
            params.timeout,
        )?;
        if self.find_state(ConnState::Initiating).is_some() {
            return Err(LlError::CommandDisallowed(
                "connection attempt already pending".into(),
            ));
        }
        if params.filter_policy == InitiatorFilterPolicy::WhiteList && self.filter.used() == 0 {
            warn!("initiating against an empty allow list");
        }
        let Some(slot) = self.free_slot() else {
            return Err(LlError::ConnectionLimit);
        };
        let handle = slot as u16;
        let (own_type, own_addr, local_rpa) = self.own_air_address();
        let request = InitiateRequest {
            handle,
            scan_interval: params.scan_interval,
            scan_window: params.scan_window,
            peer: params.peer_addr,
            peer_type: params.peer_type,
            own_addr,
            own_type,
            interval: params.interval_max,
            latency: params.latency,
            timeout: params.timeout,
            use_filter_list: params.filter_policy == InitiatorFilterPolicy::WhiteList,
        };
        self.radio.schedule_initiate(&request)?;
        let mut record = ConnectionRecord::new(
            handle,
            Role::Central,
            ConnState::Initiating,
            params.peer_type,
            params.peer_addr,
        );
        record.params = ConnParams {
            interval: params.interval_max,
            latency: params.latency,
            timeout: params.timeout,
        };
        record.local_rpa = local_rpa;
        record.channel_map = self.default_channel_map;
        self.records[slot] = Some(record);
        info!(
            "connection {} initiating toward {} ({:?})",
            handle, params.peer_addr, params.peer_type
        );
        Ok(handle)
    }

    /// Abandon the pending connection attempt. Completion is reported
    /// through the event handler with a cancelled status.
    pub fn create_connection_cancel(&mut self) -> LlResult<()> {
        let Some(slot) = self.find_state(ConnState::Initiating) else {
            return Err(LlError::CommandDisallowed(
                "no connection attempt pending".into(),
            ));
        };
        let Some(record) = self.records[slot].take() else {
            return Err(LlError::CommandDisallowed(
                "no connection attempt pending".into(),
            ));
        };
        self.radio.cancel(record.handle);
        info!("connection attempt {} cancelled", record.handle);
        self.emit(LinkEvent::ConnectionEstablished {
            status: STATUS_OPERATION_CANCELLED,
            handle: record.handle,
            role: record.role,
            peer_type: record.peer_type,
            peer_addr: record.peer_addr,
            local_rpa: record.local_rpa,
            peer_rpa: None,
            interval: 0,
            latency: 0,
            timeout: 0,
            sca: record.sca,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Live-connection commands
    // ------------------------------------------------------------------

    /// Graceful disconnect: run the terminate exchange, free the record
    /// when the peer acknowledges or the response timer expires.
    pub fn disconnect(&mut self, handle: u16, reason: u8) -> LlResult<()> {
        if !HOST_TERM_REASONS.contains(&reason) {
            return Err(LlError::InvalidParameter(format!(
                "termination reason {:#04x}",
                reason
            )));
        }
        {
            let record = self.record_ref(handle)?;
            match record.state {
                ConnState::Connected => {}
                ConnState::Terminating => {
                    return Err(LlError::CommandDisallowed(format!(
                        "connection {} already terminating",
                        handle
                    )))
                }
                ConnState::Initiating | ConnState::AdvertisingPending => {
                    return Err(LlError::CommandDisallowed(
                        "connection not established; cancel the attempt instead".into(),
                    ))
                }
            }
        }
        self.begin_terminate(handle, reason)?;
        info!("connection {} terminating, reason {:#04x}", handle, reason);
        Ok(())
    }

    /// Immediate local teardown: no exchange toward the peer, the record
    /// is freed before this returns.
    pub fn disconnect_immediate(&mut self, handle: u16) -> LlResult<()> {
        if self.connection(handle).is_none() {
            return Err(LlError::InactiveConnection(handle));
        }
        info!("connection {} torn down locally", handle);
        self.teardown(handle, REASON_LOCAL_HOST_TERM);
        Ok(())
    }

    /// Change connection parameters. The central imposes an instant; the
    /// peripheral asks the central through the request procedure.
    pub fn update_connection(&mut self, handle: u16, update: &ConnUpdateParams) -> LlResult<()> {
        timing::check_conn_params(
            update.interval_min,
            update.interval_max,
            update.latency,
            update.timeout,
        )?;
        let (role, counter, current_latency, peer_features) = {
            let record = self.ready_for_procedure(handle)?;
            (
                record.role,
                record.event_counter,
                record.params.latency,
                record.peer_features,
            )
        };
        match role {
            Role::Central => {
                let instant = plan_instant(counter, current_latency);
                self.radio.send_control(
                    handle,
                    ControlExchange::ConnParamUpdate {
                        interval: update.interval_max,
                        latency: update.latency,
                        timeout: update.timeout,
                        instant,
                    },
                )?;
                self.set_pending(
                    handle,
                    PendingProcedure::ParamUpdate {
                        interval: update.interval_max,
                        latency: update.latency,
                        timeout: update.timeout,
                        instant,
                    },
                );
            }
            Role::Peripheral => {
                if let Some(features) = peer_features {
                    if !features.contains(FeatureSet::CONN_PARAM_REQUEST) {
                        return Err(LlError::UnsupportedFeature(
                            "peer lacks the parameter request procedure".into(),
                        ));
                    }
                }
                self.radio.send_control(
                    handle,
                    ControlExchange::ConnParamRequest {
                        interval_min: update.interval_min,
                        interval_max: update.interval_max,
                        latency: update.latency,
                        timeout: update.timeout,
                    },
                )?;
                self.set_pending(
                    handle,
                    PendingProcedure::ParamRequest {
                        interval_min: update.interval_min,
                        interval_max: update.interval_max,
                        latency: update.latency,
                        timeout: update.timeout,
                    },
                );
            }
        }
        Ok(())
    }

    /// Accept the peer's parameter request raised by
    /// [`LinkEvent::RemoteConnParamsRequested`].
    pub fn remote_conn_param_reply(
        &mut self,
        handle: u16,
        update: &ConnUpdateParams,
    ) -> LlResult<()> {
        timing::check_conn_params(
            update.interval_min,
            update.interval_max,
            update.latency,
            update.timeout,
        )?;
        let (role, counter, current_latency) = {
            let record = self.connected_ref(handle)?;
            if !matches!(record.pending, Some(PendingProcedure::RemoteParamDecision { .. })) {
                return Err(LlError::CommandDisallowed(format!(
                    "no parameter request outstanding on connection {}",
                    handle
                )));
            }
            (record.role, record.event_counter, record.params.latency)
        };
        match role {
            Role::Central => {
                let instant = plan_instant(counter, current_latency);
                self.radio.send_control(
                    handle,
                    ControlExchange::ConnParamUpdate {
                        interval: update.interval_max,
                        latency: update.latency,
                        timeout: update.timeout,
                        instant,
                    },
                )?;
                self.set_pending(
                    handle,
                    PendingProcedure::ParamUpdate {
                        interval: update.interval_max,
                        latency: update.latency,
                        timeout: update.timeout,
                        instant,
                    },
                );
            }
            Role::Peripheral => {
                self.radio.send_control(
                    handle,
                    ControlExchange::ConnParamResponse {
                        interval_min: update.interval_min,
                        interval_max: update.interval_max,
                        latency: update.latency,
                        timeout: update.timeout,
                    },
                )?;
                self.set_pending(
                    handle,
                    PendingProcedure::ParamRequest {
                        interval_min: update.interval_min,
                        interval_max: update.interval_max,
                        latency: update.latency,
                        timeout: update.timeout,
                    },
                );
            }
        }
        Ok(())
    }

    /// Refuse the peer's parameter request with a reason code.
    pub fn remote_conn_param_neg_reply(&mut self, handle: u16, reason: u8) -> LlResult<()> {
        {
            let record = self.connected_ref(handle)?;
            if !matches!(record.pending, Some(PendingProcedure::RemoteParamDecision { .. })) {
                return Err(LlError::CommandDisallowed(format!(
                    "no parameter request outstanding on connection {}",
                    handle
                )));
            }
        }
        self.radio
            .send_control(handle, ControlExchange::Reject { status: reason })?;
        self.clear_pending(handle);
        Ok(())
    }

    /// Push a new channel map to every central-role connection. Checked
    /// against all of them before any is touched.
    pub fn update_channel_map(&mut self, map: [u8; 5]) -> LlResult<()> {
        timing::check_channel_map(map)?;
        let mut targets = Vec::new();
        for record in self.records.iter().flatten() {
            if record.state == ConnState::Connected && record.role == Role::Central {
                if record.pending.is_some() {
                    return Err(LlError::ProcedureAlreadyActive(record.handle));
                }
                targets.push((record.handle, record.event_counter, record.params.latency));
            }
        }
        self.default_channel_map = map;
        for (handle, counter, latency) in targets {
            let instant = plan_instant(counter, latency);
            if let Err(err) = self
                .radio
                .send_control(handle, ControlExchange::ChannelMapUpdate { map, instant })
            {
                warn!("channel map push on connection {} failed: {}", handle, err);
                continue;
            }
            self.set_pending(handle, PendingProcedure::ChannelMapUpdate { map, instant });
        }
        Ok(())
    }

    pub fn read_channel_map(&self, handle: u16) -> LlResult<[u8; 5]> {
        Ok(self.connected_ref(handle)?.channel_map)
    }

    /// Start or refresh encryption. Central only; the peripheral side
    /// answers key requests instead.
    pub fn start_encryption(
        &mut self,
        handle: u16,
        rand: [u8; 8],
        ediv: u16,
        ltk: [u8; 16],
    ) -> LlResult<()> {
        let re_key = {
            let record = self.ready_for_procedure(handle)?;
            if record.role != Role::Central {
                return Err(LlError::CommandDisallowed(
                    "only the central starts encryption".into(),
                ));
            }
            record.encryption == EncryptionState::On
        };
        self.radio
            .send_control(handle, ControlExchange::EncryptionStart { rand, ediv, ltk })?;
        if re_key {
            // data is paused for the refresh, the watchdog would misfire
            self.radio.cancel_timer(TimerKind::AuthPayload(handle));
        }
        self.set_pending(handle, PendingProcedure::Encryption);
        if let Some(record) = self.record_mut_opt(handle) {
            record.encryption = EncryptionState::Pending;
            record.re_key = re_key;
        }
        debug!(
            "connection {} encryption {}",
            handle,
            if re_key { "refresh" } else { "setup" }
        );
        Ok(())
    }

    /// Hand over the long-term key the peer asked for.
    pub fn ltk_reply(&mut self, handle: u16, ltk: [u8; 16]) -> LlResult<()> {
        {
            let record = self.record_ref(handle)?;
            if record.role != Role::Peripheral
                || record.encryption != EncryptionState::Pending
                || !matches!(record.pending, Some(PendingProcedure::Encryption))
            {
                return Err(LlError::CommandDisallowed(format!(
                    "no key request outstanding on connection {}",
                    handle
                )));
            }
        }
        self.radio
            .send_control(handle, ControlExchange::LtkAccept { ltk })?;
        Ok(())
    }

    /// Refuse the peer's key request. During initial setup the link
    /// survives unencrypted; during a re-key the live key is already
    /// forfeit and the connection terminates.
    pub fn ltk_negative_reply(&mut self, handle: u16) -> LlResult<()> {
        let re_key = {
            let record = self.record_ref(handle)?;
            if record.role != Role::Peripheral
                || record.encryption != EncryptionState::Pending
                || !matches!(record.pending, Some(PendingProcedure::Encryption))
            {
                return Err(LlError::CommandDisallowed(format!(
                    "no key request outstanding on connection {}",
                    handle
                )));
            }
            record.re_key
        };
        if re_key {
            self.begin_terminate(handle, REASON_KEY_MISSING)?;
            warn!("connection {} terminating: key refused during re-key", handle);
        } else {
            self.radio.send_control(handle, ControlExchange::LtkReject)?;
            self.clear_pending(handle);
            if let Some(record) = self.record_mut_opt(handle) {
                record.encryption = EncryptionState::Off;
                record.re_key = false;
            }
            debug!("connection {} refused encryption: key missing", handle);
        }
        Ok(())
    }

    /// Fetch the peer's version, from cache when already exchanged.
    pub fn read_remote_version(&mut self, handle: u16) -> LlResult<()> {
        let cached = self.connected_ref(handle)?.peer_version;
        if let Some(version) = cached {
            self.emit(LinkEvent::RemoteVersion {
                status: STATUS_SUCCESS,
                handle,
                version,
            });
            return Ok(());
        }
        self.ready_for_procedure(handle)?;
        self.radio
            .send_control(handle, ControlExchange::VersionRequest)?;
        self.set_pending(handle, PendingProcedure::VersionExchange);
        Ok(())
    }

    /// Fetch the peer's feature set, from cache when already exchanged.
    pub fn read_remote_features(&mut self, handle: u16) -> LlResult<()> {
        let cached = self.connected_ref(handle)?.peer_features;
        if let Some(features) = cached {
            self.emit(LinkEvent::RemoteFeatures {
                status: STATUS_SUCCESS,
                handle,
                features,
            });
            return Ok(());
        }
        self.ready_for_procedure(handle)?;
        self.radio
            .send_control(handle, ControlExchange::FeatureRequest)?;
        self.set_pending(handle, PendingProcedure::FeatureExchange);
        Ok(())
    }

    pub fn read_rssi(&self, handle: u16) -> LlResult<i8> {
        Ok(self.connected_ref(handle)?.rssi)
    }

    pub fn read_apto(&self, handle: u16) -> LlResult<u16> {
        Ok(self.connected_ref(handle)?.apto)
    }

    /// Set the authenticated payload timeout, rechecked against the
    /// connection's interval and latency.
    pub fn write_apto(&mut self, handle: u16, apto: u16) -> LlResult<()> {
        let (interval, latency, encrypted) = {
            let record = self.connected_ref(handle)?;
            (
                record.params.interval,
                record.params.latency,
                record.encryption == EncryptionState::On,
            )
        };
        timing::check_apto(apto, interval, latency)?;
        if let Some(record) = self.record_mut_opt(handle) {
            record.apto = apto;
        }
        if encrypted {
            self.radio
                .start_timer(TimerKind::AuthPayload(handle), apto as u32 * 10);
        }
        Ok(())
    }

    /// Ask the peer for larger data-channel PDUs.
    pub fn set_data_length(&mut self, handle: u16, tx_octets: u16, tx_time: u16) -> LlResult<()> {
        timing::check_data_length(tx_octets, tx_time)?;
        {
            let record = self.ready_for_procedure(handle)?;
            if let Some(features) = record.peer_features {
                if !features.contains(FeatureSet::DATA_LENGTH_EXTENSION) {
                    return Err(LlError::UnsupportedFeature(
                        "peer lacks data length extension".into(),
                    ));
                }
            }
        }
        self.radio
            .send_control(handle, ControlExchange::DataLengthRequest { tx_octets, tx_time })?;
        self.set_pending(
            handle,
            PendingProcedure::DataLengthUpdate { tx_octets, tx_time },
        );
        Ok(())
    }

    pub fn suggested_default_data_length(&self) -> (u16, u16) {
        self.suggested_data_len
    }

    pub fn write_suggested_default_data_length(
        &mut self,
        tx_octets: u16,
        tx_time: u16,
    ) -> LlResult<()> {
        timing::check_data_length(tx_octets, tx_time)?;
        self.suggested_data_len = (tx_octets, tx_time);
        Ok(())
    }

    /// (tx octets, tx time, rx octets, rx time) this controller supports.
    pub fn read_max_data_length(&self) -> (u16, u16, u16, u16) {
        (
            DATA_LEN_OCTETS_MAX,
            DATA_LEN_TIME_MAX,
            DATA_LEN_OCTETS_MAX,
            DATA_LEN_TIME_MAX,
        )
    }

    pub fn read_phy(&self, handle: u16) -> LlResult<(PhyMask, PhyMask)> {
        let record = self.connected_ref(handle)?;
        Ok((record.tx_phy, record.rx_phy))
    }

    /// Preferred PHYs for connections formed from now on.
    pub fn set_default_phy(&mut self, tx_phy: PhyMask, rx_phy: PhyMask) -> LlResult<()> {
        check_phy_masks(tx_phy, rx_phy)?;
        self.default_tx_phy = tx_phy;
        self.default_rx_phy = rx_phy;
        Ok(())
    }

    /// Change the PHY on a live connection. A selection that lands on the
    /// current PHYs completes immediately.
    pub fn set_phy(&mut self, handle: u16, tx_phy: PhyMask, rx_phy: PhyMask) -> LlResult<()> {
        check_phy_masks(tx_phy, rx_phy)?;
        let (role, counter, latency, peer_features, current_tx, current_rx) = {
            let record = self.ready_for_procedure(handle)?;
            (
                record.role,
                record.event_counter,
                record.params.latency,
                record.peer_features,
                record.tx_phy,
                record.rx_phy,
            )
        };
        match role {
            Role::Central => {
                let tx = choose_phy(tx_phy, peer_features, current_tx);
                let rx = choose_phy(rx_phy, peer_features, current_rx);
                if tx == current_tx && rx == current_rx {
                    self.emit(LinkEvent::PhyUpdated {
                        status: STATUS_SUCCESS,
                        handle,
                        tx_phy: tx,
                        rx_phy: rx,
                    });
                    return Ok(());
                }
                let instant = plan_instant(counter, latency);
                self.radio.send_control(
                    handle,
                    ControlExchange::PhyUpdate {
                        tx_phy: tx,
                        rx_phy: rx,
                        instant,
                    },
                )?;
                self.set_pending(
                    handle,
                    PendingProcedure::PhyUpdate {
                        tx_phy: tx,
                        rx_phy: rx,
                        instant,
                    },
                );
            }
            Role::Peripheral => {
                self.radio
                    .send_control(handle, ControlExchange::PhyRequest { tx_phy, rx_phy })?;
                self.set_pending(handle, PendingProcedure::PhyRequest { tx_phy, rx_phy });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Key generation offload
    // ------------------------------------------------------------------

    /// Start P-256 key pair generation on the offload engine. One job of
    /// each kind at a time.
    pub fn generate_p256_public_key(&mut self) -> LlResult<()> {
        if self.p256_pending {
            return Err(LlError::KeyGenPending);
        }
        self.keygen.generate_p256_keypair()?;
        self.p256_pending = true;
        Ok(())
    }

    pub fn generate_dh_key(&mut self, peer_public: [u8; 64]) -> LlResult<()> {
        if self.dh_pending {
            return Err(LlError::KeyGenPending);
        }
        self.keygen.generate_dh_key(peer_public)?;
        self.dh_pending = true;
        Ok(())
    }

    pub fn on_p256_complete(&mut self, status: u8, public_key: [u8; 64]) {
        self.p256_pending = false;
        self.emit(LinkEvent::P256PublicKeyReady { status, public_key });
    }

    pub fn on_dh_key_complete(&mut self, status: u8, dh_key: [u8; 32]) {
        self.dh_pending = false;
        self.emit(LinkEvent::DhKeyReady { status, dh_key });
    }

    // ------------------------------------------------------------------
    // RF engine callbacks
    // ------------------------------------------------------------------

    /// Initiation finished: the connection exists on air.
    pub fn on_connection_established(
        &mut self,
        handle: u16,
        peer_type: AddressType,
        peer_addr: BdAddr,
        interval: u16,
        latency: u16,
        timeout: u16,
        sca: SleepClockAccuracy,
    ) {
        let (resolved_type, resolved_addr, peer_rpa) = self.resolve_air_address(peer_type, peer_addr);
        let (event, role) = {
            let Some(record) = self.record_mut_opt(handle) else {
                warn!("establishment reported for unknown connection {}", handle);
                return;
            };
            if record.state != ConnState::Initiating {
                warn!(
                    "connection {} established from state {:?}",
                    handle, record.state
                );
                return;
            }
            record.state = ConnState::Connected;
            record.peer_type = resolved_type;
            record.peer_addr = resolved_addr;
            record.peer_rpa = peer_rpa;
            record.params = ConnParams {
                interval,
                latency,
                timeout,
            };
            record.sca = sca;
            record.event_counter = 0;
            let event = LinkEvent::ConnectionEstablished {
                status: STATUS_SUCCESS,
                handle,
                role: record.role,
                peer_type: resolved_type,
                peer_addr: resolved_addr,
                local_rpa: record.local_rpa,
                peer_rpa,
                interval,
                latency,
                timeout,
                sca,
            };
            (event, record.role)
        };
        self.finish_establishment(handle, resolved_type, resolved_addr, timeout as u32 * 10);
        self.emit(event);
        if role == Role::Central
            && (self.default_tx_phy != PhyMask::PHY_1M || self.default_rx_phy != PhyMask::PHY_1M)
        {
            let (tx, rx) = (self.default_tx_phy, self.default_rx_phy);
            if let Err(err) = self.set_phy(handle, tx, rx) {
                debug!("default phy not applied on connection {}: {}", handle, err);
            }
        }
    }

    /// Initiation gave up (establishment window elapsed).
    pub fn on_connection_failed(&mut self, handle: u16, status: u8) {
        let Some(record) = self.free_record(handle) else {
            warn!("failure reported for unknown connection {}", handle);
            return;
        };
        warn!(
            "connection {} failed to establish: {:#04x}",
            handle, status
        );
        self.emit(LinkEvent::ConnectionEstablished {
            status,
            handle,
            role: record.role,
            peer_type: record.peer_type,
            peer_addr: record.peer_addr,
            local_rpa: record.local_rpa,
            peer_rpa: None,
            interval: 0,
            latency: 0,
            timeout: 0,
            sca: record.sca,
        });
    }

    /// An initiator connected to our advertising. The advertising slot
    /// becomes the connection; the return value tells the RF engine which
    /// handle it landed on, or that admission was refused.
    pub fn on_connect_request(
        &mut self,
        peer_type: AddressType,
        peer_addr: BdAddr,
        interval: u16,
        latency: u16,
        timeout: u16,
        sca: SleepClockAccuracy,
    ) -> LlResult<u16> {
        let (resolved_type, resolved_addr, peer_rpa) = self.resolve_air_address(peer_type, peer_addr);
        if self.adv_use_filter {
            let admitted = self.filter.admits_extended(base_type(peer_type), peer_addr)
                || (peer_rpa.is_some()
                    && self.filter.admits(base_type(resolved_type), resolved_addr));
            if !admitted {
                debug!("connect request from {} filtered out", peer_addr);
                return Err(LlError::CommandDisallowed(
                    "initiator not admitted by the allow list".into(),
                ));
            }
        }
        let Some(slot) = self.find_state(ConnState::AdvertisingPending) else {
            return Err(LlError::CommandDisallowed("not advertising".into()));
        };
        let handle = slot as u16;
        let mut event = None;
        let mut timeout_ms = 0;
        if let Some(record) = self.records[slot].as_mut() {
            record.state = ConnState::Connected;
            record.peer_type = resolved_type;
            record.peer_addr = resolved_addr;
            record.peer_rpa = peer_rpa;
            record.params = ConnParams {
                interval,
                latency,
                timeout,
            };
            record.sca = sca;
            record.event_counter = 0;
            timeout_ms = timeout as u32 * 10;
            event = Some(LinkEvent::ConnectionEstablished {
                status: STATUS_SUCCESS,
                handle,
                role: record.role,
                peer_type: resolved_type,
                peer_addr: resolved_addr,
                local_rpa: record.local_rpa,
                peer_rpa,
                interval,
                latency,
                timeout,
                sca,
            });
        }
        self.finish_establishment(handle, resolved_type, resolved_addr, timeout_ms);
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(handle)
    }

    /// One connection event finished. Restarts the watchdogs that saw
    /// traffic and applies any procedure whose instant has been reached.
    pub fn on_event_complete(&mut self, handle: u16, outcome: &ConnEventOutcome) {
        let mut supervision_ms = None;
        let mut apto_ms = None;
        let mut completed = None;
        let mut procedure_done = false;
        {
            let Some(record) = self.record_mut_opt(handle) else {
                debug!("event completion for unknown connection {}", handle);
                return;
            };
            if record.state != ConnState::Connected && record.state != ConnState::Terminating {
                return;
            }
            record.event_counter = outcome.counter;
            record.rssi = outcome.rssi;
            if outcome.received_ok && record.state == ConnState::Connected {
                supervision_ms = Some(record.params.timeout as u32 * 10);
            }
            if outcome.authenticated && record.encryption == EncryptionState::On {
                apto_ms = Some(record.apto as u32 * 10);
            }
            if record.state == ConnState::Connected {
                if let Some(procedure) = record.pending {
                    if let Some(instant) = procedure.instant() {
                        if instant_reached(outcome.counter, instant) {
                            record.pending = None;
                            procedure_done = true;
                            match procedure {
                                PendingProcedure::ParamUpdate {
                                    interval,
                                    latency,
                                    timeout,
                                    ..
                                } => {
                                    record.params = ConnParams {
                                        interval,
                                        latency,
                                        timeout,
                                    };
                                    supervision_ms = Some(timeout as u32 * 10);
                                    completed = Some(LinkEvent::ConnParamsUpdated {
                                        status: STATUS_SUCCESS,
                                        handle,
                                        interval,
                                        latency,
                                        timeout,
                                    });
                                }
                                PendingProcedure::ChannelMapUpdate { map, .. } => {
                                    record.channel_map = map;
                                    info!("connection {} switched channel map", handle);
                                }
                                PendingProcedure::PhyUpdate { tx_phy, rx_phy, .. } => {
                                    record.tx_phy = tx_phy;
                                    record.rx_phy = rx_phy;
                                    completed = Some(LinkEvent::PhyUpdated {
                                        status: STATUS_SUCCESS,
                                        handle,
                                        tx_phy,
                                        rx_phy,
                                    });
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }
        }
        if procedure_done {
            self.radio.cancel_timer(TimerKind::LlcpResponse(handle));
        }
        if let Some(ms) = supervision_ms {
            self.radio.start_timer(TimerKind::Supervision(handle), ms);
        }
        if let Some(ms) = apto_ms {
            self.radio.start_timer(TimerKind::AuthPayload(handle), ms);
        }
        if let Err(err) = self.radio.schedule_connection_event(handle) {
            debug!("connection {} event not rescheduled: {}", handle, err);
        }
        if let Some(event) = completed {
            self.emit(event);
        }
    }

    /// Control traffic from the peer, already reassembled by the RF
    /// engine.
    pub fn on_peer_message(&mut self, handle: u16, message: PeerMessage) {
        if self.connection(handle).is_none() {
            warn!("peer message for unknown connection {}", handle);
            return;
        }
        match message {
            PeerMessage::VersionResponse {
                version,
                company,
                subversion,
            } => self.on_version_response(handle, version, company, subversion),
            PeerMessage::FeatureResponse { features } => {
                self.on_feature_response(handle, features)
            }
            PeerMessage::DataLengthResponse {
                tx_octets,
                tx_time,
                rx_octets,
                rx_time,
            } => self.on_data_length_response(handle, tx_octets, tx_time, rx_octets, rx_time),
            PeerMessage::ConnParamRequest {
                interval_min,
                interval_max,
                latency,
                timeout,
            } => self.on_remote_param_request(handle, interval_min, interval_max, latency, timeout),
            PeerMessage::ConnParamUpdateInd {
                interval,
                latency,
                timeout,
                instant,
            } => self.on_param_update_ind(handle, interval, latency, timeout, instant),
            PeerMessage::ChannelMapUpdateInd { map, instant } => {
                self.on_channel_map_ind(handle, map, instant)
            }
            PeerMessage::PhyUpdateInd {
                tx_phy,
                rx_phy,
                instant,
            } => self.on_phy_update_ind(handle, tx_phy, rx_phy, instant),
            PeerMessage::PhyRequest { tx_phy, rx_phy } => {
                self.on_phy_request(handle, tx_phy, rx_phy)
            }
            PeerMessage::EncryptionRequest { rand, ediv } => {
                self.on_encryption_request(handle, rand, ediv)
            }
            PeerMessage::RejectInd { status } => self.on_reject_ind(handle, status),
            PeerMessage::TerminateInd { reason } => {
                info!("connection {} terminated by peer: {:#04x}", handle, reason);
                self.teardown(handle, reason);
            }
            PeerMessage::TerminateAck => self.on_terminate_ack(handle),
        }
    }

    /// The RF engine finished an encryption handshake; traffic now runs
    /// under the new key.
    pub fn on_encryption_established(&mut self, handle: u16) {
        self.radio.cancel_timer(TimerKind::LlcpResponse(handle));
        let mut event = None;
        let mut apto_ms = None;
        {
            let Some(record) = self.record_mut_opt(handle) else {
                warn!("encryption completion for unknown connection {}", handle);
                return;
            };
            if record.encryption != EncryptionState::Pending {
                warn!(
                    "encryption completion on connection {} without a handshake",
                    handle
                );
                return;
            }
            record.encryption = EncryptionState::On;
            if matches!(record.pending, Some(PendingProcedure::Encryption)) {
                record.pending = None;
            }
            event = Some(if record.re_key {
                LinkEvent::EncryptionKeyRefreshed {
                    status: STATUS_SUCCESS,
                    handle,
                }
            } else {
                LinkEvent::EncryptionChange {
                    status: STATUS_SUCCESS,
                    handle,
                    enabled: true,
                }
            });
            record.re_key = false;
            apto_ms = Some(record.apto as u32 * 10);
        }
        if let Some(ms) = apto_ms {
            self.radio.start_timer(TimerKind::AuthPayload(handle), ms);
        }
        if let Some(event) = event {
            self.emit(event);
        }
    }

    /// The handshake failed. A failed initial setup leaves the link
    /// running in the clear; a failed refresh forfeits the live key and
    /// the connection with it.
    pub fn on_encryption_failed(&mut self, handle: u16, status: u8) {
        self.encryption_failed(handle, status);
    }

    /// A timer armed through the RF engine fired.
    pub fn on_timer(&mut self, timer: TimerKind) {
        match timer {
            TimerKind::Supervision(handle) => {
                let live = matches!(
                    self.connection(handle),
                    Some(record)
                        if record.state == ConnState::Connected
                            || record.state == ConnState::Terminating
                );
                if live {
                    warn!("supervision timeout on connection {}", handle);
                    self.teardown(handle, REASON_SUPERVISION_TIMEOUT);
                }
            }
            TimerKind::AuthPayload(handle) => {
                let mut apto_ms = None;
                if let Some(record) = self.connection(handle) {
                    if record.state == ConnState::Connected
                        && record.encryption == EncryptionState::On
                    {
                        apto_ms = Some(record.apto as u32 * 10);
                    }
                }
                if let Some(ms) = apto_ms {
                    self.radio.start_timer(TimerKind::AuthPayload(handle), ms);
                    self.emit(LinkEvent::AptoExpired { handle });
                }
            }
            TimerKind::LlcpResponse(handle) => {
                let reason = match self.connection(handle) {
                    Some(record) if record.state == ConnState::Terminating => {
                        Some(record.term_reason)
                    }
                    Some(record) if record.pending.is_some() => Some(REASON_LLCP_TIMEOUT),
                    _ => None,
                };
                if let Some(reason) = reason {
                    warn!("control procedure timed out on connection {}", handle);
                    self.teardown(handle, reason);
                }
            }
            TimerKind::RpaRotation => self.rotate_private_addresses(),
        }
    }

    /// A scan report came in. Resolution rewrites private addresses to
    /// identities; the scan filter policy decides whether the host sees
    /// the report at all.
    pub fn on_advertising_report(
        &mut self,
        addr_type: AddressType,
        addr: BdAddr,
        rssi: i8,
        data: &[u8],
    ) {
        let (resolved_type, resolved_addr, resolved_rpa) =
            self.resolve_air_address(addr_type, addr);
        if self.scan_policy == ScanFilterPolicy::WhiteListOnly {
            let admitted = self.filter.admits_extended(base_type(addr_type), addr)
                || (resolved_rpa.is_some()
                    && self.filter.admits(base_type(resolved_type), resolved_addr));
            if !admitted {
                debug!("report from {} filtered out", addr);
                return;
            }
        }
        self.emit(LinkEvent::AdvertisingReport {
            addr_type: resolved_type,
            addr: resolved_addr,
            rssi,
            data: data.to_vec(),
        });
    }

    // ------------------------------------------------------------------
    // Peer message handling
    // ------------------------------------------------------------------

    fn on_version_response(&mut self, handle: u16, version: u8, company: u16, subversion: u16) {
        let mut event = None;
        if let Some(record) = self.record_mut_opt(handle) {
            let info = VersionInfo {
                version,
                company,
                subversion,
            };
            record.peer_version = Some(info);
            if matches!(record.pending, Some(PendingProcedure::VersionExchange)) {
                record.pending = None;
                event = Some(LinkEvent::RemoteVersion {
                    status: STATUS_SUCCESS,
                    handle,
                    version: info,
                });
            }
        }
        if event.is_some() {
            self.radio.cancel_timer(TimerKind::LlcpResponse(handle));
        }
        if let Some(event) = event {
            self.emit(event);
        }
    }

    fn on_feature_response(&mut self, handle: u16, features: FeatureSet) {
        let mut event = None;
        if let Some(record) = self.record_mut_opt(handle) {
            record.peer_features = Some(features);
            if matches!(record.pending, Some(PendingProcedure::FeatureExchange)) {
                record.pending = None;
                event = Some(LinkEvent::RemoteFeatures {
                    status: STATUS_SUCCESS,
                    handle,
                    features,
                });
            }
        }
        if event.is_some() {
            self.radio.cancel_timer(TimerKind::LlcpResponse(handle));
        }
        if let Some(event) = event {
            self.emit(event);
        }
    }

    fn on_data_length_response(
        &mut self,
        handle: u16,
        tx_octets: u16,
        tx_time: u16,
        rx_octets: u16,
        rx_time: u16,
    ) {
        let mut event = None;
        let mut finished = false;
        if let Some(record) = self.record_mut_opt(handle) {
            let negotiated = DataLength {
                tx_octets,
                tx_time,
                rx_octets,
                rx_time,
            };
            if matches!(record.pending, Some(PendingProcedure::DataLengthUpdate { .. })) {
                record.pending = None;
                finished = true;
            }
            if record.data_len != negotiated {
                record.data_len = negotiated;
                event = Some(LinkEvent::DataLengthChanged {
                    handle,
                    tx_octets,
                    tx_time,
                    rx_octets,
                    rx_time,
                });
            }
        }
        if finished {
            self.radio.cancel_timer(TimerKind::LlcpResponse(handle));
        }
        if let Some(event) = event {
            self.emit(event);
        }
    }

    fn on_remote_param_request(
        &mut self,
        handle: u16,
        interval_min: u16,
        interval_max: u16,
        latency: u16,
        timeout: u16,
    ) {
        if let Err(err) = timing::check_conn_params(interval_min, interval_max, latency, timeout) {
            debug!(
                "rejecting peer parameter request on connection {}: {}",
                handle, err
            );
            self.send_reject(handle, REASON_UNACCEPTABLE_CONN_PARAMS);
            return;
        }
        let busy = self
            .connection(handle)
            .map(|record| record.pending.is_some())
            .unwrap_or(true);
        if busy {
            self.send_reject(handle, REASON_LL_TRANSACTION_COLLISION);
            return;
        }
        self.set_pending(
            handle,
            PendingProcedure::RemoteParamDecision {
                interval_min,
                interval_max,
                latency,
                timeout,
            },
        );
        self.emit(LinkEvent::RemoteConnParamsRequested {
            handle,
            interval_min,
            interval_max,
            latency,
            timeout,
        });
    }

    fn on_param_update_ind(
        &mut self,
        handle: u16,
        interval: u16,
        latency: u16,
        timeout: u16,
        instant: u16,
    ) {
        let mut past = false;
        let mut accepted = false;
        if let Some(record) = self.record_mut_opt(handle) {
            if record.role != Role::Peripheral {
                warn!("parameter update indication on central connection {}", handle);
                return;
            }
            if instant_reached(record.event_counter, instant) {
                past = true;
            } else {
                match record.pending {
                    None
                    | Some(PendingProcedure::ParamRequest { .. })
                    | Some(PendingProcedure::RemoteParamDecision { .. }) => {}
                    Some(other) => warn!(
                        "parameter update overrides {} on connection {}",
                        other.name(),
                        handle
                    ),
                }
                accepted = true;
            }
        }
        if past {
            warn!(
                "parameter update instant already passed on connection {}",
                handle
            );
            self.teardown(handle, REASON_INSTANT_PASSED);
        } else if accepted {
            self.set_pending(
                handle,
                PendingProcedure::ParamUpdate {
                    interval,
                    latency,
                    timeout,
                    instant,
                },
            );
        }
    }

    fn on_channel_map_ind(&mut self, handle: u16, map: [u8; 5], instant: u16) {
        let mut past = false;
        let mut accepted = false;
        if let Some(record) = self.record_mut_opt(handle) {
            if record.role != Role::Peripheral {
                warn!("channel map indication on central connection {}", handle);
                return;
            }
            if instant_reached(record.event_counter, instant) {
                past = true;
            } else {
                if let Some(other) = record.pending {
                    if !matches!(other, PendingProcedure::ChannelMapUpdate { .. }) {
                        warn!(
                            "channel map update overrides {} on connection {}",
                            other.name(),
                            handle
                        );
                    }
                }
                accepted = true;
            }
        }
        if past {
            warn!(
                "channel map instant already passed on connection {}",
                handle
            );
            self.teardown(handle, REASON_INSTANT_PASSED);
        } else if accepted {
            self.set_pending(handle, PendingProcedure::ChannelMapUpdate { map, instant });
        }
    }

    fn on_phy_update_ind(&mut self, handle: u16, tx_phy: PhyMask, rx_phy: PhyMask, instant: u16) {
        let mut past = false;
        let mut unchanged = None;
        let mut accepted = false;
        if let Some(record) = self.record_mut_opt(handle) {
            if record.role != Role::Peripheral {
                warn!("phy update indication on central connection {}", handle);
                return;
            }
            if tx_phy == record.tx_phy && rx_phy == record.rx_phy {
                // no switch scheduled; the procedure ends here
                let had_procedure = matches!(
                    record.pending,
                    Some(PendingProcedure::PhyRequest { .. })
                        | Some(PendingProcedure::PhyUpdate { .. })
                );
                if had_procedure {
                    record.pending = None;
                }
                unchanged = Some((had_procedure, tx_phy, rx_phy));
            } else if instant_reached(record.event_counter, instant) {
                past = true;
            } else {
                accepted = true;
            }
        }
        if past {
            warn!("phy update instant already passed on connection {}", handle);
            self.teardown(handle, REASON_INSTANT_PASSED);
            return;
        }
        if let Some((had_procedure, tx, rx)) = unchanged {
            if had_procedure {
                self.radio.cancel_timer(TimerKind::LlcpResponse(handle));
            }
            self.emit(LinkEvent::PhyUpdated {
                status: STATUS_SUCCESS,
                handle,
                tx_phy: tx,
                rx_phy: rx,
            });
            return;
        }
        if accepted {
            self.set_pending(
                handle,
                PendingProcedure::PhyUpdate {
                    tx_phy,
                    rx_phy,
                    instant,
                },
            );
        }
    }

    fn on_phy_request(&mut self, handle: u16, tx_phy: PhyMask, rx_phy: PhyMask) {
        let mut busy = false;
        let mut plan = None;
        if let Some(record) = self.connection(handle) {
            if record.role != Role::Central {
                warn!("phy request on peripheral connection {}", handle);
                return;
            }
            if record.pending.is_some() {
                busy = true;
            } else {
                let tx = choose_phy(tx_phy, record.peer_features, record.tx_phy);
                let rx = choose_phy(rx_phy, record.peer_features, record.rx_phy);
                let instant = plan_instant(record.event_counter, record.params.latency);
                plan = Some((tx, rx, instant));
            }
        }
        if busy {
            self.send_reject(handle, REASON_LL_TRANSACTION_COLLISION);
            return;
        }
        let Some((tx, rx, instant)) = plan else {
            return;
        };
        if let Err(err) = self.radio.send_control(
            handle,
            ControlExchange::PhyUpdate {
                tx_phy: tx,
                rx_phy: rx,
                instant,
            },
        ) {
            warn!("phy update toward connection {} failed: {}", handle, err);
            return;
        }
        self.set_pending(
            handle,
            PendingProcedure::PhyUpdate {
                tx_phy: tx,
                rx_phy: rx,
                instant,
            },
        );
    }

    fn on_encryption_request(&mut self, handle: u16, rand: [u8; 8], ediv: u16) {
        let mut busy = false;
        let mut re_key = false;
        let mut event = None;
        if let Some(record) = self.record_mut_opt(handle) {
            if record.role != Role::Peripheral {
                warn!("encryption request on central connection {}", handle);
                return;
            }
            if record.pending.is_some() {
                busy = true;
            } else {
                re_key = record.encryption == EncryptionState::On;
                record.re_key = re_key;
                record.encryption = EncryptionState::Pending;
                event = Some(LinkEvent::LtkRequested { handle, rand, ediv });
            }
        }
        if busy {
            self.send_reject(handle, REASON_LL_TRANSACTION_COLLISION);
            return;
        }
        if re_key {
            self.radio.cancel_timer(TimerKind::AuthPayload(handle));
        }
        self.set_pending(handle, PendingProcedure::Encryption);
        if let Some(event) = event {
            self.emit(event);
        }
    }

    fn on_reject_ind(&mut self, handle: u16, status: u8) {
        let Some(procedure) = self.clear_pending(handle) else {
            warn!("unsolicited reject on connection {}", handle);
            return;
        };
        debug!(
            "connection {} {} rejected by peer: {:#04x}",
            handle,
            procedure.name(),
            status
        );
        let (params, tx_phy, rx_phy) = {
            let Some(record) = self.connection(handle) else {
                return;
            };
            (record.params, record.tx_phy, record.rx_phy)
        };
        match procedure {
            PendingProcedure::ParamUpdate { .. } | PendingProcedure::ParamRequest { .. } => {
                self.emit(LinkEvent::ConnParamsUpdated {
                    status,
                    handle,
                    interval: params.interval,
                    latency: params.latency,
                    timeout: params.timeout,
                });
            }
            PendingProcedure::PhyUpdate { .. } | PendingProcedure::PhyRequest { .. } => {
                self.emit(LinkEvent::PhyUpdated {
                    status,
                    handle,
                    tx_phy,
                    rx_phy,
                });
            }
            PendingProcedure::VersionExchange => {
                self.emit(LinkEvent::RemoteVersion {
                    status,
                    handle,
                    version: VersionInfo {
                        version: 0,
                        company: 0,
                        subversion: 0,
                    },
                });
            }
            PendingProcedure::FeatureExchange => {
                self.emit(LinkEvent::RemoteFeatures {
                    status,
                    handle,
                    features: FeatureSet::empty(),
                });
            }
            PendingProcedure::Encryption => self.encryption_failed(handle, status),
            PendingProcedure::DataLengthUpdate { .. }
            | PendingProcedure::ChannelMapUpdate { .. }
            | PendingProcedure::RemoteParamDecision { .. } => {}
        }
    }

    fn on_terminate_ack(&mut self, handle: u16) {
        let reason = match self.connection(handle) {
            Some(record) if record.state == ConnState::Terminating => record.term_reason,
            _ => {
                warn!("unsolicited terminate ack on connection {}", handle);
                return;
            }
        };
        self.teardown(handle, reason);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn emit(&mut self, event: LinkEvent) {
        if let Some(handler) = self.handler.as_mut() {
            handler(event);
        }
    }

    fn record_ref(&self, handle: u16) -> LlResult<&ConnectionRecord> {
        self.records
            .get(handle as usize)
            .and_then(Option::as_ref)
            .ok_or(LlError::InactiveConnection(handle))
    }

    fn record_mut_opt(&mut self, handle: u16) -> Option<&mut ConnectionRecord> {
        self.records.get_mut(handle as usize).and_then(Option::as_mut)
    }

    fn connected_ref(&self, handle: u16) -> LlResult<&ConnectionRecord> {
        let record = self.record_ref(handle)?;
        if record.state != ConnState::Connected {
            return Err(LlError::CommandDisallowed(format!(
                "connection {} is not established",
                handle
            )));
        }
        Ok(record)
    }

    /// Established and free of control procedures, the precondition for
    /// starting a new one.
    fn ready_for_procedure(&self, handle: u16) -> LlResult<&ConnectionRecord> {
        let record = self.connected_ref(handle)?;
        if record.pending.is_some() {
            return Err(LlError::ProcedureAlreadyActive(handle));
        }
        Ok(record)
    }

    fn free_slot(&self) -> Option<usize> {
        self.records.iter().position(Option::is_none)
    }

    fn find_state(&self, state: ConnState) -> Option<usize> {
        self.records
            .iter()
            .position(|slot| matches!(slot, Some(record) if record.state == state))
    }

    fn air_ops_active(&self) -> bool {
        self.scanning
            || self.records.iter().flatten().any(|record| {
                matches!(
                    record.state,
                    ConnState::Initiating | ConnState::AdvertisingPending
                )
            })
    }

    /// The address this device puts on air right now: private when
    /// resolution runs, otherwise the static random or public identity.
    fn own_air_address(&mut self) -> (AddressType, BdAddr, Option<BdAddr>) {
        if let Some(rpa) = self.privacy.local_private_address() {
            return (AddressType::Random, rpa, Some(rpa));
        }
        match self.identity.random_addr {
            Some(addr) => (AddressType::Random, addr, None),
            None => (AddressType::Public, self.identity.public_addr, None),
        }
    }

    /// Rewrite a private air address to the identity it resolves to.
    /// Returns the identity-flavored type, the address to report, and
    /// the original air address when resolution matched.
    fn resolve_air_address(
        &self,
        addr_type: AddressType,
        addr: BdAddr,
    ) -> (AddressType, BdAddr, Option<BdAddr>) {
        if addr_type != AddressType::Random {
            return (addr_type, addr, None);
        }
        let Some(index) = self.privacy.resolve(&addr) else {
            return (addr_type, addr, None);
        };
        let Some(entry) = self.privacy.entry(index) else {
            return (addr_type, addr, None);
        };
        let id_type = match entry.id_type {
            AddressType::Public => AddressType::PublicIdentity,
            _ => AddressType::RandomIdentity,
        };
        (id_type, entry.id_addr, Some(addr))
    }

    fn finish_establishment(
        &mut self,
        handle: u16,
        peer_type: AddressType,
        peer_addr: BdAddr,
        timeout_ms: u32,
    ) {
        self.radio
            .start_timer(TimerKind::Supervision(handle), timeout_ms);
        // a connected peer's advertising no longer interests the filter
        self.filter
            .set_ignore(base_type(peer_type), peer_addr, true)
            .ok();
        if let Err(err) = self.radio.schedule_connection_event(handle) {
            warn!("connection {} events not scheduled: {}", handle, err);
        }
    }

    /// Arm the response timer and install the procedure. The caller has
    /// already sent the exchange.
    fn set_pending(&mut self, handle: u16, procedure: PendingProcedure) {
        self.radio
            .start_timer(TimerKind::LlcpResponse(handle), LLCP_RESPONSE_TIMEOUT_MS);
        if let Some(record) = self.record_mut_opt(handle) {
            debug!("connection {} pending {}", handle, procedure.name());
            record.pending = Some(procedure);
        }
    }

    fn clear_pending(&mut self, handle: u16) -> Option<PendingProcedure> {
        self.radio.cancel_timer(TimerKind::LlcpResponse(handle));
        self.record_mut_opt(handle)
            .and_then(|record| record.pending.take())
    }

    fn send_reject(&mut self, handle: u16, status: u8) {
        if let Err(err) = self
            .radio
            .send_control(handle, ControlExchange::Reject { status })
        {
            warn!(
                "reject {:#04x} toward connection {} failed: {}",
                status, handle, err
            );
        }
    }

    /// Start the terminate exchange and hold the record until the peer
    /// acknowledges or the response timer expires.
    fn begin_terminate(&mut self, handle: u16, reason: u8) -> LlResult<()> {
        self.radio
            .send_control(handle, ControlExchange::Terminate { reason })?;
        self.radio.cancel_timer(TimerKind::Supervision(handle));
        self.radio.cancel_timer(TimerKind::AuthPayload(handle));
        self.radio
            .start_timer(TimerKind::LlcpResponse(handle), LLCP_RESPONSE_TIMEOUT_MS);
        if let Some(record) = self.record_mut_opt(handle) {
            record.state = ConnState::Terminating;
            record.term_reason = reason;
            record.pending = None;
        }
        Ok(())
    }

    /// Free a record and everything scheduled for it. The allow-list
    /// suppression for the peer lifts with the connection.
    fn free_record(&mut self, handle: u16) -> Option<ConnectionRecord> {
        let record = self.records.get_mut(handle as usize)?.take()?;
        self.radio.cancel(handle);
        self.radio.cancel_timer(TimerKind::Supervision(handle));
        self.radio.cancel_timer(TimerKind::AuthPayload(handle));
        self.radio.cancel_timer(TimerKind::LlcpResponse(handle));
        if !record.peer_addr.is_zero() {
            self.filter
                .set_ignore(base_type(record.peer_type), record.peer_addr, false)
                .ok();
        }
        Some(record)
    }

    fn teardown(&mut self, handle: u16, reason: u8) {
        if self.free_record(handle).is_some() {
            info!("connection {} closed, reason {:#04x}", handle, reason);
            self.emit(LinkEvent::Disconnected { handle, reason });
        }
    }

    fn encryption_failed(&mut self, handle: u16, status: u8) {
        self.radio.cancel_timer(TimerKind::LlcpResponse(handle));
        let mut was_re_key = false;
        let mut event = None;
        if let Some(record) = self.record_mut_opt(handle) {
            if matches!(record.pending, Some(PendingProcedure::Encryption)) {
                record.pending = None;
            }
            was_re_key = record.re_key;
            record.re_key = false;
            if !was_re_key {
                record.encryption = EncryptionState::Off;
                event = Some(LinkEvent::EncryptionChange {
                    status,
                    handle,
                    enabled: false,
                });
            }
        }
        if was_re_key {
            warn!(
                "connection {} key refresh failed ({:#04x})",
                handle, status
            );
            self.teardown(handle, status);
        } else if let Some(event) = event {
            self.emit(event);
        }
    }

    fn rotate_private_addresses(&mut self) {
        if !self.privacy.resolution_enabled() {
            return;
        }
        let rotations = self.privacy.rotate();
        for rotation in &rotations {
            if let Err(err) =
                self.filter
                    .update_entry(rotation.index, rotation.previous, rotation.current)
            {
                warn!(
                    "shadow row for resolving entry {} not updated: {}",
                    rotation.index, err
                );
            }
        }
        if !rotations.is_empty() {
            info!("rotated {} private addresses", rotations.len());
        }
        self.radio.start_timer(
            TimerKind::RpaRotation,
            self.privacy.rpa_timeout() as u32 * 1000,
        );
    }
}

fn base_type(addr_type: AddressType) -> AddressType {
    match addr_type {
        AddressType::PublicIdentity => AddressType::Public,
        AddressType::RandomIdentity => AddressType::Random,
        other => other,
    }
}

fn check_phy_masks(tx_phy: PhyMask, rx_phy: PhyMask) -> LlResult<()> {
    if tx_phy.is_empty() || rx_phy.is_empty() {
        return Err(LlError::InvalidParameter("empty phy selection".into()));
    }
    if !SUPPORTED_PHYS.contains(tx_phy) || !SUPPORTED_PHYS.contains(rx_phy) {
        return Err(LlError::UnsupportedFeature(format!(
            "phy selection {:?}/{:?}",
            tx_phy, rx_phy
        )));
    }
    Ok(())
}

/// Pick the PHY actually used from a requested mask: the fastest one
/// both sides run. Falls back to the current PHY when nothing overlaps.
fn choose_phy(requested: PhyMask, peer_features: Option<FeatureSet>, current: PhyMask) -> PhyMask {
    let mut allowed = requested & SUPPORTED_PHYS;
    if let Some(features) = peer_features {
        if !features.contains(FeatureSet::PHY_2M) {
            allowed.remove(PhyMask::PHY_2M);
        }
    }
    if allowed.contains(PhyMask::PHY_2M) {
        PhyMask::PHY_2M
    } else if allowed.contains(PhyMask::PHY_1M) {
        PhyMask::PHY_1M
    } else {
        current
    }
}
