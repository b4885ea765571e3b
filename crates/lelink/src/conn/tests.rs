use std::cell::RefCell;
use std::rc::Rc;

use crate::address::{AddressType, BdAddr};
use crate::conn::constants::*;
use crate::conn::events::LinkEvent;
use crate::conn::manager::{ConnUpdateParams, ConnectionManager, CreateConnParams};
use crate::conn::types::{ConnState, EncryptionState, FeatureSet, PhyMask, SleepClockAccuracy};
use crate::error::{LlError, LlResult, STATUS_OPERATION_CANCELLED, STATUS_SUCCESS};
use crate::filter::{InitiatorFilterPolicy, ScanFilterPolicy};
use crate::radio::{
    ConnEventOutcome, ControlExchange, InitiateRequest, KeyGenEngine, PeerMessage, RadioHal,
    TimerKind,
};

#[derive(Debug, Clone, PartialEq)]
enum RadioCall {
    Initiate(u16),
    Advertise(BdAddr, AddressType),
    Scan,
    ConnEvent(u16),
    Cancel(u16),
    CancelScan,
    Control(u16, ControlExchange),
    TimerStart(TimerKind, u32),
    TimerCancel(TimerKind),
}

struct RecordingRadio {
    calls: Rc<RefCell<Vec<RadioCall>>>,
}

impl RadioHal for RecordingRadio {
    fn schedule_initiate(&mut self, request: &InitiateRequest) -> LlResult<()> {
        self.calls
            .borrow_mut()
            .push(RadioCall::Initiate(request.handle));
        Ok(())
    }

    fn schedule_advertising(
        &mut self,
        own_addr: BdAddr,
        own_type: AddressType,
        _use_filter_list: bool,
    ) -> LlResult<()> {
        self.calls
            .borrow_mut()
            .push(RadioCall::Advertise(own_addr, own_type));
        Ok(())
    }

    fn schedule_scan(
        &mut self,
        _scan_interval: u16,
        _scan_window: u16,
        _policy: ScanFilterPolicy,
    ) -> LlResult<()> {
        self.calls.borrow_mut().push(RadioCall::Scan);
        Ok(())
    }

    fn schedule_connection_event(&mut self, handle: u16) -> LlResult<()> {
        self.calls.borrow_mut().push(RadioCall::ConnEvent(handle));
        Ok(())
    }

    fn cancel(&mut self, handle: u16) {
        self.calls.borrow_mut().push(RadioCall::Cancel(handle));
    }

    fn cancel_scan(&mut self) {
        self.calls.borrow_mut().push(RadioCall::CancelScan);
    }

    fn send_control(&mut self, handle: u16, exchange: ControlExchange) -> LlResult<()> {
        self.calls
            .borrow_mut()
            .push(RadioCall::Control(handle, exchange));
        Ok(())
    }

    fn start_timer(&mut self, timer: TimerKind, duration_ms: u32) {
        self.calls
            .borrow_mut()
            .push(RadioCall::TimerStart(timer, duration_ms));
    }

    fn cancel_timer(&mut self, timer: TimerKind) {
        self.calls.borrow_mut().push(RadioCall::TimerCancel(timer));
    }
}

struct NullKeyGen;

impl KeyGenEngine for NullKeyGen {
    fn generate_p256_keypair(&mut self) -> LlResult<()> {
        Ok(())
    }

    fn generate_dh_key(&mut self, _peer_public: [u8; 64]) -> LlResult<()> {
        Ok(())
    }
}

fn local_addr() -> BdAddr {
    BdAddr {
        bytes: [0x01, 0x02, 0x03, 0x04, 0x05, 0x06],
    }
}

fn peer_addr(n: u8) -> BdAddr {
    BdAddr {
        bytes: [n, 0x22, 0x33, 0x44, 0x55, 0x66],
    }
}

fn harness() -> (
    ConnectionManager,
    Rc<RefCell<Vec<RadioCall>>>,
    Rc<RefCell<Vec<LinkEvent>>>,
) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let events: Rc<RefCell<Vec<LinkEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let radio = RecordingRadio {
        calls: calls.clone(),
    };
    let mut manager =
        ConnectionManager::new(local_addr(), Box::new(radio), Box::new(NullKeyGen));
    let sink = events.clone();
    manager.set_event_handler(move |event| sink.borrow_mut().push(event));
    (manager, calls, events)
}

fn create_params(peer: BdAddr) -> CreateConnParams {
    CreateConnParams {
        scan_interval: 0x0010,
        scan_window: 0x0010,
        filter_policy: InitiatorFilterPolicy::PeerAddress,
        peer_type: AddressType::Public,
        peer_addr: peer,
        interval_min: 0x0018,
        interval_max: 0x0018,
        latency: 0,
        timeout: 0x0048,
    }
}

fn establish_central(manager: &mut ConnectionManager, peer: BdAddr) -> u16 {
    let handle = manager.create_connection(&create_params(peer)).unwrap();
    manager.on_connection_established(
        handle,
        AddressType::Public,
        peer,
        0x0018,
        0,
        0x0048,
        SleepClockAccuracy::Ppm500,
    );
    handle
}

fn establish_peripheral(manager: &mut ConnectionManager) -> u16 {
    manager.start_advertising(false).unwrap();
    manager
        .on_connect_request(
            AddressType::Public,
            peer_addr(0xAA),
            0x0018,
            0,
            0x0048,
            SleepClockAccuracy::Ppm500,
        )
        .unwrap()
}

fn outcome(counter: u16) -> ConnEventOutcome {
    ConnEventOutcome {
        counter,
        received_ok: true,
        authenticated: false,
        rssi: -60,
    }
}

#[test]
fn pool_exhaustion_reports_connection_limit() {
    let (mut manager, _calls, _events) = harness();
    for n in 0..MAX_CONNECTIONS {
        establish_central(&mut manager, peer_addr(n as u8 + 1));
    }
    assert_eq!(manager.active_connections(), MAX_CONNECTIONS);
    let err = manager
        .create_connection(&create_params(peer_addr(0x99)))
        .unwrap_err();
    assert!(matches!(err, LlError::ConnectionLimit));
    manager.disconnect_immediate(3).unwrap();
    assert!(manager.create_connection(&create_params(peer_addr(0x99))).is_ok());
}

#[test]
fn single_initiation_at_a_time() {
    let (mut manager, _calls, _events) = harness();
    manager
        .create_connection(&create_params(peer_addr(1)))
        .unwrap();
    let err = manager
        .create_connection(&create_params(peer_addr(2)))
        .unwrap_err();
    assert!(matches!(err, LlError::CommandDisallowed(_)));
}

#[test]
fn cancelled_initiation_reports_cancelled_status() {
    let (mut manager, _calls, events) = harness();
    manager
        .create_connection(&create_params(peer_addr(1)))
        .unwrap();
    manager.create_connection_cancel().unwrap();
    assert_eq!(manager.active_connections(), 0);
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::ConnectionEstablished {
            status: STATUS_OPERATION_CANCELLED,
            ..
        }
    )));
}

#[test]
fn failed_establishment_frees_the_slot() {
    let (mut manager, _calls, events) = harness();
    let handle = manager
        .create_connection(&create_params(peer_addr(1)))
        .unwrap();
    manager.on_connection_failed(handle, REASON_FAILED_TO_ESTABLISH);
    assert_eq!(manager.active_connections(), 0);
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::ConnectionEstablished {
            status: REASON_FAILED_TO_ESTABLISH,
            ..
        }
    )));
}

#[test]
fn one_control_procedure_at_a_time() {
    let (mut manager, calls, events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    let update = ConnUpdateParams {
        interval_min: 0x0020,
        interval_max: 0x0020,
        latency: 0,
        timeout: 0x0050,
    };
    manager.update_connection(handle, &update).unwrap();
    assert!(calls.borrow().iter().any(|c| matches!(
        c,
        RadioCall::Control(_, ControlExchange::ConnParamUpdate { instant: 6, .. })
    )));
    let err = manager.update_connection(handle, &update).unwrap_err();
    assert!(matches!(err, LlError::ProcedureAlreadyActive(h) if h == handle));

    manager.on_event_complete(handle, &outcome(6));
    let conn = manager.connection(handle).unwrap();
    assert_eq!(conn.params.interval, 0x0020);
    assert!(conn.pending.is_none());
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::ConnParamsUpdated {
            status: STATUS_SUCCESS,
            interval: 0x0020,
            ..
        }
    )));
    manager.update_connection(handle, &update).unwrap();
}

#[test]
fn graceful_disconnect_runs_the_exchange() {
    let (mut manager, calls, events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    manager.disconnect(handle, REASON_REMOTE_USER_TERM).unwrap();
    assert_eq!(
        manager.connection(handle).unwrap().state,
        ConnState::Terminating
    );
    assert!(calls.borrow().iter().any(|c| matches!(
        c,
        RadioCall::Control(
            _,
            ControlExchange::Terminate {
                reason: REASON_REMOTE_USER_TERM
            }
        )
    )));
    manager.on_peer_message(handle, PeerMessage::TerminateAck);
    assert!(manager.connection(handle).is_none());
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::Disconnected {
            reason: REASON_REMOTE_USER_TERM,
            ..
        }
    )));
}

#[test]
fn disconnect_rejects_unknown_reason() {
    let (mut manager, _calls, _events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    assert!(matches!(
        manager.disconnect(handle, 0x42),
        Err(LlError::InvalidParameter(_))
    ));
}

#[test]
fn immediate_disconnect_skips_the_exchange() {
    let (mut manager, calls, events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    calls.borrow_mut().clear();
    manager.disconnect_immediate(handle).unwrap();
    assert!(manager.connection(handle).is_none());
    assert!(!calls
        .borrow()
        .iter()
        .any(|c| matches!(c, RadioCall::Control(..))));
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::Disconnected {
            reason: REASON_LOCAL_HOST_TERM,
            ..
        }
    )));
}

#[test]
fn supervision_timeout_drops_the_link() {
    let (mut manager, _calls, events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    manager.on_timer(TimerKind::Supervision(handle));
    assert!(manager.connection(handle).is_none());
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::Disconnected {
            reason: REASON_SUPERVISION_TIMEOUT,
            ..
        }
    )));
}

#[test]
fn unanswered_procedure_times_out() {
    let (mut manager, _calls, events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    manager.read_remote_features(handle).unwrap();
    manager.on_timer(TimerKind::LlcpResponse(handle));
    assert!(manager.connection(handle).is_none());
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::Disconnected {
            reason: REASON_LLCP_TIMEOUT,
            ..
        }
    )));
}

#[test]
fn peer_update_applies_at_the_instant() {
    let (mut manager, _calls, events) = harness();
    let handle = establish_peripheral(&mut manager);
    manager.on_peer_message(
        handle,
        PeerMessage::ConnParamUpdateInd {
            interval: 0x0030,
            latency: 1,
            timeout: 0x0060,
            instant: 10,
        },
    );
    manager.on_event_complete(handle, &outcome(5));
    assert_eq!(manager.connection(handle).unwrap().params.interval, 0x0018);
    manager.on_event_complete(handle, &outcome(10));
    let conn = manager.connection(handle).unwrap();
    assert_eq!(conn.params.interval, 0x0030);
    assert_eq!(conn.params.latency, 1);
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::ConnParamsUpdated {
            status: STATUS_SUCCESS,
            interval: 0x0030,
            ..
        }
    )));
}

#[test]
fn stale_update_instant_drops_the_link() {
    let (mut manager, _calls, events) = harness();
    let handle = establish_peripheral(&mut manager);
    manager.on_event_complete(handle, &outcome(100));
    manager.on_peer_message(
        handle,
        PeerMessage::ConnParamUpdateInd {
            interval: 0x0020,
            latency: 0,
            timeout: 0x0050,
            instant: 50,
        },
    );
    assert!(manager.connection(handle).is_none());
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::Disconnected {
            reason: REASON_INSTANT_PASSED,
            ..
        }
    )));
}

#[test]
fn remote_param_request_defers_to_the_host() {
    let (mut manager, calls, events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    manager.on_peer_message(
        handle,
        PeerMessage::ConnParamRequest {
            interval_min: 0x0020,
            interval_max: 0x0028,
            latency: 0,
            timeout: 0x0050,
        },
    );
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::RemoteConnParamsRequested {
            interval_max: 0x0028,
            ..
        }
    )));
    let update = ConnUpdateParams {
        interval_min: 0x0020,
        interval_max: 0x0028,
        latency: 0,
        timeout: 0x0050,
    };
    manager.remote_conn_param_reply(handle, &update).unwrap();
    assert!(calls.borrow().iter().any(|c| matches!(
        c,
        RadioCall::Control(_, ControlExchange::ConnParamUpdate { interval: 0x0028, .. })
    )));
}

#[test]
fn remote_request_while_busy_is_rejected() {
    let (mut manager, calls, _events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    manager.read_remote_version(handle).unwrap();
    manager.on_peer_message(
        handle,
        PeerMessage::ConnParamRequest {
            interval_min: 0x0020,
            interval_max: 0x0028,
            latency: 0,
            timeout: 0x0050,
        },
    );
    assert!(calls.borrow().iter().any(|c| matches!(
        c,
        RadioCall::Control(
            _,
            ControlExchange::Reject {
                status: REASON_LL_TRANSACTION_COLLISION
            }
        )
    )));
}

#[test]
fn ltk_refusal_during_setup_keeps_the_link() {
    let (mut manager, calls, events) = harness();
    let handle = establish_peripheral(&mut manager);
    manager.on_peer_message(
        handle,
        PeerMessage::EncryptionRequest {
            rand: [7; 8],
            ediv: 0x1234,
        },
    );
    assert!(events
        .borrow()
        .iter()
        .any(|e| matches!(e, LinkEvent::LtkRequested { ediv: 0x1234, .. })));
    manager.ltk_negative_reply(handle).unwrap();
    let conn = manager.connection(handle).unwrap();
    assert_eq!(conn.state, ConnState::Connected);
    assert_eq!(conn.encryption, EncryptionState::Off);
    assert!(calls
        .borrow()
        .iter()
        .any(|c| matches!(c, RadioCall::Control(_, ControlExchange::LtkReject))));
}

#[test]
fn ltk_refusal_during_re_key_drops_the_link() {
    let (mut manager, calls, events) = harness();
    let handle = establish_peripheral(&mut manager);
    manager.on_peer_message(
        handle,
        PeerMessage::EncryptionRequest {
            rand: [1; 8],
            ediv: 1,
        },
    );
    manager.ltk_reply(handle, [0x2A; 16]).unwrap();
    manager.on_encryption_established(handle);
    assert_eq!(
        manager.connection(handle).unwrap().encryption,
        EncryptionState::On
    );
    manager.on_peer_message(
        handle,
        PeerMessage::EncryptionRequest {
            rand: [2; 8],
            ediv: 1,
        },
    );
    manager.ltk_negative_reply(handle).unwrap();
    assert_eq!(
        manager.connection(handle).unwrap().state,
        ConnState::Terminating
    );
    assert!(calls.borrow().iter().any(|c| matches!(
        c,
        RadioCall::Control(
            _,
            ControlExchange::Terminate {
                reason: REASON_KEY_MISSING
            }
        )
    )));
    manager.on_peer_message(handle, PeerMessage::TerminateAck);
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::Disconnected {
            reason: REASON_KEY_MISSING,
            ..
        }
    )));
}

#[test]
fn encryption_setup_reports_change_and_arms_the_watchdog() {
    let (mut manager, calls, events) = harness();
    let handle = establish_peripheral(&mut manager);
    manager.on_peer_message(
        handle,
        PeerMessage::EncryptionRequest {
            rand: [1; 8],
            ediv: 1,
        },
    );
    manager.ltk_reply(handle, [0x2A; 16]).unwrap();
    calls.borrow_mut().clear();
    manager.on_encryption_established(handle);
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::EncryptionChange {
            status: STATUS_SUCCESS,
            enabled: true,
            ..
        }
    )));
    // default APTO is 30 s
    assert!(calls.borrow().iter().any(|c| matches!(
        c,
        RadioCall::TimerStart(TimerKind::AuthPayload(_), 30_000)
    )));
}

#[test]
fn re_key_reports_refresh_not_change() {
    let (mut manager, _calls, events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    manager
        .start_encryption(handle, [0; 8], 0, [1; 16])
        .unwrap();
    manager.on_encryption_established(handle);
    manager
        .start_encryption(handle, [0; 8], 0, [1; 16])
        .unwrap();
    manager.on_encryption_established(handle);
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::EncryptionKeyRefreshed {
            status: STATUS_SUCCESS,
            ..
        }
    )));
}

#[test]
fn apto_expiry_reports_and_re_arms() {
    let (mut manager, calls, events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    manager
        .start_encryption(handle, [0; 8], 0, [1; 16])
        .unwrap();
    manager.on_encryption_established(handle);
    calls.borrow_mut().clear();
    manager.on_timer(TimerKind::AuthPayload(handle));
    assert!(events
        .borrow()
        .iter()
        .any(|e| matches!(e, LinkEvent::AptoExpired { .. })));
    assert!(calls
        .borrow()
        .iter()
        .any(|c| matches!(c, RadioCall::TimerStart(TimerKind::AuthPayload(_), _))));
}

#[test]
fn version_exchange_is_cached() {
    let (mut manager, calls, events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    manager.read_remote_version(handle).unwrap();
    manager.on_peer_message(
        handle,
        PeerMessage::VersionResponse {
            version: 0x09,
            company: 0x0059,
            subversion: 0x0100,
        },
    );
    manager.read_remote_version(handle).unwrap();
    let requests = calls
        .borrow()
        .iter()
        .filter(|c| matches!(c, RadioCall::Control(_, ControlExchange::VersionRequest)))
        .count();
    assert_eq!(requests, 1);
    let reports = events
        .borrow()
        .iter()
        .filter(|e| matches!(e, LinkEvent::RemoteVersion { .. }))
        .count();
    assert_eq!(reports, 2);
}

#[test]
fn phy_change_completes_at_the_instant() {
    let (mut manager, calls, events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    manager.on_peer_message(
        handle,
        PeerMessage::FeatureResponse {
            features: FeatureSet::ENCRYPTION | FeatureSet::PHY_2M,
        },
    );
    manager
        .set_phy(handle, PhyMask::PHY_2M, PhyMask::PHY_2M)
        .unwrap();
    assert!(calls.borrow().iter().any(|c| matches!(
        c,
        RadioCall::Control(_, ControlExchange::PhyUpdate { tx_phy, .. })
            if *tx_phy == PhyMask::PHY_2M
    )));
    manager.on_event_complete(handle, &outcome(6));
    let conn = manager.connection(handle).unwrap();
    assert_eq!(conn.tx_phy, PhyMask::PHY_2M);
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::PhyUpdated {
            status: STATUS_SUCCESS,
            ..
        }
    )));
}

#[test]
fn phy_selection_avoids_what_the_peer_lacks() {
    let (mut manager, calls, _events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    manager.on_peer_message(
        handle,
        PeerMessage::FeatureResponse {
            features: FeatureSet::ENCRYPTION,
        },
    );
    // asking for 2M falls back to 1M, which is already in use
    manager
        .set_phy(handle, PhyMask::PHY_2M, PhyMask::PHY_2M)
        .unwrap();
    assert!(!calls.borrow().iter().any(|c| matches!(
        c,
        RadioCall::Control(_, ControlExchange::PhyUpdate { .. })
    )));
}

#[test]
fn data_length_change_reports_once() {
    let (mut manager, _calls, events) = harness();
    let handle = establish_central(&mut manager, peer_addr(1));
    manager.set_data_length(handle, 0x00FB, 0x0848).unwrap();
    manager.on_peer_message(
        handle,
        PeerMessage::DataLengthResponse {
            tx_octets: 0x00FB,
            tx_time: 0x0848,
            rx_octets: 0x001B,
            rx_time: 0x0148,
        },
    );
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        LinkEvent::DataLengthChanged {
            tx_octets: 0x00FB,
            ..
        }
    )));
    let count_before = events.borrow().len();
    manager.on_peer_message(
        handle,
        PeerMessage::DataLengthResponse {
            tx_octets: 0x00FB,
            tx_time: 0x0848,
            rx_octets: 0x001B,
            rx_time: 0x0148,
        },
    );
    assert_eq!(events.borrow().len(), count_before);
}

#[test]
fn keygen_jobs_are_exclusive() {
    let (mut manager, _calls, events) = harness();
    manager.generate_p256_public_key().unwrap();
    assert!(matches!(
        manager.generate_p256_public_key(),
        Err(LlError::KeyGenPending)
    ));
    manager.on_p256_complete(STATUS_SUCCESS, [0; 64]);
    assert!(events
        .borrow()
        .iter()
        .any(|e| matches!(e, LinkEvent::P256PublicKeyReady { .. })));
    manager.generate_p256_public_key().unwrap();
}

#[test]
fn reset_keeps_identity_tables() {
    let (mut manager, _calls, _events) = harness();
    manager
        .add_white_list_entry(AddressType::Public, peer_addr(1))
        .unwrap();
    manager.set_local_identity(AddressType::Public, local_addr(), [3; 16]);
    manager
        .add_resolving_entry(AddressType::Public, peer_addr(2), [4; 16])
        .unwrap();
    manager.set_address_resolution(true).unwrap();
    establish_central(&mut manager, peer_addr(1));
    manager.reset();
    assert_eq!(manager.active_connections(), 0);
    assert_eq!(manager.white_list_free(), manager.white_list_size() - 1);
    assert_eq!(manager.privacy().peer_count(), 1);
    assert!(!manager.privacy().resolution_enabled());
}

#[test]
fn rotation_keeps_filter_shadow_in_step() {
    let (mut manager, _calls, _events) = harness();
    manager.set_local_identity(AddressType::Public, local_addr(), [3; 16]);
    manager
        .add_resolving_entry(AddressType::Public, peer_addr(7), [0x5A; 16])
        .unwrap();
    manager.set_address_resolution(true).unwrap();
    let index = manager
        .privacy()
        .find_peer(AddressType::Public, peer_addr(7))
        .unwrap();
    let before = manager.privacy().entry(index).unwrap().rpa;
    assert!(manager
        .white_list()
        .admits_extended(AddressType::Random, before));
    manager.on_timer(TimerKind::RpaRotation);
    let after = manager.privacy().entry(index).unwrap().rpa;
    assert_ne!(before, after);
    assert!(manager
        .white_list()
        .admits_extended(AddressType::Random, after));
    assert!(!manager
        .white_list()
        .admits_extended(AddressType::Random, before));
}

#[test]
fn scan_reports_honor_the_filter_policy() {
    let (mut manager, _calls, events) = harness();
    manager
        .add_white_list_entry(AddressType::Public, peer_addr(1))
        .unwrap();
    manager
        .set_scan_parameters(0x0010, 0x0010, ScanFilterPolicy::WhiteListOnly)
        .unwrap();
    manager.start_scan().unwrap();
    manager.on_advertising_report(AddressType::Public, peer_addr(9), -70, &[0x02, 0x01, 0x06]);
    assert!(events.borrow().is_empty());
    manager.on_advertising_report(AddressType::Public, peer_addr(1), -70, &[0x02, 0x01, 0x06]);
    assert_eq!(events.borrow().len(), 1);
}

#[test]
fn filtered_advertising_refuses_unlisted_initiators() {
    let (mut manager, _calls, _events) = harness();
    manager
        .add_white_list_entry(AddressType::Public, peer_addr(1))
        .unwrap();
    manager.start_advertising(true).unwrap();
    let err = manager
        .on_connect_request(
            AddressType::Public,
            peer_addr(9),
            0x0018,
            0,
            0x0048,
            SleepClockAccuracy::Ppm500,
        )
        .unwrap_err();
    assert!(matches!(err, LlError::CommandDisallowed(_)));
    let handle = manager
        .on_connect_request(
            AddressType::Public,
            peer_addr(1),
            0x0018,
            0,
            0x0048,
            SleepClockAccuracy::Ppm500,
        )
        .unwrap();
    assert_eq!(
        manager.connection(handle).unwrap().state,
        ConnState::Connected
    );
}
