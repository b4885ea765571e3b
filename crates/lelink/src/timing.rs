//! Connection timing parameter validation
//!
//! Pure range and consistency checks applied before any connection is
//! created or updated and before a peer-initiated update is acknowledged.
//! Intervals are in 1.25 ms units, supervision and authenticated-payload
//! timeouts in 10 ms units, so one timeout unit equals eight interval units.

use crate::error::{LlError, LlResult};

pub const CONN_INTERVAL_MIN: u16 = 0x0006;
pub const CONN_INTERVAL_MAX: u16 = 0x0C80;
pub const PERIPHERAL_LATENCY_MAX: u16 = 0x01F3;
pub const SUPERVISION_TIMEOUT_MIN: u16 = 0x000A;
pub const SUPERVISION_TIMEOUT_MAX: u16 = 0x0C80;

pub const SCAN_TIMING_MIN: u16 = 0x0004;
pub const SCAN_TIMING_MAX: u16 = 0x4000;

pub const DATA_LEN_TX_OCTETS_MIN: u16 = 0x001B;
pub const DATA_LEN_TX_OCTETS_MAX: u16 = 0x00FB;
pub const DATA_LEN_TX_TIME_MIN: u16 = 0x0148;
pub const DATA_LEN_TX_TIME_MAX: u16 = 0x4290;

pub const DATA_CHANNEL_COUNT: u8 = 37;
pub const MIN_USED_DATA_CHANNELS: u32 = 2;

/// Validate a proposed (interval range, latency, supervision timeout) tuple.
///
/// Range violations report `ParameterOutOfRange`; fields individually in
/// range but jointly inconsistent report `IllegalParamCombination`. The
/// consistency rule requires the supervision timeout to exceed twice the
/// worst-case missed-event span at the maximum interval:
/// `timeout * 8 > (1 + latency) * interval_max * 2` in 1.25 ms units.
pub fn check_conn_params(
    interval_min: u16,
    interval_max: u16,
    latency: u16,
    timeout: u16,
) -> LlResult<()> {
    if interval_min < CONN_INTERVAL_MIN || interval_min > CONN_INTERVAL_MAX {
        return Err(LlError::ParameterOutOfRange(format!(
            "connection interval min {:#06X}",
            interval_min
        )));
    }
    if interval_max < CONN_INTERVAL_MIN || interval_max > CONN_INTERVAL_MAX {
        return Err(LlError::ParameterOutOfRange(format!(
            "connection interval max {:#06X}",
            interval_max
        )));
    }
    if interval_min > interval_max {
        return Err(LlError::ParameterOutOfRange(format!(
            "interval min {:#06X} above max {:#06X}",
            interval_min, interval_max
        )));
    }
    if latency > PERIPHERAL_LATENCY_MAX {
        return Err(LlError::ParameterOutOfRange(format!(
            "peripheral latency {:#06X}",
            latency
        )));
    }
    if timeout < SUPERVISION_TIMEOUT_MIN || timeout > SUPERVISION_TIMEOUT_MAX {
        return Err(LlError::ParameterOutOfRange(format!(
            "supervision timeout {:#06X}",
            timeout
        )));
    }
    // Both sides in 1.25 ms units; u32 keeps the worst case (500 * 6400)
    // out of overflow territory.
    let timeout_units = u32::from(timeout) * 8;
    let worst_case = (1 + u32::from(latency)) * u32::from(interval_max) * 2;
    if timeout_units <= worst_case {
        return Err(LlError::IllegalParamCombination(format!(
            "supervision timeout {:#06X} within twice the latency span of interval {:#06X}, latency {:#06X}",
            timeout, interval_max, latency
        )));
    }
    Ok(())
}

/// Validate an authenticated-payload timeout against the connection's
/// current interval and latency: `apto * 8 >= (1 + latency) * interval`
/// in 1.25 ms units, so the watchdog spans at least one listen opportunity.
pub fn check_apto(apto: u16, interval: u16, latency: u16) -> LlResult<()> {
    if apto == 0 {
        return Err(LlError::ParameterOutOfRange(
            "authenticated payload timeout 0".to_string(),
        ));
    }
    let apto_units = u32::from(apto) * 8;
    let idle_span = (1 + u32::from(latency)) * u32::from(interval);
    if apto_units < idle_span {
        return Err(LlError::IllegalParamCombination(format!(
            "authenticated payload timeout {:#06X} below interval {:#06X}, latency {:#06X}",
            apto, interval, latency
        )));
    }
    Ok(())
}

/// Validate a 37-bit data channel map carried as five octets. The three
/// most significant bits are reserved and must be zero, and at least two
/// data channels must remain in use.
pub fn check_channel_map(map: [u8; 5]) -> LlResult<()> {
    if map[4] & 0xE0 != 0 {
        return Err(LlError::ParameterOutOfRange(
            "channel map reserved bits set".to_string(),
        ));
    }
    let used: u32 = map.iter().map(|b| b.count_ones()).sum();
    if used < MIN_USED_DATA_CHANNELS {
        return Err(LlError::ParameterOutOfRange(format!(
            "channel map marks {} channels used",
            used
        )));
    }
    Ok(())
}

/// Validate requested maximum transmit payload octets and time.
pub fn check_data_length(tx_octets: u16, tx_time: u16) -> LlResult<()> {
    if tx_octets < DATA_LEN_TX_OCTETS_MIN || tx_octets > DATA_LEN_TX_OCTETS_MAX {
        return Err(LlError::ParameterOutOfRange(format!(
            "tx octets {:#06X}",
            tx_octets
        )));
    }
    if tx_time < DATA_LEN_TX_TIME_MIN || tx_time > DATA_LEN_TX_TIME_MAX {
        return Err(LlError::ParameterOutOfRange(format!(
            "tx time {:#06X}",
            tx_time
        )));
    }
    Ok(())
}

/// Validate initiator scan timing: both fields in range and the listen
/// window no longer than the interval between listens.
pub fn check_scan_timing(scan_interval: u16, scan_window: u16) -> LlResult<()> {
    if scan_interval < SCAN_TIMING_MIN || scan_interval > SCAN_TIMING_MAX {
        return Err(LlError::ParameterOutOfRange(format!(
            "scan interval {:#06X}",
            scan_interval
        )));
    }
    if scan_window < SCAN_TIMING_MIN || scan_window > SCAN_TIMING_MAX {
        return Err(LlError::ParameterOutOfRange(format!(
            "scan window {:#06X}",
            scan_window
        )));
    }
    if scan_window > scan_interval {
        return Err(LlError::IllegalParamCombination(format!(
            "scan window {:#06X} above scan interval {:#06X}",
            scan_window, scan_interval
        )));
    }
    Ok(())
}
