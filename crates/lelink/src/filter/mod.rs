//! Allow-list filtering
//!
//! Admission decisions for incoming scan, connect, and advertising-report
//! traffic, including the privacy-aware extended table that tracks the
//! live private addresses of resolving-list peers.

pub mod table;

pub use self::table::{
    ExtendedMatch, WhiteList, WhiteListEntry, EXT_WHITE_LIST_SIZE, WHITE_LIST_SIZE,
};

/// How an initiator selects its connection target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorFilterPolicy {
    /// Connect to the peer address given in the request.
    PeerAddress,
    /// Connect to any allow-listed peer.
    WhiteList,
}

impl From<u8> for InitiatorFilterPolicy {
    fn from(value: u8) -> Self {
        match value {
            0x01 => InitiatorFilterPolicy::WhiteList,
            _ => InitiatorFilterPolicy::PeerAddress,
        }
    }
}

/// Which advertisers a scanner reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFilterPolicy {
    AcceptAll,
    WhiteListOnly,
}

impl From<u8> for ScanFilterPolicy {
    fn from(value: u8) -> Self {
        match value {
            0x01 => ScanFilterPolicy::WhiteListOnly,
            _ => ScanFilterPolicy::AcceptAll,
        }
    }
}
