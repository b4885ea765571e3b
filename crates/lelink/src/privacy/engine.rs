//! Resolving list and private-address lifecycle
//!
//! Owns the bounded resolving list, with slot 0 reserved for this device's
//! own identity, and drives address generation, resolution, and rotation.
//! All lookups are linear scans over a small fixed table.

use log::{debug, warn};

use super::constants::*;
use super::crypto;
use crate::address::{AddressType, BdAddr, RandomAddressKind};
use crate::error::{LlError, LlResult};

/// One (identity, IRK) pairing and its cached private address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvingListEntry {
    pub id_type: AddressType,
    pub id_addr: BdAddr,
    pub irk: [u8; 16],
    /// Most recently generated private address; zero when none is cached.
    pub rpa: BdAddr,
    in_use: bool,
}

impl ResolvingListEntry {
    const EMPTY: ResolvingListEntry = ResolvingListEntry {
        id_type: AddressType::Public,
        id_addr: BdAddr::ZERO,
        irk: [0u8; 16],
        rpa: BdAddr::ZERO,
        in_use: false,
    };

    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    pub fn has_irk(&self) -> bool {
        !crypto::is_zero_irk(&self.irk)
    }
}

/// An address rotation: the cached value that was replaced and its
/// replacement, keyed by resolving-list index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotatedAddress {
    pub index: usize,
    pub previous: BdAddr,
    pub current: BdAddr,
}

/// Privacy engine state: the resolving list plus device-wide resolution
/// mode and rotation timeout.
pub struct PrivacyEngine {
    entries: [ResolvingListEntry; RESOLVING_LIST_SIZE],
    used: usize,
    resolution_enabled: bool,
    rpa_timeout_s: u16,
}

impl Default for PrivacyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivacyEngine {
    pub fn new() -> Self {
        let mut entries = [ResolvingListEntry::EMPTY; RESOLVING_LIST_SIZE];
        // The local slot exists from the start; a zero IRK there means the
        // device uses non-resolvable addresses while privacy is active.
        entries[LOCAL_RL_INDEX].in_use = true;
        Self {
            entries,
            used: 1,
            resolution_enabled: false,
            rpa_timeout_s: RPA_TIMEOUT_DEFAULT_S,
        }
    }

    /// Install this device's own identity and IRK in the reserved slot.
    pub fn set_local_identity(&mut self, id_type: AddressType, id_addr: BdAddr, irk: [u8; 16]) {
        let local = &mut self.entries[LOCAL_RL_INDEX];
        local.id_type = id_type;
        local.id_addr = id_addr;
        local.irk = irk;
        local.rpa = BdAddr::ZERO;
        debug!("local identity set to {} ({:?})", id_addr, id_type);
    }

    pub fn local(&self) -> &ResolvingListEntry {
        &self.entries[LOCAL_RL_INDEX]
    }

    pub fn resolution_enabled(&self) -> bool {
        self.resolution_enabled
    }

    pub fn set_resolution_enabled(&mut self, enabled: bool) {
        self.resolution_enabled = enabled;
    }

    pub fn rpa_timeout(&self) -> u16 {
        self.rpa_timeout_s
    }

    /// Set the rotation period in seconds, 1 s to 11.5 h.
    pub fn set_rpa_timeout(&mut self, seconds: u16) -> LlResult<()> {
        if !(RPA_TIMEOUT_MIN_S..=RPA_TIMEOUT_MAX_S).contains(&seconds) {
            return Err(LlError::ParameterOutOfRange(format!(
                "rpa timeout {:#06X} seconds",
                seconds
            )));
        }
        self.rpa_timeout_s = seconds;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        RESOLVING_LIST_SIZE
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn peer_count(&self) -> usize {
        self.used - 1
    }

    /// Add a peer (identity, IRK) pairing. Re-adding a known identity
    /// updates its IRK in place instead of consuming another slot.
    pub fn add_peer(
        &mut self,
        id_type: AddressType,
        id_addr: BdAddr,
        irk: [u8; 16],
    ) -> LlResult<usize> {
        if !matches!(id_type, AddressType::Public | AddressType::Random) {
            return Err(LlError::InvalidParameter(format!(
                "resolving list identity type {:?}",
                id_type
            )));
        }
        if let Some(index) = self.find_peer(id_type, id_addr) {
            let entry = &mut self.entries[index];
            entry.irk = irk;
            entry.rpa = BdAddr::ZERO;
            self.refresh_entry(index);
            debug!("resolving list entry {} for {} updated", index, id_addr);
            return Ok(index);
        }
        let Some(index) = self.free_slot() else {
            warn!("resolving list full, cannot add {}", id_addr);
            return Err(LlError::ResolvingListFull);
        };
        self.entries[index] = ResolvingListEntry {
            id_type,
            id_addr,
            irk,
            rpa: BdAddr::ZERO,
            in_use: true,
        };
        self.used += 1;
        self.refresh_entry(index);
        debug!("resolving list entry {} added for {}", index, id_addr);
        Ok(index)
    }

    /// Remove a peer, returning its index and the removed entry so callers
    /// can drop any shadow state derived from its cached address.
    pub fn remove_peer(
        &mut self,
        id_type: AddressType,
        id_addr: BdAddr,
    ) -> LlResult<(usize, ResolvingListEntry)> {
        let Some(index) = self.find_peer(id_type, id_addr) else {
            return Err(LlError::NotFound);
        };
        let removed = self.entries[index];
        self.entries[index] = ResolvingListEntry::EMPTY;
        self.used -= 1;
        debug!("resolving list entry {} removed for {}", index, id_addr);
        Ok((index, removed))
    }

    /// Remove every peer entry. The local identity slot survives.
    pub fn clear_peers(&mut self) {
        for entry in self.entries.iter_mut().skip(LOCAL_RL_INDEX + 1) {
            *entry = ResolvingListEntry::EMPTY;
        }
        self.used = 1;
        debug!("resolving list cleared");
    }

    /// Linear scan for a peer identity; the local slot is not a peer.
    pub fn find_peer(&self, id_type: AddressType, id_addr: BdAddr) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .skip(LOCAL_RL_INDEX + 1)
            .find(|(_, e)| e.in_use && e.id_type == id_type && e.id_addr == id_addr)
            .map(|(index, _)| index)
    }

    /// Entry by index; total over any index value.
    pub fn entry(&self, index: usize) -> Option<&ResolvingListEntry> {
        match self.entries.get(index) {
            Some(entry) if entry.in_use => Some(entry),
            _ => None,
        }
    }

    /// Every in-use entry, local slot included.
    pub fn active_entries(&self) -> impl Iterator<Item = (usize, &ResolvingListEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.in_use)
    }

    /// Resolve an observed resolvable private address against peer IRKs.
    /// Reports no match while address resolution is disabled.
    pub fn resolve(&self, addr: &BdAddr) -> Option<usize> {
        if !self.resolution_enabled {
            return None;
        }
        if addr.random_kind() != RandomAddressKind::ResolvablePrivate {
            return None;
        }
        self.entries
            .iter()
            .enumerate()
            .skip(LOCAL_RL_INDEX + 1)
            .filter(|(_, e)| e.in_use && e.has_irk())
            .find(|(_, e)| crypto::verify_rpa(&e.irk, addr))
            .map(|(index, _)| index)
    }

    /// The private address this device currently puts on air.
    pub fn read_local_rpa(&self) -> LlResult<BdAddr> {
        let local = self.local();
        if local.rpa.is_zero() {
            return Err(LlError::NotFound);
        }
        Ok(local.rpa)
    }

    /// The local private address to use for a new air operation, generating
    /// one on first use. `None` while resolution is disabled.
    pub fn local_private_address(&mut self) -> Option<BdAddr> {
        if !self.resolution_enabled {
            return None;
        }
        if self.local().rpa.is_zero() {
            self.refresh_entry(LOCAL_RL_INDEX);
        }
        let rpa = self.local().rpa;
        if rpa.is_zero() {
            None
        } else {
            Some(rpa)
        }
    }

    /// The most recent private address cached for a peer identity.
    pub fn read_peer_rpa(&self, id_type: AddressType, id_addr: BdAddr) -> LlResult<BdAddr> {
        let index = self
            .find_peer(id_type, id_addr)
            .ok_or(LlError::NotFound)?;
        let entry = &self.entries[index];
        if entry.rpa.is_zero() {
            return Err(LlError::NotFound);
        }
        Ok(entry.rpa)
    }

    /// Regenerate every cached private address: an RPA per entry with an
    /// IRK, a non-resolvable address for the local slot without one. Peers
    /// with the zero-IRK sentinel keep no private address. Returns the
    /// rotations performed so shadow tables can be resynchronized. Does
    /// nothing while resolution is disabled.
    pub fn rotate(&mut self) -> Vec<RotatedAddress> {
        if !self.resolution_enabled {
            return Vec::new();
        }
        let mut rotated = Vec::new();
        for index in 0..self.entries.len() {
            let previous = self.entries[index].rpa;
            if !self.refresh_entry(index) {
                continue;
            }
            let current = self.entries[index].rpa;
            debug!("entry {} rotated {} -> {}", index, previous, current);
            rotated.push(RotatedAddress {
                index,
                previous,
                current,
            });
        }
        rotated
    }

    // Regenerate one entry's cached address. Returns false when the entry
    // takes no private address (not in use, or a zero-IRK peer).
    fn refresh_entry(&mut self, index: usize) -> bool {
        if !self.resolution_enabled {
            return false;
        }
        let entry = &mut self.entries[index];
        if !entry.in_use {
            return false;
        }
        if entry.has_irk() {
            entry.rpa = crypto::generate_rpa(&entry.irk);
            true
        } else if index == LOCAL_RL_INDEX {
            entry.rpa = crypto::generate_nrpa();
            true
        } else {
            false
        }
    }

    fn free_slot(&self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .skip(LOCAL_RL_INDEX + 1)
            .find(|(_, e)| !e.in_use)
            .map(|(index, _)| index)
    }
}

/// Observed address classifies as a resolvable private address.
pub fn is_rpa(addr_type: AddressType, addr: &BdAddr) -> bool {
    addr_type == AddressType::Random
        && addr.random_kind() == RandomAddressKind::ResolvablePrivate
}

/// Observed address classifies as a non-resolvable private address.
pub fn is_nrpa(addr_type: AddressType, addr: &BdAddr) -> bool {
    addr_type == AddressType::Random
        && addr.random_kind() == RandomAddressKind::NonResolvablePrivate
}

/// Observed address names a device identity: public, or static random.
pub fn is_identity_address(addr_type: AddressType, addr: &BdAddr) -> bool {
    match addr_type {
        AddressType::Public | AddressType::PublicIdentity | AddressType::RandomIdentity => true,
        AddressType::Random => addr.random_kind() == RandomAddressKind::StaticRandom,
    }
}
