//! Allow-list tables
//!
//! A fixed-capacity table of peer addresses plus a privacy shadow table
//! holding the live private addresses of resolving-list peers, so a
//! rotating peer keeps matching without a host round trip. Free capacity
//! is tracked by count; admission checks never scan for space.

use log::{debug, warn};

use crate::address::{AddressType, BdAddr};
use crate::error::{LlError, LlResult};
use crate::privacy::ResolvingListEntry;

/// Standard allow-list capacity.
pub const WHITE_LIST_SIZE: usize = 16;

/// Shadow capacity: every standard slot, every resolving-list entry, and
/// one extra for the local device's own private address.
pub const EXT_WHITE_LIST_SIZE: usize =
    WHITE_LIST_SIZE + crate::privacy::RESOLVING_LIST_SIZE + 1;

/// One allow-listed peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhiteListEntry {
    pub addr_type: AddressType,
    pub addr: BdAddr,
    /// Present but suppressed: the entry stays listed while filtering
    /// treats it as absent, used while a connection to it is live.
    pub ignored: bool,
    in_use: bool,
}

impl WhiteListEntry {
    const EMPTY: WhiteListEntry = WhiteListEntry {
        addr_type: AddressType::Public,
        addr: BdAddr::ZERO,
        ignored: false,
        in_use: false,
    };

    pub fn is_in_use(&self) -> bool {
        self.in_use
    }
}

/// Privacy-resolved shadow row: the current private address of one
/// resolving-list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ShadowEntry {
    rl_index: usize,
    addr: BdAddr,
    in_use: bool,
}

impl ShadowEntry {
    const EMPTY: ShadowEntry = ShadowEntry {
        rl_index: 0,
        addr: BdAddr::ZERO,
        in_use: false,
    };
}

/// Where an extended lookup matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedMatch {
    /// Standard table index.
    Entry(usize),
    /// Shadow table, resolving-list entry it mirrors.
    Resolved { rl_index: usize },
}

/// Allow-list manager: admission and filter decisions for incoming scan,
/// connect, and advertising-report traffic.
pub struct WhiteList {
    entries: [WhiteListEntry; WHITE_LIST_SIZE],
    shadow: [ShadowEntry; EXT_WHITE_LIST_SIZE],
    free: usize,
}

impl Default for WhiteList {
    fn default() -> Self {
        Self::new()
    }
}

impl WhiteList {
    pub fn new() -> Self {
        Self {
            entries: [WhiteListEntry::EMPTY; WHITE_LIST_SIZE],
            shadow: [ShadowEntry::EMPTY; EXT_WHITE_LIST_SIZE],
            free: WHITE_LIST_SIZE,
        }
    }

    pub fn capacity(&self) -> usize {
        WHITE_LIST_SIZE
    }

    /// Free standard slots, maintained incrementally.
    pub fn free_count(&self) -> usize {
        self.free
    }

    pub fn used(&self) -> usize {
        WHITE_LIST_SIZE - self.free
    }

    /// Insert a peer. Duplicates are rejected without consuming a slot.
    pub fn add(&mut self, addr_type: AddressType, addr: BdAddr) -> LlResult<usize> {
        if !matches!(addr_type, AddressType::Public | AddressType::Random) {
            return Err(LlError::InvalidParameter(format!(
                "white list address type {:?}",
                addr_type
            )));
        }
        if self.find(addr_type, addr).is_some() {
            return Err(LlError::AlreadyExists);
        }
        if self.free == 0 {
            warn!("white list full, cannot add {}", addr);
            return Err(LlError::WhiteListFull);
        }
        let index = self
            .entries
            .iter()
            .position(|e| !e.in_use)
            .ok_or(LlError::WhiteListFull)?;
        self.entries[index] = WhiteListEntry {
            addr_type,
            addr,
            ignored: false,
            in_use: true,
        };
        self.free -= 1;
        debug!("white list entry {} added for {}", index, addr);
        Ok(index)
    }

    /// Remove a peer; its slot and ignore state are reclaimed together.
    pub fn remove(&mut self, addr_type: AddressType, addr: BdAddr) -> LlResult<()> {
        let Some(index) = self.find(addr_type, addr) else {
            return Err(LlError::NotFound);
        };
        self.entries[index] = WhiteListEntry::EMPTY;
        self.free += 1;
        debug!("white list entry {} removed for {}", index, addr);
        Ok(())
    }

    /// Drop every entry, standard and shadow.
    pub fn clear(&mut self) {
        self.entries = [WhiteListEntry::EMPTY; WHITE_LIST_SIZE];
        self.shadow = [ShadowEntry::EMPTY; EXT_WHITE_LIST_SIZE];
        self.free = WHITE_LIST_SIZE;
        debug!("white list cleared");
    }

    /// Linear scan over in-use entries.
    pub fn find(&self, addr_type: AddressType, addr: BdAddr) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.in_use && e.addr_type == addr_type && e.addr == addr)
            .map(|(index, _)| index)
    }

    pub fn entry(&self, index: usize) -> Option<&WhiteListEntry> {
        match self.entries.get(index) {
            Some(entry) if entry.in_use => Some(entry),
            _ => None,
        }
    }

    /// Toggle suppression without removing the entry.
    pub fn set_ignore(
        &mut self,
        addr_type: AddressType,
        addr: BdAddr,
        ignored: bool,
    ) -> LlResult<()> {
        let Some(index) = self.find(addr_type, addr) else {
            return Err(LlError::NotFound);
        };
        self.entries[index].ignored = ignored;
        debug!("white list entry {} ignore={}", index, ignored);
        Ok(())
    }

    /// Lift suppression from every entry.
    pub fn clear_ignore_list(&mut self) {
        for entry in self.entries.iter_mut().filter(|e| e.in_use) {
            entry.ignored = false;
        }
    }

    /// Whether filtering admits this address: listed and not suppressed.
    pub fn admits(&self, addr_type: AddressType, addr: BdAddr) -> bool {
        self.find(addr_type, addr)
            .map(|index| !self.entries[index].ignored)
            .unwrap_or(false)
    }

    /// Populate the shadow table from the resolving list's cached private
    /// addresses. Entries without a cached address contribute nothing.
    pub fn setup_privacy<'a>(
        &mut self,
        entries: impl Iterator<Item = (usize, &'a ResolvingListEntry)>,
    ) {
        self.teardown_privacy();
        for (rl_index, entry) in entries {
            if entry.rpa.is_zero() {
                continue;
            }
            if let Err(err) = self.insert_shadow(rl_index, entry.rpa) {
                warn!("shadow table setup skipped entry {}: {}", rl_index, err);
            }
        }
    }

    /// Drop every shadow row; standard entries are untouched.
    pub fn teardown_privacy(&mut self) {
        self.shadow = [ShadowEntry::EMPTY; EXT_WHITE_LIST_SIZE];
    }

    /// Follow one address rotation: the row holding the previous address
    /// takes the current one; a first rotation inserts. No other row moves.
    pub fn update_entry(
        &mut self,
        rl_index: usize,
        previous: BdAddr,
        current: BdAddr,
    ) -> LlResult<()> {
        if let Some(row) = self
            .shadow
            .iter_mut()
            .find(|row| row.in_use && !previous.is_zero() && row.addr == previous)
        {
            row.addr = current;
            row.rl_index = rl_index;
            return Ok(());
        }
        self.insert_shadow(rl_index, current)
    }

    /// Drop the shadow row mirroring a removed resolving-list entry.
    /// Removing an entry that never had one is a no-op.
    pub fn drop_shadow(&mut self, rl_index: usize) {
        for row in self.shadow.iter_mut() {
            if row.in_use && row.rl_index == rl_index {
                *row = ShadowEntry::EMPTY;
            }
        }
    }

    /// Extended lookup: the standard table first, then the privacy shadow.
    pub fn find_extended(&self, addr_type: AddressType, addr: BdAddr) -> Option<ExtendedMatch> {
        if let Some(index) = self.find(addr_type, addr) {
            return Some(ExtendedMatch::Entry(index));
        }
        if addr_type != AddressType::Random {
            return None;
        }
        self.shadow
            .iter()
            .find(|row| row.in_use && row.addr == addr)
            .map(|row| ExtendedMatch::Resolved {
                rl_index: row.rl_index,
            })
    }

    /// Extended admission: suppression applies to standard matches only;
    /// shadow rows are never suppressed.
    pub fn admits_extended(&self, addr_type: AddressType, addr: BdAddr) -> bool {
        match self.find_extended(addr_type, addr) {
            Some(ExtendedMatch::Entry(index)) => !self.entries[index].ignored,
            Some(ExtendedMatch::Resolved { .. }) => true,
            None => false,
        }
    }

    /// In-use shadow rows, for tests and size queries.
    pub fn shadow_used(&self) -> usize {
        self.shadow.iter().filter(|row| row.in_use).count()
    }

    fn insert_shadow(&mut self, rl_index: usize, addr: BdAddr) -> LlResult<()> {
        if addr.is_zero() {
            return Ok(());
        }
        let Some(row) = self.shadow.iter_mut().find(|row| !row.in_use) else {
            return Err(LlError::WhiteListFull);
        };
        *row = ShadowEntry {
            rl_index,
            addr,
            in_use: true,
        };
        Ok(())
    }
}
