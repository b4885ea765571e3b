//! Device address types
//!
//! Bluetooth device addresses are 6 octets stored least-significant-octet
//! first, the order they cross the host boundary. The two most significant
//! bits of a random address select its sub-kind.

use std::fmt;

// HCI address type values
pub const PUBLIC_DEVICE_ADDRESS: u8 = 0x00;
pub const RANDOM_DEVICE_ADDRESS: u8 = 0x01;
pub const PUBLIC_IDENTITY_ADDRESS: u8 = 0x02;
pub const RANDOM_IDENTITY_ADDRESS: u8 = 0x03;

// Random-address sub-kind encoding in the two most significant bits
pub const RANDOM_ADDR_KIND_MASK: u8 = 0xC0;
pub const NON_RESOLVABLE_ADDR_BITS: u8 = 0x00;
pub const RESERVED_ADDR_BITS: u8 = 0x40;
pub const STATIC_RANDOM_ADDR_BITS: u8 = 0x80;
pub const RESOLVABLE_ADDR_BITS: u8 = 0xC0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Public,
    Random,
    PublicIdentity,
    RandomIdentity,
}

impl From<u8> for AddressType {
    fn from(value: u8) -> Self {
        match value {
            PUBLIC_DEVICE_ADDRESS => AddressType::Public,
            RANDOM_DEVICE_ADDRESS => AddressType::Random,
            PUBLIC_IDENTITY_ADDRESS => AddressType::PublicIdentity,
            RANDOM_IDENTITY_ADDRESS => AddressType::RandomIdentity,
            _ => AddressType::Public,
        }
    }
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::Public => PUBLIC_DEVICE_ADDRESS,
            AddressType::Random => RANDOM_DEVICE_ADDRESS,
            AddressType::PublicIdentity => PUBLIC_IDENTITY_ADDRESS,
            AddressType::RandomIdentity => RANDOM_IDENTITY_ADDRESS,
        }
    }
}

/// Sub-kind of a random device address, taken from its top two bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomAddressKind {
    NonResolvablePrivate,
    Reserved,
    StaticRandom,
    ResolvablePrivate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BdAddr {
    pub bytes: [u8; 6],
}

impl BdAddr {
    pub const ZERO: BdAddr = BdAddr { bytes: [0u8; 6] };

    pub fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() >= 6 {
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(&slice[0..6]);
            Some(Self { bytes })
        } else {
            None
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_zero(&self) -> bool {
        self.bytes == [0u8; 6]
    }

    /// Sub-kind encoded in the two most significant bits. Only meaningful
    /// for random addresses; a public address carries no kind bits.
    pub fn random_kind(&self) -> RandomAddressKind {
        match self.bytes[5] & RANDOM_ADDR_KIND_MASK {
            NON_RESOLVABLE_ADDR_BITS => RandomAddressKind::NonResolvablePrivate,
            RESERVED_ADDR_BITS => RandomAddressKind::Reserved,
            STATIC_RANDOM_ADDR_BITS => RandomAddressKind::StaticRandom,
            _ => RandomAddressKind::ResolvablePrivate,
        }
    }

    /// Validity check for a host-supplied static random address: kind bits
    /// must mark static random and the random part must contain at least one
    /// zero bit and one one bit.
    pub fn is_valid_static_random(&self) -> bool {
        if self.bytes[5] & RANDOM_ADDR_KIND_MASK != STATIC_RANDOM_ADDR_BITS {
            return false;
        }
        let mut all_zero = true;
        let mut all_one = true;
        for (i, b) in self.bytes.iter().enumerate() {
            let random_part = if i == 5 { b & !RANDOM_ADDR_KIND_MASK } else { *b };
            if random_part != 0 {
                all_zero = false;
            }
            let ones_mask = if i == 5 { !RANDOM_ADDR_KIND_MASK } else { 0xFF };
            if random_part != ones_mask {
                all_one = false;
            }
        }
        !all_zero && !all_one
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5],
            self.bytes[4],
            self.bytes[3],
            self.bytes[2],
            self.bytes[1],
            self.bytes[0]
        )
    }
}
