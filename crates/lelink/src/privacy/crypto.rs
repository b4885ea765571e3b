//! Private-address cryptography
//!
//! The address-hash function `ah` and the generators for the three random
//! address families. Addresses and their prand/hash halves are handled
//! least-significant-octet first throughout, matching the order they appear
//! in a stored `BdAddr`.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use byteorder::{ByteOrder, LittleEndian};

use super::constants::{ADDR_HASH_LEN, PRAND_LEN};
use crate::address::{
    BdAddr, RANDOM_ADDR_KIND_MASK, RESOLVABLE_ADDR_BITS, STATIC_RANDOM_ADDR_BITS,
};

/// AES-128 encrypt a single block.
pub fn aes128_encrypt(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut data = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut data);
    data.into()
}

/// Address-hash function: AES-128 over the zero-padded 24-bit prand,
/// truncated to 24 bits. Deterministic and pure.
pub fn ah(irk: &[u8; 16], prand: [u8; PRAND_LEN]) -> [u8; ADDR_HASH_LEN] {
    let mut block = [0u8; 16];
    block[..PRAND_LEN].copy_from_slice(&prand);
    let out = aes128_encrypt(irk, &block);
    let mut hash = [0u8; ADDR_HASH_LEN];
    hash.copy_from_slice(&out[..ADDR_HASH_LEN]);
    hash
}

/// Random 24-bit prand with the top two bits forced to mark a resolvable
/// private address.
pub fn random_prand() -> [u8; PRAND_LEN] {
    let mut prand = rand::random::<[u8; PRAND_LEN]>();
    prand[PRAND_LEN - 1] =
        (prand[PRAND_LEN - 1] & !RANDOM_ADDR_KIND_MASK) | RESOLVABLE_ADDR_BITS;
    prand
}

/// Produce a fresh resolvable private address for the given IRK:
/// hash in the low three octets, prand in the high three.
pub fn generate_rpa(irk: &[u8; 16]) -> BdAddr {
    let prand = random_prand();
    let hash = ah(irk, prand);
    let mut bytes = [0u8; 6];
    bytes[..ADDR_HASH_LEN].copy_from_slice(&hash);
    bytes[ADDR_HASH_LEN..].copy_from_slice(&prand);
    BdAddr::new(bytes)
}

/// Recompute the hash from the address's embedded prand and compare the
/// 24-bit values.
pub fn verify_rpa(irk: &[u8; 16], addr: &BdAddr) -> bool {
    let mut prand = [0u8; PRAND_LEN];
    prand.copy_from_slice(&addr.bytes[ADDR_HASH_LEN..]);
    let hash = ah(irk, prand);
    LittleEndian::read_u24(&hash) == LittleEndian::read_u24(&addr.bytes[..ADDR_HASH_LEN])
}

/// Produce a non-resolvable private address: top two bits zero, remainder
/// random, with the degenerate all-zero/all-one random parts excluded.
pub fn generate_nrpa() -> BdAddr {
    loop {
        let mut bytes = rand::random::<[u8; 6]>();
        bytes[5] &= !RANDOM_ADDR_KIND_MASK;
        if random_part_mixed(&bytes) {
            return BdAddr::new(bytes);
        }
    }
}

/// Produce a static random address: top two bits mark static random,
/// remainder random and non-degenerate.
pub fn generate_static_random() -> BdAddr {
    loop {
        let mut bytes = rand::random::<[u8; 6]>();
        bytes[5] = (bytes[5] & !RANDOM_ADDR_KIND_MASK) | STATIC_RANDOM_ADDR_BITS;
        if random_part_mixed(&bytes) {
            return BdAddr::new(bytes);
        }
    }
}

/// The "no privacy for this peer" sentinel.
pub fn is_zero_irk(irk: &[u8; 16]) -> bool {
    irk.iter().all(|b| *b == 0)
}

// The 46-bit random part must contain at least one zero and one one bit.
fn random_part_mixed(bytes: &[u8; 6]) -> bool {
    let mut all_zero = true;
    let mut all_one = true;
    for (i, b) in bytes.iter().enumerate() {
        let mask = if i == 5 { !RANDOM_ADDR_KIND_MASK } else { 0xFF };
        if b & mask != 0 {
            all_zero = false;
        }
        if b & mask != mask {
            all_one = false;
        }
    }
    !all_zero && !all_one
}
