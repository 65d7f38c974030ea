//! Ciphering and integrity primitives used by PDCP
//!
//! The entity treats these as opaque functions of (key, COUNT, BEARER, DIRECTION, data).
//! NEA0/NIA0 are the null algorithms; NEA2/NIA2 are AES-128 CTR and CMAC
//! (3GPP TS 33.501 Annex D).

use aes::Aes128;
use cmac::{Cmac, Mac};
use common::LinkDirection;
use ctr::cipher::{KeyIvInit, StreamCipher};
use serde::{Deserialize, Serialize};

/// AES-128 key size in bytes
pub const KEY_SIZE: usize = 16;

/// MAC-I size in bytes
pub const MAC_I_LEN: usize = 4;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Ciphering algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipheringAlgorithm {
    /// Null ciphering
    Nea0,
    /// AES-128 CTR
    Nea2,
}

/// Integrity algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityAlgorithm {
    /// Null integrity, MAC-I is all zeros
    Nia0,
    /// AES-128 CMAC
    Nia2,
}

/// Encrypt `data` in place under COUNT
pub fn encrypt(
    algo: CipheringAlgorithm,
    key: &[u8; KEY_SIZE],
    count: u32,
    bearer: u8,
    direction: LinkDirection,
    data: &mut [u8],
) {
    match algo {
        CipheringAlgorithm::Nea0 => {}
        CipheringAlgorithm::Nea2 => {
            let iv = build_iv(count, bearer, direction);
            let mut cipher = Aes128Ctr::new(key.into(), &iv.into());
            cipher.apply_keystream(data);
        }
    }
}

/// Decrypt `data` in place under COUNT
#[inline]
pub fn decrypt(
    algo: CipheringAlgorithm,
    key: &[u8; KEY_SIZE],
    count: u32,
    bearer: u8,
    direction: LinkDirection,
    data: &mut [u8],
) {
    // Keystream XOR, same as encryption
    encrypt(algo, key, count, bearer, direction, data);
}

/// Compute the 32-bit MAC-I over `data` under COUNT
pub fn compute_mac(
    algo: IntegrityAlgorithm,
    key: &[u8; KEY_SIZE],
    count: u32,
    bearer: u8,
    direction: LinkDirection,
    data: &[u8],
) -> [u8; MAC_I_LEN] {
    match algo {
        IntegrityAlgorithm::Nia0 => [0; MAC_I_LEN],
        IntegrityAlgorithm::Nia2 => {
            // COUNT || BEARER || DIRECTION || 26 zero bits || MESSAGE
            let mut prefix = [0u8; 8];
            prefix[..4].copy_from_slice(&count.to_be_bytes());
            prefix[4] = ((bearer & 0x1F) << 3) | (direction.bit() << 2);

            let mut mac = <Cmac<Aes128> as Mac>::new(key.into());
            mac.update(&prefix);
            mac.update(data);
            let full = mac.finalize().into_bytes();

            let mut mac_i = [0u8; MAC_I_LEN];
            mac_i.copy_from_slice(&full[..MAC_I_LEN]);
            mac_i
        }
    }
}

/// Verify a received MAC-I. NIA0 always verifies.
pub fn verify_mac(
    algo: IntegrityAlgorithm,
    key: &[u8; KEY_SIZE],
    count: u32,
    bearer: u8,
    direction: LinkDirection,
    data: &[u8],
    mac_i: &[u8],
) -> bool {
    match algo {
        IntegrityAlgorithm::Nia0 => true,
        IntegrityAlgorithm::Nia2 => {
            compute_mac(algo, key, count, bearer, direction, data).as_slice() == mac_i
        }
    }
}

/// IV for NEA2: COUNT || BEARER || DIRECTION || 0...0
fn build_iv(count: u32, bearer: u8, direction: LinkDirection) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&count.to_be_bytes());
    iv[4] = ((bearer & 0x1F) << 3) | (direction.bit() << 2);
    iv
}
