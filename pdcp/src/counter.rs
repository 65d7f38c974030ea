//! COUNT arithmetic
//!
//! COUNT = (HFN << SN size) | SN, the 32-bit input to ciphering and integrity.
//! All functions are pure and parameterised by the configured SN size.

use crate::config::SnSize;

/// Build COUNT from HFN and SN
#[inline]
pub fn count(hfn: u32, sn: u32, sn_size: SnSize) -> u32 {
    (hfn << sn_size.bits()) | (sn & sn_size.max_sn())
}

/// HFN part of a COUNT
#[inline]
pub fn hfn_from_count(count: u32, sn_size: SnSize) -> u32 {
    count >> sn_size.bits()
}

/// SN part of a COUNT
#[inline]
pub fn sn_from_count(count: u32, sn_size: SnSize) -> u32 {
    count & sn_size.max_sn()
}

/// Advance an SN by one, returning the new SN and whether it wrapped to zero
#[inline]
pub fn wrapped_increment(sn: u32, sn_size: SnSize) -> (u32, bool) {
    if sn >= sn_size.max_sn() {
        (0, true)
    } else {
        (sn + 1, false)
    }
}

/// Add an offset to an SN modulo the SN space
#[inline]
pub fn sn_add(sn: u32, offset: u32, sn_size: SnSize) -> u32 {
    sn.wrapping_add(offset) & sn_size.max_sn()
}

/// Forward distance from `from` to `to` in SN space
#[inline]
pub fn sn_distance(from: u32, to: u32, sn_size: SnSize) -> u32 {
    to.wrapping_sub(from) & sn_size.max_sn()
}
