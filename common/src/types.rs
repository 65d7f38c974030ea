//! Common Types for the PDCP Bearer Stack
//!
//! Defines fundamental identifiers shared between PDCP and its collaborators

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical Channel Identity, one PDCP entity per LCID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lcid(pub u8);

impl Lcid {
    /// Highest LCID usable for a radio bearer (TS 38.321 Table 6.2.1-1)
    pub const MAX: u8 = 32;

    /// Create a new LCID with validation
    pub fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Get the LCID value
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Lcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LCID {}", self.0)
    }
}

/// Link direction as seen by the security algorithms (DIRECTION input bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkDirection {
    /// UE to network
    Uplink = 0,
    /// Network to UE
    Downlink = 1,
}

impl LinkDirection {
    /// Value of the 1-bit DIRECTION field
    pub fn bit(&self) -> u8 {
        *self as u8
    }

    /// The direction a peer entity transmits in
    pub fn opposite(&self) -> Self {
        match self {
            LinkDirection::Uplink => LinkDirection::Downlink,
            LinkDirection::Downlink => LinkDirection::Uplink,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcid_validation() {
        assert!(Lcid::new(0).is_some());
        assert!(Lcid::new(32).is_some());
        assert!(Lcid::new(33).is_none());
    }

    #[test]
    fn test_link_direction_bits() {
        assert_eq!(LinkDirection::Uplink.bit(), 0);
        assert_eq!(LinkDirection::Downlink.bit(), 1);
        assert_eq!(LinkDirection::Downlink.opposite(), LinkDirection::Uplink);
    }
}
