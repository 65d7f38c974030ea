//! PDCP security context
//!
//! Tracks, per direction, whether ciphering and integrity protection are
//! active, and holds activations scheduled for a future COUNT (used when a
//! new key applies from a given PDU onwards, e.g. after handover).

use crate::ciphering::{CipheringAlgorithm, IntegrityAlgorithm, KEY_SIZE};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

bitflags! {
    /// Security direction, relative to the PDCP entity
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SecurityDirection: u8 {
        const TX = 0b01;
        const RX = 0b10;
        const TXRX = Self::TX.bits() | Self::RX.bits();
    }
}

/// Protection function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityFunction {
    /// Ciphering
    Confidentiality,
    /// Integrity protection
    Integrity,
}

/// Keys and algorithms for one bearer
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityConfig {
    /// Ciphering key (K_RRCenc or K_UPenc)
    pub k_enc: [u8; KEY_SIZE],
    /// Integrity key (K_RRCint)
    pub k_int: [u8; KEY_SIZE],
    /// Ciphering algorithm
    pub cipher_algo: CipheringAlgorithm,
    /// Integrity algorithm
    pub integ_algo: IntegrityAlgorithm,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            k_enc: [0; KEY_SIZE],
            k_int: [0; KEY_SIZE],
            cipher_algo: CipheringAlgorithm::Nea0,
            integ_algo: IntegrityAlgorithm::Nia0,
        }
    }
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("cipher_algo", &self.cipher_algo)
            .field("integ_algo", &self.integ_algo)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScheduledActivation {
    function: SecurityFunction,
    /// Either TX or RX, never both
    direction: SecurityDirection,
    at_count: u32,
}

/// Per-direction activation state of ciphering and integrity
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    ciphering: SecurityDirection,
    integrity: SecurityDirection,
    scheduled: Vec<ScheduledActivation>,
}

impl SecurityContext {
    /// Create a context with everything disabled
    pub fn new() -> Self {
        Self::default()
    }

    fn flags_mut(&mut self, function: SecurityFunction) -> &mut SecurityDirection {
        match function {
            SecurityFunction::Confidentiality => &mut self.ciphering,
            SecurityFunction::Integrity => &mut self.integrity,
        }
    }

    /// Enable or disable a function in the given direction(s)
    pub fn set_direction_active(
        &mut self,
        function: SecurityFunction,
        direction: SecurityDirection,
        active: bool,
    ) {
        let flags = self.flags_mut(function);
        flags.set(direction, active);
        debug!("{:?} now active for {:?}", function, *flags);
    }

    /// Whether `function` is active for every direction in `direction`
    pub fn is_active(&self, function: SecurityFunction, direction: SecurityDirection) -> bool {
        match function {
            SecurityFunction::Confidentiality => self.ciphering.contains(direction),
            SecurityFunction::Integrity => self.integrity.contains(direction),
        }
    }

    /// Whether `function` is active for a single `direction` once the activations
    /// scheduled for `count` are applied. Leaves the schedule untouched.
    pub fn is_active_at(
        &self,
        function: SecurityFunction,
        direction: SecurityDirection,
        count: u32,
    ) -> bool {
        self.is_active(function, direction)
            || self.scheduled.iter().any(|s| {
                s.function == function && s.direction == direction && s.at_count == count
            })
    }

    /// Defer activation of `function` until the counter of `direction` reaches `at_count`.
    ///
    /// A later schedule for the same function and direction replaces the earlier one.
    pub fn schedule_activation(
        &mut self,
        function: SecurityFunction,
        direction: SecurityDirection,
        at_count: u32,
    ) {
        for single in [SecurityDirection::TX, SecurityDirection::RX] {
            if !direction.contains(single) {
                continue;
            }
            self.scheduled
                .retain(|s| !(s.function == function && s.direction == single));
            self.scheduled.push(ScheduledActivation {
                function,
                direction: single,
                at_count,
            });
        }
        debug!(
            "Scheduled {:?} activation for {:?} at COUNT {}",
            function, direction, at_count
        );
    }

    /// Whether any activation is still pending
    pub fn has_scheduled(&self) -> bool {
        !self.scheduled.is_empty()
    }

    /// Apply activations scheduled for `count` in `direction` (TX or RX) and clear them.
    ///
    /// Returns true if anything was activated.
    pub fn apply_scheduled(&mut self, direction: SecurityDirection, count: u32) -> bool {
        let mut due = Vec::new();
        self.scheduled.retain(|s| {
            if s.direction == direction && s.at_count == count {
                due.push(*s);
                false
            } else {
                true
            }
        });

        for activation in &due {
            info!(
                "Activating {:?} for {:?} at COUNT {}",
                activation.function, activation.direction, count
            );
            let flags = self.flags_mut(activation.function);
            flags.insert(activation.direction);
        }

        !due.is_empty()
    }

    /// Disable everything and drop pending schedules
    pub fn clear(&mut self) {
        self.ciphering = SecurityDirection::empty();
        self.integrity = SecurityDirection::empty();
        self.scheduled.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_flags() {
        let mut ctx = SecurityContext::new();
        ctx.set_direction_active(SecurityFunction::Integrity, SecurityDirection::TXRX, true);
        assert!(ctx.is_active(SecurityFunction::Integrity, SecurityDirection::TX));
        assert!(ctx.is_active(SecurityFunction::Integrity, SecurityDirection::RX));
        assert!(!ctx.is_active(SecurityFunction::Confidentiality, SecurityDirection::TX));

        ctx.set_direction_active(SecurityFunction::Integrity, SecurityDirection::RX, false);
        assert!(ctx.is_active(SecurityFunction::Integrity, SecurityDirection::TX));
        assert!(!ctx.is_active(SecurityFunction::Integrity, SecurityDirection::RX));
    }

    #[test]
    fn test_scheduled_activation_applies_once() {
        let mut ctx = SecurityContext::new();
        ctx.schedule_activation(SecurityFunction::Confidentiality, SecurityDirection::TX, 5);

        assert!(!ctx.apply_scheduled(SecurityDirection::TX, 4));
        assert!(!ctx.is_active(SecurityFunction::Confidentiality, SecurityDirection::TX));

        assert!(ctx.apply_scheduled(SecurityDirection::TX, 5));
        assert!(ctx.is_active(SecurityFunction::Confidentiality, SecurityDirection::TX));
        assert!(!ctx.has_scheduled());

        // Applied once, then gone
        ctx.set_direction_active(SecurityFunction::Confidentiality, SecurityDirection::TX, false);
        assert!(!ctx.apply_scheduled(SecurityDirection::TX, 5));
        assert!(!ctx.is_active(SecurityFunction::Confidentiality, SecurityDirection::TX));
    }

    #[test]
    fn test_is_active_at_leaves_schedule() {
        let mut ctx = SecurityContext::new();
        ctx.schedule_activation(SecurityFunction::Integrity, SecurityDirection::RX, 3);

        assert!(ctx.is_active_at(SecurityFunction::Integrity, SecurityDirection::RX, 3));
        assert!(!ctx.is_active_at(SecurityFunction::Integrity, SecurityDirection::RX, 2));
        assert!(!ctx.is_active_at(SecurityFunction::Confidentiality, SecurityDirection::RX, 3));
        assert!(!ctx.is_active(SecurityFunction::Integrity, SecurityDirection::RX));
        assert!(ctx.has_scheduled());
    }

    #[test]
    fn test_schedule_both_directions_independently() {
        let mut ctx = SecurityContext::new();
        ctx.schedule_activation(SecurityFunction::Integrity, SecurityDirection::TXRX, 10);

        assert!(!ctx.apply_scheduled(SecurityDirection::RX, 9));
        assert!(ctx.apply_scheduled(SecurityDirection::TX, 10));
        assert!(ctx.is_active(SecurityFunction::Integrity, SecurityDirection::TX));
        assert!(!ctx.is_active(SecurityFunction::Integrity, SecurityDirection::RX));
        assert!(ctx.has_scheduled());

        assert!(ctx.apply_scheduled(SecurityDirection::RX, 10));
        assert!(ctx.is_active(SecurityFunction::Integrity, SecurityDirection::TXRX));
        assert!(!ctx.has_scheduled());
    }

    #[test]
    fn test_reschedule_replaces() {
        let mut ctx = SecurityContext::new();
        ctx.schedule_activation(SecurityFunction::Integrity, SecurityDirection::TX, 3);
        ctx.schedule_activation(SecurityFunction::Integrity, SecurityDirection::TX, 8);
        assert!(!ctx.apply_scheduled(SecurityDirection::TX, 3));
        assert!(ctx.apply_scheduled(SecurityDirection::TX, 8));
    }
}
