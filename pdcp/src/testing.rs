//! Test doubles for the RLC and upper-layer interfaces

use crate::interfaces::{PdcpRlcInterface, PdcpUpperInterface};
use bytes::Bytes;
use common::Lcid;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// RLC recording everything PDCP hands it
#[derive(Default)]
pub struct MockRlc {
    pub um: bool,
    pub full: AtomicBool,
    pub suspended: AtomicBool,
    pub sent: Mutex<Vec<(Option<u32>, Bytes)>>,
    pub discarded: Mutex<Vec<u32>>,
}

impl MockRlc {
    pub fn am() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn um() -> Arc<Self> {
        Arc::new(Self {
            um: true,
            ..Self::default()
        })
    }

    pub fn take_sent(&self) -> Vec<(Option<u32>, Bytes)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl PdcpRlcInterface for MockRlc {
    fn write_sdu(&self, _lcid: Lcid, sn: Option<u32>, pdu: Bytes) {
        self.sent.lock().unwrap().push((sn, pdu));
    }

    fn discard_sdu(&self, _lcid: Lcid, sn: u32) {
        self.discarded.lock().unwrap().push(sn);
    }

    fn rb_is_um(&self, _lcid: Lcid) -> bool {
        self.um
    }

    fn sdu_queue_is_full(&self, _lcid: Lcid) -> bool {
        self.full.load(Ordering::Relaxed)
    }

    fn is_suspended(&self, _lcid: Lcid) -> bool {
        self.suspended.load(Ordering::Relaxed)
    }
}

/// Upper layer recording delivered SDUs
#[derive(Default)]
pub struct MockUpper {
    pub delivered: Mutex<Vec<Bytes>>,
    pub integrity_failures: AtomicUsize,
}

impl MockUpper {
    pub fn delivered(&self) -> Vec<Bytes> {
        self.delivered.lock().unwrap().clone()
    }
}

impl PdcpUpperInterface for MockUpper {
    fn write_pdu(&self, _lcid: Lcid, sdu: Bytes) {
        self.delivered.lock().unwrap().push(sdu);
    }

    fn notify_integrity_failure(&self, _lcid: Lcid) {
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
    }
}
