//! In-memory RLC stand-in connecting a gNB-side and a UE-side PDCP entity
//!
//! PDUs written by one side are queued and forwarded by a link task to the
//! peer's bearer task. AM bearers get a delivery notification for every
//! forwarded PDU; UM bearers can be made lossy.

use bytes::{Bytes, BytesMut};
use common::Lcid;
use pdcp::{PdcpHandle, PdcpRlcInterface, PdcpUpperInterface, RlcMode};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// A PDU queued on the link
#[derive(Debug)]
pub struct LinkPdu {
    pub lcid: Lcid,
    pub sn: Option<u32>,
    pub pdu: Bytes,
}

/// RLC seen from one side of the loopback
pub struct LoopbackRlc {
    name: &'static str,
    modes: HashMap<Lcid, RlcMode>,
    tx: mpsc::UnboundedSender<LinkPdu>,
    discarded: AtomicU64,
}

impl LoopbackRlc {
    /// Create the RLC and the queue the link task drains
    pub fn new(
        name: &'static str,
        modes: HashMap<Lcid, RlcMode>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<LinkPdu>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let rlc = Arc::new(Self {
            name,
            modes,
            tx,
            discarded: AtomicU64::new(0),
        });
        (rlc, rx)
    }

    /// Number of discard requests received from PDCP
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

impl PdcpRlcInterface for LoopbackRlc {
    fn write_sdu(&self, lcid: Lcid, sn: Option<u32>, pdu: Bytes) {
        if self.tx.send(LinkPdu { lcid, sn, pdu }).is_err() {
            debug!("{}: link closed, dropping PDU on {}", self.name, lcid);
        }
    }

    fn discard_sdu(&self, lcid: Lcid, sn: u32) {
        trace!("{}: discard SN={} on {}", self.name, sn, lcid);
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    fn rb_is_um(&self, lcid: Lcid) -> bool {
        self.modes.get(&lcid) == Some(&RlcMode::Um)
    }

    fn sdu_queue_is_full(&self, _lcid: Lcid) -> bool {
        false
    }

    fn is_suspended(&self, _lcid: Lcid) -> bool {
        false
    }
}

/// Forward PDUs from one side to the other until the queue closes
pub async fn run_link(
    name: &'static str,
    mut rx: mpsc::UnboundedReceiver<LinkPdu>,
    modes: HashMap<Lcid, RlcMode>,
    own: HashMap<Lcid, PdcpHandle>,
    peer: HashMap<Lcid, PdcpHandle>,
    um_drop_every: u64,
) {
    let mut forwarded = 0u64;

    while let Some(LinkPdu { lcid, sn, pdu }) = rx.recv().await {
        forwarded += 1;

        let mode = modes.get(&lcid).copied().unwrap_or(RlcMode::Am);
        if mode == RlcMode::Um && um_drop_every > 0 && forwarded % um_drop_every == 0 {
            trace!("{}: dropping PDU SN={:?} on {}", name, sn, lcid);
            continue;
        }

        let target = match peer.get(&lcid) {
            Some(target) => target,
            None => {
                warn!("{}: no peer bearer on {}", name, lcid);
                continue;
            }
        };
        if target.write_pdu(BytesMut::from(&pdu[..])).await.is_err() {
            debug!("{}: peer bearer on {} closed", name, lcid);
            continue;
        }

        if let (RlcMode::Am, Some(sn)) = (mode, sn) {
            if let Some(source) = own.get(&lcid) {
                let _ = source.notify_delivery(vec![sn]).await;
            }
        }
    }

    debug!("{}: link stopped after {} PDUs", name, forwarded);
}

/// Counters kept by the upper-layer sink
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SinkCounters {
    pub sdus: u64,
    pub bytes: u64,
    pub integrity_failures: u64,
}

/// Upper layer that counts what it receives
pub struct SduSink {
    name: &'static str,
    counters: Mutex<HashMap<Lcid, SinkCounters>>,
}

impl SduSink {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            counters: Mutex::new(HashMap::new()),
        })
    }

    /// Counters of one bearer
    pub fn counters(&self, lcid: Lcid) -> SinkCounters {
        self.counters
            .lock()
            .map(|c| c.get(&lcid).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    fn update(&self, lcid: Lcid, f: impl FnOnce(&mut SinkCounters)) {
        if let Ok(mut counters) = self.counters.lock() {
            f(counters.entry(lcid).or_default());
        }
    }
}

impl PdcpUpperInterface for SduSink {
    fn write_pdu(&self, lcid: Lcid, sdu: Bytes) {
        trace!("{}: received {} bytes on {}", self.name, sdu.len(), lcid);
        self.update(lcid, |c| {
            c.sdus += 1;
            c.bytes += sdu.len() as u64;
        });
    }

    fn notify_integrity_failure(&self, lcid: Lcid) {
        warn!("{}: integrity failure on {}", self.name, lcid);
        self.update(lcid, |c| c.integrity_failures += 1);
    }
}
