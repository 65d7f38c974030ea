//! gNB and UE PDCP bearers wired back to back through their task handles

use bytes::{Bytes, BytesMut};
use common::{LinkDirection, Lcid};
use pdcp::ciphering::{CipheringAlgorithm, IntegrityAlgorithm};
use pdcp::{
    spawn_bearer, DiscardTimer, PdcpConfig, PdcpEntity, PdcpHandle, PdcpRlcInterface,
    PdcpUpperInterface, RlcMode, SecurityConfig, SecurityDirection, SnSize,
};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// RLC that queues PDUs until the test forwards them
#[derive(Default)]
struct QueueRlc {
    um: bool,
    queue: Mutex<Vec<(Option<u32>, Bytes)>>,
    discarded: Mutex<Vec<u32>>,
}

impl QueueRlc {
    fn new(um: bool) -> Arc<Self> {
        Arc::new(Self {
            um,
            ..Self::default()
        })
    }

    fn drain(&self) -> Vec<(Option<u32>, Bytes)> {
        std::mem::take(&mut *self.queue.lock().unwrap())
    }
}

impl PdcpRlcInterface for QueueRlc {
    fn write_sdu(&self, _lcid: Lcid, sn: Option<u32>, pdu: Bytes) {
        self.queue.lock().unwrap().push((sn, pdu));
    }

    fn discard_sdu(&self, _lcid: Lcid, sn: u32) {
        self.discarded.lock().unwrap().push(sn);
    }

    fn rb_is_um(&self, _lcid: Lcid) -> bool {
        self.um
    }

    fn sdu_queue_is_full(&self, _lcid: Lcid) -> bool {
        false
    }

    fn is_suspended(&self, _lcid: Lcid) -> bool {
        false
    }
}

#[derive(Default)]
struct Collector {
    sdus: Mutex<Vec<Bytes>>,
}

impl Collector {
    fn sdus(&self) -> Vec<Bytes> {
        self.sdus.lock().unwrap().clone()
    }
}

impl PdcpUpperInterface for Collector {
    fn write_pdu(&self, _lcid: Lcid, sdu: Bytes) {
        self.sdus.lock().unwrap().push(sdu);
    }

    fn notify_integrity_failure(&self, _lcid: Lcid) {}
}

struct Side {
    handle: PdcpHandle,
    rlc: Arc<QueueRlc>,
    upper: Arc<Collector>,
    _task: JoinHandle<()>,
}

fn security() -> SecurityConfig {
    SecurityConfig {
        k_enc: [0x2b; 16],
        k_int: [0x7e; 16],
        cipher_algo: CipheringAlgorithm::Nea2,
        integ_algo: IntegrityAlgorithm::Nia2,
    }
}

fn start(lcid: Lcid, cfg: PdcpConfig, um: bool, integrity: bool, ciphering: bool) -> Side {
    let rlc = QueueRlc::new(um);
    let upper = Arc::new(Collector::default());
    let (mut entity, timer_rx) = PdcpEntity::new(lcid, rlc.clone(), upper.clone());
    entity.configure(cfg).unwrap();
    entity.config_security(security());
    if integrity {
        entity.enable_integrity(SecurityDirection::TXRX);
    }
    if ciphering {
        entity.enable_encryption(SecurityDirection::TXRX);
    }
    let (handle, task) = spawn_bearer(entity, timer_rx);
    Side {
        handle,
        rlc,
        upper,
        _task: task,
    }
}

/// Forward everything queued on `from` to `to`, returning the SNs forwarded.
/// Every PDU whose position is in `drop` is lost instead.
async fn forward(from: &Side, to: &Side, drop: &[usize]) -> Vec<Option<u32>> {
    let mut forwarded = Vec::new();
    for (i, (sn, pdu)) in from.rlc.drain().into_iter().enumerate() {
        if drop.contains(&i) {
            continue;
        }
        to.handle.write_pdu(BytesMut::from(&pdu[..])).await.unwrap();
        forwarded.push(sn);
    }
    // Wait for the receiving task to process what was sent
    to.handle.metrics().await.unwrap();
    forwarded
}

fn sdu(i: u8, len: usize) -> Bytes {
    Bytes::from(vec![i; len])
}

#[tokio::test]
async fn test_srb_protected_loopback() {
    let lcid = Lcid(1);
    let gnb = start(lcid, PdcpConfig::srb(0, SnSize::Len12, LinkDirection::Downlink), false, true, true);
    let ue = start(lcid, PdcpConfig::srb(0, SnSize::Len12, LinkDirection::Uplink), false, true, true);

    let messages = [
        Bytes::from_static(b"RRCSetup"),
        Bytes::from_static(b"SecurityModeCommand"),
        Bytes::from_static(b"RRCReconfiguration"),
    ];
    for msg in &messages {
        gnb.handle.write_sdu(msg.clone()).await.unwrap();
    }
    gnb.handle.metrics().await.unwrap();
    forward(&gnb, &ue, &[]).await;
    assert_eq!(ue.upper.sdus(), messages.to_vec());

    ue.handle
        .write_sdu(Bytes::from_static(b"RRCReconfigurationComplete"))
        .await
        .unwrap();
    ue.handle.metrics().await.unwrap();
    forward(&ue, &gnb, &[]).await;
    assert_eq!(
        gnb.upper.sdus(),
        vec![Bytes::from_static(b"RRCReconfigurationComplete")]
    );

    let rx = ue.handle.metrics().await.unwrap();
    assert_eq!(rx.num_rx_pdus, 3);
    assert_eq!(rx.num_integrity_failures, 0);
}

#[tokio::test]
async fn test_am_drb_status_report_clears_sender() {
    let lcid = Lcid(4);
    let cfg = |direction| {
        PdcpConfig::drb(3, RlcMode::Am, SnSize::Len18, DiscardTimer::Infinity, direction)
            .with_status_report()
    };
    let gnb = start(lcid, cfg(LinkDirection::Downlink), false, false, true);
    let ue = start(lcid, cfg(LinkDirection::Uplink), false, false, true);

    for i in 0..4u8 {
        gnb.handle.write_sdu(sdu(i, 100)).await.unwrap();
    }
    assert_eq!(gnb.handle.buffered_sdus().await.unwrap().len(), 4);

    let sns = forward(&gnb, &ue, &[]).await;
    assert_eq!(sns, vec![Some(0), Some(1), Some(2), Some(3)]);
    assert_eq!(ue.upper.sdus(), (0..4u8).map(|i| sdu(i, 100)).collect::<Vec<_>>());

    ue.handle.send_status_report().await.unwrap();
    let report = forward(&ue, &gnb, &[]).await;
    assert_eq!(report, vec![None]);

    assert!(gnb.handle.buffered_sdus().await.unwrap().is_empty());
    let tx = gnb.handle.metrics().await.unwrap();
    assert_eq!(tx.num_status_reports_rx, 1);
    assert_eq!(tx.num_tx_acked_sdus, 4);
    assert_eq!(tx.num_tx_acked_bytes, 400);
    assert_eq!(ue.handle.metrics().await.unwrap().num_status_reports_tx, 1);
}

#[tokio::test]
async fn test_um_drb_survives_loss() {
    let lcid = Lcid(5);
    let cfg = |direction| {
        PdcpConfig::drb(4, RlcMode::Um, SnSize::Len12, DiscardTimer::Infinity, direction)
    };
    let gnb = start(lcid, cfg(LinkDirection::Downlink), true, false, true);
    let ue = start(lcid, cfg(LinkDirection::Uplink), true, false, true);

    for i in 0..5u8 {
        gnb.handle.write_sdu(sdu(i, 32)).await.unwrap();
    }
    gnb.handle.metrics().await.unwrap();
    forward(&gnb, &ue, &[2]).await;

    let expected: Vec<Bytes> = [0u8, 1, 3, 4].iter().map(|&i| sdu(i, 32)).collect();
    assert_eq!(ue.upper.sdus(), expected);

    let state = ue.handle.bearer_state().await.unwrap().unwrap();
    assert_eq!(state.rx_sn, 5);
    assert_eq!(state.rx_hfn, 0);
}

#[tokio::test]
async fn test_reestablish_resubmits_unacknowledged() {
    let lcid = Lcid(4);
    let cfg = |direction| {
        PdcpConfig::drb(3, RlcMode::Am, SnSize::Len12, DiscardTimer::Infinity, direction)
    };
    let gnb = start(lcid, cfg(LinkDirection::Downlink), false, false, false);
    let ue = start(lcid, cfg(LinkDirection::Uplink), false, false, false);

    for i in 0..3u8 {
        gnb.handle.write_sdu(sdu(i, 10)).await.unwrap();
    }
    gnb.handle.notify_delivery(vec![1]).await.unwrap();
    gnb.handle.metrics().await.unwrap();
    // The first transmissions are lost
    gnb.rlc.drain();

    gnb.handle.reestablish().await.unwrap();
    gnb.handle.metrics().await.unwrap();
    let sns = forward(&gnb, &ue, &[]).await;
    assert_eq!(sns, vec![Some(0), Some(2)]);
    assert_eq!(ue.upper.sdus(), vec![sdu(0, 10), sdu(2, 10)]);

    let state = gnb.handle.bearer_state().await.unwrap().unwrap();
    assert_eq!(state.tx_sn, 3);
}
