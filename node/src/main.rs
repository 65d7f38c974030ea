//! Albor PDCP Loopback Node
//!
//! Runs a gNB-side and a UE-side PDCP entity per configured bearer, connected
//! through an in-memory RLC, and pushes generated traffic through them.

mod config;
mod link;

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use common::{LinkDirection, Lcid};
use pdcp::{
    spawn_bearer, PdcpEntity, PdcpHandle, RbType, RlcMode, SecurityConfig, SecurityDirection,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::{BearerConfig, NodeConfig, SecuritySection, TrafficConfig};
use link::{run_link, LoopbackRlc, SduSink};

/// Albor PDCP loopback node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "pdcp_node.yml")]
    config: String,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// SDUs per bearer, overrides the config file
    #[arg(long)]
    num_sdus: Option<u64>,
}

/// Both ends of the loopback
struct Node {
    gnb: HashMap<Lcid, PdcpHandle>,
    ue: HashMap<Lcid, PdcpHandle>,
    gnb_rlc: Arc<LoopbackRlc>,
    ue_sink: Arc<SduSink>,
    gnb_sink: Arc<SduSink>,
    bearer_tasks: Vec<JoinHandle<()>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::from_yaml_file(&args.config)?;
    if let Some(num_sdus) = args.num_sdus {
        config.traffic.num_sdus = num_sdus;
    }

    // Initialize logging
    let directives = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.log.filter_directives());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor PDCP loopback node");
    info!("Configuration file: {}", args.config);
    for bearer in &config.bearers {
        info!(
            "  LCID {}: {:?}/{:?}, {}-bit SN, discard timer {:?} ms, status reports {}",
            bearer.lcid,
            bearer.rb_type,
            bearer.rlc_mode,
            bearer.sn_size,
            bearer.discard_timer_ms,
            bearer.status_report_required
        );
    }

    let modes: HashMap<Lcid, RlcMode> = config
        .bearers
        .iter()
        .map(|b| Ok((b.lcid()?, b.rlc_mode)))
        .collect::<Result<_>>()?;

    let (gnb_rlc, gnb_link_rx) = LoopbackRlc::new("gnb", modes.clone());
    let (ue_rlc, ue_link_rx) = LoopbackRlc::new("ue", modes.clone());
    let gnb_sink = SduSink::new("gnb");
    let ue_sink = SduSink::new("ue");
    let sec_cfg = config.security.to_security_config()?;

    let mut node = Node {
        gnb: HashMap::new(),
        ue: HashMap::new(),
        gnb_rlc: gnb_rlc.clone(),
        ue_sink: ue_sink.clone(),
        gnb_sink: gnb_sink.clone(),
        bearer_tasks: Vec::new(),
    };

    for bearer in &config.bearers {
        let lcid = bearer.lcid()?;

        let (handle, task) = start_bearer(
            lcid,
            bearer,
            LinkDirection::Downlink,
            &config.security,
            &sec_cfg,
            gnb_rlc.clone(),
            gnb_sink.clone(),
        )?;
        node.gnb.insert(lcid, handle);
        node.bearer_tasks.push(task);

        let (handle, task) = start_bearer(
            lcid,
            bearer,
            LinkDirection::Uplink,
            &config.security,
            &sec_cfg,
            ue_rlc.clone(),
            ue_sink.clone(),
        )?;
        node.ue.insert(lcid, handle);
        node.bearer_tasks.push(task);
    }
    drop((gnb_rlc, ue_rlc));

    info!("{} bearers configured on each side", config.bearers.len());

    let downlink = tokio::spawn(run_link(
        "gnb->ue",
        gnb_link_rx,
        modes.clone(),
        node.gnb.clone(),
        node.ue.clone(),
        config.traffic.um_drop_every,
    ));
    let uplink = tokio::spawn(run_link(
        "ue->gnb",
        ue_link_rx,
        modes,
        node.ue.clone(),
        node.gnb.clone(),
        config.traffic.um_drop_every,
    ));

    // Start statistics reporting
    let stats_handle = {
        let gnb = node.gnb.clone();
        let ue = node.ue.clone();
        let period = Duration::from_secs(config.stats_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                report_stats(&gnb, &ue).await;
            }
        })
    };

    let traffic_handle = tokio::spawn(run_traffic(
        config.bearers.clone(),
        node.gnb.clone(),
        node.ue.clone(),
        config.traffic.clone(),
    ));

    // Wait for shutdown signal or the end of the traffic
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = traffic_handle => {
            match result {
                Ok(Ok(sent)) => info!("Traffic complete, {} SDUs sent", sent),
                Ok(Err(e)) => error!("Traffic generation failed: {}", e),
                Err(e) => error!("Traffic task panicked: {}", e),
            }
            // Let the links drain
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    stats_handle.abort();
    print_final_report(&node).await?;

    // Shutdown
    info!("Shutting down PDCP node");
    for handle in node.gnb.values().chain(node.ue.values()) {
        if let Err(e) = handle.shutdown().await {
            debug!("{} already stopped: {}", handle.lcid(), e);
        }
    }

    let tasks = std::mem::take(&mut node.bearer_tasks);
    drop(node);
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        for task in tasks {
            let _ = task.await;
        }
        let _ = downlink.await;
        let _ = uplink.await;
    })
    .await;

    info!("PDCP node shutdown complete");
    Ok(())
}

/// Create, configure and spawn one PDCP entity
fn start_bearer(
    lcid: Lcid,
    bearer: &BearerConfig,
    direction: LinkDirection,
    security: &SecuritySection,
    sec_cfg: &SecurityConfig,
    rlc: Arc<LoopbackRlc>,
    sink: Arc<SduSink>,
) -> Result<(PdcpHandle, JoinHandle<()>)> {
    let (mut entity, timer_rx) = PdcpEntity::new(lcid, rlc, sink);
    entity.configure(bearer.to_pdcp_config(direction)?)?;
    entity.config_security(sec_cfg.clone());

    if security.integrity && bearer.rb_type == RbType::Srb {
        entity.enable_integrity(SecurityDirection::TXRX);
    }
    if security.ciphering {
        entity.enable_encryption(SecurityDirection::TXRX);
    }

    Ok(spawn_bearer(entity, timer_rx))
}

/// Push SDUs through every DRB from the gNB side
async fn run_traffic(
    bearers: Vec<BearerConfig>,
    gnb: HashMap<Lcid, PdcpHandle>,
    ue: HashMap<Lcid, PdcpHandle>,
    traffic: TrafficConfig,
) -> Result<u64> {
    let mut srbs = Vec::new();
    let mut drbs = Vec::new();
    for bearer in &bearers {
        let lcid = bearer.lcid()?;
        match bearer.rb_type {
            RbType::Srb => srbs.push(lcid),
            RbType::Drb => drbs.push((lcid, bearer.status_report_required)),
        }
    }

    let mut sent = 0u64;

    // A signalling exchange before user data
    for lcid in &srbs {
        if let Some(handle) = gnb.get(lcid) {
            handle.write_sdu(Bytes::from_static(b"RRCSetup")).await?;
            sent += 1;
        }
        if let Some(handle) = ue.get(lcid) {
            handle.write_sdu(Bytes::from_static(b"RRCSetupComplete")).await?;
        }
    }

    if drbs.is_empty() {
        warn!("No DRBs configured, skipping user-plane traffic");
        return Ok(sent);
    }

    let interval = Duration::from_micros(traffic.interval_us);
    let mut n = 0u64;
    while traffic.num_sdus == 0 || n < traffic.num_sdus {
        let sdu = Bytes::from(vec![(n & 0xff) as u8; traffic.sdu_size]);
        for (lcid, _) in &drbs {
            if let Some(handle) = gnb.get(lcid) {
                handle.write_sdu(sdu.clone()).await?;
                sent += 1;
            }
        }
        n += 1;

        if traffic.status_report_every > 0 && n % traffic.status_report_every == 0 {
            for (lcid, _) in drbs.iter().filter(|(_, required)| *required) {
                if let Some(handle) = ue.get(lcid) {
                    if let Err(e) = handle.send_status_report().await {
                        warn!("Status report on {} failed: {}", lcid, e);
                    }
                }
            }
        }

        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }

    Ok(sent)
}

async fn report_stats(gnb: &HashMap<Lcid, PdcpHandle>, ue: &HashMap<Lcid, PdcpHandle>) {
    info!("PDCP Statistics:");
    for (lcid, handle) in gnb {
        let Some(peer) = ue.get(lcid) else {
            continue;
        };
        let (Ok(tx), Ok(rx)) = (handle.metrics().await, peer.metrics().await) else {
            continue;
        };
        info!(
            "  {}: TX {} PDUs / {} bytes, {} buffered, {} acked (avg {:.1} ms); RX {} PDUs, {} dropped",
            lcid,
            tx.num_tx_pdus,
            tx.num_tx_pdu_bytes,
            tx.num_tx_buffered_pdus,
            tx.num_tx_acked_sdus,
            tx.avg_ack_latency_ms().unwrap_or(0.0),
            rx.num_rx_pdus,
            rx.drops.total()
        );
    }
}

async fn print_final_report(node: &Node) -> Result<()> {
    let mut bearers = Vec::new();
    let mut lcids: Vec<Lcid> = node.gnb.keys().copied().collect();
    lcids.sort_by_key(|lcid| lcid.0);

    for lcid in lcids {
        let gnb = match node.gnb.get(&lcid) {
            Some(handle) => handle.metrics().await.ok(),
            None => None,
        };
        let ue = match node.ue.get(&lcid) {
            Some(handle) => handle.metrics().await.ok(),
            None => None,
        };
        bearers.push(serde_json::json!({
            "lcid": lcid.0,
            "gnb": gnb,
            "ue": ue,
            "ue_delivered": node.ue_sink.counters(lcid),
            "gnb_delivered": node.gnb_sink.counters(lcid),
        }));
    }

    let report = serde_json::json!({
        "bearers": bearers,
        "gnb_rlc_discards": node.gnb_rlc.discarded(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
