//! YAML configuration of the PDCP loopback node
//!
//! One list of bearers is instantiated twice, once on the gNB side and once on
//! the UE side, with the security settings applied to both.

use anyhow::{anyhow, Context};
use common::{LinkDirection, Lcid};
use num_traits::FromPrimitive;
use pdcp::ciphering::{CipheringAlgorithm, IntegrityAlgorithm, KEY_SIZE};
use pdcp::{DiscardTimer, PdcpConfig, RbType, RlcMode, SecurityConfig, SnSize};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Radio bearers
    pub bearers: Vec<BearerConfig>,
    /// Keys and algorithms
    #[serde(default)]
    pub security: SecuritySection,
    /// Generated traffic
    #[serde(default)]
    pub traffic: TrafficConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Metrics reporting period in seconds
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_stats_interval() -> u64 {
    5
}

/// Radio bearer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BearerConfig {
    /// Logical channel ID
    pub lcid: u8,
    /// BEARER input to ciphering and integrity
    pub bearer_id: u8,
    /// srb or drb
    pub rb_type: RbType,
    /// um or am
    #[serde(default = "default_rlc_mode")]
    pub rlc_mode: RlcMode,
    /// PDCP SN size in bits (5, 7, 12 or 18)
    pub sn_size: u8,
    /// Discard timer in ms, absent for infinity
    #[serde(default)]
    pub discard_timer_ms: Option<u32>,
    /// Send status reports
    #[serde(default)]
    pub status_report_required: bool,
}

fn default_rlc_mode() -> RlcMode {
    RlcMode::Am
}

impl BearerConfig {
    /// Logical channel ID
    pub fn lcid(&self) -> anyhow::Result<Lcid> {
        Lcid::new(self.lcid).ok_or_else(|| anyhow!("Invalid LCID: {}", self.lcid))
    }

    /// PDCP configuration for the entity transmitting in `direction`
    pub fn to_pdcp_config(&self, direction: LinkDirection) -> anyhow::Result<PdcpConfig> {
        let sn_size = SnSize::from_u8(self.sn_size)
            .ok_or_else(|| anyhow!("Invalid SN size: {} bits", self.sn_size))?;
        let discard_timer = match self.discard_timer_ms {
            Some(ms) => DiscardTimer::Ms(ms),
            None => DiscardTimer::Infinity,
        };

        let cfg = PdcpConfig {
            bearer_id: self.bearer_id,
            rb_type: self.rb_type,
            rlc_mode: self.rlc_mode,
            sn_size,
            discard_timer,
            status_report_required: self.status_report_required,
            tx_direction: direction,
        };
        cfg.validate()
            .with_context(|| format!("bearer on LCID {}", self.lcid))?;
        Ok(cfg)
    }
}

/// Security configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecuritySection {
    /// Ciphering algorithm
    #[serde(default = "default_cipher_algo")]
    pub cipher_algo: CipheringAlgorithm,
    /// Integrity algorithm
    #[serde(default = "default_integ_algo")]
    pub integ_algo: IntegrityAlgorithm,
    /// Ciphering key, 32 hex digits
    #[serde(default = "default_key")]
    pub k_enc: String,
    /// Integrity key, 32 hex digits
    #[serde(default = "default_key")]
    pub k_int: String,
    /// Enable integrity protection on SRBs
    #[serde(default)]
    pub integrity: bool,
    /// Enable ciphering on all bearers
    #[serde(default)]
    pub ciphering: bool,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            cipher_algo: default_cipher_algo(),
            integ_algo: default_integ_algo(),
            k_enc: default_key(),
            k_int: default_key(),
            integrity: false,
            ciphering: false,
        }
    }
}

fn default_cipher_algo() -> CipheringAlgorithm {
    CipheringAlgorithm::Nea0
}

fn default_integ_algo() -> IntegrityAlgorithm {
    IntegrityAlgorithm::Nia0
}

fn default_key() -> String {
    "00000000000000000000000000000000".to_string()
}

impl SecuritySection {
    /// Keys and algorithms for the entities
    pub fn to_security_config(&self) -> anyhow::Result<SecurityConfig> {
        Ok(SecurityConfig {
            k_enc: parse_key(&self.k_enc).context("k_enc")?,
            k_int: parse_key(&self.k_int).context("k_int")?,
            cipher_algo: self.cipher_algo,
            integ_algo: self.integ_algo,
        })
    }
}

/// Parse a 128-bit key given as hex digits
pub fn parse_key(key_hex: &str) -> anyhow::Result<[u8; KEY_SIZE]> {
    let mut key = [0u8; KEY_SIZE];
    hex::decode_to_slice(key_hex.trim(), &mut key)
        .with_context(|| format!("Key must be {} hex digits", 2 * KEY_SIZE))?;
    Ok(key)
}

/// Traffic generated on every DRB
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrafficConfig {
    /// SDUs per bearer, 0 to run until interrupted
    #[serde(default = "default_num_sdus")]
    pub num_sdus: u64,
    /// SDU size in bytes
    #[serde(default = "default_sdu_size")]
    pub sdu_size: usize,
    /// Gap between SDUs in microseconds
    #[serde(default = "default_interval_us")]
    pub interval_us: u64,
    /// Drop every n-th PDU on UM bearers (0 = lossless)
    #[serde(default)]
    pub um_drop_every: u64,
    /// Send a status report from the UE every n SDUs on bearers that require them (0 = never)
    #[serde(default)]
    pub status_report_every: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            num_sdus: default_num_sdus(),
            sdu_size: default_sdu_size(),
            interval_us: default_interval_us(),
            um_drop_every: 0,
            status_report_every: 0,
        }
    }
}

fn default_num_sdus() -> u64 {
    10_000
}

fn default_sdu_size() -> usize {
    1400
}

fn default_interval_us() -> u64 {
    100
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level for everything
    #[serde(default = "default_log_level")]
    pub all_level: String,
    /// PDCP log level
    #[serde(default = "default_log_level")]
    pub pdcp_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            all_level: default_log_level(),
            pdcp_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LogConfig {
    /// Directive string for `EnvFilter`
    pub fn filter_directives(&self) -> String {
        format!("{},pdcp={}", self.all_level, self.pdcp_level)
    }
}

impl NodeConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path))?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate configuration
    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let config: NodeConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.bearers.is_empty() {
            return Err(anyhow!("No bearers configured"));
        }

        let mut seen = Vec::new();
        for bearer in &self.bearers {
            let lcid = bearer.lcid()?;
            if seen.contains(&lcid) {
                return Err(anyhow!("Duplicate bearer on {}", lcid));
            }
            seen.push(lcid);
            bearer.to_pdcp_config(LinkDirection::Downlink)?;
        }

        self.security.to_security_config()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
bearers:
  - lcid: 1
    bearer_id: 0
    rb_type: srb
    sn_size: 12
  - lcid: 4
    bearer_id: 3
    rb_type: drb
    rlc_mode: am
    sn_size: 18
    discard_timer_ms: 1500
    status_report_required: true
security:
  cipher_algo: nea2
  integ_algo: nia2
  k_enc: "000102030405060708090a0b0c0d0e0f"
  k_int: "f0e0d0c0b0a090807060504030201000"
  integrity: true
  ciphering: true
log:
  all_level: warn
  pdcp_level: debug
"#;

    #[test]
    fn test_parse_config() {
        let config = NodeConfig::from_yaml_str(EXAMPLE).unwrap();
        assert_eq!(config.bearers.len(), 2);
        assert_eq!(config.stats_interval_secs, 5);
        assert_eq!(config.traffic.sdu_size, 1400);

        let drb = config.bearers[1].to_pdcp_config(LinkDirection::Downlink).unwrap();
        assert_eq!(drb.sn_size, SnSize::Len18);
        assert_eq!(drb.discard_timer, DiscardTimer::Ms(1500));
        assert!(drb.is_am_drb());

        let sec = config.security.to_security_config().unwrap();
        assert_eq!(sec.k_enc[15], 0x0f);
        assert_eq!(sec.integ_algo, IntegrityAlgorithm::Nia2);
        assert_eq!(config.log.filter_directives(), "warn,pdcp=debug");
    }

    #[test]
    fn test_rejects_invalid_sn_size() {
        let yaml = "bearers:\n  - {lcid: 4, bearer_id: 3, rb_type: drb, sn_size: 16}\n";
        assert!(NodeConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_rejects_duplicate_lcid() {
        let yaml = "bearers:\n  - {lcid: 4, bearer_id: 3, rb_type: drb, sn_size: 12}\n  - {lcid: 4, bearer_id: 4, rb_type: drb, sn_size: 12}\n";
        assert!(NodeConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_parse_key() {
        assert!(parse_key("00").is_err());
        assert!(parse_key("zz0102030405060708090a0b0c0d0e0f").is_err());
        assert_eq!(parse_key("ffffffffffffffffffffffffffffffff").unwrap(), [0xff; 16]);
        assert_eq!(
            parse_key(" 000102030405060708090A0B0C0D0E0F\n").unwrap(),
            [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
        );
        // One digit short, and one byte too many
        assert!(parse_key("000102030405060708090a0b0c0d0e0").is_err());
        assert!(parse_key("000102030405060708090a0b0c0d0e0f10").is_err());
    }
}
