//! Daemon configuration parsing.
//!
//! The daemon reads a single TOML file. Every section is optional and every
//! field has a default, so an empty file (or none at all) yields a working
//! local configuration. Fields that would silently change billing behavior
//! when mistyped (the surcharge mode above all) fail closed at load time
//! instead.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use cargopool_core::quote::{
    HeavyFeePolicy, HeavySurcharge, SurchargeTier, DEFAULT_HEAVY_FLAT_FEE,
    DEFAULT_HEAVY_PER_LB_FEE, DEFAULT_HEAVY_THRESHOLD_LB,
};
use serde::Deserialize;
use thiserror::Error;

/// Configuration load/parse failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The TOML is invalid.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// The TOML parsed but describes an unusable configuration.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Rate-limit ceilings.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Administrative surface settings.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Outbound email settings. Absent section means stub mode: payloads
    /// are logged, nothing is sent.
    #[serde(default)]
    pub email: Option<EmailConfig>,

    /// Optional heavy-item surcharge rule. Absent means no surcharge.
    #[serde(default)]
    pub surcharge: Option<SurchargeConfig>,
}

impl DaemonConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string and validates it.
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML is invalid or describes an unusable
    /// configuration (unknown surcharge mode, empty tier table).
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        if let Some(surcharge) = &config.surcharge {
            // Resolve now so a typo fails startup, not the first heavy pledge.
            surcharge.to_rule()?;
        }
        Ok(config)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[allow(clippy::unwrap_used)] // literal address
fn default_bind() -> SocketAddr {
    "127.0.0.1:8341".parse().unwrap()
}

/// Database settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cargopool.db")
}

/// Rate-limit ceilings, per client address per minute.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Pledge submissions per minute.
    #[serde(default = "default_pledges_per_minute")]
    pub pledges_per_minute: u32,
    /// Quotation previews per minute.
    #[serde(default = "default_quotes_per_minute")]
    pub quotes_per_minute: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            pledges_per_minute: default_pledges_per_minute(),
            quotes_per_minute: default_quotes_per_minute(),
        }
    }
}

const fn default_pledges_per_minute() -> u32 {
    cargopool_core::intake::DEFAULT_SUBMIT_CEILING
}

const fn default_quotes_per_minute() -> u32 {
    cargopool_core::intake::DEFAULT_PREVIEW_CEILING
}

/// Administrative surface settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Shared token required on administrative requests. Absent means the
    /// administrative routes are disabled entirely.
    pub token: Option<String>,
}

/// Outbound email settings for the notification adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Provider endpoint.
    #[serde(default = "default_email_api_url")]
    pub api_url: String,
    /// Provider API key. Absent means stub mode even with this section
    /// present.
    pub api_key: Option<String>,
    /// From header.
    #[serde(default = "default_email_from")]
    pub from: String,
    /// Operator addresses for the per-pledge summary. Empty list means no
    /// summary is sent.
    #[serde(default)]
    pub admin_recipients: Vec<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_url: default_email_api_url(),
            api_key: None,
            from: default_email_from(),
            admin_recipients: Vec::new(),
        }
    }
}

fn default_email_api_url() -> String {
    "https://api.resend.com/emails".to_string()
}

fn default_email_from() -> String {
    "Cargopool <pledges@cargopool.example>".to_string()
}

/// Heavy-item surcharge configuration.
///
/// `mode` selects the fee formula; the remaining fields default to the
/// product's published constants and only the ones the selected mode reads
/// matter.
#[derive(Debug, Clone, Deserialize)]
pub struct SurchargeConfig {
    /// `flat`, `per_lb_over`, or `tiered`.
    pub mode: String,
    /// Weight strictly above which the rule applies.
    #[serde(default = "default_threshold_lb")]
    pub threshold_lb: f64,
    /// Fee for `flat` mode.
    #[serde(default = "default_flat_fee")]
    pub flat_fee: f64,
    /// Rate for `per_lb_over` mode.
    #[serde(default = "default_per_lb_fee")]
    pub per_lb_fee: f64,
    /// Tier table for `tiered` mode. Absent means the built-in table.
    #[serde(default)]
    pub tiers: Option<Vec<TierConfig>>,
}

/// One configured tier.
#[derive(Debug, Clone, Deserialize)]
pub struct TierConfig {
    /// Upper weight bound in pounds; omit for the open-ended last tier.
    pub up_to_lb: Option<f64>,
    /// Fee for this tier.
    pub fee: f64,
}

const fn default_threshold_lb() -> f64 {
    DEFAULT_HEAVY_THRESHOLD_LB
}

const fn default_flat_fee() -> f64 {
    DEFAULT_HEAVY_FLAT_FEE
}

const fn default_per_lb_fee() -> f64 {
    DEFAULT_HEAVY_PER_LB_FEE
}

impl SurchargeConfig {
    /// Resolves the configured rule.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an unknown mode or an empty
    /// tier table.
    pub fn to_rule(&self) -> Result<HeavySurcharge, ConfigError> {
        let policy = match self.mode.as_str() {
            "flat" => HeavyFeePolicy::Flat { fee: self.flat_fee },
            "per_lb_over" => HeavyFeePolicy::PerPoundOver {
                rate_per_lb: self.per_lb_fee,
            },
            "tiered" => match &self.tiers {
                None => {
                    return Ok(HeavySurcharge {
                        threshold_lb: self.threshold_lb,
                        ..HeavySurcharge::tiered()
                    })
                },
                Some(tiers) if tiers.is_empty() => {
                    return Err(ConfigError::Validation(
                        "surcharge.tiers must not be empty".to_string(),
                    ))
                },
                Some(tiers) => HeavyFeePolicy::Tiered {
                    tiers: tiers
                        .iter()
                        .map(|t| SurchargeTier {
                            up_to_lb: t.up_to_lb,
                            fee: t.fee,
                        })
                        .collect(),
                },
            },
            other => {
                return Err(ConfigError::Validation(format!(
                    "unknown surcharge mode '{other}': use flat, per_lb_over, or tiered"
                )))
            },
        };
        Ok(HeavySurcharge {
            threshold_lb: self.threshold_lb,
            policy,
        })
    }
}
