//! The recognized configuration surface the engine consumes. Loading
//! this from a file, CLI flags, or a secrets manager is left to the
//! embedding application; this module only defines the shape and a
//! minimal environment-variable constructor for the demo binary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How to resolve a conflicting pair of documents automatically, or
/// whether to defer to an operator (`sync_rules.conflict_resolution`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolutionPolicy {
    LatestTimestamp,
    CloudWins,
    LocalWins,
    Manual,
}

impl Default for ConflictResolutionPolicy {
    fn default() -> Self {
        Self::LatestTimestamp
    }
}

impl fmt::Display for ConflictResolutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LatestTimestamp => "latest_timestamp",
            Self::CloudWins => "cloud_wins",
            Self::LocalWins => "local_wins",
            Self::Manual => "manual",
        };
        f.write_str(s)
    }
}

impl FromStr for ConflictResolutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest_timestamp" => Ok(Self::LatestTimestamp),
            "cloud_wins" => Ok(Self::CloudWins),
            "local_wins" => Ok(Self::LocalWins),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown conflict resolution strategy: {other}")),
        }
    }
}

/// Which doctypes to replicate, which fields to exclude, and how to
/// resolve conflicts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncRules {
    pub doctypes: Vec<String>,
    #[serde(default)]
    pub exclude_fields: Vec<String>,
    #[serde(default)]
    pub conflict_resolution: ConflictResolutionPolicy,
}

/// Connection details for one side of the replication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub name: String,
}

/// The secret used when `WEBHOOK_SECRET` is unset, matching the
/// original webhook server's fallback so an un-configured deployment
/// still signs and verifies rather than silently skipping verification.
pub const DEFAULT_WEBHOOK_SECRET: &str = "your_secure_webhook_secret";

/// Webhook ingress settings. `secret` is always non-empty: verification
/// runs whenever a caller supplies the signature header, regardless of
/// whether an operator has set `WEBHOOK_SECRET`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub secret: String,
    pub host: String,
    pub port: u16,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: DEFAULT_WEBHOOK_SECRET.to_string(),
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Everything the engine needs to run: both sides, replication rules,
/// webhook ingress, and the state store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub cloud: SideConfig,
    pub local: SideConfig,
    pub sync_rules: SyncRules,
    #[serde(default)]
    pub webhook: WebhookConfig,
    pub database_url: String,
}

impl ReplicationConfig {
    /// Build a config from environment variables: per-side base
    /// URL/API key/secret, plus `WEBHOOK_SECRET`, `WEBHOOK_HOST`,
    /// `WEBHOOK_PORT`, `DATABASE_URL`. Doctypes and conflict policy have
    /// no environment-variable equivalent — callers needing those should
    /// build `ReplicationConfig` directly, or override `sync_rules`
    /// after calling this.
    pub fn from_env() -> Result<Self, std::env::VarError> {
        use std::env::var;

        let port = var("WEBHOOK_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5000);

        Ok(Self {
            cloud: SideConfig {
                base_url: var("CLOUD_ERP_URL")?,
                api_key: var("CLOUD_API_KEY")?,
                api_secret: var("CLOUD_API_SECRET")?,
                name: "cloud".to_string(),
            },
            local: SideConfig {
                base_url: var("LOCAL_ERP_URL")?,
                api_key: var("LOCAL_API_KEY")?,
                api_secret: var("LOCAL_API_SECRET")?,
                name: "local".to_string(),
            },
            sync_rules: SyncRules::default(),
            webhook: WebhookConfig {
                secret: var("WEBHOOK_SECRET").unwrap_or_else(|_| DEFAULT_WEBHOOK_SECRET.to_string()),
                host: var("WEBHOOK_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port,
            },
            database_url: var("DATABASE_URL").unwrap_or_else(|_| "sync_state.db".to_string()),
        })
    }
}
