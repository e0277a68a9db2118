//! Service configuration.
//!
//! Loaded from environment variables by [`AppConfig::from_env`]. Every
//! variable has a default except the EVM connection settings, which are
//! required only when `FARMCERT_LEDGER=evm`. `DATABASE_URL` is read by
//! [`crate::db::init_pool`].

use std::path::PathBuf;
use std::time::Duration;

use farmcert_core::PrincipalId;
use farmcert_ledger::PollPolicy;
use farmcert_registry::{RegistryConfig, ReissuePolicy, DEFAULT_VALIDITY_DAYS};
use url::Url;

/// Which ledger hosts the certificate registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerBackend {
    /// In-process registry. State does not survive a restart.
    Memory,
    /// Registry contract on an EVM chain.
    Evm(EvmSettings),
}

/// Connection settings for the EVM registry contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmSettings {
    /// JSON-RPC endpoint.
    pub rpc_url: Url,
    /// Registry contract address.
    pub contract_address: String,
    /// Address the node signs writes with. Also the initial admin.
    pub from: String,
    /// EVM chain id.
    pub chain_id: u64,
}

/// Application configuration.
///
/// Custom `Debug` redacts the `auth_token` to prevent credential leakage in logs.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Shared bearer-token secret. `None` disables authentication.
    pub auth_token: Option<String>,
    /// Identity the service signs registry writes with.
    pub admin_id: PrincipalId,
    /// Registry rules (validity window, re-issuance policy).
    pub registry: RegistryConfig,
    /// Confirmation polling policy.
    pub poll: PollPolicy,
    /// How long a decide request waits for confirmation before answering
    /// `pending_confirmation`.
    pub decision_wait: Duration,
    /// Root directory of the document blob store. `None` keeps blobs in memory.
    pub document_root: Option<PathBuf>,
    /// Registry host.
    pub ledger: LedgerBackend,
    /// Emit logs as JSON lines.
    pub log_json: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("admin_id", &self.admin_id)
            .field("registry", &self.registry)
            .field("poll", &self.poll)
            .field("decision_wait", &self.decision_wait)
            .field("document_root", &self.document_root)
            .field("ledger", &self.ledger)
            .field("log_json", &self.log_json)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            admin_id: PrincipalId::default_admin(),
            registry: RegistryConfig::default(),
            poll: PollPolicy::default(),
            decision_wait: Duration::from_secs(20),
            document_root: None,
            ledger: LedgerBackend::Memory,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `PORT` (default: 8080)
    /// - `AUTH_TOKEN` (default: unset, authentication disabled)
    /// - `FARMCERT_ADMIN_ID` (default: `admin`, or `FARMCERT_EVM_FROM` on EVM)
    /// - `FARMCERT_VALIDITY_DAYS` (default: 365)
    /// - `FARMCERT_REISSUE_POLICY` (`after_expiry` | `never`, default: `after_expiry`)
    /// - `FARMCERT_POLL_INTERVAL_MS` (default: 2000)
    /// - `FARMCERT_POLL_MAX_INTERVAL_MS` (default: 15000)
    /// - `FARMCERT_POLL_MAX_ATTEMPTS` (default: 40)
    /// - `FARMCERT_CONFIRMATION_TIMEOUT_SECS` (default: 300)
    /// - `FARMCERT_DECISION_WAIT_SECS` (default: 20)
    /// - `FARMCERT_DOCUMENT_ROOT` (default: unset, in-memory blobs)
    /// - `FARMCERT_LEDGER` (`memory` | `evm`, default: `memory`)
    /// - `FARMCERT_EVM_RPC_URL`, `FARMCERT_EVM_CONTRACT`, `FARMCERT_EVM_FROM`
    ///   (required for `evm`), `FARMCERT_EVM_CHAIN_ID` (default: 1)
    /// - `FARMCERT_LOG_JSON` (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ledger = match var("FARMCERT_LEDGER").as_deref().unwrap_or("memory") {
            "memory" => LedgerBackend::Memory,
            "evm" => {
                let required = |key: &'static str| var(key).ok_or(ConfigError::Missing(key));
                let raw_url = required("FARMCERT_EVM_RPC_URL")?;
                let rpc_url = Url::parse(&raw_url).map_err(|e| ConfigError::Invalid {
                    var: "FARMCERT_EVM_RPC_URL",
                    reason: e.to_string(),
                })?;
                LedgerBackend::Evm(EvmSettings {
                    rpc_url,
                    contract_address: required("FARMCERT_EVM_CONTRACT")?,
                    from: required("FARMCERT_EVM_FROM")?,
                    chain_id: parse_or(&var, "FARMCERT_EVM_CHAIN_ID", 1)?,
                })
            }
            other => {
                return Err(ConfigError::Invalid {
                    var: "FARMCERT_LEDGER",
                    reason: format!("unknown ledger backend '{other}' (expected memory or evm)"),
                })
            }
        };

        let admin_raw = match (&ledger, var("FARMCERT_ADMIN_ID")) {
            (_, Some(explicit)) => explicit,
            (LedgerBackend::Evm(evm), None) => evm.from.clone(),
            (LedgerBackend::Memory, None) => defaults.admin_id.to_string(),
        };
        let admin_id = PrincipalId::new(admin_raw).map_err(|e| ConfigError::Invalid {
            var: "FARMCERT_ADMIN_ID",
            reason: e.to_string(),
        })?;

        let validity_days: i64 = parse_or(&var, "FARMCERT_VALIDITY_DAYS", DEFAULT_VALIDITY_DAYS)?;
        if validity_days <= 0 {
            return Err(ConfigError::Invalid {
                var: "FARMCERT_VALIDITY_DAYS",
                reason: "must be positive".into(),
            });
        }
        let reissue_policy = match var("FARMCERT_REISSUE_POLICY") {
            Some(raw) => raw.parse::<ReissuePolicy>().map_err(|reason| ConfigError::Invalid {
                var: "FARMCERT_REISSUE_POLICY",
                reason,
            })?,
            None => ReissuePolicy::default(),
        };

        let poll = PollPolicy {
            initial_interval: Duration::from_millis(parse_or(&var, "FARMCERT_POLL_INTERVAL_MS", 2_000)?),
            max_interval: Duration::from_millis(parse_or(&var, "FARMCERT_POLL_MAX_INTERVAL_MS", 15_000)?),
            max_attempts: parse_or(&var, "FARMCERT_POLL_MAX_ATTEMPTS", 40)?,
            timeout: Duration::from_secs(parse_or(&var, "FARMCERT_CONFIRMATION_TIMEOUT_SECS", 300)?),
        };
        if poll.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "FARMCERT_POLL_MAX_ATTEMPTS",
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            port: parse_or(&var, "PORT", defaults.port)?,
            auth_token: var("AUTH_TOKEN"),
            admin_id,
            registry: RegistryConfig {
                validity_days,
                reissue_policy,
            },
            poll,
            decision_wait: Duration::from_secs(parse_or(&var, "FARMCERT_DECISION_WAIT_SECS", 20)?),
            document_root: var("FARMCERT_DOCUMENT_ROOT").map(PathBuf::from),
            ledger,
            log_json: parse_or(&var, "FARMCERT_LOG_JSON", false)?,
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}
