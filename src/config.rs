/// Configuration management for the federation resolver
use crate::error::{FederationError, FederationResult};
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Main resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub service: ServiceConfig,
    pub crawl: CrawlConfig,
    pub signing: SigningConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

/// Identity of this resolver and the anchor it trusts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Entity identifier used as `iss` of resolve responses
    pub entity_id: String,
    pub trust_anchor_id: String,
    /// Trusted anchor keys, JWKS JSON
    pub trust_anchor_jwks: String,
}

/// How crawl steps are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Concurrent,
}

impl FromStr for ExecutionMode {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(ExecutionMode::Sequential),
            "concurrent" => Ok(ExecutionMode::Concurrent),
            other => Err(FederationError::Config(format!(
                "Unknown execution mode: {}",
                other
            ))),
        }
    }
}

/// What happens to a failed crawl step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    Drop,
    Retry,
    Deferred,
}

impl FromStr for RecoveryMode {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(RecoveryMode::Drop),
            "retry" => Ok(RecoveryMode::Retry),
            "deferred" => Ok(RecoveryMode::Deferred),
            other => Err(FederationError::Config(format!(
                "Unknown recovery mode: {}",
                other
            ))),
        }
    }
}

/// Tree crawl configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Failures after which a step accepts cached responses
    pub use_cache_threshold: u32,
    pub refresh_interval_secs: u64,
    pub execution: ExecutionMode,
    pub max_concurrency: usize,
    pub recovery: RecoveryMode,
    pub max_attempts: u32,
    pub retained_versions: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            use_cache_threshold: 2,
            refresh_interval_secs: 3600,
            execution: ExecutionMode::Sequential,
            max_concurrency: 8,
            recovery: RecoveryMode::Retry,
            max_attempts: 3,
            retained_versions: 3,
        }
    }
}

/// Resolve response signing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// HMAC secret for resolve responses
    #[serde(skip_serializing)]
    pub secret: String,
    pub key_id: String,
    pub response_lifetime_secs: i64,
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("oidf-resolver/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Read and parse an optional variable, falling back to `default`
fn parse_var<T: FromStr>(name: &str, default: T) -> FederationResult<T> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| FederationError::Config(format!("Invalid value for {}", name))),
        Err(_) => Ok(default),
    }
}

impl ResolverConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> FederationResult<Self> {
        dotenv::dotenv().ok();

        let trust_anchor_id = env::var("RESOLVER_TRUST_ANCHOR_ID")
            .map_err(|_| FederationError::Config("Trust anchor id required".to_string()))?;
        let trust_anchor_jwks = env::var("RESOLVER_TRUST_ANCHOR_JWKS")
            .map_err(|_| FederationError::Config("Trust anchor JWKS required".to_string()))?;
        let entity_id = env::var("RESOLVER_ENTITY_ID").unwrap_or_else(|_| trust_anchor_id.clone());

        let defaults = CrawlConfig::default();
        let crawl = CrawlConfig {
            use_cache_threshold: parse_var(
                "RESOLVER_USE_CACHE_THRESHOLD",
                defaults.use_cache_threshold,
            )?,
            refresh_interval_secs: parse_var(
                "RESOLVER_REFRESH_INTERVAL_SECS",
                defaults.refresh_interval_secs,
            )?,
            execution: parse_var("RESOLVER_EXECUTION", defaults.execution)?,
            max_concurrency: parse_var("RESOLVER_MAX_CONCURRENCY", defaults.max_concurrency)?,
            recovery: parse_var("RESOLVER_RECOVERY", defaults.recovery)?,
            max_attempts: parse_var("RESOLVER_MAX_ATTEMPTS", defaults.max_attempts)?,
            retained_versions: parse_var(
                "RESOLVER_RETAINED_VERSIONS",
                defaults.retained_versions,
            )?,
        };

        let secret = env::var("RESOLVER_SIGNING_SECRET")
            .map_err(|_| FederationError::Config("Signing secret required".to_string()))?;
        let key_id = env::var("RESOLVER_SIGNING_KEY_ID")
            .unwrap_or_else(|_| format!("{}#resolver", entity_id));
        let response_lifetime_secs = parse_var("RESOLVER_RESPONSE_LIFETIME_SECS", 3600)?;

        let http_defaults = HttpConfig::default();
        let http = HttpConfig {
            user_agent: env::var("RESOLVER_USER_AGENT").unwrap_or(http_defaults.user_agent),
            timeout_secs: parse_var("RESOLVER_HTTP_TIMEOUT_SECS", http_defaults.timeout_secs)?,
        };

        let level = env::var("RUST_LOG").unwrap_or_else(|_| "oidf_resolver=info".to_string());

        Ok(ResolverConfig {
            service: ServiceConfig {
                entity_id,
                trust_anchor_id,
                trust_anchor_jwks,
            },
            crawl,
            signing: SigningConfig {
                secret,
                key_id,
                response_lifetime_secs,
            },
            http,
            logging: LoggingConfig { level },
        })
    }

    /// Trusted anchor keys
    pub fn trusted_keys(&self) -> FederationResult<JwkSet> {
        serde_json::from_str(&self.service.trust_anchor_jwks)
            .map_err(|e| FederationError::Config(format!("Invalid trust anchor JWKS: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> FederationResult<()> {
        if self.service.entity_id.is_empty() {
            return Err(FederationError::Config("Entity id cannot be empty".to_string()));
        }

        if self.service.trust_anchor_id.is_empty() {
            return Err(FederationError::Config(
                "Trust anchor id cannot be empty".to_string(),
            ));
        }

        if self.trusted_keys()?.keys.is_empty() {
            return Err(FederationError::Config(
                "Trust anchor JWKS has no keys".to_string(),
            ));
        }

        if self.crawl.use_cache_threshold == 0
            || self.crawl.max_concurrency == 0
            || self.crawl.max_attempts == 0
            || self.crawl.retained_versions == 0
            || self.crawl.refresh_interval_secs == 0
        {
            return Err(FederationError::Config(
                "Crawl thresholds and limits must be positive".to_string(),
            ));
        }

        if self.signing.secret.len() < 32 {
            return Err(FederationError::Config(
                "Signing secret must be at least 32 characters".to_string(),
            ));
        }

        if self.signing.response_lifetime_secs <= 0 {
            return Err(FederationError::Config(
                "Response lifetime must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
