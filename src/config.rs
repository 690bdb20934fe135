use crate::errors::ApiError;
use std::net::SocketAddr;
use std::time::Duration;

const PLACEHOLDER_SECRETS: &[&str] = &[
    "dev-secret-key",
    "PLEASE_SET_SECRET_KEY",
    "your-secret-key",
    "changeme",
];

const MIN_SECRET_LEN: usize = 16;

pub const DEFAULT_MAX_FETCH_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

/// Per-call deadlines for everything that leaves the process.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub generate: Duration,
    pub summarize: Duration,
    pub ticket_resolve: Duration,
    pub url_fetch: Duration,
    pub ticket_lookup: Duration,
    pub health_probe: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            generate: Duration::from_secs(10),
            summarize: Duration::from_secs(15),
            ticket_resolve: Duration::from_secs(20),
            url_fetch: Duration::from_secs(5),
            ticket_lookup: Duration::from_secs(10),
            health_probe: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub url: String,
    pub model: String,
    pub ticket_lookup_url: Option<String>,
    pub timeouts: Timeouts,
    /// Largest body `fetch_text` will read for summarize-by-URL.
    pub max_fetch_bytes: usize,
}

impl UpstreamConfig {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            ticket_lookup_url: None,
            timeouts: Timeouts::default(),
            max_fetch_bytes: DEFAULT_MAX_FETCH_BYTES,
        }
    }
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub secret_key: String,
    pub admin: AdminCredentials,
    pub db_path: String,
    pub bind_addr: SocketAddr,
    pub key_prefix: String,
    pub default_ttl: chrono::Duration,
    pub trust_forwarded_for: bool,
    pub upstream: UpstreamConfig,
}

// Hand-written so the secret and admin password never reach a log line.
impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("admin_user", &self.admin.username)
            .field("db_path", &self.db_path)
            .field("bind_addr", &self.bind_addr)
            .field("key_prefix", &self.key_prefix)
            .field("default_ttl", &self.default_ttl)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("upstream", &self.upstream)
            .finish_non_exhaustive()
    }
}

impl GatewayConfig {
    /// Reads the process environment (after `.env`, if present).
    pub fn from_env() -> Result<Self, ApiError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let secret_key = get("GATEWAY_SECRET_KEY")
            .ok_or_else(|| ApiError::Config("GATEWAY_SECRET_KEY must be set".to_string()))?;
        validate_secret(&secret_key)?;

        let admin = AdminCredentials {
            username: get("GATEWAY_ADMIN_USER").unwrap_or_else(|| "admin".to_string()),
            password: get("GATEWAY_ADMIN_PASSWORD").ok_or_else(|| {
                ApiError::Config("GATEWAY_ADMIN_PASSWORD must be set".to_string())
            })?,
        };

        let bind_addr = get("GATEWAY_BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:3000".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ApiError::Config(format!("GATEWAY_BIND_ADDR: {}", e)))?;

        let default_ttl = match get("GATEWAY_DEFAULT_TTL_DAYS") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|days| *days > 0)
                .and_then(chrono::Duration::try_days)
                .ok_or_else(|| {
                    ApiError::Config(format!(
                        "GATEWAY_DEFAULT_TTL_DAYS must be a positive integer, got {:?}",
                        raw
                    ))
                })?,
            None => chrono::Duration::days(30),
        };

        let trust_forwarded_for = match get("GATEWAY_TRUST_FORWARDED_FOR").as_deref() {
            None => false,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => {
                return Err(ApiError::Config(format!(
                    "GATEWAY_TRUST_FORWARDED_FOR must be a boolean, got {:?}",
                    other
                )))
            }
        };

        let mut upstream = UpstreamConfig::new(
            get("OLLAMA_URL").unwrap_or_else(|| "http://127.0.0.1:11434/api/generate".to_string()),
            get("OLLAMA_MODEL").unwrap_or_else(|| "llama3".to_string()),
        );
        upstream.ticket_lookup_url = get("TICKET_LOOKUP_URL");

        Ok(Self {
            secret_key,
            admin,
            db_path: get("GATEWAY_DB_PATH").unwrap_or_else(|| "data/keys.db".to_string()),
            bind_addr,
            key_prefix: get("GATEWAY_KEY_PREFIX").unwrap_or_else(|| "gw".to_string()),
            default_ttl,
            trust_forwarded_for,
            upstream,
        })
    }
}

/// Rejects secrets that would make fingerprints forgeable.
pub fn validate_secret(secret: &str) -> Result<(), ApiError> {
    if secret.is_empty() {
        return Err(ApiError::Config("secret key is empty".to_string()));
    }
    if PLACEHOLDER_SECRETS.iter().any(|p| p.eq_ignore_ascii_case(secret)) {
        return Err(ApiError::Config(
            "secret key is a known placeholder value".to_string(),
        ));
    }
    if secret.len() < MIN_SECRET_LEN {
        return Err(ApiError::Config(format!(
            "secret key must be at least {} bytes",
            MIN_SECRET_LEN
        )));
    }
    Ok(())
}
