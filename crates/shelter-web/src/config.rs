use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;
use shelter_core::LimitRule;

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_ttl_hours")]
    pub jwt_ttl_hours: u64,
    #[serde(default = "default_reset_token_ttl_minutes")]
    pub reset_token_ttl_minutes: u64,
}

/// Per-route-group request allowances. Each group gets its own limiter.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Key per-IP limits on `X-Forwarded-For` / `X-Real-IP` instead of the
    /// socket peer. Only enable behind a reverse proxy that sets them.
    #[serde(default)]
    pub trust_forwarded_headers: bool,
    /// Number of reverse proxies in front of the server. The client address
    /// is the `X-Forwarded-For` entry this many places from the right.
    #[serde(default = "default_trusted_proxy_hops")]
    pub trusted_proxy_hops: usize,
    #[serde(default = "default_login_rule")]
    pub login: LimitRule,
    #[serde(default = "default_password_reset_rule")]
    pub password_reset: LimitRule,
    #[serde(default = "default_api_rule")]
    pub api: LimitRule,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_ttl_hours: default_jwt_ttl_hours(),
            reset_token_ttl_minutes: default_reset_token_ttl_minutes(),
        }
    }
}

fn default_jwt_ttl_hours() -> u64 { 24 }
fn default_reset_token_ttl_minutes() -> u64 { 30 }
fn default_trusted_proxy_hops() -> usize { 1 }
fn default_login_rule() -> LimitRule { LimitRule::per_minute(5) }
fn default_password_reset_rule() -> LimitRule { LimitRule::new(3, 15 * 60) }
fn default_api_rule() -> LimitRule { LimitRule::per_minute(120) }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            trust_forwarded_headers: false,
            trusted_proxy_hops: default_trusted_proxy_hops(),
            login: default_login_rule(),
            password_reset: default_password_reset_rule(),
            api: default_api_rule(),
        }
    }
}

impl RateLimitConfig {
    /// Proxy hops to walk back through `X-Forwarded-For`; zero when
    /// forwarded headers are not trusted.
    pub fn forwarded_hops(&self) -> usize {
        if self.trust_forwarded_headers {
            self.trusted_proxy_hops.max(1)
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

impl TlsConfig {
    pub fn is_enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            tls: TlsConfig::default(),
            users: Vec::new(),
        }
    }
}

const WEAK_SECRETS: &[&str] = &[
    "change-me-to-a-random-secret",
    "secret",
    "password",
    "jwt-secret",
];

impl ServerConfig {
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Reads the file named by `SHELTER_WEB_CONFIG` (defaults if unset), then
    /// applies `SHELTER_*` environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// [`load`](Self::load) with variables resolved through `lookup`.
    pub fn load_from<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("SHELTER_WEB_CONFIG").map(PathBuf::from) {
            Some(path) => {
                let contents = std::fs::read_to_string(&path).map_err(|e| {
                    anyhow::anyhow!("Failed to read config {}: {e}", path.display())
                })?;
                Self::from_toml(&contents)?
            }
            None => ServerConfig::default(),
        };

        config.apply_overrides(&lookup)?;

        if config.auth.jwt_secret.is_empty() {
            config.auth.jwt_secret = uuid::Uuid::new_v4().to_string();
            tracing::warn!(
                "No JWT secret configured. Generated random secret (will change on restart)."
            );
        }

        config.validate()?;

        if config.users.is_empty() {
            tracing::warn!("No users configured. Every login attempt will be rejected.");
        }

        Ok(config)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("SHELTER_BIND_ADDR") {
            self.bind_addr = addr.parse()?;
        }

        if let Some(secret) = lookup("SHELTER_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(val) = lookup("SHELTER_JWT_TTL_HOURS") {
            self.auth.jwt_ttl_hours = val.parse()?;
        }

        if let Some(val) = lookup("SHELTER_TRUST_FORWARDED_HEADERS") {
            self.rate_limit.trust_forwarded_headers = matches!(val.as_str(), "1" | "true" | "yes");
        }
        if let Some(val) = lookup("SHELTER_TRUSTED_PROXY_HOPS") {
            self.rate_limit.trusted_proxy_hops = val.parse()?;
        }

        // `<GROUP>_REQUESTS_PER_MINUTE` first, so a full `<GROUP>_RATE_LIMIT`
        // rule wins when both are set.
        let groups = [
            ("LOGIN", &mut self.rate_limit.login),
            ("PASSWORD_RESET", &mut self.rate_limit.password_reset),
            ("API", &mut self.rate_limit.api),
        ];
        for (group, rule) in groups {
            if let Some(val) = lookup(&format!("SHELTER_{group}_REQUESTS_PER_MINUTE")) {
                let requests = val.trim().parse::<u32>().map_err(|e| {
                    anyhow::anyhow!("SHELTER_{group}_REQUESTS_PER_MINUTE: {e}")
                })?;
                *rule = LimitRule::per_minute(requests);
            }
            if let Some(val) = lookup(&format!("SHELTER_{group}_RATE_LIMIT")) {
                *rule = val.parse()?;
            }
        }

        if let Some(cert) = lookup("SHELTER_TLS_CERT") {
            self.tls.cert_path = Some(cert);
        }
        if let Some(key) = lookup("SHELTER_TLS_KEY") {
            self.tls.key_path = Some(key);
        }

        Ok(())
    }

    /// Rejects placeholder JWT secrets once real accounts exist.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.users.is_empty() {
            if WEAK_SECRETS.iter().any(|&w| self.auth.jwt_secret == w) {
                anyhow::bail!(
                    "JWT secret matches a known weak/placeholder value. \
                     Set a strong random secret via SHELTER_JWT_SECRET environment variable."
                );
            }
            if self.auth.jwt_secret.len() < 32 {
                tracing::warn!(
                    "JWT secret is shorter than 32 characters. \
                     Consider using a stronger secret via SHELTER_JWT_SECRET."
                );
            }
        }
        Ok(())
    }
}
