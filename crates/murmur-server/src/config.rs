use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub token_ttl: chrono::Duration,
    /// None means any origin.
    pub cors_origin: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("MURMUR_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("MURMUR_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let db_path: PathBuf = get("MURMUR_DB_PATH").unwrap_or_else(|| "murmur.db".into()).into();
        let host = get("MURMUR_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("MURMUR_PORT")
            .unwrap_or_else(|| "8000".into())
            .parse()
            .context("MURMUR_PORT is not a valid port")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("MURMUR_HOST {} is not a valid address", host))?;

        let ttl_hours: i64 = match get("MURMUR_TOKEN_TTL_HOURS") {
            Some(v) => v.parse().context("MURMUR_TOKEN_TTL_HOURS is not a number")?,
            None => 24,
        };
        if ttl_hours <= 0 {
            bail!("MURMUR_TOKEN_TTL_HOURS must be positive");
        }

        let cors_origin = get("MURMUR_CORS_ORIGIN").filter(|o| !o.trim().is_empty() && o != "*");

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            token_ttl: chrono::Duration::hours(ttl_hours),
            cors_origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("MURMUR_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("murmur.db"));
        assert_eq!(cfg.addr.port(), 8000);
        assert_eq!(cfg.token_ttl, chrono::Duration::hours(24));
        assert!(cfg.cors_origin.is_none());
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        assert!(config(&[]).is_err());
        assert!(config(&[("MURMUR_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(config(&[("MURMUR_JWT_SECRET", "s"), ("MURMUR_PORT", "http")]).is_err());
        assert!(config(&[("MURMUR_JWT_SECRET", "s"), ("MURMUR_TOKEN_TTL_HOURS", "0")]).is_err());
    }

    #[test]
    fn explicit_values_win() {
        let cfg = config(&[
            ("MURMUR_JWT_SECRET", "s"),
            ("MURMUR_HOST", "127.0.0.1"),
            ("MURMUR_PORT", "9100"),
            ("MURMUR_CORS_ORIGIN", "https://chat.example.com"),
        ])
        .unwrap();
        assert_eq!(cfg.addr.to_string(), "127.0.0.1:9100");
        assert_eq!(cfg.cors_origin.as_deref(), Some("https://chat.example.com"));
    }
}
