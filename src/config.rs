use std::env;

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub refresh_ttl_hours: i64,
    pub db_max_connections: u32,
    pub prevent_double_booking: bool,
    /// Remote contract service. Without it, handles are derived locally.
    pub blockchain_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = get("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string());

        let session_ttl_hours = parse_or(&get, "SESSION_TTL_HOURS", 24_i64)?;
        let refresh_ttl_hours = parse_or(&get, "REFRESH_TTL_HOURS", 24 * 30_i64)?;
        let db_max_connections = parse_or(&get, "DB_MAX_CONNECTIONS", 10_u32)?;
        let prevent_double_booking = parse_or(&get, "PREVENT_DOUBLE_BOOKING", true)?;

        if session_ttl_hours <= 0 || refresh_ttl_hours < session_ttl_hours {
            anyhow::bail!("REFRESH_TTL_HOURS must be >= SESSION_TTL_HOURS > 0");
        }

        let blockchain_endpoint = get("BLOCKCHAIN_ENDPOINT")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            refresh_ttl_hours,
            db_max_connections,
            prevent_double_booking,
            blockchain_endpoint,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let cfg = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/hc")])).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:8080");
        assert_eq!(cfg.session_ttl_hours, 24);
        assert_eq!(cfg.refresh_ttl_hours, 720);
        assert_eq!(cfg.db_max_connections, 10);
        assert!(cfg.prevent_double_booking);
        assert!(cfg.blockchain_endpoint.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/hc"),
            ("BIND_ADDR", "0.0.0.0:9000"),
            ("SESSION_TTL_HOURS", "8"),
            ("REFRESH_TTL_HOURS", "48"),
            ("PREVENT_DOUBLE_BOOKING", "false"),
            ("BLOCKCHAIN_ENDPOINT", " http://ledger:7000 "),
        ]))
        .unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:9000");
        assert_eq!(cfg.session_ttl_hours, 8);
        assert_eq!(cfg.refresh_ttl_hours, 48);
        assert!(!cfg.prevent_double_booking);
        assert_eq!(cfg.blockchain_endpoint.as_deref(), Some("http://ledger:7000"));
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn garbage_numbers_are_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/hc"),
            ("SESSION_TTL_HOURS", "a day"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SESSION_TTL_HOURS"));
    }

    #[test]
    fn refresh_shorter_than_session_is_rejected() {
        assert!(
            Config::from_lookup(lookup(&[
                ("DATABASE_URL", "postgres://db/hc"),
                ("SESSION_TTL_HOURS", "48"),
                ("REFRESH_TTL_HOURS", "24"),
            ]))
            .is_err()
        );
    }
}
