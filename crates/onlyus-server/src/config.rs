//! Server configuration, read from the environment (after `.env`):
//!
//! - `ONLYUS_HOST`    (default: "0.0.0.0")
//! - `ONLYUS_PORT`    (default: "5000")
//! - `ONLYUS_DB_PATH` (default: "onlyus.db")

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("ONLYUS_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("ONLYUS_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("ONLYUS_PORT is not a port number: {raw:?}"))?,
            None => 5000,
        };
        let db_path = lookup("ONLYUS_DB_PATH")
            .unwrap_or_else(|| "onlyus.db".into())
            .into();

        Ok(Self {
            host,
            port,
            db_path,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.db_path, PathBuf::from("onlyus.db"));
        assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:5000");
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("ONLYUS_HOST", "127.0.0.1"),
            ("ONLYUS_PORT", "5001"),
            ("ONLYUS_DB_PATH", "/tmp/chat.db"),
        ]))
        .unwrap();
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:5001");
        assert_eq!(config.db_path, PathBuf::from("/tmp/chat.db"));
    }

    #[test]
    fn bad_port_fails() {
        assert!(Config::from_lookup(lookup(&[("ONLYUS_PORT", "http")])).is_err());
        let config = Config::from_lookup(lookup(&[("ONLYUS_HOST", "not a host")])).unwrap();
        assert!(config.socket_addr().is_err());
    }
}
