//! The `Config` struct the daemon loads from a TOML file at startup.
//!
//! This is the concrete realization of the "structure the core requires"
//! described by the core crate's external-interfaces contract: the core
//! crate itself never parses TOML or touches the filesystem, it only sees
//! the already-built `Universe` and the plain values the daemon hands it.

use cidr_map::CidrSet;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub incoming: Incoming,
    pub outgoing: Outgoing,
    pub data: Data,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Incoming {
    /// The domain a `RCPT TO` address must match for its local-part to be
    /// evaluated as a set expression.
    pub domain: String,

    #[serde(default = "Incoming::default_port")]
    pub port: u16,

    /// CIDR allowlist for connecting peers. No policy configured means
    /// every peer is accepted.
    #[serde(default)]
    pub accept_from: Option<CidrSet>,

    #[serde(default = "Incoming::default_idle_timeout", with = "duration_serde")]
    pub idle_timeout: Duration,

    #[serde(default = "Incoming::default_max_message_size")]
    pub max_message_size: usize,
}

impl Incoming {
    fn default_port() -> u16 {
        25
    }

    fn default_idle_timeout() -> Duration {
        Duration::from_secs(300)
    }

    fn default_max_message_size() -> usize {
        25 * 1024 * 1024
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Outgoing {
    pub server: String,

    #[serde(default = "Outgoing::default_port")]
    pub port: u16,

    pub envelope_sender: String,

    #[serde(default)]
    pub archive_addr: Option<String>,

    #[serde(default = "Outgoing::default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Outgoing {
    fn default_port() -> u16 {
        25
    }

    fn default_connect_timeout() -> Duration {
        Duration::from_secs(60)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Data {
    pub lists_dir: PathBuf,
    pub symbols_file: PathBuf,
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let toml = r#"
            [incoming]
            domain = "example.com"

            [outgoing]
            server = "relay.example.com"
            envelope_sender = "mailingset@example.com"

            [data]
            lists_dir = "/etc/mailingset/lists"
            symbols_file = "/etc/mailingset/symbols"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        k9::assert_equal!(config.incoming.domain, "example.com".to_string());
        k9::assert_equal!(config.incoming.port, 25);
        k9::assert_equal!(config.incoming.idle_timeout, Duration::from_secs(300));
        k9::assert_equal!(config.outgoing.archive_addr, None);
    }

    #[test]
    fn parses_accept_from_and_humantime_timeout() {
        let toml = r#"
            [incoming]
            domain = "example.com"
            accept_from = ["10.0.0.0/8", "192.168.1.0/24"]
            idle_timeout = "30s"

            [outgoing]
            server = "relay.example.com"
            envelope_sender = "mailingset@example.com"
            archive_addr = "archive@example.com"

            [data]
            lists_dir = "/etc/mailingset/lists"
            symbols_file = "/etc/mailingset/symbols"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        k9::assert_equal!(config.incoming.idle_timeout, Duration::from_secs(30));
        k9::assert_equal!(
            config.incoming.accept_from.unwrap().contains("10.1.2.3".parse().unwrap()),
            true
        );
        k9::assert_equal!(
            config.outgoing.archive_addr,
            Some("archive@example.com".to_string())
        );
    }
}
