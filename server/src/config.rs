//! Server configuration.
//!
//! Configuration reaches the server as a string key/value map. The server
//! itself recognizes `Ip` (default `127.0.0.1`) and `Port` (required);
//! everything else passes through to `on_configuration` untouched, so
//! modules can carry their own keys in the same map.

use std::collections::BTreeMap;
use std::net::IpAddr;

use thiserror::Error;

/// String key/value configuration handed to `run_server` and forwarded to
/// modules.
pub type Options = BTreeMap<String, String>;

/// Configuration failures fatal at server start.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The required `Port` option is absent.
    #[error("missing required option Port")]
    MissingPort,

    /// The `Port` option is not a valid u16.
    #[error("invalid Port value: {0}")]
    InvalidPort(String),

    /// The `Ip` option is not a valid address.
    #[error("invalid Ip value: {0}")]
    InvalidIp(String),
}

/// The options the server itself consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address.
    pub ip: IpAddr,
    /// Listen port.
    pub port: u16,
}

impl ServerConfig {
    /// Extract the listen address from an options map.
    pub fn from_options(opts: &Options) -> Result<Self, ConfigError> {
        let ip_str = opts.get("Ip").map(String::as_str).unwrap_or("127.0.0.1");
        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| ConfigError::InvalidIp(ip_str.to_string()))?;

        let port_str = opts.get("Port").ok_or(ConfigError::MissingPort)?;
        let port: u16 = port_str
            .parse()
            .map_err(|_| ConfigError::InvalidPort(port_str.clone()))?;

        Ok(Self { ip, port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> Options {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_and_required() {
        let config = ServerConfig::from_options(&opts(&[("Port", "5999")])).unwrap();
        assert_eq!(config.ip, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(config.port, 5999);

        assert_eq!(
            ServerConfig::from_options(&opts(&[])),
            Err(ConfigError::MissingPort)
        );
    }

    #[test]
    fn test_explicit_ip() {
        let config =
            ServerConfig::from_options(&opts(&[("Ip", "0.0.0.0"), ("Port", "80")])).unwrap();
        assert_eq!(config.ip, "0.0.0.0".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            ServerConfig::from_options(&opts(&[("Port", "70000")])),
            Err(ConfigError::InvalidPort("70000".into()))
        );
        assert_eq!(
            ServerConfig::from_options(&opts(&[("Ip", "not-an-ip"), ("Port", "1")])),
            Err(ConfigError::InvalidIp("not-an-ip".into()))
        );
    }

    #[test]
    fn test_unknown_keys_ignored_here() {
        let map = opts(&[("Port", "9"), ("Shards", "4")]);
        assert!(ServerConfig::from_options(&map).is_ok());
        // unknown keys stay in the map for on_configuration
        assert_eq!(map.get("Shards").map(String::as_str), Some("4"));
    }
}
