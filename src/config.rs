//! Server configuration loaded from a JSON file.
//!
//! Every key is optional; missing keys fall back to the defaults below.
//! A missing or unparsable file is a startup failure.

use serde::Deserialize;
use std::path::Path;

use crate::error::RelayError;

fn default_port() -> u16 {
    12345
}

fn default_ws_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// UDP port for raw PCM audio datagrams.
    #[serde(default = "default_port")]
    pub port: u16,
    /// TCP port for the WebSocket transport.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_port(),
            ws_port: default_ws_port(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let contents = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_missing_keys() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 12345);
        assert_eq!(config.ws_port, 8080);
    }

    #[test]
    fn test_explicit_keys_override_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"port": 9000, "ws_port": 9001}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.ws_port, 9001);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"port": 7000, "server_ip": "10.0.0.1"}"#).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.ws_port, 8080);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let result: Result<ServerConfig, _> = serde_json::from_str("{port:");
        assert!(result.is_err());
    }
}
