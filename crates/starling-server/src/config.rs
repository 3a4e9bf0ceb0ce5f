//! Environment configuration
//!
//! Everything `starlingd` needs comes from environment variables, with a
//! `.env` file loaded first if one sits next to the process. `MESH_ID` is
//! the only variable with no usable default.

use std::env;

use thiserror::Error;

/// Errors from reading the environment
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment check failed: {0} is not set")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Configuration for one `starlingd` process
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// This node's identity in the mesh (`MESH_ID`, required)
    pub mesh_id: String,
    /// Client listen port (`PORT`, default 443)
    pub port: u16,
    /// TLS certificate chain path (`CERT_FILE`)
    pub cert_file: String,
    /// TLS private key path (`KEY_FILE`)
    pub key_file: String,
    /// Public hostname, informational only (`DOMAIN`)
    pub domain: String,
    /// Verbose logging (`DEBUG=true`)
    pub debug: bool,
    /// Start the embedded mesh broker in-process (`WITH_MESH_BROKER=true`)
    pub with_mesh_broker: bool,
    /// Mesh broker endpoint (`MESH_BROKER`)
    pub mesh_broker: String,
    /// Prefix for mesh link publishing identities (`MESH_SNDR_NAME`)
    pub mesh_sender_prefix: String,
    /// Prefix for mesh link inbound identities (`MESH_RCVR_NAME`)
    pub mesh_receiver_prefix: String,
    /// Credential presented on mesh links (`MESH_CREDENTIAL`)
    pub mesh_credential: String,
}

impl ServerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read configuration through an arbitrary lookup, which is what the
    /// tests use instead of mutating process-global state
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get_or = |name: &str, default: &str| {
            get(name).filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
        };
        let flag = |name: &str| get(name).is_some_and(|v| v == "true");

        let mesh_id = get("MESH_ID")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("MESH_ID"))?;

        let port = match get("PORT").filter(|v| !v.is_empty()) {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value,
            })?,
            None => 443,
        };

        Ok(Self {
            mesh_id,
            port,
            cert_file: get_or("CERT_FILE", ""),
            key_file: get_or("KEY_FILE", ""),
            domain: get_or("DOMAIN", ""),
            debug: flag("DEBUG"),
            with_mesh_broker: flag("WITH_MESH_BROKER"),
            mesh_broker: get_or("MESH_BROKER", "127.0.0.1:9000"),
            mesh_sender_prefix: get_or("MESH_SNDR_NAME", "starling-sndr"),
            mesh_receiver_prefix: get_or("MESH_RCVR_NAME", "starling-rcvr"),
            mesh_credential: get_or("MESH_CREDENTIAL", ""),
        })
    }

    /// The socket address the client listener binds
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |name| map.get(name).map(|v| v.to_string())
    }

    #[test]
    fn test_mesh_id_is_required() {
        let result = ServerConfig::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(ConfigError::Missing("MESH_ID"))));

        let result = ServerConfig::from_lookup(lookup(&[("MESH_ID", "")]));
        assert!(matches!(result, Err(ConfigError::Missing("MESH_ID"))));
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[("MESH_ID", "eu-1")])).unwrap();
        assert_eq!(config.mesh_id, "eu-1");
        assert_eq!(config.port, 443);
        assert_eq!(config.listen_addr(), "0.0.0.0:443");
        assert!(!config.debug);
        assert!(!config.with_mesh_broker);
        assert_eq!(config.mesh_broker, "127.0.0.1:9000");
        assert_eq!(config.mesh_sender_prefix, "starling-sndr");
        assert_eq!(config.mesh_receiver_prefix, "starling-rcvr");
        assert!(config.mesh_credential.is_empty());
    }

    #[test]
    fn test_full_environment() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("MESH_ID", "us-2"),
            ("PORT", "8443"),
            ("CERT_FILE", "/etc/tls/cert.pem"),
            ("KEY_FILE", "/etc/tls/key.pem"),
            ("DOMAIN", "bus.example.com"),
            ("DEBUG", "true"),
            ("WITH_MESH_BROKER", "true"),
            ("MESH_BROKER", "broker.internal:9100"),
            ("MESH_SNDR_NAME", "edge-sndr"),
            ("MESH_RCVR_NAME", "edge-rcvr"),
            ("MESH_CREDENTIAL", "token"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8443);
        assert_eq!(config.cert_file, "/etc/tls/cert.pem");
        assert!(config.debug);
        assert!(config.with_mesh_broker);
        assert_eq!(config.mesh_broker, "broker.internal:9100");
        assert_eq!(config.mesh_sender_prefix, "edge-sndr");
        assert_eq!(config.mesh_credential, "token");
    }

    #[test]
    fn test_invalid_port_rejected() {
        let result =
            ServerConfig::from_lookup(lookup(&[("MESH_ID", "eu-1"), ("PORT", "not-a-port")]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));
    }

    #[test]
    fn test_debug_flag_is_strict() {
        let config =
            ServerConfig::from_lookup(lookup(&[("MESH_ID", "eu-1"), ("DEBUG", "yes")])).unwrap();
        assert!(!config.debug);
    }
}
