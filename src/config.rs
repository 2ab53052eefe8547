//! Connection options and named connection profiles.
//!
//! Profiles live in a TOML file:
//!
//! ```toml
//! default_connection = "pbx1"
//!
//! [connections.pbx1]
//! host = "10.0.0.5"
//! username = "monitor"
//! secret = "s3cret"
//! events = false
//! ```

use crate::{
    constants::{DEFAULT_ACTION_TIMEOUT_MS, DEFAULT_AMI_PORT, DEFAULT_TIMEOUT_MS},
    dispatcher::HandlerErrorPolicy,
    error::{AmiError, AmiResult},
    protocol::MalformedLinePolicy,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming an explicit profile file.
pub const CONFIG_ENV_VAR: &str = "ASTERISK_MANAGER_CONF";

/// Options fixed at connection time.
///
/// Use [`Default::default()`] for standard settings.
#[derive(Debug, Clone)]
pub struct AmiConnectOptions {
    /// Receive events after login. `false` sends `Events: off` with `Login`. Default: true.
    pub events: bool,
    /// TCP connect and banner/login deadline. Default: 2s.
    pub connect_timeout: Duration,
    /// Per-action response deadline. Default: 5s.
    pub action_timeout: Duration,
    /// Disconnect when nothing arrives for this long. Default: disabled.
    pub liveness_timeout: Option<Duration>,
    /// Handling of block lines without a `:` separator. Default: drop.
    pub malformed_lines: MalformedLinePolicy,
    /// Effect of a failing event handler. Default: log and continue.
    pub handler_errors: HandlerErrorPolicy,
}

impl Default for AmiConnectOptions {
    fn default() -> Self {
        Self {
            events: true,
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            action_timeout: Duration::from_millis(DEFAULT_ACTION_TIMEOUT_MS),
            liveness_timeout: None,
            malformed_lines: MalformedLinePolicy::default(),
            handler_errors: HandlerErrorPolicy::default(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_AMI_PORT
}

fn default_events() -> bool {
    true
}

/// One named Manager endpoint.
#[derive(Clone, Deserialize)]
pub struct ConnectionProfile {
    /// Server host name or address.
    pub host: String,
    /// TCP port. Default: 5038.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Manager user from `manager.conf`.
    pub username: String,
    /// Manager secret.
    pub secret: String,
    /// Receive events after login. Default: true.
    #[serde(default = "default_events")]
    pub events: bool,
}

impl ConnectionProfile {
    /// Default options with this profile's `events` setting applied.
    pub fn options(&self) -> AmiConnectOptions {
        AmiConnectOptions {
            events: self.events,
            ..AmiConnectOptions::default()
        }
    }
}

impl std::fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("events", &self.events)
            .finish()
    }
}

/// Named connection profiles loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManagerConfig {
    /// Profile used when none is named.
    #[serde(default)]
    pub default_connection: Option<String>,
    /// Profiles by name.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionProfile>,
}

impl ManagerConfig {
    /// Parse profiles from TOML text.
    pub fn from_toml_str(text: &str) -> AmiResult<Self> {
        let config: ManagerConfig =
            toml::from_str(text).map_err(|e| AmiError::config(e.to_string()))?;
        if let Some(name) = &config.default_connection {
            if !config
                .connections
                .contains_key(name)
            {
                return Err(AmiError::config(format!(
                    "default_connection {:?} has no [connections.{}] section",
                    name, name
                )));
            }
        }
        Ok(config)
    }

    /// Load profiles from a file.
    pub fn load(path: impl AsRef<Path>) -> AmiResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AmiError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!("Loaded manager profiles from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Candidate profile files, most specific first.
    ///
    /// `$ASTERISK_MANAGER_CONF`, `$HOME/.asterisk-manager.toml`,
    /// `./asterisk-manager.toml`, `/etc/asterisk-manager.toml`,
    /// `/etc/asterisk/asterisk-manager.toml`.
    pub fn search_path() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(explicit) = std::env::var_os(CONFIG_ENV_VAR) {
            paths.push(PathBuf::from(explicit));
        }
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".asterisk-manager.toml"));
        }
        paths.push(PathBuf::from("asterisk-manager.toml"));
        paths.push(PathBuf::from("/etc/asterisk-manager.toml"));
        paths.push(PathBuf::from("/etc/asterisk/asterisk-manager.toml"));
        paths
    }

    /// Load the first existing file from [`search_path`](Self::search_path).
    pub fn discover() -> AmiResult<Self> {
        let candidates = Self::search_path();
        for path in &candidates {
            if path.is_file() {
                return Self::load(path);
            }
        }
        Err(AmiError::config(format!(
            "no manager configuration found (searched {})",
            candidates
                .iter()
                .map(|p| p
                    .display()
                    .to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Look up a profile by name, or the default one.
    ///
    /// Without a name, uses `default_connection`, or the only profile when
    /// exactly one is defined.
    pub fn connection(&self, name: Option<&str>) -> AmiResult<&ConnectionProfile> {
        let name = match name.or(self
            .default_connection
            .as_deref())
        {
            Some(name) => name,
            None if self
                .connections
                .len()
                == 1 =>
            {
                return self
                    .connections
                    .values()
                    .next()
                    .ok_or_else(|| AmiError::config("no connections defined"));
            }
            None => {
                return Err(AmiError::config(
                    "no connection named and no default_connection set",
                ))
            }
        };
        self.connections
            .get(name)
            .ok_or_else(|| AmiError::config(format!("no connection named {:?}", name)))
    }

    /// Profile names, sorted.
    pub fn connection_names(&self) -> impl Iterator<Item = &str> {
        self.connections
            .keys()
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
default_connection = "pbx1"

[connections.pbx1]
host = "10.0.0.5"
username = "monitor"
secret = "s3cret"
events = false

[connections.lab]
host = "lab.example.net"
port = 15038
username = "admin"
secret = "amp111"
"#;

    #[test]
    fn test_defaults() {
        let options = AmiConnectOptions::default();
        assert!(options.events);
        assert_eq!(options.action_timeout, Duration::from_secs(5));
        assert_eq!(options.liveness_timeout, None);
        assert_eq!(options.malformed_lines, MalformedLinePolicy::Drop);
        assert_eq!(options.handler_errors, HandlerErrorPolicy::LogAndContinue);
    }

    #[test]
    fn test_parse_profiles() {
        let config = ManagerConfig::from_toml_str(SAMPLE).unwrap();
        let default = config
            .connection(None)
            .unwrap();
        assert_eq!(default.host, "10.0.0.5");
        assert_eq!(default.port, DEFAULT_AMI_PORT);
        assert!(!default.events);
        assert!(!default
            .options()
            .events);

        let lab = config
            .connection(Some("lab"))
            .unwrap();
        assert_eq!(lab.port, 15038);
        assert!(lab.events);
        assert_eq!(
            config
                .connection_names()
                .collect::<Vec<_>>(),
            vec!["lab", "pbx1"]
        );
    }

    #[test]
    fn test_single_profile_is_implicit_default() {
        let config = ManagerConfig::from_toml_str(
            "[connections.only]\nhost = \"h\"\nusername = \"u\"\nsecret = \"s\"\n",
        )
        .unwrap();
        assert_eq!(
            config
                .connection(None)
                .unwrap()
                .host,
            "h"
        );
    }

    #[test]
    fn test_missing_profile_errors() {
        let config = ManagerConfig::from_toml_str(SAMPLE).unwrap();
        assert!(matches!(
            config.connection(Some("nope")),
            Err(AmiError::Config { .. })
        ));
        assert!(ManagerConfig::default()
            .connection(None)
            .is_err());
    }

    #[test]
    fn test_dangling_default_rejected() {
        let err = ManagerConfig::from_toml_str("default_connection = \"ghost\"\n").unwrap_err();
        assert!(matches!(err, AmiError::Config { .. }));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(ManagerConfig::from_toml_str("[connections.x]\nhost = 5\n").is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = ManagerConfig::from_toml_str(SAMPLE).unwrap();
        let debug_str = format!("{:?}", config);
        assert!(!debug_str.contains("s3cret"));
        assert!(debug_str.contains("REDACTED"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ManagerConfig::load("/nonexistent/asterisk-manager.toml").unwrap_err();
        assert!(matches!(err, AmiError::Config { .. }));
    }

    #[test]
    fn test_search_path_ends_with_system_locations() {
        let paths = ManagerConfig::search_path();
        assert_eq!(
            paths
                .last()
                .unwrap(),
            Path::new("/etc/asterisk/asterisk-manager.toml")
        );
    }
}
