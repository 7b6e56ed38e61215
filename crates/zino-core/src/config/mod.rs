//! Main daemon configuration, loaded from a TOML file.
//!
//! Every section is optional and falls back to defaults; unknown keys are
//! rejected so typos surface at startup rather than as silently ignored
//! settings.

pub mod polldevs;
pub mod secrets;

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "zino.toml";

/// Archival of expired closed events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Archiving {
    /// Directory for date-sharded dumps of expired events.
    #[serde(default = "default_old_events_dir")]
    pub old_events_dir: String,
}

impl Default for Archiving {
    fn default() -> Self {
        Self {
            old_events_dir: default_old_events_dir(),
        }
    }
}

/// Where the API user secrets live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Authentication {
    #[serde(default = "default_secrets_file")]
    pub file: String,
}

impl Default for Authentication {
    fn default() -> Self {
        Self {
            file: default_secrets_file(),
        }
    }
}

/// State snapshot location and cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Persistence {
    #[serde(default = "default_state_file")]
    pub file: String,
    /// Minutes between periodic snapshots.
    #[serde(default = "default_persistence_period")]
    pub period: u64,
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            file: default_state_file(),
            period: default_persistence_period(),
        }
    }
}

/// Pollfile location and reload cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Polling {
    #[serde(default = "default_pollfile")]
    pub file: String,
    /// Minutes between pollfile modification checks.
    #[serde(default = "default_polling_period")]
    pub period: u64,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            file: default_pollfile(),
            period: default_polling_period(),
        }
    }
}

/// Trap reception settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrapConfiguration {
    /// UDP port to listen for traps on; 0 disables trap reception.
    #[serde(default = "default_trap_port")]
    pub port: u16,
    /// Accepted trap communities; empty means accept any.
    #[serde(default = "default_trap_communities")]
    pub require_community: Vec<String>,
}

impl Default for TrapConfiguration {
    fn default() -> Self {
        Self {
            port: default_trap_port(),
            require_community: default_trap_communities(),
        }
    }
}

/// The uptime agent that lets legacy clients detect master failover.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfiguration {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_agent_address")]
    pub address: String,
    #[serde(default = "default_agent_port")]
    pub port: u16,
    #[serde(default = "default_community")]
    pub community: String,
}

impl Default for AgentConfiguration {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_agent_address(),
            port: default_agent_port(),
            community: default_community(),
        }
    }
}

/// SNMP backend selection and trap/agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnmpConfiguration {
    /// Name of the transport backend to instantiate.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub trap: TrapConfiguration,
    #[serde(default)]
    pub agent: AgentConfiguration,
}

impl Default for SnmpConfiguration {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            trap: TrapConfiguration::default(),
            agent: AgentConfiguration::default(),
        }
    }
}

/// Job scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfiguration {
    /// Seconds a delayed job run may still fire before misfires collapse.
    #[serde(default = "default_misfire_grace_time")]
    pub misfire_grace_time: u64,
}

impl Default for SchedulerConfiguration {
    fn default() -> Self {
        Self {
            misfire_grace_time: default_misfire_grace_time(),
        }
    }
}

/// Process-level settings applied by external tooling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessConfiguration {
    /// User to drop privileges to after binding sockets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Logging settings: a tracing-subscriber filter directive string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfiguration {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// The complete zino.toml schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    #[serde(default)]
    pub archiving: Archiving,
    #[serde(default)]
    pub authentication: Authentication,
    #[serde(default)]
    pub persistence: Persistence,
    #[serde(default)]
    pub polling: Polling,
    #[serde(default)]
    pub snmp: SnmpConfiguration,
    #[serde(default)]
    pub scheduler: SchedulerConfiguration,
    #[serde(default)]
    pub process: ProcessConfiguration,
    #[serde(default)]
    pub logging: LoggingConfiguration,
}

fn default_old_events_dir() -> String {
    "old-events".to_string()
}

fn default_secrets_file() -> String {
    "secrets".to_string()
}

fn default_state_file() -> String {
    "zino-state.json".to_string()
}

fn default_persistence_period() -> u64 {
    5
}

fn default_pollfile() -> String {
    "polldevs.cf".to_string()
}

fn default_polling_period() -> u64 {
    1
}

fn default_trap_port() -> u16 {
    162
}

fn default_trap_communities() -> Vec<String> {
    vec!["public".to_string(), "secret".to_string()]
}

fn default_backend() -> String {
    "sim".to_string()
}

fn default_agent_address() -> String {
    "0.0.0.0".to_string()
}

fn default_agent_port() -> u16 {
    1161
}

fn default_community() -> String {
    "public".to_string()
}

fn default_misfire_grace_time() -> u64 {
    60
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Reads and validates the TOML configuration file.
///
/// A pollfile given on the command line overrides the config file entry.
/// With no file name, returns the built-in defaults.
pub fn read_configuration(
    config_file: Option<&Path>,
    polldevs_override: Option<&str>,
) -> Result<Configuration> {
    let mut config = match config_file {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)
                .map_err(|err| CoreError::Configuration(format!("{}: {err}", path.display())))?
        }
        None => Configuration::default(),
    };
    if let Some(pollfile) = polldevs_override {
        config.polling.file = pollfile.to_string();
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert_eq!(config.persistence.file, "zino-state.json");
        assert_eq!(config.persistence.period, 5);
        assert_eq!(config.polling.period, 1);
        assert_eq!(config.snmp.trap.port, 162);
        assert_eq!(config.archiving.old_events_dir, "old-events");
    }

    #[test]
    fn test_parse_partial_file_keeps_other_defaults() {
        let config: Configuration = toml::from_str(
            r#"
            [persistence]
            file = "/var/lib/zino/state.json"

            [snmp]
            backend = "sim"

            [snmp.trap]
            port = 1162
            require_community = ["ops"]
            "#,
        )
        .unwrap();
        assert_eq!(config.persistence.file, "/var/lib/zino/state.json");
        assert_eq!(config.persistence.period, 5);
        assert_eq!(config.snmp.trap.port, 1162);
        assert_eq!(config.snmp.trap.require_community, vec!["ops"]);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result: std::result::Result<Configuration, _> = toml::from_str(
            r#"
            [persistence]
            flie = "typo.json"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_pollfile_overrides_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[polling]\nfile = \"from-config.cf\"").unwrap();
        let config =
            read_configuration(Some(file.path()), Some("from-cli.cf")).unwrap();
        assert_eq!(config.polling.file, "from-cli.cf");
    }

    #[test]
    fn test_invalid_toml_is_a_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[persistence").unwrap();
        let err = read_configuration(Some(file.path()), None).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }
}
