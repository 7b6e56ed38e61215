//! Parser for the legacy `polldevs.cf` pollfile.
//!
//! The pollfile consists of `key: value` blocks separated by blank lines.
//! Defaults are given as `default <key>: <value>` lines and apply to every
//! device block that does not override them. Parse errors cite the line
//! number; at runtime a failed reload keeps the previous registry.

use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Default polling interval in minutes.
pub const DEFAULT_INTERVAL_MINUTES: u64 = 5;

/// Everything Zino needs to poll one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollDevice {
    pub name: String,
    pub address: IpAddr,
    pub community: String,
    pub snmpversion: SnmpVersion,
    pub port: u16,
    /// SNMP request timeout in seconds.
    pub timeout: u64,
    pub retries: u32,
    /// Polling interval in minutes.
    pub interval: u64,
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Interfaces are watched only if their description matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watchpat: Option<String>,
    /// Interfaces matching this are never watched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignorepat: Option<String>,
    pub statistics: bool,
    pub do_bgp: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_repetitions: Option<u32>,
}

/// Supported SNMP protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnmpVersion {
    #[serde(rename = "v1")]
    V1,
    #[serde(rename = "v2c")]
    V2c,
}

#[derive(Debug, Clone, Default)]
struct DeviceBlock {
    entries: Vec<(String, String, usize)>,
}

/// Reads and parses a pollfile into a name-keyed device map.
pub fn read_polldevs(path: &Path) -> Result<BTreeMap<String, PollDevice>> {
    let content = fs::read_to_string(path)?;
    parse_polldevs(&content, &path.display().to_string())
}

/// Parses pollfile content. Separated from the file read for testability.
pub fn parse_polldevs(content: &str, filename: &str) -> Result<BTreeMap<String, PollDevice>> {
    let mut defaults: BTreeMap<String, String> = BTreeMap::new();
    let mut devices = BTreeMap::new();

    for block in split_blocks(content, filename)? {
        let mut block_defaults = Vec::new();
        let mut block_device = Vec::new();
        for (key, value, line) in block.entries {
            if let Some(default_key) = key.strip_prefix("default ") {
                block_defaults.push((default_key.trim().to_string(), value, line));
            } else {
                block_device.push((key, value, line));
            }
        }

        for (key, value, line) in block_defaults {
            validate_key(&key, line, filename)?;
            defaults.insert(key, value);
        }

        if block_device.is_empty() {
            continue;
        }
        let device = parse_device(&block_device, &defaults, filename)?;
        devices.insert(device.name.clone(), device);
    }

    Ok(devices)
}

fn split_blocks(content: &str, filename: &str) -> Result<Vec<DeviceBlock>> {
    let mut blocks = Vec::new();
    let mut current = DeviceBlock::default();
    for (lineno, raw) in content.lines().enumerate() {
        let lineno = lineno + 1;
        let line = raw.trim();
        if line.starts_with('#') {
            continue;
        }
        if line.is_empty() {
            if !current.entries.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(CoreError::Pollfile {
                file: filename.to_string(),
                line: lineno,
                reason: format!("\"{line}\" is not a valid configuration line"),
            });
        };
        current
            .entries
            .push((key.trim().to_string(), value.trim().to_string(), lineno));
    }
    if !current.entries.is_empty() {
        blocks.push(current);
    }
    Ok(blocks)
}

const KNOWN_KEYS: [&str; 15] = [
    "name",
    "address",
    "community",
    "snmpversion",
    "port",
    "timeout",
    "retries",
    "interval",
    "priority",
    "domain",
    "statistics",
    "do_bgp",
    "ignorepat",
    "watchpat",
    "max-repetitions",
];

fn validate_key(key: &str, line: usize, filename: &str) -> Result<()> {
    if KNOWN_KEYS.contains(&key) {
        Ok(())
    } else {
        Err(CoreError::Pollfile {
            file: filename.to_string(),
            line,
            reason: format!("unknown key \"{key}\""),
        })
    }
}

fn parse_device(
    entries: &[(String, String, usize)],
    defaults: &BTreeMap<String, String>,
    filename: &str,
) -> Result<PollDevice> {
    let first_line = entries[0].2;
    let mut merged: BTreeMap<String, (String, usize)> = defaults
        .iter()
        .map(|(k, v)| (k.clone(), (v.clone(), first_line)))
        .collect();
    for (key, value, line) in entries {
        validate_key(key, *line, filename)?;
        merged.insert(key.clone(), (value.clone(), *line));
    }

    let get = |key: &str| merged.get(key).map(|(v, l)| (v.as_str(), *l));
    let bad = |line: usize, reason: String| CoreError::Pollfile {
        file: filename.to_string(),
        line,
        reason,
    };

    let Some((name, _)) = get("name") else {
        return Err(bad(first_line, "device block missing \"name\"".to_string()));
    };
    let Some((address, addr_line)) = get("address") else {
        return Err(bad(
            first_line,
            format!("device \"{name}\" missing \"address\""),
        ));
    };
    let address: IpAddr = address
        .parse()
        .map_err(|_| bad(addr_line, format!("\"{address}\" is not an IP address")))?;

    let parse_num = |key: &str, default: u64| -> Result<u64> {
        match get(key) {
            Some((value, line)) => value
                .parse()
                .map_err(|_| bad(line, format!("\"{value}\" is not a valid {key}"))),
            None => Ok(default),
        }
    };
    let parse_flag = |key: &str, default: bool| -> Result<bool> {
        match get(key) {
            Some(("yes", _)) => Ok(true),
            Some(("no", _)) => Ok(false),
            Some((value, line)) => Err(bad(line, format!("\"{value}\" is not yes or no"))),
            None => Ok(default),
        }
    };

    let snmpversion = match get("snmpversion") {
        Some(("v1", _)) => SnmpVersion::V1,
        Some(("v2c", _)) | None => SnmpVersion::V2c,
        Some((value, line)) => {
            return Err(bad(line, format!("unsupported snmpversion \"{value}\"")));
        }
    };

    Ok(PollDevice {
        name: name.to_string(),
        address,
        community: get("community").map(|(v, _)| v.to_string()).unwrap_or_else(|| "public".to_string()),
        snmpversion,
        port: parse_num("port", 161)? as u16,
        timeout: parse_num("timeout", 5)?,
        retries: parse_num("retries", 3)? as u32,
        interval: parse_num("interval", DEFAULT_INTERVAL_MINUTES)?,
        priority: parse_num("priority", 100)? as u32,
        domain: get("domain").map(|(v, _)| v.to_string()),
        watchpat: get("watchpat").map(|(v, _)| v.to_string()),
        ignorepat: get("ignorepat").map(|(v, _)| v.to_string()),
        statistics: parse_flag("statistics", true)?,
        do_bgp: parse_flag("do_bgp", true)?,
        max_repetitions: match get("max-repetitions") {
            Some(_) => Some(parse_num("max-repetitions", 0)? as u32),
            None => None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# backbone routers
default interval: 5
default community: notpublic

name: arkham-sw1
address: 10.0.42.1
watchpat: (core|transit)

name: auroralane-gw1
address: 10.0.42.2
interval: 1
do_bgp: yes
snmpversion: v1
";

    #[test]
    fn test_parses_blocks_and_defaults() {
        let devices = parse_polldevs(SAMPLE, "polldevs.cf").unwrap();
        assert_eq!(devices.len(), 2);

        let arkham = &devices["arkham-sw1"];
        assert_eq!(arkham.community, "notpublic");
        assert_eq!(arkham.interval, 5);
        assert_eq!(arkham.watchpat.as_deref(), Some("(core|transit)"));
        assert_eq!(arkham.snmpversion, SnmpVersion::V2c);
        assert_eq!(arkham.port, 161);

        let aurora = &devices["auroralane-gw1"];
        assert_eq!(aurora.interval, 1);
        assert_eq!(aurora.snmpversion, SnmpVersion::V1);
    }

    #[test]
    fn test_error_cites_line_number() {
        let input = "name: a-gw\naddress: 10.0.0.1\n\nname: b-gw\nthis is garbage\n";
        let err = parse_polldevs(input, "polldevs.cf").unwrap_err();
        match err {
            CoreError::Pollfile { line, .. } => assert_eq!(line, 5),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_key_is_an_error() {
        let input = "name: a-gw\naddress: 10.0.0.1\ncommunty: whoops\n";
        let err = parse_polldevs(input, "polldevs.cf").unwrap_err();
        assert!(err.to_string().contains("communty"));
    }

    #[test]
    fn test_bad_address_is_an_error() {
        let input = "name: a-gw\naddress: not-an-ip\n";
        let err = parse_polldevs(input, "polldevs.cf").unwrap_err();
        assert!(err.to_string().contains("not-an-ip"));
        match err {
            CoreError::Pollfile { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_address_is_an_error() {
        let input = "name: a-gw\n";
        assert!(parse_polldevs(input, "polldevs.cf").is_err());
    }

    #[test]
    fn test_multiple_blank_lines_are_tolerated() {
        let input = "name: a-gw\naddress: 10.0.0.1\n\n\n\nname: b-gw\naddress: 10.0.0.2\n";
        let devices = parse_polldevs(input, "polldevs.cf").unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[test]
    fn test_defaults_only_apply_forward() {
        // Defaults in a later block do not rewrite devices already parsed.
        let input = "\
name: a-gw
address: 10.0.0.1

default interval: 2

name: b-gw
address: 10.0.0.2
";
        let devices = parse_polldevs(input, "polldevs.cf").unwrap();
        assert_eq!(devices["a-gw"].interval, DEFAULT_INTERVAL_MINUTES);
        assert_eq!(devices["b-gw"].interval, 2);
    }
}
