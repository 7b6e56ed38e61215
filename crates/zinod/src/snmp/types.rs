//! OID and value types shared between sessions, traps and the agent.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// An SNMP object identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(parts: impl Into<Vec<u32>>) -> Self {
        Self(parts.into())
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Returns the instance suffix below `base`, if this OID is under it.
    pub fn suffix_of(&self, base: &Oid) -> Option<&[u32]> {
        self.0.strip_prefix(base.0.as_slice())
    }

    /// Returns this OID extended with an instance suffix.
    pub fn with_suffix(&self, suffix: &[u32]) -> Oid {
        let mut parts = self.0.clone();
        parts.extend_from_slice(suffix);
        Oid(parts)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u32]> for Oid {
    fn from(parts: &[u32]) -> Self {
        Self(parts.to_vec())
    }
}

impl<const N: usize> From<&[u32; N]> for Oid {
    fn from(parts: &[u32; N]) -> Self {
        Self(parts.to_vec())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.0 {
            write!(f, ".{part}")?;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Result<Vec<u32>, _> = s
            .trim_start_matches('.')
            .split('.')
            .map(str::parse)
            .collect();
        parts
            .map(Oid)
            .map_err(|_| format!("not a numeric OID: {s}"))
    }
}

/// A decoded SNMP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Integer(i64),
    Counter32(u32),
    Counter64(u64),
    Gauge32(u32),
    /// Hundredths of a second.
    TimeTicks(u32),
    OctetString(Vec<u8>),
    Oid(Oid),
    IpAddress(IpAddr),
    Null,
}

impl SnmpValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Counter32(v) | Self::Gauge32(v) | Self::TimeTicks(v) => Some(*v as i64),
            Self::Counter64(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|v| u64::try_from(v).ok())
    }

    /// Octet strings rendered as text, lossily.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    pub fn as_ip(&self) -> Option<IpAddr> {
        match self {
            Self::IpAddress(addr) => Some(*addr),
            Self::OctetString(bytes) => match bytes.len() {
                4 => {
                    let octets: [u8; 4] = bytes.as_slice().try_into().ok()?;
                    Some(IpAddr::from(octets))
                }
                16 => {
                    let octets: [u8; 16] = bytes.as_slice().try_into().ok()?;
                    Some(IpAddr::from(octets))
                }
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_oid(&self) -> Option<&Oid> {
        match self {
            Self::Oid(oid) => Some(oid),
            _ => None,
        }
    }
}

impl fmt::Display for SnmpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Counter32(v) | Self::Gauge32(v) | Self::TimeTicks(v) => write!(f, "{v}"),
            Self::Counter64(v) => write!(f, "{v}"),
            Self::OctetString(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            Self::Oid(oid) => write!(f, "{oid}"),
            Self::IpAddress(addr) => write!(f, "{addr}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// One OID/value pair from a response or trap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: SnmpValue,
}

impl VarBind {
    pub fn new(oid: Oid, value: SnmpValue) -> Self {
        Self { oid, value }
    }
}
