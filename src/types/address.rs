use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Port assumed when a seed or membership entry omits one
pub const DEFAULT_PORT: u16 = 27017;

/// Canonical `host:port` key of a cluster member.
///
/// Hosts are lowercased, a missing port becomes [`DEFAULT_PORT`] and bare
/// IPv6 literals are bracketed, so two spellings of the same member compare
/// equal and sort together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().to_ascii_lowercase();

        if raw.starts_with('[') {
            return match raw.rfind("]:") {
                Some(_) => Address(raw),
                None => Address(format!("{}:{}", raw, DEFAULT_PORT)),
            };
        }

        match raw.matches(':').count() {
            0 => Address(format!("{}:{}", raw, DEFAULT_PORT)),
            1 => Address(raw),
            _ => Address(format!("[{}]:{}", raw, DEFAULT_PORT)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn host(&self) -> &str {
        self.0.rsplit_once(':').map(|(host, _)| host).unwrap_or(&self.0)
    }

    pub fn port(&self) -> u16 {
        self.0
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Address::parse(raw)
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Address::parse(&raw)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl FromStr for Address {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Address::parse(s))
    }
}
