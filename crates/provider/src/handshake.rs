//! Reattach handshake
//!
//! ```text
//! <namespace>/<name>=<protocolVersion>|<transport>|<address>|<serverKind>|<pid>
//! ```
//!
//! Several providers are joined with `;`.

use std::fmt;
use std::str::FromStr;

use crate::config::Transport;
use crate::error::ProviderError;

/// Server kind advertised for every in-process provider
pub const SERVER_KIND: &str = "grpc";

const SEPARATOR: char = ';';

/// Plugin protocol major version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V5,
    V6,
}

impl ProtocolVersion {
    pub fn number(&self) -> u8 {
        match self {
            ProtocolVersion::V5 => 5,
            ProtocolVersion::V6 => 6,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Fully qualified provider address, e.g. `registry.terraform.io/hashicorp/aws`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAddress {
    pub namespace: String,
    pub name: String,
}

impl ProviderAddress {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ProviderAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Connection details for one in-process provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub provider: ProviderAddress,
    pub protocol: ProtocolVersion,
    pub transport: Transport,
    pub address: String,
    pub server_kind: String,
    pub pid: u32,
}

impl Handshake {
    pub fn new(
        provider: ProviderAddress,
        protocol: ProtocolVersion,
        transport: Transport,
        address: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            protocol,
            transport,
            address: address.into(),
            server_kind: SERVER_KIND.to_string(),
            pid: std::process::id(),
        }
    }

    /// Encode several handshakes into one binding value
    pub fn join(handshakes: &[Handshake]) -> String {
        handshakes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(&SEPARATOR.to_string())
    }

    /// Decode a binding value produced by [`Handshake::join`]
    pub fn parse_all(input: &str) -> Result<Vec<Handshake>, ProviderError> {
        input
            .split(SEPARATOR)
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}|{}|{}|{}|{}",
            self.provider, self.protocol, self.transport, self.address, self.server_kind, self.pid
        )
    }
}

impl FromStr for Handshake {
    type Err = ProviderError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &str| ProviderError::Handshake {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (provider, rest) = input
            .trim()
            .split_once('=')
            .ok_or_else(|| fail("missing \"=\""))?;
        let (namespace, name) = provider
            .rsplit_once('/')
            .ok_or_else(|| fail("provider must be <namespace>/<name>"))?;
        if namespace.is_empty() || name.is_empty() {
            return Err(fail("provider must be <namespace>/<name>"));
        }

        let fields: Vec<&str> = rest.split('|').collect();
        let &[protocol, transport, address, server_kind, pid] = fields.as_slice() else {
            return Err(fail("expected 5 \"|\"-separated fields"));
        };

        let protocol = match protocol {
            "5" => ProtocolVersion::V5,
            "6" => ProtocolVersion::V6,
            _ => return Err(fail("unsupported protocol version")),
        };
        let transport = transport.parse::<Transport>().map_err(|e| fail(&e))?;
        if address.is_empty() {
            return Err(fail("empty address"));
        }
        let pid = pid.parse::<u32>().map_err(|_| fail("invalid process id"))?;

        Ok(Handshake {
            provider: ProviderAddress::new(namespace, name),
            protocol,
            transport,
            address: address.to_string(),
            server_kind: server_kind.to_string(),
            pid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Handshake {
        Handshake {
            provider: ProviderAddress::new("registry.terraform.io/hashicorp", "example"),
            protocol: ProtocolVersion::V6,
            transport: Transport::Tcp,
            address: "127.0.0.1:40123".to_string(),
            server_kind: SERVER_KIND.to_string(),
            pid: 4242,
        }
    }

    #[test]
    fn test_format() {
        assert_eq!(
            sample().to_string(),
            "registry.terraform.io/hashicorp/example=6|tcp|127.0.0.1:40123|grpc|4242"
        );
    }

    #[test]
    fn test_parse_joined() {
        let mut second = sample();
        second.provider.name = "other".to_string();
        second.protocol = ProtocolVersion::V5;
        second.transport = Transport::Unix;
        second.address = "/tmp/plugin123/plugin.sock".to_string();

        let joined = Handshake::join(&[sample(), second.clone()]);
        let parsed = Handshake::parse_all(&joined).unwrap();
        assert_eq!(parsed, vec![sample(), second]);
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "",
            "example=6|tcp|a|grpc|1",
            "hashicorp/example=7|tcp|a|grpc|1",
            "hashicorp/example=6|udp|a|grpc|1",
            "hashicorp/example=6|tcp||grpc|1",
            "hashicorp/example=6|tcp|a|grpc",
            "hashicorp/example=6|tcp|a|grpc|pid",
        ] {
            assert!(bad.parse::<Handshake>().is_err(), "{bad:?} should not parse");
        }
    }
}
