//! IP address and prefix unions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::{ProtocolError, Result};

/// Maximum length in bytes of an IPv6 address on the wire
pub const IPV6_ADDRESS_MAX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IpAddress {
    V4(u32),
    /// Variable length, at most 16 bytes
    V6(Vec<u8>),
}

impl IpAddress {
    pub fn validate(&self) -> Result<()> {
        match self {
            IpAddress::V4(_) => Ok(()),
            IpAddress::V6(bytes) if bytes.len() > IPV6_ADDRESS_MAX_LEN => {
                Err(ProtocolError::MalformedPayload(format!(
                    "IPv6 address too long: {} bytes",
                    bytes.len()
                )))
            }
            IpAddress::V6(_) => Ok(()),
        }
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        IpAddress::V4(u32::from(addr))
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(addr: Ipv6Addr) -> Self {
        IpAddress::V6(addr.octets().to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ipv4Prefix {
    pub address: u32,
    pub prefixlen: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ipv6Prefix {
    pub address: Vec<u8>,
    pub prefixlen: u8,
}

/// An IPv4 or IPv6 prefix; exactly one arm is ever populated
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IpPrefix {
    V4(Ipv4Prefix),
    V6(Ipv6Prefix),
}

impl IpPrefix {
    pub fn v4(address: Ipv4Addr, prefixlen: u8) -> Result<Self> {
        let prefix = IpPrefix::V4(Ipv4Prefix {
            address: u32::from(address),
            prefixlen,
        });
        prefix.validate()?;
        Ok(prefix)
    }

    pub fn v6(address: Ipv6Addr, prefixlen: u8) -> Result<Self> {
        let prefix = IpPrefix::V6(Ipv6Prefix {
            address: address.octets().to_vec(),
            prefixlen,
        });
        prefix.validate()?;
        Ok(prefix)
    }

    /// IPv4 default route
    pub fn default_v4() -> Self {
        IpPrefix::V4(Ipv4Prefix {
            address: 0,
            prefixlen: 0,
        })
    }

    /// IPv6 default route
    pub fn default_v6() -> Self {
        IpPrefix::V6(Ipv6Prefix {
            address: vec![0; IPV6_ADDRESS_MAX_LEN],
            prefixlen: 0,
        })
    }

    pub fn prefixlen(&self) -> u8 {
        match self {
            IpPrefix::V4(p) => p.prefixlen,
            IpPrefix::V6(p) => p.prefixlen,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            IpPrefix::V4(p) if p.prefixlen > 32 => Err(ProtocolError::MalformedPayload(format!(
                "IPv4 prefix length out of range: {}",
                p.prefixlen
            ))),
            IpPrefix::V4(_) => Ok(()),
            IpPrefix::V6(p) => {
                if p.address.len() > IPV6_ADDRESS_MAX_LEN {
                    return Err(ProtocolError::MalformedPayload(format!(
                        "IPv6 address too long: {} bytes",
                        p.address.len()
                    )));
                }
                if p.prefixlen > 128 {
                    return Err(ProtocolError::MalformedPayload(format!(
                        "IPv6 prefix length out of range: {}",
                        p.prefixlen
                    )));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpPrefix::V4(p) => write!(f, "{}/{}", Ipv4Addr::from(p.address), p.prefixlen),
            IpPrefix::V6(p) => {
                let mut octets = [0u8; IPV6_ADDRESS_MAX_LEN];
                let len = p.address.len().min(IPV6_ADDRESS_MAX_LEN);
                octets[..len].copy_from_slice(&p.address[..len]);
                write!(f, "{}/{}", Ipv6Addr::from(octets), p.prefixlen)
            }
        }
    }
}

impl FromStr for IpPrefix {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| ProtocolError::MalformedPayload(format!("missing prefix length: {}", s)))?;
        let prefixlen: u8 = len
            .parse()
            .map_err(|_| ProtocolError::MalformedPayload(format!("bad prefix length: {}", s)))?;

        if let Ok(v4) = addr.parse::<Ipv4Addr>() {
            return IpPrefix::v4(v4, prefixlen);
        }
        if let Ok(v6) = addr.parse::<Ipv6Addr>() {
            return IpPrefix::v6(v6, prefixlen);
        }
        Err(ProtocolError::MalformedPayload(format!(
            "bad prefix address: {}",
            s
        )))
    }
}
