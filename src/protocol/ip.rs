pub mod ipv4;

use crate::{
    Error,
    Result
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    IPv4,
    IPv6,
}

impl Version {
    pub fn of_packet(data: &[u8]) -> Result<Version> {
        // version and IHL = 8 bits
        match data.first().map(|b| b >> 4) {
            Some(4) => Ok(Version::IPv4),
            Some(6) => Ok(Version::IPv6),
            Some(_) => Err(Error::Unrecognized),
            None => Err(Error::Truncated),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    ICMP,
    TCP,
    UDP,
    Unsupported(u8),
}

impl From<u8> for Protocol {
    fn from(val: u8) -> Self {
        match val {
            0x01 => Self::ICMP,
            0x06 => Self::TCP,
            0x11 => Self::UDP,
            other => Self::Unsupported(other),
        }
    }
}

impl From<Protocol> for u8 {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::ICMP => 0x01,
            Protocol::TCP => 0x06,
            Protocol::UDP => 0x11,
            Protocol::Unsupported(other) => other,
        }
    }
}
