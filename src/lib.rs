//! A small IPv4 network stack working directly on Ethernet frames.
//!
//! The stack speaks ARP, IPv4, ICMP echo, TCP (handshake and single segment
//! reliable send) and UDP on top of any [`phy::Device`], with time supplied
//! by a [`phy::Clock`]. It never allocates: every frame is built and parsed
//! in the fixed buffers owned by an [`iface::NetworkContext`].

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod iface;
pub mod phy;
pub mod protocol;
pub mod socket;

#[cfg(test)]
mod dev;

pub use config::Config;
pub use iface::{network_init, Mode, NetworkContext, Poll};
pub use socket::{IpProtocol, Socket, TcpState};

pub type Field = core::ops::Range<usize>;
pub type FieldFrom = core::ops::RangeFrom<usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// An operation cannot proceed because a buffer is empty or full.
    /// E.g. a payload that does not fit into a single frame.
    Exhausted,
    /// The device refused to transmit a frame.
    Transmit,
    /// An operation is not permitted in the current state.
    Illegal,
    /// An endpoint or address of a remote host could not be translated to a lower level address.
    /// E.g. nobody answered the ARP requests for an IPv4 address.
    Unaddressable,
    /// The remote host did not answer a connection attempt in time.
    Timeout,
    /// A data segment was sent but no acknowledgment came back in time.
    Unacknowledged,
    /// A TCP operation needs an established connection.
    NotEstablished,
    /// An incoming packet could not be parsed because some of its fields were out of bounds
    /// of the received data.
    Truncated,
    /// An incoming packet had an incorrect checksum and was dropped.
    Checksum,
    /// An incoming packet could not be recognized and was dropped.
    /// E.g. an Ethernet packet with an unknown EtherType.
    Unrecognized,
    /// An incoming IP packet has been split into several IP fragments and was dropped,
    /// since IP reassembly is not supported.
    Fragmented,
    /// An incoming packet was recognized but was self-contradictory.
    /// E.g. an IPv4 header length shorter than the fixed header.
    Malformed,
    /// An incoming packet was recognized but contradicted internal state.
    /// E.g. an IPv4 packet addressed to another host.
    Dropped,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let msg = match self {
            Error::Exhausted => "buffer space exhausted",
            Error::Transmit => "frame transmission failed",
            Error::Illegal => "illegal operation",
            Error::Unaddressable => "unaddressable destination",
            Error::Timeout => "no response from remote host",
            Error::Unacknowledged => "segment not acknowledged",
            Error::NotEstablished => "connection not established",
            Error::Truncated => "truncated packet",
            Error::Checksum => "checksum error",
            Error::Unrecognized => "unrecognized packet",
            Error::Fragmented => "fragmented packet",
            Error::Malformed => "malformed packet",
            Error::Dropped => "dropped by socket",
        };
        f.write_str(msg)
    }
}

/// The result type for the networking stack.
pub type Result<T> = core::result::Result<T, Error>;

pub mod checksum {
    use byteorder::{
        ByteOrder,
        NetworkEndian
    };

    use crate::protocol::ip::{
        ipv4::Address,
        Protocol,
    };

    fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// Compute an RFC 1071 compliant checksum (without the final complement).
    pub fn data(mut data: &[u8]) -> u16 {
        let mut accum = 0;

        // For each 32-byte chunk...
        const CHUNK_SIZE: usize = 32;
        while data.len() >= CHUNK_SIZE {
            let mut d = &data[..CHUNK_SIZE];
            // ... take by 2 bytes and sum them.
            while d.len() >= 2 {
                accum += NetworkEndian::read_u16(d) as u32;
                d = &d[2..];
            }

            data = &data[CHUNK_SIZE..];
        }

        // Sum the rest that does not fit the last 32-byte chunk,
        // taking by 2 bytes.
        while data.len() >= 2 {
            accum += NetworkEndian::read_u16(data) as u32;
            data = &data[2..];
        }

        // Add the last remaining odd byte, if any.
        if let Some(&value) = data.first() {
            accum += (value as u32) << 8;
        }

        propagate_carries(accum)
    }

    /// Combine several RFC 1071 compliant checksums.
    pub fn combine(checksums: &[u16]) -> u16 {
        let mut accum: u32 = 0;
        for &word in checksums {
            accum += word as u32;
        }
        propagate_carries(accum)
    }

    /// The value that goes into a checksum field: the complemented sum.
    pub fn compute(data: &[u8]) -> u16 {
        !self::data(data)
    }

    /// Sum of the TCP/UDP pseudo-header, which is never transmitted.
    pub fn pseudo_header(
        src_addr: &Address,
        dst_addr: &Address,
        protocol: Protocol,
        length: u16,
    ) -> u16 {
        let mut proto_len = [0u8; 4];
        proto_len[1] = protocol.into();
        NetworkEndian::write_u16(&mut proto_len[2..4], length);

        combine(&[
            data(src_addr.as_bytes()),
            data(dst_addr.as_bytes()),
            data(&proto_len[..]),
        ])
    }

}
