//! The network context: this host's addresses, its ARP cache and the frame
//! buffers every layer works in.
//!
//! All protocol operations are methods on [`NetworkContext`]. Each call runs
//! to completion on the caller's thread, busy-polling the device until it
//! succeeds, hits its deadline or fails to transmit.

mod arp;
mod icmp;
mod ip;
mod tcp;
mod udp;

pub use self::arp::{ArpCache, ArpEntry, ARP_CACHE_SIZE};
pub use self::ip::MAX_IP_PAYLOAD;
pub use self::tcp::MAX_SEGMENT_SIZE;

use crate::config::Config;
use crate::phy::{
    Clock,
    Device,
    MAX_PACKET_SIZE,
};
use crate::protocol::ethernet::Address as MacAddress;
use crate::protocol::ip::ipv4::Address;
use crate::socket::{
    IpProtocol,
    Socket,
};

/// How a receive call waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Keep pulling frames until one carries data for the caller.
    Blocking,
    /// Look at no more than one frame.
    NonBlocking,
}

/// Outcome of a receive that may return without data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    /// A frame was consumed and answered on the spot (ARP request, ping).
    /// Nothing for the caller, but polling again may be worthwhile.
    Handled,
    /// A frame was consumed and dropped: malformed, fragmented, or meant
    /// for another host, protocol or port.
    Discarded,
    /// No frame was waiting.
    Empty,
}

impl<T> Poll<T> {
    pub fn is_ready(&self) -> bool {
        match self {
            Poll::Ready(_) => true,
            _ => false,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Poll<U> {
        match self {
            Poll::Ready(value) => Poll::Ready(f(value)),
            Poll::Handled => Poll::Handled,
            Poll::Discarded => Poll::Discarded,
            Poll::Empty => Poll::Empty,
        }
    }
}

pub struct NetworkContext<D: Device, C: Clock> {
    device: D,
    clock: C,
    config: Config,
    mac: MacAddress,
    arp_cache: ArpCache,
    next_port: u16,
    tx_buffer: [u8; MAX_PACKET_SIZE],
    rx_buffer: [u8; MAX_PACKET_SIZE],
}

/// Bring up the stack on `device` with this host at `local_ip`.
pub fn network_init<D: Device, C: Clock>(
    device: D,
    clock: C,
    local_ip: Address,
    gateway_ip: Address,
) -> NetworkContext<D, C> {
    NetworkContext::new(device, clock, Config::new(local_ip, gateway_ip))
}

impl<D: Device, C: Clock> NetworkContext<D, C> {
    pub fn new(device: D, clock: C, config: Config) -> Self {
        let mac = device.mac_address();
        log::debug!("net: up as {} ({}), gateway {}", config.local_ip, mac, config.gateway_ip);
        NetworkContext {
            device,
            clock,
            config,
            mac,
            arp_cache: ArpCache::new(),
            next_port: config.ephemeral_port_base,
            tx_buffer: [0; MAX_PACKET_SIZE],
            rx_buffer: [0; MAX_PACKET_SIZE],
        }
    }

    /// Create a socket towards `destination_ip:destination_port`.
    ///
    /// Nothing is sent; the destination MAC is resolved on first use.
    pub fn socket_init(
        &mut self,
        destination_ip: Address,
        destination_port: u16,
        ip_protocol: IpProtocol,
    ) -> Socket {
        let port = self.next_port;
        self.next_port = match self.next_port.checked_add(1) {
            Some(next) => next,
            None => self.config.ephemeral_port_base,
        };
        Socket::new(port, destination_ip, destination_port, ip_protocol)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mac_address(&self) -> MacAddress {
        self.mac
    }

    pub fn arp_cache(&self) -> &ArpCache {
        &self.arp_cache
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// MAC address to put on frames for `socket`, resolving it if needed.
    fn destination_mac(&mut self, socket: &mut Socket) -> crate::Result<MacAddress> {
        if let Some(mac) = socket.destination_mac {
            return Ok(mac);
        }
        // limited broadcast never leaves the link
        let mac = if socket.destination_ip.is_broadcast() {
            MacAddress::BROADCAST
        } else {
            let next_hop = self.config.next_hop(socket.destination_ip);
            self.resolve(next_hop)?
        };
        socket.destination_mac = Some(mac);
        Ok(mac)
    }

    fn transmit(&mut self, len: usize) -> crate::Result<()> {
        self.device
            .transmit(&self.tx_buffer[..len])
            .map_err(|err| {
                log::warn!("net: transmit of {} octets failed: {}", len, err);
                crate::Error::Transmit
            })
    }
}
