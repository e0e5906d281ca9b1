use log::trace;

use crate::phy::{
    Clock,
    Device,
    MAX_PACKET_SIZE,
};
use crate::protocol::ethernet::{
    self,
    Address as MacAddress,
    EtherType,
    Frame,
};
use crate::protocol::ip::{
    ipv4::{
        self,
        Address,
    },
    Protocol,
    Version,
};
use crate::socket::Socket;
use crate::{
    Error,
    Field,
    Result,
};

use super::arp::ArpInput;
use super::{
    Mode,
    NetworkContext,
    Poll,
};

/// Largest payload a single unfragmented packet can carry.
pub const MAX_IP_PAYLOAD: usize = MAX_PACKET_SIZE - ethernet::HEADER_LEN - ipv4::HEADER_LEN;

/// An accepted packet. `payload` indexes the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Received {
    pub src_mac: MacAddress,
    pub src_addr: Address,
    pub protocol: Protocol,
    pub payload: Field,
}

impl<D: Device, C: Clock> NetworkContext<D, C> {
    /// Lay out the Ethernet and IPv4 headers for a packet of `payload_len`
    /// octets in the transmit buffer, returning where the payload goes.
    pub(super) fn emit_ip(
        &mut self,
        dst_mac: MacAddress,
        dst_addr: Address,
        protocol: Protocol,
        payload_len: usize,
    ) -> Result<Field> {
        if payload_len > MAX_IP_PAYLOAD {
            return Err(Error::Exhausted);
        }
        let ip_len = ipv4::HEADER_LEN + payload_len;
        let frame_len = ethernet::HEADER_LEN + ip_len;

        let mut frame = Frame::new_unchecked(&mut self.tx_buffer[..frame_len]);
        frame.set_dst_addr(dst_mac);
        frame.set_src_addr(self.mac);
        frame.set_ether_type(EtherType::IPv4);

        let mut packet = ipv4::Packet::new_unchecked(frame.payload_mut());
        packet.set_version(4);
        packet.set_header_len(ipv4::HEADER_LEN as u8);
        packet.set_dscp(0);
        packet.set_ecn(0);
        packet.set_total_len(ip_len as u16);
        packet.set_ident(0);
        packet.clear_flags();
        packet.set_hop_limit(self.config.ttl);
        packet.set_protocol(protocol);
        packet.set_src_addr(self.config.local_ip);
        packet.set_dst_addr(dst_addr);
        packet.fill_checksum();

        Ok(frame_len - payload_len..frame_len)
    }

    /// Send `payload` as one IPv4 packet to `dst_addr` via `dst_mac`.
    pub(super) fn send_ip(
        &mut self,
        dst_mac: MacAddress,
        dst_addr: Address,
        protocol: Protocol,
        payload: &[u8],
    ) -> Result<()> {
        let range = self.emit_ip(dst_mac, dst_addr, protocol, payload.len())?;
        self.tx_buffer[range.clone()].copy_from_slice(payload);
        self.transmit(range.end)
    }

    /// Send `payload` to the socket's peer, tagged with the socket's protocol.
    ///
    /// The socket must already know the MAC address of its next hop.
    pub fn ip_send(&mut self, socket: &Socket, payload: &[u8]) -> Result<()> {
        let dst_mac = socket.destination_mac.ok_or(Error::Unaddressable)?;
        self.send_ip(dst_mac, socket.destination_ip, socket.ip_protocol.into(), payload)
    }

    /// Copy the payload of the next acceptable packet carrying the socket's
    /// protocol into `buffer`.
    pub fn ip_receive(
        &mut self,
        socket: &Socket,
        buffer: &mut [u8],
        mode: Mode,
    ) -> Result<Poll<usize>> {
        let received = match self.receive_ip(socket.ip_protocol.into(), mode)? {
            Poll::Ready(received) => received,
            Poll::Handled => return Ok(Poll::Handled),
            Poll::Discarded => return Ok(Poll::Discarded),
            Poll::Empty => return Ok(Poll::Empty),
        };

        let len = received.payload.len();
        if len > buffer.len() {
            return Err(Error::Exhausted);
        }
        buffer[..len].copy_from_slice(&self.rx_buffer[received.payload]);
        Ok(Poll::Ready(len))
    }

    /// Pull frames until one is an acceptable `protocol` packet, or at most
    /// one frame in non-blocking mode.
    pub(super) fn receive_ip(&mut self, protocol: Protocol, mode: Mode) -> Result<Poll<Received>> {
        match mode {
            Mode::Blocking => loop {
                let len = self.device.receive(&mut self.rx_buffer)?;
                if let Poll::Ready(received) = self.accept(len, protocol) {
                    return Ok(Poll::Ready(received));
                }
            },
            Mode::NonBlocking => {
                if !self.device.available() {
                    return Ok(Poll::Empty);
                }
                let len = self.device.receive(&mut self.rx_buffer)?;
                Ok(self.accept(len, protocol))
            }
        }
    }

    /// Decide what to do with the frame of `len` octets in the receive
    /// buffer. ARP requests and pings for this host are answered here,
    /// whatever the caller is waiting for.
    fn accept(&mut self, len: usize, protocol: Protocol) -> Poll<Received> {
        let len = len.min(MAX_PACKET_SIZE);
        let ether_type = match Frame::new_checked(&self.rx_buffer[..len]) {
            Ok(frame) => frame.ether_type(),
            Err(_) => {
                trace!("ip: runt frame of {} octets", len);
                return Poll::Discarded;
            }
        };

        match ether_type {
            EtherType::ARP => match self.process_arp(len) {
                ArpInput::Answered => Poll::Handled,
                _ => Poll::Discarded,
            },
            EtherType::IPv4 => match self.validate(len) {
                Ok(received) => {
                    if received.protocol == protocol {
                        Poll::Ready(received)
                    } else if received.protocol == Protocol::ICMP && self.process_icmp(&received) {
                        Poll::Handled
                    } else {
                        trace!("ip: {:?} packet from {} while expecting {:?}",
                               received.protocol, received.src_addr, protocol);
                        Poll::Discarded
                    }
                }
                Err(err) => {
                    trace!("ip: dropped packet: {}", err);
                    Poll::Discarded
                }
            },
            _ => Poll::Discarded,
        }
    }

    /// Check an IPv4 frame against the rules every accepted packet obeys.
    fn validate(&self, len: usize) -> Result<Received> {
        let frame = Frame::new_checked(&self.rx_buffer[..len])?;
        if Version::of_packet(frame.payload())? != Version::IPv4 {
            return Err(Error::Unrecognized);
        }
        let packet = ipv4::Packet::new_checked(frame.payload())?;
        if !packet.verify_checksum() {
            return Err(Error::Checksum);
        }
        if packet.is_fragment() {
            return Err(Error::Fragmented);
        }
        if packet.dst_addr() != self.config.local_ip {
            return Err(Error::Dropped);
        }

        let start = ethernet::HEADER_LEN + packet.header_len() as usize;
        let end = ethernet::HEADER_LEN + packet.total_len() as usize;
        Ok(Received {
            src_mac: frame.src_addr(),
            src_addr: packet.src_addr(),
            protocol: packet.protocol(),
            payload: start..end,
        })
    }
}
