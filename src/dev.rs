//! Test fixtures: a scripted NIC, a stepping clock, and builders and
//! parsers for the frames a peer would exchange with us.

use std::cell::Cell;
use std::collections::VecDeque;

use rawsock::open_best_library;

use crate::phy::{
    Clock,
    Device,
};
use crate::protocol::arp::{
    self,
    Operation,
};
use crate::protocol::ethernet::{
    self,
    Address as MacAddress,
    EtherType,
    Frame,
};
use crate::protocol::icmp::icmpv4::{
    self,
    Message,
};
use crate::protocol::ip::{
    ipv4::{
        self,
        Address,
    },
    Protocol,
};
use crate::protocol::tcp::{
    self,
    Flags,
};
use crate::{
    Error,
    Result,
};

pub const DST_MAC: [u8; 6] = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff];

pub const LOCAL_IP: Address = Address::new(10, 0, 0, 2);
pub const GATEWAY_IP: Address = Address::new(10, 0, 0, 1);
pub const PEER_IP: Address = Address::new(10, 0, 0, 5);

pub const LOCAL_MAC: MacAddress = MacAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
pub const PEER_MAC: MacAddress = MacAddress([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

const MIN_FRAME_LEN: usize = 60;

/// MAC address of the machine running the tests.
pub fn src_mac() -> MacAddress {
    match mac_address::get_mac_address() {
        Ok(Some(addr)) => MacAddress(addr.bytes()),
        _ => LOCAL_MAC,
    }
}

/// Put `data` on the wire of `eth0`, if there is one and we may use it.
pub fn send_raw_socket(data: &[u8]) {
    let interf_name = "eth0";
    let lib = match open_best_library() {
        Ok(lib) => lib,
        Err(_) => return,
    };
    if let Ok(interf) = lib.open_interface(&interf_name) {
        for _ in 0..5 {
            if interf.send(data).is_err() {
                break;
            }
        }
    };
}

/// A clock that moves `step` milliseconds forward on every read.
pub struct StepClock {
    now: Cell<u32>,
    step: u32,
}

impl StepClock {
    pub fn new(start: u32, step: u32) -> StepClock {
        StepClock { now: Cell::new(start), step }
    }
}

impl Clock for StepClock {
    fn now_ms(&self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.step));
        now
    }
}

pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>>>;

/// An in-memory NIC. Everything transmitted lands in `sent`; `receive`
/// drains `inbox`, which an optional responder refills as frames go out.
pub struct MockDevice {
    pub sent: Vec<Vec<u8>>,
    pub inbox: VecDeque<Vec<u8>>,
    pub responder: Option<Responder>,
    /// Fail every transmission once this many frames have been sent.
    pub fail_transmit_after: Option<usize>,
    /// Drop this many incoming frames, failing the receive of each.
    pub fail_receives: usize,
    /// Length to report for every received frame instead of the real one.
    pub reported_len: Option<usize>,
}

impl MockDevice {
    pub fn new() -> MockDevice {
        MockDevice {
            sent: Vec::new(),
            inbox: VecDeque::new(),
            responder: None,
            fail_transmit_after: None,
            fail_receives: 0,
            reported_len: None,
        }
    }

    pub fn with_responder<F>(responder: F) -> MockDevice
        where F: FnMut(&[u8]) -> Vec<Vec<u8>> + 'static
    {
        MockDevice {
            responder: Some(Box::new(responder)),
            ..MockDevice::new()
        }
    }
}

impl Device for MockDevice {
    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        if let Some(limit) = self.fail_transmit_after {
            if self.sent.len() >= limit {
                return Err(Error::Transmit);
            }
        }
        self.sent.push(frame.to_vec());
        if let Some(responder) = self.responder.as_mut() {
            let replies = responder(frame);
            self.inbox.extend(replies);
        }
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let frame = self.inbox.pop_front().ok_or(Error::Exhausted)?;
        if self.fail_receives > 0 {
            self.fail_receives -= 1;
            return Err(Error::Exhausted);
        }
        let len = frame.len().min(buffer.len());
        buffer[..len].copy_from_slice(&frame[..len]);
        Ok(self.reported_len.unwrap_or(len))
    }

    fn available(&mut self) -> bool {
        !self.inbox.is_empty()
    }

    fn mac_address(&self) -> MacAddress {
        LOCAL_MAC
    }
}

fn frame(dst: MacAddress, src: MacAddress, ether_type: EtherType, payload: &[u8]) -> Vec<u8> {
    let len = ethernet::HEADER_LEN + payload.len();
    let mut bytes = vec![0; len.max(MIN_FRAME_LEN)];
    let mut frame = Frame::new_unchecked(&mut bytes[..]);
    frame.set_dst_addr(dst);
    frame.set_src_addr(src);
    frame.set_ether_type(ether_type);
    frame.payload_mut()[..payload.len()].copy_from_slice(payload);
    bytes
}

fn arp_frame(
    operation: Operation,
    ethernet_dst: MacAddress,
    sender_mac: MacAddress,
    sender_ip: Address,
    target_mac: MacAddress,
    target_ip: Address,
) -> Vec<u8> {
    let mut bytes = [0; arp::PACKET_LEN];
    arp::Packet::new_unchecked(&mut bytes[..])
        .emit(operation, sender_mac, sender_ip, target_mac, target_ip);
    frame(ethernet_dst, sender_mac, EtherType::ARP, &bytes)
}

/// A broadcast ARP request from `sender_ip` asking for `target_ip`.
pub fn arp_request(sender_ip: Address, sender_mac: MacAddress, target_ip: Address) -> Vec<u8> {
    arp_frame(Operation::Request, MacAddress::BROADCAST, sender_mac, sender_ip,
              MacAddress::UNSPECIFIED, target_ip)
}

pub fn arp_reply(
    sender_ip: Address,
    sender_mac: MacAddress,
    target_ip: Address,
    target_mac: MacAddress,
) -> Vec<u8> {
    arp_frame(Operation::Reply, target_mac, sender_mac, sender_ip, target_mac, target_ip)
}

/// A host at `ip`/`mac` answering ARP requests for its address.
pub fn arp_responder(ip: Address, mac: MacAddress) -> impl FnMut(&[u8]) -> Vec<Vec<u8>> {
    move |frame: &[u8]| answer_arp(frame, ip, mac).into_iter().collect::<Vec<_>>()
}

fn answer_arp(frame: &[u8], ip: Address, mac: MacAddress) -> Option<Vec<u8>> {
    let request = parse_arp(frame)?;
    if request.operation == Operation::Request && request.target_ip == ip {
        Some(arp_reply(ip, mac, request.sender_ip, request.sender_mac))
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpFrame {
    pub ethernet_dst: MacAddress,
    pub operation: Operation,
    pub sender_mac: MacAddress,
    pub sender_ip: Address,
    pub target_mac: MacAddress,
    pub target_ip: Address,
}

pub fn parse_arp(bytes: &[u8]) -> Option<ArpFrame> {
    let frame = Frame::new_checked(bytes).ok()?;
    if frame.ether_type() != EtherType::ARP {
        return None;
    }
    let packet = arp::Packet::new_checked(frame.payload()).ok()?;
    Some(ArpFrame {
        ethernet_dst: frame.dst_addr(),
        operation: packet.operation(),
        sender_mac: packet.source_hardware_addr(),
        sender_ip: packet.source_protocol_addr(),
        target_mac: packet.target_hardware_addr(),
        target_ip: packet.target_protocol_addr(),
    })
}

/// A well-formed IPv4 packet in an Ethernet frame, padded to the minimum
/// frame size.
pub fn ipv4_frame(
    src_mac: MacAddress,
    dst_mac: MacAddress,
    src_ip: Address,
    dst_ip: Address,
    protocol: Protocol,
    payload: &[u8],
) -> Vec<u8> {
    let total_len = ipv4::HEADER_LEN + payload.len();
    let mut bytes = vec![0; total_len];
    {
        let mut packet = ipv4::Packet::new_unchecked(&mut bytes[..]);
        packet.set_version(4);
        packet.set_header_len(ipv4::HEADER_LEN as u8);
        packet.set_total_len(total_len as u16);
        packet.set_ident(0x1234);
        packet.clear_flags();
        packet.set_dont_frag(true);
        packet.set_hop_limit(64);
        packet.set_protocol(protocol);
        packet.set_src_addr(src_ip);
        packet.set_dst_addr(dst_ip);
        packet.payload_mut().copy_from_slice(payload);
        packet.fill_checksum();
    }
    frame(dst_mac, src_mac, EtherType::IPv4, &bytes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub protocol: Protocol,
    pub hop_limit: u8,
}

/// Destination MAC, header fields and payload of an IPv4 frame with a
/// valid header checksum.
pub fn parse_ipv4(bytes: &[u8]) -> Option<(MacAddress, Ipv4Header, Vec<u8>)> {
    let frame = Frame::new_checked(bytes).ok()?;
    if frame.ether_type() != EtherType::IPv4 {
        return None;
    }
    let packet = ipv4::Packet::new_checked(frame.payload()).ok()?;
    if !packet.verify_checksum() {
        return None;
    }
    let header = Ipv4Header {
        src_addr: packet.src_addr(),
        dst_addr: packet.dst_addr(),
        protocol: packet.protocol(),
        hop_limit: packet.hop_limit(),
    };
    Some((frame.dst_addr(), header, packet.payload().to_vec()))
}

/// A segment from the peer to this host.
pub fn tcp_frame(
    src_port: u16,
    dst_port: u16,
    seq_number: u32,
    ack_number: u32,
    flags: Flags,
    payload: &[u8],
) -> Vec<u8> {
    let mut bytes = vec![0; tcp::HEADER_LEN + payload.len()];
    {
        let mut packet = tcp::Packet::new_unchecked(&mut bytes[..]);
        packet.set_src_port(src_port);
        packet.set_dst_port(dst_port);
        packet.set_seq_number(seq_number);
        packet.set_ack_number(ack_number);
        packet.set_header_len(tcp::HEADER_LEN as u8);
        packet.set_flags(flags);
        packet.set_window_len(8192);
        packet.payload_mut().copy_from_slice(payload);
        packet.fill_checksum(&PEER_IP, &LOCAL_IP);
    }
    ipv4_frame(PEER_MAC, LOCAL_MAC, PEER_IP, LOCAL_IP, Protocol::TCP, &bytes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_number: u32,
    pub ack_number: u32,
    pub flags: Flags,
    pub window_len: u16,
    pub payload: Vec<u8>,
    pub checksum_ok: bool,
}

pub fn parse_tcp(bytes: &[u8]) -> Option<TcpSegment> {
    let (_, header, segment) = parse_ipv4(bytes)?;
    if header.protocol != Protocol::TCP {
        return None;
    }
    let packet = tcp::Packet::new_checked(&segment[..]).ok()?;
    Some(TcpSegment {
        src_port: packet.src_port(),
        dst_port: packet.dst_port(),
        seq_number: packet.seq_number(),
        ack_number: packet.ack_number(),
        flags: packet.flags(),
        window_len: packet.window_len(),
        payload: packet.payload().to_vec(),
        checksum_ok: packet.verify_checksum(&header.src_addr, &header.dst_addr),
    })
}

/// The peer at `PEER_IP`: answers ARP, accepts connections with initial
/// sequence number `isn` and acknowledges every data segment.
pub fn tcp_peer(isn: u32) -> impl FnMut(&[u8]) -> Vec<Vec<u8>> {
    move |frame: &[u8]| {
        if let Some(reply) = answer_arp(frame, PEER_IP, PEER_MAC) {
            return vec![reply];
        }
        let segment = match parse_tcp(frame) {
            Some(segment) => segment,
            None => return vec![],
        };
        if segment.flags.contains(Flags::SYN) && !segment.flags.contains(Flags::ACK) {
            vec![tcp_frame(segment.dst_port, segment.src_port, isn,
                           segment.seq_number.wrapping_add(1), Flags::SYN | Flags::ACK, b"")]
        } else if !segment.payload.is_empty() {
            let ack_number = segment.seq_number.wrapping_add(segment.payload.len() as u32);
            vec![tcp_frame(segment.dst_port, segment.src_port, isn.wrapping_add(1),
                           ack_number, Flags::ACK, b"")]
        } else {
            vec![]
        }
    }
}

/// A ping from the peer.
pub fn echo_request(ident: u16, seq_no: u16, data: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0; icmpv4::HEADER_LEN + data.len()];
    {
        let mut packet = icmpv4::Packet::new_unchecked(&mut bytes[..]);
        packet.set_msg_type(Message::EchoRequest);
        packet.set_msg_code(0);
        packet.set_echo_ident(ident);
        packet.set_echo_seq_no(seq_no);
        packet.data_mut().copy_from_slice(data);
        packet.fill_checksum();
    }
    ipv4_frame(PEER_MAC, LOCAL_MAC, PEER_IP, LOCAL_IP, Protocol::ICMP, &bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_step_clock() {
        let clock = StepClock::new(u32::max_value(), 2);
        assert_eq!(clock.now_ms(), u32::max_value());
        assert_eq!(clock.now_ms(), 1);
    }

    #[test]
    fn test_mock_device() {
        let mut device = MockDevice::with_responder(arp_responder(PEER_IP, PEER_MAC));
        device.transmit(&arp_request(LOCAL_IP, LOCAL_MAC, PEER_IP)).unwrap();
        assert_eq!(device.sent.len(), 1);
        assert!(device.available());

        let mut buffer = [0; 128];
        let len = device.receive(&mut buffer).unwrap();
        assert_eq!(len, MIN_FRAME_LEN);
        let reply = parse_arp(&buffer[..len]).unwrap();
        assert_eq!(reply.operation, Operation::Reply);
        assert_eq!(reply.sender_mac, PEER_MAC);
        assert_eq!(reply.target_ip, LOCAL_IP);
        assert_eq!(device.receive(&mut buffer), Err(Error::Exhausted));
    }
}
