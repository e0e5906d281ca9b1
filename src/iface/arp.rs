use log::{debug, trace, warn};

use crate::phy::{
    Clock,
    Deadline,
    Device,
    MAX_PACKET_SIZE,
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
use crate::protocol::ip::ipv4::Address;
use crate::{
    Error,
    Result,
};

use super::NetworkContext;

pub const ARP_CACHE_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip_address: Address,
    pub mac_address: MacAddress,
}

/// Fixed-size IPv4 to MAC table.
///
/// Holds at most one entry per IP address. Once full, every insertion of a
/// new address evicts the oldest one.
#[derive(Debug)]
pub struct ArpCache {
    entries: [Option<ArpEntry>; ARP_CACHE_SIZE],
    next_victim: usize,
}

impl ArpCache {
    pub fn new() -> ArpCache {
        ArpCache {
            entries: [None; ARP_CACHE_SIZE],
            next_victim: 0,
        }
    }

    pub fn lookup(&self, ip_address: Address) -> Option<MacAddress> {
        self.entries
            .iter()
            .flatten()
            .find(|entry| entry.ip_address == ip_address)
            .map(|entry| entry.mac_address)
    }

    /// Insert or refresh a binding, returning the entry it evicted, if any.
    pub fn insert(&mut self, ip_address: Address, mac_address: MacAddress) -> Option<ArpEntry> {
        let entry = ArpEntry { ip_address, mac_address };

        if let Some(slot) = self.entries
            .iter_mut()
            .flatten()
            .find(|slot| slot.ip_address == ip_address)
        {
            slot.mac_address = mac_address;
            return None;
        }

        if let Some(slot) = self.entries.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(entry);
            return None;
        }

        // Slots fill in index order and are never freed, so rotating the
        // victim index evicts in insertion order.
        let evicted = self.entries[self.next_victim].replace(entry);
        self.next_victim = (self.next_victim + 1) % ARP_CACHE_SIZE;
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArpEntry> {
        self.entries.iter().flatten()
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        ArpCache::new()
    }
}

/// What an ARP frame in the receive buffer turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ArpInput {
    /// A request for this host, which has been answered.
    Answered,
    /// A reply binding `.0` to `.1`.
    Reply(Address, MacAddress),
    /// Anything else.
    Ignored,
}

impl<D: Device, C: Clock> NetworkContext<D, C> {
    /// Find the MAC address of `ip_address` on the local link.
    ///
    /// Answers from the cache when possible. Otherwise broadcasts up to
    /// `arp_attempts` requests, waiting `arp_attempt_ms` for each reply.
    pub fn resolve(&mut self, ip_address: Address) -> Result<MacAddress> {
        if let Some(mac) = self.arp_cache.lookup(ip_address) {
            return Ok(mac);
        }

        for attempt in 1..=self.config.arp_attempts {
            self.send_arp(
                Operation::Request,
                MacAddress::BROADCAST,
                MacAddress::UNSPECIFIED,
                ip_address,
            )?;

            let deadline = Deadline::after(&self.clock, self.config.arp_attempt_ms);
            while !deadline.expired(&self.clock) {
                if !self.device.available() {
                    continue;
                }
                let len = match self.device.receive(&mut self.rx_buffer) {
                    Ok(len) => len.min(MAX_PACKET_SIZE),
                    Err(err) => {
                        trace!("arp: lost a frame while resolving {}: {}", ip_address, err);
                        continue;
                    }
                };
                match self.process_arp(len) {
                    ArpInput::Reply(sender, mac) if sender == ip_address => {
                        if let Some(evicted) = self.arp_cache.insert(ip_address, mac) {
                            trace!("arp: evicted {} ({})", evicted.ip_address, evicted.mac_address);
                        }
                        debug!("arp: {} is at {}", ip_address, mac);
                        return Ok(mac);
                    }
                    _ => (),
                }
            }
            trace!("arp: no reply for {} (attempt {})", ip_address, attempt);
        }

        warn!("arp: could not resolve {}", ip_address);
        Err(Error::Unaddressable)
    }

    /// Broadcast a gratuitous ARP request for this host's own address.
    pub fn announce(&mut self) -> Result<()> {
        let local_ip = self.config.local_ip;
        self.send_arp(
            Operation::Request,
            MacAddress::BROADCAST,
            MacAddress::UNSPECIFIED,
            local_ip,
        )
    }

    /// Look at the frame of `len` octets in the receive buffer, answering it
    /// if it is an ARP request for this host.
    pub(super) fn process_arp(&mut self, len: usize) -> ArpInput {
        let (operation, sender_ip, sender_mac, target_ip) = {
            let frame = match Frame::new_checked(&self.rx_buffer[..len]) {
                Ok(frame) => frame,
                Err(_) => return ArpInput::Ignored,
            };
            if frame.ether_type() != EtherType::ARP {
                return ArpInput::Ignored;
            }
            let packet = match arp::Packet::new_checked(frame.payload()) {
                Ok(packet) => packet,
                Err(_) => return ArpInput::Ignored,
            };
            if !packet.is_ethernet_ipv4() {
                return ArpInput::Ignored;
            }
            (
                packet.operation(),
                packet.source_protocol_addr(),
                packet.source_hardware_addr(),
                packet.target_protocol_addr(),
            )
        };

        match operation {
            Operation::Request if target_ip == self.config.local_ip => {
                trace!("arp: {} ({}) asks for us", sender_ip, sender_mac);
                if let Err(err) = self.send_arp(Operation::Reply, sender_mac, sender_mac, sender_ip) {
                    warn!("arp: reply to {} failed: {}", sender_ip, err);
                }
                ArpInput::Answered
            }
            Operation::Reply => ArpInput::Reply(sender_ip, sender_mac),
            _ => ArpInput::Ignored,
        }
    }

    fn send_arp(
        &mut self,
        operation: Operation,
        ethernet_dst: MacAddress,
        target_mac: MacAddress,
        target_ip: Address,
    ) -> Result<()> {
        let len = ethernet::HEADER_LEN + arp::PACKET_LEN;
        let mut frame = Frame::new_unchecked(&mut self.tx_buffer[..len]);
        frame.set_dst_addr(ethernet_dst);
        frame.set_src_addr(self.mac);
        frame.set_ether_type(EtherType::ARP);

        let mut packet = arp::Packet::new_unchecked(frame.payload_mut());
        packet.emit(operation, self.mac, self.config.local_ip, target_mac, target_ip);

        self.transmit(len)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dev::{
        arp_request,
        arp_responder,
        parse_arp,
        MockDevice,
        StepClock,
        GATEWAY_IP,
        LOCAL_IP,
        LOCAL_MAC,
        PEER_IP,
        PEER_MAC,
    };
    use crate::iface::network_init;

    fn mac(last: u8) -> MacAddress {
        MacAddress([0x02, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_cache_insert_lookup() {
        let mut cache = ArpCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.insert(PEER_IP, PEER_MAC), None);
        assert_eq!(cache.lookup(PEER_IP), Some(PEER_MAC));
        assert_eq!(cache.lookup(GATEWAY_IP), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_one_entry_per_address() {
        let mut cache = ArpCache::new();
        cache.insert(PEER_IP, PEER_MAC);
        cache.insert(PEER_IP, mac(9));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(PEER_IP), Some(mac(9)));
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let mut cache = ArpCache::new();
        for i in 0..ARP_CACHE_SIZE as u8 {
            assert_eq!(cache.insert(Address::new(10, 0, 1, i), mac(i)), None);
        }
        assert_eq!(cache.len(), ARP_CACHE_SIZE);

        let evicted = cache.insert(Address::new(10, 0, 2, 0), mac(100));
        assert_eq!(evicted, Some(ArpEntry { ip_address: Address::new(10, 0, 1, 0), mac_address: mac(0) }));
        let evicted = cache.insert(Address::new(10, 0, 2, 1), mac(101));
        assert_eq!(evicted.map(|e| e.ip_address), Some(Address::new(10, 0, 1, 1)));

        assert_eq!(cache.len(), ARP_CACHE_SIZE);
        assert_eq!(cache.lookup(Address::new(10, 0, 1, 0)), None);
        assert_eq!(cache.lookup(Address::new(10, 0, 2, 0)), Some(mac(100)));
        assert_eq!(cache.lookup(Address::new(10, 0, 1, 2)), Some(mac(2)));
    }

    #[test]
    fn test_resolve_then_cache_hit() {
        let device = MockDevice::with_responder(arp_responder(PEER_IP, PEER_MAC));
        let mut ctx = network_init(device, StepClock::new(0, 1), LOCAL_IP, GATEWAY_IP);

        assert_eq!(ctx.resolve(PEER_IP), Ok(PEER_MAC));
        assert_eq!(ctx.device().sent.len(), 1);

        let request = parse_arp(&ctx.device().sent[0]).unwrap();
        assert_eq!(request.ethernet_dst, MacAddress::BROADCAST);
        assert_eq!(request.operation, Operation::Request);
        assert_eq!(request.sender_mac, LOCAL_MAC);
        assert_eq!(request.sender_ip, LOCAL_IP);
        assert_eq!(request.target_ip, PEER_IP);

        assert_eq!(ctx.resolve(PEER_IP), Ok(PEER_MAC));
        assert_eq!(ctx.device().sent.len(), 1);
        assert_eq!(ctx.arp_cache().lookup(PEER_IP), Some(PEER_MAC));
    }

    #[test]
    fn test_resolve_gives_up() {
        let mut ctx = network_init(MockDevice::new(), StepClock::new(0, 1), LOCAL_IP, GATEWAY_IP);
        assert_eq!(ctx.resolve(PEER_IP), Err(Error::Unaddressable));
        assert_eq!(ctx.device().sent.len(), 5);
        assert!(ctx.arp_cache().is_empty());
    }

    #[test]
    fn test_resolve_survives_receive_errors() {
        let mut device = MockDevice::with_responder(arp_responder(PEER_IP, PEER_MAC));
        device.fail_receives = 1;
        let mut ctx = network_init(device, StepClock::new(0, 1), LOCAL_IP, GATEWAY_IP);
        assert_eq!(ctx.resolve(PEER_IP), Ok(PEER_MAC));
        assert_eq!(ctx.device().sent.len(), 2);

        let mut device = MockDevice::with_responder(arp_responder(PEER_IP, PEER_MAC));
        device.fail_receives = usize::MAX;
        let mut ctx = network_init(device, StepClock::new(0, 1), LOCAL_IP, GATEWAY_IP);
        assert_eq!(ctx.resolve(PEER_IP), Err(Error::Unaddressable));
        assert_eq!(ctx.device().sent.len(), 5);
        assert!(ctx.arp_cache().is_empty());
    }

    #[test]
    fn test_resolve_oversized_length() {
        let mut device = MockDevice::with_responder(arp_responder(PEER_IP, PEER_MAC));
        device.reported_len = Some(MAX_PACKET_SIZE * 2);
        let mut ctx = network_init(device, StepClock::new(0, 1), LOCAL_IP, GATEWAY_IP);
        assert_eq!(ctx.resolve(PEER_IP), Ok(PEER_MAC));
    }

    #[test]
    fn test_resolve_ignores_other_replies() {
        let device = MockDevice::with_responder(arp_responder(GATEWAY_IP, PEER_MAC));
        let mut ctx = network_init(device, StepClock::new(0, 1), LOCAL_IP, GATEWAY_IP);
        assert_eq!(ctx.resolve(PEER_IP), Err(Error::Unaddressable));
    }

    #[test]
    fn test_resolve_transmit_failure() {
        let mut device = MockDevice::new();
        device.fail_transmit_after = Some(0);
        let mut ctx = network_init(device, StepClock::new(0, 1), LOCAL_IP, GATEWAY_IP);
        assert_eq!(ctx.resolve(PEER_IP), Err(Error::Transmit));
    }

    #[test]
    fn test_answer_request_while_resolving() {
        let mut device = MockDevice::with_responder(arp_responder(PEER_IP, PEER_MAC));
        device.inbox.push_back(arp_request(GATEWAY_IP, mac(1), LOCAL_IP));
        let mut ctx = network_init(device, StepClock::new(0, 1), LOCAL_IP, GATEWAY_IP);

        // The queued request is seen before the reply to our own request.
        assert_eq!(ctx.resolve(PEER_IP), Ok(PEER_MAC));
        let sent = &ctx.device().sent;
        assert_eq!(sent.len(), 2);
        let reply = parse_arp(&sent[1]).unwrap();
        assert_eq!(reply.operation, Operation::Reply);
        assert_eq!(reply.ethernet_dst, mac(1));
        assert_eq!(reply.sender_mac, LOCAL_MAC);
        assert_eq!(reply.sender_ip, LOCAL_IP);
        assert_eq!(reply.target_mac, mac(1));
        assert_eq!(reply.target_ip, GATEWAY_IP);
    }

    #[test]
    fn test_request_for_other_host_not_answered() {
        let mut device = MockDevice::new();
        device.inbox.push_back(arp_request(GATEWAY_IP, mac(1), PEER_IP));
        let mut ctx = network_init(device, StepClock::new(0, 1), LOCAL_IP, GATEWAY_IP);
        let len = {
            let frame = ctx.device.inbox.pop_front().unwrap();
            ctx.rx_buffer[..frame.len()].copy_from_slice(&frame);
            frame.len()
        };
        assert_eq!(ctx.process_arp(len), ArpInput::Ignored);
        assert!(ctx.device().sent.is_empty());
    }

    #[test]
    fn test_announce() {
        let mut ctx = network_init(MockDevice::new(), StepClock::new(0, 1), LOCAL_IP, GATEWAY_IP);
        ctx.announce().unwrap();
        let announcement = parse_arp(&ctx.device().sent[0]).unwrap();
        assert_eq!(announcement.ethernet_dst, MacAddress::BROADCAST);
        assert_eq!(announcement.sender_ip, LOCAL_IP);
        assert_eq!(announcement.target_ip, LOCAL_IP);
    }
}
