use log::{trace, warn};

use crate::phy::{
    Clock,
    Device,
};
use crate::protocol::icmp::icmpv4::{
    self,
    Message,
};
use crate::protocol::ip::Protocol;

use super::ip::Received;
use super::NetworkContext;

impl<D: Device, C: Clock> NetworkContext<D, C> {
    /// Answer an echo request sitting in the receive buffer.
    ///
    /// The reply goes straight back to the MAC the request came from, so no
    /// ARP lookup is needed. Returns whether the packet was an echo request.
    pub(super) fn process_icmp(&mut self, received: &Received) -> bool {
        {
            let request = match icmpv4::Packet::new_checked(&self.rx_buffer[received.payload.clone()]) {
                Ok(packet) => packet,
                Err(_) => return false,
            };
            if request.msg_type() != Message::EchoRequest || !request.verify_checksum() {
                return false;
            }
            trace!("icmp: echo request {} from {}", request.echo_seq_no(), received.src_addr);
        }

        let range = match self.emit_ip(
            received.src_mac,
            received.src_addr,
            Protocol::ICMP,
            received.payload.len(),
        ) {
            Ok(range) => range,
            Err(err) => {
                warn!("icmp: cannot answer {}: {}", received.src_addr, err);
                return true;
            }
        };
        self.tx_buffer[range.clone()].copy_from_slice(&self.rx_buffer[received.payload.clone()]);

        let mut reply = icmpv4::Packet::new_unchecked(&mut self.tx_buffer[range.clone()]);
        reply.set_msg_type(Message::EchoReply);
        reply.set_msg_code(0);
        reply.fill_checksum();

        if let Err(err) = self.transmit(range.end) {
            warn!("icmp: echo reply to {} failed: {}", received.src_addr, err);
        }
        true
    }
}
