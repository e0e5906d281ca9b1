use log::{debug, trace, warn};

use crate::phy::{
    Clock,
    Deadline,
    Device,
};
use crate::protocol::ip::Protocol;
use crate::protocol::tcp::{
    self,
    Flags,
};
use crate::socket::{
    IpProtocol,
    Socket,
    TcpState,
};
use crate::{
    Error,
    Field,
    Result,
};

use super::ip::{
    Received,
    MAX_IP_PAYLOAD,
};
use super::{
    Mode,
    NetworkContext,
    Poll,
};

/// Largest payload a single segment can carry. Also the window we advertise.
pub const MAX_SEGMENT_SIZE: usize = MAX_IP_PAYLOAD - tcp::HEADER_LEN;

/// A segment for one of our sockets. `payload` indexes the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    seq_number: u32,
    ack_number: u32,
    flags: Flags,
    payload: Field,
}

impl<D: Device, C: Clock> NetworkContext<D, C> {
    /// Open a connection with the three-way handshake.
    ///
    /// Our initial sequence number is always zero. On success the socket
    /// holds the numbers for its first data segment.
    pub fn tcp_connect(&mut self, socket: &mut Socket) -> Result<()> {
        if socket.ip_protocol != IpProtocol::Tcp || socket.tcp_connection_established() {
            return Err(Error::Illegal);
        }
        self.destination_mac(socket)?;

        socket.tcp_sequence_number = 0;
        socket.tcp_acknowledgment_number = 0;
        self.send_segment(socket, 0, 0, Flags::SYN, &[])?;
        socket.tcp_state = TcpState::SynSent;

        let timeout = self.config.tcp_connect_timeout_ms;
        let reply = match self.await_segment(socket, timeout, |segment| {
            segment.flags.contains(Flags::SYN | Flags::ACK)
        }) {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                warn!("tcp: no answer from {}:{}", socket.destination_ip, socket.destination_port);
                socket.tcp_state = TcpState::Closed;
                return Err(Error::Timeout);
            }
            Err(err) => {
                socket.tcp_state = TcpState::Closed;
                return Err(err);
            }
        };

        let seq_number = reply.ack_number;
        let ack_number = reply.seq_number.wrapping_add(1);
        if let Err(err) = self.send_segment(socket, seq_number, ack_number, Flags::ACK, &[]) {
            socket.tcp_state = TcpState::Closed;
            return Err(err);
        }

        socket.tcp_sequence_number = seq_number;
        socket.tcp_acknowledgment_number = ack_number;
        socket.tcp_state = TcpState::Established;
        debug!("tcp: {} -> {}:{} established",
               socket.source_port, socket.destination_ip, socket.destination_port);
        Ok(())
    }

    /// Send `payload` as one segment and wait for it to be acknowledged.
    ///
    /// There is no retransmission: a missing acknowledgment is reported and
    /// the sequence number stays where it was.
    pub fn tcp_send(&mut self, socket: &mut Socket, payload: &[u8]) -> Result<()> {
        if !socket.tcp_connection_established() {
            return Err(Error::NotEstablished);
        }
        if payload.len() > MAX_SEGMENT_SIZE {
            return Err(Error::Exhausted);
        }

        self.send_segment(
            socket,
            socket.tcp_sequence_number,
            socket.tcp_acknowledgment_number,
            Flags::ACK | Flags::PSH,
            payload,
        )?;

        let timeout = self.config.tcp_ack_timeout_ms;
        match self.await_segment(socket, timeout, |segment| segment.flags.contains(Flags::ACK))? {
            Some(reply) => {
                debug!("tcp: {} acknowledged up to {}", socket.destination_ip, reply.ack_number);
                socket.tcp_sequence_number = reply.ack_number;
                Ok(())
            }
            None => {
                warn!("tcp: {} octets to {} unacknowledged", payload.len(), socket.destination_ip);
                Err(Error::Unacknowledged)
            }
        }
    }

    /// Receive the next in-order data segment into `buffer`, acknowledging it.
    pub fn tcp_receive(
        &mut self,
        socket: &mut Socket,
        buffer: &mut [u8],
        mode: Mode,
    ) -> Result<Poll<usize>> {
        if !socket.tcp_connection_established() {
            return Err(Error::NotEstablished);
        }

        loop {
            let segment = match self.receive_segment(socket, mode)? {
                Poll::Ready(segment) => segment,
                Poll::Handled => return Ok(Poll::Handled),
                Poll::Discarded => return Ok(Poll::Discarded),
                Poll::Empty => return Ok(Poll::Empty),
            };

            if segment.payload.is_empty() {
                trace!("tcp: bare segment, ack {}", segment.ack_number);
            } else if segment.seq_number != socket.tcp_acknowledgment_number {
                trace!("tcp: out of order seq {}, expected {}",
                       segment.seq_number, socket.tcp_acknowledgment_number);
                self.send_segment(
                    socket,
                    socket.tcp_sequence_number,
                    socket.tcp_acknowledgment_number,
                    Flags::ACK,
                    &[],
                )?;
            } else {
                let len = segment.payload.len();
                if len > buffer.len() {
                    return Err(Error::Exhausted);
                }
                buffer[..len].copy_from_slice(&self.rx_buffer[segment.payload]);
                socket.tcp_acknowledgment_number =
                    socket.tcp_acknowledgment_number.wrapping_add(len as u32);
                self.send_segment(
                    socket,
                    socket.tcp_sequence_number,
                    socket.tcp_acknowledgment_number,
                    Flags::ACK,
                    &[],
                )?;
                return Ok(Poll::Ready(len));
            }

            if mode == Mode::NonBlocking {
                return Ok(Poll::Discarded);
            }
        }
    }

    fn send_segment(
        &mut self,
        socket: &Socket,
        seq_number: u32,
        ack_number: u32,
        flags: Flags,
        payload: &[u8],
    ) -> Result<()> {
        let dst_mac = socket.destination_mac.ok_or(Error::Unaddressable)?;
        let range = self.emit_ip(
            dst_mac,
            socket.destination_ip,
            Protocol::TCP,
            tcp::HEADER_LEN + payload.len(),
        )?;

        let local_ip = self.config.local_ip;
        let mut packet = tcp::Packet::new_unchecked(&mut self.tx_buffer[range.clone()]);
        packet.set_src_port(socket.source_port);
        packet.set_dst_port(socket.destination_port);
        packet.set_seq_number(seq_number);
        packet.set_ack_number(ack_number);
        packet.set_header_len(tcp::HEADER_LEN as u8);
        packet.set_flags(flags);
        packet.set_window_len(MAX_SEGMENT_SIZE as u16);
        packet.set_urgent_at(0);
        packet.payload_mut().copy_from_slice(payload);
        packet.fill_checksum(&local_ip, &socket.destination_ip);

        trace!("tcp: send {:#04x} seq {} ack {} len {}", flags.0, seq_number, ack_number, payload.len());
        self.transmit(range.end)
    }

    /// Poll without blocking until a segment satisfying `wanted` arrives or
    /// `budget_ms` runs out.
    fn await_segment<F>(&mut self, socket: &Socket, budget_ms: u32, mut wanted: F) -> Result<Option<Segment>>
        where F: FnMut(&Segment) -> bool
    {
        let deadline = Deadline::after(&self.clock, budget_ms);
        while !deadline.expired(&self.clock) {
            if let Poll::Ready(segment) = self.receive_segment(socket, Mode::NonBlocking)? {
                if wanted(&segment) {
                    return Ok(Some(segment));
                }
                trace!("tcp: ignored segment with flags {:#04x}", segment.flags.0);
            }
        }
        Ok(None)
    }

    fn receive_segment(&mut self, socket: &Socket, mode: Mode) -> Result<Poll<Segment>> {
        loop {
            let received = match self.receive_ip(Protocol::TCP, mode)? {
                Poll::Ready(received) => received,
                Poll::Handled => return Ok(Poll::Handled),
                Poll::Discarded => return Ok(Poll::Discarded),
                Poll::Empty => return Ok(Poll::Empty),
            };
            match self.match_segment(socket, &received) {
                Some(segment) => return Ok(Poll::Ready(segment)),
                None if mode == Mode::NonBlocking => return Ok(Poll::Discarded),
                None => (),
            }
        }
    }

    /// Decode the segment in `received` if it is intact and belongs to `socket`.
    fn match_segment(&self, socket: &Socket, received: &Received) -> Option<Segment> {
        let packet = tcp::Packet::new_checked(&self.rx_buffer[received.payload.clone()]).ok()?;
        if !packet.verify_checksum(&received.src_addr, &self.config.local_ip) {
            trace!("tcp: bad checksum from {}", received.src_addr);
            return None;
        }
        if packet.dst_port() != socket.source_port
            || packet.src_port() != socket.destination_port
            || received.src_addr != socket.destination_ip
        {
            trace!("tcp: segment for port {} is not ours", packet.dst_port());
            return None;
        }

        let start = received.payload.start + packet.header_len() as usize;
        Some(Segment {
            seq_number: packet.seq_number(),
            ack_number: packet.ack_number(),
            flags: packet.flags(),
            payload: start..received.payload.end,
        })
    }
}
