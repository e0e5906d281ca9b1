use crate::protocol::ethernet::Address as MacAddress;
use crate::protocol::ip::{
    ipv4::Address,
    Protocol,
};

/// Transport carried by a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    Tcp,
    Udp,
}

impl From<IpProtocol> for Protocol {
    fn from(protocol: IpProtocol) -> Self {
        match protocol {
            IpProtocol::Tcp => Protocol::TCP,
            IpProtocol::Udp => Protocol::UDP,
        }
    }
}

/// Connection state. There is no way back from `Established`: the stack
/// never sends or handles FIN and RST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    SynSent,
    Established,
}

/// One logical endpoint: where traffic goes and, for TCP, where the
/// connection stands.
///
/// Sockets are plain values owned by the caller; the context only borrows
/// them for the duration of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socket {
    pub source_port: u16,
    pub destination_port: u16,
    pub destination_ip: Address,
    /// Filled in by ARP on first use.
    pub destination_mac: Option<MacAddress>,
    pub ip_protocol: IpProtocol,
    pub tcp_sequence_number: u32,
    pub tcp_acknowledgment_number: u32,
    pub tcp_state: TcpState,
}

impl Socket {
    pub fn new(
        source_port: u16,
        destination_ip: Address,
        destination_port: u16,
        ip_protocol: IpProtocol,
    ) -> Socket {
        Socket {
            source_port,
            destination_port,
            destination_ip,
            destination_mac: None,
            ip_protocol,
            tcp_sequence_number: 0,
            tcp_acknowledgment_number: 0,
            tcp_state: TcpState::Closed,
        }
    }

    pub fn tcp_connection_established(&self) -> bool {
        self.tcp_state == TcpState::Established
    }
}
