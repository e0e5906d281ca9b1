use crate::protocol::ip::ipv4::Address;

/// Hop limit of every packet this host sends.
pub const DEFAULT_TTL: u8 = 255;
/// ARP requests sent before giving up on an address.
pub const ARP_ATTEMPTS: u8 = 5;
/// How long each ARP request waits for its reply.
pub const ARP_ATTEMPT_MS: u32 = 3;
/// Budget for the SYN-ACK of a connection attempt.
pub const TCP_CONNECT_TIMEOUT_MS: u32 = 5000;
/// Budget for the acknowledgment of a data segment.
pub const TCP_ACK_TIMEOUT_MS: u32 = 2000;
/// First local port handed out to new sockets.
pub const EPHEMERAL_PORT_BASE: u16 = 49152;

/// Addressing and timing of a [`NetworkContext`](crate::NetworkContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub local_ip: Address,
    pub gateway_ip: Address,
    pub netmask: Address,
    pub ttl: u8,
    pub arp_attempts: u8,
    pub arp_attempt_ms: u32,
    pub tcp_connect_timeout_ms: u32,
    pub tcp_ack_timeout_ms: u32,
    pub ephemeral_port_base: u16,
}

impl Config {
    pub fn new(local_ip: Address, gateway_ip: Address) -> Config {
        Config {
            local_ip,
            gateway_ip,
            netmask: Address::new(255, 255, 255, 0),
            ttl: DEFAULT_TTL,
            arp_attempts: ARP_ATTEMPTS,
            arp_attempt_ms: ARP_ATTEMPT_MS,
            tcp_connect_timeout_ms: TCP_CONNECT_TIMEOUT_MS,
            tcp_ack_timeout_ms: TCP_ACK_TIMEOUT_MS,
            ephemeral_port_base: EPHEMERAL_PORT_BASE,
        }
    }

    pub fn with_netmask(mut self, netmask: Address) -> Config {
        self.netmask = netmask;
        self
    }

    pub fn with_ttl(mut self, ttl: u8) -> Config {
        self.ttl = ttl;
        self
    }

    pub fn with_arp_retries(mut self, attempts: u8, attempt_ms: u32) -> Config {
        self.arp_attempts = attempts;
        self.arp_attempt_ms = attempt_ms;
        self
    }

    pub fn with_tcp_timeouts(mut self, connect_ms: u32, ack_ms: u32) -> Config {
        self.tcp_connect_timeout_ms = connect_ms;
        self.tcp_ack_timeout_ms = ack_ms;
        self
    }

    pub fn with_ephemeral_port_base(mut self, port: u16) -> Config {
        self.ephemeral_port_base = port;
        self
    }

    /// The address to resolve on the link in order to reach `destination`.
    pub fn next_hop(&self, destination: Address) -> Address {
        if self.local_ip.same_subnet(&destination, &self.netmask) {
            destination
        } else {
            self.gateway_ip
        }
    }
}
