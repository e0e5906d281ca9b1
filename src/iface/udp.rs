use log::trace;

use crate::phy::{
    Clock,
    Device,
};
use crate::socket::Socket;
use crate::Result;

use super::{
    Mode,
    NetworkContext,
    Poll,
};

impl<D: Device, C: Clock> NetworkContext<D, C> {
    /// Send `payload` as the body of one IPv4 packet to the socket's peer,
    /// resolving its MAC address first if the socket has none yet.
    pub fn udp_send(&mut self, socket: &mut Socket, payload: &[u8]) -> Result<()> {
        self.destination_mac(socket)?;
        trace!("udp: {} octets to {}", payload.len(), socket.destination_ip);
        self.ip_send(socket, payload)
    }

    /// Copy the next datagram into `buffer`. Datagrams are not matched
    /// against the socket's peer or ports.
    pub fn udp_receive(
        &mut self,
        socket: &Socket,
        buffer: &mut [u8],
        mode: Mode,
    ) -> Result<Poll<usize>> {
        self.ip_receive(socket, buffer, mode)
    }
}
