// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         Hardware Type         |         Protocol Type         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  HLen (6)     |  PLen (4)     |           Operation           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                Sender Hardware Address (6 octets)             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                Sender Protocol Address (4 octets)             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                Target Hardware Address (6 octets)             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                Target Protocol Address (4 octets)             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

use byteorder::{
    ByteOrder,
    NetworkEndian,
};

use crate::{
    Error,
    Result,
};
use super::ethernet::{
    Address as MacAddress,
    EtherType,
};
use super::ip::ipv4::Address as Ipv4Address;

pub const HARDWARE_ETHERNET: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Request,
    Reply,
    Unknown(u16),
}

impl From<u16> for Operation {
    fn from(val: u16) -> Self {
        match val {
            1 => Self::Request,
            2 => Self::Reply,
            other => Self::Unknown(other),
        }
    }
}

impl From<Operation> for u16 {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Request => 1,
            Operation::Reply => 2,
            Operation::Unknown(other) => other,
        }
    }
}

mod field {
    use crate::Field;

    pub const HTYPE: Field = 0..2;
    pub const PTYPE: Field = 2..4;
    pub const HLEN:  usize = 4;
    pub const PLEN:  usize = 5;
    pub const OPER:  Field = 6..8;
    pub const SHA:   Field = 8..14;
    pub const SPA:   Field = 14..18;
    pub const THA:   Field = 18..24;
    pub const TPA:   Field = 24..28;
}

/// Size of an Ethernet/IPv4 ARP packet.
pub const PACKET_LEN: usize = field::TPA.end;

pub struct Packet<T: AsRef<[u8]>> {
    buffer: T
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    pub fn check_len(&self) -> Result<()> {
        if self.buffer.as_ref().len() < PACKET_LEN {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    pub fn hardware_type(&self) -> u16 {
        let data = self.buffer.as_ref();
        NetworkEndian::read_u16(&data[field::HTYPE])
    }

    pub fn protocol_type(&self) -> EtherType {
        let data = self.buffer.as_ref();
        NetworkEndian::read_u16(&data[field::PTYPE]).into()
    }

    pub fn hardware_len(&self) -> u8 {
        self.buffer.as_ref()[field::HLEN]
    }

    pub fn protocol_len(&self) -> u8 {
        self.buffer.as_ref()[field::PLEN]
    }

    pub fn operation(&self) -> Operation {
        let data = self.buffer.as_ref();
        NetworkEndian::read_u16(&data[field::OPER]).into()
    }

    pub fn source_hardware_addr(&self) -> MacAddress {
        MacAddress::from_bytes(&self.buffer.as_ref()[field::SHA])
    }

    pub fn source_protocol_addr(&self) -> Ipv4Address {
        Ipv4Address::from_bytes(&self.buffer.as_ref()[field::SPA])
    }

    pub fn target_hardware_addr(&self) -> MacAddress {
        MacAddress::from_bytes(&self.buffer.as_ref()[field::THA])
    }

    pub fn target_protocol_addr(&self) -> Ipv4Address {
        Ipv4Address::from_bytes(&self.buffer.as_ref()[field::TPA])
    }

    /// Ethernet hardware addresses carrying IPv4 protocol addresses,
    /// the only combination this stack speaks.
    pub fn is_ethernet_ipv4(&self) -> bool {
        self.hardware_type() == HARDWARE_ETHERNET &&
        self.protocol_type() == EtherType::IPv4 &&
        self.hardware_len() == 6 &&
        self.protocol_len() == 4
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_hardware_type(&mut self, value: u16) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u16(&mut data[field::HTYPE], value)
    }

    pub fn set_protocol_type(&mut self, value: EtherType) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u16(&mut data[field::PTYPE], value.into())
    }

    pub fn set_hardware_len(&mut self, value: u8) {
        self.buffer.as_mut()[field::HLEN] = value
    }

    pub fn set_protocol_len(&mut self, value: u8) {
        self.buffer.as_mut()[field::PLEN] = value
    }

    pub fn set_operation(&mut self, value: Operation) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u16(&mut data[field::OPER], value.into())
    }

    pub fn set_source_hardware_addr(&mut self, addr: MacAddress) {
        self.buffer.as_mut()[field::SHA].copy_from_slice(addr.as_bytes())
    }

    pub fn set_source_protocol_addr(&mut self, addr: Ipv4Address) {
        self.buffer.as_mut()[field::SPA].copy_from_slice(addr.as_bytes())
    }

    pub fn set_target_hardware_addr(&mut self, addr: MacAddress) {
        self.buffer.as_mut()[field::THA].copy_from_slice(addr.as_bytes())
    }

    pub fn set_target_protocol_addr(&mut self, addr: Ipv4Address) {
        self.buffer.as_mut()[field::TPA].copy_from_slice(addr.as_bytes())
    }

    /// Write a complete Ethernet/IPv4 ARP packet.
    pub fn emit(
        &mut self,
        operation: Operation,
        source_hardware_addr: MacAddress,
        source_protocol_addr: Ipv4Address,
        target_hardware_addr: MacAddress,
        target_protocol_addr: Ipv4Address,
    ) {
        self.set_hardware_type(HARDWARE_ETHERNET);
        self.set_protocol_type(EtherType::IPv4);
        self.set_hardware_len(6);
        self.set_protocol_len(4);
        self.set_operation(operation);
        self.set_source_hardware_addr(source_hardware_addr);
        self.set_source_protocol_addr(source_protocol_addr);
        self.set_target_hardware_addr(target_hardware_addr);
        self.set_target_protocol_addr(target_protocol_addr);
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Packet<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}
