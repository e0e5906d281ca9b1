// Echo or Echo Reply Message
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     Type      |     Code      |          Checksum             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Identifier          |        Sequence Number        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     Data ...
// +-+-+-+-+-

//! ICMPv4 as far as the stack speaks it: echo requests in, echo replies out.
//! Other message types decode as `Message::Unsupported` and their second
//! header word is not interpreted.

use byteorder::{
    ByteOrder,
    NetworkEndian,
};

use crate::checksum;
use crate::{
    Error,
    Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    EchoReply,
    EchoRequest,
    Unsupported(u8),
}

impl From<u8> for Message {
    fn from(value: u8) -> Self {
        match value {
            0 => Message::EchoReply,
            8 => Message::EchoRequest,
            other => Message::Unsupported(other),
        }
    }
}

impl From<Message> for u8 {
    fn from(message: Message) -> Self {
        match message {
            Message::EchoReply => 0,
            Message::EchoRequest => 8,
            Message::Unsupported(other) => other,
        }
    }
}

mod field {
    use crate::{
        Field,
        FieldFrom,
    };

    pub const TYPE:     usize = 0;
    pub const CODE:     usize = 1;
    pub const CHECKSUM: Field = 2..4;
    pub const IDENT:    Field = 4..6;
    pub const SEQ_NO:   Field = 6..8;
    pub const DATA:     FieldFrom = 8..;
}

/// Length of the echo header, up to the start of the echoed data.
pub const HEADER_LEN: usize = field::DATA.start;

/// A view of an ICMPv4 message. The checksum covers the whole buffer, so
/// the buffer must end where the message does.
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
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
        if self.buffer.as_ref().len() < HEADER_LEN {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn msg_type(&self) -> Message {
        Message::from(self.buffer.as_ref()[field::TYPE])
    }

    pub fn msg_code(&self) -> u8 {
        self.buffer.as_ref()[field::CODE]
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn echo_ident(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::IDENT])
    }

    pub fn echo_seq_no(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::SEQ_NO])
    }

    /// Data carried by an echo message, echoed back verbatim in the reply.
    pub fn data(&self) -> &[u8] {
        &self.buffer.as_ref()[field::DATA]
    }

    pub fn verify_checksum(&self) -> bool {
        checksum::data(self.buffer.as_ref()) == !0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_msg_type(&mut self, msg_type: Message) {
        self.buffer.as_mut()[field::TYPE] = msg_type.into()
    }

    pub fn set_msg_code(&mut self, code: u8) {
        self.buffer.as_mut()[field::CODE] = code
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], checksum)
    }

    pub fn set_echo_ident(&mut self, ident: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::IDENT], ident)
    }

    pub fn set_echo_seq_no(&mut self, seq_no: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::SEQ_NO], seq_no)
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[field::DATA]
    }

    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let checksum = checksum::compute(self.buffer.as_ref());
        self.set_checksum(checksum)
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Packet<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static ECHO_BYTES: [u8; 12] =
        [0x08, 0x00, 0x8e, 0xfe,
         0x12, 0x34, 0xab, 0xcd,
         0xaa, 0x00, 0x00, 0xff];

    #[test]
    fn test_echo_deconstruct() {
        let packet = Packet::new_checked(&ECHO_BYTES[..]).unwrap();
        assert_eq!(packet.msg_type(), Message::EchoRequest);
        assert_eq!(packet.msg_code(), 0);
        assert_eq!(packet.checksum(), 0x8efe);
        assert_eq!(packet.echo_ident(), 0x1234);
        assert_eq!(packet.echo_seq_no(), 0xabcd);
        assert_eq!(packet.data(), &[0xaa, 0x00, 0x00, 0xff]);
        assert!(packet.verify_checksum());
    }

    #[test]
    fn test_echo_construct() {
        let mut bytes = vec![0xa5; 12];
        let mut packet = Packet::new_unchecked(&mut bytes);
        packet.set_msg_type(Message::EchoRequest);
        packet.set_msg_code(0);
        packet.set_echo_ident(0x1234);
        packet.set_echo_seq_no(0xabcd);
        packet.data_mut().copy_from_slice(&[0xaa, 0x00, 0x00, 0xff]);
        packet.fill_checksum();
        assert_eq!(&bytes[..], &ECHO_BYTES[..]);
    }

    #[test]
    fn test_reply_from_request() {
        let mut bytes = ECHO_BYTES.to_vec();
        let mut packet = Packet::new_unchecked(&mut bytes);
        packet.set_msg_type(Message::EchoReply);
        packet.fill_checksum();
        assert!(packet.verify_checksum());
        assert_eq!(packet.echo_seq_no(), 0xabcd);
    }

    #[test]
    fn test_truncated() {
        assert_eq!(Packet::new_checked(&ECHO_BYTES[..7]).err(), Some(Error::Truncated));
    }

    #[test]
    fn test_unsupported_message() {
        assert_eq!(Message::from(3), Message::Unsupported(3));
        assert_eq!(u8::from(Message::EchoReply), 0);
    }
}
