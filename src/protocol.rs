//! Wire formats.
//!
//! Each packet type is a thin view over a byte buffer. Field accessors do the
//! network byte order conversion, so nothing above this module touches raw
//! offsets or swaps bytes by hand.

pub mod arp;
pub mod ethernet;
pub mod icmp;
pub mod ip;
pub mod tcp;
pub mod udp;
