pub mod icmpv4;
