//! Per-frame-type flag bits (RFC 7540).

use bitflags::bitflags;

bitflags! {
    pub struct DataFlags: u8 {
        const END_STREAM = 0x1;
        const PADDED = 0x8;
    }

    pub struct HeadersFlags: u8 {
        const END_STREAM = 0x1;
        const END_HEADERS = 0x4;
        const PADDED = 0x8;
        const PRIORITY = 0x20;
    }

    pub struct SettingsFlags: u8 {
        const ACK = 0x1;
    }

    pub struct PushPromiseFlags: u8 {
        const END_HEADERS = 0x4;
        const PADDED = 0x8;
    }

    pub struct PingFlags: u8 {
        const ACK = 0x1;
    }

    pub struct ContinuationFlags: u8 {
        const END_HEADERS = 0x4;
    }
}
