//! SETTINGS parameters (RFC 7540 §6.5.2) and the connection's
//! negotiated-settings table.

use enum_map::{enum_map, Enum, EnumMap};

use super::frame::DEFAULT_MAX_FRAME_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum)]
pub enum SettingId {
    HeaderTableSize,
    EnablePush,
    MaxConcurrentStreams,
    InitialWindowSize,
    MaxFrameSize,
    MaxHeaderListSize,
}

impl SettingId {
    pub fn from_u16(v: u16) -> Option<SettingId> {
        Some(match v {
            0x1 => SettingId::HeaderTableSize,
            0x2 => SettingId::EnablePush,
            0x3 => SettingId::MaxConcurrentStreams,
            0x4 => SettingId::InitialWindowSize,
            0x5 => SettingId::MaxFrameSize,
            0x6 => SettingId::MaxHeaderListSize,
            _ => return None,
        })
    }

    pub fn to_u16(self) -> u16 {
        match self {
            SettingId::HeaderTableSize => 0x1,
            SettingId::EnablePush => 0x2,
            SettingId::MaxConcurrentStreams => 0x3,
            SettingId::InitialWindowSize => 0x4,
            SettingId::MaxFrameSize => 0x5,
            SettingId::MaxHeaderListSize => 0x6,
        }
    }
}

/// A peer's (or our own) applied SETTINGS, keyed as an
/// `EnumMap<SettingId, u32>` with RFC 7540 §11.3 defaults.
#[derive(Debug, Clone)]
pub struct Settings(pub EnumMap<SettingId, u32>);

impl Default for Settings {
    fn default() -> Self {
        Settings(enum_map! {
            SettingId::HeaderTableSize => 4096,
            SettingId::EnablePush => 1,
            SettingId::MaxConcurrentStreams => u32::MAX,
            SettingId::InitialWindowSize => 65_535,
            SettingId::MaxFrameSize => DEFAULT_MAX_FRAME_SIZE,
            SettingId::MaxHeaderListSize => u32::MAX,
        })
    }
}

impl Settings {
    /// The client's own initial settings. Local initial window is 16 MiB,
    /// to amortize WINDOW_UPDATEs.
    pub fn local_initial() -> Self {
        let mut s = Settings::default();
        s.0[SettingId::InitialWindowSize] = 16 * 1024 * 1024;
        s.0[SettingId::EnablePush] = 0;
        s
    }

    pub fn apply(&mut self, params: &[(SettingId, u32)]) {
        for (id, value) in params {
            self.0[*id] = *value;
        }
    }

    pub fn header_table_size(&self) -> usize {
        self.0[SettingId::HeaderTableSize] as usize
    }

    pub fn initial_window_size(&self) -> u32 {
        self.0[SettingId::InitialWindowSize]
    }

    pub fn max_frame_size(&self) -> u32 {
        self.0[SettingId::MaxFrameSize]
    }

    pub fn max_concurrent_streams(&self) -> u32 {
        self.0[SettingId::MaxConcurrentStreams]
    }

    pub fn as_wire_params(&self) -> Vec<(SettingId, u32)> {
        self.0.iter().map(|(k, v)| (k, *v)).collect()
    }
}
