use enum_map::{enum_map, Enum, EnumMap};
use num_derive::{FromPrimitive, ToPrimitive};

/// https://httpwg.org/specs/rfc7540.html#SettingValues
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive, Enum,
)]
#[repr(u16)]
pub enum SettingsParameter {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_MAX_FRAME_SIZE: u32 = 16_777_215;
pub const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = u32::MAX;

/// Settings this server advertises to a newly connected peer. `max_concurrent_streams` and
/// `initial_window_size` are filled in from `ServerOptions` before the handshake SETTINGS
/// frame is written.
pub fn local_defaults(
    max_concurrent_streams: u32,
    initial_window_size: u32,
) -> EnumMap<SettingsParameter, u32> {
    enum_map! {
        SettingsParameter::HeaderTableSize => DEFAULT_HEADER_TABLE_SIZE,
        SettingsParameter::EnablePush => 0,
        SettingsParameter::MaxConcurrentStreams => max_concurrent_streams,
        SettingsParameter::InitialWindowSize => initial_window_size,
        SettingsParameter::MaxFrameSize => DEFAULT_MAX_FRAME_SIZE,
        SettingsParameter::MaxHeaderListSize => DEFAULT_MAX_HEADER_LIST_SIZE,
    }
}

/// Settings assumed for a peer until its first SETTINGS frame arrives.
pub fn peer_defaults() -> EnumMap<SettingsParameter, u32> {
    enum_map! {
        SettingsParameter::HeaderTableSize => DEFAULT_HEADER_TABLE_SIZE,
        SettingsParameter::EnablePush => 1,
        SettingsParameter::MaxConcurrentStreams => u32::MAX,
        SettingsParameter::InitialWindowSize => DEFAULT_INITIAL_WINDOW_SIZE,
        SettingsParameter::MaxFrameSize => DEFAULT_MAX_FRAME_SIZE,
        SettingsParameter::MaxHeaderListSize => DEFAULT_MAX_HEADER_LIST_SIZE,
    }
}
