use bitflags::bitflags;

bitflags! {
    /// https://httpwg.org/specs/rfc7540.html#DATA
    #[repr(transparent)]
    pub struct DataFlags: u8 {
        /// bit 0: this is the last frame the endpoint will send on this stream.
        const END_STREAM = 0x1;
        /// bit 3: the Pad Length field and padding are present.
        const PADDED = 0x8;
    }

    /// https://httpwg.org/specs/rfc7540.html#HEADERS
    #[repr(transparent)]
    pub struct HeadersFlags: u8 {
        /// bit 0: this header block is the last the endpoint will send on this stream.
        const END_STREAM = 0x1;
        /// bit 2: this frame contains an entire header block, no CONTINUATION follows.
        const END_HEADERS = 0x4;
        /// bit 3: the Pad Length field and padding are present.
        const PADDED = 0x8;
        /// bit 5: the Exclusive/Stream Dependency/Weight fields are present.
        const PRIORITY = 0x20;
    }

    /// https://httpwg.org/specs/rfc7540.html#SETTINGS
    #[repr(transparent)]
    pub struct SettingsFlags: u8 {
        /// bit 0: this frame acknowledges the peer's SETTINGS frame.
        const ACK = 0x1;
    }

    /// https://httpwg.org/specs/rfc7540.html#PUSH_PROMISE
    /// Kept only to describe the wire bits we reject on receipt; the server never sends these.
    #[repr(transparent)]
    pub struct PushPromiseFlags: u8 {
        const END_HEADERS = 0x4;
        const PADDED = 0x8;
    }

    /// https://httpwg.org/specs/rfc7540.html#PING
    #[repr(transparent)]
    pub struct PingFlags: u8 {
        /// bit 0: this PING frame is a response to one received earlier.
        const ACK = 0x1;
    }

    /// https://httpwg.org/specs/rfc7540.html#CONTINUATION
    #[repr(transparent)]
    pub struct ContinuationFlags: u8 {
        const END_HEADERS = 0x4;
    }
}
