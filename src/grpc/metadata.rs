//! gRPC metadata: the application-visible view over HTTP/2 headers, plus the `grpc-timeout`
//! grammar and `-bin` suffix handling.

use bytes::Bytes;
use std::time::Duration;

/// Headers reserved for the protocol itself; never surfaced to handlers as metadata and never
/// settable by a handler directly.
const RESERVED_HEADERS: &[&str] = &[
    ":method",
    ":scheme",
    ":path",
    ":authority",
    ":status",
    "te",
    "content-type",
    "grpc-timeout",
    "grpc-encoding",
    "grpc-accept-encoding",
    "grpc-status",
    "grpc-message",
];

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    entries: Vec<(Bytes, Bytes)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_reserved(name: &[u8]) -> bool {
        RESERVED_HEADERS
            .iter()
            .any(|reserved| reserved.as_bytes().eq_ignore_ascii_case(name))
    }

    /// Insert a header pair decoded off the wire, skipping anything reserved for the protocol.
    pub fn insert_wire_header(&mut self, name: Bytes, value: Bytes) {
        if Self::is_reserved(&name) {
            return;
        }
        self.entries.push((name, value));
    }

    pub fn insert(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, value)| value)
    }

    /// Decode a `-bin` suffixed value from its unpadded base64 wire form.
    pub fn get_bin(&self, name: &str) -> Option<Bytes> {
        if !name.ends_with("-bin") {
            return None;
        }
        let raw = self.get(name)?;
        base64::decode_config(raw, base64::STANDARD_NO_PAD)
            .ok()
            .map(Bytes::from)
    }

    pub fn insert_bin(&mut self, name: impl Into<String>, value: &[u8]) {
        let name = name.into();
        debug_assert!(name.ends_with("-bin"), "binary metadata keys must end in -bin");
        let encoded = base64::encode_config(value, base64::STANDARD_NO_PAD);
        self.entries.push((Bytes::from(name), Bytes::from(encoded)));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &Bytes)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse the `grpc-timeout` header value: an ASCII integer (≤8 digits) followed by one of the
/// unit suffixes `H`/`M`/`S`/`m`/`u`/`n` (hours/minutes/seconds/millis/micros/nanos).
pub fn parse_grpc_timeout(value: &[u8]) -> Option<Duration> {
    if value.is_empty() || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let amount: u64 = std::str::from_utf8(digits).ok()?.parse().ok()?;
    let duration = match unit[0] {
        b'H' => Duration::from_secs(amount.saturating_mul(3_600)),
        b'M' => Duration::from_secs(amount.saturating_mul(60)),
        b'S' => Duration::from_secs(amount),
        b'm' => Duration::from_millis(amount),
        b'u' => Duration::from_micros(amount),
        b'n' => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}

/// Format a deadline the server is about to forward onward (not used when acting purely as a
/// terminal server, but kept symmetric with `parse_grpc_timeout`).
pub fn format_grpc_timeout(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos < 100_000_000 {
        return format!("{}n", nanos.min(99_999_999));
    }
    let micros = duration.as_micros();
    if micros < 100_000_000 {
        return format!("{}u", micros.min(99_999_999));
    }
    let millis = duration.as_millis();
    if millis < 100_000_000 {
        return format!("{}m", millis.min(99_999_999));
    }
    let secs = duration.as_secs();
    if secs < 100_000_000 {
        return format!("{secs}S");
    }
    let minutes = secs / 60;
    if minutes < 100_000_000 {
        return format!("{minutes}M");
    }
    format!("{}H", (secs / 3_600).min(99_999_999))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds() {
        assert_eq!(parse_grpc_timeout(b"10S"), Some(Duration::from_secs(10)));
    }

    #[test]
    fn parses_milliseconds() {
        assert_eq!(parse_grpc_timeout(b"250m"), Some(Duration::from_millis(250)));
    }

    #[test]
    fn rejects_malformed_timeout() {
        assert_eq!(parse_grpc_timeout(b""), None);
        assert_eq!(parse_grpc_timeout(b"S"), None);
        assert_eq!(parse_grpc_timeout(b"12X"), None);
        assert_eq!(parse_grpc_timeout(b"123456789S"), None);
    }

    #[test]
    fn reserved_headers_are_filtered_from_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert_wire_header(Bytes::from_static(b":method"), Bytes::from_static(b"POST"));
        metadata.insert_wire_header(Bytes::from_static(b"x-request-id"), Bytes::from_static(b"42"));
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata.get("x-request-id").unwrap(), "42");
    }

    #[test]
    fn binary_metadata_round_trips_base64() {
        let mut metadata = Metadata::new();
        metadata.insert_bin("trace-bin", b"\x01\x02\xff");
        assert_eq!(metadata.get_bin("trace-bin").unwrap(), Bytes::from_static(b"\x01\x02\xff"));
    }
}
