//! HPACK header compression (RFC 7541). Built fully in-crate rather than delegated
//! to an external codec, since header compression is core to this server, not an opaque
//! collaborator.

mod huffman;
mod primitive;
mod table;

pub use table::{DynamicTable, TableEntry, STATIC_TABLE};

use crate::error::HpackError;
use bytes::{BufMut, Bytes, BytesMut};

/// Header names that must never be added to the dynamic table, regardless of the encoder's
/// usual indexing strategy.
const NEVER_INDEXED_NAMES: [&[u8]; 3] = [b"authorization", b"cookie", b"set-cookie"];

pub struct Encoder {
    table: DynamicTable,
    pending_resize: Option<usize>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_max_size(4_096)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_size),
            pending_resize: None,
        }
    }

    /// Arrange for the next call to `encode` to open with a dynamic table size update, in
    /// response to a peer SETTINGS_HEADER_TABLE_SIZE change.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.pending_resize = Some(max_size);
    }

    pub fn encode<'a, I>(&mut self, headers: I) -> Bytes
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        let mut out = BytesMut::new();
        if let Some(size) = self.pending_resize.take() {
            primitive::encode_integer(size, 5, 0x20, &mut out);
            self.table.resize(size);
        }
        for (name, value) in headers {
            self.encode_header(name, value, &mut out);
        }
        out.freeze()
    }

    fn encode_header(&mut self, name: &[u8], value: &[u8], out: &mut BytesMut) {
        if let Some(index) = self.find_exact(name, value) {
            primitive::encode_integer(index, 7, 0x80, out);
            return;
        }
        let name_index = self.find_name(name);
        if NEVER_INDEXED_NAMES.contains(&name) {
            self.encode_literal(name, value, name_index, 0x10, 4, out);
            return;
        }
        self.encode_literal(name, value, name_index, 0x40, 6, out);
        self.table
            .insert(Bytes::copy_from_slice(name), Bytes::copy_from_slice(value));
    }

    fn encode_literal(
        &self,
        name: &[u8],
        value: &[u8],
        name_index: Option<usize>,
        flag: u8,
        prefix_bits: u8,
        out: &mut BytesMut,
    ) {
        match name_index {
            Some(index) => primitive::encode_integer(index, prefix_bits, flag, out),
            None => {
                out.put_u8(flag);
                primitive::encode_string(name, out);
            }
        }
        primitive::encode_string(value, out);
    }

    fn find_exact(&self, name: &[u8], value: &[u8]) -> Option<usize> {
        if let Some(pos) = STATIC_TABLE
            .iter()
            .position(|entry| &entry.name[..] == name && &entry.value[..] == value)
        {
            return Some(pos + 1);
        }
        for i in 0..self.table.len() {
            let entry = self.table.get(i + 1)?;
            if &entry.name[..] == name && &entry.value[..] == value {
                return Some(STATIC_TABLE.len() + i + 1);
            }
        }
        None
    }

    fn find_name(&self, name: &[u8]) -> Option<usize> {
        if let Some(pos) = STATIC_TABLE.iter().position(|entry| &entry.name[..] == name) {
            return Some(pos + 1);
        }
        for i in 0..self.table.len() {
            if let Some(entry) = self.table.get(i + 1) {
                if &entry.name[..] == name {
                    return Some(STATIC_TABLE.len() + i + 1);
                }
            }
        }
        None
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Decoder {
    table: DynamicTable,
    settings_max_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_size(4_096)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_size),
            settings_max_size: max_size,
        }
    }

    /// Update the ceiling a peer's dynamic table size update instruction must respect — this
    /// tracks our own advertised SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_settings_max_size(&mut self, max_size: usize) {
        self.settings_max_size = max_size;
    }

    pub fn dynamic_table_size(&self) -> usize {
        self.table.current_size()
    }

    /// Decode a complete header block (all CONTINUATION fragments already concatenated).
    pub fn decode(&mut self, mut block: &[u8]) -> Result<Vec<(Bytes, Bytes)>, HpackError> {
        let mut headers = Vec::new();
        let mut seen_header_field = false;
        while !block.is_empty() {
            let byte = block[0];
            if byte & 0x80 != 0 {
                let (index, consumed) = primitive::decode_integer(block, 7)?;
                block = &block[consumed..];
                let (name, value) =
                    table::resolve(index, &self.table).ok_or(HpackError::InvalidIndex(index))?;
                headers.push((name, value));
                seen_header_field = true;
            } else if byte & 0x40 != 0 {
                let (name, value, consumed) = self.decode_literal(block, 6)?;
                block = &block[consumed..];
                self.table.insert(name.clone(), value.clone());
                headers.push((name, value));
                seen_header_field = true;
            } else if byte & 0x20 != 0 {
                if seen_header_field {
                    return Err(HpackError::MisplacedTableSizeUpdate);
                }
                let (new_size, consumed) = primitive::decode_integer(block, 5)?;
                if new_size > self.settings_max_size {
                    return Err(HpackError::TableSizeUpdateTooLarge {
                        requested: new_size,
                        max: self.settings_max_size,
                    });
                }
                self.table.resize(new_size);
                block = &block[consumed..];
            } else {
                // 0000xxxx (literal without indexing) and 0001xxxx (never indexed) decode
                // identically; the distinction only constrains re-encoding by a proxy.
                let (name, value, consumed) = self.decode_literal(block, 4)?;
                block = &block[consumed..];
                headers.push((name, value));
                seen_header_field = true;
            }
        }
        Ok(headers)
    }

    fn decode_literal(&self, block: &[u8], prefix_bits: u8) -> Result<(Bytes, Bytes, usize), HpackError> {
        let (index, mut consumed) = primitive::decode_integer(block, prefix_bits)?;
        let name = if index == 0 {
            let (name, name_consumed) = primitive::decode_string(&block[consumed..])?;
            consumed += name_consumed;
            name
        } else {
            table::resolve(index, &self.table)
                .ok_or(HpackError::InvalidIndex(index))?
                .0
        };
        let (value, value_consumed) = primitive::decode_string(&block[consumed..])?;
        consumed += value_consumed;
        Ok((name, value, consumed))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_owned(pairs: &[(&[u8], &[u8])]) -> Vec<(Bytes, Bytes)> {
        pairs
            .iter()
            .map(|(n, v)| (Bytes::copy_from_slice(n), Bytes::copy_from_slice(v)))
            .collect()
    }

    #[test]
    fn round_trips_simple_request() {
        let mut enc = Encoder::new();
        let mut dec = Decoder::new();
        let input: Vec<(&[u8], &[u8])> = vec![
            (b":method", b"POST"),
            (b":path", b"/echo.Echo/Echo"),
            (b"content-type", b"application/grpc"),
        ];
        let encoded = enc.encode(input.clone());
        let decoded = dec.decode(&encoded).unwrap();
        assert_eq!(decoded, headers_owned(&input));
    }

    #[test]
    fn reuses_dynamic_table_across_calls() {
        let mut enc = Encoder::new();
        let mut dec = Decoder::new();
        let first: Vec<(&[u8], &[u8])> = vec![(b"custom-key", b"custom-value")];
        let second = first.clone();

        let e1 = enc.encode(first.clone());
        let e2 = enc.encode(second.clone());
        // second encode should be shorter: the pair is now in the dynamic table
        assert!(e2.len() < e1.len());

        assert_eq!(dec.decode(&e1).unwrap(), headers_owned(&first));
        assert_eq!(dec.decode(&e2).unwrap(), headers_owned(&second));
    }

    #[test]
    fn never_indexes_sensitive_headers() {
        let mut enc = Encoder::new();
        let _ = enc.encode(vec![(&b"authorization"[..], &b"Bearer xyz"[..])]);
        assert_eq!(enc.table.len(), 0);
    }

    #[test]
    fn table_size_update_must_lead_the_block() {
        let mut dec = Decoder::new();
        // indexed field (0x82 = ":method: GET") followed by a (misplaced) size update
        let block = [0x82u8, 0x20];
        assert!(matches!(
            dec.decode(&block),
            Err(HpackError::MisplacedTableSizeUpdate)
        ));
    }

    #[test]
    fn rejects_table_size_update_beyond_settings_max() {
        let mut dec = Decoder::with_max_size(100);
        let mut out = BytesMut::new();
        primitive::encode_integer(4_096, 5, 0x20, &mut out);
        assert!(matches!(
            dec.decode(&out),
            Err(HpackError::TableSizeUpdateTooLarge { .. })
        ));
    }

    #[test]
    fn dynamic_table_never_exceeds_max_size() {
        let mut dec = Decoder::with_max_size(64);
        for i in 0..20 {
            let name = format!("x-header-{i}");
            let value = "0123456789";
            let mut out = BytesMut::new();
            out.put_u8(0x40);
            primitive::encode_string(name.as_bytes(), &mut out);
            primitive::encode_string(value.as_bytes(), &mut out);
            dec.decode(&out).unwrap();
            assert!(dec.dynamic_table_size() <= 64);
        }
    }
}
