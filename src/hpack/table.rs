use bytes::Bytes;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct TableEntry {
    pub name: Bytes,
    pub value: Bytes,
    pub size: usize,
}

impl TableEntry {
    pub fn new(name: Bytes, value: Bytes) -> Self {
        let size = name.len() + value.len() + 32;
        Self { name, value, size }
    }
}

macro_rules! static_table {
    ( $( $name:expr => $value:expr ),+ $(,)? ) => {
        [
            $(
                TableEntry {
                    name: Bytes::from_static($name),
                    value: Bytes::from_static($value),
                    size: $name.len() + $value.len() + 32,
                }
            ),+
        ]
    };
}

/// https://httpwg.org/specs/rfc7541.html#static.table.definition
pub static STATIC_TABLE: [TableEntry; 61] = static_table![
    b":authority" => b"",
    b":method" => b"GET",
    b":method" => b"POST",
    b":path" => b"/",
    b":path" => b"/index.html",
    b":scheme" => b"http",
    b":scheme" => b"https",
    b":status" => b"200",
    b":status" => b"204",
    b":status" => b"206",
    b":status" => b"304",
    b":status" => b"400",
    b":status" => b"404",
    b":status" => b"500",
    b"accept-charset" => b"",
    b"accept-encoding" => b"gzip, deflate",
    b"accept-language" => b"",
    b"accept-ranges" => b"",
    b"accept" => b"",
    b"access-control-allow-origin" => b"",
    b"age" => b"",
    b"allow" => b"",
    b"authorization" => b"",
    b"cache-control" => b"",
    b"content-disposition" => b"",
    b"content-encoding" => b"",
    b"content-language" => b"",
    b"content-length" => b"",
    b"content-location" => b"",
    b"content-range" => b"",
    b"content-type" => b"",
    b"cookie" => b"",
    b"date" => b"",
    b"etag" => b"",
    b"expect" => b"",
    b"expires" => b"",
    b"from" => b"",
    b"host" => b"",
    b"if-match" => b"",
    b"if-modified-since" => b"",
    b"if-none-match" => b"",
    b"if-range" => b"",
    b"if-unmodified-since" => b"",
    b"last-modified" => b"",
    b"link" => b"",
    b"location" => b"",
    b"max-forwards" => b"",
    b"proxy-authenticate" => b"",
    b"proxy-authorization" => b"",
    b"range" => b"",
    b"referer" => b"",
    b"refresh" => b"",
    b"retry-after" => b"",
    b"server" => b"",
    b"set-cookie" => b"",
    b"strict-transport-security" => b"",
    b"transfer-encoding" => b"",
    b"user-agent" => b"",
    b"vary" => b"",
    b"via" => b"",
    b"www-authenticate" => b""
];

/// The dynamic table: index 1 is the most recently inserted entry, immediately after the
/// static table's 61 entries.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    max_size: usize,
    current_size: usize,
    entries: VecDeque<TableEntry>,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            current_size: 0,
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn current_size(&self) -> usize {
        self.current_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// `index` is 1-based and relative to the dynamic table only (caller subtracts the static
    /// table's length first).
    pub fn get(&self, index: usize) -> Option<&TableEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get(index - 1)
    }

    pub fn insert(&mut self, name: Bytes, value: Bytes) {
        let entry = TableEntry::new(name, value);
        if entry.size > self.max_size {
            // RFC 7541 §4.4: an entry larger than the table's max size is not an error, it
            // simply results in an empty table.
            self.entries.clear();
            self.current_size = 0;
            return;
        }
        self.current_size += entry.size;
        self.entries.push_front(entry);
        self.evict();
    }

    pub fn resize(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict();
    }

    fn evict(&mut self) {
        while self.current_size > self.max_size {
            match self.entries.pop_back() {
                Some(evicted) => self.current_size -= evicted.size,
                None => break,
            }
        }
    }
}

pub fn resolve(static_and_dynamic_index: usize, dynamic: &DynamicTable) -> Option<(Bytes, Bytes)> {
    if static_and_dynamic_index == 0 {
        return None;
    }
    if static_and_dynamic_index <= STATIC_TABLE.len() {
        let entry = &STATIC_TABLE[static_and_dynamic_index - 1];
        return Some((entry.name.clone(), entry.value.clone()));
    }
    dynamic
        .get(static_and_dynamic_index - STATIC_TABLE.len())
        .map(|entry| (entry.name.clone(), entry.value.clone()))
}
