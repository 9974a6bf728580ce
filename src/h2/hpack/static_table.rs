//! RFC 7541 Appendix A static table (61 entries). Indices are 1-based.
//!
//! Interop requires matching real peers, so this follows the RFC's 61-entry
//! table rather than an earlier 57-entry draft; recorded in DESIGN.md.

pub struct StaticEntry {
    pub name: &'static str,
    pub value: &'static str,
}

macro_rules! static_table {
    ( $( $name:expr => $value:expr ),+ $(,)? ) => {
        &[ $( StaticEntry { name: $name, value: $value } ),+ ]
    };
}

pub static STATIC_TABLE: &[StaticEntry] = static_table![
    ":authority" => "",
    ":method" => "GET",
    ":method" => "POST",
    ":path" => "/",
    ":path" => "/index.html",
    ":scheme" => "http",
    ":scheme" => "https",
    ":status" => "200",
    ":status" => "204",
    ":status" => "206",
    ":status" => "304",
    ":status" => "400",
    ":status" => "404",
    ":status" => "500",
    "accept-charset" => "",
    "accept-encoding" => "gzip, deflate",
    "accept-language" => "",
    "accept-ranges" => "",
    "accept" => "",
    "access-control-allow-origin" => "",
    "age" => "",
    "allow" => "",
    "authorization" => "",
    "cache-control" => "",
    "content-disposition" => "",
    "content-encoding" => "",
    "content-language" => "",
    "content-length" => "",
    "content-location" => "",
    "content-range" => "",
    "content-type" => "",
    "cookie" => "",
    "date" => "",
    "etag" => "",
    "expect" => "",
    "expires" => "",
    "from" => "",
    "host" => "",
    "if-match" => "",
    "if-modified-since" => "",
    "if-none-match" => "",
    "if-range" => "",
    "if-unmodified-since" => "",
    "last-modified" => "",
    "link" => "",
    "location" => "",
    "max-forwards" => "",
    "proxy-authenticate" => "",
    "proxy-authorization" => "",
    "range" => "",
    "referer" => "",
    "refresh" => "",
    "retry-after" => "",
    "server" => "",
    "set-cookie" => "",
    "strict-transport-security" => "",
    "transfer-encoding" => "",
    "user-agent" => "",
    "vary" => "",
    "via" => "",
    "www-authenticate" => "",
];

/// 1-based lookup, as HPACK indices are defined.
pub fn by_index(index: usize) -> Option<&'static StaticEntry> {
    if index == 0 {
        return None;
    }
    STATIC_TABLE.get(index - 1)
}

/// First index whose name matches, and whether its value also matches.
pub fn find(name: &str, value: &str) -> Option<(usize, bool)> {
    let mut name_only: Option<usize> = None;
    for (i, entry) in STATIC_TABLE.iter().enumerate() {
        if entry.name == name {
            if entry.value == value {
                return Some((i + 1, true));
            }
            name_only.get_or_insert(i + 1);
        }
    }
    name_only.map(|i| (i, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_61_entries() {
        assert_eq!(STATIC_TABLE.len(), 61);
    }

    #[test]
    fn method_get_is_index_2() {
        let entry = by_index(2).unwrap();
        assert_eq!(entry.name, ":method");
        assert_eq!(entry.value, "GET");
    }
}
