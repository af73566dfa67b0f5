//! Header values, hash values, and sector-range lists (§3).
//!
//! `EwfHeaderSection::parse_metadata` (`ewf.rs`) already does the
//! interesting part — decoding ASCII-or-UTF-16 tab-separated rows — kept
//! here verbatim and wrapped in an order-preserving map, since spec §3
//! requires round-tripping insertion order on enumeration (S6) and a
//! plain `HashMap` cannot do that.

use std::collections::HashMap;

/// An ordered `identifier -> value` mapping. Identifiers are unique;
/// insertion order is preserved for round-tripping, matching §3's header
/// values contract and testable property S6.
#[derive(Debug, Clone, Default)]
pub struct OrderedMap {
    order: Vec<String>,
    values: HashMap<String, String>,
}

impl OrderedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.values.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(move |k| (k.as_str(), self.values[k].as_str()))
    }
}

/// Header values (case_number, evidence_number, acquiry_date, …), §3.
pub type HeaderValues = OrderedMap;

/// Hash values (digest name -> hex digest), §3.
pub type HashValues = OrderedMap;

/// Decode raw section bytes as ASCII first, falling back to UTF-16LE —
/// ported from `EwfHeaderSection::decode`.
pub fn decode_text(raw: &[u8]) -> String {
    if let Ok(txt) = String::from_utf8(raw.to_vec()) {
        return txt;
    }
    if raw.len() % 2 == 0 {
        let utf16: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        if let Ok(txt) = String::from_utf16(&utf16) {
            return txt;
        }
    }
    String::new()
}

/// Parse the tab-separated `header`/`header2` table into an
/// [`OrderedMap`], preserving the column order of the key row — ported
/// from `EwfHeaderSection::parse_metadata`/`table_to_map`, generalized
/// to preserve order instead of discarding it into a `HashMap`.
pub fn parse_header_values(raw: &[u8]) -> HeaderValues {
    let txt = decode_text(raw);
    let mut lines: Vec<&str> = txt
        .split(['\n', '\r'])
        .filter(|l| !l.trim().is_empty())
        .collect();

    if let Some(first) = lines.first_mut() {
        *first = first.trim_start_matches('\u{FEFF}');
    }

    let mut map = HeaderValues::new();
    for i in 0..lines.len().saturating_sub(1) {
        if lines[i].contains('\t') && lines[i + 1].contains('\t') {
            let keys: Vec<&str> = lines[i].split('\t').collect();
            let vals: Vec<&str> = lines[i + 1].split('\t').collect();
            for (k, v) in keys.into_iter().zip(vals) {
                map.insert(k.trim_matches('\0'), v.trim_matches('\0'));
            }
            return map;
        }
    }

    for l in lines {
        if let Some((k, v)) = l.split_once('\t') {
            map.insert(k.trim_matches('\0'), v.trim_matches('\0'));
        }
    }
    map
}

/// Serialize header values back into the tab-separated `header2` (UTF-16
/// capable) wire form: two rows, a key row and a value row, in insertion
/// order.
pub fn serialize_header_values(values: &HeaderValues) -> Vec<u8> {
    let keys: Vec<&str> = values.iter().map(|(k, _)| k).collect();
    let vals: Vec<&str> = values.iter().map(|(_, v)| v).collect();
    let mut text = String::new();
    text.push_str(&keys.join("\t"));
    text.push('\n');
    text.push_str(&vals.join("\t"));
    text.push('\n');
    text.into_bytes()
}

/// A contiguous run of sectors (§3 "Sector range"). Used for acquisition
/// errors, checksum errors, and session/track lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRange {
    pub first_sector: u64,
    pub number_of_sectors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip_preserves_order() {
        let mut values = HeaderValues::new();
        values.insert("c", "C-1");
        values.insert("n", "E-7");
        values.insert("m", "2024 03 15 10 20 30");

        let wire = serialize_header_values(&values);
        let parsed = parse_header_values(&wire);

        let original: Vec<_> = values.iter().collect();
        let round_tripped: Vec<_> = parsed.iter().collect();
        assert_eq!(original, round_tripped);
    }

    #[test]
    fn decode_falls_back_to_utf16() {
        // Needs a non-ASCII code point: its UTF-16LE bytes are not valid
        // UTF-8 on their own, which is what forces the fallback path.
        let utf16: Vec<u8> = "héllo"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        assert_eq!(decode_text(&utf16), "héllo");
    }
}
