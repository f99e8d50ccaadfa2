//! Key range definitions
//!
//! Shards within a keyspace are named by hex key ranges ("-80", "80-c0",
//! "c0-"). A range is the half-open byte interval [start, end); an empty
//! start is unbounded below and an empty end unbounded above. Unsharded
//! keyspaces use a single shard named "0" which carries no range at all.

use serde::{Deserialize, Serialize};

/// Key range parsing error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyRangeError {
    /// A range half was not valid even-length hex
    #[error("invalid hex in key range part: {0:?}")]
    InvalidHex(String),
    /// Start did not sort strictly below end
    #[error("empty key range: {0:?}")]
    EmptyRange(String),
}

/// Half-open key range [start, end)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    /// Start key (inclusive); empty means unbounded below
    pub start: Vec<u8>,
    /// End key (exclusive); empty means unbounded above
    pub end: Vec<u8>,
}

impl KeyRange {
    pub fn new(start: Vec<u8>, end: Vec<u8>) -> Self {
        Self { start, end }
    }

    /// Whether the range covers the entire keyspace
    pub fn is_complete(&self) -> bool {
        self.start.is_empty() && self.end.is_empty()
    }

    /// Whether the key falls inside the range
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice() && (self.end.is_empty() || key < self.end.as_slice())
    }

    /// Whether two ranges share at least one key
    pub fn intersects(&self, other: &KeyRange) -> bool {
        (self.end.is_empty() || other.start < self.end)
            && (other.end.is_empty() || self.start < other.end)
    }
}

impl std::fmt::Display for KeyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", hex_string(&self.start), hex_string(&self.end))
    }
}

/// Parse a shard name into its canonical name and optional key range.
///
/// Names without a dash ("0" in an unsharded keyspace) carry no range.
pub fn parse_shard_name(name: &str) -> Result<(String, Option<KeyRange>), KeyRangeError> {
    let Some((start, end)) = name.split_once('-') else {
        return Ok((name.to_string(), None));
    };
    let range = parse_key_range_parts(start, end)?;
    Ok((name.to_string(), Some(range)))
}

/// Parse the two hex halves of a range spec into a [`KeyRange`]
pub fn parse_key_range_parts(start: &str, end: &str) -> Result<KeyRange, KeyRangeError> {
    let start_key = parse_hex(start)?;
    let end_key = parse_hex(end)?;
    if !end_key.is_empty() && start_key >= end_key {
        return Err(KeyRangeError::EmptyRange(format!("{start}-{end}")));
    }
    Ok(KeyRange::new(start_key, end_key))
}

fn parse_hex(part: &str) -> Result<Vec<u8>, KeyRangeError> {
    if part.is_empty() {
        return Ok(Vec::new());
    }
    if !part.is_ascii() || part.len() % 2 != 0 {
        return Err(KeyRangeError::InvalidHex(part.to_string()));
    }
    (0..part.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&part[i..i + 2], 16)
                .map_err(|_| KeyRangeError::InvalidHex(part.to_string()))
        })
        .collect()
}

fn hex_string(key: &[u8]) -> String {
    key.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shard_name() {
        let (name, range) = parse_shard_name("-80").unwrap();
        assert_eq!(name, "-80");
        assert_eq!(range, Some(KeyRange::new(vec![], vec![0x80])));

        let (_, range) = parse_shard_name("80-c0").unwrap();
        assert_eq!(range, Some(KeyRange::new(vec![0x80], vec![0xc0])));

        let (_, range) = parse_shard_name("c0-").unwrap();
        assert_eq!(range, Some(KeyRange::new(vec![0xc0], vec![])));

        // Unsharded keyspaces have a single shard with no range.
        let (name, range) = parse_shard_name("0").unwrap();
        assert_eq!(name, "0");
        assert_eq!(range, None);

        let (_, range) = parse_shard_name("-").unwrap();
        assert!(range.unwrap().is_complete());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            parse_shard_name("x-80"),
            Err(KeyRangeError::InvalidHex(_))
        ));
        assert!(matches!(
            parse_shard_name("8-80"),
            Err(KeyRangeError::InvalidHex(_))
        ));
        assert!(matches!(
            parse_shard_name("80-80"),
            Err(KeyRangeError::EmptyRange(_))
        ));
        assert!(matches!(
            parse_shard_name("c0-80"),
            Err(KeyRangeError::EmptyRange(_))
        ));
    }

    #[test]
    fn test_intersects() {
        let left = parse_shard_name("-80").unwrap().1.unwrap();
        let right = parse_shard_name("80-").unwrap().1.unwrap();
        let full = parse_shard_name("-").unwrap().1.unwrap();
        let middle = parse_shard_name("40-c0").unwrap().1.unwrap();

        // Adjacent halves share no key.
        assert!(!left.intersects(&right));
        assert!(!right.intersects(&left));

        assert!(full.intersects(&left));
        assert!(full.intersects(&right));
        assert!(middle.intersects(&left));
        assert!(middle.intersects(&right));
    }

    #[test]
    fn test_contains() {
        let range = parse_shard_name("40-c0").unwrap().1.unwrap();
        assert!(range.contains(&[0x40]));
        assert!(range.contains(&[0xbf, 0xff]));
        assert!(!range.contains(&[0x3f]));
        assert!(!range.contains(&[0xc0]));

        let unbounded = parse_shard_name("c0-").unwrap().1.unwrap();
        assert!(unbounded.contains(&[0xff, 0xff]));
    }

    #[test]
    fn test_display() {
        let range = parse_shard_name("80-c0").unwrap().1.unwrap();
        assert_eq!(range.to_string(), "80-c0");
        assert_eq!(KeyRange::default().to_string(), "-");
    }
}
