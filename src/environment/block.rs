//! Double-NUL-terminated environment blocks (`GetEnvironmentStrings` wire form).
//!
//! A block is a sequence of `NAME=VALUE` entries, each terminated by one NUL, followed by a
//! final NUL. An empty block is two NULs.

use widestring::{U16Str, U16String};

/// Splits a `NAME=VALUE` entry at its first `=`.
///
/// Returns `None` when there is no `=` or the name is empty.
pub(crate) fn split_entry(entry: &str) -> Option<(&str, &str)> {
    let (name, value) = entry.split_once('=')?;
    (!name.is_empty()).then_some((name, value))
}

/// Serializes entries into a UTF-8 block.
pub(crate) fn encode<'a, I>(entries: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut block = Vec::new();
    for (name, value) in entries {
        block.extend_from_slice(name.as_bytes());
        block.push(b'=');
        block.extend_from_slice(value.as_bytes());
        block.push(0);
    }
    if block.is_empty() {
        block.push(0);
    }
    block.push(0);
    block
}

/// Serializes entries into a UTF-16 block.
pub(crate) fn encode_wide<'a, I>(entries: I) -> Vec<u16>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut block = U16String::new();
    for (name, value) in entries {
        block.push_str(name);
        block.push_char('=');
        block.push_str(value);
        block.push_char('\0');
    }
    if block.is_empty() {
        block.push_char('\0');
    }
    block.push_char('\0');
    block.into_vec()
}

/// Parses a UTF-8 block.
///
/// Parsing stops at the first empty entry or at the end of input. Entries without `=` or with
/// an empty name are skipped; invalid UTF-8 is replaced.
pub(crate) fn decode(block: &[u8]) -> Vec<(String, String)> {
    block
        .split(|&byte| byte == 0)
        .take_while(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            split_entry(&entry).map(|(name, value)| (name.to_string(), value.to_string()))
        })
        .collect()
}

/// Parses a UTF-16 block with the same rules as [`decode`].
pub(crate) fn decode_wide(block: &[u16]) -> Vec<(String, String)> {
    block
        .split(|&unit| unit == 0)
        .take_while(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = U16Str::from_slice(entry).to_string_lossy();
            split_entry(&entry).map(|(name, value)| (name.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_block_is_two_nuls() {
        let none: [(&str, &str); 0] = [];
        assert_eq!(encode(none), vec![0, 0]);
        assert_eq!(encode_wide(none), vec![0, 0]);
        assert!(decode(&[0, 0]).is_empty());
    }

    #[test]
    fn encode_layout() {
        assert_eq!(encode([("A", "1"), ("BC", "")]), b"A=1\0BC=\0\0".to_vec());
    }

    #[test]
    fn decode_skips_malformed_entries() {
        let entries = decode(b"A=1\0junk\0=x\0B=2=3\0\0C=ignored\0\0");
        assert_eq!(
            entries,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2=3".to_string())
            ]
        );
    }

    #[test]
    fn decode_without_terminator() {
        assert_eq!(decode(b"A=1"), vec![("A".to_string(), "1".to_string())]);
    }

    #[test]
    fn wide_block_matches_narrow() {
        let wide = encode_wide([("PATH", "/bin"), ("Ω", "ü")]);
        assert_eq!(
            decode_wide(&wide),
            vec![
                ("PATH".to_string(), "/bin".to_string()),
                ("Ω".to_string(), "ü".to_string())
            ]
        );
    }

    #[test]
    fn split_entry_rules() {
        assert_eq!(split_entry("A=B"), Some(("A", "B")));
        assert_eq!(split_entry("A="), Some(("A", "")));
        assert_eq!(split_entry("=B"), None);
        assert_eq!(split_entry("AB"), None);
    }
}
