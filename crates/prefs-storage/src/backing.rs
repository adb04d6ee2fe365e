//! Layout of a load level's backing file: the load level's own keys as-is,
//! descendant keys prefixed with the descendant's relative path and a double
//! separator (`editor/colors//background=...`). Node names never contain a
//! separator, so the first `//` always splits path from key and keys may
//! contain `/` freely.

use crate::{VERSION_KEY, VERSION_VALUE};
use chrono::{DateTime, Utc};
use prefs_core::properties;
use prefs_core::PATH_SEPARATOR;
use std::collections::BTreeMap;

const KEY_SEPARATOR: &str = "//";

/// Properties of one node below (or at) the load level.
#[derive(Debug, Clone)]
pub(crate) struct NodeSnapshot {
    pub(crate) relative: Vec<String>,
    pub(crate) properties: BTreeMap<String, String>,
}

pub(crate) fn encode(snapshots: &[NodeSnapshot], written_at: DateTime<Utc>) -> Vec<u8> {
    let mut entries = BTreeMap::new();
    for snapshot in snapshots {
        let prefix = snapshot.relative.join(&PATH_SEPARATOR.to_string());
        for (key, value) in &snapshot.properties {
            entries.insert(encode_key(&prefix, key), value.clone());
        }
    }
    entries.insert(VERSION_KEY.to_string(), VERSION_VALUE.to_string());
    let header = written_at.format("%a %b %d %H:%M:%S UTC %Y").to_string();
    properties::serialize(&entries, Some(&header)).into_bytes()
}

fn encode_key(prefix: &str, key: &str) -> String {
    if !prefix.is_empty() {
        format!("{prefix}{KEY_SEPARATOR}{key}")
    } else if key.contains(KEY_SEPARATOR) || key == VERSION_KEY {
        // An own key that would read back as a descendant key or as the
        // marker gets an empty path in front.
        format!("{KEY_SEPARATOR}{key}")
    } else {
        key.to_string()
    }
}

/// Splits a stored key into the descendant path it belongs to and the
/// property key. Returns `None` for the version marker and for keys with an
/// empty property name.
pub(crate) fn decode_key(stored: &str) -> Option<(Vec<String>, String)> {
    if stored == VERSION_KEY {
        return None;
    }
    let (prefix, key) = match stored.find(KEY_SEPARATOR) {
        Some(idx) => (&stored[..idx], &stored[idx + KEY_SEPARATOR.len()..]),
        None => ("", stored),
    };
    if key.is_empty() {
        return None;
    }
    let relative = prefix
        .split(PATH_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();
    Some((relative, key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use prefs_core::properties::parse;

    fn written_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn encodes_descendants_with_prefix() {
        let mut own = BTreeMap::new();
        own.insert("theme".to_string(), "dark".to_string());
        let mut colors = BTreeMap::new();
        colors.insert("background".to_string(), "#000".to_string());

        let bytes = encode(
            &[
                NodeSnapshot {
                    relative: Vec::new(),
                    properties: own,
                },
                NodeSnapshot {
                    relative: vec!["editor".to_string(), "colors".to_string()],
                    properties: colors,
                },
            ],
            written_at(),
        );
        let text = String::from_utf8(bytes).expect("ascii");
        assert!(text.starts_with("#Sun Oct 18 09:30:00 UTC 2026\n"));

        let parsed = parse(&text);
        assert_eq!(parsed.entries.get("theme").map(String::as_str), Some("dark"));
        assert_eq!(
            parsed.entries.get("editor/colors//background").map(String::as_str),
            Some("#000")
        );
        assert_eq!(parsed.entries.get(VERSION_KEY).map(String::as_str), Some("1"));
    }

    #[test]
    fn decodes_keys() {
        assert_eq!(decode_key("theme"), Some((Vec::new(), "theme".to_string())));
        assert_eq!(
            decode_key("editor/colors//background"),
            Some((
                vec!["editor".to_string(), "colors".to_string()],
                "background".to_string()
            ))
        );
        assert_eq!(
            decode_key("a/b/"),
            Some((Vec::new(), "a/b/".to_string()))
        );
        assert_eq!(decode_key("editor//"), None);
        assert_eq!(decode_key(VERSION_KEY), None);
    }

    #[test]
    fn keys_with_separators_read_back_unchanged() {
        let cases = [
            ("", "a/b"),
            ("", "a/"),
            ("", "/lead"),
            ("", "x//y"),
            ("", VERSION_KEY),
            ("editor", "font/size"),
            ("editor/colors", "/lead//odd"),
        ];
        for (prefix, key) in cases {
            let stored = encode_key(prefix, key);
            let relative: Vec<String> = prefix
                .split(PATH_SEPARATOR)
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect();
            assert_eq!(
                decode_key(&stored),
                Some((relative, key.to_string())),
                "stored as {stored}"
            );
        }
    }
}
