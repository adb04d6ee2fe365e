//! Reader and writer for the `key=value` properties text format used by the
//! native and legacy backing files.
//!
//! Reading is tolerant: an entry with a broken escape is reported in
//! [`ParsedProperties::malformed`] and skipped, every other entry still
//! loads. Writing always produces ASCII output (non-ASCII characters are
//! emitted as `\uXXXX`), so files stay readable as ISO-8859-1 or UTF-8.

use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEntry {
    /// 1-based physical line where the logical entry starts.
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedProperties {
    pub entries: BTreeMap<String, String>,
    pub malformed: Vec<MalformedEntry>,
}

impl ParsedProperties {
    /// Decodes as UTF-8, falling back to ISO-8859-1 when the bytes are not
    /// valid UTF-8.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => parse(text),
            Err(_) => {
                let text: String = bytes.iter().map(|byte| char::from(*byte)).collect();
                parse(&text)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn parse(text: &str) -> ParsedProperties {
    let mut parsed = ParsedProperties::default();
    for (line, logical) in logical_lines(text) {
        let (raw_key, raw_value) = split_key_value(&logical);
        let key = match unescape(raw_key) {
            Ok(key) => key,
            Err(reason) => {
                parsed.malformed.push(MalformedEntry { line, reason });
                continue;
            }
        };
        let value = match unescape(raw_value) {
            Ok(value) => value,
            Err(reason) => {
                parsed.malformed.push(MalformedEntry { line, reason });
                continue;
            }
        };
        parsed.entries.insert(key, value);
    }
    parsed
}

/// Renders `entries` sorted by key. `header` lines are written as `#`
/// comments before the entries.
pub fn serialize(entries: &BTreeMap<String, String>, header: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(header) = header {
        for line in header.lines() {
            out.push('#');
            out.push_str(&escape(line, EscapeMode::Comment));
            out.push('\n');
        }
    }
    for (key, value) in entries {
        out.push_str(&escape(key, EscapeMode::Key));
        out.push('=');
        out.push_str(&escape(value, EscapeMode::Value));
        out.push('\n');
    }
    out
}

fn is_blank(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\u{000C}')
}

fn ends_with_continuation(line: &str) -> bool {
    let trailing = line.chars().rev().take_while(|ch| *ch == '\\').count();
    trailing % 2 == 1
}

fn physical_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\n' => {
                lines.push(&text[start..idx]);
                start = idx + 1;
            }
            b'\r' => {
                lines.push(&text[start..idx]);
                if bytes.get(idx + 1) == Some(&b'\n') {
                    idx += 1;
                }
                start = idx + 1;
            }
            _ => {}
        }
        idx += 1;
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut logical = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for (idx, raw) in physical_lines(text).into_iter().enumerate() {
        let trimmed = raw.trim_start_matches(is_blank);
        let (start_line, mut buffer) = match current.take() {
            Some(pending) => pending,
            None => {
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                    continue;
                }
                (idx + 1, String::new())
            }
        };

        if ends_with_continuation(trimmed) {
            buffer.push_str(&trimmed[..trimmed.len() - 1]);
            current = Some((start_line, buffer));
        } else {
            buffer.push_str(trimmed);
            logical.push((start_line, buffer));
        }
    }

    if let Some(pending) = current {
        logical.push(pending);
    }
    logical
}

fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    let mut value_start = line.len();
    let mut has_separator = false;

    for (idx, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '=' | ':' => {
                key_end = idx;
                value_start = idx + 1;
                has_separator = true;
                break;
            }
            ch if is_blank(ch) => {
                key_end = idx;
                value_start = idx + 1;
                break;
            }
            _ => {}
        }
    }

    let mut rest = &line[value_start.min(line.len())..];
    rest = rest.trim_start_matches(is_blank);
    if !has_separator {
        if let Some(stripped) = rest.strip_prefix(&['=', ':'][..]) {
            rest = stripped.trim_start_matches(is_blank);
        }
    }
    (&line[..key_end], rest)
}

fn unescape(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut pending_high: Option<u16> = None;
    let mut chars = raw.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            flush_surrogate(&mut out, &mut pending_high);
            out.push(ch);
            continue;
        }
        let Some(next) = chars.next() else {
            // A lone trailing backslash is dropped.
            break;
        };
        if next != 'u' {
            flush_surrogate(&mut out, &mut pending_high);
            out.push(match next {
                't' => '\t',
                'n' => '\n',
                'r' => '\r',
                'f' => '\u{000C}',
                other => other,
            });
            continue;
        }

        let hex: String = chars.by_ref().take(4).collect();
        if hex.len() != 4 {
            return Err(format!("malformed \\uxxxx encoding: \\u{hex}"));
        }
        let unit = u16::from_str_radix(&hex, 16)
            .map_err(|_| format!("malformed \\uxxxx encoding: \\u{hex}"))?;
        match (pending_high.take(), unit) {
            (Some(high), 0xDC00..=0xDFFF) => {
                let decoded = char::decode_utf16([high, unit])
                    .map(|res| res.unwrap_or(char::REPLACEMENT_CHARACTER));
                out.extend(decoded);
            }
            (previous, 0xD800..=0xDBFF) => {
                if previous.is_some() {
                    out.push(char::REPLACEMENT_CHARACTER);
                }
                pending_high = Some(unit);
            }
            (previous, _) => {
                if previous.is_some() {
                    out.push(char::REPLACEMENT_CHARACTER);
                }
                out.push(char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
        }
    }
    flush_surrogate(&mut out, &mut pending_high);
    Ok(out)
}

fn flush_surrogate(out: &mut String, pending_high: &mut Option<u16>) {
    if pending_high.take().is_some() {
        out.push(char::REPLACEMENT_CHARACTER);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EscapeMode {
    Key,
    Value,
    Comment,
}

fn escape(input: &str, mode: EscapeMode) -> String {
    let mut out = String::with_capacity(input.len());
    for (idx, ch) in input.chars().enumerate() {
        match ch {
            '\\' if mode != EscapeMode::Comment => out.push_str("\\\\"),
            '\t' if mode != EscapeMode::Comment => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{000C}' if mode != EscapeMode::Comment => out.push_str("\\f"),
            ' ' if mode == EscapeMode::Key || (mode == EscapeMode::Value && idx == 0) => {
                out.push_str("\\ ")
            }
            '=' | ':' | '#' | '!' if mode != EscapeMode::Comment => {
                out.push('\\');
                out.push(ch);
            }
            ch if (' '..='~').contains(&ch) => out.push(ch),
            ch => {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{:04X}", unit);
                }
            }
        }
    }
    out
}
