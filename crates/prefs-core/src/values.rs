//! Conversions between stored strings and typed preference values.

pub const LIST_DELIMITER: char = ',';

pub fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value {
        Some(value) => value.trim().eq_ignore_ascii_case("true"),
        None => default,
    }
}

pub fn parse_i32(value: Option<&str>, default: i32) -> i32 {
    value
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

pub fn parse_i64(value: Option<&str>, default: i64) -> i64 {
    value
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

pub fn parse_f64(value: Option<&str>, default: f64) -> f64 {
    value
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Splits a delimited list value. An empty value is an empty list, not a
/// list holding one empty entry.
pub fn split_list(value: &str, delimiter: char) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value.split(delimiter).map(str::to_string).collect()
}

pub fn join_list<S: AsRef<str>>(entries: &[S], delimiter: char) -> String {
    let mut out = String::new();
    for (idx, entry) in entries.iter().enumerate() {
        if idx > 0 {
            out.push(delimiter);
        }
        out.push_str(entry.as_ref());
    }
    out
}

/// Truncates or pads `entries` to `len`, padding with `pad`. Used to keep
/// parallel list preferences the same length as the list they describe.
pub fn align_list(mut entries: Vec<String>, len: usize, pad: &str) -> Vec<String> {
    entries.truncate(len);
    while entries.len() < len {
        entries.push(pad.to_string());
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_parsing_is_lenient() {
        assert!(parse_bool(Some("TRUE"), false));
        assert!(parse_bool(Some(" true "), false));
        assert!(!parse_bool(Some("yes"), true));
        assert!(parse_bool(None, true));
    }

    #[test]
    fn numbers_fall_back_to_default() {
        assert_eq!(parse_i32(Some("42"), 0), 42);
        assert_eq!(parse_i32(Some("4x"), 7), 7);
        assert_eq!(parse_i64(Some("-9000000000"), 0), -9_000_000_000);
        assert_eq!(parse_f64(Some("0.5"), 1.0), 0.5);
        assert_eq!(parse_f64(None, 1.5), 1.5);
    }

    #[test]
    fn lists_split_join_and_align() {
        assert!(split_list("", LIST_DELIMITER).is_empty());
        let hosts = split_list("a.example,b.example,c.example", LIST_DELIMITER);
        assert_eq!(hosts.len(), 3);

        let ports = align_list(split_list("8080", LIST_DELIMITER), hosts.len(), "80");
        assert_eq!(ports, vec!["8080", "80", "80"]);

        let names = align_list(split_list("x,y,z,w", LIST_DELIMITER), hosts.len(), "");
        assert_eq!(names, vec!["x", "y", "z"]);

        assert_eq!(join_list(&ports, LIST_DELIMITER), "8080,80,80");
    }
}
