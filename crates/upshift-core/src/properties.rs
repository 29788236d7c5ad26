use std::collections::BTreeMap;

/// Parses the `key=value` line format used by the server's `.properties`
/// files. `#` and `!` start comments; `:` is accepted as a separator; a
/// backslash escapes the following character.
pub fn parse_properties(raw: &str) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    for line in raw.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let split_at = find_separator(line);
        let (key, value) = match split_at {
            Some(index) => (&line[..index], &line[index + 1..]),
            None => (line, ""),
        };
        properties.insert(unescape(key.trim()), unescape(value.trim()));
    }
    properties
}

pub fn format_property(key: &str, value: &str) -> String {
    format!("{}={}\n", escape(key), escape(value))
}

fn find_separator(line: &str) -> Option<usize> {
    let mut escaped = false;
    for (index, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '=' | ':' => return Some(index),
            _ => {}
        }
    }
    None
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('=', "\\=")
        .replace(':', "\\:")
        .replace('\n', "\\n")
}
