/// Canonical comparison key for a free-text field: trimmed, lower-cased, with
/// every whitespace run collapsed to one space. `None` and blank input give "".
pub fn normalize(s: Option<&str>) -> String {
    let Some(s) = s else {
        return String::new();
    };
    let mut out = String::with_capacity(s.len());
    for word in s.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

/// `Some(trimmed)` when the field carries any non-whitespace text.
pub fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|v| !v.is_empty())
}
