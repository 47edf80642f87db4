/// Returns the first non-empty value among `candidates`.
pub fn read_first<F>(lookup: &F, candidates: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in candidates {
        if let Some(val) = lookup(key)
            && !val.trim().is_empty()
        {
            return Some(val.trim().to_string());
        }
    }
    None
}

/// Accepts the usual spellings of a boolean flag.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
