//! Return path (`nx`) sanitizing and cookie encoding.

/// Longest return path kept; anything longer falls back to the default.
pub const MAX_RETURN_PATH_LEN: usize = 2048;

/// Reduce a candidate return path to a same-origin absolute path.
///
/// The result is either `raw` unchanged or `default`. Rejected: empty values,
/// anything not starting with exactly one `/`, backslashes, control characters,
/// encoded leading slashes, embedded `http:`/`https:` schemes, and over-long values.
///
/// `default` must itself pass these checks for the function to be idempotent.
pub fn sanitize_internal_path(raw: &str, default: &str) -> String {
    if is_internal_path(raw) {
        raw.to_string()
    } else {
        default.to_string()
    }
}

/// Whether `path` is acceptable as a return path as-is.
pub fn is_internal_path(path: &str) -> bool {
    if path.is_empty() || path.len() > MAX_RETURN_PATH_LEN {
        return false;
    }
    if !path.starts_with('/') || path.starts_with("//") {
        return false;
    }
    if path.contains('\\') || path.chars().any(|c| c.is_control()) {
        return false;
    }

    let lower = path.to_ascii_lowercase();
    // Encoded "/" or "\" right after the leading slash turns into "//" once decoded.
    if lower.starts_with("/%2f") || lower.starts_with("/%5c") {
        return false;
    }
    !(lower.contains("http:") || lower.contains("https:"))
}

/// Encode a sanitized return path for the `nx` cookie value.
pub fn encode_return_path(path: &str) -> String {
    urlencoding::encode(path).into_owned()
}

/// Decode an `nx` cookie value. Malformed or unsafe values are `None`.
pub fn decode_return_path(value: &str) -> Option<String> {
    let decoded = urlencoding::decode(value).ok()?;
    is_internal_path(&decoded).then(|| decoded.into_owned())
}
