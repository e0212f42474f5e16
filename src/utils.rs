/// Makes a carrier-supplied id safe to use as a single object path segment.
///
/// ASCII letters, digits and `-` pass through; every other byte becomes
/// `_` followed by two upper-case hex digits, `_` itself included. The
/// mapping is reversible, so distinct ids never share a path. `%` is not
/// used as the escape because the object store re-encodes it.
pub fn sanitize_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02X}", byte));
        }
    }
    out
}

/// Replaces every character with `*`, keeping the length visible in logs.
pub fn mask_secret(secret: &str) -> String {
    "*".repeat(secret.chars().count())
}

/// Last `n` characters of `s`, or all of it when shorter.
pub fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}
