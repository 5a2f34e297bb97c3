//! Error summary sanitization for audit rows.

/// Maximum number of characters stored in `last_error`.
pub const MAX_ERROR_CHARS: usize = 400;

/// Reduces an error to `{kind}: {message}` on a single line, truncated to
/// [`MAX_ERROR_CHARS`] characters.
#[must_use]
pub fn sanitize_error(kind: &str, message: &str) -> String {
    format!("{kind}: {message}")
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .take(MAX_ERROR_CHARS)
        .collect()
}
