//! Utility functions for safe string handling.

/// Marker appended to clipped text.
pub const CLIP_MARKER: &str = "\n[... truncated]";

/// Find the largest byte index <= `i` that is on a UTF-8 char boundary.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Clip `s` to at most `max_bytes` (plus [`CLIP_MARKER`] when clipped),
/// never splitting a UTF-8 codepoint.
pub fn clip(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut out = s[..floor_char_boundary(s, max_bytes)].to_string();
    out.push_str(CLIP_MARKER);
    out
}
