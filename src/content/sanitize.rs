/// Hard limit the destination site imposes on the title field.
pub const TITLE_MAX_CHARS: usize = 115;

/// Sanitize a title for the destination's title field: every `:` becomes `,`
/// and the result is truncated to 115 characters. No other characters are
/// touched and nothing is trimmed. Idempotent.
pub fn sanitize_title(title: &str) -> String {
    let sanitized = title.replace(':', ",");
    if sanitized.chars().count() > TITLE_MAX_CHARS {
        sanitized.chars().take(TITLE_MAX_CHARS).collect()
    } else {
        sanitized
    }
}
