//! Text normalization for free-text log fields.
//!
//! VRChat log lines frequently carry zero-width Unicode, full-width
//! whitespace, and decorative separator runs around display names. Every
//! parser in the crate funnels extracted text through [`normalize`] so a
//! "name" is never just decoration.
//!
//! The function is pure and idempotent: `normalize(normalize(x)) ==
//! normalize(x)`.

/// Maximum length of a normalized field, in characters.
const MAX_NORMALIZED_LEN: usize = 160;

/// Separator characters trimmed from the front of a field.
fn is_separator(c: char) -> bool {
    matches!(c, '-' | ':' | '|' | '\u{2013}' | '\u{2014}')
}

/// Quote characters trimmed from either end of a field.
fn is_quote(c: char) -> bool {
    matches!(c, '"' | '\'' | '\u{201C}' | '\u{201D}' | '\u{2018}' | '\u{2019}')
}

/// Cleans a raw text fragment extracted from a log line.
///
/// - strips zero-width code points (U+200B..U+200D, U+FEFF)
/// - maps the full-width space (U+3000) to an ASCII space
/// - collapses doubled pipe characters
/// - trims surrounding quotes and leading separator runs
/// - truncates to 160 characters
///
/// Returns an empty string when the residue is empty or consists only of
/// separator characters.
pub fn normalize(text: &str) -> String {
    let mut cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .map(|c| if c == '\u{3000}' { ' ' } else { c })
        .collect();

    while cleaned.contains("||") {
        cleaned = cleaned.replace("||", "|");
    }

    let trimmed = trim_decoration(&cleaned);
    // Truncation can expose fresh trailing decoration, so trim once more.
    let capped: String = trimmed.chars().take(MAX_NORMALIZED_LEN).collect();
    let result = trim_decoration(&capped);

    if result
        .chars()
        .all(|c| is_separator(c) || c.is_whitespace())
    {
        return String::new();
    }

    result.to_string()
}

/// Trims whitespace, surrounding quotes, and leading separator runs to a
/// fixed point. Stripping a quote can expose another separator run and
/// vice versa, so a single pass is not enough.
fn trim_decoration(text: &str) -> &str {
    let mut slice = text;
    loop {
        let before = slice.len();
        slice = slice.trim();
        slice = slice.trim_matches(is_quote);
        slice = slice.trim_start_matches(is_separator);
        if slice.len() == before {
            return slice;
        }
    }
}
