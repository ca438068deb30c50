use std::borrow::Cow;

use super::MAX_NAME_LENGTH;

fn is_stripped(b: u8) -> bool {
    b == 0x7f || (b < 0x20 && b != 0x09 && b != 0x0a && b != 0x0d)
}

/// Strip control characters and ANSI escape sequences from text.
///
/// Removes ASCII control chars (except tab, newline and carriage return),
/// CSI sequences (`\x1b[` ... final byte 0x40-0x7E), OSC sequences
/// (`\x1b]` ... BEL or `\x1b\\`) and bare ESC.
///
/// Returns `Cow::Borrowed` when there is nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    let len = bytes.len();

    if !bytes.iter().any(|&b| b == 0x1b || is_stripped(b)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];

        if b == 0x1b {
            match bytes.get(i + 1) {
                Some(b'[') => {
                    i += 2;
                    while i < len {
                        let c = bytes[i];
                        i += 1;
                        if (0x40..=0x7e).contains(&c) {
                            break;
                        }
                    }
                }
                Some(b']') => {
                    i += 2;
                    while i < len {
                        if bytes[i] == 0x07 {
                            i += 1;
                            break;
                        }
                        if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'\\') {
                            i += 2;
                            break;
                        }
                        i += 1;
                    }
                }
                _ => i += 1,
            }
        } else if is_stripped(b) {
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < len && bytes[i] != 0x1b && !is_stripped(bytes[i]) {
                i += 1;
            }
            // Only ASCII bytes end a run, so the slice stays on char boundaries.
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}

/// Sanitize a user-supplied name (tag, list, feed, api key).
///
/// Strips control characters, collapses surrounding whitespace and rejects
/// names that end up empty or longer than [`MAX_NAME_LENGTH`] characters.
/// The error string names the offending `kind` so callers can surface it.
pub fn sanitize_name(kind: &str, name: &str) -> Result<String, String> {
    let stripped = strip_control_chars(name);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return Err(format!("{kind} name cannot be empty or whitespace-only"));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(format!(
            "{kind} name is longer than {MAX_NAME_LENGTH} characters"
        ));
    }
    Ok(trimmed.to_owned())
}

/// Escape `%`, `_` and `\` for use inside a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strip_clean_text_is_borrowed() {
        assert!(matches!(
            strip_control_chars("plain text"),
            Cow::Borrowed("plain text")
        ));
    }

    #[test]
    fn test_strip_ansi_sequences() {
        assert_eq!(strip_control_chars("\x1b[31mred\x1b[0m"), "red");
        assert_eq!(
            strip_control_chars("\x1b]0;title\x07after"),
            "after"
        );
        assert_eq!(strip_control_chars("a\x00b\x7fc"), "abc");
    }

    #[test]
    fn test_strip_keeps_whitespace_controls() {
        assert_eq!(strip_control_chars("a\tb\nc\r"), "a\tb\nc\r");
    }

    #[test]
    fn test_sanitize_name_trims() {
        assert_eq!(sanitize_name("Tag", "  rust  ").unwrap(), "rust");
    }

    #[test]
    fn test_sanitize_name_rejects_empty() {
        let err = sanitize_name("Tag", " \x1b[0m ").unwrap_err();
        assert!(err.contains("Tag name cannot be empty"));
    }

    #[test]
    fn test_sanitize_name_rejects_too_long() {
        let long = "x".repeat(MAX_NAME_LENGTH + 1);
        assert!(sanitize_name("List", &long).is_err());
        let exact = "y".repeat(MAX_NAME_LENGTH);
        assert_eq!(sanitize_name("List", &exact).unwrap(), exact);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("100%_done\\"), "100\\%\\_done\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    proptest! {
        #[test]
        fn sanitized_names_have_no_controls(name in ".{0,64}") {
            if let Ok(clean) = sanitize_name("Tag", &name) {
                prop_assert!(!clean.is_empty());
                prop_assert!(!clean.bytes().any(|b| b == 0x1b || is_stripped(b)));
                prop_assert_eq!(clean.trim(), clean.as_str());
            }
        }
    }
}
