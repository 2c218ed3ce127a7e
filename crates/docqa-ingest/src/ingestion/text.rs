//! Page text normalization and a raw content-stream fallback

/// Glyph names that leak into extracted text from some PDF fonts
const GLYPH_NAMES: &[(&str, &str)] = &[
    ("uni2010", "-"),
    ("uni2011", "-"),
    ("uni2013", "-"),
    ("uni2014", "--"),
    ("uni2018", "'"),
    ("uni2019", "'"),
    ("uni201C", "\""),
    ("uni201D", "\""),
    ("uni2022", "* "),
    ("uni2026", "..."),
    ("uni00A0", " "),
    ("f_f_i", "ffi"),
    ("f_f_l", "ffl"),
    ("f_i", "fi"),
    ("f_l", "fl"),
    ("f_f", "ff"),
];

/// Typographic characters mapped to plain equivalents
const CHAR_REPLACEMENTS: &[(char, &str)] = &[
    ('\u{2010}', "-"),
    ('\u{2011}', "-"),
    ('\u{2013}', "-"),
    ('\u{2014}', "--"),
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
    ('\u{201C}', "\""),
    ('\u{201D}', "\""),
    ('\u{2022}', "* "),
    ('\u{2026}', "..."),
    ('\u{00A0}', " "),
    ('\u{FB00}', "ff"),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
    ('\0', ""),
];

/// Turn raw page text into markdown paragraphs.
///
/// Lines are trimmed, runs of blank lines collapse into a single paragraph
/// break, and leading/trailing blank lines are dropped.
pub fn normalize_page_text(raw: &str) -> String {
    let mut text = raw.to_string();
    for (glyph, plain) in GLYPH_NAMES {
        text = text.replace(&format!("/{}", glyph), plain);
        text = text.replace(&format!("<{}>", glyph), plain);
    }
    for (ch, plain) in CHAR_REPLACEMENTS {
        if text.contains(*ch) {
            text = text.replace(*ch, plain);
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut pending_break = false;
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            pending_break = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_break { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        pending_break = false;
    }
    out
}

/// Pull string operands of text-showing operators out of a content stream.
///
/// Used when font-aware extraction fails. Only literal strings inside
/// `BT`/`ET` blocks are considered; each text block ends a line.
pub fn scan_text_operators(content: &[u8]) -> String {
    let content = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut current = String::new();
    let mut in_text_block = false;

    for line in content.lines().map(str::trim) {
        match line {
            "BT" => {
                in_text_block = true;
                continue;
            }
            "ET" => {
                in_text_block = false;
                if !current.is_empty() {
                    text.push_str(current.trim_end());
                    text.push('\n');
                    current.clear();
                }
                continue;
            }
            _ => {}
        }

        if in_text_block && shows_text(line) {
            for literal in literal_strings(line) {
                current.push_str(&literal);
            }
            current.push(' ');
        }
    }

    text
}

fn shows_text(line: &str) -> bool {
    line.ends_with("Tj") || line.ends_with("TJ") || line.ends_with('\'') || line.ends_with('"')
}

/// Decode every `( ... )` literal on a line, honoring nesting and escapes
fn literal_strings(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if depth > 0 => match chars.next() {
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                Some('t') => current.push('\t'),
                Some(other) => current.push(other),
                None => {}
            },
            '(' => {
                if depth > 0 {
                    current.push(ch);
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    out.push(std::mem::take(&mut current));
                } else {
                    current.push(ch);
                }
            }
            _ if depth > 0 => current.push(ch),
            _ => {}
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_blank_runs() {
        let raw = "  Title  \n\n\n\n first line\nsecond line \n\n";
        assert_eq!(normalize_page_text(raw), "Title\n\nfirst line\nsecond line");
    }

    #[test]
    fn test_normalize_replaces_typography() {
        let raw = "\u{201C}quoted\u{201D} \u{2014} e\u{FB03}cient\0";
        assert_eq!(normalize_page_text(raw), "\"quoted\" -- efficient");
    }

    #[test]
    fn test_normalize_empty_page() {
        assert_eq!(normalize_page_text("\n \n\t\n"), "");
    }

    #[test]
    fn test_scan_text_operators() {
        let content = b"BT\n/F1 12 Tf\n72 700 Td\n(Hello \\(world\\)) Tj\nET\nBT\n[(Sec) -20 (ond)] TJ\nET\n";
        assert_eq!(scan_text_operators(content), "Hello (world)\nSecond\n");
    }

    #[test]
    fn test_scan_ignores_text_outside_blocks() {
        let content = b"(stray) Tj\nBT\nET\n";
        assert_eq!(scan_text_operators(content), "");
    }
}
