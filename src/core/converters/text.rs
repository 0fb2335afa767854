use std::collections::HashSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::Converter;

static PAGE_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:page\s*)?\d{1,3}(?:\s*(?:/|of)\s*\d{1,3})?\s*$").unwrap()
});
static RULE_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[-_=*~.•·]{3,}\s*$").unwrap());
static INLINE_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
static RTF_CONTROL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\([a-zA-Z]+)(-?\d+)? ?|\\'([0-9a-fA-F]{2})|\\([{}\\])|[{}]").unwrap());

const RTF_SKIP_DESTINATIONS: [&str; 8] = [
    "fonttbl",
    "colortbl",
    "stylesheet",
    "info",
    "pict",
    "header",
    "footer",
    "xmlnstbl",
];

/// Reads plain text uploads. Invalid UTF-8 is treated as Latin-1 rather than rejected.
pub struct PlainTextConverter;

#[async_trait]
impl Converter for PlainTextConverter {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    async fn extract(&self, data: &[u8]) -> anyhow::Result<String> {
        Ok(decode_text(data))
    }
}

/// Strips RTF control words in-process; good enough for most exported resumes.
pub struct RtfConverter;

#[async_trait]
impl Converter for RtfConverter {
    fn name(&self) -> &'static str {
        "rtf-stripper"
    }

    async fn extract(&self, data: &[u8]) -> anyhow::Result<String> {
        let source = decode_text(data);
        if !source.trim_start().starts_with("{\\rtf") {
            anyhow::bail!("missing RTF header");
        }
        Ok(strip_rtf(&source))
    }
}

pub fn decode_text(data: &[u8]) -> String {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => data.iter().map(|&b| b as char).collect(),
    }
}

pub fn strip_rtf(source: &str) -> String {
    let mut out = String::with_capacity(source.len() / 2);
    // Depth at which an ignorable destination group started, if inside one.
    let mut skip_from: Option<usize> = None;
    let mut depth = 0usize;
    let mut cursor = 0usize;

    for caps in RTF_CONTROL_RE.captures_iter(source) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if skip_from.is_none() {
            out.push_str(&source[cursor..whole.start()].replace(['\r', '\n'], ""));
        }
        cursor = whole.end();

        match whole.as_str() {
            "{" => {
                depth += 1;
                continue;
            }
            "}" => {
                if skip_from == Some(depth) {
                    skip_from = None;
                }
                depth = depth.saturating_sub(1);
                continue;
            }
            _ => {}
        }

        if skip_from.is_some() {
            continue;
        }

        if let Some(word) = caps.get(1).map(|m| m.as_str()) {
            if RTF_SKIP_DESTINATIONS.contains(&word) {
                skip_from = Some(depth);
                continue;
            }
            match word {
                "par" | "line" | "row" | "page" => out.push('\n'),
                "tab" | "cell" => out.push('\t'),
                "u" => {
                    let code = caps
                        .get(2)
                        .and_then(|m| m.as_str().parse::<i32>().ok())
                        .map(|v| if v < 0 { v + 65536 } else { v });
                    if let Some(ch) = code.and_then(|v| char::from_u32(v as u32)) {
                        out.push(ch);
                    }
                }
                _ => {}
            }
        } else if let Some(hex) = caps.get(3) {
            if let Ok(byte) = u8::from_str_radix(hex.as_str(), 16) {
                out.push(byte as char);
            }
        } else if let Some(escaped) = caps.get(4) {
            out.push_str(escaped.as_str());
        }
    }

    if skip_from.is_none() && cursor < source.len() {
        out.push_str(&source[cursor..]);
    }

    out
}

/// Cleans converter output before the length threshold is checked: drops page
/// numbers, rule lines and repeated lines, and collapses long character runs.
pub fn normalize_text(raw: &str) -> String {
    let mut seen: HashSet<String> = HashSet::new();
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = false;

    for raw_line in raw.replace("\r\n", "\n").replace(['\r', '\u{c}'], "\n").lines() {
        let collapsed = INLINE_SPACE_RE.replace_all(raw_line.trim(), " ");

        if collapsed.is_empty() {
            if !blank_run && !lines.is_empty() {
                lines.push(String::new());
            }
            blank_run = true;
            continue;
        }

        if PAGE_NUMBER_RE.is_match(&collapsed) || RULE_LINE_RE.is_match(&collapsed) {
            continue;
        }

        let line = collapse_repeated_chars(&collapsed);

        if !seen.insert(line.to_lowercase()) {
            continue;
        }

        blank_run = false;
        lines.push(line);
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

/// Runs of three or more identical punctuation characters become one.
fn collapse_repeated_chars(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        let mut run = 1;
        while chars.peek() == Some(&ch) {
            chars.next();
            run += 1;
        }

        let keep = if run >= 3 && !ch.is_alphanumeric() { 1 } else { run };
        for _ in 0..keep {
            out.push(ch);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_page_numbers_rules_and_repeats() {
        let raw = "Jane Roe\nPage 1 of 2\n-----------\nRust engineer\n\n\nJANE ROE\n  3  \nBuilt   things!!!!!";
        let cleaned = normalize_text(raw);
        assert_eq!(cleaned, "Jane Roe\nRust engineer\n\nBuilt things!");
    }

    #[test]
    fn double_punctuation_is_kept() {
        assert_eq!(collapse_repeated_chars("C++ and ..."), "C++ and .");
        assert_eq!(collapse_repeated_chars("aaa bbb"), "aaa bbb");
    }

    #[test]
    fn latin1_bytes_decode_instead_of_failing() {
        assert_eq!(decode_text(b"Jos\xe9"), "José");
        assert_eq!(decode_text(b"\xEF\xBB\xBFhello"), "hello");
    }

    #[test]
    fn rtf_stripping_keeps_body_text() {
        let rtf = r"{\rtf1\ansi{\fonttbl{\f0 Arial;}}\f0\fs24 Jane Roe\par Senior \b Engineer\b0\par caf\'e9}";
        let text = strip_rtf(rtf);
        assert!(text.contains("Jane Roe\nSenior Engineer\ncafé"), "{text:?}");
        assert!(!text.contains("Arial"));
    }

    #[tokio::test]
    async fn rtf_converter_rejects_non_rtf_input() {
        assert!(RtfConverter.extract(b"just text").await.is_err());
    }
}
