use anyhow::Context;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::Converter;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)https?://[^\s<>'"\)]+"#).unwrap());
static MAILTO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"mailto:[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

/// Text layer extraction via `pdf-extract`. Link annotations are not part of the
/// text layer, so URLs found in the raw byte stream are appended afterwards.
pub struct PdfTextConverter;

#[async_trait]
impl Converter for PdfTextConverter {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    async fn extract(&self, data: &[u8]) -> anyhow::Result<String> {
        let bytes = data.to_vec();
        let mut text = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&bytes).context("pdf text layer unreadable")
        })
        .await
        .context("pdf extraction task panicked")??;

        // A scanned PDF has links but no words; don't let links alone pass the threshold.
        if text.trim().is_empty() {
            return Ok(text);
        }

        let links = extract_hyperlinks(data, &text);
        if !links.is_empty() {
            text.push('\n');
            text.push_str(&links.join("\n"));
        }

        Ok(text)
    }
}

pub fn extract_hyperlinks(data: &[u8], already_present: &str) -> Vec<String> {
    let raw = String::from_utf8_lossy(data);
    let mut links: Vec<String> = Vec::new();
    let matches = URL_RE
        .find_iter(&raw)
        .chain(MAILTO_RE.find_iter(&raw))
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string());

    for value in matches {
        if already_present.contains(&value) {
            continue;
        }
        if !links
            .iter()
            .any(|existing: &String| existing.eq_ignore_ascii_case(&value))
        {
            links.push(value);
        }
    }

    links
}
