use std::io::{Cursor, Read};

use anyhow::Context;
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::Converter;

/// Reads the WordprocessingML body directly out of the package. Headers are
/// included because many templates put the candidate's contact line there.
pub struct DocxConverter;

#[async_trait]
impl Converter for DocxConverter {
    fn name(&self) -> &'static str {
        "docx-reader"
    }

    async fn extract(&self, data: &[u8]) -> anyhow::Result<String> {
        extract_docx_text(data)
    }
}

fn extract_docx_text(data: &[u8]) -> anyhow::Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).context("not a zip package")?;

    let mut parts: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("word/header") && name.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    parts.sort();
    parts.push("word/document.xml".to_string());

    let mut sections = Vec::new();
    for part in parts {
        let mut xml = String::new();
        archive
            .by_name(&part)
            .with_context(|| format!("missing {part}"))?
            .read_to_string(&mut xml)?;

        let text = paragraphs_from_xml(&xml)?;
        if !text.is_empty() {
            sections.push(text);
        }
    }

    Ok(sections.join("\n"))
}

fn paragraphs_from_xml(xml: &str) -> anyhow::Result<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut current = String::new();
    let mut lines = Vec::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:p" => current.clear(),
                b"w:t" => in_text_run = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" | b"w:cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:p" => {
                    let line = current.trim();
                    if !line.is_empty() {
                        lines.push(line.to_string());
                    }
                    current.clear();
                }
                b"w:t" => in_text_run = false,
                b"w:tc" => current.push('\t'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_run {
                    current.push_str(&e.xml_content()?);
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(err.into()),
            _ => {}
        }

        buf.clear();
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    use super::*;

    fn package(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, body) in parts {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn reads_paragraphs_tabs_and_headers() {
        let body = r#"<w:document><w:body>
            <w:p><w:r><w:t>Senior</w:t></w:r><w:r><w:t xml:space="preserve"> Engineer</w:t></w:r></w:p>
            <w:p><w:r><w:t>Rust</w:t><w:tab/><w:t>Go</w:t></w:r></w:p>
            <w:p></w:p>
        </w:body></w:document>"#;
        let header = r#"<w:hdr><w:p><w:r><w:t>Jane Roe, PhD</w:t></w:r></w:p></w:hdr>"#;
        let bytes = package(&[("word/document.xml", body), ("word/header1.xml", header)]);

        let text = DocxConverter.extract(&bytes).await.unwrap();
        assert_eq!(text, "Jane Roe, PhD\nSenior Engineer\nRust\tGo");
    }

    #[tokio::test]
    async fn package_without_a_body_is_an_error() {
        let bytes = package(&[("content.xml", "<x/>")]);
        assert!(DocxConverter.extract(&bytes).await.is_err());
    }
}
