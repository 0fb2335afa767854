use std::io::Cursor;
use std::path::Path;

use super::models::{DocumentFormat, UploadedFile};

const OLE_SIGNATURE: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";

/// Picks an extraction strategy. Content signatures win over the file name,
/// since upload names are untrusted; the extension is only a tie-breaker.
pub fn classify(file: &UploadedFile) -> DocumentFormat {
    if let Some(format) = sniff_signature(&file.bytes) {
        return format;
    }

    let by_name = format_from_extension(&file.file_name);
    if by_name != DocumentFormat::Unknown {
        return by_name;
    }

    if let Some(by_type) = file.declared_type.as_deref().map(format_from_content_type) {
        if by_type != DocumentFormat::Unknown {
            return by_type;
        }
    }

    if looks_like_text(&file.bytes) {
        return DocumentFormat::PlainText;
    }

    DocumentFormat::Unknown
}

fn sniff_signature(bytes: &[u8]) -> Option<DocumentFormat> {
    if bytes.is_empty() {
        return None;
    }

    let head = &bytes[..bytes.len().min(1024)];
    if head.starts_with(b"%PDF") || find(head, b"%PDF-").is_some() {
        return Some(DocumentFormat::Pdf);
    }
    if bytes.starts_with(OLE_SIGNATURE) {
        return Some(DocumentFormat::LegacyDoc);
    }
    if bytes.starts_with(ZIP_SIGNATURE) {
        return Some(if is_word_package(bytes) {
            DocumentFormat::ModernDoc
        } else {
            DocumentFormat::Unknown
        });
    }
    if bytes.starts_with(b"{\\rtf") {
        return Some(DocumentFormat::RichText);
    }
    if is_image(bytes) {
        return Some(DocumentFormat::Image);
    }

    None
}

fn is_word_package(bytes: &[u8]) -> bool {
    let Ok(mut archive) = zip::ZipArchive::new(Cursor::new(bytes)) else {
        return false;
    };
    let found = archive.by_name("word/document.xml").is_ok();
    found
}

fn is_image(bytes: &[u8]) -> bool {
    bytes.starts_with(b"\x89PNG\r\n\x1a\n")
        || bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        || bytes.starts_with(b"GIF87a")
        || bytes.starts_with(b"GIF89a")
        || bytes.starts_with(b"II*\x00")
        || bytes.starts_with(b"MM\x00*")
        || bytes.starts_with(b"BM")
        || (bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP")
}

fn looks_like_text(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let sample = &bytes[..bytes.len().min(4096)];
    if sample.contains(&0) {
        return false;
    }

    match std::str::from_utf8(sample) {
        Ok(text) => printable_ratio(text) > 0.9,
        // The sample may end mid-character.
        Err(err) if err.error_len().is_none() => {
            printable_ratio(&String::from_utf8_lossy(&sample[..err.valid_up_to()])) > 0.9
        }
        Err(_) => false,
    }
}

fn printable_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let printable = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .count();
    printable as f64 / total as f64
}

pub fn format_from_extension(file_name: &str) -> DocumentFormat {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|v| v.to_str())
        .map(|v| v.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => DocumentFormat::Pdf,
        "doc" => DocumentFormat::LegacyDoc,
        "docx" => DocumentFormat::ModernDoc,
        "txt" | "text" | "md" => DocumentFormat::PlainText,
        "rtf" => DocumentFormat::RichText,
        "png" | "jpg" | "jpeg" | "gif" | "tif" | "tiff" | "bmp" | "webp" => DocumentFormat::Image,
        _ => DocumentFormat::Unknown,
    }
}

fn format_from_content_type(content_type: &str) -> DocumentFormat {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "application/pdf" => DocumentFormat::Pdf,
        "application/msword" => DocumentFormat::LegacyDoc,
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            DocumentFormat::ModernDoc
        }
        "text/plain" | "text/markdown" => DocumentFormat::PlainText,
        "application/rtf" | "text/rtf" => DocumentFormat::RichText,
        other if other.starts_with("image/") => DocumentFormat::Image,
        _ => DocumentFormat::Unknown,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    use super::*;

    fn file(name: &str, bytes: &[u8]) -> UploadedFile {
        UploadedFile::new(name, bytes.to_vec())
    }

    #[test]
    fn signature_beats_a_misleading_extension() {
        assert_eq!(
            classify(&file("resume.docx", b"%PDF-1.7\n...")),
            DocumentFormat::Pdf
        );

        let mut ole = OLE_SIGNATURE.to_vec();
        ole.extend_from_slice(&[0; 32]);
        assert_eq!(classify(&file("resume.pdf", &ole)), DocumentFormat::LegacyDoc);
        assert_eq!(
            classify(&file("scan.pdf", b"\x89PNG\r\n\x1a\n\0\0")),
            DocumentFormat::Image
        );
        assert_eq!(
            classify(&file("cv.txt", b"{\\rtf1\\ansi hello}")),
            DocumentFormat::RichText
        );
    }

    #[test]
    fn word_packages_are_recognised_by_their_document_part() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(b"<w:document/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        assert_eq!(classify(&file("upload.bin", &bytes)), DocumentFormat::ModernDoc);
    }

    #[test]
    fn text_without_a_signature_falls_back_to_content_sniffing() {
        assert_eq!(
            classify(&file("resume", b"Jane Roe\nSoftware engineer")),
            DocumentFormat::PlainText
        );
        assert_eq!(
            classify(&file("blob.bin", &[0x00, 0x13, 0x88, 0x02])),
            DocumentFormat::Unknown
        );
    }

    #[test]
    fn empty_files_use_the_extension_hint() {
        assert_eq!(classify(&file("empty.txt", b"")), DocumentFormat::PlainText);
        assert_eq!(classify(&file("empty", b"")), DocumentFormat::Unknown);
    }
}
