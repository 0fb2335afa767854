use std::io::{Cursor, Read};

use tracing::{debug, warn};

use super::models::UploadedFile;

const MAX_NESTING_DEPTH: usize = 3;
const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";
const ZIP_CONTENT_TYPES: [&str; 3] = [
    "application/zip",
    "application/x-zip-compressed",
    "application/x-zip",
];

/// Flattens uploaded containers into individual files. Every file entry comes out
/// exactly once; anything that is not a container passes through untouched.
///
/// No entry is inflated past `max_entry_bytes`. Larger entries come out empty
/// with `exceeds_size_limit` set so the pipeline can fail them on their own.
pub fn expand_uploads(uploads: Vec<UploadedFile>, max_entry_bytes: u64) -> Vec<UploadedFile> {
    let mut expanded = Vec::with_capacity(uploads.len());
    for upload in uploads {
        expand_into(upload, 0, max_entry_bytes, &mut expanded);
    }
    expanded
}

fn expand_into(upload: UploadedFile, depth: usize, limit: u64, out: &mut Vec<UploadedFile>) {
    if depth >= MAX_NESTING_DEPTH || !is_archive(&upload) {
        out.push(upload);
        return;
    }

    match read_entries(&upload, limit) {
        Ok(entries) => {
            debug!(
                file = %upload.file_name,
                entries = entries.len(),
                depth,
                "expanded archive"
            );
            for entry in entries {
                expand_into(entry, depth + 1, limit, out);
            }
        }
        Err(err) => {
            // A corrupt container still counts as one file so totals reconcile.
            warn!(file = %upload.file_name, error = %err, "archive could not be opened");
            out.push(upload);
        }
    }
}

/// Word-processor packages share the zip signature; those are documents, not bundles.
pub fn is_archive(upload: &UploadedFile) -> bool {
    let by_name = upload.file_name.to_ascii_lowercase().ends_with(".zip");
    let by_type = upload
        .declared_type
        .as_deref()
        .is_some_and(|t| ZIP_CONTENT_TYPES.contains(&t.trim().to_ascii_lowercase().as_str()));

    (by_name || by_type) && upload.bytes.starts_with(ZIP_SIGNATURE)
}

fn read_entries(upload: &UploadedFile, limit: u64) -> anyhow::Result<Vec<UploadedFile>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(upload.bytes.as_slice()))?;
    let mut entries = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();

        // The header's declared size is not trusted; the read itself is capped.
        let mut bytes = Vec::new();
        (&mut entry)
            .take(limit.saturating_add(1))
            .read_to_end(&mut bytes)?;

        if bytes.len() as u64 > limit {
            warn!(file = %name, limit, "archive entry over the size limit");
            entries.push(UploadedFile::oversized(name));
            continue;
        }

        let file = UploadedFile::new(name, bytes);
        if file.file_name.to_ascii_lowercase().ends_with(".zip") {
            entries.push(file.with_declared_type("application/zip"));
        } else {
            entries.push(file);
        }
    }

    Ok(entries)
}
