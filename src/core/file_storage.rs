use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use uuid::Uuid;

use super::models::CompanyId;

const MAX_STORED_NAME_CHARS: usize = 120;

/// Original upload bytes, one directory per company.
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Writes the bytes and returns the storage path relative to the root.
    pub async fn save(
        &self,
        company_id: CompanyId,
        file_name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<String> {
        let relative = format!(
            "{company_id}/{}-{}",
            Uuid::new_v4(),
            sanitize_file_name(file_name)
        );
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }

        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed writing {}", path.display()))?;
        Ok(relative)
    }

    pub async fn read(&self, storage_path: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.resolve(storage_path)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed reading {}", path.display()))
    }

    /// Missing files are not an error.
    pub async fn remove(&self, storage_path: &str) -> anyhow::Result<()> {
        let path = self.resolve(storage_path)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed removing {}", path.display())),
        }
    }

    fn resolve(&self, storage_path: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(storage_path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            anyhow::bail!("invalid storage path {storage_path}");
        }
        Ok(self.root.join(relative))
    }
}

/// Keeps the last path segment of an archive entry name and drops anything
/// that is not safe in a file name.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .trim();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STORED_NAME_CHARS)
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_read_and_remove() {
        let temp = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(temp.path().to_path_buf());

        let path = storage
            .save(42, "bundle/Jane Roe (CV).pdf", b"%PDF-1.4")
            .await
            .unwrap();
        assert!(path.starts_with("42/"));
        assert!(path.ends_with("-Jane_Roe__CV_.pdf"));
        assert_eq!(storage.read(&path).await.unwrap(), b"%PDF-1.4");

        storage.remove(&path).await.unwrap();
        storage.remove(&path).await.unwrap();
        assert!(storage.read(&path).await.is_err());
    }

    #[tokio::test]
    async fn paths_outside_the_root_are_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(temp.path().to_path_buf());
        assert!(storage.read("../secrets.txt").await.is_err());
        assert!(storage.read("/etc/passwd").await.is_err());
    }

    #[test]
    fn hostile_names_are_made_safe() {
        assert_eq!(sanitize_file_name("..\\..\\evil.doc"), "evil.doc");
        assert_eq!(sanitize_file_name("   "), "upload");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
    }
}
