use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use super::Converter;

/// `antiword` is fast and handles most Word 97-2003 files.
pub struct AntiwordConverter {
    executable_path: String,
    timeout: Duration,
}

impl AntiwordConverter {
    pub fn new(executable_path: String, timeout: Duration) -> Self {
        Self {
            executable_path,
            timeout,
        }
    }
}

#[async_trait]
impl Converter for AntiwordConverter {
    fn name(&self) -> &'static str {
        "antiword"
    }

    async fn extract(&self, data: &[u8]) -> anyhow::Result<String> {
        let temp_dir = tempfile::Builder::new()
            .prefix("resume-ingest-antiword-")
            .tempdir()
            .context("failed to create antiword temp dir")?;
        let input_path = temp_dir.path().join("resume.doc");
        tokio::fs::write(&input_path, data).await?;

        let mut command = Command::new(&self.executable_path);
        command
            .arg("-m")
            .arg("UTF-8.txt")
            .arg("-w")
            .arg("0")
            .arg(&input_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .context("antiword timed out")?
            .with_context(|| format!("failed to run {}", self.executable_path))?;

        if !output.status.success() {
            anyhow::bail!(
                "antiword exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Headless LibreOffice conversion to plain text. Slow to start but reads almost
/// anything, so it sits at the end of the document chains.
pub struct SofficeConverter {
    executable_path: String,
    timeout: Duration,
}

impl SofficeConverter {
    pub fn new(executable_path: String, timeout: Duration) -> Self {
        Self {
            executable_path,
            timeout,
        }
    }
}

#[async_trait]
impl Converter for SofficeConverter {
    fn name(&self) -> &'static str {
        "soffice"
    }

    async fn extract(&self, data: &[u8]) -> anyhow::Result<String> {
        let temp_dir = tempfile::Builder::new()
            .prefix("resume-ingest-soffice-")
            .tempdir()
            .context("failed to create soffice temp dir")?;
        let input_path = temp_dir.path().join("resume.bin");
        let out_dir = temp_dir.path().join("out");
        let profile_dir = temp_dir.path().join("profile");
        tokio::fs::write(&input_path, data).await?;
        tokio::fs::create_dir_all(&out_dir).await?;

        // A private profile keeps concurrent conversions from fighting over the user lock.
        let profile_url = url::Url::from_directory_path(&profile_dir)
            .map_err(|_| anyhow::anyhow!("invalid profile path {}", profile_dir.display()))?;

        let mut command = Command::new(&self.executable_path);
        command
            .arg(format!("-env:UserInstallation={profile_url}"))
            .arg("--headless")
            .arg("--convert-to")
            .arg("txt:Text (encoded):UTF8")
            .arg("--outdir")
            .arg(&out_dir)
            .arg(&input_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .context("soffice timed out")?
            .with_context(|| format!("failed to run {}", self.executable_path))?;

        if !output.status.success() {
            anyhow::bail!(
                "soffice exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let converted = out_dir.join("resume.txt");
        let bytes = tokio::fs::read(&converted)
            .await
            .with_context(|| format!("soffice produced no output at {}", converted.display()))?;

        Ok(super::text::decode_text(&bytes))
    }
}
