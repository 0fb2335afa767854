use std::path::Path;
use std::time::Duration;

use resume_ingest::core::models::{CompanyId, UploadedFile};
use resume_ingest::core::settings_store::SettingsStore;
use resume_ingest::{init_tracing, IngestDependencies, IngestService};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: ingest_harness <company-id> <resume-or-zip>...");
        std::process::exit(1);
    }

    let company_id: CompanyId = match args[1].parse() {
        Ok(id) => id,
        Err(_) => {
            eprintln!("Invalid company id: {}", args[1]);
            std::process::exit(1);
        }
    };

    let mut uploads = Vec::new();
    for path in &args[2..] {
        if !Path::new(path).is_file() {
            eprintln!("File not found: {path}");
            std::process::exit(2);
        }

        let file_name = Path::new(path)
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("upload")
            .to_string();
        uploads.push(UploadedFile::new(file_name, tokio::fs::read(path).await?));
    }

    let settings = SettingsStore::new().load().await?;
    let deps = IngestDependencies::from_settings(&settings).await?;
    let service = IngestService::new(settings, deps);

    let batch_id = service.submit_batch(company_id, uploads).await?;
    let status = loop {
        let status = service.get_batch_status(company_id, batch_id).await?;
        if status.is_terminal() {
            break status;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
